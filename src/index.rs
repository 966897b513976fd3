use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use geo::{BoundingRect, MultiPolygon, Rect, Relate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crs::Crs;
use crate::domain::{Collection, Partition};
use crate::error::GctsError;
use crate::region::Region;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryRule {
    #[default]
    Inclusive,
    Exclusive,
}

impl BoundaryRule {
    pub fn matches<A, B>(&self, a: &A, b: &B) -> bool
    where
        A: Relate<f64>,
        B: Relate<f64>,
    {
        let matrix = a.relate(b);
        match self {
            BoundaryRule::Inclusive => matrix.is_intersects(),
            BoundaryRule::Exclusive => matrix.is_intersects() && !matrix.is_touches(),
        }
    }
}

impl fmt::Display for BoundaryRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryRule::Inclusive => write!(f, "inclusive"),
            BoundaryRule::Exclusive => write!(f, "exclusive"),
        }
    }
}

impl FromStr for BoundaryRule {
    type Err = GctsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inclusive" => Ok(BoundaryRule::Inclusive),
            "exclusive" => Ok(BoundaryRule::Exclusive),
            _ => Err(GctsError::InvalidBoundary(value.to_string())),
        }
    }
}

// Extents are kept in WGS84 so one region lookup works for every partition CRS.
#[derive(Debug, Clone)]
struct IndexEntry {
    partition: Partition,
    geographic: Option<(MultiPolygon<f64>, Rect<f64>)>,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionIndex {
    entries: Vec<IndexEntry>,
}

impl PartitionIndex {
    pub fn new(partitions: impl IntoIterator<Item = Partition>) -> Self {
        let entries = partitions
            .into_iter()
            .map(|partition| IndexEntry {
                geographic: geographic_extent(&partition),
                partition,
            })
            .collect();
        Self { entries }
    }

    pub fn from_collection(collection: &Collection) -> Self {
        Self::new(collection.partitions().iter().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn select(
        &self,
        region: &Region,
        rule: BoundaryRule,
    ) -> Result<Vec<&Partition>, GctsError> {
        let query = region.reproject(&Crs::Wgs84)?;
        let query_bounds = query.bounding_rect();

        let mut selected = Vec::new();
        for entry in &self.entries {
            let Some((extent, bounds)) = &entry.geographic else {
                continue;
            };
            if !rects_touch(bounds, &query_bounds) {
                continue;
            }
            if rule.matches(extent, query.shape()) {
                selected.push(&entry.partition);
            }
        }

        debug!(
            total = self.entries.len(),
            selected = selected.len(),
            rule = %rule,
            "partition index lookup"
        );
        Ok(selected)
    }
}

fn geographic_extent(partition: &Partition) -> Option<(MultiPolygon<f64>, Rect<f64>)> {
    let extent = match partition.crs().transform_shape(&Crs::Wgs84, partition.extent()) {
        Ok(extent) => extent,
        Err(err) => {
            warn!(partition = partition.id(), error = %err, "partition extent is not usable");
            return None;
        }
    };
    let bounds = extent.bounding_rect()?;
    Some((extent, bounds))
}

fn rects_touch(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x
        && b.min().x <= a.max().x
        && a.min().y <= b.max().y
        && b.min().y <= a.max().y
}
