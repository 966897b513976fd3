use std::fmt;
use std::str::FromStr;

use geo::{BoundingRect, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::GctsError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionId(String);

impl CollectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionId {
    type Err = GctsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'));
        if !is_valid {
            return Err(GctsError::CatalogResolution(format!(
                "invalid collection id: {value:?}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for CollectionId {
    type Error = GctsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CollectionId> for String {
    fn from(value: CollectionId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    id: String,
    extent: MultiPolygon<f64>,
    crs: Crs,
    location: String,
    row_count: Option<u64>,
}

impl Partition {
    pub fn new(
        id: impl Into<String>,
        extent: impl Into<MultiPolygon<f64>>,
        crs: Crs,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            extent: extent.into(),
            crs,
            location: location.into(),
            row_count: None,
        }
    }

    pub fn with_row_count(mut self, row_count: Option<u64>) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn extent(&self) -> &MultiPolygon<f64> {
        &self.extent
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.extent.bounding_rect()
    }

    pub fn summary(&self) -> PartitionSummary {
        PartitionSummary {
            id: self.id.clone(),
            location: self.location.clone(),
            crs: self.crs.to_string(),
            row_count: self.row_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSummary {
    pub id: String,
    pub location: String,
    pub crs: String,
    pub row_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    id: CollectionId,
    title: Option<String>,
    partitions: Vec<Partition>,
}

impl Collection {
    pub fn new(id: CollectionId, partitions: Vec<Partition>) -> Self {
        Self {
            id,
            title: None,
            partitions,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn id(&self) -> &CollectionId {
        &self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use geo::{Rect, coord};

    use super::*;

    #[test]
    fn parse_collection_id_valid() {
        let id: CollectionId = " gcts ".parse().unwrap();
        assert_eq!(id.as_str(), "gcts");
        let id: CollectionId = "deltares-delta-dtm".parse().unwrap();
        assert_eq!(id.to_string(), "deltares-delta-dtm");
    }

    #[test]
    fn parse_collection_id_invalid() {
        let err = "".parse::<CollectionId>().unwrap_err();
        assert_matches!(err, GctsError::CatalogResolution(_));
        let err = "coastal grid".parse::<CollectionId>().unwrap_err();
        assert_matches!(err, GctsError::CatalogResolution(_));
    }

    #[test]
    fn partition_bounds_follow_extent() {
        let rect = Rect::new(coord! { x: 30.0, y: 31.0 }, coord! { x: 31.0, y: 32.0 });
        let partition = Partition::new("p1", rect.to_polygon(), Crs::Wgs84, "p1.geojson")
            .with_row_count(Some(12));
        assert_eq!(partition.bounds(), Some(rect));
        assert_eq!(partition.summary().row_count, Some(12));
        assert_eq!(partition.summary().crs, "EPSG:4326");
    }
}
