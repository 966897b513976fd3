use std::str::FromStr;

use geo::{Area, BoundingRect, Coord, MultiPolygon, Polygon, Rect};
use serde::Serialize;

use crate::codec;
use crate::crs::Crs;
use crate::error::GctsError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    fn validate(&self) -> Result<(), GctsError> {
        let values = [self.west, self.south, self.east, self.north];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(GctsError::InvalidRegion(format!(
                "bounds must be finite: {self:?}"
            )));
        }
        if self.west >= self.east {
            return Err(GctsError::InvalidRegion(format!(
                "west ({}) must be less than east ({})",
                self.west, self.east
            )));
        }
        if self.south >= self.north {
            return Err(GctsError::InvalidRegion(format!(
                "south ({}) must be less than north ({})",
                self.south, self.north
            )));
        }
        Ok(())
    }

    fn to_rect(self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }
}

impl FromStr for Bounds {
    type Err = GctsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| GctsError::InvalidRegion(format!("{value:?}: {err}")))?;
        match parts.as_slice() {
            [west, south, east, north] => Ok(Self::new(*west, *south, *east, *north)),
            _ => Err(GctsError::InvalidRegion(format!(
                "expected west,south,east,north, got {} values",
                parts.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    shape: MultiPolygon<f64>,
    bounds: Rect<f64>,
    crs: Crs,
}

impl Region {
    pub fn from_bounds(bounds: Bounds, crs: Crs) -> Result<Self, GctsError> {
        bounds.validate()?;
        Self::from_polygons(MultiPolygon(vec![bounds.to_rect().to_polygon()]), crs)
    }

    pub fn from_polygon(polygon: Polygon<f64>, crs: Crs) -> Result<Self, GctsError> {
        Self::from_polygons(MultiPolygon(vec![polygon]), crs)
    }

    pub fn from_polygons(shape: MultiPolygon<f64>, crs: Crs) -> Result<Self, GctsError> {
        if shape.0.is_empty() {
            return Err(GctsError::InvalidRegion("region has no polygons".to_string()));
        }
        for polygon in &shape {
            let exterior = polygon.exterior();
            if exterior
                .coords()
                .any(|coord| !coord.x.is_finite() || !coord.y.is_finite())
            {
                return Err(GctsError::InvalidRegion(
                    "polygon has non-finite coordinates".to_string(),
                ));
            }
            if crs.is_geographic()
                && exterior
                    .coords()
                    .any(|coord| coord.y.abs() > 90.0 || coord.x.abs() > 360.0)
            {
                return Err(GctsError::InvalidRegion(
                    "latitude must be within -90..90 and longitude within -360..360".to_string(),
                ));
            }
            let mut distinct = exterior.coords().collect::<Vec<_>>();
            distinct.dedup();
            if exterior.is_closed() && distinct.len() > 1 {
                distinct.pop();
            }
            if distinct.len() < 3 {
                return Err(GctsError::InvalidRegion(format!(
                    "polygon needs at least 3 distinct vertices, got {}",
                    distinct.len()
                )));
            }
        }
        Self::with_area_check(shape, crs)
    }

    pub fn from_geojson(text: &str, crs: Crs) -> Result<Self, GctsError> {
        let (shape, declared) = codec::parse_polygonal(text).map_err(GctsError::InvalidRegion)?;
        Self::from_polygons(shape, declared.unwrap_or(crs))
    }

    fn with_area_check(shape: MultiPolygon<f64>, crs: Crs) -> Result<Self, GctsError> {
        let area = shape.unsigned_area();
        if area.is_nan() || area <= 0.0 {
            return Err(GctsError::InvalidRegion("region has zero area".to_string()));
        }
        let bounds = shape
            .bounding_rect()
            .ok_or_else(|| GctsError::InvalidRegion("region has no extent".to_string()))?;
        Ok(Self { shape, bounds, crs })
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn bounding_rect(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_rect(self.bounds)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn area(&self) -> f64 {
        self.shape.unsigned_area()
    }

    pub fn reproject(&self, target: &Crs) -> Result<Self, GctsError> {
        if &self.crs == target {
            return Ok(self.clone());
        }
        let shape = self.crs.transform_shape(target, &self.shape)?;
        Self::with_area_check(shape, *target)
    }
}

impl FromStr for Region {
    type Err = GctsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Region::from_bounds(value.parse()?, Crs::Wgs84)
    }
}
