use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use geo::{Coord, LineString, MapCoords, MultiPolygon, Polygon};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GctsError;

// WGS84 equatorial radius in meters
const A: f64 = 6_378_137.0;
// WGS84 flattening
const F: f64 = 1.0 / 298.257_223_563;
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_6;
// Transverse Mercator series lose accuracy quickly past this distance from the central meridian.
const UTM_MAX_LON_OFFSET: f64 = 30.0;
// Pieces each polygon edge is split into before a shape changes CRS.
const EDGE_PIECES: usize = 32;

static EPSG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:epsg:{1,2}|urn:ogc:def:crs:epsg:[0-9.]*:)?(\d{4,5})$")
        .expect("EPSG pattern compiles")
});

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    #[default]
    Wgs84,
    WebMercator,
    Utm { zone: u8, northern: bool },
}

impl Crs {
    pub fn from_epsg(code: u32) -> Result<Self, GctsError> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 | 900913 => Ok(Crs::WebMercator),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                northern: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                northern: false,
            }),
            _ => Err(GctsError::UnsupportedCrs(format!("EPSG:{code}"))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
            Crs::Utm { zone, northern } => {
                if *northern {
                    32600 + u32::from(*zone)
                } else {
                    32700 + u32::from(*zone)
                }
            }
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    pub fn transform(&self, target: &Crs, coord: Coord<f64>) -> Result<Coord<f64>, GctsError> {
        if self == target {
            return Ok(coord);
        }
        let geographic = self.unproject(coord)?;
        let projected = target.project(geographic)?;
        if !projected.x.is_finite() || !projected.y.is_finite() {
            return Err(self.reprojection_error(target, "non-finite result"));
        }
        Ok(projected)
    }

    pub fn transform_geometry<G>(
        &self,
        target: &Crs,
        geometry: &G,
    ) -> Result<<G as MapCoords<f64, f64>>::Output, GctsError>
    where
        G: MapCoords<f64, f64>,
    {
        geometry.try_map_coords(|coord| self.transform(target, coord))
    }

    // Edges are densified first: a straight edge in one CRS is curved in another.
    pub fn transform_shape(
        &self,
        target: &Crs,
        shape: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, GctsError> {
        if self == target {
            return Ok(shape.clone());
        }
        let densified = MultiPolygon(
            shape
                .iter()
                .map(|polygon| {
                    Polygon::new(
                        densify(polygon.exterior()),
                        polygon.interiors().iter().map(densify).collect(),
                    )
                })
                .collect(),
        );
        self.transform_geometry(target, &densified)
    }

    fn unproject(&self, coord: Coord<f64>) -> Result<Coord<f64>, GctsError> {
        match self {
            Crs::Wgs84 => {
                if coord.y.abs() > 90.0 || !coord.x.is_finite() || !coord.y.is_finite() {
                    return Err(self.reprojection_error(
                        &Crs::Wgs84,
                        &format!("latitude {} out of range", coord.y),
                    ));
                }
                Ok(coord)
            }
            Crs::WebMercator => {
                let lon = coord.x / A * 180.0 / PI;
                let lat = (2.0 * (coord.y / A).exp().atan() - PI / 2.0) * 180.0 / PI;
                Ok(Coord { x: lon, y: lat })
            }
            Crs::Utm { zone, northern } => {
                let (lat, lon) = utm_inverse(*zone, *northern, coord.x, coord.y);
                Ok(Coord { x: lon, y: lat })
            }
        }
    }

    fn project(&self, coord: Coord<f64>) -> Result<Coord<f64>, GctsError> {
        match self {
            Crs::Wgs84 => Ok(coord),
            Crs::WebMercator => {
                if coord.y.abs() > MERCATOR_MAX_LAT {
                    return Err(Crs::Wgs84.reprojection_error(
                        self,
                        &format!("latitude {} outside Web Mercator bounds", coord.y),
                    ));
                }
                let x = A * coord.x * PI / 180.0;
                let y = A * (PI / 4.0 + coord.y * PI / 360.0).tan().ln();
                Ok(Coord { x, y })
            }
            Crs::Utm { zone, northern } => {
                let offset = coord.x - utm_central_meridian(*zone);
                let offset = (offset + 180.0).rem_euclid(360.0) - 180.0;
                if offset.abs() > UTM_MAX_LON_OFFSET {
                    return Err(Crs::Wgs84.reprojection_error(
                        self,
                        &format!("longitude {} too far from zone {zone}", coord.x),
                    ));
                }
                let (x, y) = utm_forward(*zone, *northern, coord.y, coord.x);
                Ok(Coord { x, y })
            }
        }
    }

    fn reprojection_error(&self, target: &Crs, message: &str) -> GctsError {
        GctsError::Reprojection {
            from: self.to_string(),
            to: target.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = GctsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "CRS84" || upper.ends_with(":CRS84") {
            return Ok(Crs::Wgs84);
        }
        let code = EPSG_PATTERN
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .and_then(|code| code.as_str().parse::<u32>().ok())
            .ok_or_else(|| GctsError::UnsupportedCrs(value.to_string()))?;
        Self::from_epsg(code)
    }
}

impl TryFrom<String> for Crs {
    type Error = GctsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.to_string()
    }
}

fn utm_central_meridian(zone: u8) -> f64 {
    (f64::from(zone) - 1.0) * 6.0 - 180.0 + 3.0
}

fn utm_false_northing(northern: bool) -> f64 {
    if northern { 0.0 } else { 10_000_000.0 }
}

const UTM_SCALE: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;

fn utm_forward(zone: u8, northern: bool, lat: f64, lon: f64) -> (f64, f64) {
    let lat_rad = lat * PI / 180.0;
    let lon_rad = lon * PI / 180.0;
    let lon0_rad = utm_central_meridian(zone) * PI / 180.0;

    let e2 = 2.0 * F - F * F;
    let ep2 = e2 / (1.0 - e2);

    let n = A / (1.0 - e2 * lat_rad.sin().powi(2)).sqrt();
    let t = lat_rad.tan().powi(2);
    let c = ep2 * lat_rad.cos().powi(2);
    let a = (lon_rad - lon0_rad) * lat_rad.cos();

    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let m = A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat_rad
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat_rad).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat_rad).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * lat_rad).sin());

    let x = UTM_SCALE
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;

    let y = UTM_SCALE
        * (m + n
            * lat_rad.tan()
            * (a.powi(2) / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0))
        + utm_false_northing(northern);

    (x, y)
}

fn utm_inverse(zone: u8, northern: bool, x: f64, y: f64) -> (f64, f64) {
    let x = x - UTM_FALSE_EASTING;
    let y = y - utm_false_northing(northern);

    let e2 = 2.0 * F - F * F;
    let ep2 = e2 / (1.0 - e2);
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let m = y / UTM_SCALE;
    let mu = m / (A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0));

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let n1 = A / (1.0 - e2 * phi1.sin().powi(2)).sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ep2 * phi1.cos().powi(2);
    let r1 = A * (1.0 - e2) / (1.0 - e2 * phi1.sin().powi(2)).powf(1.5);
    let d = x / (n1 * UTM_SCALE);

    let lat = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lon = utm_central_meridian(zone) * PI / 180.0
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / phi1.cos();

    (lat * 180.0 / PI, lon * 180.0 / PI)
}

fn densify(ring: &LineString<f64>) -> LineString<f64> {
    let mut coords = Vec::with_capacity(ring.0.len() * EDGE_PIECES + 1);
    for line in ring.lines() {
        for step in 0..EDGE_PIECES {
            let t = step as f64 / EDGE_PIECES as f64;
            coords.push(Coord {
                x: line.start.x + (line.end.x - line.start.x) * t,
                y: line.start.y + (line.end.y - line.start.y) * t,
            });
        }
    }
    if let Some(last) = ring.0.last() {
        coords.push(*last);
    }
    LineString(coords)
}
