use std::io::Read;

use flate2::read::GzDecoder;
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::crs::Crs;
use crate::error::GctsError;

pub type Position = Vec<f64>;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point {
        coordinates: Position,
    },
    MultiPoint {
        coordinates: Vec<Position>,
    },
    LineString {
        coordinates: Vec<Position>,
    },
    MultiLineString {
        coordinates: Vec<Vec<Position>>,
    },
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    GeometryCollection {
        geometries: Vec<GeoJsonGeometry>,
    },
}

impl GeoJsonGeometry {
    pub fn to_geometry(&self) -> Result<Geometry<f64>, String> {
        let geometry = match self {
            GeoJsonGeometry::Point { coordinates } => Geometry::Point(Point(coord(coordinates)?)),
            GeoJsonGeometry::MultiPoint { coordinates } => Geometry::MultiPoint(MultiPoint(
                coordinates
                    .iter()
                    .map(|position| coord(position).map(Point))
                    .collect::<Result<_, _>>()?,
            )),
            GeoJsonGeometry::LineString { coordinates } => {
                Geometry::LineString(line_string(coordinates)?)
            }
            GeoJsonGeometry::MultiLineString { coordinates } => {
                Geometry::MultiLineString(MultiLineString(
                    coordinates
                        .iter()
                        .map(|line| line_string(line))
                        .collect::<Result<_, _>>()?,
                ))
            }
            GeoJsonGeometry::Polygon { coordinates } => Geometry::Polygon(polygon(coordinates)?),
            GeoJsonGeometry::MultiPolygon { coordinates } => Geometry::MultiPolygon(MultiPolygon(
                coordinates
                    .iter()
                    .map(|rings| polygon(rings))
                    .collect::<Result<_, _>>()?,
            )),
            GeoJsonGeometry::GeometryCollection { geometries } => {
                Geometry::GeometryCollection(GeometryCollection(
                    geometries
                        .iter()
                        .map(GeoJsonGeometry::to_geometry)
                        .collect::<Result<_, _>>()?,
                ))
            }
        };
        Ok(geometry)
    }

    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>, String> {
        match self.to_geometry()? {
            Geometry::Polygon(polygon) => Ok(MultiPolygon(vec![polygon])),
            Geometry::MultiPolygon(multi) => Ok(multi),
            other => Err(format!("expected a polygon, got {}", geometry_kind(&other))),
        }
    }

    pub fn from_geometry(geometry: &Geometry<f64>) -> Self {
        match geometry {
            Geometry::Point(point) => GeoJsonGeometry::Point {
                coordinates: position(point.0),
            },
            Geometry::Line(line) => GeoJsonGeometry::LineString {
                coordinates: vec![position(line.start), position(line.end)],
            },
            Geometry::LineString(line) => GeoJsonGeometry::LineString {
                coordinates: positions(line),
            },
            Geometry::Polygon(polygon) => GeoJsonGeometry::Polygon {
                coordinates: rings(polygon),
            },
            Geometry::MultiPoint(points) => GeoJsonGeometry::MultiPoint {
                coordinates: points.iter().map(|point| position(point.0)).collect(),
            },
            Geometry::MultiLineString(lines) => GeoJsonGeometry::MultiLineString {
                coordinates: lines.iter().map(positions).collect(),
            },
            Geometry::MultiPolygon(polygons) => GeoJsonGeometry::MultiPolygon {
                coordinates: polygons.iter().map(rings).collect(),
            },
            Geometry::GeometryCollection(collection) => GeoJsonGeometry::GeometryCollection {
                geometries: collection.iter().map(Self::from_geometry).collect(),
            },
            Geometry::Rect(rect) => GeoJsonGeometry::Polygon {
                coordinates: rings(&rect.to_polygon()),
            },
            Geometry::Triangle(triangle) => GeoJsonGeometry::Polygon {
                coordinates: rings(&triangle.to_polygon()),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureDoc {
    #[serde(default)]
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureCollectionDoc {
    #[serde(default)]
    features: Vec<FeatureDoc>,
    #[serde(default)]
    crs: Option<NamedCrsDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedCrsDoc {
    properties: NamedCrsProperties,
}

#[derive(Debug, Clone, Deserialize)]
struct NamedCrsProperties {
    name: String,
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedPartition {
    // CRS declared inside the payload, if any.
    pub crs: Option<Crs>,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionFormat {
    FeatureCollection,
    FeatureLines,
}

impl PartitionFormat {
    pub fn detect(location: &str) -> Self {
        let path = location.split(['?', '#']).next().unwrap_or(location);
        let path = path.strip_suffix(".gz").unwrap_or(path).to_ascii_lowercase();
        if path.ends_with(".geojsonl")
            || path.ends_with(".geojsons")
            || path.ends_with(".ndjson")
            || path.ends_with(".jsonl")
        {
            PartitionFormat::FeatureLines
        } else {
            PartitionFormat::FeatureCollection
        }
    }
}

pub fn decode_partition(location: &str, bytes: &[u8]) -> Result<DecodedPartition, GctsError> {
    let text = decompress(location, bytes)?;
    let decoded = match PartitionFormat::detect(location) {
        PartitionFormat::FeatureCollection => decode_document(&text),
        PartitionFormat::FeatureLines => decode_lines(&text),
    }
    .map_err(|reason| GctsError::fetch(location, reason))?;
    debug!(
        location,
        features = decoded.features.len(),
        "decoded partition payload"
    );
    Ok(decoded)
}

pub fn parse_polygonal(text: &str) -> Result<(MultiPolygon<f64>, Option<Crs>), String> {
    let value: Value = serde_json::from_str(text).map_err(|err| err.to_string())?;
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            let decoded = decode_value(value)?;
            let mut polygons = Vec::new();
            for feature in decoded.features {
                match feature.geometry {
                    Geometry::Polygon(polygon) => polygons.push(polygon),
                    Geometry::MultiPolygon(multi) => polygons.extend(multi.0),
                    other => {
                        return Err(format!(
                            "expected polygon features, got {}",
                            geometry_kind(&other)
                        ));
                    }
                }
            }
            Ok((MultiPolygon(polygons), decoded.crs))
        }
        Some("Feature") => {
            let feature: FeatureDoc =
                serde_json::from_value(value).map_err(|err| err.to_string())?;
            let geometry = feature
                .geometry
                .ok_or_else(|| "feature has no geometry".to_string())?;
            Ok((geometry.to_multi_polygon()?, None))
        }
        _ => {
            let geometry: GeoJsonGeometry =
                serde_json::from_value(value).map_err(|err| err.to_string())?;
            Ok((geometry.to_multi_polygon()?, None))
        }
    }
}

fn decompress(location: &str, bytes: &[u8]) -> Result<String, GctsError> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|err| GctsError::fetch(location, format!("gzip: {err}")))?;
        return Ok(text);
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|err| GctsError::fetch(location, format!("payload is not UTF-8: {err}")))
}

fn decode_document(text: &str) -> Result<DecodedPartition, String> {
    let value: Value = serde_json::from_str(text).map_err(|err| err.to_string())?;
    decode_value(value)
}

fn decode_value(value: Value) -> Result<DecodedPartition, String> {
    match value.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {
            let doc: FeatureCollectionDoc =
                serde_json::from_value(value).map_err(|err| err.to_string())?;
            let crs = doc
                .crs
                .map(|named| named.properties.name.parse::<Crs>())
                .transpose()
                .map_err(|err| err.to_string())?;
            Ok(DecodedPartition {
                crs,
                features: collect_features(doc.features)?,
            })
        }
        Some("Feature") => {
            let doc: FeatureDoc = serde_json::from_value(value).map_err(|err| err.to_string())?;
            Ok(DecodedPartition {
                crs: None,
                features: collect_features(vec![doc])?,
            })
        }
        Some(other) => Err(format!("unsupported GeoJSON document type {other}")),
        None => Err("GeoJSON document has no type".to_string()),
    }
}

fn decode_lines(text: &str) -> Result<DecodedPartition, String> {
    let mut docs = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim().trim_start_matches('\u{1e}');
        if line.is_empty() {
            continue;
        }
        let doc: FeatureDoc =
            serde_json::from_str(line).map_err(|err| format!("line {}: {err}", index + 1))?;
        docs.push(doc);
    }
    Ok(DecodedPartition {
        crs: None,
        features: collect_features(docs)?,
    })
}

fn collect_features(docs: Vec<FeatureDoc>) -> Result<Vec<Feature>, String> {
    let mut features = Vec::with_capacity(docs.len());
    for doc in docs {
        // Null geometries cannot intersect anything.
        let Some(geometry) = doc.geometry else {
            continue;
        };
        features.push(Feature {
            geometry: geometry.to_geometry()?,
            properties: doc.properties.unwrap_or_default(),
        });
    }
    Ok(features)
}

fn coord(position: &Position) -> Result<Coord<f64>, String> {
    match position.as_slice() {
        [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
        [_, _, ..] => Err("non-finite coordinate".to_string()),
        _ => Err(format!(
            "position needs at least 2 values, got {}",
            position.len()
        )),
    }
}

fn line_string(positions: &[Position]) -> Result<LineString<f64>, String> {
    Ok(LineString(
        positions.iter().map(coord).collect::<Result<_, _>>()?,
    ))
}

fn polygon(rings: &[Vec<Position>]) -> Result<Polygon<f64>, String> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| "polygon has no rings".to_string())?;
    Ok(Polygon::new(
        line_string(exterior)?,
        interiors
            .iter()
            .map(|ring| line_string(ring))
            .collect::<Result<_, _>>()?,
    ))
}

fn position(coord: Coord<f64>) -> Position {
    vec![coord.x, coord.y]
}

fn positions(line: &LineString<f64>) -> Vec<Position> {
    line.coords().map(|coord| position(*coord)).collect()
}

fn rings(polygon: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(positions)
        .collect()
}

pub fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
