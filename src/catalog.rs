use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::codec::GeoJsonGeometry;
use crate::crs::Crs;
use crate::domain::{Collection, CollectionId, Partition};
use crate::error::GctsError;
use crate::storage::{Storage, resolve_href};

const MAX_DEPTH: usize = 8;
const DATA_ASSET: &str = "data";

pub trait CatalogClient: Send + Sync {
    fn resolve_collection(
        &self,
        root: &str,
        collection: &CollectionId,
    ) -> Result<Collection, GctsError>;
}

#[derive(Debug, Clone, Deserialize)]
struct StacLink {
    rel: String,
    href: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StacNode {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    links: Vec<StacLink>,
}

#[derive(Debug, Clone, Deserialize)]
struct StacAsset {
    href: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StacItem {
    id: String,
    #[serde(default)]
    geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    assets: BTreeMap<String, StacAsset>,
}

#[derive(Clone)]
pub struct StacCatalogClient<S: Storage> {
    storage: S,
}

impl<S: Storage> StacCatalogClient<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    fn load<T: for<'de> Deserialize<'de>>(&self, href: &str) -> Result<T, GctsError> {
        let bytes = self
            .storage
            .get(href)
            .map_err(|err| GctsError::CatalogResolution(err.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| GctsError::CatalogResolution(format!("{href}: {err}")))
    }

    fn find_collection(
        &self,
        root: &str,
        collection: &CollectionId,
    ) -> Result<(String, StacNode), GctsError> {
        let mut queue = VecDeque::from([(root.to_string(), 0usize)]);
        let mut visited = HashSet::new();
        while let Some((href, depth)) = queue.pop_front() {
            if !visited.insert(href.clone()) {
                continue;
            }
            let node: StacNode = self.load(&href)?;
            if node.id == collection.as_str() && node.kind.as_deref() != Some("Catalog") {
                return Ok((href, node));
            }
            if depth >= MAX_DEPTH {
                continue;
            }
            for link in node.links.iter().filter(|link| link.rel == "child") {
                queue.push_back((resolve_href(&href, &link.href)?, depth + 1));
            }
        }
        Err(GctsError::CatalogResolution(format!(
            "collection {collection} not found under {root}"
        )))
    }

    fn item_hrefs(&self, href: &str, node: &StacNode) -> Result<Vec<String>, GctsError> {
        let mut items = Vec::new();
        let mut queue = VecDeque::from([(href.to_string(), node.clone(), 0usize)]);
        let mut visited = HashSet::from([href.to_string()]);
        while let Some((href, node, depth)) = queue.pop_front() {
            for link in &node.links {
                let target = resolve_href(&href, &link.href)?;
                match link.rel.as_str() {
                    "item" => items.push(target),
                    "child" if depth < MAX_DEPTH && visited.insert(target.clone()) => {
                        let child: StacNode = self.load(&target)?;
                        queue.push_back((target, child, depth + 1));
                    }
                    _ => {}
                }
            }
        }
        Ok(items)
    }
}

impl<S: Storage> CatalogClient for StacCatalogClient<S> {
    fn resolve_collection(
        &self,
        root: &str,
        collection: &CollectionId,
    ) -> Result<Collection, GctsError> {
        let (href, node) = self.find_collection(root, collection)?;
        debug!(collection = %collection, href = %href, "resolved collection document");

        let mut partitions = Vec::new();
        for item_href in self.item_hrefs(&href, &node)? {
            let item: StacItem = self.load(&item_href)?;
            partitions.push(partition_from_item(&item_href, item)?);
        }

        info!(
            collection = %collection,
            partitions = partitions.len(),
            "loaded partition manifest"
        );
        Ok(Collection::new(collection.clone(), partitions).with_title(node.title))
    }
}

fn partition_from_item(item_href: &str, item: StacItem) -> Result<Partition, GctsError> {
    let invalid = |message: String| {
        GctsError::CatalogResolution(format!("item {} ({item_href}): {message}", item.id))
    };

    let asset = item
        .assets
        .get(DATA_ASSET)
        .or_else(|| item.assets.values().next())
        .ok_or_else(|| invalid("no data asset".to_string()))?;
    let location = resolve_href(item_href, &asset.href)?;

    let (extent, crs) = match (
        item.properties.get("proj:epsg").and_then(Value::as_u64),
        item.properties.get("proj:geometry"),
    ) {
        (Some(code), Some(native)) => {
            let crs = u32::try_from(code)
                .map_err(|err| invalid(err.to_string()))
                .and_then(|code| Crs::from_epsg(code).map_err(|err| invalid(err.to_string())))?;
            let geometry: GeoJsonGeometry = serde_json::from_value(native.clone())
                .map_err(|err| invalid(format!("proj:geometry: {err}")))?;
            (geometry.to_multi_polygon().map_err(invalid)?, crs)
        }
        _ => match (&item.geometry, &item.bbox) {
            (Some(geometry), _) => (geometry.to_multi_polygon().map_err(invalid)?, Crs::Wgs84),
            (None, Some(bbox)) => (bbox_polygon(bbox).map_err(invalid)?, Crs::Wgs84),
            (None, None) => return Err(invalid("no geometry or bbox".to_string())),
        },
    };

    let row_count = item
        .properties
        .get("table:row_count")
        .and_then(Value::as_u64);

    Ok(Partition::new(item.id.clone(), extent, crs, location).with_row_count(row_count))
}

fn bbox_polygon(bbox: &[f64]) -> Result<geo::MultiPolygon<f64>, String> {
    let (west, south, east, north) = match bbox {
        [west, south, east, north] => (*west, *south, *east, *north),
        [west, south, _, east, north, _] => (*west, *south, *east, *north),
        _ => return Err(format!("bbox needs 4 or 6 values, got {}", bbox.len())),
    };
    let rect = geo::Rect::new(
        geo::Coord { x: west, y: south },
        geo::Coord { x: east, y: north },
    );
    Ok(geo::MultiPolygon(vec![rect.to_polygon()]))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn item(value: Value) -> StacItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn item_with_native_projection_keeps_native_extent() {
        let stac = item(json!({
            "type": "Feature",
            "id": "part-0",
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]},
            "properties": {
                "proj:epsg": 32631,
                "proj:geometry": {"type": "Polygon", "coordinates": [[[500000, 0], [600000, 0], [600000, 100000], [500000, 100000], [500000, 0]]]},
                "table:row_count": 1200
            },
            "assets": {"data": {"href": "./part-0.geojson"}}
        }));
        let partition = partition_from_item("https://host/gcts/part-0.json", stac).unwrap();
        assert_eq!(
            partition.crs(),
            Crs::Utm {
                zone: 31,
                northern: true
            }
        );
        assert_eq!(partition.location(), "https://host/gcts/part-0.geojson");
        assert_eq!(partition.row_count(), Some(1200));
    }

    #[test]
    fn item_without_geometry_falls_back_to_bbox() {
        let stac = item(json!({
            "id": "part-1",
            "bbox": [30.0, 31.0, 31.0, 32.0],
            "assets": {"parquet": {"href": "/abs/part-1.geojson"}}
        }));
        let partition = partition_from_item("/abs/items/part-1.json", stac).unwrap();
        assert_eq!(partition.crs(), Crs::Wgs84);
        assert_eq!(partition.location(), "/abs/part-1.geojson");
        assert!(partition.bounds().is_some());
    }

    #[test]
    fn item_without_assets_is_rejected() {
        let stac = item(json!({"id": "part-2", "bbox": [0, 0, 1, 1]}));
        let err = partition_from_item("/abs/items/part-2.json", stac).unwrap_err();
        assert_matches!(err, GctsError::CatalogResolution(message) if message.contains("part-2"));
    }

    #[test]
    fn line_geometry_is_not_an_extent() {
        let stac = item(json!({
            "id": "part-3",
            "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
            "assets": {"data": {"href": "part-3.geojson"}}
        }));
        let err = partition_from_item("/abs/items/part-3.json", stac).unwrap_err();
        assert_matches!(err, GctsError::CatalogResolution(_));
    }
}
