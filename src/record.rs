use std::collections::BTreeSet;

use geo::Geometry;
use serde_json::{Map, Value, json};

use crate::codec::GeoJsonGeometry;
use crate::crs::Crs;

pub const BEARING_ATTRIBUTE: &str = "bearing";

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    partition_id: String,
    geometry: Geometry<f64>,
    attributes: Map<String, Value>,
}

impl Record {
    pub fn new(
        partition_id: impl Into<String>,
        geometry: Geometry<f64>,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            geometry,
            attributes,
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn bearing(&self) -> Option<f64> {
        self.attribute(BEARING_ATTRIBUTE)
            .and_then(Value::as_f64)
            .filter(|value| (0.0..=360.0).contains(value))
    }

    fn to_feature(&self) -> Value {
        json!({
            "type": "Feature",
            "geometry": GeoJsonGeometry::from_geometry(&self.geometry),
            "properties": self.attributes,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    crs: Crs,
    records: Vec<Record>,
}

impl QueryResult {
    pub fn new(crs: Crs, records: Vec<Record>) -> Self {
        Self { crs, records }
    }

    pub fn empty(crs: Crs) -> Self {
        Self::new(crs, Vec::new())
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn columns(&self) -> Vec<String> {
        self.records
            .iter()
            .flat_map(|record| record.attributes.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn partition_ids(&self) -> BTreeSet<&str> {
        self.records
            .iter()
            .map(|record| record.partition_id.as_str())
            .collect()
    }

    pub fn to_feature_collection(&self) -> Value {
        let features = self.records.iter().map(Record::to_feature).collect::<Vec<_>>();
        let mut collection = json!({
            "type": "FeatureCollection",
            "features": features,
        });
        // RFC 7946 implies WGS84; anything else keeps the legacy named CRS member.
        if !self.crs.is_geographic() {
            collection["crs"] = json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", self.crs.epsg()) },
            });
        }
        collection
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use geo::{Point, point};

    use super::*;

    fn record(partition: &str, bearing: Value) -> Record {
        let mut attributes = Map::new();
        attributes.insert(BEARING_ATTRIBUTE.to_string(), bearing);
        Record::new(
            partition,
            Geometry::Point(point!(x: 30.4, y: 31.4)),
            attributes,
        )
    }

    #[test]
    fn bearing_requires_compass_range() {
        assert_eq!(record("p1", json!(270.5)).bearing(), Some(270.5));
        assert_eq!(record("p1", json!(361)).bearing(), None);
        assert_eq!(record("p1", json!("north")).bearing(), None);
    }

    #[test]
    fn columns_and_partitions_are_deduplicated() {
        let mut extra = record("p3", json!(12));
        extra.attributes.insert("transect_id".to_string(), json!("t-1"));
        let result = QueryResult::new(Crs::Wgs84, vec![record("p1", json!(1)), extra]);
        assert_eq!(result.columns(), vec!["bearing", "transect_id"]);
        assert_eq!(
            result.partition_ids().into_iter().collect::<Vec<_>>(),
            vec!["p1", "p3"]
        );
    }

    #[test]
    fn feature_collection_tags_projected_crs() {
        let result = QueryResult::new(
            Crs::WebMercator,
            vec![Record::new("p1", Geometry::Point(Point::new(1.0, 2.0)), Map::new())],
        );
        let collection = result.to_feature_collection();
        assert_eq!(collection["features"][0]["geometry"]["type"], "Point");
        assert_eq!(
            collection["crs"]["properties"]["name"],
            "urn:ogc:def:crs:EPSG::3857"
        );

        let geographic = QueryResult::empty(Crs::Wgs84).to_feature_collection();
        assert!(geographic.get("crs").is_none());
    }
}
