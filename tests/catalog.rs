use std::fs;
use std::io::Write;
use std::path::Path;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::{Value, json};

use gcts_retrieval::catalog::{CatalogClient, StacCatalogClient};
use gcts_retrieval::crs::Crs;
use gcts_retrieval::domain::CollectionId;
use gcts_retrieval::error::GctsError;
use gcts_retrieval::fetcher::CancellationToken;
use gcts_retrieval::output::JsonOutput;
use gcts_retrieval::pipeline::{Pipeline, Session};
use gcts_retrieval::region::{Bounds, Region};
use gcts_retrieval::storage::{Credentials, StorageClient};

fn write_json(path: &Path, value: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

fn square(west: f64, south: f64, east: f64, north: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[[west, south], [east, south], [east, north], [west, north], [west, south]]]
    })
}

fn transect(id: &str, x: f64, y: f64) -> Value {
    json!({
        "type": "Feature",
        "geometry": {"type": "LineString", "coordinates": [[x, y], [x + 0.002, y + 0.002]]},
        "properties": {"transect_id": id, "bearing": 90.0}
    })
}

// catalog.json -> coastal/catalog.json -> gcts/collection.json -> items -> data.
fn build_catalog(root: &Path) -> String {
    write_json(
        &root.join("catalog.json"),
        &json!({
            "type": "Catalog",
            "id": "coclico",
            "links": [
                {"rel": "self", "href": "./catalog.json"},
                {"rel": "child", "href": "./coastal/catalog.json"}
            ]
        }),
    );
    write_json(
        &root.join("coastal/catalog.json"),
        &json!({
            "type": "Catalog",
            "id": "coastal",
            "links": [
                {"rel": "parent", "href": "../catalog.json"},
                {"rel": "child", "href": "../gcts/collection.json"}
            ]
        }),
    );
    write_json(
        &root.join("gcts/collection.json"),
        &json!({
            "type": "Collection",
            "id": "gcts",
            "title": "Global Coastal Transect System",
            "links": [
                {"rel": "root", "href": "../catalog.json"},
                {"rel": "item", "href": "./items/nile-west.json"},
                {"rel": "item", "href": "./items/nile-east.json"},
                {"rel": "item", "href": "./items/far.json"}
            ]
        }),
    );

    write_json(
        &root.join("gcts/items/nile-west.json"),
        &json!({
            "type": "Feature",
            "id": "nile-west",
            "geometry": square(30.0, 31.0, 30.5, 32.0),
            "properties": {"table:row_count": 2},
            "assets": {"data": {"href": "../../data/nile-west.geojson"}}
        }),
    );
    write_json(
        &root.join("data/nile-west.geojson"),
        &json!({
            "type": "FeatureCollection",
            "features": [transect("w-in", 30.40, 31.40), transect("w-out", 30.10, 31.90)]
        }),
    );

    write_json(
        &root.join("gcts/items/nile-east.json"),
        &json!({
            "type": "Feature",
            "id": "nile-east",
            "geometry": square(30.5, 31.0, 31.0, 32.0),
            "properties": {},
            "assets": {"data": {"href": "../../data/nile-east.geojsonl.gz"}}
        }),
    );
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for feature in [transect("e-in", 30.55, 31.30), transect("e-out", 30.95, 31.05)] {
        encoder
            .write_all(serde_json::to_string(&feature).unwrap().as_bytes())
            .unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    fs::write(root.join("data/nile-east.geojsonl.gz"), encoder.finish().unwrap()).unwrap();

    write_json(
        &root.join("gcts/items/far.json"),
        &json!({
            "type": "Feature",
            "id": "far",
            "geometry": null,
            "bbox": [-80.0, 25.0, -79.0, 26.0],
            "properties": {},
            "assets": {"data": {"href": "../../data/far.geojson"}}
        }),
    );

    root.join("catalog.json").to_str().unwrap().to_string()
}

fn storage() -> StorageClient {
    StorageClient::new(Credentials::default()).unwrap()
}

#[test]
fn resolves_collection_through_nested_catalogs() {
    let temp = tempfile::tempdir().unwrap();
    let root = build_catalog(temp.path());
    let client = StacCatalogClient::new(storage());

    let collection = client
        .resolve_collection(&root, &"gcts".parse().unwrap())
        .unwrap();
    assert_eq!(collection.title(), Some("Global Coastal Transect System"));
    let ids = collection
        .partitions()
        .iter()
        .map(|partition| partition.id())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["nile-west", "nile-east", "far"]);
    assert_eq!(collection.partitions()[0].row_count(), Some(2));
    assert_eq!(collection.partitions()[2].crs(), Crs::Wgs84);
    assert!(
        collection.partitions()[1]
            .location()
            .ends_with("data/nile-east.geojsonl.gz")
    );
}

#[test]
fn missing_collection_is_a_resolution_error() {
    let temp = tempfile::tempdir().unwrap();
    let root = build_catalog(temp.path());
    let client = StacCatalogClient::new(storage());

    let id: CollectionId = "shorelines".parse().unwrap();
    let err = client.resolve_collection(&root, &id).unwrap_err();
    assert_matches!(err, GctsError::CatalogResolution(message) if message.contains("shorelines"));
}

#[test]
fn unreachable_root_is_a_resolution_error() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("nothing/catalog.json");
    let client = StacCatalogClient::new(storage());

    let err = client
        .resolve_collection(root.to_str().unwrap(), &"gcts".parse().unwrap())
        .unwrap_err();
    assert_matches!(err, GctsError::CatalogResolution(_));
}

#[test]
fn query_reads_local_catalog_end_to_end() {
    let temp = tempfile::tempdir().unwrap();
    let root = build_catalog(temp.path());
    let storage = storage();
    let session = Session::new(root, "gcts".parse().unwrap());
    let pipeline = Pipeline::new(session, StacCatalogClient::new(storage.clone()), storage);
    let region =
        Region::from_bounds(Bounds::new(30.284, 31.277, 30.631, 31.511), Crs::Wgs84).unwrap();

    let report = pipeline
        .query(&region, &CancellationToken::new(), &JsonOutput)
        .unwrap();
    let mut ids = report
        .result
        .iter()
        .filter_map(|record| record.attribute("transect_id").and_then(Value::as_str))
        .collect::<Vec<_>>();
    ids.sort_unstable();
    assert_eq!(ids, vec!["e-in", "w-in"]);
    assert_eq!(report.summary.partitions_total, 3);
    assert_eq!(report.summary.partitions_selected.len(), 2);
    assert_eq!(report.summary.records_scanned, 4);
    assert!(report.summary.failures.is_empty());
}
