use std::fs;

use assert_matches::assert_matches;

use gcts_retrieval::config::{Config, ConfigLoader, DEFAULT_CATALOG_URL};
use gcts_retrieval::crs::Crs;
use gcts_retrieval::error::GctsError;
use gcts_retrieval::fetcher::FailurePolicy;
use gcts_retrieval::index::BoundaryRule;
use gcts_retrieval::pipeline::Session;

#[test]
fn parse_full_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("gcts.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "catalog_url": "/data/stac/catalog.json",
            "collection": "gcts-2024",
            "concurrency": 4,
            "failure_policy": "fail-fast",
            "boundary": "exclusive",
            "region_crs": "EPSG:32636",
            "target_crs": "urn:ogc:def:crs:EPSG::3857"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.catalog_url, "/data/stac/catalog.json");
    assert_eq!(resolved.collection.as_str(), "gcts-2024");
    assert_eq!(resolved.fetch.concurrency, 4);
    assert_eq!(resolved.fetch.policy, FailurePolicy::FailFast);
    assert_eq!(resolved.fetch.boundary, BoundaryRule::Exclusive);
    assert_eq!(
        resolved.region_crs,
        Crs::Utm {
            zone: 36,
            northern: true
        }
    );
    assert_eq!(resolved.target_crs, Some(Crs::WebMercator));

    let session = Session::from_config(&resolved);
    assert_eq!(session.catalog_url(), "/data/stac/catalog.json");
    assert_eq!(session.fetch_options(), resolved.fetch);
}

#[test]
fn unknown_fields_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("gcts.json");
    fs::write(&path, r#"{"catalog": "typo.json"}"#).unwrap();

    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, GctsError::ConfigParse(_));
}

#[test]
fn unsupported_crs_in_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("gcts.json");
    fs::write(&path, r#"{"region_crs": "EPSG:27700"}"#).unwrap();

    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, GctsError::ConfigParse(message) if message.contains("27700"));
}

#[test]
fn explicit_missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");

    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, GctsError::ConfigRead(read) if read == path);
}

#[test]
fn invalid_collection_id_is_rejected() {
    let config = Config {
        collection: Some("gcts/../other".to_string()),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config, None).unwrap_err();
    assert_matches!(err, GctsError::CatalogResolution(_));
}

#[test]
fn file_token_is_used_without_environment() {
    let config = Config {
        sas_token: Some("?sv=2024&sig=abc".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, Some("   ".to_string())).unwrap();
    assert!(resolved.credentials.has_token());
    assert_eq!(resolved.catalog_url, DEFAULT_CATALOG_URL);
    assert!(!format!("{resolved:?}").contains("sig=abc"));
}
