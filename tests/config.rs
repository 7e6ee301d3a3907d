use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use stac_coverage::config::{Config, ConfigLoader, HttpEntry};
use stac_coverage::error::CoverageError;

#[test]
fn resolve_detailed_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("stac-coverage.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "catalogs": [
                "https://earth-search.aws.element84.com/v1",
                { "url": "https://planetarycomputer.microsoft.com/api/stac/v1/", "title": "MPC" }
            ],
            "regions": { "path": "counties.geojson.gz", "name_property": "NAMELSAD", "code_property": "GEOID" },
            "store": "out/coverage.json",
            "http": { "max_retries": 5, "backoff_secs": 0.5, "timeout_secs": 10 },
            "token_provider": { "marker": "example.org" }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();

    let catalogs = resolved.catalogs.unwrap();
    assert_eq!(catalogs.len(), 2);
    assert_eq!(catalogs[0].url, "https://earth-search.aws.element84.com/v1/");
    assert_eq!(catalogs[1].title.as_deref(), Some("MPC"));
    assert!(catalogs.iter().all(|catalog| catalog.is_api && !catalog.is_private));

    let regions = resolved.regions.unwrap();
    assert_eq!(regions.path, "counties.geojson.gz");
    assert_eq!(regions.name_property, "NAMELSAD");
    assert_eq!(regions.code_property, "GEOID");

    assert_eq!(resolved.store, "out/coverage.json");
    assert_eq!(resolved.http.retry.max_retries, 5);
    assert_eq!(resolved.http.retry.backoff, Duration::from_millis(500));
    assert_eq!(resolved.http.timeout, Duration::from_secs(10));
    assert_eq!(resolved.token_provider.marker, "example.org");
    assert!(resolved.token_provider.url_template.contains("{collection}"));
}

#[test]
fn explicit_missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve_or_default(path.to_str()),
        Err(CoverageError::ConfigRead(_))
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("stac-coverage.json");
    fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CoverageError::ConfigParse(_))
    );
}

#[test]
fn invalid_catalog_url_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("stac-coverage.json");
    fs::write(&path, r#"{ "catalogs": ["ftp://example.com/stac"] }"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(CoverageError::InvalidUrl(_))
    );
}

#[test]
fn zero_timeout_is_rejected() {
    let config = Config {
        store: Some("coverage.json".to_string()),
        http: HttpEntry {
            timeout_secs: Some(0),
            ..HttpEntry::default()
        },
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(CoverageError::ConfigParse(_))
    );
}

#[test]
fn negative_backoff_is_rejected() {
    let config = Config {
        store: Some("coverage.json".to_string()),
        http: HttpEntry {
            backoff_secs: Some(-1.0),
            ..HttpEntry::default()
        },
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(CoverageError::ConfigParse(_))
    );
}
