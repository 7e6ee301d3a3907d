use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::directory::{CatalogDescriptor, DEFAULT_DIRECTORY_URL};
use crate::domain::CatalogUrl;
use crate::error::CoverageError;
use crate::http::RetryPolicy;
use crate::regions::{DEFAULT_CODE_PROPERTY, DEFAULT_NAME_PROPERTY};
use crate::store::JsonCoverageStore;
use crate::token::TokenProvider;

pub const DEFAULT_CONFIG_FILE: &str = "stac-coverage.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    /// Explicit catalogs; when absent the directory is consulted.
    #[serde(default)]
    pub catalogs: Option<Vec<CatalogEntry>>,
    #[serde(default)]
    pub directory_url: Option<String>,
    #[serde(default)]
    pub regions: Option<RegionsEntry>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub http: HttpEntry,
    #[serde(default)]
    pub token_provider: Option<TokenProvider>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CatalogEntry {
    Shorthand(String),
    Detailed(CatalogEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CatalogEntryObject {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RegionsEntry {
    Shorthand(String),
    Detailed(RegionsEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegionsEntryObject {
    pub path: String,
    #[serde(default)]
    pub name_property: Option<String>,
    #[serde(default)]
    pub code_property: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HttpEntry {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub backoff_secs: Option<f64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionSettings {
    pub path: Utf8PathBuf,
    pub name_property: String,
    pub code_property: String,
}

impl RegionSettings {
    pub fn from_path(path: &str) -> Self {
        Self {
            path: Utf8PathBuf::from(path),
            name_property: DEFAULT_NAME_PROPERTY.to_string(),
            code_property: DEFAULT_CODE_PROPERTY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalogs: Option<Vec<CatalogDescriptor>>,
    pub directory_url: String,
    pub regions: Option<RegionSettings>,
    pub store: Utf8PathBuf,
    pub http: HttpSettings,
    pub token_provider: TokenProvider,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CoverageError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CoverageError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CoverageError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CoverageError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like `resolve`, but a missing default config file yields the defaults.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, CoverageError> {
        match Self::resolve(path) {
            Err(CoverageError::MissingConfig) => Self::resolve_config(Config::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CoverageError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let catalogs = config
            .catalogs
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|entry| {
                        let (url, title) = match entry {
                            CatalogEntry::Shorthand(url) => (url, None),
                            CatalogEntry::Detailed(obj) => (obj.url, obj.title),
                        };
                        let normalized: CatalogUrl = url.parse()?;
                        Ok(CatalogDescriptor {
                            title,
                            ..CatalogDescriptor::public_api(normalized.as_str())
                        })
                    })
                    .collect::<Result<Vec<_>, CoverageError>>()
            })
            .transpose()?;

        let regions = config.regions.map(|entry| match entry {
            RegionsEntry::Shorthand(path) => RegionSettings::from_path(&path),
            RegionsEntry::Detailed(obj) => RegionSettings {
                path: Utf8PathBuf::from(obj.path),
                name_property: obj
                    .name_property
                    .unwrap_or_else(|| DEFAULT_NAME_PROPERTY.to_string()),
                code_property: obj
                    .code_property
                    .unwrap_or_else(|| DEFAULT_CODE_PROPERTY.to_string()),
            },
        });

        let store = match config.store {
            Some(path) => Utf8PathBuf::from(path),
            None => JsonCoverageStore::default_path()?,
        };

        let http = resolve_http(&config.http)?;

        let token_provider = config.token_provider.unwrap_or_default();
        if !token_provider.url_template.contains("{collection}") {
            return Err(CoverageError::ConfigParse(
                "token_provider.url_template must contain {collection}".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            catalogs,
            directory_url: config
                .directory_url
                .unwrap_or_else(|| DEFAULT_DIRECTORY_URL.to_string()),
            regions,
            store,
            http,
            token_provider,
        })
    }
}

fn resolve_http(entry: &HttpEntry) -> Result<HttpSettings, CoverageError> {
    let defaults = HttpSettings::default();
    let backoff = match entry.backoff_secs {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| CoverageError::ConfigParse(format!("invalid http.backoff_secs: {secs}")))?,
        None => defaults.retry.backoff,
    };
    let timeout = match entry.timeout_secs {
        Some(0) => {
            return Err(CoverageError::ConfigParse(
                "http.timeout_secs must be positive".to_string(),
            ));
        }
        Some(secs) => Duration::from_secs(secs),
        None => defaults.timeout,
    };
    Ok(HttpSettings {
        retry: RetryPolicy {
            max_retries: entry.max_retries.unwrap_or(defaults.retry.max_retries),
            backoff,
        },
        timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            catalogs: Some(vec![CatalogEntry::Shorthand(
                "https://planetarycomputer.microsoft.com/api/stac/v1".to_string(),
            )]),
            regions: Some(RegionsEntry::Shorthand("world.geojson".to_string())),
            store: Some("coverage.json".to_string()),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        let catalogs = resolved.catalogs.unwrap();
        assert_eq!(
            catalogs[0].url,
            "https://planetarycomputer.microsoft.com/api/stac/v1/"
        );
        let regions = resolved.regions.unwrap();
        assert_eq!(regions.name_property, DEFAULT_NAME_PROPERTY);
        assert_eq!(regions.code_property, DEFAULT_CODE_PROPERTY);
        assert_eq!(resolved.http, HttpSettings::default());
        assert_eq!(resolved.token_provider, TokenProvider::default());
        assert_eq!(resolved.directory_url, DEFAULT_DIRECTORY_URL);
    }
}
