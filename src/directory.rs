use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::{CatalogUrl, CollectionsPage};
use crate::error::CoverageError;
use crate::http::{ResilientClient, Transport};

pub const DEFAULT_DIRECTORY_URL: &str = "https://stacindex.org/api/catalogs";

/// Upper bound on followed `next` links when listing collections.
const MAX_COLLECTION_PAGES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogDescriptor {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "isPrivate", default = "default_private")]
    pub is_private: bool,
    #[serde(rename = "isApi", default)]
    pub is_api: bool,
}

fn default_private() -> bool {
    true
}

impl CatalogDescriptor {
    pub fn public_api(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            is_private: false,
            is_api: true,
        }
    }
}

pub trait CatalogDirectory {
    /// Public catalogs that answer searches.
    fn list_catalogs(&self) -> Result<Vec<CatalogDescriptor>, CoverageError>;
}

pub trait CollectionLister {
    fn list_collections(&self, catalog: &CatalogUrl) -> Result<Vec<String>, CoverageError>;
}

impl<D: CatalogDirectory + ?Sized> CatalogDirectory for Box<D> {
    fn list_catalogs(&self) -> Result<Vec<CatalogDescriptor>, CoverageError> {
        (**self).list_catalogs()
    }
}

/// A fixed catalog list, e.g. from configuration or the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    catalogs: Vec<CatalogDescriptor>,
}

impl StaticDirectory {
    pub fn new(catalogs: Vec<CatalogDescriptor>) -> Self {
        Self { catalogs }
    }
}

impl CatalogDirectory for StaticDirectory {
    fn list_catalogs(&self) -> Result<Vec<CatalogDescriptor>, CoverageError> {
        Ok(self.catalogs.clone())
    }
}

/// Directory backed by a STAC index listing, keeping public API catalogs
/// whose search endpoint accepts a whole-world query.
#[derive(Clone)]
pub struct StacIndexDirectory<T: Transport> {
    client: ResilientClient<T>,
    url: String,
}

impl<T: Transport> StacIndexDirectory<T> {
    pub fn new(client: ResilientClient<T>, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    fn has_working_search(&self, catalog: &CatalogUrl) -> bool {
        let search_url = match catalog.endpoint("search") {
            Ok(url) => url,
            Err(err) => {
                warn!(catalog = %catalog, error = %err, "cannot build search url");
                return false;
            }
        };
        let body = json!({
            "limit": 1,
            "intersects": {
                "type": "Polygon",
                "coordinates": [[[-180, -90], [180, -90], [180, 90], [-180, 90], [-180, -90]]],
            },
        });
        match self.client.post_json(&search_url, body) {
            Ok(response) if response.is_success() => {
                info!(catalog = %catalog, "catalog has a working search endpoint");
                true
            }
            Ok(response) => {
                warn!(catalog = %catalog, status = response.status, "search check rejected");
                false
            }
            Err(err) => {
                warn!(catalog = %catalog, error = %err, "search check failed");
                false
            }
        }
    }
}

impl<T: Transport> CatalogDirectory for StacIndexDirectory<T> {
    fn list_catalogs(&self) -> Result<Vec<CatalogDescriptor>, CoverageError> {
        let entries: Vec<CatalogDescriptor> =
            self.client.get(&self.url)?.error_for_status()?.json()?;
        info!(total = entries.len(), "fetched catalog directory");
        let catalogs = entries
            .into_iter()
            .filter(|entry| !entry.is_private && entry.is_api)
            .filter(|entry| match entry.url.parse::<CatalogUrl>() {
                Ok(catalog) => self.has_working_search(&catalog),
                Err(_) => {
                    warn!(url = %entry.url, "skipping catalog with invalid url");
                    false
                }
            })
            .collect::<Vec<_>>();
        info!(usable = catalogs.len(), "public catalogs with search");
        Ok(catalogs)
    }
}

#[derive(Clone)]
pub struct HttpCollectionLister<T: Transport> {
    client: ResilientClient<T>,
}

impl<T: Transport> HttpCollectionLister<T> {
    pub fn new(client: ResilientClient<T>) -> Self {
        Self { client }
    }
}

impl<T: Transport> CollectionLister for HttpCollectionLister<T> {
    fn list_collections(&self, catalog: &CatalogUrl) -> Result<Vec<String>, CoverageError> {
        let mut url = catalog.endpoint("collections")?;
        let mut visited = HashSet::new();
        let mut ids = Vec::new();
        for _ in 0..MAX_COLLECTION_PAGES {
            if !visited.insert(url.clone()) {
                break;
            }
            let page: CollectionsPage = self.client.get(&url)?.error_for_status()?.json()?;
            ids.extend(page.collections.iter().map(|collection| collection.id.clone()));
            match page.next_href() {
                Some(next) => url = next.to_string(),
                None => break,
            }
        }
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        info!(catalog = %catalog, collections = ids.len(), "listed collections");
        Ok(ids)
    }
}
