use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::CatalogUrl;
use crate::http::{ResilientClient, Transport};

pub const DEFAULT_PROVIDER_MARKER: &str = "planetarycomputer";
pub const DEFAULT_TOKEN_URL_TEMPLATE: &str =
    "https://planetarycomputer.microsoft.com/api/sas/v1/token/{collection}";

/// A provider whose assets sit behind a signing service, recognized by a
/// substring of the catalog base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenProvider {
    pub marker: String,
    pub url_template: String,
}

impl Default for TokenProvider {
    fn default() -> Self {
        Self {
            marker: DEFAULT_PROVIDER_MARKER.to_string(),
            url_template: DEFAULT_TOKEN_URL_TEMPLATE.to_string(),
        }
    }
}

impl TokenProvider {
    pub fn serves(&self, catalog: &CatalogUrl) -> bool {
        catalog.contains_marker(&self.marker)
    }

    pub fn token_url(&self, collection_id: &str) -> String {
        self.url_template.replace("{collection}", collection_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAvailability {
    pub available: bool,
    /// Always the URL that was probed, even when the probe failed.
    pub probe_url: String,
}

#[derive(Clone)]
pub struct TokenServiceProber<T: Transport> {
    client: ResilientClient<T>,
    provider: TokenProvider,
}

impl<T: Transport> TokenServiceProber<T> {
    pub fn new(client: ResilientClient<T>, provider: TokenProvider) -> Self {
        Self { client, provider }
    }

    pub fn provider(&self) -> &TokenProvider {
        &self.provider
    }

    pub fn check_token_availability(&self, collection_id: &str) -> TokenAvailability {
        let probe_url = self.provider.token_url(collection_id);
        info!(collection = collection_id, url = %probe_url, "checking token service");
        let available = match self.client.get(&probe_url) {
            Ok(response) => response.is_success(),
            Err(err) => {
                info!(collection = collection_id, error = %err, "token service unreachable");
                false
            }
        };
        TokenAvailability {
            available,
            probe_url,
        }
    }
}
