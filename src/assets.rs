//! Picks a representative asset of a STAC item and classifies how it can be reached.
//!
//! The asset choice is a heuristic: raster and gridded-data files are preferred
//! over metadata and thumbnails, but nothing guarantees that the chosen asset is
//! "the" downloadable one.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::domain::Feature;
use crate::http::{ResilientClient, Transport};

/// Suffixes of data files preferred over other assets, matched case-insensitively.
pub const PREFERRED_SUFFIXES: [&str; 3] = [".tif", ".tiff", ".nc"];

pub fn asset_href(asset: &Value) -> Option<&str> {
    asset.get("href").and_then(Value::as_str)
}

/// First asset whose href has a preferred suffix, else the first asset in
/// document order. `None` only for an empty mapping.
pub fn pick_representative_asset(assets: &Map<String, Value>) -> Option<&str> {
    assets
        .iter()
        .find(|(_, asset)| asset_href(asset).is_some_and(has_preferred_suffix))
        .or_else(|| assets.iter().next())
        .map(|(key, _)| key.as_str())
}

fn has_preferred_suffix(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    PREFERRED_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Key and href of the representative asset, when the feature has a usable one.
pub fn representative_href(feature: &Feature) -> Option<(&str, &str)> {
    let key = pick_representative_asset(&feature.assets)?;
    let href = feature.assets.get(key).and_then(asset_href)?;
    Some((key, href))
}

pub fn is_http_downloadable(feature: &Feature) -> bool {
    match representative_href(feature) {
        Some((_, href)) if href.starts_with("http") => true,
        Some((_, href)) => {
            info!(href, "asset href is not served over http");
            false
        }
        None => false,
    }
}

#[derive(Clone)]
pub struct AssetClassifier<T: Transport> {
    client: ResilientClient<T>,
}

impl<T: Transport> AssetClassifier<T> {
    pub fn new(client: ResilientClient<T>) -> Self {
        Self { client }
    }

    /// HTTP asset answering an unauthenticated HEAD with 2xx. Transport
    /// failures count as "not directly downloadable".
    pub fn is_directly_downloadable_without_token(&self, feature: &Feature) -> bool {
        if !is_http_downloadable(feature) {
            return false;
        }
        let Some((_, href)) = representative_href(feature) else {
            return false;
        };
        match self.client.head(href) {
            Ok(response) => {
                debug!(href, status = response.status, "asset head");
                response.is_success()
            }
            Err(err) => {
                info!(href, error = %err, "asset head failed");
                false
            }
        }
    }
}
