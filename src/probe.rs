use geo::{MultiPolygon, Rect};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::assets::{self, AssetClassifier};
use crate::domain::{CatalogUrl, Feature, Region, SearchResponse};
use crate::error::CoverageError;
use crate::geometry;
use crate::http::{ResilientClient, Transport};
use crate::store::{CoverageClaim, CoverageStore, UpsertAction};
use crate::token::{TokenProvider, TokenServiceProber};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub asset_key: Option<String>,
    pub http_downloadable: bool,
    pub requires_token: bool,
    pub is_from_mpc: bool,
    pub mpc_token_obtaining_url: String,
}

impl Classification {
    pub fn into_claim(
        self,
        catalog: &CatalogUrl,
        collection_id: &str,
        region_code: &str,
        extent: MultiPolygon<f64>,
    ) -> CoverageClaim {
        CoverageClaim {
            catalog_url: catalog.as_str().to_string(),
            collection_id: collection_id.to_string(),
            extent,
            http_downloadable: self.http_downloadable,
            requires_token: self.requires_token,
            is_from_provider: self.is_from_mpc,
            token_url: self.mpc_token_obtaining_url,
            region_code: region_code.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ProbeOutcome {
    /// The search matched nothing; says nothing about accessibility.
    NoFeatures,
    Classified {
        classification: Classification,
        extent: MultiPolygon<f64>,
    },
    /// Transport, status or decode failure: the triple stays unknown.
    Failed(CoverageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TripleResult {
    Empty,
    Failed,
    Inserted,
    Updated,
}

impl From<UpsertAction> for TripleResult {
    fn from(action: UpsertAction) -> Self {
        match action {
            UpsertAction::Inserted => TripleResult::Inserted,
            UpsertAction::Updated => TripleResult::Updated,
        }
    }
}

/// Search body for one collection over a region envelope, asking for a single item.
pub fn search_body(collection_id: &str, envelope: Rect<f64>) -> Result<Value, CoverageError> {
    Ok(json!({
        "collections": [collection_id],
        "intersects": geometry::rect_to_geojson(envelope)?,
        "limit": 1,
    }))
}

#[derive(Clone)]
pub struct RegionCollectionProber<T: Transport> {
    client: ResilientClient<T>,
    classifier: AssetClassifier<T>,
    tokens: TokenServiceProber<T>,
}

impl<T: Transport + Clone> RegionCollectionProber<T> {
    pub fn new(client: ResilientClient<T>, provider: TokenProvider) -> Self {
        Self {
            classifier: AssetClassifier::new(client.clone()),
            tokens: TokenServiceProber::new(client.clone(), provider),
            client,
        }
    }
}

impl<T: Transport> RegionCollectionProber<T> {
    pub fn search(
        &self,
        catalog: &CatalogUrl,
        collection_id: &str,
        envelope: Rect<f64>,
    ) -> Result<SearchResponse, CoverageError> {
        let url = catalog.endpoint("search")?;
        let body = search_body(collection_id, envelope)?;
        info!(url = %url, collection = collection_id, "searching");
        self.client.post_json(&url, body)?.error_for_status()?.json()
    }

    pub fn classify(
        &self,
        catalog: &CatalogUrl,
        collection_id: &str,
        feature: &Feature,
    ) -> Classification {
        let asset_key = assets::representative_href(feature).map(|(key, _)| key.to_string());
        let is_from_mpc = self.tokens.provider().serves(catalog);
        let mut classification = Classification {
            asset_key,
            http_downloadable: false,
            requires_token: true,
            is_from_mpc,
            mpc_token_obtaining_url: String::new(),
        };
        if !assets::is_http_downloadable(feature) {
            return classification;
        }
        classification.http_downloadable = true;
        if self.classifier.is_directly_downloadable_without_token(feature) {
            classification.requires_token = false;
            return classification;
        }
        if is_from_mpc {
            let token = self.tokens.check_token_availability(collection_id);
            if token.available {
                classification.mpc_token_obtaining_url = token.probe_url;
            }
        }
        classification
    }

    pub fn probe(&self, catalog: &CatalogUrl, collection_id: &str, region: &Region) -> ProbeOutcome {
        let envelope = match region.envelope() {
            Ok(envelope) => envelope,
            Err(err) => return ProbeOutcome::Failed(err),
        };
        let response = match self.search(catalog, collection_id, envelope) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    catalog = %catalog,
                    collection = collection_id,
                    region = %region.name,
                    error = %err,
                    "search failed, skipping"
                );
                return ProbeOutcome::Failed(err);
            }
        };
        let Some(feature) = response.features.first() else {
            info!(
                catalog = %catalog,
                collection = collection_id,
                region = %region.name,
                "no items in region"
            );
            return ProbeOutcome::NoFeatures;
        };
        info!(
            catalog = %catalog,
            collection = collection_id,
            region = %region.name,
            "region has at least one item"
        );
        ProbeOutcome::Classified {
            classification: self.classify(catalog, collection_id, feature),
            extent: geometry::rect_to_multipolygon(envelope),
        }
    }

    /// Probes one triple and records the result. Only store failures are errors.
    pub fn probe_and_persist<S: CoverageStore + ?Sized>(
        &self,
        catalog: &CatalogUrl,
        collection_id: &str,
        region: &Region,
        store: &mut S,
    ) -> Result<TripleResult, CoverageError> {
        match self.probe(catalog, collection_id, region) {
            ProbeOutcome::NoFeatures => Ok(TripleResult::Empty),
            ProbeOutcome::Failed(_) => Ok(TripleResult::Failed),
            ProbeOutcome::Classified {
                classification,
                extent,
            } => {
                let claim = classification.into_claim(catalog, collection_id, &region.code, extent);
                Ok(store.upsert(&claim)?.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use geo::coord;

    use super::*;
    use crate::domain::BoundingBox;
    use crate::http::Method;
    use crate::http::test_support::{Scripted, ScriptedTransport, client};
    use crate::store::JsonCoverageStore;

    const MPC: &str = "https://planetarycomputer.microsoft.com/api/stac/v1/";
    const MPC_SEARCH: &str = "https://planetarycomputer.microsoft.com/api/stac/v1/search";
    const TOKEN: &str = "https://planetarycomputer.microsoft.com/api/sas/v1/token/naip";

    fn region() -> Region {
        let bbox: BoundingBox = "-10,-5,10,5".parse().unwrap();
        Region::from_bbox("Testland", "TL", bbox)
    }

    fn prober(transport: ScriptedTransport) -> RegionCollectionProber<ScriptedTransport> {
        RegionCollectionProber::new(client(transport), TokenProvider::default())
    }

    fn item(href: &str) -> Value {
        json!({ "features": [{ "id": "a", "assets": { "image": { "href": href } } }] })
    }

    #[test]
    fn search_body_uses_envelope_and_limit_one() {
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2.0, y: 1.0 });
        let body = search_body("naip", rect).unwrap();
        assert_eq!(body["collections"], json!(["naip"]));
        assert_eq!(body["limit"], 1);
        assert_eq!(body["intersects"]["type"], "Polygon");
    }

    #[test]
    fn empty_search_leaves_store_untouched() {
        let transport = ScriptedTransport::default().on(
            Method::Post,
            MPC_SEARCH,
            Scripted::Json(200, json!({ "type": "FeatureCollection", "features": [] })),
        );
        let catalog: CatalogUrl = MPC.parse().unwrap();
        let mut store = JsonCoverageStore::in_memory();
        let result = prober(transport)
            .probe_and_persist(&catalog, "naip", &region(), &mut store)
            .unwrap();
        assert_eq!(result, TripleResult::Empty);
        assert!(store.is_empty());
    }

    #[test]
    fn provider_token_recorded_when_granted() {
        let href = "https://naipeuwest.blob.core.windows.net/naip/tile.tif";
        let transport = ScriptedTransport::default()
            .on(Method::Post, MPC_SEARCH, Scripted::Json(200, item(href)))
            .on(Method::Head, href, Scripted::Status(403))
            .on(Method::Get, TOKEN, Scripted::Status(200));
        let catalog: CatalogUrl = MPC.parse().unwrap();
        let mut store = JsonCoverageStore::in_memory();
        let result = prober(transport)
            .probe_and_persist(&catalog, "naip", &region(), &mut store)
            .unwrap();
        assert_eq!(result, TripleResult::Inserted);
        let record = &store.records()[0];
        assert!(record.http_downloadable);
        assert!(record.requires_token);
        assert!(record.is_from_mpc);
        assert_eq!(record.mpc_token_obtaining_url, TOKEN);
        assert_eq!(record.spatial_extent.0.len(), 1);
    }

    #[test]
    fn provider_token_left_empty_when_denied() {
        let href = "https://naipeuwest.blob.core.windows.net/naip/tile.tif";
        let transport = ScriptedTransport::default()
            .on(Method::Post, MPC_SEARCH, Scripted::Json(200, item(href)))
            .on(Method::Head, href, Scripted::Status(403))
            .on(Method::Get, TOKEN, Scripted::Status(401));
        let catalog: CatalogUrl = MPC.parse().unwrap();
        let ProbeOutcome::Classified { classification, .. } =
            prober(transport).probe(&catalog, "naip", &region())
        else {
            panic!("expected a classification");
        };
        assert!(classification.requires_token);
        assert!(classification.is_from_mpc);
        assert_eq!(classification.mpc_token_obtaining_url, "");
    }

    #[test]
    fn non_provider_catalog_never_probes_tokens() {
        let catalog: CatalogUrl = "https://earth-search.example.com/v1/".parse().unwrap();
        let href = "https://bucket.example.com/tile.tif";
        let transport = ScriptedTransport::default()
            .on(
                Method::Post,
                "https://earth-search.example.com/v1/search",
                Scripted::Json(200, item(href)),
            )
            .on(Method::Head, href, Scripted::Status(403));
        let prober = prober(transport.clone());
        let outcome = prober.probe(&catalog, "naip", &region());
        assert_matches!(outcome, ProbeOutcome::Classified { ref classification, .. } => {
            assert!(classification.http_downloadable);
            assert!(classification.requires_token);
            assert!(!classification.is_from_mpc);
        });
        assert!(transport.calls().iter().all(|(method, _, _)| *method != Method::Get));
    }

    #[test]
    fn s3_asset_requires_token_without_head() {
        let catalog: CatalogUrl = "https://stac.example.com/".parse().unwrap();
        let transport = ScriptedTransport::default().on(
            Method::Post,
            "https://stac.example.com/search",
            Scripted::Json(200, item("s3://bucket/tile.tif")),
        );
        let outcome = prober(transport.clone()).probe(&catalog, "naip", &region());
        assert_matches!(outcome, ProbeOutcome::Classified { ref classification, .. } => {
            assert!(!classification.http_downloadable);
            assert!(classification.requires_token);
        });
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn failed_or_malformed_search_is_skipped() {
        let catalog: CatalogUrl = "https://stac.example.com/".parse().unwrap();
        let search = "https://stac.example.com/search";
        let mut store = JsonCoverageStore::in_memory();

        let rate_limited = ScriptedTransport::default().on(Method::Post, search, Scripted::Status(429));
        let result = prober(rate_limited)
            .probe_and_persist(&catalog, "naip", &region(), &mut store)
            .unwrap();
        assert_eq!(result, TripleResult::Failed);

        let malformed = ScriptedTransport::default().on(
            Method::Post,
            search,
            Scripted::Json(200, json!({ "type": "FeatureCollection" })),
        );
        let outcome = prober(malformed).probe(&catalog, "naip", &region());
        assert_matches!(outcome, ProbeOutcome::Failed(CoverageError::Decode { .. }));

        let unavailable = ScriptedTransport::default().on(
            Method::Post,
            search,
            Scripted::Json(503, json!(format!("{}é service unavailable", "x".repeat(198)))),
        );
        let outcome = prober(unavailable).probe(&catalog, "naip", &region());
        assert_matches!(
            outcome,
            ProbeOutcome::Failed(CoverageError::Status { status: 503, .. })
        );

        let broken = ScriptedTransport::default().on(
            Method::Post,
            search,
            Scripted::Fail("connection refused".to_string()),
        );
        let outcome = prober(broken).probe(&catalog, "naip", &region());
        assert_matches!(outcome, ProbeOutcome::Failed(CoverageError::Http(_)));
        assert!(store.is_empty());
    }
}
