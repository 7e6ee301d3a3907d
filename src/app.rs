use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::directory::{CatalogDirectory, CollectionLister};
use crate::domain::CatalogUrl;
use crate::error::CoverageError;
use crate::http::Transport;
use crate::probe::{RegionCollectionProber, TripleResult};
use crate::regions::RegionSource;
use crate::store::CoverageStore;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlSummary {
    pub catalogs: usize,
    pub catalogs_failed: usize,
    pub collections: usize,
    pub regions: usize,
    pub triples: usize,
    pub inserted: usize,
    pub updated: usize,
    pub empty: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
}

impl CrawlSummary {
    fn record(&mut self, result: TripleResult) {
        self.triples += 1;
        match result {
            TripleResult::Empty => self.empty += 1,
            TripleResult::Failed => self.failed += 1,
            TripleResult::Inserted => self.inserted += 1,
            TripleResult::Updated => self.updated += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Sequential survey over catalogs, their collections and every region.
pub struct App<D, L, R, T>
where
    D: CatalogDirectory,
    L: CollectionLister,
    R: RegionSource,
    T: Transport,
{
    directory: D,
    lister: L,
    regions: R,
    prober: RegionCollectionProber<T>,
}

impl<D, L, R, T> App<D, L, R, T>
where
    D: CatalogDirectory,
    L: CollectionLister,
    R: RegionSource,
    T: Transport,
{
    pub fn new(directory: D, lister: L, regions: R, prober: RegionCollectionProber<T>) -> Self {
        Self {
            directory,
            lister,
            regions,
            prober,
        }
    }

    /// Every upsert is durable before the next triple starts, so an aborted
    /// crawl keeps everything written so far. Only store failures abort.
    pub fn crawl<S: CoverageStore + ?Sized>(
        &self,
        store: &mut S,
        sink: &dyn ProgressSink,
    ) -> Result<CrawlSummary, CoverageError> {
        let start = Instant::now();
        let mut summary = CrawlSummary::default();

        sink.event(ProgressEvent {
            message: "phase=Resolve; loading regions".to_string(),
            elapsed: None,
        });
        let regions = self.regions.load_regions()?;
        summary.regions = regions.len();

        sink.event(ProgressEvent {
            message: "phase=Resolve; listing catalogs".to_string(),
            elapsed: Some(start.elapsed()),
        });
        let catalogs = self.directory.list_catalogs()?;
        let mut seen_catalogs = HashSet::new();
        info!(catalogs = catalogs.len(), regions = regions.len(), "starting crawl");

        for descriptor in catalogs {
            let catalog = match descriptor.url.parse::<CatalogUrl>() {
                Ok(catalog) => catalog,
                Err(err) => {
                    warn!(url = %descriptor.url, error = %err, "skipping catalog");
                    summary.catalogs_failed += 1;
                    continue;
                }
            };
            if !seen_catalogs.insert(catalog.clone()) {
                continue;
            }
            summary.catalogs += 1;

            sink.event(ProgressEvent {
                message: format!("phase=Collections; {catalog}"),
                elapsed: Some(start.elapsed()),
            });
            let collections = match self.lister.list_collections(&catalog) {
                Ok(collections) => collections,
                Err(err) => {
                    warn!(catalog = %catalog, error = %err, "cannot list collections, skipping catalog");
                    summary.catalogs_failed += 1;
                    continue;
                }
            };
            info!(catalog = %catalog, collections = collections.len(), "found collections");

            let mut seen_collections = HashSet::new();
            for collection_id in &collections {
                if !seen_collections.insert(collection_id.as_str()) {
                    continue;
                }
                summary.collections += 1;
                for region in &regions {
                    sink.event(ProgressEvent {
                        message: format!("phase=Probe; {catalog} {collection_id} {}", region.name),
                        elapsed: Some(start.elapsed()),
                    });
                    let result = self.prober.probe_and_persist(
                        &catalog,
                        collection_id,
                        region,
                        &mut *store,
                    )?;
                    summary.record(result);
                }
            }
        }

        summary.elapsed_ms = start.elapsed().as_millis();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} triples, {} inserted, {} updated",
                summary.triples, summary.inserted, summary.updated
            ),
            elapsed: Some(start.elapsed()),
        });
        info!(
            triples = summary.triples,
            inserted = summary.inserted,
            updated = summary.updated,
            empty = summary.empty,
            failed = summary.failed,
            "crawl finished"
        );
        Ok(summary)
    }
}
