use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{CrawlSummary, ProgressEvent, ProgressSink};
use crate::probe::Classification;
use crate::store::{CoverageHit, UpsertAction};

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub catalog_url: String,
    pub collection_id: String,
    pub region: String,
    pub outcome: String,
    pub classification: Option<Classification>,
    /// Set only when the probe was written to a store.
    pub stored: Option<UpsertAction>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_crawl(result: &CrawlSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_query(result: &[CoverageHit]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_probe(result: &ProbeReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(?elapsed, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
