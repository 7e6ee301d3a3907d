use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CoverageError {
    #[error("invalid catalog url: {0}")]
    InvalidUrl(String),

    #[error("invalid bounding box: {0}")]
    InvalidBbox(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("missing config file stac-coverage.json in current directory")]
    MissingConfig,

    #[error("no region file configured; pass --regions or set \"regions\" in the config")]
    MissingRegions,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("{url} returned status {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("coverage store error: {0}")]
    Store(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl CoverageError {
    /// Errors that only concern one remote endpoint and leave the crawl able to continue.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            CoverageError::Http(_) | CoverageError::Status { .. } | CoverageError::Decode { .. }
        )
    }
}
