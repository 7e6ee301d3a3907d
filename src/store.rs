use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use geo::{Geometry, MultiPolygon};
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::{debug, info};

use crate::error::CoverageError;
use crate::geometry;

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// What is known about one collection's accessibility over one spatial extent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub catalog_url: String,
    pub collection_id: String,
    #[serde(with = "geometry::multipolygon_geojson")]
    pub spatial_extent: MultiPolygon<f64>,
    pub http_downloadable: bool,
    pub requires_token: bool,
    pub is_from_mpc: bool,
    /// Empty unless `is_from_mpc` and a token endpoint was granting tokens.
    #[serde(default)]
    pub mpc_token_obtaining_url: String,
    #[serde(default)]
    pub region_code: String,
    pub last_probed_at: String,
}

impl CoverageRecord {
    pub fn collection_stac_url(&self) -> String {
        format!(
            "{}/collections/{}",
            self.catalog_url.trim_end_matches('/'),
            self.collection_id
        )
    }
}

/// Input of an upsert: the classification of one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageClaim {
    pub catalog_url: String,
    pub collection_id: String,
    pub extent: MultiPolygon<f64>,
    pub http_downloadable: bool,
    pub requires_token: bool,
    pub is_from_provider: bool,
    pub token_url: String,
    pub region_code: String,
}

impl CoverageClaim {
    fn token_url(&self) -> String {
        if self.is_from_provider {
            self.token_url.trim().to_string()
        } else {
            String::new()
        }
    }

    fn apply_to(&self, record: &mut CoverageRecord, probed_at: &str) {
        record.http_downloadable = self.http_downloadable;
        record.requires_token = self.requires_token;
        record.is_from_mpc = self.is_from_provider;
        record.mpc_token_obtaining_url = self.token_url();
        record.last_probed_at = probed_at.to_string();
    }

    fn to_record(&self, probed_at: &str) -> CoverageRecord {
        CoverageRecord {
            catalog_url: self.catalog_url.clone(),
            collection_id: self.collection_id.clone(),
            spatial_extent: self.extent.clone(),
            http_downloadable: self.http_downloadable,
            requires_token: self.requires_token,
            is_from_mpc: self.is_from_provider,
            mpc_token_obtaining_url: self.token_url(),
            region_code: self.region_code.clone(),
            last_probed_at: probed_at.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageFilter {
    pub http_downloadable: Option<bool>,
    pub requires_token: Option<bool>,
    pub is_from_mpc: Option<bool>,
    /// Only records with a confirmed token endpoint.
    pub with_token_url: bool,
    /// Drop provider records whose token service was not granting tokens.
    pub available_only: bool,
}

impl CoverageFilter {
    pub fn matches(&self, record: &CoverageRecord) -> bool {
        let has_token_url = !record.mpc_token_obtaining_url.is_empty();
        self.http_downloadable
            .is_none_or(|value| record.http_downloadable == value)
            && self
                .requires_token
                .is_none_or(|value| record.requires_token == value)
            && self.is_from_mpc.is_none_or(|value| record.is_from_mpc == value)
            && (!self.with_token_url || has_token_url)
            && (!self.available_only || !record.is_from_mpc || has_token_url)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageHit {
    #[serde(flatten)]
    pub record: CoverageRecord,
    pub collection_stac_url: String,
}

/// Persisted coverage records keyed by (catalog, collection) and spatial containment.
pub trait CoverageStore {
    /// Updates the record of the same catalog and collection whose extent
    /// covers `claim.extent`, or inserts a new one. Durable on return.
    fn upsert(&mut self, claim: &CoverageClaim) -> Result<UpsertAction, CoverageError>;

    fn records(&self) -> &[CoverageRecord];

    fn query(&self, aoi: &Geometry<f64>, filter: &CoverageFilter) -> Vec<CoverageHit> {
        self.records()
            .iter()
            .filter(|record| filter.matches(record))
            .filter(|record| geometry::intersects(aoi, &record.spatial_extent))
            .map(|record| CoverageHit {
                record: record.clone(),
                collection_stac_url: record.collection_stac_url(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    schema_version: u32,
    #[serde(default)]
    records: Vec<CoverageRecord>,
}

/// Coverage store kept in one JSON document, rewritten atomically on every upsert.
///
/// A writable store holds an exclusive lock on `<path>.lock` until it is
/// dropped, so a second writer on the same file fails to open instead of
/// overwriting committed records.
#[derive(Debug, Default)]
pub struct JsonCoverageStore {
    path: Option<Utf8PathBuf>,
    records: Vec<CoverageRecord>,
    lock: Option<File>,
}

impl JsonCoverageStore {
    pub fn open(path: Utf8PathBuf) -> Result<Self, CoverageError> {
        let lock = acquire_lock(&path)?;
        let records = read_records(&path)?;
        debug!(path = %path, records = records.len(), "opened coverage store");
        Ok(Self {
            path: Some(path),
            records,
            lock: Some(lock),
        })
    }

    /// Snapshot of the file for queries. Takes no lock and refuses upserts.
    pub fn open_read_only(path: Utf8PathBuf) -> Result<Self, CoverageError> {
        let records = read_records(&path)?;
        debug!(path = %path, records = records.len(), "opened coverage store read-only");
        Ok(Self {
            path: Some(path),
            records,
            lock: None,
        })
    }

    /// Store without a backing file, for dry runs.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn default_path() -> Result<Utf8PathBuf, CoverageError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.cache_dir().join("stac-coverage").join("coverage.json"),
                )
                .ok()
            })
            .ok_or_else(|| CoverageError::Filesystem("unable to resolve cache directory".to_string()))
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn covering_index(&self, claim: &CoverageClaim) -> Option<usize> {
        self.records.iter().position(|record| {
            record.catalog_url == claim.catalog_url
                && record.collection_id == claim.collection_id
                && geometry::covers(&record.spatial_extent, &claim.extent)
        })
    }

    fn persist(&self) -> Result<(), CoverageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.lock.is_none() {
            return Err(CoverageError::Store(format!("{path} was opened read-only")));
        }
        let parent = parent_dir(path);
        let file = StoreFile {
            schema_version: STORE_SCHEMA_VERSION,
            records: self.records.clone(),
        };
        let content = serde_json::to_vec_pretty(&file)
            .map_err(|err| CoverageError::Store(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("stac-coverage")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CoverageError::Store(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| CoverageError::Store(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| CoverageError::Store(format!("write {path}: {err}")))?;
        Ok(())
    }
}

fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    path.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."))
}

fn acquire_lock(path: &Utf8Path) -> Result<File, CoverageError> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CoverageError::Store(format!("create {parent}: {err}")))?;
    let lock_path = Utf8PathBuf::from(format!("{path}.lock"));
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path.as_std_path())
        .map_err(|err| CoverageError::Store(format!("open {lock_path}: {err}")))?;
    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(CoverageError::Store(format!(
            "{path} is locked by another writer"
        ))),
        Err(TryLockError::Error(err)) => {
            Err(CoverageError::Store(format!("lock {lock_path}: {err}")))
        }
    }
}

fn read_records(path: &Utf8Path) -> Result<Vec<CoverageRecord>, CoverageError> {
    if !path.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| CoverageError::Store(format!("read {path}: {err}")))?;
    let file: StoreFile = serde_json::from_str(&content)
        .map_err(|err| CoverageError::Store(format!("parse {path}: {err}")))?;
    if file.schema_version != STORE_SCHEMA_VERSION {
        return Err(CoverageError::Store(format!(
            "{path} has schema version {}, expected {STORE_SCHEMA_VERSION}",
            file.schema_version
        )));
    }
    Ok(file.records)
}

impl CoverageStore for JsonCoverageStore {
    fn upsert(&mut self, claim: &CoverageClaim) -> Result<UpsertAction, CoverageError> {
        let probed_at = chrono::Utc::now().to_rfc3339();
        match self.covering_index(claim) {
            Some(index) => {
                let previous = self.records[index].clone();
                claim.apply_to(&mut self.records[index], &probed_at);
                if let Err(err) = self.persist() {
                    self.records[index] = previous;
                    return Err(err);
                }
                info!(
                    catalog = %claim.catalog_url,
                    collection = %claim.collection_id,
                    "updated coverage record"
                );
                Ok(UpsertAction::Updated)
            }
            None => {
                self.records.push(claim.to_record(&probed_at));
                if let Err(err) = self.persist() {
                    self.records.pop();
                    return Err(err);
                }
                info!(
                    catalog = %claim.catalog_url,
                    collection = %claim.collection_id,
                    region = %claim.region_code,
                    "added coverage record"
                );
                Ok(UpsertAction::Inserted)
            }
        }
    }

    fn records(&self) -> &[CoverageRecord] {
        &self.records
    }
}
