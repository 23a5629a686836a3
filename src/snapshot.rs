//! Per-domain regional snapshot store.
//!
//! Layout under the domain's blob store:
//! `regions/{code}/latest.json` is overwritten on every refresh and
//! `regions/{code}/{timestamp}.json` keeps a copy of each refresh.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    blob::{self, BlobError, BlobStore},
    cache::Ttl,
    facility::{Domain, FacilityRecord},
    region::{RegionCode, RegionTable},
    retry::with_timeout,
};

pub const API_VERSION: &str = "1.0";
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(10);

const REGIONS_PREFIX: &str = "regions";
const LATEST: &str = "latest.json";
const DOWNLOAD_CONCURRENCY: usize = 4;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot storage: {0}")]
    Blob(#[from] BlobError),
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot for {region} claims {expected} items but holds {found}")]
    Corrupt {
        region: RegionCode,
        expected: usize,
        found: usize,
    },
}

/// Failure of [`SnapshotStore::put`].
///
/// Only a failed latest write loses the refresh; a failed historical
/// snapshot leaves the latest object in place.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("could not encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("could not write latest snapshot: {0}")]
    Latest(#[source] BlobError),
    #[error("latest written, but historical snapshot {path} failed: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: BlobError,
    },
}

impl PersistError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PersistError::Snapshot { .. })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub region_key: RegionCode,
    pub region_display_name: String,
    pub last_synced_at: DateTime<Utc>,
    pub item_count: usize,
    pub api_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SnapshotEnvelope {
    pub meta: SnapshotMeta,
    pub data: Vec<FacilityRecord>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    meta: &'a SnapshotMeta,
    data: &'a [FacilityRecord],
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SnapshotStatus {
    #[serde(flatten)]
    pub meta: SnapshotMeta,
    pub expired: bool,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_regions: usize,
    pub valid_caches: usize,
    pub expired_caches: usize,
    pub total_files: usize,
}

fn region_dir(code: &RegionCode) -> String {
    blob::join(&[REGIONS_PREFIX, code.as_str()])
}

fn latest_path(code: &RegionCode) -> String {
    blob::join(&[REGIONS_PREFIX, code.as_str(), LATEST])
}

/// `:` and `.` do not belong in object names
fn snapshot_path(code: &RegionCode, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y-%m-%dT%H-%M-%S-%3fZ");
    blob::join(&[REGIONS_PREFIX, code.as_str(), &format!("{stamp}.json")])
}

#[derive(Clone)]
pub struct SnapshotStore {
    domain: Domain,
    blobs: Arc<dyn BlobStore>,
    ttl: Ttl,
    timeout: Duration,
    table: RegionTable,
}

impl SnapshotStore {
    pub fn new(domain: Domain, blobs: Arc<dyn BlobStore>, ttl: Ttl) -> Self {
        Self {
            domain,
            blobs,
            ttl,
            timeout: DEFAULT_STORAGE_TIMEOUT,
            table: RegionTable,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    async fn timed<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, BlobError>>,
    ) -> Result<T, BlobError> {
        with_timeout(self.timeout, what, fut).await
    }

    /// Returns the region's data when a snapshot exists and is within the ttl.
    ///
    /// A missing snapshot is `Ok(None)`, not an error.
    pub async fn get_if_fresh(
        &self,
        code: &RegionCode,
    ) -> Result<Option<Vec<FacilityRecord>>, SnapshotError> {
        let Some(envelope) = self.read_latest(code).await? else {
            tracing::info!(domain = %self.domain, region = %code, "not cached");
            return Ok(None);
        };

        let now = Utc::now();
        if self.ttl.is_expired(envelope.meta.last_synced_at, now) {
            let age_days = (now - envelope.meta.last_synced_at).num_seconds() as f64 / 86_400.0;
            tracing::info!(
                domain = %self.domain,
                region = %code,
                age_days,
                "snapshot expired"
            );
            return Ok(None);
        }

        tracing::debug!(domain = %self.domain, region = %code, items = envelope.data.len(), "snapshot hit");
        Ok(Some(envelope.data))
    }

    /// latest envelope regardless of age
    async fn read_latest(&self, code: &RegionCode) -> Result<Option<SnapshotEnvelope>, SnapshotError> {
        let dir = region_dir(code);
        let entries = self.timed(&dir, self.blobs.list(&dir)).await?;
        if !entries.iter().any(|e| !e.is_dir && e.name == LATEST) {
            return Ok(None);
        }

        let path = latest_path(code);
        let Some(bytes) = self.timed(&path, self.blobs.get(&path)).await? else {
            // deleted between list and get
            return Ok(None);
        };

        let envelope: SnapshotEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.meta.item_count != envelope.data.len() {
            return Err(SnapshotError::Corrupt {
                region: code.clone(),
                expected: envelope.meta.item_count,
                found: envelope.data.len(),
            });
        }

        Ok(Some(envelope))
    }

    /// Writes a new envelope as the latest object, then as a dated snapshot.
    pub async fn put(
        &self,
        code: &RegionCode,
        display_name: &str,
        data: &[FacilityRecord],
    ) -> Result<(), PersistError> {
        let now = Utc::now();
        let display_name = if display_name.trim().is_empty() {
            self.table
                .display_name(code)
                .unwrap_or_else(|| code.to_string())
        } else {
            display_name.to_string()
        };

        let meta = SnapshotMeta {
            region_key: code.clone(),
            region_display_name: display_name,
            last_synced_at: now,
            item_count: data.len(),
            api_version: API_VERSION.to_string(),
        };
        let bytes = serde_json::to_vec(&EnvelopeRef { meta: &meta, data })?;

        let latest = latest_path(code);
        self.timed(&latest, self.blobs.put(&latest, bytes.clone()))
            .await
            .map_err(PersistError::Latest)?;

        let snapshot = snapshot_path(code, now);
        if let Err(source) = self.timed(&snapshot, self.blobs.put(&snapshot, bytes)).await {
            tracing::warn!(domain = %self.domain, region = %code, error = %source, "historical snapshot not written");
            return Err(PersistError::Snapshot {
                path: snapshot,
                source,
            });
        }

        tracing::info!(domain = %self.domain, region = %code, items = data.len(), "snapshot stored");
        Ok(())
    }

    /// Removes every object of a region, returning how many went.
    pub async fn delete(&self, code: &RegionCode) -> Result<usize, SnapshotError> {
        let dir = region_dir(code);
        let paths: Vec<String> = self
            .timed(&dir, self.blobs.list(&dir))
            .await?
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| blob::join(&[&dir, &e.name]))
            .collect();

        if paths.is_empty() {
            tracing::info!(domain = %self.domain, region = %code, "nothing to delete");
            return Ok(0);
        }

        let removed = self.timed(&dir, self.blobs.delete(&paths)).await?;
        tracing::info!(domain = %self.domain, region = %code, removed, "snapshots deleted");
        Ok(removed)
    }

    /// Deletes historical snapshots older than the ttl for one region, or
    /// for every region when `code` is None. Latest objects are kept.
    pub async fn cleanup_expired(&self, code: Option<&RegionCode>) -> Result<usize, SnapshotError> {
        let Some(cutoff) = self.ttl.cutoff(Utc::now()) else {
            return Ok(0);
        };

        let regions = match code {
            Some(code) => vec![code.clone()],
            None => self.list_regions().await?,
        };

        let mut removed = 0;
        for code in regions {
            let dir = region_dir(&code);
            let expired: Vec<String> = self
                .timed(&dir, self.blobs.list(&dir))
                .await?
                .into_iter()
                .filter(|e| !e.is_dir && e.name != LATEST && e.updated_at < cutoff)
                .map(|e| blob::join(&[&dir, &e.name]))
                .collect();

            if !expired.is_empty() {
                removed += self.timed(&dir, self.blobs.delete(&expired)).await?;
            }
        }

        tracing::info!(domain = %self.domain, removed, "expired snapshots cleaned up");
        Ok(removed)
    }

    /// Buckets every region's latest object by age.
    pub async fn stats(&self) -> Result<CacheStats, SnapshotError> {
        let now = Utc::now();
        let mut stats = CacheStats::default();

        for code in self.list_regions().await? {
            let dir = region_dir(&code);
            let files: Vec<_> = self
                .timed(&dir, self.blobs.list(&dir))
                .await?
                .into_iter()
                .filter(|e| !e.is_dir)
                .collect();

            stats.total_files += files.len();
            if let Some(latest) = files.iter().find(|e| e.name == LATEST) {
                stats.total_regions += 1;
                if self.ttl.is_expired(latest.updated_at, now) {
                    stats.expired_caches += 1;
                } else {
                    stats.valid_caches += 1;
                }
            }
        }

        Ok(stats)
    }

    pub async fn metadata(&self, code: &RegionCode) -> Result<Option<SnapshotStatus>, SnapshotError> {
        Ok(self.read_latest(code).await?.map(|envelope| SnapshotStatus {
            expired: self.ttl.is_expired(envelope.meta.last_synced_at, Utc::now()),
            meta: envelope.meta,
        }))
    }

    /// region codes that have a directory under `regions/`
    pub async fn list_regions(&self) -> Result<Vec<RegionCode>, SnapshotError> {
        let entries = self
            .timed(REGIONS_PREFIX, self.blobs.list(REGIONS_PREFIX))
            .await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| match e.name.parse() {
                Ok(code) => Some(code),
                Err(_) => {
                    tracing::debug!(name = %e.name, "skipping non-region directory");
                    None
                }
            })
            .collect())
    }

    /// Fresh data for several regions, downloading a few at a time.
    /// Regions that are missing, expired or unreadable map to None.
    pub async fn get_many(
        &self,
        codes: &[RegionCode],
    ) -> HashMap<RegionCode, Option<Vec<FacilityRecord>>> {
        let semaphore = Arc::new(Semaphore::new(DOWNLOAD_CONCURRENCY));
        let mut set = JoinSet::new();

        for code in codes {
            let store = self.clone();
            let code = code.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let res = store.get_if_fresh(&code).await;
                (code, res)
            });
        }

        let mut out = HashMap::with_capacity(codes.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((code, Ok(data))) => {
                    out.insert(code, data);
                }
                Ok((code, Err(e))) => {
                    tracing::warn!(domain = %self.domain, region = %code, error = %e, "failed to read snapshot");
                    out.insert(code, None);
                }
                Err(e) => tracing::error!(error = %e, "snapshot download task failed"),
            }
        }

        for code in codes {
            out.entry(code.clone()).or_insert(None);
        }

        out
    }
}
