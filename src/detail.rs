//! Per-facility detail cache, one store per domain.
//!
//! Same envelope and ttl scheme as the regional snapshots, keyed by the
//! registry's facility id: `details/{id}/latest.json` plus one
//! `details/{id}/{YYYY-MM-DD}.json` per day a detail was refreshed.

use std::{fmt, future::Future, str::FromStr, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    blob::{self, BlobEntry, BlobError, BlobStore},
    cache::Ttl,
    facility::Domain,
    retry::with_timeout,
    snapshot::{PersistError, SnapshotError, API_VERSION, DEFAULT_STORAGE_TIMEOUT},
};

const DETAILS_PREFIX: &str = "details";
const LATEST: &str = "latest.json";

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid facility id {0:?}")]
pub struct InvalidFacilityId(pub String);

/// Registry id of one facility, safe to use as a path segment.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct FacilityId(String);

impl FacilityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FacilityId {
    type Err = InvalidFacilityId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = !s.is_empty()
            && s.len() <= 64
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidFacilityId(s.to_string()))
        }
    }
}

impl TryFrom<String> for FacilityId {
    type Error = InvalidFacilityId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FacilityId> for String {
    fn from(id: FacilityId) -> Self {
        id.0
    }
}

impl fmt::Display for FacilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailMeta {
    pub facility_id: FacilityId,
    pub last_synced_at: DateTime<Utc>,
    pub api_version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetailEnvelope<T> {
    pub meta: DetailMeta,
    pub data: T,
}

/// Newest stored object of a facility.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailStatus {
    pub facility_id: FacilityId,
    pub last_updated: DateTime<Utc>,
    pub file_path: String,
    pub expired: bool,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DetailStats {
    pub total_details: usize,
    pub valid_caches: usize,
    pub expired_caches: usize,
    pub total_files: usize,
}

fn detail_dir(id: &FacilityId) -> String {
    blob::join(&[DETAILS_PREFIX, id.as_str()])
}

fn latest_path(id: &FacilityId) -> String {
    blob::join(&[DETAILS_PREFIX, id.as_str(), LATEST])
}

/// one history object per day, later refreshes that day overwrite it
fn snapshot_path(id: &FacilityId, at: DateTime<Utc>) -> String {
    let day = at.format("%Y-%m-%d");
    blob::join(&[DETAILS_PREFIX, id.as_str(), &format!("{day}.json")])
}

#[derive(Clone)]
pub struct DetailStore {
    domain: Domain,
    blobs: Arc<dyn BlobStore>,
    ttl: Ttl,
    timeout: Duration,
}

impl DetailStore {
    pub fn new(domain: Domain, blobs: Arc<dyn BlobStore>, ttl: Ttl) -> Self {
        Self {
            domain,
            blobs,
            ttl,
            timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    async fn timed<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, BlobError>>,
    ) -> Result<T, BlobError> {
        with_timeout(self.timeout, what, fut).await
    }

    async fn files(&self, id: &FacilityId) -> Result<Vec<BlobEntry>, BlobError> {
        let dir = detail_dir(id);
        Ok(self
            .timed(&dir, self.blobs.list(&dir))
            .await?
            .into_iter()
            .filter(|e| !e.is_dir)
            .collect())
    }

    /// Returns the cached detail when its latest object is within the ttl.
    ///
    /// Age comes from the object's modification time, so an expired detail
    /// is never downloaded.
    pub async fn get_if_fresh<T: DeserializeOwned>(
        &self,
        id: &FacilityId,
    ) -> Result<Option<T>, SnapshotError> {
        let files = self.files(id).await?;
        let Some(latest) = files.iter().find(|e| e.name == LATEST) else {
            tracing::info!(domain = %self.domain, facility = %id, "detail not cached");
            return Ok(None);
        };

        let now = Utc::now();
        if self.ttl.is_expired(latest.updated_at, now) {
            let age_days = (now - latest.updated_at).num_seconds() as f64 / 86_400.0;
            tracing::info!(domain = %self.domain, facility = %id, age_days, "detail expired");
            return Ok(None);
        }

        let path = latest_path(id);
        let Some(bytes) = self.timed(&path, self.blobs.get(&path)).await? else {
            return Ok(None);
        };

        let envelope: DetailEnvelope<T> = serde_json::from_slice(&bytes)?;
        tracing::debug!(domain = %self.domain, facility = %id, "detail hit");
        Ok(Some(envelope.data))
    }

    /// Writes the latest object, then the day's history object.
    pub async fn put<T: Serialize>(&self, id: &FacilityId, data: &T) -> Result<(), PersistError> {
        let now = Utc::now();
        let envelope = DetailEnvelope {
            meta: DetailMeta {
                facility_id: id.clone(),
                last_synced_at: now,
                api_version: API_VERSION.to_string(),
            },
            data,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let latest = latest_path(id);
        self.timed(&latest, self.blobs.put(&latest, bytes.clone()))
            .await
            .map_err(PersistError::Latest)?;

        let snapshot = snapshot_path(id, now);
        if let Err(source) = self.timed(&snapshot, self.blobs.put(&snapshot, bytes)).await {
            tracing::warn!(domain = %self.domain, facility = %id, error = %source, "detail history not written");
            return Err(PersistError::Snapshot {
                path: snapshot,
                source,
            });
        }

        tracing::info!(domain = %self.domain, facility = %id, "detail stored");
        Ok(())
    }

    /// status of the most recently written object, latest or history
    pub async fn metadata(&self, id: &FacilityId) -> Result<Option<DetailStatus>, SnapshotError> {
        let newest = self
            .files(id)
            .await?
            .into_iter()
            .max_by_key(|e| e.updated_at);

        Ok(newest.map(|e| DetailStatus {
            facility_id: id.clone(),
            last_updated: e.updated_at,
            file_path: blob::join(&[&detail_dir(id), &e.name]),
            expired: self.ttl.is_expired(e.updated_at, Utc::now()),
        }))
    }

    pub async fn delete(&self, id: &FacilityId) -> Result<usize, SnapshotError> {
        let dir = detail_dir(id);
        let paths: Vec<String> = self
            .files(id)
            .await?
            .into_iter()
            .map(|e| blob::join(&[&dir, &e.name]))
            .collect();

        if paths.is_empty() {
            return Ok(0);
        }

        let removed = self.timed(&dir, self.blobs.delete(&paths)).await?;
        tracing::info!(domain = %self.domain, facility = %id, removed, "detail deleted");
        Ok(removed)
    }

    /// Deletes history objects older than the ttl. Latest objects are kept.
    pub async fn cleanup_expired(&self) -> Result<usize, SnapshotError> {
        let Some(cutoff) = self.ttl.cutoff(Utc::now()) else {
            return Ok(0);
        };

        let mut removed = 0;
        for id in self.list_facilities().await? {
            let dir = detail_dir(&id);
            let expired: Vec<String> = self
                .files(&id)
                .await?
                .into_iter()
                .filter(|e| e.name != LATEST && e.updated_at < cutoff)
                .map(|e| blob::join(&[&dir, &e.name]))
                .collect();

            if !expired.is_empty() {
                removed += self.timed(&dir, self.blobs.delete(&expired)).await?;
            }
        }

        tracing::info!(domain = %self.domain, removed, "expired details cleaned up");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<DetailStats, SnapshotError> {
        let now = Utc::now();
        let mut stats = DetailStats::default();

        for id in self.list_facilities().await? {
            let files = self.files(&id).await?;
            stats.total_files += files.len();

            if let Some(latest) = files.iter().find(|e| e.name == LATEST) {
                stats.total_details += 1;
                if self.ttl.is_expired(latest.updated_at, now) {
                    stats.expired_caches += 1;
                } else {
                    stats.valid_caches += 1;
                }
            }
        }

        Ok(stats)
    }

    pub async fn list_facilities(&self) -> Result<Vec<FacilityId>, SnapshotError> {
        let entries = self
            .timed(DETAILS_PREFIX, self.blobs.list(DETAILS_PREFIX))
            .await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| e.name.parse().ok())
            .collect())
    }
}
