//! Path-addressed object storage used as the persistence layer of every cache.

pub mod fs;
pub mod memory;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub use self::{fs::FsBlobStore, memory::MemoryBlobStore};

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid blob path {0:?}")]
    InvalidPath(String),
    #[error("timed out on {0}")]
    Timeout(String),
    #[error("blob backend: {0}")]
    Backend(String),
}

impl BlobError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One direct child of a listed prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub is_dir: bool,
    pub updated_at: DateTime<Utc>,
    pub size: u64,
}

/// Object store with directory-like listing.
///
/// `get` and `put` are atomic per object: readers never see a partial write.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// direct children of `prefix`; empty when nothing is stored under it
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError>;

    /// None when the object does not exist
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, BlobError>;

    /// creates or overwrites
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    /// returns how many objects were actually removed
    async fn delete(&self, paths: &[String]) -> Result<usize, BlobError>;
}

/// joins path segments, ignoring empty ones
pub fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// rejects anything that could escape the store root
pub(crate) fn validate_path(path: &str) -> Result<&str, BlobError> {
    let trimmed = path.trim_matches('/');
    let bad = path.starts_with('/')
        || path.contains('\\')
        || trimmed
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..");

    if bad {
        Err(BlobError::InvalidPath(path.to_string()))
    } else {
        Ok(trimmed)
    }
}
