use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use super::{validate_path, BlobEntry, BlobError, BlobStore};

/// Blob store backed by a directory on the local filesystem.
///
/// Writes go to a hidden temporary file first and are renamed into place,
/// so a concurrent `get` sees either the old or the new object.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        Ok(self.root.join(validate_path(path)?))
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError> {
        let dir = if prefix.trim_matches('/').is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix)?
        };

        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(BlobError::io(prefix, e)),
        };

        let mut entries = vec![];
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| BlobError::io(prefix, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            // in-progress writes
            if name.starts_with('.') {
                continue;
            }

            let meta = entry
                .metadata()
                .await
                .map_err(|e| BlobError::io(&name, e))?;
            let updated_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .map_err(|e| BlobError::io(&name, e))?;

            entries.push(BlobEntry {
                name,
                is_dir: meta.is_dir(),
                updated_at,
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::io(path, e)),
        }
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        let parent = full
            .parent()
            .ok_or_else(|| BlobError::InvalidPath(path.to_string()))?;
        let file_name = full
            .file_name()
            .ok_or_else(|| BlobError::InvalidPath(path.to_string()))?
            .to_string_lossy()
            .into_owned();

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BlobError::io(path, e))?;

        let tmp = parent.join(format!(".{file_name}.{:016x}", rand::random::<u64>()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| BlobError::io(path, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &full).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BlobError::io(path, e));
        }

        Ok(())
    }

    async fn delete(&self, paths: &[String]) -> Result<usize, BlobError> {
        let mut removed = 0;
        for path in paths {
            let full = self.resolve(path)?;
            match tokio::fs::remove_file(&full).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(BlobError::io(path, e)),
            }
        }

        Ok(removed)
    }
}
