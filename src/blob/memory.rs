use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{validate_path, BlobEntry, BlobError, BlobStore};

/// In-process blob store, mostly for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// stores an object with an explicit timestamp
    pub async fn insert_at(
        &self,
        path: &str,
        bytes: Vec<u8>,
        at: DateTime<Utc>,
    ) -> Result<(), BlobError> {
        let path = validate_path(path)?.to_string();
        self.objects.write().await.insert(path, (bytes, at));
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, BlobError> {
        let prefix = prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", validate_path(prefix)?)
        };

        let objects = self.objects.read().await;
        let mut children: BTreeMap<String, BlobEntry> = BTreeMap::new();

        for (path, (bytes, at)) in objects.range(prefix.clone()..) {
            let Some(rest) = path.strip_prefix(&prefix) else {
                break;
            };

            match rest.split_once('/') {
                Some((dir, _)) => {
                    let entry = children.entry(dir.to_string()).or_insert(BlobEntry {
                        name: dir.to_string(),
                        is_dir: true,
                        updated_at: *at,
                        size: 0,
                    });
                    entry.updated_at = entry.updated_at.max(*at);
                }
                None => {
                    children.insert(
                        rest.to_string(),
                        BlobEntry {
                            name: rest.to_string(),
                            is_dir: false,
                            updated_at: *at,
                            size: bytes.len() as u64,
                        },
                    );
                }
            }
        }

        Ok(children.into_values().collect())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let path = validate_path(path)?;
        Ok(self
            .objects
            .read()
            .await
            .get(path)
            .map(|(bytes, _)| bytes.clone()))
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.insert_at(path, bytes, Utc::now()).await
    }

    async fn delete(&self, paths: &[String]) -> Result<usize, BlobError> {
        let mut objects = self.objects.write().await;
        let mut removed = 0;
        for path in paths {
            if objects.remove(validate_path(path)?).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let store = MemoryBlobStore::new();
        store.put("regions/11680/latest.json", vec![1]).await.unwrap();
        store.put("regions/11680/a.json", vec![1, 2]).await.unwrap();
        store.put("regions/11650/latest.json", vec![]).await.unwrap();
        store.put("regionsx/latest.json", vec![]).await.unwrap();

        let regions = store.list("regions").await.unwrap();
        let names: Vec<_> = regions.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["11650", "11680"]);
        assert!(regions.iter().all(|e| e.is_dir));

        let files = store.list("regions/11680/").await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.json");
        assert_eq!(files[0].size, 2);

        let root = store.list("").await.unwrap();
        assert_eq!(root.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_at_keeps_timestamp() {
        let store = MemoryBlobStore::new();
        let old = Utc::now() - chrono::Duration::days(30);
        store.insert_at("regions/11680/x.json", vec![], old).await.unwrap();

        let files = store.list("regions/11680").await.unwrap();
        assert_eq!(files[0].updated_at, old);
    }

    #[tokio::test]
    async fn test_delete_counts_only_existing() {
        let store = MemoryBlobStore::new();
        store.put("a/b.json", vec![]).await.unwrap();

        let removed = store
            .delete(&["a/b.json".to_string(), "a/c.json".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty().await);
    }
}
