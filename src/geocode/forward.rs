use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ForwardGeocodingProvider, GeocodeError};
use crate::{
    address::normalize_address,
    blob::{self, BlobStore},
    cache::{AddressCache, Ttl},
};

const ADDRESS_PREFIX: &str = "addresses";

/// delay between provider calls in [`AddressGeocodeCache::geocode_batch`]
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Stored form of a forward geocoding result.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GeocodeEntry {
    pub normalized_address: String,
    pub original_address: String,
    pub lat: f64,
    pub lng: f64,
    pub provider: String,
    pub accuracy: String,
    pub address_type: String,
    pub cached_at: DateTime<Utc>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Geocoded {
    pub lat: f64,
    pub lng: f64,
    pub provider: String,
    pub accuracy: String,
    pub address_type: String,
}

impl From<&GeocodeEntry> for Geocoded {
    fn from(e: &GeocodeEntry) -> Self {
        Self {
            lat: e.lat,
            lng: e.lng,
            provider: e.provider.clone(),
            accuracy: e.accuracy.clone(),
            address_type: e.address_type.clone(),
        }
    }
}

/// objects are keyed by a digest so arbitrary address text stays path-safe
fn address_path(normalized: &str) -> String {
    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    blob::join(&[ADDRESS_PREFIX, &format!("{digest}.json")])
}

/// Normalized-address cache in front of a forward geocoding provider.
pub struct AddressGeocodeCache {
    store: Arc<dyn BlobStore>,
    provider: Arc<dyn ForwardGeocodingProvider>,
    memory: AddressCache,
    ttl: Ttl,
}

impl AddressGeocodeCache {
    pub fn new(
        store: Arc<dyn BlobStore>,
        provider: Arc<dyn ForwardGeocodingProvider>,
        memory: AddressCache,
        ttl: Ttl,
    ) -> Self {
        Self {
            store,
            provider,
            memory,
            ttl,
        }
    }

    /// addresses held in the blob store
    pub async fn entry_count(&self) -> Result<usize, GeocodeError> {
        let entries = self.store.list(ADDRESS_PREFIX).await?;
        Ok(entries.iter().filter(|e| !e.is_dir).count())
    }

    /// `Ok(None)` when the address normalizes to nothing or the provider has
    /// no match for it.
    pub async fn geocode(&self, address: &str) -> Result<Option<Geocoded>, GeocodeError> {
        self.lookup(address).await.map(|(res, _)| res)
    }

    /// Geocodes addresses one at a time, pausing `delay` after every
    /// provider call. Failures are logged and reported as `None`.
    pub async fn geocode_batch(
        &self,
        addresses: &[String],
        delay: Duration,
    ) -> HashMap<String, Option<Geocoded>> {
        let mut results = HashMap::with_capacity(addresses.len());

        for (i, address) in addresses.iter().enumerate() {
            if results.contains_key(address) {
                continue;
            }

            let (res, asked_provider) = match self.lookup(address).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "geocoding failed");
                    (None, true)
                }
            };
            results.insert(address.clone(), res);

            if asked_provider && i + 1 < addresses.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let found = results.values().filter(|r| r.is_some()).count();
        tracing::info!(total = results.len(), found, "batch geocoding done");

        results
    }

    /// second value is whether the provider was called
    async fn lookup(&self, address: &str) -> Result<(Option<Geocoded>, bool), GeocodeError> {
        let normalized = normalize_address(address);
        if normalized.is_empty() {
            tracing::info!(address, "empty address, not geocoding");
            return Ok((None, false));
        }

        if let Some(hit) = self.memory.get(&normalized).await {
            if !self.ttl.is_expired(hit.cached_at, Utc::now()) {
                return Ok((Some(Geocoded::from(&hit)), false));
            }
            self.memory.invalidate(&normalized).await;
        }

        if let Some(hit) = self.read_entry(&normalized).await {
            tracing::debug!(address = %normalized, "geocode cache hit");
            let res = Geocoded::from(&hit);
            self.memory.insert(normalized, hit).await;
            return Ok((Some(res), false));
        }

        tracing::info!(address = %normalized, "geocode cache miss, asking provider");
        let docs = self.provider.geocode(&normalized).await?;
        let Some(doc) = docs.first() else {
            tracing::info!(address = %normalized, "no geocoding match");
            return Ok((None, true));
        };

        let entry = GeocodeEntry {
            original_address: address.to_string(),
            lat: doc.y,
            lng: doc.x,
            provider: self.provider.name().to_string(),
            accuracy: doc.accuracy.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            address_type: doc
                .address_type
                .clone()
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            cached_at: Utc::now(),
            normalized_address: normalized,
        };
        self.store_entry(&entry).await;

        Ok((Some(Geocoded::from(&entry)), true))
    }

    async fn read_entry(&self, normalized: &str) -> Option<GeocodeEntry> {
        let bytes = match self.store.get(&address_path(normalized)).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::warn!(address = %normalized, error = %e, "failed to read geocode cache");
                return None;
            }
        };

        let entry: GeocodeEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(address = %normalized, error = %e, "ignoring malformed geocode entry");
                return None;
            }
        };

        // digest collisions are not a practical concern but a mismatch is still a miss
        if entry.normalized_address != normalized || self.ttl.is_expired(entry.cached_at, Utc::now()) {
            return None;
        }

        Some(entry)
    }

    async fn store_entry(&self, entry: &GeocodeEntry) {
        self.memory
            .insert(entry.normalized_address.clone(), entry.clone())
            .await;

        let res = match serde_json::to_vec(entry) {
            Ok(bytes) => self
                .store
                .put(&address_path(&entry.normalized_address), bytes)
                .await
                .map_err(GeocodeError::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = res {
            tracing::warn!(address = %entry.normalized_address, error = %e, "failed to persist geocode entry");
        }
    }
}
