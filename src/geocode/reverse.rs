use std::sync::Arc;

use chrono::Utc;

use super::{GeocodeError, RegionDocument, ReverseGeocodingProvider};
use crate::{
    blob::{self, BlobStore},
    cache::{TileCache, Ttl},
    region::{DomainCodes, FallbackRegions, RegionCodeMappingTable, RegionInfo},
    tile::tile_key,
};

const TILE_PREFIX: &str = "tiles";

/// roughly 1.1 km north/south at Korean latitudes
pub const DEFAULT_NEIGHBOR_OFFSET: f64 = 0.01;

/// Tile-keyed cache in front of a reverse geocoding provider.
pub struct ReverseGeocodeCache {
    store: Arc<dyn BlobStore>,
    provider: Arc<dyn ReverseGeocodingProvider>,
    mapping: Arc<dyn RegionCodeMappingTable>,
    memory: TileCache,
    ttl: Ttl,
    fallback: FallbackRegions,
}

fn tile_path(key: &str) -> String {
    blob::join(&[TILE_PREFIX, &format!("{key}.json")])
}

impl ReverseGeocodeCache {
    pub fn new(
        store: Arc<dyn BlobStore>,
        provider: Arc<dyn ReverseGeocodingProvider>,
        mapping: Arc<dyn RegionCodeMappingTable>,
        memory: TileCache,
        ttl: Ttl,
    ) -> Self {
        Self {
            store,
            provider,
            mapping,
            memory,
            ttl,
            fallback: FallbackRegions::new(),
        }
    }

    /// tiles held in the blob store
    pub async fn entry_count(&self) -> Result<usize, GeocodeError> {
        let entries = self.store.list(TILE_PREFIX).await?;
        Ok(entries.iter().filter(|e| !e.is_dir).count())
    }

    /// Resolves the administrative region of the tile containing a point.
    ///
    /// Errors only when the tile is not cached and the provider fails or
    /// returns nothing. Use [`Self::resolve_with_fallback`] for a call that
    /// always produces a region.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, lat: f64, lng: f64) -> Result<RegionInfo, GeocodeError> {
        let key = tile_key(lat, lng);

        if let Some(hit) = self.memory.get(&key).await {
            if !self.ttl.is_expired(hit.cached_at, Utc::now()) {
                tracing::debug!(tile = %key, "memory hit");
                return Ok(self.upgrade_degraded(hit).await);
            }
            self.memory.invalidate(&key).await;
        }

        if let Some(hit) = self.read_tile(&key).await {
            tracing::debug!(tile = %key, "cache hit");
            self.memory.insert(key, hit.clone()).await;
            return Ok(self.upgrade_degraded(hit).await);
        }

        tracing::info!(tile = %key, "cache miss, asking provider");
        let docs = self.provider.reverse_geocode(lat, lng).await?;
        let doc = pick_document(&docs).ok_or(GeocodeError::Empty)?;

        let info = self.region_info(key, doc);
        self.store_tile(&info).await;

        Ok(info)
    }

    /// Never fails: any error yields the hardcoded nearest region.
    pub async fn resolve_with_fallback(&self, lat: f64, lng: f64) -> RegionInfo {
        match self.resolve(lat, lng).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(lat, lng, error = %e, "reverse geocoding failed, using fallback region");
                self.fallback.nearest(lat, lng)
            }
        }
    }

    /// Resolves the point and its four cardinal neighbours `offset` degrees
    /// away, returning each distinct sido/sgg once. Points that fail to
    /// resolve are skipped.
    pub async fn resolve_neighbors(&self, lat: f64, lng: f64, offset: f64) -> Vec<RegionInfo> {
        let (center, north, south, east, west) = tokio::join!(
            self.resolve(lat, lng),
            self.resolve(lat + offset, lng),
            self.resolve(lat - offset, lng),
            self.resolve(lat, lng + offset),
            self.resolve(lat, lng - offset),
        );

        let mut unique: Vec<RegionInfo> = vec![];
        for res in [center, north, south, east, west] {
            match res {
                Ok(info) => {
                    let seen = unique
                        .iter()
                        .any(|r| r.sido_name == info.sido_name && r.sgg_name == info.sgg_name);
                    if !seen {
                        unique.push(info);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "skipping neighbour"),
            }
        }

        tracing::info!(lat, lng, regions = unique.len(), "resolved neighbouring regions");
        unique
    }

    fn region_info(&self, tile_key: String, doc: &RegionDocument) -> RegionInfo {
        let (domain_codes, degraded) = match self.mapping.lookup(&doc.region_1_name, &doc.region_2_name) {
            Some(mapping) => (DomainCodes::from(mapping), false),
            None => {
                tracing::warn!(
                    sido = %doc.region_1_name,
                    sgg = %doc.region_2_name,
                    "no code mapping for region, using default codes"
                );
                (DomainCodes::seoul_jung_gu(), true)
            }
        };

        RegionInfo {
            tile_key,
            administrative_code: doc.code.clone(),
            sido_name: doc.region_1_name.clone(),
            sgg_name: doc.region_2_name.clone(),
            dong_name: doc.region_3_name.clone(),
            address_name: doc.address_name.clone(),
            domain_codes,
            degraded,
            cached_at: Utc::now(),
        }
    }

    /// degraded entries get their codes fixed once the mapping table knows the region
    async fn upgrade_degraded(&self, info: RegionInfo) -> RegionInfo {
        if !info.degraded {
            return info;
        }

        let Some(mapping) = self.mapping.lookup(&info.sido_name, &info.sgg_name) else {
            return info;
        };

        tracing::info!(tile = %info.tile_key, sgg = %info.sgg_name, "upgrading degraded entry");
        let upgraded = RegionInfo {
            domain_codes: DomainCodes::from(mapping),
            degraded: false,
            cached_at: Utc::now(),
            ..info
        };
        self.store_tile(&upgraded).await;

        upgraded
    }

    /// misses on absence, expiry, and unreadable entries
    async fn read_tile(&self, key: &str) -> Option<RegionInfo> {
        let path = tile_path(key);
        let bytes = match self.store.get(&path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(tile = %key, error = %e, "failed to read tile cache");
                return None;
            }
        };

        let info: RegionInfo = match serde_json::from_slice(&bytes) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(tile = %key, error = %e, "ignoring malformed tile entry");
                return None;
            }
        };

        if self.ttl.is_expired(info.cached_at, Utc::now()) {
            tracing::info!(tile = %key, "tile entry expired");
            return None;
        }

        Some(info)
    }

    /// upsert; failures are logged and swallowed
    async fn store_tile(&self, info: &RegionInfo) {
        self.memory.insert(info.tile_key.clone(), info.clone()).await;

        let res = match serde_json::to_vec(info) {
            Ok(bytes) => self
                .store
                .put(&tile_path(&info.tile_key), bytes)
                .await
                .map_err(GeocodeError::from),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = res {
            tracing::warn!(tile = %info.tile_key, error = %e, "failed to persist tile entry");
        }
    }
}

/// prefers administrative (`H`) regions over legal ones
fn pick_document(docs: &[RegionDocument]) -> Option<&RegionDocument> {
    docs.iter()
        .find(|d| d.region_type == "H")
        .or_else(|| docs.first())
}
