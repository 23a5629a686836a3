//! Cache-first facility loading, one loader per domain.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{OnceCell, Semaphore},
    task::JoinSet,
};

use crate::{
    facility::{Domain, FacilityRecord, FacilitySource, Page, SourceError},
    region::{RegionCode, RegionError, RegionTable},
    retry::{with_retry, CancelFlag, RetryError, RetryPolicy},
    snapshot::{CacheStats, SnapshotError, SnapshotStore},
};

/// hard stop for registries that never return a short page
pub const MAX_PAGES: u32 = 50;

const LOAD_CONCURRENCY: usize = 2;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadSource {
    Cache,
    Api,
    Error,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub region: RegionCode,
    pub data: Vec<FacilityRecord>,
    pub source: LoadSource,
    pub load_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadResult {
    fn failed(region: RegionCode, started: Instant, error: String) -> Self {
        Self {
            region,
            data: vec![],
            source: LoadSource::Error,
            load_time_ms: elapsed_ms(started),
            error: Some(error),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Summary of a batch of loads.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub cache_hits: usize,
    pub api_calls: usize,
    pub errors: usize,
    pub total_items: usize,
    pub average_load_time_ms: f64,
    pub cache_hit_rate: f64,
}

type InFlight = Arc<OnceCell<LoadResult>>;

/// Reads a region from the snapshot store, falling back to the registry.
///
/// Concurrent loads of the same region share one registry fetch.
pub struct SmartLoader {
    store: SnapshotStore,
    source: Arc<dyn FacilitySource>,
    table: RegionTable,
    in_flight: Mutex<HashMap<RegionCode, InFlight>>,
    retry: RetryPolicy,
    max_pages: u32,
}

impl SmartLoader {
    pub fn new(store: SnapshotStore, source: Arc<dyn FacilitySource>) -> Self {
        Self {
            store,
            source,
            table: RegionTable,
            in_flight: Mutex::new(HashMap::new()),
            retry: RetryPolicy::default(),
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn domain(&self) -> Domain {
        self.store.domain()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Never fails; errors come back as `source: error` with no data.
    pub async fn load(&self, code: &RegionCode, display_name: Option<&str>) -> LoadResult {
        self.load_with_cancel(code, display_name, CancelFlag::never())
            .await
    }

    /// Query-by-name convenience for sido/sgg pairs.
    pub async fn load_by_name(&self, sido_name: &str, sgg_name: &str) -> Result<LoadResult, RegionError> {
        let code = self
            .table
            .code_for(sido_name, sgg_name)
            .ok_or_else(|| RegionError::UnknownName {
                sido: sido_name.to_string(),
                sgg: sgg_name.to_string(),
            })?;

        let display_name = format!("{} {}", sido_name.trim(), sgg_name.trim());
        Ok(self.load(&code, Some(&display_name)).await)
    }

    /// Like [`Self::load`], but stops paging and retrying once `cancel` flips.
    ///
    /// A caller that joins a load already in flight shares that load's
    /// outcome, including its cancellation.
    pub async fn load_with_cancel(
        &self,
        code: &RegionCode,
        display_name: Option<&str>,
        cancel: CancelFlag,
    ) -> LoadResult {
        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.entry(code.clone()).or_default().clone()
        };

        if cell.initialized() {
            tracing::debug!(domain = %self.domain(), region = %code, "joining settled load");
        }

        let result = cell
            .get_or_init(|| self.load_uncached(code, display_name, &cancel))
            .await
            .clone();

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight
            .get(code)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(code);
        }

        result
    }

    #[tracing::instrument(skip(self, display_name, cancel), fields(domain = %self.domain()))]
    async fn load_uncached(
        &self,
        code: &RegionCode,
        display_name: Option<&str>,
        cancel: &CancelFlag,
    ) -> LoadResult {
        let started = Instant::now();

        match self.store.get_if_fresh(code).await {
            Ok(Some(data)) if !data.is_empty() => {
                tracing::info!(items = data.len(), "loaded from cache");
                return LoadResult {
                    region: code.clone(),
                    data,
                    source: LoadSource::Cache,
                    load_time_ms: elapsed_ms(started),
                    error: None,
                };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "snapshot unreadable, going to the registry"),
        }

        let data = match self.fetch_all(code, cancel).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "registry fetch failed");
                return LoadResult::failed(code.clone(), started, e.to_string());
            }
        };

        if data.is_empty() {
            tracing::info!("registry has no facilities for region");
        } else {
            let display_name = match display_name {
                Some(name) => name.to_string(),
                None => self
                    .table
                    .display_name(code)
                    .unwrap_or_else(|| code.to_string()),
            };

            match self.store.put(code, &display_name, &data).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => tracing::warn!(error = %e, "could not cache registry data"),
                Err(e) => tracing::debug!(error = %e, "cached without history"),
            }
        }

        tracing::info!(items = data.len(), "loaded from registry");
        LoadResult {
            region: code.clone(),
            data,
            source: LoadSource::Api,
            load_time_ms: elapsed_ms(started),
            error: None,
        }
    }

    /// pages until a short page or the page ceiling
    async fn fetch_all(
        &self,
        code: &RegionCode,
        cancel: &CancelFlag,
    ) -> Result<Vec<FacilityRecord>, SourceError> {
        let page_size = self.source.page_size();
        let source = &self.source;
        let mut all = vec![];

        for page in 1..=self.max_pages {
            let Page { records, raw_len } = with_retry(self.retry, cancel, move || {
                source.fetch_page(code, page, page_size)
            })
            .await
            .map_err(|e| match e {
                RetryError::Failed(e) => e,
                RetryError::Cancelled => SourceError::Cancelled,
            })?;

            tracing::debug!(page, raw_len, kept = records.len(), "fetched page");
            all.extend(records);

            // rows dropped for a missing id still count towards a full page
            if raw_len < page_size {
                return Ok(all);
            }
        }

        tracing::warn!(
            region = %code,
            max_pages = self.max_pages,
            items = all.len(),
            "page ceiling reached, result may be truncated"
        );
        Ok(all)
    }

    /// Drops the region's snapshots, then loads it from the registry.
    pub async fn force_refresh(&self, code: &RegionCode, display_name: Option<&str>) -> LoadResult {
        if let Err(e) = self.store.delete(code).await {
            tracing::warn!(domain = %self.domain(), region = %code, error = %e, "could not delete snapshot before refresh");
        }

        self.load(code, display_name).await
    }

    /// Loads several regions, two at a time. Every requested region gets a
    /// result, failures included.
    pub async fn load_many(self: &Arc<Self>, codes: &[RegionCode]) -> HashMap<RegionCode, LoadResult> {
        let semaphore = Arc::new(Semaphore::new(LOAD_CONCURRENCY));
        let mut set = JoinSet::new();

        for code in codes {
            let loader = self.clone();
            let code = code.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                loader.load(&code, None).await
            });
        }

        let started = Instant::now();
        let mut results = HashMap::with_capacity(codes.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(res) => {
                    results.insert(res.region.clone(), res);
                }
                Err(e) => tracing::error!(domain = %self.domain(), error = %e, "region load task failed"),
            }
        }

        for code in codes {
            results
                .entry(code.clone())
                .or_insert_with(|| LoadResult::failed(code.clone(), started, "load task failed".to_string()));
        }

        results
    }

    pub async fn is_cache_valid(&self, code: &RegionCode) -> bool {
        match self.store.metadata(code).await {
            Ok(Some(status)) => !status.expired,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(domain = %self.domain(), region = %code, error = %e, "could not read snapshot metadata");
                false
            }
        }
    }

    pub async fn stats(&self) -> Result<CacheStats, SnapshotError> {
        self.store.stats().await
    }
}

pub fn analyze<'a>(results: impl IntoIterator<Item = &'a LoadResult>) -> LoadSummary {
    let mut summary = LoadSummary::default();
    let mut total_time = 0u64;
    let mut count = 0usize;

    for r in results {
        count += 1;
        total_time += r.load_time_ms;
        summary.total_items += r.data.len();
        match r.source {
            LoadSource::Cache => summary.cache_hits += 1,
            LoadSource::Api => summary.api_calls += 1,
            LoadSource::Error => summary.errors += 1,
        }
    }

    if count > 0 {
        summary.average_load_time_ms = total_time as f64 / count as f64;
        summary.cache_hit_rate = summary.cache_hits as f64 / count as f64;
    }

    summary
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use chrono::Utc;
    use tokio::sync::watch;

    use super::*;
    use crate::{
        blob::{BlobError, BlobStore, MemoryBlobStore, MockBlobStore},
        cache::Ttl,
        facility::{test_record, MockFacilitySource},
        snapshot::{SnapshotEnvelope, SnapshotMeta, API_VERSION},
    };

    /// serves `total` records in pages, counting calls
    struct FakeRegistry {
        total: usize,
        page_size: usize,
        calls: AtomicUsize,
        delay: Duration,
        fail_region: Option<RegionCode>,
        /// row index served without an id
        unidentified: Option<usize>,
    }

    impl FakeRegistry {
        fn new(total: usize) -> Self {
            Self {
                total,
                page_size: 100,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail_region: None,
                unidentified: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl FacilitySource for FakeRegistry {
        fn domain(&self) -> Domain {
            Domain::Kindergarten
        }

        fn page_size(&self) -> usize {
            self.page_size
        }

        async fn fetch_page(
            &self,
            region: &RegionCode,
            page: u32,
            page_size: usize,
        ) -> Result<Page, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_region.as_ref() == Some(region) {
                return Err(SourceError::Api("registry down".into()));
            }

            let start = (page as usize - 1) * page_size;
            let end = (start + page_size).min(self.total);
            let rows = start..end.max(start);
            let raw_len = rows.len();
            let records = rows
                .filter(|&i| Some(i) != self.unidentified)
                .map(test_record)
                .collect();
            Ok(Page { records, raw_len })
        }
    }

    fn gangnam() -> RegionCode {
        RegionTable.code_for("서울특별시", "강남구").unwrap()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn loader(blobs: Arc<dyn BlobStore>, registry: Arc<FakeRegistry>) -> SmartLoader {
        SmartLoader::new(
            SnapshotStore::new(Domain::Kindergarten, blobs, Ttl::days(7)),
            registry,
        )
        .with_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_cache_aside_scenario() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = Arc::new(FakeRegistry::new(130));
        let loader = loader(blobs.clone(), registry.clone());

        let first = loader.load_by_name("서울특별시", "강남구").await.unwrap();
        assert_eq!(first.source, LoadSource::Api);
        assert_eq!(first.data.len(), 130);
        assert_eq!(first.error, None);
        // 100 + 30
        assert_eq!(registry.calls(), 2);

        let status = loader.store().metadata(&gangnam()).await.unwrap().unwrap();
        assert_eq!(status.meta.item_count, 130);
        assert_eq!(status.meta.region_display_name, "서울특별시 강남구");

        let second = loader.load(&gangnam(), None).await;
        assert_eq!(second.source, LoadSource::Cache);
        assert_eq!(second.data.len(), 130);
        assert_eq!(registry.calls(), 2);
        assert!(loader.is_cache_valid(&gangnam()).await);
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_refetched() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let synced = Utc::now() - chrono::Duration::days(8);
        let envelope = SnapshotEnvelope {
            meta: SnapshotMeta {
                region_key: gangnam(),
                region_display_name: "서울특별시 강남구".into(),
                last_synced_at: synced,
                item_count: 1,
                api_version: API_VERSION.into(),
            },
            data: vec![test_record(999)],
        };
        blobs
            .insert_at(
                "regions/11680/latest.json",
                serde_json::to_vec(&envelope).unwrap(),
                synced,
            )
            .await
            .unwrap();

        let registry = Arc::new(FakeRegistry::new(5));
        let loader = loader(blobs, registry.clone());
        assert!(!loader.is_cache_valid(&gangnam()).await);

        let res = loader.load(&gangnam(), None).await;
        assert_eq!(res.source, LoadSource::Api);
        assert_eq!(res.data.len(), 5);
        assert_eq!(registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let registry = Arc::new(FakeRegistry {
            delay: Duration::from_millis(50),
            ..FakeRegistry::new(30)
        });
        let loader = loader(Arc::new(MemoryBlobStore::new()), registry.clone());

        let code = gangnam();
        let (a, b) = tokio::join!(loader.load(&code, None), loader.load(&code, None));

        assert_eq!(registry.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(a.source, LoadSource::Api);
        assert!(loader.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settled_loads_are_not_shared() {
        let registry = Arc::new(FakeRegistry::new(30));
        let loader = loader(Arc::new(MemoryBlobStore::new()), registry.clone());

        let refreshed = loader.force_refresh(&gangnam(), None).await;
        assert_eq!(refreshed.source, LoadSource::Api);
        let again = loader.force_refresh(&gangnam(), None).await;
        assert_eq!(again.source, LoadSource::Api);
        assert_eq!(registry.calls(), 2);
    }

    #[tokio::test]
    async fn test_registry_failure_is_an_error_result() {
        let mut source = MockFacilitySource::new();
        source.expect_page_size().return_const(100usize);
        source
            .expect_fetch_page()
            .times(1)
            .returning(|_, _, _| Err(SourceError::Api("SERVICE_KEY_IS_NOT_REGISTERED_ERROR".into())));

        let loader = SmartLoader::new(
            SnapshotStore::new(Domain::Playground, Arc::new(MemoryBlobStore::new()), Ttl::days(7)),
            Arc::new(source),
        )
        .with_retry(fast_retry());

        let res = loader.load(&gangnam(), None).await;
        assert_eq!(res.source, LoadSource::Error);
        assert!(res.data.is_empty());
        assert!(res.error.unwrap().contains("SERVICE_KEY"));
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_data() {
        let mut blobs = MockBlobStore::new();
        blobs.expect_list().returning(|_| Ok(vec![]));
        blobs
            .expect_put()
            .returning(|_, _| Err(BlobError::Backend("read-only".into())));

        let registry = Arc::new(FakeRegistry::new(10));
        let res = loader(Arc::new(blobs), registry).load(&gangnam(), None).await;

        assert_eq!(res.source, LoadSource::Api);
        assert_eq!(res.data.len(), 10);
    }

    #[tokio::test]
    async fn test_cache_read_failure_falls_back_to_registry() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_list()
            .returning(|_| Err(BlobError::Backend("unavailable".into())));
        blobs.expect_put().returning(|_, _| Ok(()));

        let registry = Arc::new(FakeRegistry::new(10));
        let res = loader(Arc::new(blobs), registry.clone()).load(&gangnam(), None).await;

        assert_eq!(res.source, LoadSource::Api);
        assert_eq!(registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_full_page_with_unidentified_row_keeps_paging() {
        let registry = Arc::new(FakeRegistry {
            unidentified: Some(42),
            ..FakeRegistry::new(130)
        });
        let loader = loader(Arc::new(MemoryBlobStore::new()), registry.clone());

        let res = loader.load(&gangnam(), None).await;
        assert_eq!(res.source, LoadSource::Api);
        assert_eq!(res.data.len(), 129);
        assert_eq!(registry.calls(), 2);
        assert!(res.data.iter().any(|r| r.id == test_record(129).id));
    }

    #[tokio::test]
    async fn test_page_ceiling() {
        let registry = Arc::new(FakeRegistry::new(usize::MAX));
        let loader = loader(Arc::new(MemoryBlobStore::new()), registry.clone()).with_max_pages(5);

        let res = loader.load(&gangnam(), None).await;
        assert_eq!(registry.calls(), 5);
        assert_eq!(res.data.len(), 500);
    }

    #[tokio::test]
    async fn test_empty_registry_result_is_not_cached() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = Arc::new(FakeRegistry::new(0));
        let loader = loader(blobs.clone(), registry.clone());

        let res = loader.load(&gangnam(), None).await;
        assert_eq!(res.source, LoadSource::Api);
        assert!(res.data.is_empty());
        assert!(blobs.is_empty().await);

        loader.load(&gangnam(), None).await;
        assert_eq!(registry.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_load() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let registry = Arc::new(FakeRegistry::new(10));
        let loader = loader(Arc::new(MemoryBlobStore::new()), registry.clone());

        let res = loader
            .load_with_cancel(&gangnam(), None, CancelFlag::from(rx))
            .await;
        assert_eq!(res.source, LoadSource::Error);
        assert_eq!(res.error.as_deref(), Some("cancelled"));
        assert_eq!(registry.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_name() {
        let loader = loader(Arc::new(MemoryBlobStore::new()), Arc::new(FakeRegistry::new(1)));
        assert!(matches!(
            loader.load_by_name("서울특별시", "해운대구").await,
            Err(RegionError::UnknownName { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_many_isolates_failures() {
        let seocho = RegionTable.code_for("서울특별시", "서초구").unwrap();
        let jung = RegionTable.code_for("서울특별시", "중구").unwrap();

        let registry = Arc::new(FakeRegistry {
            fail_region: Some(seocho.clone()),
            ..FakeRegistry::new(3)
        });
        let loader = Arc::new(loader(Arc::new(MemoryBlobStore::new()), registry.clone()));

        let codes = vec![gangnam(), seocho.clone(), jung.clone()];
        let results = loader.load_many(&codes).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[&gangnam()].source, LoadSource::Api);
        assert_eq!(results[&jung].data.len(), 3);
        assert_eq!(results[&seocho].source, LoadSource::Error);

        let summary = analyze(results.values());
        assert_eq!(summary.api_calls, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.cache_hits, 0);
        assert_eq!(summary.total_items, 6);
        assert_eq!(summary.cache_hit_rate, 0.0);
    }

    #[test]
    fn test_analyze() {
        let result = |source, items: usize, ms| LoadResult {
            region: gangnam(),
            data: (0..items).map(test_record).collect(),
            source,
            load_time_ms: ms,
            error: None,
        };

        let summary = analyze(&[
            result(LoadSource::Cache, 2, 10),
            result(LoadSource::Cache, 3, 20),
            result(LoadSource::Api, 5, 300),
            result(LoadSource::Error, 0, 70),
        ]);

        assert_eq!(summary.cache_hits, 2);
        assert_eq!(summary.api_calls, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.total_items, 10);
        assert_eq!(summary.average_load_time_ms, 100.0);
        assert_eq!(summary.cache_hit_rate, 0.5);

        assert_eq!(analyze(Vec::<LoadResult>::new().iter()), LoadSummary::default());
    }

    #[test]
    fn test_load_result_wire_format() {
        let res = LoadResult::failed(gangnam(), Instant::now(), "boom".into());
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["source"], "error");
        assert_eq!(json["region"], "11680");
        assert_eq!(json["error"], "boom");
        assert!(json["loadTimeMs"].is_number());
    }
}
