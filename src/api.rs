//! Admin HTTP handlers over the loaders and geocode caches.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::{
    app_state::AppState,
    detail::{DetailStats, DetailStatus, DetailStore, FacilityId, InvalidFacilityId},
    facility::{
        locate::{locate, with_distance, NearbyFacility},
        markers::to_feature_collection,
        Domain,
    },
    geocode::{forward::DEFAULT_BATCH_DELAY, reverse::DEFAULT_NEIGHBOR_OFFSET, GeocodeError, Geocoded},
    loader::{LoadResult, SmartLoader},
    region::{RegionCode, RegionError, RegionInfo},
    snapshot::{CacheStats, PersistError, SnapshotError},
};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    UnknownDomain(String),
    #[error("{0}")]
    Region(#[from] RegionError),
    #[error("{0}")]
    Snapshot(#[from] SnapshotError),
    #[error("{0}")]
    Persist(#[from] PersistError),
    #[error("{0}")]
    Geocode(#[from] GeocodeError),
    #[error("{0}")]
    FacilityId(#[from] InvalidFacilityId),
    #[error("coordinates out of range: {lat}, {lng}")]
    Coordinates { lat: f64, lng: f64 },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::UnknownDomain(_) => StatusCode::NOT_FOUND,
            Self::Region(RegionError::UnknownName { .. }) => StatusCode::NOT_FOUND,
            Self::Region(RegionError::InvalidCode(_))
            | Self::FacilityId(_)
            | Self::Coordinates { .. } => StatusCode::BAD_REQUEST,
            Self::Geocode(GeocodeError::Network(_) | GeocodeError::Provider(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), Json(json!({ "error": format!("{self}") }))).into_response()
    }
}

type ApiState = State<Arc<AppState>>;

fn loader(state: &AppState, domain: &str) -> Result<Arc<SmartLoader>, ApiError> {
    let domain: Domain = domain.parse().map_err(ApiError::UnknownDomain)?;
    state
        .loader(domain)
        .cloned()
        .ok_or_else(|| ApiError::UnknownDomain(format!("no loader configured for {domain}")))
}

fn detail_store(state: &AppState, domain: &str) -> Result<DetailStore, ApiError> {
    let domain: Domain = domain.parse().map_err(ApiError::UnknownDomain)?;
    state
        .detail_store(domain)
        .cloned()
        .ok_or_else(|| ApiError::UnknownDomain(format!("no detail cache configured for {domain}")))
}

fn check_coordinates(lat: f64, lng: f64) -> Result<(), ApiError> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) {
        Ok(())
    } else {
        Err(ApiError::Coordinates { lat, lng })
    }
}

pub async fn get_facilities(
    State(state): ApiState,
    Path((domain, code)): Path<(String, String)>,
) -> Result<Json<LoadResult>, ApiError> {
    let loader = loader(&state, &domain)?;
    let code: RegionCode = code.parse()?;
    Ok(Json(loader.load(&code, None).await))
}

#[derive(Deserialize)]
pub struct RegionNames {
    sido: String,
    sgg: String,
}

pub async fn get_facilities_by_name(
    State(state): ApiState,
    Path(domain): Path<String>,
    Query(names): Query<RegionNames>,
) -> Result<Json<LoadResult>, ApiError> {
    let loader = loader(&state, &domain)?;
    Ok(Json(loader.load_by_name(&names.sido, &names.sgg).await?))
}

#[derive(Deserialize)]
pub struct Origin {
    lat: Option<f64>,
    lng: Option<f64>,
}

/// Loads a region and returns its facilities as map markers, sorted by
/// distance when an origin is given.
pub async fn get_facilities_geojson(
    State(state): ApiState,
    Path((domain, code)): Path<(String, String)>,
    Query(origin): Query<Origin>,
) -> Result<Json<GeoJson>, ApiError> {
    let loader = loader(&state, &domain)?;
    let code: RegionCode = code.parse()?;

    let res = loader.load(&code, None).await;
    let records = locate(res.data, &state.forward, DEFAULT_BATCH_DELAY).await;

    let nearby = match (origin.lat, origin.lng) {
        (Some(lat), Some(lng)) => {
            check_coordinates(lat, lng)?;
            with_distance(records, lat, lng)
        }
        _ => records
            .into_iter()
            .map(|record| NearbyFacility {
                record,
                distance_m: None,
            })
            .collect(),
    };

    let collection = to_feature_collection(loader.domain(), &nearby);
    Ok(Json(GeoJson::FeatureCollection(collection)))
}

pub async fn refresh_facilities(
    State(state): ApiState,
    Path((domain, code)): Path<(String, String)>,
) -> Result<Json<LoadResult>, ApiError> {
    let loader = loader(&state, &domain)?;
    let code: RegionCode = code.parse()?;
    Ok(Json(loader.force_refresh(&code, None).await))
}

pub async fn cache_stats(
    State(state): ApiState,
    Path(domain): Path<String>,
) -> Result<Json<CacheStats>, ApiError> {
    let loader = loader(&state, &domain)?;
    Ok(Json(loader.stats().await?))
}

#[derive(Serialize)]
pub struct Cleanup {
    removed: usize,
}

pub async fn cleanup_cache(
    State(state): ApiState,
    Path(domain): Path<String>,
) -> Result<Json<Cleanup>, ApiError> {
    let loader = loader(&state, &domain)?;
    let removed = loader.store().cleanup_expired(None).await?;
    Ok(Json(Cleanup { removed }))
}

/// Cached detail of one facility, null when missing or expired.
pub async fn get_detail(
    State(state): ApiState,
    Path((domain, id)): Path<(String, String)>,
) -> Result<Json<Option<serde_json::Value>>, ApiError> {
    let store = detail_store(&state, &domain)?;
    let id: FacilityId = id.parse()?;
    Ok(Json(store.get_if_fresh(&id).await?))
}

/// Stores a detail fetched by the caller. A failed history write is only logged.
pub async fn put_detail(
    State(state): ApiState,
    Path((domain, id)): Path<(String, String)>,
    Json(detail): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    let store = detail_store(&state, &domain)?;
    let id: FacilityId = id.parse()?;

    match store.put(&id, &detail).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) if !e.is_fatal() => {
            tracing::warn!(facility = %id, error = %e, "detail stored without history");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_detail(
    State(state): ApiState,
    Path((domain, id)): Path<(String, String)>,
) -> Result<Json<Cleanup>, ApiError> {
    let store = detail_store(&state, &domain)?;
    let id: FacilityId = id.parse()?;
    let removed = store.delete(&id).await?;
    Ok(Json(Cleanup { removed }))
}

pub async fn detail_metadata(
    State(state): ApiState,
    Path((domain, id)): Path<(String, String)>,
) -> Result<Json<Option<DetailStatus>>, ApiError> {
    let store = detail_store(&state, &domain)?;
    let id: FacilityId = id.parse()?;
    Ok(Json(store.metadata(&id).await?))
}

pub async fn detail_stats(
    State(state): ApiState,
    Path(domain): Path<String>,
) -> Result<Json<DetailStats>, ApiError> {
    let store = detail_store(&state, &domain)?;
    Ok(Json(store.stats().await?))
}

pub async fn cleanup_details(
    State(state): ApiState,
    Path(domain): Path<String>,
) -> Result<Json<Cleanup>, ApiError> {
    let store = detail_store(&state, &domain)?;
    let removed = store.cleanup_expired().await?;
    Ok(Json(Cleanup { removed }))
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeStats {
    reverse_geocode_cache: usize,
    geocode_cache: usize,
}

pub async fn geocode_stats(State(state): ApiState) -> Result<Json<GeocodeStats>, ApiError> {
    let (reverse_geocode_cache, geocode_cache) =
        tokio::try_join!(state.reverse.entry_count(), state.forward.entry_count())?;

    Ok(Json(GeocodeStats {
        reverse_geocode_cache,
        geocode_cache,
    }))
}

#[derive(Deserialize)]
pub struct AddressQuery {
    address: String,
}

pub async fn geocode(
    State(state): ApiState,
    Query(q): Query<AddressQuery>,
) -> Result<Json<Option<Geocoded>>, ApiError> {
    Ok(Json(state.forward.geocode(&q.address).await?))
}

#[derive(Deserialize)]
pub struct Point {
    lat: f64,
    lng: f64,
}

pub async fn reverse(
    State(state): ApiState,
    Query(p): Query<Point>,
) -> Result<Json<RegionInfo>, ApiError> {
    check_coordinates(p.lat, p.lng)?;
    Ok(Json(state.reverse.resolve_with_fallback(p.lat, p.lng).await))
}

pub async fn reverse_neighbors(
    State(state): ApiState,
    Query(p): Query<Point>,
) -> Result<Json<Vec<RegionInfo>>, ApiError> {
    check_coordinates(p.lat, p.lng)?;
    Ok(Json(
        state
            .reverse
            .resolve_neighbors(p.lat, p.lng, DEFAULT_NEIGHBOR_OFFSET)
            .await,
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        blob::MemoryBlobStore,
        cache::{Caches, Ttl},
        config::Config,
        facility::{test_page, test_record, MockFacilitySource},
        geocode::{
            AddressGeocodeCache, MockForwardGeocodingProvider, MockReverseGeocodingProvider,
            ReverseGeocodeCache,
        },
        detail::DetailStore,
        loader::LoadSource,
        region::RegionTable,
        snapshot::SnapshotStore,
    };

    fn config() -> Config {
        Config::from_lookup(|var| match var {
            "DATA_PATH" => Some("/tmp/mompick".into()),
            "KAKAO_REST_KEY"
            | "KINDERGARTEN_API_KEY"
            | "CHILDCARE_FUNCTION_URL"
            | "CHILDCARE_FUNCTION_KEY"
            | "PLAYGROUND_API_KEY" => Some("test".into()),
            _ => None,
        })
        .unwrap()
    }

    fn state(source: MockFacilitySource) -> Arc<AppState> {
        let caches = Caches::new(Ttl::Infinite);

        let mut reverse = MockReverseGeocodingProvider::new();
        reverse
            .expect_reverse_geocode()
            .returning(|_, _| Err(GeocodeError::Provider("offline".into())));
        let mut forward = MockForwardGeocodingProvider::new();
        forward.expect_name().return_const("kakao");
        forward.expect_geocode().returning(|_| Ok(vec![]));

        let reverse = ReverseGeocodeCache::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(reverse),
            Arc::new(RegionTable),
            caches.tiles,
            Ttl::Infinite,
        );
        let forward = AddressGeocodeCache::new(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(forward),
            caches.addresses,
            Ttl::Infinite,
        );

        let store = SnapshotStore::new(Domain::Kindergarten, Arc::new(MemoryBlobStore::new()), Ttl::days(7));
        let mut loaders = HashMap::new();
        loaders.insert(
            Domain::Kindergarten,
            Arc::new(SmartLoader::new(store, Arc::new(source))),
        );

        let mut details = HashMap::new();
        details.insert(
            Domain::Kindergarten,
            DetailStore::new(Domain::Kindergarten, Arc::new(MemoryBlobStore::new()), Ttl::days(7)),
        );

        Arc::new(AppState::new(config(), reverse, forward, loaders, details))
    }

    fn source(records: usize) -> MockFacilitySource {
        let mut source = MockFacilitySource::new();
        source.expect_page_size().return_const(100usize);
        source
            .expect_fetch_page()
            .returning(move |_, _, _| Ok(test_page((1..=records).map(test_record).collect())));
        source
    }

    #[tokio::test]
    async fn test_get_facilities() {
        let state = state(source(3));

        let Json(res) = get_facilities(
            State(state.clone()),
            Path(("kindergarten".to_string(), "11680".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(res.source, LoadSource::Api);
        assert_eq!(res.data.len(), 3);

        let Json(res) = get_facilities_by_name(
            State(state),
            Path("kindergartens".to_string()),
            Query(RegionNames {
                sido: "서울특별시".into(),
                sgg: "강남구".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(res.source, LoadSource::Cache);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let state = state(source(0));

        let err = get_facilities(
            State(state.clone()),
            Path(("school".to_string(), "11680".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        // configured domain, but no loader in this state
        let err = cache_stats(State(state.clone()), Path("playground".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = get_facilities(
            State(state.clone()),
            Path(("kindergarten".to_string(), "gangnam".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = reverse(State(state), Query(Point { lat: 137.0, lng: 0.0 }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_geojson_sorted_by_distance() {
        let state = state(source(3));

        let Json(geojson) = get_facilities_geojson(
            State(state),
            Path(("kindergarten".to_string(), "11680".to_string())),
            Query(Origin {
                lat: Some(37.5003),
                lng: Some(127.03),
            }),
        )
        .await
        .unwrap();

        let GeoJson::FeatureCollection(fc) = geojson else {
            panic!("expected a feature collection");
        };
        let ids: Vec<_> = fc
            .features
            .iter()
            .map(|f| f.id.clone().unwrap())
            .collect();
        assert_eq!(
            ids,
            [
                geojson::feature::Id::String("K00003".into()),
                geojson::feature::Id::String("K00002".into()),
                geojson::feature::Id::String("K00001".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_reverse_falls_back_when_provider_is_down() {
        let state = state(source(0));

        let Json(info) = reverse(State(state), Query(Point { lat: 37.50, lng: 127.05 }))
            .await
            .unwrap();
        assert_eq!(info.sgg_name, "강남구");
        assert!(info.degraded);
    }

    #[tokio::test]
    async fn test_detail_lifecycle() {
        let state = state(source(0));
        let path = || Path(("kindergarten".to_string(), "K00001".to_string()));

        let Json(missing) = get_detail(State(state.clone()), path()).await.unwrap();
        assert_eq!(missing, None);

        let detail = json!({ "name": "해맑은유치원", "classes": 4 });
        let status = put_detail(State(state.clone()), path(), Json(detail.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(cached) = get_detail(State(state.clone()), path()).await.unwrap();
        assert_eq!(cached, Some(detail));

        let Json(meta) = detail_metadata(State(state.clone()), path()).await.unwrap();
        assert!(!meta.unwrap().expired);

        let Json(stats) = detail_stats(State(state.clone()), Path("kindergarten".to_string()))
            .await
            .unwrap();
        assert_eq!(stats.total_details, 1);
        assert_eq!(stats.total_files, 2);

        let Json(cleanup) = delete_detail(State(state.clone()), path()).await.unwrap();
        assert_eq!(cleanup.removed, 2);
        let Json(gone) = get_detail(State(state), path()).await.unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    async fn test_detail_bad_requests() {
        let state = state(source(0));

        let err = get_detail(
            State(state.clone()),
            Path(("kindergarten".to_string(), "..".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = detail_stats(State(state), Path("childcare".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_geocode_stats() {
        let state = state(source(0));

        // provider is down, so the fallback region is served but not stored
        reverse(State(state.clone()), Query(Point { lat: 37.50, lng: 127.05 }))
            .await
            .unwrap();

        let Json(stats) = geocode_stats(State(state)).await.unwrap();
        assert_eq!(
            stats,
            GeocodeStats {
                reverse_geocode_cache: 0,
                geocode_cache: 0,
            }
        );
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            json!({ "reverseGeocodeCache": 0, "geocodeCache": 0 })
        );
    }

    #[test]
    fn test_error_body() {
        let res = ApiError::UnknownDomain("unknown facility domain \"school\"".into()).into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
