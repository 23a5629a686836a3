use crate::{api, app_state::AppState};

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

pub fn make_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/facilities/:domain", get(api::get_facilities_by_name))
        .route("/facilities/:domain/:code", get(api::get_facilities))
        .route(
            "/facilities/:domain/:code/geojson",
            get(api::get_facilities_geojson),
        )
        .route(
            "/facilities/:domain/:code/refresh",
            post(api::refresh_facilities),
        )
        .route("/cache/:domain/stats", get(api::cache_stats))
        .route("/cache/:domain/cleanup", post(api::cleanup_cache))
        .route("/cache/:domain/details/stats", get(api::detail_stats))
        .route("/cache/:domain/details/cleanup", post(api::cleanup_details))
        .route(
            "/details/:domain/:id",
            get(api::get_detail)
                .put(api::put_detail)
                .delete(api::delete_detail),
        )
        .route("/details/:domain/:id/metadata", get(api::detail_metadata))
        .route("/geocode", get(api::geocode))
        .route("/geocode/stats", get(api::geocode_stats))
        .route("/reverse", get(api::reverse))
        .route("/reverse/neighbors", get(api::reverse_neighbors))
}
