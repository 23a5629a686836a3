pub mod address;
pub mod api;
pub mod app_state;
pub mod blob;
pub mod cache;
pub mod config;
pub mod detail;
pub mod facility;
pub mod geocode;
pub mod loader;
pub mod region;
pub mod retry;
pub mod routes;
pub mod snapshot;
pub mod tile;
pub mod tracing;
