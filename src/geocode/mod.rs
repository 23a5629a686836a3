pub mod forward;
pub mod kakao;
pub mod reverse;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::blob::BlobError;

pub use self::{
    forward::{AddressGeocodeCache, GeocodeEntry, Geocoded},
    kakao::KakaoLocal,
    reverse::ReverseGeocodeCache,
};

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("geocoding provider error: {0}")]
    Provider(String),
    #[error("geocoding provider returned no results")]
    Empty,
    #[error("geocode cache storage: {0}")]
    Blob(#[from] BlobError),
    #[error("malformed geocode cache entry: {0}")]
    Json(#[from] serde_json::Error),
}

/// One administrative region containing a coordinate.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RegionDocument {
    /// 10-digit region code
    pub code: String,
    /// `H` for administrative dong, `B` for legal dong
    pub region_type: String,
    #[serde(rename = "region_1depth_name")]
    pub region_1_name: String,
    #[serde(rename = "region_2depth_name")]
    pub region_2_name: String,
    #[serde(rename = "region_3depth_name", default)]
    pub region_3_name: String,
    #[serde(default)]
    pub address_name: String,
}

/// One forward-geocoding match.
#[derive(Clone, Debug, PartialEq)]
pub struct AddressDocument {
    /// longitude
    pub x: f64,
    /// latitude
    pub y: f64,
    pub accuracy: Option<String>,
    pub address_type: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ReverseGeocodingProvider: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Vec<RegionDocument>, GeocodeError>;
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ForwardGeocodingProvider: Send + Sync {
    /// recorded on cache entries as the provider name
    fn name(&self) -> &'static str;

    async fn geocode(&self, address: &str) -> Result<Vec<AddressDocument>, GeocodeError>;
}
