pub mod childcare;
pub mod kindergarten;
pub mod locate;
pub mod markers;
pub mod playground;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::{region::RegionCode, retry::Transient};

pub use self::{
    childcare::ChildcarePortal, kindergarten::KindergartenRegistry, playground::PlaygroundRegistry,
};

/// The three facility registries, each with its own snapshot store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Kindergarten,
    Childcare,
    Playground,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Kindergarten, Domain::Childcare, Domain::Playground];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Kindergarten => "kindergarten",
            Domain::Childcare => "childcare",
            Domain::Playground => "playground",
        }
    }

    /// blob bucket holding this domain's snapshots
    pub fn bucket(&self) -> String {
        format!("{}-cache", self.as_str())
    }

    /// blob bucket holding per-facility details
    pub fn detail_bucket(&self) -> String {
        format!("{}-detail-cache", self.as_str())
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kindergarten" | "kindergartens" => Ok(Domain::Kindergarten),
            "childcare" => Ok(Domain::Childcare),
            "playground" | "playgrounds" => Ok(Domain::Playground),
            _ => Err(format!("unknown facility domain {s:?}")),
        }
    }
}

/// A facility as returned by one of the registries.
///
/// The common fields are lifted out; everything the registry sent is kept
/// in `raw` so nothing is lost in the snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FacilityRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub phone: Option<String>,
    pub capacity: Option<u32>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl FacilityRecord {
    pub fn coords(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) if is_plausible(lat, lng) => Some((lat, lng)),
            _ => None,
        }
    }
}

/// registries use 0,0 for unknown; anything outside korea is treated the same
fn is_plausible(lat: f64, lng: f64) -> bool {
    (33.0..=39.0).contains(&lat) && (124.0..=132.0).contains(&lng)
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("registry request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("registry returned an error: {0}")]
    Api(String),
    #[error("could not decode registry response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("cancelled")]
    Cancelled,
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        match self {
            SourceError::Network(e) => e.status().map_or(true, |s| s.is_server_error() || s.as_u16() == 429),
            _ => false,
        }
    }
}

/// One page of registry rows.
///
/// `raw_len` counts every row the registry sent, including rows dropped
/// for lacking an id, so a full page is never mistaken for the last one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub records: Vec<FacilityRecord>,
    pub raw_len: usize,
}

impl Page {
    /// no rows, ends pagination
    pub fn end() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<Map<String, Value>>, to_record: fn(Map<String, Value>) -> Option<FacilityRecord>) -> Self {
        let raw_len = rows.len();
        Self {
            records: rows.into_iter().filter_map(to_record).collect(),
            raw_len,
        }
    }
}

/// One government facility registry.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait FacilitySource: Send + Sync {
    fn domain(&self) -> Domain;

    /// a page shorter than this is the last one
    fn page_size(&self) -> usize;

    /// `page` starts at 1
    async fn fetch_page(
        &self,
        region: &RegionCode,
        page: u32,
        page_size: usize,
    ) -> Result<Page, SourceError>;
}

/// strings, numbers, or nothing; registries are not consistent about it
pub(crate) fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn f64_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn u32_field(obj: &Map<String, Value>, key: &str) -> Option<u32> {
    match obj.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// first non-empty of several alternative keys
pub(crate) fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| str_field(obj, k))
}

#[cfg(test)]
pub(crate) fn test_page(records: Vec<FacilityRecord>) -> Page {
    Page {
        raw_len: records.len(),
        records,
    }
}

#[cfg(test)]
pub(crate) fn test_record(id: usize) -> FacilityRecord {
    FacilityRecord {
        id: format!("K{id:05}"),
        name: format!("테스트유치원{id}"),
        address: format!("서울특별시 강남구 테헤란로 {id}"),
        lat: Some(37.50 + id as f64 * 0.0001),
        lng: Some(127.03),
        phone: None,
        capacity: Some(60),
        raw: Map::new(),
    }
}
