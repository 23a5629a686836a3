pub mod fallback;
pub mod table;

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub use self::{fallback::FallbackRegions, table::RegionTable};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegionError {
    #[error("invalid region code {0:?}, expected 5 or 10 digits")]
    InvalidCode(String),
    #[error("unknown region {sido} {sgg}")]
    UnknownName { sido: String, sgg: String },
}

/// Canonical region key shared by every facility domain.
///
/// Either a 5-digit sgg code (`11680`) or a 10-digit legal-dong code
/// (`1168010100`). Name-based lookups go through [`RegionTable`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

impl RegionCode {
    pub fn from_sgg_code(code: u32) -> Self {
        Self(format!("{code:05}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// first two digits
    pub fn sido_code(&self) -> &str {
        &self.0[..2]
    }

    /// first five digits, which is also the childcare `arcode`
    pub fn sgg_code(&self) -> &str {
        &self.0[..5]
    }
}

impl FromStr for RegionCode {
    type Err = RegionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if matches!(s.len(), 5 | 10) && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(RegionError::InvalidCode(s.to_string()))
        }
    }
}

impl TryFrom<String> for RegionCode {
    type Error = RegionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegionCode> for String {
    fn from(value: RegionCode) -> Self {
        value.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Codes from the three government schemes for one sido/sgg pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionCodeMapping {
    pub kindergarten_sido_code: u32,
    pub kindergarten_sgg_code: u32,
    pub childcare_arcode: String,
}

#[cfg_attr(test, automock)]
pub trait RegionCodeMappingTable: Send + Sync {
    fn lookup(&self, sido_name: &str, sgg_name: &str) -> Option<RegionCodeMapping>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KindergartenCodes {
    pub sido_code: u32,
    pub sgg_code: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChildcareCodes {
    pub arcode: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DomainCodes {
    pub kindergarten: KindergartenCodes,
    pub childcare: ChildcareCodes,
}

impl DomainCodes {
    /// 서울특별시 중구, used when a region has no mapping
    pub fn seoul_jung_gu() -> Self {
        Self::from(RegionCodeMapping {
            kindergarten_sido_code: 11,
            kindergarten_sgg_code: 11140,
            childcare_arcode: "11140".to_string(),
        })
    }
}

impl From<RegionCodeMapping> for DomainCodes {
    fn from(m: RegionCodeMapping) -> Self {
        Self {
            kindergarten: KindergartenCodes {
                sido_code: m.kindergarten_sido_code,
                sgg_code: m.kindergarten_sgg_code,
            },
            childcare: ChildcareCodes {
                arcode: m.childcare_arcode,
            },
        }
    }
}

/// A resolved administrative region for one tile.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RegionInfo {
    pub tile_key: String,
    /// 10-digit administrative (행정동) code reported by the provider
    pub administrative_code: String,
    pub sido_name: String,
    pub sgg_name: String,
    pub dong_name: String,
    pub address_name: String,
    pub domain_codes: DomainCodes,
    /// set when the mapping table had no entry and default codes were used
    #[serde(default)]
    pub degraded: bool,
    pub cached_at: DateTime<Utc>,
}

impl RegionInfo {
    /// canonical key for facility lookups in this region
    pub fn region_code(&self) -> RegionCode {
        RegionCode::from_sgg_code(self.domain_codes.kindergarten.sgg_code)
    }
}
