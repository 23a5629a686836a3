use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;

use crate::{cache::Ttl, facility::playground};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("failed to get {0}")]
    Missing(&'static str),
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub log_level: String,
    pub bind_addr: SocketAddr,
    pub kakao_rest_key: String,
    pub kindergarten_api_key: String,
    pub childcare_function_url: String,
    pub childcare_function_key: String,
    pub playground_api_key: String,
    pub playground_api_url: String,
    pub snapshot_ttl: Ttl,
    pub detail_ttl: Ttl,
    pub geocode_ttl: Ttl,
}

impl Config {
    /// Reads `.env` if there is one, then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let required = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        Ok(Self {
            data_path: required("DATA_PATH")?.into(),
            log_path: get("LOG_PATH").map(PathBuf::from),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            bind_addr: parse_or("BIND_ADDR", get("BIND_ADDR"), || {
                SocketAddr::from(([0, 0, 0, 0], 3000))
            })?,
            kakao_rest_key: required("KAKAO_REST_KEY")?,
            kindergarten_api_key: required("KINDERGARTEN_API_KEY")?,
            childcare_function_url: required("CHILDCARE_FUNCTION_URL")?,
            childcare_function_key: required("CHILDCARE_FUNCTION_KEY")?,
            playground_api_key: required("PLAYGROUND_API_KEY")?,
            playground_api_url: get("PLAYGROUND_API_URL")
                .unwrap_or_else(|| playground::DEFAULT_URL.to_string()),
            snapshot_ttl: parse_or("SNAPSHOT_TTL_DAYS", get("SNAPSHOT_TTL_DAYS"), || Ttl::days(7))?,
            detail_ttl: parse_or("DETAIL_TTL_DAYS", get("DETAIL_TTL_DAYS"), || Ttl::days(7))?,
            geocode_ttl: parse_or("GEOCODE_TTL_DAYS", get("GEOCODE_TTL_DAYS"), || Ttl::Infinite)?,
        })
    }
}

fn parse_or<T>(
    var: &'static str,
    value: Option<String>,
    default: impl FnOnce() -> T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match value {
        None => Ok(default()),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
