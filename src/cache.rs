use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use ahash::RandomState;
use chrono::{DateTime, Utc};
use moka::{future::Cache, Expiry};

use crate::{geocode::forward::GeocodeEntry, region::RegionInfo};

/// How long an entry of a cache domain stays valid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ttl {
    Finite(Duration),
    Infinite,
}

impl Ttl {
    pub const fn days(days: u64) -> Self {
        Self::Finite(Duration::from_secs(days * 24 * 60 * 60))
    }

    /// expired once strictly older than the ttl
    pub fn is_expired(&self, written_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Ttl::Infinite => false,
            Ttl::Finite(ttl) => match (now - written_at).to_std() {
                Ok(age) => age > *ttl,
                // written in the future, clock skew
                Err(_) => false,
            },
        }
    }

    /// time left before an entry written at `written_at` expires
    pub fn remaining(&self, written_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Ttl::Infinite => None,
            Ttl::Finite(ttl) => {
                let age = (now - written_at).to_std().unwrap_or(Duration::ZERO);
                Some(ttl.saturating_sub(age))
            }
        }
    }

    /// cutoff before which entries are expired, None when nothing ever expires
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Ttl::Infinite => None,
            Ttl::Finite(ttl) => chrono::Duration::from_std(*ttl).ok().map(|ttl| now - ttl),
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Infinite => f.write_str("infinite"),
            Ttl::Finite(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

/// parses `infinite` or a number of days
impl FromStr for Ttl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("infinite") {
            return Ok(Ttl::Infinite);
        }

        s.parse::<u64>()
            .map(Ttl::days)
            .map_err(|_| format!("expected a number of days or `infinite`, got {s:?}"))
    }
}

/// Values that carry the time they were first written to the blob store.
pub trait Stamped {
    fn cached_at(&self) -> DateTime<Utc>;
}

impl Stamped for RegionInfo {
    fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }
}

impl Stamped for GeocodeEntry {
    fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }
}

/// Expires memory entries by their stored `cached_at`, so promoting an
/// old blob entry into memory doesn't restart its clock.
struct StampedExpiry(Ttl);

impl<V: Stamped> Expiry<String, V> for StampedExpiry {
    fn expire_after_create(&self, _key: &String, value: &V, _created_at: Instant) -> Option<Duration> {
        self.0.remaining(value.cached_at(), Utc::now())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &V,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.0.remaining(value.cached_at(), Utc::now())
    }
}

/// In-process tier sitting in front of the blob-backed geocoding caches.
#[derive(Clone)]
pub struct Caches {
    pub tiles: TileCache,
    pub addresses: AddressCache,
}

impl Caches {
    pub fn new(ttl: Ttl) -> Self {
        Self {
            tiles: memory_tier(10_000, ttl),
            addresses: memory_tier(50_000, ttl),
        }
    }
}

fn memory_tier<V>(capacity: u64, ttl: Ttl) -> Cache<String, V, RandomState>
where
    V: Stamped + Clone + Send + Sync + 'static,
{
    let builder = Cache::builder().max_capacity(capacity);
    let builder = match ttl {
        Ttl::Finite(_) => builder.expire_after(StampedExpiry(ttl)),
        Ttl::Infinite => builder,
    };

    // we use ahash because it's faster for the longer address keys
    builder.build_with_hasher(RandomState::default())
}

pub type TileCache = Cache<String, RegionInfo, RandomState>;
pub type AddressCache = Cache<String, GeocodeEntry, RandomState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::DomainCodes;

    #[test]
    fn test_parse_ttl() {
        assert_eq!("infinite".parse::<Ttl>().unwrap(), Ttl::Infinite);
        assert_eq!(" 7 ".parse::<Ttl>().unwrap(), Ttl::days(7));
        assert!("soon".parse::<Ttl>().is_err());
    }

    #[test]
    fn test_finite_ttl_expiry_is_strict() {
        let ttl = Ttl::days(7);
        let now = Utc::now();

        assert!(!ttl.is_expired(now - chrono::Duration::days(6), now));
        assert!(!ttl.is_expired(now - chrono::Duration::days(7), now));
        assert!(ttl.is_expired(now - chrono::Duration::days(8), now));
        assert!(!ttl.is_expired(now + chrono::Duration::hours(1), now));
    }

    #[test]
    fn test_remaining_counts_from_the_write() {
        let ttl = Ttl::days(7);
        let now = Utc::now();

        assert_eq!(
            ttl.remaining(now - chrono::Duration::days(5), now),
            Some(Duration::from_secs(2 * 24 * 60 * 60))
        );
        assert_eq!(ttl.remaining(now - chrono::Duration::days(8), now), Some(Duration::ZERO));
        assert_eq!(Ttl::Infinite.remaining(now, now), None);
    }

    #[tokio::test]
    async fn test_memory_tier_keeps_the_stored_age() {
        let caches = Caches::new(Ttl::days(7));
        let info = |age_days| RegionInfo {
            tile_key: "wydm9q".into(),
            administrative_code: "1114055000".into(),
            sido_name: "서울특별시".into(),
            sgg_name: "중구".into(),
            dong_name: "명동".into(),
            address_name: "서울 중구 명동".into(),
            domain_codes: DomainCodes::seoul_jung_gu(),
            degraded: false,
            cached_at: Utc::now() - chrono::Duration::days(age_days),
        };
        let old = info(8);
        let fresh = info(0);

        caches.tiles.insert("old".into(), old).await;
        caches.tiles.insert("fresh".into(), fresh).await;

        assert!(caches.tiles.get("old").await.is_none());
        assert!(caches.tiles.get("fresh").await.is_some());
    }

    #[test]
    fn test_infinite_never_expires() {
        let now = Utc::now();
        assert!(!Ttl::Infinite.is_expired(now - chrono::Duration::days(3650), now));
        assert_eq!(Ttl::Infinite.cutoff(now), None);
        assert_eq!(
            Ttl::days(1).cutoff(now),
            Some(now - chrono::Duration::days(1))
        );
    }
}
