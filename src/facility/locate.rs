use std::time::Duration;

use geo::{HaversineDistance, Point};
use rand::Rng;
use serde::Serialize;

use super::FacilityRecord;
use crate::geocode::AddressGeocodeCache;

/// Seoul district centroids used when an address cannot be geocoded
static CENTROIDS: &[(&str, f64, f64)] = &[
    ("강남구", 37.5172, 127.0473),
    ("서초구", 37.4945, 127.0256),
    ("중구", 37.5636, 126.9970),
    ("용산구", 37.5384, 126.9654),
    ("성동구", 37.5633, 127.0366),
];

const SEOUL_CENTER: (f64, f64) = (37.5665, 126.9780);

const DISTRICT_JITTER: f64 = 0.01;
const CITY_JITTER: f64 = 0.05;

/// Fills in coordinates for records that lack them.
///
/// Addresses go through the geocode cache; whatever still has no match
/// gets a jittered district centroid so it can at least be shown on a map.
pub async fn locate(
    mut records: Vec<FacilityRecord>,
    geocoder: &AddressGeocodeCache,
    delay: Duration,
) -> Vec<FacilityRecord> {
    let missing: Vec<String> = records
        .iter()
        .filter(|r| r.coords().is_none())
        .map(|r| r.address.clone())
        .collect();

    if missing.is_empty() {
        return records;
    }

    tracing::info!(missing = missing.len(), total = records.len(), "locating facilities");
    let found = geocoder.geocode_batch(&missing, delay).await;

    let mut rng = rand::thread_rng();
    for record in records.iter_mut().filter(|r| r.coords().is_none()) {
        let (lat, lng) = match found.get(&record.address) {
            Some(Some(g)) => (g.lat, g.lng),
            _ => approximate_location(&record.address, &mut rng),
        };
        record.lat = Some(lat);
        record.lng = Some(lng);
    }

    records
}

/// a random point near the Seoul district named in the address
pub fn approximate_location(address: &str, rng: &mut impl Rng) -> (f64, f64) {
    // 중구 exists in Busan, Daegu and Incheon too
    let in_seoul = address.trim_start().starts_with("서울");
    let ((lat, lng), jitter) = CENTROIDS
        .iter()
        .find(|(district, _, _)| in_seoul && address.contains(district))
        .map(|(_, lat, lng)| ((*lat, *lng), DISTRICT_JITTER))
        .unwrap_or((SEOUL_CENTER, CITY_JITTER));

    (
        lat + rng.gen_range(-jitter..=jitter),
        lng + rng.gen_range(-jitter..=jitter),
    )
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct NearbyFacility {
    #[serde(flatten)]
    pub record: FacilityRecord,
    /// metres from the reference point, None for unlocated records
    pub distance_m: Option<f64>,
}

/// Attaches distances from (lat, lng), nearest first, unlocated records last.
pub fn with_distance(records: Vec<FacilityRecord>, lat: f64, lng: f64) -> Vec<NearbyFacility> {
    let origin = Point::new(lng, lat);

    let mut nearby: Vec<_> = records
        .into_iter()
        .map(|record| {
            let distance_m = record
                .coords()
                .map(|(lat, lng)| origin.haversine_distance(&Point::new(lng, lat)));
            NearbyFacility { record, distance_m }
        })
        .collect();

    nearby.sort_by(|a, b| match (a.distance_m, b.distance_m) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    nearby
}
