use geojson::{feature, Feature, FeatureCollection, Geometry, JsonObject, Value};

use super::{locate::NearbyFacility, Domain};

/// Point features for every located facility, ready for map markers.
pub fn to_feature_collection(domain: Domain, facilities: &[NearbyFacility]) -> FeatureCollection {
    let features = facilities
        .iter()
        .filter_map(|f| to_feature(domain, f))
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn to_feature(domain: Domain, facility: &NearbyFacility) -> Option<Feature> {
    let record = &facility.record;
    let (lat, lng) = record.coords()?;

    let mut props = JsonObject::new();
    props.insert("domain".to_string(), domain.as_str().into());
    props.insert("name".to_string(), record.name.clone().into());
    props.insert("address".to_string(), record.address.clone().into());
    if let Some(phone) = &record.phone {
        props.insert("phone".to_string(), phone.clone().into());
    }
    if let Some(capacity) = record.capacity {
        props.insert("capacity".to_string(), capacity.into());
    }
    if let Some(d) = facility.distance_m {
        props.insert("distance_m".to_string(), d.round().into());
    }

    Some(Feature {
        id: Some(feature::Id::String(record.id.clone())),
        geometry: Some(Geometry::new(Value::Point(vec![lng, lat]))),
        properties: Some(props),
        ..Default::default()
    })
}
