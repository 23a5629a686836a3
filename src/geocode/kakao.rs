use std::time::Duration;

use serde::Deserialize;

use super::{
    AddressDocument, ForwardGeocodingProvider, GeocodeError, RegionDocument,
    ReverseGeocodingProvider,
};

const BASE_URL: &str = "https://dapi.kakao.com/v2/local";

/// Kakao Local REST API, used for both geocoding directions.
#[derive(Clone)]
pub struct KakaoLocal {
    client: reqwest::Client,
    base_url: String,
    rest_key: String,
}

#[derive(Deserialize)]
struct Documents<T> {
    documents: Vec<T>,
}

#[derive(Deserialize)]
struct RawAddress {
    x: String,
    y: String,
    #[serde(default)]
    accuracy: Option<String>,
    #[serde(default)]
    address_type: Option<String>,
}

impl KakaoLocal {
    pub fn new(rest_key: impl Into<String>) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("mompick/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            rest_key: rest_key.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GeocodeError> {
        let res = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header("Authorization", format!("KakaoAK {}", self.rest_key))
            .query(query)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GeocodeError::Provider(format!("{status}: {body}")));
        }

        Ok(res.json().await?)
    }
}

#[async_trait::async_trait]
impl ReverseGeocodingProvider for KakaoLocal {
    async fn reverse_geocode(&self, lat: f64, lng: f64) -> Result<Vec<RegionDocument>, GeocodeError> {
        let res: Documents<RegionDocument> = self
            .get(
                "/geo/coord2regioncode.json",
                &[("x", lng.to_string()), ("y", lat.to_string())],
            )
            .await?;

        Ok(res.documents)
    }
}

#[async_trait::async_trait]
impl ForwardGeocodingProvider for KakaoLocal {
    fn name(&self) -> &'static str {
        "kakao"
    }

    async fn geocode(&self, address: &str) -> Result<Vec<AddressDocument>, GeocodeError> {
        let res: Documents<RawAddress> = self
            .get("/search/address.json", &[("query", address.to_string())])
            .await?;

        res.documents.into_iter().map(parse_address).collect()
    }
}

fn parse_address(raw: RawAddress) -> Result<AddressDocument, GeocodeError> {
    let coord = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| GeocodeError::Provider(format!("bad coordinate {s:?}")))
    };

    Ok(AddressDocument {
        x: coord(&raw.x)?,
        y: coord(&raw.y)?,
        accuracy: raw.accuracy,
        address_type: raw.address_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_region_response() {
        let json = r#"{
            "meta": {"total_count": 2},
            "documents": [
                {"region_type": "B", "code": "1114010300", "address_name": "서울특별시 중구 명동2가",
                 "region_1depth_name": "서울특별시", "region_2depth_name": "중구", "region_3depth_name": "명동2가",
                 "region_4depth_name": "", "x": 126.98, "y": 37.56},
                {"region_type": "H", "code": "1114055000", "address_name": "서울특별시 중구 명동",
                 "region_1depth_name": "서울특별시", "region_2depth_name": "중구", "region_3depth_name": "명동",
                 "region_4depth_name": "", "x": 126.98, "y": 37.56}
            ]
        }"#;

        let res: Documents<RegionDocument> = serde_json::from_str(json).unwrap();
        assert_eq!(res.documents.len(), 2);
        assert_eq!(res.documents[1].region_type, "H");
        assert_eq!(res.documents[1].region_2_name, "중구");
        assert_eq!(res.documents[1].region_3_name, "명동");
    }

    #[test]
    fn test_parse_address_response() {
        let json = r#"{
            "documents": [
                {"address_name": "서울 강남구 테헤란로 152", "address_type": "ROAD_ADDR",
                 "x": "127.036508620542", "y": "37.5000242405515"}
            ]
        }"#;

        let res: Documents<RawAddress> = serde_json::from_str(json).unwrap();
        let docs: Vec<_> = res
            .documents
            .into_iter()
            .map(parse_address)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert!((docs[0].x - 127.036508620542).abs() < 1e-9);
        assert!((docs[0].y - 37.5000242405515).abs() < 1e-9);
        assert_eq!(docs[0].address_type.as_deref(), Some("ROAD_ADDR"));
        assert_eq!(docs[0].accuracy, None);
    }

    #[test]
    fn test_bad_coordinate_is_a_provider_error() {
        let raw = RawAddress {
            x: "east".into(),
            y: "37.5".into(),
            accuracy: None,
            address_type: None,
        };
        assert!(matches!(parse_address(raw), Err(GeocodeError::Provider(_))));
    }
}
