//! 어린이집 registry, reached through a JSON proxy function.
//!
//! The proxy returns every center of an `arcode` in one response, so only
//! page 1 has data.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{f64_field, str_field, u32_field, Domain, FacilityRecord, FacilitySource, Page, SourceError};
use crate::region::RegionCode;

pub struct ChildcarePortal {
    client: reqwest::Client,
    function_url: String,
    function_key: String,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

impl ChildcarePortal {
    pub fn new(
        function_url: impl Into<String>,
        function_key: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            function_url: function_url.into(),
            function_key: function_key.into(),
        })
    }
}

#[async_trait::async_trait]
impl FacilitySource for ChildcarePortal {
    fn domain(&self) -> Domain {
        Domain::Childcare
    }

    fn page_size(&self) -> usize {
        1000
    }

    async fn fetch_page(
        &self,
        region: &RegionCode,
        page: u32,
        _page_size: usize,
    ) -> Result<Page, SourceError> {
        if page > 1 {
            return Ok(Page::end());
        }

        let body = self
            .client
            .post(&self.function_url)
            .bearer_auth(&self.function_key)
            .json(&json!({ "action": "fetch", "arcode": region.sgg_code() }))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Page, SourceError> {
    let res: Response = serde_json::from_str(body)?;
    if !res.success {
        return Err(SourceError::Api(
            res.error.unwrap_or_else(|| "request was not successful".to_string()),
        ));
    }

    Ok(Page::from_rows(res.data, to_record))
}

fn to_record(obj: Map<String, Value>) -> Option<FacilityRecord> {
    let id = str_field(&obj, "stcode")?;

    Some(FacilityRecord {
        name: str_field(&obj, "crname").unwrap_or_default(),
        address: str_field(&obj, "craddr").unwrap_or_default(),
        lat: f64_field(&obj, "la"),
        lng: f64_field(&obj, "lo"),
        phone: str_field(&obj, "crtelno"),
        capacity: u32_field(&obj, "crcapat"),
        id,
        raw: obj,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let body = r#"{
            "success": true,
            "count": 2,
            "data": [
                {"stcode": "11680000001", "crname": "푸른어린이집", "crtelno": "02-555-0000",
                 "craddr": "서울특별시 강남구 역삼로 10", "crcapat": 39, "arcode": "11680"},
                {"stcode": "11680000002", "crname": "하늘어린이집", "craddr": "서울특별시 강남구 역삼로 20",
                 "crcapat": "0", "arcode": "11680"}
            ]
        }"#;

        let records = parse_response(body).unwrap().records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "푸른어린이집");
        assert_eq!(records[0].capacity, Some(39));
        assert_eq!(records[0].coords(), None);
        assert_eq!(records[1].capacity, Some(0));
        assert_eq!(records[1].raw["arcode"], "11680");
    }

    #[test]
    fn test_rows_without_stcode_still_count() {
        let body = r#"{"success": true, "data": [{"stcode": "1"}, {"crname": "코드없음"}]}"#;
        let page = parse_response(body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.raw_len, 2);
    }

    #[test]
    fn test_failure_carries_the_proxy_message() {
        let body = r#"{"success": false, "error": "시군구코드(arcode)가 필요합니다."}"#;
        match parse_response(body) {
            Err(SourceError::Api(msg)) => assert!(msg.contains("arcode")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
