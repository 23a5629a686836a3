//! 전국어린이놀이시설정보서비스 (data.go.kr).

use std::time::Duration;

use serde_json::{Map, Value};

use super::{f64_field, first_str, str_field, Domain, FacilityRecord, FacilitySource, Page, SourceError};
use crate::region::RegionCode;

pub const DEFAULT_URL: &str = "https://apis.data.go.kr/1741000/pfc3/getPfctInfo3";

pub struct PlaygroundRegistry {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl PlaygroundRegistry {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            service_key: service_key.into(),
        })
    }
}

/// the registry filters by 10-digit region codes
fn region_filter(region: &RegionCode) -> String {
    format!("{:0<10}", region.as_str())
}

#[async_trait::async_trait]
impl FacilitySource for PlaygroundRegistry {
    fn domain(&self) -> Domain {
        Domain::Playground
    }

    fn page_size(&self) -> usize {
        100
    }

    async fn fetch_page(
        &self,
        region: &RegionCode,
        page: u32,
        page_size: usize,
    ) -> Result<Page, SourceError> {
        let page_index = page.to_string();
        let record_count = page_size.to_string();
        let rgn_cd = region_filter(region);

        let body = self
            .client
            .get(&self.base_url)
            .query(&[
                ("serviceKey", self.service_key.as_str()),
                ("pageIndex", page_index.as_str()),
                ("recordCountPerPage", record_count.as_str()),
                ("rgnCd", rgn_cd.as_str()),
                ("returnType", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Page, SourceError> {
    let root: Value = serde_json::from_str(body)?;

    if let Some(code) = root
        .pointer("/response/header/resultCode")
        .and_then(Value::as_str)
    {
        if code != "00" && code != "0" {
            let msg = root
                .pointer("/response/header/resultMsg")
                .and_then(Value::as_str)
                .unwrap_or(code);
            return Err(SourceError::Api(msg.to_string()));
        }
    }

    let items = ["/response/items", "/response/body/items", "/items"]
        .iter()
        .find_map(|p| root.pointer(p))
        .map(items_array)
        .unwrap_or_default();

    Ok(Page::from_rows(items, to_record))
}

/// items come as an array, a single object, or wrapped in `{"item": ...}`
fn items_array(value: &Value) -> Vec<Map<String, Value>> {
    match value {
        Value::Array(arr) => arr.iter().filter_map(|v| v.as_object().cloned()).collect(),
        Value::Object(obj) => match obj.get("item") {
            Some(inner) => items_array(inner),
            None => vec![obj.clone()],
        },
        _ => vec![],
    }
}

fn to_record(obj: Map<String, Value>) -> Option<FacilityRecord> {
    let id = str_field(&obj, "pfctSn")?;

    let mut address = first_str(&obj, &["ronaAddr", "roadAddr", "addr"]).unwrap_or_default();
    if let Some(detail) = first_str(&obj, &["ronaDaddr", "dtlAddr"]) {
        address = format!("{address} {detail}");
    }

    Some(FacilityRecord {
        name: str_field(&obj, "pfctNm").unwrap_or_default(),
        address,
        lat: f64_field(&obj, "latCrtsVl").or_else(|| f64_field(&obj, "lat")),
        lng: f64_field(&obj, "lotCrtsVl").or_else(|| f64_field(&obj, "lng")),
        phone: str_field(&obj, "tel"),
        capacity: None,
        id,
        raw: obj,
    })
}
