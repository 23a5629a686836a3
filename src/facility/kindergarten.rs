//! 유치원알리미 basic-info registry.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    f64_field, first_str, str_field, u32_field, Domain, FacilityRecord, FacilitySource, Page, SourceError,
};
use crate::region::RegionCode;

const BASE_URL: &str = "https://e-childschoolinfo.moe.go.kr/api/notice/basicInfo2.do";

pub struct KindergartenRegistry {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    status: String,
    #[serde(rename = "kinderInfo", default)]
    kinder_info: Vec<Map<String, Value>>,
}

impl KindergartenRegistry {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait::async_trait]
impl FacilitySource for KindergartenRegistry {
    fn domain(&self) -> Domain {
        Domain::Kindergarten
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
        let page_cnt = page_size.to_string();
        let current_page = page.to_string();
        let res = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("pageCnt", page_cnt.as_str()),
                ("currentPage", current_page.as_str()),
                ("sidoCode", region.sido_code()),
                ("sggCode", region.sgg_code()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body = res.text().await?;
        parse_response(&body, page)
    }
}

/// A failed status on the first page is an error; on later pages it ends
/// pagination and keeps what was already fetched.
fn parse_response(body: &str, page: u32) -> Result<Page, SourceError> {
    let res: Response = serde_json::from_str(body)?;
    if res.status != "SUCCESS" {
        if page > 1 {
            tracing::warn!(page, status = %res.status, "registry stopped paging early");
            return Ok(Page::end());
        }
        return Err(SourceError::Api(format!("status {:?}", res.status)));
    }

    Ok(Page::from_rows(res.kinder_info, to_record))
}

fn to_record(obj: Map<String, Value>) -> Option<FacilityRecord> {
    let id = first_str(&obj, &["kindercode", "kinderCode"])?;

    Some(FacilityRecord {
        name: str_field(&obj, "kindername").unwrap_or_default(),
        address: str_field(&obj, "addr").unwrap_or_default(),
        lat: f64_field(&obj, "lttdcdnt"),
        lng: f64_field(&obj, "lngtcdnt"),
        phone: str_field(&obj, "telno"),
        // 인가총정원수
        capacity: u32_field(&obj, "prmstfcnt"),
        id,
        raw: obj,
    })
}
