//! Structured-API strategy: paginated POST search against grant portals
//! exposing a JSON search endpoint (grants.gov search2 shape).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use grantline_core::{Error, IngestionStats, Opportunity, Result};

use crate::fetcher::ensure_public_http_url;
use crate::pipeline::Pipeline;
use crate::registry::SourceConfig;
use crate::strategies::Strategy;

const PAGE_SIZE: i64 = 25;

#[derive(Debug, Serialize)]
struct SearchRequest {
    keyword: String,
    #[serde(rename = "oppStatuses")]
    opp_statuses: String,
    #[serde(rename = "sortBy")]
    sort_by: String,
    rows: i64,
    #[serde(rename = "startRecordNum")]
    start_record_num: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    data: SearchData,
    errorcode: i64,
    msg: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchData {
    #[serde(rename = "hitCount")]
    hit_count: i64,
    #[serde(rename = "oppHits")]
    opp_hits: Vec<ApiRecord>,
}

/// One opportunity record from the search endpoint.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ApiRecord {
    pub id: String,
    pub number: String,
    pub title: String,
    pub agency: String,
    #[serde(rename = "agencyCode")]
    pub agency_code: String,
    #[serde(rename = "openDate")]
    pub open_date: String,
    #[serde(rename = "closeDate")]
    pub close_date: String,
    #[serde(rename = "oppStatus")]
    pub opp_status: String,
    #[serde(rename = "docType")]
    pub doc_type: String,
    #[serde(rename = "cfdaList")]
    pub cfda_list: Vec<String>,
}

/// Map a search record onto a canonical opportunity. Returns `None` for
/// untitled records and for records whose close date passed by the end of
/// that calendar day in UTC.
pub fn map_record(rec: &ApiRecord, config: &SourceConfig, now: DateTime<Utc>) -> Option<Opportunity> {
    if rec.title.is_empty() {
        return None;
    }

    let mut opp = Opportunity {
        title: rec.title.clone(),
        summary: format!(
            "Federal grant from {}. CFDA: {}",
            rec.agency,
            rec.cfda_list.join(", ")
        ),
        external_url: format!("https://www.grants.gov/search-results-detail/{}", rec.id),
        source_domain: "grants.gov".to_string(),
        source_id: rec.id.clone(),
        opportunity_number: rec.number.clone(),
        agency_name: rec.agency.clone(),
        agency_code: rec.agency_code.clone(),
        funder_type: "Government".to_string(),
        doc_type: rec.doc_type.clone(),
        cfda_list: rec.cfda_list.clone(),
        opp_status: rec.opp_status.clone(),
        region: if config.region.is_empty() {
            "North America".to_string()
        } else {
            config.region.clone()
        },
        country: if config.country.is_empty() {
            "USA".to_string()
        } else {
            config.country.clone()
        },
        currency: "USD".to_string(),
        ..Default::default()
    };

    if !rec.open_date.is_empty() {
        if let Ok(d) = NaiveDate::parse_from_str(&rec.open_date, "%m/%d/%Y") {
            opp.open_date = d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t));
        }
    }

    if !rec.close_date.is_empty() {
        opp.close_date_raw = rec.close_date.clone();
        if let Ok(d) = NaiveDate::parse_from_str(&rec.close_date, "%m/%d/%Y") {
            let midnight = Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?);
            // The close date is a bare date; it expires at the end of that
            // day in UTC.
            if midnight + chrono::Duration::hours(24) < now {
                return None;
            }
            opp.deadline_at = Some(midnight);
        }
    }

    Some(opp)
}

/// Apply detail-endpoint synopsis fields onto a mapped opportunity.
pub fn apply_detail(opp: &mut Opportunity, details: &JsonValue) {
    let Some(synopsis) = details.get("synopsis") else {
        return;
    };

    if let Some(desc) = synopsis.get("synopsisDesc").and_then(|v| v.as_str()) {
        if !desc.is_empty() {
            opp.description_html = desc.to_string();
        }
    }
    if let Some(elig) = synopsis
        .get("applicantEligibilityDesc")
        .and_then(|v| v.as_str())
    {
        if !elig.is_empty() {
            opp.eligibility = vec![elig.to_string()];
        }
    }
    for (key, target) in [("awardCeiling", true), ("awardFloor", false)] {
        if let Some(raw) = synopsis.get(key).and_then(|v| v.as_str()) {
            let clean = raw.replace(['$', ','], "");
            if let Ok(v) = clean.parse::<rust_decimal::Decimal>() {
                if target {
                    opp.amount_max = v;
                } else {
                    opp.amount_min = v;
                }
            }
        }
    }
}

/// Strategy driver for structured JSON search APIs.
pub struct StructuredApiStrategy;

impl StructuredApiStrategy {
    fn detail_endpoint(base_url: &str) -> Option<String> {
        base_url
            .contains("search2")
            .then(|| base_url.replace("search2", "fetchOpportunity"))
    }

    async fn fetch_page(
        client: &reqwest::Client,
        config: &SourceConfig,
        offset: i64,
    ) -> Result<(Vec<ApiRecord>, i64)> {
        let request = SearchRequest {
            keyword: String::new(),
            opp_statuses: "posted".to_string(),
            sort_by: "openDate|desc".to_string(),
            rows: PAGE_SIZE,
            start_record_num: offset,
        };

        let mut builder = client.post(&config.base_url).json(&request);
        if !config.api_key.is_empty() {
            builder = builder.header("apikey", &config.api_key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "search API returned {}",
                response.status().as_u16()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("decoding search response: {}", e)))?;

        if parsed.errorcode != 0 {
            return Err(Error::Fetch(format!("search API error: {}", parsed.msg)));
        }

        Ok((parsed.data.opp_hits, parsed.data.hit_count))
    }

    async fn fetch_details(
        client: &reqwest::Client,
        endpoint: &str,
        opp_id: &str,
    ) -> Result<JsonValue> {
        let response = client
            .post(endpoint)
            .json(&serde_json::json!({ "id": opp_id }))
            .send()
            .await?;

        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("decoding detail response: {}", e)))
    }
}

#[async_trait]
impl Strategy for StructuredApiStrategy {
    async fn run(
        &self,
        config: &SourceConfig,
        pipeline: &Pipeline,
        run_id: Option<Uuid>,
    ) -> Result<IngestionStats> {
        let mut stats = IngestionStats::default();

        ensure_public_http_url(&config.base_url).await?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("building API client: {}", e)))?;

        let detail_endpoint = Self::detail_endpoint(&config.base_url);
        let mut offset = 0i64;

        loop {
            let (records, total_hits) = Self::fetch_page(&client, config, offset).await?;
            stats.total_found = total_hits;

            if records.is_empty() {
                break;
            }

            let fetched = records.len() as i64;
            let now = Utc::now();
            for rec in &records {
                let Some(mut opp) = map_record(rec, config, now) else {
                    continue;
                };

                if let Some(endpoint) = &detail_endpoint {
                    match Self::fetch_details(&client, endpoint, &rec.id).await {
                        Ok(details) => apply_detail(&mut opp, &details),
                        Err(e) => warn!(
                            subsystem = "ingest",
                            component = "structured_api",
                            source_id = config.id.as_str(),
                            error = %e,
                            "Detail fetch failed"
                        ),
                    }
                }

                match pipeline.save_opportunity(opp, run_id).await {
                    Ok(()) => stats.total_saved += 1,
                    Err(e) => {
                        warn!(
                            subsystem = "ingest",
                            component = "structured_api",
                            source_id = config.id.as_str(),
                            error = %e,
                            "Failed to save record"
                        );
                        stats.errors += 1;
                    }
                }
            }

            offset += fetched;
            info!(
                subsystem = "ingest",
                component = "structured_api",
                source_id = config.id.as_str(),
                items_saved = stats.total_saved,
                items_found = stats.total_found,
                "Page complete"
            );

            if offset >= total_hits {
                break;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, close: &str) -> ApiRecord {
        ApiRecord {
            id: "358732".into(),
            number: "RFA-NS-27-001".into(),
            title: title.into(),
            agency: "National Institutes of Health".into(),
            agency_code: "HHS-NIH".into(),
            open_date: "01/15/2026".into(),
            close_date: close.into(),
            opp_status: "posted".into(),
            doc_type: "synopsis".into(),
            cfda_list: vec!["93.853".into()],
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn maps_record_fields() {
        let opp = map_record(&record("Brain Research", "06/30/2026"), &SourceConfig::default(), now())
            .unwrap();
        assert_eq!(opp.source_domain, "grants.gov");
        assert_eq!(opp.source_id, "358732");
        assert_eq!(opp.agency_code, "HHS-NIH");
        assert_eq!(opp.funder_type, "Government");
        assert!(opp.summary.contains("93.853"));
        assert_eq!(opp.close_date_raw, "06/30/2026");
        assert_eq!(
            opp.external_url,
            "https://www.grants.gov/search-results-detail/358732"
        );
        assert_eq!(opp.open_date.unwrap().date_naive().to_string(), "2026-01-15");
    }

    #[test]
    fn drops_records_closed_before_end_of_day() {
        // Closed a week ago: dropped.
        assert!(map_record(&record("Old", "01/20/2026"), &SourceConfig::default(), now()).is_none());
        // Closes today: the end-of-day grace keeps it.
        assert!(map_record(&record("Today", "02/01/2026"), &SourceConfig::default(), now()).is_some());
    }

    #[test]
    fn drops_untitled_records() {
        assert!(map_record(&record("", "06/30/2026"), &SourceConfig::default(), now()).is_none());
    }

    #[test]
    fn detail_endpoint_derived_from_search2() {
        assert_eq!(
            StructuredApiStrategy::detail_endpoint("https://api.grants.gov/v1/api/search2"),
            Some("https://api.grants.gov/v1/api/fetchOpportunity".to_string())
        );
        assert_eq!(
            StructuredApiStrategy::detail_endpoint("https://example.org/api/search"),
            None
        );
    }

    #[test]
    fn apply_detail_merges_synopsis() {
        let mut opp = Opportunity::default();
        let details = serde_json::json!({
            "synopsis": {
                "synopsisDesc": "<p>Supports basic neuroscience.</p>",
                "applicantEligibilityDesc": "Accredited universities",
                "awardCeiling": "$500,000",
                "awardFloor": "$50,000"
            }
        });
        apply_detail(&mut opp, &details);
        assert_eq!(opp.description_html, "<p>Supports basic neuroscience.</p>");
        assert_eq!(opp.eligibility, vec!["Accredited universities"]);
        assert_eq!(opp.amount_max.to_string(), "500000");
        assert_eq!(opp.amount_min.to_string(), "50000");
    }
}
