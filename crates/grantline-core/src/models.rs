//! Core domain model for grantline.
//!
//! The canonical record is [`Opportunity`]: one external funding listing,
//! uniquely keyed by `(source_domain, source_id)`. Strategies produce
//! [`RawOpportunity`] values which the normalizer turns into opportunities;
//! the status engine derives the lifecycle fields and [`StatusDecision`]
//! captures its output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

/// Engine-derived lifecycle label. Closed set of five values; every stored
/// row carries one (`needs_review` is the conservative default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizedStatus {
    Open,
    Upcoming,
    Closed,
    Archived,
    NeedsReview,
}

impl NormalizedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Upcoming => "upcoming",
            Self::Closed => "closed",
            Self::Archived => "archived",
            Self::NeedsReview => "needs_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "upcoming" => Some(Self::Upcoming),
            "closed" => Some(Self::Closed),
            "archived" => Some(Self::Archived),
            "needs_review" => Some(Self::NeedsReview),
            _ => None,
        }
    }
}

impl std::fmt::Display for NormalizedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for NormalizedStatus {
    fn default() -> Self {
        Self::NeedsReview
    }
}

/// A parsed date snippet carrying its provenance.
///
/// `source` is one of `html`, `detail_html`, `pdf`, `text`, `legacy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineEvidence {
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snippet: String,
    pub parsed_date_iso: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    pub confidence: f64,
}

/// One canonical funding listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    /// Sanitized HTML description (allow-list policy).
    pub description_html: String,
    pub external_url: String,
    pub source_domain: String,
    /// External source id. Mandatory for every write; HTML strategies use
    /// the hex SHA-1 of the canonicalized URL.
    pub source_id: String,
    pub opportunity_number: String,
    pub agency_name: String,
    pub agency_code: String,
    pub funder_type: String,
    pub amount_min: Decimal,
    pub amount_max: Decimal,
    pub currency: String,
    pub deadline_at: Option<DateTime<Utc>>,
    /// Derived by the status engine; strictly in the future when set.
    pub next_deadline_at: Option<DateTime<Utc>>,
    pub open_date: Option<DateTime<Utc>>,
    pub open_at: Option<DateTime<Utc>>,
    pub close_at: Option<DateTime<Utc>>,
    pub expiration_at: Option<DateTime<Utc>>,
    pub close_date_raw: String,
    pub is_rolling: bool,
    pub rolling_evidence: bool,
    pub doc_type: String,
    pub cfda_list: Vec<String>,
    /// Source-origin status: posted, closed, archived, funded, forthcoming, unknown.
    pub opp_status: String,
    pub source_status_raw: String,
    pub normalized_status: NormalizedStatus,
    pub status_reason: String,
    pub status_confidence: f64,
    /// Legacy ISO date candidates; persisted as evidence objects.
    pub deadlines: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deadline_evidence: Vec<DeadlineEvidence>,
    pub is_results_page: bool,
    /// Free-form evidence bag. Reserved keys: `authority`, `fetch_meta`,
    /// `pdfs_parsed`, `deadlines_added`, `rolling_evidence`,
    /// `proinnovate_discovery_only`.
    pub source_evidence_json: JsonMap<String, JsonValue>,
    pub region: String,
    pub country: String,
    pub categories: Vec<String>,
    pub eligibility: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub source_run_id: Option<Uuid>,
    pub canonical_url: String,
    pub raw_url: String,
    pub content_type: String,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub fetch_last_status_code: Option<i32>,
    pub fetch_last_bytes: Option<i64>,
    pub fetch_last_duration_ms: Option<i64>,
    pub fetch_blocked_detected: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Untrusted, unnormalized data extracted from a source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOpportunity {
    pub title: String,
    pub description: String,
    pub external_url: String,
    pub source_id: String,
    pub source_domain: String,
    pub raw_deadline: String,
    pub raw_amount: String,
    pub raw_currency: String,
    pub raw_tags: Vec<String>,
    pub raw_status: String,
    pub open_iso: String,
    pub close_iso: String,
    pub expiration_iso: String,
    pub deadline_candidates: Vec<String>,
    pub is_results_page: bool,
    pub rolling_evidence: bool,
    pub deadline_evidence: Vec<DeadlineEvidence>,
    pub source_evidence_json: JsonMap<String, JsonValue>,
    /// Loose key/value hints from the strategy: `date_locales`,
    /// `currency_default`, `is_rolling`, `opp_status`, `source_status_raw`,
    /// `is_results_page`, `eligibility`.
    pub extra: HashMap<String, String>,
}

/// Output of the status engine for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusDecision {
    pub normalized_status: NormalizedStatus,
    pub status_reason: String,
    pub status_confidence: f64,
    pub next_deadline_at: Option<DateTime<Utc>>,
    pub is_results_page: bool,
}

/// Lifecycle state of one strategy execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One audit row per strategy execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRun {
    pub run_id: Uuid,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_found: i64,
    pub items_saved: i64,
    pub errors: i64,
    pub status: RunStatus,
    pub details: JsonValue,
}

/// Metrics for one strategy run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IngestionStats {
    pub total_found: i64,
    pub total_saved: i64,
    pub errors: i64,
}

/// Metrics for one selective-enrichment sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub items_scanned: i64,
    pub items_updated: i64,
    pub pdfs_parsed: i64,
    pub deadlines_added: i64,
    pub status_changes: i64,
}

/// Parse an ISO-ish date candidate: RFC 3339, a bare date, or a naive
/// datetime. Bare dates stay at midnight UTC.
pub fn parse_iso_candidate(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d
            .and_hms_opt(0, 0, 0)
            .map(|t| DateTime::<Utc>::from_naive_utc_and_offset(t, Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(t, Utc));
        }
    }

    None
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_status_round_trips_through_strings() {
        for status in [
            NormalizedStatus::Open,
            NormalizedStatus::Upcoming,
            NormalizedStatus::Closed,
            NormalizedStatus::Archived,
            NormalizedStatus::NeedsReview,
        ] {
            assert_eq!(NormalizedStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NormalizedStatus::parse("posted"), None);
    }

    #[test]
    fn normalized_status_default_is_needs_review() {
        assert_eq!(NormalizedStatus::default(), NormalizedStatus::NeedsReview);
    }

    #[test]
    fn deadline_evidence_serializes_without_empty_optionals() {
        let ev = DeadlineEvidence {
            source: "html".to_string(),
            url: String::new(),
            snippet: String::new(),
            parsed_date_iso: "2026-02-20T23:59:59Z".to_string(),
            label: String::new(),
            confidence: 0.8,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("\"url\""));
        assert!(!json.contains("\"snippet\""));
        assert!(json.contains("parsed_date_iso"));
    }

    #[test]
    fn opportunity_default_has_zero_amounts() {
        let opp = Opportunity::default();
        assert!(opp.amount_min.is_zero());
        assert!(opp.amount_max.is_zero());
        assert_eq!(opp.normalized_status, NormalizedStatus::NeedsReview);
    }

    #[test]
    fn user_hash_never_serializes() {
        let user = User {
            id: Uuid::nil(),
            email: "a@b.c".to_string(),
            password_hash: "secret".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
    }
}
