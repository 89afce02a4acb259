//! Normalization of raw source data into canonical opportunities.

use chrono::Utc;

use grantline_core::{NormalizedStatus, Opportunity, RawOpportunity};

use crate::amounts::parse_amount_robust;
use crate::dates::{parse_date_robust, parse_deadline_candidate};
use crate::status::compute_status_decision;
use crate::text::{clean_text, merge_unique_fold, split_and_clean_list};
use crate::urlutil::canonicalize_url;

/// Convert a [`RawOpportunity`] into a canonical [`Opportunity`].
///
/// Normalization is a fixed point: feeding the output back through the
/// normalizer leaves it unchanged.
pub fn from_raw(raw: RawOpportunity) -> Opportunity {
    let mut opp = Opportunity {
        title: raw.title,
        external_url: raw.external_url.clone(),
        source_domain: raw.source_domain,
        source_id: raw.source_id,
        description_html: raw.description.clone(),
        // Initial summary is the full description; the pipeline strips HTML
        // and truncates.
        summary: raw.description,
        close_date_raw: raw.raw_deadline.clone(),
        opp_status: "posted".to_string(),
        normalized_status: NormalizedStatus::NeedsReview,
        canonical_url: canonicalize_url(&raw.external_url),
        raw_url: raw.external_url,
        content_type: "html".to_string(),
        categories: raw.raw_tags,
        source_status_raw: raw.raw_status,
        deadlines: raw.deadline_candidates,
        deadline_evidence: raw.deadline_evidence,
        is_results_page: raw.is_results_page,
        rolling_evidence: raw.rolling_evidence,
        source_evidence_json: raw.source_evidence_json,
        ..Default::default()
    };

    let locales: Vec<String> = raw
        .extra
        .get("date_locales")
        .filter(|v| !v.is_empty())
        .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|| vec!["en".to_string()]);

    if !raw.raw_deadline.is_empty() {
        if let Ok(dt) = parse_date_robust(&raw.raw_deadline, &locales) {
            opp.deadline_at = Some(dt);
        }
    }

    if !raw.raw_amount.is_empty() {
        let default_currency = if raw.raw_currency.is_empty() {
            raw.extra
                .get("currency_default")
                .cloned()
                .unwrap_or_else(|| "USD".to_string())
        } else {
            raw.raw_currency.clone()
        };
        if let Some(parsed) = parse_amount_robust(&raw.raw_amount, &default_currency) {
            opp.amount_min = parsed.min;
            opp.amount_max = parsed.max;
            if !parsed.currency.is_empty() {
                opp.currency = parsed.currency;
            }
        }
    }

    if raw.extra.get("is_rolling").map(String::as_str) == Some("true") {
        opp.is_rolling = true;
        opp.rolling_evidence = true;
    }
    if let Some(val) = raw.extra.get("opp_status").filter(|v| !v.is_empty()) {
        opp.opp_status = val.clone();
        if opp.source_status_raw.is_empty() {
            opp.source_status_raw = val.clone();
        }
    }
    if let Some(val) = raw.extra.get("source_status_raw").filter(|v| !v.is_empty()) {
        opp.source_status_raw = val.clone();
    }
    if raw
        .extra
        .get("is_results_page")
        .map_or(false, |v| v.eq_ignore_ascii_case("true"))
    {
        opp.is_results_page = true;
    }
    if let Some(val) = raw.extra.get("eligibility").filter(|v| !v.is_empty()) {
        opp.eligibility = merge_unique_fold(opp.eligibility, split_and_clean_list(val));
    }

    if let Some(dt) = parse_deadline_candidate(&raw.open_iso) {
        opp.open_at = Some(dt);
    }
    if let Some(dt) = parse_deadline_candidate(&raw.close_iso) {
        opp.close_at = Some(dt);
    }
    if let Some(dt) = parse_deadline_candidate(&raw.expiration_iso) {
        opp.expiration_at = Some(dt);
    }

    normalize_opportunity(&mut opp);
    update_status(&mut opp, Utc::now());

    opp
}

/// Clean and standardize text fields in place.
pub fn normalize_opportunity(opp: &mut Opportunity) {
    opp.title = clean_text(&opp.title);
    opp.summary = clean_text(&opp.summary);
    opp.region = clean_text(&opp.region);
    opp.country = clean_text(&opp.country);
    opp.funder_type = clean_text(&opp.funder_type);
    opp.agency_name = clean_text(&opp.agency_name);
}

/// Run the status engine and reconcile `opp_status` with its outcome:
/// closed/archived decisions propagate to the source-facing status, and
/// empty/unknown statuses default to `posted`.
pub fn update_status(opp: &mut Opportunity, now: chrono::DateTime<chrono::Utc>) {
    let decision = compute_status_decision(opp, now);
    opp.normalized_status = decision.normalized_status;
    opp.status_reason = decision.status_reason;
    opp.status_confidence = decision.status_confidence;
    opp.next_deadline_at = decision.next_deadline_at;
    opp.is_results_page = decision.is_results_page;

    match decision.normalized_status {
        NormalizedStatus::Closed => opp.opp_status = "closed".to_string(),
        NormalizedStatus::Archived => opp.opp_status = "archived".to_string(),
        _ => {
            if opp.opp_status.is_empty() || opp.opp_status == "unknown" {
                opp.opp_status = "posted".to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn from_raw_parses_deadline_and_amount() {
        let mut extra = HashMap::new();
        extra.insert("date_locales".to_string(), "en,es".to_string());

        let raw = RawOpportunity {
            title: "  Convocatoria   Nacional  ".into(),
            description: "<p>Fondo de innovación</p>".into(),
            external_url: "https://example.org/call?utm_source=mail".into(),
            source_id: "abc".into(),
            source_domain: "example.org".into(),
            raw_deadline: "18 de febrero del 2026".into(),
            raw_amount: "hasta $120,000".into(),
            extra,
            ..Default::default()
        };

        let opp = from_raw(raw);
        assert_eq!(opp.title, "Convocatoria Nacional");
        assert_eq!(opp.canonical_url, "https://example.org/call");
        assert_eq!(opp.content_type, "html");
        assert_eq!(
            opp.deadline_at.unwrap().date_naive().to_string(),
            "2026-02-18"
        );
        assert_eq!(opp.amount_max, dec!(120000));
        assert_eq!(opp.currency, "USD");
    }

    #[test]
    fn from_raw_defaults_posted_and_needs_review() {
        let raw = RawOpportunity {
            title: "Open call".into(),
            external_url: "https://example.org/x".into(),
            source_id: "1".into(),
            source_domain: "example.org".into(),
            ..Default::default()
        };
        let opp = from_raw(raw);
        assert_eq!(opp.opp_status, "posted");
        // No dates, no rolling evidence: stays in review.
        assert_eq!(opp.normalized_status, NormalizedStatus::NeedsReview);
    }

    #[test]
    fn from_raw_is_a_fixed_point_for_text_fields() {
        let raw = RawOpportunity {
            title: "A   Title".into(),
            external_url: "https://example.org/x?ref=abc".into(),
            source_id: "1".into(),
            source_domain: "example.org".into(),
            ..Default::default()
        };
        let first = from_raw(raw);

        let again = RawOpportunity {
            title: first.title.clone(),
            external_url: first.canonical_url.clone(),
            source_id: first.source_id.clone(),
            source_domain: first.source_domain.clone(),
            ..Default::default()
        };
        let second = from_raw(again);

        assert_eq!(second.title, first.title);
        assert_eq!(second.canonical_url, first.canonical_url);
    }

    #[test]
    fn extra_rolling_flag_sets_rolling_with_evidence() {
        let mut extra = HashMap::new();
        extra.insert("is_rolling".to_string(), "true".to_string());
        let raw = RawOpportunity {
            title: "Fund".into(),
            external_url: "https://example.org/x".into(),
            source_id: "1".into(),
            source_domain: "example.org".into(),
            extra,
            ..Default::default()
        };
        let opp = from_raw(raw);
        assert!(opp.is_rolling);
        assert!(opp.rolling_evidence);
        assert_eq!(opp.normalized_status, NormalizedStatus::Open);
    }

    #[test]
    fn update_status_propagates_closed_to_opp_status() {
        let now = Utc::now();
        let mut opp = Opportunity {
            opp_status: "posted".into(),
            deadline_at: Some(now - Duration::days(1)),
            ..Default::default()
        };
        update_status(&mut opp, now);
        assert_eq!(opp.opp_status, "closed");
    }

    #[test]
    fn update_status_defaults_unknown_to_posted() {
        let now = Utc::now();
        let mut opp = Opportunity {
            opp_status: "unknown".into(),
            deadline_at: Some(now + Duration::days(1)),
            ..Default::default()
        };
        update_status(&mut opp, now);
        assert_eq!(opp.opp_status, "posted");
        assert_eq!(opp.normalized_status, NormalizedStatus::Open);
    }
}
