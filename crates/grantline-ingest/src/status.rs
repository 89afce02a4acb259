//! Evidence-backed status engine.
//!
//! [`compute_status_decision`] is a pure function from an opportunity and a
//! clock to a [`StatusDecision`]; the pipeline stamps its output onto the
//! record and is the sole writer of the derived lifecycle fields.

use chrono::{DateTime, Utc};

use grantline_core::{NormalizedStatus, Opportunity, StatusDecision};

use crate::dates::parse_deadline_candidate;
use crate::text::html_to_text;

/// Phrases indicating a page is displaying results/winners rather than an
/// active call. Matched against title, summary, description and
/// source_status_raw, never against URLs: detail URLs like
/// `grants.gov/search-results-detail/...` contain "results" but are active.
const RESULTS_KEYWORDS: &[&str] = &[
    "resultados finales",
    "ganadores",
    "final results",
    "winners announced",
    "awards announced",
    "awarded to",
    "awardees selected",
    "convocatoria cerrada",
    "cierre de postulaciones",
    "results published",
    "results available",
    "ranking final",
];

const ROLLING_HINTS: &[&str] = &[
    "rolling",
    "rolling basis",
    "open continuously",
    "ongoing call",
    "open until filled",
    "no deadline",
    "ventanilla abierta",
    "convocatoria permanente",
    "sin fecha límite",
    "abierta permanentemente",
];

fn decision(
    status: NormalizedStatus,
    reason: &str,
    confidence: f64,
    next_deadline: Option<DateTime<Utc>>,
) -> StatusDecision {
    StatusDecision {
        normalized_status: status,
        status_reason: reason.to_string(),
        status_confidence: confidence,
        next_deadline_at: next_deadline,
        is_results_page: false,
    }
}

/// Derive the normalized lifecycle status for an opportunity.
///
/// Rules are evaluated in order; the first match wins.
pub fn compute_status_decision(opp: &Opportunity, now: DateTime<Utc>) -> StatusDecision {
    let next_deadline = pick_next_deadline(opp, now);
    let is_results = detect_results_page(opp);
    let has_rolling_evidence = detect_rolling_evidence(opp);

    if is_results || opp.is_results_page {
        return StatusDecision {
            normalized_status: NormalizedStatus::Closed,
            status_reason: "results_page".to_string(),
            status_confidence: 0.99,
            next_deadline_at: next_deadline,
            is_results_page: true,
        };
    }

    let mut mapped_source = map_source_status_raw(&opp.source_status_raw);
    if mapped_source.is_empty() {
        mapped_source = map_source_status_raw(&opp.opp_status);
    }

    if mapped_source == "archived" {
        return decision(NormalizedStatus::Archived, "source_archived", 0.95, next_deadline);
    }

    if mapped_source == "closed" {
        let contradicted = has_rolling_evidence
            || next_deadline.map_or(false, |d| d > now)
            || opp.close_at.map_or(false, |c| c > now);
        if contradicted {
            return decision(NormalizedStatus::NeedsReview, "inconsistent_dates", 0.35, next_deadline);
        }
        return decision(NormalizedStatus::Closed, "source_closed", 0.92, next_deadline);
    }

    if opp.open_at.map_or(false, |o| o > now) {
        return decision(NormalizedStatus::Upcoming, "open_date_in_future", 0.9, next_deadline);
    }

    if opp.is_rolling && !has_rolling_evidence {
        return decision(
            NormalizedStatus::NeedsReview,
            "rolling_without_evidence",
            0.2,
            next_deadline,
        );
    }

    if has_rolling_evidence {
        return decision(NormalizedStatus::Open, "rolling_open", 0.96, next_deadline);
    }

    if next_deadline.map_or(false, |d| d > now) {
        return decision(NormalizedStatus::Open, "future_deadline", 0.93, next_deadline);
    }

    if opp.close_at.map_or(false, |c| c > now) {
        return decision(NormalizedStatus::Open, "future_close_date", 0.9, next_deadline);
    }

    if opp.close_at.map_or(false, |c| c <= now) {
        return decision(NormalizedStatus::Closed, "close_date_passed", 0.94, next_deadline);
    }

    if opp.expiration_at.map_or(false, |e| e <= now) {
        return decision(NormalizedStatus::Closed, "expiration_passed", 0.9, next_deadline);
    }

    if opp.deadline_at.map_or(false, |d| d <= now) {
        return decision(NormalizedStatus::Closed, "deadline_passed", 0.95, next_deadline);
    }

    if has_any_deadline_evidence(opp) && !has_future_deadline_evidence(opp, now) {
        return decision(NormalizedStatus::Closed, "deadline_passed", 0.95, next_deadline);
    }

    if mapped_source == "upcoming" {
        return decision(NormalizedStatus::Upcoming, "source_upcoming", 0.75, next_deadline);
    }

    if mapped_source == "open" {
        return decision(
            NormalizedStatus::NeedsReview,
            "source_open_without_time_evidence",
            0.3,
            next_deadline,
        );
    }

    if next_deadline.is_none() && !has_rolling_evidence && opp.close_at.map_or(true, |c| c <= now) {
        return decision(NormalizedStatus::NeedsReview, "missing_deadline", 0.25, None);
    }

    decision(NormalizedStatus::NeedsReview, "inconsistent_dates", 0.4, next_deadline)
}

/// True when explicit textual or structured rolling evidence exists.
pub fn detect_rolling_evidence(opp: &Opportunity) -> bool {
    if opp.rolling_evidence {
        return true;
    }

    let joined = format!(
        "{} \n {} \n {} \n {} \n {}",
        opp.source_status_raw,
        opp.opp_status,
        opp.title,
        opp.summary,
        html_to_text(&opp.description_html)
    )
    .to_lowercase();

    if ROLLING_HINTS.iter().any(|hint| joined.contains(hint)) {
        return true;
    }

    opp.source_evidence_json
        .get("rolling_evidence")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Select the next deadline: the earliest strictly-future close-labeled
/// evidence entry wins; otherwise the earliest strictly-future candidate;
/// otherwise the stored `next_deadline_at`.
pub fn pick_next_deadline(opp: &Opportunity, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut candidates: Vec<DateTime<Utc>> = Vec::with_capacity(opp.deadlines.len() + 2);
    let mut labeled_close_best: Option<DateTime<Utc>> = None;

    for raw in &opp.deadlines {
        if let Some(t) = parse_deadline_candidate(raw) {
            candidates.push(t);
        }
    }

    for ev in &opp.deadline_evidence {
        let Some(t) = parse_deadline_candidate(&ev.parsed_date_iso) else {
            continue;
        };
        candidates.push(t);

        let label = format!("{} {}", ev.label, ev.snippet).to_lowercase();
        let is_start_like = label.contains("inicio")
            || label.contains("apertura")
            || label.contains("start")
            || label.contains("opening");
        let is_close_like = label.contains("cierre")
            || label.contains("deadline")
            || label.contains("closes")
            || label.contains("submission")
            || (label.contains("postul") && !is_start_like);

        if is_close_like && !is_start_like && t > now {
            labeled_close_best = match labeled_close_best {
                Some(best) if best <= t => Some(best),
                _ => Some(t),
            };
        }
    }

    if labeled_close_best.is_some() {
        return labeled_close_best;
    }

    if let Some(t) = opp.next_deadline_at {
        candidates.push(t);
    }
    if let Some(t) = opp.deadline_at {
        candidates.push(t);
    }

    let best = candidates.into_iter().filter(|t| *t > now).min();
    if best.is_some() {
        return best;
    }

    opp.next_deadline_at
}

fn has_any_deadline_evidence(opp: &Opportunity) -> bool {
    !opp.deadline_evidence.is_empty()
        || !opp.deadlines.is_empty()
        || opp.deadline_at.is_some()
        || opp.next_deadline_at.is_some()
}

fn has_future_deadline_evidence(opp: &Opportunity, now: DateTime<Utc>) -> bool {
    if pick_next_deadline(opp, now).map_or(false, |next| next > now) {
        return true;
    }
    opp.close_at.map_or(false, |c| c > now)
}

fn detect_results_page(opp: &Opportunity) -> bool {
    // The source explicitly declaring an active status wins over keywords.
    let src_lower = opp.opp_status.to_lowercase();
    if matches!(src_lower.as_str(), "posted" | "active" | "open" | "forecasted") {
        return false;
    }

    let text = format!(
        "{} \n {} \n {} \n {}",
        opp.title,
        opp.summary,
        html_to_text(&opp.description_html),
        opp.source_status_raw
    )
    .to_lowercase();

    RESULTS_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

/// Map a verbatim source status to one of `closed`, `archived`, `upcoming`,
/// `open`, or empty when unrecognized.
pub fn map_source_status_raw(raw: &str) -> &'static str {
    let raw = raw.trim().to_lowercase();
    if raw.is_empty() {
        return "";
    }

    const CLOSED: &[&str] = &[
        "closed", "cerrad", "finaliz", "cancel", "funded", "expired", "no longer accepting",
    ];
    if CLOSED.iter().any(|h| raw.contains(h)) {
        return "closed";
    }

    const ARCHIVED: &[&str] = &[
        "archived", "historic", "results", "winners", "awardees", "ganadores", "resultados",
    ];
    if ARCHIVED.iter().any(|h| raw.contains(h)) {
        return "archived";
    }

    const UPCOMING: &[&str] = &["forthcoming", "upcoming", "coming soon", "próxim", "anticipated"];
    if UPCOMING.iter().any(|h| raw.contains(h)) {
        return "upcoming";
    }

    const OPEN: &[&str] = &["open", "posted", "active", "abierta", "vigente", "rolling"];
    if OPEN.iter().any(|h| raw.contains(h)) {
        return "open";
    }

    ""
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use grantline_core::DeadlineEvidence;

    fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).single().unwrap()
    }

    fn evidence(iso: &str, label: &str, snippet: &str) -> DeadlineEvidence {
        DeadlineEvidence {
            source: "html".into(),
            url: String::new(),
            snippet: snippet.into(),
            parsed_date_iso: iso.into(),
            label: label.into(),
            confidence: 0.8,
        }
    }

    #[test]
    fn results_page_closes_with_high_confidence() {
        let opp = Opportunity {
            title: "ProInnóvate - Resultados finales Startup Perú".into(),
            summary: "Publicación de ganadores".into(),
            external_url: "https://proinnovate.gob.pe/resultados-finales".into(),
            ..Default::default()
        };

        let d = compute_status_decision(&opp, at(2026, 2, 12));
        assert_eq!(d.normalized_status, NormalizedStatus::Closed);
        assert_eq!(d.status_reason, "results_page");
        assert_eq!(d.status_confidence, 0.99);
        assert!(d.is_results_page);
    }

    #[test]
    fn url_with_results_substring_does_not_trigger_results_rule() {
        let now = at(2026, 2, 12);
        let opp = Opportunity {
            title: "Neuroscience Research Program".into(),
            external_url: "https://www.grants.gov/search-results-detail/HHS-NIH-123".into(),
            opp_status: "posted".into(),
            deadline_at: Some(now + Duration::days(30)),
            ..Default::default()
        };

        let d = compute_status_decision(&opp, now);
        assert_eq!(d.normalized_status, NormalizedStatus::Open);
        assert_eq!(d.status_reason, "future_deadline");
        assert!(!d.is_results_page);
    }

    #[test]
    fn past_deadline_closes() {
        let now = at(2026, 2, 12);
        let opp = Opportunity {
            deadline_at: Some(now - Duration::hours(48)),
            ..Default::default()
        };
        let d = compute_status_decision(&opp, now);
        assert_eq!(d.normalized_status, NormalizedStatus::Closed);
        assert_eq!(d.status_reason, "deadline_passed");
    }

    #[test]
    fn rolling_with_evidence_is_open() {
        let opp = Opportunity {
            is_rolling: true,
            source_status_raw: "rolling call".into(),
            ..Default::default()
        };
        let d = compute_status_decision(&opp, at(2026, 2, 12));
        assert_eq!(d.normalized_status, NormalizedStatus::Open);
        assert_eq!(d.status_reason, "rolling_open");
        assert_eq!(d.status_confidence, 0.96);
    }

    #[test]
    fn rolling_without_evidence_needs_review() {
        let opp = Opportunity {
            is_rolling: true,
            source_status_raw: "open".into(),
            ..Default::default()
        };
        let d = compute_status_decision(&opp, at(2026, 2, 12));
        assert_eq!(d.normalized_status, NormalizedStatus::NeedsReview);
        assert_eq!(d.status_reason, "rolling_without_evidence");
    }

    #[test]
    fn source_open_without_dates_needs_review() {
        let opp = Opportunity {
            source_status_raw: "open".into(),
            ..Default::default()
        };
        let d = compute_status_decision(&opp, at(2026, 2, 12));
        assert_eq!(d.normalized_status, NormalizedStatus::NeedsReview);
        assert_eq!(d.status_reason, "source_open_without_time_evidence");
    }

    #[test]
    fn closed_source_with_future_deadline_is_inconsistent() {
        let now = at(2026, 2, 12);
        let opp = Opportunity {
            source_status_raw: "closed".into(),
            deadline_at: Some(now + Duration::hours(72)),
            ..Default::default()
        };
        let d = compute_status_decision(&opp, now);
        assert_eq!(d.normalized_status, NormalizedStatus::NeedsReview);
        assert_eq!(d.status_reason, "inconsistent_dates");
        assert_eq!(d.status_confidence, 0.35);
    }

    #[test]
    fn future_open_date_is_upcoming() {
        let now = at(2026, 2, 12);
        let opp = Opportunity {
            open_at: Some(now + Duration::days(10)),
            ..Default::default()
        };
        let d = compute_status_decision(&opp, now);
        assert_eq!(d.normalized_status, NormalizedStatus::Upcoming);
        assert_eq!(d.status_reason, "open_date_in_future");
    }

    #[test]
    fn multiple_deadlines_pick_earliest_future() {
        let opp = Opportunity {
            deadlines: vec![
                "2026-01-01".into(),
                "2026-02-20".into(),
                "2026-03-10".into(),
            ],
            ..Default::default()
        };
        let d = compute_status_decision(&opp, at(2026, 2, 12));
        assert_eq!(d.normalized_status, NormalizedStatus::Open);
        let expected = Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).single().unwrap();
        assert_eq!(d.next_deadline_at, Some(expected));
    }

    #[test]
    fn labeled_close_beats_earlier_start_and_later_generic() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().unwrap();
        let opp = Opportunity {
            deadline_evidence: vec![
                evidence("2026-02-10T23:59:59Z", "inicio de postulaciones", "Inicio de postulaciones"),
                evidence("2026-02-20T23:59:59Z", "cierre de postulaciones", "Cierre de postulaciones"),
                evidence("2026-03-01T23:59:59Z", "deadline", "Submission deadline"),
            ],
            ..Default::default()
        };

        let next = pick_next_deadline(&opp, now).unwrap();
        assert_eq!(
            next,
            Utc.with_ymd_and_hms(2026, 2, 20, 23, 59, 59).single().unwrap()
        );
    }

    #[test]
    fn next_deadline_is_always_future_when_derivable() {
        let now = at(2026, 2, 12);
        let opp = Opportunity {
            deadlines: vec!["2025-01-01".into(), "2026-06-01".into()],
            ..Default::default()
        };
        let next = pick_next_deadline(&opp, now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn decision_is_pure() {
        let now = at(2026, 2, 12);
        let opp = Opportunity {
            source_status_raw: "open".into(),
            deadlines: vec!["2026-05-01".into()],
            ..Default::default()
        };
        assert_eq!(
            compute_status_decision(&opp, now),
            compute_status_decision(&opp, now)
        );
    }

    #[test]
    fn source_status_mapping() {
        assert_eq!(map_source_status_raw("Convocatoria CERRADA"), "closed");
        assert_eq!(map_source_status_raw("no longer accepting applications"), "closed");
        assert_eq!(map_source_status_raw("resultados"), "archived");
        assert_eq!(map_source_status_raw("coming soon"), "upcoming");
        assert_eq!(map_source_status_raw("vigente"), "open");
        assert_eq!(map_source_status_raw(""), "");
        assert_eq!(map_source_status_raw("tbd"), "");
    }

    #[test]
    fn archived_source_is_archived() {
        let opp = Opportunity {
            source_status_raw: "archived".into(),
            ..Default::default()
        };
        let d = compute_status_decision(&opp, at(2026, 2, 12));
        assert_eq!(d.normalized_status, NormalizedStatus::Archived);
        assert_eq!(d.status_reason, "source_archived");
    }

    #[test]
    fn no_dates_no_rolling_is_missing_deadline() {
        let opp = Opportunity::default();
        let d = compute_status_decision(&opp, at(2026, 2, 12));
        assert_eq!(d.normalized_status, NormalizedStatus::NeedsReview);
        assert_eq!(d.status_reason, "missing_deadline");
        assert_eq!(d.next_deadline_at, None);
    }
}
