//! End-to-end status scenarios over the extraction and decision layers.

use chrono::{TimeZone, Utc};

use grantline_core::{DeadlineEvidence, NormalizedStatus, Opportunity};
use grantline_ingest::adapter::build_structured_extraction_text;
use grantline_ingest::evidence::parse_deadline_evidence_from_text;
use grantline_ingest::{compute_status_decision, pick_next_deadline};

/// A Spanish cronograma table fetched from gob.pe: the close-labeled date
/// must surface as a Lima end-of-day deadline and leave the record open.
#[test]
fn spanish_table_row_drives_open_status() {
    let html = r#"
    <html><body>
    <h1>Convocatoria Startup Nacional</h1>
    <table>
      <tr><th>Actividad</th><th>Fecha</th></tr>
      <tr><td>Cierre de postulaciones</td><td>18 de febrero del 2026</td></tr>
    </table>
    </body></html>"#;

    let text = build_structured_extraction_text(html).to_lowercase();
    let evidence = parse_deadline_evidence_from_text(
        &text,
        "html",
        "https://www.gob.pe/institucion/proinnovate/convocatoria",
        0.8,
    );
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].parsed_date_iso, "2026-02-19T04:59:59Z");

    let opp = Opportunity {
        title: "Convocatoria Startup Nacional".into(),
        deadline_evidence: evidence,
        ..Default::default()
    };

    let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().unwrap();
    let decision = compute_status_decision(&opp, now);

    assert_eq!(decision.normalized_status, NormalizedStatus::Open);
    assert_eq!(decision.status_reason, "future_deadline");
    assert_eq!(
        decision.next_deadline_at,
        Utc.with_ymd_and_hms(2026, 2, 19, 4, 59, 59).single()
    );
}

fn ev(iso: &str, label: &str) -> DeadlineEvidence {
    DeadlineEvidence {
        source: "html".into(),
        url: String::new(),
        snippet: label.to_string(),
        parsed_date_iso: iso.into(),
        label: label.into(),
        confidence: 0.8,
    }
}

/// The labeled close date wins over both the earlier start date and the
/// later generic deadline.
#[test]
fn labeled_close_wins_over_start() {
    let opp = Opportunity {
        deadline_evidence: vec![
            ev("2026-02-10T23:59:59Z", "inicio de postulaciones"),
            ev("2026-02-20T23:59:59Z", "cierre de postulaciones"),
            ev("2026-03-01T23:59:59Z", "deadline"),
        ],
        ..Default::default()
    };

    let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().unwrap();
    let next = pick_next_deadline(&opp, now).unwrap();
    assert_eq!(
        next,
        Utc.with_ymd_and_hms(2026, 2, 20, 23, 59, 59).single().unwrap()
    );
}

/// Results-page keywords in the title close the record at 0.99, but the
/// same word inside a URL must never trigger the rule.
#[test]
fn results_page_title_yes_results_url_no() {
    let now = Utc.with_ymd_and_hms(2026, 2, 12, 12, 0, 0).single().unwrap();

    let results = Opportunity {
        title: "ProInnóvate - Resultados finales Startup Perú".into(),
        external_url: "https://proinnovate.gob.pe/resultados-finales".into(),
        ..Default::default()
    };
    let decision = compute_status_decision(&results, now);
    assert_eq!(decision.normalized_status, NormalizedStatus::Closed);
    assert_eq!(decision.status_reason, "results_page");
    assert_eq!(decision.status_confidence, 0.99);
    assert!(decision.is_results_page);

    let detail_page = Opportunity {
        title: "Neuroscience Research Program".into(),
        external_url: "https://www.grants.gov/search-results-detail/HHS-NIH-123".into(),
        opp_status: "posted".into(),
        deadline_at: Some(now + chrono::Duration::days(30)),
        ..Default::default()
    };
    let decision = compute_status_decision(&detail_page, now);
    assert_eq!(decision.normalized_status, NormalizedStatus::Open);
    assert!(!decision.is_results_page);
}

/// A source-declared close contradicted by a future deadline lands in
/// review rather than trusting either side.
#[test]
fn inconsistent_source_and_future_date() {
    let now = Utc.with_ymd_and_hms(2026, 2, 12, 12, 0, 0).single().unwrap();
    let opp = Opportunity {
        source_status_raw: "closed".into(),
        deadline_at: Some(now + chrono::Duration::hours(72)),
        ..Default::default()
    };
    let decision = compute_status_decision(&opp, now);
    assert_eq!(decision.normalized_status, NormalizedStatus::NeedsReview);
    assert_eq!(decision.status_reason, "inconsistent_dates");
    assert_eq!(decision.status_confidence, 0.35);
}

/// Multiple legacy deadlines: the earliest strictly-future one is chosen.
#[test]
fn multi_deadline_selection() {
    let opp = Opportunity {
        deadlines: vec![
            "2026-01-01".into(),
            "2026-02-20".into(),
            "2026-03-10".into(),
        ],
        ..Default::default()
    };
    let now = Utc.with_ymd_and_hms(2026, 2, 12, 0, 0, 0).single().unwrap();
    let decision = compute_status_decision(&opp, now);
    assert_eq!(decision.normalized_status, NormalizedStatus::Open);
    assert_eq!(
        decision.next_deadline_at,
        Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).single()
    );
}
