//! Deadline-evidence extraction from free text.
//!
//! Scans text for date tokens in EN/ES surface forms and wraps each parsed
//! hit in a [`DeadlineEvidence`] record carrying the surrounding snippet,
//! a label guessed from nearby keywords, and a per-source confidence.

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use grantline_core::DeadlineEvidence;

use crate::dates::{
    has_explicit_time_token, normalize_date_only_by_source, parse_date_robust,
};

/// Label keywords recognized around a date token, most specific first.
const DEADLINE_LABEL_HINTS: &[&str] = &[
    "inicio de postulaciones",
    "cierre de postulaciones",
    "fecha máxima",
    "deadline",
    "closes",
    "fecha límite",
    "cronograma",
    "calendario",
    "postulación",
];

static DATE_SNIPPET_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b\d{1,2}/\d{1,2}/20\d{2}\b",
        r"(?i)\b20\d{2}-\d{2}-\d{2}\b",
        r"(?i)\b\d{1,2}\s+de\s+(enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre)\s+(de|del)\s+20\d{2}\b",
        r"(?i)\b\d{1,2}\s+(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+20\d{2}(\s+\d{1,2}(:\d{2})?\s*(a\.?m\.?|p\.?m\.?))?\b",
        r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2},?\s+20\d{2}(\s+\d{1,2}(:\d{2})?\s*(a\.?m\.?|p\.?m\.?))?\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// RFC 3339 with a trailing `Z`, the canonical form for `parsed_date_iso`.
pub fn to_iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Scan text for date tokens and return evidence records, deduplicated by
/// parsed timestamp and sorted ascending.
pub fn parse_deadline_evidence_from_text(
    text: &str,
    source: &str,
    source_url: &str,
    default_confidence: f64,
) -> Vec<DeadlineEvidence> {
    let locales = vec!["en".to_string(), "es".to_string()];
    let mut matches: std::collections::HashMap<String, DeadlineEvidence> =
        std::collections::HashMap::new();

    for expr in DATE_SNIPPET_REGEXES.iter() {
        for m in expr.find_iter(text) {
            let token = m.as_str().trim();
            let Ok(mut parsed) = parse_date_robust(token, &locales) else {
                continue;
            };
            if !has_explicit_time_token(token) {
                parsed = normalize_date_only_by_source(parsed, source_url);
            }
            let iso = to_iso(parsed);

            let start = floor_char_boundary(text, m.start().saturating_sub(80));
            let end = ceil_char_boundary(text, (m.end() + 80).min(text.len()));
            let snippet = text[start..end].replace('\n', " ").trim().to_string();

            let snippet_lower = snippet.to_lowercase();
            let label = DEADLINE_LABEL_HINTS
                .iter()
                .find(|hint| snippet_lower.contains(*hint))
                .copied()
                .unwrap_or("deadline");

            matches.insert(
                iso.clone(),
                DeadlineEvidence {
                    source: source.to_string(),
                    url: source_url.to_string(),
                    snippet,
                    parsed_date_iso: iso,
                    label: label.to_string(),
                    confidence: default_confidence,
                },
            );
        }
    }

    let mut ordered: Vec<DeadlineEvidence> = matches.into_values().collect();
    ordered.sort_by(|a, b| a.parsed_date_iso.cmp(&b.parsed_date_iso));
    ordered
}

/// Unique ISO timestamps parsed from text, in ascending order.
pub fn parse_date_candidates_from_text(text: &str) -> Vec<String> {
    parse_deadline_evidence_from_text(text, "text", "", 0.7)
        .into_iter()
        .map(|ev| ev.parsed_date_iso)
        .collect()
}

/// Pick the evidence entry most likely to be the actual close date: the
/// earliest close-labeled future entry, else the earliest future entry,
/// else the last entry.
pub fn pick_preferred_close_evidence<'a>(
    evidence: &'a [DeadlineEvidence],
    now: DateTime<Utc>,
) -> Option<&'a DeadlineEvidence> {
    if evidence.is_empty() {
        return None;
    }

    const CLOSE_HINTS: &[&str] = &[
        "cierre",
        "deadline",
        "postul",
        "submission",
        "closes",
        "fecha máxima",
        "fecha limite",
    ];
    const START_HINTS: &[&str] = &["inicio", "apertura", "start", "opening"];

    let mut preferred: Option<&DeadlineEvidence> = None;
    for ev in evidence {
        let label = format!("{} {}", ev.label, ev.snippet).to_lowercase();
        if !CLOSE_HINTS.iter().any(|hint| label.contains(hint)) {
            continue;
        }
        if START_HINTS.iter().any(|hint| label.contains(hint)) {
            continue;
        }
        let Some(ts) = parse_iso(&ev.parsed_date_iso) else {
            continue;
        };
        if ts <= now {
            continue;
        }
        match preferred {
            Some(prev) => {
                if parse_iso(&prev.parsed_date_iso).map_or(true, |p| ts < p) {
                    preferred = Some(ev);
                }
            }
            None => preferred = Some(ev),
        }
    }

    if preferred.is_some() {
        return preferred;
    }

    evidence
        .iter()
        .find(|ev| parse_iso(&ev.parsed_date_iso).map_or(false, |ts| ts > now))
        .or(evidence.last())
}

fn parse_iso(iso: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn multilingual_candidates_are_extracted() {
        let text = "Submission closes on 17 June 2025 1 p.m. and final date 30/06/2025.\n\
                    También: fecha de cierre 21 de julio del 2025.";

        let candidates = parse_date_candidates_from_text(text);
        assert!(candidates.len() >= 3, "got {:?}", candidates);

        let joined = candidates.join("|");
        assert!(joined.contains("2025-06-17"), "{}", joined);
        assert!(joined.contains("2025-06-30"), "{}", joined);
        assert!(joined.contains("2025-07-21"), "{}", joined);
    }

    #[test]
    fn snippet_and_label_are_attached() {
        let text = "Cronograma: cierre de postulaciones 18 de febrero del 2026 a nivel nacional";
        let evidence = parse_deadline_evidence_from_text(
            text,
            "html",
            "https://www.gob.pe/convocatoria",
            0.8,
        );
        assert_eq!(evidence.len(), 1);
        let ev = &evidence[0];
        assert_eq!(ev.source, "html");
        assert_eq!(ev.confidence, 0.8);
        assert_eq!(ev.label, "cierre de postulaciones");
        assert!(ev.snippet.contains("18 de febrero del 2026"));
        // Date-only snippet from a gob.pe source: Lima end-of-day in UTC.
        assert_eq!(ev.parsed_date_iso, "2026-02-19T04:59:59Z");
    }

    #[test]
    fn snippet_collapses_newlines() {
        let text = "first line\ndeadline 2026-03-10\nlast line";
        let evidence = parse_deadline_evidence_from_text(text, "pdf", "", 0.85);
        assert_eq!(evidence.len(), 1);
        assert!(!evidence[0].snippet.contains('\n'));
        assert_eq!(evidence[0].label, "deadline");
    }

    #[test]
    fn duplicate_dates_collapse_to_one_entry() {
        let text = "cierre 2026-05-01 ... repetido 2026-05-01";
        let evidence = parse_deadline_evidence_from_text(text, "html", "", 0.8);
        assert_eq!(evidence.len(), 1);
    }

    #[test]
    fn preferred_close_evidence_skips_start_labels() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().unwrap();
        let evidence = vec![
            DeadlineEvidence {
                source: "html".into(),
                url: String::new(),
                snippet: "Inicio de postulaciones".into(),
                parsed_date_iso: "2026-02-10T23:59:59Z".into(),
                label: "inicio de postulaciones".into(),
                confidence: 0.8,
            },
            DeadlineEvidence {
                source: "html".into(),
                url: String::new(),
                snippet: "Cierre de postulaciones".into(),
                parsed_date_iso: "2026-02-20T23:59:59Z".into(),
                label: "cierre de postulaciones".into(),
                confidence: 0.8,
            },
        ];

        let best = pick_preferred_close_evidence(&evidence, now).unwrap();
        assert_eq!(best.parsed_date_iso, "2026-02-20T23:59:59Z");
    }

    #[test]
    fn all_past_evidence_falls_back_to_last() {
        let now = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).single().unwrap();
        let evidence = vec![DeadlineEvidence {
            source: "html".into(),
            url: String::new(),
            snippet: "deadline".into(),
            parsed_date_iso: "2026-02-20T23:59:59Z".into(),
            label: "deadline".into(),
            confidence: 0.8,
        }];
        let best = pick_preferred_close_evidence(&evidence, now).unwrap();
        assert_eq!(best.parsed_date_iso, "2026-02-20T23:59:59Z");
    }
}
