//! Multilingual (EN/ES) date parsing.
//!
//! Resolution order: ISO-8601, then a catalog of English formats (with and
//! without time), then Spanish formats via month-name substitution and
//! "de/del" elision, then regex fallbacks. Dates without an explicit time
//! component are normalized to 23:59:59 UTC; sources in Peru
//! (gob.pe / proinnovate / prociencia) get end-of-day in America/Lima.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Lima;
use once_cell::sync::Lazy;
use regex::Regex;

use grantline_core::{Error, Result};

const EN_DATETIME_FORMATS: &[&str] = &[
    "%d %B %Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%m/%d/%Y %I:%M %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

const EN_DATE_FORMATS: &[&str] = &[
    "%d %B %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %b %Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
];

const ES_MONTHS: &[(&str, &str)] = &[
    ("septiembre", "September"),
    ("diciembre", "December"),
    ("noviembre", "November"),
    ("febrero", "February"),
    ("octubre", "October"),
    ("enero", "January"),
    ("marzo", "March"),
    ("abril", "April"),
    ("agosto", "August"),
    ("junio", "June"),
    ("julio", "July"),
    ("mayo", "May"),
];

static HOUR_AMPM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\s+(AM|PM)\b").expect("valid regex"));

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(20\d{2})-(\d{2})-(\d{2})\b").expect("valid regex"));

static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(20\d{2})\b").expect("valid regex"));

static MONTH_NAME_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+(\d{1,2}),?\s+(20\d{2})\b",
    )
    .expect("valid regex")
});

static ES_MONTH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\s+de\s+(enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre)\s+(?:de|del)\s+(20\d{2})\b",
    )
    .expect("valid regex")
});

/// Parse a date snippet in multiple formats and locales.
///
/// Locale hints are short codes (`en`, `es`); Spanish formats are only tried
/// when an `es` hint is present.
pub fn parse_date_robust(text: &str, locales: &[String]) -> Result<DateTime<Utc>> {
    let mut text = clean_date_string(text);
    for (from, to) in [
        ("a.m.", "AM"),
        ("p.m.", "PM"),
        ("a.m", "AM"),
        ("p.m", "PM"),
        (" am", " AM"),
        (" pm", " PM"),
    ] {
        text = text.replace(from, to);
    }
    // "3 PM" carries no minutes; give it some so the time formats apply.
    let text = HOUR_AMPM.replace_all(&text, "$1:00 $2").into_owned();

    if let Ok(t) = DateTime::parse_from_rfc3339(&text) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        return Ok(end_of_day_utc(d));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%SZ") {
        return Ok(Utc.from_utc_datetime(&t));
    }

    for format in EN_DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(&text, format) {
            return Ok(Utc.from_utc_datetime(&t));
        }
    }
    for format in EN_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&text, format) {
            return Ok(end_of_day_utc(d));
        }
    }

    if locales.iter().any(|l| l.starts_with("es")) {
        let anglicized = anglicize_spanish(&text);
        for format in EN_DATE_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(&anglicized, format) {
                return Ok(end_of_day_utc(d));
            }
        }
        if let Some(d) = spanish_date_from_regex(&text) {
            return Ok(end_of_day_utc(d));
        }
    }

    if let Some(d) = date_from_regex(&text) {
        return Ok(end_of_day_utc(d));
    }

    Err(Error::Parse(format!("unable to parse date: {}", text)))
}

/// Parse an ISO-ish deadline candidate. Unlike [`parse_date_robust`] this
/// accepts only structured forms and does not shift to end-of-day.
pub fn parse_deadline_candidate(raw: &str) -> Option<DateTime<Utc>> {
    grantline_core::parse_iso_candidate(raw)
}

/// 23:59:59 UTC on the given calendar day.
pub fn end_of_day_utc(d: NaiveDate) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(d.year(), d.month(), d.day(), 23, 59, 59)
        .single()
        .unwrap_or_else(|| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap_or_default()))
}

/// True when a snippet carries an explicit time component (clock separator,
/// am/pm, timezone words, "hora"/"hrs").
pub fn has_explicit_time_token(token: &str) -> bool {
    let lower = token.to_lowercase();
    if lower.contains(':') {
        return true;
    }
    [" am", " pm", "a.m", "p.m", "utc", "gmt", "hora", "hrs"]
        .iter()
        .any(|hint| lower.contains(hint))
}

/// Re-anchor a date-only timestamp to end-of-day in the source's timezone.
///
/// Peruvian government sources publish deadlines in local time; everyone
/// else gets UTC end-of-day.
pub fn normalize_date_only_by_source(parsed: DateTime<Utc>, source_url: &str) -> DateTime<Utc> {
    let lower = source_url.to_lowercase();
    let peruvian = lower.contains("gob.pe")
        || lower.contains("proinnovate")
        || lower.contains("prociencia");

    if peruvian {
        if let Some(local) = Lima
            .with_ymd_and_hms(parsed.year(), parsed.month(), parsed.day(), 23, 59, 59)
            .single()
        {
            return local.with_timezone(&Utc);
        }
    }

    Utc.with_ymd_and_hms(parsed.year(), parsed.month(), parsed.day(), 23, 59, 59)
        .single()
        .unwrap_or(parsed)
}

fn anglicize_spanish(text: &str) -> String {
    let mut out = text.to_lowercase();
    for (es, en) in ES_MONTHS {
        out = out.replace(es, en);
    }
    out = out.replace(" del ", " ");
    out = out.replace(" de ", " ");
    out
}

fn date_from_regex(text: &str) -> Option<NaiveDate> {
    if let Some(m) = ISO_DATE.captures(text) {
        if let Ok(d) = NaiveDate::parse_from_str(m.get(0)?.as_str(), "%Y-%m-%d") {
            return Some(d);
        }
    }

    if let Some(m) = SLASH_DATE.captures(text) {
        let a: u32 = m.get(1)?.as_str().parse().ok()?;
        let b: u32 = m.get(2)?.as_str().parse().ok()?;
        let year: i32 = m.get(3)?.as_str().parse().ok()?;
        // US month/day first, then day/month.
        if let Some(d) = NaiveDate::from_ymd_opt(year, a, b) {
            return Some(d);
        }
        if let Some(d) = NaiveDate::from_ymd_opt(year, b, a) {
            return Some(d);
        }
    }

    if let Some(m) = MONTH_NAME_DATE.captures(text) {
        let candidate = format!(
            "{} {} {}",
            m.get(1)?.as_str(),
            m.get(2)?.as_str(),
            m.get(3)?.as_str()
        );
        for format in ["%B %d %Y", "%b %d %Y"] {
            if let Ok(d) = NaiveDate::parse_from_str(&candidate, format) {
                return Some(d);
            }
        }
    }

    None
}

fn spanish_date_from_regex(text: &str) -> Option<NaiveDate> {
    let m = ES_MONTH_DATE.captures(text)?;
    let day = m.get(1)?.as_str();
    let month_es = m.get(2)?.as_str().to_lowercase();
    let year = m.get(3)?.as_str();

    let month_en = ES_MONTHS
        .iter()
        .find(|(es, _)| *es == month_es)
        .map(|(_, en)| *en)?;

    NaiveDate::parse_from_str(&format!("{} {} {}", day, month_en, year), "%d %B %Y").ok()
}

fn clean_date_string(s: &str) -> String {
    const PREFIXES: &[&str] = &[
        "closing date:",
        "deadline:",
        "open:",
        "publication date:",
        "fecha límite:",
        "fecha de cierre:",
        "cierre:",
        "due date:",
        "expires:",
        "ends:",
    ];

    let mut out = s.to_string();
    loop {
        let lower = out.to_lowercase();
        let mut stripped = false;
        for p in PREFIXES {
            if let Some(idx) = lower.find(p) {
                out = out[idx + p.len()..].to_string();
                stripped = true;
                break;
            }
        }
        if !stripped {
            break;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn en() -> Vec<String> {
        vec!["en".to_string()]
    }

    fn en_es() -> Vec<String> {
        vec!["en".to_string(), "es".to_string()]
    }

    #[test]
    fn parses_rfc3339_as_is() {
        let t = parse_date_robust("2026-03-15T17:00:00Z", &en()).unwrap();
        assert_eq!(t.to_rfc3339(), "2026-03-15T17:00:00+00:00");
    }

    #[test]
    fn iso_date_only_becomes_end_of_day() {
        let t = parse_date_robust("2026-03-15", &en()).unwrap();
        assert_eq!(t.to_rfc3339(), "2026-03-15T23:59:59+00:00");
    }

    #[test]
    fn parses_english_with_hour_only_time() {
        let t = parse_date_robust("17 June 2025 1 p.m.", &en()).unwrap();
        assert_eq!(t.to_rfc3339(), "2025-06-17T13:00:00+00:00");
    }

    #[test]
    fn parses_english_month_day_year() {
        let t = parse_date_robust("March 15, 2026", &en()).unwrap();
        assert_eq!(t.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        assert_eq!(t.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn parses_spanish_with_del_elision() {
        let t = parse_date_robust("18 de febrero del 2026", &en_es()).unwrap();
        assert_eq!(t.date_naive(), NaiveDate::from_ymd_opt(2026, 2, 18).unwrap());
    }

    #[test]
    fn parses_spanish_inside_surrounding_text() {
        let t = parse_date_robust("fecha de cierre 21 de julio de 2025", &en_es()).unwrap();
        assert_eq!(t.date_naive(), NaiveDate::from_ymd_opt(2025, 7, 21).unwrap());
    }

    #[test]
    fn strips_label_prefixes() {
        let t = parse_date_robust("Deadline: 2026-05-01", &en()).unwrap();
        assert_eq!(t.date_naive(), NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
    }

    #[test]
    fn slash_dates_prefer_month_first_then_day_first() {
        let us = parse_date_robust("03/15/2026", &en()).unwrap();
        assert_eq!(us.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 15).unwrap());
        // 30/06/2025 is only valid day-first.
        let uk = parse_date_robust("final date 30/06/2025.", &en()).unwrap();
        assert_eq!(uk.date_naive(), NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());
    }

    #[test]
    fn unparseable_input_errors() {
        assert!(parse_date_robust("next spring", &en_es()).is_err());
    }

    #[test]
    fn deadline_candidate_keeps_midnight() {
        let t = parse_deadline_candidate("2026-02-20").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-02-20T00:00:00+00:00");
        assert!(parse_deadline_candidate("").is_none());
        assert!(parse_deadline_candidate("soon").is_none());
    }

    #[test]
    fn explicit_time_tokens() {
        assert!(has_explicit_time_token("17:00 GMT"));
        assert!(has_explicit_time_token("1 p.m."));
        assert!(has_explicit_time_token("23 hrs"));
        assert!(!has_explicit_time_token("18 de febrero del 2026"));
    }

    #[test]
    fn peruvian_sources_close_at_lima_end_of_day() {
        let parsed = Utc.with_ymd_and_hms(2026, 2, 18, 0, 0, 0).single().unwrap();
        let normalized = normalize_date_only_by_source(
            parsed,
            "https://www.gob.pe/institucion/proinnovate/campanas/x",
        );
        // 23:59:59 America/Lima (UTC-5) = 04:59:59 UTC next day.
        assert_eq!(normalized.to_rfc3339(), "2026-02-19T04:59:59+00:00");
    }

    #[test]
    fn other_sources_close_at_utc_end_of_day() {
        let parsed = Utc.with_ymd_and_hms(2026, 2, 18, 0, 0, 0).single().unwrap();
        let normalized = normalize_date_only_by_source(parsed, "https://www.ukri.org/opportunity/x");
        assert_eq!(normalized.to_rfc3339(), "2026-02-18T23:59:59+00:00");
    }
}
