//! LLM-backed extraction of structured opportunity data from page text.

use serde::Deserialize;
use tracing::{debug, warn};

use grantline_core::{Error, GenerationBackend, Result};

/// Structured output of the extraction prompt.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedData {
    pub deadline_text: Option<String>,
    pub deadline_iso: Option<String>,
    pub open_date_iso: Option<String>,
    pub open_iso: Option<String>,
    pub close_iso: Option<String>,
    pub expiration_iso: Option<String>,
    pub deadline_candidates: Vec<String>,
    pub source_status_raw: Option<String>,
    pub is_results_page: bool,
    pub is_rolling: bool,
    /// posted, closed, archived, funded
    pub opp_status: Option<String>,
    pub amount_min: f64,
    pub amount_max: f64,
    pub currency: Option<String>,
    pub eligibility: Option<String>,
    pub categories: Vec<String>,
    pub summary: Option<String>,
}

fn extraction_prompt(title: &str, url: &str, text: &str) -> String {
    format!(
        r#"You are an expert grant analyst. Extract key information from the following grant opportunity text into JSON format.

Input:
Title: {title}
URL: {url}
Text:
{text}

Instructions:
1. Extract date candidates in deadline_candidates (ISO 8601 YYYY-MM-DD), including multiple receipt/cycle deadlines if present.
2. If a main deadline is obvious, also fill deadline_iso.
3. Extract source_status_raw exactly as text seen in source (examples: "open", "closed", "results", "winners announced", "finalizado").
4. Extract is_results_page=true if this page is clearly results/winners/ranking/historical, else false.
5. Extract open_iso / close_iso / expiration_iso when explicitly present.
6. If descriptions like "until funds exhausted", "open all year", or "ventanilla abierta", set is_rolling=true.
7. Extract amount_min and amount_max as numbers, currency as a 3-letter ISO code (e.g. USD, PEN, EUR, GBP).
8. Summary: write a 1-2 sentence neutral summary.
9. Categories: list 1-3 tags (e.g. "Research", "Innovation", "Scholarship").

JSON Schema:
{{
    "deadline_text": "string or null",
    "deadline_iso": "YYYY-MM-DD or null",
    "deadline_candidates": ["YYYY-MM-DD"],
    "source_status_raw": "string or null",
    "is_results_page": false,
    "open_date_iso": "YYYY-MM-DD or null",
    "open_iso": "YYYY-MM-DD or null",
    "close_iso": "YYYY-MM-DD or null",
    "expiration_iso": "YYYY-MM-DD or null",
    "is_rolling": false,
    "opp_status": "posted" | "closed" | "archived" | "funded",
    "amount_min": 0,
    "amount_max": 0,
    "currency": "3-letter ISO code or null",
    "eligibility": "string",
    "categories": ["string"],
    "summary": "string"
}}

Respond ONLY with the JSON object."#
    )
}

/// Extract structured data from opportunity text.
///
/// Tries the backend's JSON mode first; on a parse failure, retries in text
/// mode and recovers the first balanced JSON object from the response.
pub async fn extract_opportunity_data(
    backend: &dyn GenerationBackend,
    title: &str,
    url: &str,
    text: &str,
) -> Result<ExtractedData> {
    let prompt = extraction_prompt(title, url, text);

    match backend.generate_json(&prompt).await {
        Ok(resp) => match parse_llm_response(&resp) {
            Ok(data) => return Ok(data),
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "extract",
                    error = %e,
                    "JSON mode response failed parsing, retrying in text mode"
                );
            }
        },
        Err(e) => {
            warn!(
                subsystem = "inference",
                component = "extract",
                error = %e,
                "JSON mode generation failed, retrying in text mode"
            );
        }
    }

    let resp = backend.generate(&prompt).await?;
    debug!(
        subsystem = "inference",
        component = "extract",
        response_len = resp.len(),
        "Text mode fallback response"
    );
    parse_llm_response(&resp)
}

/// Parse an LLM response into [`ExtractedData`], stripping markdown fences
/// and recovering the first balanced JSON object.
pub fn parse_llm_response(resp: &str) -> Result<ExtractedData> {
    let mut cleaned = resp.trim();
    cleaned = cleaned.strip_prefix("```json").unwrap_or(cleaned);
    cleaned = cleaned.strip_prefix("```").unwrap_or(cleaned);
    cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned);

    let candidate = extract_first_json_object(cleaned).unwrap_or_else(|| cleaned.to_string());

    serde_json::from_str(&candidate)
        .map_err(|e| Error::Serialization(format!("invalid extraction payload: {}", e)))
}

/// Find the first outermost balanced `{...}` in a string, respecting string
/// literals and escapes.
pub fn extract_first_json_object(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let start = s.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[start..=i].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let data = parse_llm_response(
            r#"{"deadline_iso": "2026-03-01", "is_rolling": true, "categories": ["Research"]}"#,
        )
        .unwrap();
        assert_eq!(data.deadline_iso.as_deref(), Some("2026-03-01"));
        assert!(data.is_rolling);
        assert_eq!(data.categories, vec!["Research"]);
    }

    #[test]
    fn strips_markdown_fences() {
        let data = parse_llm_response("```json\n{\"opp_status\": \"closed\"}\n```").unwrap();
        assert_eq!(data.opp_status.as_deref(), Some("closed"));
    }

    #[test]
    fn recovers_object_from_chatter() {
        let resp = "Sure! Here is the extraction:\n{\"summary\": \"A research grant.\"}\nLet me know.";
        let data = parse_llm_response(resp).unwrap();
        assert_eq!(data.summary.as_deref(), Some("A research grant."));
    }

    #[test]
    fn balanced_object_extraction_respects_strings() {
        let s = r#"noise {"a": "brace } inside", "b": {"c": 1}} trailing"#;
        let obj = extract_first_json_object(s).unwrap();
        assert_eq!(obj, r#"{"a": "brace } inside", "b": {"c": 1}}"#);
    }

    #[test]
    fn unbalanced_object_is_none() {
        assert!(extract_first_json_object("{\"a\": 1").is_none());
        assert!(extract_first_json_object("no json here").is_none());
    }

    #[test]
    fn missing_fields_default() {
        let data = parse_llm_response("{}").unwrap();
        assert!(data.deadline_candidates.is_empty());
        assert_eq!(data.amount_min, 0.0);
        assert!(!data.is_results_page);
    }
}
