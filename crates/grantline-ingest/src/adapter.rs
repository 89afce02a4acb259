//! Source adapter: fetches a listing page plus its linked PDF attachments
//! and extracts deadline/status evidence from the combined text.

use std::collections::HashMap;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tracing::{debug, warn};

use grantline_core::{DeadlineEvidence, Result};

use crate::evidence::{parse_date_candidates_from_text, parse_deadline_evidence_from_text};
use crate::fetcher::Fetcher;
use crate::pdf::extract_deadlines_from_pdf;
use crate::text::{clean_text, merge_unique_fold};
use crate::urlutil::{extract_domain, resolve_reference};

static ATTACHMENT_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(calendar|schedule|timeline|dates|deadlines|guidelines|bases|cronograma|calendario|fechas|anexos|annex|attachments?)")
        .expect("valid regex")
});

static ANCHOR_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));
static BODY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));
static ROW_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table tr").expect("valid selector"));
static CELL_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("valid selector"));
static LABEL_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("p, li, div, td, th, h1, h2, h3, h4, h5, h6, strong").expect("valid selector")
});

const LABEL_KEYWORDS: &[&str] = &[
    "cierre",
    "postul",
    "deadline",
    "closing",
    "submission",
    "fecha límite",
    "fecha maxima",
    "cronograma",
    "calendario",
    "opening",
    "apertura",
];

const ROLLING_HINTS: &[&str] = &[
    "rolling",
    "open continuously",
    "ongoing call",
    "ventanilla abierta",
    "convocatoria permanente",
    "sin fecha límite",
    "no deadline",
];

/// Raw fetch output for one opportunity page.
#[derive(Debug, Clone)]
pub struct SourceAdapterRaw {
    pub url: String,
    pub domain: String,
    pub body_html: String,
    pub attachment_urls: Vec<String>,
    pub attachment_texts: HashMap<String, String>,
    pub fetch_meta: JsonMap<String, JsonValue>,
}

/// Candidates and evidence extracted from a [`SourceAdapterRaw`].
#[derive(Debug, Clone, Default)]
pub struct SourceAdapterCandidates {
    pub source_status_raw: String,
    pub deadline_candidates: Vec<String>,
    pub deadline_evidence: Vec<DeadlineEvidence>,
    pub is_results_page: bool,
    pub evidence: JsonMap<String, JsonValue>,
    pub status_confidence: f64,
    pub rolling_evidence: bool,
    pub pdfs_parsed: i64,
    pub deadlines_added: i64,
}

/// Adapter over the safe fetcher for arbitrary listing pages.
pub struct GenericSourceAdapter<'a> {
    fetcher: &'a dyn Fetcher,
}

impl<'a> GenericSourceAdapter<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self { fetcher }
    }

    /// Fetch the root HTML plus the text of linked attachment PDFs.
    pub async fn fetch_opportunity_raw(&self, url: &str) -> Result<SourceAdapterRaw> {
        let start = Instant::now();
        let doc = self.fetcher.fetch(url).await?;
        let html_body = doc.body_text();

        let mut fetch_meta = JsonMap::new();
        fetch_meta.insert("root_status_code".into(), json!(doc.status_code));
        fetch_meta.insert("root_bytes".into(), json!(doc.body.len()));
        fetch_meta.insert(
            "root_duration_ms".into(),
            json!(start.elapsed().as_millis() as u64),
        );
        fetch_meta.insert("blocked_detected".into(), json!(false));

        let attachment_urls = collect_attachment_pdf_links(url, &html_body);
        let mut attachment_texts = HashMap::new();
        let mut pdf_parse_errors = 0u32;

        for attachment_url in &attachment_urls {
            let attachment_start = Instant::now();
            let head = match self.fetcher.fetch(attachment_url).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(
                        subsystem = "ingest",
                        component = "adapter",
                        url = attachment_url.as_str(),
                        error = %e,
                        "Attachment fetch failed"
                    );
                    pdf_parse_errors += 1;
                    continue;
                }
            };

            let content_type = head.content_type.to_lowercase();
            let looks_like_pdf = content_type.contains("pdf")
                || attachment_url.to_lowercase().contains(".pdf");
            if !looks_like_pdf {
                continue;
            }

            match extract_deadlines_from_pdf(self.fetcher, attachment_url).await {
                Ok((_, text)) => {
                    attachment_texts.insert(attachment_url.clone(), text);
                    fetch_meta.insert(
                        format!("pdf_{}_duration_ms", attachment_url),
                        json!(attachment_start.elapsed().as_millis() as u64),
                    );
                }
                Err(e) => {
                    debug!(
                        subsystem = "ingest",
                        component = "adapter",
                        url = attachment_url.as_str(),
                        error = %e,
                        "PDF extraction failed"
                    );
                    pdf_parse_errors += 1;
                }
            }
        }

        fetch_meta.insert("attachment_count".into(), json!(attachment_urls.len()));
        fetch_meta.insert("pdfs_parsed".into(), json!(attachment_texts.len()));
        fetch_meta.insert("pdf_parse_errors".into(), json!(pdf_parse_errors));
        fetch_meta.insert("pdf_unparseable".into(), json!(pdf_parse_errors > 0));

        Ok(SourceAdapterRaw {
            url: url.to_string(),
            domain: extract_domain(url),
            body_html: html_body,
            attachment_urls,
            attachment_texts,
            fetch_meta,
        })
    }

    /// Extract deadline candidates, evidence, status hints and authority
    /// tiers from a fetched page.
    pub fn extract_candidates(&self, raw: &SourceAdapterRaw) -> SourceAdapterCandidates {
        let text = build_structured_extraction_text(&raw.body_html).to_lowercase();

        let html_evidence = parse_deadline_evidence_from_text(&text, "html", &raw.url, 0.8);
        let html_candidates = parse_date_candidates_from_text(&text);

        let mut candidates = html_candidates.clone();
        let mut deadline_evidence = html_evidence;

        let mut evidence = JsonMap::new();
        evidence.insert("authority".into(), json!("inference"));
        evidence.insert("attachment_urls".into(), json!(raw.attachment_urls));
        evidence.insert("attachment_count".into(), json!(raw.attachment_urls.len()));
        evidence.insert("rolling_evidence".into(), json!(false));
        evidence.insert("evidence_snippets".into(), json!([]));
        evidence.insert("fetch_meta".into(), JsonValue::Object(raw.fetch_meta.clone()));

        let mut rolling_evidence = false;
        for hint in ROLLING_HINTS {
            if text.contains(hint) {
                rolling_evidence = true;
                evidence.insert("rolling_evidence".into(), json!(true));
                break;
            }
        }

        let mut attachment_candidates_found = false;
        let mut pdfs_parsed = 0i64;
        for attachment_text in raw.attachment_texts.values() {
            pdfs_parsed += 1;
            let lower = attachment_text.to_lowercase();
            let before = candidates.len();
            candidates = merge_unique_fold(candidates, parse_date_candidates_from_text(&lower));
            let pdf_evidence = parse_deadline_evidence_from_text(&lower, "pdf", &raw.url, 0.85);
            deadline_evidence.extend(pdf_evidence);
            if candidates.len() > before {
                attachment_candidates_found = true;
            }
        }

        let mut status_raw = String::new();
        if text.contains("closed") || text.contains("cerrad") || text.contains("finalizada") {
            status_raw = "closed".to_string();
        }
        if text.contains("results")
            || text.contains("winners")
            || text.contains("ganadores")
            || text.contains("resultados finales")
            || text.contains("ranking")
        {
            status_raw = "results".to_string();
        }
        if status_raw.is_empty()
            && (text.contains("open") || text.contains("abierta") || text.contains("vigente"))
        {
            status_raw = "open".to_string();
        }

        let is_results = status_raw == "results";
        let mut confidence = 0.4;
        if !html_candidates.is_empty() {
            confidence = 0.8;
            evidence.insert("authority".into(), json!("official_page_html"));
        }
        if attachment_candidates_found && html_candidates.is_empty() {
            confidence = 0.7;
            evidence.insert("authority".into(), json!("attachments"));
        }
        if is_results {
            confidence = 0.95;
        }

        if raw.domain.to_lowercase().contains("proinnovate") && candidates.is_empty() {
            evidence.insert("proinnovate_discovery_only".into(), json!(true));
            if status_raw.is_empty() {
                status_raw = "calendar_discovery_only".to_string();
            }
            if confidence > 0.3 {
                confidence = 0.3;
            }
        }

        let deadlines_added = candidates.len() as i64;
        SourceAdapterCandidates {
            source_status_raw: status_raw,
            deadline_candidates: candidates,
            deadline_evidence,
            is_results_page: is_results,
            evidence,
            status_confidence: confidence,
            rolling_evidence,
            pdfs_parsed,
            deadlines_added,
        }
    }
}

/// Collect anchor hrefs that look like document attachments: `.pdf`,
/// `/document/` or `download` in the href, or calendar/attachment words in
/// the visible anchor text.
pub fn collect_attachment_pdf_links(base_url: &str, html_body: &str) -> Vec<String> {
    let doc = Html::parse_document(html_body);
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for anchor in doc.select(&ANCHOR_SEL) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href_lower = href.trim().to_lowercase();
        let anchor_text = clean_text(&anchor.text().collect::<Vec<_>>().join(" ")).to_lowercase();

        let likely_doc = ATTACHMENT_ANCHOR.is_match(&anchor_text)
            || href_lower.contains(".pdf")
            || href_lower.contains("download")
            || href_lower.contains("/document/");
        if !likely_doc {
            continue;
        }

        let Some(abs) = resolve_reference(base_url, href) else {
            continue;
        };
        if seen.insert(abs.clone()) {
            out.push(abs);
        }
    }

    out
}

/// Flatten HTML into extraction-friendly text. Emits, in order: the body
/// text; each table row as `first-cell: cell2 | cell3 | ...`; and any short
/// element containing a label keyword followed by its next sibling's text.
/// This preserves the "label ... date" association plain innerText loses.
pub fn build_structured_extraction_text(html_body: &str) -> String {
    let doc = Html::parse_document(html_body);
    let mut parts: Vec<String> = Vec::new();

    let body_text = doc
        .select(&BODY_SEL)
        .next()
        .map(|b| clean_text(&b.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_else(|| clean_text(&doc.root_element().text().collect::<Vec<_>>().join(" ")));
    if !body_text.is_empty() {
        parts.push(body_text);
    }

    for row in doc.select(&ROW_SEL) {
        let cells: Vec<String> = row
            .select(&CELL_SEL)
            .map(|cell| clean_text(&cell.text().collect::<Vec<_>>().join(" ")))
            .filter(|v| !v.is_empty())
            .collect();
        match cells.len() {
            0 => {}
            1 => parts.push(cells[0].clone()),
            _ => parts.push(format!("{}: {}", cells[0], cells[1..].join(" | "))),
        }
    }

    for el in doc.select(&LABEL_SEL) {
        let text = clean_text(&el.text().collect::<Vec<_>>().join(" "));
        if text.is_empty() || text.len() > 220 {
            continue;
        }
        let lower = text.to_lowercase();
        if !LABEL_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }

        let next_text = next_sibling_element(&el)
            .map(|sib| clean_text(&sib.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default();
        if !next_text.is_empty() && next_text != text {
            parts.push(format!("{} | {}", text, next_text));
        } else {
            parts.push(text);
        }
    }

    parts.join("\n")
}

fn next_sibling_element<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_text_includes_table_rows() {
        let html = r#"
        <html><body>
        <table>
        <tr><th>Actividad</th><th>Fecha</th></tr>
        <tr><td>Cierre de postulaciones</td><td>18 de febrero del 2026</td></tr>
        </table>
        </body></html>"#;

        let out = build_structured_extraction_text(html).to_lowercase();
        assert!(out.contains("cierre de postulaciones: 18 de febrero del 2026"), "{}", out);
    }

    #[test]
    fn structured_text_pairs_labels_with_next_sibling() {
        let html = r#"
        <div>
          <p>Fecha límite</p>
          <p>15 de marzo del 2026</p>
        </div>"#;
        let out = build_structured_extraction_text(html);
        assert!(out.contains("Fecha límite | 15 de marzo del 2026"), "{}", out);
    }

    #[test]
    fn collects_pdf_and_keyword_anchors() {
        let html = r#"
        <body>
          <a href="/docs/bases.pdf">Bases del concurso</a>
          <a href="/files/cronograma-2026">Cronograma</a>
          <a href="/about">About us</a>
          <a href="/docs/bases.pdf">Duplicate</a>
        </body>"#;
        let links = collect_attachment_pdf_links("https://example.org/call", html);
        assert_eq!(
            links,
            vec![
                "https://example.org/docs/bases.pdf".to_string(),
                "https://example.org/files/cronograma-2026".to_string(),
            ]
        );
    }

    fn raw_for(html: &str, url: &str) -> SourceAdapterRaw {
        SourceAdapterRaw {
            url: url.to_string(),
            domain: extract_domain(url),
            body_html: html.to_string(),
            attachment_urls: Vec::new(),
            attachment_texts: HashMap::new(),
            fetch_meta: JsonMap::new(),
        }
    }

    fn adapter_fixture() -> GenericSourceAdapter<'static> {
        struct NeverFetch;
        #[async_trait::async_trait]
        impl Fetcher for NeverFetch {
            async fn fetch(&self, _url: &str) -> Result<crate::fetcher::FetchedDocument> {
                unreachable!("extract_candidates never fetches")
            }
        }
        static FETCHER: NeverFetch = NeverFetch;
        GenericSourceAdapter::new(&FETCHER)
    }

    #[test]
    fn spanish_table_row_yields_lima_deadline_candidate() {
        let html = r#"
        <html><body>
        <table><tr><td>Cierre de postulaciones</td><td>18 de febrero del 2026</td></tr></table>
        </body></html>"#;
        let raw = raw_for(html, "https://www.gob.pe/institucion/proinnovate/convocatoria");

        let candidates = adapter_fixture().extract_candidates(&raw);
        assert!(candidates
            .deadline_candidates
            .contains(&"2026-02-19T04:59:59Z".to_string()));
        assert_eq!(candidates.status_confidence, 0.8);
        assert_eq!(candidates.evidence["authority"], json!("official_page_html"));
        assert_eq!(candidates.deadline_evidence[0].label, "cierre de postulaciones");
    }

    #[test]
    fn rolling_hints_set_rolling_evidence() {
        let html = "<body><p>Convocatoria permanente, postula todo el año.</p></body>";
        let raw = raw_for(html, "https://example.org/call");
        let candidates = adapter_fixture().extract_candidates(&raw);
        assert!(candidates.rolling_evidence);
        assert_eq!(candidates.evidence["rolling_evidence"], json!(true));
    }

    #[test]
    fn results_page_outranks_closed_and_open_hints() {
        let html = "<body><p>Convocatoria cerrada. Resultados finales y ganadores.</p></body>";
        let raw = raw_for(html, "https://example.org/resultados");
        let candidates = adapter_fixture().extract_candidates(&raw);
        assert_eq!(candidates.source_status_raw, "results");
        assert!(candidates.is_results_page);
        assert_eq!(candidates.status_confidence, 0.95);
    }

    #[test]
    fn proinnovate_without_candidates_is_discovery_only() {
        let html = "<body><p>Calendario de próximas convocatorias</p></body>";
        let raw = raw_for(html, "https://proinnovate.gob.pe/calendario");
        let candidates = adapter_fixture().extract_candidates(&raw);
        assert!(candidates.status_confidence <= 0.3);
        assert_eq!(candidates.evidence["proinnovate_discovery_only"], json!(true));
    }
}
