//! Selector-driven HTML strategy for sources without an API.
//!
//! Emits one raw opportunity per container match with a deterministic
//! source id (hex SHA-1 of the canonicalized URL), optionally enriching
//! each item from its detail page, and paginating via a configured
//! next-link selector with cycle detection on canonicalized URLs.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use sha1::{Digest, Sha1};
use tracing::{info, warn};
use uuid::Uuid;

use grantline_core::{Error, IngestionStats, RawOpportunity, Result};

use crate::adapter::build_structured_extraction_text;
use crate::evidence::{parse_deadline_evidence_from_text, pick_preferred_close_evidence};
use crate::pipeline::Pipeline;
use crate::registry::{DetailConfig, SourceConfig};
use crate::strategies::Strategy;
use crate::text::append_unique;
use crate::urlutil::{canonicalize_url, extract_domain, resolve_reference};

/// Polite delay between detail-page fetches.
const DETAIL_DELAY: Duration = Duration::from_millis(500);

/// Detail pages are capped at `max_pages * 100` per run.
const DETAIL_PAGES_PER_LIST_PAGE: u32 = 100;

const ROLLING_KEYWORDS: &[&str] = &[
    "rolling basis",
    "rolling deadline",
    "open until filled",
    "ventanilla abierta",
    "convocatoria permanente",
    "postula todo el año",
    "continuously",
    "ongoing",
    "open-ended",
    "no deadline",
];

/// One list-page match before detail enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub title: String,
    pub link: String,
    pub summary: String,
}

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| Error::Config(format!("invalid selector {:?}: {}", raw, e)))
}

/// Extract list items and the raw next-page href from a list page.
pub fn parse_list_page(
    html: &str,
    config: &SourceConfig,
) -> Result<(Vec<ListItem>, Option<String>)> {
    if config.selectors.container.is_empty() {
        return Err(Error::Config(
            "selector 'container' is required for html_generic strategy".to_string(),
        ));
    }

    let doc = Html::parse_document(html);
    let container_sel = parse_selector(&config.selectors.container)?;
    let title_sel = if config.selectors.title.is_empty() {
        None
    } else {
        Some(parse_selector(&config.selectors.title)?)
    };
    let link_sel = if config.selectors.link.is_empty() || config.selectors.link == "." {
        None
    } else {
        Some(parse_selector(&config.selectors.link)?)
    };
    let content_sel = if config.selectors.content.is_empty() {
        None
    } else {
        Some(parse_selector(&config.selectors.content)?)
    };

    let link_attr = if config.selectors.link_attr.is_empty() {
        "href"
    } else {
        &config.selectors.link_attr
    };

    let mut items = Vec::new();
    for element in doc.select(&container_sel) {
        let title = match &title_sel {
            Some(sel) => element
                .select(sel)
                .next()
                .map(|e| e.text().collect::<Vec<_>>().join(" "))
                .unwrap_or_default(),
            None => element.text().collect::<Vec<_>>().join(" "),
        };
        let title = title.trim().to_string();

        let link = match &link_sel {
            Some(sel) => element
                .select(sel)
                .next()
                .and_then(|e| e.value().attr(link_attr))
                .unwrap_or_default(),
            None => element.value().attr(link_attr).unwrap_or_default(),
        };
        let link = link.trim().to_string();

        let summary = content_sel
            .as_ref()
            .and_then(|sel| element.select(sel).next())
            .map(|e| e.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .unwrap_or_default();

        if title.is_empty() || link.is_empty() {
            continue;
        }
        items.push(ListItem { title, link, summary });
    }

    let next = if config.pagination.next.is_empty() {
        None
    } else {
        let next_sel = parse_selector(&config.pagination.next)?;
        doc.select(&next_sel)
            .next()
            .and_then(|e| e.value().attr("href"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    Ok((items, next))
}

/// Deterministic source id for HTML items: hex SHA-1 of the canonical URL.
pub fn source_id_for(canonical_url: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract metadata from a detail page into the raw opportunity.
pub fn extract_detail_content(raw: &mut RawOpportunity, config: &DetailConfig, html: &str) {
    let doc = Html::parse_document(html);
    let container_sel = if config.selectors.container.is_empty() {
        None
    } else {
        Selector::parse(&config.selectors.container).ok()
    };

    let container = container_sel
        .as_ref()
        .and_then(|sel| doc.select(sel).next());

    let select_text = |selector: &str| -> String {
        let Ok(sel) = Selector::parse(selector) else {
            return String::new();
        };
        let found = match container {
            Some(c) => c.select(&sel).next(),
            None => doc.select(&sel).next(),
        };
        found
            .map(|e| e.text().collect::<Vec<_>>().join(" ").trim().to_string())
            .unwrap_or_default()
    };

    if !config.selectors.description.is_empty() {
        if let Ok(sel) = Selector::parse(&config.selectors.description) {
            let found = match container {
                Some(c) => c.select(&sel).next(),
                None => doc.select(&sel).next(),
            };
            if let Some(el) = found {
                let desc = el.inner_html().trim().to_string();
                if !desc.is_empty() {
                    raw.description = desc;
                }
            }
        }
    }

    if raw.description.trim().is_empty() {
        if let Some(c) = container {
            raw.description = c.inner_html().trim().to_string();
        }
    }

    if !config.selectors.deadline.is_empty() {
        let deadline_text = select_text(&config.selectors.deadline);
        if !deadline_text.is_empty() {
            raw.raw_deadline = deadline_text;
        }
    }

    if !config.selectors.amount.is_empty() {
        let amount_text = select_text(&config.selectors.amount);
        if !amount_text.is_empty() {
            raw.raw_amount = amount_text;
            if !config.parse.currency_default.is_empty() {
                raw.raw_currency = config.parse.currency_default.clone();
            }
        }
    }

    let mut structured = build_structured_extraction_text(&raw.description);
    if structured.trim().is_empty() {
        structured = build_structured_extraction_text(html);
    }
    let container_text = structured.to_lowercase();

    for keyword in ROLLING_KEYWORDS {
        if container_text.contains(keyword) {
            raw.extra.insert("is_rolling".to_string(), "true".to_string());
            break;
        }
    }

    let mut detail_evidence =
        parse_deadline_evidence_from_text(&container_text, "detail_html", &raw.external_url, 0.82);
    if !detail_evidence.is_empty() {
        detail_evidence.sort_by(|a, b| a.parsed_date_iso.cmp(&b.parsed_date_iso));
        raw.deadline_evidence.extend(detail_evidence.iter().cloned());
        for ev in &detail_evidence {
            raw.deadline_candidates =
                append_unique(std::mem::take(&mut raw.deadline_candidates), &ev.parsed_date_iso);
        }

        if let Some(best_close) = pick_preferred_close_evidence(&raw.deadline_evidence, Utc::now())
        {
            raw.close_iso = best_close.parsed_date_iso.clone();
            raw.raw_deadline = best_close.snippet.clone();
        } else if let Some(last) = raw.deadline_evidence.last() {
            raw.close_iso = last.parsed_date_iso.clone();
            raw.raw_deadline = last.snippet.clone();
        }

        if raw.open_iso.is_empty() {
            for ev in &raw.deadline_evidence {
                let label = format!("{} {}", ev.label, ev.snippet).to_lowercase();
                if label.contains("inicio") || label.contains("opening") || label.contains("apertura")
                {
                    raw.open_iso = ev.parsed_date_iso.clone();
                    break;
                }
            }
        }
    }

    if container_text.contains("closed")
        || container_text.contains("cerrada")
        || container_text.contains("results")
        || container_text.contains("awarded")
        || container_text.contains("finalizada")
    {
        raw.extra.insert("opp_status".to_string(), "closed".to_string());
        raw.extra
            .insert("source_status_raw".to_string(), "closed".to_string());
    } else if container_text.contains("forthcoming")
        || container_text.contains("upcoming")
        || container_text.contains("próximamente")
        || container_text.contains("coming soon")
    {
        raw.extra
            .insert("opp_status".to_string(), "forthcoming".to_string());
        raw.extra
            .insert("source_status_raw".to_string(), "forthcoming".to_string());
    }

    if container_text.contains("resultados finales")
        || container_text.contains("ganadores")
        || container_text.contains("winners")
        || container_text.contains("awardees")
        || container_text.contains("ranking")
    {
        raw.is_results_page = true;
        raw.extra
            .insert("is_results_page".to_string(), "true".to_string());
    }

    if !config.selectors.eligibility.is_empty() {
        let eligibility_text = select_text(&config.selectors.eligibility);
        if !eligibility_text.is_empty() {
            raw.extra.insert("eligibility".to_string(), eligibility_text);
        }
    }
}

/// Strategy driver for selector-configured HTML sources.
pub struct HtmlGenericStrategy;

#[async_trait]
impl Strategy for HtmlGenericStrategy {
    async fn run(
        &self,
        config: &SourceConfig,
        pipeline: &Pipeline,
        run_id: Option<Uuid>,
    ) -> Result<IngestionStats> {
        let mut stats = IngestionStats::default();

        let max_pages = config.max_pages.max(1);
        let detail_cap = max_pages * DETAIL_PAGES_PER_LIST_PAGE;
        let mut detail_count = 0u32;

        let mut visited: HashSet<String> = HashSet::new();
        let mut current_url = config.base_url.clone();
        let mut page_count = 0u32;

        while page_count < max_pages {
            let canon_page = canonicalize_url(&current_url);
            if !visited.insert(canon_page.clone()) {
                info!(
                    subsystem = "ingest",
                    component = "html_generic",
                    source_id = config.id.as_str(),
                    url = canon_page.as_str(),
                    "Pagination cycle detected, stopping"
                );
                break;
            }
            page_count += 1;

            let doc = match pipeline.fetcher.fetch(&current_url).await {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(
                        subsystem = "ingest",
                        component = "html_generic",
                        source_id = config.id.as_str(),
                        url = current_url.as_str(),
                        error = %e,
                        "List page fetch failed"
                    );
                    stats.errors += 1;
                    break;
                }
            };

            let (items, next_href) = parse_list_page(&doc.body_text(), config)?;
            stats.total_found += items.len() as i64;

            info!(
                subsystem = "ingest",
                component = "html_generic",
                source_id = config.id.as_str(),
                url = current_url.as_str(),
                items_found = items.len(),
                "List page parsed"
            );

            for item in items {
                let Some(full_url) = resolve_reference(&current_url, &item.link) else {
                    continue;
                };
                let canonical_url = canonicalize_url(&full_url);

                let mut raw = RawOpportunity {
                    title: item.title,
                    description: item.summary,
                    external_url: canonical_url.clone(),
                    source_domain: extract_domain(&config.base_url),
                    source_id: source_id_for(&canonical_url),
                    ..Default::default()
                };

                if !config.detail.parse.date_locales.is_empty() {
                    raw.extra.insert(
                        "date_locales".to_string(),
                        config.detail.parse.date_locales.join(","),
                    );
                }
                if !config.detail.parse.currency_default.is_empty() {
                    raw.extra.insert(
                        "currency_default".to_string(),
                        config.detail.parse.currency_default.clone(),
                    );
                }

                if config.detail.enabled && detail_count < detail_cap {
                    detail_count += 1;
                    tokio::time::sleep(DETAIL_DELAY).await;
                    match pipeline.fetcher.fetch(&raw.external_url).await {
                        Ok(detail_doc) => {
                            extract_detail_content(&mut raw, &config.detail, &detail_doc.body_text())
                        }
                        Err(e) => warn!(
                            subsystem = "ingest",
                            component = "html_generic",
                            source_id = config.id.as_str(),
                            url = raw.external_url.as_str(),
                            error = %e,
                            "Detail fetch failed"
                        ),
                    }
                }

                match pipeline.save_raw(raw, run_id).await {
                    Ok(()) => stats.total_saved += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!(
                            subsystem = "ingest",
                            component = "html_generic",
                            source_id = config.id.as_str(),
                            error = %e,
                            "Failed to save item"
                        );
                    }
                }
            }

            let Some(next_href) = next_href else {
                break;
            };
            match resolve_reference(&current_url, &next_href) {
                Some(next_url) => current_url = next_url,
                None => break,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DetailParseConfig, DetailSelectorConfig, PaginationConfig, SelectorConfig};

    fn list_config() -> SourceConfig {
        SourceConfig {
            id: "demo".into(),
            base_url: "https://example.org/calls".into(),
            strategy: "html_generic".into(),
            selectors: SelectorConfig {
                container: "article.call".into(),
                title: "h2 a".into(),
                link: "h2 a".into(),
                content: ".excerpt".into(),
                ..Default::default()
            },
            pagination: PaginationConfig {
                next: "a.next".into(),
            },
            max_pages: 2,
            ..Default::default()
        }
    }

    const LIST_HTML: &str = r#"
    <html><body>
      <article class="call">
        <h2><a href="/calls/innovation-fund?utm_source=list">Innovation Fund 2026</a></h2>
        <div class="excerpt">Funding for applied research.</div>
      </article>
      <article class="call">
        <h2><a href="/calls/untitled"></a></h2>
      </article>
      <a class="next" href="/calls?page=2">Next</a>
    </body></html>"#;

    #[test]
    fn parses_items_and_next_link() {
        let (items, next) = parse_list_page(LIST_HTML, &list_config()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Innovation Fund 2026");
        assert_eq!(items[0].link, "/calls/innovation-fund?utm_source=list");
        assert_eq!(items[0].summary, "Funding for applied research.");
        assert_eq!(next.as_deref(), Some("/calls?page=2"));
    }

    #[test]
    fn missing_container_selector_is_a_config_error() {
        let mut config = list_config();
        config.selectors.container = String::new();
        assert!(matches!(
            parse_list_page(LIST_HTML, &config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn source_id_is_stable_sha1_of_canonical_url() {
        let canonical = canonicalize_url("https://example.org/calls/innovation-fund?utm_source=x");
        let id1 = source_id_for(&canonical);
        let id2 = source_id_for(&canonical);
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 40);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    fn detail_config() -> DetailConfig {
        DetailConfig {
            enabled: true,
            selectors: DetailSelectorConfig {
                container: ".entry".into(),
                description: ".body".into(),
                deadline: ".fecha".into(),
                eligibility: ".quienes".into(),
                ..Default::default()
            },
            parse: DetailParseConfig {
                date_locales: vec!["es".into(), "en".into()],
                currency_default: "PEN".into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn detail_extraction_fills_dates_and_status() {
        let html = r#"
        <div class="entry">
          <div class="body">
            <p>Inicio de postulaciones: 10 de febrero del 2026</p>
            <p>Cierre de postulaciones: 20 de febrero del 2026</p>
          </div>
          <span class="fecha">20 de febrero del 2026</span>
          <div class="quienes">Universidades peruanas</div>
        </div>"#;

        let mut raw = RawOpportunity {
            external_url: "https://example.org/calls/x".into(),
            ..Default::default()
        };
        extract_detail_content(&mut raw, &detail_config(), html);

        assert!(!raw.deadline_evidence.is_empty());
        assert!(!raw.close_iso.is_empty());
        // The close-labeled date wins over the start date.
        assert!(raw.close_iso.starts_with("2026-02-20"));
        assert_eq!(raw.open_iso, raw.deadline_evidence[0].parsed_date_iso);
        assert_eq!(raw.extra["eligibility"], "Universidades peruanas");
        assert!(raw.description.contains("Cierre de postulaciones"));
    }

    #[test]
    fn detail_extraction_detects_rolling_and_results() {
        let html = r#"
        <div class="entry">
          <div class="body"><p>Convocatoria permanente. Resultados finales y ganadores 2024.</p></div>
        </div>"#;
        let mut raw = RawOpportunity::default();
        extract_detail_content(&mut raw, &detail_config(), html);
        assert_eq!(raw.extra.get("is_rolling").map(String::as_str), Some("true"));
        assert!(raw.is_results_page);
    }
}
