//! Ingestion pipeline orchestrator: normalization, sanitization, LLM
//! augmentation, evidence enrichment, status derivation, embedding, the
//! monotonic upsert, and the background recompute/enrichment sweeps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tracing::{debug, info, warn};
use uuid::Uuid;

use grantline_core::defaults::{CLASSIFY_TIMEOUT_SECS, LLM_TEXT_CAP, SUMMARY_FALLBACK_MAX};
use grantline_core::{
    EnrichmentStats, Error, InferenceBackend, GenerationBackend, IngestionStats, NormalizedStatus,
    Opportunity, RawOpportunity, Result, RunStatus, StatusDecision,
};
use grantline_db::Database;
use grantline_inference::{classify_status, extract_opportunity_data};

use crate::adapter::GenericSourceAdapter;
use crate::dates::parse_deadline_candidate;
use crate::fetcher::{FetchConfig, Fetcher, RateLimitedFetcher};
use crate::normalizer::{from_raw, normalize_opportunity};
use crate::registry::load_registry;
use crate::status::{compute_status_decision, detect_rolling_evidence};
use crate::strategies::strategy_for;
use crate::text::{html_to_text, merge_unique_fold, split_and_clean_list, truncate_text};
use crate::urlutil::{canonicalize_url, extract_domain};

/// Domains whose structured API data outranks scraped evidence.
const API_FIRST_DOMAINS: &[&str] = &[
    "grants.gov",
    "api.grants.gov",
    "ec.europa.eu",
    "europa.eu",
    "nsf.gov",
    "nih.gov",
];

/// The ingestion pipeline. Strategies push raw or mapped opportunities
/// through [`Pipeline::save_raw`] / [`Pipeline::save_opportunity`];
/// background jobs replay the status engine over stored rows.
pub struct Pipeline {
    pub db: Database,
    pub fetcher: Arc<dyn Fetcher>,
    /// Present when the pipeline owns the default fetcher, so registry
    /// fetch configs can be registered per domain.
    rate_limited: Option<Arc<RateLimitedFetcher>>,
    pub ai: Option<Arc<dyn InferenceBackend>>,
}

impl Pipeline {
    pub fn new(
        db: Database,
        fetcher: Option<Arc<dyn Fetcher>>,
        ai: Option<Arc<dyn InferenceBackend>>,
    ) -> Self {
        match fetcher {
            Some(fetcher) => Self {
                db,
                fetcher,
                rate_limited: None,
                ai,
            },
            None => {
                let rate_limited = Arc::new(RateLimitedFetcher::new(FetchConfig {
                    rate_limit_rps: 2.0,
                    accept_language: "en-US,en;q=0.9,es;q=0.8".to_string(),
                    ..Default::default()
                }));
                Self {
                    db,
                    fetcher: rate_limited.clone(),
                    rate_limited: Some(rate_limited),
                    ai,
                }
            }
        }
    }

    fn generation_backend(&self) -> Option<&dyn GenerationBackend> {
        self.ai.as_deref().map(|b| b.as_generation())
    }

    /// Normalize and save one raw opportunity.
    pub async fn save_raw(&self, raw: RawOpportunity, run_id: Option<Uuid>) -> Result<()> {
        let opp = from_raw(raw);
        self.save_opportunity(opp, run_id).await
    }

    /// Save one opportunity: sanitize, augment, derive status, embed,
    /// upsert.
    pub async fn save_opportunity(&self, mut opp: Opportunity, run_id: Option<Uuid>) -> Result<()> {
        normalize_opportunity(&mut opp);

        opp.title = html_to_text(&opp.title);
        opp.summary = html_to_text(&opp.summary);

        // Summary fallback from the description when the source gave none.
        if opp.summary.trim().is_empty() && !opp.description_html.trim().is_empty() {
            let clean_desc = html_to_text(&opp.description_html);
            opp.summary = truncate_text(&clean_desc, SUMMARY_FALLBACK_MAX);
        }

        opp.description_html = sanitize_html(&opp.description_html);

        // Conditional LLM extraction: check the store first, then augment.
        let mut needs_extraction = opp.deadline_at.is_none() && !opp.is_rolling;

        if needs_extraction && !opp.source_domain.is_empty() && !opp.source_id.is_empty() {
            if let Ok(Some(existing)) = self
                .db
                .opportunities
                .get_by_source_id(&opp.source_domain, &opp.source_id)
                .await
            {
                if let Some(deadline) = existing.deadline_at {
                    opp.deadline_at = Some(deadline);
                    needs_extraction = false;
                }
                if existing.is_rolling {
                    opp.is_rolling = true;
                    needs_extraction = false;
                }
                if existing.opp_status == "closed" || existing.opp_status == "archived" {
                    needs_extraction = false;
                }
            }
        }

        if needs_extraction {
            if let Some(backend) = self.generation_backend() {
                self.apply_llm_extraction(&mut opp, backend).await;
            }
        }

        if opp.source_run_id.is_none() {
            opp.source_run_id = run_id;
        }
        if opp.canonical_url.is_empty() && !opp.external_url.is_empty() {
            opp.canonical_url = canonicalize_url(&opp.external_url);
        }
        if opp.content_type.is_empty() {
            opp.content_type = "html".to_string();
        }
        if opp.raw_url.is_empty() {
            opp.raw_url = opp.external_url.clone();
        }

        if opp.source_id.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "missing source_id (url={}, source={})",
                opp.external_url, opp.source_domain
            )));
        }

        if should_enrich_evidence(&opp) && !opp.external_url.is_empty() {
            if let Err(e) = self.apply_evidence_enrichment(&mut opp).await {
                debug!(
                    subsystem = "ingest",
                    component = "pipeline",
                    url = opp.external_url.as_str(),
                    error = %e,
                    "Evidence enrichment failed"
                );
            }
        }
        opp.rolling_evidence = detect_rolling_evidence(&opp);

        let decision = compute_status_decision(&opp, Utc::now());
        opp.normalized_status = decision.normalized_status;
        opp.status_reason = decision.status_reason;
        opp.status_confidence = decision.status_confidence;
        opp.next_deadline_at = decision.next_deadline_at;
        opp.is_results_page = decision.is_results_page;

        if opp.source_status_raw.is_empty() {
            opp.source_status_raw = opp.opp_status.clone();
        }
        if opp.open_at.is_none() && opp.open_date.is_some() {
            opp.open_at = opp.open_date;
        }

        let has_structured_dates = opp.open_at.is_some()
            || opp.close_at.is_some()
            || opp.expiration_at.is_some()
            || !opp.deadlines.is_empty();
        if is_api_first_source(&opp.source_domain) && has_structured_dates {
            opp.source_evidence_json
                .insert("authority".to_string(), json!("api"));
            if opp.status_confidence < 0.95 {
                opp.status_confidence = 0.95;
            }
        }

        if !opp.rolling_evidence {
            opp.is_rolling = false;
        }

        if opp.embedding.is_none() {
            if let Some(backend) = &self.ai {
                let text = cap_chars(&format!("{}\n{}", opp.title, opp.summary), LLM_TEXT_CAP);
                match backend.as_embedding().embed_text(&text).await {
                    Ok(vec) if !vec.is_empty() => opp.embedding = Some(vec),
                    Ok(_) => {}
                    Err(e) => warn!(
                        subsystem = "ingest",
                        component = "pipeline",
                        error = %e,
                        "Failed to generate embedding"
                    ),
                }
            }
        }

        self.db.opportunities.upsert(&opp).await
    }

    async fn apply_llm_extraction(&self, opp: &mut Opportunity, backend: &dyn GenerationBackend) {
        info!(
            subsystem = "ingest",
            component = "pipeline",
            op = "llm_extract",
            source_id = opp.source_id.as_str(),
            "Triggering LLM extraction"
        );

        let text_ctx = cap_chars(
            &format!("{}\n{}", opp.summary, html_to_text(&opp.description_html)),
            LLM_TEXT_CAP,
        );

        let extracted =
            match extract_opportunity_data(backend, &opp.title, &opp.external_url, &text_ctx).await
            {
                Ok(extracted) => extracted,
                Err(e) => {
                    warn!(
                        subsystem = "ingest",
                        component = "pipeline",
                        error = %e,
                        "LLM extraction failed"
                    );
                    return;
                }
            };

        if let Some(status_raw) = extracted.source_status_raw.filter(|v| !v.is_empty()) {
            opp.source_status_raw = status_raw;
        }
        if extracted.is_results_page {
            opp.is_results_page = true;
        }
        if !extracted.deadline_candidates.is_empty() {
            opp.deadlines =
                merge_unique_fold(std::mem::take(&mut opp.deadlines), extracted.deadline_candidates);
        }
        if let Some(deadline_iso) = extracted.deadline_iso.filter(|v| !v.is_empty()) {
            if let Ok(d) = chrono::NaiveDate::parse_from_str(&deadline_iso, "%Y-%m-%d") {
                if let Some(dt) = Utc
                    .with_ymd_and_hms(
                        chrono::Datelike::year(&d),
                        chrono::Datelike::month(&d),
                        chrono::Datelike::day(&d),
                        23,
                        59,
                        59,
                    )
                    .single()
                {
                    opp.deadline_at = Some(dt);
                    opp.deadlines = merge_unique_fold(
                        std::mem::take(&mut opp.deadlines),
                        vec![dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)],
                    );
                }
            }
        }
        if let Some(open_iso) = extracted
            .open_iso
            .or(extracted.open_date_iso)
            .filter(|v| !v.is_empty())
        {
            if let Some(dt) = parse_deadline_candidate(&open_iso) {
                opp.open_at = Some(dt);
            }
        }
        if let Some(close_iso) = extracted.close_iso.filter(|v| !v.is_empty()) {
            if let Some(dt) = parse_deadline_candidate(&close_iso) {
                opp.close_at = Some(dt);
            }
        }
        if let Some(expiration_iso) = extracted.expiration_iso.filter(|v| !v.is_empty()) {
            if let Some(dt) = parse_deadline_candidate(&expiration_iso) {
                opp.expiration_at = Some(dt);
            }
        }
        if extracted.is_rolling {
            opp.is_rolling = true;
        }
        if let Some(status) = extracted.opp_status.filter(|s| {
            matches!(s.as_str(), "posted" | "closed" | "archived" | "funded")
        }) {
            opp.opp_status = status.clone();
            if opp.source_status_raw.is_empty() {
                opp.source_status_raw = status;
            }
        }
        if extracted.amount_min > 0.0 {
            if let Some(v) = Decimal::from_f64(extracted.amount_min) {
                opp.amount_min = v;
            }
        }
        if extracted.amount_max > 0.0 {
            if let Some(v) = Decimal::from_f64(extracted.amount_max) {
                opp.amount_max = v;
            }
        }
        if let Some(currency) = extracted.currency.filter(|v| !v.is_empty()) {
            opp.currency = currency;
        }
        if let Some(summary) = extracted.summary.filter(|v| !v.is_empty()) {
            if opp.summary.is_empty() || opp.summary.len() < 40 {
                opp.summary = summary;
            }
        }
        if !extracted.categories.is_empty() {
            opp.categories =
                merge_unique_fold(std::mem::take(&mut opp.categories), extracted.categories);
            opp.categories.truncate(6);
        }
        if let Some(eligibility) = extracted.eligibility.filter(|v| !v.is_empty()) {
            opp.eligibility = merge_unique_fold(
                std::mem::take(&mut opp.eligibility),
                split_and_clean_list(&eligibility),
            );
        }
    }

    /// Re-fetch the listing page (plus attachments) and merge extracted
    /// candidates and evidence into the record.
    pub async fn apply_evidence_enrichment(&self, opp: &mut Opportunity) -> Result<()> {
        let adapter = GenericSourceAdapter::new(self.fetcher.as_ref());
        let raw = adapter.fetch_opportunity_raw(&opp.external_url).await?;
        let candidates = adapter.extract_candidates(&raw);

        if !candidates.source_status_raw.is_empty() {
            opp.source_status_raw = candidates.source_status_raw.clone();
        }
        if candidates.is_results_page {
            opp.is_results_page = true;
        }
        if !candidates.deadline_candidates.is_empty() {
            opp.deadlines = merge_unique_fold(
                std::mem::take(&mut opp.deadlines),
                candidates.deadline_candidates.clone(),
            );
            opp.deadline_evidence
                .extend(candidates.deadline_evidence.iter().cloned());

            for ev in &candidates.deadline_evidence {
                let Some(parsed) = parse_deadline_candidate(&ev.parsed_date_iso) else {
                    continue;
                };
                let label = format!("{} {}", ev.label, ev.snippet).to_lowercase();
                if (label.contains("inicio") || label.contains("opening") || label.contains("open"))
                    && opp.open_at.is_none()
                {
                    opp.open_at = Some(parsed);
                }
                if label.contains("cierre")
                    || label.contains("deadline")
                    || label.contains("closes")
                    || label.contains("fecha máxima")
                {
                    if opp.close_at.map_or(true, |c| parsed < c) {
                        opp.close_at = Some(parsed);
                    }
                }
            }

            if opp.deadline_at.is_none() {
                if let Some(parsed) = parse_deadline_candidate(&candidates.deadline_candidates[0]) {
                    opp.deadline_at = Some(parsed);
                }
            }
        }

        for (k, v) in candidates.evidence.iter() {
            opp.source_evidence_json.insert(k.clone(), v.clone());
        }
        opp.source_evidence_json
            .insert("pdfs_parsed".to_string(), json!(candidates.pdfs_parsed));
        opp.source_evidence_json.insert(
            "deadlines_added".to_string(),
            json!(candidates.deadlines_added),
        );
        if candidates.rolling_evidence {
            opp.is_rolling = true;
            opp.rolling_evidence = true;
            opp.source_evidence_json
                .insert("rolling_evidence".to_string(), json!(true));
        }
        if candidates.status_confidence > opp.status_confidence {
            opp.status_confidence = candidates.status_confidence;
        }

        Ok(())
    }

    /// Run a registry source through its strategy, with an audit row.
    pub async fn ingest_source(&self, source_id: &str) -> Result<IngestionStats> {
        let registry = load_registry()?;
        let config = registry
            .find(source_id)
            .ok_or_else(|| Error::NotFound(format!("source id {:?} not in registry", source_id)))?;

        let strategy = strategy_for(&config.strategy).ok_or_else(|| {
            Error::Config(format!(
                "strategy {:?} not found for source {:?}",
                config.strategy, source_id
            ))
        })?;

        if let Some(fetcher) = self.rate_limited_fetcher() {
            let domain = extract_domain(&config.base_url);
            if !domain.is_empty() {
                fetcher.set_domain_config(&domain, config.fetch.clone()).await;
            }
        }

        let run_id = match self.db.ingest_runs.start(source_id).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    subsystem = "ingest",
                    component = "pipeline",
                    source_id = source_id,
                    error = %e,
                    "Failed to create ingest run"
                );
                None
            }
        };

        info!(
            subsystem = "ingest",
            component = "pipeline",
            op = "ingest_source",
            source_id = source_id,
            "Starting ingestion"
        );

        let start = Instant::now();
        let outcome = strategy.run(config, self, run_id).await;

        let stats = match &outcome {
            Ok(stats) => *stats,
            Err(_) => IngestionStats {
                errors: 1,
                ..Default::default()
            },
        };

        // A run with zero saves out of a non-empty find set failed outright;
        // per-item errors alone leave it completed.
        let status = if outcome.is_err() || (stats.total_saved == 0 && stats.total_found > 0) {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        if let Some(run_id) = run_id {
            let details = json!({ "duration_ms": start.elapsed().as_millis() as u64 });
            if let Err(e) = self.db.ingest_runs.finish(run_id, status, stats, details).await {
                warn!(
                    subsystem = "ingest",
                    component = "pipeline",
                    run_id = %run_id,
                    error = %e,
                    "Failed to finalize ingest run"
                );
            }
        }

        info!(
            subsystem = "ingest",
            component = "pipeline",
            op = "ingest_source",
            source_id = source_id,
            items_found = stats.total_found,
            items_saved = stats.total_saved,
            errors = stats.errors,
            duration_ms = start.elapsed().as_millis() as u64,
            "Ingestion finished"
        );

        outcome
    }

    /// Run every registry source, continuing past per-source failures.
    pub async fn ingest_all(&self) -> Result<HashMap<String, IngestionStats>> {
        let registry = load_registry()?;
        let mut results = HashMap::new();

        for source in &registry.sources {
            match self.ingest_source(&source.id).await {
                Ok(stats) => {
                    results.insert(source.id.clone(), stats);
                }
                Err(e) => {
                    warn!(
                        subsystem = "ingest",
                        component = "pipeline",
                        source_id = source.id.as_str(),
                        error = %e,
                        "Source ingestion failed"
                    );
                    results.insert(
                        source.id.clone(),
                        IngestionStats {
                            errors: 1,
                            ..Default::default()
                        },
                    );
                }
            }
        }

        Ok(results)
    }

    /// Ad-hoc ingestion of a single URL through the adapter.
    pub async fn ingest_url(&self, url: &str) -> Result<()> {
        let adapter = GenericSourceAdapter::new(self.fetcher.as_ref());
        let fetched = adapter.fetch_opportunity_raw(url).await?;
        let candidates = adapter.extract_candidates(&fetched);

        let canonical = canonicalize_url(url);
        let title = page_title(&fetched.body_html)
            .unwrap_or_else(|| canonical.clone());

        let raw = RawOpportunity {
            title,
            description: fetched.body_html.clone(),
            external_url: canonical.clone(),
            source_domain: fetched.domain.clone(),
            source_id: crate::strategies::source_id_for(&canonical),
            raw_status: candidates.source_status_raw.clone(),
            deadline_candidates: candidates.deadline_candidates.clone(),
            is_results_page: candidates.is_results_page,
            rolling_evidence: candidates.rolling_evidence,
            deadline_evidence: candidates.deadline_evidence.clone(),
            source_evidence_json: candidates.evidence.clone(),
            ..Default::default()
        };

        self.save_raw(raw, None).await
    }

    /// Recompute the status engine over all rows in id-ordered batches.
    ///
    /// Rows the engine leaves in `needs_review` are re-classified by the
    /// LLM when a client is configured (60s per-call timeout). Returns the
    /// per-status counts and the number of rows actually updated.
    pub async fn recompute_statuses(
        &self,
        batch_size: i64,
    ) -> Result<(HashMap<String, i64>, i64)> {
        let batch_size = if batch_size <= 0 { 500 } else { batch_size };

        let mut counts: HashMap<String, i64> = HashMap::new();
        let mut updated = 0i64;
        let mut last_id = String::new();

        loop {
            let rows = self
                .db
                .opportunities
                .fetch_status_batch(&last_id, batch_size)
                .await?;
            if rows.is_empty() {
                break;
            }

            for row in rows {
                let mut opp = row.opp;
                // Let the engine re-derive is_results_page from the current
                // detection logic; the stored value may be stale.
                opp.is_results_page = false;

                let now = Utc::now();
                let mut decision = compute_status_decision(&opp, now);

                if decision.normalized_status == NormalizedStatus::NeedsReview {
                    if let Some(backend) = self.generation_backend() {
                        let classified = tokio::time::timeout(
                            Duration::from_secs(CLASSIFY_TIMEOUT_SECS),
                            classify_status(backend, &opp.title, &opp.summary),
                        )
                        .await;
                        match classified {
                            Ok(Ok(status)) => apply_llm_status(&mut decision, &status),
                            Ok(Err(e)) => debug!(
                                subsystem = "ingest",
                                component = "pipeline",
                                error = %e,
                                "LLM classification failed"
                            ),
                            Err(_) => debug!(
                                subsystem = "ingest",
                                component = "pipeline",
                                "LLM classification timed out"
                            ),
                        }
                    }
                }

                let rolling_evidence = detect_rolling_evidence(&opp);

                // A stale close date contradicted by a fresh future deadline
                // is cleared so the open tab can pick the row up.
                let normalized_close_at = match (opp.close_at, decision.next_deadline_at) {
                    (Some(close), Some(next)) if close <= now && next > now => None,
                    (close, _) => close,
                };

                if self
                    .db
                    .opportunities
                    .update_status_row(&row.id, &decision, rolling_evidence, normalized_close_at)
                    .await?
                {
                    updated += 1;
                }
                *counts
                    .entry(decision.normalized_status.as_str().to_string())
                    .or_insert(0) += 1;
                last_id = row.id;
            }
        }

        Ok((counts, updated))
    }

    /// Selective re-enrichment of rows with weak or stale evidence.
    pub async fn enrich_opportunities(
        &self,
        domain: &str,
        only_missing_deadlines: bool,
        batch_size: i64,
        max_items: i64,
        confidence_threshold: f64,
    ) -> Result<EnrichmentStats> {
        let batch_size = if batch_size <= 0 { 200 } else { batch_size };
        let max_items = if max_items <= 0 { batch_size } else { max_items };
        let confidence_threshold = if confidence_threshold <= 0.0 {
            0.6
        } else {
            confidence_threshold
        };
        let ttl = domain_ttl_interval(domain);

        let mut stats = EnrichmentStats::default();

        let candidates = self
            .db
            .opportunities
            .select_enrichment_candidates(
                domain,
                only_missing_deadlines,
                confidence_threshold,
                batch_size,
                ttl,
            )
            .await?;

        for candidate in candidates {
            if stats.items_scanned >= max_items {
                break;
            }
            stats.items_scanned += 1;

            let mut opp = candidate.opp;
            let before_count = opp.deadline_evidence.len() as i64;

            if let Err(e) = self.apply_evidence_enrichment(&mut opp).await {
                debug!(
                    subsystem = "ingest",
                    component = "pipeline",
                    url = opp.external_url.as_str(),
                    error = %e,
                    "Enrichment fetch failed"
                );
            }
            opp.rolling_evidence = detect_rolling_evidence(&opp);
            if !opp.rolling_evidence {
                opp.is_rolling = false;
            }

            stats.deadlines_added += (opp.deadline_evidence.len() as i64 - before_count).max(0);
            if let Some(pdfs) = opp
                .source_evidence_json
                .get("pdfs_parsed")
                .and_then(|v| v.as_i64())
            {
                stats.pdfs_parsed += pdfs;
            }

            let decision = compute_status_decision(&opp, Utc::now());
            if candidate.previous_status != decision.normalized_status.as_str()
                || candidate.previous_reason != decision.status_reason
            {
                stats.status_changes += 1;
            }

            let (status_code, bytes, duration_ms, blocked) =
                extract_fetch_meta(&opp.source_evidence_json);

            if self
                .db
                .opportunities
                .apply_enrichment_update(
                    &candidate.id,
                    &opp,
                    &decision,
                    status_code,
                    bytes,
                    duration_ms,
                    blocked,
                )
                .await?
            {
                stats.items_updated += 1;
            }
        }

        Ok(stats)
    }

    /// Strip leading punctuation/numbering from the category/eligibility
    /// arrays in one idempotent SQL pass.
    pub async fn backfill_clean_arrays(&self) -> Result<i64> {
        self.db.opportunities.backfill_clean_arrays().await
    }

    fn rate_limited_fetcher(&self) -> Option<&RateLimitedFetcher> {
        self.rate_limited.as_deref()
    }
}

fn apply_llm_status(decision: &mut StatusDecision, llm_status: &str) {
    match llm_status {
        "posted" => {
            decision.normalized_status = NormalizedStatus::Open;
            decision.status_reason = "llm_classified_open".to_string();
            decision.status_confidence = 0.6;
        }
        "closed" => {
            decision.normalized_status = NormalizedStatus::Closed;
            decision.status_reason = "llm_classified_closed".to_string();
            decision.status_confidence = 0.6;
        }
        "forthcoming" => {
            decision.normalized_status = NormalizedStatus::Upcoming;
            decision.status_reason = "llm_classified_upcoming".to_string();
            decision.status_confidence = 0.6;
        }
        _ => {}
    }
}

/// Sanitize HTML through the allow-list policy: scripts and iframes are
/// removed; images, links and tables survive.
pub fn sanitize_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    ammonia::clean(html)
}

/// Cap a string at `max` characters without splitting a character.
pub fn cap_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Rows with no deadline signal at all are worth an adapter pass.
pub fn should_enrich_evidence(opp: &Opportunity) -> bool {
    !opp.rolling_evidence
        && opp.next_deadline_at.is_none()
        && opp.close_at.is_none()
        && opp.deadline_at.is_none()
}

pub fn is_api_first_source(domain: &str) -> bool {
    let d = domain.trim().to_lowercase();
    API_FIRST_DOMAINS.iter().any(|candidate| d.contains(candidate))
}

/// Enrichment re-visit TTL per domain family.
pub fn domain_ttl_interval(domain: &str) -> &'static str {
    let d = domain.trim().to_lowercase();
    if d.contains("gob.pe") || d.contains("proinnovate") || d.contains("prociencia") {
        "48 hours"
    } else if d.contains("ukri") || d.contains("neh") {
        "72 hours"
    } else {
        "168 hours"
    }
}

/// Pull the last-fetch observability values out of the evidence bag.
pub fn extract_fetch_meta(
    evidence: &JsonMap<String, JsonValue>,
) -> (Option<i32>, Option<i64>, Option<i64>, Option<bool>) {
    let Some(JsonValue::Object(fetch)) = evidence.get("fetch_meta") else {
        return (None, None, None, None);
    };

    let status_code = fetch
        .get("root_status_code")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);
    let bytes = fetch.get("root_bytes").and_then(|v| v.as_i64());
    let duration_ms = fetch.get("root_duration_ms").and_then(|v| v.as_i64());
    let blocked = fetch
        .get("blocked_detected")
        .and_then(|v| v.as_bool())
        .or_else(|| fetch.get("pdf_unparseable").and_then(|v| v.as_bool()));

    (status_code, bytes, duration_ms, blocked)
}

fn page_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let sel = Selector::parse("title").ok()?;
    doc.select(&sel)
        .next()
        .map(|t| t.text().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_first_domains_match_by_substring() {
        assert!(is_api_first_source("grants.gov"));
        assert!(is_api_first_source("api.grants.gov"));
        assert!(is_api_first_source("EC.EUROPA.EU"));
        assert!(!is_api_first_source("gob.pe"));
        assert!(!is_api_first_source(""));
    }

    #[test]
    fn ttl_tiers_by_domain_family() {
        assert_eq!(domain_ttl_interval("www.gob.pe"), "48 hours");
        assert_eq!(domain_ttl_interval("proinnovate.gob.pe"), "48 hours");
        assert_eq!(domain_ttl_interval("prociencia.gob.pe"), "48 hours");
        assert_eq!(domain_ttl_interval("www.ukri.org"), "72 hours");
        assert_eq!(domain_ttl_interval("neh.gov"), "72 hours");
        assert_eq!(domain_ttl_interval("grants.gov"), "168 hours");
        assert_eq!(domain_ttl_interval(""), "168 hours");
    }

    #[test]
    fn sanitize_html_strips_scripts_keeps_tables() {
        let html = r#"<table><tr><td>Cierre</td></tr></table><script>alert(1)</script><iframe src="x"></iframe><a href="https://example.org">link</a>"#;
        let out = sanitize_html(html);
        assert!(out.contains("<table>"));
        assert!(out.contains("<a"));
        assert!(!out.contains("<script"));
        assert!(!out.contains("<iframe"));
    }

    #[test]
    fn cap_chars_is_char_safe() {
        assert_eq!(cap_chars("áéíóú", 3), "áéí");
        assert_eq!(cap_chars("short", 100), "short");
    }

    #[test]
    fn should_enrich_only_when_no_deadline_signal() {
        let bare = Opportunity::default();
        assert!(should_enrich_evidence(&bare));

        let with_deadline = Opportunity {
            deadline_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(!should_enrich_evidence(&with_deadline));

        let rolling = Opportunity {
            rolling_evidence: true,
            ..Default::default()
        };
        assert!(!should_enrich_evidence(&rolling));
    }

    #[test]
    fn fetch_meta_extraction_reads_reserved_keys() {
        let mut evidence = JsonMap::new();
        evidence.insert(
            "fetch_meta".to_string(),
            json!({
                "root_status_code": 200,
                "root_bytes": 52431,
                "root_duration_ms": 420,
                "blocked_detected": false
            }),
        );
        let (code, bytes, duration, blocked) = extract_fetch_meta(&evidence);
        assert_eq!(code, Some(200));
        assert_eq!(bytes, Some(52431));
        assert_eq!(duration, Some(420));
        assert_eq!(blocked, Some(false));
    }

    #[test]
    fn fetch_meta_falls_back_to_pdf_unparseable() {
        let mut evidence = JsonMap::new();
        evidence.insert("fetch_meta".to_string(), json!({"pdf_unparseable": true}));
        let (_, _, _, blocked) = extract_fetch_meta(&evidence);
        assert_eq!(blocked, Some(true));
    }

    #[test]
    fn fetch_meta_missing_is_all_none() {
        let evidence = JsonMap::new();
        assert_eq!(extract_fetch_meta(&evidence), (None, None, None, None));
    }

    #[test]
    fn llm_status_mapping() {
        let mut decision = StatusDecision {
            normalized_status: NormalizedStatus::NeedsReview,
            status_reason: "missing_deadline".into(),
            status_confidence: 0.25,
            next_deadline_at: None,
            is_results_page: false,
        };
        apply_llm_status(&mut decision, "forthcoming");
        assert_eq!(decision.normalized_status, NormalizedStatus::Upcoming);
        assert_eq!(decision.status_reason, "llm_classified_upcoming");
        assert_eq!(decision.status_confidence, 0.6);

        // Unknown statuses leave the decision untouched.
        apply_llm_status(&mut decision, "banana");
        assert_eq!(decision.normalized_status, NormalizedStatus::Upcoming);
    }

    #[test]
    fn page_title_extraction() {
        assert_eq!(
            page_title("<html><head><title>Fondo Azul</title></head></html>").as_deref(),
            Some("Fondo Azul")
        );
        assert!(page_title("<p>no title</p>").is_none());
    }
}
