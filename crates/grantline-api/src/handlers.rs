//! Request handlers for the public and admin surfaces.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, warn};
use uuid::Uuid;

use grantline_core::defaults::{QUERY_EMBED_TIMEOUT_SECS, RECOMPUTE_JOB_CAP_SECS};
use grantline_core::{Error, Opportunity};
use grantline_db::{AggregationParams, AggregationResult, ListParams, ListResult};
use grantline_ingest::ensure_public_http_url;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Raw query pairs; repeatable parameters arrive once per occurrence.
pub type RawQuery = Query<Vec<(String, String)>>;

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn list_opportunities(
    State(state): State<AppState>,
    Query(raw): RawQuery,
) -> ApiResult<Json<ListResult>> {
    let mut params = ListParams {
        limit: 20,
        offset: 0,
        ..Default::default()
    };

    for (key, value) in &raw {
        match key.as_str() {
            "q" => params.query = value.clone(),
            "source" => params.source = value.clone(),
            "region" => params.region = split_csv(value),
            "funder_type" => params.funder_type = split_csv(value),
            "country" => params.country = split_csv(value),
            "agency_code" => params.agency_code = value.clone(),
            "agency_name" => params.agency_name = split_csv(value),
            "limit" => {
                if let Ok(l) = value.parse::<i64>() {
                    if l > 0 && l <= 100 {
                        params.limit = l;
                    }
                }
            }
            "offset" => {
                if let Ok(o) = value.parse::<i64>() {
                    if o >= 0 {
                        params.offset = o;
                    }
                }
            }
            "min_amount" => {
                if let Ok(v) = value.parse::<Decimal>() {
                    if v > Decimal::ZERO {
                        params.min_amount = Some(v);
                    }
                }
            }
            "max_amount" => {
                if let Ok(v) = value.parse::<Decimal>() {
                    if v > Decimal::ZERO {
                        params.max_amount = Some(v);
                    }
                }
            }
            "deadline_days" => {
                if let Ok(v) = value.parse::<i32>() {
                    if v > 0 {
                        params.deadline_days = Some(v);
                    }
                }
            }
            "is_rolling" => match value.as_str() {
                "true" => params.is_rolling = Some(true),
                "false" => params.is_rolling = Some(false),
                _ => {}
            },
            "categories" => params.categories.push(value.clone()),
            "eligibility" => params.eligibility.push(value.clone()),
            "sort" => params.sort_by = value.clone(),
            "status" => params.status = value.clone(),
            _ => {}
        }
    }

    // Semantic ranking needs a query embedding; keyword search is the
    // fallback when the embedder is slow or down.
    if !params.query.is_empty() {
        if let Some(backend) = &state.ai {
            match tokio::time::timeout(
                Duration::from_secs(QUERY_EMBED_TIMEOUT_SECS),
                backend.as_embedding().embed_text(&params.query),
            )
            .await
            {
                Ok(Ok(vec)) if !vec.is_empty() => params.query_embedding = Some(vec),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(
                    subsystem = "api",
                    component = "search",
                    error = %e,
                    "Query embedding failed, falling back to keyword search"
                ),
                Err(_) => warn!(
                    subsystem = "api",
                    component = "search",
                    "Query embedding timed out, falling back to keyword search"
                ),
            }
        }
    }

    let result = state.db.opportunities.list(&params).await?;
    Ok(Json(result))
}

pub async fn get_opportunity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Opportunity>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError(Error::NotFound("opportunity not found".into())))?;
    let opp = state.db.opportunities.get(id).await?;
    Ok(Json(opp))
}

pub async fn get_sources(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.db.opportunities.sources().await?))
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    Ok(Json(state.db.opportunities.stats().await?))
}

pub async fn get_aggregations(
    State(state): State<AppState>,
    Query(raw): RawQuery,
) -> ApiResult<Json<AggregationResult>> {
    let mut params = AggregationParams::default();
    for (key, value) in &raw {
        match key.as_str() {
            "status" => params.status = value.clone(),
            "region" => params.region = split_csv(value),
            "funder_type" => params.funder_type = split_csv(value),
            "country" => params.country = split_csv(value),
            "agency_name" => params.agency_name = split_csv(value),
            _ => {}
        }
    }
    Ok(Json(state.db.opportunities.aggregations(&params).await?))
}

// ── Admin: ingestion ───────────────────────────────────────────────────

pub async fn trigger_ingest(
    State(state): State<AppState>,
    Query(raw): RawQuery,
) -> ApiResult<Json<JsonValue>> {
    let url = raw
        .iter()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.clone())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError(Error::InvalidInput("url param required".into())))?;

    // Scheme/host/resolved-address validation before any fetch happens.
    ensure_public_http_url(&url).await.map_err(|e| match e {
        Error::Blocked(msg) => ApiError(Error::Blocked(msg)),
        Error::Fetch(msg) => ApiError(Error::InvalidInput(msg)),
        other => ApiError(other),
    })?;

    state.pipeline.ingest_url(&url).await?;

    Ok(Json(json!({ "message": "Ingestion complete", "url": url })))
}

pub async fn ingest_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let stats = state.pipeline.ingest_source(&source_id).await?;
    Ok(Json(json!({
        "message": format!("{} ingestion complete", source_id),
        "stats": stats,
    })))
}

pub async fn ingest_all(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let results = state.pipeline.ingest_all().await?;
    Ok(Json(json!({
        "message": "All registry sources ingestion complete",
        "results": results,
    })))
}

// ── Admin: background recompute ────────────────────────────────────────

fn query_param<'a>(raw: &'a [(String, String)], name: &str) -> Option<&'a str> {
    raw.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

pub async fn recompute_status(
    State(state): State<AppState>,
    Query(raw): RawQuery,
) -> ApiResult<(StatusCode, Json<JsonValue>)> {
    let mut batch_size = 500i64;
    if let Some(parsed) = query_param(&raw, "batch_size").and_then(|v| v.parse::<i64>().ok()) {
        if parsed > 0 && parsed <= 5000 {
            batch_size = parsed;
        }
    }

    let job_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    if let Err(running) = state.jobs.try_start(&job_id) {
        return Err(ApiError(Error::Conflict(format!(
            "a recompute job is already running: {}",
            running
        ))));
    }

    let pipeline = state.pipeline.clone();
    let jobs = state.jobs.clone();
    let task_job_id = job_id.clone();

    // Detached from the request lifecycle; only the wall-clock cap stops it.
    tokio::spawn(async move {
        let work = async {
            let (status_counts, status_updated) = pipeline.recompute_statuses(batch_size).await?;
            let arrays_updated = pipeline.backfill_clean_arrays().await.unwrap_or(0);
            Ok::<_, Error>(json!({
                "status_updated": status_updated,
                "status_counts": status_counts,
                "arrays_updated": arrays_updated,
                "batch_size_used": batch_size,
            }))
        };

        match tokio::time::timeout(Duration::from_secs(RECOMPUTE_JOB_CAP_SECS), work).await {
            Ok(Ok(result)) => {
                info!(
                    subsystem = "api",
                    component = "jobs",
                    job_id = task_job_id.as_str(),
                    "Recompute job completed"
                );
                jobs.complete(&task_job_id, result);
            }
            Ok(Err(e)) => {
                error!(
                    subsystem = "api",
                    component = "jobs",
                    job_id = task_job_id.as_str(),
                    error = %e,
                    "Recompute job failed"
                );
                jobs.fail(&task_job_id, e.to_string());
            }
            Err(_) => {
                error!(
                    subsystem = "api",
                    component = "jobs",
                    job_id = task_job_id.as_str(),
                    "Recompute job hit the wall-clock cap"
                );
                jobs.fail(&task_job_id, "job timed out".to_string());
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Recompute job started",
            "job_id": job_id,
            "poll": format!("/api/v1/admin/job/{}", job_id),
        })),
    ))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let job = state
        .jobs
        .get(&id)
        .ok_or_else(|| ApiError(Error::NotFound("job not found".into())))?;

    let mut resp = json!({
        "id": job.id,
        "status": job.status,
        "started_at": job.started_at,
    });
    if let Some(ended_at) = job.ended_at {
        resp["ended_at"] = json!(ended_at);
        resp["duration"] = json!(format!("{}s", (ended_at - job.started_at).num_seconds()));
    }
    if let Some(result) = job.result {
        resp["result"] = result;
    }
    if let Some(error) = job.error {
        resp["error"] = json!(error);
    }

    Ok(Json(resp))
}

// ── Admin: selective enrichment ────────────────────────────────────────

pub async fn enrich_opportunities(
    State(state): State<AppState>,
    Query(raw): RawQuery,
) -> ApiResult<Json<JsonValue>> {
    let domain = query_param(&raw, "domain").unwrap_or("").to_string();

    let only_missing_deadlines = query_param(&raw, "only_missing_deadlines")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let mut batch_size = 200i64;
    if let Some(parsed) = query_param(&raw, "batch_size").and_then(|v| v.parse::<i64>().ok()) {
        if parsed > 0 && parsed <= 2000 {
            batch_size = parsed;
        }
    }

    let mut max_items = batch_size;
    if let Some(parsed) = query_param(&raw, "max_items").and_then(|v| v.parse::<i64>().ok()) {
        if parsed > 0 && parsed <= 10_000 {
            max_items = parsed;
        }
    }

    let mut confidence_threshold = 0.6f64;
    if let Some(parsed) = query_param(&raw, "confidence_threshold").and_then(|v| v.parse::<f64>().ok())
    {
        if (0.0..=1.0).contains(&parsed) {
            confidence_threshold = parsed;
        }
    }

    let enrich_stats = state
        .pipeline
        .enrich_opportunities(
            &domain,
            only_missing_deadlines,
            batch_size,
            max_items,
            confidence_threshold,
        )
        .await?;

    let (status_counts, status_updated) = state.pipeline.recompute_statuses(batch_size).await?;

    Ok(Json(json!({
        "message": "Selective enrichment complete",
        "domain": domain,
        "only_missing_deadlines": only_missing_deadlines,
        "batch_size_used": batch_size,
        "max_items": max_items,
        "confidence_threshold": confidence_threshold,
        "items_scanned": enrich_stats.items_scanned,
        "items_updated": enrich_stats.items_updated,
        "pdfs_parsed": enrich_stats.pdfs_parsed,
        "deadlines_added": enrich_stats.deadlines_added,
        "status_changes": enrich_stats.status_changes,
        "status_updated": status_updated,
        "status_counts": status_counts,
    })))
}
