//! Opportunity repository: monotonic-trust upsert, hybrid listing, facet
//! aggregations, and the row IO backing the recompute and enrichment sweeps.

use chrono::{DateTime, SecondsFormat, Utc};
use pgvector::Vector;
use rust_decimal::Decimal;
use serde_json::{Map as JsonMap, Value as JsonValue};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use grantline_core::{
    parse_iso_candidate, DeadlineEvidence, Error, NormalizedStatus, Opportunity, Result,
    StatusDecision,
};

/// Column list shared by list/get queries. Excludes the heavyweight
/// description and embedding payloads.
const SELECT_COLS: &str = "id, title, summary, external_url, source_domain, \
source_id, opportunity_number, agency_name, agency_code, funder_type, \
amount_min, amount_max, currency, deadline_at, next_deadline_at, open_date, open_at, close_at, expiration_at, \
is_rolling, rolling_evidence, doc_type, cfda_list, opp_status, source_status_raw, \
normalized_status::text AS normalized_status, status_reason, deadlines, is_results_page, \
source_evidence_json, status_confidence, region, country, categories, eligibility, created_at";

/// Listing filters and ranking controls.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub query: String,
    pub query_embedding: Option<Vec<f32>>,
    pub source: String,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub deadline_days: Option<i32>,
    pub is_rolling: Option<bool>,
    pub limit: i64,
    pub offset: i64,
    pub categories: Vec<String>,
    pub eligibility: Vec<String>,
    pub region: Vec<String>,
    pub funder_type: Vec<String>,
    pub country: Vec<String>,
    pub agency_code: String,
    pub agency_name: Vec<String>,
    pub sort_by: String,
    pub status: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ListResult {
    pub opportunities: Vec<Opportunity>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// A single facet count.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Aggregation {
    pub value: String,
    pub count: i64,
}

/// All facet counts for the sidebar filters.
#[derive(Debug, Default, serde::Serialize)]
pub struct AggregationResult {
    pub regions: Vec<Aggregation>,
    pub funder_types: Vec<Aggregation>,
    pub agencies: Vec<Aggregation>,
    pub countries: Vec<Aggregation>,
}

/// Facet filters; each dimension's counts omit its own selected values.
#[derive(Debug, Clone, Default)]
pub struct AggregationParams {
    pub status: String,
    pub region: Vec<String>,
    pub funder_type: Vec<String>,
    pub country: Vec<String>,
    pub agency_name: Vec<String>,
}

/// One row pulled for a status sweep, keyed by its text-form id cursor.
#[derive(Debug)]
pub struct StatusSweepRow {
    pub id: String,
    pub opp: Opportunity,
}

/// One row selected for enrichment, with its pre-sweep status fields.
#[derive(Debug)]
pub struct EnrichmentCandidate {
    pub id: String,
    pub previous_status: String,
    pub previous_reason: String,
    pub opp: Opportunity,
}

enum QueryParam {
    Text(String),
    TextArray(Vec<String>),
    Int(i64),
    Decimal(Decimal),
    Bool(bool),
    Embedding(Vector),
}

fn apply_binds<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [QueryParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            QueryParam::Text(v) => query.bind(v),
            QueryParam::TextArray(v) => query.bind(v),
            QueryParam::Int(v) => query.bind(v),
            QueryParam::Decimal(v) => query.bind(v),
            QueryParam::Bool(v) => query.bind(v),
            QueryParam::Embedding(v) => query.bind(v),
        };
    }
    query
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn nil_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// The status-tab constraint shared by listing and aggregations.
///
/// `open` excludes results pages and requires live time evidence; `closed`
/// folds in archived; `all` applies no filter; anything else is matched
/// exactly (with `posted`/`active` treated as `open`).
fn status_constraint(status: &str) -> (String, Option<String>) {
    let status = match status {
        "" | "active" | "posted" => "open",
        other => other,
    };

    match status {
        "open" => (
            " AND normalized_status = 'open' AND is_results_page = false AND (rolling_evidence = true OR next_deadline_at >= NOW() OR close_at >= NOW())"
                .to_string(),
            None,
        ),
        "closed" => (
            " AND normalized_status::text IN ('closed','archived')".to_string(),
            None,
        ),
        "all" => (String::new(), None),
        exact => (
            " AND normalized_status::text = ${}".to_string(),
            Some(exact.to_string()),
        ),
    }
}

fn sanitize_string_slice(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Merge evidence entries and legacy date strings into a deduplicated
/// evidence list. Legacy dates become `source="legacy"` entries with
/// confidence 0.5; evidence without a source/url/confidence gets defaults.
pub(crate) fn merge_deadline_evidence(
    existing: &[DeadlineEvidence],
    legacy_dates: &[String],
    fallback_url: &str,
) -> Vec<DeadlineEvidence> {
    let mut out: Vec<DeadlineEvidence> = Vec::with_capacity(existing.len() + legacy_dates.len());
    let mut seen = std::collections::HashSet::new();

    for ev in existing {
        let iso_value = ev.parsed_date_iso.trim().to_string();
        if iso_value.is_empty() || !seen.insert(iso_value.clone()) {
            continue;
        }
        let mut ev = ev.clone();
        if ev.source.is_empty() {
            ev.source = "html".to_string();
        }
        if ev.url.is_empty() {
            ev.url = fallback_url.to_string();
        }
        if ev.confidence == 0.0 {
            ev.confidence = 0.7;
        }
        out.push(ev);
    }

    for raw in legacy_dates {
        let Some(dt) = parse_iso_candidate(raw) else {
            continue;
        };
        let iso_value = iso(dt);
        if !seen.insert(iso_value.clone()) {
            continue;
        }
        out.push(DeadlineEvidence {
            source: "legacy".to_string(),
            url: fallback_url.to_string(),
            snippet: raw.clone(),
            parsed_date_iso: iso_value,
            label: "legacy_deadline".to_string(),
            confidence: 0.5,
        });
    }

    out
}

/// Decode the `deadlines` jsonb payload: an array of evidence objects, or a
/// legacy array of date strings.
pub(crate) fn decode_deadlines_payload(raw: &JsonValue) -> (Vec<String>, Vec<DeadlineEvidence>) {
    if raw.is_null() {
        return (Vec::new(), Vec::new());
    }

    if let Ok(evidence) = serde_json::from_value::<Vec<DeadlineEvidence>>(raw.clone()) {
        let mut dates = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for ev in &evidence {
            let d = ev.parsed_date_iso.trim();
            if !d.is_empty() && seen.insert(d.to_lowercase()) {
                dates.push(d.to_string());
            }
        }
        return (dates, evidence);
    }

    if let Ok(dates) = serde_json::from_value::<Vec<String>>(raw.clone()) {
        let evidence = merge_deadline_evidence(&[], &dates, "");
        return (dates, evidence);
    }

    (Vec::new(), Vec::new())
}

fn deadlines_json(opp: &Opportunity) -> Option<JsonValue> {
    let merged = merge_deadline_evidence(&opp.deadline_evidence, &opp.deadlines, &opp.external_url);
    if merged.is_empty() {
        return None;
    }
    serde_json::to_value(merged).ok()
}

fn evidence_json(opp: &Opportunity) -> Option<JsonValue> {
    if opp.source_evidence_json.is_empty() {
        return None;
    }
    Some(JsonValue::Object(opp.source_evidence_json.clone()))
}

fn opportunity_from_row(row: &PgRow) -> Result<Opportunity> {
    let mut opp = Opportunity {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        summary: row.try_get::<Option<String>, _>("summary")?.unwrap_or_default(),
        external_url: row.try_get("external_url")?,
        source_domain: row
            .try_get::<Option<String>, _>("source_domain")?
            .unwrap_or_default(),
        source_id: row.try_get::<Option<String>, _>("source_id")?.unwrap_or_default(),
        opportunity_number: row
            .try_get::<Option<String>, _>("opportunity_number")?
            .unwrap_or_default(),
        agency_name: row
            .try_get::<Option<String>, _>("agency_name")?
            .unwrap_or_default(),
        agency_code: row
            .try_get::<Option<String>, _>("agency_code")?
            .unwrap_or_default(),
        funder_type: row
            .try_get::<Option<String>, _>("funder_type")?
            .unwrap_or_default(),
        amount_min: row.try_get("amount_min")?,
        amount_max: row.try_get("amount_max")?,
        currency: row.try_get("currency")?,
        deadline_at: row.try_get("deadline_at")?,
        next_deadline_at: row.try_get("next_deadline_at")?,
        open_date: row.try_get("open_date")?,
        open_at: row.try_get("open_at")?,
        close_at: row.try_get("close_at")?,
        expiration_at: row.try_get("expiration_at")?,
        is_rolling: row.try_get("is_rolling")?,
        rolling_evidence: row.try_get("rolling_evidence")?,
        doc_type: row.try_get::<Option<String>, _>("doc_type")?.unwrap_or_default(),
        cfda_list: row.try_get("cfda_list")?,
        opp_status: row.try_get::<Option<String>, _>("opp_status")?.unwrap_or_default(),
        source_status_raw: row
            .try_get::<Option<String>, _>("source_status_raw")?
            .unwrap_or_default(),
        status_reason: row
            .try_get::<Option<String>, _>("status_reason")?
            .unwrap_or_default(),
        status_confidence: row.try_get("status_confidence")?,
        is_results_page: row.try_get("is_results_page")?,
        region: row.try_get::<Option<String>, _>("region")?.unwrap_or_default(),
        country: row.try_get::<Option<String>, _>("country")?.unwrap_or_default(),
        categories: row.try_get("categories")?,
        eligibility: row.try_get("eligibility")?,
        created_at: row.try_get("created_at")?,
        ..Default::default()
    };

    if let Some(status) = NormalizedStatus::parse(
        &row.try_get::<Option<String>, _>("normalized_status")?
            .unwrap_or_default(),
    ) {
        opp.normalized_status = status;
    }

    if let Some(raw) = row.try_get::<Option<JsonValue>, _>("deadlines")? {
        let (dates, evidence) = decode_deadlines_payload(&raw);
        opp.deadlines = dates;
        opp.deadline_evidence = evidence;
    }
    if let Some(JsonValue::Object(map)) =
        row.try_get::<Option<JsonValue>, _>("source_evidence_json")?
    {
        opp.source_evidence_json = map;
    }

    Ok(opp)
}

/// PostgreSQL repository for opportunities.
pub struct PgOpportunityRepository {
    pool: PgPool,
}

impl PgOpportunityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert one opportunity keyed on `(source_domain, source_id)`.
    ///
    /// The single statement encodes the prefer-stronger rules: descriptive
    /// fields keep the existing value when the incoming one is empty,
    /// `status_confidence` never decreases, and a stored
    /// closed/archived/funded `opp_status` is not downgraded by an incoming
    /// posted/empty value.
    pub async fn upsert(&self, opp: &Opportunity) -> Result<()> {
        let query = r#"
            INSERT INTO opportunities (
                title, summary, description_html, external_url, source_domain,
                source_id, opportunity_number, agency_name, agency_code, funder_type,
                amount_min, amount_max, currency, deadline_at, open_date,
                is_rolling, doc_type, cfda_list, opp_status, close_date_raw,
                region, country, categories, eligibility, embedding,
                source_run_id, canonical_url, raw_url, content_type,
                source_status_raw, normalized_status, status_reason, next_deadline_at,
                expiration_at, close_at, open_at, deadlines, is_results_page,
                source_evidence_json, status_confidence, rolling_evidence
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20,
                $21, $22, $23, $24, $25,
                $26, $27, $28, $29,
                $30, $31::normalized_status_enum, $32, $33,
                $34, $35, $36, $37::jsonb, $38,
                $39::jsonb, $40, $41
            )
            ON CONFLICT (source_domain, source_id) DO UPDATE SET
                updated_at = NOW(),
                title = EXCLUDED.title,
                summary = EXCLUDED.summary,
                description_html = COALESCE(NULLIF(EXCLUDED.description_html, ''), opportunities.description_html),
                deadline_at = COALESCE(EXCLUDED.deadline_at, opportunities.deadline_at),
                amount_min = COALESCE(NULLIF(EXCLUDED.amount_min, 0), opportunities.amount_min),
                amount_max = COALESCE(NULLIF(EXCLUDED.amount_max, 0), opportunities.amount_max),
                currency = COALESCE(NULLIF(EXCLUDED.currency, ''), opportunities.currency),
                open_date = COALESCE(EXCLUDED.open_date, opportunities.open_date),
                close_date_raw = COALESCE(NULLIF(EXCLUDED.close_date_raw, ''), opportunities.close_date_raw),
                doc_type = COALESCE(NULLIF(EXCLUDED.doc_type, ''), opportunities.doc_type),
                opp_status = CASE
                    WHEN opportunities.opp_status IN ('closed', 'archived', 'funded') AND COALESCE(EXCLUDED.opp_status, 'posted') IN ('posted', '') THEN opportunities.opp_status
                    ELSE COALESCE(NULLIF(EXCLUDED.opp_status, ''), opportunities.opp_status)
                END,
                is_rolling = COALESCE(opportunities.is_rolling, false) OR COALESCE(EXCLUDED.is_rolling, false),
                opportunity_number = COALESCE(NULLIF(EXCLUDED.opportunity_number, ''), opportunities.opportunity_number),
                categories = COALESCE(NULLIF(EXCLUDED.categories, '{}'::text[]), opportunities.categories),
                eligibility = COALESCE(NULLIF(EXCLUDED.eligibility, '{}'::text[]), opportunities.eligibility),
                cfda_list = COALESCE(NULLIF(EXCLUDED.cfda_list, '{}'::text[]), opportunities.cfda_list),
                embedding = COALESCE(EXCLUDED.embedding, opportunities.embedding),
                source_run_id = EXCLUDED.source_run_id,
                canonical_url = EXCLUDED.canonical_url,
                raw_url = EXCLUDED.raw_url,
                content_type = EXCLUDED.content_type,
                source_status_raw = COALESCE(NULLIF(EXCLUDED.source_status_raw, ''), opportunities.source_status_raw),
                normalized_status = EXCLUDED.normalized_status,
                status_reason = EXCLUDED.status_reason,
                next_deadline_at = EXCLUDED.next_deadline_at,
                expiration_at = COALESCE(EXCLUDED.expiration_at, opportunities.expiration_at),
                close_at = COALESCE(EXCLUDED.close_at, opportunities.close_at),
                open_at = COALESCE(EXCLUDED.open_at, opportunities.open_at),
                deadlines = COALESCE(EXCLUDED.deadlines, opportunities.deadlines),
                is_results_page = EXCLUDED.is_results_page,
                source_evidence_json = COALESCE(EXCLUDED.source_evidence_json, opportunities.source_evidence_json),
                status_confidence = GREATEST(COALESCE(EXCLUDED.status_confidence, 0), COALESCE(opportunities.status_confidence, 0)),
                rolling_evidence = COALESCE(EXCLUDED.rolling_evidence, opportunities.rolling_evidence)
        "#;

        let embedding = opp.embedding.as_ref().map(|v| Vector::from(v.clone()));

        sqlx::query(query)
            .bind(&opp.title)
            .bind(&opp.summary)
            .bind(&opp.description_html)
            .bind(&opp.external_url)
            .bind(nil_if_empty(&opp.source_domain))
            .bind(&opp.source_id)
            .bind(nil_if_empty(&opp.opportunity_number))
            .bind(nil_if_empty(&opp.agency_name))
            .bind(nil_if_empty(&opp.agency_code))
            .bind(nil_if_empty(&opp.funder_type))
            .bind(opp.amount_min)
            .bind(opp.amount_max)
            .bind(&opp.currency)
            .bind(opp.deadline_at)
            .bind(opp.open_date)
            .bind(opp.is_rolling)
            .bind(nil_if_empty(&opp.doc_type))
            .bind(&opp.cfda_list)
            .bind(nil_if_empty(&opp.opp_status))
            .bind(nil_if_empty(&opp.close_date_raw))
            .bind(nil_if_empty(&opp.region))
            .bind(nil_if_empty(&opp.country))
            .bind(&opp.categories)
            .bind(&opp.eligibility)
            .bind(embedding)
            .bind(opp.source_run_id)
            .bind(&opp.canonical_url)
            .bind(&opp.raw_url)
            .bind(&opp.content_type)
            .bind(nil_if_empty(&opp.source_status_raw))
            .bind(opp.normalized_status.as_str())
            .bind(nil_if_empty(&opp.status_reason))
            .bind(opp.next_deadline_at)
            .bind(opp.expiration_at)
            .bind(opp.close_at)
            .bind(opp.open_at)
            .bind(deadlines_json(opp))
            .bind(opp.is_results_page)
            .bind(evidence_json(opp))
            .bind(opp.status_confidence)
            .bind(opp.rolling_evidence)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Opportunity> {
        let sql = format!("SELECT {} FROM opportunities WHERE id = $1", SELECT_COLS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::OpportunityNotFound(id))?;
        opportunity_from_row(&row)
    }

    pub async fn get_by_source_id(
        &self,
        source_domain: &str,
        source_id: &str,
    ) -> Result<Option<Opportunity>> {
        let sql = format!(
            "SELECT {} FROM opportunities WHERE source_domain = $1 AND source_id = $2",
            SELECT_COLS
        );
        let row = sqlx::query(&sql)
            .bind(source_domain)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.map(|r| opportunity_from_row(&r)).transpose()
    }

    /// Hybrid listing: hard filters, status tab, keyword match, and
    /// relevance/deadline/amount/newest ordering with a sibling count query.
    pub async fn list(&self, params: &ListParams) -> Result<ListResult> {
        let mut where_clause = String::from("WHERE 1=1");
        let mut args: Vec<QueryParam> = Vec::new();

        if !params.query.is_empty() {
            args.push(QueryParam::Text(params.query.clone()));
            let idx = args.len();
            where_clause.push_str(&format!(
                " AND (search_vector @@ plainto_tsquery('english', ${idx}) OR title ILIKE '%' || ${idx} || '%')"
            ));
        }
        if !params.source.is_empty() {
            args.push(QueryParam::Text(params.source.clone()));
            where_clause.push_str(&format!(" AND source_domain = ${}", args.len()));
        }
        for (column, values) in [
            ("region", &params.region),
            ("funder_type", &params.funder_type),
            ("country", &params.country),
            ("agency_name", &params.agency_name),
        ] {
            if !values.is_empty() {
                args.push(QueryParam::TextArray(values.clone()));
                where_clause.push_str(&format!(" AND {} = ANY(${})", column, args.len()));
            }
        }
        if !params.agency_code.is_empty() {
            args.push(QueryParam::Text(params.agency_code.clone()));
            where_clause.push_str(&format!(" AND agency_code = ${}", args.len()));
        }
        if let Some(min) = params.min_amount {
            args.push(QueryParam::Decimal(min));
            where_clause.push_str(&format!(" AND amount_max >= ${}", args.len()));
        }
        if let Some(max) = params.max_amount {
            args.push(QueryParam::Decimal(max));
            where_clause.push_str(&format!(" AND amount_min <= ${}", args.len()));
        }

        let (constraint, exact_status) = status_constraint(&params.status);
        if let Some(exact) = exact_status {
            args.push(QueryParam::Text(exact));
            where_clause.push_str(&constraint.replace("${}", &format!("${}", args.len())));
        } else {
            where_clause.push_str(&constraint);
        }

        if let Some(days) = params.deadline_days {
            if days > 0 {
                args.push(QueryParam::Int(days as i64));
                where_clause.push_str(&format!(
                    " AND (is_rolling = true OR (next_deadline_at IS NOT NULL AND next_deadline_at >= NOW() AND next_deadline_at <= NOW() + (${} * INTERVAL '1 day')))",
                    args.len()
                ));
            }
        }
        if let Some(rolling) = params.is_rolling {
            args.push(QueryParam::Bool(rolling));
            where_clause.push_str(&format!(" AND is_rolling = ${}", args.len()));
        }

        let categories = sanitize_string_slice(&params.categories);
        if !categories.is_empty() {
            args.push(QueryParam::TextArray(categories));
            where_clause.push_str(&format!(" AND categories && ${}", args.len()));
        }
        let eligibility = sanitize_string_slice(&params.eligibility);
        if !eligibility.is_empty() {
            args.push(QueryParam::TextArray(eligibility));
            where_clause.push_str(&format!(" AND eligibility && ${}", args.len()));
        }

        let count_sql = format!("SELECT COUNT(*) FROM opportunities {}", where_clause);
        let total: i64 = apply_binds(sqlx::query(&count_sql), &args)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?
            .try_get(0)?;

        let mut select_sql = format!("SELECT {} FROM opportunities {}", SELECT_COLS, where_clause);

        match params.sort_by.as_str() {
            "deadline" => select_sql
                .push_str(" ORDER BY next_deadline_at ASC NULLS LAST, deadline_at ASC NULLS LAST"),
            "amount_desc" => select_sql.push_str(" ORDER BY amount_max DESC NULLS LAST"),
            "newest" => select_sql.push_str(" ORDER BY open_date DESC NULLS LAST, created_at DESC"),
            _ => {
                if let Some(embedding) = &params.query_embedding {
                    args.push(QueryParam::Embedding(Vector::from(embedding.clone())));
                    let vector_arg = args.len();
                    args.push(QueryParam::Text(params.query.clone()));
                    let query_arg = args.len();
                    select_sql.push_str(&format!(
                        " ORDER BY \
                          CASE WHEN embedding IS NULL THEN 1 ELSE 0 END ASC, \
                          COALESCE(1 - (embedding <=> ${vector_arg}), -1) DESC, \
                          CASE WHEN NULLIF(${query_arg}::text, '') IS NULL THEN 0 ELSE ts_rank(search_vector, plainto_tsquery('english', ${query_arg}::text)) END DESC, \
                          updated_at DESC NULLS LAST, \
                          created_at DESC"
                    ));
                } else if !params.query.is_empty() {
                    args.push(QueryParam::Text(params.query.clone()));
                    let query_arg = args.len();
                    select_sql.push_str(&format!(
                        " ORDER BY ts_rank(search_vector, plainto_tsquery('english', ${query_arg}::text)) DESC, updated_at DESC NULLS LAST, created_at DESC"
                    ));
                } else {
                    select_sql.push_str(" ORDER BY updated_at DESC NULLS LAST, created_at DESC");
                }
            }
        }

        args.push(QueryParam::Int(params.limit));
        let limit_arg = args.len();
        args.push(QueryParam::Int(params.offset));
        let offset_arg = args.len();
        select_sql.push_str(&format!(" LIMIT ${} OFFSET ${}", limit_arg, offset_arg));

        let rows = apply_binds(sqlx::query(&select_sql), &args)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let opportunities = rows
            .iter()
            .map(opportunity_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(ListResult {
            opportunities,
            total,
            limit: params.limit,
            offset: params.offset,
        })
    }

    /// Sorted distinct source domains.
    pub async fn sources(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT source_domain FROM opportunities WHERE source_domain IS NOT NULL ORDER BY source_domain",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .filter_map(|r| r.try_get::<String, _>(0).ok())
            .collect())
    }

    /// Corpus totals plus the normalized-status histogram.
    pub async fn stats(&self) -> Result<JsonValue> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM opportunities")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        let sources: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT source_domain) FROM opportunities")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        let rolling: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM opportunities WHERE is_rolling = true")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        let with_deadline: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM opportunities WHERE next_deadline_at IS NOT NULL AND next_deadline_at > NOW()",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut status_counts = JsonMap::new();
        let rows = sqlx::query(
            "SELECT normalized_status::text, COUNT(*) FROM opportunities GROUP BY normalized_status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        for row in rows {
            let status: String = row.try_get(0)?;
            let count: i64 = row.try_get(1)?;
            status_counts.insert(status, JsonValue::from(count));
        }

        let mut out = JsonMap::new();
        out.insert("total".into(), JsonValue::from(total));
        out.insert("sources".into(), JsonValue::from(sources));
        out.insert("rolling".into(), JsonValue::from(rolling));
        out.insert("with_deadline".into(), JsonValue::from(with_deadline));
        out.insert(
            "normalized_status_counts".into(),
            JsonValue::Object(status_counts),
        );
        Ok(JsonValue::Object(out))
    }

    /// Cross-faceted aggregations: each dimension's query reuses the status
    /// constraint but omits its own selected values, so the sidebar always
    /// shows the alternatives.
    pub async fn aggregations(&self, params: &AggregationParams) -> Result<AggregationResult> {
        let mut result = AggregationResult::default();

        result.regions = self
            .facet_counts(
                params,
                "region",
                "SELECT COALESCE(region, 'Unknown'), COUNT(*) FROM opportunities {where} GROUP BY region ORDER BY COUNT(*) DESC",
            )
            .await?
            .into_iter()
            .filter(|a| !a.value.is_empty())
            .collect();

        result.funder_types = self
            .facet_counts(
                params,
                "funder_type",
                "SELECT COALESCE(funder_type, 'Unknown'), COUNT(*) FROM opportunities {where} GROUP BY funder_type ORDER BY COUNT(*) DESC",
            )
            .await?
            .into_iter()
            .filter(|a| !a.value.is_empty())
            .collect();

        result.agencies = self
            .facet_counts(
                params,
                "agency_name",
                "SELECT COALESCE(agency_name, 'Unknown'), COUNT(*) FROM opportunities {where} AND agency_name IS NOT NULL AND agency_name != '' GROUP BY agency_name ORDER BY COUNT(*) DESC",
            )
            .await?;

        result.countries = self
            .facet_counts(
                params,
                "country",
                "SELECT COALESCE(country, 'Unknown'), COUNT(*) FROM opportunities {where} AND country IS NOT NULL AND country != '' GROUP BY country ORDER BY COUNT(*) DESC LIMIT 50",
            )
            .await?;

        Ok(result)
    }

    async fn facet_counts(
        &self,
        params: &AggregationParams,
        exclude: &str,
        template: &str,
    ) -> Result<Vec<Aggregation>> {
        let (where_clause, args) = build_aggregation_where_excluding(params, exclude);
        let sql = template.replace("{where}", &where_clause);

        let rows = apply_binds(sqlx::query(&sql), &args)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let value: String = row.try_get(0).ok()?;
                let count: i64 = row.try_get(1).ok()?;
                Some(Aggregation { value, count })
            })
            .collect())
    }

    // ── Status sweep IO ─────────────────────────────────────────────────

    /// Pull a recompute batch: rows after `last_id` ordered by text-form id.
    pub async fn fetch_status_batch(
        &self,
        last_id: &str,
        batch_size: i64,
    ) -> Result<Vec<StatusSweepRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id::text AS sweep_id, title, COALESCE(summary,'') AS summary,
                   COALESCE(description_html,'') AS description_html, external_url,
                   is_rolling, rolling_evidence, COALESCE(opp_status,'') AS opp_status,
                   COALESCE(source_status_raw,'') AS source_status_raw,
                   deadline_at, next_deadline_at, expiration_at, close_at, open_at,
                   COALESCE(deadlines, '[]'::jsonb) AS deadlines, is_results_page,
                   COALESCE(source_evidence_json, '{}'::jsonb) AS source_evidence_json
            FROM opportunities
            WHERE ($1 = '' OR id::text > $1)
            ORDER BY id::text
            LIMIT $2
            "#,
        )
        .bind(last_id)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(sweep_row_from_row).collect()
    }

    /// Write back one recomputed row, gated on "actually changed".
    /// Returns true when the row was updated.
    pub async fn update_status_row(
        &self,
        id: &str,
        decision: &StatusDecision,
        rolling_evidence: bool,
        normalized_close_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let row_id =
            Uuid::parse_str(id).map_err(|e| Error::InvalidInput(format!("bad row id: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE opportunities
            SET normalized_status = $1::normalized_status_enum,
                status_reason = $2,
                next_deadline_at = $3,
                is_results_page = $4,
                status_confidence = $5,
                rolling_evidence = $6,
                close_at = $7
            WHERE id = $8
              AND (
                  normalized_status::text IS DISTINCT FROM $1
                  OR status_reason IS DISTINCT FROM $2
                  OR next_deadline_at IS DISTINCT FROM $3
                  OR is_results_page IS DISTINCT FROM $4
                  OR status_confidence IS DISTINCT FROM $5
                  OR rolling_evidence IS DISTINCT FROM $6
                  OR close_at IS DISTINCT FROM $7
              )
            "#,
        )
        .bind(decision.normalized_status.as_str())
        .bind(nil_if_empty(&decision.status_reason))
        .bind(decision.next_deadline_at)
        .bind(decision.is_results_page)
        .bind(decision.status_confidence)
        .bind(rolling_evidence)
        .bind(normalized_close_at)
        .bind(row_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Select rows worth re-enriching: missing deadlines on live statuses,
    /// weak status reasons, low confidence, or a stale per-domain TTL.
    pub async fn select_enrichment_candidates(
        &self,
        domain: &str,
        only_missing_deadlines: bool,
        confidence_threshold: f64,
        batch_size: i64,
        ttl_interval: &str,
    ) -> Result<Vec<EnrichmentCandidate>> {
        let missing_deadline_clause = if only_missing_deadlines {
            "(normalized_status IN ('open', 'needs_review') AND next_deadline_at IS NULL AND rolling_evidence = false)"
        } else {
            "normalized_status IN ('open', 'needs_review')"
        };

        let sql = format!(
            r#"
            SELECT id::text AS sweep_id, title, COALESCE(summary,'') AS summary,
                   COALESCE(description_html,'') AS description_html, external_url,
                   source_domain, source_id,
                   is_rolling, rolling_evidence, COALESCE(opp_status,'') AS opp_status,
                   COALESCE(source_status_raw,'') AS source_status_raw,
                   normalized_status::text AS normalized_status, COALESCE(status_reason,'') AS status_reason,
                   deadline_at, next_deadline_at, close_at, expiration_at,
                   COALESCE(deadlines, '[]'::jsonb) AS deadlines,
                   COALESCE(source_evidence_json, '{{}}'::jsonb) AS source_evidence_json,
                   COALESCE(status_confidence, 0) AS status_confidence
            FROM opportunities
            WHERE ($1 = '' OR source_domain = $1)
              AND (
                    {missing_deadline_clause}
                    OR COALESCE(status_reason,'') IN ('rolling_without_evidence', 'missing_deadline', 'inconsistent_dates')
                    OR COALESCE(status_confidence, 0) < $2
                    OR COALESCE(last_enriched_at, 'epoch'::timestamptz) < NOW() - $4::interval
                  )
            ORDER BY updated_at ASC
            LIMIT $3
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(domain)
            .bind(confidence_threshold)
            .bind(batch_size)
            .bind(ttl_interval)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let mut sweep = sweep_row_from_row(row)?;
                sweep.opp.source_domain = row
                    .try_get::<Option<String>, _>("source_domain")?
                    .unwrap_or_default();
                sweep.opp.source_id = row
                    .try_get::<Option<String>, _>("source_id")?
                    .unwrap_or_default();
                sweep.opp.status_confidence = row.try_get("status_confidence")?;
                Ok(EnrichmentCandidate {
                    id: sweep.id,
                    previous_status: row
                        .try_get::<Option<String>, _>("normalized_status")?
                        .unwrap_or_default(),
                    previous_reason: row
                        .try_get::<Option<String>, _>("status_reason")?
                        .unwrap_or_default(),
                    opp: sweep.opp,
                })
            })
            .collect()
    }

    /// Write back one enriched row, stamping `last_enriched_at` and the
    /// fetch observability columns.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_enrichment_update(
        &self,
        id: &str,
        opp: &Opportunity,
        decision: &StatusDecision,
        fetch_status_code: Option<i32>,
        fetch_bytes: Option<i64>,
        fetch_duration_ms: Option<i64>,
        fetch_blocked: Option<bool>,
    ) -> Result<bool> {
        let row_id =
            Uuid::parse_str(id).map_err(|e| Error::InvalidInput(format!("bad row id: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE opportunities
            SET source_status_raw = COALESCE(NULLIF($1,''), source_status_raw),
                deadlines = COALESCE($2::jsonb, deadlines),
                next_deadline_at = $3,
                close_at = COALESCE($4, close_at),
                expiration_at = COALESCE($5, expiration_at),
                is_rolling = $6,
                rolling_evidence = $7,
                is_results_page = $8,
                source_evidence_json = COALESCE($9::jsonb, source_evidence_json),
                normalized_status = $10::normalized_status_enum,
                status_reason = $11,
                status_confidence = GREATEST($12::double precision, $13::double precision),
                last_enriched_at = NOW(),
                fetch_last_status_code = COALESCE($14, fetch_last_status_code),
                fetch_last_bytes = COALESCE($15, fetch_last_bytes),
                fetch_last_duration_ms = COALESCE($16, fetch_last_duration_ms),
                fetch_blocked_detected = COALESCE($17, fetch_blocked_detected)
            WHERE id = $18
            "#,
        )
        .bind(&opp.source_status_raw)
        .bind(deadlines_json(opp))
        .bind(decision.next_deadline_at)
        .bind(opp.close_at)
        .bind(opp.expiration_at)
        .bind(opp.is_rolling)
        .bind(opp.rolling_evidence)
        .bind(decision.is_results_page)
        .bind(evidence_json(opp))
        .bind(decision.normalized_status.as_str())
        .bind(nil_if_empty(&decision.status_reason))
        .bind(decision.status_confidence)
        .bind(opp.status_confidence)
        .bind(fetch_status_code)
        .bind(fetch_bytes)
        .bind(fetch_duration_ms)
        .bind(fetch_blocked)
        .bind(row_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// One idempotent SQL pass stripping leading punctuation/numerals from
    /// `categories` and `eligibility` entries, preserving order and
    /// deduplicating case-insensitively. Returns rows updated.
    pub async fn backfill_clean_arrays(&self) -> Result<i64> {
        let updated: i64 = sqlx::query_scalar(
            r#"
            WITH cleaned AS (
                SELECT o.id,
                    (
                        SELECT COALESCE(array_agg(d.cleaned ORDER BY d.ord), '{}'::text[])
                        FROM (
                            SELECT DISTINCT ON (lower(x.cleaned)) x.cleaned, x.ord
                            FROM (
                                SELECT
                                    btrim(regexp_replace(regexp_replace(e, '^\s*[[:punct:]]+\s*', '', 'g'), '^\s*[0-9]+\s*[^[:alnum:]]*\s*', '', 'g')) AS cleaned,
                                    ord
                                FROM unnest(COALESCE(o.eligibility,'{}'::text[])) WITH ORDINALITY AS t(e,ord)
                            ) x
                            WHERE x.cleaned <> ''
                            ORDER BY lower(x.cleaned), x.ord
                        ) d
                    ) AS eligibility_clean,
                    (
                        SELECT COALESCE(array_agg(d.cleaned ORDER BY d.ord), '{}'::text[])
                        FROM (
                            SELECT DISTINCT ON (lower(x.cleaned)) x.cleaned, x.ord
                            FROM (
                                SELECT
                                    btrim(regexp_replace(regexp_replace(c, '^\s*[[:punct:]]+\s*', '', 'g'), '^\s*[0-9]+\s*[^[:alnum:]]*\s*', '', 'g')) AS cleaned,
                                    ord
                                FROM unnest(COALESCE(o.categories,'{}'::text[])) WITH ORDINALITY AS t(c,ord)
                            ) x
                            WHERE x.cleaned <> ''
                            ORDER BY lower(x.cleaned), x.ord
                        ) d
                    ) AS categories_clean
                FROM opportunities o
            ), upd AS (
                UPDATE opportunities o
                SET eligibility = c.eligibility_clean,
                    categories = c.categories_clean
                FROM cleaned c
                WHERE o.id = c.id
                  AND (o.eligibility IS DISTINCT FROM c.eligibility_clean OR o.categories IS DISTINCT FROM c.categories_clean)
                RETURNING o.id
            )
            SELECT COUNT(*) FROM upd
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(updated)
    }
}

fn sweep_row_from_row(row: &PgRow) -> Result<StatusSweepRow> {
    let mut opp = Opportunity {
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        description_html: row.try_get("description_html")?,
        external_url: row.try_get("external_url")?,
        is_rolling: row.try_get("is_rolling")?,
        rolling_evidence: row.try_get("rolling_evidence")?,
        opp_status: row.try_get("opp_status")?,
        source_status_raw: row.try_get("source_status_raw")?,
        deadline_at: row.try_get("deadline_at")?,
        next_deadline_at: row.try_get("next_deadline_at")?,
        expiration_at: row.try_get("expiration_at")?,
        close_at: row.try_get("close_at").unwrap_or(None),
        open_at: row.try_get("open_at").unwrap_or(None),
        is_results_page: row.try_get("is_results_page").unwrap_or(false),
        ..Default::default()
    };

    let deadlines_raw: JsonValue = row.try_get("deadlines")?;
    let (dates, evidence) = decode_deadlines_payload(&deadlines_raw);
    opp.deadlines = dates;
    opp.deadline_evidence = evidence;

    if let JsonValue::Object(map) = row.try_get::<JsonValue, _>("source_evidence_json")? {
        opp.source_evidence_json = map;
    }

    Ok(StatusSweepRow {
        id: row.try_get("sweep_id")?,
        opp,
    })
}

fn build_aggregation_where_excluding(
    params: &AggregationParams,
    exclude: &str,
) -> (String, Vec<QueryParam>) {
    let mut where_clause = String::from("WHERE 1=1");
    let mut args: Vec<QueryParam> = Vec::new();

    // Status is never excluded; it applies to all dimensions.
    let (constraint, exact_status) = status_constraint(&params.status);
    if let Some(exact) = exact_status {
        args.push(QueryParam::Text(exact));
        where_clause.push_str(&constraint.replace("${}", &format!("${}", args.len())));
    } else {
        where_clause.push_str(&constraint);
    }

    for (column, values) in [
        ("region", &params.region),
        ("funder_type", &params.funder_type),
        ("country", &params.country),
        ("agency_name", &params.agency_name),
    ] {
        if !values.is_empty() && exclude != column {
            args.push(QueryParam::TextArray(values.clone()));
            where_clause.push_str(&format!(" AND {} = ANY(${})", column, args.len()));
        }
    }

    (where_clause, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_constraint_open_excludes_results_pages() {
        let (clause, exact) = status_constraint("open");
        assert!(clause.contains("is_results_page = false"));
        assert!(clause.contains("rolling_evidence = true OR next_deadline_at >= NOW() OR close_at >= NOW()"));
        assert!(exact.is_none());
    }

    #[test]
    fn status_constraint_aliases_map_to_open() {
        for alias in ["", "posted", "active"] {
            let (clause, _) = status_constraint(alias);
            assert!(clause.contains("normalized_status = 'open'"), "{}", alias);
        }
    }

    #[test]
    fn status_constraint_closed_folds_in_archived() {
        let (clause, exact) = status_constraint("closed");
        assert!(clause.contains("IN ('closed','archived')"));
        assert!(exact.is_none());
    }

    #[test]
    fn status_constraint_all_is_unfiltered() {
        let (clause, exact) = status_constraint("all");
        assert!(clause.is_empty());
        assert!(exact.is_none());
    }

    #[test]
    fn status_constraint_exact_binds_a_param() {
        let (clause, exact) = status_constraint("needs_review");
        assert!(clause.contains("normalized_status::text = ${}"));
        assert_eq!(exact.as_deref(), Some("needs_review"));
    }

    #[test]
    fn aggregation_where_excludes_own_dimension() {
        let params = AggregationParams {
            status: "open".into(),
            region: vec!["Europe".into()],
            country: vec!["UK".into()],
            ..Default::default()
        };

        let (with_region_excluded, args) = build_aggregation_where_excluding(&params, "region");
        assert!(!with_region_excluded.contains("region = ANY"));
        assert!(with_region_excluded.contains("country = ANY"));
        assert_eq!(args.len(), 1);

        let (with_country_excluded, _) = build_aggregation_where_excluding(&params, "country");
        assert!(with_country_excluded.contains("region = ANY"));
        assert!(!with_country_excluded.contains("country = ANY"));
    }

    #[test]
    fn decode_legacy_string_arrays_as_half_confidence_evidence() {
        let raw = json!(["2026-01-01", "2026-02-20"]);
        let (dates, evidence) = decode_deadlines_payload(&raw);
        assert_eq!(dates, vec!["2026-01-01", "2026-02-20"]);
        assert_eq!(evidence.len(), 2);
        assert!(evidence.iter().all(|e| e.source == "legacy"));
        assert!(evidence.iter().all(|e| e.confidence == 0.5));
    }

    #[test]
    fn decode_evidence_objects_round_trips() {
        let raw = json!([{
            "source": "pdf",
            "url": "https://example.org/bases.pdf",
            "snippet": "cierre 20 feb",
            "parsed_date_iso": "2026-02-20T23:59:59Z",
            "label": "cierre de postulaciones",
            "confidence": 0.85
        }]);
        let (dates, evidence) = decode_deadlines_payload(&raw);
        assert_eq!(dates, vec!["2026-02-20T23:59:59Z"]);
        assert_eq!(evidence[0].source, "pdf");
        assert_eq!(evidence[0].confidence, 0.85);
    }

    #[test]
    fn merge_deadline_evidence_dedupes_and_defaults() {
        let existing = vec![DeadlineEvidence {
            source: String::new(),
            url: String::new(),
            snippet: "s".into(),
            parsed_date_iso: "2026-02-20T23:59:59Z".into(),
            label: String::new(),
            confidence: 0.0,
        }];
        let legacy = vec!["2026-02-20T23:59:59Z".to_string(), "2026-03-01".to_string()];

        let merged = merge_deadline_evidence(&existing, &legacy, "https://example.org");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source, "html");
        assert_eq!(merged[0].url, "https://example.org");
        assert_eq!(merged[0].confidence, 0.7);
        assert_eq!(merged[1].source, "legacy");
        assert_eq!(merged[1].parsed_date_iso, "2026-03-01T00:00:00Z");
    }
}
