//! Structured logging schema and field name constants for grantline.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools can query by standardized field names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), run completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (candidates, evidence) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "ingest", "db", "inference", "status"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "fetcher", "adapter", "pipeline", "pool", "ollama"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "fetch", "save", "recompute", "enrich", "embed"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Registry source id being ingested.
pub const SOURCE_ID: &str = "source_id";

/// Source domain of the record being operated on.
pub const SOURCE_DOMAIN: &str = "source_domain";

/// Ingest-run UUID.
pub const RUN_ID: &str = "run_id";

/// Background job id.
pub const JOB_ID: &str = "job_id";

/// Target URL of a fetch.
pub const URL: &str = "url";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Items discovered by a strategy run.
pub const ITEMS_FOUND: &str = "items_found";

/// Items persisted by a strategy run.
pub const ITEMS_SAVED: &str = "items_saved";

/// Per-item errors counted during a run.
pub const ERRORS: &str = "errors";

/// Rows changed by a sweep.
pub const ROWS_UPDATED: &str = "rows_updated";

/// Deadline candidates discovered during extraction.
pub const CANDIDATE_COUNT: &str = "candidate_count";

/// PDFs whose text was successfully extracted.
pub const PDFS_PARSED: &str = "pdfs_parsed";

// ─── Fetch fields ──────────────────────────────────────────────────────────

/// HTTP status code of a response.
pub const STATUS_CODE: &str = "status_code";

/// Response body length in bytes.
pub const BYTES: &str = "bytes";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
