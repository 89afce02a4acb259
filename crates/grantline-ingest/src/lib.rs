//! # grantline-ingest
//!
//! The ingestion side of grantline: safe fetching, multilingual parsing,
//! evidence extraction, per-source strategies, the status engine, and the
//! pipeline orchestrator that ties them to the store.
//!
//! Data flow: registry → strategy → fetcher + adapter + parsers →
//! normalizer → pipeline save → {LLM augmentation, evidence enrichment,
//! status engine, embedding} → upsert. Background sweeps replay the engine
//! over stored rows.

pub mod adapter;
pub mod amounts;
pub mod dates;
pub mod evidence;
pub mod fetcher;
pub mod normalizer;
pub mod pdf;
pub mod pipeline;
pub mod registry;
pub mod status;
pub mod strategies;
pub mod text;
pub mod urlutil;

pub use adapter::{GenericSourceAdapter, SourceAdapterCandidates, SourceAdapterRaw};
pub use fetcher::{
    ensure_public_http_url, FetchConfig, FetchedDocument, Fetcher, RateLimitedFetcher,
};
pub use normalizer::from_raw;
pub use pipeline::Pipeline;
pub use registry::{load_registry, Registry, SourceConfig};
pub use status::{compute_status_decision, detect_rolling_evidence, pick_next_deadline};
pub use strategies::{strategy_for, Strategy};
pub use urlutil::canonicalize_url;
