//! # grantline-core
//!
//! Shared domain model, error type, logging schema and backend traits for
//! the grantline workspace.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

pub use error::{Error, Result};
pub use models::{
    parse_iso_candidate, DeadlineEvidence, EnrichmentStats, IngestRun, IngestionStats,
    NormalizedStatus, Opportunity, RawOpportunity, RunStatus, StatusDecision, User,
};
pub use traits::{EmbeddingBackend, GenerationBackend, InferenceBackend};
