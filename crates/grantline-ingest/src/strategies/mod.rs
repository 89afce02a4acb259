//! Per-source-kind ingestion drivers, dispatched by a string id from the
//! source registry.

mod html_generic;
mod structured_api;
mod wordpress;

use async_trait::async_trait;
use uuid::Uuid;

use grantline_core::{IngestionStats, Result};

use crate::pipeline::Pipeline;
use crate::registry::SourceConfig;

pub use html_generic::{source_id_for, HtmlGenericStrategy};
pub use structured_api::StructuredApiStrategy;
pub use wordpress::WordPressStrategy;

/// The contract every ingestion source driver implements: fetch, parse and
/// save via the pipeline, returning run metrics.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn run(
        &self,
        config: &SourceConfig,
        pipeline: &Pipeline,
        run_id: Option<Uuid>,
    ) -> Result<IngestionStats>;
}

/// Resolve a strategy implementation by its registry id.
pub fn strategy_for(id: &str) -> Option<Box<dyn Strategy>> {
    match id {
        "structured_api" => Some(Box::new(StructuredApiStrategy)),
        "wordpress_rest" => Some(Box::new(WordPressStrategy)),
        "html_generic" => Some(Box::new(HtmlGenericStrategy)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_strategies_resolve() {
        for id in ["structured_api", "wordpress_rest", "html_generic"] {
            assert!(strategy_for(id).is_some(), "{}", id);
        }
    }

    #[test]
    fn unknown_strategy_is_none() {
        assert!(strategy_for("rss").is_none());
        assert!(strategy_for("").is_none());
    }
}
