//! Source registry: the embedded YAML document describing every configured
//! source, with `${VAR}` environment expansion at load time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use grantline_core::{Error, Result};

use crate::fetcher::FetchConfig;

const SOURCES_YAML: &str = include_str!("../config/sources.yaml");

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// All configured data sources.
#[derive(Debug, Clone, Deserialize)]
pub struct Registry {
    pub sources: Vec<SourceConfig>,
}

impl Registry {
    pub fn find(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// One configured data source.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub region: String,
    pub country: String,
    pub strategy: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(rename = "seed_urls")]
    pub seeds: Vec<String>,
    pub schedule: String,
    pub description: String,
    pub fetch: FetchConfig,
    pub selectors: SelectorConfig,
    pub pagination: PaginationConfig,
    pub max_pages: u32,
    pub detail: DetailConfig,
}

/// CSS selectors for the HTML-generic list page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub container: String,
    pub link: String,
    /// Attribute to extract the link from (default: href).
    pub link_attr: String,
    pub title: String,
    pub date: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// CSS selector for the next-page link.
    pub next: String,
}

/// Detail-page enrichment configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    pub enabled: bool,
    pub selectors: DetailSelectorConfig,
    pub parse: DetailParseConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetailSelectorConfig {
    pub container: String,
    pub description: String,
    pub deadline: String,
    pub amount: String,
    pub eligibility: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetailParseConfig {
    pub date_locales: Vec<String>,
    pub currency_default: String,
    pub date_formats: Vec<String>,
}

/// Load the embedded registry, expanding `${NAME}` references against the
/// process environment (unset variables expand to empty).
pub fn load_registry() -> Result<Registry> {
    load_registry_from_str(SOURCES_YAML)
}

/// Parse a registry document from a string (exposed for tests).
pub fn load_registry_from_str(raw: &str) -> Result<Registry> {
    let expanded = expand_env(raw);
    serde_yaml::from_str(&expanded)
        .map_err(|e| Error::Config(format!("invalid source registry: {}", e)))
}

fn expand_env(raw: &str) -> String {
    ENV_VAR
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_registry_parses() {
        let reg = load_registry().unwrap();
        assert!(!reg.sources.is_empty());
        let grants = reg.find("grants_gov").unwrap();
        assert_eq!(grants.strategy, "structured_api");
        assert_eq!(grants.fetch.timeout_seconds, 60);
    }

    #[test]
    fn unknown_source_is_none() {
        let reg = load_registry().unwrap();
        assert!(reg.find("nope").is_none());
    }

    #[test]
    fn env_vars_expand_in_place() {
        std::env::set_var("GRANTLINE_TEST_KEY", "sekrit");
        let yaml = r#"
sources:
  - id: demo
    strategy: structured_api
    api_key: ${GRANTLINE_TEST_KEY}
    base_url: https://example.org/${GRANTLINE_TEST_UNSET_VAR}api
"#;
        let reg = load_registry_from_str(yaml).unwrap();
        assert_eq!(reg.sources[0].api_key, "sekrit");
        assert_eq!(reg.sources[0].base_url, "https://example.org/api");
    }

    #[test]
    fn selector_config_defaults_are_empty() {
        let reg = load_registry().unwrap();
        let wp = reg.find("ukri_opportunities").unwrap();
        assert!(wp.selectors.container.is_empty());
        assert!(!wp.detail.enabled);
    }
}
