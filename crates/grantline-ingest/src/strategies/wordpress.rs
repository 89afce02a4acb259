//! WordPress REST strategy: pages through `/wp-json/wp/v2/posts`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use grantline_core::{IngestionStats, RawOpportunity, Result};

use crate::pipeline::Pipeline;
use crate::registry::SourceConfig;
use crate::strategies::Strategy;
use crate::text::html_to_text;

const PER_PAGE: u32 = 20;
/// Hard page cap to bound a runaway pagination loop.
const MAX_PAGES: u32 = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WpPost {
    pub id: i64,
    pub date: String,
    pub link: String,
    pub title: WpRendered,
    pub content: WpRendered,
    pub excerpt: WpRendered,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WpRendered {
    pub rendered: String,
}

/// Derive the posts endpoint from a site base URL.
pub fn posts_endpoint(base_url: &str) -> String {
    if base_url.contains("wp-json") {
        return base_url.to_string();
    }
    format!("{}/wp-json/wp/v2/posts", base_url.trim_end_matches('/'))
}

/// Map a post onto a raw opportunity. The post id becomes the stable
/// source id; the excerpt is prepended to the description for detail views.
pub fn raw_from_post(config: &SourceConfig, post: &WpPost) -> RawOpportunity {
    let clean_title = html_to_text(&post.title.rendered);
    let clean_summary = html_to_text(&post.excerpt.rendered);

    let mut description = post.content.rendered.clone();
    if !post.excerpt.rendered.is_empty() {
        description = format!(
            "<b>Summary:</b> {}<br/><hr><br/>{}",
            post.excerpt.rendered, description
        );
    }

    let mut extra = std::collections::HashMap::new();
    extra.insert("opp_status".to_string(), "posted".to_string());
    extra.insert("posted_at".to_string(), post.date.clone());
    extra.insert("excerpt".to_string(), clean_summary);

    RawOpportunity {
        title: clean_title,
        description,
        external_url: post.link.clone(),
        source_domain: config.id.clone(),
        source_id: post.id.to_string(),
        extra,
        ..Default::default()
    }
}

/// Strategy driver for WordPress REST sources.
pub struct WordPressStrategy;

#[async_trait]
impl Strategy for WordPressStrategy {
    async fn run(
        &self,
        config: &SourceConfig,
        pipeline: &Pipeline,
        run_id: Option<Uuid>,
    ) -> Result<IngestionStats> {
        let mut stats = IngestionStats::default();
        let api_url = posts_endpoint(&config.base_url);

        let mut page = 1u32;
        loop {
            let paged_url = format!("{}?page={}&per_page={}", api_url, page, PER_PAGE);

            let doc = match pipeline.fetcher.fetch(&paged_url).await {
                Ok(doc) => doc,
                Err(e) => {
                    // 400/404 usually mark the end of pagination.
                    let msg = e.to_string();
                    if msg.contains("400") || msg.contains("404") {
                        break;
                    }
                    warn!(
                        subsystem = "ingest",
                        component = "wordpress",
                        source_id = config.id.as_str(),
                        url = paged_url.as_str(),
                        error = %e,
                        "Page fetch failed"
                    );
                    break;
                }
            };

            let body = doc.body_text();
            let posts: Vec<WpPost> = match serde_json::from_str(&body) {
                Ok(posts) => posts,
                Err(e) => {
                    if body.trim() == "[]" {
                        break;
                    }
                    warn!(
                        subsystem = "ingest",
                        component = "wordpress",
                        source_id = config.id.as_str(),
                        error = %e,
                        "Failed to decode posts page"
                    );
                    break;
                }
            };

            if posts.is_empty() {
                break;
            }

            stats.total_found += posts.len() as i64;

            for post in &posts {
                let raw = raw_from_post(config, post);
                match pipeline.save_raw(raw, run_id).await {
                    Ok(()) => stats.total_saved += 1,
                    Err(e) => {
                        stats.errors += 1;
                        warn!(
                            subsystem = "ingest",
                            component = "wordpress",
                            source_id = config.id.as_str(),
                            error = %e,
                            "Failed to save post"
                        );
                    }
                }
            }

            info!(
                subsystem = "ingest",
                component = "wordpress",
                source_id = config.id.as_str(),
                items_saved = stats.total_saved,
                "Page complete"
            );

            page += 1;
            if page > MAX_PAGES {
                break;
            }
        }

        Ok(stats)
    }
}
