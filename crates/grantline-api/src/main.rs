//! grantline-api - HTTP API server for grantline.

mod auth;
mod error;
mod handlers;
mod jobs;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grantline_core::defaults::API_PORT;
use grantline_core::InferenceBackend;
use grantline_db::Database;
use grantline_ingest::Pipeline;
use grantline_inference::OllamaBackend;

use jobs::JobSlot;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub pipeline: Arc<Pipeline>,
    pub ai: Option<Arc<dyn InferenceBackend>>,
    pub jobs: JobSlot,
}

fn cors_layer() -> CorsLayer {
    let mut origins: Vec<HeaderValue> = vec![HeaderValue::from_static("http://localhost:4200")];
    if let Ok(extra) = std::env::var("CORS_ORIGINS") {
        for origin in extra.split(',') {
            let origin = origin.trim();
            if origin.is_empty() {
                continue;
            }
            match origin.parse::<HeaderValue>() {
                Ok(value) => origins.push(value),
                Err(_) => warn!(
                    subsystem = "api",
                    origin = origin,
                    "Ignoring unparseable CORS origin"
                ),
            }
        }
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-admin-secret"),
        ])
}

fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/ingest", post(handlers::trigger_ingest))
        .route("/ingest/source/{id}", post(handlers::ingest_source))
        .route("/ingest/all", post(handlers::ingest_all))
        .route("/admin/recompute-status", post(handlers::recompute_status))
        .route("/admin/job/{id}", get(handlers::job_status))
        .route(
            "/admin/enrich-opportunities",
            post(handlers::enrich_opportunities),
        )
        .layer(middleware::from_fn(auth::admin_middleware));

    let api_routes = Router::new()
        .route("/opportunities", get(handlers::list_opportunities))
        .route("/opportunities/{id}", get(handlers::get_opportunity))
        .route("/sources", get(handlers::get_sources))
        .route("/stats", get(handlers::get_stats))
        .route("/aggregations", get(handlers::get_aggregations))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route(
            "/saved/{id}",
            post(auth::save_opportunity).delete(auth::unsave_opportunity),
        )
        .route("/saved", get(auth::saved_opportunities))
        .merge(admin_routes);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "grantline_api=info,grantline_ingest=info,grantline_db=info,grantline_inference=info,tower_http=info"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(API_PORT);

    let db = Database::connect(&database_url).await?;
    db.migrate().await?;
    info!(subsystem = "api", "Migrations applied");

    let ai: Option<Arc<dyn InferenceBackend>> = match OllamaBackend::from_env() {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            warn!(
                subsystem = "api",
                error = %e,
                "Inference backend unavailable; LLM augmentation disabled"
            );
            None
        }
    };

    let pipeline = Arc::new(Pipeline::new(db.clone(), None, ai.clone()));

    let state = AppState {
        db,
        pipeline,
        ai,
        jobs: JobSlot::new(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(subsystem = "api", port = port, "Server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}
