#![forbid(unsafe_code)]
//! Lookalike HTTP server.
//!
//! Exposes:
//! - `GET /live`: process liveness
//! - `GET /ready`: readiness (index loaded and non-empty)
//! - `POST /match`: match an uploaded portrait against the catalog
//! - `POST /next`: advance a browse session
//! - `GET /catalog/*path`: catalog images, when a catalog directory is set

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Request};
use axum::routing::{get, post};
use axum::Router;
use lookalike_core::{Embedder, EmbedderConfig, Pipeline, SimilarityIndex};
use lookalike_vision::{cpu_device, SeetaFaceDetector, Vgg16Features};
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing_subscriber::EnvFilter;

mod config;
mod env_utils;
mod errors;
mod handlers;
mod models;
mod sessions;
mod state;

use crate::config::AppConfig;
use crate::errors::handle_middleware_error;
use crate::handlers::{live, match_portrait, next_match, ready};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let bind = config.bind;
    let pipeline = load_pipeline(&config)?;
    let entries = pipeline.index().len();
    let state =
        AppState::new(config.clone(), pipeline).context("failed to prepare the browse catalog")?;
    let categories = state.catalog.category_count();
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind server socket on {bind}"))?;

    tracing::info!(
        %bind,
        entries,
        categories,
        catalog_dir = ?config.catalog_dir,
        timeout_ms = config.request_timeout_ms,
        max_body_bytes = config.max_body_bytes,
        max_concurrency = config.max_concurrency,
        session_ttl_seconds = config.session_ttl_seconds,
        max_sessions = config.max_sessions,
        "lookalike server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")?;

    Ok(())
}

/// Loads the index and both models. Any failure here is fatal.
fn load_pipeline(config: &AppConfig) -> Result<Pipeline> {
    let index = SimilarityIndex::load(&config.index_path).with_context(|| {
        format!(
            "failed to load similarity index from {}",
            config.index_path.display()
        )
    })?;
    if config.require_non_empty_index && index.is_empty() {
        anyhow::bail!(
            "similarity index {} is empty; run the indexer first",
            config.index_path.display()
        );
    }
    tracing::info!(
        path = %config.index_path.display(),
        entries = index.len(),
        dimension = index.dimension(),
        layer = ?index.embedder().layer,
        "similarity index loaded"
    );

    let backbone = Vgg16Features::load(
        &config.weights_path,
        EmbedderConfig::VGG16_BLOCK5_POOL,
        cpu_device(),
    )
    .context("failed to load feature extractor")?;
    let embedder = Embedder::new(Box::new(backbone)).context("invalid embedder")?;
    let detector = SeetaFaceDetector::spawn(&config.detector_model_path)
        .context("failed to load face detector")?;

    Pipeline::new(Arc::new(detector), Arc::new(embedder), Arc::new(index))
        .context("similarity index does not match the online embedder")
}

fn build_app(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let config = state.config.clone();
    let timeout = Duration::from_millis(config.request_timeout_ms);

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(HandleErrorLayer::new(handle_middleware_error))
        .layer(TimeoutLayer::new(timeout))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<_>| {
                    let request_id = request
                        .headers()
                        .get(&request_id_header)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id
                    )
                })
                .on_response(DefaultOnResponse::new().latency_unit(LatencyUnit::Millis)),
        );

    let mut router = Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/match", post(match_portrait))
        .route("/next", post(next_match));
    if let Some(catalog_dir) = &config.catalog_dir {
        router = router.nest_service("/catalog", ServeDir::new(catalog_dir));
    }

    router
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(middleware)
        .with_state(state)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("failed to initialize tracing subscriber: {error}");
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(error) => tracing::error!(%error, "failed to install Ctrl-C handler"),
    }
}

#[cfg(test)]
mod tests;
