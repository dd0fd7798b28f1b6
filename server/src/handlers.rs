use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use lookalike_core::{browse, category_of};

use crate::errors::{map_browse_error, map_pipeline_error, ApiError};
use crate::models::{
    LiveResponse, MatchResponse, MatchSummary, NextRequest, NextResponse, ReadyChecks,
    ReadyResponse,
};
use crate::sessions::new_token;
use crate::state::AppState;

pub(crate) const SESSION_TOKEN_HEADER: &str = "x-session-token";

pub(crate) async fn live(State(state): State<AppState>) -> Json<LiveResponse> {
    Json(LiveResponse {
        status: "live",
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
    })
}

pub(crate) async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, ApiError> {
    let index = state.pipeline.index();
    let index_loaded = !index.is_empty();

    let response = ReadyResponse {
        status: if index_loaded { "ready" } else { "not_ready" },
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        checks: ReadyChecks {
            index_loaded,
            entries: index.len(),
            dimension: index.dimension(),
            categories: state.catalog.category_count(),
            sessions: state.sessions.len(),
        },
    };

    if index_loaded {
        Ok(Json(response))
    } else {
        Err(ApiError::service_unavailable("the catalog index is empty"))
    }
}

/// Matches an uploaded portrait and opens a browse session over the ranking.
pub(crate) async fn match_portrait(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MatchResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::invalid_argument(
            "request body must contain an image",
        ));
    }

    let pipeline = state.pipeline.clone();
    let catalog = Arc::clone(&state.catalog);
    let sessions = Arc::clone(&state.sessions);
    let session_token = new_token();
    let token = session_token.clone();
    let (outcome, first) = tokio::task::spawn_blocking(move || {
        let outcome = pipeline.match_image(&body).map_err(map_pipeline_error)?;
        let first = browse::start(sessions.as_ref(), &token, &catalog, &outcome.ranked)
            .map_err(map_browse_error)?;
        Ok::<_, ApiError>((outcome, first))
    })
    .await
    .map_err(|error| {
        tracing::error!(%error, "match task failed");
        ApiError::internal("match task failed")
    })??;

    let runners_up = outcome
        .ranked
        .iter()
        .skip(1)
        .take(state.config.runners_up)
        .map(|entry| MatchSummary {
            identifier: entry.identifier.clone(),
            category: category_of(&entry.identifier),
            distance: entry.distance,
        })
        .collect();

    tracing::info!(
        identifier = %first.identifier,
        category = %first.category,
        distance = outcome.best.distance,
        "portrait matched"
    );

    Ok(Json(MatchResponse {
        session_token,
        identifier: first.identifier,
        category: first.category,
        distance: outcome.best.distance,
        runners_up,
    }))
}

/// Advances a browse session. A missing, unknown or expired token starts a
/// fresh session over the unranked catalog under a new token.
pub(crate) async fn next_match(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<NextResponse>, ApiError> {
    let request = if body.is_empty() {
        NextRequest::default()
    } else {
        serde_json::from_slice::<NextRequest>(&body)
            .map_err(|_| ApiError::invalid_argument("invalid JSON payload"))?
    };

    let presented = headers
        .get(SESSION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    let catalog = Arc::clone(&state.catalog);
    let sessions = Arc::clone(&state.sessions);
    let outcome = tokio::task::spawn_blocking(move || {
        let mut rng = rand::thread_rng();
        browse::next(
            sessions.as_ref(),
            presented.as_deref(),
            new_token,
            &catalog,
            &mut rng,
        )
    })
    .await
    .map_err(|error| {
        tracing::error!(%error, "browse task failed");
        ApiError::internal("browse task failed")
    })?
    .map_err(map_browse_error)?;

    tracing::debug!(
        identifier = %outcome.step.identifier,
        status = ?outcome.status,
        "session advanced"
    );

    Ok(Json(NextResponse {
        session_token: outcome.token,
        identifier: outcome.step.identifier,
        category: outcome.step.category,
        status: outcome.status,
        query_image: request.query_image,
    }))
}
