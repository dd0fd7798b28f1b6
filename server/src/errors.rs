use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{BoxError, Json};
use lookalike_core::{BrowseError, MatchError, PipelineError};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_argument",
            message: message.into(),
        }
    }

    /// The upload decoded badly or no face could be found; the user should
    /// retry with another photo.
    pub(crate) fn face_not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "face_not_found",
            message: message.into(),
        }
    }

    fn request_timeout() -> Self {
        Self {
            status: StatusCode::REQUEST_TIMEOUT,
            code: "request_timeout",
            message: "request timed out".to_string(),
        }
    }

    pub(crate) fn service_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "not_ready",
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                code: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}

pub(crate) fn map_pipeline_error(error: PipelineError) -> ApiError {
    if error.is_user_recoverable() {
        tracing::info!(%error, "portrait rejected");
        let message = match error {
            PipelineError::CropFailure => "no face could be found in the uploaded image",
            _ => "the detected face could not be processed",
        };
        return ApiError::face_not_found(message);
    }

    match error {
        PipelineError::Match(MatchError::NoMatches) => {
            ApiError::service_unavailable("the catalog index is empty")
        }
        PipelineError::Detection(error) => {
            tracing::error!(%error, "face detection failed");
            ApiError::internal("face detection failed")
        }
        error => {
            tracing::error!(%error, "matching failed");
            ApiError::internal("matching failed")
        }
    }
}

pub(crate) fn map_browse_error(error: BrowseError) -> ApiError {
    match error {
        BrowseError::EmptyMatches | BrowseError::EmptyCatalog => {
            ApiError::service_unavailable("the catalog index is empty")
        }
        error => {
            tracing::error!(%error, "browse session failed");
            ApiError::internal("browse session failed")
        }
    }
}

pub(crate) async fn handle_middleware_error(error: BoxError) -> Response {
    if error.is::<tower::timeout::error::Elapsed>() {
        return ApiError::request_timeout().into_response();
    }

    tracing::error!(%error, "middleware error");
    ApiError::internal("internal middleware error").into_response()
}
