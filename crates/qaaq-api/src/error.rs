use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use qaaq_types::api::{MergeCandidate, MergeRequiredResponse};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Several accounts share this identifier")]
    MergeRequired(Vec<MergeCandidate>),

    #[error("Too many attempts")]
    TooManyAttempts,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::MergeRequired(_) => "merge_required",
            Self::TooManyAttempts => "too_many_attempts",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::MergeRequired(_) => StatusCode::CONFLICT,
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match self {
            Self::MergeRequired(candidates) => {
                let body = MergeRequiredResponse {
                    error: "merge_required".to_string(),
                    message: "Several accounts share this identifier; merge them or log in with an account id"
                        .to_string(),
                    candidates,
                };
                (status, Json(body)).into_response()
            }
            Self::Internal(ref e) => {
                error!("Internal error: {:#}", e);
                let body = json!({ "error": self.code(), "message": "Internal server error" });
                (status, Json(body)).into_response()
            }
            _ => {
                let body = json!({ "error": self.code(), "message": self.to_string() });
                (status, Json(body)).into_response()
            }
        }
    }
}
