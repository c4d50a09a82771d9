use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the scoring engine and its loaders.
///
/// Only `ShapeMismatch` and `Internal` can surface at request time; the other
/// variants are produced while building the engine at startup. Malformed URLs
/// are not errors at all: they become an `InvalidUrl` verdict.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Feature vector shape mismatch: expected {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model artifact {path:?} rejected: {reason}")]
    Artifact { path: PathBuf, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn artifact(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        EngineError::Artifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

/// Request-level failure returned by the HTTP handlers.
///
/// A scored URL, even one judged as phishing, is never an `AppError`; this
/// type only covers "we could not score this".
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl AppError {
    pub fn with_request_id(self, request_id: uuid::Uuid) -> ScanFailure {
        ScanFailure {
            error: self,
            request_id,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!("Failed to score request: {}", self);
        let body = Json(json!({
            "status": "error",
            "error": "Internal server error",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// An `AppError` tagged with the id of the request that produced it.
#[derive(Debug)]
pub struct ScanFailure {
    pub error: AppError,
    pub request_id: uuid::Uuid,
}

impl IntoResponse for ScanFailure {
    fn into_response(self) -> Response {
        tracing::error!(request_id = %self.request_id, "Failed to score request: {}", self.error);
        let message = match &self.error {
            AppError::Engine(EngineError::ShapeMismatch { .. }) => "Model/feature version mismatch",
            _ => "Internal server error",
        };

        let body = Json(json!({
            "status": "error",
            "error": message,
            "request_id": self.request_id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
