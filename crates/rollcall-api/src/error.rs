//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("internal error: {0}")]
  Internal(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<rollcall_pipeline::Error> for ApiError {
  fn from(err: rollcall_pipeline::Error) -> Self {
    use rollcall_pipeline::Error as E;
    match err {
      E::Validation(m) => Self::BadRequest(m),
      e @ E::NotFound { .. } => Self::NotFound(e.to_string()),
      e @ E::InvalidToken => Self::Forbidden(e.to_string()),
      e @ (E::Config(_) | E::Render(_)) => Self::Internal(e.to_string()),
      E::Store(e) => Self::Store(e),
    }
  }
}

impl From<rollcall_core::Error> for ApiError {
  fn from(err: rollcall_core::Error) -> Self { Self::BadRequest(err.to_string()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
      ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    if status.is_server_error() {
      tracing::error!(error = %self, "request failed");
    }
    (status, Json(json!({ "error": message }))).into_response()
  }
}
