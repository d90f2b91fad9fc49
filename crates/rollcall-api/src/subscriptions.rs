//! Handlers for opt-out management.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/unsubscribe` | Body: `{"email":"...","reason":"..."}`; returns the resubscribe token |
//! | `POST` | `/resubscribe` | Body: `{"token":"..."}`; 403 for an unknown token |
//! | `GET`  | `/unsubscribes/:email` | Opt-out record without its token |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use rollcall_core::{public::PublicUnsubscribe, unsubscribe::UnsubscribeStatus};
use rollcall_pipeline::PipelineStore;
use serde::{Deserialize, Serialize};

use crate::{ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct UnsubscribeBody {
  pub email:  String,
  pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
  pub token: String,
}

/// `POST /unsubscribe`
pub async fn unsubscribe<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Json(body): Json<UnsubscribeBody>,
) -> Result<Json<TokenResponse>, ApiError> {
  let token = state.registry.unsubscribe(&body.email, body.reason).await?;
  Ok(Json(TokenResponse { token }))
}

#[derive(Debug, Deserialize)]
pub struct ResubscribeBody {
  pub token: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
  pub status: UnsubscribeStatus,
}

/// `POST /resubscribe`
pub async fn resubscribe<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Json(body): Json<ResubscribeBody>,
) -> Result<Json<StatusResponse>, ApiError> {
  let status = state.registry.resubscribe(&body.token).await?;
  Ok(Json(StatusResponse { status }))
}

/// `GET /unsubscribes/:email`
pub async fn get_one<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Path(email): Path<String>,
) -> Result<Json<PublicUnsubscribe>, ApiError> {
  let record = state
    .registry
    .lookup(&email)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("no opt-out recorded for {email}")))?;
  Ok(Json(PublicUnsubscribe::from(&record)))
}
