//! Handlers for `/emails` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/emails/:id` | 404 if not found |
//! | `POST` | `/emails/:id/cancel` | 200 either way; `cancelled: false` once the email left `pending` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use rollcall_core::{public::PublicScheduledEmail, store::EmailQueue};
use rollcall_pipeline::{PipelineStore, actions};
use serde::Serialize;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

/// `GET /emails/:id`
pub async fn get_one<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<PublicScheduledEmail>, ApiError> {
  let email = state
    .store
    .get_email(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("scheduled email {id} not found")))?;
  Ok(Json(PublicScheduledEmail::from(&email)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
  pub cancelled: bool,
  pub reason:    Option<&'static str>,
  pub email:     PublicScheduledEmail,
}

/// `POST /emails/:id/cancel`
pub async fn cancel<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
  let outcome = actions::cancel(&*state.store, id).await?;
  Ok(Json(CancelResponse {
    cancelled: outcome.rejection_reason().is_none(),
    reason:    outcome.rejection_reason(),
    email:     PublicScheduledEmail::from(outcome.email()),
  }))
}
