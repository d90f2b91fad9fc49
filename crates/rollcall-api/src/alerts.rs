//! Handlers for `/alerts` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/alerts/:id` | `?populate=true` nests the alert next to its student, subject and acknowledger |
//! | `POST` | `/alerts/:id/acknowledge` | Body: `{"userId":"..."}` |
//! | `POST` | `/alerts/:id/schedule` | Queue the notification if not already queued |
//! | `POST` | `/alerts/reconcile` | Optional `?limit=`; schedules unnotified open alerts |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use rollcall_core::{
  public::{PublicAlert, PublicScheduledEmail, PublicStudent, PublicSubject, PublicUser},
  store::AlertStore,
};
use rollcall_pipeline::{
  PipelineStore, ScheduleOutcome, actions, populate::populate_alert, scheduler::ReconcileReport,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

const DEFAULT_RECONCILE_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
  pub queued: Option<PublicScheduledEmail>,
  /// `"no-eligible-recipients"` or `"already-scheduled"`.
  pub reason: Option<String>,
}

impl From<&ScheduleOutcome> for ScheduleResponse {
  fn from(o: &ScheduleOutcome) -> Self {
    Self {
      queued: o.queued.as_ref().map(PublicScheduledEmail::from),
      reason: o.reason.map(|r| r.to_string()),
    }
  }
}

// ─── Get one ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GetParams {
  #[serde(default)]
  pub populate: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedAlertResponse {
  pub alert:           PublicAlert,
  pub student:         Option<PublicStudent>,
  pub subject:         Option<PublicSubject>,
  pub acknowledged_by: Option<PublicUser>,
}

/// `GET /alerts/:id[?populate=true]`
pub async fn get_one<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Path(id): Path<Uuid>,
  Query(params): Query<GetParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
  let alert = state
    .store
    .get_alert(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or_else(|| ApiError::NotFound(format!("alert {id} not found")))?;

  let body = if params.populate {
    let populated = populate_alert(&*state.store, alert).await?;
    serde_json::to_value(PopulatedAlertResponse {
      alert:           PublicAlert::from(&populated.alert),
      student:         populated.student.as_ref().map(PublicStudent::from),
      subject:         populated.subject.as_ref().map(PublicSubject::from),
      acknowledged_by: populated.acknowledged_by.as_ref().map(PublicUser::from),
    })
  } else {
    serde_json::to_value(PublicAlert::from(&alert))
  };
  Ok(Json(body.map_err(|e| ApiError::Internal(e.to_string()))?))
}

// ─── Acknowledge ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeBody {
  pub user_id: Uuid,
}

/// `POST /alerts/:id/acknowledge` with body `{"userId":"<uuid>"}`.
pub async fn acknowledge<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Path(id): Path<Uuid>,
  Json(body): Json<AcknowledgeBody>,
) -> Result<Json<PublicAlert>, ApiError> {
  let alert = actions::acknowledge(&*state.store, id, body.user_id).await?;
  Ok(Json(PublicAlert::from(&alert)))
}

// ─── Schedule ─────────────────────────────────────────────────────────────────

/// `POST /alerts/:id/schedule`
pub async fn schedule<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Path(id): Path<Uuid>,
) -> Result<Json<ScheduleResponse>, ApiError> {
  let outcome = state.scheduler.schedule(id).await?;
  Ok(Json(ScheduleResponse::from(&outcome)))
}

// ─── Reconcile ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReconcileParams {
  pub limit: Option<usize>,
}

/// `POST /alerts/reconcile[?limit=<n>]`
pub async fn reconcile<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Query(params): Query<ReconcileParams>,
) -> Result<Json<ReconcileReport>, ApiError> {
  let limit = params.limit.unwrap_or(DEFAULT_RECONCILE_LIMIT);
  Ok(Json(state.scheduler.reconcile(limit).await?))
}
