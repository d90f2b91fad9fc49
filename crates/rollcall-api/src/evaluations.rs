//! Handler for `/evaluations`.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/evaluations` | Body: [`EvaluateBody`]; 201 when an alert was created, else 200 |

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::NaiveDate;
use rollcall_core::{attendance::DateWindow, public::PublicAlert};
use rollcall_pipeline::{Evaluation, PipelineStore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiState, alerts::ScheduleResponse, error::ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateBody {
  pub student_id: Uuid,
  pub subject_id: Option<Uuid>,
  pub start:      NaiveDate,
  pub end:        NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
  pub created:      Option<PublicAlert>,
  /// `"duplicate"` or `"no-anomaly"`.
  pub skipped:      Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub existing:     Option<PublicAlert>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notification: Option<ScheduleResponse>,
}

impl From<&Evaluation> for EvaluationResponse {
  fn from(e: &Evaluation) -> Self {
    Self {
      created:      e.created.as_ref().map(PublicAlert::from),
      skipped:      e.skipped.map(|r| r.to_string()),
      existing:     e.existing.as_ref().map(PublicAlert::from),
      notification: e.notification.as_ref().map(ScheduleResponse::from),
    }
  }
}

/// `POST /evaluations`
pub async fn create<S: PipelineStore>(
  State(state): State<Arc<ApiState<S>>>,
  Json(body): Json<EvaluateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let window = DateWindow::new(body.start, body.end)?;
  let evaluation = state.evaluator.evaluate(body.student_id, body.subject_id, window).await?;
  let status = if evaluation.created.is_some() { StatusCode::CREATED } else { StatusCode::OK };
  Ok((status, Json(EvaluationResponse::from(&evaluation))))
}
