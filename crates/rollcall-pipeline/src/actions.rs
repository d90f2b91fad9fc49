//! Operator entry points: acknowledging alerts and cancelling queued email.

use chrono::Utc;
use rollcall_core::{
  alert::{Acknowledgement, Alert},
  email::{CancelOutcome, ScheduledEmail},
  store::{AlertStore, Directory, EmailQueue},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Close `alert_id` on behalf of `user_id`. Acknowledging an acknowledged
/// alert returns it unchanged; the first acknowledgement stands.
pub async fn acknowledge<S>(store: &S, alert_id: Uuid, user_id: Uuid) -> Result<Alert>
where
  S: AlertStore + Directory,
{
  if store.get_user(user_id).await.map_err(Error::store)?.is_none() {
    return Err(Error::validation(format!("unknown user {user_id}")));
  }

  let alert = store
    .acknowledge(alert_id, Acknowledgement { at: Utc::now(), by: user_id })
    .await
    .map_err(Error::store)?
    .ok_or(Error::NotFound { kind: "alert", id: alert_id })?;

  match &alert.acknowledgement {
    Some(ack) if ack.by == user_id => info!(alert_id = %alert_id, user_id = %user_id, "alert acknowledged"),
    Some(ack) => debug!(
      alert_id = %alert_id,
      acknowledged_by = %ack.by,
      "alert was already acknowledged"
    ),
    None => warn!(alert_id = %alert_id, "acknowledgement did not stick"),
  }
  Ok(alert)
}

#[derive(Debug, Clone)]
pub enum Cancellation {
  Cancelled(ScheduledEmail),
  /// The email had already been claimed or finished.
  Rejected(ScheduledEmail),
}

impl Cancellation {
  pub fn rejection_reason(&self) -> Option<&'static str> {
    match self {
      Self::Cancelled(_) => None,
      Self::Rejected(_) => Some("not-pending"),
    }
  }

  pub fn email(&self) -> &ScheduledEmail {
    match self {
      Self::Cancelled(email) | Self::Rejected(email) => email,
    }
  }
}

/// Withdraw a queued email. Only `pending` emails can be cancelled; an email
/// a worker has already claimed is left alone.
pub async fn cancel<S: EmailQueue>(store: &S, email_id: Uuid) -> Result<Cancellation> {
  match store.cancel(email_id).await.map_err(Error::store)? {
    None => Err(Error::NotFound { kind: "scheduled email", id: email_id }),
    Some(CancelOutcome::Cancelled(email)) => {
      info!(email_id = %email_id, "scheduled email cancelled");
      Ok(Cancellation::Cancelled(email))
    }
    Some(CancelOutcome::NotPending(email)) => {
      warn!(email_id = %email_id, status = %email.status, "cancel refused; email is not pending");
      Ok(Cancellation::Rejected(email))
    }
  }
}
