//! Scheduled notification emails and their delivery state machine.
//!
//! ```text
//! pending --claim--> in_flight --success--> sent
//! in_flight --transient, retries left--> pending
//! in_flight --transient, retries exhausted--> failed
//! in_flight --permanent--> failed
//! in_flight --released before sending--> pending
//! pending --cancel--> cancelled
//! ```
//!
//! `sent`, `failed` and `cancelled` are terminal. Every transition is applied
//! by the store as a conditional update on the expected source state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

const ALERT_TAG_PREFIX: &str = "alert:";

/// Tag linking a scheduled email to the alert it reports on.
pub fn alert_tag(alert_id: Uuid) -> String { format!("{ALERT_TAG_PREFIX}{alert_id}") }

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr,
  Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailStatus {
  Pending,
  /// Claimed by exactly one worker; the send attempt is in progress.
  InFlight,
  Sent,
  Failed,
  Cancelled,
}

impl EmailStatus {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Sent | Self::Failed | Self::Cancelled) }
}

// ─── Email ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
  pub filename:     String,
  pub content_type: String,
  pub content:      Vec<u8>,
}

/// The lease held by a worker while an email is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
  pub at: DateTime<Utc>,
  pub by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEmail {
  pub email_id:     Uuid,
  pub to:           Vec<String>,
  pub subject:      String,
  pub html:         String,
  pub text:         Option<String>,
  pub attachments:  Vec<Attachment>,
  pub scheduled_at: DateTime<Utc>,
  pub status:       EmailStatus,
  pub claim:        Option<Claim>,
  pub sent_at:      Option<DateTime<Utc>>,
  pub error:        Option<String>,
  pub retry_count:  u32,
  pub max_retries:  u32,
  pub tags:         Vec<String>,
  pub created_by:   Option<Uuid>,
  pub created_at:   DateTime<Utc>,
}

impl ScheduledEmail {
  /// The originating alert, if this email carries an alert tag.
  pub fn alert_id(&self) -> Option<Uuid> {
    self
      .tags
      .iter()
      .find_map(|t| t.strip_prefix(ALERT_TAG_PREFIX))
      .and_then(|id| Uuid::parse_str(id).ok())
  }
}

/// Input to [`EmailQueue::enqueue`](crate::store::EmailQueue). New emails
/// always start `pending` with a zero retry count.
#[derive(Debug, Clone)]
pub struct NewScheduledEmail {
  pub to:           Vec<String>,
  pub subject:      String,
  pub html:         String,
  pub text:         Option<String>,
  pub attachments:  Vec<Attachment>,
  pub scheduled_at: DateTime<Utc>,
  pub max_retries:  u32,
  pub tags:         Vec<String>,
  pub created_by:   Option<Uuid>,
}

impl NewScheduledEmail {
  pub fn validate(&self) -> Result<()> {
    if self.to.is_empty() {
      return Err(Error::validation("scheduled email needs at least one recipient"));
    }
    if let Some(bad) = self.to.iter().find(|a| a.trim().is_empty() || !a.contains('@')) {
      return Err(Error::validation(format!("invalid recipient address {bad:?}")));
    }
    if self.subject.trim().is_empty() {
      return Err(Error::validation("scheduled email subject must not be empty"));
    }
    if self.html.trim().is_empty() {
      return Err(Error::validation("scheduled email html body is required"));
    }
    Ok(())
  }

  pub fn into_email(self, email_id: Uuid, created_at: DateTime<Utc>) -> ScheduledEmail {
    ScheduledEmail {
      email_id,
      to: self.to,
      subject: self.subject,
      html: self.html,
      text: self.text,
      attachments: self.attachments,
      scheduled_at: self.scheduled_at,
      status: EmailStatus::Pending,
      claim: None,
      sent_at: None,
      error: None,
      retry_count: 0,
      max_retries: self.max_retries,
      tags: self.tags,
      created_by: self.created_by,
      created_at,
    }
  }
}

// ─── Transitions ─────────────────────────────────────────────────────────────

/// How an in-flight email leaves the `in_flight` state.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  Sent { at: DateTime<Utc> },
  /// Back to `pending` for another attempt.
  Retry {
    retry_count:     u32,
    next_attempt_at: DateTime<Utc>,
    error:           String,
  },
  Failed { retry_count: u32, error: String },
  /// Back to `pending` untouched: the worker gave up before contacting the
  /// transport, so the attempt does not count against the retry budget.
  Release,
}

#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
  Created(ScheduledEmail),
  /// An email carrying the same unique tag already exists.
  Existing(ScheduledEmail),
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
  Cancelled(ScheduledEmail),
  /// The email had already left `pending`; it is returned unchanged.
  NotPending(ScheduledEmail),
}
