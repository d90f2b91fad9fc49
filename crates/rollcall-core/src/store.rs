//! Repository traits consumed by the pipeline.
//!
//! Storage backends (e.g. `rollcall-store-sqlite`) implement these; pipeline
//! components receive a handle at construction and never touch a connection
//! directly. Every state change that can race is expressed as a single
//! conditional operation so the backend can apply it atomically.
//!
//! All methods return `Send` futures so handles can be shared across tasks in
//! a multi-threaded tokio runtime.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  alert::{Acknowledgement, Alert, AlertInsert, NewAlert},
  attendance::{AttendanceRecord, DateWindow},
  directory::{Student, Subject, User},
  email::{CancelOutcome, Claim, EnqueueOutcome, NewScheduledEmail, Resolution, ScheduledEmail},
  unsubscribe::Unsubscribe,
};

// ─── Reference data ──────────────────────────────────────────────────────────

/// Read access to the attendance ledger.
pub trait AttendanceReader: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Daily records for a student inside `window`, oldest first. With a
  /// subject only that subject's records are returned; without one, all of
  /// the student's records are.
  fn get_attendance(
    &self,
    student_id: Uuid,
    subject_id: Option<Uuid>,
    window: DateWindow,
  ) -> impl Future<Output = Result<Vec<AttendanceRecord>, Self::Error>> + Send + '_;
}

/// Id-to-entity resolution for students, subjects and users.
pub trait Directory: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get_student(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Student>, Self::Error>> + Send + '_;

  fn get_subject(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + '_;

  fn get_user(&self, id: Uuid) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

pub trait AlertStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Insert `input` unless an unacknowledged alert for the same student and
  /// type overlaps its date range. Check and insert happen atomically.
  fn insert_unless_duplicate(
    &self,
    input: NewAlert,
  ) -> impl Future<Output = Result<AlertInsert, Self::Error>> + Send + '_;

  fn get_alert(&self, id: Uuid) -> impl Future<Output = Result<Option<Alert>, Self::Error>> + Send + '_;

  /// Set the acknowledgement if the alert is still open. An already
  /// acknowledged alert is returned unchanged. `None` if the alert is unknown.
  fn acknowledge(
    &self,
    id: Uuid,
    ack: Acknowledgement,
  ) -> impl Future<Output = Result<Option<Alert>, Self::Error>> + Send + '_;

  /// Stamp `notification_sent_at` unless it is already set.
  fn mark_notification_sent(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Record that scheduling found no eligible recipients. Only applies while
  /// the notification is neither sent nor already skipped.
  fn mark_notification_skipped(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Open alerts whose notification was never sent nor skipped and that have
  /// no scheduled email tagged for them, oldest first.
  fn list_unnotified(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Alert>, Self::Error>> + Send + '_;
}

// ─── Email queue ─────────────────────────────────────────────────────────────

pub trait EmailQueue: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist a new `pending` email. With `unique_tag`, an existing email that
  /// carries the tag is returned instead; lookup and insert are atomic.
  fn enqueue(
    &self,
    input: NewScheduledEmail,
    unique_tag: Option<String>,
  ) -> impl Future<Output = Result<EnqueueOutcome, Self::Error>> + Send + '_;

  fn get_email(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ScheduledEmail>, Self::Error>> + Send + '_;

  fn find_by_tag<'a>(
    &'a self,
    tag: &'a str,
  ) -> impl Future<Output = Result<Vec<ScheduledEmail>, Self::Error>> + Send + 'a;

  /// Ids of `pending` emails due at `now`, earliest `scheduled_at` first.
  fn due_ids(
    &self,
    now: DateTime<Utc>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Move one email from `pending` to `in_flight`. The update re-checks the
  /// status and due time, so among concurrent callers at most one receives
  /// `Some`.
  fn try_claim(
    &self,
    id: Uuid,
    claim: Claim,
  ) -> impl Future<Output = Result<Option<ScheduledEmail>, Self::Error>> + Send + '_;

  /// Apply the outcome of a send attempt to an `in_flight` email. `None` if
  /// the email was not in flight.
  fn resolve(
    &self,
    id: Uuid,
    resolution: Resolution,
  ) -> impl Future<Output = Result<Option<ScheduledEmail>, Self::Error>> + Send + '_;

  /// Cancel a `pending` email. `None` if the email is unknown.
  fn cancel(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<CancelOutcome>, Self::Error>> + Send + '_;
}

// ─── Opt-outs ────────────────────────────────────────────────────────────────

pub trait UnsubscribeStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get_unsubscribe<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<Unsubscribe>, Self::Error>> + Send + 'a;

  /// Record an opt-out. If a record for the address exists it is switched to
  /// `unsubscribed` and keeps its token; otherwise `fresh` is inserted as is.
  /// Returns the stored record.
  fn record_unsubscribe(
    &self,
    fresh: Unsubscribe,
  ) -> impl Future<Output = Result<Unsubscribe, Self::Error>> + Send + '_;

  /// Switch the record owning `token` to `resubscribed`. `None` if no record
  /// carries the token.
  fn resubscribe<'a>(
    &'a self,
    token: &'a str,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Unsubscribe>, Self::Error>> + Send + 'a;
}
