//! Shared fixtures for the pipeline tests.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
  },
  time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{
  alert::{Acknowledgement, Alert, AlertInsert, NewAlert},
  attendance::{AttendanceRecord, DateWindow, Presence},
  directory::{Student, Subject, User, UserRole},
  email::{CancelOutcome, Claim, EnqueueOutcome, NewScheduledEmail, Resolution, ScheduledEmail},
  store::{AlertStore, EmailQueue, UnsubscribeStore},
  unsubscribe::Unsubscribe,
};
use rollcall_store_sqlite::SqliteStore;
use uuid::Uuid;

use crate::transport::{EmailTransport, OutgoingEmail, SendError};

pub const GUARDIAN: &str = "guardian@example.com";
pub const TEACHER: &str = "teacher@school.example";

pub struct Fixture {
  pub store:   Arc<SqliteStore>,
  pub student: Student,
  pub subject: Subject,
  pub teacher: User,
  pub admin:   User,
}

pub async fn fixture() -> Fixture {
  let store = SqliteStore::open_in_memory().await.unwrap();

  let teacher = User {
    user_id: Uuid::new_v4(),
    name:    "Grace Hopper".into(),
    email:   TEACHER.into(),
    role:    UserRole::Teacher,
  };
  let admin = User {
    user_id: Uuid::new_v4(),
    name:    "Office".into(),
    email:   "office@school.example".into(),
    role:    UserRole::Admin,
  };
  let subject = Subject {
    subject_id: Uuid::new_v4(),
    name:       "Maths".into(),
    teacher_id: Some(teacher.user_id),
  };
  let student = Student {
    student_id:     Uuid::new_v4(),
    name:           "Ada Lovelace".into(),
    guardian_email: Some(GUARDIAN.into()),
  };

  store.insert_user(&teacher).await.unwrap();
  store.insert_user(&admin).await.unwrap();
  store.insert_subject(&subject).await.unwrap();
  store.insert_student(&student).await.unwrap();

  Fixture { store: Arc::new(store), student, subject, teacher, admin }
}

/// A day in September 2024. The 2nd is a Monday.
pub fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 9, d).unwrap() }

pub fn window(start: u32, end: u32) -> DateWindow { DateWindow::new(day(start), day(end)).unwrap() }

pub async fn mark(
  store: &SqliteStore,
  student_id: Uuid,
  subject_id: Option<Uuid>,
  days: &[u32],
  presence: Presence,
) {
  let records: Vec<_> = days
    .iter()
    .map(|d| AttendanceRecord { student_id, subject_id, date: day(*d), presence })
    .collect();
  store.record_attendance(&records).await.unwrap();
}

/// A transport that plays back queued outcomes, then succeeds.
#[derive(Default)]
pub struct ScriptedTransport {
  outcomes: Mutex<VecDeque<Result<(), SendError>>>,
  sent:     Mutex<Vec<OutgoingEmail>>,
  attempts: AtomicUsize,
  latency:  Option<Duration>,
}

impl ScriptedTransport {
  pub fn new() -> Self { Self::default() }

  pub fn with_latency(latency: Duration) -> Self { Self { latency: Some(latency), ..Self::default() } }

  pub fn script(self, outcomes: impl IntoIterator<Item = Result<(), SendError>>) -> Self {
    self.outcomes.lock().unwrap().extend(outcomes);
    self
  }

  pub fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }

  pub fn sent(&self) -> Vec<OutgoingEmail> { self.sent.lock().unwrap().clone() }
}

impl EmailTransport for ScriptedTransport {
  async fn send(&self, email: &OutgoingEmail) -> Result<(), SendError> {
    self.attempts.fetch_add(1, Ordering::SeqCst);
    if let Some(latency) = self.latency {
      tokio::time::sleep(latency).await;
    }
    let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
    if outcome.is_ok() {
      self.sent.lock().unwrap().push(email.clone());
    }
    outcome
  }

  fn name(&self) -> &'static str { "scripted" }
}

#[derive(Debug, thiserror::Error)]
pub enum FlakyError {
  #[error("store unavailable")]
  Unavailable,
  #[error(transparent)]
  Store(#[from] rollcall_store_sqlite::Error),
}

/// A [`SqliteStore`] whose claims, opt-out lookups and resolutions can be
/// made to misbehave.
pub struct FlakyStore {
  inner:              Arc<SqliteStore>,
  claims_left:        AtomicUsize,
  opt_outs_down:      AtomicBool,
  ignore_resolutions: AtomicBool,
}

impl FlakyStore {
  pub fn new(inner: Arc<SqliteStore>) -> Self {
    Self {
      inner,
      claims_left: AtomicUsize::new(usize::MAX),
      opt_outs_down: AtomicBool::new(false),
      ignore_resolutions: AtomicBool::new(false),
    }
  }

  /// Let `n` more claims through, then fail every claim.
  pub fn fail_claims_after(&self, n: usize) { self.claims_left.store(n, Ordering::SeqCst); }

  pub fn heal_claims(&self) { self.claims_left.store(usize::MAX, Ordering::SeqCst); }

  pub fn set_opt_outs_down(&self, down: bool) { self.opt_outs_down.store(down, Ordering::SeqCst); }

  /// Report every resolution as not applying, as if the email had already
  /// left `in_flight`.
  pub fn ignore_resolutions(&self) { self.ignore_resolutions.store(true, Ordering::SeqCst); }
}

impl AlertStore for FlakyStore {
  type Error = FlakyError;

  async fn insert_unless_duplicate(&self, input: NewAlert) -> Result<AlertInsert, FlakyError> {
    Ok(self.inner.insert_unless_duplicate(input).await?)
  }

  async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>, FlakyError> {
    Ok(self.inner.get_alert(id).await?)
  }

  async fn acknowledge(&self, id: Uuid, ack: Acknowledgement) -> Result<Option<Alert>, FlakyError> {
    Ok(self.inner.acknowledge(id, ack).await?)
  }

  async fn mark_notification_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, FlakyError> {
    Ok(self.inner.mark_notification_sent(id, at).await?)
  }

  async fn mark_notification_skipped(
    &self,
    id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<bool, FlakyError> {
    Ok(self.inner.mark_notification_skipped(id, at).await?)
  }

  async fn list_unnotified(&self, limit: usize) -> Result<Vec<Alert>, FlakyError> {
    Ok(self.inner.list_unnotified(limit).await?)
  }
}

impl EmailQueue for FlakyStore {
  type Error = FlakyError;

  async fn enqueue(
    &self,
    input: NewScheduledEmail,
    unique_tag: Option<String>,
  ) -> Result<EnqueueOutcome, FlakyError> {
    Ok(self.inner.enqueue(input, unique_tag).await?)
  }

  async fn get_email(&self, id: Uuid) -> Result<Option<ScheduledEmail>, FlakyError> {
    Ok(self.inner.get_email(id).await?)
  }

  async fn find_by_tag(&self, tag: &str) -> Result<Vec<ScheduledEmail>, FlakyError> {
    Ok(self.inner.find_by_tag(tag).await?)
  }

  async fn due_ids(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, FlakyError> {
    Ok(self.inner.due_ids(now, limit).await?)
  }

  async fn try_claim(&self, id: Uuid, claim: Claim) -> Result<Option<ScheduledEmail>, FlakyError> {
    self
      .claims_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .map_err(|_| FlakyError::Unavailable)?;
    Ok(self.inner.try_claim(id, claim).await?)
  }

  async fn resolve(
    &self,
    id: Uuid,
    resolution: Resolution,
  ) -> Result<Option<ScheduledEmail>, FlakyError> {
    if self.ignore_resolutions.load(Ordering::SeqCst) {
      return Ok(None);
    }
    Ok(self.inner.resolve(id, resolution).await?)
  }

  async fn cancel(&self, id: Uuid) -> Result<Option<CancelOutcome>, FlakyError> {
    Ok(self.inner.cancel(id).await?)
  }
}

impl UnsubscribeStore for FlakyStore {
  type Error = FlakyError;

  async fn get_unsubscribe(&self, email: &str) -> Result<Option<Unsubscribe>, FlakyError> {
    if self.opt_outs_down.load(Ordering::SeqCst) {
      return Err(FlakyError::Unavailable);
    }
    Ok(self.inner.get_unsubscribe(email).await?)
  }

  async fn record_unsubscribe(&self, fresh: Unsubscribe) -> Result<Unsubscribe, FlakyError> {
    Ok(self.inner.record_unsubscribe(fresh).await?)
  }

  async fn resubscribe(&self, token: &str, at: DateTime<Utc>) -> Result<Option<Unsubscribe>, FlakyError> {
    Ok(self.inner.resubscribe(token, at).await?)
  }
}
