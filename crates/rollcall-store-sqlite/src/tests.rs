//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rollcall_core::{
  alert::{Acknowledgement, AlertDetails, AlertInsert, AlertType, NewAlert, Severity},
  attendance::{AttendanceRecord, DateWindow, Presence},
  directory::{Student, Subject, User, UserRole},
  email::{
    CancelOutcome, Claim, EmailStatus, EnqueueOutcome, NewScheduledEmail, Resolution, alert_tag,
  },
  store::{AlertStore, AttendanceReader, Directory, EmailQueue, UnsubscribeStore},
  unsubscribe::{Unsubscribe, UnsubscribeStatus},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 9, d).unwrap() }

/// An opt-out record with a known token.
fn opt_out(email: &str, token: &str) -> Unsubscribe {
  Unsubscribe {
    email:           email.to_owned(),
    status:          UnsubscribeStatus::Unsubscribed,
    reason:          None,
    token:           token.to_owned(),
    unsubscribed_at: Utc::now(),
    resubscribed_at: None,
  }
}

// ─── Reference data ──────────────────────────────────────────────────────────

#[tokio::test]
async fn directory_lookups() {
  let s = store().await;
  let teacher = User {
    user_id: Uuid::new_v4(),
    name:    "Ms Frizzle".into(),
    email:   "frizzle@school.example".into(),
    role:    UserRole::Teacher,
  };
  let subject = Subject {
    subject_id: Uuid::new_v4(),
    name:       "Science".into(),
    teacher_id: Some(teacher.user_id),
  };
  let student = Student {
    student_id:     Uuid::new_v4(),
    name:           "Arnold".into(),
    guardian_email: Some("parent@example.com".into()),
  };
  s.insert_user(&teacher).await.unwrap();
  s.insert_subject(&subject).await.unwrap();
  s.insert_student(&student).await.unwrap();

  let got = s.get_student(student.student_id).await.unwrap().unwrap();
  assert_eq!(got.guardian_email.as_deref(), Some("parent@example.com"));
  let got = s.get_subject(subject.subject_id).await.unwrap().unwrap();
  assert_eq!(got.teacher_id, Some(teacher.user_id));
  let got = s.get_user(teacher.user_id).await.unwrap().unwrap();
  assert_eq!(got.role, UserRole::Teacher);

  assert!(s.get_student(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn attendance_is_windowed_ordered_and_subject_scoped() {
  let s = store().await;
  let student = Uuid::new_v4();
  let maths = Uuid::new_v4();
  let art = Uuid::new_v4();
  let rec = |subject, d, presence| AttendanceRecord {
    student_id: student,
    subject_id: Some(subject),
    date: day(d),
    presence,
  };
  s.record_attendance(&[
    rec(maths, 5, Presence::Absent),
    rec(maths, 2, Presence::Present),
    rec(art, 3, Presence::Late),
    rec(maths, 20, Presence::Absent),
  ])
  .await
  .unwrap();

  let window = DateWindow::new(day(1), day(10)).unwrap();
  let all = s.get_attendance(student, None, window).await.unwrap();
  assert_eq!(all.iter().map(|r| r.date).collect::<Vec<_>>(), vec![day(2), day(3), day(5)]);

  let only_maths = s.get_attendance(student, Some(maths), window).await.unwrap();
  assert_eq!(only_maths.len(), 2);
  assert!(only_maths.iter().all(|r| r.subject_id == Some(maths)));
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

fn absence_alert(student: Uuid, start: u32, end: u32) -> NewAlert {
  NewAlert {
    alert_type: AlertType::ConsecutiveAbsence,
    severity:   Severity::Warning,
    student_id: student,
    subject_id: None,
    message:    "Absent on consecutive days".into(),
    details:    AlertDetails {
      consecutive_days: Some(end - start + 1),
      attendance_rate:  None,
      threshold:        Some(3.0),
      start_date:       day(start),
      end_date:         day(end),
    },
  }
}

fn created(insert: AlertInsert) -> rollcall_core::alert::Alert {
  match insert {
    AlertInsert::Created(a) => a,
    AlertInsert::Duplicate(a) => panic!("unexpected duplicate {}", a.alert_id),
  }
}

#[tokio::test]
async fn overlapping_open_alert_is_a_duplicate() {
  let s = store().await;
  let student = Uuid::new_v4();

  let first = created(s.insert_unless_duplicate(absence_alert(student, 2, 4)).await.unwrap());

  match s.insert_unless_duplicate(absence_alert(student, 4, 6)).await.unwrap() {
    AlertInsert::Duplicate(existing) => assert_eq!(existing.alert_id, first.alert_id),
    AlertInsert::Created(_) => panic!("overlapping alert must not be created"),
  }

  // Disjoint range, other type, other student: all allowed.
  created(s.insert_unless_duplicate(absence_alert(student, 10, 12)).await.unwrap());
  let mut low = absence_alert(student, 2, 4);
  low.alert_type = AlertType::LowAttendance;
  created(s.insert_unless_duplicate(low).await.unwrap());
  created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());
}

#[tokio::test]
async fn acknowledged_alert_no_longer_blocks() {
  let s = store().await;
  let student = Uuid::new_v4();
  let first = created(s.insert_unless_duplicate(absence_alert(student, 2, 4)).await.unwrap());

  let ack = Acknowledgement { at: Utc::now(), by: Uuid::new_v4() };
  let acked = s.acknowledge(first.alert_id, ack).await.unwrap().unwrap();
  assert!(acked.acknowledged());

  created(s.insert_unless_duplicate(absence_alert(student, 3, 5)).await.unwrap());
}

#[tokio::test]
async fn acknowledge_sets_both_fields_and_keeps_first() {
  let s = store().await;
  let alert = created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());

  let first = Acknowledgement { at: Utc::now(), by: Uuid::new_v4() };
  let acked = s.acknowledge(alert.alert_id, first.clone()).await.unwrap().unwrap();
  let stored = acked.acknowledgement.unwrap();
  assert_eq!(stored.by, first.by);

  let second = Acknowledgement { at: Utc::now(), by: Uuid::new_v4() };
  let again = s.acknowledge(alert.alert_id, second).await.unwrap().unwrap();
  assert_eq!(again.acknowledgement.unwrap().by, first.by);

  assert!(s.acknowledge(Uuid::new_v4(), first).await.unwrap().is_none());
}

#[tokio::test]
async fn notification_sent_is_stamped_once() {
  let s = store().await;
  let alert = created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());

  let at = Utc::now();
  assert!(s.mark_notification_sent(alert.alert_id, at).await.unwrap());
  assert!(!s.mark_notification_sent(alert.alert_id, at + Duration::hours(1)).await.unwrap());

  let stored = s.get_alert(alert.alert_id).await.unwrap().unwrap();
  assert!(stored.notification_sent());
}

#[tokio::test]
async fn unnotified_alerts_exclude_those_with_email() {
  let s = store().await;
  let a = created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());
  let b = created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());

  s.enqueue(new_email(Utc::now()), Some(alert_tag(a.alert_id))).await.unwrap();

  let pending = s.list_unnotified(10).await.unwrap();
  assert_eq!(pending.iter().map(|x| x.alert_id).collect::<Vec<_>>(), vec![b.alert_id]);
}

#[tokio::test]
async fn skipped_alerts_leave_the_unnotified_list() {
  let s = store().await;
  let a = created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());
  let b = created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());

  assert!(s.mark_notification_skipped(a.alert_id, Utc::now()).await.unwrap());
  assert!(!s.mark_notification_skipped(a.alert_id, Utc::now()).await.unwrap());

  let stored = s.get_alert(a.alert_id).await.unwrap().unwrap();
  assert!(stored.notification_skipped());
  assert!(!stored.notification_sent());

  let pending = s.list_unnotified(10).await.unwrap();
  assert_eq!(pending.iter().map(|x| x.alert_id).collect::<Vec<_>>(), vec![b.alert_id]);

  // A sent notification cannot be turned into a skipped one.
  s.mark_notification_sent(b.alert_id, Utc::now()).await.unwrap();
  assert!(!s.mark_notification_skipped(b.alert_id, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn version_one_files_gain_the_skip_column() {
  let path = std::env::temp_dir().join(format!("rollcall-{}.db", Uuid::new_v4()));
  {
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn
      .execute_batch(
        "CREATE TABLE alerts (
           alert_id TEXT PRIMARY KEY, alert_type TEXT NOT NULL, severity TEXT NOT NULL,
           student_id TEXT NOT NULL, subject_id TEXT, message TEXT NOT NULL,
           consecutive_days INTEGER, attendance_rate REAL, threshold REAL,
           start_date TEXT NOT NULL, end_date TEXT NOT NULL,
           acknowledged_at TEXT, acknowledged_by TEXT,
           notification_sent_at TEXT, created_at TEXT NOT NULL
         );
         PRAGMA user_version = 1;",
      )
      .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  let alert = created(s.insert_unless_duplicate(absence_alert(Uuid::new_v4(), 2, 4)).await.unwrap());
  assert!(s.mark_notification_skipped(alert.alert_id, Utc::now()).await.unwrap());
  assert!(s.list_unnotified(10).await.unwrap().is_empty());
  drop(s);

  // Reopening an upgraded file must not re-run the upgrade.
  let s = SqliteStore::open(&path).await.unwrap();
  assert!(s.get_alert(alert.alert_id).await.unwrap().unwrap().notification_skipped());
  drop(s);

  for suffix in ["", "-wal", "-shm"] {
    let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
  }
}

// ─── Email queue ─────────────────────────────────────────────────────────────

fn new_email(scheduled_at: chrono::DateTime<Utc>) -> NewScheduledEmail {
  NewScheduledEmail {
    to: vec!["parent@example.com".into()],
    subject: "Attendance alert".into(),
    html: "<p>Absent</p>".into(),
    text: Some("Absent".into()),
    attachments: vec![],
    scheduled_at,
    max_retries: 3,
    tags: vec![],
    created_by: None,
  }
}

fn claim(worker: &str) -> Claim { Claim { at: Utc::now(), by: worker.into() } }

async fn enqueue(s: &SqliteStore, at: chrono::DateTime<Utc>) -> Uuid {
  match s.enqueue(new_email(at), None).await.unwrap() {
    EnqueueOutcome::Created(e) => e.email_id,
    EnqueueOutcome::Existing(_) => panic!("no unique tag given"),
  }
}

#[tokio::test]
async fn unique_tag_returns_existing_email() {
  let s = store().await;
  let tag = alert_tag(Uuid::new_v4());

  let first = match s.enqueue(new_email(Utc::now()), Some(tag.clone())).await.unwrap() {
    EnqueueOutcome::Created(e) => e,
    EnqueueOutcome::Existing(_) => panic!("first enqueue must create"),
  };
  assert!(first.tags.contains(&tag));

  match s.enqueue(new_email(Utc::now()), Some(tag.clone())).await.unwrap() {
    EnqueueOutcome::Existing(e) => assert_eq!(e.email_id, first.email_id),
    EnqueueOutcome::Created(_) => panic!("second enqueue must not create"),
  }
  assert_eq!(s.find_by_tag(&tag).await.unwrap().len(), 1);
}

#[tokio::test]
async fn enqueue_rejects_empty_recipients() {
  let s = store().await;
  let mut input = new_email(Utc::now());
  input.to.clear();
  assert!(s.enqueue(input, None).await.is_err());
}

#[tokio::test]
async fn due_ids_are_fifo_and_skip_future() {
  let s = store().await;
  let now = Utc::now();
  let later = enqueue(&s, now - Duration::minutes(1)).await;
  let earliest = enqueue(&s, now - Duration::minutes(5)).await;
  let _future = enqueue(&s, now + Duration::minutes(5)).await;

  assert_eq!(s.due_ids(now, 10).await.unwrap(), vec![earliest, later]);
  assert_eq!(s.due_ids(now, 1).await.unwrap(), vec![earliest]);
}

#[tokio::test]
async fn claim_succeeds_once() {
  let s = store().await;
  let id = enqueue(&s, Utc::now() - Duration::seconds(1)).await;

  let won = s.try_claim(id, claim("w1")).await.unwrap().unwrap();
  assert_eq!(won.status, EmailStatus::InFlight);
  assert_eq!(won.claim.unwrap().by, "w1");

  assert!(s.try_claim(id, claim("w2")).await.unwrap().is_none());
  assert!(s.due_ids(Utc::now(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
  let s = Arc::new(store().await);
  let id = enqueue(&s, Utc::now() - Duration::seconds(1)).await;

  let mut handles = Vec::new();
  for n in 0..16 {
    let s = s.clone();
    handles.push(tokio::spawn(async move {
      s.try_claim(id, claim(&format!("w{n}"))).await.unwrap().is_some()
    }));
  }

  let mut winners = 0;
  for h in handles {
    if h.await.unwrap() {
      winners += 1;
    }
  }
  assert_eq!(winners, 1);
}

#[tokio::test]
async fn claim_ignores_items_not_yet_due() {
  let s = store().await;
  let id = enqueue(&s, Utc::now() + Duration::hours(1)).await;
  assert!(s.try_claim(id, claim("w1")).await.unwrap().is_none());
}

#[tokio::test]
async fn resolutions_apply_only_in_flight() {
  let s = store().await;
  let id = enqueue(&s, Utc::now() - Duration::seconds(1)).await;

  // Not claimed yet.
  assert!(s.resolve(id, Resolution::Sent { at: Utc::now() }).await.unwrap().is_none());

  s.try_claim(id, claim("w1")).await.unwrap().unwrap();
  let next = Utc::now() + Duration::minutes(2);
  let retried = s
    .resolve(id, Resolution::Retry {
      retry_count:     1,
      next_attempt_at: next,
      error:           "421 try later".into(),
    })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(retried.status, EmailStatus::Pending);
  assert_eq!(retried.retry_count, 1);
  assert_eq!(retried.error.as_deref(), Some("421 try later"));
  assert!(retried.claim.is_none());
  assert!(retried.scheduled_at > Utc::now());

  let reclaim = Claim { at: next + Duration::seconds(1), by: "w2".into() };
  s.try_claim(id, reclaim).await.unwrap().unwrap();
  let sent = s.resolve(id, Resolution::Sent { at: Utc::now() }).await.unwrap().unwrap();
  assert_eq!(sent.status, EmailStatus::Sent);
  assert!(sent.sent_at.is_some());
  assert!(sent.error.is_none());
}

#[tokio::test]
async fn failed_resolution_records_error() {
  let s = store().await;
  let id = enqueue(&s, Utc::now() - Duration::seconds(1)).await;
  s.try_claim(id, claim("w1")).await.unwrap().unwrap();

  let failed = s
    .resolve(id, Resolution::Failed { retry_count: 0, error: "550 no such user".into() })
    .await
    .unwrap()
    .unwrap();
  assert_eq!(failed.status, EmailStatus::Failed);
  assert_eq!(failed.error.as_deref(), Some("550 no such user"));
}

#[tokio::test]
async fn release_returns_the_email_untouched() {
  let s = store().await;
  let due = Utc::now() - Duration::seconds(1);
  let id = enqueue(&s, due).await;
  let claimed = s.try_claim(id, claim("w1")).await.unwrap().unwrap();
  assert_eq!(claimed.status, EmailStatus::InFlight);

  let released = s.resolve(id, Resolution::Release).await.unwrap().unwrap();
  assert_eq!(released.status, EmailStatus::Pending);
  assert_eq!(released.retry_count, 0);
  assert_eq!(released.scheduled_at, claimed.scheduled_at);
  assert!(released.claim.is_none());
  assert!(released.error.is_none());

  // Released once; a second release finds nothing in flight.
  assert!(s.resolve(id, Resolution::Release).await.unwrap().is_none());
  assert!(s.try_claim(id, claim("w2")).await.unwrap().is_some());
}

#[tokio::test]
async fn cancel_only_from_pending() {
  let s = store().await;
  let pending = enqueue(&s, Utc::now() + Duration::minutes(1)).await;
  match s.cancel(pending).await.unwrap().unwrap() {
    CancelOutcome::Cancelled(e) => assert_eq!(e.status, EmailStatus::Cancelled),
    CancelOutcome::NotPending(_) => panic!("pending email must cancel"),
  }

  let claimed = enqueue(&s, Utc::now() - Duration::seconds(1)).await;
  s.try_claim(claimed, claim("w1")).await.unwrap().unwrap();
  match s.cancel(claimed).await.unwrap().unwrap() {
    CancelOutcome::NotPending(e) => assert_eq!(e.status, EmailStatus::InFlight),
    CancelOutcome::Cancelled(_) => panic!("in-flight email must not cancel"),
  }

  assert!(s.cancel(Uuid::new_v4()).await.unwrap().is_none());
}

// ─── Unsubscribes ────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsubscribe_keeps_first_token() {
  let s = store().await;
  let first = s.record_unsubscribe(opt_out("p@example.com", "tok-1")).await.unwrap();
  assert_eq!(first.token, "tok-1");

  let again = s.record_unsubscribe(opt_out("p@example.com", "tok-2")).await.unwrap();
  assert_eq!(again.token, "tok-1");
  assert_eq!(again.status, UnsubscribeStatus::Unsubscribed);
}

#[tokio::test]
async fn resubscribe_then_unsubscribe_again() {
  let s = store().await;
  s.record_unsubscribe(opt_out("p@example.com", "tok-1")).await.unwrap();

  let resub = s.resubscribe("tok-1", Utc::now()).await.unwrap().unwrap();
  assert_eq!(resub.status, UnsubscribeStatus::Resubscribed);
  assert!(resub.resubscribed_at.is_some());

  let stored = s.get_unsubscribe("p@example.com").await.unwrap().unwrap();
  assert!(!stored.is_unsubscribed());

  let back = s.record_unsubscribe(opt_out("p@example.com", "tok-9")).await.unwrap();
  assert_eq!(back.status, UnsubscribeStatus::Unsubscribed);
  assert_eq!(back.token, "tok-1");
  assert!(back.resubscribed_at.is_none());

  assert!(s.resubscribe("unknown", Utc::now()).await.unwrap().is_none());
}
