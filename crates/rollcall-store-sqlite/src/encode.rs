//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that SQL string comparison orders them
//! chronologically. Dates are `YYYY-MM-DD`. Lists are compact JSON. UUIDs are
//! hyphenated lowercase strings. Enums use their snake_case discriminants.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rollcall_core::{
  alert::{Acknowledgement, Alert, AlertDetails},
  attendance::AttendanceRecord,
  directory::{Student, Subject, User},
  email::{Attachment, Claim, ScheduledEmail},
  error::parse_variant,
  unsubscribe::Unsubscribe,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> { Ok(parse_variant(kind, s)?) }

fn opt<T>(s: Option<String>, f: impl FnOnce(&str) -> Result<T>) -> Result<Option<T>> {
  s.as_deref().map(f).transpose()
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_strings(items: &[String]) -> Result<String> { Ok(serde_json::to_string(items)?) }

pub fn decode_strings(s: &str) -> Result<Vec<String>> { Ok(serde_json::from_str(s)?) }

pub fn encode_attachments(items: &[Attachment]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

pub fn decode_attachments(s: &str) -> Result<Vec<Attachment>> { Ok(serde_json::from_str(s)?) }

// ─── Alerts ──────────────────────────────────────────────────────────────────

pub const ALERT_COLUMNS: &str = "alert_id, alert_type, severity, student_id, subject_id, message,
  consecutive_days, attendance_rate, threshold, start_date, end_date,
  acknowledged_at, acknowledged_by, notification_sent_at, created_at, notification_skipped_at";

/// Raw values read directly from an `alerts` row.
pub struct RawAlert {
  pub alert_id:                String,
  pub alert_type:              String,
  pub severity:                String,
  pub student_id:              String,
  pub subject_id:              Option<String>,
  pub message:                 String,
  pub consecutive_days:        Option<i64>,
  pub attendance_rate:         Option<f64>,
  pub threshold:               Option<f64>,
  pub start_date:              String,
  pub end_date:                String,
  pub acknowledged_at:         Option<String>,
  pub acknowledged_by:         Option<String>,
  pub notification_sent_at:    Option<String>,
  pub created_at:              String,
  pub notification_skipped_at: Option<String>,
}

impl RawAlert {
  /// Column order matches [`ALERT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      alert_id:                row.get(0)?,
      alert_type:              row.get(1)?,
      severity:                row.get(2)?,
      student_id:              row.get(3)?,
      subject_id:              row.get(4)?,
      message:                 row.get(5)?,
      consecutive_days:        row.get(6)?,
      attendance_rate:         row.get(7)?,
      threshold:               row.get(8)?,
      start_date:              row.get(9)?,
      end_date:                row.get(10)?,
      acknowledged_at:         row.get(11)?,
      acknowledged_by:         row.get(12)?,
      notification_sent_at:    row.get(13)?,
      created_at:              row.get(14)?,
      notification_skipped_at: row.get(15)?,
    })
  }

  pub fn into_alert(self) -> Result<Alert> {
    let acknowledgement = match (self.acknowledged_at, self.acknowledged_by) {
      (Some(at), Some(by)) => Some(Acknowledgement { at: decode_dt(&at)?, by: decode_uuid(&by)? }),
      _ => None,
    };

    Ok(Alert {
      alert_id: decode_uuid(&self.alert_id)?,
      alert_type: decode_enum("alert type", &self.alert_type)?,
      severity: decode_enum("severity", &self.severity)?,
      student_id: decode_uuid(&self.student_id)?,
      subject_id: opt(self.subject_id, decode_uuid)?,
      message: self.message,
      details: AlertDetails {
        consecutive_days: self.consecutive_days.map(|d| d as u32),
        attendance_rate:  self.attendance_rate,
        threshold:        self.threshold,
        start_date:       decode_date(&self.start_date)?,
        end_date:         decode_date(&self.end_date)?,
      },
      acknowledgement,
      notification_sent_at: opt(self.notification_sent_at, decode_dt)?,
      notification_skipped_at: opt(self.notification_skipped_at, decode_dt)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

// ─── Scheduled emails ────────────────────────────────────────────────────────

pub const EMAIL_COLUMNS: &str = "e.email_id, e.recipients, e.subject, e.html, e.text,
  e.attachments, e.scheduled_at, e.status, e.claimed_at, e.claimed_by, e.sent_at,
  e.error, e.retry_count, e.max_retries, e.tags, e.created_by, e.created_at";

/// Raw values read directly from a `scheduled_emails` row (aliased `e`).
pub struct RawEmail {
  pub email_id:     String,
  pub recipients:   String,
  pub subject:      String,
  pub html:         String,
  pub text:         Option<String>,
  pub attachments:  String,
  pub scheduled_at: String,
  pub status:       String,
  pub claimed_at:   Option<String>,
  pub claimed_by:   Option<String>,
  pub sent_at:      Option<String>,
  pub error:        Option<String>,
  pub retry_count:  i64,
  pub max_retries:  i64,
  pub tags:         String,
  pub created_by:   Option<String>,
  pub created_at:   String,
}

impl RawEmail {
  /// Column order matches [`EMAIL_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      email_id:     row.get(0)?,
      recipients:   row.get(1)?,
      subject:      row.get(2)?,
      html:         row.get(3)?,
      text:         row.get(4)?,
      attachments:  row.get(5)?,
      scheduled_at: row.get(6)?,
      status:       row.get(7)?,
      claimed_at:   row.get(8)?,
      claimed_by:   row.get(9)?,
      sent_at:      row.get(10)?,
      error:        row.get(11)?,
      retry_count:  row.get(12)?,
      max_retries:  row.get(13)?,
      tags:         row.get(14)?,
      created_by:   row.get(15)?,
      created_at:   row.get(16)?,
    })
  }

  pub fn into_email(self) -> Result<ScheduledEmail> {
    let claim = match (self.claimed_at, self.claimed_by) {
      (Some(at), Some(by)) => Some(Claim { at: decode_dt(&at)?, by }),
      _ => None,
    };

    Ok(ScheduledEmail {
      email_id: decode_uuid(&self.email_id)?,
      to: decode_strings(&self.recipients)?,
      subject: self.subject,
      html: self.html,
      text: self.text,
      attachments: decode_attachments(&self.attachments)?,
      scheduled_at: decode_dt(&self.scheduled_at)?,
      status: decode_enum("email status", &self.status)?,
      claim,
      sent_at: opt(self.sent_at, decode_dt)?,
      error: self.error,
      retry_count: self.retry_count as u32,
      max_retries: self.max_retries as u32,
      tags: decode_strings(&self.tags)?,
      created_by: opt(self.created_by, decode_uuid)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

// ─── Unsubscribes ────────────────────────────────────────────────────────────

pub const UNSUBSCRIBE_COLUMNS: &str =
  "email, status, reason, token, unsubscribed_at, resubscribed_at";

pub struct RawUnsubscribe {
  pub email:           String,
  pub status:          String,
  pub reason:          Option<String>,
  pub token:           String,
  pub unsubscribed_at: String,
  pub resubscribed_at: Option<String>,
}

impl RawUnsubscribe {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      email:           row.get(0)?,
      status:          row.get(1)?,
      reason:          row.get(2)?,
      token:           row.get(3)?,
      unsubscribed_at: row.get(4)?,
      resubscribed_at: row.get(5)?,
    })
  }

  pub fn into_unsubscribe(self) -> Result<Unsubscribe> {
    Ok(Unsubscribe {
      email:           self.email,
      status:          decode_enum("unsubscribe status", &self.status)?,
      reason:          self.reason,
      token:           self.token,
      unsubscribed_at: decode_dt(&self.unsubscribed_at)?,
      resubscribed_at: opt(self.resubscribed_at, decode_dt)?,
    })
  }
}

// ─── Reference data ──────────────────────────────────────────────────────────

pub struct RawStudent {
  pub student_id:     String,
  pub name:           String,
  pub guardian_email: Option<String>,
}

impl RawStudent {
  pub fn into_student(self) -> Result<Student> {
    Ok(Student {
      student_id:     decode_uuid(&self.student_id)?,
      name:           self.name,
      guardian_email: self.guardian_email,
    })
  }
}

pub struct RawSubject {
  pub subject_id: String,
  pub name:       String,
  pub teacher_id: Option<String>,
}

impl RawSubject {
  pub fn into_subject(self) -> Result<Subject> {
    Ok(Subject {
      subject_id: decode_uuid(&self.subject_id)?,
      name:       self.name,
      teacher_id: opt(self.teacher_id, decode_uuid)?,
    })
  }
}

pub struct RawUser {
  pub user_id: String,
  pub name:    String,
  pub email:   String,
  pub role:    String,
}

impl RawUser {
  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id: decode_uuid(&self.user_id)?,
      name:    self.name,
      email:   self.email,
      role:    decode_enum("user role", &self.role)?,
    })
  }
}

pub struct RawAttendance {
  pub student_id: String,
  pub subject_id: Option<String>,
  pub date:       String,
  pub presence:   String,
}

impl RawAttendance {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      student_id: row.get(0)?,
      subject_id: row.get(1)?,
      date:       row.get(2)?,
      presence:   row.get(3)?,
    })
  }

  pub fn into_record(self) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
      student_id: decode_uuid(&self.student_id)?,
      subject_id: opt(self.subject_id, decode_uuid)?,
      date:       decode_date(&self.date)?,
      presence:   decode_enum("presence", &self.presence)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_sort_lexicographically() {
    let early = DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z").unwrap().with_timezone(&Utc);
    let late = early + chrono::Duration::nanoseconds(1_500);
    let (a, b) = (encode_dt(early), encode_dt(late));
    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert_eq!(decode_dt(&b).unwrap(), late - chrono::Duration::nanoseconds(500));
  }

  #[test]
  fn dates_roundtrip() {
    let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    assert_eq!(encode_date(d), "2024-02-29");
    assert_eq!(decode_date("2024-02-29").unwrap(), d);
  }

  #[test]
  fn unknown_enum_is_a_core_error() {
    let raw = RawUser {
      user_id: encode_uuid(Uuid::new_v4()),
      name:    "T".into(),
      email:   "t@example.com".into(),
      role:    "janitor".into(),
    };
    assert!(matches!(raw.into_user(), Err(Error::Core(_))));
  }
}
