//! The serialization boundary: shapes handed to external interfaces.
//!
//! Domain types carry internal state (worker leases, raw attachment bytes,
//! resubscription tokens) that must never leave the process as-is. Anything
//! crossing an API goes through one of these views, which expose a plain
//! `id` and camelCase field names.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
  alert::{Alert, AlertType, Severity},
  directory::{Student, Subject, User, UserRole},
  email::{EmailStatus, ScheduledEmail},
  unsubscribe::{Unsubscribe, UnsubscribeStatus},
};

// ─── Alert ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAlertDetails {
  pub consecutive_days: Option<u32>,
  pub attendance_rate:  Option<f64>,
  pub threshold:        Option<f64>,
  pub start_date:       NaiveDate,
  pub end_date:         NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAlert {
  pub id:                      Uuid,
  #[serde(rename = "type")]
  pub alert_type:              AlertType,
  pub severity:                Severity,
  pub student:                 Uuid,
  pub subject:                 Option<Uuid>,
  pub message:                 String,
  pub details:                 PublicAlertDetails,
  pub acknowledged:            bool,
  pub acknowledged_at:         Option<DateTime<Utc>>,
  pub acknowledged_by:         Option<Uuid>,
  pub notification_sent:       bool,
  pub notification_sent_at:    Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notification_skipped_at: Option<DateTime<Utc>>,
  pub created_at:              DateTime<Utc>,
}

impl From<&Alert> for PublicAlert {
  fn from(alert: &Alert) -> Self {
    let d = &alert.details;
    Self {
      id:                      alert.alert_id,
      alert_type:              alert.alert_type,
      severity:                alert.severity,
      student:                 alert.student_id,
      subject:                 alert.subject_id,
      message:                 alert.message.clone(),
      details:                 PublicAlertDetails {
        consecutive_days: d.consecutive_days,
        attendance_rate:  d.attendance_rate,
        threshold:        d.threshold,
        start_date:       d.start_date,
        end_date:         d.end_date,
      },
      acknowledged:            alert.acknowledged(),
      acknowledged_at:         alert.acknowledgement.as_ref().map(|a| a.at),
      acknowledged_by:         alert.acknowledgement.as_ref().map(|a| a.by),
      notification_sent:       alert.notification_sent(),
      notification_sent_at:    alert.notification_sent_at,
      notification_skipped_at: alert.notification_skipped_at,
      created_at:              alert.created_at,
    }
  }
}

// ─── ScheduledEmail ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicAttachment {
  pub filename:     String,
  pub content_type: String,
  pub size:         usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicScheduledEmail {
  pub id:           Uuid,
  pub to:           Vec<String>,
  pub subject:      String,
  pub html:         String,
  pub text:         Option<String>,
  pub attachments:  Vec<PublicAttachment>,
  pub scheduled_at: DateTime<Utc>,
  pub status:       EmailStatus,
  pub sent_at:      Option<DateTime<Utc>>,
  pub error:        Option<String>,
  pub retry_count:  u32,
  pub max_retries:  u32,
  pub tags:         Vec<String>,
  pub created_by:   Option<Uuid>,
  pub created_at:   DateTime<Utc>,
}

impl From<&ScheduledEmail> for PublicScheduledEmail {
  fn from(email: &ScheduledEmail) -> Self {
    Self {
      id:           email.email_id,
      to:           email.to.clone(),
      subject:      email.subject.clone(),
      html:         email.html.clone(),
      text:         email.text.clone(),
      attachments:  email
        .attachments
        .iter()
        .map(|a| PublicAttachment {
          filename:     a.filename.clone(),
          content_type: a.content_type.clone(),
          size:         a.content.len(),
        })
        .collect(),
      scheduled_at: email.scheduled_at,
      status:       email.status,
      sent_at:      email.sent_at,
      error:        email.error.clone(),
      retry_count:  email.retry_count,
      max_retries:  email.max_retries,
      tags:         email.tags.clone(),
      created_by:   email.created_by,
      created_at:   email.created_at,
    }
  }
}

// ─── Unsubscribe ─────────────────────────────────────────────────────────────

/// An opt-out record without its token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUnsubscribe {
  pub email:           String,
  pub status:          UnsubscribeStatus,
  pub reason:          Option<String>,
  pub unsubscribed_at: DateTime<Utc>,
  pub resubscribed_at: Option<DateTime<Utc>>,
}

impl From<&Unsubscribe> for PublicUnsubscribe {
  fn from(u: &Unsubscribe) -> Self {
    Self {
      email:           u.email.clone(),
      status:          u.status,
      reason:          u.reason.clone(),
      unsubscribed_at: u.unsubscribed_at,
      resubscribed_at: u.resubscribed_at,
    }
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Directory entries as shown next to a populated alert. Contact addresses
/// stay internal.
#[derive(Debug, Clone, Serialize)]
pub struct PublicStudent {
  pub id:   Uuid,
  pub name: String,
}

impl From<&Student> for PublicStudent {
  fn from(s: &Student) -> Self { Self { id: s.student_id, name: s.name.clone() } }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicSubject {
  pub id:   Uuid,
  pub name: String,
}

impl From<&Subject> for PublicSubject {
  fn from(s: &Subject) -> Self { Self { id: s.subject_id, name: s.name.clone() } }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
  pub id:   Uuid,
  pub name: String,
  pub role: UserRole,
}

impl From<&User> for PublicUser {
  fn from(u: &User) -> Self { Self { id: u.user_id, name: u.name.clone(), role: u.role } }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    alert::{Acknowledgement, AlertDetails, NewAlert},
    email::{Attachment, Claim, NewScheduledEmail},
  };
  use rand_core::OsRng;

  fn alert() -> Alert {
    let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
    NewAlert {
      alert_type: AlertType::ConsecutiveAbsence,
      severity:   Severity::Warning,
      student_id: Uuid::new_v4(),
      subject_id: None,
      message:    "Absent 3 days".into(),
      details:    AlertDetails {
        consecutive_days: Some(3),
        attendance_rate:  None,
        threshold:        Some(3.0),
        start_date:       day,
        end_date:         day,
      },
    }
    .into_alert(Uuid::new_v4(), Utc::now())
  }

  #[test]
  fn alert_view_uses_public_names() {
    let mut a = alert();
    let user = Uuid::new_v4();
    a.acknowledgement = Some(Acknowledgement { at: Utc::now(), by: user });

    let json = serde_json::to_value(PublicAlert::from(&a)).unwrap();
    assert_eq!(json["id"], a.alert_id.to_string());
    assert_eq!(json["type"], "consecutive_absence");
    assert_eq!(json["acknowledged"], true);
    assert_eq!(json["acknowledgedBy"], user.to_string());
    assert_eq!(json["notificationSent"], false);
    assert_eq!(json["details"]["consecutiveDays"], 3);
    assert!(json.get("alert_id").is_none());
  }

  #[test]
  fn email_view_strips_lease_and_attachment_bytes() {
    let mut email = NewScheduledEmail {
      to:           vec!["parent@example.com".into()],
      subject:      "Alert".into(),
      html:         "<p>x</p>".into(),
      text:         None,
      attachments:  vec![Attachment {
        filename:     "report.csv".into(),
        content_type: "text/csv".into(),
        content:      b"a,b\n1,2\n".to_vec(),
      }],
      scheduled_at: Utc::now(),
      max_retries:  3,
      tags:         vec![],
      created_by:   None,
    }
    .into_email(Uuid::new_v4(), Utc::now());
    email.status = EmailStatus::InFlight;
    email.claim = Some(Claim { at: Utc::now(), by: "worker-1".into() });

    let json = serde_json::to_value(PublicScheduledEmail::from(&email)).unwrap();
    assert_eq!(json["status"], "in_flight");
    assert_eq!(json["attachments"][0]["size"], 8);
    assert!(json["attachments"][0].get("content").is_none());
    assert!(json.get("claim").is_none());
  }

  #[test]
  fn unsubscribe_view_never_exposes_token() {
    let record = Unsubscribe::create("p@example.com", None, Utc::now(), &mut OsRng).unwrap();
    let json = serde_json::to_string(&PublicUnsubscribe::from(&record)).unwrap();
    assert!(!json.contains(&record.token));
    assert!(!json.contains("token"));
  }

  #[test]
  fn directory_views_omit_contact_addresses() {
    let user = crate::directory::User {
      user_id: Uuid::new_v4(),
      name:    "Grace Hopper".into(),
      email:   "grace@school.example".into(),
      role:    UserRole::Teacher,
    };
    let json = serde_json::to_value(PublicUser::from(&user)).unwrap();
    assert_eq!(json["role"], "teacher");
    assert!(json.get("email").is_none());
  }
}
