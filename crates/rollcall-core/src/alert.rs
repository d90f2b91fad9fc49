//! Alerts: persisted records of detected attendance anomalies.
//!
//! Alerts are never deleted. They leave the "open" set only through
//! acknowledgement, which keeps the full history available for audit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

/// Upper bound on [`Alert::message`], in characters.
pub const MAX_MESSAGE_LEN: usize = 500;

// ─── Classification ──────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr,
  Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertType {
  ConsecutiveAbsence,
  LowAttendance,
  PatternWarning,
}

/// Ordered from least to most urgent.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
  AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
  Info,
  Warning,
  Critical,
}

// ─── Details ─────────────────────────────────────────────────────────────────

/// Metrics that justified the alert. The date span is always present because
/// deduplication is keyed on it; the remaining fields depend on the type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDetails {
  pub consecutive_days: Option<u32>,
  /// Fraction in `[0, 1]`.
  pub attendance_rate:  Option<f64>,
  /// The configured threshold the metric was compared against.
  pub threshold:        Option<f64>,
  pub start_date:       NaiveDate,
  pub end_date:         NaiveDate,
}

impl AlertDetails {
  /// Closed-interval overlap test against `[start, end]`.
  pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
    self.start_date <= end && start <= self.end_date
  }
}

// ─── Acknowledgement ─────────────────────────────────────────────────────────

/// Who acknowledged an alert and when. Both halves exist together or not at
/// all, so the pair is modelled as a single optional value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
  pub at: DateTime<Utc>,
  pub by: Uuid,
}

// ─── Alert ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
  pub alert_id:                Uuid,
  pub alert_type:              AlertType,
  pub severity:                Severity,
  pub student_id:              Uuid,
  pub subject_id:              Option<Uuid>,
  pub message:                 String,
  pub details:                 AlertDetails,
  pub acknowledgement:         Option<Acknowledgement>,
  pub notification_sent_at:    Option<DateTime<Utc>>,
  /// Set when scheduling found nobody to notify. The decision is final.
  pub notification_skipped_at: Option<DateTime<Utc>>,
  pub created_at:              DateTime<Utc>,
}

impl Alert {
  pub fn acknowledged(&self) -> bool { self.acknowledgement.is_some() }

  pub fn notification_sent(&self) -> bool { self.notification_sent_at.is_some() }

  pub fn notification_skipped(&self) -> bool { self.notification_skipped_at.is_some() }
}

/// Input to [`AlertStore::insert_unless_duplicate`](crate::store::AlertStore).
/// The store assigns the id and creation timestamp.
#[derive(Debug, Clone)]
pub struct NewAlert {
  pub alert_type: AlertType,
  pub severity:   Severity,
  pub student_id: Uuid,
  pub subject_id: Option<Uuid>,
  pub message:    String,
  pub details:    AlertDetails,
}

impl NewAlert {
  pub fn validate(&self) -> Result<()> {
    let len = self.message.chars().count();
    if len == 0 {
      return Err(Error::validation("alert message must not be empty"));
    }
    if len > MAX_MESSAGE_LEN {
      return Err(Error::validation(format!(
        "alert message is {len} characters; the limit is {MAX_MESSAGE_LEN}"
      )));
    }
    if self.details.start_date > self.details.end_date {
      return Err(Error::validation("alert start date is after its end date"));
    }
    if let Some(rate) = self.details.attendance_rate
      && !(0.0..=1.0).contains(&rate)
    {
      return Err(Error::validation(format!("attendance rate {rate} is outside [0, 1]")));
    }
    Ok(())
  }

  pub fn into_alert(self, alert_id: Uuid, created_at: DateTime<Utc>) -> Alert {
    Alert {
      alert_id,
      alert_type: self.alert_type,
      severity: self.severity,
      student_id: self.student_id,
      subject_id: self.subject_id,
      message: self.message,
      details: self.details,
      acknowledgement: None,
      notification_sent_at: None,
      notification_skipped_at: None,
      created_at,
    }
  }
}

/// Result of an atomic dedup-then-insert.
#[derive(Debug, Clone)]
pub enum AlertInsert {
  Created(Alert),
  /// An unacknowledged alert of the same student and type already covers an
  /// overlapping date range.
  Duplicate(Alert),
}

#[cfg(test)]
mod tests {
  use super::*;

  fn date(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, d).unwrap() }

  fn details(start: u32, end: u32) -> AlertDetails {
    AlertDetails {
      consecutive_days: Some(3),
      attendance_rate:  None,
      threshold:        Some(3.0),
      start_date:       date(start),
      end_date:         date(end),
    }
  }

  fn new_alert(message: &str) -> NewAlert {
    NewAlert {
      alert_type: AlertType::ConsecutiveAbsence,
      severity:   Severity::Warning,
      student_id: Uuid::new_v4(),
      subject_id: None,
      message:    message.to_owned(),
      details:    details(4, 6),
    }
  }

  #[test]
  fn overlap_is_inclusive_at_both_ends() {
    let d = details(4, 6);
    assert!(d.overlaps(date(6), date(9)));
    assert!(d.overlaps(date(1), date(4)));
    assert!(d.overlaps(date(5), date(5)));
    assert!(!d.overlaps(date(7), date(9)));
    assert!(!d.overlaps(date(1), date(3)));
  }

  #[test]
  fn severity_orders_by_urgency() {
    assert!(Severity::Critical > Severity::Warning);
    assert!(Severity::Warning > Severity::Info);
  }

  #[test]
  fn type_discriminants_are_snake_case() {
    assert_eq!(AlertType::ConsecutiveAbsence.as_ref(), "consecutive_absence");
    assert_eq!("low_attendance".parse::<AlertType>().unwrap(), AlertType::LowAttendance);
    assert!("lowattendance".parse::<AlertType>().is_err());
  }

  #[test]
  fn message_length_is_bounded() {
    assert!(new_alert("Absent three days").validate().is_ok());
    assert!(new_alert(&"x".repeat(MAX_MESSAGE_LEN)).validate().is_ok());
    assert!(matches!(
      new_alert(&"x".repeat(MAX_MESSAGE_LEN + 1)).validate(),
      Err(Error::Validation(_))
    ));
    assert!(new_alert("").validate().is_err());
  }

  #[test]
  fn inverted_range_is_rejected() {
    let mut alert = new_alert("Absent");
    alert.details = details(9, 4);
    assert!(alert.validate().is_err());
  }

  #[test]
  fn into_alert_starts_open_and_unnotified() {
    let alert = new_alert("Absent").into_alert(Uuid::new_v4(), Utc::now());
    assert!(!alert.acknowledged());
    assert!(!alert.notification_sent());
  }
}
