//! Attendance history as read from the external attendance ledger.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Presence {
  Present,
  Absent,
  /// Arrived late; counts as attended.
  Late,
  /// Absence with an accepted excuse; neither attended nor missed.
  Excused,
}

/// One student's presence on one day, optionally scoped to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
  pub student_id: Uuid,
  pub subject_id: Option<Uuid>,
  pub date:       NaiveDate,
  pub presence:   Presence,
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
  pub start: NaiveDate,
  pub end:   NaiveDate,
}

impl DateWindow {
  pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
    if start > end {
      return Err(Error::validation(format!(
        "window start {start} is after window end {end}"
      )));
    }
    Ok(Self { start, end })
  }

  pub fn contains(&self, date: NaiveDate) -> bool { self.start <= date && date <= self.end }
}
