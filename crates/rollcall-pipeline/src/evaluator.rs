//! Turns a student's attendance over a window into at most one new alert.
//!
//! Three checks run against the same day-by-day view of the window, in
//! priority order: a consecutive-absence streak, a low attendance rate, and a
//! recurring same-weekday absence. Only the first check that fires becomes a
//! candidate. If an open alert already covers it the evaluation is a
//! duplicate; lower-priority checks are not considered. The store performs
//! the overlap check and the insert as one atomic step.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{Datelike, NaiveDate, Weekday};
use rollcall_core::{
  alert::{Alert, AlertDetails, AlertInsert, AlertType, NewAlert, Severity, MAX_MESSAGE_LEN},
  attendance::{AttendanceRecord, DateWindow, Presence},
  directory::{Student, Subject},
  store::{AlertStore, AttendanceReader, Directory, EmailQueue, UnsubscribeStore},
};
use strum::{AsRefStr, Display};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  config::EvaluatorConfig,
  scheduler::{NotificationScheduler, ScheduleOutcome},
  Error, Result,
};

/// Why an evaluation created nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SkipReason {
  /// The raised alert is already covered by an open one.
  Duplicate,
  NoAnomaly,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
  pub created:      Option<Alert>,
  pub skipped:      Option<SkipReason>,
  /// The open alert that suppressed the candidate.
  pub existing:     Option<Alert>,
  /// Result of scheduling the new alert's notification. `None` when nothing
  /// was created or scheduling failed.
  pub notification: Option<ScheduleOutcome>,
}

impl Evaluation {
  fn skipped(reason: SkipReason, existing: Option<Alert>) -> Self {
    Self { created: None, skipped: Some(reason), existing, notification: None }
  }
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// One presence per date. Several records on a date (one per subject) collapse
/// to the most favourable: present, late, excused, absent.
pub(crate) fn collapse_days(
  records: &[AttendanceRecord],
  window: DateWindow,
) -> BTreeMap<NaiveDate, Presence> {
  fn rank(p: Presence) -> u8 {
    match p {
      Presence::Absent => 0,
      Presence::Excused => 1,
      Presence::Late => 2,
      Presence::Present => 3,
    }
  }

  let mut days = BTreeMap::new();
  for record in records.iter().filter(|r| window.contains(r.date)) {
    days
      .entry(record.date)
      .and_modify(|p: &mut Presence| {
        if rank(record.presence) > rank(*p) {
          *p = record.presence;
        }
      })
      .or_insert(record.presence);
  }
  days
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
  pub count: u32,
  pub start: NaiveDate,
  pub end:   NaiveDate,
}

impl Span {
  fn extend(span: &mut Option<Span>, date: NaiveDate) {
    match span {
      Some(s) => {
        s.count += 1;
        s.start = s.start.min(date);
        s.end = s.end.max(date);
      }
      None => *span = Some(Span { count: 1, start: date, end: date }),
    }
  }
}

/// Unexcused absences running back from the most recent record. Excused days
/// neither extend nor break the run.
pub(crate) fn absence_streak(days: &BTreeMap<NaiveDate, Presence>) -> Option<Span> {
  let mut streak = None;
  for (date, presence) in days.iter().rev() {
    match presence {
      Presence::Absent => Span::extend(&mut streak, *date),
      Presence::Excused => continue,
      Presence::Present | Presence::Late => break,
    }
  }
  streak
}

/// Share of countable sessions attended. Excused days are not countable; the
/// rate is undefined below `min_sessions` countable days.
pub(crate) fn attendance_rate(days: &BTreeMap<NaiveDate, Presence>, min_sessions: u32) -> Option<f64> {
  let countable = days.values().filter(|p| **p != Presence::Excused).count();
  if countable == 0 || countable < min_sessions as usize {
    return None;
  }
  let attended = days
    .values()
    .filter(|p| matches!(p, Presence::Present | Presence::Late))
    .count();
  Some(attended as f64 / countable as f64)
}

/// The weekday with the most absences, if it was missed in at least
/// `min_weeks` different weeks. Dates are unique, so each absence on a given
/// weekday falls in its own ISO week.
pub(crate) fn weekday_pattern(
  days: &BTreeMap<NaiveDate, Presence>,
  min_weeks: u32,
) -> Option<(Weekday, Span)> {
  if min_weeks == 0 {
    return None;
  }
  let mut by_weekday: [Option<Span>; 7] = [None; 7];
  for (date, _) in days.iter().filter(|(_, p)| **p == Presence::Absent) {
    Span::extend(&mut by_weekday[date.weekday().num_days_from_monday() as usize], *date);
  }

  let mut best: Option<(Weekday, Span)> = None;
  for (idx, span) in by_weekday.into_iter().enumerate() {
    let (Some(span), Ok(weekday)) = (span, Weekday::try_from(idx as u8)) else { continue };
    if span.count >= min_weeks && best.is_none_or(|(_, b)| span.count > b.count) {
      best = Some((weekday, span));
    }
  }
  best
}

fn plural_weekday(day: Weekday) -> &'static str {
  match day {
    Weekday::Mon => "Mondays",
    Weekday::Tue => "Tuesdays",
    Weekday::Wed => "Wednesdays",
    Weekday::Thu => "Thursdays",
    Weekday::Fri => "Fridays",
    Weekday::Sat => "Saturdays",
    Weekday::Sun => "Sundays",
  }
}

fn clip(message: String) -> String {
  if message.chars().count() <= MAX_MESSAGE_LEN {
    message
  } else {
    message.chars().take(MAX_MESSAGE_LEN).collect()
  }
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

pub struct AlertEvaluator<S> {
  store:     Arc<S>,
  scheduler: NotificationScheduler<S>,
  config:    EvaluatorConfig,
}

impl<S> AlertEvaluator<S>
where
  S: AttendanceReader + Directory + AlertStore + EmailQueue + UnsubscribeStore,
{
  pub fn new(
    store: Arc<S>,
    scheduler: NotificationScheduler<S>,
    config: EvaluatorConfig,
  ) -> Result<Self> {
    config.validate()?;
    Ok(Self { store, scheduler, config })
  }

  pub async fn evaluate(
    &self,
    student_id: Uuid,
    subject_id: Option<Uuid>,
    window: DateWindow,
  ) -> Result<Evaluation> {
    let window = DateWindow::new(window.start, window.end)?;
    let student = self
      .store
      .get_student(student_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::validation(format!("unknown student {student_id}")))?;
    let subject = match subject_id {
      Some(id) => Some(
        self
          .store
          .get_subject(id)
          .await
          .map_err(Error::store)?
          .ok_or_else(|| Error::validation(format!("unknown subject {id}")))?,
      ),
      None => None,
    };

    let records = self
      .store
      .get_attendance(student_id, subject_id, window)
      .await
      .map_err(Error::store)?;
    let days = collapse_days(&records, window);
    let Some(candidate) = self.candidate(&student, subject.as_ref(), window, &days) else {
      debug!(student_id = %student_id, sessions = days.len(), "no anomaly in window");
      return Ok(Evaluation::skipped(SkipReason::NoAnomaly, None));
    };
    candidate.validate()?;
    let alert_type = candidate.alert_type;

    match self.store.insert_unless_duplicate(candidate).await.map_err(Error::store)? {
      AlertInsert::Created(alert) => {
        info!(
          alert_id = %alert.alert_id,
          student_id = %student_id,
          alert_type = %alert.alert_type,
          severity = %alert.severity,
          "alert created"
        );
        let notification = self.notify(&alert).await;
        Ok(Evaluation { created: Some(alert), skipped: None, existing: None, notification })
      }
      AlertInsert::Duplicate(open) => {
        debug!(
          student_id = %student_id,
          alert_type = %alert_type,
          existing_alert_id = %open.alert_id,
          "candidate covered by an open alert"
        );
        Ok(Evaluation::skipped(SkipReason::Duplicate, Some(open)))
      }
    }
  }

  async fn notify(&self, alert: &Alert) -> Option<ScheduleOutcome> {
    match self.scheduler.schedule(alert.alert_id).await {
      Ok(outcome) => Some(outcome),
      Err(e) => {
        warn!(
          alert_id = %alert.alert_id,
          error = %e,
          "scheduling failed; alert stays unnotified until reconciled"
        );
        None
      }
    }
  }

  /// The highest-priority alert the window raises, if any.
  fn candidate(
    &self,
    student: &Student,
    subject: Option<&Subject>,
    window: DateWindow,
    days: &BTreeMap<NaiveDate, Presence>,
  ) -> Option<NewAlert> {
    let scope = subject.map(|s| format!(" in {}", s.name)).unwrap_or_default();
    let new_alert = |alert_type, severity, message: String, details| NewAlert {
      alert_type,
      severity,
      student_id: student.student_id,
      subject_id: subject.map(|s| s.subject_id),
      message: clip(message),
      details,
    };

    let threshold = self.config.absence_threshold;
    if let Some(streak) = absence_streak(days)
      && streak.count >= threshold
    {
      let severity =
        if streak.count >= threshold.saturating_mul(2) { Severity::Critical } else { Severity::Warning };
      return Some(new_alert(
        AlertType::ConsecutiveAbsence,
        severity,
        format!(
          "{} has been absent{scope} for {} consecutive school days ({} to {}).",
          student.name, streak.count, streak.start, streak.end
        ),
        AlertDetails {
          consecutive_days: Some(streak.count),
          attendance_rate:  None,
          threshold:        Some(f64::from(threshold)),
          start_date:       streak.start,
          end_date:         streak.end,
        },
      ));
    }

    let threshold = self.config.low_attendance_threshold;
    if let Some(rate) = attendance_rate(days, self.config.min_sessions)
      && rate < threshold
    {
      return Some(new_alert(
        AlertType::LowAttendance,
        Severity::Warning,
        format!(
          "{}'s attendance{scope} is {:.0}% between {} and {}, below the {:.0}% threshold.",
          student.name,
          rate * 100.0,
          window.start,
          window.end,
          threshold * 100.0
        ),
        AlertDetails {
          consecutive_days: None,
          attendance_rate:  Some(rate),
          threshold:        Some(threshold),
          start_date:       window.start,
          end_date:         window.end,
        },
      ));
    }

    if let Some((weekday, span)) = weekday_pattern(days, self.config.pattern_min_weeks) {
      return Some(new_alert(
        AlertType::PatternWarning,
        Severity::Info,
        format!(
          "{} has been absent{scope} on {} {} between {} and {}.",
          student.name,
          span.count,
          plural_weekday(weekday),
          span.start,
          span.end
        ),
        AlertDetails {
          consecutive_days: None,
          attendance_rate:  None,
          threshold:        Some(f64::from(self.config.pattern_min_weeks)),
          start_date:       span.start,
          end_date:         span.end,
        },
      ));
    }

    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{day, window};

  fn days(entries: &[(u32, Presence)]) -> BTreeMap<NaiveDate, Presence> {
    entries.iter().map(|(d, p)| (day(*d), *p)).collect()
  }

  fn record(d: u32, presence: Presence) -> AttendanceRecord {
    AttendanceRecord { student_id: Uuid::nil(), subject_id: None, date: day(d), presence }
  }

  #[test]
  fn collapse_prefers_attendance_per_day() {
    let records = vec![
      record(2, Presence::Absent),
      record(2, Presence::Late),
      record(3, Presence::Excused),
      record(3, Presence::Absent),
      record(30, Presence::Absent),
    ];
    let collapsed = collapse_days(&records, window(2, 6));
    assert_eq!(collapsed.len(), 2);
    assert_eq!(collapsed[&day(2)], Presence::Late);
    assert_eq!(collapsed[&day(3)], Presence::Excused);
  }

  #[test]
  fn streak_skips_excused_and_stops_at_attendance() {
    let view = days(&[
      (2, Presence::Absent),
      (3, Presence::Present),
      (4, Presence::Absent),
      (5, Presence::Excused),
      (6, Presence::Absent),
      (9, Presence::Absent),
    ]);
    let streak = absence_streak(&view).unwrap();
    assert_eq!(streak, Span { count: 3, start: day(4), end: day(9) });
  }

  #[test]
  fn streak_is_empty_when_latest_day_attended() {
    let view = days(&[(2, Presence::Absent), (3, Presence::Absent), (4, Presence::Late)]);
    assert_eq!(absence_streak(&view), None);
  }

  #[test]
  fn rate_excludes_excused_and_needs_min_sessions() {
    let view = days(&[
      (2, Presence::Present),
      (3, Presence::Late),
      (4, Presence::Absent),
      (5, Presence::Excused),
      (6, Presence::Absent),
    ]);
    assert_eq!(attendance_rate(&view, 4), Some(0.5));
    assert_eq!(attendance_rate(&view, 5), None);
    assert_eq!(attendance_rate(&BTreeMap::new(), 0), None);
  }

  #[test]
  fn pattern_counts_distinct_weeks_per_weekday() {
    // Mondays 2, 9 and 16; one stray Wednesday.
    let view = days(&[
      (2, Presence::Absent),
      (4, Presence::Absent),
      (9, Presence::Absent),
      (10, Presence::Present),
      (16, Presence::Absent),
    ]);
    let (weekday, span) = weekday_pattern(&view, 3).unwrap();
    assert_eq!(weekday, Weekday::Mon);
    assert_eq!(span, Span { count: 3, start: day(2), end: day(16) });
    assert!(weekday_pattern(&view, 4).is_none());
    assert!(weekday_pattern(&view, 0).is_none());
  }

  #[test]
  fn pattern_reaches_the_end_of_the_week() {
    // The 1st, 8th and 15th are Sundays.
    let view = days(&[(1, Presence::Absent), (8, Presence::Absent), (15, Presence::Absent)]);
    let (weekday, span) = weekday_pattern(&view, 3).unwrap();
    assert_eq!(weekday, Weekday::Sun);
    assert_eq!(plural_weekday(weekday), "Sundays");
    assert_eq!(span.count, 3);
  }

  #[test]
  fn long_messages_are_clipped() {
    let clipped = clip("x".repeat(MAX_MESSAGE_LEN + 20));
    assert_eq!(clipped.chars().count(), MAX_MESSAGE_LEN);
  }
}
