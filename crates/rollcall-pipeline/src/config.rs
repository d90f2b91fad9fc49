//! Tunables for the pipeline components.
//!
//! Every section deserialises with defaults for missing keys so a config file
//! only needs to name what it overrides.

use std::time::Duration;

use rollcall_core::{alert::Severity, email::DEFAULT_MAX_RETRIES};
use serde::Deserialize;

use crate::{Error, Result};

// ─── Evaluator ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
  /// Consecutive unexcused absences that raise `consecutive_absence`.
  /// Twice this many make the alert critical.
  pub absence_threshold:        u32,
  /// Attendance rate below which `low_attendance` is raised, in `(0, 1]`.
  pub low_attendance_threshold: f64,
  /// Countable sessions needed before a rate is computed at all.
  pub min_sessions:             u32,
  /// Distinct weeks with an absence on the same weekday that raise
  /// `pattern_warning`. Zero disables the check.
  pub pattern_min_weeks:        u32,
}

impl Default for EvaluatorConfig {
  fn default() -> Self {
    Self {
      absence_threshold:        3,
      low_attendance_threshold: 0.8,
      min_sessions:             5,
      pattern_min_weeks:        3,
    }
  }
}

impl EvaluatorConfig {
  pub fn validate(&self) -> Result<()> {
    if self.absence_threshold == 0 {
      return Err(Error::Config("evaluator.absence_threshold must be at least 1".into()));
    }
    if !(self.low_attendance_threshold > 0.0 && self.low_attendance_threshold <= 1.0) {
      return Err(Error::Config(format!(
        "evaluator.low_attendance_threshold must be in (0, 1], got {}",
        self.low_attendance_threshold
      )));
    }
    if self.pattern_min_weeks == 1 {
      return Err(Error::Config(
        "evaluator.pattern_min_weeks of 1 flags every absence; use 0 to disable".into(),
      ));
    }
    Ok(())
  }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Delay between alert creation and the first delivery attempt.
  pub debounce_secs:        u64,
  pub max_retries:          u32,
  /// Copy the subject teacher on alerts at or above this severity.
  pub teacher_min_severity: Severity,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      debounce_secs:        300,
      max_retries:          DEFAULT_MAX_RETRIES,
      teacher_min_severity: Severity::Warning,
    }
  }
}

impl SchedulerConfig {
  pub fn debounce(&self) -> chrono::Duration {
    i64::try_from(self.debounce_secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .unwrap_or(chrono::Duration::MAX)
  }
}

// ─── Worker ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
  pub base_secs: u64,
  pub cap_secs:  u64,
  /// Relative spread applied to each delay, in `[0, 1]`.
  pub jitter:    f64,
}

impl Default for BackoffConfig {
  fn default() -> Self { Self { base_secs: 30, cap_secs: 3600, jitter: 0.2 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Recorded in `claimed_by`. Defaults to a random id per process.
  pub worker_id:        Option<String>,
  /// Worker loops to run in this process.
  pub instances:        usize,
  pub poll_interval_ms: u64,
  /// Most emails claimed in one tick.
  pub batch_size:       usize,
  /// Most sends in progress at once per worker.
  pub pool_size:        usize,
  pub backoff:          BackoffConfig,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      worker_id:        None,
      instances:        1,
      poll_interval_ms: 1000,
      batch_size:       25,
      pool_size:        4,
      backoff:          BackoffConfig::default(),
    }
  }
}

impl WorkerConfig {
  pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }

  pub fn validate(&self) -> Result<()> {
    if self.batch_size == 0 || self.pool_size == 0 {
      return Err(Error::Config("worker.batch_size and worker.pool_size must be positive".into()));
    }
    if !(0.0..=1.0).contains(&self.backoff.jitter) {
      return Err(Error::Config(format!(
        "worker.backoff.jitter must be in [0, 1], got {}",
        self.backoff.jitter
      )));
    }
    if self.backoff.base_secs > self.backoff.cap_secs {
      return Err(Error::Config("worker.backoff.base_secs exceeds cap_secs".into()));
    }
    Ok(())
  }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Which [`EmailTransport`](crate::transport::EmailTransport) the server
/// delivers through.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
  /// Log each message instead of sending it.
  #[default]
  Log,
  Smtp(SmtpConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
  pub host:     String,
  pub port:     Option<u16>,
  /// Sender mailbox, e.g. `Attendance Office <attendance@school.example>`.
  pub from:     String,
  pub username: Option<String>,
  pub password: Option<String>,
  /// Plain connection without STARTTLS. Only for local relays.
  #[serde(default)]
  pub insecure: bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    EvaluatorConfig::default().validate().unwrap();
    WorkerConfig::default().validate().unwrap();
    assert_eq!(SchedulerConfig::default().max_retries, 3);
  }

  #[test]
  fn rejects_out_of_range_thresholds() {
    let config = EvaluatorConfig { low_attendance_threshold: 1.5, ..Default::default() };
    assert!(config.validate().is_err());
    let config = EvaluatorConfig { absence_threshold: 0, ..Default::default() };
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_inverted_backoff() {
    let mut config = WorkerConfig::default();
    config.backoff.base_secs = 7200;
    assert!(config.validate().is_err());
  }
}
