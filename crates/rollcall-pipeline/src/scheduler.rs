//! Decides who hears about an alert and queues the email.
//!
//! Scheduling is idempotent per alert: the queued email carries the alert's
//! tag and the queue refuses a second email with the same tag, so a retried
//! or concurrent `schedule` call returns the first email. Finding nobody to
//! notify is just as final: the alert is stamped as skipped and later calls,
//! including reconciliation, return the same answer.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use rollcall_core::{
  alert::Alert,
  directory::{Student, Subject},
  email::{alert_tag, EnqueueOutcome, NewScheduledEmail, ScheduledEmail},
  store::{AlertStore, Directory, EmailQueue, UnsubscribeStore},
};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  config::SchedulerConfig, registry::UnsubscribeRegistry, render::AlertRenderer, Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ScheduleReason {
  /// Every recipient had opted out, or the alert had nobody to notify, when
  /// the alert was first scheduled.
  NoEligibleRecipients,
  AlreadyScheduled,
}

#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
  pub queued: Option<ScheduledEmail>,
  pub reason: Option<ScheduleReason>,
}

impl ScheduleOutcome {
  fn no_recipients() -> Self {
    Self { queued: None, reason: Some(ScheduleReason::NoEligibleRecipients) }
  }
}

/// Tally of a [`NotificationScheduler::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
  pub examined:          usize,
  pub queued:            usize,
  pub already_scheduled: usize,
  pub no_recipients:     usize,
  pub failed:            usize,
}

pub struct NotificationScheduler<S> {
  store:    Arc<S>,
  registry: UnsubscribeRegistry<S>,
  renderer: Arc<AlertRenderer>,
  config:   SchedulerConfig,
}

impl<S> Clone for NotificationScheduler<S> {
  fn clone(&self) -> Self {
    Self {
      store:    Arc::clone(&self.store),
      registry: self.registry.clone(),
      renderer: Arc::clone(&self.renderer),
      config:   self.config.clone(),
    }
  }
}

impl<S> NotificationScheduler<S>
where
  S: AlertStore + Directory + EmailQueue + UnsubscribeStore,
{
  pub fn new(store: Arc<S>, config: SchedulerConfig) -> Result<Self> {
    Ok(Self {
      registry: UnsubscribeRegistry::new(Arc::clone(&store)),
      store,
      renderer: Arc::new(AlertRenderer::new()?),
      config,
    })
  }

  pub async fn schedule(&self, alert_id: Uuid) -> Result<ScheduleOutcome> {
    let alert = self
      .store
      .get_alert(alert_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "alert", id: alert_id })?;

    if alert.notification_skipped() {
      debug!(alert_id = %alert_id, "notification already skipped for this alert");
      return Ok(ScheduleOutcome::no_recipients());
    }

    let tag = alert_tag(alert_id);
    let tagged = self.store.find_by_tag(&tag).await.map_err(Error::store)?;
    if let Some(email) = tagged.into_iter().next() {
      debug!(alert_id = %alert_id, email_id = %email.email_id, "alert already scheduled");
      return Ok(ScheduleOutcome {
        queued: Some(email),
        reason: Some(ScheduleReason::AlreadyScheduled),
      });
    }

    let student = self
      .store
      .get_student(alert.student_id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::validation(format!("alert references unknown student {}", alert.student_id)))?;
    let subject = match alert.subject_id {
      Some(id) => self.store.get_subject(id).await.map_err(Error::store)?,
      None => None,
    };

    let recipients = self.recipients(&alert, &student, subject.as_ref()).await?;
    let eligible = self.registry.filter(&recipients).await?;
    if eligible.is_empty() {
      self
        .store
        .mark_notification_skipped(alert_id, Utc::now())
        .await
        .map_err(Error::store)?;
      info!(
        alert_id = %alert_id,
        candidates = recipients.len(),
        "no eligible recipients; nothing queued"
      );
      return Ok(ScheduleOutcome::no_recipients());
    }

    let rendered = self.renderer.render(&alert, &student, subject.as_ref())?;
    let input = NewScheduledEmail {
      to:           eligible,
      subject:      rendered.subject,
      html:         rendered.html,
      text:         Some(rendered.text),
      attachments:  vec![],
      scheduled_at: Utc::now() + self.config.debounce(),
      max_retries:  self.config.max_retries,
      tags:         vec![],
      created_by:   None,
    };
    input.validate()?;

    match self.store.enqueue(input, Some(tag)).await.map_err(Error::store)? {
      EnqueueOutcome::Created(email) => {
        info!(
          alert_id = %alert_id,
          email_id = %email.email_id,
          recipients = email.to.len(),
          scheduled_at = %email.scheduled_at,
          "notification queued"
        );
        Ok(ScheduleOutcome { queued: Some(email), reason: None })
      }
      EnqueueOutcome::Existing(email) => {
        debug!(alert_id = %alert_id, email_id = %email.email_id, "lost scheduling race");
        Ok(ScheduleOutcome { queued: Some(email), reason: Some(ScheduleReason::AlreadyScheduled) })
      }
    }
  }

  /// Everyone who should hear about `alert`, before opt-outs are applied:
  /// the guardian, plus the subject teacher for alerts at or above the
  /// configured severity. Repeats (ignoring case) are dropped.
  pub async fn recipients(
    &self,
    alert: &Alert,
    student: &Student,
    subject: Option<&Subject>,
  ) -> Result<Vec<String>> {
    let mut candidates = Vec::new();
    if let Some(guardian) = student.guardian_email.as_deref() {
      candidates.push(guardian.trim().to_string());
    }

    if alert.severity >= self.config.teacher_min_severity
      && let Some(teacher_id) = subject.and_then(|s| s.teacher_id)
    {
      match self.store.get_user(teacher_id).await.map_err(Error::store)? {
        Some(teacher) => candidates.push(teacher.email.trim().to_string()),
        None => warn!(teacher_id = %teacher_id, "subject teacher not found in directory"),
      }
    }

    let mut seen = HashSet::new();
    candidates.retain(|c| !c.is_empty() && seen.insert(c.to_lowercase()));
    Ok(candidates)
  }

  /// Re-run [`schedule`](Self::schedule) for open alerts whose scheduling
  /// never completed. Alerts skipped for lack of recipients are not revisited.
  /// Failures are counted and the pass continues.
  pub async fn reconcile(&self, limit: usize) -> Result<ReconcileReport> {
    let alerts = self.store.list_unnotified(limit).await.map_err(Error::store)?;
    let mut report = ReconcileReport { examined: alerts.len(), ..Default::default() };

    for alert in alerts {
      match self.schedule(alert.alert_id).await {
        Ok(ScheduleOutcome { reason: None, .. }) => report.queued += 1,
        Ok(ScheduleOutcome { reason: Some(ScheduleReason::AlreadyScheduled), .. }) => {
          report.already_scheduled += 1
        }
        Ok(ScheduleOutcome { reason: Some(ScheduleReason::NoEligibleRecipients), .. }) => {
          report.no_recipients += 1
        }
        Err(e) => {
          warn!(alert_id = %alert.alert_id, error = %e, "reconcile could not schedule alert");
          report.failed += 1;
        }
      }
    }

    info!(
      examined = report.examined,
      queued = report.queued,
      no_recipients = report.no_recipients,
      failed = report.failed,
      "reconcile pass finished"
    );
    Ok(report)
  }
}
