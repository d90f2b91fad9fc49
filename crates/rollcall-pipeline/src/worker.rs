//! Claims due emails and hands them to a transport.
//!
//! A tick lists due `pending` ids, claims each with a conditional update and
//! runs the sends concurrently under a semaphore. The claim is a state flip,
//! not a held lock: nothing is locked in the store while a send is in
//! progress, and the resolution is again conditional on `in_flight`. Any
//! number of workers, in one process or many, may share a store.
//!
//! A failure partway through a tick never strands a claimed email: claiming
//! stops, sends already started run to completion, and an email that fails
//! before reaching the transport is released back to `pending`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand_core::OsRng;
use rollcall_core::{
  email::{Claim, Resolution, ScheduledEmail},
  store::{AlertStore, EmailQueue, UnsubscribeStore},
};
use tokio::{
  sync::{watch, Semaphore},
  task::JoinSet,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  backoff::BackoffPolicy,
  config::WorkerConfig,
  registry::UnsubscribeRegistry,
  transport::{EmailTransport, OutgoingEmail, SendError},
  Error, Result,
};

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
  pub claimed: usize,
  /// Due emails another worker claimed first.
  pub lost:    usize,
  pub sent:    usize,
  pub retried: usize,
  pub failed:  usize,
  /// Claims, sends or write-backs that hit an error, including outcomes the
  /// store no longer accepted.
  pub errors:  usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivered {
  Sent,
  Retried,
  Failed,
  /// The email had left `in_flight` before the outcome was written.
  Unresolved,
}

/// The shared half of a worker, cloned into each send task.
struct Courier<S, T> {
  store:     Arc<S>,
  transport: Arc<T>,
  registry:  UnsubscribeRegistry<S>,
  backoff:   BackoffPolicy,
}

impl<S, T> Clone for Courier<S, T> {
  fn clone(&self) -> Self {
    Self {
      store:     Arc::clone(&self.store),
      transport: Arc::clone(&self.transport),
      registry:  self.registry.clone(),
      backoff:   self.backoff,
    }
  }
}

impl<S, T> Courier<S, T>
where
  S: AlertStore + EmailQueue + UnsubscribeStore,
  T: EmailTransport,
{
  async fn deliver(&self, email: ScheduledEmail, now: DateTime<Utc>) -> Result<Delivered> {
    // Opt-outs may have arrived since the email was queued.
    let recipients = match self.registry.filter(&email.to).await {
      Ok(recipients) => recipients,
      Err(e) => {
        self.release(email.email_id).await;
        return Err(e);
      }
    };
    let outcome = if recipients.is_empty() {
      Err(SendError::Permanent("every recipient has unsubscribed".into()))
    } else {
      if recipients.len() < email.to.len() {
        debug!(
          email_id = %email.email_id,
          dropped = email.to.len() - recipients.len(),
          "recipients removed since scheduling"
        );
      }
      let outgoing = OutgoingEmail::new(&email, recipients);
      self.transport.send(&outgoing).await
    };

    let (resolution, delivered) = match outcome {
      Ok(()) => (Resolution::Sent { at: now }, Delivered::Sent),
      Err(SendError::Transient(error)) => {
        let retry_count = (email.retry_count + 1).min(email.max_retries);
        if retry_count < email.max_retries {
          let delay = self.backoff.delay(retry_count, &mut OsRng);
          warn!(
            email_id = %email.email_id,
            retry_count,
            retry_in_secs = delay.num_seconds(),
            error = %error,
            "transient delivery failure; will retry"
          );
          (Resolution::Retry { retry_count, next_attempt_at: now + delay, error }, Delivered::Retried)
        } else {
          warn!(
            email_id = %email.email_id,
            retry_count,
            error = %error,
            "delivery failed; retries exhausted"
          );
          (Resolution::Failed { retry_count, error }, Delivered::Failed)
        }
      }
      Err(SendError::Permanent(error)) => {
        warn!(email_id = %email.email_id, error = %error, "permanent delivery failure");
        (Resolution::Failed { retry_count: email.retry_count, error }, Delivered::Failed)
      }
    };

    let resolved = self.store.resolve(email.email_id, resolution).await.map_err(Error::store)?;
    if resolved.is_none() {
      error!(email_id = %email.email_id, "email was no longer in flight when resolved");
      return Ok(Delivered::Unresolved);
    }

    if delivered == Delivered::Sent {
      info!(email_id = %email.email_id, transport = self.transport.name(), "email sent");
      if let Some(alert_id) = email.alert_id() {
        self.mark_alert(alert_id, now).await?;
      }
    }
    Ok(delivered)
  }

  /// Hand a claimed email back untouched after a failure that happened
  /// before the transport was contacted.
  async fn release(&self, email_id: Uuid) {
    match self.store.resolve(email_id, Resolution::Release).await {
      Ok(Some(_)) => warn!(email_id = %email_id, "claim released before sending"),
      Ok(None) => debug!(email_id = %email_id, "email left in_flight before release"),
      Err(e) => error!(email_id = %email_id, error = %e, "could not release claim"),
    }
  }

  async fn mark_alert(&self, alert_id: Uuid, at: DateTime<Utc>) -> Result<()> {
    let stamped = self.store.mark_notification_sent(alert_id, at).await.map_err(Error::store)?;
    if !stamped {
      debug!(alert_id = %alert_id, "alert notification already stamped");
    }
    Ok(())
  }
}

pub struct DeliveryWorker<S, T> {
  courier:   Courier<S, T>,
  permits:   Arc<Semaphore>,
  worker_id: String,
  config:    WorkerConfig,
}

impl<S, T> DeliveryWorker<S, T>
where
  S: AlertStore + EmailQueue + UnsubscribeStore + 'static,
  T: EmailTransport + 'static,
{
  pub fn new(store: Arc<S>, transport: Arc<T>, config: WorkerConfig) -> Result<Self> {
    config.validate()?;
    let worker_id = config
      .worker_id
      .clone()
      .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4().simple()));
    Ok(Self {
      courier: Courier {
        registry: UnsubscribeRegistry::new(Arc::clone(&store)),
        store,
        transport,
        backoff: BackoffPolicy::from(&config.backoff),
      },
      permits: Arc::new(Semaphore::new(config.pool_size)),
      worker_id,
      config,
    })
  }

  /// Same worker under another id; shares the store, transport and pool.
  pub fn with_id(&self, worker_id: impl Into<String>) -> Self {
    Self {
      courier:   self.courier.clone(),
      permits:   Arc::clone(&self.permits),
      worker_id: worker_id.into(),
      config:    self.config.clone(),
    }
  }

  pub fn worker_id(&self) -> &str { &self.worker_id }

  pub async fn tick(&self) -> Result<TickReport> { self.tick_at(Utc::now()).await }

  /// One claim-and-send cycle treating `now` as the current time. Every
  /// timestamp written during the cycle uses `now`.
  pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
    let due = self
      .courier
      .store
      .due_ids(now, self.config.batch_size)
      .await
      .map_err(Error::store)?;
    let mut report = TickReport::default();
    let mut sends = JoinSet::new();

    for email_id in due {
      let permit = match Arc::clone(&self.permits).acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
          error!(worker_id = %self.worker_id, error = %e, "worker pool closed; claiming stopped");
          report.errors += 1;
          break;
        }
      };

      let claim = Claim { at: now, by: self.worker_id.clone() };
      let email = match self.courier.store.try_claim(email_id, claim).await {
        Ok(Some(email)) => email,
        Ok(None) => {
          debug!(email_id = %email_id, worker_id = %self.worker_id, "claim lost to another worker");
          report.lost += 1;
          continue;
        }
        Err(e) => {
          error!(
            email_id = %email_id,
            worker_id = %self.worker_id,
            error = %e,
            "claim failed; finishing sends already started"
          );
          report.errors += 1;
          break;
        }
      };
      report.claimed += 1;

      let courier = self.courier.clone();
      sends.spawn(async move {
        let _permit = permit;
        let email_id = email.email_id;
        (email_id, courier.deliver(email, now).await)
      });
    }

    while let Some(joined) = sends.join_next().await {
      match joined {
        Ok((_, Ok(Delivered::Sent))) => report.sent += 1,
        Ok((_, Ok(Delivered::Retried))) => report.retried += 1,
        Ok((_, Ok(Delivered::Failed))) => report.failed += 1,
        Ok((_, Ok(Delivered::Unresolved))) => report.errors += 1,
        Ok((email_id, Err(e))) => {
          error!(email_id = %email_id, error = %e, "delivery outcome not recorded");
          report.errors += 1;
        }
        Err(e) => {
          error!(error = %e, "delivery task panicked");
          report.errors += 1;
        }
      }
    }

    if report.claimed > 0 || report.errors > 0 {
      info!(
        worker_id = %self.worker_id,
        claimed = report.claimed,
        sent = report.sent,
        retried = report.retried,
        failed = report.failed,
        errors = report.errors,
        "delivery tick finished"
      );
    }
    Ok(report)
  }

  /// Tick every poll interval until `shutdown` turns true or its sender is
  /// dropped. A tick in progress always runs to completion.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    info!(worker_id = %self.worker_id, transport = self.courier.transport.name(), "delivery worker started");
    while !*shutdown.borrow() {
      if let Err(e) = self.tick().await {
        error!(worker_id = %self.worker_id, error = %e, "delivery tick failed");
      }
      tokio::select! {
        _ = tokio::time::sleep(self.config.poll_interval()) => {}
        changed = shutdown.changed() => {
          if changed.is_err() {
            break;
          }
        }
      }
    }
    info!(worker_id = %self.worker_id, "delivery worker stopped");
  }
}
