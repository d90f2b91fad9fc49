//! The outbound edge of the pipeline.
//!
//! A transport either accepts a message or reports why it did not. Whether a
//! failure is worth retrying is the transport's call, expressed through
//! [`SendError`]; the worker only acts on the classification.

use std::future::Future;

use rollcall_core::email::{Attachment, ScheduledEmail};
use uuid::Uuid;

use crate::{config::TransportConfig, smtp::SmtpTransport, Result};

/// The message handed to a transport: a scheduled email after recipient
/// filtering.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
  pub email_id:    Uuid,
  pub to:          Vec<String>,
  pub subject:     String,
  pub html:        String,
  pub text:        Option<String>,
  pub attachments: Vec<Attachment>,
}

impl OutgoingEmail {
  pub fn new(email: &ScheduledEmail, to: Vec<String>) -> Self {
    Self {
      email_id: email.email_id,
      to,
      subject: email.subject.clone(),
      html: email.html.clone(),
      text: email.text.clone(),
      attachments: email.attachments.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
  /// Timeouts, throttling, refused connections. Retried with backoff.
  #[error("transient delivery failure: {0}")]
  Transient(String),
  /// Rejected recipients, malformed messages. Never retried.
  #[error("permanent delivery failure: {0}")]
  Permanent(String),
}

pub trait EmailTransport: Send + Sync {
  fn send<'a>(
    &'a self,
    email: &'a OutgoingEmail,
  ) -> impl Future<Output = Result<(), SendError>> + Send + 'a;

  /// Short name for log fields.
  fn name(&self) -> &'static str;
}

// ─── Log transport ───────────────────────────────────────────────────────────

/// Accepts everything and records it in the log. The default when no SMTP
/// relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl EmailTransport for LogTransport {
  async fn send(&self, email: &OutgoingEmail) -> Result<(), SendError> {
    tracing::info!(
      transport = "log",
      email_id = %email.email_id,
      recipients = ?email.to,
      subject = %email.subject,
      "email delivered to log"
    );
    Ok(())
  }

  fn name(&self) -> &'static str { "log" }
}

// ─── Configured transport ────────────────────────────────────────────────────

/// The transport selected by [`TransportConfig`] at startup.
#[derive(Debug)]
pub enum ConfiguredTransport {
  Log(LogTransport),
  Smtp(SmtpTransport),
}

impl ConfiguredTransport {
  pub fn from_config(config: &TransportConfig) -> Result<Self> {
    Ok(match config {
      TransportConfig::Log => Self::Log(LogTransport),
      TransportConfig::Smtp(smtp) => Self::Smtp(SmtpTransport::from_config(smtp)?),
    })
  }
}

impl EmailTransport for ConfiguredTransport {
  async fn send(&self, email: &OutgoingEmail) -> Result<(), SendError> {
    match self {
      Self::Log(t) => t.send(email).await,
      Self::Smtp(t) => t.send(email).await,
    }
  }

  fn name(&self) -> &'static str {
    match self {
      Self::Log(t) => t.name(),
      Self::Smtp(t) => t.name(),
    }
  }
}
