//! SMTP delivery via `lettre`.
//!
//! Messages go out as `multipart/alternative` (text + HTML), wrapped in
//! `multipart/mixed` when the email carries attachments. SMTP 5xx replies and
//! unbuildable messages are permanent failures; everything else (4xx replies,
//! connection and TLS trouble, timeouts) is transient.

use lettre::{
  message::{
    header::ContentType, Attachment as MailAttachment, Mailbox, MultiPart, SinglePart,
  },
  transport::smtp::authentication::Credentials,
  AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::{
  config::SmtpConfig,
  transport::{EmailTransport, OutgoingEmail, SendError},
  Error, Result,
};

const DEFAULT_SUBMISSION_PORT: u16 = 587;

#[derive(Debug)]
pub struct SmtpTransport {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  from:      Mailbox,
}

impl SmtpTransport {
  pub fn from_config(config: &SmtpConfig) -> Result<Self> {
    let from: Mailbox = config
      .from
      .parse()
      .map_err(|e: lettre::address::AddressError| Error::Config(format!("smtp.from: {e}")))?;

    let port = config.port.unwrap_or(DEFAULT_SUBMISSION_PORT);
    let mut builder = if config.insecure {
      AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(port)
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        .map_err(|e| Error::Config(format!("smtp.host: {e}")))?
        .port(port)
    };

    match (&config.username, &config.password) {
      (Some(username), Some(password)) => {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
      }
      (None, None) => {}
      _ => return Err(Error::Config("smtp.username and smtp.password must be set together".into())),
    }

    Ok(Self { transport: builder.build(), from })
  }

  fn build_message(&self, email: &OutgoingEmail) -> Result<Message, SendError> {
    let mut builder = Message::builder().from(self.from.clone()).subject(&email.subject);
    for address in &email.to {
      let mailbox: Mailbox = address.parse().map_err(|e: lettre::address::AddressError| {
        SendError::Permanent(format!("invalid recipient {address}: {e}"))
      })?;
      builder = builder.to(mailbox);
    }

    let alternative = match &email.text {
      Some(text) => MultiPart::alternative_plain_html(text.clone(), email.html.clone()),
      None => MultiPart::alternative().singlepart(SinglePart::html(email.html.clone())),
    };

    let body = if email.attachments.is_empty() {
      alternative
    } else {
      let mut mixed = MultiPart::mixed().multipart(alternative);
      for attachment in &email.attachments {
        let content_type = ContentType::parse(&attachment.content_type).map_err(|e| {
          SendError::Permanent(format!(
            "attachment {} has invalid content type: {e}",
            attachment.filename
          ))
        })?;
        mixed = mixed.singlepart(
          MailAttachment::new(attachment.filename.clone())
            .body(attachment.content.clone(), content_type),
        );
      }
      mixed
    };

    builder.multipart(body).map_err(|e| SendError::Permanent(e.to_string()))
  }
}

fn classify(err: lettre::transport::smtp::Error) -> SendError {
  if err.is_permanent() {
    SendError::Permanent(err.to_string())
  } else {
    SendError::Transient(err.to_string())
  }
}

impl EmailTransport for SmtpTransport {
  async fn send(&self, email: &OutgoingEmail) -> Result<(), SendError> {
    let message = self.build_message(email)?;
    self.transport.send(message).await.map_err(classify)?;
    tracing::info!(
      transport = "smtp",
      email_id = %email.email_id,
      recipients = email.to.len(),
      "email delivered"
    );
    Ok(())
  }

  fn name(&self) -> &'static str { "smtp" }
}
