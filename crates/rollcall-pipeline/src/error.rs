//! Error type for `rollcall-pipeline`.
//!
//! Delivery failures are not errors here: the transport reports them as
//! [`SendError`](crate::transport::SendError) values and the worker folds
//! them into the email's state. Likewise a dedup hit is a successful outcome.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input rejected at the boundary; never retried.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("{kind} not found: {id}")]
  NotFound { kind: &'static str, id: Uuid },

  #[error("unknown or revoked unsubscribe token")]
  InvalidToken,

  #[error("configuration error: {0}")]
  Config(String),

  #[error("template rendering failed: {0}")]
  Render(#[from] minijinja::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

  /// Box a backend error. Used as `.map_err(Error::store)`.
  pub fn store<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    Self::Store(Box::new(err))
  }
}

impl From<rollcall_core::Error> for Error {
  fn from(err: rollcall_core::Error) -> Self {
    match err {
      rollcall_core::Error::Validation(msg) => Self::Validation(msg),
      other => Self::Validation(other.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
