//! Opt-out records, keyed by normalised email address.
//!
//! A record is created on the first opt-out and never deleted. Its token is a
//! bearer credential for self-service resubscription and is fixed for the
//! lifetime of the record.

use chrono::{DateTime, Utc};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

/// Random bytes behind each token; hex encoding doubles the length.
pub const TOKEN_BYTES: usize = 32;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnsubscribeStatus {
  Unsubscribed,
  Resubscribed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unsubscribe {
  pub email:           String,
  pub status:          UnsubscribeStatus,
  pub reason:          Option<String>,
  pub token:           String,
  pub unsubscribed_at: DateTime<Utc>,
  pub resubscribed_at: Option<DateTime<Utc>>,
}

impl Unsubscribe {
  /// Build a fresh opt-out record, drawing its token from `rng`.
  ///
  /// This is the only place a token is generated.
  pub fn create(
    email: &str,
    reason: Option<String>,
    now: DateTime<Utc>,
    rng: &mut impl RngCore,
  ) -> Result<Self> {
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill_bytes(&mut bytes);

    Ok(Self {
      email: normalize_email(email)?,
      status: UnsubscribeStatus::Unsubscribed,
      reason,
      token: hex::encode(bytes),
      unsubscribed_at: now,
      resubscribed_at: None,
    })
  }

  pub fn is_unsubscribed(&self) -> bool { self.status == UnsubscribeStatus::Unsubscribed }
}

/// Canonical form used as the registry key: trimmed and lower-cased.
pub fn normalize_email(email: &str) -> Result<String> {
  let trimmed = email.trim();
  match trimmed.split_once('@') {
    Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
      Ok(trimmed.to_lowercase())
    }
    _ => Err(Error::validation(format!("invalid email address {email:?}"))),
  }
}
