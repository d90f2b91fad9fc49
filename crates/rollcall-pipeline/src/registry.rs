//! The opt-out registry consulted before anything is queued or sent.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use rand_core::OsRng;
use rollcall_core::{
  store::UnsubscribeStore,
  unsubscribe::{normalize_email, Unsubscribe, UnsubscribeStatus},
};
use tracing::{debug, info, warn};

use crate::{Error, Result};

pub struct UnsubscribeRegistry<S> {
  store: Arc<S>,
}

impl<S> Clone for UnsubscribeRegistry<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: UnsubscribeStore> UnsubscribeRegistry<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Opt `email` out of all notifications and return its resubscribe token.
  ///
  /// Repeated calls for the same address return the token minted the first
  /// time, including after a resubscribe.
  pub async fn unsubscribe(&self, email: &str, reason: Option<String>) -> Result<String> {
    let address = normalize_email(email)?;
    let existing = self.store.get_unsubscribe(&address).await.map_err(Error::store)?;

    let fresh = match existing {
      Some(record) if record.is_unsubscribed() => {
        debug!(email = %address, "address already unsubscribed");
        return Ok(record.token);
      }
      Some(record) => record,
      None => Unsubscribe::create(&address, reason.clone(), Utc::now(), &mut OsRng)?,
    };

    let stored = self
      .store
      .record_unsubscribe(Unsubscribe {
        status: UnsubscribeStatus::Unsubscribed,
        reason,
        unsubscribed_at: Utc::now(),
        resubscribed_at: None,
        ..fresh
      })
      .await
      .map_err(Error::store)?;
    info!(email = %stored.email, "address unsubscribed");
    Ok(stored.token)
  }

  pub async fn resubscribe(&self, token: &str) -> Result<UnsubscribeStatus> {
    let record = self
      .store
      .resubscribe(token.trim(), Utc::now())
      .await
      .map_err(Error::store)?
      .ok_or(Error::InvalidToken)?;
    info!(email = %record.email, "address resubscribed");
    Ok(record.status)
  }

  pub async fn is_unsubscribed(&self, email: &str) -> Result<bool> {
    let address = normalize_email(email)?;
    Ok(self
      .store
      .get_unsubscribe(&address)
      .await
      .map_err(Error::store)?
      .is_some_and(|r| r.is_unsubscribed()))
  }

  /// The stored record for `email`, if it ever opted out.
  pub async fn lookup(&self, email: &str) -> Result<Option<Unsubscribe>> {
    let address = normalize_email(email)?;
    self.store.get_unsubscribe(&address).await.map_err(Error::store)
  }

  /// Drop opted-out and malformed addresses, and repeats of an address
  /// already kept. Order is preserved.
  pub async fn filter(&self, recipients: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut eligible = Vec::with_capacity(recipients.len());
    for recipient in recipients {
      let Ok(address) = normalize_email(recipient) else {
        warn!(recipient = %recipient, "dropping malformed recipient address");
        continue;
      };
      if !seen.insert(address.clone()) {
        continue;
      }
      if self.is_unsubscribed(&address).await? {
        debug!(email = %address, "recipient has unsubscribed");
        continue;
      }
      eligible.push(recipient.trim().to_string());
    }
    Ok(eligible)
  }
}
