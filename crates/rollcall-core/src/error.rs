//! Error types for `rollcall-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input: missing fields, length or range violations.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parse a lowercase discriminant stored or transmitted as text.
pub fn parse_variant<T: std::str::FromStr>(kind: &'static str, value: &str) -> Result<T> {
  value.parse().map_err(|_| Error::UnknownVariant { kind, value: value.to_owned() })
}
