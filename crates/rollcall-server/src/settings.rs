//! `rollcalld` configuration.
//!
//! Read from an optional TOML file, then overridden by `ROLLCALL_`-prefixed
//! environment variables. Nested keys use a double underscore, e.g.
//! `ROLLCALL_WORKER__POOL_SIZE=8` or `ROLLCALL_TRANSPORT__PASSWORD=...`.

use std::path::{Path, PathBuf};

use rollcall_pipeline::config::{EvaluatorConfig, SchedulerConfig, TransportConfig, WorkerConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub evaluator:  EvaluatorConfig,
  pub scheduler:  SchedulerConfig,
  pub worker:     WorkerConfig,
  pub transport:  TransportConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".into(),
      port:       8080,
      store_path: PathBuf::from("~/.local/share/rollcall/rollcall.db"),
      evaluator:  EvaluatorConfig::default(),
      scheduler:  SchedulerConfig::default(),
      worker:     WorkerConfig::default(),
      transport:  TransportConfig::default(),
    }
  }
}

impl ServerConfig {
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("ROLLCALL")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }
}
