//! `rollcalld`: the Rollcall attendance alert daemon.
//!
//! Reads `rollcall.toml` (or the path given with `--config`), opens the
//! SQLite store, and by default serves the JSON API while delivery workers
//! drain the email queue. The `evaluate` and `reconcile` subcommands run a
//! single pass against the same store and exit.
//!
//! ```text
//! rollcalld serve
//! rollcalld evaluate --student <uuid> --start 2024-09-02 --end 2024-09-20
//! rollcalld reconcile --limit 500
//! ```

mod settings;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_api::ApiState;
use rollcall_core::attendance::DateWindow;
use rollcall_pipeline::{DeliveryWorker, transport::ConfiguredTransport};
use rollcall_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::settings::ServerConfig;

#[derive(Parser)]
#[command(author, version, about = "Rollcall attendance alert daemon")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "rollcall.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Serve the API and run delivery workers (the default).
  Serve,
  /// Evaluate one student's attendance over a date window.
  Evaluate {
    #[arg(long)]
    student: Uuid,
    #[arg(long)]
    subject: Option<Uuid>,
    /// First day of the window, `YYYY-MM-DD`.
    #[arg(long)]
    start:   NaiveDate,
    /// Last day of the window, `YYYY-MM-DD`.
    #[arg(long)]
    end:     NaiveDate,
  },
  /// Queue notifications for open alerts that never got one.
  Reconcile {
    #[arg(long, default_value_t = 100)]
    limit: usize,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg = ServerConfig::load(&cli.config).context("failed to load configuration")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create store directory {parent:?}"))?;
  }

  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  let state = ApiState::new(
    Arc::clone(&store),
    server_cfg.evaluator.clone(),
    server_cfg.scheduler.clone(),
  )
  .context("invalid pipeline configuration")?;

  match cli.command.unwrap_or(Command::Serve) {
    Command::Serve => serve(server_cfg, store, state).await,
    Command::Evaluate { student, subject, start, end } => {
      let window = DateWindow::new(start, end).context("invalid window")?;
      let evaluation = state
        .evaluator
        .evaluate(student, subject, window)
        .await
        .context("evaluation failed")?;
      match (&evaluation.created, evaluation.skipped) {
        (Some(alert), _) => {
          println!("created {} alert {} ({})", alert.alert_type, alert.alert_id, alert.severity);
          if let Some(notification) = &evaluation.notification {
            match (&notification.queued, notification.reason) {
              (Some(email), _) => println!("notification queued as {}", email.email_id),
              (None, Some(reason)) => println!("no notification: {reason}"),
              (None, None) => {}
            }
          }
        }
        (None, Some(reason)) => println!("skipped: {reason}"),
        (None, None) => {}
      }
      Ok(())
    }
    Command::Reconcile { limit } => {
      let report = state.scheduler.reconcile(limit).await.context("reconcile failed")?;
      println!(
        "examined {}, queued {}, already scheduled {}, no recipients {}, failed {}",
        report.examined,
        report.queued,
        report.already_scheduled,
        report.no_recipients,
        report.failed
      );
      Ok(())
    }
  }
}

async fn serve(
  server_cfg: ServerConfig,
  store: Arc<SqliteStore>,
  state: ApiState<SqliteStore>,
) -> anyhow::Result<()> {
  let transport = Arc::new(
    ConfiguredTransport::from_config(&server_cfg.transport)
      .context("failed to configure email transport")?,
  );

  let base = DeliveryWorker::new(Arc::clone(&store), transport, server_cfg.worker.clone())
    .context("invalid worker configuration")?;
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let mut workers = Vec::new();
  for n in 0..server_cfg.worker.instances.max(1) {
    let worker = base.with_id(format!("{}-{n}", base.worker_id()));
    let shutdown = shutdown_rx.clone();
    workers.push(tokio::spawn(async move { worker.run(shutdown).await }));
  }

  let app = axum::Router::new()
    .nest("/api", rollcall_api::api_router(Arc::new(state)))
    .layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
      }
    })
    .await
    .context("server error")?;

  tracing::info!("shutting down; waiting for delivery workers");
  shutdown_tx.send_replace(true);
  for handle in workers {
    handle.await.context("delivery worker panicked")?;
  }
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
