//! JSON API for Rollcall.
//!
//! Exposes an axum [`Router`] over the pipeline's entry points. Responses use
//! the public views from [`rollcall_core::public`], never the domain types.
//! Auth, TLS, and transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", rollcall_api::api_router(state))
//! ```

pub mod alerts;
pub mod emails;
pub mod error;
pub mod evaluations;
pub mod subscriptions;


use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use rollcall_pipeline::{
  AlertEvaluator, NotificationScheduler, PipelineStore, UnsubscribeRegistry,
  config::{EvaluatorConfig, SchedulerConfig},
};

pub use error::ApiError;

/// Handles shared by every handler.
pub struct ApiState<S> {
  pub store:     Arc<S>,
  pub evaluator: AlertEvaluator<S>,
  pub scheduler: NotificationScheduler<S>,
  pub registry:  UnsubscribeRegistry<S>,
}

impl<S: PipelineStore> ApiState<S> {
  pub fn new(
    store: Arc<S>,
    evaluator: EvaluatorConfig,
    scheduler: SchedulerConfig,
  ) -> rollcall_pipeline::Result<Self> {
    let scheduler = NotificationScheduler::new(Arc::clone(&store), scheduler)?;
    Ok(Self {
      evaluator: AlertEvaluator::new(Arc::clone(&store), scheduler.clone(), evaluator)?,
      registry: UnsubscribeRegistry::new(Arc::clone(&store)),
      scheduler,
      store,
    })
  }
}

/// Build a fully-materialised API router for `state`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S: PipelineStore>(state: Arc<ApiState<S>>) -> Router<()> {
  Router::new()
    // Evaluation
    .route("/evaluations", post(evaluations::create::<S>))
    // Alerts
    .route("/alerts/reconcile", post(alerts::reconcile::<S>))
    .route("/alerts/{id}", get(alerts::get_one::<S>))
    .route("/alerts/{id}/acknowledge", post(alerts::acknowledge::<S>))
    .route("/alerts/{id}/schedule", post(alerts::schedule::<S>))
    // Scheduled email
    .route("/emails/{id}", get(emails::get_one::<S>))
    .route("/emails/{id}/cancel", post(emails::cancel::<S>))
    // Opt-outs
    .route("/unsubscribe", post(subscriptions::unsubscribe::<S>))
    .route("/resubscribe", post(subscriptions::resubscribe::<S>))
    .route("/unsubscribes/{email}", get(subscriptions::get_one::<S>))
    .with_state(state)
}
