//! The Rollcall alert pipeline.
//!
//! attendance → [`AlertEvaluator`] → alert store (+ [`NotificationScheduler`])
//! → queued email → [`DeliveryWorker`] → [`EmailTransport`] → status written
//! back to the email and its alert.
//!
//! Every component takes an `Arc` handle to a store implementing the
//! repository traits from [`rollcall_core::store`]; nothing here knows which
//! backend is behind it.

pub mod actions;
pub mod backoff;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod populate;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod smtp;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

use rollcall_core::store::{AlertStore, AttendanceReader, Directory, EmailQueue, UnsubscribeStore};

pub use error::{Error, Result};
pub use evaluator::{AlertEvaluator, Evaluation, SkipReason};
pub use registry::UnsubscribeRegistry;
pub use scheduler::{NotificationScheduler, ScheduleOutcome, ScheduleReason};
pub use transport::{EmailTransport, OutgoingEmail, SendError};
pub use worker::{DeliveryWorker, TickReport};

/// Everything the full pipeline needs from a backend.
pub trait PipelineStore:
  AttendanceReader + Directory + AlertStore + EmailQueue + UnsubscribeStore + 'static
{
}

impl<T> PipelineStore for T where
  T: AttendanceReader + Directory + AlertStore + EmailQueue + UnsubscribeStore + 'static
{
}
