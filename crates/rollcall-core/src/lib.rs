//! Core types and trait definitions for the Rollcall attendance alert
//! pipeline.
//!
//! This crate has no HTTP, SMTP or database dependencies.
//! Every other crate depends on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod alert;
pub mod attendance;
pub mod directory;
pub mod email;
pub mod error;
pub mod public;
pub mod store;
pub mod unsubscribe;

pub use error::{Error, Result};
