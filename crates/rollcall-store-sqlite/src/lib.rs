//! SQLite backend for the Rollcall repositories.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Conditional state transitions (claims,
//! acknowledgements, cancellations) are single guarded `UPDATE`s; dedup
//! checks run inside `IMMEDIATE` transactions together with their insert.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
