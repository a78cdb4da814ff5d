//! media-jobs library crate.
//!
//! Admission control, queueing and status reconciliation for media link jobs.
//! The binary wires these together behind the HTTP API; integration tests use
//! them directly.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod services;

pub use error::{Error, Result};
