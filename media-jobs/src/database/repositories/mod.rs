//! Repository layer for database access.
//!
//! Reads go through the shared read pool. Writes go through the
//! single-connection write pool so they serialize instead of racing for the
//! SQLite write lock.

pub mod admission;
pub mod format;
pub mod job;

pub use admission::*;
pub use format::*;
pub use job::*;
