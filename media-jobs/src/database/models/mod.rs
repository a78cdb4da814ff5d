//! Database models for media-jobs.
//!
//! These models map directly to the database schema. Status columns are
//! stored as the kebab-case strings of their enums.

pub mod format;
pub mod job;
pub mod stage;

pub use format::*;
pub use job::*;
pub use stage::Stage;
