//! Shared domain types for the document-generation pipeline.
//!
//! Everything here is pure: no I/O, no async. The heavier crates (`db`,
//! `queue`, `events`, `pipeline`, `observer`, `worker`) all depend on this
//! one for the canonical status taxonomy, channel naming, task payloads,
//! and the common error type.

pub mod channels;
pub mod error;
pub mod job;
pub mod tasks;
pub mod types;

pub use error::CoreError;
pub use job::{JobRecord, JobStatus};
pub use types::{DbId, StatusId, Timestamp};
