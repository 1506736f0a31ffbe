//! Client-side job observing.
//!
//! A UI watching a generation job has two signals: push events from the
//! notification bus and periodic polls of the job API. Either one alone is
//! unreliable (the bus drops events while disconnected, polling is slow),
//! so [`JobObserver`] reconciles both into a single snapshot view, detects
//! jobs stuck past the soft timeout, and reports completion exactly once.

pub mod observer;
pub mod source;

pub use observer::{JobObserver, JobOutcome, JobSnapshot, ObserverConfig};
pub use source::{FetchError, HttpJobSource, JobStatusSource};
