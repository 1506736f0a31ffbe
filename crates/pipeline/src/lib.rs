//! Generation pipeline: job creation, status progression, notifications.
//!
//! [`JobStatusService`] is the single writer for job state. Every status
//! change funnels through it so the transition guard and event publication
//! live in one place; both the HTTP layer and the queue consumer call it.
//! [`GenerationProducer`] opens new jobs and puts their tasks on the queue.

pub mod error;
pub mod producer;
pub mod status;

pub use error::PipelineError;
pub use producer::GenerationProducer;
pub use status::JobStatusService;
