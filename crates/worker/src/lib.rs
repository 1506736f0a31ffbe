//! Worker-side consumption of generation tasks.
//!
//! [`GenerationHandler`] is the queue consumer: it walks a claimed job
//! through the status pipeline, calls the content provider, stores the
//! produced document and marks the job terminal. Redelivered tasks are
//! detected through the job row, so consuming the same task twice is safe.

pub mod handler;
pub mod provider;
pub mod sink;

pub use handler::GenerationHandler;
pub use provider::{FixtureProvider, GeneratedDocument, GenerationProvider, ProviderError};
pub use sink::{DocumentSink, MemorySink, SinkError};
