//! Task queue transport.
//!
//! Client of the external queue broker: producers publish durable task
//! messages onto one named queue, the consumer side delivers each message to
//! a registered handler and acknowledges it afterwards. The connection
//! survives broker restarts via a fixed-delay reconnect loop; while it is
//! down, `publish` fails fast instead of buffering client-side.

pub mod frames;
pub mod message;
pub mod transport;

pub use message::TaskMessage;
pub use transport::{QueueConfig, QueueError, QueueTransport, TaskConsumer};
