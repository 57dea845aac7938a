//! Event log + event bus: an append-only JSONL audit log with
//! in-memory fan-out to subscribers under a monotonic id.

pub mod bus;
pub mod log;

pub use bus::{EventBus, Subscriber};
pub use log::EventLog;
