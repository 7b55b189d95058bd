//! The URL frontier
//!
//! Pending jobs and the dedup set both live in the backing store, so the
//! frontier survives restarts and can be shared between crawler processes
//! that use the same namespace.

mod dedup;
mod job;
mod queue;

pub use dedup::DedupStore;
pub use job::Job;
pub use queue::{FrontierQueue, PushReport, QueueHandle};
