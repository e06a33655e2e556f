//! Redis Streams work queue.
//!
//! This crate provides:
//! - Task enqueueing via Redis Streams with de-duplication
//! - Consumer-group delivery to workers
//! - Reclaiming entries left pending by crashed workers
//! - A dead letter stream for jobs that keep failing outside the pipeline

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::ProcessTaskJob;
pub use queue::{ConsumedJob, JobQueue, QueueConfig, TaskDispatcher};
