//! Task State Manager for the SupoClip pipeline.
//!
//! This crate provides:
//! - The [`TaskStore`] port: a keyed store for tasks, sources and clips
//!   with cascade semantics
//! - In-memory and Redis adapters
//! - [`TaskManager`], the per-task serialized state machine
//! - [`ProgressNotifier`], the `{step, message, percentage}` view of a task
//! - [`TaskLease`], the cross-process claim on running a task

pub mod config;
pub mod error;
pub mod lease;
pub mod manager;
pub mod metrics;
pub mod memory;
pub mod progress;
pub mod redis_store;
pub mod store;

pub use config::{connect_store, StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use lease::TaskLease;
pub use manager::{StageResult, TaskManager};
pub use memory::MemoryTaskStore;
pub use progress::ProgressNotifier;
pub use redis_store::RedisTaskStore;
pub use store::TaskStore;
