//! Persistence port for tasks, sources and clips.

use std::time::Duration;

use async_trait::async_trait;
use supoclip_models::{Clip, Source, SourceId, Task, TaskId};

use crate::error::StoreResult;

/// Keyed store for the three persisted records.
///
/// Implementations enforce the record relationships: a task's clips are
/// removed with the task, and deleting a source clears `source_id` on the
/// task that referenced it.
///
/// Task writes are compare-and-set on [`Task::version`]: the caller passes the
/// version it read, and the write is refused if anything else has written
/// the task since.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Store a new task together with its source.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Conflict`] when the task ID already exists.
    async fn insert_task(&self, task: &Task, source: &Source) -> StoreResult<()>;

    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>>;

    /// Replace an existing task whose stored version is `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] when the task does not exist
    /// and [`crate::StoreError::Conflict`] when the stored version differs.
    async fn put_task(&self, task: &Task, expected_version: u64) -> StoreResult<()>;

    async fn get_source(&self, id: &SourceId) -> StoreResult<Option<Source>>;

    /// Replace an existing source (title refinement).
    async fn put_source(&self, source: &Source) -> StoreResult<()>;

    /// Remove a source and clear the reference held by its task.
    async fn delete_source(&self, id: &SourceId) -> StoreResult<()>;

    /// Persist `clips` and the updated task as one write, with the same
    /// version check as [`TaskStore::put_task`].
    async fn complete_task(
        &self,
        task: &Task,
        clips: &[Clip],
        expected_version: u64,
    ) -> StoreResult<()>;

    /// Clips of a task ordered by `clip_order`.
    async fn list_clips(&self, task_id: &TaskId) -> StoreResult<Vec<Clip>>;

    /// Remove a task, its clips and its source; returns the removed clips.
    async fn delete_task(&self, id: &TaskId) -> StoreResult<Vec<Clip>>;

    /// Take the processing lease on a task for `ttl`.
    ///
    /// Returns false while another holder's lease is live.
    async fn acquire_lease(&self, task_id: &TaskId, holder: &str, ttl: Duration)
        -> StoreResult<bool>;

    /// Extend a lease `holder` still owns; false once it expired or moved on.
    async fn renew_lease(&self, task_id: &TaskId, holder: &str, ttl: Duration)
        -> StoreResult<bool>;

    /// Drop the lease if `holder` still owns it.
    async fn release_lease(&self, task_id: &TaskId, holder: &str) -> StoreResult<()>;

    /// Connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}
