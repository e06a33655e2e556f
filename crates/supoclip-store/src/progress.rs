//! Progress notifier.
//!
//! Every persisted transition is turned into a [`ProgressSnapshot`]. Clients
//! poll [`ProgressNotifier::snapshot`]; in-process observers may subscribe to
//! the broadcast feed instead.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use supoclip_models::{ProgressSnapshot, Task, TaskId, UserId};

use crate::error::{StoreError, StoreResult};
use crate::store::TaskStore;

const EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct ProgressNotifier {
    store: Arc<dyn TaskStore>,
    events: broadcast::Sender<ProgressSnapshot>,
}

impl ProgressNotifier {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { store, events }
    }

    /// Current `{step, message, percentage}` of a task owned by `user_id`.
    pub async fn snapshot(&self, task_id: &TaskId, user_id: &UserId) -> StoreResult<ProgressSnapshot> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))?;
        if !task.is_owned_by(user_id) {
            return Err(StoreError::Forbidden(task_id.clone()));
        }
        Ok(ProgressSnapshot::from_task(&task))
    }

    /// Feed of snapshots for every transition made through this process.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.events.subscribe()
    }

    /// Announce a persisted transition.
    pub(crate) fn publish(&self, task: &Task) {
        let snapshot = ProgressSnapshot::from_task(task);
        debug!(
            task_id = %snapshot.task_id,
            step = %snapshot.step,
            percentage = snapshot.percentage,
            "{}",
            snapshot.message
        );
        // No receivers is fine
        let _ = self.events.send(snapshot);
    }
}
