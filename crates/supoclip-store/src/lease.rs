//! Processing lease for a task.
//!
//! Queue redelivery and pending-entry claims can hand the same task to two
//! workers. Only the worker holding the lease runs the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use supoclip_models::TaskId;

use crate::error::StoreResult;
use crate::store::TaskStore;

/// Exclusive right to run one task, renewed in the background.
///
/// Renewal happens every third of the TTL. Once a renewal is refused,
/// [`TaskLease::is_lost`] turns true and the holder must stop writing.
pub struct TaskLease {
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
    holder: String,
    lost: Arc<AtomicBool>,
    renewal: JoinHandle<()>,
}

impl TaskLease {
    /// Take the lease, or `None` while another worker holds it.
    pub async fn acquire(
        store: Arc<dyn TaskStore>,
        task_id: &TaskId,
        ttl: Duration,
    ) -> StoreResult<Option<Self>> {
        let holder = format!("worker:{}", Uuid::new_v4());
        if !store.acquire_lease(task_id, &holder, ttl).await? {
            debug!(task_id = %task_id, "Task lease held by another worker");
            return Ok(None);
        }

        let lost = Arc::new(AtomicBool::new(false));
        let renewal = tokio::spawn(renew(
            store.clone(),
            task_id.clone(),
            holder.clone(),
            ttl,
            lost.clone(),
        ));
        debug!(task_id = %task_id, holder = %holder, "Task lease acquired");

        Ok(Some(Self {
            store,
            task_id: task_id.clone(),
            holder,
            lost,
            renewal,
        }))
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Stop renewing and give the lease back.
    pub async fn release(self) {
        self.renewal.abort();
        if let Err(e) = self.store.release_lease(&self.task_id, &self.holder).await {
            // Expires on its own after the TTL
            warn!(task_id = %self.task_id, error = %e, "Failed to release task lease");
        }
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}

async fn renew(
    store: Arc<dyn TaskStore>,
    task_id: TaskId,
    holder: String,
    ttl: Duration,
    lost: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval((ttl / 3).max(Duration::from_millis(10)));
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match store.renew_lease(&task_id, &holder, ttl).await {
            Ok(true) => {}
            Ok(false) => {
                lost.store(true, Ordering::Release);
                warn!(task_id = %task_id, "Task lease lost to another worker");
                return;
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "Task lease renewal failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTaskStore;

    fn store() -> Arc<dyn TaskStore> {
        Arc::new(MemoryTaskStore::new())
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused() {
        let store = store();
        let id = TaskId::from_string("t-1");
        let ttl = Duration::from_secs(30);

        let first = TaskLease::acquire(store.clone(), &id, ttl).await.unwrap();
        assert!(first.is_some());
        assert!(TaskLease::acquire(store.clone(), &id, ttl).await.unwrap().is_none());

        first.unwrap().release().await;
        assert!(TaskLease::acquire(store, &id, ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_renewal_outlives_ttl() {
        let store = store();
        let id = TaskId::from_string("t-2");
        let ttl = Duration::from_millis(60);

        let lease = TaskLease::acquire(store.clone(), &id, ttl).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!lease.is_lost());
        assert!(!store.acquire_lease(&id, "worker:other", ttl).await.unwrap());
        lease.release().await;
    }

    #[tokio::test]
    async fn test_takeover_marks_lease_lost() {
        let store = store();
        let id = TaskId::from_string("t-3");
        let ttl = Duration::from_millis(60);

        let lease = TaskLease::acquire(store.clone(), &id, ttl).await.unwrap().unwrap();
        store.release_lease(&id, lease.holder()).await.unwrap();
        assert!(store
            .acquire_lease(&id, "worker:other", Duration::from_secs(30))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(lease.is_lost());

        // Releasing a lost lease leaves the new holder alone
        lease.release().await;
        assert!(!store
            .acquire_lease(&id, "worker:third", Duration::from_secs(30))
            .await
            .unwrap());
    }
}
