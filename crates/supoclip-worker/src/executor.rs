//! Queue executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use supoclip_queue::{ConsumedJob, JobQueue};
use supoclip_store::StageResult;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::Pipeline;

/// What to do with a queue entry once the pipeline returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Done with it, successfully or not
    Ack,
    /// Nothing another attempt could fix
    Drop,
    /// Leave pending so it is reclaimed later
    Retry,
    /// Out of attempts
    DeadLetter,
}

fn disposition(result: &WorkerResult<()>, deliveries: u64, max_deliveries: u32) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        // The lease holder acks the entry; this delivery was never attempted
        Err(WorkerError::LeaseHeld(_)) => Disposition::Retry,
        Err(e) if !e.is_retryable() => Disposition::Drop,
        Err(_) if deliveries >= u64::from(max_deliveries) => Disposition::DeadLetter,
        Err(_) => Disposition::Retry,
    }
}

/// How often a running job resets its pending entry's idle time, so the
/// claim loop of another worker never sees it as abandoned.
fn heartbeat_interval(claim_min_idle: Duration) -> Duration {
    (claim_min_idle / 3).max(Duration::from_secs(1))
}

/// Pulls task jobs off the queue and runs them through the pipeline.
pub struct TaskExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    pipeline: Arc<Pipeline>,
    task_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl TaskExecutor {
    pub fn new(config: WorkerConfig, queue: JobQueue, pipeline: Pipeline) -> Self {
        let task_semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            pipeline: Arc::new(pipeline),
            task_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting task executor '{}' with {} max concurrent tasks",
            self.consumer_name, self.config.max_concurrent_tasks
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_task = self.spawn_claim_loop();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight tasks to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_tasks())
            .await
            .is_err()
        {
            warn!(
                "In-flight tasks still running after {}s; they will be reclaimed",
                self.config.shutdown_timeout.as_secs()
            );
        }

        info!("Task executor stopped");
        Ok(())
    }

    /// Periodically take over entries a crashed worker left pending.
    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let pipeline = Arc::clone(&self.pipeline);
        let semaphore = Arc::clone(&self.task_semaphore);
        let consumer_name = self.consumer_name.clone();
        let interval = self.config.claim_interval;
        let min_idle = self.config.claim_min_idle;
        let heartbeat = heartbeat_interval(min_idle);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match queue.claim_pending(&consumer_name, min_idle, 5).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for consumed in jobs {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        break;
                                    };
                                    let queue = Arc::clone(&queue);
                                    let pipeline = Arc::clone(&pipeline);
                                    let consumer_name = consumer_name.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(pipeline, queue, consumed, consumer_name, heartbeat)
                                            .await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Failed to claim pending jobs: {}", e),
                        }
                    }
                }
            }
        })
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.task_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;
        if jobs.is_empty() {
            return Ok(());
        }
        debug!("Consumed {} jobs from queue", jobs.len());

        let heartbeat = heartbeat_interval(self.config.claim_min_idle);
        for consumed in jobs {
            let queue = Arc::clone(&self.queue);
            let pipeline = Arc::clone(&self.pipeline);
            let consumer_name = self.consumer_name.clone();
            let permit = self
                .task_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::Shutdown)?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(pipeline, queue, consumed, consumer_name, heartbeat).await;
            });
        }

        Ok(())
    }

    async fn execute_job(
        pipeline: Arc<Pipeline>,
        queue: Arc<JobQueue>,
        consumed: ConsumedJob,
        consumer_name: String,
        heartbeat: Duration,
    ) {
        let task_id = consumed.job.task_id.clone();
        info!(
            task_id = %task_id,
            deliveries = consumed.deliveries,
            "Executing task"
        );

        let keep_alive = tokio::spawn(keep_claimed(
            Arc::clone(&queue),
            consumer_name,
            consumed.message_id.clone(),
            heartbeat,
        ));
        let result = pipeline.run(&task_id).await.map(|_| ());
        keep_alive.abort();
        if let Err(e) = &result {
            error!(task_id = %task_id, error = %e, "Task run failed");
        }

        match disposition(&result, consumed.deliveries, queue.max_deliveries()) {
            Disposition::Ack | Disposition::Drop => {
                let outcome = if result.is_ok() { "processed" } else { "dropped" };
                metrics::record_queue_entry(outcome);
                if let Err(e) = queue.ack(&consumed.message_id).await {
                    error!(task_id = %task_id, "Failed to ack job: {}", e);
                }
            }
            Disposition::Retry if matches!(result, Err(WorkerError::LeaseHeld(_))) => {
                metrics::record_queue_entry("deferred");
                debug!(task_id = %task_id, "Another worker holds the task, leaving entry pending");
            }
            Disposition::Retry => {
                metrics::record_queue_entry("retried");
                info!(
                    task_id = %task_id,
                    "Task will be retried (delivery {}/{})",
                    consumed.deliveries,
                    queue.max_deliveries()
                );
            }
            Disposition::DeadLetter => {
                metrics::record_queue_entry("dead_lettered");
                let reason = result.err().map(|e| e.to_string()).unwrap_or_default();
                warn!(
                    task_id = %task_id,
                    "Task exceeded {} deliveries, moving to DLQ",
                    queue.max_deliveries()
                );
                if let Err(e) = queue.dlq(&consumed, &reason).await {
                    error!(task_id = %task_id, "Failed to move job to DLQ: {}", e);
                }
                // Best effort; the store may be what keeps failing
                let failed = StageResult::Failed {
                    kind: "internal".to_string(),
                    message: "The task could not be processed".to_string(),
                };
                if let Err(e) = pipeline.manager().advance(&task_id, failed).await {
                    warn!(task_id = %task_id, "Could not mark dead-lettered task as failed: {}", e);
                }
            }
        }
    }

    async fn wait_for_tasks(&self) {
        while self.task_semaphore.available_permits() < self.config.max_concurrent_tasks {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Keep the entry owned by `consumer_name` while its task runs.
async fn keep_claimed(
    queue: Arc<JobQueue>,
    consumer_name: String,
    message_id: String,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    // First tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match queue.touch(&consumer_name, &message_id).await {
            Ok(true) => debug!(message_id = %message_id, "Refreshed pending entry"),
            Ok(false) => return,
            Err(e) => warn!(message_id = %message_id, "Failed to refresh pending entry: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use supoclip_models::TaskId;
    use supoclip_store::StoreError;

    #[test]
    fn test_success_is_acked() {
        assert_eq!(disposition(&Ok(()), 1, 3), Disposition::Ack);
        assert_eq!(disposition(&Ok(()), 7, 3), Disposition::Ack);
    }

    #[test]
    fn test_client_errors_are_dropped() {
        let missing: WorkerResult<()> =
            Err(StoreError::NotFound(TaskId::from_string("gone")).into());
        assert_eq!(disposition(&missing, 1, 3), Disposition::Drop);

        let pipeline: WorkerResult<()> = Err(PipelineError::selection("bad").into());
        assert_eq!(disposition(&pipeline, 1, 3), Disposition::Drop);
    }

    #[test]
    fn test_outages_retry_until_exhausted() {
        let outage = || -> WorkerResult<()> { Err(StoreError::backend("connection refused").into()) };
        assert_eq!(disposition(&outage(), 1, 3), Disposition::Retry);
        assert_eq!(disposition(&outage(), 2, 3), Disposition::Retry);
        assert_eq!(disposition(&outage(), 3, 3), Disposition::DeadLetter);
    }

    #[test]
    fn test_lease_held_is_deferred_not_dead_lettered() {
        let held: WorkerResult<()> = Err(WorkerError::LeaseHeld(TaskId::from_string("busy")));
        assert_eq!(disposition(&held, 1, 3), Disposition::Retry);
        assert_eq!(disposition(&held, 9, 3), Disposition::Retry);

        let lost: WorkerResult<()> = Err(WorkerError::LeaseLost(TaskId::from_string("busy")));
        assert_eq!(disposition(&lost, 1, 3), Disposition::Retry);
        assert_eq!(disposition(&lost, 3, 3), Disposition::DeadLetter);
    }

    #[test]
    fn test_heartbeat_beats_claim_threshold() {
        let min_idle = Duration::from_secs(300);
        assert!(heartbeat_interval(min_idle) * 2 < min_idle);
        assert_eq!(heartbeat_interval(Duration::from_millis(600)), Duration::from_secs(1));
    }
}
