//! Job queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::ProcessTaskJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Deliveries before a job is moved to the DLQ
    pub max_deliveries: u32,
    /// How long a duplicate enqueue is rejected
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "supoclip:tasks".to_string(),
            consumer_group: "supoclip:workers".to_string(),
            dlq_stream_name: "supoclip:dlq".to_string(),
            max_deliveries: 3,
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_deliveries),
            dedup_ttl: std::env::var("QUEUE_DEDUP_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        }
    }
}

/// A job read from the stream.
#[derive(Debug, Clone)]
pub struct ConsumedJob {
    pub message_id: String,
    pub job: ProcessTaskJob,
    /// How many times the entry has been delivered, this delivery included
    pub deliveries: u64,
}

/// Hands new tasks to the worker fleet.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Returns the stream message ID.
    async fn dispatch(&self, job: ProcessTaskJob) -> QueueResult<String>;
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        // Start at 0 so entries added before the group existed are delivered
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a task job.
    pub async fn enqueue(&self, job: &ProcessTaskJob) -> QueueResult<String> {
        let mut conn = self.conn().await?;

        let payload = serde_json::to_string(job)?;
        let idempotency_key = job.idempotency_key();

        // SET NX doubles as the duplicate check
        let dedup_key = format!("supoclip:dedup:{}", idempotency_key);
        let fresh: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        if fresh.is_none() {
            warn!("Duplicate job rejected: {}", idempotency_key);
            return Err(QueueError::Duplicate(idempotency_key));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(&idempotency_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!(
            task_id = %job.task_id,
            message_id = %message_id,
            "Enqueued task"
        );

        Ok(message_id)
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, consumed: &ConsumedJob, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let payload = serde_json::to_string(&consumed.job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&consumed.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&consumed.message_id).await?;

        warn!(task_id = %consumed.job.task_id, "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    pub fn max_deliveries(&self) -> u32 {
        self.config.max_deliveries
    }

    /// Read new jobs for `consumer_name`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<ConsumedJob>> {
        let mut conn = self.conn().await?;

        let result: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(job) = self.decode_or_drop(&entry).await {
                    debug!(task_id = %job.task_id, "Consumed job from stream");
                    jobs.push(ConsumedJob {
                        message_id: entry.id.clone(),
                        job,
                        deliveries: 1,
                    });
                }
            }
        }

        Ok(jobs)
    }

    /// Claim entries another consumer left pending for at least `min_idle`.
    ///
    /// This is how tasks interrupted by a crashed worker get resumed.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<ConsumedJob>> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let idle: Vec<_> = pending
            .ids
            .iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .collect();
        if idle.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms);
        for p in &idle {
            cmd.arg(&p.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let mut jobs = Vec::new();
        for entry in claimed.ids {
            let deliveries = idle
                .iter()
                .find(|p| p.id == entry.id)
                .map(|p| p.times_delivered as u64 + 1)
                .unwrap_or(1);
            if let Some(job) = self.decode_or_drop(&entry).await {
                info!(
                    task_id = %job.task_id,
                    deliveries = deliveries,
                    "Claimed pending job from stream"
                );
                jobs.push(ConsumedJob {
                    message_id: entry.id.clone(),
                    job,
                    deliveries,
                });
            }
        }

        Ok(jobs)
    }

    /// Reset the idle time of an entry `consumer_name` is still working on,
    /// taking it back if another consumer claimed it in the meantime.
    ///
    /// Returns false once the entry is no longer pending.
    pub async fn touch(&self, consumer_name: &str, message_id: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;

        // JUSTID leaves the delivery counter alone
        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        Ok(!claimed.is_empty())
    }

    /// Decode an entry, acknowledging it when the payload is malformed.
    async fn decode_or_drop(&self, entry: &StreamId) -> Option<ProcessTaskJob> {
        match decode_entry(entry) {
            Some(Ok(job)) => Some(job),
            Some(Err(e)) => {
                warn!("Failed to parse job payload: {}", e);
                // Ack the malformed message to prevent reprocessing
                self.ack(&entry.id).await.ok();
                None
            }
            None => {
                warn!(message_id = %entry.id, "Stream entry without job field");
                self.ack(&entry.id).await.ok();
                None
            }
        }
    }
}

#[async_trait]
impl TaskDispatcher for JobQueue {
    async fn dispatch(&self, job: ProcessTaskJob) -> QueueResult<String> {
        self.enqueue(&job).await
    }
}

fn decode_entry(entry: &StreamId) -> Option<Result<ProcessTaskJob, serde_json::Error>> {
    match entry.map.get("job") {
        Some(redis::Value::BulkString(payload)) => Some(serde_json::from_slice(payload)),
        Some(redis::Value::SimpleString(payload)) => Some(serde_json::from_str(payload)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use supoclip_models::{TaskId, UserId};

    fn entry(field: &str, value: redis::Value) -> StreamId {
        let mut map = HashMap::new();
        map.insert(field.to_string(), value);
        StreamId {
            id: "1-0".to_string(),
            map,
        }
    }

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "supoclip:tasks");
        assert_eq!(config.max_deliveries, 3);
    }

    #[test]
    fn test_decode_entry() {
        let job = ProcessTaskJob::new(TaskId::from_string("t"), UserId::new("u"));
        let payload = serde_json::to_vec(&job).unwrap();

        let decoded = decode_entry(&entry("job", redis::Value::BulkString(payload)))
            .unwrap()
            .unwrap();
        assert_eq!(decoded, job);

        assert!(decode_entry(&entry("job", redis::Value::BulkString(b"{".to_vec())))
            .unwrap()
            .is_err());
        assert!(decode_entry(&entry("other", redis::Value::Nil)).is_none());
    }
}
