//! Redis-backed store.
//!
//! Key layout under the configured prefix:
//! - `{prefix}:task:{task_id}` task JSON
//! - `{prefix}:source:{source_id}` source JSON
//! - `{prefix}:source_task:{source_id}` owning task ID
//! - `{prefix}:clip:{clip_id}` clip JSON
//! - `{prefix}:task_clips:{task_id}` list of clip IDs
//! - `{prefix}:lease:{task_id}` processing lease holder, with a TTL
//!
//! Task writes go through Lua scripts that compare the stored `version`
//! before replacing the record.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use tracing::debug;

use supoclip_models::{Clip, Source, SourceId, Task, TaskId};

use crate::error::{StoreError, StoreResult};
use crate::store::TaskStore;

/// Returns -1 when the task is missing, 0 on a version mismatch, 1 once written.
static PUT_TASK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        if not current then
            return -1
        end
        local version = cjson.decode(current)['version'] or 0
        if tonumber(version) ~= tonumber(ARGV[2]) then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[1])
        return 1
        "#,
    )
});

/// KEYS: task, task clips list, then one key per clip.
/// ARGV: task JSON, expected version, then clip ID and clip JSON pairs.
static COMPLETE_TASK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        if not current then
            return -1
        end
        local version = cjson.decode(current)['version'] or 0
        if tonumber(version) ~= tonumber(ARGV[2]) then
            return 0
        end
        redis.call('DEL', KEYS[2])
        for i = 3, #KEYS do
            local at = 3 + (i - 3) * 2
            redis.call('SET', KEYS[i], ARGV[at + 1])
            redis.call('RPUSH', KEYS[2], ARGV[at])
        end
        redis.call('SET', KEYS[1], ARGV[1])
        return 1
        "#,
    )
});

static RENEW_LEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('PEXPIRE', KEYS[1], ARGV[2])
        else
            return 0
        end
        "#,
    )
});

static RELEASE_LEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end
        "#,
    )
});

/// Attempts at clearing a task's source reference under concurrent writes.
const UNLINK_ATTEMPTS: usize = 5;

fn write_outcome(task_id: &TaskId, expected_version: u64, reply: i64) -> StoreResult<()> {
    match reply {
        1 => Ok(()),
        -1 => Err(StoreError::NotFound(task_id.clone())),
        _ => Err(StoreError::stale(task_id, expected_version)),
    }
}

/// Task store over a multiplexed Redis connection.
#[derive(Clone)]
pub struct RedisTaskStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisTaskStore {
    /// Connect to `redis_url`.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn task_key(&self, id: &TaskId) -> String {
        format!("{}:task:{}", self.prefix, id)
    }

    fn source_key(&self, id: &SourceId) -> String {
        format!("{}:source:{}", self.prefix, id)
    }

    fn source_task_key(&self, id: &SourceId) -> String {
        format!("{}:source_task:{}", self.prefix, id)
    }

    fn clip_key(&self, id: &str) -> String {
        format!("{}:clip:{}", self.prefix, id)
    }

    fn task_clips_key(&self, id: &TaskId) -> String {
        format!("{}:task_clips:{}", self.prefix, id)
    }

    fn lease_key(&self, id: &TaskId) -> String {
        format!("{}:lease:{}", self.prefix, id)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    /// `SET key value XX`; false when the key did not exist.
    async fn replace(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Clear `source_id` on the owning task, retrying lost version races.
    async fn unlink_source(&self, task_id: &TaskId, source_id: &SourceId) -> StoreResult<()> {
        for _ in 0..UNLINK_ATTEMPTS {
            let Some(mut task) = self.get_task(task_id).await? else {
                return Ok(());
            };
            if task.source_id.as_ref() != Some(source_id) {
                return Ok(());
            }
            let expected = task.version;
            task.source_id = None;
            task.version += 1;
            match self.put_task(&task, expected).await {
                Ok(()) | Err(StoreError::NotFound(_)) => return Ok(()),
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::conflict(format!(
            "task {} kept changing while its source was removed",
            task_id
        )))
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn insert_task(&self, task: &Task, source: &Source) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let task_key = self.task_key(&task.id);

        let exists: bool = conn.exists(&task_key).await?;
        if exists {
            return Err(StoreError::conflict(format!("task {} already exists", task.id)));
        }

        redis::pipe()
            .atomic()
            .set(self.source_key(&source.id), serde_json::to_string(source)?)
            .ignore()
            .set(self.source_task_key(&source.id), task.id.as_str())
            .ignore()
            .set(&task_key, serde_json::to_string(task)?)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(task_id = %task.id, "Inserted task");
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        self.get_json(&self.task_key(id)).await
    }

    async fn put_task(&self, task: &Task, expected_version: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let reply: i64 = PUT_TASK
            .key(self.task_key(&task.id))
            .arg(serde_json::to_string(task)?)
            .arg(expected_version)
            .invoke_async(&mut conn)
            .await?;
        write_outcome(&task.id, expected_version, reply)
    }

    async fn get_source(&self, id: &SourceId) -> StoreResult<Option<Source>> {
        self.get_json(&self.source_key(id)).await
    }

    async fn put_source(&self, source: &Source) -> StoreResult<()> {
        let payload = serde_json::to_string(source)?;
        if self.replace(&self.source_key(&source.id), &payload).await? {
            Ok(())
        } else {
            Err(StoreError::conflict(format!("source {} does not exist", source.id)))
        }
    }

    async fn delete_source(&self, id: &SourceId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let owner: Option<String> = conn.get(self.source_task_key(id)).await?;

        if let Some(task_id) = owner.map(TaskId::from_string) {
            self.unlink_source(&task_id, id).await?;
        }

        redis::pipe()
            .atomic()
            .del(self.source_key(id))
            .ignore()
            .del(self.source_task_key(id))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn complete_task(
        &self,
        task: &Task,
        clips: &[Clip],
        expected_version: u64,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut invocation = COMPLETE_TASK.prepare_invoke();
        invocation
            .key(self.task_key(&task.id))
            .key(self.task_clips_key(&task.id))
            .arg(serde_json::to_string(task)?)
            .arg(expected_version);
        for clip in clips {
            invocation
                .key(self.clip_key(clip.id.as_str()))
                .arg(clip.id.as_str())
                .arg(serde_json::to_string(clip)?);
        }
        let reply: i64 = invocation.invoke_async(&mut conn).await?;
        write_outcome(&task.id, expected_version, reply)?;

        debug!(task_id = %task.id, clips = clips.len(), "Completed task");
        Ok(())
    }

    async fn list_clips(&self, task_id: &TaskId) -> StoreResult<Vec<Clip>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.lrange(self.task_clips_key(task_id), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.clip_key(id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut clips = raw
            .into_iter()
            .flatten()
            .map(|s| serde_json::from_str::<Clip>(&s))
            .collect::<Result<Vec<_>, _>>()?;
        clips.sort_by_key(|c| c.clip_order);
        Ok(clips)
    }

    async fn delete_task(&self, id: &TaskId) -> StoreResult<Vec<Clip>> {
        let task = self
            .get_task(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let clips = self.list_clips(id).await?;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for clip in &clips {
            pipe.del(self.clip_key(clip.id.as_str())).ignore();
        }
        pipe.del(self.task_clips_key(id)).ignore();
        if let Some(source_id) = &task.source_id {
            pipe.del(self.source_key(source_id))
                .ignore()
                .del(self.source_task_key(source_id))
                .ignore();
        }
        pipe.del(self.task_key(id)).ignore();
        pipe.del(self.lease_key(id)).ignore();
        pipe.query_async::<()>(&mut conn).await?;

        Ok(clips)
    }

    async fn acquire_lease(
        &self,
        task_id: &TaskId,
        holder: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        // SET with NX returns "OK" if set, None if key exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(task_id))
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew_lease(
        &self,
        task_id: &TaskId,
        holder: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = RENEW_LEASE
            .key(self.lease_key(task_id))
            .arg(holder)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release_lease(&self, task_id: &TaskId, holder: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _released: i64 = RELEASE_LEASE
            .key(self.lease_key(task_id))
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
