//! In-memory store for tests and single-process development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use supoclip_models::{Clip, Source, SourceId, Task, TaskId};

use crate::error::{StoreError, StoreResult};
use crate::store::TaskStore;

/// Thread-safe in-memory task store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tasks: HashMap<TaskId, Task>,
    sources: HashMap<SourceId, Source>,
    clips: HashMap<TaskId, Vec<Clip>>,
    /// Lease holder and expiry per task
    leases: HashMap<TaskId, (String, Instant)>,
}

fn check_version(existing: &Task, expected_version: u64) -> StoreResult<()> {
    if existing.version == expected_version {
        Ok(())
    } else {
        Err(StoreError::stale(&existing.id, expected_version))
    }
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub fn task_count(&self) -> usize {
        self.read().map(|s| s.tasks.len()).unwrap_or(0)
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| StoreError::backend(e.to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| StoreError::backend(e.to_string()))
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert_task(&self, task: &Task, source: &Source) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::conflict(format!("task {} already exists", task.id)));
        }
        state.sources.insert(source.id.clone(), source.clone());
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        Ok(self.read()?.tasks.get(id).cloned())
    }

    async fn put_task(&self, task: &Task, expected_version: u64) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.tasks.get_mut(&task.id) {
            Some(existing) => {
                check_version(existing, expected_version)?;
                *existing = task.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(task.id.clone())),
        }
    }

    async fn get_source(&self, id: &SourceId) -> StoreResult<Option<Source>> {
        Ok(self.read()?.sources.get(id).cloned())
    }

    async fn put_source(&self, source: &Source) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.sources.get_mut(&source.id) {
            Some(existing) => {
                *existing = source.clone();
                Ok(())
            }
            None => Err(StoreError::conflict(format!("source {} does not exist", source.id))),
        }
    }

    async fn delete_source(&self, id: &SourceId) -> StoreResult<()> {
        let mut state = self.write()?;
        state.sources.remove(id);
        for task in state.tasks.values_mut() {
            if task.source_id.as_ref() == Some(id) {
                task.source_id = None;
                task.version += 1;
            }
        }
        Ok(())
    }

    async fn complete_task(
        &self,
        task: &Task,
        clips: &[Clip],
        expected_version: u64,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.tasks.get(&task.id) {
            Some(existing) => check_version(existing, expected_version)?,
            None => return Err(StoreError::NotFound(task.id.clone())),
        }
        state.clips.insert(task.id.clone(), clips.to_vec());
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn list_clips(&self, task_id: &TaskId) -> StoreResult<Vec<Clip>> {
        let mut clips = self.read()?.clips.get(task_id).cloned().unwrap_or_default();
        clips.sort_by_key(|c| c.clip_order);
        Ok(clips)
    }

    async fn delete_task(&self, id: &TaskId) -> StoreResult<Vec<Clip>> {
        let mut state = self.write()?;
        let task = state
            .tasks
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if let Some(source_id) = &task.source_id {
            state.sources.remove(source_id);
        }
        state.leases.remove(id);
        Ok(state.clips.remove(id).unwrap_or_default())
    }

    async fn acquire_lease(
        &self,
        task_id: &TaskId,
        holder: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        let now = Instant::now();
        if let Some((_, expires_at)) = state.leases.get(task_id) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        state
            .leases
            .insert(task_id.clone(), (holder.to_string(), now + ttl));
        Ok(true)
    }

    async fn renew_lease(
        &self,
        task_id: &TaskId,
        holder: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut state = self.write()?;
        let now = Instant::now();
        match state.leases.get_mut(task_id) {
            Some((owner, expires_at)) if owner == holder && *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, task_id: &TaskId, holder: &str) -> StoreResult<()> {
        let mut state = self.write()?;
        if state
            .leases
            .get(task_id)
            .is_some_and(|(owner, _)| owner == holder)
        {
            state.leases.remove(task_id);
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }
}
