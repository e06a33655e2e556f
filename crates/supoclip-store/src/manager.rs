//! Task state machine.
//!
//! All writes for one task go through a per-task async mutex, so stage
//! transitions for the same task are applied one at a time while different
//! tasks proceed independently. Reads go straight to the store and never wait
//! on that mutex. Across processes, every write is a compare-and-set on the
//! task's `version`, so a writer holding a stale copy is refused.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};

use supoclip_models::{
    has_dense_clip_order, CandidateSegment, Clip, FontConfig, NormalizedSource, Source,
    SourceDescriptor, StageCheckpoint, StageRecord, Task, TaskFailure, TaskId, TaskStatus,
    TaskStep, TaskView, Transcript, UserId,
};

use crate::error::{StoreError, StoreResult};
use crate::metrics;
use crate::progress::ProgressNotifier;
use crate::store::TaskStore;

/// Error kind recorded when no selected segment could be rendered.
pub const ALL_RENDERS_FAILED_KIND: &str = "render";

/// Outcome of one pipeline stage, applied with [`TaskManager::advance`].
#[derive(Debug, Clone)]
pub enum StageResult {
    /// A worker picked the task up
    Started,
    /// Inputs checked; acquisition begins
    Validated,
    /// Media is available locally
    Normalized { media: NormalizedSource },
    /// Transcript produced
    Transcribed { transcript: Transcript },
    /// Segments chosen
    Selected { segments: Vec<CandidateSegment> },
    /// Rendering finished with the surviving clips, in `clip_order`
    Rendered { clips: Vec<Clip> },
    /// A task-fatal failure in the current step
    Failed { kind: String, message: String },
}

impl StageResult {
    pub fn name(&self) -> &'static str {
        match self {
            StageResult::Started => "started",
            StageResult::Validated => "validated",
            StageResult::Normalized { .. } => "normalized",
            StageResult::Transcribed { .. } => "transcribed",
            StageResult::Selected { .. } => "selected",
            StageResult::Rendered { .. } => "rendered",
            StageResult::Failed { .. } => "failed",
        }
    }

    /// Step the task must be in for this result to apply.
    fn expected_step(&self) -> Option<TaskStep> {
        match self {
            StageResult::Started => Some(TaskStep::Queued),
            StageResult::Validated => Some(TaskStep::Validation),
            StageResult::Normalized { .. } => Some(TaskStep::Acquisition),
            StageResult::Transcribed { .. } => Some(TaskStep::Transcript),
            StageResult::Selected { .. } => Some(TaskStep::Analysis),
            StageResult::Rendered { .. } => Some(TaskStep::Rendering),
            StageResult::Failed { .. } => None,
        }
    }

    /// Status this result moves the task to; `None` keeps it processing.
    fn next_status(&self) -> Option<TaskStatus> {
        match self {
            StageResult::Started => Some(TaskStatus::Processing),
            StageResult::Rendered { .. } => Some(TaskStatus::Completed),
            StageResult::Failed { .. } => Some(TaskStatus::Error),
            _ => None,
        }
    }
}

/// Single source of truth for task lifecycles.
pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    notifier: ProgressNotifier,
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskManager {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        let notifier = ProgressNotifier::new(store.clone());
        Self {
            store,
            notifier,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn notifier(&self) -> &ProgressNotifier {
        &self.notifier
    }

    /// Create a pending task and its source record.
    pub async fn create(
        &self,
        user_id: UserId,
        descriptor: &SourceDescriptor,
        font: FontConfig,
    ) -> StoreResult<TaskId> {
        let source = Source::from_descriptor(descriptor);
        let task = Task::new(user_id, source.id.clone(), font);
        self.store.insert_task(&task, &source).await?;

        metrics::record_task_created();
        info!(
            task_id = %task.id,
            user_id = %task.user_id,
            source_type = %source.source_type,
            "Task created"
        );
        self.notifier.publish(&task);
        Ok(task.id)
    }

    /// Apply a stage result.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidTransition`] when the result does not follow the
    /// task's current status and step; the task is left untouched.
    pub async fn advance(&self, task_id: &TaskId, result: StageResult) -> StoreResult<Task> {
        self.with_task_lock(task_id, || self.apply(task_id, result))
            .await
    }

    async fn apply(&self, task_id: &TaskId, result: StageResult) -> StoreResult<Task> {
        let mut task = self.load(task_id).await?;
        check_transition(&task, &result)?;

        match result {
            StageResult::Started => {
                task.status = TaskStatus::Processing;
                enter_step(&mut task, TaskStep::Validation);
                self.save(&mut task).await?;
            }
            StageResult::Validated => {
                record_stage(&mut task, "Source reference is valid");
                enter_step(&mut task, TaskStep::Acquisition);
                self.save(&mut task).await?;
            }
            StageResult::Normalized { media } => {
                self.refine_source_title(&task, &media.title).await?;
                record_stage(&mut task, format!("Media staged ({:.1}s)", media.duration));
                task.checkpoint.media = Some(media);
                enter_step(&mut task, TaskStep::Transcript);
                self.save(&mut task).await?;
            }
            StageResult::Transcribed { transcript } => {
                record_stage(
                    &mut task,
                    format!("{} transcript segments", transcript.segments().len()),
                );
                task.checkpoint.transcript = Some(transcript);
                enter_step(&mut task, TaskStep::Analysis);
                self.save(&mut task).await?;
            }
            StageResult::Selected { segments } => {
                record_stage(&mut task, format!("{} segments selected", segments.len()));
                task.checkpoint.segments = Some(segments);
                enter_step(&mut task, TaskStep::Rendering);
                self.save(&mut task).await?;
            }
            StageResult::Rendered { clips } => {
                let expected = task.checkpoint.segments.as_ref().map_or(0, Vec::len);
                if clips.is_empty() && expected > 0 {
                    fail(
                        &mut task,
                        ALL_RENDERS_FAILED_KIND,
                        format!("None of the {} selected clips could be rendered", expected),
                    );
                    self.save(&mut task).await?;
                } else {
                    validate_clips(&task, &clips)?;
                    record_stage(&mut task, format!("{} clips rendered", clips.len()));
                    task.status = TaskStatus::Completed;
                    task.clip_ids = clips.iter().map(|c| c.id.clone()).collect();
                    task.checkpoint = StageCheckpoint::default();
                    enter_step(&mut task, TaskStep::Complete);
                    if clips.is_empty() {
                        task.message = "No suitable segments found".to_string();
                    }
                    self.save_completed(&mut task, &clips).await?;
                    metrics::record_task_completed(clips.len());
                }
            }
            StageResult::Failed { kind, message } => {
                fail(&mut task, &kind, message);
                self.save(&mut task).await?;
            }
        }

        self.notifier.publish(&task);
        Ok(task)
    }

    /// Record intermediate progress inside the current step.
    ///
    /// The percentage never moves backwards and stays below 100 until the
    /// task completes.
    pub async fn report_progress(
        &self,
        task_id: &TaskId,
        step: TaskStep,
        percentage: u8,
        message: impl Into<String>,
    ) -> StoreResult<()> {
        let message = message.into();
        self.with_task_lock(task_id, || async move {
            let mut task = self.load(task_id).await?;
            if task.status != TaskStatus::Processing || task.step != step {
                return Err(StoreError::InvalidTransition {
                    status: task.status,
                    step: task.step,
                    result: "progress",
                });
            }

            task.progress = task.progress.max(percentage.min(99));
            task.message = message;
            task.updated_at = Utc::now();
            self.save(&mut task).await?;
            self.notifier.publish(&task);
            Ok(())
        })
        .await
    }

    /// Task view for its owner.
    pub async fn get(&self, task_id: &TaskId, user_id: &UserId) -> StoreResult<TaskView> {
        let task = self.get_owned(task_id, user_id).await?;
        let source = match &task.source_id {
            Some(id) => self.store.get_source(id).await?,
            None => None,
        };
        Ok(TaskView::new(&task, source.as_ref()))
    }

    /// Clips in `clip_order`; empty until the task has completed.
    pub async fn list_clips(&self, task_id: &TaskId, user_id: &UserId) -> StoreResult<Vec<Clip>> {
        let task = self.get_owned(task_id, user_id).await?;
        if task.status != TaskStatus::Completed {
            return Ok(Vec::new());
        }
        self.store.list_clips(task_id).await
    }

    /// Delete a task with its clips and source; returns the removed clips.
    pub async fn delete(&self, task_id: &TaskId, user_id: &UserId) -> StoreResult<Vec<Clip>> {
        let clips = self
            .with_task_lock(task_id, || async move {
                self.get_owned(task_id, user_id).await?;
                self.store.delete_task(task_id).await
            })
            .await?;

        info!(task_id = %task_id, clips = clips.len(), "Task deleted");
        Ok(clips)
    }

    /// Remove the task's source; the task keeps its clips.
    pub async fn delete_source(&self, task_id: &TaskId, user_id: &UserId) -> StoreResult<()> {
        self.with_task_lock(task_id, || async move {
            let task = self.get_owned(task_id, user_id).await?;
            if let Some(source_id) = &task.source_id {
                self.store.delete_source(source_id).await?;
            }
            Ok(())
        })
        .await
    }

    /// Unchecked read for workers.
    pub async fn load(&self, task_id: &TaskId) -> StoreResult<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(task_id.clone()))
    }

    pub async fn source_of(&self, task: &Task) -> StoreResult<Option<Source>> {
        match &task.source_id {
            Some(id) => self.store.get_source(id).await,
            None => Ok(None),
        }
    }

    async fn get_owned(&self, task_id: &TaskId, user_id: &UserId) -> StoreResult<Task> {
        let task = self.load(task_id).await?;
        if !task.is_owned_by(user_id) {
            return Err(StoreError::Forbidden(task_id.clone()));
        }
        Ok(task)
    }

    async fn refine_source_title(&self, task: &Task, title: &str) -> StoreResult<()> {
        let Some(mut source) = self.source_of(task).await? else {
            return Ok(());
        };
        if source.refine_title(title) {
            self.store.put_source(&source).await?;
        }
        Ok(())
    }

    /// Write `task` as the next revision of the one that was loaded.
    async fn save(&self, task: &mut Task) -> StoreResult<()> {
        let expected = task.version;
        task.version += 1;
        self.store.put_task(task, expected).await
    }

    async fn save_completed(&self, task: &mut Task, clips: &[Clip]) -> StoreResult<()> {
        let expected = task.version;
        task.version += 1;
        self.store.complete_task(task, clips, expected).await
    }

    /// Run `op` while holding the task's mutex.
    ///
    /// The map entry is dropped again once nobody holds or waits on it, so
    /// the map only ever contains tasks with a write in flight.
    async fn with_task_lock<T, F, Fut>(&self, task_id: &TaskId, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.task_lock(task_id);
        let output = {
            let _guard = lock.lock().await;
            op().await
        };
        drop(lock);
        self.release_idle_lock(task_id);
        output
    }

    fn task_lock(&self, task_id: &TaskId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(task_id.clone()).or_default().clone()
    }

    fn release_idle_lock(&self, task_id: &TaskId) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only handed out under this mutex, so a count of one
        // means no caller holds or awaits the lock
        if locks
            .get(task_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(task_id);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

fn check_transition(task: &Task, result: &StageResult) -> StoreResult<()> {
    let status_ok = match result.next_status() {
        Some(next) => task.status.can_transition_to(next),
        None => task.status == TaskStatus::Processing,
    };
    let step_ok = result.expected_step().map_or(true, |step| step == task.step);
    if status_ok && step_ok {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            status: task.status,
            step: task.step,
            result: result.name(),
        })
    }
}

fn enter_step(task: &mut Task, step: TaskStep) {
    task.step = step;
    task.progress = task.progress.max(step.base_percentage());
    task.message = step.default_message().to_string();
    task.updated_at = Utc::now();
    metrics::record_transition(step.as_str());
}

fn record_stage(task: &mut Task, summary: impl Into<String>) {
    task.stages.push(StageRecord {
        step: task.step,
        completed_at: Utc::now(),
        summary: summary.into(),
    });
}

fn fail(task: &mut Task, kind: &str, message: String) {
    warn!(task_id = %task.id, step = %task.step, error_kind = kind, "Task failed: {}", message);
    metrics::record_task_failed(kind, task.step.as_str());
    task.status = TaskStatus::Error;
    task.failure = Some(TaskFailure {
        kind: kind.to_string(),
        step: task.step,
        message: message.clone(),
    });
    task.message = message;
    task.checkpoint = StageCheckpoint::default();
    task.updated_at = Utc::now();
}

fn validate_clips(task: &Task, clips: &[Clip]) -> StoreResult<()> {
    if clips.iter().any(|c| c.task_id != task.id) {
        return Err(StoreError::conflict("clip belongs to another task"));
    }
    if !has_dense_clip_order(clips) {
        return Err(StoreError::conflict("clip_order must be exactly 1..N"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTaskStore;
    use supoclip_models::{ClipId, SourceType, TranscriptSegment};

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(MemoryTaskStore::new()))
    }

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor::from_parts(Some("https://example.com/talk.mp4"), None, None).unwrap()
    }

    fn user() -> UserId {
        UserId::new("user-1")
    }

    fn media() -> NormalizedSource {
        NormalizedSource {
            local_path: "/tmp/talk.mp4".into(),
            title: "A Great Talk".to_string(),
            source_type: SourceType::RemoteVideo,
            duration: 120.0,
        }
    }

    fn transcript() -> Transcript {
        Transcript::normalize(vec![TranscriptSegment::new("hello there world", 0.0, 120.0)], 120.0)
            .unwrap()
    }

    fn segment(start: f64, end: f64) -> CandidateSegment {
        CandidateSegment {
            start,
            end,
            relevance_score: 0.8,
            reasoning: "strong hook".to_string(),
            text: "hello there world".to_string(),
        }
    }

    fn clip(task_id: &TaskId, order: u32) -> Clip {
        Clip {
            id: ClipId::new(),
            task_id: task_id.clone(),
            filename: format!("clip_{}.mp4", order),
            file_path: String::new(),
            start_time: "00:00".to_string(),
            end_time: "00:30".to_string(),
            duration: 30.0,
            text: String::new(),
            relevance_score: 0.8,
            reasoning: String::new(),
            clip_order: order,
            created_at: Utc::now(),
        }
    }

    async fn advance_to_rendering(m: &TaskManager, id: &TaskId, segments: Vec<CandidateSegment>) {
        m.advance(id, StageResult::Started).await.unwrap();
        m.advance(id, StageResult::Validated).await.unwrap();
        m.advance(id, StageResult::Normalized { media: media() }).await.unwrap();
        m.advance(id, StageResult::Transcribed { transcript: transcript() })
            .await
            .unwrap();
        m.advance(id, StageResult::Selected { segments }).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_is_pending() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        let view = m.get(&id, &user()).await.unwrap();
        assert_eq!(view.status, TaskStatus::Pending);
        assert_eq!(view.step, TaskStep::Queued);
        assert_eq!(view.clips_count, 0);
        assert_eq!(view.source_type, Some(SourceType::RemoteVideo));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        advance_to_rendering(&m, &id, vec![segment(0.0, 30.0), segment(40.0, 70.0)]).await;

        let task = m
            .advance(&id, StageResult::Rendered { clips: vec![clip(&id, 1), clip(&id, 2)] })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.step, TaskStep::Complete);
        assert_eq!(task.progress, 100);
        assert_eq!(task.stages.len(), 5);
        assert_eq!(task.checkpoint, StageCheckpoint::default());

        let view = m.get(&id, &user()).await.unwrap();
        assert_eq!(view.clips_count, 2);
        assert_eq!(view.source_title.as_deref(), Some("A Great Talk"));

        let orders: Vec<u32> = m
            .list_clips(&id, &user())
            .await
            .unwrap()
            .iter()
            .map(|c| c.clip_order)
            .collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_out_of_order_advance_rejected() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();

        let err = m
            .advance(&id, StageResult::Transcribed { transcript: transcript() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        m.advance(&id, StageResult::Started).await.unwrap();
        let err = m.advance(&id, StageResult::Started).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let task = m.load(&id).await.unwrap();
        assert_eq!(task.step, TaskStep::Validation);
    }

    #[tokio::test]
    async fn test_terminal_task_is_immutable() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        m.advance(&id, StageResult::Started).await.unwrap();
        m.advance(
            &id,
            StageResult::Failed {
                kind: "unresolvable_source".to_string(),
                message: "Video unavailable".to_string(),
            },
        )
        .await
        .unwrap();

        let before = m.get(&id, &user()).await.unwrap();
        for result in [
            StageResult::Validated,
            StageResult::Failed {
                kind: "x".to_string(),
                message: "x".to_string(),
            },
        ] {
            assert!(m.advance(&id, result).await.is_err());
        }
        let after = m.get(&id, &user()).await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.error_kind.as_deref(), Some("unresolvable_source"));
    }

    #[tokio::test]
    async fn test_failure_records_step() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        m.advance(&id, StageResult::Started).await.unwrap();
        m.advance(&id, StageResult::Validated).await.unwrap();
        m.advance(&id, StageResult::Normalized { media: media() }).await.unwrap();
        let task = m
            .advance(
                &id,
                StageResult::Failed {
                    kind: "transcription".to_string(),
                    message: "Transcription service failed".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.step, TaskStep::Transcript);
        assert!(m.list_clips(&id, &user()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_selected_completes_empty() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        advance_to_rendering(&m, &id, vec![]).await;

        let task = m.advance(&id, StageResult::Rendered { clips: vec![] }).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.clip_ids.is_empty());
    }

    #[tokio::test]
    async fn test_all_renders_failed_is_error() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        advance_to_rendering(&m, &id, vec![segment(0.0, 30.0)]).await;

        let task = m.advance(&id, StageResult::Rendered { clips: vec![] }).await.unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.failure.unwrap().kind, ALL_RENDERS_FAILED_KIND);
    }

    #[tokio::test]
    async fn test_sparse_clip_order_rejected() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        advance_to_rendering(&m, &id, vec![segment(0.0, 30.0), segment(40.0, 70.0)]).await;

        let err = m
            .advance(&id, StageResult::Rendered { clips: vec![clip(&id, 1), clip(&id, 3)] })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(m.load(&id).await.unwrap().status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn test_ownership_checks() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        let other = UserId::new("intruder");

        assert!(matches!(m.get(&id, &other).await, Err(StoreError::Forbidden(_))));
        assert!(matches!(m.list_clips(&id, &other).await, Err(StoreError::Forbidden(_))));
        assert!(matches!(
            m.get(&TaskId::new(), &user()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        advance_to_rendering(&m, &id, vec![segment(0.0, 30.0)]).await;
        m.advance(&id, StageResult::Rendered { clips: vec![clip(&id, 1)] })
            .await
            .unwrap();

        let first = (m.get(&id, &user()).await.unwrap(), m.list_clips(&id, &user()).await.unwrap());
        let second = (m.get(&id, &user()).await.unwrap(), m.list_clips(&id, &user()).await.unwrap());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        advance_to_rendering(&m, &id, vec![segment(0.0, 30.0)]).await;

        m.report_progress(&id, TaskStep::Rendering, 85, "Rendered 1 of 2").await.unwrap();
        m.report_progress(&id, TaskStep::Rendering, 75, "late update").await.unwrap();
        let snapshot = m.notifier().snapshot(&id, &user()).await.unwrap();
        assert_eq!(snapshot.percentage, 85);

        let err = m
            .report_progress(&id, TaskStep::Transcript, 40, "stale")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_start_applies_once() {
        let m = Arc::new(manager());
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                let id = id.clone();
                tokio::spawn(async move { m.advance(&id, StageResult::Started).await.is_ok() })
            })
            .collect();

        let mut successes = 0;
        for h in handles {
            if h.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_independent_tasks_progress_concurrently() {
        let m = Arc::new(manager());
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(m.create(user(), &descriptor(), FontConfig::default()).await.unwrap());
        }

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let m = m.clone();
                tokio::spawn(async move {
                    m.advance(&id, StageResult::Started).await.unwrap();
                    m.advance(&id, StageResult::Validated).await.unwrap();
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        for id in &ids {
            assert_eq!(m.load(id).await.unwrap().step, TaskStep::Acquisition);
        }
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        advance_to_rendering(&m, &id, vec![segment(0.0, 30.0)]).await;
        m.advance(&id, StageResult::Rendered { clips: vec![clip(&id, 1)] })
            .await
            .unwrap();

        assert!(matches!(
            m.delete(&id, &UserId::new("other")).await,
            Err(StoreError::Forbidden(_))
        ));
        let removed = m.delete(&id, &user()).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(matches!(m.get(&id, &user()).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_source_deletion_keeps_task() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        m.delete_source(&id, &user()).await.unwrap();

        let view = m.get(&id, &user()).await.unwrap();
        assert_eq!(view.source_id, None);
        assert_eq!(view.source_title, None);
    }

    #[tokio::test]
    async fn test_status_changes_follow_lifecycle() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();

        // A pending task can neither fail nor complete before it starts
        let err = m
            .advance(
                &id,
                StageResult::Failed {
                    kind: "x".to_string(),
                    message: "x".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { result: "failed", .. }));
        let err = m
            .advance(&id, StageResult::Rendered { clips: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { result: "rendered", .. }));
        assert_eq!(m.load(&id).await.unwrap().status, TaskStatus::Pending);

        assert_eq!(StageResult::Started.next_status(), Some(TaskStatus::Processing));
        assert_eq!(StageResult::Validated.next_status(), None);
        assert_eq!(
            StageResult::Rendered { clips: vec![] }.next_status(),
            Some(TaskStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_lock_entries_do_not_accumulate() {
        let m = manager();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        m.advance(&id, StageResult::Started).await.unwrap();
        assert_eq!(m.lock_count(), 0);

        m.delete_source(&id, &user()).await.unwrap();
        assert_eq!(m.lock_count(), 0);

        for _ in 0..16 {
            let missing = TaskId::new();
            assert!(matches!(
                m.advance(&missing, StageResult::Started).await,
                Err(StoreError::NotFound(_))
            ));
            assert!(m
                .report_progress(&missing, TaskStep::Validation, 10, "x")
                .await
                .is_err());
            assert!(m.delete(&missing, &user()).await.is_err());
        }
        assert_eq!(m.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_writers_in_other_processes_cannot_overwrite() {
        // Two managers over one store stand in for two worker processes
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let a = TaskManager::new(store.clone());
        let b = TaskManager::new(store.clone());
        let id = a.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        a.advance(&id, StageResult::Started).await.unwrap();

        let mut stale = b.load(&id).await.unwrap();
        a.advance(&id, StageResult::Validated).await.unwrap();

        let expected = stale.version;
        stale.version += 1;
        stale.message = "stale write".to_string();
        assert!(matches!(
            store.put_task(&stale, expected).await,
            Err(StoreError::Conflict(_))
        ));

        let task = b.load(&id).await.unwrap();
        assert_eq!(task.step, TaskStep::Acquisition);
        assert_eq!(task.version, 2);
    }

    #[tokio::test]
    async fn test_notifier_broadcasts_transitions() {
        let m = manager();
        let mut rx = m.notifier().subscribe();
        let id = m.create(user(), &descriptor(), FontConfig::default()).await.unwrap();
        m.advance(&id, StageResult::Started).await.unwrap();

        let created = rx.recv().await.unwrap();
        let started = rx.recv().await.unwrap();
        assert_eq!(created.step, TaskStep::Queued);
        assert_eq!(started.step, TaskStep::Validation);
        assert!(started.percentage > created.percentage);
    }
}
