//! Per-task pipeline.
//!
//! The pipeline reads the task record and runs whatever its current step
//! calls for, feeding every outcome back through [`TaskManager::advance`].
//! Because each completed stage is checkpointed on the task, a task picked up
//! again after a crash continues from the step it was in.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use supoclip_models::{
    clip_filename, format_mmss, rendering_percentage, CandidateSegment, Clip, ClipId,
    NormalizedSource, SourceDescriptor, SourceRef, Task, TaskId, TaskStatus, TaskStep, Transcript,
};
use supoclip_store::{StageResult, StoreError, TaskLease, TaskManager};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, WorkerError, WorkerResult};
use crate::logging::TaskLogger;
use crate::metrics;
use crate::selector::SegmentSelector;
use crate::stages::{ClipRenderer, RenderJob, RenderedClip, SourceNormalizer, Transcriber};

/// The four stage implementations.
#[derive(Clone)]
pub struct PipelineStages {
    pub normalizer: Arc<dyn SourceNormalizer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub selector: SegmentSelector,
    pub renderer: Arc<dyn ClipRenderer>,
}

/// Paths, concurrency and time limits.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_dir: PathBuf,
    pub clips_dir: PathBuf,
    pub max_concurrent_renders: usize,
    pub acquisition_timeout: Duration,
    pub transcription_timeout: Duration,
    pub analysis_timeout: Duration,
    /// Per clip
    pub render_timeout: Duration,
    /// How long a crashed worker keeps other workers off its task
    pub lease_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            clips_dir: config.clips_dir.clone(),
            max_concurrent_renders: config.max_concurrent_renders,
            acquisition_timeout: config.acquisition_timeout,
            transcription_timeout: config.transcription_timeout,
            analysis_timeout: config.analysis_timeout,
            render_timeout: config.render_timeout,
            lease_ttl: config.lease_ttl,
        }
    }
}

/// Drives tasks through normalize, transcribe, select and render.
pub struct Pipeline {
    manager: Arc<TaskManager>,
    stages: PipelineStages,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(manager: Arc<TaskManager>, stages: PipelineStages, settings: PipelineSettings) -> Self {
        Self {
            manager,
            stages,
            settings,
        }
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    /// Run a task until it is completed or failed.
    ///
    /// Terminal tasks are returned untouched. Stage failures end up on the
    /// task and are not errors here; an `Err` means the task could not be
    /// advanced (store outage, deleted task) and is left where it was.
    ///
    /// Only one worker runs a task at a time: while another worker holds the
    /// task's lease this returns [`WorkerError::LeaseHeld`] without running
    /// any stage.
    pub async fn run(&self, task_id: &TaskId) -> WorkerResult<Task> {
        let task = self.manager.load(task_id).await?;
        let logger = TaskLogger::new(task_id, "pipeline");

        if task.status.is_terminal() {
            logger.log_progress(&format!("already {}, nothing to do", task.status));
            return Ok(task);
        }

        let store = self.manager.store().clone();
        let Some(lease) = TaskLease::acquire(store, task_id, self.settings.lease_ttl).await? else {
            logger.log_progress("another worker is running this task");
            return Err(WorkerError::LeaseHeld(task_id.clone()));
        };

        let result = self.run_leased(task_id, &lease, &logger).await;
        lease.release().await;
        result
    }

    async fn run_leased(
        &self,
        task_id: &TaskId,
        lease: &TaskLease,
        logger: &TaskLogger,
    ) -> WorkerResult<Task> {
        // The previous holder may have moved the task on before we got the lease
        let mut task = self.manager.load(task_id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }
        if task.status == TaskStatus::Processing {
            logger.log_start(&format!("resuming at step {}", task.step));
        } else {
            logger.log_start("picked up from queue");
        }

        while !task.status.is_terminal() {
            let step = task.step;
            let started = Instant::now();

            let outcome = self.run_step(&task, logger).await;
            if lease.is_lost() {
                logger.log_warning("lease lost, leaving the task to its new holder");
                return Err(WorkerError::LeaseLost(task_id.clone()));
            }

            match outcome {
                Ok(result) => {
                    metrics::record_stage_duration(step.as_str(), true, started.elapsed().as_secs_f64());
                    task = self.manager.advance(task_id, result).await?;
                }
                Err(WorkerError::Pipeline(err)) => {
                    metrics::record_stage_duration(step.as_str(), false, started.elapsed().as_secs_f64());
                    logger.log_error(&format!("step {} failed: {}", step, err));
                    task = self
                        .manager
                        .advance(
                            task_id,
                            StageResult::Failed {
                                kind: err.error_kind().to_string(),
                                message: err.client_message(),
                            },
                        )
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        self.cleanup(&task).await;
        match task.status {
            TaskStatus::Completed => {
                logger.log_completion(&format!("{} clips", task.clip_ids.len()))
            }
            _ => logger.log_error(&task.message),
        }
        Ok(task)
    }

    /// Produce the result for the task's current step.
    async fn run_step(&self, task: &Task, logger: &TaskLogger) -> WorkerResult<StageResult> {
        match task.step {
            TaskStep::Queued => Ok(StageResult::Started),
            TaskStep::Validation => {
                self.descriptor(task).await?;
                Ok(StageResult::Validated)
            }
            TaskStep::Acquisition => {
                let descriptor = self.descriptor(task).await?;
                let work_dir = self.task_work_dir(&task.id);
                tokio::fs::create_dir_all(&work_dir).await?;

                let media = timed(
                    TaskStep::Acquisition,
                    self.settings.acquisition_timeout,
                    self.stages.normalizer.normalize(&descriptor, &work_dir),
                )
                .await?;
                logger.log_progress(&format!("media staged: {:.1}s '{}'", media.duration, media.title));
                Ok(StageResult::Normalized { media })
            }
            TaskStep::Transcript => {
                let media = task
                    .checkpoint
                    .media
                    .as_ref()
                    .ok_or_else(|| PipelineError::transcription("staged media missing"))?;

                let transcript = timed(
                    TaskStep::Transcript,
                    self.settings.transcription_timeout,
                    self.stages
                        .transcriber
                        .transcribe(media, &self.task_work_dir(&task.id)),
                )
                .await?;
                logger.log_progress(&format!("{} transcript segments", transcript.segments().len()));
                Ok(StageResult::Transcribed { transcript })
            }
            TaskStep::Analysis => {
                let transcript = task
                    .checkpoint
                    .transcript
                    .as_ref()
                    .ok_or_else(|| PipelineError::selection("transcript missing"))?;

                let segments = timed(
                    TaskStep::Analysis,
                    self.settings.analysis_timeout,
                    self.stages.selector.select(transcript),
                )
                .await?;
                logger.log_progress(&format!("{} segments selected", segments.len()));
                Ok(StageResult::Selected { segments })
            }
            TaskStep::Rendering => {
                let checkpoint = &task.checkpoint;
                let (media, transcript, segments) = match (
                    &checkpoint.media,
                    &checkpoint.transcript,
                    &checkpoint.segments,
                ) {
                    (Some(m), Some(t), Some(s)) => (m, t, s),
                    _ => {
                        return Err(PipelineError::AllRendersFailed {
                            selected: checkpoint.segments.as_ref().map_or(0, Vec::len),
                        }
                        .into())
                    }
                };

                let clips = self.render_segments(task, media, transcript, segments, logger).await?;
                if clips.is_empty() && !segments.is_empty() {
                    return Err(PipelineError::AllRendersFailed {
                        selected: segments.len(),
                    }
                    .into());
                }
                Ok(StageResult::Rendered { clips })
            }
            TaskStep::Complete => Err(StoreError::InvalidTransition {
                status: task.status,
                step: task.step,
                result: "run",
            }
            .into()),
        }
    }

    /// Rebuild the descriptor from the task's source record.
    async fn descriptor(&self, task: &Task) -> WorkerResult<SourceDescriptor> {
        let source = self
            .manager
            .source_of(task)
            .await?
            .ok_or_else(|| PipelineError::unresolvable("source record was deleted"))?;

        if let SourceRef::LocalUpload { handle } = &source.reference {
            if !supoclip_models::is_valid_upload_handle(handle) {
                return Err(PipelineError::unresolvable(format!("invalid upload handle '{}'", handle)).into());
            }
        }

        Ok(SourceDescriptor {
            source: source.reference.clone(),
            title: source.title_final.then(|| source.title.clone()),
        })
    }

    /// Render every segment, at most `max_concurrent_renders` at a time.
    ///
    /// Failed segments are logged and skipped; the survivors keep their
    /// chronological order and are numbered `1..=N`.
    async fn render_segments(
        &self,
        task: &Task,
        media: &NormalizedSource,
        transcript: &Transcript,
        segments: &[CandidateSegment],
        logger: &TaskLogger,
    ) -> WorkerResult<Vec<Clip>> {
        let out_dir = self.settings.clips_dir.join(task.id.as_str());
        tokio::fs::create_dir_all(&out_dir).await?;

        let total = segments.len();
        let semaphore = Semaphore::new(self.settings.max_concurrent_renders.max(1));
        let finished = AtomicUsize::new(0);
        let render_timeout = self.settings.render_timeout;
        let render_logger = logger.for_operation("render");

        let jobs: Vec<RenderJob> = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| RenderJob {
                task_id: task.id.clone(),
                index,
                input: media.local_path.clone(),
                output: out_dir.join(format!(".render_{}.mp4", index)),
                segment: segment.clone(),
                captions: transcript
                    .segments_between(segment.start, segment.end)
                    .cloned()
                    .collect(),
                font: task.font.clone(),
            })
            .collect();

        let futures = jobs.iter().map(|job| {
            let semaphore = &semaphore;
            let finished = &finished;
            async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => {
                        match tokio::time::timeout(render_timeout, self.stages.renderer.render(job)).await {
                            Ok(result) => result,
                            Err(_) => Err(PipelineError::render(
                                job.index,
                                format!("timed out after {}s", render_timeout.as_secs()),
                            )),
                        }
                    }
                    Err(_) => Err(PipelineError::render(job.index, "render pool closed")),
                };

                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                if let Err(e) = self
                    .manager
                    .report_progress(
                        &task.id,
                        TaskStep::Rendering,
                        rendering_percentage(done, total),
                        format!("Rendered {} of {} clips", done, total),
                    )
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to report render progress");
                }
                result
            }
        });

        let results = join_all(futures).await;

        let mut survivors: Vec<(&RenderJob, RenderedClip)> = Vec::with_capacity(total);
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok(rendered) => {
                    metrics::record_clip_rendered();
                    survivors.push((job, rendered));
                }
                Err(e) => {
                    metrics::record_clip_failed();
                    render_logger.log_warning(&format!(
                        "segment {} ({}-{}) skipped: {}",
                        job.index,
                        format_mmss(job.segment.start),
                        format_mmss(job.segment.end),
                        e
                    ));
                    remove_quietly(&job.output).await;
                }
            }
        }

        let mut clips = Vec::with_capacity(survivors.len());
        for (position, (job, rendered)) in survivors.into_iter().enumerate() {
            let clip_order = position as u32 + 1;
            let segment = &job.segment;
            let filename = clip_filename(clip_order, segment.start, segment.end);
            let file_path = out_dir.join(&filename);
            tokio::fs::rename(&rendered.path, &file_path).await?;

            debug!(
                task_id = %task.id,
                segment_index = job.index,
                clip_order = clip_order,
                duration_secs = rendered.duration,
                font = %rendered.font_family,
                "Clip registered"
            );

            clips.push(Clip {
                id: ClipId::new(),
                task_id: task.id.clone(),
                filename,
                file_path: file_path.to_string_lossy().to_string(),
                start_time: format_mmss(segment.start),
                end_time: format_mmss(segment.end),
                duration: segment.duration(),
                text: segment.text.clone(),
                relevance_score: segment.relevance_score,
                reasoning: segment.reasoning.clone(),
                clip_order,
                created_at: Utc::now(),
            });
        }

        render_logger.log_progress(&format!("{} of {} segments rendered", clips.len(), total));
        Ok(clips)
    }

    fn task_work_dir(&self, task_id: &TaskId) -> PathBuf {
        self.settings.work_dir.join(task_id.as_str())
    }

    /// Drop scratch files once a task is terminal.
    async fn cleanup(&self, task: &Task) {
        let work_dir = self.task_work_dir(&task.id);
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(task_id = %task.id, error = %e, "Failed to remove work directory");
            }
        }
        if task.status == TaskStatus::Error {
            // Only removes the clip directory when nothing was written to it
            let _ = tokio::fs::remove_dir(self.settings.clips_dir.join(task.id.as_str())).await;
        }
    }
}

/// Bound a stage; running out of time is the stage's own failure.
async fn timed<T, F>(stage: TaskStep, limit: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            stage,
            secs: limit.as_secs(),
        }),
    }
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "Could not remove partial render");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::Path;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use supoclip_models::{
        has_dense_clip_order, parse_timestamp, FontConfig, SourceType, TranscriptSegment, UserId,
    };
    use supoclip_store::MemoryTaskStore;

    use crate::selector::SelectorSettings;
    use crate::stages::{
        CandidateWindow, MockSourceNormalizer, MockTranscriber, SegmentScorer, WindowScore,
    };

    /// Gives 0.9 to windows matching one of `targets` exactly, 0 otherwise.
    struct TargetScorer {
        targets: Vec<(f64, f64)>,
    }

    #[async_trait]
    impl SegmentScorer for TargetScorer {
        fn name(&self) -> &'static str {
            "target"
        }

        async fn score(
            &self,
            _transcript: &Transcript,
            windows: &[CandidateWindow],
        ) -> Result<Vec<WindowScore>, PipelineError> {
            Ok(windows
                .iter()
                .map(|w| WindowScore {
                    index: w.index,
                    score: if self.targets.contains(&(w.start, w.end)) { 0.9 } else { 0.0 },
                    reasoning: format!("target {}-{}", w.start, w.end),
                })
                .collect())
        }
    }

    /// Writes a placeholder file, failing for the listed segment indices.
    #[derive(Default)]
    struct FakeRenderer {
        fail: HashSet<usize>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeRenderer {
        fn failing(indices: &[usize]) -> Self {
            Self {
                fail: indices.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ClipRenderer for FakeRenderer {
        async fn render(&self, job: &RenderJob) -> Result<RenderedClip, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&job.index) {
                return Err(PipelineError::render(job.index, "encoder exploded"));
            }
            tokio::fs::write(&job.output, b"fake mp4").await.unwrap();
            Ok(RenderedClip {
                index: job.index,
                path: job.output.clone(),
                duration: job.segment.duration(),
                font_family: job.font.family.clone(),
            })
        }
    }

    struct SlowTranscriber;

    #[async_trait]
    impl Transcriber for SlowTranscriber {
        async fn transcribe(
            &self,
            _media: &NormalizedSource,
            _work_dir: &Path,
        ) -> Result<Transcript, PipelineError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(PipelineError::transcription("unreachable"))
        }
    }

    /// Takes `delay` per call and records the work directory it was given.
    struct RecordingTranscriber {
        transcript: Transcript,
        delay: Duration,
        work_dirs: Arc<std::sync::Mutex<Vec<PathBuf>>>,
    }

    impl RecordingTranscriber {
        fn new(transcript: Transcript, delay: Duration) -> Self {
            Self {
                transcript,
                delay,
                work_dirs: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Transcriber for RecordingTranscriber {
        async fn transcribe(
            &self,
            _media: &NormalizedSource,
            work_dir: &Path,
        ) -> Result<Transcript, PipelineError> {
            self.work_dirs.lock().unwrap().push(work_dir.to_path_buf());
            tokio::time::sleep(self.delay).await;
            Ok(self.transcript.clone())
        }
    }

    /// Ten-second segments of plain speech.
    fn speech(duration: f64) -> Transcript {
        let mut segments = Vec::new();
        let mut start = 0.0;
        while start < duration {
            let end = (start + 10.0).min(duration);
            segments.push(TranscriptSegment::new("we talk about many things here", start, end));
            start = end;
        }
        Transcript::normalize(segments, duration).unwrap()
    }

    fn media(duration: f64) -> NormalizedSource {
        NormalizedSource {
            local_path: PathBuf::from("/staged/source.mp4"),
            title: "Staged talk".to_string(),
            source_type: SourceType::LocalUpload,
            duration,
        }
    }

    fn normalizer_returning(duration: f64) -> MockSourceNormalizer {
        let mut normalizer = MockSourceNormalizer::new();
        normalizer
            .expect_normalize()
            .times(1)
            .returning(move |_, _| Ok(media(duration)));
        normalizer
    }

    fn transcriber_returning(transcript: Transcript) -> MockTranscriber {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(move |_, _| Ok(transcript.clone()));
        transcriber
    }

    struct Harness {
        manager: Arc<TaskManager>,
        dir: TempDir,
        user: UserId,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                manager: Arc::new(TaskManager::new(Arc::new(MemoryTaskStore::new()))),
                dir: tempfile::tempdir().unwrap(),
                user: UserId::new("user-1"),
            }
        }

        fn settings(&self) -> PipelineSettings {
            PipelineSettings {
                work_dir: self.dir.path().join("work"),
                clips_dir: self.dir.path().join("clips"),
                max_concurrent_renders: 2,
                acquisition_timeout: Duration::from_secs(5),
                transcription_timeout: Duration::from_secs(5),
                analysis_timeout: Duration::from_secs(5),
                render_timeout: Duration::from_secs(5),
                lease_ttl: Duration::from_secs(5),
            }
        }

        fn pipeline(
            &self,
            normalizer: impl SourceNormalizer + 'static,
            transcriber: impl Transcriber + 'static,
            targets: &[(f64, f64)],
            renderer: Arc<FakeRenderer>,
        ) -> Pipeline {
            let selector = SegmentSelector::new(
                Arc::new(TargetScorer {
                    targets: targets.to_vec(),
                }),
                SelectorSettings {
                    max_clips: 3,
                    min_duration: 15.0,
                    max_duration: 60.0,
                    min_relevance: 0.5,
                },
            );
            Pipeline::new(
                self.manager.clone(),
                PipelineStages {
                    normalizer: Arc::new(normalizer),
                    transcriber: Arc::new(transcriber),
                    selector,
                    renderer,
                },
                self.settings(),
            )
        }

        async fn create_task(&self) -> TaskId {
            let descriptor = SourceDescriptor::from_parts(None, Some("talk.mp4"), None).unwrap();
            self.manager
                .create(self.user.clone(), &descriptor, FontConfig::default())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_dominant_passage_completes_with_one_clip() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::default());
        let pipeline = h.pipeline(
            normalizer_returning(600.0),
            transcriber_returning(speech(600.0)),
            &[(300.0, 330.0)],
            renderer.clone(),
        );
        let task_id = h.create_task().await;

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        let clips = h.manager.list_clips(&task_id, &h.user).await.unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].clip_order, 1);
        assert_eq!(clips[0].start_time, "05:00");
        assert_eq!(clips[0].end_time, "05:30");
        assert_eq!(clips[0].filename, "clip_1_0500-0530.mp4");
        assert!(Path::new(&clips[0].file_path).exists());

        let view = h.manager.get(&task_id, &h.user).await.unwrap();
        assert_eq!(view.source_title.as_deref(), Some("Staged talk"));
        assert_eq!(view.clips_count, 1);
    }

    #[tokio::test]
    async fn test_media_shorter_than_min_completes_empty() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::default());
        let pipeline = h.pipeline(
            normalizer_returning(8.0),
            transcriber_returning(speech(8.0)),
            &[],
            renderer.clone(),
        );
        let task_id = h.create_task().await;

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.failure.is_none());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
        let view = h.manager.get(&task_id, &h.user).await.unwrap();
        assert_eq!(view.clips_count, 0);
    }

    #[tokio::test]
    async fn test_transcription_failure_fails_task_at_transcript() {
        let h = Harness::new();
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(|_, _| Err(PipelineError::transcription("service returned 502")));
        let renderer = Arc::new(FakeRenderer::default());
        let pipeline = h.pipeline(normalizer_returning(600.0), transcriber, &[], renderer.clone());
        let task_id = h.create_task().await;

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.step, TaskStep::Transcript);
        let failure = task.failure.unwrap();
        assert_eq!(failure.kind, "transcription");
        assert_eq!(failure.step, TaskStep::Transcript);
        assert!(!task.message.contains("502"));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
        assert!(h.manager.store().list_clips(&task_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_render_renumbers_survivors() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::failing(&[1]));
        let targets = [(0.0, 20.0), (40.0, 60.0), (80.0, 100.0)];
        let pipeline = h.pipeline(
            normalizer_returning(120.0),
            transcriber_returning(speech(120.0)),
            &targets,
            renderer.clone(),
        );
        let task_id = h.create_task().await;

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);
        let clips = h.manager.list_clips(&task_id, &h.user).await.unwrap();
        assert_eq!(clips.len(), 2);
        assert!(has_dense_clip_order(&clips));
        assert_eq!((clips[0].clip_order, clips[0].start_time.as_str()), (1, "00:00"));
        assert_eq!((clips[1].clip_order, clips[1].start_time.as_str()), (2, "01:20"));
        assert_eq!(clips[1].filename, "clip_2_0120-0140.mp4");

        for clip in &clips {
            let parsed = parse_timestamp(&clip.end_time).unwrap() - parse_timestamp(&clip.start_time).unwrap();
            assert!((clip.duration - parsed).abs() < 0.5);
        }

        // the failed segment leaves nothing behind
        let out_dir = h.dir.path().join("clips").join(task_id.as_str());
        let mut entries = tokio::fs::read_dir(&out_dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        assert_eq!(names, vec!["clip_1_0000-0020.mp4", "clip_2_0120-0140.mp4"]);
    }

    #[tokio::test]
    async fn test_all_renders_failing_is_task_error() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::failing(&[0, 1]));
        let pipeline = h.pipeline(
            normalizer_returning(120.0),
            transcriber_returning(speech(120.0)),
            &[(0.0, 20.0), (40.0, 60.0)],
            renderer,
        );
        let task_id = h.create_task().await;

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.step, TaskStep::Rendering);
        assert_eq!(task.failure.unwrap().kind, "render");
        assert!(task.clip_ids.is_empty());
    }

    #[tokio::test]
    async fn test_renders_are_bounded() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::default());
        let pipeline = h.pipeline(
            normalizer_returning(120.0),
            transcriber_returning(speech(120.0)),
            &[(0.0, 20.0), (40.0, 60.0), (80.0, 100.0)],
            renderer.clone(),
        );
        let task_id = h.create_task().await;

        pipeline.run(&task_id).await.unwrap();

        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);
        assert!(renderer.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_unresolvable_source_fails_at_acquisition() {
        let h = Harness::new();
        let mut normalizer = MockSourceNormalizer::new();
        normalizer
            .expect_normalize()
            .times(1)
            .returning(|_, _| Err(PipelineError::unresolvable("video is private")));
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never();
        let pipeline = h.pipeline(normalizer, transcriber, &[], Arc::new(FakeRenderer::default()));
        let task_id = h.create_task().await;

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.step, TaskStep::Acquisition);
        assert_eq!(task.failure.unwrap().kind, "unresolvable_source");
    }

    #[tokio::test]
    async fn test_stage_timeout_is_recorded() {
        let h = Harness::new();
        let pipeline = Pipeline::new(
            h.manager.clone(),
            PipelineStages {
                normalizer: Arc::new(normalizer_returning(60.0)),
                transcriber: Arc::new(SlowTranscriber),
                selector: SegmentSelector::new(
                    Arc::new(TargetScorer { targets: Vec::new() }),
                    SelectorSettings::default(),
                ),
                renderer: Arc::new(FakeRenderer::default()),
            },
            PipelineSettings {
                transcription_timeout: Duration::from_millis(50),
                ..h.settings()
            },
        );
        let task_id = h.create_task().await;

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.step, TaskStep::Transcript);
        assert_eq!(task.failure.unwrap().kind, "timeout");
    }

    #[tokio::test]
    async fn test_resumes_from_checkpoint() {
        let h = Harness::new();
        let task_id = h.create_task().await;
        h.manager.advance(&task_id, StageResult::Started).await.unwrap();
        h.manager.advance(&task_id, StageResult::Validated).await.unwrap();
        h.manager
            .advance(&task_id, StageResult::Normalized { media: media(120.0) })
            .await
            .unwrap();

        let mut normalizer = MockSourceNormalizer::new();
        normalizer.expect_normalize().never();
        let pipeline = h.pipeline(
            normalizer,
            transcriber_returning(speech(120.0)),
            &[(40.0, 60.0)],
            Arc::new(FakeRenderer::default()),
        );

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.clip_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_task_is_left_alone() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::default());
        let pipeline = h.pipeline(
            normalizer_returning(120.0),
            transcriber_returning(speech(120.0)),
            &[(40.0, 60.0)],
            renderer.clone(),
        );
        let task_id = h.create_task().await;
        let first = pipeline.run(&task_id).await.unwrap();

        // mocks allow exactly one call each, so a second run must not touch them
        let second = pipeline.run(&task_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deleted_source_is_unresolvable() {
        let h = Harness::new();
        let mut normalizer = MockSourceNormalizer::new();
        normalizer.expect_normalize().never();
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never();
        let pipeline = h.pipeline(normalizer, transcriber, &[], Arc::new(FakeRenderer::default()));
        let task_id = h.create_task().await;
        h.manager.delete_source(&task_id, &h.user).await.unwrap();

        let task = pipeline.run(&task_id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.step, TaskStep::Validation);
        assert_eq!(task.failure.unwrap().kind, "unresolvable_source");
    }

    #[tokio::test]
    async fn test_concurrent_runs_of_one_task_do_not_duplicate_work() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::default());
        let transcriber = RecordingTranscriber::new(speech(120.0), Duration::from_millis(300));
        let transcribed = transcriber.work_dirs.clone();
        let first = h.pipeline(
            normalizer_returning(120.0),
            transcriber,
            &[(40.0, 60.0)],
            renderer.clone(),
        );

        // A second worker handed the same task by a redelivery
        let mut normalizer = MockSourceNormalizer::new();
        normalizer.expect_normalize().never();
        let mut idle = MockTranscriber::new();
        idle.expect_transcribe().never();
        let second = h.pipeline(normalizer, idle, &[(40.0, 60.0)], renderer.clone());

        let task_id = h.create_task().await;
        let (a, b) = tokio::join!(first.run(&task_id), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            second.run(&task_id).await
        });

        let task = a.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(matches!(b, Err(WorkerError::LeaseHeld(_))));
        assert_eq!(transcribed.lock().unwrap().len(), 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.manager.list_clips(&task_id, &h.user).await.unwrap().len(), 1);

        // Once the lease is released a late redelivery finds nothing to do
        assert_eq!(second.run(&task_id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_tasks_transcribe_in_their_own_work_dirs() {
        let h = Harness::new();
        let renderer = Arc::new(FakeRenderer::default());
        let transcriber = RecordingTranscriber::new(speech(120.0), Duration::from_millis(50));
        let transcribed = transcriber.work_dirs.clone();

        // Both tasks stage media in the same upload directory
        let mut normalizer = MockSourceNormalizer::new();
        normalizer
            .expect_normalize()
            .times(2)
            .returning(|_, _| Ok(media(120.0)));
        let pipeline = h.pipeline(normalizer, transcriber, &[(40.0, 60.0)], renderer);

        let first_id = h.create_task().await;
        let second_id = h.create_task().await;
        let (a, b) = tokio::join!(pipeline.run(&first_id), pipeline.run(&second_id));
        assert_eq!(a.unwrap().status, TaskStatus::Completed);
        assert_eq!(b.unwrap().status, TaskStatus::Completed);

        let dirs = transcribed.lock().unwrap().clone();
        assert_eq!(dirs.len(), 2);
        assert_ne!(dirs[0], dirs[1]);
        let shared = media(120.0).local_path;
        for dir in &dirs {
            assert!(dir.starts_with(h.settings().work_dir));
            assert_ne!(Some(dir.as_path()), shared.parent());
        }
    }

    #[tokio::test]
    async fn test_missing_task_is_an_error() {
        let h = Harness::new();
        let pipeline = h.pipeline(
            MockSourceNormalizer::new(),
            MockTranscriber::new(),
            &[],
            Arc::new(FakeRenderer::default()),
        );
        let err = pipeline.run(&TaskId::from_string("nope")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Store(StoreError::NotFound(_))));
    }
}
