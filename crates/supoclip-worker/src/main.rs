//! Clip production worker binary.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use supoclip_media::{check_ffmpeg, check_ffprobe, check_ytdlp, DownloadOptions, FontCatalog};
use supoclip_models::DEFAULT_FONT_FAMILY;
use supoclip_queue::JobQueue;
use supoclip_store::{connect_store, StoreConfig, TaskManager};
use supoclip_worker::{
    FfmpegClipRenderer, GeminiScorer, HeuristicScorer, MediaSourceNormalizer, Pipeline,
    PipelineSettings, PipelineStages, ScorerKind, SegmentScorer, SegmentSelector,
    SelectorSettings, TaskExecutor, WhisperTranscriber, WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("supoclip_worker=info".parse().unwrap())
        .add_directive("supoclip_store=info".parse().unwrap())
        .add_directive("supoclip_media=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting supoclip-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid worker configuration: {}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    for check in [check_ffmpeg, check_ffprobe] {
        if let Err(e) = check() {
            error!("{}", e);
            std::process::exit(1);
        }
    }
    if let Err(e) = check_ytdlp() {
        warn!("{}; remote sources will fail", e);
    }

    if let Some(port) = config.metrics_port {
        match PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
        {
            Ok(()) => info!("Prometheus exporter listening on port {}", port),
            Err(e) => warn!("Failed to start Prometheus exporter: {}", e),
        }
    }

    let store = match connect_store(&StoreConfig::from_env()).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to connect task store: {}", e);
            std::process::exit(1);
        }
    };
    let manager = Arc::new(TaskManager::new(store));

    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let pipeline = Pipeline::new(manager, build_stages(&config), PipelineSettings::from_config(&config));
    let executor = Arc::new(TaskExecutor::new(config, queue, pipeline));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn build_stages(config: &WorkerConfig) -> PipelineStages {
    let settings = SelectorSettings {
        max_clips: config.max_clips,
        min_duration: config.min_clip_duration,
        max_duration: config.max_clip_duration,
        min_relevance: config.min_relevance,
    };

    let scorer: Arc<dyn SegmentScorer> = match (config.scorer, &config.gemini_api_key) {
        (ScorerKind::Gemini, Some(key)) => {
            Arc::new(GeminiScorer::new(key.clone(), config.llm_model.clone(), settings.clone()))
        }
        _ => Arc::new(HeuristicScorer::new()),
    };
    info!(scorer = scorer.name(), "Segment scorer selected");

    let download = DownloadOptions {
        timeout: config.acquisition_timeout,
        cookies_file: config.cookies_file.clone(),
        ..DownloadOptions::default()
    };

    PipelineStages {
        normalizer: Arc::new(MediaSourceNormalizer::new(
            config.upload_dir.clone(),
            download,
            config.max_video_duration,
        )),
        transcriber: Arc::new(WhisperTranscriber::new(
            config.whisper_api_url.clone(),
            config.whisper_api_key.clone(),
            config.whisper_model.clone(),
        )),
        selector: SegmentSelector::new(scorer, settings),
        renderer: Arc::new(build_renderer(config)),
    }
}

fn build_renderer(config: &WorkerConfig) -> FfmpegClipRenderer {
    let renderer = FfmpegClipRenderer::new(
        FontCatalog::new(config.fonts_dir.clone(), DEFAULT_FONT_FAMILY),
        config.render_timeout,
    );
    let Some(cascade) = &config.face_cascade_path else {
        return renderer;
    };

    #[cfg(feature = "face-detection")]
    {
        match supoclip_media::HaarCascadeDetector::new(cascade) {
            Ok(detector) => {
                info!(cascade = %cascade.display(), "Face-centred framing enabled");
                renderer.with_face_detector(Arc::new(detector))
            }
            Err(e) => {
                warn!("Face detection unavailable, using centre crop: {}", e);
                renderer
            }
        }
    }

    #[cfg(not(feature = "face-detection"))]
    {
        warn!(
            cascade = %cascade.display(),
            "FACE_CASCADE_PATH set but built without face-detection; using centre crop"
        );
        renderer
    }
}
