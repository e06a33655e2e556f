//! Audio extraction for speech recognition.

use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Sample rate expected by speech recognizers.
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

/// Extract a mono 16 kHz MP3 track from `input` into `output`.
pub async fn extract_audio(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout: Duration,
) -> MediaResult<()> {
    let cmd = audio_command(input.as_ref(), output.as_ref());
    debug!(output = %output.as_ref().display(), "Extracting audio track");
    FfmpegRunner::new()
        .with_timeout(timeout)
        .with_label("extract_audio")
        .run(&cmd)
        .await
}

fn audio_command(input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .no_video()
        .mono_audio(SPEECH_SAMPLE_RATE)
        .audio_codec("libmp3lame")
        .audio_bitrate("64k")
}
