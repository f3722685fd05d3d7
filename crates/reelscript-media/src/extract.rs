//! Frame and audio extraction via ffmpeg.
//!
//! Frames are sampled at a duration-adaptive rate and downscaled for the
//! multimodal generator; audio is resampled to 16 kHz mono.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// Hard cap on extracted frames per video.
pub const MAX_FRAMES: u32 = 20;

/// JPEG quality (ffmpeg -q:v scale; lower is better).
const FRAME_JPEG_QUALITY: u32 = 5;

/// Frame width in pixels; height follows the aspect ratio.
const FRAME_WIDTH: u32 = 480;

/// Audio sample rate for the analyzer.
const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Duration-adaptive sampling rate in frames per second.
///
/// Short clips are sampled densely enough to catch the hook; longer clips
/// taper off so the frame cap covers the whole runtime.
pub fn sampling_fps(duration_secs: f64) -> f64 {
    if duration_secs < 15.0 {
        1.0 / 3.0
    } else if duration_secs < 30.0 {
        0.5
    } else {
        0.4
    }
}

/// Number of frames the sampling rate would produce, capped.
pub fn expected_frames(duration_secs: f64) -> u32 {
    let raw = (duration_secs * sampling_fps(duration_secs)).ceil() as u32;
    raw.clamp(1, MAX_FRAMES)
}

/// Extract frames into `frames_dir`, returning the files in order.
pub async fn extract_frames(
    video_path: impl AsRef<Path>,
    frames_dir: impl AsRef<Path>,
    duration_secs: f64,
    ffmpeg_path: &str,
) -> MediaResult<Vec<PathBuf>> {
    let video_path = video_path.as_ref();
    let frames_dir = frames_dir.as_ref();

    which::which(ffmpeg_path).map_err(|_| MediaError::FfmpegNotFound)?;
    tokio::fs::create_dir_all(frames_dir).await?;

    let fps = sampling_fps(duration_secs);
    let frame_count = expected_frames(duration_secs);
    let pattern = frames_dir.join("frame_%02d.jpg");

    debug!(fps, frame_count, "Extracting frames");

    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(video_path)
        .args([
            "-vf",
            &format!("fps={:.4},scale={}:-2", fps, FRAME_WIDTH),
            "-frames:v",
            &frame_count.to_string(),
            "-q:v",
            &FRAME_JPEG_QUALITY.to_string(),
        ])
        .arg(&pattern)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "frame extraction failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(frames_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|e| e == "jpg").unwrap_or(false) {
            frames.push(path);
        }
    }
    frames.sort();

    if frames.is_empty() {
        return Err(MediaError::ffmpeg_failed("no frames produced", None));
    }

    info!(count = frames.len(), "Extracted frames");
    Ok(frames)
}

/// Extract 16 kHz mono audio for the analyzer.
pub async fn extract_audio(
    video_path: impl AsRef<Path>,
    audio_path: impl AsRef<Path>,
    ffmpeg_path: &str,
) -> MediaResult<PathBuf> {
    let video_path = video_path.as_ref();
    let audio_path = audio_path.as_ref();

    which::which(ffmpeg_path).map_err(|_| MediaError::FfmpegNotFound)?;

    let output = Command::new(ffmpeg_path)
        .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
        .arg(video_path)
        .args([
            "-vn",
            "-ar",
            &AUDIO_SAMPLE_RATE.to_string(),
            "-ac",
            "1",
        ])
        .arg(audio_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "audio extraction failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    info!(path = %audio_path.display(), "Extracted audio");
    Ok(audio_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_rate_bands() {
        assert!((sampling_fps(10.0) - 1.0 / 3.0).abs() < 1e-9);
        assert!((sampling_fps(14.9) - 1.0 / 3.0).abs() < 1e-9);
        assert!((sampling_fps(15.0) - 0.5).abs() < 1e-9);
        assert!((sampling_fps(29.9) - 0.5).abs() < 1e-9);
        assert!((sampling_fps(30.0) - 0.4).abs() < 1e-9);
        assert!((sampling_fps(300.0) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_expected_frames_is_capped() {
        assert_eq!(expected_frames(9.0), 3);
        assert_eq!(expected_frames(20.0), 10);
        // 300s * 0.4 = 120 frames, capped to 20.
        assert_eq!(expected_frames(300.0), MAX_FRAMES);
        // Never zero even for ultra-short clips.
        assert_eq!(expected_frames(1.0), 1);
    }
}
