//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while fetching or processing media.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Source requires login")]
    LoginRequired,

    #[error("Source is rate limiting downloads")]
    RateLimited,

    #[error("Content is not available")]
    ContentUnavailable,

    #[error("Video exceeds the maximum duration of {0} seconds")]
    DurationExceeded(u64),

    #[error("Video exceeds the maximum size of {0} MB")]
    FileTooLarge(u64),

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed { message: message.into() }
    }

    pub fn ffmpeg_failed(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::FfmpegFailed { message: message.into(), stderr }
    }

    /// Permanent failures are not retried; the worker falls back instead.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            MediaError::LoginRequired
                | MediaError::ContentUnavailable
                | MediaError::DurationExceeded(_)
                | MediaError::FileTooLarge(_)
                | MediaError::InvalidVideo(_)
        )
    }
}
