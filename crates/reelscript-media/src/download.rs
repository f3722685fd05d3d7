//! Reel download using yt-dlp.
//!
//! Downloads are constrained at the tool level: worst mp4 rendition, a
//! filesize cap, and a duration match-filter. Stderr is classified into
//! typed errors so the worker can tell permanent conditions (login walls,
//! removed content, over-limit videos) from transient ones.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Download configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Maximum source duration in seconds.
    pub max_duration_secs: u64,
    /// Maximum file size in megabytes.
    pub max_filesize_mb: u64,
    /// Optional Netscape-format cookies file.
    pub cookies_path: Option<PathBuf>,
    /// yt-dlp binary.
    pub yt_dlp_path: String,
    /// Wall clock allowed for one download.
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 300,
            max_filesize_mb: 50,
            cookies_path: None,
            yt_dlp_path: "yt-dlp".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl DownloadConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_duration_secs: std::env::var("MAX_VIDEO_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_duration_secs),
            max_filesize_mb: std::env::var("MAX_VIDEO_FILESIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_filesize_mb),
            cookies_path: std::env::var("COOKIES_PATH").ok().map(PathBuf::from),
            yt_dlp_path: std::env::var("YT_DLP_PATH").unwrap_or(defaults.yt_dlp_path),
            timeout: Duration::from_secs(
                std::env::var("DOWNLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        }
    }
}

/// Download a reel to `output_path`.
pub async fn download_reel(
    url: &str,
    output_path: impl AsRef<Path>,
    config: &DownloadConfig,
) -> MediaResult<()> {
    let output_path = output_path.as_ref();

    which::which(&config.yt_dlp_path).map_err(|_| MediaError::YtDlpNotFound)?;

    let output_arg = output_path.to_string_lossy().to_string();
    let filesize_arg = format!("{}M", config.max_filesize_mb);
    let filter_arg = format!("duration <= {}", config.max_duration_secs);

    let mut args: Vec<&str> = vec![
        "--output",
        &output_arg,
        "--format",
        "worst[ext=mp4]",
        "--max-filesize",
        &filesize_arg,
        "--match-filter",
        &filter_arg,
        "--no-playlist",
        "--no-progress",
    ];

    let cookies_arg;
    if let Some(ref cookies) = config.cookies_path {
        if cookies.exists() {
            cookies_arg = cookies.to_string_lossy().to_string();
            args.push("--cookies");
            args.push(&cookies_arg);
        } else {
            debug!("Cookies file {} not found, downloading without it", cookies.display());
        }
    }
    args.push(url);

    info!(url, "Downloading reel");

    let mut child = Command::new(&config.yt_dlp_path)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| MediaError::download_failed(format!("failed to spawn yt-dlp: {}", e)))?;

    let mut stderr_pipe = child.stderr.take();
    let mut stdout_pipe = child.stdout.take();

    let wait = async {
        let mut stderr = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_string(&mut stderr).await.ok();
        }
        let mut stdout = String::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_string(&mut stdout).await.ok();
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    };

    let (status, stdout, stderr) = match tokio::time::timeout(config.timeout, wait).await {
        Ok(finished) => finished
            .map_err(|e| MediaError::download_failed(format!("yt-dlp did not finish: {}", e)))?,
        Err(_) => {
            let _ = child.start_kill();
            return Err(MediaError::Timeout(config.timeout.as_secs()));
        }
    };

    if !status.success() {
        warn!(url, "yt-dlp failed: {}", stderr.trim());
        return Err(classify_downloader_output(&stderr, config));
    }

    // A filtered-out video exits zero without producing a file.
    if !output_path.exists() {
        let combined = format!("{}\n{}", stdout, stderr);
        if combined.contains("does not pass filter") || combined.contains("duration") {
            return Err(MediaError::DurationExceeded(config.max_duration_secs));
        }
        if combined.contains("larger than max-filesize") {
            return Err(MediaError::FileTooLarge(config.max_filesize_mb));
        }
        return Err(MediaError::download_failed("yt-dlp produced no output file"));
    }

    info!(url, path = %output_path.display(), "Downloaded reel");
    Ok(())
}

/// Map downloader stderr to a typed error.
///
/// The strings come from yt-dlp's extractor messages; the groups matter more
/// than exact wording, so matching is substring-based and case-insensitive.
pub fn classify_downloader_output(stderr: &str, config: &DownloadConfig) -> MediaError {
    let lower = stderr.to_lowercase();

    if lower.contains("login required")
        || lower.contains("login_required")
        || lower.contains("sign in")
        || lower.contains("requested content is not available, rate-limit reached")
    {
        // Instagram reports rate limiting and login walls in one breath;
        // both need a cookies refresh, so they classify together.
        if lower.contains("rate-limit") || lower.contains("rate limit") {
            return MediaError::RateLimited;
        }
        return MediaError::LoginRequired;
    }

    if lower.contains("rate-limit") || lower.contains("rate limit") || lower.contains("429") {
        return MediaError::RateLimited;
    }

    if lower.contains("not available")
        || lower.contains("unavailable")
        || lower.contains("video formats")
        || lower.contains("removed")
        || lower.contains("private")
    {
        return MediaError::ContentUnavailable;
    }

    if lower.contains("does not pass filter") {
        return MediaError::DurationExceeded(config.max_duration_secs);
    }

    if lower.contains("larger than max-filesize") {
        return MediaError::FileTooLarge(config.max_filesize_mb);
    }

    MediaError::download_failed(stderr.lines().last().unwrap_or("yt-dlp failed").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DownloadConfig {
        DownloadConfig::default()
    }

    #[test]
    fn test_login_required_is_permanent() {
        let err = classify_downloader_output("ERROR: [Instagram] login required to access this content", &config());
        assert!(matches!(err, MediaError::LoginRequired));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_rate_limit_is_transient() {
        let err = classify_downloader_output("ERROR: rate-limit reached, try again later", &config());
        assert!(matches!(err, MediaError::RateLimited));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_unavailable_is_permanent() {
        let err = classify_downloader_output("ERROR: This video is not available", &config());
        assert!(matches!(err, MediaError::ContentUnavailable));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_duration_filter_maps_to_duration_exceeded() {
        let err = classify_downloader_output("video does not pass filter (duration <= 300)", &config());
        assert!(matches!(err, MediaError::DurationExceeded(300)));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_rate_limited_login_combo_prefers_rate_limit() {
        let err = classify_downloader_output(
            "ERROR: requested content is not available, rate-limit reached or login required",
            &config(),
        );
        assert!(matches!(err, MediaError::RateLimited));
    }

    #[test]
    fn test_unknown_error_is_generic_transient() {
        let err = classify_downloader_output("ERROR: connection reset by peer", &config());
        assert!(matches!(err, MediaError::DownloadFailed { .. }));
        assert!(!err.is_permanent());
    }
}
