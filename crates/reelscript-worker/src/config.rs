//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reelscript_models::AnalysisMode;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent jobs per worker process.
    pub concurrency: usize,
    /// Wall-clock ceiling per job.
    pub job_timeout: Duration,
    /// Root for per-job workspaces.
    pub temp_root: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Analyzer input selection.
    pub analysis_mode: AnalysisMode,
    /// Base URL public view links are minted under.
    pub public_base_url: String,
    /// Active experiment identifiers stamped onto dataset records.
    pub experiment_ids: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            job_timeout: Duration::from_secs(300),
            temp_root: std::env::temp_dir().join("reelscript"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            analysis_mode: AnalysisMode::Hybrid,
            public_base_url: "https://reelscript.app".to_string(),
            experiment_ids: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.concurrency),
            job_timeout: Duration::from_secs(
                std::env::var("JOB_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            temp_root: std::env::var("WORKER_TEMP_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_root),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            analysis_mode: std::env::var("ANALYSIS_MODE")
                .ok()
                .as_deref()
                .and_then(AnalysisMode::parse)
                .unwrap_or(defaults.analysis_mode),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or(defaults.public_base_url)
                .trim_end_matches('/')
                .to_string(),
            experiment_ids: std::env::var("EXPERIMENT_IDS")
                .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
                .unwrap_or_default(),
        }
    }

    pub fn view_url(&self, public_id: &str) -> String {
        format!("{}/s/{}", self.public_base_url, public_id)
    }
}
