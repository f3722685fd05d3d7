//! Local media tooling for the reelscript worker.
//!
//! yt-dlp downloads with typed failure classification, ffprobe probing,
//! duration-adaptive frame sampling, 16 kHz mono audio extraction, and
//! sanitized per-job workspaces.

pub mod download;
pub mod error;
pub mod extract;
pub mod probe;
pub mod workspace;

pub use download::{classify_downloader_output, download_reel, DownloadConfig};
pub use error::{MediaError, MediaResult};
pub use extract::{extract_audio, extract_frames, expected_frames, sampling_fps, MAX_FRAMES};
pub use probe::{probe_and_enforce_duration, probe_video, VideoInfo};
pub use workspace::{sanitize_name, JobWorkspace};
