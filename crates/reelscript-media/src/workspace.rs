//! Per-job filesystem workspaces.
//!
//! Each job owns a private directory under the temp root whose name is
//! derived from the job id after sanitization. Cleanup is explicit and
//! best-effort so it can run on every exit path.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::MediaResult;

/// Strip everything outside `[A-Za-z0-9_-]` from a filesystem name derived
/// from request data.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}

/// Private working directory for one job.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    /// Create the workspace directory under `temp_root`.
    pub async fn create(temp_root: impl AsRef<Path>, job_id: &str) -> MediaResult<Self> {
        let root = temp_root.as_ref().join(sanitize_name(job_id));
        tokio::fs::create_dir_all(&root).await?;
        debug!(path = %root.display(), "Created job workspace");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_path(&self) -> PathBuf {
        self.root.join("source.mp4")
    }

    pub fn audio_path(&self) -> PathBuf {
        self.root.join("audio.wav")
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    /// Remove the workspace and everything in it. Best-effort: a failure is
    /// logged, never propagated, because cleanup runs on error paths too.
    pub async fn cleanup(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "Removed job workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), "Workspace cleanup failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_strips_hostile_characters() {
        assert_eq!(sanitize_name("job-123_ok"), "job-123_ok");
        assert_eq!(sanitize_name("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_name("a b;c|d"), "abcd");
        assert_eq!(sanitize_name("🔥🔥"), "job");
    }

    #[tokio::test]
    async fn test_workspace_lifecycle() {
        let temp = TempDir::new().unwrap();
        let ws = JobWorkspace::create(temp.path(), "job-1").await.unwrap();
        assert!(ws.root().exists());

        tokio::fs::write(ws.video_path(), b"fake").await.unwrap();
        tokio::fs::create_dir_all(ws.frames_dir()).await.unwrap();
        tokio::fs::write(ws.frames_dir().join("frame_01.jpg"), b"fake").await.unwrap();

        ws.cleanup().await;
        assert!(!ws.root().exists());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let ws = JobWorkspace::create(temp.path(), "job-2").await.unwrap();
        ws.cleanup().await;
        // Second cleanup of a missing directory must not panic or warn-fail.
        ws.cleanup().await;
    }

    #[tokio::test]
    async fn test_traversal_attempt_stays_under_root() {
        let temp = TempDir::new().unwrap();
        let ws = JobWorkspace::create(temp.path(), "../escape").await.unwrap();
        assert!(ws.root().starts_with(temp.path()));
        ws.cleanup().await;
    }
}
