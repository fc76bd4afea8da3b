use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, SystemTime},
};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;

const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(300);
const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Stitches HLS playlists into mp4 files served from the storage directory.
#[derive(Clone)]
pub struct VideoProcessor {
    storage_dir: PathBuf,
    ffmpeg_path: String,
    permits: Arc<Semaphore>,
}

impl VideoProcessor {
    pub fn new(storage_dir: impl Into<PathBuf>, ffmpeg_path: &str, max_concurrent: usize) -> Result<VideoProcessor, AppError> {
        let storage_dir = storage_dir.into();
        std::fs::create_dir_all(&storage_dir)?;

        Ok(VideoProcessor {
            storage_dir,
            ffmpeg_path: ffmpeg_path.to_string(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Downloads the playlist into `{id}.mp4` and extracts `{id}_thumbnail.jpg`.
    ///
    /// The thumbnail is best effort; only the mp4 decides success.
    pub async fn process_video(&self, m3u8_url: &str) -> Result<String, AppError> {
        if m3u8_url.trim().is_empty() {
            return Err(AppError::VideoProcessingError("No video URL".to_string()));
        }

        let _permit = self.permits.acquire().await
            .map_err(|err| AppError::UnexpectedError(format!("Video queue closed: {}", err)))?;

        let video_id = Uuid::new_v4().to_string();
        let output_path = self.storage_dir.join(video_file_name(&video_id));
        let thumbnail_path = self.storage_dir.join(thumbnail_file_name(&video_id));

        info!(video_id, m3u8_url, "Processing video");

        let output = output_path.to_string_lossy().to_string();
        let transcode = self.run_ffmpeg(&["-i", m3u8_url, "-c", "copy", "-movflags", "+faststart", "-y", &output], TRANSCODE_TIMEOUT).await;

        if let Err(err) = transcode {
            let _ = tokio::fs::remove_file(&output_path).await;
            return Err(err);
        }

        if !output_path.exists() {
            return Err(AppError::VideoProcessingError(format!("ffmpeg produced no output for {}", video_id)));
        }

        let thumbnail = thumbnail_path.to_string_lossy().to_string();
        let thumbnail_result = self.run_ffmpeg(&["-i", &output, "-ss", "00:00:01", "-vframes", "1", "-vf", "scale=640:-1", "-y", &thumbnail], THUMBNAIL_TIMEOUT).await;

        if let Err(err) = thumbnail_result {
            warn!(video_id, error = %err, "Failed to extract thumbnail");
        }

        info!(video_id, "Successfully processed video");
        Ok(video_id)
    }

    async fn run_ffmpeg(&self, args: &[&str], timeout: Duration) -> Result<(), AppError> {
        let child = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| AppError::VideoProcessingError(format!("Failed to start {}: {}", self.ffmpeg_path, err)))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(AppError::VideoProcessingError(format!("ffmpeg timed out after {}s", timeout.as_secs()))),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(status = %output.status, stderr = %stderr, "ffmpeg failed");

            let last_line = stderr.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or_default();
            return Err(AppError::VideoProcessingError(format!("ffmpeg exited with {}: {}", output.status, last_line)));
        }

        Ok(())
    }

    pub fn video_path(&self, video_id: &str) -> Option<PathBuf> {
        self.existing_file(video_id, video_file_name)
    }

    pub fn thumbnail_path(&self, video_id: &str) -> Option<PathBuf> {
        self.existing_file(video_id, thumbnail_file_name)
    }

    fn existing_file(&self, video_id: &str, file_name: fn(&str) -> String) -> Option<PathBuf> {
        if !is_valid_video_id(video_id) {
            return None;
        }

        let path = self.storage_dir.join(file_name(video_id));
        path.is_file().then_some(path)
    }

    pub async fn delete_video(&self, video_id: &str) -> Result<(), AppError> {
        if !is_valid_video_id(video_id) {
            return Err(AppError::BadRequest(format!("Invalid video id: {}", video_id)));
        }

        for path in [self.video_path(video_id), self.thumbnail_path(video_id)].into_iter().flatten() {
            tokio::fs::remove_file(path).await?;
        }

        Ok(())
    }

    /// Deletes videos and thumbnails last modified before `max_age` ago.
    pub async fn purge_older_than(&self, max_age: Duration) -> Result<usize, AppError> {
        let cutoff = SystemTime::now().checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut entries = tokio::fs::read_dir(&self.storage_dir).await?;
        let mut purged = 0;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !is_managed_file(&file_name) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if metadata.is_file() && metadata.modified()? < cutoff {
                tokio::fs::remove_file(entry.path()).await?;
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, "Purged old video files");
        }

        Ok(purged)
    }
}

pub fn video_file_name(video_id: &str) -> String {
    format!("{}.mp4", video_id)
}

pub fn thumbnail_file_name(video_id: &str) -> String {
    format!("{}_thumbnail.jpg", video_id)
}

pub fn is_valid_video_id(video_id: &str) -> bool {
    Uuid::parse_str(video_id).is_ok_and(|id| id.hyphenated().to_string() == video_id)
}

fn is_managed_file(file_name: &str) -> bool {
    lazy_static! {
        static ref MANAGED_FILE: Regex = Regex::new(r"^([0-9a-f-]{36})(?:\.mp4|_thumbnail\.jpg)$").unwrap();
    }

    MANAGED_FILE.captures(file_name)
        .is_some_and(|captures| is_valid_video_id(&captures[1]))
}
