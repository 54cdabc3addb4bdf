//! Per-request scratch directories for files produced by yt-dlp, plus the
//! header helpers used when streaming them back.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ExtractionError;

pub const JOB_RETENTION_SECONDS: u64 = 20 * 60;
pub const STALE_JOB_SECONDS: u64 = 2 * 60 * 60;

pub async fn create_job_dir(transfer_dir: &Path) -> Result<PathBuf, ExtractionError> {
    let job_dir = transfer_dir.join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&job_dir).await.map_err(|error| {
        ExtractionError::Tool(format!("Could not prepare temporary download folder: {error}"))
    })?;
    Ok(job_dir)
}

pub fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

/// Finds the file yt-dlp produced inside `job_dir`, preferring the path it
/// printed. Anything resolving outside the job directory is ignored.
pub async fn resolve_downloaded_file(
    job_dir: &Path,
    printed_path: Option<&str>,
) -> Result<PathBuf, ExtractionError> {
    let canonical_job_dir = tokio::fs::canonicalize(job_dir).await.map_err(|error| {
        ExtractionError::Tool(format!("Could not resolve temporary folder: {error}"))
    })?;

    if let Some(path_value) = printed_path {
        for candidate in [PathBuf::from(path_value), job_dir.join(path_value)] {
            if let Some(valid_path) = resolve_candidate(&canonical_job_dir, &candidate).await? {
                return Ok(valid_path);
            }
        }
    }

    let mut entries = tokio::fs::read_dir(job_dir).await.map_err(|error| {
        ExtractionError::Tool(format!("Could not open temporary folder: {error}"))
    })?;

    while let Some(entry) = entries.next_entry().await.map_err(|error| {
        ExtractionError::Tool(format!("Could not list temporary files: {error}"))
    })? {
        if let Some(valid_path) = resolve_candidate(&canonical_job_dir, &entry.path()).await? {
            return Ok(valid_path);
        }
    }

    Err(ExtractionError::Tool("No file was downloaded".to_string()))
}

async fn resolve_candidate(
    canonical_job_dir: &Path,
    candidate_path: &Path,
) -> Result<Option<PathBuf>, ExtractionError> {
    let metadata = match tokio::fs::metadata(candidate_path).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ExtractionError::Tool(format!(
                "Could not read downloaded file: {error}"
            )));
        }
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical_candidate = tokio::fs::canonicalize(candidate_path)
        .await
        .map_err(|error| ExtractionError::Tool(format!("Could not resolve downloaded file: {error}")))?;

    if !canonical_candidate.starts_with(canonical_job_dir) {
        warn!(
            "Blocked a file outside the expected job folder: {:?}",
            canonical_candidate
        );
        return Ok(None);
    }

    Ok(Some(canonical_candidate))
}

pub async fn cleanup_job(job_dir: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(job_dir).await
        && error.kind() != ErrorKind::NotFound
    {
        info!("Could not clean temporary folder: {error}");
    }
}

pub fn schedule_cleanup(job_dir: PathBuf) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(JOB_RETENTION_SECONDS)).await;
        cleanup_job(&job_dir).await;
    });
}

/// Removes job folders left behind by earlier runs.
pub async fn cleanup_stale_jobs(transfer_dir: &Path, older_than_secs: u64) {
    let mut entries = match tokio::fs::read_dir(transfer_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("Could not open transfer folder for cleanup: {error}");
            }
            return;
        }
    };

    let max_age = Duration::from_secs(older_than_secs);
    let now = std::time::SystemTime::now();

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or_default();

        if age < max_age {
            continue;
        }

        let removal = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(error) = removal
            && error.kind() != ErrorKind::NotFound
        {
            warn!("Could not remove stale transfer entry {:?}: {error}", path);
        }
    }
}

pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

pub fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric()
                || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
            {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "video.mp4".to_string()
    } else {
        compact.to_string()
    }
}
