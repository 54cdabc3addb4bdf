use std::{
    collections::BTreeMap,
    io::ErrorKind as IoErrorKind,
    path::PathBuf,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    process::Command,
    time::{Duration, timeout},
};
use tracing::{info, warn};

use super::Extractor;
use crate::{
    error::ExtractionError,
    media::{MediaItem, MediaList},
    source::{Source, youtube_watch_url},
    transfer,
};

const YT_DLP_TIMEOUT_SECONDS: u64 = 180;
const MAX_QUALITY_OPTIONS: usize = 6;
pub const DEFAULT_QUALITY: &str = "360p";

#[derive(Debug, Deserialize)]
pub struct YtDlpVideoInfo {
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
    view_count: Option<u64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    #[serde(default)]
    format_id: String,
    url: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QualityOption {
    pub quality: String,
    pub ext: String,
    pub url: String,
    pub filesize: String,
    pub format_id: String,
    pub has_audio: bool,
    pub height: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VideoDetails {
    pub title: String,
    pub channel: String,
    pub duration: u64,
    pub views: u64,
    pub thumbnail: String,
    pub formats: Vec<QualityOption>,
    pub media: MediaList,
}

/// A finished yt-dlp download waiting to be streamed to the caller.
#[derive(Debug)]
pub struct PreparedDownload {
    pub path: PathBuf,
    pub job_dir: PathBuf,
    pub content_length: u64,
}

fn has_video(format: &YtDlpFormat) -> bool {
    matches!(format.vcodec.as_deref(), Some(value) if value != "none")
}

fn has_audio(format: &YtDlpFormat) -> bool {
    matches!(format.acodec.as_deref(), Some(value) if value != "none")
}

fn estimated_bitrate_kbps(height: u32) -> f64 {
    match height {
        144 => 200.0,
        240 => 400.0,
        360 => 800.0,
        480 => 1500.0,
        720 => 2500.0,
        1080 => 4500.0,
        _ => 1000.0,
    }
}

fn filesize_label(format: &YtDlpFormat, height: u32, duration: f64) -> String {
    if let Some(bytes) = format
        .filesize
        .or(format.filesize_approx)
        .filter(|bytes| *bytes > 0.0)
    {
        return format!("{:.1} MB", bytes / 1_048_576.0);
    }

    if duration > 0.0 && height > 0 {
        let estimated_mb = estimated_bitrate_kbps(height) * duration / 8.0 / 1024.0;
        return format!("~{estimated_mb:.1} MB");
    }

    "Size unknown".to_string()
}

/// Best format per height, formats that carry audio preferred, tallest first.
fn build_quality_options(formats: &[YtDlpFormat], duration: f64) -> Vec<QualityOption> {
    let mut by_height: BTreeMap<u32, QualityOption> = BTreeMap::new();

    for format in formats.iter().filter(|format| has_video(format)) {
        let Some(height) = format.height.filter(|height| *height > 0) else {
            continue;
        };
        let audio = has_audio(format);

        let replace = by_height
            .get(&height)
            .is_none_or(|existing| audio && !existing.has_audio);
        if !replace {
            continue;
        }

        by_height.insert(
            height,
            QualityOption {
                quality: format!("{height}p"),
                ext: format.ext.clone().unwrap_or_else(|| "mp4".to_string()),
                url: format.url.clone().unwrap_or_default(),
                filesize: filesize_label(format, height, duration),
                format_id: format.format_id.clone(),
                has_audio: audio,
                height,
            },
        );
    }

    by_height
        .into_values()
        .rev()
        .take(MAX_QUALITY_OPTIONS)
        .collect()
}

/// Turns yt-dlp's `-J` document into the response payload, including the
/// single normalized video item.
pub fn build_video_details(info: YtDlpVideoInfo) -> Result<VideoDetails, ExtractionError> {
    let duration = info.duration.unwrap_or_default().max(0.0);
    let formats = build_quality_options(&info.formats, duration);

    let playable: Vec<&str> = formats
        .iter()
        .map(|option| option.url.as_str())
        .filter(|url| !url.is_empty())
        .collect();
    let (Some(high), Some(low)) = (playable.first(), playable.last()) else {
        return Err(ExtractionError::NoMediaFound);
    };

    let thumbnail = info.thumbnail.unwrap_or_default();
    let media = vec![MediaItem::video(*high, *low, thumbnail.clone())];

    Ok(VideoDetails {
        title: info
            .title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        channel: info.uploader.unwrap_or_else(|| "Unknown".to_string()),
        duration: duration.round() as u64,
        views: info.view_count.unwrap_or_default(),
        thumbnail,
        formats,
        media,
    })
}

pub fn parse_quality(quality: &str) -> Option<u32> {
    quality
        .trim()
        .trim_end_matches('p')
        .parse::<u32>()
        .ok()
        .filter(|height| *height > 0)
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string()
}

/// Arguments for a capped-height download merged into a streamable mp4.
fn download_args(height: u32, output_template: String, watch_url: String) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-f".to_string(),
        format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]"),
        "--merge-output-format".to_string(),
        "mp4".to_string(),
        "--postprocessor-args".to_string(),
        "ffmpeg:-movflags faststart".to_string(),
        "-o".to_string(),
        output_template,
        watch_url,
    ]
}

/// Metadata and downloads through a local yt-dlp binary. The binary plays
/// the upstream provider role; it is only ever given a canonical watch URL
/// rebuilt from the video ID.
pub struct YouTubeExtractor {
    yt_dlp_bin: String,
    transfer_dir: PathBuf,
}

impl YouTubeExtractor {
    pub fn new(yt_dlp_bin: impl Into<String>, transfer_dir: impl Into<PathBuf>) -> Self {
        Self {
            yt_dlp_bin: yt_dlp_bin.into(),
            transfer_dir: transfer_dir.into(),
        }
    }

    async fn run_yt_dlp(&self, args: Vec<String>) -> Result<std::process::Output, ExtractionError> {
        let command_future = Command::new(&self.yt_dlp_bin).args(args).output();
        let output = timeout(Duration::from_secs(YT_DLP_TIMEOUT_SECONDS), command_future)
            .await
            .map_err(|_| ExtractionError::Tool("yt-dlp timed out".to_string()))?
            .map_err(|error| {
                if error.kind() == IoErrorKind::NotFound {
                    ExtractionError::Tool(format!(
                        "yt-dlp is not installed ({}). Install yt-dlp and restart the backend.",
                        self.yt_dlp_bin
                    ))
                } else {
                    ExtractionError::Tool(format!("Could not run yt-dlp: {error}"))
                }
            })?;

        if !output.status.success() {
            let message = run_error_message(&output.stderr);
            warn!("yt-dlp failed: {message}");
            return Err(ExtractionError::Tool(message));
        }

        Ok(output)
    }

    pub async fn fetch_details(&self, url: &str) -> Result<VideoDetails, ExtractionError> {
        let video_id = Source::YouTube.identifier(url)?;
        info!("Fetching YouTube metadata for {video_id}");

        let output = self
            .run_yt_dlp(vec![
                "-J".to_string(),
                "--no-playlist".to_string(),
                "--no-warnings".to_string(),
                youtube_watch_url(&video_id),
            ])
            .await?;

        let info: YtDlpVideoInfo = serde_json::from_slice(&output.stdout).map_err(|error| {
            ExtractionError::Tool(format!("Could not read yt-dlp metadata: {error}"))
        })?;

        let details = build_video_details(info)?;
        info!(
            "Found {} format(s) for: {}",
            details.formats.len(),
            details.title
        );
        Ok(details)
    }

    /// Downloads the video at or below `height` into a fresh job folder.
    /// The caller owns the job folder afterwards.
    pub async fn download(&self, url: &str, height: u32) -> Result<PreparedDownload, ExtractionError> {
        let video_id = Source::YouTube.identifier(url)?;
        transfer::cleanup_stale_jobs(&self.transfer_dir, transfer::STALE_JOB_SECONDS).await;
        let job_dir = transfer::create_job_dir(&self.transfer_dir).await?;

        let output_template = format!("{}/video.%(ext)s", job_dir.to_string_lossy());
        let args = download_args(height, output_template, youtube_watch_url(&video_id));

        let prepared = async {
            let output = self.run_yt_dlp(args).await?;
            let printed_path = transfer::extract_printed_path(&output.stdout);
            let path = transfer::resolve_downloaded_file(&job_dir, printed_path.as_deref()).await?;
            let metadata = tokio::fs::metadata(&path).await.map_err(|error| {
                ExtractionError::Tool(format!("Could not read downloaded file: {error}"))
            })?;
            if metadata.len() == 0 {
                return Err(ExtractionError::Tool("Downloaded file is empty".to_string()));
            }

            Ok(PreparedDownload {
                path,
                job_dir: job_dir.clone(),
                content_length: metadata.len(),
            })
        }
        .await;

        if prepared.is_err() {
            transfer::cleanup_job(&job_dir).await;
        }
        prepared
    }
}

#[async_trait]
impl Extractor for YouTubeExtractor {
    fn id(&self) -> &'static str {
        "yt-dlp-youtube"
    }

    fn source(&self) -> Source {
        Source::YouTube
    }

    async fn extract(&self, url: &str) -> Result<MediaList, ExtractionError> {
        Ok(self.fetch_details(url).await?.media)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn info(formats: serde_json::Value) -> YtDlpVideoInfo {
        serde_json::from_value(json!({
            "title": "Demo clip",
            "uploader": "Channel",
            "duration": 120.4,
            "view_count": 1500,
            "thumbnail": "https://i.ytimg.com/vi/x/hq.jpg",
            "formats": formats,
        }))
        .unwrap()
    }

    #[test]
    fn keeps_best_format_per_height_preferring_audio() {
        let details = build_video_details(info(json!([
            {"format_id": "140", "vcodec": "none", "acodec": "mp4a", "url": "https://a/audio"},
            {"format_id": "134", "height": 360, "vcodec": "avc1", "acodec": "none", "url": "https://v/360-mute", "ext": "mp4"},
            {"format_id": "18", "height": 360, "vcodec": "avc1", "acodec": "mp4a", "url": "https://v/360", "ext": "mp4", "filesize": 5242880.0},
            {"format_id": "22", "height": 720, "vcodec": "avc1", "acodec": "mp4a", "url": "https://v/720", "ext": "mp4"},
            {"format_id": "sb0", "vcodec": "none", "acodec": "none", "url": "https://storyboard"}
        ])))
        .unwrap();

        let qualities: Vec<&str> = details.formats.iter().map(|f| f.quality.as_str()).collect();
        assert_eq!(qualities, vec!["720p", "360p"]);
        assert_eq!(details.formats[1].format_id, "18");
        assert_eq!(details.formats[1].filesize, "5.0 MB");
        assert_eq!(details.formats[0].filesize, "~36.7 MB");
        assert_eq!(details.duration, 120);
        assert_eq!(details.views, 1500);
    }

    #[test]
    fn media_item_spans_tallest_to_shortest() {
        let details = build_video_details(info(json!([
            {"format_id": "a", "height": 144, "vcodec": "avc1", "acodec": "mp4a", "url": "https://v/144"},
            {"format_id": "b", "height": 1080, "vcodec": "avc1", "acodec": "mp4a", "url": "https://v/1080"},
            {"format_id": "c", "height": 480, "vcodec": "avc1", "acodec": "mp4a", "url": "https://v/480"}
        ])))
        .unwrap();

        assert_eq!(
            details.media,
            vec![MediaItem::video(
                "https://v/1080",
                "https://v/144",
                "https://i.ytimg.com/vi/x/hq.jpg"
            )]
        );
    }

    #[test]
    fn limits_to_six_qualities() {
        let formats: Vec<_> = [144, 240, 360, 480, 720, 1080, 1440, 2160]
            .iter()
            .map(|height| json!({"format_id": height.to_string(), "height": height, "vcodec": "vp9", "acodec": "opus", "url": format!("https://v/{height}")}))
            .collect();

        let details = build_video_details(info(json!(formats))).unwrap();

        assert_eq!(details.formats.len(), 6);
        assert_eq!(details.formats[0].height, 2160);
        assert_eq!(details.formats[5].height, 360);
    }

    #[test]
    fn audio_only_metadata_has_no_media() {
        let result = build_video_details(info(json!([
            {"format_id": "140", "vcodec": "none", "acodec": "mp4a", "url": "https://a/audio"}
        ])));
        assert!(matches!(result, Err(ExtractionError::NoMediaFound)));
    }

    #[test]
    fn unknown_size_without_duration() {
        let format: YtDlpFormat =
            serde_json::from_value(json!({"format_id": "x", "height": 720})).unwrap();
        assert_eq!(filesize_label(&format, 720, 0.0), "Size unknown");
    }

    #[test]
    fn parses_quality_labels() {
        assert_eq!(parse_quality("720p"), Some(720));
        assert_eq!(parse_quality(" 360 "), Some(360));
        assert_eq!(parse_quality("best"), None);
        assert_eq!(parse_quality("0p"), None);
    }

    #[test]
    fn last_stderr_line_is_reported() {
        let stderr = b"WARNING: something\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(
            run_error_message(stderr),
            "ERROR: [youtube] abc: Video unavailable"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = YouTubeExtractor::new("definitely-not-yt-dlp-binary", dir.path());

        let error = extractor
            .fetch_details("https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap_err();

        match error {
            ExtractionError::Tool(message) => assert!(message.contains("not installed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_url_skips_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = YouTubeExtractor::new("definitely-not-yt-dlp-binary", dir.path());

        let error = extractor
            .fetch_details("https://www.youtube.com/@channel")
            .await
            .unwrap_err();

        assert!(matches!(error, ExtractionError::InvalidUrl(_)));
    }

    #[test]
    fn download_merges_into_faststart_mp4() {
        let args = download_args(
            720,
            "/tmp/job/video.%(ext)s".to_string(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
        );

        let position = |flag: &str| args.iter().position(|arg| arg == flag).unwrap();
        assert_eq!(
            args[position("-f") + 1],
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
        assert_eq!(args[position("--merge-output-format") + 1], "mp4");
        assert_eq!(
            args[position("--postprocessor-args") + 1],
            "ffmpeg:-movflags faststart"
        );
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }
}
