//! Sequential download pipeline.
//!
//! Items are fetched one at a time in ascending index order with a fixed
//! pause between them. Images are re-encoded when the chosen format differs
//! from the source; a failed item is logged and counted and the batch goes
//! on.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::ValueEnum;
use image::{DynamicImage, ImageFormat, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::{info, warn};

use crate::media::{MediaItem, MediaType};

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(300);
const JPEG_QUALITY: u8 = 95;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("format conversion failed: {0}")]
    FormatConversionFailed(String),

    #[error("could not save file: {0}")]
    Write(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ImageFormatChoice {
    /// Keep the source encoding.
    Original,
    #[default]
    Jpg,
    Png,
    Webp,
}

impl ImageFormatChoice {
    fn target(self) -> Option<ImageFormat> {
        match self {
            ImageFormatChoice::Original => None,
            ImageFormatChoice::Jpg => Some(ImageFormat::Jpeg),
            ImageFormatChoice::Png => Some(ImageFormat::Png),
            ImageFormatChoice::Webp => Some(ImageFormat::WebP),
        }
    }
}

/// Videos are saved as fetched; the choice only names the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum VideoFormatChoice {
    #[default]
    Mp4,
    Webm,
    Mov,
}

impl VideoFormatChoice {
    pub fn extension(self) -> &'static str {
        match self {
            VideoFormatChoice::Mp4 => "mp4",
            VideoFormatChoice::Webm => "webm",
            VideoFormatChoice::Mov => "mov",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub file_prefix: &'static str,
    pub image_format: ImageFormatChoice,
    pub video_format: VideoFormatChoice,
    pub item_delay: Duration,
}

impl DownloadOptions {
    pub fn new(file_prefix: &'static str) -> Self {
        Self {
            file_prefix,
            image_format: ImageFormatChoice::default(),
            video_format: VideoFormatChoice::default(),
            item_delay: DEFAULT_ITEM_DELAY,
        }
    }
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<(), DownloadError>;

    /// Passes the raw URL on when the bytes could not be fetched.
    async fn hand_off(&self, filename: &str, url: &str) -> Result<(), DownloadError>;
}

/// Fetches over HTTP, decoding inline `data:` URIs locally.
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

fn decode_data_uri(uri: &str) -> Option<Result<Vec<u8>, DownloadError>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = match rest.split_once(',') {
        Some(parts) => parts,
        None => return Some(Err(DownloadError::Fetch("malformed data URI".to_string()))),
    };
    if !header.ends_with(";base64") {
        return Some(Err(DownloadError::Fetch(
            "only base64 data URIs are supported".to_string(),
        )));
    }

    Some(
        STANDARD
            .decode(payload)
            .map_err(|error| DownloadError::Fetch(format!("invalid data URI: {error}"))),
    )
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        if let Some(decoded) = decode_data_uri(url) {
            return decoded;
        }

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| DownloadError::Fetch(error.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|error| DownloadError::Fetch(error.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Writes files into a directory. Hand-offs become `.url` shortcut files.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|error| DownloadError::Write(error.to_string()))?;
        tokio::fs::write(self.dir.join(filename), bytes)
            .await
            .map_err(|error| DownloadError::Write(format!("{filename}: {error}")))
    }
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<(), DownloadError> {
        self.write(filename, bytes).await
    }

    async fn hand_off(&self, filename: &str, url: &str) -> Result<(), DownloadError> {
        let shortcut = format!("[InternetShortcut]\nURL={url}\n");
        self.write(&format!("{filename}.url"), shortcut.as_bytes())
            .await
    }
}

fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        _ => format.extensions_str().first().copied().unwrap_or("jpg"),
    }
}

/// Re-encodes `bytes` into the chosen format when it differs from the
/// source. Returns the bytes to write and the file extension.
pub fn prepare_image(
    bytes: Vec<u8>,
    choice: ImageFormatChoice,
) -> Result<(Vec<u8>, &'static str), DownloadError> {
    let source_format = image::guess_format(&bytes).ok();

    let Some(target) = choice.target() else {
        let extension = source_format.map(extension_for).unwrap_or("jpg");
        return Ok((bytes, extension));
    };
    if source_format == Some(target) {
        return Ok((bytes, extension_for(target)));
    }

    let decoded = image::load_from_memory(&bytes)
        .map_err(|error| DownloadError::FormatConversionFailed(error.to_string()))?;
    let mut encoded = Vec::new();

    match target {
        ImageFormat::Jpeg => {
            let rgb = decoded.to_rgb8();
            JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
                .encode_image(&rgb)
                .map_err(|error| DownloadError::FormatConversionFailed(error.to_string()))?;
        }
        other => {
            DynamicImage::ImageRgba8(decoded.to_rgba8())
                .write_to(&mut Cursor::new(&mut encoded), other)
                .map_err(|error| DownloadError::FormatConversionFailed(error.to_string()))?;
        }
    }

    Ok((encoded, extension_for(target)))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub handed_off: usize,
    pub saved: Vec<String>,
    pub failures: Vec<(usize, String)>,
}

async fn download_item(
    index: usize,
    item: &MediaItem,
    options: &DownloadOptions,
    fetcher: &dyn MediaFetcher,
    sink: &dyn DownloadSink,
) -> Result<(String, bool), DownloadError> {
    let position = index + 1;

    match item.media_type {
        MediaType::Video => {
            let filename = format!(
                "{}_{position}.{}",
                options.file_prefix,
                options.video_format.extension()
            );
            match fetcher.fetch(&item.url_high).await {
                Ok(bytes) => {
                    sink.save(&filename, &bytes).await?;
                    Ok((filename, false))
                }
                Err(error) => {
                    warn!("Video {position} could not be fetched ({error}); handing off the URL");
                    sink.hand_off(&filename, &item.url_high).await?;
                    Ok((filename, true))
                }
            }
        }
        MediaType::Image => {
            let bytes = fetcher.fetch(item.download_source()).await?;
            let (bytes, extension) = prepare_image(bytes, options.image_format)?;
            let filename = format!("{}_{position}.{extension}", options.file_prefix);
            sink.save(&filename, &bytes).await?;
            Ok((filename, false))
        }
    }
}

/// Downloads `queue` in order, one item at a time.
pub async fn run_batch(
    queue: &[(usize, MediaItem)],
    options: &DownloadOptions,
    fetcher: &dyn MediaFetcher,
    sink: &dyn DownloadSink,
) -> BatchReport {
    let mut report = BatchReport::default();

    for (position, (index, item)) in queue.iter().enumerate() {
        report.attempted += 1;

        match download_item(*index, item, options, fetcher, sink).await {
            Ok((filename, handed_off)) => {
                report.succeeded += 1;
                if handed_off {
                    report.handed_off += 1;
                }
                report.saved.push(filename);
            }
            Err(error) => {
                warn!("Item {} failed: {error}", index + 1);
                report.failures.push((*index, error.to_string()));
            }
        }

        if position + 1 < queue.len() && !options.item_delay.is_zero() {
            tokio::time::sleep(options.item_delay).await;
        }
    }

    info!(
        "Downloaded {}/{} item(s)",
        report.succeeded, report.attempted
    );
    report
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use image::{Rgb, RgbImage};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn png_bytes() -> Vec<u8> {
        let image = RgbImage::from_pixel(4, 3, Rgb([200, 40, 10]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct FakeFetcher {
        responses: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(responses: &[(&str, Vec<u8>)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(url, bytes)| (url.to_string(), bytes.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MediaFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| DownloadError::Fetch(format!("404 for {url}")))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<(String, Vec<u8>)>>,
        handed_off: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DownloadSink for RecordingSink {
        async fn save(&self, filename: &str, bytes: &[u8]) -> Result<(), DownloadError> {
            self.saved
                .lock()
                .unwrap()
                .push((filename.to_string(), bytes.to_vec()));
            Ok(())
        }

        async fn hand_off(&self, filename: &str, url: &str) -> Result<(), DownloadError> {
            self.handed_off
                .lock()
                .unwrap()
                .push((filename.to_string(), url.to_string()));
            Ok(())
        }
    }

    fn options(image_format: ImageFormatChoice) -> DownloadOptions {
        DownloadOptions {
            image_format,
            item_delay: Duration::ZERO,
            ..DownloadOptions::new("instagram")
        }
    }

    #[test]
    fn png_is_reencoded_as_jpeg() {
        let (bytes, extension) = prepare_image(png_bytes(), ImageFormatChoice::Jpg).unwrap();
        assert_eq!(extension, "jpg");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn matching_format_is_left_untouched() {
        let source = png_bytes();
        let (bytes, extension) = prepare_image(source.clone(), ImageFormatChoice::Png).unwrap();
        assert_eq!(extension, "png");
        assert_eq!(bytes, source);
    }

    #[test]
    fn original_keeps_source_extension() {
        let (_, extension) = prepare_image(png_bytes(), ImageFormatChoice::Original).unwrap();
        assert_eq!(extension, "png");
    }

    #[test]
    fn undecodable_bytes_fail_conversion() {
        let error = prepare_image(b"not an image".to_vec(), ImageFormatChoice::Webp).unwrap_err();
        assert!(matches!(error, DownloadError::FormatConversionFailed(_)));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let fetcher = FakeFetcher::new(&[
            ("https://cdn/1.png", png_bytes()),
            ("https://cdn/3.png", png_bytes()),
        ]);
        let sink = RecordingSink::default();
        let queue = vec![
            (0, MediaItem::image("https://cdn/1.png", "https://cdn/1-lo.png")),
            (1, MediaItem::image("https://cdn/missing.png", "x")),
            (2, MediaItem::image("https://cdn/3.png", "x")),
        ];

        let report = run_batch(&queue, &options(ImageFormatChoice::Png), &fetcher, &sink).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 1);
        assert_eq!(report.saved, vec!["instagram_1.png", "instagram_3.png"]);
        assert_eq!(
            *fetcher.calls.lock().unwrap(),
            vec!["https://cdn/1.png", "https://cdn/missing.png", "https://cdn/3.png"]
        );
    }

    #[tokio::test]
    async fn video_fetch_failure_hands_off_the_url() {
        let fetcher = FakeFetcher::new(&[("https://cdn/v.mp4", b"video".to_vec())]);
        let sink = RecordingSink::default();
        let queue = vec![
            (0, MediaItem::video("https://cdn/v.mp4", "https://cdn/v-lo.mp4", "t")),
            (4, MediaItem::video("https://cdn/blocked.mp4", "x", "t")),
        ];
        let options = DownloadOptions {
            video_format: VideoFormatChoice::Webm,
            ..options(ImageFormatChoice::Jpg)
        };

        let report = run_batch(&queue, &options, &fetcher, &sink).await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.handed_off, 1);
        assert_eq!(sink.saved.lock().unwrap()[0].0, "instagram_1.webm");
        assert_eq!(
            *sink.handed_off.lock().unwrap(),
            vec![(
                "instagram_5.webm".to_string(),
                "https://cdn/blocked.mp4".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn image_without_full_resolution_uses_thumbnail() {
        let fetcher = FakeFetcher::new(&[("data-thumb", png_bytes())]);
        let sink = RecordingSink::default();
        let item = MediaItem::image("", "").with_thumbnail("data-thumb");

        let report = run_batch(&[(0, item)], &options(ImageFormatChoice::Original), &fetcher, &sink).await;

        assert_eq!(report.saved, vec!["instagram_1.png"]);
    }

    #[tokio::test]
    async fn directory_sink_writes_files_and_shortcuts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out"));

        sink.save("instagram_1.jpg", b"jpeg").await.unwrap();
        sink.hand_off("instagram_2.mp4", "https://cdn/v.mp4").await.unwrap();

        let saved = tokio::fs::read(dir.path().join("out/instagram_1.jpg")).await.unwrap();
        assert_eq!(saved, b"jpeg");
        let shortcut = tokio::fs::read_to_string(dir.path().join("out/instagram_2.mp4.url"))
            .await
            .unwrap();
        assert!(shortcut.contains("URL=https://cdn/v.mp4"));
    }

    #[tokio::test]
    async fn http_fetcher_decodes_data_uris() {
        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(b"abc"));

        assert_eq!(fetcher.fetch(&uri).await.unwrap(), b"abc");
        assert!(fetcher.fetch("data:text/plain,abc").await.is_err());
    }

    #[tokio::test]
    async fn http_fetcher_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let fetcher = HttpFetcher::new(reqwest::Client::new());

        let ok = fetcher.fetch(&format!("{}/ok.jpg", server.uri())).await.unwrap();
        let gone = fetcher.fetch(&format!("{}/gone.jpg", server.uri())).await;

        assert_eq!(ok, b"bytes");
        assert!(matches!(gone, Err(DownloadError::Fetch(_))));
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Step {
        FetchStart(String),
        FetchEnd(String),
        Saved(String),
    }

    type Timeline = Arc<Mutex<Vec<(Step, tokio::time::Instant)>>>;

    struct SlowFetcher {
        latency: Duration,
        timeline: Timeline,
    }

    #[async_trait]
    impl MediaFetcher for SlowFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
            let now = tokio::time::Instant::now();
            self.timeline.lock().unwrap().push((Step::FetchStart(url.to_string()), now));
            tokio::time::sleep(self.latency).await;
            let now = tokio::time::Instant::now();
            self.timeline.lock().unwrap().push((Step::FetchEnd(url.to_string()), now));
            Ok(url.as_bytes().to_vec())
        }
    }

    struct TimedSink {
        timeline: Timeline,
    }

    #[async_trait]
    impl DownloadSink for TimedSink {
        async fn save(&self, filename: &str, _bytes: &[u8]) -> Result<(), DownloadError> {
            let now = tokio::time::Instant::now();
            self.timeline.lock().unwrap().push((Step::Saved(filename.to_string()), now));
            Ok(())
        }

        async fn hand_off(&self, _filename: &str, _url: &str) -> Result<(), DownloadError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn items_run_one_at_a_time_with_delay_between() {
        let timeline = Timeline::default();
        let latency = Duration::from_millis(50);
        let fetcher = SlowFetcher {
            latency,
            timeline: timeline.clone(),
        };
        let sink = TimedSink {
            timeline: timeline.clone(),
        };
        let queue: Vec<(usize, MediaItem)> = ["a", "b", "c"]
            .iter()
            .enumerate()
            .map(|(index, name)| (index, MediaItem::video(*name, *name, "")))
            .collect();
        let options = DownloadOptions::new("instagram");
        let delay = options.item_delay;
        assert!(!delay.is_zero());

        let started = tokio::time::Instant::now();
        let report = run_batch(&queue, &options, &fetcher, &sink).await;
        let elapsed = started.elapsed();

        assert_eq!(report.succeeded, 3);
        let timeline = timeline.lock().unwrap().clone();
        let steps: Vec<Step> = timeline.iter().map(|(step, _)| step.clone()).collect();
        assert_eq!(
            steps,
            vec![
                Step::FetchStart("a".into()),
                Step::FetchEnd("a".into()),
                Step::Saved("instagram_1.mp4".into()),
                Step::FetchStart("b".into()),
                Step::FetchEnd("b".into()),
                Step::Saved("instagram_2.mp4".into()),
                Step::FetchStart("c".into()),
                Step::FetchEnd("c".into()),
                Step::Saved("instagram_3.mp4".into()),
            ]
        );

        let tolerance = Duration::from_millis(5);
        for item in 0..2 {
            let saved_at = timeline[item * 3 + 2].1;
            let next_start = timeline[item * 3 + 3].1;
            let gap = next_start - saved_at;
            assert!(gap >= delay && gap < delay + tolerance, "gap {gap:?}");
        }

        let busy = latency * 3 + delay * 2;
        assert!(
            elapsed >= busy && elapsed < busy + tolerance,
            "no pause after the last item, took {elapsed:?}"
        );
    }
}
