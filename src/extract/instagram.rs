use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::Extractor;
use crate::{
    error::ExtractionError,
    media::{MediaItem, MediaList},
    source::Source,
};

pub const DEMO_MESSAGE: &str = "API key not configured. Add RAPIDAPI_KEY to environment variables.";

/// Post-info payload of the RapidAPI Instagram scraper. Single posts and
/// carousels share the node fields; only carousels carry `carousel_media`.
#[derive(Debug, Default, Deserialize)]
struct PostInfo {
    #[serde(default)]
    carousel_media: Option<Vec<PostNode>>,
    #[serde(flatten)]
    node: PostNode,
}

#[derive(Debug, Default, Deserialize)]
struct PostNode {
    #[serde(default)]
    image_versions2: Option<ImageVersions>,
    #[serde(default)]
    video_versions: Option<Vec<Candidate>>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageVersions {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    url: String,
}

/// Candidate lists are ordered largest to smallest by the provider, so the
/// first entry is the high end and the last the low end.
fn candidate_range(candidates: &[Candidate]) -> Option<(&str, &str)> {
    let urls: Vec<&str> = candidates
        .iter()
        .map(|candidate| candidate.url.trim())
        .filter(|url| !url.is_empty())
        .collect();

    Some((*urls.first()?, *urls.last()?))
}

impl PostNode {
    fn image_range(&self) -> Option<(&str, &str)> {
        self.image_versions2
            .as_ref()
            .and_then(|versions| candidate_range(&versions.candidates))
    }

    fn video_range(&self) -> Option<(&str, &str)> {
        self.video_versions.as_deref().and_then(candidate_range)
    }

    fn to_media_item(&self) -> Option<MediaItem> {
        if let Some((high, low)) = self.video_range() {
            let thumbnail = self.image_range().map(|(first, _)| first).unwrap_or_default();
            return Some(MediaItem::video(high, low, thumbnail));
        }

        self.image_range()
            .map(|(high, low)| MediaItem::image(high, low))
    }
}

/// Maps a post-info JSON document onto a media list.
///
/// Accepts the document either wrapped in `data` or bare. A carousel with a
/// sub-item that carries no usable media fails the whole post rather than
/// returning a shortened list.
pub fn normalize_post_info(document: &Value) -> Result<MediaList, ExtractionError> {
    let data = document.get("data").unwrap_or(document);
    if !data.is_object() {
        return Err(ExtractionError::NoMediaFound);
    }

    let post: PostInfo = serde_json::from_value(data.clone()).map_err(|error| {
        debug!("Unrecognized post-info shape: {error}");
        ExtractionError::NoMediaFound
    })?;

    match post.carousel_media.as_deref() {
        Some(items) if !items.is_empty() => items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                item.to_media_item().ok_or_else(|| {
                    warn!("Carousel item {} has no usable media", position + 1);
                    ExtractionError::NoMediaFound
                })
            })
            .collect(),
        _ => post
            .node
            .to_media_item()
            .map(|item| vec![item])
            .ok_or(ExtractionError::NoMediaFound),
    }
}

#[derive(Debug, Serialize)]
pub struct DemoMedia {
    pub message: &'static str,
    pub media: MediaList,
}

/// Placeholder answer used while no scraper credential is configured.
pub fn demo_media() -> DemoMedia {
    let placeholder = |size: &str, color: &str, number: usize| {
        format!("https://via.placeholder.com/{size}/{color}/ffffff?text=Demo+Image+{number}")
    };

    let media = [(1, "60a5fa"), (2, "3b82f6")]
        .into_iter()
        .map(|(number, color)| MediaItem {
            media_type: crate::media::MediaType::Image,
            url_high: placeholder("1080x1080", color, number),
            url_low: placeholder("640x640", color, number),
            thumbnail: placeholder("320x320", color, number),
        })
        .collect();

    DemoMedia {
        message: DEMO_MESSAGE,
        media,
    }
}

/// Adapter for the RapidAPI Instagram scraper's `post_info` endpoint.
pub struct RapidApiExtractor {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_host: String,
}

impl RapidApiExtractor {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_host: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_host: api_host.into(),
        }
    }
}

#[async_trait]
impl Extractor for RapidApiExtractor {
    fn id(&self) -> &'static str {
        "rapidapi-instagram"
    }

    fn source(&self) -> Source {
        Source::Instagram
    }

    async fn extract(&self, url: &str) -> Result<MediaList, ExtractionError> {
        let shortcode = Source::Instagram.identifier(url)?;
        info!("Fetching Instagram post {shortcode}");

        let response = self
            .http_client
            .get(format!("{}/v1/post_info", self.base_url))
            .query(&[("code_or_id_or_url", shortcode.as_str())])
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.api_host)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Instagram scraper responded with status {status} for {shortcode}");
            return Err(ExtractionError::UpstreamError {
                status: status.as_u16(),
            });
        }

        let document: Value = response.json().await.map_err(|error| {
            ExtractionError::Transport(format!("unreadable post-info response: {error}"))
        })?;

        let media = normalize_post_info(&document)?;
        info!("Instagram post {shortcode}: {} item(s)", media.len());
        Ok(media)
    }
}
