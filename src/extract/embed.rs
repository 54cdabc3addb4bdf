use std::collections::HashSet;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{BROWSER_USER_AGENT, Extractor};
use crate::{
    error::ExtractionError,
    media::{MediaItem, MediaList, MediaType},
    source::Source,
};

static ADDITIONAL_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)window\.__additionalDataLoaded\s*\(\s*['"][^'"]*['"]\s*,\s*(\{.+?\})\s*\)\s*;"#,
    )
    .expect("additional data regex")
});

static GQL_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"gql_data"\s*:\s*(\{.+?"shortcode_media".+?\})\s*[,}]"#)
        .expect("gql data regex")
});

static CDN_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:src|srcset|data-src)=["'](https://(?:scontent|instagram)[^"']+?\.(?:jpg|jpeg|png|webp)[^"']*)"#,
    )
    .expect("cdn image regex")
});

static SIZE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"&?se=\d+").expect("size param regex"));

static ICON_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"s\d{2,3}x\d{2,3}").expect("icon size regex"));

#[derive(Debug, Default, Deserialize)]
struct ShortcodeMedia {
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    display_url: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    edge_sidecar_to_children: Option<SidecarEdges>,
}

#[derive(Debug, Default, Deserialize)]
struct SidecarEdges {
    #[serde(default)]
    edges: Vec<SidecarEdge>,
}

#[derive(Debug, Default, Deserialize)]
struct SidecarEdge {
    #[serde(default)]
    node: ShortcodeMedia,
}

/// Media found on the embed page before thumbnails are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedMedia {
    pub media_type: MediaType,
    pub url: String,
    pub display_url: String,
}

impl ShortcodeMedia {
    fn to_embed_media(&self) -> Option<EmbedMedia> {
        let display_url = self.display_url.trim();
        if display_url.is_empty() {
            return None;
        }

        let (media_type, url) = if self.is_video {
            let video_url = self
                .video_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .unwrap_or(display_url);
            (MediaType::Video, video_url)
        } else {
            (MediaType::Image, display_url)
        };

        Some(EmbedMedia {
            media_type,
            url: url.to_string(),
            display_url: display_url.to_string(),
        })
    }
}

fn find_shortcode_media(blob: &Value) -> Option<ShortcodeMedia> {
    let media = blob
        .get("shortcode_media")
        .or_else(|| blob.get("graphql").and_then(|graphql| graphql.get("shortcode_media")))?;
    serde_json::from_value(media.clone()).ok()
}

/// Reads the embedded post JSON. A carousel with any unusable edge fails
/// the whole post; an empty list means no usable JSON was present.
fn media_from_json(html: &str) -> Result<Vec<EmbedMedia>, ExtractionError> {
    for pattern in [&*ADDITIONAL_DATA, &*GQL_DATA] {
        let Some(raw) = pattern.captures(html).and_then(|captures| captures.get(1)) else {
            continue;
        };
        let Ok(blob) = serde_json::from_str::<Value>(raw.as_str()) else {
            debug!("Embedded JSON candidate did not parse");
            continue;
        };
        let Some(post) = find_shortcode_media(&blob) else {
            continue;
        };

        let edges = post
            .edge_sidecar_to_children
            .as_ref()
            .map(|sidecar| sidecar.edges.as_slice())
            .unwrap_or_default();

        if edges.is_empty() {
            return Ok(post.to_embed_media().into_iter().collect());
        }

        debug!("Embed page carousel with {} item(s)", edges.len());
        return edges
            .iter()
            .map(|edge| edge.node.to_embed_media())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                warn!("Embed page carousel has an item without a display URL");
                ExtractionError::NoMediaFound
            });
    }

    Ok(Vec::new())
}

fn media_from_image_tags(html: &str) -> Vec<EmbedMedia> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = CDN_IMAGE
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|found| found.as_str().replace("&amp;", "&"))
        .filter(|url| seen.insert(SIZE_PARAM.replace_all(url, "").into_owned()))
        .collect();

    let full_size: Vec<String> = unique
        .iter()
        .filter(|url| !ICON_SIZE.is_match(url))
        .cloned()
        .collect();
    let chosen = if full_size.is_empty() { unique } else { full_size };

    chosen
        .into_iter()
        .map(|url| EmbedMedia {
            media_type: MediaType::Image,
            display_url: url.clone(),
            url,
        })
        .collect()
}

/// Pulls media out of an embed page: embedded JSON first, then raw image
/// tags when no usable JSON is present.
pub fn parse_embed_page(html: &str) -> Result<Vec<EmbedMedia>, ExtractionError> {
    let media = media_from_json(html)?;
    if !media.is_empty() {
        return Ok(media);
    }

    let media = media_from_image_tags(html);
    if media.is_empty() {
        return Err(ExtractionError::NoMediaFound);
    }
    Ok(media)
}

/// Scrapes `/p/<shortcode>/embed/captioned/`. Brittle by nature; only used
/// behind [`super::FallbackExtractor`] once the scraper API has failed.
pub struct EmbedPageExtractor {
    http_client: reqwest::Client,
    web_base: String,
    inline_thumbnails: bool,
}

impl EmbedPageExtractor {
    pub fn new(http_client: reqwest::Client, web_base: impl Into<String>, inline_thumbnails: bool) -> Self {
        Self {
            http_client,
            web_base: web_base.into(),
            inline_thumbnails,
        }
    }

    async fn thumbnail_for(&self, display_url: &str) -> String {
        if !self.inline_thumbnails {
            return display_url.to_string();
        }
        inline_thumbnail(&self.http_client, display_url)
            .await
            .unwrap_or_else(|| display_url.to_string())
    }
}

/// Fetches an image and returns it as a `data:` URI, or `None` on any failure.
pub async fn inline_thumbnail(http_client: &reqwest::Client, url: &str) -> Option<String> {
    let response = http_client
        .get(url)
        .header(USER_AGENT, BROWSER_USER_AGENT)
        .header(REFERER, "https://www.instagram.com/")
        .send()
        .await
        .map_err(|error| warn!("Could not fetch thumbnail {url}: {error}"))
        .ok()?;

    if !response.status().is_success() {
        warn!("Thumbnail {url} responded with {}", response.status());
        return None;
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();
    let bytes = response.bytes().await.ok()?;

    Some(format!("data:{content_type};base64,{}", STANDARD.encode(bytes)))
}

#[async_trait]
impl Extractor for EmbedPageExtractor {
    fn id(&self) -> &'static str {
        "instagram-embed-page"
    }

    fn source(&self) -> Source {
        Source::Instagram
    }

    async fn extract(&self, url: &str) -> Result<MediaList, ExtractionError> {
        let shortcode = Source::Instagram.identifier(url)?;
        let embed_url = format!("{}/p/{shortcode}/embed/captioned/", self.web_base);
        info!("Trying embed page {embed_url}");

        let response = self
            .http_client
            .get(&embed_url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(REFERER, "https://www.instagram.com/")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::UpstreamError {
                status: status.as_u16(),
            });
        }

        let html = response.text().await?;
        let found = parse_embed_page(&html)?;

        let mut media = Vec::with_capacity(found.len());
        for entry in found {
            let thumbnail = self.thumbnail_for(&entry.display_url).await;
            let item = match entry.media_type {
                MediaType::Video => MediaItem::video(entry.url.clone(), entry.url, thumbnail),
                MediaType::Image => {
                    MediaItem::image(entry.url.clone(), entry.url).with_thumbnail(thumbnail)
                }
            };
            media.push(item);
        }

        info!("Embed page for {shortcode}: {} item(s)", media.len());
        Ok(media)
    }
}
