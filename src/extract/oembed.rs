use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use tracing::{info, warn};

use super::{BROWSER_USER_AGENT, Extractor, embed::inline_thumbnail};
use crate::{
    error::ExtractionError,
    media::{MediaItem, MediaList},
    source::Source,
};

#[derive(Debug, Default, Deserialize)]
struct OEmbedResponse {
    #[serde(default)]
    thumbnail_url: Option<String>,
}

/// Last link of the Instagram chain. The oEmbed endpoint only exposes the
/// cover image, so carousels and videos come back as a single image.
pub struct OEmbedExtractor {
    http_client: reqwest::Client,
    oembed_base: String,
    inline_thumbnails: bool,
}

impl OEmbedExtractor {
    pub fn new(
        http_client: reqwest::Client,
        oembed_base: impl Into<String>,
        inline_thumbnails: bool,
    ) -> Self {
        Self {
            http_client,
            oembed_base: oembed_base.into(),
            inline_thumbnails,
        }
    }
}

#[async_trait]
impl Extractor for OEmbedExtractor {
    fn id(&self) -> &'static str {
        "instagram-oembed"
    }

    fn source(&self) -> Source {
        Source::Instagram
    }

    async fn extract(&self, url: &str) -> Result<MediaList, ExtractionError> {
        let shortcode = Source::Instagram.identifier(url)?;
        let post_url = format!("https://www.instagram.com/p/{shortcode}/");
        info!("Trying oEmbed for {shortcode}");

        let response = self
            .http_client
            .get(format!("{}/api/v1/oembed/", self.oembed_base))
            .query(&[("url", post_url.as_str())])
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("oEmbed responded with status {status} for {shortcode}");
            return Err(ExtractionError::UpstreamError {
                status: status.as_u16(),
            });
        }

        let body: OEmbedResponse = response.json().await.map_err(|error| {
            ExtractionError::Transport(format!("unreadable oEmbed response: {error}"))
        })?;
        let thumbnail_url = body
            .thumbnail_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ExtractionError::NoMediaFound)?;

        let thumbnail = if self.inline_thumbnails {
            inline_thumbnail(&self.http_client, &thumbnail_url)
                .await
                .unwrap_or_else(|| thumbnail_url.clone())
        } else {
            thumbnail_url.clone()
        };

        Ok(vec![
            MediaItem::image(thumbnail_url.clone(), thumbnail_url).with_thumbnail(thumbnail),
        ])
    }
}
