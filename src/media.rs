use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

/// One downloadable entry of a post, normalized from whatever shape the
/// upstream provider returned.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub url_high: String,
    pub url_low: String,
    pub thumbnail: String,
}

/// Provider order is kept as-is; download filenames are numbered by position.
pub type MediaList = Vec<MediaItem>;

impl MediaItem {
    pub fn image(url_high: impl Into<String>, url_low: impl Into<String>) -> Self {
        let url_low = url_low.into();
        Self {
            media_type: MediaType::Image,
            url_high: url_high.into(),
            thumbnail: url_low.clone(),
            url_low,
        }
    }

    pub fn video(
        url_high: impl Into<String>,
        url_low: impl Into<String>,
        thumbnail: impl Into<String>,
    ) -> Self {
        Self {
            media_type: MediaType::Video,
            url_high: url_high.into(),
            url_low: url_low.into(),
            thumbnail: thumbnail.into(),
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = thumbnail.into();
        self
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    /// Videos need a playable source at both ends of the quality range.
    pub fn is_playable(&self) -> bool {
        match self.media_type {
            MediaType::Video => !self.url_high.is_empty() && !self.url_low.is_empty(),
            MediaType::Image => !self.url_high.is_empty() || !self.thumbnail.is_empty(),
        }
    }

    /// Best source to save for this item.
    pub fn download_source(&self) -> &str {
        if self.url_high.is_empty() {
            &self.thumbnail
        } else {
            &self.url_high
        }
    }
}

pub fn count_by_type(media: &[MediaItem]) -> (usize, usize) {
    let videos = media.iter().filter(|item| item.is_video()).count();
    (media.len() - videos, videos)
}
