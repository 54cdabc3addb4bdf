//! Extraction adapters.
//!
//! Each adapter turns a source URL into a normalized [`MediaList`] by
//! calling exactly one upstream provider. The HTTP layer and the client
//! only ever see the [`Extractor`] trait, so a provider can be swapped
//! without touching them.

pub mod embed;
pub mod instagram;
pub mod oembed;
pub mod youtube;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{error::ExtractionError, media::MediaList, source::Source};

pub use embed::EmbedPageExtractor;
pub use instagram::RapidApiExtractor;
pub use oembed::OEmbedExtractor;
pub use youtube::YouTubeExtractor;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Stable name used in logs.
    fn id(&self) -> &'static str;

    fn source(&self) -> Source;

    async fn extract(&self, url: &str) -> Result<MediaList, ExtractionError>;
}

/// Tries `primary`, then `fallback` when the primary fails for any reason
/// other than a malformed URL.
pub struct FallbackExtractor {
    primary: Arc<dyn Extractor>,
    fallback: Arc<dyn Extractor>,
}

impl FallbackExtractor {
    pub fn new(primary: Arc<dyn Extractor>, fallback: Arc<dyn Extractor>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Extractor for FallbackExtractor {
    fn id(&self) -> &'static str {
        "fallback-chain"
    }

    fn source(&self) -> Source {
        self.primary.source()
    }

    async fn extract(&self, url: &str) -> Result<MediaList, ExtractionError> {
        match self.primary.extract(url).await {
            Ok(media) => Ok(media),
            Err(error @ ExtractionError::InvalidUrl(_)) => Err(error),
            Err(error) => {
                info!(
                    "Extractor {} failed: {error}. Retrying with {}",
                    self.primary.id(),
                    self.fallback.id()
                );
                self.fallback.extract(url).await.map_err(|fallback_error| {
                    warn!(
                        "Fallback extractor {} also failed: {fallback_error}",
                        self.fallback.id()
                    );
                    fallback_error
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::media::MediaItem;

    struct Scripted {
        name: &'static str,
        result: fn() -> Result<MediaList, ExtractionError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, result: fn() -> Result<MediaList, ExtractionError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Extractor for Scripted {
        fn id(&self) -> &'static str {
            self.name
        }

        fn source(&self) -> Source {
            Source::Instagram
        }

        async fn extract(&self, _url: &str) -> Result<MediaList, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn one_image() -> Result<MediaList, ExtractionError> {
        Ok(vec![MediaItem::image("https://cdn/a.jpg", "https://cdn/a.jpg")])
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let primary = Scripted::new("primary", one_image);
        let fallback = Scripted::new("fallback", || Err(ExtractionError::NoMediaFound));
        let chain = FallbackExtractor::new(primary.clone(), fallback.clone());

        let media = chain.extract("https://www.instagram.com/p/A/").await.unwrap();

        assert_eq!(media.len(), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_failure_uses_fallback() {
        let primary = Scripted::new("primary", || {
            Err(ExtractionError::UpstreamError { status: 429 })
        });
        let fallback = Scripted::new("fallback", one_image);
        let chain = FallbackExtractor::new(primary, fallback.clone());

        let media = chain.extract("https://www.instagram.com/p/A/").await.unwrap();

        assert_eq!(media[0].url_high, "https://cdn/a.jpg");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_url_is_not_retried() {
        let primary = Scripted::new("primary", || {
            Err(ExtractionError::InvalidUrl("Invalid Instagram URL".to_string()))
        });
        let fallback = Scripted::new("fallback", one_image);
        let chain = FallbackExtractor::new(primary, fallback.clone());

        let error = chain.extract("nope").await.unwrap_err();

        assert!(matches!(error, ExtractionError::InvalidUrl(_)));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }
}
