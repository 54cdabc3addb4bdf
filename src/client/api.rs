use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::ClientError;
use crate::{
    error::ErrorKind,
    extract::youtube::VideoDetails,
    media::MediaList,
    source::Source,
};

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    media: MediaList,
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    #[serde(default)]
    success: bool,
    #[serde(flatten)]
    details: VideoDetails,
}

/// Error body as read by the client. `code` stays untyped until mapped so
/// an unknown code never hides the message.
#[derive(Debug, Default, Deserialize)]
struct LenientErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Transport from the client to the Adapter's `GET /api/...` endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(http_client: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|error| ClientError::InvalidUrl(format!("Invalid backend URL {base_url}: {error}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(&format!("api/{path}"))
            .map_err(|error| ClientError::InvalidUrl(format!("Invalid backend URL: {error}")))
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, ClientError> {
        let endpoint = self.endpoint(path)?;
        debug!("Requesting {endpoint}");

        self.http_client
            .get(endpoint)
            .query(query)
            .send()
            .await
            .map_err(|error| ClientError::NetworkUnreachable(error.to_string()))
    }

    pub async fn fetch_media(&self, source: Source, url: &str) -> Result<MediaList, ClientError> {
        let response = self.get(source.api_path(), &[("url", url)]).await?;
        if !response.status().is_success() {
            return Err(api_error(response, format!("Failed to fetch {source} media")).await);
        }

        let payload: FetchResponse = response
            .json()
            .await
            .map_err(|_| ClientError::NoMediaFound)?;
        if !payload.success || payload.media.is_empty() {
            return Err(ClientError::NoMediaFound);
        }

        info!("Received {} item(s) from {source}", payload.media.len());
        Ok(payload.media)
    }

    /// Title, channel, counters and the quality list of a YouTube video.
    pub async fn fetch_video(&self, url: &str) -> Result<VideoDetails, ClientError> {
        let response = self.get(Source::YouTube.api_path(), &[("url", url)]).await?;
        if !response.status().is_success() {
            return Err(api_error(response, "Failed to fetch video".to_string()).await);
        }

        let payload: VideoResponse = response
            .json()
            .await
            .map_err(|_| ClientError::NoMediaFound)?;
        if !payload.success {
            return Err(ClientError::NoMediaFound);
        }

        info!(
            "Received {} quality option(s) for {}",
            payload.details.formats.len(),
            payload.details.title
        );
        Ok(payload.details)
    }

    /// Streams `/api/youtube/download` into `dest_dir/filename`.
    pub async fn download_video(
        &self,
        url: &str,
        quality: &str,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, ClientError> {
        let mut response = self
            .get(
                "youtube/download",
                &[("url", url), ("quality", quality), ("filename", filename)],
            )
            .await?;
        if !response.status().is_success() {
            return Err(api_error(
                response,
                "Download failed. Please try again or try a different quality.".to_string(),
            )
            .await);
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|error| ClientError::Save(error.to_string()))?;
        let path = dest_dir.join(filename);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|error| ClientError::Save(format!("{}: {error}", path.display())))?;

        let written = async {
            let mut written: u64 = 0;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|error| ClientError::NetworkUnreachable(error.to_string()))?
            {
                file.write_all(&chunk)
                    .await
                    .map_err(|error| ClientError::Save(error.to_string()))?;
                written += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|error| ClientError::Save(error.to_string()))?;
            Ok::<_, ClientError>(written)
        }
        .await;

        let written = match written {
            Ok(written) => written,
            Err(error) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(error);
            }
        };
        info!("Saved {} ({written} bytes)", path.display());
        Ok(path)
    }
}

async fn api_error(response: reqwest::Response, fallback: String) -> ClientError {
    let status = response.status().as_u16();
    let body = response.json::<LenientErrorBody>().await.unwrap_or_default();
    let kind = body
        .code
        .and_then(|code| serde_json::from_value::<ErrorKind>(code).ok());
    ClientError::Api {
        kind,
        status,
        message: body.error.unwrap_or(fallback),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorKind;

    async fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::new(reqwest::Client::new(), &server.uri()).unwrap()
    }

    #[tokio::test]
    async fn passes_encoded_url_and_decodes_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/instagram"))
            .and(query_param("url", "https://www.instagram.com/p/ABC123/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "media": [{"type": "image", "url_high": "h", "url_low": "l", "thumbnail": "t"}]
            })))
            .mount(&server)
            .await;

        let media = client_for(&server)
            .await
            .fetch_media(Source::Instagram, "https://www.instagram.com/p/ABC123/")
            .await
            .unwrap();

        assert_eq!(media.len(), 1);
        assert_eq!(media[0].thumbnail, "t");
    }

    #[tokio::test]
    async fn typed_error_code_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "Failed to fetch Instagram data. The post might be private or unavailable.",
                "code": "rate_limited",
                "details": "API responded with status: 429"
            })))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .await
            .fetch_media(Source::Instagram, "https://www.instagram.com/p/ABC123/")
            .await
            .unwrap_err();

        match error {
            ClientError::Api { kind, status, .. } => {
                assert_eq!(kind, Some(ErrorKind::RateLimited));
                assert_eq!(status, 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_success_is_no_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "media": []})))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .await
            .fetch_media(Source::YouTube, "https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap_err();

        assert!(matches!(error, ClientError::NoMediaFound));
    }

    #[tokio::test]
    async fn unreachable_backend_is_connectivity() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(reqwest::Client::new(), &format!("http://{addr}")).unwrap();
        let error = client
            .fetch_media(Source::Instagram, "https://www.instagram.com/p/ABC123/")
            .await
            .unwrap_err();

        assert!(matches!(error, ClientError::NetworkUnreachable(_)));
    }

    #[tokio::test]
    async fn unknown_error_code_keeps_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": "Backend is warming up",
                "code": "cold_start"
            })))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .await
            .fetch_media(Source::Instagram, "https://www.instagram.com/p/ABC123/")
            .await
            .unwrap_err();

        match error {
            ClientError::Api {
                kind,
                status,
                message,
            } => {
                assert_eq!(kind, None);
                assert_eq!(status, 503);
                assert_eq!(message, "Backend is warming up");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn base_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prefix/api/instagram"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "media": [{"type": "image", "url_high": "h", "url_low": "l", "thumbnail": "t"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            ApiClient::new(reqwest::Client::new(), &format!("{}/prefix", server.uri())).unwrap();
        assert!(client.base_url().as_str().ends_with("/prefix/"));

        let media = client
            .fetch_media(Source::Instagram, "https://www.instagram.com/p/ABC123/")
            .await
            .unwrap();
        assert_eq!(media.len(), 1);
    }

    #[tokio::test]
    async fn fetches_video_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/youtube"))
            .and(query_param("url", "https://youtu.be/dQw4w9WgXcQ"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "title": "Clip",
                "channel": "Channel",
                "duration": 212,
                "views": 1500,
                "thumbnail": "https://i.ytimg.com/vi/x/hq.jpg",
                "formats": [{
                    "quality": "360p", "ext": "mp4", "url": "https://v/360",
                    "filesize": "5.0 MB", "format_id": "18", "has_audio": true, "height": 360
                }],
                "media": []
            })))
            .mount(&server)
            .await;

        let details = client_for(&server)
            .await
            .fetch_video("https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap();

        assert_eq!(details.title, "Clip");
        assert_eq!(details.formats[0].quality, "360p");
    }

    #[tokio::test]
    async fn downloads_video_through_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/youtube/download"))
            .and(query_param("url", "https://youtu.be/dQw4w9WgXcQ"))
            .and(query_param("quality", "720p"))
            .and(query_param("filename", "Clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"video-bytes".to_vec()))
            .mount(&server)
            .await;
        let out = tempfile::tempdir().unwrap();

        let saved = client_for(&server)
            .await
            .download_video("https://youtu.be/dQw4w9WgXcQ", "720p", "Clip.mp4", out.path())
            .await
            .unwrap();

        assert_eq!(saved, out.path().join("Clip.mp4"));
        assert_eq!(std::fs::read(saved).unwrap(), b"video-bytes");
    }

    #[tokio::test]
    async fn failed_download_reports_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "Invalid quality: best",
                "code": "invalid_url"
            })))
            .mount(&server)
            .await;
        let out = tempfile::tempdir().unwrap();

        let error = client_for(&server)
            .await
            .download_video("https://youtu.be/dQw4w9WgXcQ", "best", "x.mp4", out.path())
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Invalid quality: best");
        assert!(!out.path().join("x.mp4").exists());
    }

    #[test]
    fn rejects_malformed_backend_url() {
        assert!(ApiClient::new(reqwest::Client::new(), "not a url").is_err());
    }
}
