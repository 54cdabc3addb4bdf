//! HTTP surface of the Extraction Adapter.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::Settings,
    error::{ApiError, ExtractionError},
    extract::{
        BROWSER_USER_AGENT, EmbedPageExtractor, Extractor, FallbackExtractor, OEmbedExtractor,
        RapidApiExtractor, YouTubeExtractor,
        instagram::demo_media,
        youtube::{DEFAULT_QUALITY, VideoDetails, parse_quality},
    },
    media::{MediaItem, MediaList},
    source::Source,
    transfer,
};

#[derive(Clone)]
pub struct AppState {
    /// `None` while no scraper is configured; the endpoint then answers
    /// with placeholder media.
    instagram: Option<Arc<dyn Extractor>>,
    youtube: Arc<YouTubeExtractor>,
}

impl AppState {
    pub fn new(instagram: Option<Arc<dyn Extractor>>, youtube: Arc<YouTubeExtractor>) -> Self {
        Self { instagram, youtube }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.upstream_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))?;

        let instagram = settings.rapidapi_key.as_ref().map(|key| {
            let primary: Arc<dyn Extractor> = Arc::new(RapidApiExtractor::new(
                http_client.clone(),
                settings.instagram_api_base.clone(),
                key.clone(),
                settings.rapidapi_host.clone(),
            ));
            if !settings.embed_fallback {
                return primary;
            }

            let embed = Arc::new(EmbedPageExtractor::new(
                http_client.clone(),
                settings.instagram_web_base.clone(),
                settings.inline_thumbnails,
            ));
            let oembed = Arc::new(OEmbedExtractor::new(
                http_client.clone(),
                settings.instagram_oembed_base.clone(),
                settings.inline_thumbnails,
            ));
            let scrapers = Arc::new(FallbackExtractor::new(embed, oembed));
            Arc::new(FallbackExtractor::new(primary, scrapers)) as Arc<dyn Extractor>
        });

        match &instagram {
            Some(extractor) => info!(
                "{} extraction through {}",
                extractor.source(),
                extractor.id()
            ),
            None => warn!("RAPIDAPI_KEY not configured. Instagram requests get demo media."),
        }

        let youtube = Arc::new(YouTubeExtractor::new(
            settings.yt_dlp_bin.clone(),
            settings.transfer_dir.clone(),
        ));

        Ok(Self::new(instagram, youtube))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CONTENT_DISPOSITION]);

    Router::new()
        .route("/api/health", get(health).options(preflight))
        .route("/api/instagram", get(instagram).options(preflight))
        .route("/api/youtube", get(youtube).options(preflight))
        .route(
            "/api/youtube/download",
            get(youtube_download).options(preflight),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ApiError> {
    let addr = listener
        .local_addr()
        .map_err(|error| ApiError::internal(format!("Could not read bound address: {error}")))?;
    info!("Backend ready on http://{addr}");

    axum::serve(listener, build_router(state))
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

/// Binds the configured address, clears stale transfer folders and serves
/// until the process is stopped.
pub async fn run(settings: Settings) -> Result<(), ApiError> {
    tokio::fs::create_dir_all(&settings.transfer_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Could not create transfer folder: {error}"))
        })?;
    transfer::cleanup_stale_jobs(&settings.transfer_dir, transfer::STALE_JOB_SECONDS).await;

    let state = AppState::from_settings(&settings)?;
    let listener = TcpListener::bind(&settings.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", settings.bind_addr))
    })?;

    serve(listener, state).await
}

#[derive(Debug, Deserialize)]
struct UrlQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    url: Option<String>,
    quality: Option<String>,
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct MediaResponse {
    success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    demo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    media: MediaList,
}

#[derive(Debug, Serialize)]
struct VideoResponse {
    success: bool,
    #[serde(flatten)]
    details: VideoDetails,
}

fn required_url(value: Option<String>) -> Result<String, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ApiError::bad_request("URL parameter is required"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn instagram(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<MediaResponse>, ApiError> {
    let url = required_url(query.url)?;

    let Some(extractor) = state.instagram.as_ref() else {
        if !Source::Instagram.is_valid_url(&url) {
            return Err(ApiError::bad_request("Invalid Instagram URL"));
        }
        let demo = demo_media();
        return Ok(Json(MediaResponse {
            success: true,
            demo: true,
            message: Some(demo.message),
            media: demo.media,
        }));
    };

    let media = extractor
        .extract(&url)
        .await
        .and_then(|media| {
            if media.iter().all(MediaItem::is_playable) {
                Ok(media)
            } else {
                warn!("{} returned an item without a usable source", extractor.id());
                Err(ExtractionError::NoMediaFound)
            }
        })
        .map_err(|error| ApiError::extraction(Source::Instagram, error))?;

    Ok(Json(MediaResponse {
        success: true,
        demo: false,
        message: None,
        media,
    }))
}

async fn youtube(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<VideoResponse>, ApiError> {
    let url = required_url(query.url)?;

    let details = state
        .youtube
        .fetch_details(&url)
        .await
        .map_err(|error| ApiError::extraction(Source::YouTube, error))?;

    Ok(Json(VideoResponse {
        success: true,
        details,
    }))
}

async fn youtube_download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let url = required_url(query.url)?;
    let quality = query.quality.as_deref().unwrap_or(DEFAULT_QUALITY);
    let height = parse_quality(quality)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid quality: {quality}")))?;
    let filename = query
        .filename
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "video.mp4".to_string());

    let prepared = state
        .youtube
        .download(&url, height)
        .await
        .map_err(|error| ApiError::extraction(Source::YouTube, error))?;

    let file = match tokio::fs::File::open(&prepared.path).await {
        Ok(file) => file,
        Err(error) => {
            transfer::cleanup_job(&prepared.job_dir).await;
            return Err(ApiError::internal(format!(
                "Could not read downloaded file: {error}"
            )));
        }
    };

    let headers = match download_headers(&filename, prepared.content_length) {
        Ok(headers) => headers,
        Err(error) => {
            transfer::cleanup_job(&prepared.job_dir).await;
            return Err(error);
        }
    };

    info!(
        "Streaming {} ({} bytes) as {filename}",
        prepared.path.display(),
        prepared.content_length
    );
    transfer::schedule_cleanup(prepared.job_dir);

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

fn download_headers(filename: &str, content_length: u64) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(transfer::content_type_for_filename(filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&content_length.to_string())
            .map_err(|_| ApiError::internal("Could not build the content length header"))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&transfer::build_content_disposition(filename))
            .map_err(|_| ApiError::internal("Could not build the download header"))?,
    );
    Ok(headers)
}
