use std::{path::PathBuf, time::Duration};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_RAPIDAPI_HOST: &str = "instagram-scraper-api2.p.rapidapi.com";
pub const DEFAULT_INSTAGRAM_WEB_BASE: &str = "https://www.instagram.com";
pub const DEFAULT_INSTAGRAM_OEMBED_BASE: &str = "https://i.instagram.com";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 20;

pub const PRODUCTION_BACKEND_URL: &str = "https://useful-tool-hub.vercel.app";
pub const DEVELOPMENT_BACKEND_URL: &str = "http://localhost:5000";
const PRODUCTION_HOSTNAMES: [&str; 2] = ["martinw500.github.io", "useful-tool-hub.vercel.app"];

/// Server settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: String,
    pub instagram_api_base: String,
    pub instagram_web_base: String,
    pub instagram_oembed_base: String,
    pub embed_fallback: bool,
    pub inline_thumbnails: bool,
    pub yt_dlp_bin: String,
    pub transfer_dir: PathBuf,
    pub upstream_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            rapidapi_key: None,
            rapidapi_host: DEFAULT_RAPIDAPI_HOST.to_string(),
            instagram_api_base: format!("https://{DEFAULT_RAPIDAPI_HOST}"),
            instagram_web_base: DEFAULT_INSTAGRAM_WEB_BASE.to_string(),
            instagram_oembed_base: DEFAULT_INSTAGRAM_OEMBED_BASE.to_string(),
            embed_fallback: false,
            inline_thumbnails: true,
            yt_dlp_bin: "yt-dlp".to_string(),
            transfer_dir: std::env::temp_dir().join("toolhub-downloads"),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECONDS),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Settings::default();
        let text = |name: &str| lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string));
        let flag = |name: &str| lookup(name).as_deref().and_then(parse_bool);

        Self {
            bind_addr: resolve_bind_addr(text("APP_ADDR"), text("PORT")),
            rapidapi_key: text("RAPIDAPI_KEY"),
            rapidapi_host: text("RAPIDAPI_HOST").unwrap_or(defaults.rapidapi_host),
            instagram_api_base: text("INSTAGRAM_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.instagram_api_base),
            instagram_web_base: text("INSTAGRAM_WEB_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.instagram_web_base),
            instagram_oembed_base: text("INSTAGRAM_OEMBED_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.instagram_oembed_base),
            embed_fallback: flag("INSTAGRAM_EMBED_FALLBACK").unwrap_or(defaults.embed_fallback),
            inline_thumbnails: flag("INLINE_THUMBNAILS").unwrap_or(defaults.inline_thumbnails),
            yt_dlp_bin: text("YT_DLP_BIN").unwrap_or(defaults.yt_dlp_bin),
            transfer_dir: text("TRANSFER_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.transfer_dir),
            upstream_timeout: text("UPSTREAM_TIMEOUT_SECONDS")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
        }
    }
}

fn resolve_bind_addr(app_addr: Option<String>, port: Option<String>) -> String {
    if let Some(configured) = app_addr {
        return configured;
    }

    if let Some(port) = port.and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

/// Picks the Adapter base URL for a page served from `hostname`.
pub fn resolve_backend_url(hostname: &str) -> &'static str {
    let hostname = hostname.trim().to_ascii_lowercase();
    if PRODUCTION_HOSTNAMES.contains(&hostname.as_str()) {
        PRODUCTION_BACKEND_URL
    } else {
        DEVELOPMENT_BACKEND_URL
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
