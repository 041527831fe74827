use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ClientError, Result};

const DEFAULT_API_URL: &str = "http://localhost:5000";
const DEFAULT_MEDIA_UPLOAD_URL: &str = "https://api.cloudinary.com/v1_1";
const DEFAULT_DATA_DIR: &str = ".reelio";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024; // 50MB

/// Runtime settings for every client component.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin, without trailing slash. REST lives under `<api_url>/api`.
    pub api_url: String,
    pub socket_url: String,
    /// Base of the third-party media host's direct upload endpoint.
    pub media_upload_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub validate_timeout: Duration,
    pub upload_timeout: Duration,
    pub max_upload_bytes: usize,
    pub demo_metrics: bool,
    /// Hosts whose absolute URLs are never rewritten by the asset normalizer.
    pub cdn_hosts: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: socket_url_for(DEFAULT_API_URL),
            media_upload_url: DEFAULT_MEDIA_UPLOAD_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout: DEFAULT_TIMEOUT,
            validate_timeout: DEFAULT_VALIDATE_TIMEOUT,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            demo_metrics: true,
            cdn_hosts: vec![
                "res.cloudinary.com".to_string(),
                "images.unsplash.com".to_string(),
                "i.pravatar.cc".to_string(),
            ],
        }
    }
}

impl ClientConfig {
    /// Reads `REELIO_*` variables over the defaults.
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] when a `REELIO_*` variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(api_url) = lookup("REELIO_API_URL") {
            config = config.with_api_url(&api_url)?;
        }
        if let Some(socket_url) = lookup("REELIO_SOCKET_URL") {
            config.socket_url = socket_url;
        }
        if let Some(upload_url) = lookup("REELIO_MEDIA_UPLOAD_URL") {
            config.media_upload_url = upload_url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = lookup("REELIO_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("REELIO_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| ClientError::Config(format!("REELIO_TIMEOUT_SECS is not a number: {secs}")))?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = lookup("REELIO_DEMO_METRICS") {
            config.demo_metrics = parse_flag(&flag)
                .ok_or_else(|| ClientError::Config(format!("REELIO_DEMO_METRICS must be a boolean, got {flag}")))?;
        }

        Ok(config)
    }

    /// Replaces the backend origin and derives the socket URL from it.
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] when `api_url` is not an http(s) URL.
    pub fn with_api_url(mut self, api_url: &str) -> Result<Self> {
        let api_url = api_url.trim().trim_end_matches('/');
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ClientError::Config(format!("API URL must be http(s): {api_url}")));
        }
        self.api_url = api_url.to_string();
        self.socket_url = socket_url_for(api_url);
        Ok(self)
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.api_url, path.trim_start_matches('/'))
    }
}

fn socket_url_for(api_url: &str) -> String {
    let base = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    };
    format!("{base}/ws")
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
