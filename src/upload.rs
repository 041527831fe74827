//! Media uploads.
//!
//! Files go straight from the client to the media host using a short-lived
//! signature issued by the backend; the backend never proxies the bytes.
//! Identical content is only uploaded once per client lifetime. Images are
//! re-encoded as JPEG and downscaled before they leave the machine.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GenericImageView;
use log::{debug, info};
use mime_guess::mime;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;

use crate::api::{check, ApiClient, UploadApi, UploadTicket};
use crate::error::{ClientError, Result};
use crate::models::Media;

/// Longest edge of an uploaded image.
pub const MAX_IMAGE_DIMENSION: u32 = 1920;
pub const JPEG_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Video,
    Audio,
}

impl UploadKind {
    /// Resource segment of the host's upload URL. Audio is stored as video.
    #[must_use]
    pub fn resource_type(self) -> &'static str {
        match self {
            UploadKind::Image => "image",
            UploadKind::Video | UploadKind::Audio => "video",
        }
    }

    fn from_mime(mime: &mime::Mime) -> Option<Self> {
        let top = mime.type_();
        if top == mime::IMAGE {
            Some(UploadKind::Image)
        } else if top == mime::VIDEO {
            Some(UploadKind::Video)
        } else if top == mime::AUDIO {
            Some(UploadKind::Audio)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub name: String,
    pub mime: String,
    pub kind: UploadKind,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

/// What the media host reports back for a stored file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostedFile {
    pub secure_url: String,
    pub public_id: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedAsset {
    pub url: String,
    pub public_id: String,
    pub kind: UploadKind,
    pub size: usize,
    pub sha256: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
}

impl UploadedAsset {
    #[must_use]
    pub fn into_media(self) -> Media {
        match self.kind {
            UploadKind::Image => Media::Image {
                url: self.url,
                width: self.width,
                height: self.height,
            },
            UploadKind::Video => Media::Video {
                url: self.url,
                thumbnail: None,
                duration: self.duration,
            },
            UploadKind::Audio => Media::Voice {
                url: self.url,
                duration: self.duration,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Shrinks images before upload.
pub trait ImageCompressor: Send + Sync {
    /// # Errors
    ///
    /// [`ClientError::Upload`] when the image cannot be decoded or encoded.
    fn compress(&self, bytes: Vec<u8>, mime: &str) -> Result<CompressedImage>;
}

/// Leaves images untouched.
pub struct Passthrough;

impl ImageCompressor for Passthrough {
    fn compress(&self, bytes: Vec<u8>, mime: &str) -> Result<CompressedImage> {
        Ok(CompressedImage {
            bytes,
            mime: mime.to_string(),
        })
    }
}

/// Downscales to `max_dimension` on the longest edge and re-encodes as JPEG.
///
/// GIFs are left alone so animations survive. An image that needs no
/// resizing keeps its original encoding when the JPEG would not be smaller.
#[derive(Debug, Clone, Copy)]
pub struct JpegCompressor {
    pub max_dimension: u32,
    pub quality: u8,
}

impl Default for JpegCompressor {
    fn default() -> Self {
        JpegCompressor {
            max_dimension: MAX_IMAGE_DIMENSION,
            quality: JPEG_QUALITY,
        }
    }
}

impl ImageCompressor for JpegCompressor {
    fn compress(&self, bytes: Vec<u8>, mime: &str) -> Result<CompressedImage> {
        if mime == mime::IMAGE_GIF.essence_str() {
            return Passthrough.compress(bytes, mime);
        }

        let image = image::load_from_memory(&bytes)
            .map_err(|e| ClientError::Upload(format!("cannot decode image: {e}")))?;
        let (width, height) = image.dimensions();
        let resized = width > self.max_dimension || height > self.max_dimension;
        let image = if resized {
            image.resize(self.max_dimension, self.max_dimension, FilterType::Triangle)
        } else {
            image
        };

        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, self.quality)
            .encode_image(&image.to_rgb8())
            .map_err(|e| ClientError::Upload(format!("cannot encode image: {e}")))?;

        if !resized && encoded.len() >= bytes.len() {
            debug!("keeping original {mime} ({} bytes)", bytes.len());
            return Passthrough.compress(bytes, mime);
        }
        debug!(
            "compressed {width}x{height} {mime} from {} to {} bytes",
            bytes.len(),
            encoded.len()
        );
        Ok(CompressedImage {
            bytes: encoded,
            mime: mime::IMAGE_JPEG.to_string(),
        })
    }
}

#[async_trait]
pub trait MediaHost: Send + Sync {
    /// # Errors
    ///
    /// The host's HTTP error, or a transport failure.
    async fn push(&self, ticket: &UploadTicket, file: &PreparedFile) -> Result<HostedFile>;
}

/// Signed multipart upload to `<base>/<cloud>/<resource>/upload`.
pub struct HttpMediaHost {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpMediaHost {
    #[must_use]
    pub fn new(http: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        HttpMediaHost {
            http,
            base_url: base_url.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn for_api(api: &ApiClient) -> Self {
        let config = api.config();
        Self::new(api.http().clone(), config.media_upload_url.clone(), config.upload_timeout)
    }

    #[must_use]
    pub fn upload_url(&self, ticket: &UploadTicket, kind: UploadKind) -> String {
        format!(
            "{}/{}/{}/upload",
            self.base_url.trim_end_matches('/'),
            ticket.cloud_name,
            kind.resource_type()
        )
    }
}

#[async_trait]
impl MediaHost for HttpMediaHost {
    async fn push(&self, ticket: &UploadTicket, file: &PreparedFile) -> Result<HostedFile> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime)?;
        let mut form = Form::new()
            .text("api_key", ticket.api_key.clone())
            .text("timestamp", ticket.timestamp.to_string())
            .text("signature", ticket.signature.clone())
            .part("file", part);
        if let Some(folder) = &ticket.folder {
            form = form.text("folder", folder.clone());
        }

        let url = self.upload_url(ticket, file.kind);
        debug!("POST {url} ({} bytes)", file.bytes.len());
        let response = self
            .http
            .post(url)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.json().await?)
    }
}

pub struct UploadClient {
    api: Arc<dyn UploadApi>,
    host: Arc<dyn MediaHost>,
    compressor: Box<dyn ImageCompressor>,
    max_bytes: usize,
    uploaded: RwLock<HashMap<String, UploadedAsset>>,
}

impl UploadClient {
    #[must_use]
    pub fn new(api: Arc<dyn UploadApi>, host: Arc<dyn MediaHost>, max_bytes: usize) -> Self {
        UploadClient {
            api,
            host,
            compressor: Box::new(JpegCompressor::default()),
            max_bytes,
            uploaded: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_compressor(mut self, compressor: Box<dyn ImageCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// Reads and checks a file without uploading it.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for unsupported types and files over the
    /// size limit, or the I/O error from reading the file.
    pub async fn prepare(&self, path: &Path) -> Result<PreparedFile> {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let kind = UploadKind::from_mime(&mime)
            .ok_or_else(|| ClientError::validation(format!("Unsupported file type: {mime}")))?;

        let size = fs::metadata(path).await?.len();
        if usize::try_from(size).map_or(true, |size| size > self.max_bytes) {
            return Err(ClientError::validation(format!(
                "File is too large ({size} bytes, limit {})",
                self.max_bytes
            )));
        }

        let bytes = fs::read(path).await?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());

        Ok(PreparedFile {
            name,
            mime: mime.to_string(),
            kind,
            bytes,
            sha256,
        })
    }

    /// Uploads the file at `path` into `folder`, or returns the asset already
    /// uploaded with the same content.
    ///
    /// # Errors
    ///
    /// Anything [`UploadClient::prepare`] rejects, a compression failure, or
    /// the backend and host errors.
    pub async fn upload(&self, path: &Path, folder: &str) -> Result<UploadedAsset> {
        let mut file = self.prepare(path).await?;

        if let Some(existing) = self.uploaded.read().await.get(&file.sha256) {
            info!("{} already uploaded as {}", file.name, existing.public_id);
            return Ok(existing.clone());
        }

        if file.kind == UploadKind::Image {
            let compressed = self.compressor.compress(std::mem::take(&mut file.bytes), &file.mime)?;
            if compressed.mime != file.mime && compressed.mime == mime::IMAGE_JPEG.essence_str() {
                file.name = Path::new(&file.name).with_extension("jpg").to_string_lossy().into_owned();
            }
            file.bytes = compressed.bytes;
            file.mime = compressed.mime;
        }

        let ticket = self.api.upload_ticket(folder).await?;
        let hosted = self.host.push(&ticket, &file).await?;
        info!("uploaded {} -> {}", file.name, hosted.secure_url);

        let asset = UploadedAsset {
            url: hosted.secure_url,
            public_id: hosted.public_id,
            kind: file.kind,
            size: file.bytes.len(),
            sha256: file.sha256.clone(),
            width: hosted.width,
            height: hosted.height,
            duration: hosted.duration,
        };
        self.uploaded.write().await.insert(file.sha256, asset.clone());
        Ok(asset)
    }
}
