use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::UploaderConfig;
use crate::errors::{DomainError, SyncError, SyncResult, ValidationError};
use crate::types::{decode_embedded_media, embed_media};

/// Media resource kind, matching the wire `mediaType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl FromStr for MediaType {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            _ => Err(DomainError::Validation(ValidationError::custom(&format!(
                "Invalid MediaType string: {}",
                s
            )))),
        }
    }
}

/// A media payload awaiting upload: either raw file bytes from user input,
/// or the embedded-binary placeholder a previous offline save produced.
#[derive(Debug, Clone)]
pub enum MediaBlob {
    Bytes { mime_type: String, data: Vec<u8> },
    DataUrl(String),
}

impl MediaBlob {
    pub fn from_bytes(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        MediaBlob::Bytes {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Render as an embedded-binary placeholder url for local persistence.
    pub fn to_data_url(&self) -> String {
        match self {
            MediaBlob::Bytes { mime_type, data } => embed_media(mime_type, data),
            MediaBlob::DataUrl(url) => url.clone(),
        }
    }

    /// Raw bytes plus mime type, decoding the placeholder form if needed.
    pub fn into_parts(self) -> SyncResult<(String, Vec<u8>)> {
        match self {
            MediaBlob::Bytes { mime_type, data } => Ok((mime_type, data)),
            MediaBlob::DataUrl(url) => decode_embedded_media(&url)
                .ok_or_else(|| SyncError::Upload("malformed embedded media placeholder".to_string())),
        }
    }
}

/// Upload progress callback, invoked with a 0..=100 percentage.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Trait for the media upload service
#[async_trait]
pub trait MediaUploader: Send + Sync {
    /// Upload a payload and return its durable url.
    async fn upload(
        &self,
        blob: &MediaBlob,
        media_type: MediaType,
        progress: Option<ProgressFn>,
    ) -> SyncResult<String>;
}

/// Implementation of MediaUploader that posts to an HTTP upload endpoint
/// (an unsigned-preset media CDN, one resource path per media kind).
pub struct HttpMediaUploader {
    client: Client,
    upload_base: String,
    upload_preset: String,
    folder: Option<String>,
    configured: bool,
}

impl HttpMediaUploader {
    pub fn new(config: &UploaderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            upload_preset: config.upload_preset.clone(),
            folder: config.folder.clone(),
            configured: config.is_configured(),
        }
    }
}

#[async_trait]
impl MediaUploader for HttpMediaUploader {
    async fn upload(
        &self,
        blob: &MediaBlob,
        media_type: MediaType,
        progress: Option<ProgressFn>,
    ) -> SyncResult<String> {
        if !self.configured {
            return Err(SyncError::Upload(
                "media uploader is not configured".to_string(),
            ));
        }

        let (mime_type, data) = blob.clone().into_parts()?;
        debug!(
            "Uploading {} bytes of {} as {}",
            data.len(),
            mime_type,
            media_type.as_str()
        );
        if let Some(progress) = &progress {
            progress(0);
        }

        let url = format!("{}/{}/upload", self.upload_base, media_type.as_str());
        let part = Part::bytes(data)
            .file_name("upload")
            .mime_str(&mime_type)
            .map_err(|e| SyncError::Upload(format!("invalid mime type for upload: {}", e)))?;
        let mut form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone());
        if let Some(folder) = &self.folder {
            form = form.text("folder", folder.clone());
        }

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("failed to reach upload endpoint: {}", e)))?;

        if response.status().is_success() {
            #[derive(Deserialize)]
            struct UploadResponse {
                secure_url: String,
            }

            let upload_response = response
                .json::<UploadResponse>()
                .await
                .map_err(|e| SyncError::Upload(format!("failed to parse upload response: {}", e)))?;

            if let Some(progress) = &progress {
                progress(100);
            }
            Ok(upload_response.secure_url)
        } else {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to get error details".to_string());
            Err(SyncError::Upload(format!(
                "upload endpoint returned error {}: {}",
                status, error_text
            )))
        }
    }
}

/// Mock implementation for testing
#[cfg(test)]
pub struct MockMediaUploader {
    fail: std::sync::atomic::AtomicBool,
    uploads: std::sync::Mutex<Vec<MediaType>>,
}

#[cfg(test)]
impl MockMediaUploader {
    pub fn new() -> Self {
        Self {
            fail: std::sync::atomic::AtomicBool::new(false),
            uploads: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        let mock = Self::new();
        mock.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        mock
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl MediaUploader for MockMediaUploader {
    async fn upload(
        &self,
        _blob: &MediaBlob,
        media_type: MediaType,
        progress: Option<ProgressFn>,
    ) -> SyncResult<String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Upload("mock uploader offline".to_string()));
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(media_type);
        if let Some(progress) = &progress {
            progress(100);
        }
        Ok(format!(
            "https://media.test/{}/{}",
            media_type.as_str(),
            uploads.len()
        ))
    }
}
