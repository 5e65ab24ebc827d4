//! Image pinning: multipart extraction and the Pinata proxy.
//!
//! The pinning JWT never leaves the server; clients only get back the CID,
//! which any IPFS gateway resolves.

use async_trait::async_trait;
use axum::extract::Multipart;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{GatewayError, Result};

/// Form field carrying the file.
pub const FILE_FIELD: &str = "file";

/// An image received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Response of the upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedFile {
    pub cid: String,
    pub name: String,
    pub size: u64,
}

/// Pull the `file` field out of a multipart body. Only `image/*` is
/// accepted.
pub async fn extract_image(multipart: &mut Multipart) -> Result<ImageUpload> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(GatewayError::BadRequest(
                "The file must be an image".to_string(),
            ));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        return Ok(ImageUpload {
            name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Err(GatewayError::BadRequest("No file provided".to_string()))
}

#[async_trait]
pub trait PinningService: Send + Sync {
    /// Pin `upload` and return its CID.
    async fn pin(&self, upload: &ImageUpload) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct PinataResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

pub struct PinataClient {
    client: Client,
    endpoint: String,
    jwt: String,
}

impl PinataClient {
    pub fn new(client: Client, endpoint: impl Into<String>, jwt: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            jwt: jwt.into(),
        }
    }
}

#[async_trait]
impl PinningService for PinataClient {
    async fn pin(&self, upload: &ImageUpload) -> Result<String> {
        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.name.clone())
            .mime_str(&upload.content_type)?;
        let form = Form::new().part(FILE_FIELD, part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = pinata_error(&body).unwrap_or_else(|| format!("Pinata returned {status}"));
            warn!("Pinning {} failed: {message}", upload.name);
            return Err(GatewayError::Upload(message));
        }

        let pinned: PinataResponse = response.json().await?;
        debug!("Pinned {} as {}", upload.name, pinned.ipfs_hash);
        Ok(pinned.ipfs_hash)
    }
}

/// Pinata reports errors either as a string or as `{reason, details}`.
fn pinata_error(body: &serde_json::Value) -> Option<String> {
    let error = body.get("error")?;
    match error {
        serde_json::Value::String(s) => Some(s.clone()),
        other => other
            .get("details")
            .or_else(|| other.get("reason"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}
