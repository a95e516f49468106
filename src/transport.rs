//! Blob transport for the remote document store.
//!
//! The remote store is a dumb versioned blob behind a signing proxy: a
//! shared secret gates descriptor issuance (`sign-put` / `sign-get`), and
//! the returned short-lived URLs carry the actual bytes. The transport knows
//! nothing about passphrases or encryption; that is layered on top by the
//! sync controller and the envelope.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Marker the signing proxy returns when its bucket binding is missing.
const BUCKET_UNSET_MARKER: &str = "S3_BUCKET";

/// A short-lived signed-URL descriptor for one upload or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub url: String,
    /// Content type the upload URL was signed for, echoed on the PUT.
    pub content_type: Option<String>,
}

/// Result of a blob download.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    /// Opaque change indicator (ETag) for skip-if-unchanged pulls.
    pub change_indicator: Option<String>,
}

/// Abstract blob transport the sync controller talks to.
pub trait BlobTransport: Send + Sync {
    fn request_upload_descriptor(
        &self,
        shared_secret: &str,
        object_key: &str,
        content_type: &str,
    ) -> impl Future<Output = SyncResult<Descriptor>> + Send;

    fn request_download_descriptor(
        &self,
        shared_secret: &str,
        object_key: &str,
    ) -> impl Future<Output = SyncResult<Descriptor>> + Send;

    fn upload(
        &self,
        descriptor: &Descriptor,
        bytes: Vec<u8>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    fn download(&self, descriptor: &Descriptor) -> impl Future<Output = SyncResult<Download>> + Send;
}

#[derive(Serialize)]
struct SignRequest<'a> {
    password: &'a str,
    key: &'a str,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct SignResponse {
    url: String,
}

/// HTTP implementation against the signed-URL proxy endpoints
/// (`POST {base}/api/sign-put`, `POST {base}/api/sign-get`).
pub struct HttpBlobTransport {
    client: Client,
    base_url: String,
}

impl HttpBlobTransport {
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn sign(&self, endpoint: &str, request: &SignRequest<'_>) -> SyncResult<Descriptor> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .json(request)
            .send()
            .await
            .map_err(|e| SyncError::transport(format!("{} request failed: {}", endpoint, e)))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(SyncError::auth("shared secret rejected by signing proxy"));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains(BUCKET_UNSET_MARKER) {
                return Err(SyncError::ServerMisconfigured(body));
            }
            return Err(SyncError::transport(format!(
                "{} returned {}: {}",
                endpoint, status, body
            )));
        }

        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| SyncError::transport(format!("{} returned invalid JSON: {}", endpoint, e)))?;
        Ok(Descriptor {
            url: signed.url,
            content_type: request.content_type.map(String::from),
        })
    }
}

impl BlobTransport for HttpBlobTransport {
    async fn request_upload_descriptor(
        &self,
        shared_secret: &str,
        object_key: &str,
        content_type: &str,
    ) -> SyncResult<Descriptor> {
        self.sign(
            "/api/sign-put",
            &SignRequest {
                password: shared_secret,
                key: object_key,
                content_type: Some(content_type),
            },
        )
        .await
    }

    async fn request_download_descriptor(
        &self,
        shared_secret: &str,
        object_key: &str,
    ) -> SyncResult<Descriptor> {
        self.sign(
            "/api/sign-get",
            &SignRequest {
                password: shared_secret,
                key: object_key,
                content_type: None,
            },
        )
        .await
    }

    async fn upload(&self, descriptor: &Descriptor, bytes: Vec<u8>) -> SyncResult<()> {
        let mut request = self.client.put(&descriptor.url).body(bytes);
        if let Some(content_type) = &descriptor.content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::transport(format!("upload failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::transport(format!(
                "upload returned {}",
                status
            )));
        }
        Ok(())
    }

    async fn download(&self, descriptor: &Descriptor) -> SyncResult<Download> {
        let response = self
            .client
            .get(&descriptor.url)
            .send()
            .await
            .map_err(|e| SyncError::transport(format!("download failed: {}", e)))?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(SyncError::NotFound("remote object does not exist".to_string()));
        }
        if !status.is_success() {
            return Err(SyncError::transport(format!(
                "download returned {}",
                status
            )));
        }
        let change_indicator = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::transport(format!("download body failed: {}", e)))?;
        Ok(Download {
            bytes: bytes.to_vec(),
            change_indicator,
        })
    }
}
