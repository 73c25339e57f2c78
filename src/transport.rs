use bytes::Bytes;
use futures::StreamExt;
use log::{debug, error, info};
use reqwest::{Client, StatusCode, Url};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::destination::{listing_contains, DestinationError};
use crate::item::{FileHandle, ServerResponse};

const PROGRESS_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("file already exists on the server: {body}")]
    Duplicate { body: String },
    #[error("server rejected the upload with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid server response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Destination(#[from] DestinationError),
}

impl TransportError {
    /// The raw server answer, when there was one.
    pub fn response(&self) -> Option<ServerResponse> {
        match self {
            TransportError::Duplicate { body } => Some(ServerResponse {
                status: StatusCode::CONFLICT.as_u16(),
                body: body.clone(),
            }),
            TransportError::Rejected { status, body } => Some(ServerResponse {
                status: *status,
                body: body.clone(),
            }),
            _ => None,
        }
    }
}

/// Receives transfer percentages (0-100) for one upload.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(u8) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, percent: u8) {
        (self.sink)(percent.min(100));
    }

    pub fn report_bytes(&self, sent: u64, total: u64) {
        self.report(percent_of(sent, total));
    }
}

pub fn percent_of(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) * 100) / total) as u8
}

#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub index: usize,
    pub url: Url,
    pub file: FileHandle,
    pub overwrite: bool,
}

/// The two server calls the queue needs. Implemented over HTTP by
/// [`HttpTransport`]; tests substitute their own.
pub trait UploadTransport: Send + Sync + 'static {
    fn submit(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> impl Future<Output = Result<ServerResponse, TransportError>> + Send;

    fn exists(
        &self,
        listing_url: Url,
        file_name: String,
    ) -> impl Future<Output = Result<bool, TransportError>> + Send;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client })
    }
}

fn is_duplicate_rejection(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT || body.to_lowercase().contains("already exists")
}

// Splits the content so progress follows what the client has actually sent.
fn progress_chunks(
    content: Bytes,
    progress: ProgressReporter,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let total = content.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(PROGRESS_CHUNK_SIZE)
        .map(|start| content.slice(start..(start + PROGRESS_CHUNK_SIZE).min(total)))
        .collect();

    let mut sent = 0u64;
    futures::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        progress.report_bytes(sent, total as u64);
        Ok::<_, std::io::Error>(chunk)
    })
}

impl UploadTransport for HttpTransport {
    async fn submit(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<ServerResponse, TransportError> {
        let file_name = request.file.name.clone();
        info!("Starting upload for file: {} -> {}", file_name, request.url);

        let content = request.file.read().await.map_err(|e| {
            error!("Failed to read file '{}': {}", file_name, e);
            e
        })?;
        let size = content.len() as u64;
        debug!("Read {} bytes from file: {}", size, file_name);

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(progress_chunks(content, progress.clone())),
            size,
        )
        .file_name(file_name.clone())
        .mime_str(&request.file.mime_type)
        .map_err(|e| TransportError::InvalidResponse(format!("bad mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(request.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                let error_msg = format!("Failed to upload file '{}': {}", file_name, e);
                error!("{}", error_msg);
                TransportError::Network(error_msg)
            })?;
        // everything is on the wire; the server may still be saving
        progress.report(100);

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response".to_string());

        if !status.is_success() {
            if is_duplicate_rejection(status, &body) {
                debug!("Server reports '{}' already exists", file_name);
                return Err(TransportError::Duplicate { body });
            }
            error!(
                "Upload failed for '{}' with status {}: {}",
                file_name, status, body
            );
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Successfully uploaded file: {} ({} bytes)", file_name, size);
        Ok(ServerResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn exists(&self, listing_url: Url, file_name: String) -> Result<bool, TransportError> {
        debug!("Checking {} for existing '{}'", listing_url, file_name);

        let response = self
            .client
            .get(listing_url.clone())
            .send()
            .await
            .map_err(|e| TransportError::Network(format!("Request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let listing: serde_json::Value = response
            .json()
            .await
            .map_err(|e| {
                TransportError::InvalidResponse(format!("Failed to parse listing: {}", e))
            })?;
        Ok(listing_contains(&listing, &file_name))
    }
}
