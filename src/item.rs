use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Responses longer than this are shown truncated to the user.
pub const RESPONSE_SUMMARY_LIMIT: usize = 2048;

/// Where the bytes of a queued file come from.
#[derive(Clone, Debug)]
pub enum FileSource {
    /// A file picked from disk; read when its upload is admitted.
    Path(PathBuf),
    /// Content that is already in memory, e.g. a dropped payload.
    Memory(Bytes),
}

/// A file handed to the queue by a picker or a drop event.
#[derive(Clone, Debug)]
pub struct FileHandle {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub source: FileSource,
}

/// Content type guessed from the file extension, `application/octet-stream` if unknown.
pub fn guess_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .to_string()
}

impl FileHandle {
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("'{}' is not a file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Ok(Self {
            mime_type: guess_mime_type(&name),
            name,
            size: metadata.len(),
            source: FileSource::Path(path),
        })
    }

    pub fn from_bytes(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let name = name.into();
        let content = content.into();
        Self {
            mime_type: guess_mime_type(&name),
            size: content.len() as u64,
            name,
            source: FileSource::Memory(content),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub async fn read(&self) -> std::io::Result<Bytes> {
        match &self.source {
            FileSource::Path(path) => tokio::fs::read(path).await.map(Bytes::from),
            FileSource::Memory(content) => Ok(content.clone()),
        }
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStatus {
    Waiting,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Succeeded | UploadStatus::Failed | UploadStatus::Canceled
        )
    }

    /// Allowed moves of the per-item lifecycle. Terminal states are final.
    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        matches!(
            (self, next),
            (Waiting, InProgress)
                | (Waiting, Canceled)
                | (Waiting, Failed)
                | (InProgress, Succeeded)
                | (InProgress, Failed)
                | (InProgress, Canceled)
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadStatus::Waiting => "waiting",
            UploadStatus::InProgress => "in-progress",
            UploadStatus::Succeeded => "succeeded",
            UploadStatus::Failed => "failed",
            UploadStatus::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("item {index} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub index: usize,
    pub from: UploadStatus,
    pub to: UploadStatus,
}

/// What the user should see for an item. `Saving` covers the gap between
/// the last byte leaving and the server acknowledging the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "percent", rename_all = "kebab-case")]
pub enum DisplayState {
    Waiting,
    Uploading(u8),
    Saving,
    Complete,
    Failed,
    Canceled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub status: u16,
    pub body: String,
}

impl ServerResponse {
    /// The body as it should be shown inline; long bodies are cut and
    /// annotated with their full size.
    pub fn summary(&self, limit: usize) -> String {
        if self.body.len() <= limit {
            return self.body.clone();
        }

        let mut end = limit;
        while !self.body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... [truncated, {} bytes total; full response kept on the item]",
            &self.body[..end],
            self.body.len()
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadItem {
    pub index: usize,
    pub file: FileInfo,
    pub destination: String,
    pub status: UploadStatus,
    pub overwrite: bool,
    pub progress: u8,
    pub message: Option<String>,
    pub response: Option<ServerResponse>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub fn new(index: usize, file: FileInfo, destination: impl Into<String>) -> Self {
        Self {
            index,
            file,
            destination: destination.into(),
            status: UploadStatus::Waiting,
            overwrite: false,
            progress: 0,
            message: None,
            response: None,
            enqueued_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn transition(&mut self, next: UploadStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                index: self.index,
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn set_progress(&mut self, percent: u8) {
        if self.status == UploadStatus::InProgress {
            // Transports may report out of order; never move backwards.
            self.progress = self.progress.max(percent.min(100));
        }
    }

    pub fn display_state(&self) -> DisplayState {
        match self.status {
            UploadStatus::Waiting => DisplayState::Waiting,
            UploadStatus::InProgress if self.progress >= 100 => DisplayState::Saving,
            UploadStatus::InProgress => DisplayState::Uploading(self.progress),
            UploadStatus::Succeeded => DisplayState::Complete,
            UploadStatus::Failed => DisplayState::Failed,
            UploadStatus::Canceled => DisplayState::Canceled,
        }
    }

    pub fn response_summary(&self) -> Option<String> {
        self.response
            .as_ref()
            .map(|r| r.summary(RESPONSE_SUMMARY_LIMIT))
    }
}
