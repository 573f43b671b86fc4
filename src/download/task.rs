use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A single file to fetch. The url is the identity of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl From<&str> for DownloadRequest {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for DownloadRequest {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

/// Input accepted by `DownloadQueue::add`: one url/request or many.
pub enum DownloadInput {
    One(DownloadRequest),
    Many(Vec<DownloadRequest>),
}

impl DownloadInput {
    pub fn into_requests(self) -> Vec<DownloadRequest> {
        match self {
            DownloadInput::One(request) => vec![request],
            DownloadInput::Many(requests) => requests,
        }
    }
}

impl From<&str> for DownloadInput {
    fn from(url: &str) -> Self {
        DownloadInput::One(url.into())
    }
}

impl From<String> for DownloadInput {
    fn from(url: String) -> Self {
        DownloadInput::One(url.into())
    }
}

impl From<DownloadRequest> for DownloadInput {
    fn from(request: DownloadRequest) -> Self {
        DownloadInput::One(request)
    }
}

impl From<Vec<DownloadRequest>> for DownloadInput {
    fn from(requests: Vec<DownloadRequest>) -> Self {
        DownloadInput::Many(requests)
    }
}

impl From<Vec<String>> for DownloadInput {
    fn from(urls: Vec<String>) -> Self {
        DownloadInput::Many(urls.into_iter().map(DownloadRequest::from).collect())
    }
}

impl From<Vec<&str>> for DownloadInput {
    fn from(urls: Vec<&str>) -> Self {
        DownloadInput::Many(urls.into_iter().map(DownloadRequest::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for DownloadInput {
    fn from(urls: [&str; N]) -> Self {
        DownloadInput::Many(urls.into_iter().map(DownloadRequest::from).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    /// Pending or Downloading: the entry still needs the network.
    pub fn is_active(self) -> bool {
        matches!(self, DownloadStatus::Pending | DownloadStatus::Downloading)
    }
}

/// Transfer progress of one download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub percentage: u8,
    pub loaded: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        let percentage = match total {
            Some(total) if total > 0 => ((loaded.min(total) * 100) / total) as u8,
            _ => 0,
        };
        Self {
            percentage,
            loaded,
            total,
        }
    }

    /// Progress of a finished transfer of `loaded` bytes.
    pub fn complete(loaded: u64) -> Self {
        Self {
            percentage: 100,
            loaded,
            total: Some(loaded),
        }
    }
}

/// Status bookkeeping for one queued url.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: DownloadStatus,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What the user can do about `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the failed download may succeed.
    #[serde(default)]
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

impl StatusEntry {
    pub fn pending() -> Self {
        Self {
            status: DownloadStatus::Pending,
            progress: Progress::default(),
            error: None,
            hint: None,
            retryable: false,
            saved_to: None,
            updated_at: Utc::now(),
        }
    }

    /// Merge a partial update into this entry.
    pub fn apply(&mut self, update: StatusUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(error) = update.error {
            // A new error replaces the advice given for the previous one
            self.error = Some(error);
            self.hint = update.hint;
            self.retryable = update.retryable.unwrap_or(false);
        }
        if let Some(path) = update.saved_to {
            self.saved_to = Some(path);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial `StatusEntry`; `None` fields are left untouched on merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub status: Option<DownloadStatus>,
    pub progress: Option<Progress>,
    pub error: Option<String>,
    pub hint: Option<String>,
    pub retryable: Option<bool>,
    pub saved_to: Option<PathBuf>,
}

impl StatusUpdate {
    pub fn status(status: DownloadStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn downloading(progress: Progress) -> Self {
        Self {
            status: Some(DownloadStatus::Downloading),
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(path: PathBuf, progress: Progress) -> Self {
        Self {
            status: Some(DownloadStatus::Completed),
            progress: Some(progress),
            saved_to: Some(path),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(DownloadStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Attach recovery advice to a failure update.
    pub fn with_advice(mut self, retryable: bool, hint: Option<&str>) -> Self {
        self.retryable = Some(retryable);
        self.hint = hint.map(str::to_string);
        self
    }
}

/// A queued request together with its current status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub request: DownloadRequest,
    pub entry: StatusEntry,
}

/// Format byte counts for humans (KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
