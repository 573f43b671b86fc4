use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

/// A user-facing message about one download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub url: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Notice {
    pub fn info(url: &str, message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            url: url.to_string(),
            message: message.into(),
            path: None,
        }
    }

    pub fn success(url: &str, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            kind: NoticeKind::Success,
            url: url.to_string(),
            message: message.into(),
            path,
        }
    }

    pub fn error(url: &str, message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            url: url.to_string(),
            message: message.into(),
            path: None,
        }
    }
}

/// Receives download notices. Called from inside queue bookkeeping, so
/// implementations must return quickly and must not call back into the queue.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Routes notices to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.kind {
            NoticeKind::Info => tracing::info!(url = %notice.url, "{}", notice.message),
            NoticeKind::Success => tracing::info!(url = %notice.url, path = ?notice.path, "{}", notice.message),
            NoticeKind::Error => tracing::error!(url = %notice.url, "{}", notice.message),
        }
    }
}

/// Keeps every notice in memory, for summaries and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn of_kind(&self, kind: NoticeKind) -> Vec<Notice> {
        self.notices().into_iter().filter(|n| n.kind == kind).collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notice: Notice) {
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }
}
