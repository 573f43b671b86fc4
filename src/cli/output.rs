use crate::download::task::{DownloadStatus, QueueItem};
use crate::notify::{MemoryNotifier, Notice, NoticeKind, Notifier};
use serde::Serialize;
use std::path::PathBuf;

/// Prints notices to stderr as they arrive and keeps them for the summary.
pub struct ConsoleNotifier {
    echo: bool,
    record: MemoryNotifier,
}

impl ConsoleNotifier {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            record: MemoryNotifier::new(),
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.record.notices()
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        if self.echo {
            eprintln!("{}", format_notice(&notice));
        }
        self.record.notify(notice);
    }
}

pub fn format_notice(notice: &Notice) -> String {
    let icon = match notice.kind {
        NoticeKind::Info => "·",
        NoticeKind::Success => "✓",
        NoticeKind::Error => "✗",
    };
    format!("{} {} {}", icon, notice.message, notice.url)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedFile {
    pub url: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFile {
    pub url: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
}

/// Outcome of one `fetch` run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchSummary {
    pub saved: Vec<SavedFile>,
    pub failed: Vec<FailedFile>,
    pub cancelled: usize,
}

impl FetchSummary {
    /// Saved files come from success notices (completed entries leave the
    /// queue); failures are whatever is still queued as Failed.
    pub fn collect(notices: &[Notice], remaining: &[QueueItem], cancelled: usize) -> Self {
        let saved = notices
            .iter()
            .filter(|n| n.kind == NoticeKind::Success)
            .filter_map(|n| {
                n.path.clone().map(|path| SavedFile {
                    url: n.url.clone(),
                    path,
                })
            })
            .collect();

        let failed = remaining
            .iter()
            .filter(|item| item.entry.status == DownloadStatus::Failed)
            .map(|item| FailedFile {
                url: item.request.url.clone(),
                error: item
                    .entry
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
                hint: item.entry.hint.clone(),
                retryable: item.entry.retryable,
            })
            .collect();

        Self {
            saved,
            failed,
            cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled == 0
    }
}

/// Format the summary for display (human or JSON)
pub fn format_summary(summary: &FetchSummary, json: bool) -> serde_json::Result<String> {
    if json {
        return serde_json::to_string_pretty(summary);
    }

    let mut output = format!(
        "{} saved, {} failed",
        summary.saved.len(),
        summary.failed.len()
    );
    if summary.cancelled > 0 {
        output.push_str(&format!(", {} cancelled", summary.cancelled));
    }
    for file in &summary.saved {
        output.push_str(&format!("\n  saved  {}", file.path.display()));
    }
    for file in &summary.failed {
        output.push_str(&format!("\n  failed {} ({})", file.url, file.error));
        if let Some(hint) = &file.hint {
            output.push_str(&format!("\n         {}", hint));
        }
        if file.retryable {
            output.push_str("\n         retryable: run the same fetch again");
        }
    }
    Ok(output)
}
