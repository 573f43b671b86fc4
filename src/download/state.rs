//! Per-status reactions of the download queue.
//!
//! Each status maps to exactly one behavior; the coordinator calls
//! [`handle`] after every transition it records.

use super::queue::DownloadQueue;
use super::task::{format_bytes, DownloadRequest, DownloadStatus, StatusEntry};
use crate::notify::Notice;

pub fn handle(
    status: DownloadStatus,
    request: &DownloadRequest,
    entry: &StatusEntry,
    queue: &DownloadQueue,
) {
    match status {
        DownloadStatus::Pending => {
            queue
                .notifier()
                .notify(Notice::info(&request.url, "Download started"));
            queue.start(request);
        }
        DownloadStatus::Downloading => {
            let progress = &entry.progress;
            match progress.total {
                Some(total) => tracing::debug!(
                    "{}: {}% ({} / {})",
                    request.url,
                    progress.percentage,
                    format_bytes(progress.loaded),
                    format_bytes(total)
                ),
                None => tracing::debug!("{}: {} received", request.url, format_bytes(progress.loaded)),
            }
        }
        DownloadStatus::Completed => {
            let message = match &entry.saved_to {
                Some(path) => format!("Saved {}", path.display()),
                None => "Download completed".to_string(),
            };
            queue.notifier().notify(Notice::success(
                &request.url,
                message,
                entry.saved_to.clone(),
            ));
            queue.remove(&request.url);
        }
        DownloadStatus::Failed => {
            let reason = entry.error.as_deref().unwrap_or("unknown error");
            let mut message = format!("Download failed: {}", reason);
            if let Some(hint) = &entry.hint {
                message.push_str(&format!(". {}", hint));
            }
            if entry.retryable {
                message.push_str(" (retryable)");
            }
            queue.notifier().notify(Notice::error(&request.url, message));
        }
        DownloadStatus::Cancelled => {
            queue
                .notifier()
                .notify(Notice::info(&request.url, "Download cancelled"));
            queue.remove(&request.url);
        }
    }
}
