pub mod app;
pub mod cli;
pub mod download;
pub mod file;
pub mod notify;
pub mod util;

pub use app::config::Config;
pub use download::http_client::{DownloadError, DownloadEvent, DownloadStream, HttpClient};
pub use download::queue::{DownloadQueue, MAX_CONCURRENT_DOWNLOADS};
pub use download::task::{DownloadRequest, DownloadStatus, Progress, StatusEntry, StatusUpdate};
pub use file::save::{Blob, FileSaveStrategy, SaveError, SaveStrategy};
pub use notify::{Notice, NoticeKind, Notifier};
