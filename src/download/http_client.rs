use super::http_errors::HttpErrorInfo;
use super::task::{DownloadRequest, Progress};
use crate::app::config::DownloadConfig;
use crate::file::metadata::apply_last_modified;
use crate::file::naming::{filename_from_url, sanitize_filename};
use crate::file::save::{Blob, SaveError, SaveStrategy};
use futures_util::{Stream, StreamExt};
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE,
    LAST_MODIFIED,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Emit at least every MiB even when the interval has not elapsed
const MIN_PROGRESS_BYTES: u64 = 1024 * 1024;
const EVENT_BUFFER: usize = 32;
const FALLBACK_FILENAME: &str = "download";

static FILENAME_EXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\*\s*=\s*[\w!#$%&+^`{}~-]*'[^']*'([^;\s]+)"#).expect("valid regex")
});
static FILENAME_PLAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).expect("valid regex")
});

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}")]
    Http(HttpErrorInfo),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("save failed: {0}")]
    Save(#[from] SaveError),

    #[error("save task did not finish: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Whether a manual retry has a reasonable chance of succeeding
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Http(info) => info.is_retryable,
            DownloadError::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            DownloadError::Save(SaveError::Write { .. }) => true,
            _ => false,
        }
    }

    /// What the user can do about this failure, when there is anything.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            DownloadError::Http(info) => Some(info.hint),
            DownloadError::Network(_) => Some("Check network connectivity."),
            DownloadError::InvalidHeader { .. } => Some("Fix the request header and add the url again."),
            DownloadError::Save(SaveError::Write { .. }) => {
                Some("Check free space and permissions of the download directory.")
            }
            DownloadError::Save(_) => Some("Choose a different filename."),
            DownloadError::Join(_) | DownloadError::Cancelled => None,
        }
    }
}

/// One item of a download's event sequence. Exactly one terminal
/// (`Completed` or `Failed`) ends every sequence that is not cancelled.
#[derive(Debug)]
pub enum DownloadEvent {
    Progress(Progress),
    Completed { path: PathBuf, progress: Progress },
    Failed(DownloadError),
}

impl DownloadEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DownloadEvent::Progress(_))
    }
}

#[derive(Debug, Default)]
struct ParsedHeaders {
    size: Option<u64>,
    filename: Option<String>,
    content_type: Option<String>,
    last_modified: Option<String>,
}

fn parse_response_headers(headers: &HeaderMap) -> ParsedHeaders {
    let text = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    ParsedHeaders {
        size: text(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
        filename: text(CONTENT_DISPOSITION).and_then(content_disposition_filename),
        content_type: text(CONTENT_TYPE).map(str::to_string),
        last_modified: text(LAST_MODIFIED).map(str::to_string),
    }
}

/// Filename from a Content-Disposition value; the RFC 5987 `filename*` form wins.
fn content_disposition_filename(value: &str) -> Option<String> {
    let extended = FILENAME_EXT
        .captures(value)
        .and_then(|c| c.get(1))
        .and_then(|m| percent_decode_str(m.as_str()).decode_utf8().ok())
        .map(|decoded| sanitize_filename(&decoded))
        .filter(|name| !name.is_empty());
    if extended.is_some() {
        return extended;
    }

    let captures = FILENAME_PLAIN.captures(value)?;
    let raw = captures.get(1).or_else(|| captures.get(2))?.as_str();
    let name = sanitize_filename(raw);
    (!name.is_empty()).then_some(name)
}

/// Name to save under: explicit request name, then server suggestion, then url.
fn resolve_filename(request: &DownloadRequest, server_filename: Option<&str>) -> String {
    if let Some(name) = request.filename.as_deref() {
        return name.to_string();
    }
    server_filename
        .map(str::to_string)
        .or_else(|| filename_from_url(&request.url))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

/// Convert user-supplied header pairs into a `HeaderMap`
pub fn build_headers(custom_headers: &HashMap<String, String>) -> Result<HeaderMap, DownloadError> {
    let mut headers = HeaderMap::new();
    for (key, value) in custom_headers {
        let name: HeaderName = key.parse().map_err(|e: reqwest::header::InvalidHeaderName| {
            DownloadError::InvalidHeader {
                name: key.clone(),
                reason: e.to_string(),
            }
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| DownloadError::InvalidHeader {
            name: key.clone(),
            reason: e.to_string(),
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<String, InFlight>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deregister(map: &InFlightMap, url: &str, generation: u64) {
    let mut in_flight = lock(map);
    if in_flight.get(url).is_some_and(|f| f.generation == generation) {
        in_flight.remove(url);
    }
}

/// Single-consumer event sequence of one download.
///
/// Dropping it aborts the underlying request.
pub struct DownloadStream {
    rx: mpsc::Receiver<DownloadEvent>,
    abort: AbortHandle,
    url: String,
    generation: u64,
    in_flight: InFlightMap,
}

impl DownloadStream {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        self.rx.recv().await
    }
}

impl Stream for DownloadStream {
    type Item = DownloadEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        self.abort.abort();
        deregister(&self.in_flight, &self.url, self.generation);
    }
}

/// Performs HTTP GETs with streamed progress and hands finished bodies to a
/// `SaveStrategy`. Tracks one in-flight download per url for `cancel`.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    saver: Arc<dyn SaveStrategy>,
    progress_interval: Duration,
    preserve_modified_time: bool,
    in_flight: InFlightMap,
    next_generation: Arc<AtomicU64>,
}

impl HttpClient {
    pub fn new(config: &DownloadConfig, saver: Arc<dyn SaveStrategy>) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(10)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            saver,
            progress_interval: Duration::from_millis(config.progress_interval_ms),
            preserve_modified_time: config.preserve_modified_time,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Start fetching `request` on the runtime and return its event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn download(&self, request: &DownloadRequest) -> DownloadStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let url = request.url.clone();

        let worker = self.clone();
        let request = request.clone();

        // Registration happens under the lock so the task cannot deregister first
        let mut in_flight = lock(&self.in_flight);
        let handle = tokio::spawn(async move {
            let event = match worker.fetch(&request, &tx).await {
                Ok((path, progress)) => DownloadEvent::Completed { path, progress },
                Err(DownloadError::Cancelled) => {
                    tracing::debug!("Download of {} dropped by its consumer", request.url);
                    return;
                }
                Err(e) => DownloadEvent::Failed(e),
            };
            deregister(&worker.in_flight, &request.url, generation);
            let _ = tx.send(event).await;
        });
        let abort = handle.abort_handle();
        if in_flight
            .insert(url.clone(), InFlight { generation, abort: abort.clone() })
            .is_some()
        {
            tracing::debug!("Replaced tracked download for {}", url);
        }
        drop(in_flight);

        DownloadStream {
            rx,
            abort,
            url,
            generation,
            in_flight: self.in_flight.clone(),
        }
    }

    /// Abort the in-flight download for `url`. Returns false if none is tracked.
    pub fn cancel(&self, url: &str) -> bool {
        match lock(&self.in_flight).remove(url) {
            Some(flight) => {
                flight.abort.abort();
                tracing::info!("Cancelled in-flight download: {}", url);
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        lock(&self.in_flight).contains_key(url)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    async fn fetch(
        &self,
        request: &DownloadRequest,
        tx: &mpsc::Sender<DownloadEvent>,
    ) -> Result<(PathBuf, Progress), DownloadError> {
        let emit = |progress: Progress| async move {
            tx.send(DownloadEvent::Progress(progress))
                .await
                .map_err(|_| DownloadError::Cancelled)
        };

        let headers = build_headers(&request.headers)?;

        tracing::trace!("Sending GET {}", request.url);
        let response = self
            .client
            .get(&request.url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    DownloadError::Http(HttpErrorInfo::network(&e.to_string()))
                } else {
                    DownloadError::Network(e)
                }
            })?;
        tracing::trace!("Received {} for {}", response.status(), request.url);

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http(HttpErrorInfo::from_status(status.as_u16())));
        }

        let parsed = parse_response_headers(response.headers());
        let total = parsed.size;
        emit(Progress::new(0, total)).await?;

        let capacity = total.unwrap_or(0).min(64 * MIN_PROGRESS_BYTES) as usize;
        let mut data = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        let mut last_emit = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            data.extend_from_slice(&chunk);

            let loaded = data.len() as u64;
            if loaded - last_bytes >= MIN_PROGRESS_BYTES || last_emit.elapsed() >= self.progress_interval {
                emit(Progress::new(loaded, total)).await?;
                last_emit = Instant::now();
                last_bytes = loaded;
            }
        }

        let loaded = data.len() as u64;
        emit(Progress::new(loaded, total.or(Some(loaded)))).await?;

        let filename = resolve_filename(request, parsed.filename.as_deref());
        let blob = Blob::new(data, parsed.content_type);
        let saver = self.saver.clone();
        let path = tokio::task::spawn_blocking(move || saver.save(blob, &filename)).await??;

        if self.preserve_modified_time {
            if let Err(e) = apply_last_modified(&path, parsed.last_modified.as_deref()) {
                tracing::warn!("Could not set modified time on {}: {}", path.display(), e);
            }
        }

        tracing::info!("Downloaded {} ({} bytes) to {}", request.url, loaded, path.display());
        Ok((path, Progress::complete(loaded)))
    }
}
