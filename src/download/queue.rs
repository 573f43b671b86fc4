use super::http_client::{DownloadError, DownloadEvent, DownloadStream, HttpClient};
use super::state;
use super::task::{
    DownloadInput, DownloadRequest, DownloadStatus, QueueItem, StatusEntry, StatusUpdate,
};
use crate::app::config::DownloadConfig;
use crate::file::save::FileSaveStrategy;
use crate::notify::Notifier;
use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Default number of downloads allowed in flight at once
pub const MAX_CONCURRENT_DOWNLOADS: usize = 3;

#[derive(Default)]
struct QueueState {
    /// Requests in insertion order
    queue: Vec<DownloadRequest>,
    statuses: HashMap<String, StatusEntry>,
    /// Current attempt per url; events from older attempts are dropped
    attempts: HashMap<String, u64>,
    tasks: HashMap<String, AbortHandle>,
    next_attempt: u64,
    /// Transitions whose reaction has not finished running yet
    in_dispatch: usize,
}

impl QueueState {
    fn contains(&self, url: &str) -> bool {
        self.queue.iter().any(|r| r.url == url)
    }

    fn request(&self, url: &str) -> Option<&DownloadRequest> {
        self.queue.iter().find(|r| r.url == url)
    }

    fn count(&self, status: DownloadStatus) -> usize {
        self.statuses.values().filter(|e| e.status == status).count()
    }
}

struct Inner {
    state: Mutex<QueueState>,
    client: HttpClient,
    notifier: Arc<dyn Notifier>,
    max_concurrent: usize,
    changes: watch::Sender<u64>,
}

/// Bounded-concurrency download queue.
///
/// Owns the ordered request list and one status entry per queued url, and
/// keeps at most `max_concurrent` entries Downloading. Cloning yields another
/// handle to the same queue.
///
/// Methods that may start downloads (`add`, `process`, `start`, `retry`,
/// `remove`) spawn tokio tasks and must be called inside a runtime.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<Inner>,
}

impl DownloadQueue {
    pub fn new(client: HttpClient, notifier: Arc<dyn Notifier>, max_concurrent: usize) -> Self {
        let max_concurrent = if max_concurrent == 0 {
            tracing::warn!("max_concurrent of 0 would stall the queue, using 1");
            1
        } else {
            max_concurrent
        };
        let (changes, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                client,
                notifier,
                max_concurrent,
                changes,
            }),
        }
    }

    /// Queue writing into `config.directory` with the configured limits
    pub fn from_config(
        config: &DownloadConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, DownloadError> {
        let saver = Arc::new(FileSaveStrategy::new(config.directory.clone()));
        tracing::debug!("Saving downloads to {}", saver.directory().display());
        let client = HttpClient::new(config, saver)?;
        Ok(Self::new(client, notifier, config.max_concurrent))
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.inner.notifier.as_ref()
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_changed(&self) {
        self.inner.changes.send_modify(|revision| *revision = revision.wrapping_add(1));
    }

    // ========== Queue Operations ==========

    /// Enqueue one or more urls/requests.
    ///
    /// Urls already queued are skipped unless their entry is Failed, in which
    /// case the entry is re-armed to Pending. Returns true if anything was
    /// inserted or re-armed.
    pub fn add(&self, input: impl Into<DownloadInput>) -> bool {
        let requests = input.into().into_requests();

        let (changed, has_items) = {
            let mut state = self.lock();
            let mut seen = HashSet::new();
            let mut changed = false;

            for request in requests {
                if request.url.trim().is_empty() {
                    tracing::warn!("Ignoring request with empty url");
                    continue;
                }
                if !seen.insert(request.url.clone()) {
                    continue;
                }

                if !state.contains(&request.url) {
                    tracing::debug!("Queued {}", request.url);
                    state.statuses.insert(request.url.clone(), StatusEntry::pending());
                    state.queue.push(request);
                    changed = true;
                    continue;
                }

                let status = state.statuses.get(&request.url).map(|e| e.status);
                if status == Some(DownloadStatus::Failed) {
                    tracing::info!("Re-queued failed download {}", request.url);
                    state.statuses.insert(request.url.clone(), StatusEntry::pending());
                    if let Some(slot) = state.queue.iter_mut().find(|r| r.url == request.url) {
                        *slot = request;
                    }
                    changed = true;
                } else {
                    tracing::debug!("Skipping {}: already queued ({:?})", request.url, status);
                }
            }

            (changed, !state.queue.is_empty())
        };

        if changed {
            self.notify_changed();
        }
        if has_items {
            self.process();
        }
        changed
    }

    /// Admit Pending items in queue order until the concurrency limit is reached.
    pub fn process(&self) {
        let admitted: Vec<(DownloadRequest, StatusEntry)> = {
            let mut state = self.lock();
            let active = state.count(DownloadStatus::Downloading);
            let slots = self.inner.max_concurrent.saturating_sub(active);
            if slots == 0 {
                return;
            }

            let pending: Vec<DownloadRequest> = state
                .queue
                .iter()
                .filter(|r| {
                    state
                        .statuses
                        .get(&r.url)
                        .is_some_and(|e| e.status == DownloadStatus::Pending)
                })
                .take(slots)
                .cloned()
                .collect();

            pending
                .into_iter()
                .filter_map(|request| {
                    let entry = state.statuses.get_mut(&request.url)?;
                    let before = entry.clone();
                    entry.apply(StatusUpdate::status(DownloadStatus::Downloading));
                    Some((request, before))
                })
                .collect()
        };

        if admitted.is_empty() {
            return;
        }
        tracing::debug!("Admitting {} download(s)", admitted.len());
        self.notify_changed();

        for (request, entry) in &admitted {
            state::handle(DownloadStatus::Pending, request, entry, self);
        }
    }

    /// Begin the network transfer for a queued request.
    ///
    /// Returns false if the url is not queued. A running attempt for the same
    /// url is superseded.
    pub fn start(&self, request: &DownloadRequest) -> bool {
        let mut state = self.lock();
        if !state.contains(&request.url) {
            tracing::warn!("Not starting {}: not in queue", request.url);
            return false;
        }

        state.next_attempt += 1;
        let attempt = state.next_attempt;
        state.attempts.insert(request.url.clone(), attempt);

        if let Some(entry) = state.statuses.get_mut(&request.url) {
            if entry.status != DownloadStatus::Downloading {
                entry.apply(StatusUpdate::status(DownloadStatus::Downloading));
            }
        }

        let stream = self.inner.client.download(request);
        let queue = self.clone();
        let handle = tokio::spawn(async move { queue.run_attempt(attempt, stream).await });

        if let Some(previous) = state.tasks.insert(request.url.clone(), handle.abort_handle()) {
            previous.abort();
        }
        drop(state);

        tracing::info!("Starting download: {}", request.url);
        self.notify_changed();
        true
    }

    async fn run_attempt(self, attempt: u64, mut stream: DownloadStream) {
        let url = stream.url().to_string();
        while let Some(event) = stream.next().await {
            let terminal = event.is_terminal();
            let update = match event {
                DownloadEvent::Progress(progress) => StatusUpdate::downloading(progress),
                DownloadEvent::Completed { path, progress } => {
                    StatusUpdate::completed(path, progress)
                }
                DownloadEvent::Failed(e) => {
                    tracing::warn!("Download of {} failed: {}", url, e);
                    StatusUpdate::failed(e.to_string()).with_advice(e.is_retryable(), e.hint())
                }
            };

            if !self.transition(&url, update, Some(attempt)) {
                tracing::debug!("Dropping events of superseded attempt {} for {}", attempt, url);
                return;
            }
            if terminal {
                return;
            }
        }
    }

    /// Remove a url from the queue, aborting its transfer. False if absent.
    pub fn remove(&self, url: &str) -> bool {
        let task = {
            let mut state = self.lock();
            let Some(index) = state.queue.iter().position(|r| r.url == url) else {
                return false;
            };
            state.queue.remove(index);
            state.statuses.remove(url);
            state.attempts.remove(url);
            state.tasks.remove(url)
        };

        if let Some(task) = task {
            task.abort();
        }
        self.inner.client.cancel(url);
        tracing::debug!("Removed {}", url);

        self.notify_changed();
        self.process();
        true
    }

    /// Merge `update` into the entry of a queued url and run the reaction of
    /// the resulting status. Updates for urls not in the queue are ignored,
    /// as are Downloading updates for a url with no transfer running; only
    /// `process()` admits downloads.
    pub fn update_status(&self, url: &str, update: StatusUpdate) -> bool {
        self.transition(url, update, None)
    }

    /// Abort a queued download and drop it from the queue.
    pub fn cancel(&self, url: &str) -> bool {
        let task = {
            let mut state = self.lock();
            if !state.contains(url) {
                return false;
            }
            state.attempts.remove(url);
            state.tasks.remove(url)
        };

        if let Some(task) = task {
            task.abort();
        }
        self.inner.client.cancel(url);

        self.transition(url, StatusUpdate::status(DownloadStatus::Cancelled), None)
    }

    pub fn cancel_all(&self) -> usize {
        let urls: Vec<String> = self.lock().queue.iter().map(|r| r.url.clone()).collect();
        urls.iter().filter(|url| self.cancel(url)).count()
    }

    /// Move a Failed entry back to Pending and let it compete for a slot again.
    pub fn retry(&self, url: &str) -> bool {
        {
            let mut state = self.lock();
            match state.statuses.get_mut(url) {
                Some(entry) if entry.status == DownloadStatus::Failed => {
                    *entry = StatusEntry::pending();
                }
                _ => return false,
            }
        }

        tracing::info!("Retrying {}", url);
        self.notify_changed();
        self.process();
        true
    }

    /// Apply an update and dispatch the resulting status.
    ///
    /// With `attempt`, the update is only applied while that attempt is still
    /// current for the url.
    fn transition(&self, url: &str, update: StatusUpdate, attempt: Option<u64>) -> bool {
        let (request, entry, stale_task) = {
            let mut state = self.lock();
            let Some(request) = state.request(url).cloned() else {
                return false;
            };
            if let Some(attempt) = attempt {
                if state.attempts.get(url) != Some(&attempt) {
                    return false;
                }
            } else if update.status == Some(DownloadStatus::Downloading)
                && !state.attempts.contains_key(url)
            {
                // Only admission may move an entry into a download slot
                tracing::warn!("Ignoring Downloading update for {}: no transfer running", url);
                return false;
            }

            let entry = state
                .statuses
                .entry(url.to_string())
                .or_insert_with(StatusEntry::pending);
            entry.apply(update);
            let entry = entry.clone();

            state.in_dispatch += 1;
            let mut stale_task = None;
            if !entry.status.is_active() {
                state.attempts.remove(url);
                let task = state.tasks.remove(url);
                // The attempt's own task must not abort itself
                if attempt.is_none() {
                    stale_task = task;
                }
            }
            (request, entry, stale_task)
        };

        if let Some(task) = stale_task {
            task.abort();
            self.inner.client.cancel(url);
        }

        self.notify_changed();
        match entry.status {
            DownloadStatus::Pending => self.process(),
            DownloadStatus::Failed => {
                state::handle(entry.status, &request, &entry, self);
                self.process();
            }
            status => state::handle(status, &request, &entry, self),
        }

        self.lock().in_dispatch -= 1;
        self.notify_changed();
        true
    }

    // ========== Inspection ==========

    pub fn status(&self, url: &str) -> Option<StatusEntry> {
        self.lock().statuses.get(url).cloned()
    }

    /// Queued requests with their entries, in queue order
    pub fn snapshot(&self) -> Vec<QueueItem> {
        let state = self.lock();
        state
            .queue
            .iter()
            .map(|request| QueueItem {
                request: request.clone(),
                entry: state
                    .statuses
                    .get(&request.url)
                    .cloned()
                    .unwrap_or_else(StatusEntry::pending),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of entries currently Downloading
    pub fn active_count(&self) -> usize {
        self.lock().count(DownloadStatus::Downloading)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().count(DownloadStatus::Pending)
    }

    /// True when every remaining entry is Failed and no reaction is running.
    ///
    /// Completed and Cancelled entries are removed by their reaction, so
    /// they count as busy until then.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.in_dispatch == 0
            && state
                .statuses
                .values()
                .all(|e| e.status == DownloadStatus::Failed)
    }

    /// Receiver whose value changes on every queue mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Resolve once `is_idle` holds.
    pub async fn wait_idle(&self) {
        let mut changes = self.subscribe();
        loop {
            if self.is_idle() {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{MemoryNotifier, NoticeKind};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        queue: DownloadQueue,
        notifier: Arc<MemoryNotifier>,
        _dir: tempfile::TempDir,
    }

    fn fixture(max_concurrent: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = DownloadConfig {
            directory: dir.path().to_path_buf(),
            max_concurrent,
            ..DownloadConfig::default()
        };
        let notifier = Arc::new(MemoryNotifier::new());
        let queue = DownloadQueue::from_config(&config, notifier.clone()).unwrap();
        Fixture {
            queue,
            notifier,
            _dir: dir,
        }
    }

    async fn slow_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data".to_vec())
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let f = fixture(0);
        assert_eq!(f.queue.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_add_respects_limit() {
        let server = slow_server().await;
        let f = fixture(2);
        let urls: Vec<String> = (0..3).map(|i| format!("{}/f{}", server.uri(), i)).collect();

        assert!(f.queue.add(urls.clone()));

        assert_eq!(f.queue.len(), 3);
        assert_eq!(f.queue.active_count(), 2);
        assert_eq!(f.queue.pending_count(), 1);
        assert_eq!(f.queue.status(&urls[2]).unwrap().status, DownloadStatus::Pending);
        assert_eq!(
            f.notifier.of_kind(NoticeKind::Info).len(),
            2,
            "one start notice per admitted download"
        );
    }

    #[tokio::test]
    async fn test_add_duplicate_returns_false() {
        let server = slow_server().await;
        let f = fixture(3);
        let url = format!("{}/x", server.uri());

        assert!(f.queue.add(url.as_str()));
        assert!(!f.queue.add(url.as_str()));
        assert_eq!(f.queue.len(), 1);

        // duplicates inside one call collapse too
        assert!(!f.queue.add(vec![url.as_str(), url.as_str()]));
        assert_eq!(f.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let f = fixture(3);
        assert!(!f.queue.remove("https://example.invalid/none"));
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_remove_admits_next() {
        let server = slow_server().await;
        let f = fixture(1);
        let a = format!("{}/a", server.uri());
        let b = format!("{}/b", server.uri());

        f.queue.add(vec![a.clone(), b.clone()]);
        assert_eq!(f.queue.status(&b).unwrap().status, DownloadStatus::Pending);

        assert!(f.queue.remove(&a));
        assert_eq!(f.queue.len(), 1);
        assert!(f.queue.status(&a).is_none());
        assert_eq!(f.queue.status(&b).unwrap().status, DownloadStatus::Downloading);
    }

    #[tokio::test]
    async fn test_update_status_ignores_unqueued() {
        let f = fixture(3);
        assert!(!f.queue.update_status(
            "https://example.invalid/ghost",
            StatusUpdate::status(DownloadStatus::Failed)
        ));
        assert!(f.queue.status("https://example.invalid/ghost").is_none());
    }

    #[tokio::test]
    async fn test_update_status_failed_notifies_and_keeps_entry() {
        let server = slow_server().await;
        let f = fixture(1);
        let url = format!("{}/a", server.uri());
        f.queue.add(url.as_str());

        assert!(f.queue.update_status(&url, StatusUpdate::failed("disk full")));

        let entry = f.queue.status(&url).unwrap();
        assert_eq!(entry.status, DownloadStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("disk full"));
        let errors = f.notifier.of_kind(NoticeKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("disk full"));
        assert!(f.queue.is_idle());
    }

    #[tokio::test]
    async fn test_downloading_update_does_not_mutate_queue() {
        let server = slow_server().await;
        let f = fixture(1);
        let url = format!("{}/a", server.uri());
        f.queue.add(url.as_str());
        let before = f.notifier.notices().len();

        let progress = crate::download::task::Progress::new(10, Some(100));
        assert!(f.queue.update_status(&url, StatusUpdate::downloading(progress)));

        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.queue.status(&url).unwrap().progress.percentage, 10);
        assert_eq!(f.notifier.notices().len(), before);
    }

    #[tokio::test]
    async fn test_downloading_update_without_transfer_is_rejected() {
        let server = slow_server().await;
        let f = fixture(1);
        let a = format!("{}/a", server.uri());
        let b = format!("{}/b", server.uri());
        f.queue.add(vec![a.clone(), b.clone()]);

        let progress = crate::download::task::Progress::new(10, Some(100));
        assert!(!f.queue.update_status(&b, StatusUpdate::downloading(progress)));

        let entry = f.queue.status(&b).unwrap();
        assert_eq!(entry.status, DownloadStatus::Pending);
        assert_eq!(entry.progress.loaded, 0);
        assert_eq!(f.queue.active_count(), 1);

        // the slot held by `a` still goes to `b` once `a` is gone
        f.queue.cancel(&a);
        assert_eq!(f.queue.status(&b).unwrap().status, DownloadStatus::Downloading);
    }

    #[tokio::test]
    async fn test_downloading_update_on_failed_entry_is_rejected() {
        let server = slow_server().await;
        let f = fixture(1);
        let url = format!("{}/a", server.uri());
        f.queue.add(url.as_str());
        f.queue.update_status(&url, StatusUpdate::failed("boom"));

        assert!(!f.queue.update_status(&url, StatusUpdate::status(DownloadStatus::Downloading)));
        assert_eq!(f.queue.status(&url).unwrap().status, DownloadStatus::Failed);
        assert_eq!(f.queue.active_count(), 0);
        assert!(f.queue.is_idle());
    }

    #[tokio::test]
    async fn test_retry_only_for_failed() {
        let server = slow_server().await;
        let f = fixture(1);
        let url = format!("{}/a", server.uri());
        f.queue.add(url.as_str());

        assert!(!f.queue.retry(&url));
        f.queue.update_status(&url, StatusUpdate::failed("boom"));

        assert!(f.queue.retry(&url));
        let entry = f.queue.status(&url).unwrap();
        assert_eq!(entry.status, DownloadStatus::Downloading);
        assert_eq!(entry.error, None);
    }

    #[tokio::test]
    async fn test_cancel_removes_and_notifies() {
        let server = slow_server().await;
        let f = fixture(1);
        let a = format!("{}/a", server.uri());
        let b = format!("{}/b", server.uri());
        f.queue.add(vec![a.clone(), b.clone()]);

        assert!(f.queue.cancel(&a));
        assert!(!f.queue.cancel(&a));

        assert!(f.queue.status(&a).is_none());
        assert_eq!(f.queue.status(&b).unwrap().status, DownloadStatus::Downloading);
        assert!(
            f.notifier
                .of_kind(NoticeKind::Info)
                .iter()
                .any(|n| n.url == a && n.message.contains("cancelled"))
        );
    }

    #[tokio::test]
    async fn test_cancel_all_empties_queue() {
        let server = slow_server().await;
        let f = fixture(2);
        let urls: Vec<String> = (0..4).map(|i| format!("{}/f{}", server.uri(), i)).collect();
        f.queue.add(urls);

        assert_eq!(f.queue.cancel_all(), 4);
        assert!(f.queue.is_empty());
        assert!(f.queue.is_idle());
    }

    #[tokio::test]
    async fn test_snapshot_in_queue_order() {
        let server = slow_server().await;
        let f = fixture(1);
        let urls: Vec<String> = ["c", "a", "b"]
            .iter()
            .map(|n| format!("{}/{}", server.uri(), n))
            .collect();
        f.queue.add(urls.clone());

        let snapshot = f.queue.snapshot();
        assert_eq!(
            snapshot.iter().map(|i| i.request.url.clone()).collect::<Vec<_>>(),
            urls
        );
        assert_eq!(snapshot[0].entry.status, DownloadStatus::Downloading);
        assert_eq!(snapshot[1].entry.status, DownloadStatus::Pending);
    }

    #[tokio::test]
    async fn test_start_unqueued_is_refused() {
        let f = fixture(1);
        assert!(!f.queue.start(&DownloadRequest::new("https://example.invalid/x")));
    }

    #[tokio::test]
    async fn test_subscribe_ticks_on_change() {
        let server = slow_server().await;
        let f = fixture(1);
        let mut changes = f.queue.subscribe();

        f.queue.add(format!("{}/a", server.uri()));

        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_completed_download_is_removed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/done.webm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"done".to_vec()))
            .mount(&server)
            .await;
        let f = fixture(3);
        let url = format!("{}/done.webm", server.uri());

        f.queue.add(url.as_str());
        tokio::time::timeout(Duration::from_secs(5), f.queue.wait_idle())
            .await
            .unwrap();

        assert!(f.queue.is_empty());
        let successes = f.notifier.of_kind(NoticeKind::Success);
        assert_eq!(successes.len(), 1);
        let saved = successes[0].path.clone().unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"done");
    }
}
