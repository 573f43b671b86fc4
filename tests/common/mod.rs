use recq::app::config::DownloadConfig;
use recq::download::queue::DownloadQueue;
use recq::download::task::DownloadStatus;
use recq::notify::MemoryNotifier;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mount a GET handler for `file_path` returning `content` after `delay`
pub async fn mount_file(server: &MockServer, file_path: &str, content: Vec<u8>, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content)
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Setup a mock server for a specific file path with custom content
#[allow(dead_code)]
pub async fn setup_mock_file_server(file_path: &str, content: Vec<u8>) -> (MockServer, String) {
    let server = MockServer::start().await;
    mount_file(&server, file_path, content, Duration::ZERO).await;
    let uri = server.uri();
    (server, uri)
}

/// Setup a mock server whose every GET takes `delay` to answer.
/// Keeps downloads Downloading long enough to observe admission.
#[allow(dead_code)]
pub async fn setup_slow_server(delay: Duration) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    let uri = server.uri();
    (server, uri)
}

/// Setup a mock server that returns HTTP errors
#[allow(dead_code)]
pub async fn setup_error_mock_server(status_code: u16) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status_code))
        .mount(&server)
        .await;
    let uri = server.uri();
    (server, uri)
}

/// A queue saving into a private temp directory, recording its notices
pub struct TestQueue {
    pub queue: DownloadQueue,
    pub notifier: Arc<MemoryNotifier>,
    pub dir: TempDir,
}

pub fn create_test_queue(max_concurrent: usize) -> TestQueue {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = DownloadConfig {
        directory: dir.path().to_path_buf(),
        max_concurrent,
        progress_interval_ms: 0,
        ..DownloadConfig::default()
    };
    let notifier = Arc::new(MemoryNotifier::new());
    let queue = DownloadQueue::from_config(&config, notifier.clone()).expect("queue");
    TestQueue {
        queue,
        notifier,
        dir,
    }
}

/// Helper to wait for a url to reach a specific status
#[allow(dead_code)]
pub async fn wait_for_status(
    queue: &DownloadQueue,
    url: &str,
    expected_status: DownloadStatus,
    timeout_secs: u64,
) -> Result<(), String> {
    let mut changes = queue.subscribe();
    tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        loop {
            if queue.status(url).map(|e| e.status) == Some(expected_status) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .map_err(|_| format!("Timeout waiting for {} to become {:?}", url, expected_status))
}

/// Helper to wait for a url to leave the queue
#[allow(dead_code)]
pub async fn wait_for_removal(queue: &DownloadQueue, url: &str, timeout_secs: u64) -> Result<(), String> {
    let mut changes = queue.subscribe();
    tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        while queue.status(url).is_some() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .map_err(|_| format!("Timeout waiting for {} to leave the queue", url))
}

#[allow(dead_code)]
pub async fn wait_until_idle(queue: &DownloadQueue, timeout_secs: u64) -> Result<(), String> {
    tokio::time::timeout(Duration::from_secs(timeout_secs), queue.wait_idle())
        .await
        .map_err(|_| "Timeout waiting for the queue to become idle".to_string())
}

/// Generate test file content of a specific size
#[allow(dead_code)]
pub fn generate_test_content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Helper to verify file contents match expected
#[allow(dead_code)]
pub fn verify_file_content(path: &std::path::Path, expected: &[u8]) -> Result<(), String> {
    let content = std::fs::read(path).map_err(|e| format!("Failed to read file: {}", e))?;

    if content == expected {
        Ok(())
    } else {
        Err(format!(
            "File content mismatch: expected {} bytes, got {} bytes",
            expected.len(),
            content.len()
        ))
    }
}
