//! Installer download with throttled progress and cancellation.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, StatusCode};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::UpgradeConfig;
use crate::error::{DownloadError, UpgradeError, UpgradeResult};
use crate::host::ProgressSink;

/// Maximum number of redirects followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Progress information during download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far
    pub received: u64,
    /// Total bytes expected, when the server announced it
    pub total: Option<u64>,
    /// Percentage points gained since the previous update
    pub increment_percent: Option<f64>,
    /// Set on the single end-of-stream update
    pub finished: bool,
}

impl DownloadProgress {
    /// Download progress as a percentage (0-100), if the size is known.
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total?;
        Some((self.received as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Human-readable status line.
    pub fn message(&self) -> String {
        match self.total {
            Some(total) => format!("{} / {}", format_bytes(self.received), format_bytes(total)),
            None => format_bytes(self.received),
        }
    }
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Byte counters of one download, deciding when progress is worth reporting.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    total_expected: Option<u64>,
    total_received: u64,
    last_reported_received: u64,
    threshold: f64,
    indeterminate_step: u64,
    finished: bool,
}

impl ProgressThrottle {
    /// `threshold` is the fraction of `total_expected` that must accumulate
    /// between updates; `indeterminate_step` is used when the total is unknown.
    pub fn new(total_expected: Option<u64>, threshold: f64, indeterminate_step: u64) -> Self {
        Self {
            total_expected: total_expected.filter(|total| *total > 0),
            total_received: 0,
            last_reported_received: 0,
            threshold,
            indeterminate_step,
            finished: false,
        }
    }

    pub fn total_expected(&self) -> Option<u64> {
        self.total_expected
    }

    pub fn received(&self) -> u64 {
        self.total_received
    }

    /// Account for a chunk; returns an update when the delta since the last
    /// report exceeds the threshold.
    pub fn advance(&mut self, chunk_len: u64) -> Option<DownloadProgress> {
        self.total_received += chunk_len;
        let delta = self.total_received - self.last_reported_received;

        let due = match self.total_expected {
            Some(total) => delta as f64 > self.threshold * total as f64,
            None => delta > self.indeterminate_step,
        };

        due.then(|| self.report(false))
    }

    /// The end-of-stream update. Returns `None` if already emitted.
    pub fn finish(&mut self) -> Option<DownloadProgress> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.report(true))
    }

    fn report(&mut self, finished: bool) -> DownloadProgress {
        let delta = self.total_received - self.last_reported_received;
        self.last_reported_received = self.total_received;

        DownloadProgress {
            received: self.total_received,
            total: self.total_expected,
            increment_percent: self
                .total_expected
                .map(|total| delta as f64 / total as f64 * 100.0),
            finished,
        }
    }
}

/// Naming hint for the temporary installer file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempFileHint {
    pub prefix: String,
    pub suffix: String,
}

impl TempFileHint {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }
}

impl Default for TempFileHint {
    fn default() -> Self {
        Self::new("cmake-upgrade-", ".sh")
    }
}

/// A fully downloaded installer. The file is deleted when this is dropped.
#[derive(Debug)]
pub struct DownloadedArtifact {
    path: TempPath,
    bytes: u64,
}

impl DownloadedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the downloaded file.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Delete the file now, reporting failures.
    pub fn discard(self) -> std::io::Result<()> {
        self.path.close()
    }
}

/// Downloads installer artifacts into owner-only temp files.
#[derive(Clone)]
pub struct ArtifactDownloader {
    client: Client,
    temp_dir: PathBuf,
    threshold: f64,
    indeterminate_step: u64,
}

impl ArtifactDownloader {
    /// Create a downloader with an HTTP client built from `config`.
    pub fn new(config: &UpgradeConfig) -> UpgradeResult<Self> {
        let client = create_client_builder(config)
            .build()
            .map_err(UpgradeError::HttpClient)?;
        Ok(Self::with_client(client, config))
    }

    /// Create a downloader around an existing client.
    pub fn with_client(client: Client, config: &UpgradeConfig) -> Self {
        Self {
            client,
            temp_dir: config
                .download_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            threshold: config.progress_threshold,
            indeterminate_step: config.indeterminate_step_bytes,
        }
    }

    /// Download `url` into a fresh temp file.
    ///
    /// On failure or cancellation the temp file is removed before the error
    /// is returned.
    pub async fn download(
        &self,
        url: &str,
        hint: &TempFileHint,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DownloadedArtifact, DownloadError> {
        let (file, path) = self.create_temp_file(hint)?.into_parts();
        debug!(url, path = %path.display(), "Starting download");

        match self
            .fetch_into(url, tokio::fs::File::from_std(file), progress, cancel)
            .await
        {
            Ok(bytes) => {
                info!(url, bytes, path = %path.display(), "Download finished");
                Ok(DownloadedArtifact { path, bytes })
            }
            Err(e) => {
                let shown = path.display().to_string();
                if let Err(rm) = path.close() {
                    warn!(path = %shown, error = %rm, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    fn create_temp_file(&self, hint: &TempFileHint) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&hint.prefix).suffix(&hint.suffix);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(std::fs::Permissions::from_mode(0o700));
        }

        builder.tempfile_in(&self.temp_dir)
    }

    async fn fetch_into(
        &self,
        url: &str,
        mut file: tokio::fs::File,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.client.get(url).send() => response?,
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::NonSuccessStatus {
                status: status.as_u16(),
            });
        }

        let total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let mut throttle = ProgressThrottle::new(total, self.threshold, self.indeterminate_step);
        if throttle.total_expected().is_none() {
            debug!(url, "No usable Content-Length, progress is indeterminate");
        }

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(url, received = throttle.received(), "Download cancelled");
                    return Err(DownloadError::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            if let Some(update) = throttle.advance(chunk.len() as u64) {
                progress.report(&update);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(update) = throttle.finish() {
            progress.report(&update);
        }

        Ok(throttle.received())
    }
}

/// HTTP client builder shared by the downloader and the release feed.
pub(crate) fn create_client_builder(config: &UpgradeConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(concat!("cmake-upgrade/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .tcp_nodelay(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<DownloadProgress>>,
    }

    impl ProgressSink for Recorder {
        fn report(&self, progress: &DownloadProgress) {
            self.updates.lock().unwrap().push(*progress);
        }
    }

    impl Recorder {
        fn updates(&self) -> Vec<DownloadProgress> {
            self.updates.lock().unwrap().clone()
        }
    }

    fn downloader(dir: &Path) -> ArtifactDownloader {
        let config = UpgradeConfig {
            download_dir: Some(dir.to_path_buf()),
            ..UpgradeConfig::default()
        };
        ArtifactDownloader::new(&config).unwrap()
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(1073741824), "1.0 GB");
    }

    #[test]
    fn test_progress_message() {
        let progress = DownloadProgress {
            received: 50_000_000,
            total: Some(100_000_000),
            increment_percent: None,
            finished: false,
        };
        assert!((progress.percentage().unwrap() - 50.0).abs() < 0.01);
        assert_eq!(progress.message(), "47.7 MB / 95.4 MB");
    }

    #[test]
    fn test_throttle_ten_chunks() {
        let mut throttle = ProgressThrottle::new(Some(100), 0.01, 1024);
        let updates: Vec<_> = (0..10).filter_map(|_| throttle.advance(10)).collect();

        assert_eq!(updates.len(), 10);
        for (i, update) in updates.iter().enumerate() {
            assert_eq!(update.received, (i as u64 + 1) * 10);
            assert_eq!(update.increment_percent, Some(10.0));
            assert!(!update.finished);
        }

        let last = throttle.finish().unwrap();
        assert!(last.finished);
        assert_eq!(last.received, 100);
        assert_eq!(last.increment_percent, Some(0.0));
        assert!(throttle.finish().is_none());
    }

    #[test]
    fn test_throttle_skips_small_deltas() {
        let mut throttle = ProgressThrottle::new(Some(1000), 0.01, 1024);
        let updates: Vec<_> = (0..1000).filter_map(|_| throttle.advance(1)).collect();

        // Each update needs strictly more than 10 bytes since the previous one.
        assert_eq!(updates.len(), 90);
        let mut last = 0;
        for update in &updates {
            assert!(update.received - last > 10);
            last = update.received;
        }

        let done = throttle.finish().unwrap();
        assert_eq!(done.received, 1000);
        assert!(done.finished);
    }

    #[test]
    fn test_throttle_indeterminate() {
        for total in [None, Some(0)] {
            let mut throttle = ProgressThrottle::new(total, 0.01, 100);
            let updates: Vec<_> = (0..10).filter_map(|_| throttle.advance(30)).collect();

            assert_eq!(
                updates.iter().map(|u| u.received).collect::<Vec<_>>(),
                vec![120, 240]
            );
            assert!(updates.iter().all(|u| u.increment_percent.is_none()));

            let done = throttle.finish().unwrap();
            assert_eq!(done.received, 300);
            assert_eq!(done.total, None);
        }
    }

    #[tokio::test]
    async fn test_download_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cmake.sh"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::default();
        let artifact = downloader(dir.path())
            .download(
                &format!("{}/cmake.sh", server.uri()),
                &TempFileHint::new("cmake-3.19.2-", ".sh"),
                &recorder,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(artifact.bytes(), 4096);
        assert_eq!(std::fs::read(artifact.path()).unwrap(), vec![7u8; 4096]);
        let name = artifact.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("cmake-3.19.2-") && name.ends_with(".sh"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(artifact.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }

        let updates = recorder.updates();
        assert_eq!(updates.iter().filter(|u| u.finished).count(), 1);
        let last = updates.last().unwrap();
        assert!(last.finished);
        assert_eq!(last.total, Some(4096));
        assert_eq!(last.percentage(), Some(100.0));

        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_download_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/real.sh", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/real.sh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#!/bin/sh\n"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let artifact = downloader(dir.path())
            .download(
                &format!("{}/latest", server.uri()),
                &TempFileHint::default(),
                &Recorder::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(artifact.path()).unwrap(), "#!/bin/sh\n");
    }

    #[tokio::test]
    async fn test_non_success_status_removes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let result = downloader(dir.path())
            .download(
                &format!("{}/missing.sh", server.uri()),
                &TempFileHint::default(),
                &Recorder::default(),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::NonSuccessStatus { status: 404 })
        ));
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_cancel_before_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = downloader(dir.path())
            .download(
                &format!("{}/cmake.sh", server.uri()),
                &TempFileHint::default(),
                &Recorder::default(),
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4 * 1024 * 1024]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sink = move |_: &DownloadProgress| trigger.cancel();

        let result = downloader(dir.path())
            .download(
                &format!("{}/cmake.sh", server.uri()),
                &TempFileHint::default(),
                &sink,
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(dir_is_empty(dir.path()));
    }

    #[tokio::test]
    async fn test_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = downloader(dir.path())
            .download(
                "http://127.0.0.1:1/cmake.sh",
                &TempFileHint::default(),
                &Recorder::default(),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(DownloadError::Transport(_))));
        assert!(dir_is_empty(dir.path()));
    }
}
