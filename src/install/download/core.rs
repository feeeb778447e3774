//! Installer artifact download with retry, backoff, and progress tracking

use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::InstallerError;
use crate::install::progress::{DownloadPhase, InstallProgress};

const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(10); // Initial connection
const DOWNLOAD_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120); // No data received
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Server errors worth another attempt; everything else non-2xx fails at once
const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Seam between the supervisor and the network
pub trait ArtifactFetcher: Send + Sync {
    /// Make sure `destination` exists, downloading `url` if it does not
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        chunk_size: usize,
        max_retries: u32,
    ) -> impl Future<Output = Result<(), InstallerError>> + Send;
}

impl<T: ArtifactFetcher> ArtifactFetcher for &T {
    fn fetch(
        &self,
        url: &str,
        destination: &Path,
        chunk_size: usize,
        max_retries: u32,
    ) -> impl Future<Output = Result<(), InstallerError>> + Send {
        (**self).fetch(url, destination, chunk_size, max_retries)
    }
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

/// HTTP download manager
pub struct Downloader {
    client: reqwest::Client,
    backoff_base: Duration,
    progress_tx: Option<mpsc::Sender<InstallProgress>>,
    progress_disabled: AtomicBool,
}

impl Downloader {
    pub fn new() -> Result<Self, InstallerError> {
        let client = reqwest::Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .user_agent(concat!("ollama-installer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InstallerError::Process(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            backoff_base: DEFAULT_BACKOFF_BASE,
            progress_tx: None,
            progress_disabled: AtomicBool::new(false),
        })
    }

    /// Base delay for exponential backoff (`base * 2^(attempt-1)`)
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<InstallProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Best-effort progress: a closed channel disables further updates, a
    /// full one drops this update.
    fn send_progress(&self, progress: InstallProgress) {
        if self.progress_disabled.load(Ordering::Relaxed) {
            return;
        }

        if let Some(ref tx) = self.progress_tx
            && let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(progress)
        {
            warn!("Progress channel closed, continuing download without updates");
            self.progress_disabled.store(true, Ordering::Relaxed);
        }
    }

    async fn attempt(
        &self,
        url: &str,
        part_path: &Path,
        chunk_size: usize,
        attempt: u32,
    ) -> Result<(), AttemptError> {
        self.send_progress(InstallProgress::download(attempt, 0, None, DownloadPhase::Connecting));

        let response = self.client.get(url).send().await.map_err(classify_transport)?;

        let status = response.status();
        if RETRYABLE_STATUSES.contains(&status.as_u16()) {
            return Err(AttemptError::Retryable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(format!("HTTP {status}")));
        }

        let total_bytes = response.content_length();
        let mut file = tokio::fs::File::create(part_path).await.map_err(|e| {
            AttemptError::Fatal(format!("cannot create {}: {e}", part_path.display()))
        })?;

        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        loop {
            let chunk = match timeout(DOWNLOAD_INACTIVITY_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return Err(classify_transport(e)),
                Ok(None) => break,
                Err(_) => {
                    return Err(AttemptError::Retryable(format!(
                        "no data received for {} seconds ({downloaded} bytes written)",
                        DOWNLOAD_INACTIVITY_TIMEOUT.as_secs()
                    )));
                }
            };

            for piece in chunk.chunks(chunk_size) {
                file.write_all(piece)
                    .await
                    .map_err(|e| AttemptError::Fatal(format!("write failed: {e}")))?;
                downloaded += piece.len() as u64;
                self.send_progress(InstallProgress::download(
                    attempt,
                    downloaded,
                    total_bytes,
                    DownloadPhase::Downloading,
                ));
            }
        }

        file.flush()
            .await
            .map_err(|e| AttemptError::Fatal(format!("flush failed: {e}")))?;

        if let Some(total) = total_bytes
            && downloaded != total
        {
            return Err(AttemptError::Retryable(format!(
                "body ended after {downloaded} of {total} bytes"
            )));
        }

        Ok(())
    }
}

impl ArtifactFetcher for Downloader {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        chunk_size: usize,
        max_retries: u32,
    ) -> Result<(), InstallerError> {
        if destination.exists() {
            debug!("{} already exists, skipping download", destination.display());
            self.send_progress(InstallProgress::download(0, 0, None, DownloadPhase::Skipped));
            return Ok(());
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part_path = part_path(destination);
        let chunk_size = chunk_size.max(1);
        let max_retries = max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(url, &part_path, chunk_size, attempt).await {
                Ok(()) => break,
                Err(AttemptError::Retryable(cause)) if attempt < max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Download attempt {attempt}/{max_retries} failed ({cause}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Retryable(cause)) | Err(AttemptError::Fatal(cause)) => {
                    let _ = tokio::fs::remove_file(&part_path).await;
                    return Err(InstallerError::Connection {
                        url: url.to_string(),
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }

        tokio::fs::rename(&part_path, destination).await?;
        self.send_progress(InstallProgress::download(attempt, 0, None, DownloadPhase::Complete));
        Ok(())
    }
}

fn classify_transport(e: reqwest::Error) -> AttemptError {
    if e.is_connect() || e.is_timeout() || e.is_body() || e.is_request() || e.is_decode() {
        AttemptError::Retryable(e.to_string())
    } else {
        AttemptError::Fatal(e.to_string())
    }
}

/// In-flight download target next to the final destination
fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Hash `path` with SHA-256 and compare against `expected` (hex, any case)
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), InstallerError> {
    let owned = path.to_path_buf();
    let actual = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut file = std::fs::File::open(&owned)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| InstallerError::Process(format!("checksum task failed: {e}")))??;

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(InstallerError::IntegrityMismatch {
            path: path.to_path_buf(),
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_downloader() -> Downloader {
        Downloader::new()
            .unwrap()
            .with_backoff_base(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn existing_destination_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("OllamaSetup.exe");
        std::fs::write(&dest, b"already here").unwrap();

        let url = format!("{}/OllamaSetup.exe", server.uri());
        fast_downloader().fetch(&url, &dest, 1024, 5).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn retries_transient_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();

        Mock::given(method("GET"))
            .and(path("/OllamaSetup.exe"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/OllamaSetup.exe"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("OllamaSetup.exe");
        let url = format!("{}/OllamaSetup.exe", server.uri());

        fast_downloader().fetch(&url, &dest, 1024, 3).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("OllamaSetup.exe");
        let url = format!("{}/OllamaSetup.exe", server.uri());

        let err = fast_downloader().fetch(&url, &dest, 1024, 4).await.unwrap_err();
        match err {
            InstallerError::Connection { attempts, cause, .. } => {
                assert_eq!(attempts, 4);
                assert!(cause.contains("500"), "{cause}");
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("OllamaSetup.exe");
        let url = format!("{}/missing", server.uri());

        let err = fast_downloader().fetch(&url, &dest, 1024, 5).await.unwrap_err();
        assert!(matches!(err, InstallerError::Connection { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn reports_cumulative_progress_in_chunks() {
        let server = MockServer::start().await;
        let body = vec![7u8; 2500];
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("OllamaSetup.exe");
        let url = format!("{}/OllamaSetup.exe", server.uri());

        let (tx, mut rx) = mpsc::channel(1024);
        fast_downloader()
            .with_progress(tx)
            .fetch(&url, &dest, 1000, 1)
            .await
            .unwrap();

        let mut downloading = Vec::new();
        while let Ok(update) = rx.try_recv() {
            if let Some(meta) = update.download_metadata
                && meta.phase == DownloadPhase::Downloading
            {
                downloading.push((meta.bytes_downloaded, meta.total_bytes));
            }
        }

        assert!(downloading.len() >= 3);
        assert!(downloading.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(downloading.last(), Some(&(2500, Some(2500))));
    }

    /// One-shot HTTP/1.1 server that streams `chunks` with chunked transfer
    /// encoding, so the response carries no `Content-Length`.
    async fn serve_chunked(chunks: Vec<Vec<u8>>) -> String {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            for chunk in chunks {
                socket
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(&chunk).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{addr}/OllamaSetup.exe")
    }

    #[tokio::test]
    async fn unknown_length_reports_indeterminate_progress() {
        let url = serve_chunked(vec![vec![1u8; 700], vec![2u8; 700], vec![3u8; 600]]).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("OllamaSetup.exe");

        let (tx, mut rx) = mpsc::channel(1024);
        fast_downloader()
            .with_progress(tx)
            .fetch(&url, &dest, 1000, 1)
            .await
            .unwrap();

        let mut downloading = Vec::new();
        while let Ok(update) = rx.try_recv() {
            if let Some(meta) = update.download_metadata
                && meta.phase == DownloadPhase::Downloading
            {
                downloading.push((meta.bytes_downloaded, meta.total_bytes));
            }
        }

        assert!(downloading.len() >= 3, "{downloading:?}");
        assert!(downloading.iter().all(|(_, total)| total.is_none()));
        assert!(downloading.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(downloading.last().map(|d| d.0), Some(2000));
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 2000);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("artifact");
        std::fs::write(&file, b"hello").unwrap();

        // sha256("hello")
        let good = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        verify_sha256(&file, &good.to_uppercase()).await.unwrap();

        let err = verify_sha256(&file, "00").await.unwrap_err();
        assert!(matches!(err, InstallerError::IntegrityMismatch { .. }));
    }
}
