//! Installation progress tracking with download metadata

/// Download phase for the installer artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPhase {
    Skipped,     // Artifact already present on disk
    Connecting,  // Request issued, waiting for response headers
    Downloading, // Body bytes streaming to disk
    Verifying,   // Checksum verification
    Complete,    // Artifact in place
}

/// Byte counters for a running download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadMetadata {
    /// Attempt number, 1-based
    pub attempt: u32,

    /// Bytes written so far
    pub bytes_downloaded: u64,

    /// `Content-Length`, when the server sent one
    pub total_bytes: Option<u64>,

    pub phase: DownloadPhase,
}

/// Installation progress update
#[derive(Debug, Clone)]
pub struct InstallProgress {
    pub step: String,
    pub message: String,
    pub is_error: bool,

    /// Download-specific metadata (download and checksum phases)
    pub download_metadata: Option<DownloadMetadata>,
}

impl InstallProgress {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            is_error: false,
            download_metadata: None,
        }
    }

    pub fn error(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(step, message)
        }
    }

    /// Create download progress with metadata
    pub fn download(
        attempt: u32,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
        phase: DownloadPhase,
    ) -> Self {
        let message = match phase {
            DownloadPhase::Skipped => "Installer already present, skipping download".to_string(),
            DownloadPhase::Connecting => format!("Connecting (attempt {attempt})..."),
            DownloadPhase::Downloading => {
                let mb_downloaded = bytes_downloaded as f64 / 1_048_576.0;
                match total_bytes {
                    Some(total) if total > 0 => {
                        let percent = bytes_downloaded.saturating_mul(100) / total;
                        format!(
                            "Downloading ({:.1} MB / {:.1} MB) - {}%",
                            mb_downloaded,
                            total as f64 / 1_048_576.0,
                            percent
                        )
                    }
                    _ => format!("Downloading ({mb_downloaded:.1} MB)"),
                }
            }
            DownloadPhase::Verifying => "Verifying checksum...".to_string(),
            DownloadPhase::Complete => "Download complete".to_string(),
        };

        Self {
            step: "download".to_string(),
            message,
            is_error: false,
            download_metadata: Some(DownloadMetadata {
                attempt,
                bytes_downloaded,
                total_bytes,
                phase,
            }),
        }
    }
}
