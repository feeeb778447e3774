//! Installer error taxonomy
//!
//! Fatal conditions (transport, missing artifact, nonzero installer exit)
//! surface as variants here. Already-satisfied states such as "service not
//! running" are outcomes, not errors, and never appear in this enum.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    /// Download transport failure after retries were exhausted
    #[error("failed to download {url} after {attempts} attempt(s): {cause}")]
    Connection {
        url: String,
        attempts: u32,
        cause: String,
    },

    /// No installer binary present when installation was attempted
    #[error("installer artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Installer exited with a nonzero code
    #[error("installer exited with code {exit_code}: {stderr}")]
    Installation { exit_code: i32, stderr: String },

    /// Elevation was refused or the privileged sub-invocation failed
    #[error("privileged operation failed: {0}")]
    Privilege(String),

    /// Artifact content does not match the configured SHA-256
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// A helper command (process table query, launcher, model CLI) failed
    #[error("{0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InstallerError {
    /// Whether orchestration may continue after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, InstallerError::Privilege(_))
    }
}
