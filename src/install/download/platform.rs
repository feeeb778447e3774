//! Platform detection for installer artifact selection

use once_cell::sync::OnceCell;

use crate::config::ARTIFACT_STEM;
use crate::error::InstallerError;

/// Platforms with a non-interactive installer artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows, // Inno Setup executable
    Linux,   // install.sh shell installer
}

/// Global cache for platform detection (initialized once, used everywhere)
static PLATFORM_CACHE: OnceCell<Platform> = OnceCell::new();

impl Platform {
    /// Detect current platform (cached after first call)
    pub fn detect() -> Result<Self, InstallerError> {
        PLATFORM_CACHE
            .get_or_try_init(|| Self::from_os(std::env::consts::OS))
            .copied()
    }

    fn from_os(os: &str) -> Result<Self, InstallerError> {
        match os {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            other => Err(InstallerError::UnsupportedPlatform(format!(
                "no silent installer is published for {other}"
            ))),
        }
    }

    /// Installer file extension for this platform
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            Platform::Windows => "exe",
            Platform::Linux => "sh",
        }
    }

    /// `OllamaSetup.<ext>`
    pub fn artifact_file_name(&self) -> String {
        format!("{ARTIFACT_STEM}.{}", self.artifact_extension())
    }

    pub fn download_url(&self) -> &'static str {
        match self {
            Platform::Windows => "https://ollama.com/download/OllamaSetup.exe",
            Platform::Linux => "https://ollama.com/install.sh",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names() {
        assert_eq!(Platform::Windows.artifact_file_name(), "OllamaSetup.exe");
        assert_eq!(Platform::Linux.artifact_file_name(), "OllamaSetup.sh");
    }

    #[test]
    fn unsupported_os_is_an_error() {
        assert!(matches!(
            Platform::from_os("haiku"),
            Err(InstallerError::UnsupportedPlatform(_))
        ));
    }
}
