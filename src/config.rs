//! Installer configuration
//!
//! `InstallationConfig` is the immutable value every component reads.
//! `Settings` is the optional TOML file layered underneath CLI flags.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Final path segment every install directory ends with
pub const PRODUCT_DIR_NAME: &str = "Ollama";

/// File stem of the staged installer artifact (`OllamaSetup.<ext>`)
pub const ARTIFACT_STEM: &str = "OllamaSetup";

pub const DEFAULT_MODE: &str = "silent";
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Immutable installation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationConfig {
    install_dir: Option<PathBuf>,
    installer_artifact_path: Option<PathBuf>,
    models_path: Option<PathBuf>,
    mode: Option<String>,
    debug: bool,
    download_url: Option<String>,
    max_retries: u32,
    chunk_size: usize,
    expected_sha256: Option<String>,
    non_interactive: bool,
}

impl InstallationConfig {
    pub fn builder() -> InstallationConfigBuilder {
        InstallationConfigBuilder::default()
    }

    /// Normalized install directory, if one was supplied
    pub fn install_dir(&self) -> Option<&Path> {
        self.install_dir.as_deref()
    }

    /// Install directory to stage artifacts in: the supplied one, or the platform default
    pub fn effective_install_dir(&self) -> PathBuf {
        self.install_dir
            .clone()
            .unwrap_or_else(default_install_dir)
    }

    pub fn installer_artifact_path(&self) -> Option<&Path> {
        self.installer_artifact_path.as_deref()
    }

    pub fn models_path(&self) -> Option<&Path> {
        self.models_path.as_deref()
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn expected_sha256(&self) -> Option<&str> {
        self.expected_sha256.as_deref()
    }

    pub fn non_interactive(&self) -> bool {
        self.non_interactive
    }
}

/// Builder for [`InstallationConfig`]; `build` applies normalization.
#[derive(Debug, Clone, Default)]
pub struct InstallationConfigBuilder {
    install_dir: Option<PathBuf>,
    installer_artifact_path: Option<PathBuf>,
    models_path: Option<PathBuf>,
    mode: Option<String>,
    debug: bool,
    download_url: Option<String>,
    max_retries: Option<u32>,
    chunk_size: Option<usize>,
    expected_sha256: Option<String>,
    non_interactive: bool,
}

impl InstallationConfigBuilder {
    pub fn install_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.install_dir = dir;
        self
    }

    pub fn installer_artifact_path(mut self, path: Option<PathBuf>) -> Self {
        self.installer_artifact_path = path;
        self
    }

    pub fn models_path(mut self, path: Option<PathBuf>) -> Self {
        self.models_path = path;
        self
    }

    pub fn mode(mut self, mode: Option<String>) -> Self {
        self.mode = mode;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn download_url(mut self, url: Option<String>) -> Self {
        self.download_url = url;
        self
    }

    pub fn max_retries(mut self, retries: Option<u32>) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn chunk_size(mut self, size: Option<usize>) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn expected_sha256(mut self, digest: Option<String>) -> Self {
        self.expected_sha256 = digest;
        self
    }

    pub fn non_interactive(mut self, non_interactive: bool) -> Self {
        self.non_interactive = non_interactive;
        self
    }

    pub fn build(self) -> InstallationConfig {
        InstallationConfig {
            install_dir: self.install_dir.as_deref().map(normalize_install_dir),
            installer_artifact_path: self.installer_artifact_path,
            models_path: self.models_path,
            mode: self.mode.filter(|m| !m.trim().is_empty()),
            debug: self.debug,
            download_url: self.download_url,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1),
            expected_sha256: self.expected_sha256.map(|d| d.trim().to_ascii_lowercase()),
            non_interactive: self.non_interactive,
        }
    }
}

/// Make `dir` absolute, drop trailing separators, and make sure it ends in
/// the product directory.
pub fn normalize_install_dir(dir: &Path) -> PathBuf {
    let absolute = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
    let mut normalized: PathBuf = absolute.components().collect();

    let ends_with_product = normalized
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(PRODUCT_DIR_NAME));

    if !ends_with_product {
        normalized.push(PRODUCT_DIR_NAME);
    }
    normalized
}

/// Platform default install directory
///
/// - Windows: `%LOCALAPPDATA%\Programs\Ollama` (the installer's own default)
/// - elsewhere: `<data_local_dir>/Ollama`
pub fn default_install_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);

    #[cfg(target_os = "windows")]
    {
        base.join("Programs").join(PRODUCT_DIR_NAME)
    }

    #[cfg(not(target_os = "windows"))]
    {
        base.join(PRODUCT_DIR_NAME)
    }
}

/// Optional settings file (`config.toml`). Every field is optional; CLI
/// flags win over file values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub install_dir: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
    pub mode: Option<String>,
    pub debug: Option<bool>,
    pub download_url: Option<String>,
    pub max_retries: Option<u32>,
    pub chunk_size: Option<usize>,
    pub sha256: Option<String>,
}

impl Settings {
    /// Default settings location: `<config_dir>/ollama-installer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ollama-installer").join("config.toml"))
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;

        log::info!("Using settings from: {}", path.display());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_product_dir_when_missing() {
        let dir = std::env::temp_dir().join("AI_MODEL");
        let normalized = normalize_install_dir(&dir);
        assert_eq!(normalized, dir.join(PRODUCT_DIR_NAME));
    }

    #[test]
    fn keeps_product_dir_and_strips_trailing_separator() {
        let dir = std::env::temp_dir().join("tools").join("ollama");
        let with_slash = PathBuf::from(format!("{}{}", dir.display(), std::path::MAIN_SEPARATOR));
        assert_eq!(normalize_install_dir(&with_slash), dir);
    }

    #[test]
    fn relative_dirs_become_absolute() {
        let normalized = normalize_install_dir(Path::new("runtime"));
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with(Path::new("runtime").join(PRODUCT_DIR_NAME)));
    }

    #[test]
    fn builder_applies_defaults() {
        let config = InstallationConfig::builder()
            .mode(Some("  ".to_string()))
            .expected_sha256(Some(" ABCD ".to_string()))
            .build();

        assert_eq!(config.mode(), None);
        assert_eq!(config.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.expected_sha256(), Some("abcd"));
        assert!(config.install_dir().is_none());
        assert!(config.effective_install_dir().ends_with(PRODUCT_DIR_NAME));
    }

    #[test]
    fn settings_parse_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "mode = \"VERYSILENT\"\nmax_retries = 3\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.mode.as_deref(), Some("VERYSILENT"));
        assert_eq!(settings.max_retries, Some(3));
        assert!(settings.install_dir.is_none());
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
