//! Installation state detection
//!
//! Answers "is the runtime already installed?" by locating its executable:
//! known install locations first, then a PATH lookup.

use std::fmt;
use std::path::PathBuf;

use crate::config::InstallationConfig;

#[cfg(target_os = "windows")]
pub const EXECUTABLE_NAME: &str = "ollama.exe";

#[cfg(not(target_os = "windows"))]
pub const EXECUTABLE_NAME: &str = "ollama";

/// Outcome of an executable lookup.
///
/// `CheckFailed` is distinct from `NotFound`: the lookup itself broke and
/// the runtime may or may not be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found(PathBuf),
    NotFound,
    CheckFailed(String),
}

/// Installation lifecycle state. Derived on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationState {
    NotInstalled,
    InstallerStaged,
    Installing,
    Installed,
    Failed,
}

impl InstallationState {
    /// Derive the resting state from a discovery result and artifact presence
    pub fn derive(discovery: &Discovery, artifact_present: bool) -> Self {
        match (discovery, artifact_present) {
            (Discovery::Found(_), _) => InstallationState::Installed,
            (_, true) => InstallationState::InstallerStaged,
            (_, false) => InstallationState::NotInstalled,
        }
    }
}

impl fmt::Display for InstallationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallationState::NotInstalled => "not installed",
            InstallationState::InstallerStaged => "installer staged",
            InstallationState::Installing => "installing",
            InstallationState::Installed => "installed",
            InstallationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Seam for the idempotency check
pub trait ExecutableLocator: Send + Sync {
    fn locate(&self) -> Discovery;
}

/// Looks in the configured/known install directories, then on PATH.
#[derive(Debug, Clone)]
pub struct SystemLocator {
    search_dirs: Vec<PathBuf>,
}

impl SystemLocator {
    pub fn new(config: &InstallationConfig) -> Self {
        let mut search_dirs = vec![config.effective_install_dir()];
        search_dirs.extend(known_install_dirs());
        search_dirs.dedup();
        Self { search_dirs }
    }

    pub fn with_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }
}

impl ExecutableLocator for SystemLocator {
    fn locate(&self) -> Discovery {
        if let Some(found) = self
            .search_dirs
            .iter()
            .map(|dir| dir.join(EXECUTABLE_NAME))
            .find(|candidate| candidate.is_file())
        {
            return Discovery::Found(found);
        }

        match which::which(EXECUTABLE_NAME) {
            Ok(path) => Discovery::Found(path),
            Err(which::Error::CannotFindBinaryPath) => Discovery::NotFound,
            Err(e) => Discovery::CheckFailed(e.to_string()),
        }
    }
}

/// Locations the platform installer is known to use
fn known_install_dirs() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        dirs::data_local_dir()
            .map(|local| vec![local.join("Programs").join("Ollama")])
            .unwrap_or_default()
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/Applications/Ollama.app/Contents/Resources"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![PathBuf::from("/usr/local/bin"), PathBuf::from("/usr/bin")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_executable_in_search_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(EXECUTABLE_NAME);
        std::fs::write(&exe, b"").unwrap();

        let locator = SystemLocator::with_dirs(vec![dir.path().to_path_buf()]);
        assert_eq!(locator.locate(), Discovery::Found(exe));
    }

    #[test]
    fn derive_prefers_discovery_over_artifact() {
        let found = Discovery::Found(PathBuf::from("/opt/ollama"));
        assert_eq!(InstallationState::derive(&found, false), InstallationState::Installed);
        assert_eq!(
            InstallationState::derive(&Discovery::NotFound, true),
            InstallationState::InstallerStaged
        );
        assert_eq!(
            InstallationState::derive(&Discovery::CheckFailed("io".into()), false),
            InstallationState::NotInstalled
        );
    }
}
