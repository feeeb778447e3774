//! Installation supervisor
//!
//! Drives `NotInstalled -> InstallerStaged -> Installing -> Installed | Failed`.
//! Every transition out of `NotInstalled` is preceded by the idempotency
//! check, so an existing installation is never downloaded or reinstalled.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::InstallationConfig;
use crate::error::InstallerError;
use crate::install::context::RunContext;
use crate::install::detection::{Discovery, ExecutableLocator, InstallationState};
use crate::install::download::{ArtifactFetcher, Platform, verify_sha256};
use crate::install::progress::{DownloadPhase, InstallProgress};
use crate::install::tail::{LogTailer, liveness_pair};

/// How `ensure_installed` reached the `Installed` state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Found before anything was downloaded
    AlreadyInstalled(PathBuf),
    /// Installer ran successfully. `None` when the executable is not yet
    /// discoverable (PATH changes only reach new shells).
    Installed(Option<PathBuf>),
}

impl InstallOutcome {
    pub fn executable(&self) -> Option<&Path> {
        match self {
            InstallOutcome::AlreadyInstalled(path) => Some(path),
            InstallOutcome::Installed(path) => path.as_deref(),
        }
    }
}

pub struct Supervisor<'a, L, F> {
    ctx: &'a RunContext,
    config: &'a InstallationConfig,
    locator: L,
    fetcher: F,
    state: Mutex<InstallationState>,
    progress_tx: Option<mpsc::Sender<InstallProgress>>,
}

impl<'a, L: ExecutableLocator, F: ArtifactFetcher> Supervisor<'a, L, F> {
    pub fn new(ctx: &'a RunContext, config: &'a InstallationConfig, locator: L, fetcher: F) -> Self {
        Self {
            ctx,
            config,
            locator,
            fetcher,
            state: Mutex::new(InstallationState::NotInstalled),
            progress_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<InstallProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    fn report(&self, progress: InstallProgress) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.try_send(progress);
        }
    }

    pub fn state(&self) -> InstallationState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(InstallationState::Failed)
    }

    fn transition(&self, next: InstallationState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                log::debug!("Installation state: {} -> {}", *state, next);
            }
            *state = next;
        }
    }

    /// Idempotency check. A failed check is treated as "not installed".
    pub fn check(&self) -> Discovery {
        let discovery = self.locator.locate();
        match &discovery {
            Discovery::Found(path) => {
                self.ctx.info(format!("Ollama is already installed at {}", path.display()));
                self.ctx.remember_executable(Some(path.clone()));
                self.transition(InstallationState::Installed);
            }
            Discovery::NotFound => {
                self.ctx.info("Ollama is not installed");
                self.ctx.remember_executable(None);
            }
            Discovery::CheckFailed(cause) => {
                self.ctx.warn(format!(
                    "Could not determine whether Ollama is installed ({cause}); assuming it is not"
                ));
                self.ctx.remember_executable(None);
            }
        }
        discovery
    }

    /// Where a downloaded installer is placed
    pub fn staged_artifact_path(&self) -> Result<PathBuf, InstallerError> {
        let platform = Platform::detect()?;
        Ok(self
            .config
            .effective_install_dir()
            .join(platform.artifact_file_name()))
    }

    /// Make the installer artifact available: the supplied one if
    /// configured, otherwise download it into the install directory.
    pub async fn stage(&self) -> Result<PathBuf, InstallerError> {
        if let Some(supplied) = self.config.installer_artifact_path() {
            if !supplied.is_file() {
                self.ctx.error(format!("Installer not found at {}", supplied.display()));
                return Err(InstallerError::MissingArtifact(supplied.to_path_buf()));
            }
            self.ctx.info(format!("Using supplied installer {}", supplied.display()));
            self.verify(supplied, false).await?;
            self.transition(InstallationState::InstallerStaged);
            return Ok(supplied.to_path_buf());
        }

        let destination = self.staged_artifact_path()?;
        let url = match self.config.download_url() {
            Some(url) => url.to_string(),
            None => Platform::detect()?.download_url().to_string(),
        };
        let previously_present = destination.exists();

        if previously_present {
            self.ctx.info(format!(
                "Installer already present at {}, skipping download",
                destination.display()
            ));
        } else {
            self.ctx.info(format!("Downloading {url} to {}", destination.display()));
        }

        if let Err(e) = self
            .fetcher
            .fetch(&url, &destination, self.config.chunk_size(), self.config.max_retries())
            .await
        {
            self.ctx.error(format!("Download failed: {e}"));
            return Err(e);
        }

        if !previously_present {
            self.ctx.info("Download complete");
        }

        self.verify(&destination, !previously_present).await?;
        self.transition(InstallationState::InstallerStaged);
        Ok(destination)
    }

    async fn verify(&self, artifact: &Path, remove_on_mismatch: bool) -> Result<(), InstallerError> {
        let Some(expected) = self.config.expected_sha256() else {
            return Ok(());
        };

        self.report(InstallProgress::download(0, 0, None, DownloadPhase::Verifying));
        match verify_sha256(artifact, expected).await {
            Ok(()) => {
                self.ctx.info(format!("Checksum verified for {}", artifact.display()));
                Ok(())
            }
            Err(e) => {
                self.ctx.error(e.to_string());
                if remove_on_mismatch {
                    let _ = tokio::fs::remove_file(artifact).await;
                }
                Err(e)
            }
        }
    }

    /// Run the installer and classify its exit
    pub async fn install(&self, artifact: &Path) -> Result<(), InstallerError> {
        if !artifact.is_file() {
            self.ctx.error(format!("Installer not found at {}", artifact.display()));
            self.transition(InstallationState::Failed);
            return Err(InstallerError::MissingArtifact(artifact.to_path_buf()));
        }

        #[cfg(unix)]
        make_executable(artifact)?;

        let installer_log = installer_log_path(self.ctx.log_path());
        if let Err(e) = std::fs::remove_file(&installer_log)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            self.ctx.warn(format!("Could not remove stale {}: {e}", installer_log.display()));
        }

        let args = build_invocation(self.config, &installer_log);
        self.ctx.info(format!(
            "Running installer: {} {}",
            artifact.display(),
            args.join(" ")
        ));
        self.transition(InstallationState::Installing);
        self.report(InstallProgress::new("install", "Running installer..."));

        // Watch the installer log from its first byte, before the child can write
        let tailer = self
            .config
            .debug()
            .then(|| (LogTailer::new(&installer_log), liveness_pair()));

        let child = Command::new(artifact)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                self.ctx.error(format!("Failed to start installer: {e}"));
                self.transition(InstallationState::Failed);
                return Err(e.into());
            }
        };

        let tail = tailer.map(|(tailer, (exit, liveness))| {
            let handle = tokio::spawn(tailer.run(liveness, |line| eprintln!("  │ {line}")));
            (exit, handle)
        });

        let waited = child.wait_with_output().await;

        if let Some((exit, handle)) = tail {
            exit.exited();
            match handle.await {
                Ok(lines) => log::debug!("Tailed {lines} installer log line(s)"),
                Err(e) => log::debug!("Log tailer task ended abnormally: {e}"),
            }
        }

        self.bridge_installer_log(&installer_log);

        let output = match waited {
            Ok(output) => output,
            Err(e) => {
                self.ctx.error(format!("Failed waiting for installer: {e}"));
                self.transition(InstallationState::Failed);
                return Err(e.into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            log::debug!("Installer stdout:\n{}", stdout.trim_end());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            self.ctx
                .error(format!("Installation failed with exit code {exit_code}"));
            if !stderr.is_empty() {
                self.ctx.error(format!("Installer stderr: {stderr}"));
            }
            self.transition(InstallationState::Failed);
            self.report(InstallProgress::error(
                "install",
                format!("Installer exited with code {exit_code}"),
            ));
            return Err(InstallerError::Installation { exit_code, stderr });
        }

        self.ctx.info("Installation completed successfully");
        self.transition(InstallationState::Installed);
        self.report(InstallProgress::new("install", "Installation completed"));

        match self.locator.locate() {
            Discovery::Found(path) => {
                self.ctx.info(format!("Ollama executable located at {}", path.display()));
                self.ctx.remember_executable(Some(path));
            }
            other => {
                self.ctx.warn(format!(
                    "Installer succeeded but ollama is not discoverable yet ({other:?}); a new shell may be required"
                ));
                self.ctx.remember_executable(None);
            }
        }
        Ok(())
    }

    /// Copy the installer's own log into the run log once the installer is done
    fn bridge_installer_log(&self, installer_log: &Path) {
        let content = match std::fs::read(installer_log) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Installer wrote no log at {}", installer_log.display());
                return;
            }
            Err(e) => {
                self.ctx.warn(format!("Could not read {}: {e}", installer_log.display()));
                return;
            }
        };

        let content = String::from_utf8_lossy(&content);
        for line in content.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            let _ = self.ctx.run_log().append(&format!("[installer] {line}"));
        }
    }

    /// Check, stage, install
    pub async fn ensure_installed(&self) -> Result<InstallOutcome, InstallerError> {
        if let Discovery::Found(path) = self.check() {
            return Ok(InstallOutcome::AlreadyInstalled(path));
        }

        let artifact = self.stage().await.inspect_err(|_| {
            self.transition(InstallationState::Failed);
        })?;
        self.install(&artifact).await?;
        Ok(InstallOutcome::Installed(self.ctx.discovered_executable()))
    }
}

/// The installer's own log, kept next to the run log. Installers
/// overwrite their `/LOG` target, so it is never the run log itself.
pub fn installer_log_path(run_log: &Path) -> PathBuf {
    let stem = run_log
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ollama_install");
    run_log.with_file_name(format!("{stem}_installer.log"))
}

/// Installer arguments: `/<mode>`, `/DIR=<dir>`, `/LOG=<log>`
pub fn build_invocation(config: &InstallationConfig, log_path: &Path) -> Vec<String> {
    let mut args = Vec::with_capacity(3);
    if let Some(mode) = config.mode() {
        args.push(format!("/{mode}"));
    }
    if let Some(dir) = config.install_dir() {
        args.push(format!("/DIR={}", dir.display()));
    }
    args.push(format!("/LOG={}", log_path.display()));
    args
}

#[cfg(unix)]
fn make_executable(artifact: &Path) -> Result<(), InstallerError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(artifact)?.permissions();
    if permissions.mode() & 0o111 == 0 {
        permissions.set_mode(0o755);
        std::fs::set_permissions(artifact, permissions)?;
    }
    Ok(())
}
