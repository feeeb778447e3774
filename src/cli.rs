use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use ollama_installer::config::{DEFAULT_MODE, InstallationConfig, Settings};

#[derive(Parser, Debug)]
#[command(version, about = "Install and manage a local Ollama runtime")]
pub struct Args {
    #[command(flatten)]
    pub install: InstallArgs,

    /// Sub-commands (install if omitted)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct InstallArgs {
    /// Installation directory ("Ollama" is appended unless already last)
    #[arg(long, global = true)]
    pub install_dir: Option<PathBuf>,

    /// Directory for model storage (sets OLLAMA_MODELS)
    #[arg(long, global = true)]
    pub models_dir: Option<PathBuf>,

    /// Installer silent-mode switch [default: silent]
    #[arg(long, global = true)]
    pub mode: Option<String>,

    /// Stream the installer log while it runs
    #[arg(long, global = true)]
    pub debug: bool,

    /// Use an already downloaded installer instead of fetching one
    #[arg(long, global = true)]
    pub installer: Option<PathBuf>,

    /// Expected SHA-256 of the installer
    #[arg(long, global = true)]
    pub sha256: Option<String>,

    /// Settings file (default: <config dir>/ollama-installer/config.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Never prompt; existing environment values are kept
    #[arg(long, global = true)]
    pub no_interaction: bool,

    /// Don't restart the service after installing
    #[arg(long, global = true)]
    pub skip_restart: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Install Ollama if needed, configure the environment, restart the service (default)
    Install,
    /// Check installation (Exit 0 = installed, 1 = not installed)
    Status,
    /// Start the service (Exit 0 = success, 1 = failed)
    Start,
    /// Stop the service (Exit 0 = success, 1 = failed)
    Stop,
    /// Restart the service (Exit 0 = success, 1 = failed)
    Restart,
    /// List locally installed models
    Models,
    /// Pull a model, e.g. `llama3.2` or `qwen2.5:7b`
    Pull {
        /// Model name with optional tag
        model: String,
    },
}

impl InstallArgs {
    /// Settings file location: `--config`, then the default path
    pub fn settings_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Settings::default_path)
    }

    /// CLI flags layered over the settings file
    pub fn installation_config(&self, settings: &Settings) -> InstallationConfig {
        InstallationConfig::builder()
            .install_dir(self.install_dir.clone().or_else(|| settings.install_dir.clone()))
            .installer_artifact_path(self.installer.clone())
            .models_path(self.models_dir.clone().or_else(|| settings.models_dir.clone()))
            .mode(Some(
                self.mode
                    .clone()
                    .or_else(|| settings.mode.clone())
                    .unwrap_or_else(|| DEFAULT_MODE.to_string()),
            ))
            .debug(self.debug || settings.debug.unwrap_or(false))
            .download_url(settings.download_url.clone())
            .max_retries(settings.max_retries)
            .chunk_size(settings.chunk_size)
            .expected_sha256(self.sha256.clone().or_else(|| settings.sha256.clone()))
            .non_interactive(self.no_interaction)
            .build()
    }
}
