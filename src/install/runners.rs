//! Top-level runners behind each CLI command
//!
//! Every runner writes the same failure detail to the console and the run
//! log before returning.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::context::RunContext;
use super::detection::{Discovery, ExecutableLocator, InstallationState, SystemLocator};
use super::download::Downloader;
use super::environment::{EnvOutcome, EnvironmentConfigurator, MODELS_VARIABLE, SystemEnvironment};
use super::progress::{DownloadPhase, InstallProgress};
use super::supervisor::{InstallOutcome, Supervisor};
use super::wizard::{self, Confirmer, DeclineAll, InstallationResult, PromptConfirmer};
use crate::config::InstallationConfig;
use crate::control::{ProcessLifecycle, ServiceLauncher, StartOutcome, StopOutcome, SystemProcessTable};
use crate::error::InstallerError;
use crate::models::ModelManager;

fn heading(text: &str) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true));
    let _ = writeln!(stdout, "{text}");
    let _ = stdout.reset();
}

fn success(text: &str) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
    let _ = writeln!(stdout, "✓ {text}");
    let _ = stdout.reset();
}

fn warning(text: &str) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)));
    let _ = writeln!(stderr, "⚠ {text}");
    let _ = stderr.reset();
}

/// Print a failure in red together with the run log location
pub fn failure(ctx: &RunContext, text: &str) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = writeln!(stderr, "❌ {text}");
    let _ = stderr.reset();
    let _ = writeln!(stderr, "   See {} for details", ctx.log_path().display());
}

fn styled_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "  [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})  {msg}",
            ) {
                pb.set_style(style.progress_chars("█▓░"));
            }
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("  {spinner:.green} {bytes} downloaded  {msg}") {
                pb.set_style(style);
            }
            pb
        }
    }
}

/// Render progress events until every sender is dropped
fn spawn_progress_display(mut rx: mpsc::Receiver<InstallProgress>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut bar: Option<ProgressBar> = None;

        while let Some(progress) = rx.recv().await {
            let Some(meta) = &progress.download_metadata else {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
                if progress.is_error {
                    eprintln!("❌ [{}] {}", progress.step, progress.message);
                } else {
                    println!("→ {}", progress.message);
                }
                continue;
            };

            match meta.phase {
                DownloadPhase::Connecting => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                    println!("📥 {}", progress.message);
                }
                DownloadPhase::Downloading => {
                    let pb = bar.get_or_insert_with(|| styled_bar(meta.total_bytes));
                    pb.set_position(meta.bytes_downloaded);
                }
                DownloadPhase::Complete | DownloadPhase::Skipped | DownloadPhase::Verifying => {
                    if let Some(pb) = bar.take() {
                        pb.finish_and_clear();
                    }
                    println!("→ {}", progress.message);
                }
            }
        }

        if let Some(pb) = bar {
            pb.finish_and_clear();
        }
    })
}

/// Full install flow: check/stage/install, environment, restart, summary
pub async fn run_install(
    ctx: &RunContext,
    config: &InstallationConfig,
    skip_restart: bool,
) -> Result<InstallationResult> {
    heading("🦙 Ollama Installation");
    println!("Platform: {}", std::env::consts::OS);
    println!("Log file: {}\n", ctx.log_path().display());
    ctx.info("Starting Ollama installation");

    let (tx, rx) = mpsc::channel::<InstallProgress>(256);
    let display = spawn_progress_display(rx);

    let outcome = {
        let downloader = Downloader::new()?.with_progress(tx.clone());
        let supervisor = Supervisor::new(ctx, config, SystemLocator::new(config), downloader)
            .with_progress(tx);
        supervisor.ensure_installed().await
    };
    let _ = display.await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            failure(ctx, &format!("Installation failed: {e}"));
            return Err(e).context("Installation failed");
        }
    };

    match &outcome {
        InstallOutcome::AlreadyInstalled(path) => {
            success(&format!("Ollama already installed at {}", path.display()))
        }
        InstallOutcome::Installed(_) => success("Ollama installed"),
    }

    let mut result = InstallationResult {
        executable: outcome.executable().map(Path::to_path_buf),
        freshly_installed: matches!(outcome, InstallOutcome::Installed(_)),
        log_file: ctx.log_path().to_path_buf(),
        ..InstallationResult::default()
    };

    let path_entry = result
        .executable
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.effective_install_dir());

    let (models, path) = if config.non_interactive() {
        configure_environment(ctx, config, &path_entry, DeclineAll)?
    } else {
        configure_environment(ctx, config, &path_entry, PromptConfirmer)?
    };
    result.models_configured = models;
    result.path_configured = path;

    if skip_restart {
        ctx.info("Skipping service restart (--skip-restart)");
    } else {
        let lifecycle =
            ProcessLifecycle::new(ctx, SystemProcessTable, restart_launcher(config, &result));
        result.service_started = Some(match lifecycle.restart().await {
            Ok((_, started)) => started.is_started(),
            Err(e) => {
                warning(&format!("Could not restart Ollama: {e}"));
                false
            }
        });
    }

    ctx.info("Ollama installation finished");
    wizard::show_completion(&result);
    Ok(result)
}

/// Launcher for the post-install restart. A models location that is now in
/// effect machine-wide is handed to the service directly.
fn restart_launcher(config: &InstallationConfig, result: &InstallationResult) -> ServiceLauncher {
    let launcher = ServiceLauncher::system(result.executable.as_deref());
    match (config.models_path(), result.models_configured) {
        (Some(models_path), Some(true)) => {
            launcher.with_env(MODELS_VARIABLE, models_path.display().to_string())
        }
        _ => launcher,
    }
}

/// Apply `OLLAMA_MODELS` and the PATH entry. Privilege failures are
/// reported and skipped; anything else aborts.
fn configure_environment<C: Confirmer>(
    ctx: &RunContext,
    config: &InstallationConfig,
    path_entry: &Path,
    confirmer: C,
) -> Result<(Option<bool>, Option<bool>)> {
    let configurator = EnvironmentConfigurator::new(ctx, SystemEnvironment::default(), confirmer);

    let models = match config.models_path() {
        Some(models_path) => {
            if let Err(e) = std::fs::create_dir_all(models_path) {
                ctx.warn(format!("Could not create {}: {e}", models_path.display()));
            }
            Some(env_step(ctx, configurator.set_models_location(models_path))?)
        }
        None => None,
    };

    let path = Some(env_step(ctx, configurator.add_install_dir_to_path(path_entry))?);
    Ok((models, path))
}

fn env_step(ctx: &RunContext, outcome: Result<EnvOutcome, InstallerError>) -> Result<bool> {
    match outcome {
        Ok(EnvOutcome::Set | EnvOutcome::AlreadySatisfied) => Ok(true),
        Ok(EnvOutcome::Declined) => Ok(false),
        Err(e) if !e.is_fatal() => {
            warning(&format!("{e} (continuing without this change)"));
            Ok(false)
        }
        Err(e) => {
            failure(ctx, &e.to_string());
            Err(e.into())
        }
    }
}

/// Installation status; `Ok(true)` when installed
pub fn run_status(ctx: &RunContext, config: &InstallationConfig) -> Result<bool> {
    let locator = SystemLocator::new(config);
    let discovery = locator.locate();
    let artifact_present = config
        .installer_artifact_path()
        .map(Path::to_path_buf)
        .or_else(|| staged_artifact(config))
        .is_some_and(|p| p.is_file());
    let state = InstallationState::derive(&discovery, artifact_present);

    match &discovery {
        Discovery::Found(path) => {
            ctx.remember_executable(Some(path.clone()));
            success(&format!("Ollama is {state} at {}", path.display()))
        }
        Discovery::NotFound => println!("Ollama is {state}"),
        Discovery::CheckFailed(cause) => {
            ctx.warn(format!("Installation check failed: {cause}"));
            println!("Ollama is {state}");
        }
    }

    let lifecycle = lifecycle(ctx);
    match lifecycle.is_running() {
        Ok(true) => println!("Service: running"),
        Ok(false) => println!("Service: stopped"),
        Err(e) => warning(&format!("Could not query the service: {e}")),
    }

    Ok(state == InstallationState::Installed)
}

fn staged_artifact(config: &InstallationConfig) -> Option<PathBuf> {
    let platform = super::download::Platform::detect().ok()?;
    Some(config.effective_install_dir().join(platform.artifact_file_name()))
}

fn lifecycle(ctx: &RunContext) -> ProcessLifecycle<'_, SystemProcessTable> {
    let executable = ctx.discovered_executable();
    ProcessLifecycle::new(
        ctx,
        SystemProcessTable,
        ServiceLauncher::system(executable.as_deref()),
    )
}

fn locate_into(ctx: &RunContext, config: &InstallationConfig) {
    if let Discovery::Found(path) = SystemLocator::new(config).locate() {
        ctx.remember_executable(Some(path));
    }
}

fn report_start(ctx: &RunContext, outcome: &StartOutcome) -> bool {
    match outcome {
        StartOutcome::Started => success("Ollama started"),
        StartOutcome::StartedAfterTimeout => success("Ollama started (forced timeout)"),
        StartOutcome::Failed(stderr) => failure(ctx, &format!("Ollama failed to start: {stderr}")),
    }
    outcome.is_started()
}

fn report_stop(ctx: &RunContext, outcome: &StopOutcome) -> bool {
    match outcome {
        StopOutcome::NotRunning => success("Ollama was not running"),
        StopOutcome::Stopped(_) if outcome.all_stopped() => success("Ollama stopped"),
        StopOutcome::Stopped(_) => failure(ctx, "Some Ollama processes could not be terminated"),
    }
    outcome.all_stopped()
}

pub async fn run_start(ctx: &RunContext, config: &InstallationConfig) -> Result<bool> {
    locate_into(ctx, config);
    let outcome = lifecycle(ctx).start().await.context("Failed to start Ollama")?;
    Ok(report_start(ctx, &outcome))
}

pub fn run_stop(ctx: &RunContext) -> Result<bool> {
    let outcome = lifecycle(ctx).stop().context("Failed to stop Ollama")?;
    Ok(report_stop(ctx, &outcome))
}

pub async fn run_restart(ctx: &RunContext, config: &InstallationConfig) -> Result<bool> {
    locate_into(ctx, config);
    let (stopped, started) = lifecycle(ctx)
        .restart()
        .await
        .context("Failed to restart Ollama")?;
    let stopped = report_stop(ctx, &stopped);
    Ok(report_start(ctx, &started) && stopped)
}

pub async fn run_list_models(ctx: &RunContext, config: &InstallationConfig) -> Result<()> {
    locate_into(ctx, config);
    let executable = ctx.discovered_executable();
    let models = ModelManager::new(executable.as_deref())
        .list_models()
        .await
        .context("Failed to list models")?;

    if models.is_empty() {
        println!("No models installed. Try `ollama-installer pull llama3.2`.");
    } else {
        heading("Installed models:");
        for (idx, name) in models.iter().enumerate() {
            println!("{}. {name}", idx + 1);
        }
    }
    Ok(())
}

pub async fn run_pull(ctx: &RunContext, config: &InstallationConfig, model: &str) -> Result<()> {
    locate_into(ctx, config);
    let executable = ctx.discovered_executable();
    ModelManager::new(executable.as_deref())
        .pull_model(ctx, model)
        .await
        .with_context(|| format!("Failed to pull {model}"))?;
    success(&format!("Model {} is ready", model.trim()));
    Ok(())
}
