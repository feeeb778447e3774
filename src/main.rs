mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use ollama_installer::config::Settings;
use ollama_installer::install::{RunContext, runners};

fn main() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    match rt.block_on(real_main()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// `Ok(false)` maps to exit code 1 without an error message of its own
async fn real_main() -> Result<bool> {
    let args = cli::Args::parse();

    let ctx = RunContext::from_current_dir().context("Failed to determine the working directory")?;

    let settings = match args.install.settings_path() {
        Some(path) => Settings::load(&path).inspect_err(|e| ctx.error(format!("{e:#}")))?,
        None => Settings::default(),
    };
    let config = args.install.installation_config(&settings);

    if let Some(installer) = config.installer_artifact_path()
        && !installer.exists()
    {
        let message = format!("Installer not found at {}", installer.display());
        ctx.error(&message);
        runners::failure(&ctx, &message);
        return Ok(false);
    }

    let result = match args.sub.unwrap_or(cli::Cmd::Install) {
        cli::Cmd::Install => runners::run_install(&ctx, &config, args.install.skip_restart)
            .await
            .map(|result| result.service_started != Some(false)),
        cli::Cmd::Status => runners::run_status(&ctx, &config),
        cli::Cmd::Start => runners::run_start(&ctx, &config).await,
        cli::Cmd::Stop => runners::run_stop(&ctx),
        cli::Cmd::Restart => runners::run_restart(&ctx, &config).await,
        cli::Cmd::Models => runners::run_list_models(&ctx, &config).await.map(|()| true),
        cli::Cmd::Pull { model } => runners::run_pull(&ctx, &config, &model).await.map(|()| true),
    };

    result.inspect_err(|e| ctx.error(format!("{e:#}")))
}
