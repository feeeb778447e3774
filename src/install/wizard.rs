//! Interactive confirmation and the end-of-run summary

use std::io::Write;
use std::path::PathBuf;

use inquire::Confirm;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Asks the user a yes/no question before a destructive change
pub trait Confirmer {
    fn confirm(&self, question: &str) -> bool;
}

/// Terminal prompt; anything but an explicit "y" declines
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptConfirmer;

impl Confirmer for PromptConfirmer {
    fn confirm(&self, question: &str) -> bool {
        match Confirm::new(question)
            .with_default(false)
            .with_help_message("y to override, anything else keeps the current value")
            .prompt()
        {
            Ok(answer) => answer,
            Err(e) => {
                log::warn!("Prompt cancelled: {e}");
                false
            }
        }
    }
}

/// Used for `--no-interaction`: existing values are never overwritten
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineAll;

impl Confirmer for DeclineAll {
    fn confirm(&self, question: &str) -> bool {
        log::warn!("Non-interactive run, declining: {question}");
        false
    }
}

/// What the orchestrator actually did, for the completion summary
#[derive(Debug, Clone, Default)]
pub struct InstallationResult {
    pub executable: Option<PathBuf>,
    pub freshly_installed: bool,
    pub models_configured: Option<bool>,
    pub path_configured: Option<bool>,
    pub service_started: Option<bool>,
    pub log_file: PathBuf,
}

fn status_line(stdout: &mut StandardStream, ok: bool, text: &str) {
    let (color, mark) = if ok {
        (Color::Green, "✓")
    } else {
        (Color::Yellow, "⚠")
    };
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)));
    let _ = writeln!(stdout, "  {mark} {text}");
    let _ = stdout.reset();
}

/// Display installation completion summary
pub fn show_completion(result: &InstallationResult) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);

    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)));
    let _ = writeln!(
        stdout,
        "\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━"
    );
    let _ = stdout.reset();

    match &result.executable {
        Some(path) if result.freshly_installed => {
            status_line(&mut stdout, true, &format!("Ollama installed at {}", path.display()))
        }
        Some(path) => status_line(
            &mut stdout,
            true,
            &format!("Ollama already installed at {}", path.display()),
        ),
        None => status_line(
            &mut stdout,
            false,
            "Ollama installed but not yet on PATH (open a new shell)",
        ),
    }

    if let Some(ok) = result.models_configured {
        status_line(&mut stdout, ok, "OLLAMA_MODELS");
    }
    if let Some(ok) = result.path_configured {
        status_line(&mut stdout, ok, "Install directory on PATH");
    }
    if let Some(ok) = result.service_started {
        status_line(&mut stdout, ok, "Ollama service running");
    }

    let _ = writeln!(stdout, "\nLog file: {}", result.log_file.display());

    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)));
    let _ = writeln!(
        stdout,
        "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n"
    );
    let _ = stdout.reset();
}
