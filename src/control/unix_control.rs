//! Unix process control using procps (`pgrep`/`pkill`)

use std::path::Path;
use std::process::Command;

use super::{ProcessTable, ServiceLauncher, TerminateOutcome};
use crate::error::InstallerError;
use crate::install::privilege::shell_quote;

pub const SERVICE_PROCESS_NAMES: &[&str] = &["ollama"];

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn running(&self, names: &[&str]) -> Result<Vec<String>, InstallerError> {
        let mut running = Vec::new();
        for name in names {
            let output = Command::new("pgrep")
                .args(["-x", name])
                .output()
                .map_err(|e| InstallerError::Process(format!("Failed to execute pgrep: {e}")))?;

            // pgrep: 0 = match, 1 = no match, anything else is an error
            match output.status.code() {
                Some(0) => running.push(name.to_string()),
                Some(1) => {}
                _ => {
                    return Err(InstallerError::Process(format!(
                        "pgrep failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
            }
        }
        Ok(running)
    }

    fn terminate(&self, name: &str) -> TerminateOutcome {
        let output = match Command::new("pkill").args(["-KILL", "-x", name]).output() {
            Ok(output) => output,
            Err(e) => return TerminateOutcome::Failed(format!("Failed to execute pkill: {e}")),
        };

        match output.status.code() {
            Some(0) => TerminateOutcome::Terminated,
            Some(1) => TerminateOutcome::NotFound,
            code => TerminateOutcome::Failed(format!(
                "pkill exited with {}: {}",
                code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }
}

/// Detached `ollama serve`. The wrapper shell reports a server that dies
/// right away on stderr and exits before the probe window closes.
pub fn launcher(executable: Option<&Path>) -> ServiceLauncher {
    let program = executable
        .map(|p| shell_quote(&p.display().to_string()))
        .unwrap_or_else(|| "ollama".to_string());

    let script = format!(
        "command -v {program} >/dev/null 2>&1 || {{ echo \"{program}: command not found\" >&2; exit 127; }}\n\
         nohup {program} serve >/dev/null 2>&1 &\n\
         sleep 1\n\
         kill -0 $! 2>/dev/null || {{ echo \"ollama serve exited during startup\" >&2; exit 1; }}"
    );
    ServiceLauncher::new("sh", vec!["-c".to_string(), script])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launcher_uses_discovered_executable() {
        let launcher = launcher(Some(Path::new("/opt/my tools/ollama")));
        let line = launcher.command_line();
        assert!(line.starts_with("sh -c "));
        assert!(line.contains("nohup '/opt/my tools/ollama' serve"));
    }

    #[tokio::test]
    async fn missing_executable_fails_to_start() {
        let outcome = launcher(Some(Path::new("/nonexistent/ollama")))
            .launch()
            .await
            .unwrap();
        assert!(matches!(outcome, super::super::StartOutcome::Failed(ref e) if e.contains("command not found")));
    }

    #[tokio::test]
    async fn served_process_receives_configured_models_location() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let seen = dir.path().join("seen-models");
        let stub = dir.path().join("ollama");
        std::fs::write(
            &stub,
            format!(
                "#!/bin/sh\nif [ \"$1\" = serve ]; then printf '%s' \"$OLLAMA_MODELS\" > {}; sleep 3; fi\n",
                shell_quote(&seen.display().to_string())
            ),
        )
        .unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = launcher(Some(&stub))
            .with_env("OLLAMA_MODELS", "/srv/ollama-models")
            .launch()
            .await
            .unwrap();

        assert!(outcome.is_started(), "{outcome:?}");
        assert_eq!(std::fs::read_to_string(&seen).unwrap(), "/srv/ollama-models");
    }
}
