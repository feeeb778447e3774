//! Local model management through the `ollama` CLI

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::InstallerError;
use crate::install::context::RunContext;
use crate::install::detection::EXECUTABLE_NAME;

pub struct ModelManager {
    program: PathBuf,
}

impl ModelManager {
    /// Use the discovered executable, or resolve `ollama` from PATH
    pub fn new(executable: Option<&Path>) -> Self {
        Self {
            program: executable
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(EXECUTABLE_NAME)),
        }
    }

    /// Names of locally installed models (`ollama list`)
    pub async fn list_models(&self) -> Result<Vec<String>, InstallerError> {
        let output = Command::new(&self.program)
            .arg("list")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(InstallerError::Process(format!(
                "ollama list exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_model_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// `ollama pull <name>`, echoing every output line to the console and
    /// the run log
    pub async fn pull_model(&self, ctx: &RunContext, name: &str) -> Result<(), InstallerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InstallerError::Process(
                "model name must be provided to pull a model".to_string(),
            ));
        }

        ctx.info(format!("Pulling model {name}"));
        let mut child = Command::new(&self.program)
            .args(["pull", name])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        if let (Some(mut stdout), Some(mut stderr)) = (stdout, stderr) {
            let (mut out_open, mut err_open) = (true, true);
            loop {
                let (line, from_stdout) = tokio::select! {
                    line = stdout.next_line(), if out_open => (line, true),
                    line = stderr.next_line(), if err_open => (line, false),
                    else => break,
                };
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            println!("{line}");
                            let _ = ctx.run_log().append(line);
                        }
                    }
                    Ok(None) | Err(_) if from_stdout => out_open = false,
                    Ok(None) | Err(_) => err_open = false,
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let message = format!(
                "ollama pull {name} exited with code {}",
                status.code().unwrap_or(-1)
            );
            ctx.error(&message);
            return Err(InstallerError::Process(message));
        }

        ctx.info(format!("Model {name} is ready"));
        Ok(())
    }

    fn spawn_error(&self, e: std::io::Error) -> InstallerError {
        InstallerError::Process(format!("Failed to run {}: {e}", self.program.display()))
    }
}

/// First column of every non-header line of `ollama list`
pub fn parse_model_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::context::RunLog;

    #[test]
    fn parses_first_column_and_skips_header() {
        let output = "NAME              ID              SIZE      MODIFIED\n\
                      llama3.2:latest   a80c4f17acd5    2.0 GB    3 days ago\n\
                      \n\
                      qwen2.5:7b        845dbda0ea48    4.7 GB    2 weeks ago\n";
        assert_eq!(parse_model_list(output), vec!["llama3.2:latest", "qwen2.5:7b"]);
        assert!(parse_model_list("NAME ID SIZE MODIFIED\n").is_empty());
    }

    #[tokio::test]
    async fn empty_model_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(RunLog::create_in(dir.path()));
        let manager = ModelManager::new(Some(&dir.path().join("never-run")));

        let err = manager.pull_model(&ctx, "   ").await.unwrap_err();
        assert!(matches!(err, InstallerError::Process(ref m) if m.contains("model name")));
    }

    #[cfg(unix)]
    fn stub_cli(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ollama");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lists_models_from_cli() {
        let dir = tempfile::tempdir().unwrap();
        let cli = stub_cli(
            dir.path(),
            "printf 'NAME ID SIZE MODIFIED\\nmistral:latest f974a74358d6 4.1 GB now\\n'",
        );

        let models = ModelManager::new(Some(&cli)).list_models().await.unwrap();
        assert_eq!(models, vec!["mistral:latest"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pull_streams_output_into_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(RunLog::create_in(dir.path()));
        let cli = stub_cli(
            dir.path(),
            "echo \"pulling manifest for $2\"\necho 'verifying sha256 digest' >&2\necho success",
        );

        ModelManager::new(Some(&cli))
            .pull_model(&ctx, "llama3.2")
            .await
            .unwrap();

        let log = std::fs::read_to_string(ctx.log_path()).unwrap();
        assert!(log.contains("pulling manifest for llama3.2"));
        assert!(log.contains("verifying sha256 digest"));
        assert!(log.contains("success"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_pull_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(RunLog::create_in(dir.path()));
        let cli = stub_cli(dir.path(), "echo 'Error: pull model manifest: file does not exist' >&2\nexit 1");

        let err = ModelManager::new(Some(&cli))
            .pull_model(&ctx, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, InstallerError::Process(ref m) if m.contains("exited with code 1")));
    }
}
