//! Runtime service lifecycle - stop, start, restart
//!
//! The service is rediscovered from the process table on every cycle;
//! nothing about it is persisted between invocations.
//! - Unix: `pgrep`/`pkill`, detached `ollama serve`
//! - Windows: `tasklist`/`taskkill`, `ollama app.exe` via `Start-Process`

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::InstallerError;
use crate::install::context::RunContext;

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        mod windows_control;
        use windows_control as platform;
    } else if #[cfg(unix)] {
        mod unix_control;
        use unix_control as platform;
    }
}

pub use platform::{SERVICE_PROCESS_NAMES, SystemProcessTable};

/// Bounded wait for the launcher before it is considered started
pub const START_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of terminating one process image name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    Terminated,
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running; no terminate command was issued
    NotRunning,
    /// Per-name outcome for every known variant
    Stopped(Vec<(String, TerminateOutcome)>),
}

impl StopOutcome {
    pub fn all_stopped(&self) -> bool {
        match self {
            StopOutcome::NotRunning => true,
            StopOutcome::Stopped(results) => results
                .iter()
                .all(|(_, outcome)| !matches!(outcome, TerminateOutcome::Failed(_))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Launcher finished inside the probe window without error output
    Started,
    /// Launcher wrote to stderr
    Failed(String),
    /// Probe window elapsed; launcher was killed and the start assumed good
    StartedAfterTimeout,
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        !matches!(self, StartOutcome::Failed(_))
    }
}

/// Process table access
pub trait ProcessTable {
    /// Names of running processes that match one of `names`
    fn running(&self, names: &[&str]) -> Result<Vec<String>, InstallerError>;

    /// Forceful terminate by image name
    fn terminate(&self, name: &str) -> TerminateOutcome;
}

/// Background launcher for the service, probed for a bounded time
#[derive(Debug, Clone)]
pub struct ServiceLauncher {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    probe_timeout: Duration,
}

impl ServiceLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
            probe_timeout: START_PROBE_TIMEOUT,
        }
    }

    /// Platform launcher; `executable` is the discovered `ollama` binary
    pub fn system(executable: Option<&Path>) -> Self {
        platform::launcher(executable)
    }

    /// Variable handed to the service on top of this process's environment.
    /// Machine-scope writes only reach processes started afterwards by the
    /// OS, so a value just configured has to be passed along explicitly.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((name.into(), value.into()));
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn the launcher and classify what it does inside the probe window
    pub async fn launch(&self) -> Result<StartOutcome, InstallerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InstallerError::Process(format!("Failed to launch {}: {e}", self.program)))?;

        let stderr = child.stderr.take();
        let probed = timeout(self.probe_timeout, async {
            let mut captured = String::new();
            let read = async {
                if let Some(mut pipe) = stderr {
                    let _ = pipe.read_to_string(&mut captured).await;
                }
            };
            let (status, ()) = tokio::join!(child.wait(), read);
            (status, captured)
        })
        .await;

        match probed {
            Ok((Ok(_status), captured)) if captured.trim().is_empty() => Ok(StartOutcome::Started),
            Ok((Ok(_status), captured)) => Ok(StartOutcome::Failed(captured.trim_end().to_string())),
            Ok((Err(e), _)) => Err(InstallerError::Process(format!(
                "Failed waiting for {}: {e}",
                self.program
            ))),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    log::debug!("Killing launcher after probe timeout failed: {e}");
                }
                Ok(StartOutcome::StartedAfterTimeout)
            }
        }
    }
}

pub struct ProcessLifecycle<'a, T> {
    ctx: &'a RunContext,
    table: T,
    launcher: ServiceLauncher,
    names: Vec<String>,
}

impl<'a, T: ProcessTable> ProcessLifecycle<'a, T> {
    pub fn new(ctx: &'a RunContext, table: T, launcher: ServiceLauncher) -> Self {
        Self {
            ctx,
            table,
            launcher,
            names: SERVICE_PROCESS_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Override the process image names the service may run under
    pub fn with_process_names(mut self, names: &[&str]) -> Self {
        self.names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Check the process table for the service
    pub fn is_running(&self) -> Result<bool, InstallerError> {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        Ok(!self.table.running(&names)?.is_empty())
    }

    /// Forcefully stop every known variant of the service. Not running is
    /// success.
    pub fn stop(&self) -> Result<StopOutcome, InstallerError> {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        let running = self.table.running(&names).inspect_err(|e| {
            self.ctx.error(format!("Could not query the process table: {e}"));
        })?;

        if running.is_empty() {
            self.ctx.info("Ollama is not running");
            return Ok(StopOutcome::NotRunning);
        }

        let mut results = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let outcome = self.table.terminate(name);
            match &outcome {
                TerminateOutcome::Terminated => self.ctx.info(format!("Terminated {name}")),
                TerminateOutcome::NotFound => self.ctx.info(format!("{name} was not running")),
                TerminateOutcome::Failed(detail) => {
                    self.ctx.error(format!("Failed to terminate {name}: {detail}"))
                }
            }
            results.push((name.clone(), outcome));
        }
        Ok(StopOutcome::Stopped(results))
    }

    pub async fn start(&self) -> Result<StartOutcome, InstallerError> {
        self.ctx
            .info(format!("Starting Ollama: {}", self.launcher.command_line()));

        let outcome = self.launcher.launch().await.inspect_err(|e| {
            self.ctx.error(format!("Failed to start Ollama: {e}"));
        })?;

        match &outcome {
            StartOutcome::Started => self.ctx.info("Ollama started"),
            StartOutcome::Failed(stderr) => {
                self.ctx.error(format!("Ollama failed to start: {stderr}"))
            }
            StartOutcome::StartedAfterTimeout => {
                self.ctx.info("Ollama started (forced timeout)")
            }
        }
        Ok(outcome)
    }

    /// `stop()` then `start()`
    pub async fn restart(&self) -> Result<(StopOutcome, StartOutcome), InstallerError> {
        let stopped = self.stop()?;
        let started = self.start().await?;
        Ok((stopped, started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::context::RunLog;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeTable {
        running: Vec<String>,
        failing: Vec<String>,
        terminated: RefCell<Vec<String>>,
    }

    impl ProcessTable for &FakeTable {
        fn running(&self, names: &[&str]) -> Result<Vec<String>, InstallerError> {
            Ok(self
                .running
                .iter()
                .filter(|r| names.contains(&r.as_str()))
                .cloned()
                .collect())
        }

        fn terminate(&self, name: &str) -> TerminateOutcome {
            self.terminated.borrow_mut().push(name.to_string());
            if self.failing.iter().any(|f| f == name) {
                TerminateOutcome::Failed("access denied".into())
            } else if self.running.iter().any(|r| r == name) {
                TerminateOutcome::Terminated
            } else {
                TerminateOutcome::NotFound
            }
        }
    }

    fn context(dir: &tempfile::TempDir) -> RunContext {
        RunContext::new(RunLog::create_in(dir.path()))
    }

    fn noop_launcher() -> ServiceLauncher {
        ServiceLauncher::new("true", Vec::new())
    }

    #[test]
    fn stop_with_nothing_running_issues_no_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let table = FakeTable::default();

        let lifecycle = ProcessLifecycle::new(&ctx, &table, noop_launcher());
        let outcome = lifecycle.stop().unwrap();

        assert_eq!(outcome, StopOutcome::NotRunning);
        assert!(table.terminated.borrow().is_empty());
        let log = std::fs::read_to_string(ctx.log_path()).unwrap();
        assert!(log.contains("Ollama is not running"));
    }

    #[test]
    fn one_failed_terminate_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let table = FakeTable {
            running: vec!["ollama app.exe".into(), "ollama.exe".into()],
            failing: vec!["ollama app.exe".into()],
            ..FakeTable::default()
        };

        let lifecycle = ProcessLifecycle::new(&ctx, &table, noop_launcher())
            .with_process_names(&["ollama app.exe", "ollama.exe"]);
        let outcome = lifecycle.stop().unwrap();

        assert_eq!(
            *table.terminated.borrow(),
            vec!["ollama app.exe".to_string(), "ollama.exe".to_string()]
        );
        assert_eq!(
            outcome,
            StopOutcome::Stopped(vec![
                ("ollama app.exe".into(), TerminateOutcome::Failed("access denied".into())),
                ("ollama.exe".into(), TerminateOutcome::Terminated),
            ])
        );
        assert!(!outcome.all_stopped());
    }

    #[cfg(unix)]
    fn sh(script: &str) -> ServiceLauncher {
        ServiceLauncher::new("sh", vec!["-c".into(), script.into()])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quiet_launcher_is_started() {
        assert_eq!(sh("exit 0").launch().await.unwrap(), StartOutcome::Started);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_output_is_a_failed_start() {
        let outcome = sh("echo 'bind: address already in use' >&2; exit 1")
            .launch()
            .await
            .unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Failed("bind: address already in use".into())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_timeout_kills_launcher_and_assumes_started() {
        let launcher = sh("sleep 30").with_probe_timeout(Duration::from_millis(100));
        let started_at = std::time::Instant::now();

        assert_eq!(launcher.launch().await.unwrap(), StartOutcome::StartedAfterTimeout);
        assert!(started_at.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_stops_then_starts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir);
        let table = FakeTable {
            running: vec!["ollama".into()],
            ..FakeTable::default()
        };

        let lifecycle =
            ProcessLifecycle::new(&ctx, &table, sh("exit 0")).with_process_names(&["ollama"]);
        let (stopped, started) = lifecycle.restart().await.unwrap();

        assert_eq!(
            stopped,
            StopOutcome::Stopped(vec![("ollama".into(), TerminateOutcome::Terminated)])
        );
        assert_eq!(started, StartOutcome::Started);
        let log = std::fs::read_to_string(ctx.log_path()).unwrap();
        let terminated_at = log.find("Terminated ollama").unwrap();
        let started_at = log.find("Ollama started").unwrap();
        assert!(terminated_at < started_at);
    }
}
