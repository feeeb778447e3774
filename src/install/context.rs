//! Run context and the per-run event log
//!
//! Every component receives a `&RunContext` instead of reaching for the
//! working directory or re-querying the OS for things already discovered.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Local;

const LOG_BASE_NAME: &str = "ollama_install";

/// Append-only, timestamped log file for one orchestrator invocation.
///
/// No handle is held between writes, so concurrent writers (including the
/// installer itself) interleave at line granularity.
#[derive(Debug, Clone)]
pub struct RunLog {
    file_path: PathBuf,
}

impl RunLog {
    /// Pick the log file for this run inside `base_dir`.
    ///
    /// `ollama_install.log` is used unless it already exists, in which case a
    /// `_<dd-mm-yyyy>_<HH-MM-SS>` suffix is added.
    pub fn create_in(base_dir: &Path) -> Self {
        let default_path = base_dir.join(format!("{LOG_BASE_NAME}.log"));
        let file_path = if default_path.exists() {
            let stamp = Local::now().format("%d-%m-%Y_%H-%M-%S");
            base_dir.join(format!("{LOG_BASE_NAME}_{stamp}.log"))
        } else {
            default_path
        };
        Self { file_path }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Append one `"<timestamp> - <message>"` record.
    ///
    /// Callers discard the result on purpose: a failed log write must never
    /// change the outcome of the operation being logged.
    pub fn append(&self, message: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "{stamp} - {message}")
    }
}

/// Explicit per-run state shared by all components.
#[derive(Debug)]
pub struct RunContext {
    log: RunLog,
    discovered_executable: RwLock<Option<PathBuf>>,
}

impl RunContext {
    /// Context logging into the current working directory
    pub fn from_current_dir() -> io::Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::new(RunLog::create_in(&cwd)))
    }

    pub fn new(log: RunLog) -> Self {
        Self {
            log,
            discovered_executable: RwLock::new(None),
        }
    }

    pub fn run_log(&self) -> &RunLog {
        &self.log
    }

    pub fn log_path(&self) -> &Path {
        self.log.file_path()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!("{message}");
        let _ = self.log.append(message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::warn!("{message}");
        let _ = self.log.append(&format!("WARNING: {message}"));
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::error!("{message}");
        let _ = self.log.append(&format!("ERROR: {message}"));
    }

    /// Last runtime executable located during this run
    pub fn discovered_executable(&self) -> Option<PathBuf> {
        self.discovered_executable
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    pub(crate) fn remember_executable(&self, path: Option<PathBuf>) {
        if let Ok(mut guard) = self.discovered_executable.write() {
            *guard = path;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_default_name_when_free() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::create_in(dir.path());
        assert_eq!(log.file_path(), dir.path().join("ollama_install.log"));
    }

    #[test]
    fn adds_timestamp_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ollama_install.log"), "previous run\n").unwrap();

        let log = RunLog::create_in(dir.path());
        let name = log.file_path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("ollama_install_"), "{name}");
        assert!(name.ends_with(".log"));
        assert_ne!(name, "ollama_install.log");
    }

    #[test]
    fn append_writes_timestamped_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::create_in(dir.path());
        log.append("first").unwrap();
        log.append("second").unwrap();

        let content = std::fs::read_to_string(log.file_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - first"));
        assert!(lines[1].ends_with(" - second"));
        // "YYYY-mm-dd HH:MM:SS - "
        assert_eq!(lines[0].find(" - "), Some(19));
    }

    #[test]
    fn context_swallows_write_failures() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(RunLog::create_in(&dir.path().join("missing").join("dir")));
        ctx.info("goes nowhere");
        assert!(!ctx.log_path().exists());
    }
}
