//! Live tailing of the installer log while the installer runs
//!
//! The tailer polls the file on a fixed interval and stops as soon as the
//! watched process exits. It can miss the last lines written right before
//! exit; the supervisor copies the complete installer log into the run log
//! afterwards, and the captured stderr is the authoritative failure detail.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Publishes the exit of a child process. Dropping it also counts as exit.
#[derive(Debug)]
pub struct ExitSignal(watch::Sender<bool>);

impl ExitSignal {
    pub fn exited(self) {
        let _ = self.0.send(true);
    }
}

/// Liveness view of a child process, observed by the tailer.
#[derive(Debug, Clone)]
pub struct ProcessLiveness(watch::Receiver<bool>);

impl ProcessLiveness {
    pub fn is_alive(&self) -> bool {
        !*self.0.borrow()
    }

    /// Resolves once the process has exited
    pub async fn exited(&mut self) {
        let _ = self.0.wait_for(|exited| *exited).await;
    }
}

/// Linked exit signal / liveness pair for one child process
pub fn liveness_pair() -> (ExitSignal, ProcessLiveness) {
    let (tx, rx) = watch::channel(false);
    (ExitSignal(tx), ProcessLiveness(rx))
}

/// Incremental reader over a growing log file.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    pending: Vec<u8>,
    interval: Duration,
}

impl LogTailer {
    /// Tail from the beginning of the file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            pending: Vec::new(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Read whatever was appended since the last poll and return the
    /// complete lines. A trailing partial line is kept for the next poll.
    pub fn poll(&mut self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            // truncated or replaced
            self.offset = 0;
            self.pending.clear();
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::new();
        let read = file.read_to_end(&mut buf)?;
        self.offset += read as u64;
        self.pending.extend_from_slice(&buf);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        Ok(lines)
    }

    /// Partial line left over once tailing ends
    pub fn take_pending(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string())
    }

    /// Poll until `liveness` reports exit, handing every new line to `emit`.
    ///
    /// Returns the number of lines emitted.
    pub async fn run<F>(mut self, mut liveness: ProcessLiveness, mut emit: F) -> usize
    where
        F: FnMut(String) + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut emitted = 0;

        loop {
            tokio::select! {
                _ = liveness.exited() => break,
                _ = ticker.tick() => match self.poll() {
                    Ok(lines) => {
                        for line in lines {
                            emit(line);
                            emitted += 1;
                        }
                    }
                    // Locked by the writer or briefly unavailable: next tick
                    Err(e) => debug!("Log tail of {} deferred: {e}", self.path.display()),
                },
            }
        }

        if let Some(rest) = self.take_pending() {
            emit(rest);
            emitted += 1;
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn poll_returns_only_new_complete_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.log");
        let mut tailer = LogTailer::new(&path);

        assert!(tailer.poll().unwrap().is_empty());

        append(&path, "one\ntw");
        assert_eq!(tailer.poll().unwrap(), vec!["one"]);

        append(&path, "o\r\nthree\n");
        assert_eq!(tailer.poll().unwrap(), vec!["two", "three"]);
        assert!(tailer.poll().unwrap().is_empty());
    }

    #[tokio::test]
    async fn emits_appended_lines_once_and_stops_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.log");
        append(&path, "a\nb\n");

        let interval = Duration::from_millis(20);
        let (exit, liveness) = liveness_pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let tailer = LogTailer::new(&path).with_interval(interval);
        let handle = tokio::spawn(tailer.run(liveness.clone(), move |line| {
            sink.lock().unwrap().push(line);
        }));

        tokio::time::sleep(Duration::from_millis(80)).await;
        append(&path, "c\n");
        tokio::time::sleep(Duration::from_millis(80)).await;
        append(&path, "d\n");
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(liveness.is_alive());
        let exited_at = Instant::now();
        exit.exited();

        let emitted = tokio::time::timeout(interval * 5, handle)
            .await
            .expect("tailer did not stop after exit")
            .unwrap();
        assert!(exited_at.elapsed() < interval * 5);

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(emitted, 4);
    }

    #[tokio::test]
    async fn dropped_signal_counts_as_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (exit, liveness) = liveness_pair();
        drop(exit);

        let tailer = LogTailer::new(dir.path().join("never.log"))
            .with_interval(Duration::from_millis(10));
        let emitted = tokio::time::timeout(Duration::from_secs(1), tailer.run(liveness, |_| {}))
            .await
            .unwrap();
        assert_eq!(emitted, 0);
    }
}
