//! Windows process control using `tasklist` / `taskkill`

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{ProcessTable, ServiceLauncher, TerminateOutcome};
use crate::error::InstallerError;

/// Tray app first: it respawns the server if only `ollama.exe` is killed
pub const SERVICE_PROCESS_NAMES: &[&str] = &["ollama app.exe", "ollama.exe"];

const TRAY_APP: &str = "ollama app.exe";

/// taskkill exit code when no process matched the image name
const TASKKILL_NOT_FOUND: i32 = 128;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn running(&self, names: &[&str]) -> Result<Vec<String>, InstallerError> {
        let output = Command::new("tasklist")
            .args(["/FO", "CSV", "/NH"])
            .output()
            .map_err(|e| InstallerError::Process(format!("Failed to execute tasklist: {e}")))?;

        if !output.status.success() {
            return Err(InstallerError::Process(format!(
                "tasklist failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let listed = parse_tasklist(&String::from_utf8_lossy(&output.stdout));
        Ok(names
            .iter()
            .filter(|name| listed.iter().any(|image| image.eq_ignore_ascii_case(name)))
            .map(|name| name.to_string())
            .collect())
    }

    fn terminate(&self, name: &str) -> TerminateOutcome {
        let output = match Command::new("taskkill").args(["/F", "/IM", name]).output() {
            Ok(output) => output,
            Err(e) => return TerminateOutcome::Failed(format!("Failed to execute taskkill: {e}")),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(0) => TerminateOutcome::Terminated,
            Some(TASKKILL_NOT_FOUND) => TerminateOutcome::NotFound,
            _ if stderr.contains("not found") => TerminateOutcome::NotFound,
            code => TerminateOutcome::Failed(format!(
                "taskkill exited with {}: {}",
                code.unwrap_or(-1),
                stderr.trim()
            )),
        }
    }
}

/// Image names from `tasklist /FO CSV /NH` output
fn parse_tasklist(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('"')?;
            let end = rest.find('"')?;
            Some(rest[..end].to_string())
        })
        .collect()
}

/// `Start-Process` on the tray app when present, otherwise `ollama.exe serve`
pub fn launcher(executable: Option<&Path>) -> ServiceLauncher {
    let install_dir = executable
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(crate::config::default_install_dir);
    let tray = install_dir.join(TRAY_APP);

    let script = if tray.is_file() {
        format!(
            "Start-Process -FilePath {} -WindowStyle Hidden",
            quote(&tray)
        )
    } else {
        let server = executable
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("ollama.exe"));
        format!(
            "Start-Process -FilePath {} -ArgumentList 'serve' -WindowStyle Hidden",
            quote(&server)
        )
    };

    ServiceLauncher::new(
        "powershell",
        vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            script,
        ],
    )
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_image_names() {
        let output = "\"System Idle Process\",\"0\",\"Services\",\"0\",\"8 K\"\r\n\
                      \"ollama app.exe\",\"4120\",\"Console\",\"1\",\"21,400 K\"\r\n\
                      \"ollama.exe\",\"5532\",\"Console\",\"1\",\"120,004 K\"\r\n";
        assert_eq!(
            parse_tasklist(output),
            vec!["System Idle Process", "ollama app.exe", "ollama.exe"]
        );
    }
}
