//! Machine-scope environment configuration
//!
//! Manages `OLLAMA_MODELS` and the install directory's PATH entry. An
//! existing differing value is never overwritten without confirmation.

use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::fs;

use crate::error::InstallerError;
use crate::install::context::RunContext;
use crate::install::wizard::Confirmer;

pub const MODELS_VARIABLE: &str = "OLLAMA_MODELS";
pub const PATH_VARIABLE: &str = "PATH";

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

/// Base for a machine PATH that has no value yet. The invoking process's
/// PATH carries user-private entries and is never written machine-wide.
#[cfg(windows)]
pub const DEFAULT_MACHINE_PATH: &str =
    r"%SystemRoot%\system32;%SystemRoot%;%SystemRoot%\System32\Wbem;%SystemRoot%\System32\WindowsPowerShell\v1.0\";
#[cfg(not(windows))]
pub const DEFAULT_MACHINE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Read/write access to machine-scope variables
pub trait MachineEnvironment {
    fn get(&self, name: &str) -> Result<Option<String>, InstallerError>;

    /// Elevated write. Fails with [`InstallerError::Privilege`] when
    /// elevation is refused or the write itself fails.
    fn set(&self, name: &str, value: &str) -> Result<(), InstallerError>;
}

/// Result of one configuration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvOutcome {
    /// The variable was written
    Set,
    /// Current value already matches
    AlreadySatisfied,
    /// User kept the existing, different value
    Declined,
}

pub struct EnvironmentConfigurator<'a, E, C> {
    ctx: &'a RunContext,
    env: E,
    confirmer: C,
}

impl<'a, E: MachineEnvironment, C: Confirmer> EnvironmentConfigurator<'a, E, C> {
    pub fn new(ctx: &'a RunContext, env: E, confirmer: C) -> Self {
        Self { ctx, env, confirmer }
    }

    /// Point `OLLAMA_MODELS` at `path`
    pub fn set_models_location(&self, path: &Path) -> Result<EnvOutcome, InstallerError> {
        let desired = path.display().to_string();
        let current = self.read(MODELS_VARIABLE)?;

        match current.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => self.write(MODELS_VARIABLE, &desired),
            Some(existing) if same_path(existing, &desired) => {
                self.ctx.info(format!("{MODELS_VARIABLE} already set to {existing}"));
                Ok(EnvOutcome::AlreadySatisfied)
            }
            Some(existing) => {
                let question = format!(
                    "{MODELS_VARIABLE} is currently '{existing}'. Override with '{desired}'?"
                );
                if self.confirmer.confirm(&question) {
                    self.write(MODELS_VARIABLE, &desired)
                } else {
                    self.ctx.info(format!(
                        "Kept existing {MODELS_VARIABLE}={existing} (override declined)"
                    ));
                    Ok(EnvOutcome::Declined)
                }
            }
        }
    }

    /// Make sure `install_dir` is an entry of the machine PATH
    pub fn add_install_dir_to_path(&self, install_dir: &Path) -> Result<EnvOutcome, InstallerError> {
        let entry = install_dir.display().to_string();
        let current = self.read(PATH_VARIABLE)?;

        let Some(existing) = current.filter(|v| !v.trim().is_empty()) else {
            if path_contains(DEFAULT_MACHINE_PATH, &entry) {
                self.ctx.info(format!("{entry} is on the default {PATH_VARIABLE}"));
                return Ok(EnvOutcome::AlreadySatisfied);
            }
            return self.write(PATH_VARIABLE, &append_entry(DEFAULT_MACHINE_PATH, &entry));
        };

        if path_contains(&existing, &entry) {
            self.ctx.info(format!("{entry} already on machine {PATH_VARIABLE}"));
            return Ok(EnvOutcome::AlreadySatisfied);
        }

        let question = format!("Add '{entry}' to the machine {PATH_VARIABLE}?");
        if self.confirmer.confirm(&question) {
            self.write(PATH_VARIABLE, &append_entry(&existing, &entry))
        } else {
            self.ctx.info(format!("Left machine {PATH_VARIABLE} unchanged (declined)"));
            Ok(EnvOutcome::Declined)
        }
    }

    fn read(&self, name: &str) -> Result<Option<String>, InstallerError> {
        self.env.get(name).inspect_err(|e| {
            self.ctx.error(format!("Could not read machine {name}: {e}"));
        })
    }

    fn write(&self, name: &str, value: &str) -> Result<EnvOutcome, InstallerError> {
        match self.env.set(name, value) {
            Ok(()) => {
                self.ctx.info(format!("Set machine {name}={value}"));
                Ok(EnvOutcome::Set)
            }
            Err(e) => {
                self.ctx.error(format!("Failed to set machine {name}: {e}"));
                Err(e)
            }
        }
    }
}

fn trim_dir(value: &str) -> &str {
    value.trim().trim_end_matches(['/', '\\'])
}

fn same_path(a: &str, b: &str) -> bool {
    let (a, b) = (trim_dir(a), trim_dir(b));
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn path_contains(path_value: &str, entry: &str) -> bool {
    path_value
        .split(PATH_SEPARATOR)
        .filter(|e| !e.trim().is_empty())
        .any(|e| same_path(e, entry))
}

fn append_entry(path_value: &str, entry: &str) -> String {
    let base = path_value.trim_end_matches(PATH_SEPARATOR);
    if base.is_empty() {
        entry.to_string()
    } else {
        format!("{base}{PATH_SEPARATOR}{entry}")
    }
}

/// Parse one value out of `reg query ... /v NAME` output.
///
/// Value lines look like `    NAME    REG_SZ    value`.
pub fn parse_reg_query(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut parts = line.trim_start().splitn(3, "    ");
        let key = parts.next()?;
        let kind = parts.next()?;
        if !key.eq_ignore_ascii_case(name) || !kind.trim().starts_with("REG_") {
            return None;
        }
        Some(parts.next().unwrap_or("").trim_end().to_string())
    })
}

/// Parse `NAME=value` (optionally quoted, optionally `export`ed) out of an
/// `/etc/environment` style file.
pub fn parse_environment_file(content: &str, name: &str) -> Option<String> {
    content.lines().rev().find_map(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return None;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=')?;
        if key.trim() != name {
            return None;
        }
        let value = value.trim();
        let unquoted = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        Some(unquoted.to_string())
    })
}

/// Machine environment of the host OS.
///
/// - Windows: `HKLM\...\Session Manager\Environment`, written with `reg add`
/// - Unix: `/etc/environment`, rewritten through an elevated `sh` script
#[derive(Debug, Clone)]
pub struct SystemEnvironment {
    #[cfg_attr(windows, allow(dead_code))]
    file: PathBuf,
}

#[cfg(windows)]
const ENVIRONMENT_KEY: &str = r"HKLM\SYSTEM\CurrentControlSet\Control\Session Manager\Environment";

impl Default for SystemEnvironment {
    fn default() -> Self {
        Self {
            file: PathBuf::from("/etc/environment"),
        }
    }
}

impl SystemEnvironment {
    /// Use an alternative environment file (Unix)
    pub fn with_file(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }
}

#[cfg(unix)]
impl MachineEnvironment for SystemEnvironment {
    fn get(&self, name: &str) -> Result<Option<String>, InstallerError> {
        match fs::read_to_string(&self.file) {
            Ok(content) => Ok(parse_environment_file(&content, name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<(), InstallerError> {
        use super::privilege::{run_elevated_script, shell_quote};

        let file = shell_quote(&self.file.display().to_string());
        let line = shell_quote(&format!("{name}=\"{value}\""));
        let pattern = shell_quote(&format!("^{name}="));

        let mut script = String::from("set -e\n");
        script.push_str("tmp=$(mktemp)\n");
        script.push_str(&format!("grep -v {pattern} {file} > \"$tmp\" || true\n"));
        script.push_str(&format!("printf '%s\\n' {line} >> \"$tmp\"\n"));
        script.push_str(&format!("cat \"$tmp\" > {file}\n"));
        script.push_str("rm -f \"$tmp\"\n");

        run_elevated_script(&script)
    }
}

#[cfg(windows)]
impl MachineEnvironment for SystemEnvironment {
    fn get(&self, name: &str) -> Result<Option<String>, InstallerError> {
        let output = std::process::Command::new("reg")
            .args(["query", ENVIRONMENT_KEY, "/v", name])
            .output()?;

        // reg exits 1 when the value does not exist
        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_reg_query(&String::from_utf8_lossy(&output.stdout), name))
    }

    fn set(&self, name: &str, value: &str) -> Result<(), InstallerError> {
        let kind = if name.eq_ignore_ascii_case(PATH_VARIABLE) {
            "REG_EXPAND_SZ"
        } else {
            "REG_SZ"
        };
        let args = [
            "add", ENVIRONMENT_KEY, "/v", name, "/t", kind, "/d", value, "/f",
        ]
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>();

        super::privilege::run_elevated("reg", &args)
    }
}
