//! Privilege escalation for machine-scope changes
//!
//! Only the mutation itself is elevated; reads and prompts stay in the
//! unprivileged process.

use std::process::Command;

use crate::error::InstallerError;

/// Whether this process already holds machine-scope rights
#[cfg(unix)]
pub fn is_elevated() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(windows)]
pub fn is_elevated() -> bool {
    use std::mem;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    let mut token_handle: HANDLE = HANDLE::default();

    unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token_handle).is_err() {
            return false;
        }

        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut return_length: u32 = 0;

        let queried = GetTokenInformation(
            token_handle,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut std::ffi::c_void),
            mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        )
        .is_ok();

        let _ = CloseHandle(token_handle);

        queried && elevation.TokenIsElevated != 0
    }
}

/// Run `script` with `sh`, through `sudo` unless already root
#[cfg(unix)]
pub fn run_elevated_script(script: &str) -> Result<(), InstallerError> {
    let mut command = if is_elevated() {
        Command::new("sh")
    } else {
        eprintln!("🔐 Updating machine environment (requires sudo)...");
        let mut sudo = Command::new("sudo");
        sudo.arg("sh");
        sudo
    };

    let output = command
        .arg("-c")
        .arg(script)
        .output()
        .map_err(|e| InstallerError::Privilege(format!("Failed to execute sudo: {e}")))?;

    if !output.status.success() {
        return Err(InstallerError::Privilege(format!(
            "elevated command exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}

/// Run `program args...` elevated. When the token is not elevated the
/// command goes through a UAC prompt (`Start-Process -Verb RunAs`).
#[cfg(windows)]
pub fn run_elevated(program: &str, args: &[String]) -> Result<(), InstallerError> {
    let spawned = if is_elevated() {
        Command::new(program).args(args).output()
    } else {
        // Start-Process joins the list with spaces, so quote each argument
        let arg_list = args
            .iter()
            .map(|a| windows_arg_quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        let script = format!(
            "$p = Start-Process -FilePath {} -ArgumentList {} -Verb RunAs -Wait -PassThru -WindowStyle Hidden; exit $p.ExitCode",
            powershell_quote(program),
            powershell_quote(&arg_list)
        );
        Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output()
    };
    let output = spawned
        .map_err(|e| InstallerError::Privilege(format!("Failed to request elevation: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            "elevation refused or command failed".to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(InstallerError::Privilege(format!(
            "{program} exited with code {}: {detail}",
            output.status.code().unwrap_or(-1)
        )));
    }

    Ok(())
}

/// Single-quoted PowerShell literal
#[cfg(windows)]
fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote one argument for the MSVCRT command-line parser
#[cfg(any(windows, test))]
fn windows_arg_quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::from('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.push_str(&"\\".repeat(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.push_str(&"\\".repeat(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Single-quoted POSIX shell literal
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn windows_arg_quote_follows_msvcrt_rules() {
        assert_eq!(windows_arg_quote("/f"), "/f");
        assert_eq!(
            windows_arg_quote(r"HKLM\SYSTEM\Session Manager"),
            r#""HKLM\SYSTEM\Session Manager""#
        );
        assert_eq!(windows_arg_quote(r"C:\My Dir\"), r#""C:\My Dir\\""#);
        assert_eq!(windows_arg_quote(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(windows_arg_quote(""), r#""""#);
    }
}
