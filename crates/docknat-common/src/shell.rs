//! Running system tools through `/bin/sh`.
//!
//! Every value interpolated into a command line (chain names from the config
//! file, rule fields read back from iptables) goes through [`shellquote`].
//! [`exec`] never treats a non-zero exit as an error: iptables reports
//! "no such rule" through its exit status and callers need to see it.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{NatError, NatResult};

/// The iptables binary driven by the daemon.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

const SHELL: &str = "/bin/sh";

/// Characters that keep their meaning inside double quotes.
static DQUOTE_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[$`"\\\n]"#).expect("static pattern"));

/// Wraps `s` in double quotes, backslash-escaping `$`, `` ` ``, `"`, `\` and
/// newline.
///
/// ```
/// use docknat_common::shell::shellquote;
///
/// assert_eq!(shellquote("172.17.0.2:80"), "\"172.17.0.2:80\"");
/// assert_eq!(shellquote("a\"b"), "\"a\\\"b\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let body = DQUOTE_SPECIAL.replace_all(s, |c: &Captures| format!("\\{}", &c[0]));
    format!("\"{body}\"")
}

/// Quotes each argument and joins them with single spaces.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    let quoted: Vec<String> = args.iter().map(|a| shellquote(a.as_ref())).collect();
    quoted.join(" ")
}

/// Exit status and trimmed output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-empty stdout and stderr, newline separated.
    pub fn combined_output(&self) -> String {
        [self.stdout.as_str(), self.stderr.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Turns this result into [`NatError::ShellCommandFailed`] for `command`.
    pub fn into_error(self, command: &str) -> NatError {
        let output = self.combined_output();
        NatError::ShellCommandFailed {
            command: command.to_string(),
            exit_code: self.exit_code,
            output,
        }
    }
}

/// Runs `cmd` with `/bin/sh -c` and waits for it.
///
/// Fails only if the shell cannot be spawned.
pub async fn exec(cmd: &str) -> NatResult<ExecResult> {
    trace!(command = %cmd, "exec");

    let output = Command::new(SHELL)
        .args(["-c", cmd])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| NatError::ShellExec {
            command: cmd.to_string(),
            source,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        debug!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command exited non-zero"
        );
    }

    Ok(result)
}

/// Like [`exec`], but a non-zero exit becomes
/// [`NatError::ShellCommandFailed`]. Returns stdout.
pub async fn exec_or_throw(cmd: &str) -> NatResult<String> {
    let result = exec(cmd).await?;
    if !result.success() {
        return Err(result.into_error(cmd));
    }
    Ok(result.stdout)
}
