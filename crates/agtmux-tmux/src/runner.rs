//! TmuxCommandRunner trait plus the local and ssh executors.
//!
//! The ssh runner shells out to the user's `ssh` binary so host aliases,
//! identities, and jump hosts come from their ssh config — the daemon
//! never hard-codes credentials. Connection reuse is delegated to a
//! ControlMaster socket per alias.

use crate::error::TmuxError;

/// Trait for executing tmux commands. Enables mock injection for testing.
pub trait TmuxCommandRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError>;
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for &T {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

impl<T: TmuxCommandRunner + ?Sized> TmuxCommandRunner for Box<T> {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        (**self).run(args)
    }
}

fn collect_output(output: std::process::Output) -> Result<String, TmuxError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TmuxError::CommandFailed(format!(
            "exit code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ─── Local ────────────────────────────────────────────────────────

/// Local tmux executor using `std::process::Command`.
pub struct LocalRunner {
    tmux_bin: String,
    socket_path: Option<String>,
    socket_name: Option<String>,
}

impl LocalRunner {
    pub fn new(tmux_bin: impl Into<String>) -> Self {
        Self {
            tmux_bin: tmux_bin.into(),
            socket_path: None,
            socket_name: None,
        }
    }

    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new("tmux")
    }
}

impl TmuxCommandRunner for LocalRunner {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let mut cmd = std::process::Command::new(&self.tmux_bin);
        // Socket path takes precedence over socket name
        if let Some(ref path) = self.socket_path {
            cmd.args(["-S", path]);
        } else if let Some(ref name) = self.socket_name {
            cmd.args(["-L", name]);
        }
        cmd.args(args);
        let output = cmd.output().map_err(TmuxError::Io)?;
        collect_output(output)
    }
}

// ─── Ssh ──────────────────────────────────────────────────────────

/// Remote tmux executor: `ssh <alias> tmux <args…>`.
///
/// Arguments are shell-quoted because ssh joins them into a single remote
/// command line.
pub struct SshRunner {
    ssh_bin: String,
    host_alias: String,
    tmux_bin: String,
    connect_timeout_secs: u64,
}

impl SshRunner {
    pub fn new(host_alias: impl Into<String>) -> Self {
        Self {
            ssh_bin: "ssh".into(),
            host_alias: host_alias.into(),
            tmux_bin: "tmux".into(),
            connect_timeout_secs: 5,
        }
    }

    #[must_use]
    pub fn with_tmux_bin(mut self, bin: impl Into<String>) -> Self {
        self.tmux_bin = bin.into();
        self
    }

    pub fn host_alias(&self) -> &str {
        &self.host_alias
    }

    /// Base ssh invocation shared by command execution and taps.
    /// BatchMode forbids interactive prompts; the ControlMaster options
    /// multiplex every call for one alias over a pooled connection.
    pub fn ssh_base_args(&self) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".into(),
            "ControlMaster=auto".into(),
            "-o".into(),
            format!("ControlPath=/tmp/agtmux-ssh-{}.sock", sanitize(&self.host_alias)),
            "-o".into(),
            "ControlPersist=60".into(),
            self.host_alias.clone(),
        ]
    }

    /// Build the remote command line with each tmux argument quoted.
    pub(crate) fn remote_command(&self, args: &[&str]) -> String {
        let mut parts = vec![shell_quote(&self.tmux_bin)];
        parts.extend(args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

impl TmuxCommandRunner for SshRunner {
    fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let mut cmd = std::process::Command::new(&self.ssh_bin);
        cmd.args(self.ssh_base_args());
        cmd.arg(self.remote_command(args));
        let output = cmd.output().map_err(TmuxError::Io)?;
        collect_output(output)
    }
}

/// Single-quote a string for a POSIX shell.
pub(crate) fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | '@' | ':'))
    {
        return s.to_owned();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_local_runner() {
        let exec = LocalRunner::default();
        assert_eq!(exec.tmux_bin, "tmux");
        assert!(exec.socket_path.is_none());
        assert!(exec.socket_name.is_none());
    }

    #[test]
    fn local_with_socket_path() {
        let exec = LocalRunner::default().with_socket_path("/tmp/my.sock");
        assert_eq!(exec.socket_path, Some("/tmp/my.sock".to_string()));
    }

    #[test]
    fn blanket_ref_impl() {
        struct Mock;
        impl TmuxCommandRunner for Mock {
            fn run(&self, _args: &[&str]) -> Result<String, TmuxError> {
                Ok("ok".to_string())
            }
        }
        let mock = Mock;
        let r: &Mock = &mock;
        assert_eq!(r.run(&[]).expect("ok"), "ok");
    }

    #[test]
    fn ssh_base_args_use_batch_mode_and_control_master() {
        let runner = SshRunner::new("devbox");
        let args = runner.ssh_base_args();
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.iter().any(|a| a.starts_with("ControlPath=")));
        assert_eq!(args.last(), Some(&"devbox".to_string()));
    }

    #[test]
    fn ssh_control_path_sanitizes_alias() {
        let runner = SshRunner::new("user@host.example");
        let args = runner.ssh_base_args();
        let path = args
            .iter()
            .find(|a| a.starts_with("ControlPath="))
            .expect("control path");
        assert!(!path.contains('@'), "alias characters must be sanitized");
    }

    #[test]
    fn remote_command_quotes_arguments() {
        let runner = SshRunner::new("devbox");
        let cmd = runner.remote_command(&["send-keys", "-t", "%1", "-l", "echo hi"]);
        assert_eq!(cmd, "tmux send-keys -t %1 -l 'echo hi'");
    }

    #[test]
    fn shell_quote_passthrough_for_safe_strings() {
        assert_eq!(shell_quote("list-panes"), "list-panes");
        assert_eq!(shell_quote("%42"), "%42");
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
    }
}
