//! Guarded pane/session mutations, all routed through the command runner
//! so local and ssh targets share one code path.

use crate::error::TmuxError;
use crate::runner::TmuxCommandRunner;

/// Options for [`send_text`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Press Enter after the text.
    pub enter: bool,
    /// Deliver via a tmux buffer paste instead of literal keystrokes.
    /// Required for multi-line payloads that must not be interpreted.
    pub paste: bool,
}

/// Send literal text to a pane.
pub fn send_text(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
    text: &str,
    opts: SendOptions,
) -> Result<(), TmuxError> {
    if opts.paste {
        runner.run(&["set-buffer", "-b", "agtmux-paste", text])?;
        runner.run(&["paste-buffer", "-b", "agtmux-paste", "-d", "-t", pane_id])?;
    } else {
        runner.run(&["send-keys", "-t", pane_id, "-l", "--", text])?;
    }
    if opts.enter {
        runner.run(&["send-keys", "-t", pane_id, "Enter"])?;
    }
    Ok(())
}

/// Send a named key (tmux key syntax, e.g. `C-c`, `Escape`, `Enter`).
pub fn send_key(runner: &impl TmuxCommandRunner, pane_id: &str, key: &str) -> Result<(), TmuxError> {
    runner.run(&["send-keys", "-t", pane_id, key])?;
    Ok(())
}

/// Send raw bytes as hex keystrokes (`send-keys -H`).
pub fn send_bytes(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
    bytes: &[u8],
) -> Result<(), TmuxError> {
    if bytes.is_empty() {
        return Ok(());
    }
    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
    let mut args: Vec<&str> = vec!["send-keys", "-t", pane_id, "-H"];
    args.extend(hex.iter().map(String::as_str));
    runner.run(&args)?;
    Ok(())
}

/// Deliver a signal to the pane's foreground process. Runs on the tmux
/// server host, so it works for ssh targets too.
pub fn signal_pane(
    runner: &impl TmuxCommandRunner,
    pane_pid: u32,
    signal: &str,
) -> Result<(), TmuxError> {
    let sig = signal.trim_start_matches("SIG");
    runner.run(&["run-shell", &format!("kill -{sig} {pane_pid}")])?;
    Ok(())
}

pub fn kill_pane(runner: &impl TmuxCommandRunner, pane_id: &str) -> Result<(), TmuxError> {
    runner.run(&["kill-pane", "-t", pane_id])?;
    Ok(())
}

pub fn kill_session(
    runner: &impl TmuxCommandRunner,
    session_name: &str,
) -> Result<(), TmuxError> {
    runner.run(&["kill-session", "-t", session_name])?;
    Ok(())
}

pub fn rename_session(
    runner: &impl TmuxCommandRunner,
    session_name: &str,
    new_name: &str,
) -> Result<(), TmuxError> {
    runner.run(&["rename-session", "-t", session_name, new_name])?;
    Ok(())
}

/// Set the pane title (shown as `#{pane_title}`).
pub fn rename_pane(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
    title: &str,
) -> Result<(), TmuxError> {
    runner.run(&["select-pane", "-t", pane_id, "-T", title])?;
    Ok(())
}

/// Split a pane; returns the new pane id.
pub fn split_pane(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
    vertical: bool,
) -> Result<String, TmuxError> {
    let direction = if vertical { "-v" } else { "-h" };
    let out = runner.run(&[
        "split-window",
        direction,
        "-t",
        pane_id,
        "-P",
        "-F",
        "#{pane_id}",
    ])?;
    let new_id = out.trim().to_owned();
    if new_id.is_empty() {
        return Err(TmuxError::CommandFailed(
            "split-window returned no pane id".into(),
        ));
    }
    Ok(new_id)
}

pub fn resize_pane(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
    cols: u16,
    rows: u16,
) -> Result<(), TmuxError> {
    runner.run(&[
        "resize-pane",
        "-t",
        pane_id,
        "-x",
        &cols.to_string(),
        "-y",
        &rows.to_string(),
    ])?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────
