//! Pane capture for heuristic sampling and `terminal_read`.

use crate::error::TmuxError;
use crate::runner::TmuxCommandRunner;

/// Capture the last `lines` lines of terminal output from a pane.
pub fn capture_pane(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
    lines: u32,
) -> Result<Vec<String>, TmuxError> {
    let start_line = format!("-{lines}");
    let output = runner.run(&["capture-pane", "-p", "-S", &start_line, "-t", pane_id])?;
    Ok(output.lines().map(String::from).collect())
}

/// Capture with escape sequences preserved (`-e`), for viewer resync
/// snapshots where colors matter.
pub fn capture_pane_escapes(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
    lines: u32,
) -> Result<String, TmuxError> {
    let start_line = format!("-{lines}");
    runner.run(&["capture-pane", "-p", "-e", "-S", &start_line, "-t", pane_id])
}

/// True when the pane is currently showing the alternate screen
/// (`#{alternate_on}`). An alternate-screen toggle invalidates buffered
/// scrollback and must surface as a `reset` frame.
pub fn alternate_screen_on(
    runner: &impl TmuxCommandRunner,
    pane_id: &str,
) -> Result<bool, TmuxError> {
    let out = runner.run(&["display-message", "-p", "-t", pane_id, "#{alternate_on}"])?;
    Ok(out.trim() == "1")
}
