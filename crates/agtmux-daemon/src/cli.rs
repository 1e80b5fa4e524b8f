//! CLI definition using clap derive.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agtmux", about = "session-first operations plane for agent tmux panes")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/agtmux/agtmuxd.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (poll loop + UDS server)
    Daemon(DaemonOpts),
    /// Show daemon summary
    Status,
    /// Print the dashboard snapshot
    Snapshot(SnapshotOpts),
    /// Manage targets (local host and ssh hosts)
    #[command(subcommand)]
    Targets(TargetsCmd),
    /// Send text to a pane, guarded
    Send(SendOpts),
    /// Kill the process in a pane, guarded
    Kill(KillOpts),
    /// List attention items (review + informational)
    Attention,
    /// Acknowledge attention items
    Ack(AckOpts),
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Snapshot poll interval in milliseconds
    #[arg(long, default_value = "500")]
    pub poll_interval_ms: u64,

    /// tmux socket path for the local target
    #[arg(long)]
    pub tmux_socket: Option<String>,

    /// Data directory for state.db and logs (defaults next to the socket)
    #[arg(long)]
    pub data_dir: Option<String>,
}

#[derive(clap::Args)]
pub struct SnapshotOpts {
    /// Emit the v1 JSON export instead of the human-readable table
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum TargetsCmd {
    /// Register a target
    Add {
        name: String,
        /// Target kind: local or ssh
        #[arg(long, default_value = "ssh")]
        kind: String,
        /// ssh config alias (required for ssh targets)
        #[arg(long)]
        connection_ref: Option<String>,
        #[arg(long)]
        default: bool,
    },
    /// Remove a target
    Remove { name: String },
    /// (Re-)establish a target's control channel
    Connect { name: String },
    /// List configured targets with health
    List,
}

#[derive(clap::Args)]
pub struct SendOpts {
    pub target: String,
    pub pane_id: String,
    pub text: String,

    /// Press Enter after the text
    #[arg(long)]
    pub enter: bool,

    /// Paste via tmux buffer instead of keystrokes
    #[arg(long)]
    pub paste: bool,

    /// Require this runtime id (fails with E_RUNTIME_STALE on mismatch)
    #[arg(long)]
    pub if_runtime: Option<String>,

    /// Require this activity state (snake_case)
    #[arg(long)]
    pub if_state: Option<String>,

    /// Require the pane state to be at most this many seconds old
    #[arg(long)]
    pub if_updated_within: Option<u64>,

    /// Bypass stale guards (observed values are still reported)
    #[arg(long)]
    pub force_stale: bool,
}

#[derive(clap::Args)]
pub struct KillOpts {
    pub target: String,
    pub pane_id: String,

    /// Kill mode: key (send interrupt key) or signal
    #[arg(long, default_value = "key")]
    pub mode: String,

    /// Signal name for --mode signal (default SIGTERM)
    #[arg(long, default_value = "SIGTERM")]
    pub signal: String,

    #[arg(long)]
    pub if_runtime: Option<String>,

    #[arg(long)]
    pub force_stale: bool,
}

#[derive(clap::Args)]
pub struct AckOpts {
    /// Item id to acknowledge; acknowledges everything when omitted
    pub id: Option<String>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/agtmux/agtmuxd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/agtmux-{user}/agtmuxd.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_socket_path_is_user_scoped() {
        let path = default_socket_path();
        assert!(path.ends_with("agtmuxd.sock"));
    }
}
