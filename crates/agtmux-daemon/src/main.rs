//! agtmux: session-first operations daemon for AI-agent tmux panes.
//! Single binary embedding the daemon and its CLI client.

use clap::Parser;

use agtmux_daemon::{cli, client, poll_loop};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.clone().unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("AGTMUX_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("agtmux daemon starting");
            poll_loop::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Status => client::cmd_status(&socket_path).await?,
        cli::Command::Snapshot(opts) => client::cmd_snapshot(&socket_path, &opts).await?,
        cli::Command::Targets(cmd) => client::cmd_targets(&socket_path, cmd).await?,
        cli::Command::Send(opts) => client::cmd_send(&socket_path, &opts).await?,
        cli::Command::Kill(opts) => client::cmd_kill(&socket_path, &opts).await?,
        cli::Command::Attention => client::cmd_attention(&socket_path).await?,
        cli::Command::Ack(opts) => client::cmd_ack(&socket_path, &opts).await?,
    }

    Ok(())
}
