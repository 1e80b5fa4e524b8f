//! UDS client for the CLI subcommands.

use tokio::net::UnixStream;

use agtmux_core::guard::WriteGuards;
use agtmux_core::types::{ActivityState, TargetKind};
use agtmux_proto::rpc::{KillMode, Request, Response};
use agtmux_proto::{read_frame, write_frame};

use crate::cli::{AckOpts, KillOpts, SendOpts, SnapshotOpts, TargetsCmd};
use crate::projection::export_json_v1;

async fn call(socket_path: &str, request: &Request) -> anyhow::Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;
    let (mut reader, mut writer) = stream.into_split();

    write_frame(&mut writer, request).await?;
    let response: Option<Response> = read_frame(&mut reader).await?;
    response.ok_or_else(|| anyhow::anyhow!("daemon closed the connection"))
}

/// Exit with the error's category code after printing it.
fn bail(code: agtmux_proto::ErrorCode, message: &str) -> ! {
    eprintln!("{code}: {message}");
    std::process::exit(code.exit_code());
}

fn fresh_request_ref() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("cli-{}-{nanos}", std::process::id())
}

/// `agtmux status` — one-line daemon summary.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let resp = call(socket_path, &Request::FetchSnapshot).await?;
    let snapshot = match resp {
        Response::Snapshot(s) => s,
        Response::Error { code, message } => bail(code, &message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    };

    let managed = snapshot
        .panes
        .iter()
        .filter(|p| p.pane.presence == agtmux_core::types::PanePresence::Managed)
        .count();
    let attention = snapshot
        .panes
        .iter()
        .filter(|p| p.pane.attention_state.is_actionable())
        .count();

    println!("agtmux daemon running");
    println!(
        "Targets: {} | Sessions: {} | Panes: {} ({managed} agents, {attention} need attention)",
        snapshot.targets.len(),
        snapshot.sessions.len(),
        snapshot.panes.len(),
    );
    if snapshot.partial_results {
        println!("note: one or more targets returned partial results");
    }
    Ok(())
}

/// `agtmux snapshot` — table or v1 JSON export.
pub async fn cmd_snapshot(socket_path: &str, opts: &SnapshotOpts) -> anyhow::Result<()> {
    let resp = call(socket_path, &Request::FetchSnapshot).await?;
    let snapshot = match resp {
        Response::Snapshot(s) => s,
        Response::Error { code, message } => bail(code, &message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&export_json_v1(&snapshot))?);
        return Ok(());
    }

    for session in &snapshot.sessions {
        let pin = if session.pinned { "*" } else { " " };
        println!(
            "{pin} {}/{} [{:?}]",
            session.target,
            session.session_label.as_deref().unwrap_or(&session.session_name),
            session.health,
        );
        for pane in snapshot
            .panes
            .iter()
            .filter(|p| {
                p.pane.identity.target == session.target
                    && p.pane.identity.session_name == session.session_name
            })
        {
            println!(
                "    {:>5}  {:<8} {:<10} {}",
                pane.pane.identity.pane_id,
                pane.display_state,
                pane.pane.agent_type.to_string(),
                pane.pane.current_cmd,
            );
        }
    }
    Ok(())
}

/// `agtmux targets …`
pub async fn cmd_targets(socket_path: &str, cmd: TargetsCmd) -> anyhow::Result<()> {
    match cmd {
        TargetsCmd::Add {
            name,
            kind,
            connection_ref,
            default,
        } => {
            let kind = match kind.as_str() {
                "local" => TargetKind::Local,
                "ssh" => TargetKind::Ssh,
                other => anyhow::bail!("unknown target kind: {other}"),
            };
            let resp = call(
                socket_path,
                &Request::AddTarget {
                    name,
                    kind,
                    connection_ref,
                    is_default: default,
                },
            )
            .await?;
            match resp {
                Response::Target(t) => println!("added target {} ({})", t.target_name, t.kind),
                Response::Error { code, message } => bail(code, &message),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        TargetsCmd::Remove { name } => {
            match call(socket_path, &Request::RemoveTarget { name: name.clone() }).await? {
                Response::Ok => println!("removed target {name}"),
                Response::Error { code, message } => bail(code, &message),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        TargetsCmd::Connect { name } => {
            match call(socket_path, &Request::ConnectTarget { name }).await? {
                Response::Target(t) => {
                    println!("target {}: {:?}", t.target_name, t.health)
                }
                Response::Error { code, message } => bail(code, &message),
                other => anyhow::bail!("unexpected response: {other:?}"),
            }
        }
        TargetsCmd::List => match call(socket_path, &Request::FetchSnapshot).await? {
            Response::Snapshot(s) => {
                for t in &s.targets {
                    let default = if t.is_default { " (default)" } else { "" };
                    println!("{} [{}] {:?}{default}", t.target_name, t.kind, t.health);
                }
            }
            Response::Error { code, message } => bail(code, &message),
            other => anyhow::bail!("unexpected response: {other:?}"),
        },
    }
    Ok(())
}

fn parse_guards(
    if_runtime: Option<String>,
    if_state: Option<String>,
    if_updated_within: Option<u64>,
    force_stale: bool,
) -> anyhow::Result<WriteGuards> {
    let if_state = match if_state {
        None => None,
        Some(s) => Some(
            s.parse::<ActivityState>()
                .map_err(|e| anyhow::anyhow!("{e}"))?,
        ),
    };
    Ok(WriteGuards {
        if_runtime,
        if_state,
        if_updated_within,
        force_stale,
    })
}

/// `agtmux send` — guarded text delivery.
pub async fn cmd_send(socket_path: &str, opts: &SendOpts) -> anyhow::Result<()> {
    let guards = parse_guards(
        opts.if_runtime.clone(),
        opts.if_state.clone(),
        opts.if_updated_within,
        opts.force_stale,
    )?;
    let resp = call(
        socket_path,
        &Request::SendText {
            target: opts.target.clone(),
            pane_id: opts.pane_id.clone(),
            text: opts.text.clone(),
            request_ref: fresh_request_ref(),
            enter: opts.enter,
            paste: opts.paste,
            guards,
        },
    )
    .await?;

    match resp {
        Response::Action(action) if action.is_ok() => {
            println!("sent ({})", action.action_id);
            Ok(())
        }
        Response::Action(action) => {
            let code = action.error_code.unwrap_or(agtmux_proto::ErrorCode::Transport);
            if let Some(observed) = &action.observed {
                eprintln!(
                    "observed: runtime={} state={} updated_at={}",
                    observed.observed_runtime_id,
                    observed.observed_state,
                    observed.observed_updated_at,
                );
            }
            bail(code, action.message.as_deref().unwrap_or("send failed"));
        }
        Response::Error { code, message } => bail(code, &message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}

/// `agtmux kill` — guarded interrupt or signal.
pub async fn cmd_kill(socket_path: &str, opts: &KillOpts) -> anyhow::Result<()> {
    let mode = match opts.mode.as_str() {
        "key" => KillMode::Key,
        "signal" => KillMode::Signal,
        other => anyhow::bail!("unknown kill mode: {other}"),
    };
    let guards = parse_guards(opts.if_runtime.clone(), None, None, opts.force_stale)?;
    let resp = call(
        socket_path,
        &Request::Kill {
            target: opts.target.clone(),
            pane_id: opts.pane_id.clone(),
            request_ref: fresh_request_ref(),
            mode,
            signal: Some(opts.signal.clone()),
            guards,
        },
    )
    .await?;

    match resp {
        Response::Action(action) if action.is_ok() => {
            println!("killed ({})", action.action_id);
            Ok(())
        }
        Response::Action(action) => {
            let code = action.error_code.unwrap_or(agtmux_proto::ErrorCode::Transport);
            bail(code, action.message.as_deref().unwrap_or("kill failed"));
        }
        Response::Error { code, message } => bail(code, &message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}

/// `agtmux attention` — list both streams.
pub async fn cmd_attention(socket_path: &str) -> anyhow::Result<()> {
    match call(socket_path, &Request::FetchAttention).await? {
        Response::Attention {
            review,
            informational,
        } => {
            println!("review ({}):", review.len());
            for item in &review {
                let marker = if item.unread { "●" } else { " " };
                println!(
                    "  {marker} {} {:?} {} — {}",
                    item.id, item.kind, item.pane.pane_id, item.summary
                );
            }
            println!("informational ({}):", informational.len());
            for item in &informational {
                let marker = if item.unread { "●" } else { " " };
                println!(
                    "  {marker} {} {} — {}",
                    item.id, item.pane.pane_id, item.summary
                );
            }
            Ok(())
        }
        Response::Error { code, message } => bail(code, &message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}

/// `agtmux ack [id]`
pub async fn cmd_ack(socket_path: &str, opts: &AckOpts) -> anyhow::Result<()> {
    let request = match &opts.id {
        Some(id) => Request::Acknowledge { id: id.clone() },
        None => Request::AcknowledgeAll,
    };
    match call(socket_path, &request).await? {
        Response::AckCount { acknowledged } => {
            println!("acknowledged {acknowledged}");
            Ok(())
        }
        Response::Error { code, message } => bail(code, &message),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
}
