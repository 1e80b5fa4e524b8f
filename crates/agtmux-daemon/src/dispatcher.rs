//! UDS request dispatcher: routes RPCs, enforces write guards and the
//! request_ref idempotency horizon, and serves streaming frames.
//!
//! The state lock is held for bookkeeping only; tmux commands execute
//! while holding just the target pane's mutation lock, so writes to
//! distinct panes proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::UnixListener;
use tokio::sync::Mutex;

use agtmux_adapters::RawAdapterEvent;
use agtmux_core::guard::{GuardViolation, WriteGuards, evaluate};
use agtmux_core::types::{PaneIdentity, TargetKind};
use agtmux_proto::error::ErrorCode;
use agtmux_proto::frames::TerminalFrame;
use agtmux_proto::rpc::{
    ActionResponse, AttachResponse, CapabilityEnvelope, KillMode, Request, Response,
};
use agtmux_proto::{read_frame, write_frame};
use agtmux_targets::TargetError;
use agtmux_tmux::runner::{SshRunner, TmuxCommandRunner};
use agtmux_tmux::tap::PaneTap;
use agtmux_tmux::{capture, mutations};

use crate::projection;
use crate::state::{DaemonState, pane_key};

/// How long a `terminal_stream` call may block waiting for a frame.
const STREAM_DEADLINE_MS: u64 = 10_000;

/// Poll interval while a stream call waits for new output.
const STREAM_POLL_MS: u64 = 50;

// ─── Server loop ──────────────────────────────────────────────────

/// Run the UDS server.
pub async fn run_server(socket_path: &str, state: Arc<Mutex<DaemonState>>) -> anyhow::Result<()> {
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    state: Arc<Mutex<DaemonState>>,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    while let Some(request) = read_frame::<_, Request>(&mut reader).await? {
        let response = handle_request(request, &state).await;
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}

// ─── Error mapping ────────────────────────────────────────────────

fn violation_code(v: &GuardViolation) -> ErrorCode {
    match v {
        GuardViolation::RuntimeStale { .. } => ErrorCode::RuntimeStale,
        GuardViolation::StateStale { .. } => ErrorCode::StateStale,
        GuardViolation::UpdateStale { .. } => ErrorCode::UpdateStale,
    }
}

fn target_error_code(e: &TargetError) -> ErrorCode {
    match e {
        TargetError::Duplicate(_) => ErrorCode::Duplicate,
        TargetError::HasReferences { .. } => ErrorCode::HasReferences,
        TargetError::NotFound(_) => ErrorCode::NotFound,
        TargetError::MissingConnectionRef(_) => ErrorCode::InvalidArgs,
    }
}

// ─── Guarded mutation plumbing ────────────────────────────────────

enum GuardedSetup {
    Ready {
        lock: Arc<Mutex<()>>,
        runner: Box<dyn TmuxCommandRunner>,
        report: agtmux_core::guard::GuardReport,
    },
    Replay(Response),
    Refused(Response),
}

/// Common front half of every guarded pane mutation: idempotency replay,
/// guard evaluation, per-pane lock and runner acquisition. Runs entirely
/// under the state lock.
async fn setup_guarded(
    state: &Arc<Mutex<DaemonState>>,
    target: &str,
    pane_id: &str,
    request_ref: &str,
    guards: &WriteGuards,
) -> GuardedSetup {
    let now = Utc::now();
    let action_id = format!("act-{request_ref}");
    let mut st = state.lock().await;

    if let Some(prior) = st.idempotency.lookup(request_ref, now) {
        return GuardedSetup::Replay(prior);
    }

    let Some(observed) = st.guard_observation(target, pane_id) else {
        let resp = Response::Action(ActionResponse::error(
            &action_id,
            ErrorCode::NotFound,
            format!("unknown pane {target}/{pane_id}"),
        ));
        st.idempotency.record(request_ref, resp.clone(), now);
        return GuardedSetup::Refused(resp);
    };

    let report = match evaluate(guards, &observed, now) {
        Ok(report) => report,
        Err((violation, report)) => {
            let resp = Response::Action(
                ActionResponse::error(&action_id, violation_code(&violation), violation.to_string())
                    .with_observed(report),
            );
            st.idempotency.record(request_ref, resp.clone(), now);
            return GuardedSetup::Refused(resp);
        }
    };

    let runner = match st.targets.runner_for(target) {
        Ok(runner) => runner,
        Err(e) => {
            let resp = Response::Action(ActionResponse::error(
                &action_id,
                target_error_code(&e),
                e.to_string(),
            ));
            st.idempotency.record(request_ref, resp.clone(), now);
            return GuardedSetup::Refused(resp);
        }
    };

    let key = pane_key(target, pane_id);
    let lock = st.pane_lock(&key);
    GuardedSetup::Ready {
        lock,
        runner,
        report,
    }
}

/// Common back half: turn the tmux result into an ActionResponse and
/// record it for replay.
async fn finish_guarded(
    state: &Arc<Mutex<DaemonState>>,
    request_ref: &str,
    report: agtmux_core::guard::GuardReport,
    result: Result<(), agtmux_tmux::TmuxError>,
) -> Response {
    let action_id = format!("act-{request_ref}");
    let resp = match result {
        Ok(()) => Response::Action(ActionResponse::ok(&action_id).with_observed(report)),
        Err(e) => Response::Action(
            ActionResponse::error(&action_id, ErrorCode::Transport, e.to_string())
                .with_observed(report),
        ),
    };
    let mut st = state.lock().await;
    st.idempotency.record(request_ref, resp.clone(), Utc::now());
    resp
}

// ─── Tap task spawning ────────────────────────────────────────────

/// Spawn the read loop for a freshly opened tap. The task owns the
/// [`PaneTap`] and appends chunks into the pane buffer.
pub fn spawn_tap_task(state: Arc<Mutex<DaemonState>>, target: String, pane_id: String) {
    let key = pane_key(&target, &pane_id);
    let task_state = Arc::clone(&state);
    let task_key = key.clone();
    let handle = tokio::spawn(async move {
        let state = task_state;
        let key = task_key;
        let tap = {
            let st = state.lock().await;
            match st.targets.get(&target) {
                Ok(record) if record.identity.kind == TargetKind::Ssh => {
                    let alias = record
                        .identity
                        .connection_ref
                        .clone()
                        .unwrap_or_else(|| target.clone());
                    Some(PaneTap::ssh(
                        &pane_id,
                        SshRunner::new(alias).ssh_base_args(),
                        "tmux",
                    ))
                }
                Ok(_) => Some(PaneTap::local(&pane_id)),
                Err(_) => None,
            }
        };
        let Some(mut tap) = tap else {
            return;
        };

        if let Err(e) = tap.start().await {
            tracing::error!(pane_id = %pane_id, error = %e, "failed to start pane tap");
            let now = Utc::now();
            let mut st = state.lock().await;
            st.router.record_failure(&target, &pane_id, now);
            return;
        }

        loop {
            match tap.read().await {
                Ok(Some(data)) => {
                    let now = Utc::now();
                    let mut st = state.lock().await;
                    st.buffer_mut(&target, &pane_id).append(&data);
                    st.note_output(&key, now);
                    st.router.record_success(&target, &pane_id);
                }
                Ok(None) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => {
                    tracing::warn!(pane_id = %pane_id, error = %e, "pane tap read error");
                    let mut st = state.lock().await;
                    st.router.record_failure(&target, &pane_id, Utc::now());
                    break;
                }
            }
        }

        let _ = tap.stop().await;
    });

    // Register the handle so pane removal can abort the read loop.
    tokio::spawn(async move {
        let mut st = state.lock().await;
        if let Some(old) = st.tap_tasks.insert(key, handle) {
            old.abort();
        }
    });
}

// ─── Request handling ─────────────────────────────────────────────

pub async fn handle_request(request: Request, state: &Arc<Mutex<DaemonState>>) -> Response {
    match request {
        // ── Targets ────────────────────────────────────────────
        Request::AddTarget {
            name,
            kind,
            connection_ref,
            is_default,
        } => {
            let mut st = state.lock().await;
            match st.targets.add_target(&name, kind, connection_ref, is_default) {
                Ok(record) => Response::Target(record.identity.clone()),
                Err(e) => Response::error(target_error_code(&e), e.to_string()),
            }
        }
        Request::RemoveTarget { name } => {
            let mut st = state.lock().await;
            match st.targets.remove_target(&name) {
                Ok(()) => {
                    st.drain_target(&name);
                    if let Err(e) = st.store.forget_target(&name) {
                        tracing::warn!("store cleanup for target {name} failed: {e}");
                    }
                    Response::Ok
                }
                Err(e) => Response::error(target_error_code(&e), e.to_string()),
            }
        }
        Request::ConnectTarget { name } => {
            let mut st = state.lock().await;
            match st.targets.connect(&name) {
                Ok(record) => Response::Target(record.identity.clone()),
                Err(e) => Response::error(target_error_code(&e), e.to_string()),
            }
        }

        // ── Reads ──────────────────────────────────────────────
        Request::FetchSnapshot => {
            let st = state.lock().await;
            Response::Snapshot(projection::project(&st))
        }
        Request::FetchCapabilities => Response::Capabilities(CapabilityEnvelope::default()),
        Request::FetchAttention => {
            let st = state.lock().await;
            Response::Attention {
                review: st.attention.review().to_vec(),
                informational: st.attention.informational().to_vec(),
            }
        }
        Request::Acknowledge { id } => {
            let mut st = state.lock().await;
            if st.attention.acknowledge(&id, Utc::now()) {
                Response::AckCount { acknowledged: 1 }
            } else {
                Response::error(ErrorCode::NotFound, format!("unknown attention item {id}"))
            }
        }
        Request::AcknowledgeAll => {
            let mut st = state.lock().await;
            let acknowledged = st.attention.acknowledge_all(Utc::now()) as u32;
            Response::AckCount { acknowledged }
        }

        // ── Event ingestion ────────────────────────────────────
        Request::IngestEvent {
            source,
            agent_type,
            event_type,
            target,
            pane_id,
            session_id,
            thread_id,
            payload,
        } => {
            let now = Utc::now();
            let raw = RawAdapterEvent {
                source,
                event_type,
                pane: PaneIdentity::new(target, String::new(), String::new(), pane_id),
                session_id,
                thread_id,
                payload,
                received_at: now,
            };
            let mut st = state.lock().await;
            match st.ingest_event(agent_type, &raw, now) {
                Ok(()) => Response::Ok,
                Err(e) => Response::error(ErrorCode::InvalidArgs, e.to_string()),
            }
        }

        // ── Guarded pane mutations ─────────────────────────────
        Request::SendText {
            target,
            pane_id,
            text,
            request_ref,
            enter,
            paste,
            guards,
        } => {
            match setup_guarded(state, &target, &pane_id, &request_ref, &guards).await {
                GuardedSetup::Replay(resp) | GuardedSetup::Refused(resp) => resp,
                GuardedSetup::Ready {
                    lock,
                    runner,
                    report,
                } => {
                    let result = {
                        let _pane = lock.lock().await;
                        mutations::send_text(
                            &runner,
                            &pane_id,
                            &text,
                            mutations::SendOptions { enter, paste },
                        )
                    };
                    finish_guarded(state, &request_ref, report, result).await
                }
            }
        }
        Request::Kill {
            target,
            pane_id,
            request_ref,
            mode,
            signal,
            guards,
        } => {
            match setup_guarded(state, &target, &pane_id, &request_ref, &guards).await {
                GuardedSetup::Replay(resp) | GuardedSetup::Refused(resp) => resp,
                GuardedSetup::Ready {
                    lock,
                    runner,
                    report,
                } => {
                    let pane_pid = {
                        let st = state.lock().await;
                        st.entry(&target, &pane_id).and_then(|e| e.info.pane_pid)
                    };
                    let result = {
                        let _pane = lock.lock().await;
                        match mode {
                            KillMode::Key => mutations::send_key(&runner, &pane_id, "C-c"),
                            KillMode::Signal => match pane_pid {
                                Some(pid) => mutations::signal_pane(
                                    &runner,
                                    pid,
                                    signal.as_deref().unwrap_or("SIGTERM"),
                                ),
                                None => Err(agtmux_tmux::TmuxError::PaneNotFound(format!(
                                    "no pid recorded for {pane_id}"
                                ))),
                            },
                        }
                    };
                    finish_guarded(state, &request_ref, report, result).await
                }
            }
        }
        Request::RenameSession {
            target,
            session_name,
            new_name,
            request_ref,
            guards,
        } => {
            // Session-level verbs are guarded against the target's first
            // pane when one exists; session existence is checked by tmux.
            match setup_session_guarded(state, &target, &session_name, &request_ref, &guards).await
            {
                GuardedSetup::Replay(resp) | GuardedSetup::Refused(resp) => resp,
                GuardedSetup::Ready {
                    lock,
                    runner,
                    report,
                } => {
                    let result = {
                        let _pane = lock.lock().await;
                        mutations::rename_session(&runner, &session_name, &new_name)
                    };
                    finish_guarded(state, &request_ref, report, result).await
                }
            }
        }
        Request::RenamePane {
            target,
            pane_id,
            title,
            request_ref,
            guards,
        } => {
            match setup_guarded(state, &target, &pane_id, &request_ref, &guards).await {
                GuardedSetup::Replay(resp) | GuardedSetup::Refused(resp) => resp,
                GuardedSetup::Ready {
                    lock,
                    runner,
                    report,
                } => {
                    let result = {
                        let _pane = lock.lock().await;
                        mutations::rename_pane(&runner, &pane_id, &title)
                    };
                    finish_guarded(state, &request_ref, report, result).await
                }
            }
        }
        Request::CreatePane {
            target,
            pane_id,
            vertical,
            request_ref,
            guards,
        } => {
            match setup_guarded(state, &target, &pane_id, &request_ref, &guards).await {
                GuardedSetup::Replay(resp) | GuardedSetup::Refused(resp) => resp,
                GuardedSetup::Ready {
                    lock,
                    runner,
                    report,
                } => {
                    let result = {
                        let _pane = lock.lock().await;
                        mutations::split_pane(&runner, &pane_id, vertical).map(|_| ())
                    };
                    finish_guarded(state, &request_ref, report, result).await
                }
            }
        }
        Request::KillPane {
            target,
            pane_id,
            request_ref,
            guards,
        } => {
            match setup_guarded(state, &target, &pane_id, &request_ref, &guards).await {
                GuardedSetup::Replay(resp) | GuardedSetup::Refused(resp) => resp,
                GuardedSetup::Ready {
                    lock,
                    runner,
                    report,
                } => {
                    let result = {
                        let _pane = lock.lock().await;
                        mutations::kill_pane(&runner, &pane_id)
                    };
                    finish_guarded(state, &request_ref, report, result).await
                }
            }
        }
        Request::KillSession {
            target,
            session_name,
            request_ref,
            guards,
        } => {
            match setup_session_guarded(state, &target, &session_name, &request_ref, &guards).await
            {
                GuardedSetup::Replay(resp) | GuardedSetup::Refused(resp) => resp,
                GuardedSetup::Ready {
                    lock,
                    runner,
                    report,
                } => {
                    let result = {
                        let _pane = lock.lock().await;
                        mutations::kill_session(&runner, &session_name)
                    };
                    finish_guarded(state, &request_ref, report, result).await
                }
            }
        }
        Request::ViewOutput {
            target,
            pane_id,
            request_ref,
            lines,
        } => {
            let now = Utc::now();
            {
                let st = state.lock().await;
                if let Some(prior) = st.idempotency.lookup(&request_ref, now) {
                    return prior;
                }
            }
            let runner = {
                let st = state.lock().await;
                st.targets.runner_for(&target)
            };
            let action_id = format!("act-{request_ref}");
            let resp = match runner {
                Err(e) => Response::error(target_error_code(&e), e.to_string()),
                Ok(runner) => match capture::capture_pane(&runner, &pane_id, lines) {
                    Ok(lines) => Response::Output {
                        result_code: "ok".into(),
                        action_id,
                        output: Some(lines.join("\n")),
                    },
                    Err(e) => Response::error(ErrorCode::Transport, e.to_string()),
                },
            };
            let mut st = state.lock().await;
            st.idempotency.record(&request_ref, resp.clone(), Utc::now());
            resp
        }

        // ── Viewer surface ─────────────────────────────────────
        Request::TerminalAttach {
            target,
            pane_id,
            guards,
        } => {
            let now = Utc::now();
            let mut st = state.lock().await;
            let Some(observed) = st.guard_observation(&target, &pane_id) else {
                return Response::Attach(AttachResponse {
                    session_id: String::new(),
                    result_code: "error".into(),
                    error_code: Some(ErrorCode::NotFound),
                });
            };
            if let Err((violation, _report)) = evaluate(&guards, &observed, now) {
                return Response::Attach(AttachResponse {
                    session_id: String::new(),
                    result_code: "error".into(),
                    error_code: Some(violation_code(&violation)),
                });
            }

            let (cols, rows) = st
                .entry(&target, &pane_id)
                .map(|e| (e.info.width, e.info.height))
                .unwrap_or((80, 24));
            match st.router.attach(&target, &pane_id, &observed.runtime_id, cols, rows) {
                Err(e) => Response::Attach(AttachResponse {
                    session_id: String::new(),
                    result_code: "error".into(),
                    error_code: Some(e.error_code()),
                }),
                Ok(session_id) => {
                    let key = pane_key(&target, &pane_id);
                    // Make sure the buffer exists so the attach anchor is
                    // meaningful even before the first chunk arrives.
                    st.buffer_mut(&target, &pane_id);
                    if st.taps.subscribe(&key) {
                        drop(st);
                        spawn_tap_task(Arc::clone(state), target, pane_id);
                    }
                    Response::Attach(AttachResponse {
                        session_id,
                        result_code: "ok".into(),
                        error_code: None,
                    })
                }
            }
        }
        Request::TerminalWrite {
            session_id,
            text,
            key,
            bytes,
            enter,
            paste,
        } => {
            let provided =
                usize::from(text.is_some()) + usize::from(key.is_some()) + usize::from(bytes.is_some());
            if provided != 1 {
                return Response::error(
                    ErrorCode::InvalidArgs,
                    "exactly one of text/key/bytes must be set",
                );
            }

            let (target, pane_id, lock, runner) = {
                let mut st = state.lock().await;
                let Some(session) = st.router.session(&session_id).cloned() else {
                    return Response::error(
                        ErrorCode::RefNotFound,
                        format!("unknown session {session_id}"),
                    );
                };
                // Write Guard re-check: a session bound to an older
                // runtime incarnation must not write.
                let Some(observed) = st.guard_observation(&session.target, &session.pane_id)
                else {
                    return Response::error(ErrorCode::RefNotFound, "pane is gone");
                };
                if !observed.runtime_id.is_empty()
                    && observed.runtime_id != session.runtime_id_at_attach
                {
                    return Response::error(
                        ErrorCode::RuntimeStale,
                        format!(
                            "session attached at {}, current runtime is {}",
                            session.runtime_id_at_attach, observed.runtime_id
                        ),
                    );
                }
                let runner = match st.targets.runner_for(&session.target) {
                    Ok(r) => r,
                    Err(e) => return Response::error(target_error_code(&e), e.to_string()),
                };
                let pane_lock = st.pane_lock(&pane_key(&session.target, &session.pane_id));
                (session.target, session.pane_id, pane_lock, runner)
            };

            let result = {
                let _pane = lock.lock().await;
                if let Some(text) = text {
                    mutations::send_text(
                        &runner,
                        &pane_id,
                        &text,
                        mutations::SendOptions { enter, paste },
                    )
                } else if let Some(key) = key {
                    mutations::send_key(&runner, &pane_id, &key)
                } else if let Some(bytes) = bytes {
                    mutations::send_bytes(&runner, &pane_id, &bytes)
                } else {
                    unreachable!("validated above")
                }
            };

            let mut st = state.lock().await;
            match result {
                Ok(()) => {
                    st.router.record_success(&target, &pane_id);
                    Response::Ok
                }
                Err(e) => {
                    st.router.record_failure(&target, &pane_id, Utc::now());
                    Response::error(ErrorCode::Transport, e.to_string())
                }
            }
        }
        Request::TerminalStream {
            session_id,
            cursor,
            lines,
        } => {
            let started = std::time::Instant::now();
            let mut cursor = cursor;
            loop {
                {
                    let mut st = state.lock().await;
                    let Some(session) = st.router.session(&session_id).cloned() else {
                        return Response::Frame(TerminalFrame::Error {
                            code: ErrorCode::RefNotFound,
                            message: format!("unknown session {session_id}"),
                        });
                    };
                    let key = pane_key(&session.target, &session.pane_id);
                    if st.router.is_degraded(&key) {
                        return Response::Frame(TerminalFrame::Error {
                            code: ErrorCode::Degraded,
                            message: "viewer degraded; fall back".into(),
                        });
                    }
                    st.buffer_mut(&session.target, &session.pane_id);
                    let DaemonState {
                        router, buffers, ..
                    } = &mut *st;
                    let buffer = buffers
                        .get(&key)
                        .unwrap_or_else(|| unreachable!("buffer created above"));
                    match router.next_frame(&session_id, buffer, cursor.take(), lines) {
                        Err(e) => {
                            return Response::Frame(TerminalFrame::Error {
                                code: e.error_code(),
                                message: e.to_string(),
                            });
                        }
                        Ok(Some(frame)) => return Response::Frame(frame),
                        Ok(None) => {}
                    }
                }

                if started.elapsed() >= Duration::from_millis(STREAM_DEADLINE_MS) {
                    return Response::error(ErrorCode::Timeout, "no frames before deadline");
                }
                tokio::time::sleep(Duration::from_millis(STREAM_POLL_MS)).await;
            }
        }
        Request::TerminalRead {
            target,
            pane_id,
            cursor,
            lines,
        } => {
            let key = pane_key(&target, &pane_id);
            let buffered = {
                let st = state.lock().await;
                st.buffers.get(&key).map(|b| match b.read_after(cursor) {
                    agtmux_feed::ReadResult::Data {
                        content,
                        last_cursor,
                    } => TerminalFrame::Delta {
                        cursor: last_cursor,
                        content,
                    },
                    _ => TerminalFrame::Output {
                        cursor: b.latest_cursor().unwrap_or_else(|| b.head_cursor()),
                        content: b.snapshot_tail(lines as usize),
                    },
                })
            };
            if let Some(frame) = buffered {
                return Response::Frame(frame);
            }

            // No live tap: fall back to a one-shot capture.
            let runner = {
                let st = state.lock().await;
                st.targets.runner_for(&target)
            };
            match runner {
                Err(e) => Response::error(target_error_code(&e), e.to_string()),
                Ok(runner) => match capture::capture_pane(&runner, &pane_id, lines) {
                    Ok(capture_lines) => Response::Frame(TerminalFrame::Output {
                        cursor: 0,
                        content: capture_lines.join("\n"),
                    }),
                    Err(e) => Response::error(ErrorCode::Transport, e.to_string()),
                },
            }
        }
        Request::TerminalResize {
            session_id,
            target,
            pane_id,
            cols,
            rows,
        } => {
            let mut st = state.lock().await;
            let key = if let Some(session_id) = session_id {
                match st.router.session(&session_id) {
                    Some(s) => pane_key(&s.target, &s.pane_id),
                    None => {
                        return Response::error(
                            ErrorCode::RefNotFound,
                            format!("unknown session {session_id}"),
                        );
                    }
                }
            } else if let (Some(target), Some(pane_id)) = (target, pane_id) {
                pane_key(&target, &pane_id)
            } else {
                return Response::error(
                    ErrorCode::InvalidArgs,
                    "resize needs a session_id or target+pane_id",
                );
            };
            st.resize.request(&key, cols, rows, Utc::now());
            Response::Ok
        }
        Request::TerminalDetach { session_id } => {
            let mut st = state.lock().await;
            if let Some(session) = st.router.session(&session_id).cloned() {
                st.router.detach(&session_id);
                let key = pane_key(&session.target, &session.pane_id);
                st.taps.unsubscribe(&key, Utc::now());
            }
            // Idempotent: detaching an unknown session is fine.
            Response::Ok
        }
        _ => Response::error(
            agtmux_proto::error::ErrorCode::Unsupported,
            "unsupported request",
        ),
    }
}

/// Session-level guard setup: anchors on the session's first pane when
/// the daemon tracks one, otherwise proceeds unguarded (the session may
/// hold only unmanaged panes).
async fn setup_session_guarded(
    state: &Arc<Mutex<DaemonState>>,
    target: &str,
    session_name: &str,
    request_ref: &str,
    guards: &WriteGuards,
) -> GuardedSetup {
    let anchor_pane = {
        let st = state.lock().await;
        st.panes
            .values()
            .find(|e| e.target == target && e.info.session_name == session_name)
            .map(|e| e.info.pane_id.clone())
    };

    match anchor_pane {
        Some(pane_id) => setup_guarded(state, target, &pane_id, request_ref, guards).await,
        None => {
            // No tracked pane: only the idempotency and runner steps apply.
            let now = Utc::now();
            let action_id = format!("act-{request_ref}");
            let mut st = state.lock().await;
            if let Some(prior) = st.idempotency.lookup(request_ref, now) {
                return GuardedSetup::Replay(prior);
            }
            if !guards.is_empty() && !guards.force_stale {
                let resp = Response::Action(ActionResponse::error(
                    &action_id,
                    ErrorCode::NotFound,
                    format!("no tracked pane in session {target}/{session_name}"),
                ));
                st.idempotency.record(request_ref, resp.clone(), now);
                return GuardedSetup::Refused(resp);
            }
            let runner = match st.targets.runner_for(target) {
                Ok(runner) => runner,
                Err(e) => {
                    let resp = Response::Action(ActionResponse::error(
                        &action_id,
                        target_error_code(&e),
                        e.to_string(),
                    ));
                    st.idempotency.record(request_ref, resp.clone(), now);
                    return GuardedSetup::Refused(resp);
                }
            };
            let lock = st.pane_lock(&format!("{target}/session:{session_name}"));
            GuardedSetup::Ready {
                lock,
                runner,
                report: agtmux_core::guard::GuardReport {
                    observed_runtime_id: String::new(),
                    observed_state: agtmux_core::types::ActivityState::Unknown,
                    observed_updated_at: now,
                    bypassed: false,
                },
            }
        }
    }
}
