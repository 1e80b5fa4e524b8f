//! Daemon main loop: per-target topology polls, heuristic sampling,
//! resolver ticks, reconnect sweeps, resize flushes, and tap grace
//! closes. Wires the UDS server alongside and waits for shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use agtmux_store::Store;
use agtmux_tmux::{capture, mutations};

use crate::cli::DaemonOpts;
use crate::dispatcher;
use crate::state::{DaemonState, pane_key};

/// Fast poll interval while viewers are streaming (milliseconds).
const FAST_POLL_MS: u64 = 100;

/// Lines of capture tail fed to classification and heuristics.
const SAMPLE_LINES: u32 = 40;

/// Run the daemon: poll loop plus UDS server, until a shutdown signal.
pub async fn run_daemon(opts: DaemonOpts, socket_path: &str) -> anyhow::Result<()> {
    let data_dir = match &opts.data_dir {
        Some(dir) => std::path::PathBuf::from(dir),
        None => std::path::Path::new(socket_path)
            .parent()
            .map(std::path::Path::to_path_buf)
            .unwrap_or_else(|| std::path::PathBuf::from(".")),
    };
    std::fs::create_dir_all(&data_dir)?;

    // A store that cannot open or migrate is corrupt: fatal at boot.
    let store = Store::open(&data_dir.join("state.db"))
        .map_err(|e| anyhow::anyhow!("state.db unusable: {e}"))?;

    let state = Arc::new(Mutex::new(DaemonState::new(store)));

    // UDS server
    let server_state = Arc::clone(&state);
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher::run_server(&server_socket, server_state).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Poll loop
    let poll_state = Arc::clone(&state);
    let poll_ms = opts.poll_interval_ms;
    let poll_handle = tokio::spawn(async move {
        run_poll_loop(poll_state, poll_ms).await;
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    tokio::select! {
        () = shutdown => {}
        _ = poll_handle => {
            tracing::warn!("poll loop exited unexpectedly");
        }
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
        }
    }

    let _ = std::fs::remove_file(socket_path);
    Ok(())
}

/// The periodic tick. Target failures are isolated: one failing ssh host
/// never delays the others, it just records its own backoff.
pub async fn run_poll_loop(state: Arc<Mutex<DaemonState>>, poll_ms: u64) {
    loop {
        let now = Utc::now();

        let pollable = {
            let st = state.lock().await;
            st.targets.pollable(now)
        };

        for target in pollable {
            poll_target(&state, &target).await;
        }

        {
            let mut st = state.lock().await;
            st.resolve_tick(now);
            st.idempotency.prune(now);
        }

        flush_resizes(&state).await;
        close_due_taps(&state).await;

        // Fast mode while any viewer is streaming.
        let interval = {
            let st = state.lock().await;
            if st.router.session_count() > 0 {
                FAST_POLL_MS.min(poll_ms)
            } else {
                poll_ms
            }
        };
        tokio::time::sleep(Duration::from_millis(interval)).await;
    }
}

/// Poll one target: topology, stable-order allocation, heuristic samples.
async fn poll_target(state: &Arc<Mutex<DaemonState>>, target: &str) {
    let now = Utc::now();
    let runner = {
        let st = state.lock().await;
        match st.targets.runner_for(target) {
            Ok(runner) => runner,
            Err(_) => return,
        }
    };

    match agtmux_tmux::list_panes(&runner) {
        Err(e) => {
            tracing::debug!(target = %target, "poll failed: {e}");
            let mut st = state.lock().await;
            let _ = st.targets.record_poll_failure(target, now);
            st.drain_target(target);
        }
        Ok(panes) => {
            let pane_count = panes.len();
            let sample_candidates: Vec<String> = {
                let mut st = state.lock().await;
                st.apply_topology(target, panes, now);
                let _ = st.targets.record_poll_success(target, false, pane_count, now);

                // Stable-order slots for newly seen sessions.
                let sessions: Vec<String> = st
                    .panes
                    .values()
                    .filter(|e| e.target == target && !e.info.session_name.is_empty())
                    .map(|e| e.info.session_name.clone())
                    .collect();
                for session in sessions {
                    let _ = st.store.ensure_stable_order(target, &session);
                }

                // Capture only panes that are managed or look agent-like;
                // everything else stays untouched.
                st.panes
                    .iter()
                    .filter(|(_, e)| e.target == target)
                    .filter(|(_, e)| {
                        e.resolve.presence == agtmux_core::types::PanePresence::Managed
                            || e.classification.is_some()
                            || looks_agent_like(&e.info.current_cmd, &e.info.pane_title)
                    })
                    .map(|(_, e)| e.info.pane_id.clone())
                    .collect()
            };

            for pane_id in sample_candidates {
                sample_pane(state, &*runner, target, &pane_id).await;
            }
        }
    }
}

fn looks_agent_like(current_cmd: &str, pane_title: &str) -> bool {
    let cmd = current_cmd.to_ascii_lowercase();
    let title = pane_title.to_ascii_lowercase();
    ["claude", "codex", "gemini"]
        .iter()
        .any(|t| cmd.contains(t) || title.contains(t))
}

/// Capture one pane's tail, classify it, and queue heuristic signals.
async fn sample_pane(
    state: &Arc<Mutex<DaemonState>>,
    runner: &dyn agtmux_tmux::TmuxCommandRunner,
    target: &str,
    pane_id: &str,
) {
    let Ok(lines) = capture::capture_pane(&runner, pane_id, SAMPLE_LINES) else {
        return;
    };
    let now = Utc::now();
    let key = pane_key(target, pane_id);

    let mut st = state.lock().await;
    if let Some(entry) = st.panes.get_mut(&key) {
        entry.capture_tail = lines;
    }
    st.classify_pane(&key);

    let DaemonState { sampler, panes, .. } = &mut *st;
    if let Some(entry) = panes.get_mut(&key) {
        let identity = entry.identity();
        let observations = sampler.sample(&identity, &entry.capture_tail, entry.last_output_at, now);
        entry.pending_heuristics.extend(observations);
    }
}

/// Apply debounced resizes, coalesced last-wins.
async fn flush_resizes(state: &Arc<Mutex<DaemonState>>) {
    let due = {
        let mut st = state.lock().await;
        st.resize.due(Utc::now())
    };
    for (key, cols, rows) in due {
        let Some((target, pane_id)) = key.split_once('/') else {
            continue;
        };
        let runner = {
            let st = state.lock().await;
            match st.targets.runner_for(target) {
                Ok(runner) => runner,
                Err(_) => continue,
            }
        };
        if let Err(e) = mutations::resize_pane(&runner, pane_id, cols, rows) {
            tracing::debug!(pane = %key, "resize failed: {e}");
        }
    }
}

/// Close taps whose post-unsubscribe grace expired.
async fn close_due_taps(state: &Arc<Mutex<DaemonState>>) {
    let mut st = state.lock().await;
    for key in st.taps.due_closes(Utc::now()) {
        if let Some(task) = st.tap_tasks.remove(&key) {
            task.abort();
        }
    }
}
