//! End-to-end scenarios: injected adapter events driven through the
//! ingest → resolve → project pipeline and the request dispatcher,
//! without a live tmux server.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use agtmux_adapters::RawAdapterEvent;
use agtmux_core::attention::DEDUP_WINDOW_SECS;
use agtmux_core::guard::WriteGuards;
use agtmux_core::resolver::DOWN_THRESHOLD_SECS;
use agtmux_core::types::{
    ActivityState, AgentType, AttentionState, EvidenceMode, PaneIdentity, PanePresence,
};
use agtmux_daemon::dispatcher::handle_request;
use agtmux_daemon::projection::{export_json_v1, project};
use agtmux_daemon::state::DaemonState;
use agtmux_proto::frames::TerminalFrame;
use agtmux_proto::rpc::{ActionResponse, Request, Response};
use agtmux_proto::ErrorCode;
use agtmux_store::Store;
use agtmux_tmux::TmuxPaneInfo;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-06T09:00:00Z")
        .expect("valid RFC3339")
        .with_timezone(&Utc)
}

fn new_state() -> DaemonState {
    DaemonState::new(Store::open_in_memory().expect("store"))
}

fn shared(state: DaemonState) -> Arc<Mutex<DaemonState>> {
    Arc::new(Mutex::new(state))
}

fn pane_info(pane_id: &str, session: &str, cmd: &str) -> TmuxPaneInfo {
    TmuxPaneInfo {
        pane_id: pane_id.to_owned(),
        session_name: session.to_owned(),
        window_id: "@0".to_owned(),
        window_name: "dev".to_owned(),
        current_cmd: cmd.to_owned(),
        width: 80,
        height: 24,
        ..Default::default()
    }
}

fn raw_event(source: &str, event_type: &str, pane_id: &str, session_id: &str) -> RawAdapterEvent {
    RawAdapterEvent {
        source: source.to_owned(),
        event_type: event_type.to_owned(),
        pane: PaneIdentity::new("local", "S1", "@0", pane_id),
        session_id: Some(session_id.to_owned()),
        thread_id: None,
        payload: serde_json::json!({}),
        received_at: t0(),
    }
}

fn raw_event_at(
    source: &str,
    event_type: &str,
    pane_id: &str,
    session_id: &str,
    at: DateTime<Utc>,
) -> RawAdapterEvent {
    let mut raw = raw_event(source, event_type, pane_id, session_id);
    raw.received_at = at;
    raw
}

// ─── Scenario 1: Claude tool_start → running deterministic ───────

#[test]
fn claude_tool_start_resolves_running_deterministic() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());

    // tool_start every 500 ms for a few ticks.
    for i in 0..6 {
        let at = t0() + TimeDelta::milliseconds(500 * i);
        state
            .ingest_event(
                AgentType::Claude,
                &raw_event_at("claude_adapter", "tool_start", "%1", "sess-c", at),
                at,
            )
            .expect("ingest");
        state.resolve_tick(at);
    }

    let snap = project(&state);
    let pane = snap
        .panes
        .iter()
        .find(|p| p.pane.identity.pane_id == "%1")
        .expect("pane in snapshot");
    assert_eq!(pane.pane.presence, PanePresence::Managed);
    assert_eq!(pane.pane.activity_state, ActivityState::Running);
    assert_eq!(pane.pane.evidence_mode, EvidenceMode::Deterministic);
}

// ─── Scenario 2: waiting_approval display normalization ──────────

#[test]
fn codex_waiting_approval_displays_as_waiting() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "codex")], t0());
    state
        .ingest_event(
            AgentType::Codex,
            &raw_event("codex_appserver", "lifecycle.waiting_approval", "%1", "T1"),
            t0(),
        )
        .expect("ingest");
    state.resolve_tick(t0());

    let snap = project(&state);
    let json = export_json_v1(&snap);
    let pane = &json["panes"][0];
    assert_eq!(pane["activity_state"], "waiting_approval");
    assert_eq!(pane["display_state"], "Waiting");
    assert_ne!(pane["display_state"], "WaitingApproval");
}

// ─── Scenario 3: error recovery ──────────────────────────────────

#[test]
fn error_then_running_recovers() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());

    state
        .ingest_event(
            AgentType::Claude,
            &raw_event("claude_adapter", "error", "%1", "sess-c"),
            t0(),
        )
        .expect("ingest");
    state.resolve_tick(t0());
    assert_eq!(
        state.entry("local", "%1").expect("entry").resolve.activity,
        ActivityState::Error,
    );

    let t1 = t0() + TimeDelta::seconds(1);
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event_at("claude_adapter", "session_start", "%1", "sess-c", t1),
            t1,
        )
        .expect("ingest");
    state.resolve_tick(t1);
    assert_eq!(
        state.entry("local", "%1").expect("entry").resolve.activity,
        ActivityState::Running,
    );
}

// ─── Scenario 4: freshness fallback and re-promotion ─────────────

#[test]
fn freshness_fallback_keeps_presence() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event("claude_adapter", "tool_start", "%1", "sess-c"),
            t0(),
        )
        .expect("ingest");
    state.resolve_tick(t0());
    assert_eq!(
        state.entry("local", "%1").expect("entry").resolve.evidence_mode,
        EvidenceMode::Deterministic,
    );

    // 18 s of silence: past the down threshold.
    let t1 = t0() + TimeDelta::seconds(DOWN_THRESHOLD_SECS as i64 + 3);
    state.resolve_tick(t1);
    let entry = state.entry("local", "%1").expect("entry");
    assert_eq!(entry.resolve.evidence_mode, EvidenceMode::Heuristic);
    assert_eq!(entry.resolve.presence, PanePresence::Managed);

    // Resume injection: deterministic again within one tick.
    let t2 = t1 + TimeDelta::seconds(1);
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event_at("claude_adapter", "tool_start", "%1", "sess-c", t2),
            t2,
        )
        .expect("ingest");
    state.resolve_tick(t2);
    assert_eq!(
        state.entry("local", "%1").expect("entry").resolve.evidence_mode,
        EvidenceMode::Deterministic,
    );
}

// ─── Scenario 5: write guard staleness ───────────────────────────

#[tokio::test]
async fn stale_runtime_guard_blocks_send() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event("claude_adapter", "tool_start", "%1", "R1"),
            t0(),
        )
        .expect("ingest");
    state.resolve_tick(t0());
    let r1 = state
        .entry("local", "%1")
        .expect("entry")
        .resolve
        .runtime_id
        .clone();
    assert_eq!(r1, "R1", "runtime adopts the adapter hint");

    // Force an agent restart: the adapter reports a new session.
    let t1 = t0() + TimeDelta::seconds(1);
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event_at("claude_adapter", "session_start", "%1", "R2", t1),
            t1,
        )
        .expect("ingest");
    state.resolve_tick(t1);
    let r2 = state
        .entry("local", "%1")
        .expect("entry")
        .resolve
        .runtime_id
        .clone();
    assert_eq!(r2, "R2");
    assert_ne!(r1, r2);

    let state = shared(state);

    // Guarded send against the old runtime: refused, no side effect.
    let resp = handle_request(
        Request::SendText {
            target: "local".into(),
            pane_id: "%1".into(),
            text: "echo hi".into(),
            request_ref: "req-guard-1".into(),
            enter: false,
            paste: false,
            guards: WriteGuards {
                if_runtime: Some(r1.clone()),
                ..Default::default()
            },
        },
        &state,
    )
    .await;

    let Response::Action(action) = resp else {
        panic!("expected action response");
    };
    assert!(!action.is_ok());
    assert_eq!(action.error_code, Some(ErrorCode::RuntimeStale));
    let observed = action.observed.expect("observed values reported");
    assert_eq!(observed.observed_runtime_id, r2);

    // force_stale bypasses the guard (the tmux delivery itself may still
    // fail in a harness without a tmux server; the guard must not be the
    // refusal).
    let resp = handle_request(
        Request::SendText {
            target: "local".into(),
            pane_id: "%1".into(),
            text: "echo hi".into(),
            request_ref: "req-guard-2".into(),
            enter: false,
            paste: false,
            guards: WriteGuards {
                if_runtime: Some(r1),
                force_stale: true,
                ..Default::default()
            },
        },
        &state,
    )
    .await;
    let Response::Action(action) = resp else {
        panic!("expected action response");
    };
    assert_ne!(action.error_code, Some(ErrorCode::RuntimeStale));
    let observed = action.observed.expect("observed values reported");
    assert!(observed.bypassed);
}

// ─── Scenario 6: attention queue dedup ───────────────────────────

#[test]
fn attention_dedup_window() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());

    let mut clock = t0();
    let mut transition_to_waiting = |state: &mut DaemonState, at: DateTime<Utc>| {
        state
            .ingest_event(
                AgentType::Claude,
                &raw_event_at("claude_adapter", "prompt", "%1", "sess-c", at),
                at,
            )
            .expect("ingest");
        state.resolve_tick(at);
        // Clear back to running so the next prompt is a fresh transition.
        let later = at + TimeDelta::seconds(1);
        state
            .ingest_event(
                AgentType::Claude,
                &raw_event_at("claude_adapter", "tool_start", "%1", "sess-c", later),
                later,
            )
            .expect("ingest");
        state.resolve_tick(later);
    };

    // Two transitions into waiting_input within 5 s → one unread item.
    transition_to_waiting(&mut state, clock);
    clock += TimeDelta::seconds(5);
    transition_to_waiting(&mut state, clock);
    assert_eq!(state.attention.review().len(), 1);
    assert_eq!(state.attention.unread_count(), 1);

    // After the dedup window, a third transition produces a second item.
    clock += TimeDelta::seconds(DEDUP_WINDOW_SECS as i64 + 1);
    transition_to_waiting(&mut state, clock);
    assert_eq!(state.attention.review().len(), 2);
    // Still at most one unread actionable item per (pane, kind).
    assert_eq!(state.attention.unread_count(), 1);
}

// ─── Idempotence ─────────────────────────────────────────────────

#[tokio::test]
async fn request_ref_replay_returns_identical_response() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event("claude_adapter", "tool_start", "%1", "R1"),
            t0(),
        )
        .expect("ingest");
    state.resolve_tick(t0());
    let state = shared(state);

    let request = Request::SendText {
        target: "local".into(),
        pane_id: "%1".into(),
        text: "hello".into(),
        request_ref: "req-idem".into(),
        enter: false,
        paste: false,
        guards: WriteGuards {
            // Deliberately stale so the outcome does not depend on a
            // tmux server being available in the harness.
            if_runtime: Some("not-the-runtime".into()),
            ..Default::default()
        },
    };

    let first = handle_request(request.clone(), &state).await;
    let second = handle_request(request, &state).await;
    assert_eq!(first, second, "replay returns the recorded response");
}

// ─── Boundary: pane removal mid-stream ───────────────────────────

#[tokio::test]
async fn pane_removal_invalidates_stream() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event("claude_adapter", "tool_start", "%1", "R1"),
            t0(),
        )
        .expect("ingest");
    state.resolve_tick(t0());
    let state = shared(state);

    let resp = handle_request(
        Request::TerminalAttach {
            target: "local".into(),
            pane_id: "%1".into(),
            guards: WriteGuards::default(),
        },
        &state,
    )
    .await;
    let Response::Attach(attach) = resp else {
        panic!("expected attach response");
    };
    assert_eq!(attach.result_code, "ok");

    // First stream call yields the attached synchronization frame.
    let resp = handle_request(
        Request::TerminalStream {
            session_id: attach.session_id.clone(),
            cursor: None,
            lines: 100,
        },
        &state,
    )
    .await;
    assert!(
        matches!(resp, Response::Frame(TerminalFrame::Attached { .. })),
        "first frame is attached, got {resp:?}"
    );

    // Remove the pane, then the next stream call fails with REF_NOT_FOUND.
    {
        let mut st = state.lock().await;
        st.apply_topology("local", vec![], Utc::now());
    }
    let resp = handle_request(
        Request::TerminalStream {
            session_id: attach.session_id,
            cursor: None,
            lines: 100,
        },
        &state,
    )
    .await;
    let Response::Frame(TerminalFrame::Error { code, .. }) = resp else {
        panic!("expected error frame, got {resp:?}");
    };
    assert_eq!(code, ErrorCode::RefNotFound);
}

// ─── Boundary: simultaneous duplicate add_target ─────────────────

#[tokio::test]
async fn duplicate_add_target_exactly_one_succeeds() {
    let state = shared(new_state());

    let add = Request::AddTarget {
        name: "devbox".into(),
        kind: agtmux_core::types::TargetKind::Ssh,
        connection_ref: Some("devbox".into()),
        is_default: false,
    };
    let first = handle_request(add.clone(), &state).await;
    let second = handle_request(add, &state).await;

    assert!(matches!(first, Response::Target(_)));
    let Response::Error { code, .. } = second else {
        panic!("expected duplicate error, got {second:?}");
    };
    assert_eq!(code, ErrorCode::Duplicate);
}

// ─── Capabilities & invalid args ─────────────────────────────────

#[tokio::test]
async fn capabilities_envelope_advertises_streaming() {
    let state = shared(new_state());
    let resp = handle_request(Request::FetchCapabilities, &state).await;
    let Response::Capabilities(caps) = resp else {
        panic!("expected capabilities");
    };
    assert!(caps.terminal_stream);
    assert_eq!(
        caps.terminal_frame_protocol.as_deref(),
        Some("terminal-stream-v1")
    );
}

#[tokio::test]
async fn terminal_write_requires_exactly_one_payload() {
    let state = shared(new_state());
    let resp = handle_request(
        Request::TerminalWrite {
            session_id: "vs-1".into(),
            text: Some("x".into()),
            key: Some("Enter".into()),
            bytes: None,
            enter: false,
            paste: false,
        },
        &state,
    )
    .await;
    let Response::Error { code, .. } = resp else {
        panic!("expected error, got {resp:?}");
    };
    assert_eq!(code, ErrorCode::InvalidArgs);
}

#[tokio::test]
async fn unknown_pane_mutation_is_not_found() {
    let state = shared(new_state());
    let resp = handle_request(
        Request::SendText {
            target: "local".into(),
            pane_id: "%404".into(),
            text: "hi".into(),
            request_ref: "req-404".into(),
            enter: false,
            paste: false,
            guards: WriteGuards::default(),
        },
        &state,
    )
    .await;
    let Response::Action(ActionResponse {
        error_code: Some(code),
        ..
    }) = resp
    else {
        panic!("expected action error, got {resp:?}");
    };
    assert_eq!(code, ErrorCode::NotFound);
}

// ─── Attention acknowledgement over the wire ─────────────────────

#[tokio::test]
async fn acknowledge_flow() {
    let mut state = new_state();
    state.apply_topology("local", vec![pane_info("%1", "S1", "claude")], t0());
    state
        .ingest_event(
            AgentType::Claude,
            &raw_event("claude_adapter", "prompt", "%1", "sess-c"),
            t0(),
        )
        .expect("ingest");
    state.resolve_tick(t0());
    assert_eq!(
        state.entry("local", "%1").expect("entry").resolve.attention,
        AttentionState::ActionRequiredInput,
    );
    let state = shared(state);

    let resp = handle_request(Request::FetchAttention, &state).await;
    let Response::Attention { review, .. } = resp else {
        panic!("expected attention");
    };
    assert_eq!(review.len(), 1);
    let id = review[0].id.clone();

    let resp = handle_request(Request::Acknowledge { id }, &state).await;
    assert_eq!(resp, Response::AckCount { acknowledged: 1 });

    let resp = handle_request(Request::FetchAttention, &state).await;
    let Response::Attention { review, .. } = resp else {
        panic!("expected attention");
    };
    assert!(!review[0].unread);
    assert!(review[0].acknowledged_at.is_some());
}
