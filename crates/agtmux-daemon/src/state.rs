//! Shared daemon state: target registry, per-pane resolver states, the
//! attention queue, viewer sessions, and pane buffers.
//!
//! Everything lives behind one `Arc<Mutex<DaemonState>>`; mutating RPCs
//! additionally serialize per pane through [`DaemonState::pane_lock`] so
//! writes to distinct panes proceed in parallel while the state lock is
//! only held for bookkeeping, never across IO.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use agtmux_adapters::{AdapterRegistry, Classification, PaneProbe, RawAdapterEvent, TranslateError};
use agtmux_core::attention::AttentionQueue;
use agtmux_core::guard::GuardObservation;
use agtmux_core::resolver::{PaneResolveState, ResolveInputs, ResolverConfig, resolve};
use agtmux_core::types::{
    AgentType, EvidenceMode, HeuristicObservation, NormalizedEvent, PaneIdentity, PaneItem,
};
use agtmux_feed::{FeedRouter, PaneBuffer, ResizeDebouncer, TapManager};
use agtmux_store::Store;
use agtmux_targets::TargetManager;
use agtmux_tmux::TmuxPaneInfo;

use crate::heuristics::HeuristicSampler;
use crate::idempotency::IdempotencyCache;

/// Compose the registry key for a pane.
pub fn pane_key(target: &str, pane_id: &str) -> String {
    format!("{target}/{pane_id}")
}

// ─── PaneEntry ────────────────────────────────────────────────────

#[derive(Debug)]
pub struct PaneEntry {
    pub target: String,
    pub info: TmuxPaneInfo,
    pub resolve: PaneResolveState,
    pub pending_events: Vec<NormalizedEvent>,
    pub pending_heuristics: Vec<HeuristicObservation>,
    pub restart_observed: bool,
    pub classification: Option<Classification>,
    pub last_output_at: Option<DateTime<Utc>>,
    /// Capture tail from the last heuristic sample, kept for classify.
    pub capture_tail: Vec<String>,
}

impl PaneEntry {
    fn new(target: &str, info: TmuxPaneInfo, now: DateTime<Utc>) -> Self {
        Self {
            target: target.to_owned(),
            info,
            resolve: PaneResolveState::unknown(now),
            pending_events: Vec::new(),
            pending_heuristics: Vec::new(),
            restart_observed: false,
            classification: None,
            last_output_at: None,
            capture_tail: Vec::new(),
        }
    }

    pub fn identity(&self) -> PaneIdentity {
        PaneIdentity::new(
            self.target.clone(),
            self.info.session_name.clone(),
            self.info.window_id.clone(),
            self.info.pane_id.clone(),
        )
    }

    /// Confidence that session activity timestamps are meaningful.
    pub fn time_confidence(&self) -> f64 {
        match self.resolve.evidence_mode {
            EvidenceMode::Deterministic => 1.0,
            EvidenceMode::Heuristic => 0.7,
            EvidenceMode::None => 0.0,
        }
    }
}

// ─── DaemonState ──────────────────────────────────────────────────

pub struct DaemonState {
    pub targets: TargetManager,
    /// Pane registry keyed by `target/pane_id`. BTreeMap keeps snapshot
    /// assembly deterministic.
    pub panes: BTreeMap<String, PaneEntry>,
    pub attention: AttentionQueue,
    pub router: FeedRouter,
    pub taps: TapManager,
    pub buffers: HashMap<String, PaneBuffer>,
    pub resize: ResizeDebouncer,
    pub registry: AdapterRegistry,
    pub sampler: HeuristicSampler,
    pub store: Store,
    pub resolver_cfg: ResolverConfig,
    pub idempotency: IdempotencyCache,
    /// Live tap read tasks keyed by pane key; aborted when the tap
    /// manager schedules a close.
    pub tap_tasks: HashMap<String, tokio::task::JoinHandle<()>>,
    pane_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    version: u32,
}

impl DaemonState {
    pub fn new(store: Store) -> Self {
        Self {
            targets: TargetManager::with_local_default(),
            panes: BTreeMap::new(),
            attention: AttentionQueue::new(),
            router: FeedRouter::new(),
            taps: TapManager::new(),
            buffers: HashMap::new(),
            resize: ResizeDebouncer::new(),
            registry: AdapterRegistry::with_defaults(),
            sampler: HeuristicSampler::new(),
            store,
            resolver_cfg: ResolverConfig::default(),
            idempotency: IdempotencyCache::new(),
            tap_tasks: HashMap::new(),
            pane_locks: HashMap::new(),
            version: 0,
        }
    }

    /// Monotone snapshot version; bumps only on actual state change so
    /// identical inputs keep producing identical snapshots.
    pub fn version(&self) -> u32 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Per-pane mutation lock. Distinct panes proceed in parallel.
    pub fn pane_lock(&mut self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.pane_locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    // ── Topology ────────────────────────────────────────────────

    /// Reconcile one target's pane list against the registry. Returns the
    /// keys of removed panes.
    pub fn apply_topology(
        &mut self,
        target: &str,
        panes: Vec<TmuxPaneInfo>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut changed = false;
        let mut seen: Vec<String> = Vec::with_capacity(panes.len());

        for info in panes {
            let key = pane_key(target, &info.pane_id);
            seen.push(key.clone());
            match self.panes.get_mut(&key) {
                Some(entry) => {
                    if entry.info != info {
                        entry.info = info;
                        changed = true;
                    }
                }
                None => {
                    self.panes.insert(key, PaneEntry::new(target, info, now));
                    changed = true;
                }
            }
        }

        let removed: Vec<String> = self
            .panes
            .iter()
            .filter(|(key, entry)| entry.target == target && !seen.contains(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &removed {
            self.remove_pane(key);
            changed = true;
        }

        if changed {
            self.bump();
        }
        removed
    }

    /// Drop every pane of a failing target (panes drain from the
    /// snapshot; the target itself stays registered, reporting down).
    pub fn drain_target(&mut self, target: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .panes
            .iter()
            .filter(|(_, e)| e.target == target)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.remove_pane(key);
        }
        if !keys.is_empty() {
            self.bump();
        }
        keys
    }

    fn remove_pane(&mut self, key: &str) {
        if let Some(entry) = self.panes.remove(key) {
            let pane_id = entry.info.pane_id.clone();
            self.attention.remove_pane(&pane_id);
            self.router.drop_pane_sessions(&entry.target, &pane_id);
            self.taps.remove_pane(key);
            if let Some(task) = self.tap_tasks.remove(key) {
                task.abort();
            }
            self.buffers.remove(key);
            self.pane_locks.remove(key);
        }
    }

    /// Entry for a pane, creating a placeholder when events arrive ahead
    /// of topology.
    pub fn ensure_pane(&mut self, target: &str, pane_id: &str, now: DateTime<Utc>) -> &mut PaneEntry {
        let key = pane_key(target, pane_id);
        self.panes.entry(key).or_insert_with(|| {
            let info = TmuxPaneInfo {
                pane_id: pane_id.to_owned(),
                ..Default::default()
            };
            PaneEntry::new(target, info, now)
        })
    }

    // ── Ingestion ───────────────────────────────────────────────

    /// Translate and queue a raw adapter event for its pane.
    pub fn ingest_event(
        &mut self,
        agent_type: AgentType,
        raw: &RawAdapterEvent,
        now: DateTime<Utc>,
    ) -> Result<(), TranslateError> {
        let event = self.registry.translate(agent_type, raw)?;
        let entry = self.ensure_pane(&raw.pane.target, &raw.pane.pane_id, now);
        entry.pending_events.push(event);
        Ok(())
    }

    /// Record tap output for a pane (drives the running/silence
    /// heuristics and the feed buffers).
    pub fn note_output(&mut self, key: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.panes.get_mut(key) {
            entry.last_output_at = Some(now);
        }
    }

    /// Run classification over the stored capture tail.
    pub fn classify_pane(&mut self, key: &str) {
        let Some(entry) = self.panes.get_mut(key) else {
            return;
        };
        let probe = PaneProbe {
            current_cmd: &entry.info.current_cmd,
            pane_title: &entry.info.pane_title,
            recent_content: &entry.capture_tail,
        };
        if let Some(c) = self.registry.classify(&probe) {
            // Classification flapping to a different agent is a restart
            // signal handled inside the resolver.
            entry.classification = Some(c);
        }
    }

    // ── Resolution ──────────────────────────────────────────────

    /// Resolve every pane against its queued evidence. Returns the keys
    /// whose activity or attention changed.
    pub fn resolve_tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let cfg = self.resolver_cfg;
        let mut changed_keys = Vec::new();

        // Collect per-pane outcomes first; the attention queue is fed
        // afterwards to keep the borrow scopes flat.
        let keys: Vec<String> = self.panes.keys().cloned().collect();
        for key in keys {
            let Some(entry) = self.panes.get_mut(&key) else {
                continue;
            };
            let det_events = std::mem::take(&mut entry.pending_events);
            let heuristics = std::mem::take(&mut entry.pending_heuristics);
            let restart = std::mem::take(&mut entry.restart_observed);

            let inputs = ResolveInputs {
                det_events: &det_events,
                heuristics: &heuristics,
                classified_agent: entry.classification.as_ref().map(|c| c.agent_type),
                restart_observed: restart,
            };
            let prev_attention = entry.resolve.attention;
            let out = resolve(&entry.resolve, &inputs, now, &cfg);

            if out.activity_changed || out.attention_changed || out.next != entry.resolve {
                changed_keys.push(key.clone());
            }
            let attention_changed = out.attention_changed;
            entry.resolve = out.next;

            if attention_changed {
                let identity = entry.identity();
                let runtime = entry.resolve.runtime_id.clone();
                let new_attention = entry.resolve.attention;
                let agent = entry.resolve.agent_type;
                let summary = attention_summary(agent, new_attention);
                self.attention.observe_transition(
                    &identity,
                    prev_attention,
                    new_attention,
                    (!runtime.is_empty()).then_some(runtime.as_str()),
                    &summary,
                    now,
                );
            }
        }

        if !changed_keys.is_empty() {
            self.bump();
        }
        changed_keys
    }

    // ── Projection inputs ───────────────────────────────────────

    pub fn entry(&self, target: &str, pane_id: &str) -> Option<&PaneEntry> {
        self.panes.get(&pane_key(target, pane_id))
    }

    /// Assemble the resolved [`PaneItem`] view of one pane.
    pub fn pane_item(&self, target: &str, pane_id: &str) -> Option<PaneItem> {
        let entry = self.entry(target, pane_id)?;
        let r = &entry.resolve;
        let (label, label_source) =
            crate::projection::resolve_session_label(self, target, &entry.info.session_name);
        Some(PaneItem {
            identity: entry.identity(),
            window_name: entry.info.window_name.clone(),
            pane_title: entry.info.pane_title.clone(),
            current_cmd: entry.info.current_cmd.clone(),
            current_path: entry.info.current_path.clone(),
            presence: r.presence,
            agent_type: r.agent_type,
            agent_presence: r.agent_presence,
            activity_state: r.activity,
            attention_state: r.attention,
            evidence_mode: r.evidence_mode,
            runtime_id: r.runtime_id.clone(),
            reason_code: r.reason_code.clone(),
            last_event_type: r.last_event_type.clone(),
            last_event_at: r.last_event_at,
            session_label: label,
            session_label_source: label_source,
            session_last_active_at: r.last_event_at,
            session_time_confidence: entry.time_confidence(),
            updated_at: r.updated_at,
        })
    }

    /// Guard inputs for a pane, or `None` for unknown panes.
    pub fn guard_observation(&self, target: &str, pane_id: &str) -> Option<GuardObservation> {
        self.entry(target, pane_id).map(|entry| GuardObservation {
            runtime_id: entry.resolve.runtime_id.clone(),
            activity_state: entry.resolve.activity,
            updated_at: entry.resolve.updated_at,
        })
    }

    /// Buffer for a pane, creating it on first use.
    pub fn buffer_mut(&mut self, target: &str, pane_id: &str) -> &mut PaneBuffer {
        let key = pane_key(target, pane_id);
        let (cols, rows) = self
            .panes
            .get(&key)
            .map(|e| (e.info.width, e.info.height))
            .unwrap_or((80, 24));
        self.buffers
            .entry(key)
            .or_insert_with_key(|k| PaneBuffer::new(k.clone(), cols.max(1), rows.max(1)))
    }
}

fn attention_summary(agent: AgentType, state: agtmux_core::types::AttentionState) -> String {
    use agtmux_core::types::AttentionState;
    let what = match state {
        AttentionState::ActionRequiredInput => "waiting for input",
        AttentionState::ActionRequiredApproval => "waiting for approval",
        AttentionState::ActionRequiredError => "hit an error",
        AttentionState::InformationalCompleted => "completed a task",
        AttentionState::None => "",
    };
    if agent == AgentType::None {
        what.to_owned()
    } else {
        format!("{agent} {what}")
    }
}

// ─── Tests ────────────────────────────────────────────────────────
