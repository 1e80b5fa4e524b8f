//! The target registry: add/remove/connect, health bookkeeping, and the
//! reconnect sweep. A failing target must never block or degrade the
//! others; everything here is per-record state.

use chrono::{DateTime, Utc};

use agtmux_core::types::{TargetHealth, TargetIdentity, TargetKind};
use agtmux_tmux::runner::{LocalRunner, SshRunner, TmuxCommandRunner};

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("target already exists: {0}")]
    Duplicate(String),
    #[error("target {name} has {panes} live panes")]
    HasReferences { name: String, panes: usize },
    #[error("target not found: {0}")]
    NotFound(String),
    #[error("ssh target {0} requires a connection_ref")]
    MissingConnectionRef(String),
}

impl TargetError {
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Duplicate(_) => "E_DUPLICATE",
            Self::HasReferences { .. } => "E_HAS_REFERENCES",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::MissingConnectionRef(_) => "E_INVALID_ARGS",
        }
    }
}

// ─── Record ───────────────────────────────────────────────────────

use crate::backoff::BackoffState;

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub identity: TargetIdentity,
    pub backoff: BackoffState,
    /// Number of panes currently attributed to this target in the
    /// snapshot; guards removal.
    pub live_pane_count: usize,
    /// Set when the most recent poll returned partial results.
    pub partial_results: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
}

impl TargetRecord {
    fn new(identity: TargetIdentity) -> Self {
        Self {
            identity,
            backoff: BackoffState::default(),
            live_pane_count: 0,
            partial_results: false,
            last_poll_at: None,
        }
    }
}

// ─── Manager ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TargetManager {
    targets: Vec<TargetRecord>,
    next_id: u64,
}

impl TargetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager pre-seeded with the implicit local target.
    pub fn with_local_default() -> Self {
        let mut mgr = Self::new();
        mgr.add_target("local", TargetKind::Local, None, true)
            .unwrap_or_else(|_| unreachable!("empty manager cannot collide"));
        mgr
    }

    /// Add a target. Fails with `Duplicate` on a name collision; ssh
    /// targets must carry a `connection_ref` (an ssh config alias).
    pub fn add_target(
        &mut self,
        name: &str,
        kind: TargetKind,
        connection_ref: Option<String>,
        is_default: bool,
    ) -> Result<&TargetRecord, TargetError> {
        if self.targets.iter().any(|t| t.identity.target_name == name) {
            return Err(TargetError::Duplicate(name.to_owned()));
        }
        if kind == TargetKind::Ssh && connection_ref.is_none() {
            return Err(TargetError::MissingConnectionRef(name.to_owned()));
        }

        if is_default {
            for t in &mut self.targets {
                t.identity.is_default = false;
            }
        }

        self.next_id += 1;
        let identity = TargetIdentity {
            target_id: format!("tgt-{}", self.next_id),
            target_name: name.to_owned(),
            kind,
            connection_ref,
            is_default,
            health: if kind == TargetKind::Local {
                // The local target cannot fail independently of the daemon.
                TargetHealth::Ok
            } else {
                TargetHealth::Unknown
            },
        };
        self.targets.push(TargetRecord::new(identity));
        Ok(self.targets.last().unwrap_or_else(|| unreachable!("just pushed")))
    }

    /// Remove a target; cascades only when no live panes depend on it.
    pub fn remove_target(&mut self, name: &str) -> Result<(), TargetError> {
        let idx = self
            .targets
            .iter()
            .position(|t| t.identity.target_name == name)
            .ok_or_else(|| TargetError::NotFound(name.to_owned()))?;

        let panes = self.targets[idx].live_pane_count;
        if panes > 0 {
            return Err(TargetError::HasReferences {
                name: name.to_owned(),
                panes,
            });
        }
        self.targets.remove(idx);
        Ok(())
    }

    /// (Re-)establish a control channel. Local is a no-op marking ok;
    /// for ssh the actual probe runs in the daemon's ingest task and is
    /// reported back through [`record_poll_success`] /
    /// [`record_poll_failure`]. Connecting resets the backoff so the
    /// sweep retries immediately.
    pub fn connect(&mut self, name: &str) -> Result<&TargetRecord, TargetError> {
        let record = self.record_mut(name)?;
        match record.identity.kind {
            TargetKind::Local => {
                record.identity.health = TargetHealth::Ok;
            }
            TargetKind::Ssh => {
                record.backoff = record.backoff.on_success();
                if record.identity.health == TargetHealth::Down {
                    record.identity.health = TargetHealth::Unknown;
                }
            }
        }
        Ok(&*record)
    }

    pub fn health(&self, name: &str) -> Result<TargetHealth, TargetError> {
        self.get(name).map(|t| t.identity.health)
    }

    /// Record a successful poll cycle for a target.
    pub fn record_poll_success(
        &mut self,
        name: &str,
        partial: bool,
        live_pane_count: usize,
        now: DateTime<Utc>,
    ) -> Result<(), TargetError> {
        let record = self.record_mut(name)?;
        record.identity.health = if partial {
            TargetHealth::Degraded
        } else {
            TargetHealth::Ok
        };
        record.partial_results = partial;
        record.live_pane_count = live_pane_count;
        record.backoff = record.backoff.on_success();
        record.last_poll_at = Some(now);
        Ok(())
    }

    /// Record a failed poll cycle: health goes down, panes drain from the
    /// snapshot, and the backoff schedule advances.
    pub fn record_poll_failure(&mut self, name: &str, now: DateTime<Utc>) -> Result<(), TargetError> {
        let record = self.record_mut(name)?;
        record.identity.health = TargetHealth::Down;
        record.partial_results = false;
        record.live_pane_count = 0;
        record.backoff = record.backoff.on_failure(now);
        record.last_poll_at = Some(now);
        Ok(())
    }

    /// Names of ssh targets whose reconnect is due. The local target is
    /// never reconnected.
    pub fn due_for_reconnect(&self, now: DateTime<Utc>) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| {
                t.identity.kind == TargetKind::Ssh
                    && t.identity.health == TargetHealth::Down
                    && t.backoff.is_due(now)
            })
            .map(|t| t.identity.target_name.clone())
            .collect()
    }

    /// Targets healthy enough to poll this tick (everything not down, plus
    /// down ssh targets whose backoff is due).
    pub fn pollable(&self, now: DateTime<Utc>) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| t.identity.health != TargetHealth::Down || t.backoff.is_due(now))
            .map(|t| t.identity.target_name.clone())
            .collect()
    }

    /// Build a command runner for a target.
    pub fn runner_for(&self, name: &str) -> Result<Box<dyn TmuxCommandRunner>, TargetError> {
        let record = self.get(name)?;
        match record.identity.kind {
            TargetKind::Local => Ok(Box::new(LocalRunner::default())),
            TargetKind::Ssh => {
                let alias = record
                    .identity
                    .connection_ref
                    .clone()
                    .ok_or_else(|| TargetError::MissingConnectionRef(name.to_owned()))?;
                Ok(Box::new(SshRunner::new(alias)))
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&TargetRecord, TargetError> {
        self.targets
            .iter()
            .find(|t| t.identity.target_name == name)
            .ok_or_else(|| TargetError::NotFound(name.to_owned()))
    }

    pub fn list(&self) -> Vec<TargetIdentity> {
        self.targets.iter().map(|t| t.identity.clone()).collect()
    }

    pub fn default_target(&self) -> Option<&TargetRecord> {
        self.targets.iter().find(|t| t.identity.is_default)
    }

    fn record_mut(&mut self, name: &str) -> Result<&mut TargetRecord, TargetError> {
        self.targets
            .iter_mut()
            .find(|t| t.identity.target_name == name)
            .ok_or_else(|| TargetError::NotFound(name.to_owned()))
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T00:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn mgr_with_devbox() -> TargetManager {
        let mut mgr = TargetManager::with_local_default();
        mgr.add_target("devbox", TargetKind::Ssh, Some("devbox".into()), false)
            .expect("add devbox");
        mgr
    }

    #[test]
    fn local_default_is_seeded_healthy() {
        let mgr = TargetManager::with_local_default();
        let local = mgr.get("local").expect("local exists");
        assert_eq!(local.identity.kind, TargetKind::Local);
        assert!(local.identity.is_default);
        assert_eq!(local.identity.health, TargetHealth::Ok);
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut mgr = mgr_with_devbox();
        let err = mgr
            .add_target("devbox", TargetKind::Ssh, Some("other".into()), false)
            .expect_err("should collide");
        assert_eq!(err, TargetError::Duplicate("devbox".into()));
        assert_eq!(err.wire_code(), "E_DUPLICATE");
    }

    #[test]
    fn ssh_requires_connection_ref() {
        let mut mgr = TargetManager::new();
        let err = mgr
            .add_target("devbox", TargetKind::Ssh, None, false)
            .expect_err("should require ref");
        assert!(matches!(err, TargetError::MissingConnectionRef(_)));
        assert_eq!(err.wire_code(), "E_INVALID_ARGS");
    }

    #[test]
    fn new_ssh_target_health_unknown_before_first_poll() {
        let mgr = mgr_with_devbox();
        assert_eq!(mgr.health("devbox").expect("health"), TargetHealth::Unknown);
    }

    #[test]
    fn target_id_is_immutable_opaque() {
        let mgr = mgr_with_devbox();
        let id = &mgr.get("devbox").expect("get").identity.target_id;
        assert!(id.starts_with("tgt-"));
        let local_id = &mgr.get("local").expect("get").identity.target_id;
        assert_ne!(id, local_id);
    }

    #[test]
    fn default_flag_moves_on_new_default() {
        let mut mgr = mgr_with_devbox();
        mgr.add_target("build", TargetKind::Ssh, Some("build".into()), true)
            .expect("add");
        assert!(!mgr.get("local").expect("get").identity.is_default);
        assert!(mgr.get("build").expect("get").identity.is_default);
        assert_eq!(
            mgr.default_target().expect("default").identity.target_name,
            "build"
        );
    }

    #[test]
    fn poll_success_marks_ok_and_counts_panes() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_success("devbox", false, 3, t0()).expect("record");
        assert_eq!(mgr.health("devbox").expect("health"), TargetHealth::Ok);
        assert_eq!(mgr.get("devbox").expect("get").live_pane_count, 3);
    }

    #[test]
    fn partial_poll_marks_degraded() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_success("devbox", true, 1, t0()).expect("record");
        assert_eq!(mgr.health("devbox").expect("health"), TargetHealth::Degraded);
        assert!(mgr.get("devbox").expect("get").partial_results);
    }

    #[test]
    fn poll_failure_marks_down_and_drains_panes() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_success("devbox", false, 3, t0()).expect("record");
        mgr.record_poll_failure("devbox", t0()).expect("record");
        assert_eq!(mgr.health("devbox").expect("health"), TargetHealth::Down);
        assert_eq!(mgr.get("devbox").expect("get").live_pane_count, 0);
    }

    #[test]
    fn remove_with_live_panes_rejected() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_success("devbox", false, 2, t0()).expect("record");
        let err = mgr.remove_target("devbox").expect_err("should refuse");
        assert_eq!(
            err,
            TargetError::HasReferences {
                name: "devbox".into(),
                panes: 2,
            }
        );
        assert_eq!(err.wire_code(), "E_HAS_REFERENCES");
    }

    #[test]
    fn remove_after_drain_succeeds() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_success("devbox", false, 2, t0()).expect("record");
        mgr.record_poll_failure("devbox", t0()).expect("record");
        mgr.remove_target("devbox").expect("remove");
        assert!(mgr.get("devbox").is_err());
    }

    #[test]
    fn remove_unknown_target_not_found() {
        let mut mgr = TargetManager::new();
        let err = mgr.remove_target("ghost").expect_err("missing");
        assert_eq!(err.wire_code(), "E_NOT_FOUND");
    }

    #[test]
    fn reconnect_sweep_respects_backoff() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_failure("devbox", t0()).expect("record");

        // Within the 4 s initial backoff: not due.
        assert!(mgr.due_for_reconnect(t0() + TimeDelta::seconds(3)).is_empty());
        // At 4 s: due.
        assert_eq!(
            mgr.due_for_reconnect(t0() + TimeDelta::seconds(4)),
            vec!["devbox".to_string()]
        );
    }

    #[test]
    fn local_never_due_for_reconnect() {
        let mgr = TargetManager::with_local_default();
        assert!(mgr.due_for_reconnect(t0()).is_empty());
    }

    #[test]
    fn failing_target_does_not_block_others() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_failure("devbox", t0()).expect("record");

        // The local target stays pollable while devbox is in backoff.
        let pollable = mgr.pollable(t0() + TimeDelta::seconds(1));
        assert!(pollable.contains(&"local".to_string()));
        assert!(!pollable.contains(&"devbox".to_string()));
    }

    #[test]
    fn connect_resets_backoff_and_clears_down() {
        let mut mgr = mgr_with_devbox();
        mgr.record_poll_failure("devbox", t0()).expect("record");
        mgr.record_poll_failure("devbox", t0() + TimeDelta::seconds(4))
            .expect("record");

        let record = mgr.connect("devbox").expect("connect");
        assert_eq!(record.identity.health, TargetHealth::Unknown);
        assert!(record.backoff.is_due(t0() + TimeDelta::seconds(5)));
    }

    #[test]
    fn runner_for_local_and_ssh() {
        let mgr = mgr_with_devbox();
        assert!(mgr.runner_for("local").is_ok());
        assert!(mgr.runner_for("devbox").is_ok());
        assert!(mgr.runner_for("ghost").is_err());
    }

    #[test]
    fn list_returns_identities() {
        let mgr = mgr_with_devbox();
        let identities = mgr.list();
        assert_eq!(identities.len(), 2);
        assert!(identities.iter().any(|t| t.target_name == "local"));
        assert!(identities.iter().any(|t| t.target_name == "devbox"));
    }
}
