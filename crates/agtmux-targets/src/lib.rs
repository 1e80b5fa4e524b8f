//! Target management: configured hosts, health, reconnect backoff, and
//! per-target failure isolation.

pub mod backoff;
pub mod manager;

pub use backoff::{BackoffState, INITIAL_BACKOFF_SECS, MAX_BACKOFF_SECS};
pub use manager::{TargetError, TargetManager, TargetRecord};
