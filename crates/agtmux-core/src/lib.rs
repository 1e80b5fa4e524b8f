//! Pure domain core for the agtmux daemon.
//!
//! Everything in this crate is side-effect free: state machines take their
//! previous state and the current wall-clock time as arguments and return a
//! new state. IO, persistence, and scheduling live in the outer crates.

pub mod attention;
pub mod guard;
pub mod hysteresis;
pub mod resolver;
pub mod types;
