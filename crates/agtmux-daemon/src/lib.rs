//! Daemon internals, exposed as a library so the end-to-end scenario
//! tests can drive the resolve → project pipeline without a socket.

pub mod cli;
pub mod client;
pub mod dispatcher;
pub mod heuristics;
pub mod idempotency;
pub mod poll_loop;
pub mod projection;
pub mod state;
