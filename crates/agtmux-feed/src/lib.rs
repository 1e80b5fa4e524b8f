//! Pane output plumbing: the cursor-keyed ring buffer, the tap manager
//! (one capture per pane), and the terminal feed router (viewer
//! sessions).
//!
//! Taps and sessions are registries keyed by opaque ids; references
//! between them are ids, never pointers, so the intrinsically cyclic
//! tap ↔ router relationship never turns into an ownership cycle.

pub mod buffer;
pub mod router;
pub mod tap_manager;

pub use buffer::{PaneBuffer, ReadResult, buffered_lines_cap, MAX_BUFFERED_LINES, MIN_BUFFERED_LINES};
pub use router::{FeedRouter, ResizeDebouncer, RouterError, ViewerSession};
pub use tap_manager::{TapManager, TAP_CLOSE_GRACE_SECS};
