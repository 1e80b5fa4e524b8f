//! Per-target tmux client.
//!
//! Commands go through the [`TmuxCommandRunner`] trait so tests inject
//! mocks and ssh targets reuse the exact same call sites as the local
//! host. Long-lived pane captures use FIFO-backed taps (`pipe-pane`).

pub mod capture;
pub mod error;
pub mod mutations;
pub mod pane_info;
pub mod runner;
pub mod tap;

pub use capture::capture_pane;
pub use error::TmuxError;
pub use pane_info::{LIST_PANES_FORMAT, TmuxPaneInfo, list_panes, parse_list_panes_output};
pub use runner::{LocalRunner, SshRunner, TmuxCommandRunner};
pub use tap::PaneTap;
