//! Agent adapters: bind pane identities to agent CLIs and translate their
//! raw lifecycle events into the common [`NormalizedEvent`] form.
//!
//! [`NormalizedEvent`]: agtmux_core::types::NormalizedEvent

pub mod claude;
pub mod codex;
pub mod gemini;
pub mod registry;

pub use registry::{
    AdapterRegistry, AgentAdapter, Classification, PaneProbe, RawAdapterEvent, TranslateError,
};
