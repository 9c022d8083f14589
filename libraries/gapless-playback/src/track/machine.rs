//! Backend dimension of the track unit as a pure transition function
//!
//! `Track` feeds inputs through [`transition`] and then performs the returned
//! effects. Inputs that do not apply to the current mode (a load finishing
//! after the track already switched, a second load request, ...) produce no
//! effects, which is how stale asynchronous completions are neutralised.

use crate::types::BackendMode;

/// Something that happened to the track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendInput {
    /// Explicit request to start the fetch-then-decode pipeline
    RequestLoad,
    LoadSucceeded,
    LoadFailed,
    /// Track became the active one in the queue
    Activate,
    /// Track is no longer the active one
    Deactivate,
}

/// Work `Track` must perform after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEffect {
    StartLoad,
    StoreBuffer,
    Handoff,
    NotifyLoaded,
    ReleaseSource,
    ResetLoadState,
}

/// Facts about the track the transition depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guards {
    /// A decoded buffer is already stored
    pub has_buffer: bool,
    /// The precise backend must never be used
    pub precise_disabled: bool,
    /// The track is the active one in the queue
    pub active: bool,
}

pub fn transition(
    mode: BackendMode,
    input: BackendInput,
    guards: Guards,
) -> (BackendMode, Vec<BackendEffect>) {
    use BackendEffect::{Handoff, NotifyLoaded, ReleaseSource, ResetLoadState, StartLoad, StoreBuffer};
    use BackendInput::{Activate, Deactivate, LoadFailed, LoadSucceeded, RequestLoad};
    use BackendMode::{LoadingPrecise, Precise, Streaming};

    match (mode, input) {
        (Streaming, RequestLoad) if !guards.has_buffer && !guards.precise_disabled => {
            (LoadingPrecise, vec![StartLoad])
        }
        (Streaming, Activate) if guards.has_buffer && !guards.precise_disabled => {
            (Precise, vec![Handoff])
        }
        // Finished while the track was inactive: keep streaming until the
        // next activation performs the handoff
        (LoadingPrecise, LoadSucceeded) if !guards.active => {
            (Streaming, vec![StoreBuffer, NotifyLoaded])
        }
        (LoadingPrecise, LoadSucceeded) => (Precise, vec![StoreBuffer, Handoff, NotifyLoaded]),
        (LoadingPrecise, LoadFailed) => (Streaming, vec![ResetLoadState]),
        (Precise, Deactivate) => (Streaming, vec![ReleaseSource]),
        (mode, _) => (mode, Vec::new()),
    }
}
