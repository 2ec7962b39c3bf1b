//! Pill state, the observable snapshot, and the pure state store
//!
//! Every rule for how a backend event or a visibility reading moves the
//! pill lives in [`PillModel`]. The coordinator only feeds it inputs.

use serde::{Deserialize, Serialize};

use crate::events::BackendEvent;

/// The five visual states of the pill
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillState {
    /// Hidden, nothing in progress
    #[default]
    Idle,
    /// Key held, audio being captured
    Listening,
    /// Key released, transcription in flight
    Loading,
    /// Backend reported a failure
    Error,
    /// Text was delivered
    Success,
}

impl PillState {
    pub const ALL: [PillState; 5] = [
        PillState::Idle,
        PillState::Listening,
        PillState::Loading,
        PillState::Error,
        PillState::Success,
    ];

    /// Wire tag used on the `pill-state` channel
    pub fn as_str(&self) -> &'static str {
        match self {
            PillState::Idle => "idle",
            PillState::Listening => "listening",
            PillState::Loading => "loading",
            PillState::Error => "error",
            PillState::Success => "success",
        }
    }
}

impl std::fmt::Display for PillState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PillState {
    type Err = UnknownPillState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PillState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownPillState(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pill state {0:?}")]
pub struct UnknownPillState(pub String);

/// What the render target sees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PillSnapshot {
    pub state: PillState,
    pub visible: bool,
    /// Milliseconds the key was held, as last reported by the backend
    pub hold_time: Option<u64>,
}

/// Single-writer state store behind the coordinator
#[derive(Debug, Default)]
pub struct PillModel {
    snapshot: PillSnapshot,
}

impl PillModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PillSnapshot {
        self.snapshot
    }

    pub fn state(&self) -> PillState {
        self.snapshot.state
    }

    /// Apply one backend event at face value. Last write wins.
    pub fn apply_event(&mut self, event: &BackendEvent) {
        match *event {
            BackendEvent::PillState(state) => {
                self.snapshot.state = state;
                self.snapshot.visible = state != PillState::Idle;
            }
            BackendEvent::HoldTime(ms) => {
                self.snapshot.hold_time = Some(ms);
            }
            BackendEvent::StartRecording => {
                self.snapshot.visible = true;
                self.snapshot.state = PillState::Listening;
            }
            BackendEvent::StopRecording => {
                self.snapshot.visible = true;
                self.snapshot.state = PillState::Loading;
            }
        }
    }

    /// Result of the one-shot visibility probe made at activation
    pub fn apply_initial_visibility(&mut self, visible: bool) {
        if visible {
            self.snapshot.state = PillState::Listening;
            self.snapshot.visible = true;
        } else {
            self.snapshot.state = PillState::Idle;
            self.snapshot.visible = false;
        }
    }

    /// Reading taken by the settling poll
    ///
    /// Visibility is copied verbatim. A visible window with the pill still
    /// idle is promoted to listening; any other state is left alone.
    pub fn apply_poll_visibility(&mut self, visible: bool) {
        self.snapshot.visible = visible;
        if visible && self.snapshot.state == PillState::Idle {
            self.snapshot.state = PillState::Listening;
        }
    }
}
