//! Feedback cues fired on state transitions
//!
//! Sounds belong to edges, not states. [`EdgeObserver`] keeps the last
//! observed state and maps each (previous, current) pair through a single
//! transition table.

use serde::{Deserialize, Serialize};

use super::PillState;

/// One of the three feedback sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
    Start,
    Ending,
    Error,
}

impl std::fmt::Display for SoundCue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoundCue::Start => write!(f, "start"),
            SoundCue::Ending => write!(f, "ending"),
            SoundCue::Error => write!(f, "error"),
        }
    }
}

/// Cue for a transition, if any. `previous == current` is never an edge.
pub fn cue_for(previous: PillState, current: PillState) -> Option<SoundCue> {
    use PillState::*;

    match (previous, current) {
        (p, c) if p == c => None,
        (Idle, Listening) => Some(SoundCue::Start),
        (Loading | Success, Idle) => Some(SoundCue::Ending),
        (_, Error) => Some(SoundCue::Error),
        _ => None,
    }
}

/// State history of length two
#[derive(Debug)]
pub struct EdgeObserver {
    previous: PillState,
}

impl EdgeObserver {
    pub fn new(initial: PillState) -> Self {
        Self { previous: initial }
    }

    pub fn previous(&self) -> PillState {
        self.previous
    }

    /// Record `current` and return the cue for the edge just crossed
    pub fn observe(&mut self, current: PillState) -> Option<SoundCue> {
        if current == self.previous {
            return None;
        }
        let cue = cue_for(self.previous, current);
        self.previous = current;
        cue
    }
}

impl Default for EdgeObserver {
    fn default() -> Self {
        Self::new(PillState::Idle)
    }
}
