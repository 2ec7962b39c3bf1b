//! Audio pill presentation state
//!
//! Five visual states, driven by backend events and window visibility:
//! - Idle: hidden, nothing in progress
//! - Listening: key held, capturing audio
//! - Loading: transcription in flight
//! - Error / Success: outcome of the last dictation

mod coordinator;
mod settle;
mod sounds;
mod state;

pub use coordinator::PillCoordinator;
pub use settle::{SettleTiming, SettlingPoll};
pub use sounds::{cue_for, EdgeObserver, SoundCue};
pub use state::{PillModel, PillSnapshot, PillState, UnknownPillState};
