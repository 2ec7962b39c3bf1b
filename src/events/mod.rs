//! Backend event protocol
//!
//! The backend pushes named events with a JSON payload. Only the four
//! channels below are consumed; their names and payload types are the
//! compatibility contract with the backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pill::{PillState, UnknownPillState};

/// Named event channels the coordinator subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Payload: one of the five pill state tags
    PillState,
    /// Payload: milliseconds the key was held
    HoldTime,
    /// Payload ignored
    StartRecording,
    /// Payload ignored
    StopRecording,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::PillState,
        Channel::HoldTime,
        Channel::StartRecording,
        Channel::StopRecording,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::PillState => "pill-state",
            Channel::HoldTime => "hold-time",
            Channel::StartRecording => "start-recording",
            Channel::StopRecording => "stop-recording",
        }
    }

    /// Look up a channel by its event name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.as_str() == name)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded backend event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    PillState(PillState),
    HoldTime(u64),
    StartRecording,
    StopRecording,
}

impl BackendEvent {
    /// Decode a raw payload received on `channel`
    pub fn decode(channel: Channel, payload: &Value) -> Result<Self, EventError> {
        match channel {
            Channel::PillState => {
                let tag = payload.as_str().ok_or_else(|| EventError::PayloadType {
                    channel,
                    expected: "string",
                })?;
                Ok(BackendEvent::PillState(tag.parse()?))
            }
            Channel::HoldTime => payload
                .as_u64()
                .map(BackendEvent::HoldTime)
                .ok_or(EventError::PayloadType {
                    channel,
                    expected: "non-negative integer",
                }),
            Channel::StartRecording => Ok(BackendEvent::StartRecording),
            Channel::StopRecording => Ok(BackendEvent::StopRecording),
        }
    }
}

impl std::fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendEvent::PillState(state) => write!(f, "PILL_STATE ({})", state),
            BackendEvent::HoldTime(ms) => write!(f, "HOLD_TIME ({}ms)", ms),
            BackendEvent::StartRecording => write!(f, "START_RECORDING"),
            BackendEvent::StopRecording => write!(f, "STOP_RECORDING"),
        }
    }
}

/// Errors decoding a backend payload
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("payload on {channel} must be a {expected}")]
    PayloadType {
        channel: Channel,
        expected: &'static str,
    },

    #[error(transparent)]
    UnknownState(#[from] UnknownPillState),
}
