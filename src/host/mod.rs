//! Capabilities the coordinator consumes from its host
//!
//! The coordinator never reaches for a global window handle. Window
//! visibility, event subscription and sound playback are passed in as
//! trait objects so tests can substitute doubles.

mod bus;
mod sound;
mod window;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::events::Channel;
use crate::pill::SoundCue;

pub use bus::EventBus;
pub use sound::{CommandPlayer, SilentPlayer};
pub use window::SharedWindow;

/// Raw event delivered by an [`EventSource`]
pub type RawEvent = (Channel, Value);

/// Where an [`EventSource`] delivers events for a subscription
pub type EventSink = mpsc::UnboundedSender<RawEvent>;

/// Window that hosts the pill
#[async_trait]
pub trait HostWindow: Send + Sync {
    async fn is_visible(&self) -> Result<bool, HostError>;
}

/// Named event stream pushed by the backend
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Attach a listener for `channel`; events are forwarded to `sink`
    /// until the returned handle is released.
    async fn listen(&self, channel: Channel, sink: EventSink) -> Result<Unlisten, HostError>;
}

/// Fire-and-forget feedback sounds
pub trait SoundPlayer: Send + Sync {
    fn play(&self, cue: SoundCue);
}

/// The three capabilities bundled for activation
#[derive(Clone)]
pub struct Host {
    pub window: Arc<dyn HostWindow>,
    pub events: Arc<dyn EventSource>,
    pub sounds: Arc<dyn SoundPlayer>,
}

/// Release handle for one listener. Consumed on use.
pub struct Unlisten(Box<dyn FnOnce() + Send>);

impl Unlisten {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(release))
    }

    pub fn release(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Unlisten {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Unlisten")
    }
}

/// Errors raised by host capabilities
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("window visibility unavailable: {0}")]
    WindowUnavailable(String),

    #[error("listener for {channel} rejected: {reason}")]
    ListenerRejected { channel: Channel, reason: String },
}
