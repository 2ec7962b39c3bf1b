//! In-process event bus fed by the IPC server
//!
//! Routes each emitted event to the listeners attached to its channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use crate::events::Channel;

use super::{EventSink, EventSource, HostError, Unlisten};

type Listeners = HashMap<Channel, Vec<(u64, EventSink)>>;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    listeners: Mutex<Listeners>,
}

/// Name-routed fan-out of backend events
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event by name. Returns the number of listeners reached.
    ///
    /// Names outside the consumed channels are dropped; the backend emits
    /// events this layer does not care about.
    pub fn emit(&self, name: &str, payload: Value) -> usize {
        let Some(channel) = Channel::from_name(name) else {
            trace!(event = name, "ignoring unconsumed event");
            return 0;
        };
        self.emit_to(channel, payload)
    }

    pub fn emit_to(&self, channel: Channel, payload: Value) -> usize {
        let mut listeners = lock(&self.inner.listeners);
        let Some(sinks) = listeners.get_mut(&channel) else {
            return 0;
        };
        // Drop listeners whose receiver has gone away
        sinks.retain(|(_, sink)| sink.send((channel, payload.clone())).is_ok());
        sinks.len()
    }

    pub fn listener_count(&self, channel: Channel) -> usize {
        lock(&self.inner.listeners)
            .get(&channel)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventSource for EventBus {
    async fn listen(&self, channel: Channel, sink: EventSink) -> Result<Unlisten, HostError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners)
            .entry(channel)
            .or_default()
            .push((id, sink));
        debug!(%channel, id, "listener attached");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Unlisten::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(sinks) = lock(&inner.listeners).get_mut(&channel) {
                    sinks.retain(|(existing, _)| *existing != id);
                }
                debug!(%channel, id, "listener released");
            }
        }))
    }
}

fn lock(listeners: &Mutex<Listeners>) -> std::sync::MutexGuard<'_, Listeners> {
    // A panicked holder cannot leave the map half-written
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
