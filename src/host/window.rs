//! Window visibility as reported by the backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{HostError, HostWindow};

/// Visibility flag shared between the IPC server (writer) and the
/// coordinator (reader)
#[derive(Debug, Clone, Default)]
pub struct SharedWindow {
    visible: Arc<AtomicBool>,
}

impl SharedWindow {
    pub fn new(visible: bool) -> Self {
        Self {
            visible: Arc::new(AtomicBool::new(visible)),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        let old = self.visible.swap(visible, Ordering::SeqCst);
        if old != visible {
            debug!(visible, "window visibility changed");
        }
    }

    pub fn get(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostWindow for SharedWindow {
    async fn is_visible(&self) -> Result<bool, HostError> {
        Ok(self.get())
    }
}
