//! Backend-side IPC client
//!
//! Used by the recording workflow to drive the pill. The helpers follow
//! the order the backend emits in: on key down the window is shown and
//! recording starts; on key up the pill switches to loading and the hold
//! time is reported; when the transcription settles the outcome is shown,
//! then the pill returns to idle and the window is hidden.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tokio::net::UnixStream;
use tracing::debug;

use crate::events::Channel;
use crate::pill::{PillSnapshot, PillState};

use super::protocol::{read_frame, write_frame, Notification, Request, Response};

/// Request/response connection to the pill daemon
pub struct Client {
    stream: UnixStream,
}

impl Client {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("failed to connect to {}", socket_path.display()))?;
        Ok(Self { stream })
    }

    /// Send one request and wait for its response
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.stream, request).await?;
        let body = read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| anyhow!("daemon closed the connection"))?;
        let response = serde_json::from_slice(&body).context("failed to parse response")?;
        Ok(response)
    }

    /// Emit a named event; returns how many listeners it reached
    pub async fn emit(&mut self, event: &str, payload: Value) -> Result<usize> {
        let request = Request::Emit {
            event: event.to_string(),
            payload,
        };
        match self.request(&request).await? {
            Response::Delivered { listeners } => Ok(listeners),
            other => bail!(unexpected(other)),
        }
    }

    pub async fn set_window_visible(&mut self, visible: bool) -> Result<()> {
        match self.request(&Request::SetWindowVisible { visible }).await? {
            Response::Ok => Ok(()),
            other => bail!(unexpected(other)),
        }
    }

    pub async fn snapshot(&mut self) -> Result<PillSnapshot> {
        match self.request(&Request::GetSnapshot).await? {
            Response::Snapshot(snapshot) => Ok(snapshot),
            other => bail!(unexpected(other)),
        }
    }

    /// Turn this connection into a notification stream
    pub async fn subscribe(mut self) -> Result<Subscription> {
        match self.request(&Request::Subscribe).await? {
            Response::Subscribed => Ok(Subscription {
                stream: self.stream,
            }),
            other => bail!(unexpected(other)),
        }
    }

    async fn emit_state(&mut self, state: PillState) -> Result<()> {
        self.emit(Channel::PillState.as_str(), json!(state.as_str()))
            .await
            .map(drop)
    }

    /// Recording key pressed
    pub async fn begin_dictation(&mut self) -> Result<()> {
        self.set_window_visible(true).await?;
        self.emit_state(PillState::Listening).await?;
        self.emit(Channel::StartRecording.as_str(), json!("")).await?;
        Ok(())
    }

    /// Recording key released after `hold_time_ms`
    pub async fn end_dictation(&mut self, hold_time_ms: Option<u64>) -> Result<()> {
        self.emit_state(PillState::Loading).await?;
        self.emit(Channel::StopRecording.as_str(), json!("")).await?;
        if let Some(ms) = hold_time_ms {
            self.emit(Channel::HoldTime.as_str(), json!(ms)).await?;
        }
        Ok(())
    }

    /// Show the outcome for `linger`, then return to idle and hide
    pub async fn finish_dictation(&mut self, success: bool, linger: Duration) -> Result<()> {
        let outcome = if success {
            PillState::Success
        } else {
            PillState::Error
        };
        debug!(%outcome, ?linger, "finishing dictation");
        self.emit_state(outcome).await?;
        tokio::time::sleep(linger).await;
        self.emit_state(PillState::Idle).await?;
        self.set_window_visible(false).await?;
        Ok(())
    }
}

/// Connection that receives snapshot notifications
pub struct Subscription {
    stream: UnixStream,
}

impl Subscription {
    /// Next snapshot, or `None` once the daemon disconnects
    pub async fn next(&mut self) -> Result<Option<PillSnapshot>> {
        let Some(body) = read_frame(&mut self.stream).await? else {
            return Ok(None);
        };
        let Notification::SnapshotChanged(snapshot) =
            serde_json::from_slice::<Notification>(&body).context("failed to parse notification")?;
        Ok(Some(snapshot))
    }
}

fn unexpected(response: Response) -> String {
    match response {
        Response::Error { code, message } => format!("daemon error {code}: {message}"),
        other => format!("unexpected response: {other:?}"),
    }
}
