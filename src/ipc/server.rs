//! Unix domain socket server for IPC
//!
//! The backend connects here to push pill events and window visibility.
//! Subscribed clients additionally receive a notification every time the
//! pill snapshot changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::host::{EventBus, SharedWindow};
use crate::pill::PillSnapshot;

use super::protocol::{read_frame, write_frame, DaemonStatus, Notification, Request, Response};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler can reach
struct Shared {
    window: SharedWindow,
    bus: EventBus,
    snapshots: watch::Receiver<PillSnapshot>,
    start_time: Instant,
}

type Writer = Arc<Mutex<OwnedWriteHalf>>;

impl Server {
    /// Bind the socket and create the server
    pub fn new(
        socket_path: &Path,
        window: SharedWindow,
        bus: EventBus,
        snapshots: watch::Receiver<PillSnapshot>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared: Arc::new(Shared {
                window,
                bus,
                snapshots,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer: Writer = Arc::new(Mutex::new(writer));
        let mut pusher: Option<tokio::task::JoinHandle<()>> = None;

        let result = loop {
            let body = match read_frame(&mut reader).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    debug!("client disconnected");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            let (response, subscribe) = match serde_json::from_slice::<Request>(&body) {
                Ok(request) => {
                    debug!(?request, "received request");
                    Self::process_request(request, &shared)
                }
                Err(e) => {
                    warn!(%e, "unparseable request");
                    let response = Response::Error {
                        code: "bad_request".to_string(),
                        message: e.to_string(),
                    };
                    (response, false)
                }
            };

            // Anything published after the reply counts as a change
            let seen = if subscribe && pusher.is_none() {
                let mut snapshots = shared.snapshots.clone();
                snapshots.borrow_and_update();
                Some(snapshots)
            } else {
                None
            };

            // Send response
            {
                let mut w = writer.lock().await;
                if let Err(e) = write_frame(&mut *w, &response).await {
                    break Err(e);
                }
            }

            // Notifications only start after the subscription is confirmed
            if let Some(snapshots) = seen {
                pusher = Some(Self::spawn_pusher(snapshots, Arc::clone(&writer)));
                debug!("client subscribed to notifications");
            }
        };

        if let Some(pusher) = pusher {
            pusher.abort();
        }
        result
    }

    /// Forward snapshot changes to a subscribed client
    fn spawn_pusher(
        mut snapshots: watch::Receiver<PillSnapshot>,
        writer: Writer,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = *snapshots.borrow_and_update();
                let mut w = writer.lock().await;
                if let Err(e) = write_frame(&mut *w, &Notification::SnapshotChanged(snapshot)).await {
                    debug!(?e, "subscriber went away");
                    break;
                }
            }
        })
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    fn process_request(request: Request, shared: &Shared) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::Emit { event, payload } => {
                let listeners = shared.bus.emit(&event, payload);
                debug!(%event, listeners, "event emitted via IPC");
                (Response::Delivered { listeners }, false)
            }

            Request::SetWindowVisible { visible } => {
                shared.window.set_visible(visible);
                (Response::Ok, false)
            }

            Request::GetSnapshot => (Response::Snapshot(*shared.snapshots.borrow()), false),

            Request::GetStatus => {
                let status = DaemonStatus {
                    pill: *shared.snapshots.borrow(),
                    window_visible: shared.window.get(),
                    uptime_secs: shared.start_time.elapsed().as_secs(),
                    ..DaemonStatus::default()
                };
                (Response::Status(status), false)
            }

            Request::Subscribe => (Response::Subscribed, true),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
