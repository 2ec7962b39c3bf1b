//! audio-pill: floating status pill for a voice dictation backend
//!
//! This daemon owns the presentation state of the always-on-top pill:
//! - Listens for backend events (pill state, hold time, recording start/stop)
//! - Tracks the pill window's visibility as reported by the backend
//! - Derives one visual state and plays feedback cues on transitions
//! - Publishes snapshots to subscribed renderers over IPC
//!
//! Hotkey capture, audio, transcription and text injection all live in the
//! backend; this process only reacts to what it is told.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use audio_pill::config::Config;
use audio_pill::host::{CommandPlayer, EventBus, Host, SharedWindow, SilentPlayer, SoundPlayer};
use audio_pill::ipc::Server;
use audio_pill::lifecycle::ShutdownSignal;
use audio_pill::pill::PillCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "audio-pill starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.settle, "configuration loaded");

    let mut shutdown = ShutdownSignal::new()?;

    // Capabilities handed to the coordinator
    let window = SharedWindow::default();
    let bus = EventBus::new();
    let sounds: Arc<dyn SoundPlayer> = if config.sound.enabled {
        Arc::new(CommandPlayer::from_config(&config.sound))
    } else {
        Arc::new(SilentPlayer)
    };
    let host = Host {
        window: Arc::new(window.clone()),
        events: Arc::new(bus.clone()),
        sounds,
    };

    let pill = PillCoordinator::activate(host, config.settle);

    // IPC server feeds the bus and window, and serves snapshots
    let server = Server::new(&config.socket_path, window, bus, pill.subscribe())?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    pill.shutdown().await;
    server.shutdown().await;

    info!("audio-pill stopped");

    Ok(())
}
