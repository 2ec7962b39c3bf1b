//! audio-pill: presentation state for a voice dictation pill
//!
//! Modules:
//! - `pill`: the coordinator, its state store and transition sounds
//! - `events`: backend event protocol
//! - `host`: injected window, event and sound capabilities
//! - `ipc`: Unix socket boundary with the backend
//! - `config`, `lifecycle`: daemon plumbing

pub mod config;
pub mod events;
pub mod host;
pub mod ipc;
pub mod lifecycle;
pub mod pill;
