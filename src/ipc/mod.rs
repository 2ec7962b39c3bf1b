//! IPC module for backend-to-pill communication

mod client;
mod protocol;
mod server;

pub use client::{Client, Subscription};
pub use protocol::{DaemonStatus, Notification, Request, Response};
pub use server::Server;
