//! WebSocket server
//!
//! Accepts client connections at `/` and runs one [`ClientSession`] per
//! socket against the shared dispatcher.
//!
//! [`ClientSession`]: crate::session::ClientSession

pub mod config;
mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use listener::StreamServer;
