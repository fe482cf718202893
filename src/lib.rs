//! chatrelay - a LAN chat relay for a local Ollama daemon.
//!
//! Serves a small chat page and forwards each message to the daemon, either
//! as one round trip (`/chat`) or as a server-sent event stream of tokens
//! (`/stream_chat`).

pub mod config;
pub mod daemon;
pub mod error;
pub mod netinfo;
pub mod observer;
pub mod protocol;
pub mod relay;
pub mod server;

pub use config::Config;
pub use error::RelayError;
pub use server::{router, AppState, RelayServer};
