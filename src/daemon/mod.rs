//! Inference daemon access.
//!
//! The daemon is an external, locally running Ollama server. The relay:
//! - sends one generation request per inbound chat
//! - either waits for the whole reply or hands the streaming body to the relay
//! - queries `/api/tags` for health and model listing

pub mod client;

pub use client::{DaemonClient, ModelInfo, EMPTY_REPLY};
