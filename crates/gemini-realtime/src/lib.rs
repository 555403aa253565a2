//! Gemini Live transport for the live voice agent.

pub mod client;
pub mod types;

pub use client::{DEFAULT_MODEL, DEFAULT_URL, GeminiLiveConnector, GeminiLiveSession};
