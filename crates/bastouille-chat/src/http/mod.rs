//! HTTP transport for the streaming chat endpoint.
//!
//! The endpoint takes `{ "message", "history" }` as JSON and answers with a
//! chunked body of newline-delimited JSON events.
mod client;
mod config;

pub use client::HttpTransport;
pub use config::HttpTransportConfig;
