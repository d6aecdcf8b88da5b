//! Upstream generation service: retrying transport and typed client.

pub mod client;
pub mod retry;

pub use client::UpstreamClient;
pub use retry::{RetryConfig, RetryingTransport, UpstreamRequest};
