//! Bragi - caching request broker for a speech generation service
//!
//! This crate sits between a chat-driven caller and an HTTP text-to-speech
//! service. Given a voice, a speaker and a line of text it returns raw PCM
//! audio, while:
//!
//! - reusing audio for requests it has already answered (memory or file cache)
//! - coalescing identical requests that are still being generated
//! - bounding upstream concurrency and rejecting work beyond a queue limit
//! - retrying transient upstream failures with exponential backoff
//! - probing the service in the background while it is unreachable
//!
//! # Example
//!
//! ```rust,no_run
//! use bragi::{BrokerConfig, SpeechBroker};
//!
//! #[tokio::main]
//! async fn main() -> bragi::Result<()> {
//!     let broker = SpeechBroker::new(BrokerConfig::load(None)?)?;
//!
//!     broker.ensure_voices(["en_US-lessac-medium"]).await?;
//!     let audio = broker
//!         .speak("en_US-lessac-medium", "0", "Hello, 5 units.")
//!         .await?;
//!
//!     let samples = bragi::pcm::to_samples(&audio);
//!     println!("{} samples", samples.len());
//!
//!     broker.shutdown();
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod broker;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod pcm;
pub mod telemetry;
pub mod text;
pub mod upstream;
pub mod version;

// Re-export main types at crate root
pub use broker::{ConfigSubscription, SpeechBroker};
pub use cache::AudioCache;
pub use config::{BrokerConfig, CacheConfig, CacheKind};
pub use connectivity::ConnectivityState;
pub use error::{BragiError, Result};
pub use fingerprint::Fingerprint;
pub use upstream::{RetryConfig, UpstreamClient};
pub use version::{PKG_VERSION, user_agent, version_string};
