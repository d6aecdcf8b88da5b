//! Telemetry metric name constants.
//!
//! Centralised metric names for broker operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `bragi_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `status`: outcome: "ok" or "error"
//! - `operation`: upstream call: "generate", "voices", "download"

/// Total synthesis requests received by the broker.
pub const REQUESTS_TOTAL: &str = "bragi_requests_total";

/// Requests answered from the audio cache.
pub const CACHE_REUSED_TOTAL: &str = "bragi_cache_reused_total";

/// Requests that joined an in-flight generation instead of starting one.
pub const DEDUPLICATED_TOTAL: &str = "bragi_deduplicated_total";

/// Requests rejected because the queue limit was reached.
pub const OVERLOADED_TOTAL: &str = "bragi_overloaded_total";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "bragi_retries_total";

/// Duration of generation attempts in seconds, including retries.
///
/// Labels: `status` ("ok" | "error").
pub const GENERATION_DURATION_SECONDS: &str = "bragi_generation_duration_seconds";
