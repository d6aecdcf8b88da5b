//! Client for the speech generation service.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET /voices`: JSON object keyed by voice id; doubles as health probe
//! - `POST /download`: `{"voice": ...}`, provisions a voice server-side
//! - `POST /`: `{"text", "voice", "speaker" | "speaker_id"}`, returns raw
//!   16-bit little-endian mono PCM at 22050 Hz

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use super::retry::{RetryingTransport, UpstreamRequest};
use crate::{BragiError, Result, telemetry};

/// Generation service client bound to one endpoint and credential.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    transport: RetryingTransport,
    base_url: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    /// Create a client. Trailing slashes on `base_url` are trimmed.
    pub fn new(
        transport: RetryingTransport,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_get(&self, path: &str) -> UpstreamRequest {
        UpstreamRequest::get(format!("{}{path}", self.base_url)).bearer(self.api_key.as_deref())
    }

    /// Lightweight health check: one `GET /voices`, no retries.
    ///
    /// Any transport error or non-success status is a failed probe.
    pub async fn probe(&self) -> bool {
        match self.transport.send_once(&self.request_get("/voices")).await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.base_url, error = %e, "connectivity probe failed");
                false
            }
        }
    }

    /// List the voices the service can synthesize.
    pub async fn list_voices(&self) -> Result<HashSet<String>> {
        let request = self.request_get("/voices");
        let response = self
            .transport
            .send("voices", &request)
            .await
            .ok_or_else(|| self.unreachable())?;
        let response = check_status(response).await?;
        let body = response.bytes().await?;
        let voices: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&body)?;
        Ok(voices.into_keys().collect())
    }

    /// Ask the service to download a voice.
    pub async fn download_voice(&self, voice: &str) -> Result<()> {
        let request =
            UpstreamRequest::post_json(format!("{}/download", self.base_url), &DownloadRequest {
                voice,
            })?
            .bearer(self.api_key.as_deref());
        let response = self
            .transport
            .send("download", &request)
            .await
            .ok_or_else(|| self.unreachable())?;
        check_status(response).await?;
        Ok(())
    }

    /// Generate audio for `text`.
    ///
    /// A numeric `speaker` is sent as `speaker_id`, anything else as
    /// `speaker`. Records the attempt duration under
    /// [`GENERATION_DURATION_SECONDS`](telemetry::GENERATION_DURATION_SECONDS).
    pub async fn generate(&self, voice: &str, speaker: &str, text: &str) -> Result<Bytes> {
        let started = Instant::now();
        let result = self.generate_inner(voice, speaker, text).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::histogram!(telemetry::GENERATION_DURATION_SECONDS, "status" => status)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn generate_inner(&self, voice: &str, speaker: &str, text: &str) -> Result<Bytes> {
        let request =
            UpstreamRequest::post_json(&self.base_url, &GenerateRequest::new(text, voice, speaker))?
                .bearer(self.api_key.as_deref());
        let response = self
            .transport
            .send("generate", &request)
            .await
            .ok_or_else(|| self.unreachable())?;
        let response = check_status(response).await?;
        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(BragiError::EmptyResponse);
        }
        Ok(audio)
    }

    fn unreachable(&self) -> BragiError {
        BragiError::Unreachable {
            attempts: self.transport.config().max_attempts(),
        }
    }
}

/// Map a non-success response to [`BragiError::Upstream`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .ok()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| status.to_string());
    Err(BragiError::Upstream {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, Serialize, PartialEq)]
struct GenerateRequest<'a> {
    text: &'a str,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker_id: Option<i32>,
}

impl<'a> GenerateRequest<'a> {
    fn new(text: &'a str, voice: &'a str, speaker: &'a str) -> Self {
        match speaker.parse::<i32>() {
            Ok(id) => Self {
                text,
                voice,
                speaker: None,
                speaker_id: Some(id),
            },
            Err(_) => Self {
                text,
                voice,
                speaker: Some(speaker),
                speaker_id: None,
            },
        }
    }
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    voice: &'a str,
}
