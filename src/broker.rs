//! The speech broker facade.
//!
//! [`SpeechBroker::synthesize`] resolves a request through, in order:
//!
//! 1. the audio cache (hit ⇒ return),
//! 2. the in-flight ledger (hit ⇒ await the running generation),
//! 3. the queue limit (full ⇒ [`BragiError::Overloaded`]),
//! 4. a new generation task: wait for a generation slot, re-check the
//!    cache, call the upstream with retries, cache the audio.
//!
//! The queue place taken in step 3 is held by the generation task and
//! released when it finishes, whatever the outcome.
//!
//! All state is owned by one broker instance. Build it with
//! [`SpeechBroker::new`], feed it configuration changes with
//! [`reconfigure`](SpeechBroker::reconfigure) or
//! [`watch_config`](SpeechBroker::watch_config), and tear it down with
//! [`shutdown`](SpeechBroker::shutdown).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::admission::AdmissionController;
use crate::cache::AudioCache;
use crate::config::BrokerConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::fingerprint::Fingerprint;
use crate::ledger::{Admission, InFlightLedger};
use crate::upstream::{RetryConfig, RetryingTransport, UpstreamClient};
use crate::{BragiError, Result, telemetry, text};

type SharedClient = Arc<RwLock<Arc<UpstreamClient>>>;

/// Caching, deduplicating, admission-controlled front for a speech
/// generation service.
pub struct SpeechBroker {
    config: RwLock<BrokerConfig>,
    client: SharedClient,
    cache: RwLock<Arc<AudioCache>>,
    admission: Arc<AdmissionController>,
    ledger: InFlightLedger<Fingerprint, Bytes>,
    connectivity: Arc<ConnectivityMonitor>,
    subscriptions: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
}

impl SpeechBroker {
    /// Build a broker from `config`.
    ///
    /// Does not contact the upstream; connectivity starts out
    /// [`Unverified`](ConnectivityState::Unverified).
    pub fn new(config: BrokerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let client = build_client(&config)?;
        let cache = AudioCache::from_config(&config.cache);
        let admission =
            AdmissionController::new(config.max_simultaneous_generations, config.max_queued);
        let connectivity = ConnectivityMonitor::new(config.probe_interval_duration());

        info!(
            url = %config.api_url,
            cache = ?config.cache.kind,
            generations = config.max_simultaneous_generations,
            max_queued = config.max_queued,
            "speech broker ready"
        );

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            client: Arc::new(RwLock::new(Arc::new(client))),
            cache: RwLock::new(Arc::new(cache)),
            admission: Arc::new(admission),
            ledger: InFlightLedger::new(),
            connectivity: Arc::new(connectivity),
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    // ------------------------------------------------------------------
    // Synthesis
    // ------------------------------------------------------------------

    /// Synthesize `text` with `voice`/`speaker`, returning raw PCM audio.
    ///
    /// `text` is used as given; see [`speak`](Self::speak) for the
    /// normalizing variant. Expected failures (empty text, overload,
    /// upstream rejection or outage) come back as `Err`; callers should
    /// treat them as "skip this clip".
    pub async fn synthesize(
        self: &Arc<Self>,
        voice: &str,
        speaker: &str,
        text: &str,
    ) -> Result<Bytes> {
        metrics::counter!(telemetry::REQUESTS_TOTAL).increment(1);

        if self.closed.load(Ordering::Acquire) {
            return Err(BragiError::ShuttingDown);
        }
        if text.trim().is_empty() {
            warn!(voice, speaker, "refusing to synthesize empty text");
            return Err(BragiError::EmptyText);
        }

        let key = Fingerprint::new(voice, speaker, text);

        if let Some(audio) = self.cache().get(&key) {
            metrics::counter!(telemetry::CACHE_REUSED_TOTAL).increment(1);
            return Ok(audio);
        }

        if let Some(pending) = self.ledger.get(&key) {
            metrics::counter!(telemetry::DEDUPLICATED_TOTAL).increment(1);
            debug!(fingerprint = %key, "joining in-flight generation");
            return pending.await;
        }

        let Some(ticket) = self.admission.admit() else {
            metrics::counter!(telemetry::OVERLOADED_TOTAL).increment(1);
            warn!(
                fingerprint = %key,
                max_queued = self.admission.max_queued(),
                "generation queue full, dropping request"
            );
            return Err(BragiError::Overloaded);
        };

        let broker = Arc::clone(self);
        let (voice, speaker, text) = (voice.to_owned(), speaker.to_owned(), text.to_owned());
        let (pending, admission) = self.ledger.join_or_start(key, move || async move {
            let _ticket = ticket;
            broker.generate(key, &voice, &speaker, &text).await
        });

        if admission == Admission::Joined {
            metrics::counter!(telemetry::DEDUPLICATED_TOTAL).increment(1);
            debug!(fingerprint = %key, "joining in-flight generation");
        }
        pending.await
    }

    /// Normalize free-form `text` with [`text::sanitize`] and synthesize it.
    ///
    /// Text longer than `max_text_chars` is rejected before normalization.
    pub async fn speak(
        self: &Arc<Self>,
        voice: &str,
        speaker: &str,
        text: &str,
    ) -> Result<Bytes> {
        let max = self.config_snapshot().max_text_chars;
        let len = text.chars().count();
        if len > max {
            warn!(len, max, "text too long for synthesis");
            return Err(BragiError::TextTooLong { len, max });
        }
        let sanitized = text::sanitize(text);
        self.synthesize(voice, speaker, &sanitized).await
    }

    /// Body of a generation task. Runs at most once per fingerprint at a time.
    async fn generate(
        &self,
        key: Fingerprint,
        voice: &str,
        speaker: &str,
        text: &str,
    ) -> Result<Bytes> {
        let _slot = self.admission.acquire_generation().await?;

        // Another generation may have cached this clip while we queued.
        if let Some(audio) = self.cache().get(&key) {
            metrics::counter!(telemetry::CACHE_REUSED_TOTAL).increment(1);
            return Ok(audio);
        }

        let client = self.current_client();
        match client.generate(voice, speaker, text).await {
            Ok(audio) => {
                self.connectivity.mark_verified();
                self.cache().put(key, audio.clone());
                Ok(audio)
            }
            Err(e @ BragiError::Unreachable { .. }) => {
                error!(
                    url = client.base_url(),
                    fingerprint = %key,
                    error = %e,
                    "speech service unreachable"
                );
                self.invalidate_connectivity();
                Err(e)
            }
            Err(e) => {
                error!(fingerprint = %key, voice, error = %e, "speech generation failed");
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Voices
    // ------------------------------------------------------------------

    /// Voices the upstream can synthesize, sorted.
    pub async fn voices(&self) -> Result<Vec<String>> {
        match self.current_client().list_voices().await {
            Ok(voices) => {
                self.connectivity.mark_verified();
                let mut voices: Vec<String> = voices.into_iter().collect();
                voices.sort();
                Ok(voices)
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch available voices");
                self.start_probing();
                Err(e)
            }
        }
    }

    /// Make sure every voice in `required` is available upstream,
    /// downloading missing ones. Returns the voices that were downloaded.
    ///
    /// A failure to list voices starts connectivity probing; individual
    /// download failures are logged and skipped.
    pub async fn ensure_voices<I, S>(&self, required: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let client = self.current_client();
        let available = match client.list_voices().await {
            Ok(voices) => voices,
            Err(e) => {
                warn!(error = %e, "failed to fetch available voices");
                self.start_probing();
                return Err(e);
            }
        };
        self.connectivity.mark_verified();

        let required: BTreeSet<String> = required
            .into_iter()
            .map(|v| v.as_ref().to_owned())
            .collect();
        let mut downloaded = Vec::new();
        for voice in required {
            if available.contains(&voice) {
                continue;
            }
            info!(voice, "voice missing upstream, downloading");
            match client.download_voice(&voice).await {
                Ok(()) => {
                    info!(voice, "voice downloaded");
                    downloaded.push(voice);
                }
                Err(e) => error!(voice, error = %e, "failed to download voice"),
            }
        }
        Ok(downloaded)
    }

    // ------------------------------------------------------------------
    // Connectivity
    // ------------------------------------------------------------------

    pub fn connectivity_state(&self) -> ConnectivityState {
        self.connectivity.state()
    }

    /// Start probing the upstream unless a probe loop is already running.
    pub fn start_probing(&self) {
        self.connectivity.start(probe_fn(&self.client));
    }

    fn invalidate_connectivity(&self) {
        self.connectivity.invalidate(probe_fn(&self.client));
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Current configuration.
    pub fn config_snapshot(&self) -> BrokerConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Apply a new configuration.
    ///
    /// Invalid configurations are rejected with
    /// [`BragiError::Configuration`] and leave the broker unchanged.
    ///
    /// - endpoint or key change: connectivity becomes unverified and probing
    ///   starts
    /// - transport settings: later requests use a new HTTP client
    /// - generation slots: grow now, shrink as running work finishes
    /// - cache backend, capacity or directory: a fresh backend replaces the
    ///   old one (the directory is created if missing)
    pub fn reconfigure(&self, config: BrokerConfig) -> Result<()> {
        let old = self.config_snapshot();
        if old == config {
            return Ok(());
        }
        config.validate()?;

        let endpoint_changed = old.api_url != config.api_url || old.api_key != config.api_key;
        let transport_changed = endpoint_changed
            || old.request_timeout_secs != config.request_timeout_secs
            || old.max_retries != config.max_retries
            || old.retry_base_delay_ms != config.retry_base_delay_ms;

        if transport_changed {
            let client = build_client(&config)?;
            *self.client.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(client);
        }
        if old.max_simultaneous_generations != config.max_simultaneous_generations {
            self.admission
                .set_generation_limit(config.max_simultaneous_generations);
        }
        if old.max_queued != config.max_queued {
            self.admission.set_max_queued(config.max_queued);
        }
        if old.probe_interval_ms != config.probe_interval_ms {
            self.connectivity
                .set_interval(config.probe_interval_duration());
        }
        if old.cache.kind != config.cache.kind
            || old.cache.max_entries != config.cache.max_entries
            || old.cache.directory != config.cache.directory
        {
            let cache = AudioCache::from_config(&config.cache);
            *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(cache);
        }

        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;

        if endpoint_changed {
            info!("speech service endpoint changed, re-verifying connection");
            self.invalidate_connectivity();
        }
        Ok(())
    }

    /// Follow configuration published on a `watch` channel.
    ///
    /// The current value is applied immediately, then every change. The
    /// subscription ends when the returned guard is dropped, the sender is
    /// dropped, or the broker shuts down.
    pub fn watch_config(
        self: &Arc<Self>,
        mut rx: watch::Receiver<BrokerConfig>,
    ) -> ConfigSubscription {
        let broker: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let config = rx.borrow_and_update().clone();
                let Some(broker) = broker.upgrade() else {
                    return;
                };
                if let Err(e) = broker.reconfigure(config) {
                    warn!(error = %e, "rejected configuration update");
                }
                drop(broker);
                if rx.changed().await.is_err() {
                    return;
                }
            }
        });
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.abort_handle());
        ConfigSubscription { handle }
    }

    // ------------------------------------------------------------------
    // Cache & lifecycle
    // ------------------------------------------------------------------

    fn cache(&self) -> Arc<AudioCache> {
        Arc::clone(&self.cache.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn current_client(&self) -> Arc<UpstreamClient> {
        Arc::clone(&self.client.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Drop all cached audio.
    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    /// Session boundary: clear the cache unless it persists across sessions.
    pub fn end_session(&self) {
        if !self.config_snapshot().cache.persist_across_sessions {
            debug!("session ended, clearing audio cache");
            self.clear_cache();
        }
    }

    /// Number of cached clips.
    pub fn cached_clips(&self) -> usize {
        self.cache().len()
    }

    /// Generations currently running or waiting for a slot.
    pub fn in_flight(&self) -> usize {
        self.ledger.len()
    }

    /// Requests currently holding a queue place.
    pub fn queued(&self) -> usize {
        self.admission.queued()
    }

    /// Stop accepting work, cancel background tasks and clear the cache.
    ///
    /// Generations already waiting for a slot fail with
    /// [`BragiError::ShuttingDown`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("speech broker shutting down");
        self.admission.close();
        self.connectivity.stop();
        self.abort_subscriptions();
        self.clear_cache();
    }

    fn abort_subscriptions(&self) {
        for handle in self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
    }
}

impl Drop for SpeechBroker {
    fn drop(&mut self) {
        self.connectivity.stop();
        self.abort_subscriptions();
    }
}

impl std::fmt::Debug for SpeechBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechBroker")
            .field("connectivity", &self.connectivity.state())
            .field("in_flight", &self.ledger.len())
            .field("queued", &self.admission.queued())
            .finish()
    }
}

/// Guard for a [`SpeechBroker::watch_config`] subscription.
#[derive(Debug)]
pub struct ConfigSubscription {
    handle: JoinHandle<()>,
}

impl Drop for ConfigSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn build_client(config: &BrokerConfig) -> Result<UpstreamClient> {
    let retry = RetryConfig::new()
        .max_retries(config.max_retries)
        .base_delay(config.retry_base_delay_duration());
    let transport = RetryingTransport::new(config.request_timeout_duration(), retry)?;
    Ok(UpstreamClient::new(
        transport,
        config.api_url.clone(),
        config.api_key.clone(),
    ))
}

/// Probe closure that always targets the broker's current client.
fn probe_fn(
    client: &SharedClient,
) -> impl Fn() -> futures_util::future::BoxFuture<'static, bool> + Send + 'static {
    let client = Arc::clone(client);
    move || {
        let current = Arc::clone(&client.read().unwrap_or_else(|e| e.into_inner()));
        Box::pin(async move { current.probe().await })
    }
}
