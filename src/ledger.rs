//! In-flight request ledger.
//!
//! Maps a key to the shared future of the one generation currently running
//! for it. The first caller for a key starts the generation as its own
//! tokio task; later callers for the same key receive a clone of the same
//! [`Pending`] handle and await the same result.
//!
//! Running the generation as a task means a caller that stops awaiting does
//! not cancel work other callers are waiting on.
//!
//! Entries are removed by the task itself, under the same lock that guards
//! lookups, once the generation finishes (or panics, or is aborted). A
//! request arriving after that point misses the ledger and sees whatever
//! the generation left in the cache.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::{BragiError, Result};

/// Shared handle to an in-flight generation.
pub type Pending<T> = Shared<BoxFuture<'static, Result<T>>>;

type Entries<K, T> = Mutex<HashMap<K, Pending<T>>>;

/// How [`InFlightLedger::join_or_start`] resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new generation was started by this call.
    Started,
    /// An identical generation was already running; this call joined it.
    Joined,
}

/// Ledger of in-flight generations keyed by `K`.
pub struct InFlightLedger<K, T> {
    entries: Arc<Entries<K, T>>,
}

impl<K, T> InFlightLedger<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Pending<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The running generation for `key`, if any.
    pub fn get(&self, key: &K) -> Option<Pending<T>> {
        self.lock().get(key).cloned()
    }

    /// Join the generation for `key`, or start one with `generator`.
    ///
    /// Lookup and registration happen under one lock, so two racing callers
    /// can never both start a generation for the same key. `generator` is
    /// only invoked when this call starts the generation.
    ///
    /// Must be called within a tokio runtime.
    pub fn join_or_start<F, Fut>(&self, key: K, generator: F) -> (Pending<T>, Admission)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut entries = self.lock();
        if let Some(pending) = entries.get(&key) {
            return (pending.clone(), Admission::Joined);
        }

        let guard = RemoveOnDrop {
            entries: Arc::downgrade(&self.entries),
            key: key.clone(),
        };
        let work = generator();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let pending = async move {
            handle.await.unwrap_or_else(|e| {
                Err(if e.is_cancelled() {
                    BragiError::ShuttingDown
                } else {
                    BragiError::Internal(format!("generation task panicked: {e}"))
                })
            })
        }
        .boxed()
        .shared();

        entries.insert(key, pending.clone());
        (pending, Admission::Started)
    }

    /// Number of generations in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, T> Default for InFlightLedger<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the ledger entry when the generation task finishes or is dropped.
struct RemoveOnDrop<K: Hash + Eq, T> {
    entries: Weak<Entries<K, T>>,
    key: K,
}

impl<K: Hash + Eq, T> Drop for RemoveOnDrop<K, T> {
    fn drop(&mut self) {
        if let Some(entries) = self.entries.upgrade() {
            entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.key);
        }
    }
}
