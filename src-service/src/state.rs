//! Shared state store.
//!
//! This module holds the single consistent view of "what is currently true"
//! that every source adapter writes into and every render dispatcher reads.
//! State is one slot per key, last write wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use voctodeck_common::{StateFact, StateKey};

/// Immutable point-in-time view of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    revision: u64,
    values: HashMap<StateKey, String>,
}

impl StateSnapshot {
    /// Revision at which this snapshot was taken.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The active value for `key`, if any.
    pub fn get(&self, key: &StateKey) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether `value` is the active value for `key`.
    pub fn is_active(&self, key: &StateKey, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    values: HashMap<StateKey, String>,
    revision: u64,
}

/// Concurrency-safe mapping from state keys to their single active value.
///
/// One mutex guards the whole map; no I/O happens while it is held. Writes
/// arriving after the shutdown token fires are ignored.
pub struct StateStore {
    inner: Mutex<Inner>,
    changes: watch::Sender<u64>,
    shutdown: CancellationToken,
}

/// Thread-safe handle shared by all adapters
pub type SharedStore = Arc<StateStore>;

impl StateStore {
    pub fn new(shutdown: CancellationToken) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `value` the sole active value for `key`.
    ///
    /// Returns whether the visible state changed.
    #[allow(dead_code)]
    pub fn assert(&self, key: StateKey, value: impl Into<String>) -> bool {
        self.apply(&[StateFact::assert(key, value)])
    }

    /// Remove any active value for `key`.
    ///
    /// Returns whether the visible state changed.
    #[allow(dead_code)]
    pub fn clear(&self, key: StateKey) -> bool {
        self.apply(&[StateFact::clear(key)])
    }

    /// Clear several keys at once, e.g. when the source feeding them resets.
    pub fn reset<I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = StateKey>,
    {
        let facts: Vec<StateFact> = keys.into_iter().map(StateFact::clear).collect();
        self.apply(&facts)
    }

    /// Apply a batch of facts atomically.
    ///
    /// Readers observe either none or all of the batch. A batch that
    /// changes nothing does not bump the revision.
    pub fn apply(&self, facts: &[StateFact]) -> bool {
        let revision = {
            let mut inner = self.lock();
            if self.shutdown.is_cancelled() {
                return false;
            }

            let mut changed = false;
            for fact in facts {
                changed |= if fact.asserted {
                    match inner.values.get(&fact.key) {
                        Some(current) if *current == fact.value => false,
                        _ => {
                            inner.values.insert(fact.key.clone(), fact.value.clone());
                            true
                        }
                    }
                } else {
                    inner.values.remove(&fact.key).is_some()
                };
            }

            if !changed {
                return false;
            }
            inner.revision += 1;
            inner.revision
        };

        debug!("[State] revision {} ({} facts)", revision, facts.len());
        self.changes.send_if_modified(|current| {
            if revision > *current {
                *current = revision;
                true
            } else {
                false
            }
        });
        true
    }

    /// Take a consistent copy of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        StateSnapshot {
            revision: inner.revision,
            values: inner.values.clone(),
        }
    }

    /// Receive the latest revision whenever the visible state changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Whether writes are still accepted.
    #[allow(dead_code)]
    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}
