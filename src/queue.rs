// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deduplicating, rate-limited work queue.
//!
//! Semantics follow the Kubernetes client workqueue:
//!
//! - A key is queued at most once. Adding a key that is already queued is a no-op.
//! - A key handed out by [`WorkQueue::get`] is "processing" until
//!   [`WorkQueue::done`]. While processing, the key is never handed to
//!   another worker; adds for it are remembered and the key is queued again
//!   once, when `done` is called.
//! - After [`WorkQueue::shutdown`] new adds are ignored. Keys already queued
//!   are still handed out, and `get` returns `None` once the queue is empty.
//!
//! Failed keys are re-added through [`WorkQueue::add_rate_limited`], which
//! delays each key exponentially in the number of consecutive failures until
//! [`WorkQueue::forget`] resets it.

use crate::constants::{BACKOFF_MULTIPLIER, DEFAULT_BACKOFF_BASE_MILLIS, DEFAULT_BACKOFF_MAX_SECS};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Per-key exponential backoff.
///
/// # Retry Schedule
///
/// With the defaults (base 5ms, multiplier 2, max 1000s), consecutive
/// failures of one key are retried after:
///
/// 1. 5ms
/// 2. 10ms
/// 3. 20ms
/// 4. 40ms
/// 5. ...doubling...
/// 6. 1000s (capped at max interval, reached after 18 failures)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound on any delay
    pub max: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MILLIS),
            max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            multiplier: BACKOFF_MULTIPLIER,
        }
    }
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            ..Default::default()
        }
    }

    /// Delay before retrying a key that already failed `failures` times.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        self.multiplier
            .checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

/// Concurrent work queue of keys; clones share the same queue.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    #[must_use]
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    /// Queue `key` unless it is already queued.
    pub fn add(&self, key: K) {
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.shared.notify.notify_one();
    }

    /// Queue `key` after `delay`. Must be called within a Tokio runtime.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Queue `key` after its backoff delay and count one more failure for it.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.shared.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.shared.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        trace!(delay_ms = delay.as_millis(), "Rate-limited requeue");
        self.add_after(key, delay);
    }

    /// Reset the failure count of `key`.
    pub fn forget(&self, key: &K) {
        self.shared.state.lock().failures.remove(key);
    }

    /// Consecutive rate-limited requeues of `key` since the last [`Self::forget`].
    #[must_use]
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once shut down and drained.
    ///
    /// The caller owns the key until it calls [`Self::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on so idle workers pick up the rest.
                        self.shared.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer processing; requeue it if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.shared.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.shared.notify.notify_one();
        }
    }

    /// Number of keys waiting to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting keys and wake every waiting worker.
    pub fn shutdown(&self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod queue_tests;
