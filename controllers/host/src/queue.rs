//! Delaying work queue
//!
//! Keys become eligible at a point in time and are handed to one worker at a
//! time. A key is never given to two workers at once: if it is added while
//! being processed, it is parked and rescheduled when `done` is called.
//! Adding a key that is already queued keeps the earlier eligible time.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Entry<K> {
    at: Instant,
    seq: u64,
    key: K,
}

impl<K> PartialEq for Entry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<K> Eq for Entry<K> {}

impl<K> PartialOrd for Entry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Entry<K> {
    // Reversed so the BinaryHeap pops the earliest entry
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<K> {
    heap: BinaryHeap<Entry<K>>,
    /// Queued keys and the heap entry that is live for each
    scheduled: HashMap<K, (Instant, u64)>,
    processing: HashSet<K>,
    /// Eligible times for keys re-added while processing
    dirty: HashMap<K, Instant>,
    seq: u64,
    shutdown: bool,
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    /// Returns true when a new heap entry was pushed
    fn schedule(&mut self, key: K, at: Instant) -> bool {
        if let Some((existing, _)) = self.scheduled.get(&key) {
            if *existing <= at {
                return false;
            }
        }
        self.seq += 1;
        self.scheduled.insert(key.clone(), (at, self.seq));
        self.heap.push(Entry { at, seq: self.seq, key });
        true
    }

    /// Drop heap entries superseded by coalescing or `forget`
    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.scheduled.get(&top.key) == Some(&(top.at, top.seq)) {
                break;
            }
            self.heap.pop();
        }
    }
}

/// Work queue keyed by `K`, ordered by eligible time
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> std::fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}

impl<K: Clone + Eq + Hash> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Hash> WorkQueue<K> {
    /// Empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                scheduled: HashMap::new(),
                processing: HashSet::new(),
                dirty: HashMap::new(),
                seq: 0,
                shutdown: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key` for immediate processing
    pub fn add(&self, key: K) {
        self.add_after(key, Duration::ZERO);
    }

    /// Queue `key` to become eligible after `delay`
    pub fn add_after(&self, key: K, delay: Duration) {
        let at = Instant::now() + delay;
        let mut state = self.lock();
        if state.shutdown {
            return;
        }

        if state.processing.contains(&key) {
            let entry = state.dirty.entry(key).or_insert(at);
            if at < *entry {
                *entry = at;
            }
            return;
        }

        if state.schedule(key, at) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Wait for the next eligible key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls `done`.
    pub async fn pop(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();

            let next_deadline = {
                let mut guard = self.lock();
                let state = &mut *guard;
                if state.shutdown {
                    return None;
                }

                state.discard_stale();
                let now = Instant::now();
                match state.heap.peek().map(|top| top.at) {
                    Some(at) if at <= now => {
                        if let Some(entry) = state.heap.pop() {
                            state.scheduled.remove(&entry.key);
                            state.processing.insert(entry.key.clone());

                            // Hand remaining ready work to another idle worker
                            state.discard_stale();
                            if state.heap.peek().is_some_and(|top| top.at <= now) {
                                self.notify.notify_one();
                            }
                            return Some(entry.key);
                        }
                        None
                    }
                    other => other,
                }
            };

            match next_deadline {
                Some(at) => {
                    tokio::select! {
                        () = notified => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release a key returned by `pop`; reschedules it if it was re-added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if let Some(at) = state.dirty.remove(key) {
            if !state.shutdown && state.schedule(key.clone(), at) {
                drop(state);
                self.notify.notify_one();
            }
        }
    }

    /// Drop any pending requeue for `key`
    pub fn forget(&self, key: &K) {
        let mut state = self.lock();
        state.scheduled.remove(key);
        state.dirty.remove(key);
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting, parked keys included
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.scheduled.len() + state.dirty.len()
    }

    /// Whether nothing is waiting
    #[cfg_attr(not(test), expect(dead_code, reason = "companion to len"))]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is waiting to be processed
    #[cfg(test)]
    pub fn contains(&self, key: &K) -> bool {
        let state = self.lock();
        state.scheduled.contains_key(key) || state.dirty.contains_key(key)
    }
}
