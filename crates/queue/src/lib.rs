//! Skiff work queue: a coalescing FIFO with delayed and rate-limited insertion.
//!
//! Semantics follow the classic controller work queue:
//! - an item that is already queued is not queued twice (`dirty` set);
//! - an item handed out by [`WorkQueue::get`] is never handed out again until
//!   [`WorkQueue::done`] is called; re-adds in the meantime are parked and the
//!   item is queued once more on `done`;
//! - delayed items wait in a deadline heap that the consumer drains while it
//!   waits, so producers never need a runtime or a timer task;
//! - after [`WorkQueue::shut_down`] nothing is accepted and `get` returns `None`.

#![forbid(unsafe_code)]

pub mod ratelimit;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use skiff_core::ProcessorConfig;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

pub use ratelimit::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter, MaxOfRateLimiter,
    RateLimiter,
};

struct Waiting<T> {
    ready_at: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Waiting<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<T> Eq for Waiting<T> {}

impl<T> PartialOrd for Waiting<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the BinaryHeap pops the earliest deadline first.
impl<T> Ord for Waiting<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.ready_at.cmp(&self.ready_at).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: FxHashSet<T>,
    processing: FxHashSet<T>,
    waiting: BinaryHeap<Waiting<T>>,
    /// Effective deadline per waiting item; heap entries that disagree are stale.
    waiting_at: FxHashMap<T, Instant>,
    seq: u64,
    shutting_down: bool,
}

impl<T: Eq + Hash + Clone> State<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: FxHashSet::default(),
            processing: FxHashSet::default(),
            waiting: BinaryHeap::new(),
            waiting_at: FxHashMap::default(),
            seq: 0,
            shutting_down: false,
        }
    }

    /// Returns true when the item was appended to the ready queue.
    fn add(&mut self, item: T) -> bool {
        if self.dirty.contains(&item) {
            return false;
        }
        self.dirty.insert(item.clone());
        if self.processing.contains(&item) {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    fn schedule(&mut self, item: T, ready_at: Instant) {
        if let Some(existing) = self.waiting_at.get(&item) {
            if *existing <= ready_at {
                return;
            }
        }
        self.waiting_at.insert(item.clone(), ready_at);
        self.seq = self.seq.wrapping_add(1);
        self.waiting.push(Waiting { ready_at, seq: self.seq, item });
    }

    fn promote_ready(&mut self, now: Instant) {
        while let Some(head) = self.waiting.peek() {
            if head.ready_at > now {
                break;
            }
            let Some(w) = self.waiting.pop() else { break };
            if self.waiting_at.get(&w.item) == Some(&w.ready_at) {
                self.waiting_at.remove(&w.item);
                self.add(w.item);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.peek().map(|w| w.ready_at)
    }
}

/// Shared work queue; cheap to share behind an `Arc`.
pub struct WorkQueue<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
    limiter: Box<dyn RateLimiter<T>>,
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Queue using the default controller rate limiter.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &ProcessorConfig::default())
    }

    pub fn with_config(name: impl Into<String>, cfg: &ProcessorConfig) -> Self {
        Self::with_rate_limiter(name, default_controller_rate_limiter(cfg))
    }

    pub fn with_rate_limiter(name: impl Into<String>, limiter: impl RateLimiter<T> + 'static) -> Self {
        Self { name: name.into(), state: Mutex::new(State::new()), notify: Notify::new(), limiter: Box::new(limiter) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark `item` as needing processing. Never blocks.
    pub fn add(&self, item: T) {
        let queued = {
            let mut st = self.state.lock();
            if st.shutting_down {
                return;
            }
            let queued = st.add(item);
            gauge!("skiff_queue_depth", st.queue.len() as f64, "queue" => self.name.clone());
            queued
        };
        counter!("skiff_queue_adds_total", 1u64, "queue" => self.name.clone());
        if queued {
            self.notify.notify_one();
        }
    }

    /// Add `item` once `delay` has elapsed. A zero delay is a plain [`add`](Self::add).
    /// If the item is already waiting, the earlier deadline wins.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        {
            let mut st = self.state.lock();
            if st.shutting_down {
                return;
            }
            st.schedule(item, Instant::now() + delay);
        }
        // wake the consumer so it re-arms its timer
        self.notify.notify_one();
    }

    /// Add `item` after the delay chosen by the rate limiter.
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.limiter.when(&item);
        counter!("skiff_queue_retries_total", 1u64, "queue" => self.name.clone());
        debug!(queue = %self.name, delay_ms = delay.as_millis() as u64, "requeue rate limited");
        self.add_after(item, delay);
    }

    /// Stop tracking retries for `item`.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut st = self.state.lock();
                if st.shutting_down {
                    return None;
                }
                st.promote_ready(Instant::now());
                if let Some(item) = st.queue.pop_front() {
                    st.dirty.remove(&item);
                    st.processing.insert(item.clone());
                    gauge!("skiff_queue_depth", st.queue.len() as f64, "queue" => self.name.clone());
                    return Some(item);
                }
                st.next_deadline()
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Finish processing `item`. If it was re-added meanwhile it is queued again.
    pub fn done(&self, item: &T) {
        let requeued = {
            let mut st = self.state.lock();
            st.processing.remove(item);
            if st.dirty.contains(item) && !st.shutting_down {
                st.queue.push_back(item.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Refuse new items and release every waiting consumer.
    pub fn shut_down(&self) {
        {
            let mut st = self.state.lock();
            if st.shutting_down {
                return;
            }
            st.shutting_down = true;
            st.queue.clear();
            st.dirty.clear();
            st.waiting.clear();
            st.waiting_at.clear();
        }
        debug!(queue = %self.name, "work queue shut down");
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Items ready for processing (excludes delayed and in-flight items).
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items waiting for their delay to elapse.
    pub fn waiting_len(&self) -> usize {
        self.state.lock().waiting_at.len()
    }

    /// Items currently handed out and not yet marked done.
    pub fn processing_len(&self) -> usize {
        self.state.lock().processing.len()
    }
}
