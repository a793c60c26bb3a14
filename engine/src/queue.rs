//! Deduplicating work queue.
//!
//! Keys move through three places:
//!
//! - **pending**: waiting for a worker, in arrival order, each key at most once
//! - **processing**: checked out by exactly one worker via [`WorkQueue::get`]
//! - **dirty**: added again while processing; moved back to pending by
//!   [`WorkQueue::done`] so the update is not lost
//!
//! A key is never pending and processing at the same time, which gives
//! handlers exclusive access to a key without further locking.
//!
//! # Shutdown
//!
//! After [`WorkQueue::shut_down`], adds are ignored, pending keys are still
//! handed out, and `get` returns `None` once nothing is left.

use crate::{error::Result, Error, ObjectKey};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ObjectKey>,
    /// Mirror of `pending` for membership checks
    queued: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    /// Release time of the soonest scheduled re-add per key
    delayed: HashMap<ObjectKey, Instant>,
    shutting_down: bool,
}

impl QueueState {
    /// Returns true if the key was appended to `pending`.
    fn insert(&mut self, key: ObjectKey) -> bool {
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
            return true;
        }
        false
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<QueueState>,
    available: Notify,
    shutdown: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_delayed(&self, key: ObjectKey, deadline: Instant) {
        let mut state = self.lock();
        if state.delayed.get(&key) != Some(&deadline) {
            // Superseded by a sooner timer that already fired.
            return;
        }
        state.delayed.remove(&key);
        if state.shutting_down {
            return;
        }
        let appended = state.insert(key);
        drop(state);
        if appended {
            self.available.notify_one();
        }
    }
}

/// A cloneable handle to a shared work queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                available: Notify::new(),
                shutdown,
            }),
        }
    }

    /// Enqueue `key`.
    ///
    /// Ignored after shutdown. A key already pending keeps its position; a key
    /// being processed is marked dirty and redelivered after [`done`](Self::done).
    pub fn add(&self, key: impl Into<ObjectKey>) {
        self.try_add(key).ok();
    }

    /// Like [`add`](Self::add) but reports a shut-down queue.
    pub fn try_add(&self, key: impl Into<ObjectKey>) -> Result<()> {
        self.try_add_with(key, || {})
    }

    /// Like [`try_add`](Self::try_add), running `on_add` under the queue lock
    /// once the key is accepted.
    ///
    /// Lets callers attach per-key bookkeeping that stays consistent with
    /// [`get_with`](Self::get_with).
    pub fn try_add_with(&self, key: impl Into<ObjectKey>, on_add: impl FnOnce()) -> Result<()> {
        let key = key.into();
        let mut state = self.inner.lock();
        if state.shutting_down {
            return Err(Error::QueueShutdown);
        }
        on_add();
        let appended = state.insert(key);
        drop(state);

        if appended {
            self.inner.available.notify_one();
        }
        Ok(())
    }

    /// Enqueue `key` once `delay` has elapsed.
    ///
    /// When called repeatedly for the same key, the soonest release wins; a
    /// longer delay never postpones a shorter one already scheduled. Must be
    /// called from within a tokio runtime.
    pub fn add_after(&self, key: impl Into<ObjectKey>, delay: Duration) {
        self.try_add_after(key, delay).ok();
    }

    /// Like [`add_after`](Self::add_after) but reports a shut-down queue.
    pub fn try_add_after(&self, key: impl Into<ObjectKey>, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return self.try_add(key);
        }

        let key = key.into();
        let deadline = Instant::now() + delay;
        {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return Err(Error::QueueShutdown);
            }
            match state.delayed.get(&key) {
                Some(existing) if *existing <= deadline => return Ok(()),
                _ => {
                    state.delayed.insert(key.clone(), deadline);
                }
            }
        }

        tracing::trace!(key = %key, delay_ms = delay.as_millis() as u64, "Scheduled delayed add");

        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => inner.release_delayed(key, deadline),
                _ = shutdown.wait_for(|down| *down) => {}
            }
        });
        Ok(())
    }

    /// Wait for the next pending key and mark it as processing.
    ///
    /// Returns `None` once the queue is shut down and drained. Every key
    /// returned here must be passed to [`done`](Self::done) exactly once.
    pub async fn get(&self) -> Option<ObjectKey> {
        self.get_with(|_| ()).await.map(|(key, ())| key)
    }

    /// Like [`get`](Self::get), running `on_get` under the queue lock as the
    /// key moves to processing.
    pub async fn get_with<R>(&self, on_get: impl FnOnce(&str) -> R) -> Option<(ObjectKey, R)> {
        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so an add in between is not missed.
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.processing.insert(key.clone());
                    let extra = on_get(&key);
                    return Some((key, extra));
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer processing.
    ///
    /// If it was added while processing it goes back to the tail of the
    /// pending queue, even during shutdown.
    pub fn done(&self, key: &str) {
        let mut state = self.inner.lock();
        state.processing.remove(key);
        if !state.dirty.remove(key) {
            return;
        }
        state.queued.insert(key.to_string());
        state.pending.push_back(key.to_string());
        drop(state);

        tracing::trace!(key = %key, "Redelivering dirty key");
        self.inner.available.notify_one();
    }

    /// Stop accepting keys and wake every waiting worker.
    ///
    /// Delayed adds that have not fired yet are cancelled; their keys are
    /// returned. Later calls return nothing.
    pub fn shut_down(&self) -> Vec<ObjectKey> {
        let discarded: Vec<ObjectKey> = {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return Vec::new();
            }
            state.shutting_down = true;
            state.delayed.drain().map(|(key, _)| key).collect()
        };
        self.inner.shutdown.send_replace(true);
        self.inner.available.notify_waiters();
        tracing::debug!(discarded = discarded.len(), "Work queue shutting down");
        discarded
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently checked out by workers.
    pub fn processing_len(&self) -> usize {
        self.inner.lock().processing.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn next(queue: &WorkQueue) -> Option<String> {
        timeout(Duration::from_secs(1), queue.get())
            .await
            .expect("get should not block")
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("b");
        queue.add("c");

        assert_eq!(next(&queue).await.as_deref(), Some("a"));
        assert_eq!(next(&queue).await.as_deref(), Some("b"));
        assert_eq!(next(&queue).await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn pending_keys_are_deduplicated() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("b");
        queue.add("a");
        assert_eq!(queue.len(), 2);

        assert_eq!(next(&queue).await.as_deref(), Some("a"));
        assert_eq!(next(&queue).await.as_deref(), Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn add_while_processing_redelivers_once() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = next(&queue).await.unwrap();

        queue.add("a");
        queue.add("a");
        assert_eq!(queue.len(), 0, "processing key must not be pending");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(next(&queue).await.as_deref(), Some("a"));
        queue.done("a");
        assert!(queue.is_empty());
        assert_eq!(queue.processing_len(), 0);
    }

    #[tokio::test]
    async fn done_without_dirty_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = next(&queue).await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn get_wakes_on_add() {
        let queue = WorkQueue::new();
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        settle().await;
        queue.add("late");

        let got = timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn shutdown_drains_then_reports_empty() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.shut_down();
        queue.add("b");

        assert_eq!(queue.try_add("c"), Err(Error::QueueShutdown));
        assert_eq!(next(&queue).await.as_deref(), Some("a"));
        assert_eq!(next(&queue).await, None);
        assert_eq!(next(&queue).await, None);
    }

    #[tokio::test]
    async fn shutdown_wakes_blocked_workers() {
        let queue = WorkQueue::new();
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        settle().await;
        queue.shut_down();

        for worker in workers {
            let got = timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
            assert_eq!(got, None);
        }
    }

    #[tokio::test]
    async fn dirty_key_redelivered_during_shutdown() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = next(&queue).await.unwrap();
        queue.add("a");
        queue.shut_down();
        queue.done(&key);

        assert_eq!(next(&queue).await.as_deref(), Some("a"));
        queue.done("a");
        assert_eq!(next(&queue).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_releases_after_delay() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_millis(100));
        settle().await;
        assert!(queue.is_empty());

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(queue.is_empty());

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_delay_wins() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(10));
        queue.add_after("a", Duration::from_millis(10));
        settle().await;

        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(queue.len(), 1);

        let key = queue.get().await.unwrap();
        queue.done(&key);

        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert!(queue.is_empty(), "superseded timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn longer_delay_does_not_postpone() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_millis(10));
        queue.add_after("a", Duration::from_secs(10));
        settle().await;

        tokio::time::advance(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_dropped_on_shutdown() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_millis(10));
        queue.add_after("b", Duration::from_secs(5));
        let mut discarded = queue.shut_down();
        discarded.sort();
        assert_eq!(discarded, vec!["a", "b"]);
        assert!(queue.shut_down().is_empty());
        assert_eq!(
            queue.try_add_after("c", Duration::from_millis(10)),
            Err(Error::QueueShutdown)
        );

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn hooks_run_only_for_accepted_keys() {
        let queue = WorkQueue::new();
        let mut accepted = 0;
        queue.try_add_with("a", || accepted += 1).unwrap();
        assert_eq!(accepted, 1);

        let got = queue.get_with(|key| format!("took {key}")).await;
        assert_eq!(got, Some(("a".to_string(), "took a".to_string())));

        queue.shut_down();
        assert!(queue.try_add_with("b", || accepted += 1).is_err());
        assert_eq!(accepted, 1);
        queue.done("a");
        assert_eq!(queue.get_with(|_| ()).await, None);
    }

    #[tokio::test]
    async fn zero_delay_adds_immediately() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::ZERO);
        assert_eq!(queue.len(), 1);
    }
}
