//! Queue-backed syncer.
//!
//! Triggers put keys on a [`WorkQueue`]; a pool of workers pulls them off one
//! at a time per key and runs the handler. Failed keys are re-added after a
//! backoff delay until they exceed the retry limit, at which point they are
//! dropped with a final failure record.
//!
//! # Algorithm
//!
//! 1. `trigger` remembers the trigger kind and adds the key to the queue
//! 2. a worker `get`s the key and runs the handler
//! 3. success clears the retry counter
//! 4. failure bumps the counter and either schedules `add_after(backoff)` or
//!    drops the key once `retry_limit` is exceeded
//! 5. the worker records a [`SyncInfo`] and calls `done`

use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::config::SyncerConfig;
use crate::handler::Handler;
use crate::ledger::{Outcome, SyncInfo, SyncLedger, TriggerKind};
use crate::queue::WorkQueue;
use crate::service::{self, KeySource, Service, StateCell, StopSignal, SyncerState};
use crate::{HandlerError, ObjectKey, RetryCount};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

#[derive(Debug)]
struct RetryState {
    count: RetryCount,
    last_error: String,
}

struct Inner {
    name: String,
    config: SyncerConfig,
    queue: WorkQueue,
    handler: Arc<dyn Handler>,
    backoff: Arc<dyn Backoff>,
    clock: Arc<dyn Clock>,
    key_source: Option<Arc<dyn KeySource>>,
    /// Failures per key since its last success
    retries: DashMap<ObjectKey, RetryState>,
    /// Trigger kind of each key's next delivery. Only touched under the
    /// queue lock or for retries.
    triggers: DashMap<ObjectKey, TriggerKind>,
    ledger: SyncLedger,
    state: StateCell,
}

impl Inner {
    fn enqueue(&self, key: &str, kind: TriggerKind) -> bool {
        let accepted = self.queue.try_add_with(key, || {
            self.triggers
                .entry(key.to_string())
                .and_modify(|existing| {
                    if kind == TriggerKind::Manual {
                        *existing = TriggerKind::Manual;
                    }
                })
                .or_insert(kind);
        });

        match accepted {
            Ok(()) => {
                tracing::debug!(syncer = %self.name, key = %key, trigger = ?kind, "Enqueued key");
                true
            }
            Err(_) => false,
        }
    }

    async fn worker(self: Arc<Self>, id: usize) {
        tracing::debug!(syncer = %self.name, worker = id, "Worker started");

        let take_trigger = |key: &str| {
            self.triggers
                .remove(key)
                .map(|(_, kind)| kind)
                .unwrap_or(TriggerKind::Auto)
        };
        while let Some((key, trigger)) = self.queue.get_with(take_trigger).await {
            self.process(&key, trigger).await;
            self.queue.done(&key);
        }

        tracing::debug!(syncer = %self.name, worker = id, "Worker exiting");
    }

    async fn process(&self, key: &str, trigger: TriggerKind) {
        let retry_count = self.retries.get(key).map(|retry| retry.count).unwrap_or(0);

        let attempt = service::attempt(self.handler.as_ref(), self.clock.as_ref(), key).await;

        let outcome = match attempt.result {
            Ok(()) => {
                self.retries.remove(key);
                tracing::debug!(
                    syncer = %self.name,
                    key = %key,
                    elapsed_ms = attempt.duration.as_millis() as u64,
                    "Synced key"
                );
                Outcome::Success
            }
            Err(err) => self.handle_failure(key, trigger, err),
        };

        self.ledger.record(SyncInfo {
            attempt_id: Uuid::new_v4(),
            key: key.to_string(),
            trigger,
            started_at: attempt.started_at,
            duration: attempt.duration,
            outcome,
            retry_count,
        });
    }

    fn handle_failure(&self, key: &str, trigger: TriggerKind, err: HandlerError) -> Outcome {
        let error = err.to_string();
        let retries = {
            let mut retry = self
                .retries
                .entry(key.to_string())
                .or_insert_with(|| RetryState {
                    count: 0,
                    last_error: String::new(),
                });
            retry.count += 1;
            retry.last_error.clone_from(&error);
            retry.count
        };

        if retries > self.config.retry_limit {
            self.retries.remove(key);
            tracing::error!(
                syncer = %self.name,
                key = %key,
                retries = retries - 1,
                error = %error,
                "Dropping key after exhausting retries"
            );
            return Outcome::FailureFinal { error };
        }

        let delay = self.backoff.delay(retries);
        self.triggers.entry(key.to_string()).or_insert(trigger);
        if self.queue.try_add_after(key, delay).is_err() {
            self.retries.remove(key);
            tracing::warn!(
                syncer = %self.name,
                key = %key,
                error = %error,
                "Sync failed while shutting down; retry discarded"
            );
            return Outcome::FailureFinal { error };
        }

        tracing::warn!(
            syncer = %self.name,
            key = %key,
            retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Sync failed; retrying"
        );
        Outcome::Failure { error }
    }

    /// Close out a key whose scheduled retry was cancelled by shutdown.
    fn abandon(&self, key: &str) {
        // Retried and settled during the drain.
        let Some((_, retry)) = self.retries.remove(key) else {
            return;
        };
        let trigger = self
            .triggers
            .remove(key)
            .map(|(_, kind)| kind)
            .unwrap_or(TriggerKind::Auto);

        tracing::warn!(
            syncer = %self.name,
            key = %key,
            retries = retry.count,
            error = %retry.last_error,
            "Pending retry cancelled by shutdown"
        );
        self.ledger.record(SyncInfo {
            attempt_id: Uuid::new_v4(),
            key: key.to_string(),
            trigger,
            started_at: self.clock.now(),
            duration: Duration::ZERO,
            outcome: Outcome::FailureFinal {
                error: retry.last_error,
            },
            retry_count: retry.count,
        });
    }

    async fn resync(
        self: Arc<Self>,
        period: Duration,
        source: Arc<dyn KeySource>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let keys = source.keys();
                    tracing::debug!(syncer = %self.name, count = keys.len(), "Resyncing all keys");
                    for key in &keys {
                        self.enqueue(key, TriggerKind::Auto);
                    }
                }
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
        }
    }
}

/// A syncer backed by a deduplicating work queue and a worker pool.
///
/// Cheap to clone; clones drive the same queue and ledger.
#[derive(Clone)]
pub struct WorkqueueSyncer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkqueueSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkqueueSyncer")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl WorkqueueSyncer {
    pub(crate) fn from_parts(
        name: String,
        config: SyncerConfig,
        handler: Arc<dyn Handler>,
        backoff: Arc<dyn Backoff>,
        clock: Arc<dyn Clock>,
        key_source: Option<Arc<dyn KeySource>>,
    ) -> Self {
        let ledger = SyncLedger::new(config.ledger_capacity);
        Self {
            inner: Arc::new(Inner {
                name,
                config,
                queue: WorkQueue::new(),
                handler,
                backoff,
                clock,
                key_source,
                retries: DashMap::new(),
                triggers: DashMap::new(),
                ledger,
                state: StateCell::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The underlying queue, for monitoring.
    pub fn queue(&self) -> &WorkQueue {
        &self.inner.queue
    }

    /// Failures recorded for `key` since its last success.
    pub fn retry_count(&self, key: &str) -> RetryCount {
        self.inner.retries.get(key).map(|retry| retry.count).unwrap_or(0)
    }
}

impl Service for WorkqueueSyncer {
    fn run(&self, stop: StopSignal) -> JoinHandle<()> {
        if !self.inner.state.start() {
            tracing::warn!(syncer = %self.inner.name, "Syncer already started; ignoring run");
            return service::finished();
        }

        let workers: Vec<_> = (0..self.inner.config.workers)
            .map(|id| tokio::spawn(Arc::clone(&self.inner).worker(id)))
            .collect();

        let (stop_tx, stop_rx) = watch::channel(false);
        let resync = match (self.inner.config.resync_period, &self.inner.key_source) {
            (Some(period), Some(source)) => Some(tokio::spawn(Arc::clone(&self.inner).resync(
                period,
                Arc::clone(source),
                stop_rx,
            ))),
            _ => None,
        };

        tracing::info!(
            syncer = %self.inner.name,
            workers = self.inner.config.workers,
            resync = resync.is_some(),
            "Syncer running"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            stop.await;
            tracing::info!(syncer = %inner.name, pending = inner.queue.len(), "Stopping syncer; draining queue");

            stop_tx.send_replace(true);
            if let Some(resync) = resync {
                if let Err(err) = resync.await {
                    tracing::error!(syncer = %inner.name, error = %err, "Resync task failed");
                }
            }

            let cancelled = inner.queue.shut_down();
            for worker in workers {
                if let Err(err) = worker.await {
                    tracing::error!(syncer = %inner.name, error = %err, "Worker task failed");
                }
            }
            for key in &cancelled {
                inner.abandon(key);
            }
            inner.triggers.clear();

            inner.state.stop();
            tracing::info!(syncer = %inner.name, "Syncer stopped");
        })
    }

    fn trigger(&self, arg: &str, auto: bool) -> bool {
        if self.inner.state.get() == SyncerState::Stopped {
            return false;
        }
        self.inner.enqueue(arg, TriggerKind::from_auto(auto))
    }

    fn get_records(&self) -> Vec<SyncInfo> {
        self.inner.ledger.snapshot()
    }

    fn state(&self) -> SyncerState {
        self.inner.state.get()
    }
}
