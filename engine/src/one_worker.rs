//! Single-worker syncer without a queue.
//!
//! Triggers are handed to one background task over a channel and processed
//! strictly in order. There is no deduplication and no retry; a failed
//! attempt is recorded as final. Suited to low-volume, single-key workloads.

use crate::clock::Clock;
use crate::handler::Handler;
use crate::ledger::{Outcome, SyncInfo, SyncLedger, TriggerKind};
use crate::service::{self, Service, StateCell, StopSignal, SyncerState};
use crate::ObjectKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

type Request = (ObjectKey, TriggerKind);

struct Inner {
    name: String,
    handler: Arc<dyn Handler>,
    clock: Arc<dyn Clock>,
    ledger: SyncLedger,
    state: StateCell,
    /// Set once the stop signal fired
    stopping: AtomicBool,
    tx: mpsc::UnboundedSender<Request>,
    /// Taken by the first `run`
    rx: Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
}

impl Inner {
    async fn process(&self, key: ObjectKey, trigger: TriggerKind) {
        let attempt = service::attempt(self.handler.as_ref(), self.clock.as_ref(), &key).await;

        let outcome = match attempt.result {
            Ok(()) => {
                tracing::debug!(syncer = %self.name, key = %key, "Synced key");
                Outcome::Success
            }
            Err(err) => {
                tracing::warn!(syncer = %self.name, key = %key, error = %err, "Sync failed");
                Outcome::FailureFinal {
                    error: err.to_string(),
                }
            }
        };

        self.ledger.record(SyncInfo {
            attempt_id: Uuid::new_v4(),
            key,
            trigger,
            started_at: attempt.started_at,
            duration: attempt.duration,
            outcome,
            retry_count: 0,
        });
    }
}

/// A syncer that runs every trigger on one background task.
#[derive(Clone)]
pub struct OneWorkerSyncer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OneWorkerSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneWorkerSyncer")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl OneWorkerSyncer {
    pub(crate) fn from_parts(
        name: String,
        ledger_capacity: usize,
        handler: Arc<dyn Handler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                name,
                handler,
                clock,
                ledger: SyncLedger::new(ledger_capacity),
                state: StateCell::new(),
                stopping: AtomicBool::new(false),
                tx,
                rx: Mutex::new(Some(rx)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl Service for OneWorkerSyncer {
    fn run(&self, stop: StopSignal) -> JoinHandle<()> {
        let rx = self
            .inner
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut rx) = rx.filter(|_| self.inner.state.start()) else {
            tracing::warn!(syncer = %self.inner.name, "Syncer already started; ignoring run");
            return service::finished();
        };

        tracing::info!(syncer = %self.inner.name, "Syncer running");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut stop = stop;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop => break,
                    request = rx.recv() => match request {
                        Some((key, trigger)) => inner.process(key, trigger).await,
                        None => break,
                    },
                }
            }

            inner.stopping.store(true, Ordering::Release);
            rx.close();
            tracing::info!(syncer = %inner.name, "Stopping syncer; draining triggers");
            while let Some((key, trigger)) = rx.recv().await {
                inner.process(key, trigger).await;
            }

            inner.state.stop();
            tracing::info!(syncer = %inner.name, "Syncer stopped");
        })
    }

    fn trigger(&self, arg: &str, auto: bool) -> bool {
        if self.inner.stopping.load(Ordering::Acquire)
            || self.inner.state.get() == SyncerState::Stopped
        {
            return false;
        }
        self.inner
            .tx
            .send((arg.to_string(), TriggerKind::from_auto(auto)))
            .is_ok()
    }

    fn get_records(&self) -> Vec<SyncInfo> {
        self.inner.ledger.snapshot()
    }

    fn state(&self) -> SyncerState {
        self.inner.state.get()
    }
}
