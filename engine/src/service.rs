//! The syncer service contract and its shared plumbing.

use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, SyncerConfig};
use crate::handler::Handler;
use crate::ledger::SyncInfo;
use crate::{HandlerError, ObjectKey, OneWorkerSyncer, WorkqueueSyncer};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Resolves when a running syncer should stop.
pub type StopSignal = BoxFuture<'static, ()>;

/// Lifecycle of a syncer. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncerState {
    Idle,
    Running,
    Stopped,
}

/// A reconciliation service.
pub trait Service: Send + Sync {
    /// Start the background workers and return immediately.
    ///
    /// Once `stop` resolves, no new work is accepted, in-flight and pending
    /// work drains, and the returned handle completes. A syncer runs once.
    fn run(&self, stop: StopSignal) -> JoinHandle<()>;

    /// Ask for `arg` to be synced. Returns false if the syncer is stopping
    /// or stopped.
    fn trigger(&self, arg: &str, auto: bool) -> bool;

    /// Copy of the recorded attempts, oldest first.
    fn get_records(&self) -> Vec<SyncInfo>;

    fn state(&self) -> SyncerState;
}

/// Lists every key a resync should enqueue.
pub trait KeySource: Send + Sync + 'static {
    fn keys(&self) -> Vec<ObjectKey>;
}

/// Fires the paired [`StopSignal`] when stopped or dropped.
#[derive(Debug)]
pub struct StopHandle {
    tx: oneshot::Sender<()>,
}

impl StopHandle {
    pub fn stop(self) {
        self.tx.send(()).ok();
    }
}

/// A stop handle and the signal it controls.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = oneshot::channel();
    let signal = async move {
        rx.await.ok();
    }
    .boxed();
    (StopHandle { tx }, signal)
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(IDLE))
    }

    pub(crate) fn get(&self) -> SyncerState {
        match self.0.load(Ordering::Acquire) {
            IDLE => SyncerState::Idle,
            RUNNING => SyncerState::Running,
            _ => SyncerState::Stopped,
        }
    }

    /// Move from idle to running. False if the syncer already ran.
    pub(crate) fn start(&self) -> bool {
        self.0
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn stop(&self) {
        self.0.store(STOPPED, Ordering::Release);
    }
}

/// Timing and result of one handler invocation.
pub(crate) struct Attempt {
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) duration: Duration,
    pub(crate) result: Result<(), HandlerError>,
}

/// Run the handler once. A panicking handler counts as a failed attempt so
/// the calling worker survives and still releases the key.
pub(crate) async fn attempt(handler: &dyn Handler, clock: &dyn Clock, key: &str) -> Attempt {
    let started_at = clock.now();
    let started = Instant::now();
    let result = match AssertUnwindSafe(handler.sync(key.to_string()))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            tracing::error!(key = %key, reason = %reason, "Handler panicked");
            Err(HandlerError::new(format!("handler panicked: {reason}")))
        }
    };
    Attempt {
        started_at,
        duration: started.elapsed(),
        result,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A handle that is already finished, for `run` calls on a used syncer.
pub(crate) fn finished() -> JoinHandle<()> {
    tokio::spawn(async {})
}

/// Assembles either syncer variant.
///
/// ```rust
/// use syncer_core::{SyncerBuilder, SyncerConfig, Service, HandlerError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let syncer = SyncerBuilder::new("demo")
///     .config(SyncerConfig::default().with_workers(2))
///     .workqueue(|key: String| async move {
///         println!("reconciling {key}");
///         Ok::<(), HandlerError>(())
///     })
///     .unwrap();
///
/// assert!(syncer.trigger("object-1", false));
/// # }
/// ```
pub struct SyncerBuilder {
    name: String,
    config: SyncerConfig,
    backoff: Option<Arc<dyn Backoff>>,
    clock: Arc<dyn Clock>,
    key_source: Option<Arc<dyn KeySource>>,
}

impl SyncerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: SyncerConfig::default(),
            backoff: None,
            clock: Arc::new(SystemClock),
            key_source: None,
        }
    }

    pub fn config(mut self, config: SyncerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the exponential policy derived from the config.
    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Keys to re-enqueue every `resync_period`.
    pub fn key_source(mut self, source: impl KeySource) -> Self {
        self.key_source = Some(Arc::new(source));
        self
    }

    /// Build a queue-backed syncer with `config.workers` workers.
    pub fn workqueue<H: Handler>(self, handler: H) -> Result<WorkqueueSyncer, ConfigError> {
        self.config.validate()?;
        if self.config.resync_period.is_some() && self.key_source.is_none() {
            tracing::warn!(syncer = %self.name, "Resync period set without a key source; resync disabled");
        }
        let backoff: Arc<dyn Backoff> = match self.backoff {
            Some(backoff) => backoff,
            None => Arc::new(self.config.backoff()),
        };
        Ok(WorkqueueSyncer::from_parts(
            self.name,
            self.config,
            Arc::new(handler),
            backoff,
            self.clock,
            self.key_source,
        ))
    }

    /// Build a single-worker syncer without queue, dedup or retries.
    pub fn one_worker<H: Handler>(self, handler: H) -> Result<OneWorkerSyncer, ConfigError> {
        self.config.validate()?;
        Ok(OneWorkerSyncer::from_parts(
            self.name,
            self.config.ledger_capacity,
            Arc::new(handler),
            self.clock,
        ))
    }
}
