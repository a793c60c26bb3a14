//! # Syncer Core
//!
//! A small controller runtime: an indexed object cache plus a work-queue
//! driven reconciliation service.
//!
//! Changed objects are stored, their keys are enqueued, and a pool of workers
//! processes each key with at most one worker per key at a time. Failures are
//! retried with backoff up to a limit, and every attempt is recorded for
//! inspection.
//!
//! ## Design Principles
//!
//! - **In-process**: no network, no disk, no serialization format of record
//! - **Single-flight**: a key is never processed by two workers at once
//! - **Lossless**: updates arriving mid-processing are redelivered
//! - **Testable**: delays run on `tokio::time` and stamps on a [`Clock`]
//!
//! ## Core Concepts
//!
//! ### Indexed store
//!
//! [`IndexedStore`] keeps objects by key and maintains secondary indices
//! computed by [`IndexFunc`]s. [`ThreadSafeStore`] shares one across tasks.
//!
//! ### Work queue
//!
//! [`WorkQueue`] deduplicates pending keys, tracks keys in processing,
//! redelivers keys that changed while processing, and supports delayed adds.
//!
//! ### Syncers
//!
//! Both variants implement [`Service`]:
//! - [`WorkqueueSyncer`] - worker pool over a [`WorkQueue`] with retries and
//!   optional periodic resync
//! - [`OneWorkerSyncer`] - one background task, no queue, no retries
//!
//! ### Ledger
//!
//! Every attempt becomes a [`SyncInfo`] in a bounded [`SyncLedger`], readable
//! through [`Service::get_records`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::HashMap;
//! use syncer_core::{
//!     index_func, stop_channel, HandlerError, Indexers, Service, SyncerBuilder,
//!     SyncerConfig, ThreadSafeStore,
//! };
//!
//! #[derive(Clone)]
//! struct Site {
//!     tenant: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // 1. Register indexers before the first insert
//! let mut indexers: Indexers<Site> = HashMap::new();
//! indexers.insert("tenant".into(), index_func(|s: &Site| Ok(vec![s.tenant.clone()])));
//! let store = ThreadSafeStore::new(indexers);
//!
//! // 2. Build a syncer whose handler reads from the store
//! let reader = store.clone();
//! let syncer = SyncerBuilder::new("sites")
//!     .config(SyncerConfig::default().with_workers(2))
//!     .key_source(store.clone())
//!     .workqueue(move |key: String| {
//!         let reader = reader.clone();
//!         async move {
//!             let site = reader.get(&key).ok_or("site vanished")?;
//!             let peers = reader.by_index("tenant", &site.tenant)?;
//!             assert!(!peers.is_empty());
//!             Ok::<(), HandlerError>(())
//!         }
//!     })
//!     .unwrap();
//!
//! // 3. Run, feed changes, stop
//! let (stop, signal) = stop_channel();
//! let done = syncer.run(signal);
//!
//! store.add("a", Site { tenant: "t1".into() }).unwrap();
//! syncer.trigger("a", false);
//!
//! stop.stop();
//! done.await.unwrap();
//! assert_eq!(syncer.get_records().len(), 1);
//! # }
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod one_worker;
pub mod queue;
pub mod service;
pub mod shared_store;
pub mod store;
pub mod workqueue_syncer;

// Re-export main types at crate root
pub use backoff::{Backoff, ExponentialBackoff, FixedBackoff};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncerConfig};
pub use error::{Error, HandlerError};
pub use handler::Handler;
pub use ledger::{Outcome, SyncInfo, SyncLedger, TriggerKind};
pub use one_worker::OneWorkerSyncer;
pub use queue::WorkQueue;
pub use service::{
    stop_channel, KeySource, Service, StopHandle, StopSignal, SyncerBuilder, SyncerState,
};
pub use shared_store::ThreadSafeStore;
pub use store::{index_func, Index, IndexFunc, IndexedStore, Indexers};
pub use workqueue_syncer::WorkqueueSyncer;

/// Type aliases for clarity
pub type ObjectKey = String;
pub type IndexName = String;
pub type IndexedValue = String;
pub type RetryCount = u32;
