//! End-to-end scenarios for the syncers.
//!
//! All tests run on paused tokio time so backoff and resync intervals are
//! deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use syncer_core::{
    index_func, stop_channel, FixedBackoff, HandlerError, Indexers, ManualClock, Outcome,
    Service, SyncerBuilder, SyncerConfig, SyncerState, ThreadSafeStore, TriggerKind,
};

const RETRY_LIMIT: u32 = 3;

fn config() -> SyncerConfig {
    SyncerConfig::default()
        .with_workers(4)
        .with_retry_limit(RETRY_LIMIT)
        .with_backoff(Duration::from_millis(2), Duration::from_millis(50))
}

#[derive(Debug, Clone, PartialEq)]
struct Object {
    id: String,
    tenant: String,
}

fn object(id: &str, tenant: &str) -> Object {
    Object {
        id: id.to_string(),
        tenant: tenant.to_string(),
    }
}

fn tenant_store() -> ThreadSafeStore<Object> {
    let mut indexers: Indexers<Object> = HashMap::new();
    indexers.insert(
        "tenant".into(),
        index_func(|o: &Object| Ok(vec![o.tenant.clone()])),
    );
    ThreadSafeStore::new(indexers)
}

// ============================================================================
// Retry policy
// ============================================================================

#[tokio::test(start_paused = true)]
async fn fails_retry_limit_times_then_succeeds() {
    let calls = Arc::new(AtomicUsize::new(0));
    let syncer = {
        let calls = Arc::clone(&calls);
        SyncerBuilder::new("eventually")
            .config(config())
            .workqueue(move |_key: String| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < RETRY_LIMIT as usize {
                        Err(HandlerError::new("not yet"))
                    } else {
                        Ok(())
                    }
                }
            })
            .unwrap()
    };

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);
    assert!(syncer.trigger("a", false));

    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.stop();
    done.await.unwrap();

    let records = syncer.get_records();
    assert_eq!(records.len(), RETRY_LIMIT as usize + 1);
    assert!(records.last().unwrap().outcome.is_success());
    assert!(records[..RETRY_LIMIT as usize]
        .iter()
        .all(|r| matches!(r.outcome, Outcome::Failure { .. })));
}

#[tokio::test(start_paused = true)]
async fn always_failing_key_is_dropped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let syncer = {
        let calls = Arc::clone(&calls);
        SyncerBuilder::new("doomed")
            .config(config())
            .workqueue(move |_key: String| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(HandlerError::new("always broken")) }
            })
            .unwrap()
    };

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);
    syncer.trigger("a", false);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), RETRY_LIMIT as usize + 1);

    // Nothing else happens without a new trigger.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), RETRY_LIMIT as usize + 1);

    let records = syncer.get_records();
    assert_eq!(records.len(), RETRY_LIMIT as usize + 1);
    assert!(records.last().unwrap().outcome.is_final_failure());
    assert_eq!(records.last().unwrap().retry_count, RETRY_LIMIT);
    assert_eq!(syncer.retry_count("a"), 0);

    // A fresh trigger starts over with a reset counter.
    syncer.trigger("a", false);
    tokio::time::sleep(Duration::from_millis(1)).await;
    let records = syncer.get_records();
    assert_eq!(records.last().unwrap().retry_count, 0);

    stop.stop();
    done.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_follow_policy() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let syncer = {
        let started = Arc::clone(&started);
        SyncerBuilder::new("timed")
            .config(config())
            .backoff(FixedBackoff(Duration::from_millis(30)))
            .workqueue(move |_key: String| {
                started.lock().unwrap().push(tokio::time::Instant::now());
                async { Err::<(), _>(HandlerError::new("nope")) }
            })
            .unwrap()
    };

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);
    syncer.trigger("a", false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.stop();
    done.await.unwrap();

    let started = started.lock().unwrap();
    assert_eq!(started.len(), RETRY_LIMIT as usize + 1);
    for pair in started.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(30));
    }
}

// ============================================================================
// Single flight and redelivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn key_is_never_processed_concurrently() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let syncer = {
        let in_flight = Arc::clone(&in_flight);
        let max_seen = Arc::clone(&max_seen);
        let calls = Arc::clone(&calls);
        SyncerBuilder::new("exclusive")
            .config(config())
            .workqueue(move |_key: String| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
    };

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);

    syncer.trigger("same", false);
    tokio::time::sleep(Duration::from_millis(5)).await;
    // Arrives while "same" is processing: must be redelivered exactly once.
    for _ in 0..10 {
        syncer.trigger("same", false);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.stop();
    done.await.unwrap();

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_pending_triggers_collapse() {
    let calls = Arc::new(AtomicUsize::new(0));
    let syncer = {
        let calls = Arc::clone(&calls);
        SyncerBuilder::new("dedup")
            .config(config())
            .workqueue(move |_key: String| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), HandlerError>(()) }
            })
            .unwrap()
    };

    // Not running yet, so every trigger lands in pending.
    for _ in 0..5 {
        assert!(syncer.trigger("a", true));
    }
    syncer.trigger("a", false);
    assert_eq!(syncer.queue().len(), 1);

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);
    tokio::time::sleep(Duration::from_millis(10)).await;
    stop.stop();
    done.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let records = syncer.get_records();
    assert_eq!(records[0].trigger, TriggerKind::Manual);
}

// ============================================================================
// Resync and shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn resync_reenqueues_stored_keys() {
    let store = tenant_store();
    store.add("a", object("a", "t1")).unwrap();
    store.add("b", object("b", "t2")).unwrap();

    let syncer = SyncerBuilder::new("resync")
        .config(config().with_resync_period(Duration::from_secs(10)))
        .key_source(store.clone())
        .workqueue(|_key: String| async { Ok::<(), HandlerError>(()) })
        .unwrap();

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);

    tokio::time::sleep(Duration::from_secs(25)).await;
    stop.stop();
    done.await.unwrap();

    let records = syncer.get_records();
    assert_eq!(records.len(), 4, "two ticks over two keys");
    assert!(records.iter().all(|r| r.trigger == TriggerKind::Auto));
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_handler() {
    let finished = Arc::new(AtomicUsize::new(0));
    let syncer = {
        let finished = Arc::clone(&finished);
        SyncerBuilder::new("graceful")
            .config(config())
            .workqueue(move |_key: String| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
    };

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);
    for key in ["a", "b", "c", "d", "e", "f"] {
        syncer.trigger(key, false);
    }
    tokio::time::sleep(Duration::from_millis(1)).await;

    stop.stop();
    done.await.unwrap();

    assert_eq!(finished.load(Ordering::SeqCst), 6);
    assert_eq!(syncer.state(), SyncerState::Stopped);
    assert!(!syncer.trigger("g", false));
}

#[tokio::test(start_paused = true)]
async fn records_use_injected_clock() {
    let clock = ManualClock::from_millis(1_706_745_600_000);
    let syncer = SyncerBuilder::new("clocked")
        .clock(clock.clone())
        .one_worker(|_key: String| async { Ok::<(), HandlerError>(()) })
        .unwrap();

    syncer.trigger("a", false);
    let (stop, signal) = stop_channel();
    stop.stop();
    syncer.run(signal).await.unwrap();

    let records = syncer.get_records();
    assert_eq!(records[0].started_at.timestamp_millis(), 1_706_745_600_000);
}

// ============================================================================
// Store + syncer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn handler_resolves_objects_through_index() {
    let store = tenant_store();
    store.add("a", object("a", "t1")).unwrap();
    store.add("b", object("b", "t1")).unwrap();
    store.add("c", object("c", "t2")).unwrap();

    let peers = Arc::new(Mutex::new(HashMap::new()));
    let syncer = {
        let store = store.clone();
        let peers = Arc::clone(&peers);
        SyncerBuilder::new("tenants")
            .config(config())
            .workqueue(move |key: String| {
                let store = store.clone();
                let peers = Arc::clone(&peers);
                async move {
                    let obj = store.get(&key).ok_or("missing object")?;
                    let mut ids: Vec<_> = store
                        .by_index("tenant", &obj.tenant)?
                        .into_iter()
                        .map(|o| o.id)
                        .collect();
                    ids.sort();
                    peers.lock().unwrap().insert(key, ids);
                    Ok::<(), HandlerError>(())
                }
            })
            .unwrap()
    };

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);
    for key in ["a", "b", "c", "ghost"] {
        syncer.trigger(key, false);
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.stop();
    done.await.unwrap();

    let peers = peers.lock().unwrap();
    assert_eq!(peers["a"], vec!["a", "b"]);
    assert_eq!(peers["c"], vec!["c"]);
    assert!(!peers.contains_key("ghost"));

    let ghost: Vec<_> = syncer
        .get_records()
        .into_iter()
        .filter(|r| r.key == "ghost")
        .collect();
    assert_eq!(ghost.len(), RETRY_LIMIT as usize + 1);
    assert_eq!(
        ghost.last().unwrap().outcome,
        Outcome::FailureFinal {
            error: "missing object".into()
        }
    );
}
