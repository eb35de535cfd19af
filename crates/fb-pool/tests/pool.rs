//! Acquire, release and destroy behavior of a single pool.
//!
//! Runs against the in-memory client library from `fb-testing`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use fb_client::{Error, TargetDescriptor};
use fb_driver_pool::{Pool, PoolConfig, PoolError, PoolManager};
use fb_testing::{Event, FaultPoint, MockLibrary};
use parking_lot::Mutex;
use proptest::prelude::*;

fn pool_with(library: &MockLibrary, config: PoolConfig) -> Pool {
    let manager = PoolManager::new(Arc::new(library.clone()), config).unwrap();
    manager.pool(&TargetDescriptor::new("employee").with_host("fb"))
}

async fn wait_for_waiters(pool: &Pool, n: usize) {
    while pool.status().waiting < n {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Acquire and Release
// =============================================================================

#[tokio::test]
async fn test_released_connection_is_reused() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::default());

    let first = pool.get().await.unwrap();
    let id = first.id();
    first.release();

    let second = pool.get().await.unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(library.connects(), 1);

    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.idle, 0);
}

#[tokio::test]
async fn test_dropped_connection_returns_to_pool() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::default());

    let conn = pool.get().await.unwrap();
    drop(conn);

    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_opens_up_to_capacity() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(3));

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let c = pool.get().await.unwrap();

    assert_eq!(library.connects(), 3);
    assert!(pool.status().is_at_capacity());
    assert_ne!(a.id(), b.id());
    assert_ne!(b.id(), c.id());
}

#[tokio::test]
async fn test_connect_failure_surfaces_and_frees_slot() {
    let library = MockLibrary::new();
    library.fail_next(
        FaultPoint::Connect,
        Error::Connect {
            uri: "fb/3050:employee".into(),
            message: "connection refused".into(),
        },
    );
    let pool = pool_with(&library, PoolConfig::new().max_connections(1));

    let err = pool.get().await.unwrap_err();
    assert!(matches!(err, PoolError::Client(Error::Connect { .. })));
    assert_eq!(pool.status().total(), 0);

    // The slot is free again.
    assert!(pool.get().await.is_ok());
    assert_eq!(pool.metrics().checkouts_failed, 1);
}

// =============================================================================
// Waiters
// =============================================================================

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(1));
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = pool.get().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..3 {
        let task_pool = pool.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            let conn = task_pool.get().await.unwrap();
            order.lock().push(i);
            conn.release();
        }));
        wait_for_waiters(&pool, i + 1).await;
    }

    held.release();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*order.lock(), vec![0, 1, 2]);
    assert_eq!(library.connects(), 1);
}

#[tokio::test]
async fn test_failed_connect_passes_slot_to_oldest_waiter() {
    let library = MockLibrary::new();
    let gate = library.gate(FaultPoint::Connect);
    library.fail_next(
        FaultPoint::Connect,
        Error::Connect {
            uri: "fb/3050:employee".into(),
            message: "connection refused".into(),
        },
    );
    let pool = pool_with(
        &library,
        PoolConfig::new().max_connections(1).acquire_timeout(None),
    );
    let order = Arc::new(Mutex::new(Vec::new()));

    let serve = |name: &'static str| {
        let task_pool = pool.clone();
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            let conn = task_pool.get().await?;
            order.lock().push(name);
            conn.release();
            Ok::<_, PoolError>(())
        })
    };

    let opener = serve("X");
    gate.wait_blocked(1).await;
    let a = serve("A");
    wait_for_waiters(&pool, 1).await;
    let b = serve("B");
    wait_for_waiters(&pool, 2).await;

    // The failed connect frees the only slot while a newcomer shows up.
    gate.open_all();
    let c = serve("C");

    assert!(matches!(
        opener.await.unwrap(),
        Err(PoolError::Client(Error::Connect { .. }))
    ));
    for task in [a, b, c] {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    assert_eq!(library.connects(), 2);
    assert!(pool.status().total() <= 1);
}

#[tokio::test]
async fn test_release_hands_off_without_going_idle() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(1));

    let held = pool.get().await.unwrap();
    let id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.unwrap() })
    };
    wait_for_waiters(&pool, 1).await;

    held.release();
    assert_eq!(pool.status().idle, 0);
    assert_eq!(pool.status().in_use, 1);

    let conn = waiter.await.unwrap();
    assert_eq!(conn.id(), id);
}

#[tokio::test]
async fn test_cancelled_waiter_leaves_queue() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(1));

    let held = pool.get().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await })
    };
    wait_for_waiters(&pool, 1).await;

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert_eq!(pool.status().waiting, 0);

    held.release();
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out() {
    let library = MockLibrary::new();
    let pool = pool_with(
        &library,
        PoolConfig::new()
            .max_connections(1)
            .acquire_timeout(Some(Duration::from_secs(5))),
    );

    let held = pool.get().await.unwrap();
    let err = pool.get().await.unwrap_err();

    match err {
        PoolError::AcquireTimeout { waited, target } => {
            assert!(waited >= Duration::from_secs(5));
            assert_eq!(target, pool.key().to_string());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pool.status().waiting, 0);
    assert_eq!(pool.metrics().acquire_timeouts, 1);

    held.release();
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_deadline_waits_for_release() {
    let library = MockLibrary::new();
    let pool = pool_with(
        &library,
        PoolConfig::new().max_connections(1).acquire_timeout(None),
    );

    let held = pool.get().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await })
    };
    wait_for_waiters(&pool, 1).await;

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(pool.status().waiting, 1);

    held.release();
    assert!(waiter.await.unwrap().is_ok());
}

// =============================================================================
// Destroy
// =============================================================================

#[tokio::test]
async fn test_destroyed_entry_is_never_reused() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(1));

    let conn = pool.get().await.unwrap();
    let id = conn.id();
    conn.destroy().await;

    assert!(!pool.entry_ids().contains(&id));
    assert_eq!(pool.status().total(), 0);
    assert!(library.open_connections().is_empty());
    assert!(library.live_clients().is_empty());

    let next = pool.get().await.unwrap();
    assert_ne!(next.id(), id);
    assert_eq!(library.connects(), 2);
}

#[tokio::test]
async fn test_destroy_swallows_teardown_failures() {
    let library = MockLibrary::new();
    library.fail_next(FaultPoint::Disconnect, Error::ConnectionLost("socket closed".into()));
    library.fail_next(FaultPoint::Dispose, Error::ConnectionLost("already gone".into()));
    let pool = pool_with(&library, PoolConfig::default());

    let conn = pool.get().await.unwrap();
    conn.destroy().await;

    assert_eq!(pool.status().total(), 0);
    assert_eq!(library.count(|e| matches!(e, Event::Disconnect { .. })), 1);
    assert_eq!(library.count(|e| matches!(e, Event::Dispose { .. })), 1);
}

#[tokio::test]
async fn test_destroy_opens_replacement_for_waiter() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(1));

    let held = pool.get().await.unwrap();
    let old_id = held.id();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.unwrap() })
    };
    wait_for_waiters(&pool, 1).await;

    held.destroy().await;

    let conn = waiter.await.unwrap();
    assert_ne!(conn.id(), old_id);
    assert_eq!(library.connects(), 2);
    assert_eq!(pool.metrics().replacements_opened, 1);
}

#[tokio::test]
async fn test_failed_replacement_passes_slot_to_waiter() {
    let library = MockLibrary::new();
    let pool = pool_with(
        &library,
        PoolConfig::new().max_connections(1).acquire_timeout(None),
    );

    let held = pool.get().await.unwrap();
    let old_id = held.id();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.unwrap() })
    };
    wait_for_waiters(&pool, 1).await;

    library.fail_next(
        FaultPoint::Connect,
        Error::Connect {
            uri: "fb/3050:employee".into(),
            message: "server shutting down".into(),
        },
    );
    held.destroy().await;

    // The queued caller now owns the freed slot and opens under it.
    assert_eq!(pool.status().waiting, 0);
    assert_eq!(pool.metrics().replacements_failed, 1);

    let conn = waiter.await.unwrap();
    assert_ne!(conn.id(), old_id);
    assert_eq!(library.connects(), 3);
    assert_eq!(pool.status().total(), 1);
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_fails_queued_waiters() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(1));

    let held = pool.get().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await })
    };
    wait_for_waiters(&pool, 1).await;

    pool.close().await;
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
    assert_eq!(pool.status().waiting, 0);

    // The busy connection is closed once it comes back.
    held.release();
    while !library.open_connections().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(pool.status().total(), 0);
}

#[tokio::test]
async fn test_close_closes_idle_connections() {
    let library = MockLibrary::new();
    let pool = pool_with(&library, PoolConfig::new().max_connections(2));

    let idle = pool.get().await.unwrap();
    let held = pool.get().await.unwrap();
    idle.release();
    assert_eq!(pool.status().idle, 1);

    pool.close().await;
    assert!(pool.is_closed());
    assert_eq!(pool.status().idle, 0);
    assert_eq!(library.open_connections().len(), 1);

    held.release();
    while !library.open_connections().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(pool.status().total(), 0);
    assert!(library.live_clients().is_empty());
}

// =============================================================================
// Capacity (property)
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_capacity_is_never_exceeded(max in 1usize..5, callers in 1usize..16) {
        tokio_test::block_on(async move {
            let library = MockLibrary::new();
            let gate = library.gate(FaultPoint::Execute);
            let pool = pool_with(&library, PoolConfig::new().max_connections(max).acquire_timeout(None));

            let tasks: Vec<_> = (0..callers)
                .map(|_| {
                    let pool = pool.clone();
                    tokio::spawn(async move {
                        pool.execute_query("SELECT 1 AS x FROM RDB$DATABASE", &[]).await
                    })
                })
                .collect();

            let running = max.min(callers);
            gate.wait_blocked(running).await;
            wait_for_waiters(&pool, callers - running).await;
            assert_eq!(library.open_connections().len(), running);
            assert_eq!(pool.status().total(), running);

            gate.open_all();
            for task in tasks {
                assert!(task.await.unwrap().is_ok());
            }
            assert_eq!(library.connects(), running);
            assert!(pool.status().total() <= max);
        });
    }
}
