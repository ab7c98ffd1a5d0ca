//! Named lock tests: reentrance, timeout, idempotent release, cleanup.

use super::*;

use std::time::Instant;

#[tokio::test]
async fn lock_is_reentrant_per_owner_and_excludes_others() {
    let storage = storage();
    let owner = storage.connection();
    let other = storage.connection();

    let first = owner
        .acquire_lock("recurring-jobs:lock", Duration::from_secs(1))
        .await
        .unwrap();
    let second = owner
        .acquire_lock("recurring-jobs:lock", Duration::from_secs(1))
        .await
        .unwrap();

    let started = Instant::now();
    let err = other
        .acquire_lock("recurring-jobs:lock", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, crate::EngineError::LockTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(100));

    first.release();
    // Still held: depth is one, not zero.
    assert!(other
        .acquire_lock("recurring-jobs:lock", Duration::from_millis(50))
        .await
        .is_err());

    second.release();
    let started = Instant::now();
    other
        .acquire_lock("recurring-jobs:lock", Duration::from_millis(100))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn releasing_a_handle_twice_is_a_no_op() {
    let storage = storage();
    let owner = storage.connection();
    let other = storage.connection();

    let first = owner
        .acquire_lock("resource", Duration::from_secs(1))
        .await
        .unwrap();
    let _second = owner
        .acquire_lock("resource", Duration::from_secs(1))
        .await
        .unwrap();

    first.release();
    first.release();

    // Depth must still be one: the double release did not leak a
    // decrement.
    assert!(other
        .acquire_lock("resource", Duration::from_millis(50))
        .await
        .is_err());
}

#[tokio::test]
async fn dropping_a_handle_releases_the_lock() {
    let storage = storage();
    let owner = storage.connection();
    let other = storage.connection();

    {
        let _handle = owner
            .acquire_lock("resource", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(other
            .acquire_lock("resource", Duration::from_millis(50))
            .await
            .is_err());
    }

    other
        .acquire_lock("resource", Duration::from_millis(100))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiter_acquires_after_release() {
    let storage = storage();
    let owner = storage.connection();

    let handle = owner
        .acquire_lock("resource", Duration::from_secs(1))
        .await
        .unwrap();

    let waiter = tokio::spawn({
        let conn = storage.connection();
        async move { conn.acquire_lock("resource", Duration::from_secs(2)).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.release();

    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn released_locks_leave_no_table_entries() {
    let storage = storage();
    let conn = storage.connection();

    let a = conn.acquire_lock("a", Duration::from_secs(1)).await.unwrap();
    let b = conn.acquire_lock("b", Duration::from_secs(1)).await.unwrap();
    assert_eq!(storage.inner.locks.len(), 2);

    a.release();
    b.release();
    assert_eq!(storage.inner.locks.len(), 0);
}

#[tokio::test]
async fn different_connections_are_different_owners() {
    let storage = storage();
    let first = storage.connection();
    let second = storage.connection();

    let _held = first
        .acquire_lock("resource", Duration::from_secs(1))
        .await
        .unwrap();
    let err = second
        .acquire_lock("resource", Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, crate::EngineError::LockTimeout { .. }));
}
