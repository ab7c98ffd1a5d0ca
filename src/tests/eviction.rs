//! Eviction sweep: ordering, index consistency, cap semantics.

use super::*;

#[tokio::test]
async fn expired_entries_are_evicted_in_ttl_order() {
    let storage = fast_storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    for i in 1..=5u64 {
        let key = format!("hash-{i}");
        tx.set_range_in_hash(&key, vec![("f".to_string(), "v".to_string())]);
        tx.expire_hash(&key, Duration::from_millis(80 * i));
    }
    tx.commit().await.unwrap();

    tokio::time::sleep(Duration::from_millis(270)).await;

    assert!(conn.hash_fields("hash-1").await.unwrap().is_none());
    assert!(conn.hash_fields("hash-2").await.unwrap().is_none());
    assert!(conn.hash_fields("hash-3").await.unwrap().is_none());
    assert!(conn.hash_fields("hash-4").await.unwrap().is_some());
    assert!(conn.hash_fields("hash-5").await.unwrap().is_some());

    // Index size tracks the primary collection: every surviving hash
    // still has a TTL.
    let stats = storage.monitoring().memory_stats().await.unwrap();
    assert_eq!(stats.hashes, 2);
    assert_eq!(stats.expiring_hashes, 2);
}

#[tokio::test]
async fn expired_job_leaves_every_index() {
    let storage = fast_storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    let id = tx.create_job(json!({}), Vec::new(), None).to_string();
    tx.set_job_state(&id, states::SUCCEEDED, None, Vec::new());
    tx.expire_job(&id, Duration::from_millis(30));
    tx.commit().await.unwrap();

    assert_eq!(storage.monitoring().succeeded_list_count().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(conn.job_data(&id).await.unwrap().is_none());
    assert_eq!(storage.monitoring().succeeded_list_count().await.unwrap(), 0);
    let stats = storage.monitoring().memory_stats().await.unwrap();
    assert_eq!(stats.jobs, 0);
    assert_eq!(stats.expiring_jobs, 0);
    assert_eq!(stats.state_buckets, 0);
}

#[tokio::test]
async fn eviction_covers_every_expirable_kind() {
    let storage = fast_storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.set_range_in_hash("h", vec![("f".to_string(), "v".to_string())]);
    tx.expire_hash("h", Duration::from_millis(30));
    tx.insert_to_list("l", "v");
    tx.expire_list("l", Duration::from_millis(30));
    tx.add_to_set("s", "v");
    tx.expire_set("s", Duration::from_millis(30));
    tx.increment_counter_with_expiry("c", Duration::from_millis(30));
    tx.commit().await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    let stats = storage.monitoring().memory_stats().await.unwrap();
    assert_eq!(stats.hashes, 0);
    assert_eq!(stats.lists, 0);
    assert_eq!(stats.sets, 0);
    assert_eq!(stats.counters, 0);
    assert_eq!(
        stats.expiring_hashes + stats.expiring_lists + stats.expiring_sets + stats.expiring_counters,
        0
    );
}

#[tokio::test]
async fn capped_hash_expires_while_counter_retains_long_ttl() {
    let storage = JobStorage::new(EngineOptions {
        max_expiration_time: Some(Duration::from_millis(40)),
        eviction_interval: Duration::from_millis(10),
        ..EngineOptions::default()
    });
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.set_range_in_hash("h", vec![("f".to_string(), "v".to_string())]);
    tx.expire_hash("h", Duration::from_secs(3600));
    tx.increment_counter_with_expiry("stats:succeeded", Duration::from_secs(3600));
    tx.commit().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    // The hash TTL was capped to 40ms and evicted; the counter is
    // exempt from the cap.
    assert!(conn.hash_fields("h").await.unwrap().is_none());
    assert_eq!(conn.counter("stats:succeeded").await.unwrap(), 1);
}

#[tokio::test]
async fn zero_cap_forces_immediate_deletion() {
    let storage = JobStorage::new(EngineOptions {
        max_expiration_time: Some(Duration::ZERO),
        ..EngineOptions::default()
    });
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.set_range_in_hash("h", vec![("f".to_string(), "v".to_string())]);
    tx.expire_hash("h", Duration::from_secs(3600));
    tx.commit().await.unwrap();

    // No eviction tick needed: the capped TTL is zero, so the expire
    // command deleted the entry on the spot.
    assert!(conn.hash_fields("h").await.unwrap().is_none());
}

#[tokio::test]
async fn persisted_entries_survive_eviction() {
    let storage = fast_storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.add_to_set("s", "v");
    tx.expire_set("s", Duration::from_millis(30));
    tx.persist_set("s");
    tx.commit().await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(conn.set_count("s").await.unwrap(), 1);
    assert!(conn.set_ttl("s").await.unwrap().is_none());
}
