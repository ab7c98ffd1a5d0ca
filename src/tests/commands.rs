//! Read/write command tests: jobs, counters, sets, lists, hashes,
//! servers.

use super::*;

use crate::config::StringComparer;

#[tokio::test]
async fn create_job_then_read_back() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    let id = tx
        .create_job(
            json!({"method": "SendEmail"}),
            vec![("CurrentCulture".to_string(), "en-US".to_string())],
            Some(Duration::from_secs(3600)),
        )
        .to_string();
    tx.commit().await.unwrap();

    let data = conn.job_data(&id).await.unwrap().unwrap();
    assert_eq!(*data.payload, json!({"method": "SendEmail"}));
    assert_eq!(data.state_name, None);
    assert_eq!(data.parameters.get("CurrentCulture").unwrap(), "en-US");
}

#[tokio::test]
async fn set_state_then_state_data_returns_it() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    let id = tx.create_job(json!({}), Vec::new(), None).to_string();
    tx.set_job_state(
        &id,
        states::SCHEDULED,
        Some("triggered by cron"),
        vec![("EnqueueAt".to_string(), "12345".to_string())],
    );
    tx.commit().await.unwrap();

    let state = conn.state_data(&id).await.unwrap().unwrap();
    assert_eq!(state.name, states::SCHEDULED);
    assert_eq!(state.reason.as_deref(), Some("triggered by cron"));
    assert_eq!(state.data.get("EnqueueAt").unwrap(), "12345");
}

#[tokio::test]
async fn unknown_and_unparseable_ids_read_as_none() {
    let storage = storage();
    let conn = storage.connection();

    assert!(conn.job_data("999999999").await.unwrap().is_none());
    assert!(conn.job_data("not-a-job-id").await.unwrap().is_none());
    assert!(conn.state_data("").await.unwrap().is_none());
    assert!(conn.job_parameter("abc", "x").await.unwrap().is_none());
}

#[tokio::test]
async fn mutations_on_unknown_jobs_are_no_ops() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.set_job_state("424242", states::ENQUEUED, None, Vec::new());
    tx.expire_job("424242", Duration::from_secs(10));
    tx.set_job_parameter("424242", "k", "v");
    tx.commit().await.unwrap();

    let stats = storage.monitoring().statistics().await.unwrap();
    assert_eq!(stats.enqueued, 0);
}

#[tokio::test]
async fn job_parameter_set_and_get() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    let id = tx.create_job(json!({}), Vec::new(), None).to_string();
    tx.set_job_parameter(&id, "RetryCount", "3");
    tx.commit().await.unwrap();

    assert_eq!(
        conn.job_parameter(&id, "RetryCount").await.unwrap().as_deref(),
        Some("3")
    );
    assert!(conn.job_parameter(&id, "Missing").await.unwrap().is_none());
}

#[tokio::test]
async fn counter_increment_then_decrement_leaves_nothing() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.increment_counter("stats:test");
    tx.commit().await.unwrap();
    assert_eq!(conn.counter("stats:test").await.unwrap(), 1);

    let mut tx = conn.begin_transaction();
    tx.decrement_counter("stats:test");
    tx.commit().await.unwrap();
    assert_eq!(conn.counter("stats:test").await.unwrap(), 0);

    // The zeroed counter vanished entirely, index included.
    let stats = storage.monitoring().memory_stats().await.unwrap();
    assert_eq!(stats.counters, 0);
    assert_eq!(stats.expiring_counters, 0);
}

#[tokio::test]
async fn add_to_set_twice_keeps_last_score() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.add_to_set_with_score("recurring-jobs", "job-1", 1.0);
    tx.add_to_set_with_score("recurring-jobs", "job-1", 42.0);
    tx.commit().await.unwrap();

    assert_eq!(conn.set_count("recurring-jobs").await.unwrap(), 1);
    assert!(conn.set_contains("recurring-jobs", "job-1").await.unwrap());
    assert_eq!(
        conn.first_set_value_by_score("recurring-jobs", 42.0, 42.0)
            .await
            .unwrap()
            .as_deref(),
        Some("job-1")
    );
    assert!(conn
        .first_set_value_by_score("recurring-jobs", 0.0, 2.0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn set_range_and_all_items_are_score_ordered() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.add_to_set_with_score("schedule", "c", 3.0);
    tx.add_to_set_with_score("schedule", "a", 1.0);
    tx.add_to_set_with_score("schedule", "b", 2.0);
    tx.commit().await.unwrap();

    assert_eq!(
        conn.all_set_items("schedule").await.unwrap(),
        vec!["a", "b", "c"]
    );
    assert_eq!(conn.set_range("schedule", 1, 2).await.unwrap(), vec!["b", "c"]);
}

#[tokio::test]
async fn removing_last_set_member_drops_the_entry() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.add_to_set("retries", "job-9");
    tx.commit().await.unwrap();

    let mut tx = conn.begin_transaction();
    tx.remove_from_set("retries", "job-9");
    tx.commit().await.unwrap();

    assert_eq!(conn.set_count("retries").await.unwrap(), 0);
    let stats = storage.monitoring().memory_stats().await.unwrap();
    assert_eq!(stats.sets, 0);
}

#[tokio::test]
async fn list_inserts_are_head_first() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.insert_to_list("log", "first");
    tx.insert_to_list("log", "second");
    tx.insert_to_list("log", "third");
    tx.commit().await.unwrap();

    assert_eq!(
        conn.list_items("log").await.unwrap(),
        vec!["third", "second", "first"]
    );
    assert_eq!(conn.list_range("log", 0, 1).await.unwrap(), vec!["third", "second"]);
    assert_eq!(conn.list_count("log").await.unwrap(), 3);
}

#[tokio::test]
async fn trim_list_keeps_inclusive_range() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    for i in 0..5 {
        tx.insert_to_list("log", &format!("v{i}"));
    }
    tx.trim_list("log", 0, 2);
    tx.commit().await.unwrap();

    assert_eq!(
        conn.list_items("log").await.unwrap(),
        vec!["v4", "v3", "v2"]
    );
}

#[tokio::test]
async fn remove_from_list_drops_all_matches_and_empty_entry() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.insert_to_list("log", "x");
    tx.insert_to_list("log", "x");
    tx.remove_from_list("log", "x");
    tx.commit().await.unwrap();

    assert_eq!(conn.list_count("log").await.unwrap(), 0);
    let stats = storage.monitoring().memory_stats().await.unwrap();
    assert_eq!(stats.lists, 0);
}

#[tokio::test]
async fn hash_fields_merge_and_read_back() {
    let storage = storage();
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.set_range_in_hash(
        "recurring-job:1",
        vec![
            ("Cron".to_string(), "* * * * *".to_string()),
            ("Queue".to_string(), "default".to_string()),
        ],
    );
    tx.commit().await.unwrap();

    let mut tx = conn.begin_transaction();
    tx.set_range_in_hash(
        "recurring-job:1",
        vec![("Queue".to_string(), "critical".to_string())],
    );
    tx.commit().await.unwrap();

    assert_eq!(conn.hash_count("recurring-job:1").await.unwrap(), 2);
    assert_eq!(
        conn.hash_field("recurring-job:1", "Queue").await.unwrap().as_deref(),
        Some("critical")
    );
    let fields = conn.hash_fields("recurring-job:1").await.unwrap().unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields["Cron"], "* * * * *");

    assert!(conn.hash_fields("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn ignore_case_comparer_applies_to_user_keys() {
    let storage = JobStorage::new(EngineOptions {
        string_comparer: StringComparer::OrdinalIgnoreCase,
        ..EngineOptions::default()
    });
    let conn = storage.connection();

    let mut tx = conn.begin_transaction();
    tx.set_range_in_hash("Config", vec![("Field".to_string(), "1".to_string())]);
    tx.add_to_set("Tags", "Alpha");
    tx.commit().await.unwrap();

    assert_eq!(
        conn.hash_field("CONFIG", "field").await.unwrap().as_deref(),
        Some("1")
    );
    assert!(conn.set_contains("tags", "ALPHA").await.unwrap());
}

#[tokio::test]
async fn servers_announce_heartbeat_remove() {
    let storage = storage();
    let conn = storage.connection();

    conn.announce_server("server-a", 20, &["default", "critical"])
        .await
        .unwrap();
    conn.server_heartbeat("server-a").await.unwrap();

    let servers = storage.monitoring().servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, "server-a");
    assert_eq!(servers[0].worker_count, 20);
    assert_eq!(servers[0].queues, vec!["default", "critical"]);
    assert!(servers[0].heartbeat_at >= servers[0].started_at);

    conn.remove_server("server-a").await.unwrap();
    assert!(storage.monitoring().servers().await.unwrap().is_empty());
}

#[tokio::test]
async fn timed_out_servers_are_purged() {
    let storage = storage();
    let conn = storage.connection();

    conn.announce_server("stale", 1, &["default"]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    conn.announce_server("fresh", 1, &["default"]).await.unwrap();

    conn.remove_timed_out_servers(Duration::from_millis(50))
        .await
        .unwrap();

    let servers = storage.monitoring().servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, "fresh");
}

#[tokio::test]
async fn empty_arguments_are_rejected_at_the_facade() {
    let storage = storage();
    let conn = storage.connection();

    assert!(matches!(
        conn.announce_server("", 1, &[]).await,
        Err(crate::EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        conn.fetch_next_job(&[], Duration::from_millis(10)).await,
        Err(crate::EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        conn.acquire_lock("", Duration::from_millis(10)).await,
        Err(crate::EngineError::InvalidArgument(_))
    ));
}
