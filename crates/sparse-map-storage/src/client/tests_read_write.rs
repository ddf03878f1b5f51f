//! Read, insert and remove tests.
//!
//! All tests run against a real SQLite database file.

use std::sync::Arc;

use sparse_map_core::{
    CacheHolder, DirectCacheAccess, MemoryCache, StatementSequence, StorageConfig, Value,
    DELETED_FIELD, DELETED_MARKER,
};
use tempfile::TempDir;

use super::core::StorageClient;
use super::test_support::{client, client_with, map, narrow_statements, provider, RecordingListener};
use crate::diagnostics::counter;
use crate::error::StorageClientError;

// =========================================================================
// get / insert
// =========================================================================

#[test]
fn test_get_missing_row_is_empty() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    let row = client.get("n", "cn", "/missing").expect("get failed");
    assert!(row.is_empty());
}

#[test]
fn test_insert_then_get_merges() {
    println!("=== TEST: insert merges onto stored map ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);

    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true)
        .expect("first insert failed");
    client
        .insert("n", "cn", "/a", &map(vec![("b", Value::from(2i64))]), false)
        .expect("second insert failed");

    let row = client.get("n", "cn", "/a").expect("get failed");
    println!("AFTER: {:?}", row);
    assert_eq!(
        *row,
        map(vec![("a", Value::from(1i64)), ("b", Value::from(2i64))])
    );
}

#[test]
fn test_remove_sentinel_deletes_property() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert(
            "n",
            "cn",
            "/a",
            &map(vec![("a", Value::from(1i64)), ("b", Value::from(2i64))]),
            true,
        )
        .unwrap();
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::Remove)]), false)
        .unwrap();

    let row = client.get("n", "cn", "/a").unwrap();
    assert_eq!(*row, map(vec![("b", Value::from(2i64))]));
}

#[test]
fn test_null_change_deletes_property() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from("x"))]), true)
        .unwrap();
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::Null)]), false)
        .unwrap();
    assert!(client.get("n", "cn", "/a").unwrap().is_empty());
}

#[test]
fn test_resurrect_from_delete_drops_old_properties() {
    println!("=== TEST: resurrect from delete ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert(
            "n",
            "cn",
            "/a",
            &map(vec![("a", Value::from(1i64)), ("b", Value::from(2i64))]),
            true,
        )
        .unwrap();
    client
        .insert(
            "n",
            "cn",
            "/a",
            &map(vec![(DELETED_FIELD, Value::from(DELETED_MARKER))]),
            false,
        )
        .unwrap();
    client
        .insert("n", "cn", "/a", &map(vec![("c", Value::from(3i64))]), false)
        .unwrap();

    let row = client.get("n", "cn", "/a").unwrap();
    println!("AFTER: {:?}", row);
    assert_eq!(*row, map(vec![("c", Value::from(3i64))]));
}

#[test]
fn test_probably_new_on_existing_row_falls_back_to_update() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true)
        .unwrap();
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(2i64))]), true)
        .expect("insert-first on an existing row must update");
    assert_eq!(
        client.get("n", "cn", "/a").unwrap().get("a"),
        Some(&Value::from(2i64))
    );
}

#[test]
fn test_update_first_sequence_creates_new_rows() {
    let tmp = TempDir::new().unwrap();
    let config = StorageConfig {
        statement_sequence: StatementSequence::UpdateFirst,
        ..Default::default()
    };
    let (mut client, _) = client_with(&tmp, config);
    client
        .insert("n", "au", "bob", &map(vec![("name", Value::from("Bob"))]), true)
        .unwrap();
    client
        .insert("n", "au", "bob", &map(vec![("age", Value::from(40i64))]), false)
        .unwrap();
    assert_eq!(client.get("n", "au", "bob").unwrap().len(), 2);
}

#[test]
fn test_families_and_keyspaces_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert("n", "cn", "k", &map(vec![("v", Value::from("cn"))]), true)
        .unwrap();
    client
        .insert("n", "au", "k", &map(vec![("v", Value::from("au"))]), true)
        .unwrap();
    client
        .insert("other", "cn", "k", &map(vec![("v", Value::from("other"))]), true)
        .unwrap();
    assert_eq!(client.get("n", "cn", "k").unwrap().get("v"), Some(&Value::from("cn")));
    assert_eq!(client.get("n", "au", "k").unwrap().get("v"), Some(&Value::from("au")));
    assert_eq!(
        client.get("other", "cn", "k").unwrap().get("v"),
        Some(&Value::from("other"))
    );
}

#[test]
fn test_binary_value_rejected() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    let result = client.insert(
        "n",
        "cn",
        "/a",
        &map(vec![("body", Value::Binary(vec![1, 2, 3]))]),
        true,
    );
    assert!(matches!(
        result,
        Err(StorageClientError::InvalidValue { ref property }) if property == "body"
    ));
    assert!(client.get("n", "cn", "/a").unwrap().is_empty());
}

#[test]
fn test_listener_sees_block_and_merge() {
    let tmp = TempDir::new().unwrap();
    let (provider, _) = provider(&tmp);
    let listener = Arc::new(RecordingListener::default());
    let mut client = StorageClient::builder(Box::new(provider), narrow_statements())
        .listener(listener.clone())
        .build()
        .unwrap();

    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true)
        .unwrap();
    client.remove("n", "cn", "/a").unwrap();

    let events = listener.events.lock().clone();
    assert_eq!(
        events,
        vec![
            "begin",
            "before /a 0",
            "after /a 1",
            "commit",
            "delete /a",
            "begin",
            "commit",
        ]
    );
}

// =========================================================================
// remove
// =========================================================================

#[test]
fn test_remove_is_idempotent() {
    println!("=== TEST: idempotent delete ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client.remove("n", "cn", "/never").expect("removing a missing row");

    client
        .insert("n", "cn", "/a", &map(vec![("title", Value::from("x"))]), true)
        .unwrap();
    client.remove("n", "cn", "/a").expect("first remove");
    client.remove("n", "cn", "/a").expect("second remove");

    assert!(client.get("n", "cn", "/a").unwrap().is_empty());
    assert_eq!(client.all_count("n", "cn").unwrap(), 0);
}

#[test]
fn test_remove_clears_index_rows() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert("n", "cn", "/a", &map(vec![("title", Value::from("x"))]), true)
        .unwrap();
    client.remove("n", "cn", "/a").unwrap();
    let found = client
        .find("n", "cn", &map(vec![("title", Value::from("x"))]), None)
        .unwrap()
        .count();
    assert_eq!(found, 0);
}

// =========================================================================
// Failure handling
// =========================================================================

#[test]
fn test_read_retries_once_after_reset() {
    println!("=== TEST: retry once on read ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, faults) = client(&tmp);
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true)
        .unwrap();

    faults.fail_next(1);
    let row = client.get("n", "cn", "/a").expect("single failure is retried");
    println!("AFTER: resets={}", faults.resets());
    assert_eq!(row.get("a"), Some(&Value::from(1i64)));
    assert_eq!(faults.resets(), 1);
}

#[test]
fn test_read_fails_after_second_failure() {
    let tmp = TempDir::new().unwrap();
    let (mut client, faults) = client(&tmp);
    faults.fail_next(2);
    let result = client.get("n", "cn", "/a");
    assert!(matches!(result, Err(ref e) if e.is_transient()));
    assert_eq!(faults.resets(), 2);

    // The connection recovers on the next call.
    assert!(client.get("n", "cn", "/a").unwrap().is_empty());
}

#[test]
fn test_write_failure_is_not_retried() {
    let tmp = TempDir::new().unwrap();
    let (mut client, faults) = client(&tmp);
    faults.fail_next(1);
    let result = client.insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true);
    assert!(matches!(result, Err(StorageClientError::Sql { .. })));
    assert_eq!(faults.resets(), 1);
    assert!(client.get("n", "cn", "/a").unwrap().is_empty());
}

#[test]
fn test_index_failure_rolls_back_row_write() {
    println!("=== TEST: index failure rolls back the block ===");
    let tmp = TempDir::new().unwrap();
    let (provider, faults) = provider(&tmp);
    let mut statements = narrow_statements();
    statements.insert(
        "insert-string-column.cn",
        "INSERT INTO no_such_table (rid, cid, v) VALUES (?, ?, ?)",
    );
    let listener = Arc::new(RecordingListener::default());
    let mut client = StorageClient::builder(Box::new(provider), statements)
        .config(super::test_support::indexed_config(false))
        .listener(listener.clone())
        .build()
        .unwrap();

    let result = client.insert("n", "cn", "/a", &map(vec![("title", Value::from("x"))]), true);
    assert!(matches!(result, Err(StorageClientError::Sql { .. })));
    assert!(listener.events.lock().contains(&"rollback".to_string()));
    assert_eq!(faults.resets(), 1);

    let row = client.get("n", "cn", "/a").unwrap();
    println!("AFTER: {:?}", row);
    assert!(row.is_empty(), "row write must roll back with the index write");
}

#[test]
fn test_missing_statement_is_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let (provider, _) = provider(&tmp);
    let mut client = StorageClient::builder(Box::new(provider), crate::statements::SqlStatements::new())
        .build()
        .unwrap();
    let err = client.get("n", "cn", "/a").unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(err, StorageClientError::StatementNotFound { .. }));
}

#[test]
fn test_corrupt_blob_is_data_format_error() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    let rid = client.hasher().row_id("n", "cn", "/bad");
    client
        .executor
        .connection()
        .unwrap()
        .execute(
            "INSERT INTO cn_css_b (rid, b) VALUES (?, ?)",
            &[
                crate::sql::SqlValue::from(rid.as_str()),
                crate::sql::SqlValue::Blob(vec![0xc1, 0xff]),
            ],
        )
        .unwrap();
    let err = client.get("n", "cn", "/bad").unwrap_err();
    assert!(err.is_data_format());
    assert!(!err.is_transient());
}

// =========================================================================
// Direct-access cache
// =========================================================================

#[test]
fn test_cache_hit_skips_database() {
    let tmp = TempDir::new().unwrap();
    let (mut client, faults) = client(&tmp);
    let cache = MemoryCache::new();
    let rid = client.hasher().row_id("n", "cn", "/a");
    cache.put_to_cache(
        rid.as_str(),
        CacheHolder::new(Arc::new(map(vec![("a", Value::from("cached"))]))),
        true,
    );

    // Every connection attempt would fail; the cache answers instead.
    faults.fail_next(5);
    let row = client.get_cached("n", "cn", "/a", Some(&cache)).unwrap();
    assert_eq!(row.get("a"), Some(&Value::from("cached")));
    assert_eq!(faults.resets(), 0);
}

#[test]
fn test_cache_populated_after_read() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true)
        .unwrap();
    let cache = MemoryCache::new();

    client.get_cached("n", "cn", "/a", Some(&cache)).unwrap();
    client.get_cached("n", "cn", "/missing", Some(&cache)).unwrap();

    let hit = client.hasher().row_id("n", "cn", "/a");
    let miss = client.hasher().row_id("n", "cn", "/missing");
    assert_eq!(cache.len(), 2);
    assert!(!cache.get_from_cache(hit.as_str()).unwrap().is_absent());
    assert!(cache.get_from_cache(miss.as_str()).unwrap().is_absent());
}

#[test]
fn test_writes_do_not_touch_cache() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    let cache = MemoryCache::new();
    client.get_cached("n", "cn", "/a", Some(&cache)).unwrap();
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true)
        .unwrap();

    // The stale absence stays until the cache manager evicts it.
    assert!(client.get_cached("n", "cn", "/a", Some(&cache)).unwrap().is_empty());
    cache.evict(client.hasher().row_id("n", "cn", "/a").as_str());
    assert_eq!(client.get_cached("n", "cn", "/a", Some(&cache)).unwrap().len(), 1);
}

#[test]
fn test_statement_counters_return_to_zero() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    for i in 0..20 {
        let key = format!("/k{}", i);
        client
            .insert("n", "cn", &key, &map(vec![("title", Value::from("t"))]), true)
            .unwrap();
        client.get("n", "cn", &key).unwrap();
    }
    let counters = client.leak_counters();
    assert_eq!(counters.outstanding(counter::STATEMENT), 0);
    assert_eq!(counters.outstanding(counter::CACHED_STATEMENT), 0);
    assert_eq!(counters.outstanding(counter::CURSOR), 0);
}
