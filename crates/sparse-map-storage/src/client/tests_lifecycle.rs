//! Lifecycle tests: passivate, activate, destroy, validate and the
//! resources they force-close.

use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use sparse_map_core::{StatsService, Value};
use tempfile::TempDir;

use super::core::StorageClient;
use super::test_support::{client, indexed_config, map, narrow_statements, provider};
use crate::content::{FileStreamContentHelper, BODY_LOCATION_FIELD, LENGTH_FIELD};
use crate::diagnostics::counter;
use crate::error::StorageClientError;

#[derive(Default)]
struct RecordingStats {
    ops: Mutex<Vec<String>>,
}

impl RecordingStats {
    fn count(&self) -> usize {
        self.ops.lock().len()
    }
}

impl StatsService for RecordingStats {
    fn storage_op(&self, column_family: &str, op_kind: &str, _elapsed_ms: u64) {
        self.ops.lock().push(format!("{} {}", column_family, op_kind));
    }

    fn slow_storage_op(&self, column_family: &str, op_kind: &str, _elapsed_ms: u64, _sql: &str) {
        self.ops.lock().push(format!("{} {} slow", column_family, op_kind));
    }
}

fn content_client(dir: &TempDir) -> StorageClient {
    let (provider, _) = provider(dir);
    StorageClient::builder(Box::new(provider), narrow_statements())
        .config(indexed_config(false))
        .content_helper(Arc::new(FileStreamContentHelper::new(dir.path().join("bodies"))))
        .build()
        .expect("build client")
}

// =========================================================================
// Passivate / activate
// =========================================================================

#[test]
fn test_passivated_client_refuses_operations() {
    println!("=== TEST: passivate then use ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(1i64))]), true)
        .unwrap();
    client.passivate();
    assert!(!client.is_active());

    match client.get("n", "cn", "/a") {
        Err(StorageClientError::Lifecycle { message, traceback }) => {
            println!("AFTER: {}", message);
            assert_eq!(message, "Client has been passivated");
            assert!(!traceback.is_empty());
        }
        other => panic!("expected lifecycle error, got {:?}", other),
    }
    assert!(client
        .insert("n", "cn", "/a", &map(vec![("a", Value::from(2i64))]), false)
        .is_err());
    assert!(client.remove("n", "cn", "/a").is_err());
    assert!(client.list_all("n", "cn").is_err());
    assert!(client.all_count("n", "cn").is_err());

    client.activate().unwrap();
    assert!(client.is_active());
    assert_eq!(client.get("n", "cn", "/a").unwrap().get("a"), Some(&Value::Integer(1)));
}

#[test]
fn test_passivated_client_refuses_child_listing() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client.passivate();

    match client.list_children("n", "cn", "/parent", None) {
        Err(StorageClientError::Lifecycle { message, .. }) => {
            assert_eq!(message, "Client has been passivated");
        }
        Err(other) => panic!("expected lifecycle error, got {:?}", other),
        Ok(_) => panic!("list_children ran on a passivated client"),
    }
    assert!(client
        .find("n", "cn", &map(vec![("title", Value::from("alpha"))]), None)
        .is_err());

    client.destroy();
    match client.list_children("n", "cn", "/parent", None) {
        Err(e) => assert!(e.to_string().contains("Client was destroyed")),
        Ok(_) => panic!("list_children ran on a destroyed client"),
    }
}

#[test]
fn test_close_passivates() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    client.close();
    assert!(!client.is_active());
    assert!(!client.is_destroyed());
    client.activate().unwrap();
    assert!(client.get("n", "cn", "/missing").unwrap().is_empty());
}

#[test]
fn test_passivate_force_closes_iterators() {
    println!("=== TEST: passivate closes open iterators ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    for key in ["/a", "/b", "/c"] {
        client
            .insert("n", "cn", key, &map(vec![("title", Value::from("t"))]), true)
            .unwrap();
    }
    let mut scan = client.list_all("n", "cn").unwrap();
    let mut found = client
        .find("n", "cn", &map(vec![("title", Value::from("t"))]), None)
        .unwrap();
    assert!(scan.next().is_some());
    assert_eq!(client.open_disposables(), 2);
    println!("BEFORE: {} open", client.open_disposables());

    client.passivate();
    println!("AFTER: {} open", client.open_disposables());
    assert_eq!(client.open_disposables(), 0);
    assert!(!scan.is_open());
    assert!(scan.next().is_none());
    assert!(found.next().is_none());
    assert_eq!(client.leak_counters().outstanding(counter::CURSOR), 0);
}

#[test]
fn test_session_stats_reverted_on_passivate() {
    let tmp = TempDir::new().unwrap();
    let (provider, _) = provider(&tmp);
    let pool = Arc::new(RecordingStats::default());
    let mut client = StorageClient::builder(Box::new(provider), narrow_statements())
        .stats_service(pool.clone())
        .build()
        .unwrap();

    let session = Arc::new(RecordingStats::default());
    client.set_stats_service(session.clone());
    client.get("n", "cn", "/a").unwrap();
    assert!(session.count() > 0);
    assert_eq!(pool.count(), 0);

    client.passivate();
    client.activate().unwrap();
    let session_ops = session.count();
    client.get("n", "cn", "/a").unwrap();
    assert_eq!(session.count(), session_ops);
    assert!(pool.count() > 0);
}

// =========================================================================
// Destroy / validate
// =========================================================================

#[test]
fn test_destroyed_client_is_terminal() {
    println!("=== TEST: destroy ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, faults) = client(&tmp);
    client.destroy();
    assert!(client.is_destroyed());
    assert!(!client.is_active());
    assert_eq!(faults.resets(), 1);

    match client.get("n", "cn", "/a") {
        Err(StorageClientError::Lifecycle { message, .. }) => {
            assert_eq!(message, "Client was destroyed")
        }
        other => panic!("expected lifecycle error, got {:?}", other),
    }
    assert!(client.activate().is_err());
    assert!(client.validate().is_err());

    // Passivating or destroying again is a no-op.
    client.passivate();
    client.destroy();
    assert_eq!(faults.resets(), 1);
}

#[test]
fn test_validate_while_passive() {
    let tmp = TempDir::new().unwrap();
    let (mut client, faults) = client(&tmp);
    assert!(client.validate().unwrap());
    client.passivate();
    assert!(client.validate().unwrap());

    faults.fail_next(1);
    assert!(!client.validate().unwrap());
    assert_eq!(faults.resets(), 1);
    assert!(client.validate().unwrap());
}

// =========================================================================
// Streamed bodies
// =========================================================================

#[test]
fn test_stream_body_round_trip() {
    println!("=== TEST: stream body in and out ===");
    let tmp = TempDir::new().unwrap();
    let mut client = content_client(&tmp);
    let mut body: &[u8] = b"the body bytes";
    let located = client
        .stream_body_in("n", "cn", "/doc", "block-1", None, &map(vec![]), &mut body)
        .unwrap();
    assert_eq!(located.get(LENGTH_FIELD), Some(&Value::Integer(14)));
    assert!(located.contains_key(BODY_LOCATION_FIELD));
    client.insert("n", "cn", "/doc", &located, true).unwrap();

    let stored = client.get("n", "cn", "/doc").unwrap();
    assert!(client.has_body(&stored, None));
    assert!(!client.has_body(&stored, Some("thumb")));

    let mut stream = client
        .stream_body_out("n", "cn", "block-1", None, &stored)
        .unwrap()
        .expect("body stream");
    assert_eq!(client.leak_counters().outstanding(counter::STREAM), 1);
    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();
    assert_eq!(out, "the body bytes");
    drop(stream);
    assert_eq!(client.leak_counters().outstanding(counter::STREAM), 0);
    assert_eq!(client.open_disposables(), 0);

    assert!(client
        .stream_body_out("n", "cn", "block-1", Some("thumb"), &stored)
        .unwrap()
        .is_none());
}

#[test]
fn test_passivate_force_closes_body_streams() {
    let tmp = TempDir::new().unwrap();
    let mut client = content_client(&tmp);
    let mut body: &[u8] = b"abcdef";
    let located = client
        .stream_body_in("n", "cn", "/doc", "block-1", None, &map(vec![]), &mut body)
        .unwrap();
    let mut stream = client
        .stream_body_out("n", "cn", "block-1", None, &located)
        .unwrap()
        .expect("body stream");
    let mut buf = [0u8; 2];
    assert_eq!(stream.read(&mut buf).unwrap(), 2);

    client.passivate();
    assert!(!stream.is_open());
    assert!(stream.read(&mut buf).is_err());
    assert_eq!(client.leak_counters().outstanding(counter::STREAM), 0);
    assert!(client
        .stream_body_out("n", "cn", "block-1", None, &located)
        .is_err());
}

#[test]
fn test_streams_need_a_content_helper() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client(&tmp);
    let mut body: &[u8] = b"x";
    let err = client
        .stream_body_in("n", "cn", "/doc", "block-1", None, &map(vec![]), &mut body)
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(!client.has_body(&map(vec![]), None));
}
