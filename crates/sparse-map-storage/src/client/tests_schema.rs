//! Wide index column synchronizer and indexer selection tests.

use sparse_map_core::{StorageConfig, Value};
use tempfile::TempDir;

use super::core::StorageClient;
use super::schema::PARENT_HASH_COLUMN;
use super::test_support::{client_with, indexed_config, map, provider, wide_client, wide_statements, FlakyProvider};
use crate::error::StorageClientError;
use crate::sql::{ConnectionProvider, SqlValue};

fn wide_client_with(provider: FlakyProvider, config: StorageConfig) -> Result<StorageClient, StorageClientError> {
    StorageClient::builder(Box::new(provider), wide_statements())
        .config(config)
        .build()
}

// =========================================================================
// Mapping
// =========================================================================

#[test]
fn test_wide_mapping_created_at_build() {
    println!("=== TEST: wide mapping at build ===");
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = wide_client(&tmp);
    assert_eq!(client.indexer().name(), "wide-column");

    let mapping = client.sync_index_columns().unwrap().expect("wide mapping");
    println!("AFTER: {:?}", mapping);
    assert_eq!(mapping.get("cn:title").map(String::as_str), Some("title"));
    assert_eq!(mapping.get("cn:tags").map(String::as_str), Some("tags"));
    assert_eq!(
        mapping.get("cn:_:parenthash").map(String::as_str),
        Some(PARENT_HASH_COLUMN)
    );
    assert_eq!(
        mapping.get("ac:_:parenthash").map(String::as_str),
        Some(PARENT_HASH_COLUMN)
    );
}

#[test]
fn test_sync_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = wide_client(&tmp);
    let first = client.sync_index_columns().unwrap();
    let second = client.sync_index_columns().unwrap();
    assert_eq!(first, second);
    drop(client);

    // A new client over the same database reuses the stored mapping.
    let (provider, _) = provider(&tmp);
    let mut reopened = wide_client_with(provider, indexed_config(false)).unwrap();
    assert_eq!(reopened.sync_index_columns().unwrap(), first);
}

#[test]
fn test_new_index_column_added_later() {
    let tmp = TempDir::new().unwrap();
    let (client, _) = wide_client(&tmp);
    drop(client);

    let mut config = indexed_config(false);
    config.index_columns.push("cn:_owner".to_string());
    let (provider, _) = provider(&tmp);
    let mut client = wide_client_with(provider, config).unwrap();
    let mapping = client.sync_index_columns().unwrap().unwrap();
    assert_eq!(mapping.get("cn:_owner").map(String::as_str), Some("owner"));

    client
        .insert("n", "cn", "/a", &map(vec![("_owner", Value::from("ieb"))]), true)
        .unwrap();
    let found = client
        .find("n", "cn", &map(vec![("_owner", Value::from("ieb"))]), None)
        .unwrap()
        .count();
    assert_eq!(found, 1);
}

#[test]
fn test_padding_changes_derived_names() {
    let tmp = TempDir::new().unwrap();
    let config = StorageConfig {
        sql_name_padding: true,
        index_columns: vec!["cn:_owner".to_string(), "cn:sling:type".to_string()],
        ..Default::default()
    };
    let (provider, _) = provider(&tmp);
    let mut client = wide_client_with(provider, config).unwrap();
    let mapping = client.sync_index_columns().unwrap().unwrap();
    assert_eq!(mapping.get("cn:_owner").map(String::as_str), Some("Xowner"));
    assert_eq!(mapping.get("cn:sling:type").map(String::as_str), Some("slingtype"));
}

// =========================================================================
// Collisions
// =========================================================================

#[test]
fn test_colliding_names_fail_build() {
    println!("=== TEST: colliding derived column names ===");
    let tmp = TempDir::new().unwrap();
    let config = StorageConfig {
        index_columns: vec!["cn:a-b".to_string(), "cn:a_b".to_string()],
        ..Default::default()
    };
    let (provider, _) = provider(&tmp);
    let err = wide_client_with(provider, config).err().expect("collision");
    println!("AFTER: {}", err);
    match err {
        StorageClientError::ColumnCollision { column_key, physical } => {
            assert_eq!(column_key, "cn:a_b");
            assert_eq!(physical, "a_b");
        }
        other => panic!("expected collision, got {:?}", other),
    }
}

#[test]
fn test_explicit_mapping_resolves_collision() {
    let tmp = TempDir::new().unwrap();
    let (mut provider, _) = provider(&tmp);
    {
        let connection = provider.connection().unwrap();
        connection
            .execute(
                "INSERT INTO index_cols (cf, cname, v) VALUES (?, ?, ?)",
                &[SqlValue::from("cn"), SqlValue::from("a-b"), SqlValue::from("a_dash_b")],
            )
            .unwrap();
        connection
            .execute_ddl("ALTER TABLE cn_css_w ADD COLUMN a_dash_b TEXT")
            .unwrap();
    }
    let config = StorageConfig {
        index_columns: vec!["cn:a-b".to_string(), "cn:a_b".to_string()],
        ..Default::default()
    };
    let mut client = wide_client_with(provider, config).unwrap();
    let mapping = client.sync_index_columns().unwrap().unwrap();
    assert_eq!(mapping.get("cn:a-b").map(String::as_str), Some("a_dash_b"));
    assert_eq!(mapping.get("cn:a_b").map(String::as_str), Some("a_b"));
}

// =========================================================================
// Indexer selection
// =========================================================================

#[test]
fn test_narrow_statements_have_no_mapping() {
    let tmp = TempDir::new().unwrap();
    let (mut client, _) = client_with(&tmp, indexed_config(false));
    assert_eq!(client.indexer().name(), "non-batch-insert");
    assert_eq!(client.sync_index_columns().unwrap(), None);

    let tmp = TempDir::new().unwrap();
    let (client, _) = client_with(&tmp, indexed_config(true));
    assert_eq!(client.indexer().name(), "batch-insert");
}

#[test]
fn test_wide_statements_need_alter_templates() {
    let tmp = TempDir::new().unwrap();
    let (provider, _) = provider(&tmp);
    let mut statements = wide_statements();
    statements.remove("alter-widestring-table");
    let err = StorageClient::builder(Box::new(provider), statements)
        .build()
        .err()
        .expect("missing alter template");
    assert!(matches!(err, StorageClientError::StatementNotFound { .. }));
    assert!(err.is_configuration());
}
