//! Document Connector Integration Tests
//!
//! Note: Tests marked with #[ignore] require a running MongoDB with DB_NAME
//! and MONGO_* variables set. Run them with: cargo test -- --ignored

use std::io::Write;
use strata_core::{Connector, DatabaseConnector, Dialect, StrataError};
use strata_document::DocumentConnector;

#[test]
fn test_split_combined_ignores_semicolons_in_strings() {
    let conn = DocumentConnector::new("library");
    assert_eq!(conn.dialect(), Dialect::Document);

    let parts = conn.split_combined(
        r#"{"insert": "notes", "documents": [{"text": "a; b"}]};
           // trailing comment
           {"find": "notes"};"#,
    );
    assert_eq!(parts.len(), 2);
    assert!(parts[0].contains("a; b"));
}

#[tokio::test]
async fn test_invalid_command_fails_before_connecting() {
    let mut conn = DocumentConnector::new("library");
    conn.set_credentials(strata_core::EngineCredentials {
        engine: "mongodb".into(),
        username: "u".into(),
        password: "p".into(),
        host: "localhost".into(),
        port: 27017,
    });
    let err = conn.execute_query("db.notes.find({})").await.unwrap_err();
    assert!(matches!(err, StrataError::ValidationFailure(_)));
}

#[tokio::test]
async fn test_missing_file_is_file_failure() {
    let conn = DocumentConnector::new("library");
    let err = conn
        .execute_file(std::path::Path::new("/nonexistent/commands.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::FileFailure { .. }));
}

// =============================================================================
// Live MongoDB
// =============================================================================

fn live_connector() -> DocumentConnector {
    DocumentConnector::from_env().unwrap()
}

#[tokio::test]
#[ignore]
async fn test_live_test_operations() {
    let mut conn = live_connector();
    assert!(conn.check_connection(Some("it"), true).await.unwrap());
    assert!(conn.test_operations(true).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_live_execute_file_flattens_nested_documents() {
    let conn = live_connector();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"drop": "it_people"}};
{{"insert": "it_people", "documents": [{{"name": "Alice", "address": {{"city": "Paris"}}}}]}};
{{"find": "it_people"}};"#
    )
    .unwrap();

    // The drop may fail on a fresh database, so create the collection first
    conn.execute_query(r#"{"create": "it_people"}"#).await.ok();

    let results = conn.execute_file(file.path()).await.unwrap();
    let found = results.last().unwrap();
    assert!(found.has_column("address.city"));

    let table = conn.require_dataframe("IT_PEOPLE").await.unwrap();
    assert_eq!(table.len(), 1);

    conn.execute_query(r#"{"drop": "it_people"}"#).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_live_missing_collection_is_none() {
    let conn = live_connector();
    assert!(conn
        .get_dataframe("no_such_collection")
        .await
        .unwrap()
        .is_none());
}
