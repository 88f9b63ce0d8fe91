//! Relational Connector Integration Tests
//!
//! Note: Tests marked with #[ignore] require a running MySQL or PostgreSQL
//! server with DB_ENGINE, DB_NAME and the matching MYSQL_* / POSTGRES_*
//! variables set. Run them with: cargo test -- --ignored

use serde_json::json;
use strata_core::config::RelationalConfig;
use strata_core::{Connector, DatabaseConnector, Dialect, StrataConfig, StrataError};
use strata_relational::{RelationalConnector, RelationalFlavor};

#[test]
fn test_unconfigured_connector_reports_target() {
    let conn = RelationalConnector::new(RelationalFlavor::Postgres, "books");
    assert_eq!(conn.dialect(), Dialect::Sql);
    assert_eq!(conn.redacted_target(), "<unconfigured>");
    assert_eq!(conn.current_database(), "books");
}

#[test]
fn test_from_config_requires_database_name() {
    let err = RelationalConnector::from_config(&RelationalConfig::default(), "").unwrap_err();
    assert!(matches!(err, StrataError::Config(_)));
}

#[test]
fn test_split_combined_uses_sql_rules() {
    let conn = RelationalConnector::new(RelationalFlavor::MySql, "books");
    let parts = conn.split_combined("SELECT ';'; SELECT 2;");
    assert_eq!(parts.len(), 2);
}

#[tokio::test]
async fn test_unconfigured_query_is_connection_failure() {
    let conn = RelationalConnector::new(RelationalFlavor::MySql, "books");
    let err = conn.execute_query("SELECT 1").await.unwrap_err();
    assert!(matches!(err, StrataError::ConnectionFailure { .. }));

    assert!(!conn.check_connection(Some("test"), false).await.unwrap());
    assert!(conn.check_connection(Some("test"), true).await.is_err());
}

#[tokio::test]
async fn test_empty_command_returns_nothing() {
    let conn = RelationalConnector::new(RelationalFlavor::MySql, "books");
    assert!(conn.execute_query("   ").await.unwrap().is_none());
}

// =============================================================================
// Live server
// =============================================================================

fn live_connector() -> RelationalConnector {
    RelationalConnector::from_env().unwrap()
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
async fn test_live_combined_keeps_last_result() {
    let conn = live_connector();
    let result = conn
        .execute_query("SELECT 3 AS v; SELECT 4 AS v;")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.get(0, "v"), Some(&json!(4)));
}

#[tokio::test]
#[ignore]
async fn test_live_missing_table_is_none() {
    let conn = live_connector();
    assert!(conn
        .get_dataframe("no_such_table_anywhere")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore]
async fn test_live_cannot_drop_active_database() {
    let config = StrataConfig::from_env().unwrap();
    let conn = live_connector();
    let err = conn.drop_database(&config.database_name).await.unwrap_err();
    assert!(matches!(err, StrataError::ValidationFailure(_)));
}
