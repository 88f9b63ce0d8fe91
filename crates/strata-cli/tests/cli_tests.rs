//! CLI Integration Tests
//!
//! Note: Tests marked with #[ignore] require running engines and the
//! DB_NAME plus MYSQL_* / MONGO_* / NEO4J_* variables. Run them with:
//! cargo test -- --ignored

use clap::Parser;
use std::io::Write;
use strata_cli::{run, AnyConnector, Cli, Engine, Session};
use strata_core::{Connector, DatabaseConnector, StrataConfig};
use strata_document::DocumentConnector;
use strata_graph::GraphConnector;

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_session_from_config_file() {
    let file = config_file(
        r#"
database_name = "library"

[graph]
initial_graph = "scene"

[logging]
level = "debug"
json_format = true
"#,
    );
    let config = StrataConfig::from_file(file.path()).unwrap();
    assert_eq!(config.graph.neo4j_database, "neo4j");

    let session = Session::new(config).with_graph("plot");
    assert_eq!(session.config().database_name, "library");
    assert_eq!(session.config().graph.initial_graph, "plot");
    assert!(session.config().logging.json_format);
}

#[tokio::test]
async fn test_unconfigured_connectors_fail_softly() {
    let connectors = [
        AnyConnector::Document(DocumentConnector::new("library")),
        AnyConnector::Graph(GraphConnector::new(
            "neo4j",
            strata_graph::TenantScope::new("library", "main"),
        )),
    ];
    for conn in &connectors {
        assert!(!conn.check_connection(Some("test"), false).await.unwrap());
        assert_eq!(conn.redacted_target(), "<unconfigured>");
    }
}

#[tokio::test]
async fn test_run_reports_missing_database_name() {
    let cli = Cli::try_parse_from(["strata", "check", "document"]).unwrap();
    let err = run(cli, &Session::new(StrataConfig::default()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("DB_NAME"));
}

#[test]
fn test_engine_names() {
    let cli = Cli::try_parse_from(["strata", "databases", "relational"]).unwrap();
    assert!(matches!(
        cli.command,
        strata_cli::Commands::Databases {
            engine: Engine::Relational
        }
    ));
    assert!(Cli::try_parse_from(["strata", "databases", "redis"]).is_err());
}

// =============================================================================
// Live engines
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_live_check_every_engine() {
    let session = Session::new(StrataConfig::from_env().unwrap());
    for engine in [Engine::Relational, Engine::Document, Engine::Graph] {
        let conn = session.connector(engine).unwrap();
        assert!(conn.check_connection(Some("it"), true).await.unwrap());
    }
}
