//! Neo4j connector over the transactional HTTP API
//!
//! Each call posts one `tx/commit` request, so every statement list runs in
//! a single transaction and no session state survives between calls. User
//! statements are scoped by `TenantScope`; internal queries bind the
//! `db`/`kg` tags explicitly.

use crate::tenancy::{TenantScope, SWEEP_STATEMENTS};
use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strata_core::config::GraphConfig;
use strata_core::normalize::{normalize_graph_elements, normalize_rows};
use strata_core::{
    settle, temp_database, validate_identifier, Connector, DatabaseConnector, Dialect,
    EngineCredentials, Result, StrataError, TabularResult,
};

/// Label of the placeholder node that marks an empty logical database or graph
pub const INIT_LABEL: &str = "_Init";

const ELEMENTS_QUERY: &str = r#"
MATCH (n) WHERE n.db = $db AND n.kg = $kg AND NOT n:_Init
RETURN elementId(n) AS element_id, 'node' AS element_type, labels(n) AS labels,
       null AS rel_type, null AS start_node_id, null AS end_node_id,
       properties(n) AS properties
UNION ALL
MATCH (a)-[r]->(b) WHERE r.db = $db AND r.kg = $kg
RETURN elementId(r) AS element_id, 'relationship' AS element_type, null AS labels,
       type(r) AS rel_type, elementId(a) AS start_node_id, elementId(b) AS end_node_id,
       properties(r) AS properties
"#;

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct TxStatement<'a> {
    statement: &'a str,
    parameters: &'a Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct TxRequest<'a> {
    statements: Vec<TxStatement<'a>>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Convert a `tx/commit` response body into one table per statement
fn into_tables(body: &str, command: &str) -> Result<Vec<TabularResult>> {
    let response: TxResponse =
        serde_json::from_str(body).map_err(|e| StrataError::query(command, e))?;

    if let Some(first) = response.errors.first() {
        let message = response
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        tracing::debug!(code = %first.code, "graph statement rejected");
        return Err(StrataError::rejected(command, message));
    }

    response
        .results
        .into_iter()
        .map(|r| normalize_rows(r.columns, r.data.into_iter().map(|d| d.row).collect()))
        .collect()
}

// ============================================================================
// Connector
// ============================================================================

/// Graph connector emulating logical databases and graphs with tags
pub struct GraphConnector {
    client: Client,
    credentials: Option<EngineCredentials>,
    neo4j_database: String,
    scope: TenantScope,
}

impl GraphConnector {
    pub fn new(neo4j_database: impl Into<String>, scope: TenantScope) -> Self {
        Self {
            client: Client::new(),
            credentials: None,
            neo4j_database: neo4j_database.into(),
            scope,
        }
    }

    /// Connector for `database_name` with the configured initial graph
    pub fn from_config(config: &GraphConfig, database_name: &str) -> Self {
        Self::new(
            config.neo4j_database.clone(),
            TenantScope::new(database_name, config.initial_graph.clone()),
        )
    }

    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    /// Active logical graph (`kg` tag)
    pub fn current_graph(&self) -> &str {
        &self.scope.kg
    }

    /// Switch the active logical graph; in-memory only
    pub fn change_graph(&mut self, kg: &str) -> Result<()> {
        validate_identifier(kg)?;
        self.scope.kg = kg.to_string();
        Ok(())
    }

    fn endpoint(&self) -> Result<String> {
        let creds = self.credentials.as_ref().ok_or_else(|| StrataError::ConnectionFailure {
            target: "<unconfigured>".to_string(),
            message: "graph connector has no credentials, call configure first".to_string(),
            source: None,
        })?;
        let scheme = match creds.engine.as_str() {
            "https" | "neo4j+s" | "bolt+s" => "https",
            _ => "http",
        };
        Ok(format!(
            "{scheme}://{}:{}/db/{}/tx/commit",
            creds.host, creds.port, self.neo4j_database
        ))
    }

    /// Post statements in one transaction, returning one table per statement
    async fn post(&self, statements: &[(&str, &Map<String, Value>)]) -> Result<Vec<TabularResult>> {
        let command = statements.first().map(|(s, _)| *s).unwrap_or_default();
        let url = self.endpoint()?;
        let target = self.redacted_target();

        let request = TxRequest {
            statements: statements
                .iter()
                .map(|&(statement, parameters)| TxStatement {
                    statement,
                    parameters,
                })
                .collect(),
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(creds) = &self.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }
        let response = builder
            .send()
            .await
            .map_err(|e| StrataError::connection(&target, e))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(StrataError::ConnectionFailure {
                target,
                message: format!("authentication rejected ({status})"),
                source: None,
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| StrataError::connection(&target, e))?;
        if !status.is_success() {
            return Err(StrataError::rejected(command, format!("HTTP {status}: {body}")));
        }

        into_tables(&body, command)
    }

    /// Run one statement as written, bypassing the tenancy rewrite
    pub async fn run_statement(
        &self,
        statement: &str,
        parameters: &Map<String, Value>,
    ) -> Result<TabularResult> {
        let mut tables = self.post(&[(statement, parameters)]).await?;
        Ok(tables.pop().unwrap_or_default())
    }

    fn tags(db: &str, kg: Option<&str>) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("db".to_string(), Value::from(db));
        if let Some(kg) = kg {
            params.insert("kg".to_string(), Value::from(kg));
        }
        params
    }

    async fn count(&self, statement: &str, parameters: &Map<String, Value>) -> Result<i64> {
        let table = self.run_statement(statement, parameters).await?;
        Ok(table
            .rows()
            .first()
            .and_then(|r| r.first())
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    async fn insert_placeholder(&self, db: &str, kg: &str) -> Result<()> {
        self.run_statement(
            "CREATE (:_Init {db: $db, kg: $kg, _init: true})",
            &Self::tags(db, Some(kg)),
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Logical graphs
    // ------------------------------------------------------------------------

    pub async fn graph_exists(&self, kg: &str) -> Result<bool> {
        let n = self
            .count(
                "MATCH (n) WHERE n.db = $db AND n.kg = $kg RETURN count(n) AS count",
                &Self::tags(&self.scope.db, Some(kg)),
            )
            .await?;
        Ok(n > 0)
    }

    /// Logical graphs in the active database
    pub async fn list_graphs(&self) -> Result<Vec<String>> {
        let table = self
            .run_statement(
                "MATCH (n) WHERE n.db = $db AND n.kg IS NOT NULL RETURN DISTINCT n.kg AS kg ORDER BY kg",
                &Self::tags(&self.scope.db, None),
            )
            .await?;
        Ok(strings(&table))
    }

    /// Create a logical graph in the active database; fails if it exists
    pub async fn create_graph(&self, kg: &str) -> Result<()> {
        validate_identifier(kg)?;
        if self.graph_exists(kg).await? {
            return Err(StrataError::ValidationFailure(format!(
                "graph {kg:?} already exists in database {:?}",
                self.scope.db
            )));
        }
        self.insert_placeholder(&self.scope.db, kg).await?;
        tracing::debug!(db = %self.scope.db, kg, "graph created");
        Ok(())
    }

    /// Delete every element of a logical graph in the active database
    pub async fn drop_graph(&self, kg: &str) -> Result<()> {
        validate_identifier(kg)?;
        if !self.graph_exists(kg).await? {
            return Err(StrataError::SchemaMismatch(format!(
                "graph {kg:?} does not exist in database {:?}",
                self.scope.db
            )));
        }
        self.run_statement(
            "MATCH (n) WHERE n.db = $db AND n.kg = $kg DETACH DELETE n",
            &Self::tags(&self.scope.db, Some(kg)),
        )
        .await?;
        tracing::debug!(db = %self.scope.db, kg, "graph dropped");
        Ok(())
    }

    /// Run `body` inside a temporary logical graph
    ///
    /// Mirrors `temp_database`: the graph is dropped afterwards only if this
    /// call created it, and the previous graph is restored on every path.
    pub async fn temp_graph<T, F>(&mut self, kg: &str, body: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Self) -> BoxFuture<'c, Result<T>> + Send,
    {
        let previous = self.scope.kg.clone();
        let created = if self.graph_exists(kg).await? {
            false
        } else {
            self.create_graph(kg).await?;
            true
        };

        self.change_graph(kg)?;
        let outcome = body(self).await;
        self.scope.kg = previous;

        let dropped = if created {
            self.drop_graph(kg).await
        } else {
            Ok(())
        };

        let value = outcome?;
        dropped?;
        Ok(value)
    }

    async fn smoke_test(&mut self) -> Result<()> {
        let stamp = chrono::Utc::now().timestamp();

        tracing::debug!(stage = "round trip", "graph smoke test");
        self.check_connection(Some("test_operations"), true).await?;

        tracing::debug!(stage = "metadata", "graph smoke test");
        let databases = self.list_databases().await?;
        tracing::debug!(count = databases.len(), "logical databases listed");

        tracing::debug!(stage = "temp graph", "graph smoke test");
        let kg = format!("test_kg_{stamp}");
        self.temp_graph(&kg, |g| {
            Box::pin(async move {
                g.execute_query("CREATE (:Test {name: 'Alice'})").await?;
                let table = g.require_dataframe(&g.scope.kg.clone()).await?;
                let found = table
                    .column("name")?
                    .iter()
                    .any(|v| v.as_str() == Some("Alice"));
                if !found {
                    return Err(StrataError::SchemaMismatch(
                        "test node not returned by get_dataframe".to_string(),
                    ));
                }
                Ok(())
            })
        })
        .await?;

        tracing::debug!(stage = "temp database", "graph smoke test");
        let db = format!("test_db_{stamp}");
        temp_database(self, &db, |g| {
            Box::pin(async move {
                g.execute_query("RETURN 1").await?;
                Ok(())
            })
        })
        .await
    }
}

fn strings(table: &TabularResult) -> Vec<String> {
    table
        .rows()
        .iter()
        .filter_map(|r| r.first().and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[async_trait]
impl Connector for GraphConnector {
    fn dialect(&self) -> Dialect {
        Dialect::Graph
    }

    async fn check_connection(&self, source: Option<&str>, raise_error: bool) -> Result<bool> {
        let outcome = self.run_statement("RETURN 1", &Map::new()).await.map(|_| ());
        if outcome.is_ok() {
            tracing::debug!(source = source.unwrap_or("-"), target = %self.redacted_target(), "graph connection ok");
        }
        settle(outcome, raise_error, "graph connection check")
    }

    async fn test_operations(&mut self, raise_error: bool) -> Result<bool> {
        let outcome = self.smoke_test().await;
        settle(outcome, raise_error, "graph test operations")
    }

    async fn execute_single(&self, command: &str) -> Result<Option<TabularResult>> {
        let scoped = self.scope.rewrite(command);
        tracing::debug!(statement = %scoped.statement, writes = scoped.writes, "running graph statement");

        let mut statements: Vec<(&str, &Map<String, Value>)> =
            vec![(scoped.statement.as_str(), &scoped.parameters)];
        if scoped.writes {
            statements.extend(SWEEP_STATEMENTS.iter().map(|s| (*s, &scoped.parameters)));
        }

        let result = self
            .post(&statements)
            .await
            .map_err(|e| match e {
                StrataError::QueryExecutionFailure {
                    message, source, ..
                } => StrataError::QueryExecutionFailure {
                    command: command.to_string(),
                    message,
                    source,
                },
                other => other,
            })?
            .into_iter()
            .next();

        Ok(result.filter(|t| !t.columns().is_empty()))
    }
}

#[async_trait]
impl DatabaseConnector for GraphConnector {
    fn current_database(&self) -> &str {
        &self.scope.db
    }

    fn change_database(&mut self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        self.scope.db = name.to_string();
        Ok(())
    }

    fn set_credentials(&mut self, credentials: EngineCredentials) {
        self.credentials = Some(credentials);
    }

    fn credentials(&self) -> Option<&EngineCredentials> {
        self.credentials.as_ref()
    }

    /// Element table of logical graph `name` in the active database
    async fn get_dataframe(&self, name: &str) -> Result<Option<TabularResult>> {
        let table = self
            .run_statement(ELEMENTS_QUERY, &Self::tags(&self.scope.db, Some(name)))
            .await?;
        if table.is_empty() {
            tracing::warn!(db = %self.scope.db, kg = name, "graph has no elements");
            return Ok(None);
        }
        Ok(Some(normalize_graph_elements(table.to_records())))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let table = self
            .run_statement(
                "MATCH (n) WHERE n.db IS NOT NULL RETURN DISTINCT n.db AS db ORDER BY db",
                &Map::new(),
            )
            .await?;
        Ok(strings(&table))
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        let n = self
            .count(
                "MATCH (n) WHERE n.db = $db RETURN count(n) AS count",
                &Self::tags(name, None),
            )
            .await?;
        Ok(n > 0)
    }

    async fn provision_database(&self, name: &str) -> Result<()> {
        self.insert_placeholder(name, &self.scope.kg).await
    }

    async fn destroy_database(&self, name: &str) -> Result<()> {
        self.run_statement(
            "MATCH (n) WHERE n.db = $db DETACH DELETE n",
            &Self::tags(name, None),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credentials(engine: &str) -> EngineCredentials {
        EngineCredentials {
            engine: engine.into(),
            username: "neo4j".into(),
            password: "secret".into(),
            host: "graph.local".into(),
            port: 7474,
        }
    }

    #[test]
    fn test_endpoint_scheme() {
        let mut conn = GraphConnector::new("neo4j", TenantScope::new("library", "main"));
        assert!(matches!(
            conn.endpoint(),
            Err(StrataError::ConnectionFailure { .. })
        ));

        conn.set_credentials(credentials("bolt"));
        assert_eq!(
            conn.endpoint().unwrap(),
            "http://graph.local:7474/db/neo4j/tx/commit"
        );
        conn.set_credentials(credentials("neo4j+s"));
        assert!(conn.endpoint().unwrap().starts_with("https://"));
    }

    #[test]
    fn test_into_tables() {
        let body = json!({
            "results": [
                {"columns": ["n"], "data": [{"row": [1]}, {"row": [2]}]},
                {"columns": [], "data": []}
            ],
            "errors": []
        })
        .to_string();

        let tables = into_tables(&body, "RETURN n").unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].columns(), &["n"]);
        assert_eq!(tables[0].get(1, "n"), Some(&json!(2)));
        assert!(tables[1].columns().is_empty());
    }

    #[test]
    fn test_into_tables_errors() {
        let body = json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "Invalid input"}]
        })
        .to_string();

        let err = into_tables(&body, "MATC (n)").unwrap_err();
        match err {
            StrataError::QueryExecutionFailure { command, message, .. } => {
                assert_eq!(command, "MATC (n)");
                assert!(message.contains("SyntaxError"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_change_scope_is_validated() {
        let mut conn = GraphConnector::from_config(&GraphConfig::default(), "library");
        assert_eq!(conn.current_graph(), "main");
        conn.change_graph("novels").unwrap();
        conn.change_database("archive").unwrap();
        assert_eq!(conn.scope(), &TenantScope::new("archive", "novels"));
        assert!(conn.change_graph("bad name").is_err());
    }
}
