//! Session context and engine dispatch
//!
//! `Session` is built once from configuration and hands out connectors on
//! demand, so a command against one engine never needs the other engines'
//! credentials.

use async_trait::async_trait;
use strata_core::{
    ConfigError, Connector, DatabaseConnector, Dialect, EngineCredentials, Result, StrataConfig,
    TabularResult,
};
use strata_document::DocumentConnector;
use strata_graph::GraphConnector;
use strata_relational::RelationalConnector;

/// Engine family selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Engine {
    /// MySQL or PostgreSQL, per `DB_ENGINE`
    Relational,
    /// MongoDB
    Document,
    /// Neo4j with tag-based logical databases
    Graph,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Relational => write!(f, "relational"),
            Self::Document => write!(f, "document"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

// ============================================================================
// AnyConnector
// ============================================================================

/// One connector of any engine family
pub enum AnyConnector {
    Relational(RelationalConnector),
    Document(DocumentConnector),
    Graph(GraphConnector),
}

impl AnyConnector {
    pub fn engine(&self) -> Engine {
        match self {
            Self::Relational(_) => Engine::Relational,
            Self::Document(_) => Engine::Document,
            Self::Graph(_) => Engine::Graph,
        }
    }

    /// The graph connector, if this is one
    pub fn as_graph(&self) -> Option<&GraphConnector> {
        match self {
            Self::Graph(g) => Some(g),
            _ => None,
        }
    }
}

#[async_trait]
impl Connector for AnyConnector {
    fn dialect(&self) -> Dialect {
        match self {
            Self::Relational(c) => c.dialect(),
            Self::Document(c) => c.dialect(),
            Self::Graph(c) => c.dialect(),
        }
    }

    async fn check_connection(&self, source: Option<&str>, raise_error: bool) -> Result<bool> {
        match self {
            Self::Relational(c) => c.check_connection(source, raise_error).await,
            Self::Document(c) => c.check_connection(source, raise_error).await,
            Self::Graph(c) => c.check_connection(source, raise_error).await,
        }
    }

    async fn test_operations(&mut self, raise_error: bool) -> Result<bool> {
        match self {
            Self::Relational(c) => c.test_operations(raise_error).await,
            Self::Document(c) => c.test_operations(raise_error).await,
            Self::Graph(c) => c.test_operations(raise_error).await,
        }
    }

    async fn execute_single(&self, command: &str) -> Result<Option<TabularResult>> {
        match self {
            Self::Relational(c) => c.execute_single(command).await,
            Self::Document(c) => c.execute_single(command).await,
            Self::Graph(c) => c.execute_single(command).await,
        }
    }
}

#[async_trait]
impl DatabaseConnector for AnyConnector {
    fn current_database(&self) -> &str {
        match self {
            Self::Relational(c) => c.current_database(),
            Self::Document(c) => c.current_database(),
            Self::Graph(c) => c.current_database(),
        }
    }

    fn change_database(&mut self, name: &str) -> Result<()> {
        match self {
            Self::Relational(c) => c.change_database(name),
            Self::Document(c) => c.change_database(name),
            Self::Graph(c) => c.change_database(name),
        }
    }

    fn set_credentials(&mut self, credentials: EngineCredentials) {
        match self {
            Self::Relational(c) => c.set_credentials(credentials),
            Self::Document(c) => c.set_credentials(credentials),
            Self::Graph(c) => c.set_credentials(credentials),
        }
    }

    fn credentials(&self) -> Option<&EngineCredentials> {
        match self {
            Self::Relational(c) => c.credentials(),
            Self::Document(c) => c.credentials(),
            Self::Graph(c) => c.credentials(),
        }
    }

    async fn get_dataframe(&self, name: &str) -> Result<Option<TabularResult>> {
        match self {
            Self::Relational(c) => c.get_dataframe(name).await,
            Self::Document(c) => c.get_dataframe(name).await,
            Self::Graph(c) => c.get_dataframe(name).await,
        }
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        match self {
            Self::Relational(c) => c.list_databases().await,
            Self::Document(c) => c.list_databases().await,
            Self::Graph(c) => c.list_databases().await,
        }
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        match self {
            Self::Relational(c) => c.database_exists(name).await,
            Self::Document(c) => c.database_exists(name).await,
            Self::Graph(c) => c.database_exists(name).await,
        }
    }

    async fn provision_database(&self, name: &str) -> Result<()> {
        match self {
            Self::Relational(c) => c.provision_database(name).await,
            Self::Document(c) => c.provision_database(name).await,
            Self::Graph(c) => c.provision_database(name).await,
        }
    }

    async fn destroy_database(&self, name: &str) -> Result<()> {
        match self {
            Self::Relational(c) => c.destroy_database(name).await,
            Self::Document(c) => c.destroy_database(name).await,
            Self::Graph(c) => c.destroy_database(name).await,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Process-wide settings shared by every command
#[derive(Debug, Clone)]
pub struct Session {
    config: StrataConfig,
}

impl Session {
    pub fn new(config: StrataConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// Override the initial logical database
    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.config.database_name = name.into();
        self
    }

    /// Override the initial logical graph
    pub fn with_graph(mut self, kg: impl Into<String>) -> Self {
        self.config.graph.initial_graph = kg.into();
        self
    }

    fn require_database(&self) -> Result<&str> {
        if self.config.database_name.is_empty() {
            return Err(ConfigError::MissingRequired("DB_NAME".to_string()).into());
        }
        Ok(&self.config.database_name)
    }

    /// Configured connector for `engine`, reading its credentials now
    pub fn connector(&self, engine: Engine) -> Result<AnyConnector> {
        let database = self.require_database()?;
        let connector = match engine {
            Engine::Relational => AnyConnector::Relational(RelationalConnector::from_config(
                &self.config.relational,
                database,
            )?),
            Engine::Document => AnyConnector::Document(DocumentConnector::from_config(
                &self.config.document,
                database,
            )?),
            Engine::Graph => AnyConnector::Graph(self.graph()?),
        };
        tracing::debug!(engine = %engine, target = %connector.redacted_target(), "connector ready");
        Ok(connector)
    }

    /// Configured graph connector scoped to the initial graph
    pub fn graph(&self) -> Result<GraphConnector> {
        let database = self.require_database()?;
        let mut graph = GraphConnector::from_config(&self.config.graph, database);
        graph.configure(&self.config.graph.prefix, database)?;
        Ok(graph)
    }
}
