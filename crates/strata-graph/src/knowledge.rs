//! Knowledge graph of triples stored in one logical graph
//!
//! `KnowledgeGraph` writes sanitized triples through a `GraphConnector` and
//! reads them back as tables for the traversal functions. The logical graph
//! is `graph_name` inside the connector's active database.

use crate::names::{self, TripleFormat};
use crate::neo4j_store::GraphConnector;
use crate::sanitize::{sanitize_node, sanitize_relation, RelationCase, DEFAULT_RELATION};
use crate::traversal::{self, ENDPOINT_COLUMNS, TRIPLE_COLUMNS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strata_core::normalize::{pivot_triples, triple_ids};
use strata_core::{DatabaseConnector, Result, StrataError, TabularResult};

/// Triple as produced by relation extraction: `{"s": .., "r": .., "o": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTriple {
    pub s: String,
    pub r: String,
    pub o: String,
}

/// Parse a JSON array of raw triples
pub fn parse_triples_json(text: &str) -> Result<Vec<RawTriple>> {
    serde_json::from_str(text)
        .map_err(|e| StrataError::ValidationFailure(format!("invalid triples JSON: {e}")))
}

/// Community detection algorithm run by the graph data science library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommunityMethod {
    #[default]
    Leiden,
    Louvain,
}

impl CommunityMethod {
    fn procedure(&self) -> &'static str {
        match self {
            Self::Leiden => "gds.leiden.write",
            Self::Louvain => "gds.louvain.write",
        }
    }
}

impl std::str::FromStr for CommunityMethod {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "leiden" => Ok(Self::Leiden),
            "louvain" => Ok(Self::Louvain),
            other => Err(StrataError::ValidationFailure(format!(
                "unsupported community detection method {other:?}, expected leiden or louvain"
            ))),
        }
    }
}

/// Result of a write followed by a cleanup step
///
/// A write failure wins over a cleanup failure, which is only logged.
fn write_then_cleanup<T>(written: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (written, cleanup) {
        (Err(e), Err(cleanup_err)) => {
            tracing::warn!(error = %cleanup_err, "projection cleanup failed after a failed write");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
        (Ok(value), Ok(())) => Ok(value),
    }
}

const COMMUNITY_ID: &str = "community_id";
const COMMUNITY_LIST: &str = "community_list";

/// Triple store bound to one logical graph
pub struct KnowledgeGraph<'a> {
    graph_name: String,
    database: &'a GraphConnector,
    init_cleared: bool,
    relation_case: RelationCase,
    default_relation: String,
}

impl<'a> KnowledgeGraph<'a> {
    pub fn new(graph_name: impl Into<String>, database: &'a GraphConnector) -> Self {
        Self {
            graph_name: graph_name.into(),
            database,
            init_cleared: false,
            relation_case: RelationCase::default(),
            default_relation: DEFAULT_RELATION.to_string(),
        }
    }

    pub fn with_relation_case(mut self, case: RelationCase) -> Self {
        self.relation_case = case;
        self
    }

    pub fn with_default_relation(mut self, relation: impl Into<String>) -> Self {
        self.default_relation = relation.into();
        self
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    fn tags(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(
            "db".to_string(),
            Value::from(self.database.current_database()),
        );
        params.insert("kg".to_string(), Value::from(self.graph_name.as_str()));
        params
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Upsert `(subject)-[relation]->(object)`
    ///
    /// Returns `Ok(false)` and logs a warning when any part is empty or a
    /// node name sanitizes to nothing.
    pub async fn add_triple(&mut self, subject: &str, relation: &str, object: &str) -> Result<bool> {
        if subject.trim().is_empty() || relation.trim().is_empty() || object.trim().is_empty() {
            tracing::warn!(subject, relation, object, "skipping triple with an empty field");
            return Ok(false);
        }

        let relation = sanitize_relation(relation, self.relation_case, &self.default_relation);
        let (subject, object) = match (sanitize_node(subject), sanitize_node(object)) {
            (Ok(s), Ok(o)) => (s, o),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, relation = %relation, "skipping triple");
                return Ok(false);
            }
        };

        let mut params = self.tags();
        if !self.init_cleared {
            self.database
                .run_statement(
                    "MATCH (n:_Init) WHERE n.db = $db AND n.kg = $kg DETACH DELETE n",
                    &params,
                )
                .await?;
            self.init_cleared = true;
        }

        params.insert("subject".to_string(), Value::from(subject.as_str()));
        params.insert("object".to_string(), Value::from(object.as_str()));
        let statement = format!(
            "MERGE (s {{name: $subject, db: $db, kg: $kg}}) \
             MERGE (o {{name: $object, db: $db, kg: $kg}}) \
             MERGE (s)-[r:`{relation}` {{db: $db, kg: $kg}}]->(o)"
        );
        self.database.run_statement(&statement, &params).await?;

        tracing::debug!(kg = %self.graph_name, "added triple ({subject})-[:{relation}]->({object})");
        Ok(true)
    }

    /// Add every triple, returning how many were written
    pub async fn add_triples_json(&mut self, triples: &[RawTriple]) -> Result<usize> {
        let mut added = 0;
        for triple in triples {
            if self.add_triple(&triple.s, &triple.r, &triple.o).await? {
                added += 1;
            }
        }
        tracing::info!(kg = %self.graph_name, added, total = triples.len(), "triples added");
        Ok(added)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Element table for this graph, `None` when nothing is tagged
    pub async fn elements(&self) -> Result<Option<TabularResult>> {
        self.database.get_dataframe(&self.graph_name).await
    }

    async fn require_elements(&self) -> Result<TabularResult> {
        self.elements().await?.ok_or_else(|| {
            StrataError::SchemaMismatch(format!(
                "graph {:?} has no elements in database {:?}",
                self.graph_name,
                self.database.current_database()
            ))
        })
    }

    /// `(subject_id, relation_id, object_id)` for every triple
    pub async fn get_all_triples(&self) -> Result<TabularResult> {
        let triples = match self.elements().await? {
            Some(elements) => triple_ids(&elements)?,
            None => TabularResult::new(TRIPLE_COLUMNS),
        };
        tracing::debug!(kg = %self.graph_name, count = triples.len(), "found triples");
        Ok(triples)
    }

    async fn require_triples(&self) -> Result<TabularResult> {
        let triples = self.get_all_triples().await?;
        if triples.is_empty() {
            return Err(StrataError::SchemaMismatch(format!(
                "graph {:?} has no triples",
                self.graph_name
            )));
        }
        Ok(triples)
    }

    /// Relationships joined to their endpoints: `r.*`, `n1.*`, `n2.*`
    pub async fn get_triple_properties(&self) -> Result<TabularResult> {
        pivot_triples(&self.require_elements().await?)
    }

    async fn lookup_or_fetch(&self, lookup: Option<&TabularResult>) -> Result<TabularResult> {
        match lookup {
            Some(table) => Ok(table.clone()),
            None => Ok(self.elements().await?.unwrap_or_default()),
        }
    }

    /// See [`names::triples_to_names`]; fetches the lookup table when not given
    pub async fn triples_to_names(
        &self,
        ids: &TabularResult,
        drop_ids: bool,
        lookup: Option<&TabularResult>,
    ) -> Result<TabularResult> {
        if ids.is_empty() {
            return names::triples_to_names(ids, drop_ids, &TabularResult::default());
        }
        let lookup = self.lookup_or_fetch(lookup).await?;
        names::triples_to_names(ids, drop_ids, &lookup)
    }

    /// See [`names::find_element_names`]; fetches the lookup table when not given
    #[allow(clippy::too_many_arguments)]
    pub async fn find_element_names(
        &self,
        ids: &TabularResult,
        name_columns: &[&str],
        id_columns: &[&str],
        element_type: &str,
        name_property: &str,
        drop_ids: bool,
        lookup: Option<&TabularResult>,
    ) -> Result<TabularResult> {
        let lookup = if ids.is_empty() {
            TabularResult::default()
        } else {
            self.lookup_or_fetch(lookup).await?
        };
        names::find_element_names(
            ids,
            name_columns,
            id_columns,
            element_type,
            name_property,
            drop_ids,
            &lookup,
        )
    }

    // ========================================================================
    // Subgraph selection
    // ========================================================================

    /// Triples where any of `id_columns` is one of `node_ids`
    pub async fn get_subgraph_by_nodes(
        &self,
        node_ids: &[String],
        id_columns: &[&str],
    ) -> Result<TabularResult> {
        let triples = self.require_triples().await?;
        let subgraph = traversal::subgraph_by_nodes(&triples, node_ids, id_columns)?;
        tracing::debug!(count = subgraph.len(), "found triples for given nodes");
        Ok(subgraph)
    }

    /// Triples within `depth` hops of `node_id`
    pub async fn get_neighborhood(&self, node_id: &str, depth: usize) -> Result<TabularResult> {
        let triples = self.require_triples().await?;
        let hood = traversal::neighborhood(&triples, node_id, depth)?;
        tracing::debug!(count = hood.len(), depth, "found neighborhood triples");
        Ok(hood)
    }

    /// `(node_id, edge_count)`, highest first; `top_n <= 0` keeps every node
    pub async fn get_edge_counts(&self, top_n: i64) -> Result<TabularResult> {
        let counts = traversal::edge_counts(&self.require_elements().await?)?;
        match usize::try_from(top_n) {
            Ok(n) if n > 0 && n < counts.len() => {
                let (columns, mut rows) = counts.into_parts();
                rows.truncate(n);
                TabularResult::from_rows(columns, rows)
            }
            _ => Ok(counts),
        }
    }

    /// Triples touching nodes whose degree lies in `min..=max`
    pub async fn get_degree_range(
        &self,
        min_degree: i64,
        max_degree: i64,
        id_columns: &[&str],
    ) -> Result<TabularResult> {
        let counts = self.get_edge_counts(-1).await?;
        let nodes = traversal::degree_range_nodes(&counts, min_degree, max_degree)?;
        self.triples_for_nodes(&nodes, id_columns).await
    }

    /// Triples touching nodes whose degree rank lies in `best..=worst`
    pub async fn get_by_ranked_degree(
        &self,
        best_rank: i64,
        worst_rank: i64,
        enforce_count: bool,
        id_columns: &[&str],
    ) -> Result<TabularResult> {
        traversal::validate_rank_bounds(best_rank, worst_rank)?;
        let counts = self.get_edge_counts(-1).await?;
        let nodes =
            traversal::ranked_degree_nodes(&counts, best_rank, worst_rank, enforce_count)?;
        self.triples_for_nodes(&nodes, id_columns).await
    }

    async fn triples_for_nodes(&self, nodes: &[String], id_columns: &[&str]) -> Result<TabularResult> {
        if nodes.is_empty() {
            return Ok(TabularResult::new(TRIPLE_COLUMNS));
        }
        let columns = if id_columns.is_empty() {
            &ENDPOINT_COLUMNS[..]
        } else {
            id_columns
        };
        self.get_subgraph_by_nodes(nodes, columns).await
    }

    /// Triples visited by `num_walks` directed random walks
    pub async fn get_random_walk_sample(
        &self,
        start_nodes: &[String],
        walk_length: usize,
        num_walks: usize,
    ) -> Result<TabularResult> {
        let triples = self.require_triples().await?;
        let sample = traversal::random_walk(
            &triples,
            start_nodes,
            walk_length,
            num_walks,
            &mut rand::thread_rng(),
        )?;
        tracing::debug!(
            count = sample.len(),
            walks = num_walks,
            length = walk_length,
            "random walk sampled triples"
        );
        Ok(sample)
    }

    // ========================================================================
    // Communities
    // ========================================================================

    /// Write community assignments onto this graph's nodes
    ///
    /// Writes `community_id`, or the per-level `community_list` when
    /// `multi_level` is set. Arguments are checked before anything touches
    /// the graph.
    pub async fn detect_community_clusters(
        &self,
        method: &str,
        multi_level: bool,
        max_levels: i64,
    ) -> Result<()> {
        let method: CommunityMethod = method.parse()?;
        if max_levels < 1 {
            return Err(StrataError::ValidationFailure(format!(
                "max_levels must be >= 1, got {max_levels}"
            )));
        }

        let mut params = self.tags();
        let projection = format!(
            "strata_{}_{}",
            self.database.current_database(),
            self.graph_name
        );
        params.insert("projection".to_string(), Value::from(projection.as_str()));

        let mut config = Map::new();
        let (kept, unused) = if multi_level {
            config.insert("writeProperty".to_string(), Value::from(COMMUNITY_LIST));
            config.insert("includeIntermediateCommunities".to_string(), Value::Bool(true));
            if method == CommunityMethod::Leiden {
                config.insert("maxLevels".to_string(), Value::from(max_levels));
            }
            (COMMUNITY_LIST, COMMUNITY_ID)
        } else {
            config.insert("writeProperty".to_string(), Value::from(COMMUNITY_ID));
            (COMMUNITY_ID, COMMUNITY_LIST)
        };
        params.insert("config".to_string(), Value::Object(config));

        // A failed earlier run may have left the projection behind
        if let Err(e) = self
            .database
            .run_statement(
                "CALL gds.graph.drop($projection, false) YIELD graphName RETURN graphName",
                &params,
            )
            .await
        {
            tracing::debug!(error = %e, "no stale projection dropped");
        }

        self.database
            .run_statement(
                "MATCH (source) WHERE source.db = $db AND source.kg = $kg AND NOT source:_Init \
                 OPTIONAL MATCH (source)-[r]->(target) \
                 WHERE target.db = $db AND target.kg = $kg AND NOT target:_Init \
                 WITH gds.graph.project($projection, source, target, {}, \
                      {undirectedRelationshipTypes: ['*']}) AS g \
                 RETURN g.graphName AS graph, g.nodeCount AS nodes, g.relationshipCount AS relationships",
                &params,
            )
            .await?;

        let written = self
            .database
            .run_statement(
                &format!(
                    "CALL {}($projection, $config) YIELD communityCount RETURN communityCount",
                    method.procedure()
                ),
                &params,
            )
            .await;

        let dropped = self
            .database
            .run_statement(
                "CALL gds.graph.drop($projection) YIELD graphName RETURN graphName",
                &params,
            )
            .await
            .map(|_| ());
        let written = write_then_cleanup(written, dropped)?;

        self.database
            .run_statement(
                &format!(
                    "MATCH (n) WHERE n.db = $db AND n.kg = $kg REMOVE n.communityLevel, n.{unused}"
                ),
                &params,
            )
            .await?;

        tracing::info!(
            kg = %self.graph_name,
            method = ?method,
            property = kept,
            communities = ?written.rows().first(),
            "community detection complete"
        );
        Ok(())
    }

    /// Triples whose endpoints both belong to `community_id`
    pub async fn get_community_subgraph(&self, community_id: i64) -> Result<TabularResult> {
        traversal::community_subgraph(&self.get_triple_properties().await?, community_id)
    }

    // ========================================================================
    // Verbalization
    // ========================================================================

    /// Render named triples; every triple in the graph when `names` is `None`
    pub async fn to_triples_string(
        &self,
        names: Option<&TabularResult>,
        format: TripleFormat,
    ) -> Result<String> {
        match names {
            Some(table) => names::format_triples(table, format),
            None => {
                let ids = self.get_all_triples().await?;
                let named = self.triples_to_names(&ids, true, None).await?;
                names::format_triples(&named, format)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_triples_json() {
        let triples =
            parse_triples_json(r#"[{"s": "Alice", "r": "knows", "o": "Bob"}]"#).unwrap();
        assert_eq!(
            triples,
            vec![RawTriple {
                s: "Alice".into(),
                r: "knows".into(),
                o: "Bob".into()
            }]
        );
        assert!(matches!(
            parse_triples_json(r#"{"s": "Alice"}"#),
            Err(StrataError::ValidationFailure(_))
        ));
    }

    #[test]
    fn test_community_method_parse() {
        assert_eq!(" Leiden ".parse::<CommunityMethod>().unwrap(), CommunityMethod::Leiden);
        assert_eq!("louvain".parse::<CommunityMethod>().unwrap(), CommunityMethod::Louvain);
        assert!("girvan-newman".parse::<CommunityMethod>().is_err());
    }

    #[test]
    fn test_write_error_wins_over_cleanup_error() {
        let written: Result<i64> = Err(StrataError::rejected("CALL gds.leiden.write", "no memory"));
        let cleanup = Err(StrataError::rejected("CALL gds.graph.drop", "graph not found"));
        match write_then_cleanup(written, cleanup).unwrap_err() {
            StrataError::QueryExecutionFailure { command, .. } => {
                assert_eq!(command, "CALL gds.leiden.write")
            }
            other => panic!("unexpected error: {other}"),
        }

        let cleanup = Err(StrataError::rejected("CALL gds.graph.drop", "graph not found"));
        assert!(write_then_cleanup(Ok(3), cleanup).is_err());
        assert_eq!(write_then_cleanup(Ok(3), Ok(())).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_detection_validates_before_touching_the_graph() {
        // Unconfigured: any round trip would fail with a connection error
        let conn = GraphConnector::new("neo4j", crate::tenancy::TenantScope::new("db", "kg"));
        let kg = KnowledgeGraph::new("kg", &conn);

        let err = kg.detect_community_clusters("kmeans", false, 10).await.unwrap_err();
        assert!(matches!(err, StrataError::ValidationFailure(_)));

        let err = kg.detect_community_clusters("leiden", true, 0).await.unwrap_err();
        assert!(matches!(err, StrataError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn test_empty_triple_is_skipped() {
        let conn = GraphConnector::new("neo4j", crate::tenancy::TenantScope::new("db", "kg"));
        let mut kg = KnowledgeGraph::new("kg", &conn);

        assert!(!kg.add_triple("", "knows", "Bob").await.unwrap());
        assert!(!kg.add_triple("Alice", "knows", "?!").await.unwrap());
    }

    #[tokio::test]
    async fn test_rank_bounds_checked_first() {
        let conn = GraphConnector::new("neo4j", crate::tenancy::TenantScope::new("db", "kg"));
        let kg = KnowledgeGraph::new("kg", &conn);

        let err = kg.get_by_ranked_degree(0, -1, false, &[]).await.unwrap_err();
        assert!(matches!(err, StrataError::ValidationFailure(_)));
    }
}
