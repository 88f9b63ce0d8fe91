//! Strata Graph - Property graph connector and knowledge-graph traversal
//!
//! Provides the Neo4j connector with tag-based logical databases and graphs,
//! plus a triple store on top of it for sampling subgraphs (neighborhoods,
//! degree ranks, random walks, detected communities).

pub mod knowledge;
pub mod names;
pub mod neo4j_store;
pub mod sanitize;
pub mod tenancy;
pub mod traversal;

pub use knowledge::{parse_triples_json, CommunityMethod, KnowledgeGraph, RawTriple};
pub use names::TripleFormat;
pub use neo4j_store::GraphConnector;
pub use sanitize::{sanitize_node, sanitize_relation, RelationCase};
pub use tenancy::TenantScope;
