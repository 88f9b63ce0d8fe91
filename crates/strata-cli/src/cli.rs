//! Command definitions and their execution

use crate::session::{Engine, Session};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::{Connector, DatabaseConnector, TabularResult};
use strata_graph::{parse_triples_json, KnowledgeGraph, TripleFormat};

#[derive(Debug, Parser)]
#[command(name = "strata")]
#[command(about = "Query relational, document and graph databases through one interface")]
#[command(version)]
pub struct Cli {
    /// TOML config file; environment variables still take precedence
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Logical database to start in (overrides DB_NAME)
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Logical graph for graph commands (overrides GRAPH_NAME)
    #[arg(long, global = true)]
    pub graph: Option<String>,

    /// Print tables as JSON records
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Cheapest round trip to an engine
    Check { engine: Engine },
    /// Full smoke test: round trip, metadata, temp resource, temp database
    Test { engine: Engine },
    /// Run a command; only the last result of a combined command is printed
    Query { engine: Engine, command: String },
    /// Run every statement in a file
    File { engine: Engine, path: PathBuf },
    /// Select everything from a table, collection or logical graph
    Dataframe {
        engine: Engine,
        name: String,
        /// Keep only these columns, in order
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
    /// List logical databases
    Databases { engine: Engine },
    /// Every triple in the graph
    Triples {
        #[command(flatten)]
        output: TripleOutput,
    },
    /// Triples within `depth` hops of a node
    Neighborhood {
        node_id: String,
        #[arg(long, default_value_t = 1)]
        depth: usize,
        #[command(flatten)]
        output: TripleOutput,
    },
    /// Triples touching nodes ranked by degree
    Ranked {
        #[arg(long, default_value_t = 1)]
        best: i64,
        /// -1 means the last rank
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        worst: i64,
        /// Rank positions in the sorted list instead of dense degree ranks
        #[arg(long)]
        enforce_count: bool,
        #[command(flatten)]
        output: TripleOutput,
    },
    /// Triples visited by random walks
    Walk {
        #[arg(required = true)]
        start: Vec<String>,
        #[arg(long, default_value_t = 5)]
        length: usize,
        #[arg(long, default_value_t = 10)]
        walks: usize,
        #[command(flatten)]
        output: TripleOutput,
    },
    /// Detect communities and write them onto the graph's nodes
    Communities {
        #[arg(long, default_value = "leiden")]
        method: String,
        #[arg(long)]
        multi_level: bool,
        #[arg(long, default_value_t = 10)]
        max_levels: i64,
    },
    /// Triples inside one detected community
    Community {
        id: i64,
        #[command(flatten)]
        output: TripleOutput,
    },
    /// Add triples from a JSON file of `[{"s", "r", "o"}]`
    AddTriples { path: PathBuf },
}

/// How graph commands print triples
#[derive(Debug, Clone, clap::Args)]
pub struct TripleOutput {
    /// Replace element ids with node names and relation types
    #[arg(long)]
    pub names: bool,

    /// Text rendering of named triples: triple, natural or json
    #[arg(long)]
    pub format: Option<TripleFormat>,
}

// ============================================================================
// Execution
// ============================================================================

fn print_table(table: &TabularResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&table.to_records())?);
    } else {
        println!("{table}");
    }
    Ok(())
}

fn print_optional(table: Option<&TabularResult>, json: bool) -> anyhow::Result<()> {
    match table {
        Some(t) => print_table(t, json),
        None => {
            println!("(no result)");
            Ok(())
        }
    }
}

async fn print_triples(
    kg: &KnowledgeGraph<'_>,
    triples: &TabularResult,
    output: &TripleOutput,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(format) = output.format {
        let named = kg.triples_to_names(triples, true, None).await?;
        let text = kg.to_triples_string(Some(&named), format).await?;
        if text.ends_with('\n') {
            print!("{text}");
        } else {
            println!("{text}");
        }
        return Ok(());
    }
    if output.names {
        let named = kg.triples_to_names(triples, false, None).await?;
        return print_table(&named, json);
    }
    print_table(triples, json)
}

/// Run one parsed command against `session`
pub async fn run(cli: Cli, session: &Session) -> anyhow::Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Check { engine } => {
            let conn = session.connector(engine)?;
            conn.check_connection(Some("cli"), true).await?;
            println!("{engine}: connected to {}", conn.redacted_target());
        }
        Commands::Test { engine } => {
            let mut conn = session.connector(engine)?;
            conn.test_operations(true).await?;
            println!("{engine}: all test operations passed");
        }
        Commands::Query { engine, command } => {
            let conn = session.connector(engine)?;
            print_optional(conn.execute_query(&command).await?.as_ref(), json)?;
        }
        Commands::File { engine, path } => {
            let conn = session.connector(engine)?;
            let results = conn.execute_file(&path).await?;
            if results.is_empty() {
                println!("(no result)");
            }
            for table in &results {
                print_table(table, json)?;
            }
        }
        Commands::Dataframe {
            engine,
            name,
            columns,
        } => {
            let conn = session.connector(engine)?;
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            let table = conn.get_dataframe_columns(&name, &columns).await?;
            print_optional(table.as_ref(), json)?;
        }
        Commands::Databases { engine } => {
            let conn = session.connector(engine)?;
            for name in conn.list_databases().await? {
                println!("{name}");
            }
        }
        Commands::AddTriples { path } => {
            let graph = session.graph()?;
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let triples = parse_triples_json(&text)?;
            let mut kg = KnowledgeGraph::new(graph.current_graph(), &graph);
            let added = kg.add_triples_json(&triples).await?;
            println!("added {added} of {} triples", triples.len());
        }
        Commands::Communities {
            method,
            multi_level,
            max_levels,
        } => {
            let graph = session.graph()?;
            let kg = KnowledgeGraph::new(graph.current_graph(), &graph);
            kg.detect_community_clusters(&method, multi_level, max_levels)
                .await?;
            println!("communities written to graph {}", kg.graph_name());
        }
        command => run_traversal(command, session, json).await?,
    }
    Ok(())
}

async fn run_traversal(command: Commands, session: &Session, json: bool) -> anyhow::Result<()> {
    let graph = session.graph()?;
    let kg = KnowledgeGraph::new(graph.current_graph(), &graph);

    let (triples, output) = match command {
        Commands::Triples { output } => (kg.get_all_triples().await?, output),
        Commands::Neighborhood {
            node_id,
            depth,
            output,
        } => (kg.get_neighborhood(&node_id, depth).await?, output),
        Commands::Ranked {
            best,
            worst,
            enforce_count,
            output,
        } => (
            kg.get_by_ranked_degree(best, worst, enforce_count, &[])
                .await?,
            output,
        ),
        Commands::Walk {
            start,
            length,
            walks,
            output,
        } => (
            kg.get_random_walk_sample(&start, length, walks).await?,
            output,
        ),
        Commands::Community { id, output } => (kg.get_community_subgraph(id).await?, output),
        other => anyhow::bail!("not a traversal command: {other:?}"),
    };

    print_triples(&kg, &triples, &output, json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ranked_with_negative_worst() {
        let cli = Cli::try_parse_from(["strata", "ranked", "--best", "2", "--worst", "-1"]).unwrap();
        match cli.command {
            Commands::Ranked { best, worst, .. } => assert_eq!((best, worst), (2, -1)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_query_with_global_flags() {
        let cli = Cli::try_parse_from([
            "strata",
            "query",
            "graph",
            "MATCH (n) RETURN n",
            "--graph",
            "scene",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.graph.as_deref(), Some("scene"));
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Query {
                engine: Engine::Graph,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_triple_format() {
        let cli = Cli::try_parse_from(["strata", "triples", "--format", "natural"]).unwrap();
        match cli.command {
            Commands::Triples { output } => {
                assert_eq!(output.format, Some(TripleFormat::Natural));
                assert!(!output.names);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_walk_requires_start_nodes() {
        assert!(Cli::try_parse_from(["strata", "walk"]).is_err());
    }
}
