//! strata binary entry point

use anyhow::Context;
use clap::Parser;
use strata_cli::{init_tracing, run, Cli, Session};
use strata_core::StrataConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => StrataConfig::from_file(path)
            .and_then(StrataConfig::with_env_override)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StrataConfig::from_env().context("reading configuration from the environment")?,
    };
    init_tracing(&config.logging);

    let mut session = Session::new(config);
    if let Some(database) = &cli.database {
        session = session.with_database(database.clone());
    }
    if let Some(graph) = &cli.graph {
        session = session.with_graph(graph.clone());
    }

    if let Err(e) = run(cli, &session).await {
        tracing::error!(error = %e, "command failed");
        return Err(e);
    }
    Ok(())
}
