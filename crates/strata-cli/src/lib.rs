//! Strata CLI - command-line front end over every connector
//!
//! Usage:
//!   strata check relational
//!   strata query graph "MATCH (n) RETURN count(n)"
//!   strata dataframe document users --columns name,address.city
//!   strata neighborhood <node_id> --depth 2 --names

pub mod cli;
pub mod session;

pub use cli::{run, Cli, Commands};
pub use session::{AnyConnector, Engine, Session};

use strata_core::LoggingConfig;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("warn,strata={}", logging.level).into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}
