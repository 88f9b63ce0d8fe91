//! Strata Relational - MySQL and PostgreSQL connector
//!
//! Both engines go through the sqlx `Any` driver. The flavor only changes
//! identifier quoting, metadata queries and the maintenance database used
//! for server-level statements.

pub mod sql_store;

pub use sql_store::RelationalConnector;
pub use strata_core::config::RelationalFlavor;
