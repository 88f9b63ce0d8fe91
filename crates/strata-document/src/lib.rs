//! Strata Document - MongoDB connector
//!
//! Runs JSON command objects against the active database and flattens the
//! returned documents into `TabularResult`s.

pub mod mongo_store;

pub use mongo_store::{DocumentConnector, ID_FIELD, INIT_COLLECTION};
