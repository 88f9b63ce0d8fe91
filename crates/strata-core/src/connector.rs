//! Connector trait hierarchy
//!
//! `Connector` is the narrow capability set every collaborator uses:
//! connection checks, smoke tests and command execution. Engines implement
//! the single-statement hook and inherit splitting, combined execution and
//! file execution.
//!
//! `DatabaseConnector` adds logical database scope on top: credentials,
//! `change_database`, `get_dataframe` and the create/drop lifecycle.

use crate::config::EngineCredentials;
use crate::splitter;
use crate::table::TabularResult;
use crate::{validate_identifier, BoxError, Dialect, Result, StrataError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::Path;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Command language this connector accepts
    fn dialect(&self) -> Dialect;

    /// Cheapest possible round trip
    ///
    /// On failure returns `Err` when `raise_error` is set, otherwise logs a
    /// warning and returns `Ok(false)`.
    async fn check_connection(&self, source: Option<&str>, raise_error: bool) -> Result<bool>;

    /// Fuller smoke test: round trip, metadata listing, a throwaway resource
    /// and a temporary logical database
    async fn test_operations(&mut self, raise_error: bool) -> Result<bool>;

    /// Run exactly one statement
    async fn execute_single(&self, command: &str) -> Result<Option<TabularResult>>;

    fn split_combined(&self, command: &str) -> Vec<String> {
        splitter::split(self.dialect(), command)
    }

    /// Run a command, returning only the last result of a combined command
    async fn execute_query(&self, command: &str) -> Result<Option<TabularResult>> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(None);
        }

        let statements = self.split_combined(command);
        match statements.as_slice() {
            [] => Ok(None),
            [single] => self.execute_single(single).await,
            _ => {
                let mut results = self.execute_combined(command).await?;
                if results.len() > 1 {
                    tracing::warn!(
                        statements = statements.len(),
                        discarded = results.len() - 1,
                        "combined command returned several results, keeping only the last"
                    );
                }
                Ok(results.pop())
            }
        }
    }

    /// Run every statement in order, skipping those that return nothing
    ///
    /// Not transactional: statements that ran before a failure stay applied.
    async fn execute_combined(&self, command: &str) -> Result<Vec<TabularResult>> {
        let mut results = Vec::new();
        for statement in self.split_combined(command) {
            if let Some(result) = self.execute_single(&statement).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Read a whole file and run it as one combined command
    async fn execute_file(&self, path: &Path) -> Result<Vec<TabularResult>> {
        let file_failure = |source: BoxError| StrataError::FileFailure {
            path: path.to_path_buf(),
            source,
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| file_failure(Box::new(e)))?;

        tracing::debug!(path = %path.display(), bytes = content.len(), "executing file");
        self.execute_combined(&content)
            .await
            .map_err(|e| file_failure(Box::new(e)))
    }
}

#[async_trait]
pub trait DatabaseConnector: Connector {
    /// Active logical database
    fn current_database(&self) -> &str;

    /// Switch the active logical database without reconnecting
    fn change_database(&mut self, name: &str) -> Result<()>;

    fn set_credentials(&mut self, credentials: EngineCredentials);

    fn credentials(&self) -> Option<&EngineCredentials>;

    /// Select-everything shortcut; `Ok(None)` when the resource is unknown
    async fn get_dataframe(&self, name: &str) -> Result<Option<TabularResult>>;

    async fn list_databases(&self) -> Result<Vec<String>>;

    async fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_databases().await?.iter().any(|db| db == name))
    }

    /// Engine-level create, called after the existence check
    async fn provision_database(&self, name: &str) -> Result<()>;

    /// Engine-level drop, called after the existence and self-drop checks
    async fn destroy_database(&self, name: &str) -> Result<()>;

    /// Read `{PREFIX}_*` credentials from the environment, then switch to `logical_db`
    fn configure(&mut self, prefix: &str, logical_db: &str) -> Result<()> {
        let credentials = EngineCredentials::from_env(prefix)?;
        self.configure_with(credentials, logical_db)
    }

    fn configure_with(&mut self, credentials: EngineCredentials, logical_db: &str) -> Result<()> {
        tracing::debug!(
            target_db = %credentials.redacted(logical_db),
            "configuring connector"
        );
        self.set_credentials(credentials);
        self.change_database(logical_db)
    }

    /// Connection string for the active database with the password masked
    fn redacted_target(&self) -> String {
        self.credentials()
            .map(|c| c.redacted(self.current_database()))
            .unwrap_or_else(|| "<unconfigured>".to_string())
    }

    /// Like `get_dataframe`, but an unknown resource is an error
    async fn require_dataframe(&self, name: &str) -> Result<TabularResult> {
        self.get_dataframe(name)
            .await?
            .ok_or_else(|| StrataError::SchemaMismatch(format!("{name:?} does not exist")))
    }

    /// `get_dataframe` narrowed to `columns`, in the given order
    async fn get_dataframe_columns(
        &self,
        name: &str,
        columns: &[&str],
    ) -> Result<Option<TabularResult>> {
        match self.get_dataframe(name).await? {
            Some(table) if !columns.is_empty() => Ok(Some(table.select(columns)?)),
            other => Ok(other),
        }
    }

    /// Create a logical database; fails if it already exists
    async fn create_database(&self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        if self.database_exists(name).await? {
            return Err(StrataError::ValidationFailure(format!(
                "database {name:?} already exists"
            )));
        }
        self.provision_database(name).await?;
        tracing::debug!(database = name, "database created");
        Ok(())
    }

    /// Drop a logical database; fails if it is missing or currently active
    async fn drop_database(&self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        if name == self.current_database() {
            return Err(StrataError::ValidationFailure(format!(
                "cannot drop the active database {name:?}"
            )));
        }
        if !self.database_exists(name).await? {
            return Err(StrataError::SchemaMismatch(format!(
                "database {name:?} does not exist"
            )));
        }
        self.destroy_database(name).await?;
        tracing::debug!(database = name, "database dropped");
        Ok(())
    }
}

/// Run `body` inside a temporary logical database
///
/// Creates `name` if absent and switches into it. Afterwards the previous
/// scope is restored and the database is dropped, but only when this call
/// created it. Scope is restored even when `body` fails.
pub async fn temp_database<C, T, F>(conn: &mut C, name: &str, body: F) -> Result<T>
where
    C: DatabaseConnector + ?Sized,
    T: Send,
    F: for<'c> FnOnce(&'c mut C) -> BoxFuture<'c, Result<T>> + Send,
{
    let previous = conn.current_database().to_string();

    let created = if conn.database_exists(name).await? {
        false
    } else {
        conn.create_database(name).await?;
        true
    };

    if let Err(e) = conn.change_database(name) {
        if created {
            conn.destroy_database(name).await?;
        }
        return Err(e);
    }

    let outcome = body(conn).await;

    let restored = conn.change_database(&previous);
    let dropped = if created {
        conn.drop_database(name).await
    } else {
        Ok(())
    };

    let value = outcome?;
    restored?;
    dropped?;
    Ok(value)
}

/// Collapse a smoke-test outcome per the `raise_error` contract
pub fn settle(outcome: Result<()>, raise_error: bool, what: &str) -> Result<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(e) if raise_error => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "{what} failed");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle() {
        assert!(settle(Ok(()), true, "check").unwrap());
        assert!(!settle(Err(StrataError::SchemaMismatch("x".into())), false, "check").unwrap());
        assert!(settle(Err(StrataError::SchemaMismatch("x".into())), true, "check").is_err());
    }
}
