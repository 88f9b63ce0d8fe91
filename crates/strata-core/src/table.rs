//! Flat, column-named query results
//!
//! `TabularResult` is the single output shape of every connector. Column
//! order is deterministic (first-seen), and a query that returns no rows
//! still yields its columns when they are known.

use crate::sort::natural_cmp;
use crate::{Result, StrataError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Rectangular table of JSON cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TabularResult {
    /// Empty table with a known schema
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build from columns and rows, rejecting ragged rows
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(StrataError::ValidationFailure(format!(
                "row {bad} has {} cells, expected {}",
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Build from JSON objects; columns are the union of keys in first-seen order
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let records: Vec<Map<String, Value>> = records.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for record in &records {
            for key in record.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|c| record.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    /// Rows as JSON objects keyed by column
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.columns, self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Index of a column that must exist
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            StrataError::SchemaMismatch(format!(
                "column {name:?} not found (available: {})",
                self.columns.join(", ")
            ))
        })
    }

    /// Cell at `row` in column `name`
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let idx = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// All cells of one column
    pub fn column(&self, name: &str) -> Result<Vec<&Value>> {
        let idx = self.require_column(name)?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Append a row; its width must match the schema
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(StrataError::ValidationFailure(format!(
                "row has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Keep only `names`, in the given order
    pub fn select(&self, names: &[&str]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|n| self.require_column(n))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }

    /// Remove columns by name; unknown names are ignored
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        if keep.len() == self.columns.len() {
            return;
        }
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = keep.iter().map(|&i| row[i].clone()).collect();
        }
    }

    /// Prefix every column name with `prefix`
    pub fn prefixed(mut self, prefix: &str) -> Self {
        for column in &mut self.columns {
            *column = format!("{prefix}{column}");
        }
        self
    }

    /// Rows for which `keep` returns true
    pub fn filter_rows<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&[Value]) -> bool,
    {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// Drop duplicate rows, keeping the first occurrence
    pub fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.rows
            .retain(|row| seen.insert(Value::Array(row.clone()).to_string()));
    }

    /// Append the rows of a table with the same columns
    pub fn extend(&mut self, other: Self) -> Result<()> {
        if other.columns != self.columns {
            return Err(StrataError::SchemaMismatch(format!(
                "cannot append columns [{}] to [{}]",
                other.columns.join(", "),
                self.columns.join(", ")
            )));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Stable natural sort on every column except `ignore`
    pub fn sort_natural(&mut self, ignore: &[&str]) {
        let keys: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !ignore.contains(&self.columns[i].as_str()))
            .collect();
        self.rows.sort_by(|a, b| {
            keys.iter()
                .map(|&i| natural_cmp(&a[i], &b[i]))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub(crate) fn columns_mut(&mut self) -> &mut Vec<String> {
        &mut self.columns
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Vec<Value>> {
        &mut self.rows
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Display for TabularResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(render_cell).collect())
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{c:<w$}"))
            .collect();
        writeln!(f, "{}", header.join(" | ").trim_end())?;

        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("-+-"))?;

        for row in &cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{c:<w$}"))
                .collect();
            writeln!(f, "{}", line.join(" | ").trim_end())?;
        }

        write!(f, "({} rows)", self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> TabularResult {
        TabularResult::from_rows(
            vec!["name".into(), "age".into()],
            vec![
                vec![json!("bob"), json!(30)],
                vec![json!("alice"), json!(30)],
                vec![json!("carol"), json!(4)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_records_first_seen_columns() {
        let records = vec![
            json!({"b": 1, "a": 2}).as_object().unwrap().clone(),
            json!({"c": 3, "a": 4}).as_object().unwrap().clone(),
        ];
        let table = TabularResult::from_records(records);
        assert_eq!(table.columns(), &["b", "a", "c"]);
        assert_eq!(table.rows()[1], vec![json!(null), json!(4), json!(3)]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = TabularResult::from_rows(vec!["a".into()], vec![vec![]]).unwrap_err();
        assert!(matches!(err, StrataError::ValidationFailure(_)));
    }

    #[test]
    fn test_sort_natural_with_ignored_column() {
        let mut table = people();
        table.sort_natural(&["name"]);
        assert_eq!(table.get(0, "name"), Some(&json!("carol")));
        // bob stays ahead of alice: the sort is stable and name is ignored
        assert_eq!(table.get(1, "name"), Some(&json!("bob")));
    }

    #[test]
    fn test_select_missing_column() {
        let err = people().select(&["height"]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dedup_keeps_first() {
        let mut table = TabularResult::from_rows(
            vec!["x".into()],
            vec![vec![json!(1)], vec![json!(2)], vec![json!(1)]],
        )
        .unwrap();
        table.dedup();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_empty_table_keeps_columns() {
        let table = TabularResult::new(["subject_id", "relation_id", "object_id"]);
        assert!(table.is_empty());
        assert_eq!(table.columns().len(), 3);
        assert!(table.to_string().contains("(0 rows)"));
    }
}
