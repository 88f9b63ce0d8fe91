//! Result normalization
//!
//! Converts engine results into `TabularResult`:
//! - SQL rows map directly onto columns
//! - Schema-less documents go through discovery, wrapping, flattening and
//!   natural sorting
//! - Graph element rows lift their property maps into columns, and
//!   relationships can be pivoted against their endpoint nodes

use crate::table::TabularResult;
use crate::{value_key, Result, StrataError};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

// ============================================================================
// SQL rows
// ============================================================================

/// Column names plus row values
pub fn normalize_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<TabularResult> {
    TabularResult::from_rows(columns, rows)
}

// ============================================================================
// Documents
// ============================================================================

/// Primitive kinds tracked by schema discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    Int,
    Float,
    Str,
}

impl Primitive {
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(_) => Some(Self::Bool),
            Value::Number(n) if n.is_f64() => Some(Self::Float),
            Value::Number(_) => Some(Self::Int),
            Value::String(_) => Some(Self::Str),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
        }
    }

    // Kinds accepted as a fallback once no exact match exists, nearest first
    fn widened(&self) -> &'static [Primitive] {
        match self {
            Self::Bool => &[Self::Int, Self::Float],
            Self::Int => &[Self::Float, Self::Bool],
            Self::Float => &[Self::Int, Self::Bool],
            Self::Str => &[],
        }
    }
}

/// Nested key/type pairs observed under each object-shaped field
#[derive(Debug, Default, Clone)]
pub struct NestedSchema {
    fields: Vec<(String, Vec<(String, Primitive)>)>,
}

impl NestedSchema {
    /// Discovery pass over every document
    pub fn discover(docs: &[Map<String, Value>]) -> Self {
        let mut schema = Self::default();
        for doc in docs {
            for (field, value) in doc {
                match value {
                    Value::Object(obj) => schema.record(field, obj),
                    Value::Array(items) => {
                        for item in items {
                            if let Value::Object(obj) = item {
                                schema.record(field, obj);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        schema
    }

    fn record(&mut self, field: &str, obj: &Map<String, Value>) {
        let pos = match self.fields.iter().position(|(f, _)| f == field) {
            Some(pos) => pos,
            None => {
                self.fields.push((field.to_string(), Vec::new()));
                self.fields.len() - 1
            }
        };
        let pairs = &mut self.fields[pos].1;
        for (key, value) in obj {
            if let Some(kind) = Primitive::of(value) {
                if !pairs.iter().any(|(k, t)| k == key && *t == kind) {
                    pairs.push((key.clone(), kind));
                }
            }
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|(f, _)| f == field)
    }

    /// Nested key a scalar of `kind` should be filed under, exact type first
    pub fn match_key(&self, field: &str, kind: Primitive) -> Option<&str> {
        let (_, pairs) = self.fields.iter().find(|(f, _)| f == field)?;
        std::iter::once(&kind)
            .chain(kind.widened())
            .find_map(|want| pairs.iter().find(|(_, t)| t == want))
            .map(|(k, _)| k.as_str())
    }
}

/// Normalize schema-less documents into a flat, naturally sorted table
///
/// `id_field` is stringified and excluded from the sort together with
/// `ignore`.
pub fn normalize_documents(
    docs: Vec<Map<String, Value>>,
    id_field: &str,
    ignore: &[&str],
) -> TabularResult {
    let schema = NestedSchema::discover(&docs);
    let wrapped = docs
        .into_iter()
        .map(|doc| wrap_document(doc, id_field, &schema));

    let mut table = flatten_table(TabularResult::from_records(wrapped));

    let mut skip: Vec<&str> = ignore.to_vec();
    skip.push(id_field);
    table.sort_natural(&skip);
    table
}

fn wrap_document(
    doc: Map<String, Value>,
    id_field: &str,
    schema: &NestedSchema,
) -> Map<String, Value> {
    doc.into_iter()
        .map(|(field, value)| {
            if field == id_field {
                let id = stringify_id(&value);
                return (field, id);
            }
            let items = match value {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                scalar => vec![scalar],
            };
            let items = if schema.has_field(&field) {
                items
                    .into_iter()
                    .map(|item| rewrap_scalar(&field, item, schema))
                    .collect()
            } else {
                items
            };
            (field, Value::Array(items))
        })
        .collect()
}

fn rewrap_scalar(field: &str, item: Value, schema: &NestedSchema) -> Value {
    let Some(kind) = Primitive::of(&item) else {
        return item;
    };
    let key = schema
        .match_key(field, kind)
        .map(str::to_string)
        .unwrap_or_else(|| format!("_unspecified_{}", kind.name()));
    let mut obj = Map::new();
    obj.insert(key, item);
    Value::Object(obj)
}

/// Document ids as strings; extended-JSON ObjectIds become their hex form
pub fn stringify_id(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Object(obj) => match obj.get("$oid") {
            Some(Value::String(hex)) => Value::String(hex.clone()),
            _ => Value::String(value.to_string()),
        },
        other => Value::String(value_key(other)),
    }
}

/// Explode list cells into rows and expand object cells into `parent.key`
/// columns until every cell is a scalar
///
/// Runs as a fixed-point loop. Each pass removes at least one level of
/// nesting, so the pass count is bounded by the number of nested values.
pub fn flatten_table(mut table: TabularResult) -> TabularResult {
    let guard = nested_value_count(&table) + 1;

    for _ in 0..guard {
        let mut changed = false;

        while let Some(idx) = find_column(&table, |v| v.is_array()) {
            explode_column(&mut table, idx);
            changed = true;
        }
        while let Some(idx) = find_column(&table, |v| v.is_object()) {
            expand_column(&mut table, idx);
            changed = true;
        }

        if !changed {
            return table;
        }
    }

    tracing::warn!(guard, "flatten pass limit reached");
    table
}

fn nested_value_count(table: &TabularResult) -> usize {
    fn count(value: &Value) -> usize {
        match value {
            Value::Array(items) => 1 + items.iter().map(count).sum::<usize>(),
            Value::Object(obj) => 1 + obj.values().map(count).sum::<usize>(),
            _ => 0,
        }
    }
    table.rows().iter().flatten().map(count).sum()
}

fn find_column<F>(table: &TabularResult, pred: F) -> Option<usize>
where
    F: Fn(&Value) -> bool,
{
    (0..table.columns().len()).find(|&i| table.rows().iter().any(|r| pred(&r[i])))
}

fn explode_column(table: &mut TabularResult, idx: usize) {
    let rows = std::mem::take(table.rows_mut());
    let mut exploded = Vec::with_capacity(rows.len());

    for mut row in rows {
        match std::mem::take(&mut row[idx]) {
            Value::Array(items) if items.is_empty() => exploded.push(row),
            Value::Array(items) => {
                for item in items {
                    let mut copy = row.clone();
                    copy[idx] = item;
                    exploded.push(copy);
                }
            }
            other => {
                row[idx] = other;
                exploded.push(row);
            }
        }
    }

    *table.rows_mut() = exploded;
}

fn expand_column(table: &mut TabularResult, idx: usize) {
    let parent = table.columns()[idx].clone();

    let mut keys: Vec<String> = Vec::new();
    let mut keep_parent = false;
    for row in table.rows() {
        match &row[idx] {
            Value::Object(obj) => {
                for key in obj.keys() {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
            Value::Null => {}
            _ => keep_parent = true,
        }
    }

    // Child names that already exist elsewhere are merged into that column
    let mut new_names: Vec<String> = Vec::new();
    if keep_parent {
        new_names.push(parent.clone());
    }
    let mut targets: Vec<(String, Option<usize>)> = Vec::new();
    for key in &keys {
        let name = format!("{parent}.{key}");
        let existing = table
            .columns()
            .iter()
            .enumerate()
            .position(|(i, c)| i != idx && *c == name);
        if existing.is_none() {
            new_names.push(name.clone());
        }
        targets.push((key.clone(), existing));
    }

    let width = new_names.len();
    let mut columns = table.columns().to_vec();
    columns.splice(idx..=idx, new_names.iter().cloned());
    let shift = |i: usize| if i > idx { i + width - 1 } else { i };

    let rows = std::mem::take(table.rows_mut());
    let mut expanded = Vec::with_capacity(rows.len());
    for mut row in rows {
        let cell = std::mem::take(&mut row[idx]);
        let mut fresh = vec![Value::Null; width];
        let mut merged: Vec<(usize, Value)> = Vec::new();

        match cell {
            Value::Object(mut obj) => {
                let mut slot = usize::from(keep_parent);
                for (key, existing) in &targets {
                    let value = obj.remove(key).unwrap_or(Value::Null);
                    match existing {
                        Some(col) => merged.push((shift(*col), value)),
                        None => {
                            fresh[slot] = value;
                            slot += 1;
                        }
                    }
                }
            }
            Value::Null => {}
            scalar => fresh[0] = scalar,
        }

        row.splice(idx..=idx, fresh);
        for (col, value) in merged {
            if row[col].is_null() {
                row[col] = value;
            }
        }
        expanded.push(row);
    }

    *table.columns_mut() = columns;
    *table.rows_mut() = expanded;
}

// ============================================================================
// Graph elements
// ============================================================================

/// Element columns that precede lifted properties
pub const ELEMENT_COLUMNS: [&str; 6] = [
    "element_id",
    "element_type",
    "labels",
    "rel_type",
    "start_node_id",
    "end_node_id",
];

const ELEMENT_ID_COLUMNS: [&str; 3] = ["element_id", "start_node_id", "end_node_id"];

/// Lift each element's `properties` map into top-level columns
///
/// Lists stay as cells. Rows are sorted naturally, ignoring element ids.
pub fn normalize_graph_elements(rows: Vec<Map<String, Value>>) -> TabularResult {
    let records = rows.into_iter().map(|mut row| {
        let mut record = Map::new();
        for column in ELEMENT_COLUMNS {
            record.insert(column.to_string(), row.remove(column).unwrap_or(Value::Null));
        }
        if let Some(Value::Object(props)) = row.remove("properties") {
            for (key, value) in props {
                if !record.contains_key(&key) {
                    record.insert(key, value);
                }
            }
        }
        record
    });

    let mut table = TabularResult::from_records(records);
    if table.columns().is_empty() {
        table = TabularResult::new(ELEMENT_COLUMNS);
    }
    table.sort_natural(&ELEMENT_ID_COLUMNS);
    table
}

fn element_type_is(table: &TabularResult, kind: &str) -> Result<TabularResult> {
    let idx = table.require_column("element_type")?;
    Ok(table.filter_rows(|r| r[idx].as_str() == Some(kind)))
}

// Keep only columns that carry at least one value
fn drop_empty_columns(table: &mut TabularResult, protect: &[&str]) {
    let empty: Vec<String> = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(i, c)| {
            !protect.contains(&c.as_str()) && table.rows().iter().all(|r| r[*i].is_null())
        })
        .map(|(_, c)| c.clone())
        .collect();
    let names: Vec<&str> = empty.iter().map(String::as_str).collect();
    table.drop_columns(&names);
}

/// Join relationships to their endpoint nodes
///
/// Produces one row per relationship with `r.*`, `n1.*` (start node) and
/// `n2.*` (end node) columns. Tenancy tags and element types are dropped, as
/// are the relationship's endpoint id columns after the join.
pub fn pivot_triples(elements: &TabularResult) -> Result<TabularResult> {
    let mut nodes = element_type_is(elements, "node")?;
    nodes.drop_columns(&[
        "element_type",
        "db",
        "kg",
        "rel_type",
        "start_node_id",
        "end_node_id",
    ]);
    drop_empty_columns(&mut nodes, &["element_id"]);

    let mut rels = element_type_is(elements, "relationship")?;
    rels.drop_columns(&["element_type", "db", "kg", "labels"]);
    drop_empty_columns(&mut rels, &["element_id", "start_node_id", "end_node_id"]);

    let node_id = nodes.require_column("element_id")?;
    let by_id: HashMap<String, &Vec<Value>> = nodes
        .rows()
        .iter()
        .map(|r| (value_key(&r[node_id]), r))
        .collect();

    let start = rels.require_column("start_node_id")?;
    let end = rels.require_column("end_node_id")?;
    let rel_keep: Vec<usize> = (0..rels.columns().len())
        .filter(|&i| i != start && i != end)
        .collect();

    let mut columns: Vec<String> = rel_keep
        .iter()
        .map(|&i| format!("r.{}", rels.columns()[i]))
        .collect();
    columns.extend(nodes.columns().iter().map(|c| format!("n1.{c}")));
    columns.extend(nodes.columns().iter().map(|c| format!("n2.{c}")));

    let mut rows = Vec::with_capacity(rels.len());
    for rel in rels.rows() {
        let (Some(n1), Some(n2)) = (
            by_id.get(&value_key(&rel[start])),
            by_id.get(&value_key(&rel[end])),
        ) else {
            continue;
        };
        let mut row: Vec<Value> = rel_keep.iter().map(|&i| rel[i].clone()).collect();
        row.extend(n1.iter().cloned());
        row.extend(n2.iter().cloned());
        rows.push(row);
    }

    TabularResult::from_rows(columns, rows)
}

/// `(subject_id, relation_id, object_id)` for every relationship whose
/// endpoints are present in `elements`
pub fn triple_ids(elements: &TabularResult) -> Result<TabularResult> {
    let mut out = TabularResult::new(["subject_id", "relation_id", "object_id"]);
    if elements.is_empty() {
        return Ok(out);
    }

    let kind = elements.require_column("element_type")?;
    let id = elements.require_column("element_id")?;
    let start = elements.require_column("start_node_id")?;
    let end = elements.require_column("end_node_id")?;

    let node_ids: HashSet<String> = elements
        .rows()
        .iter()
        .filter(|r| r[kind].as_str() == Some("node"))
        .map(|r| value_key(&r[id]))
        .collect();

    for row in elements.rows() {
        if row[kind].as_str() != Some("relationship") {
            continue;
        }
        if node_ids.contains(&value_key(&row[start])) && node_ids.contains(&value_key(&row[end]))
        {
            out.push_row(vec![row[start].clone(), row[id].clone(), row[end].clone()])?;
        }
    }
    Ok(out)
}

/// Require an object-shaped JSON value
pub fn expect_object(value: Value, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(obj) => Ok(obj),
        other => Err(StrataError::SchemaMismatch(format!(
            "expected {what} to be an object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: Vec<Value>) -> Vec<Map<String, Value>> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_flat_documents() {
        let table = normalize_documents(
            docs(vec![
                json!({"_id": {"$oid": "65a1"}, "name": "b", "n": 2}),
                json!({"_id": {"$oid": "65a0"}, "name": "a", "n": 1}),
            ]),
            "_id",
            &[],
        );
        assert_eq!(table.columns(), &["_id", "name", "n"]);
        assert_eq!(table.get(0, "_id"), Some(&json!("65a0")));
        assert_eq!(table.get(1, "name"), Some(&json!("b")));
    }

    #[test]
    fn test_nested_object_expands_with_prefix() {
        let table = normalize_documents(
            docs(vec![json!({"_id": 1, "author": {"first": "Ada", "last": "L"}, "year": 1843})]),
            "_id",
            &[],
        );
        assert_eq!(
            table.columns(),
            &["_id", "author.first", "author.last", "year"]
        );
        assert_eq!(table.get(0, "author.first"), Some(&json!("Ada")));
    }

    #[test]
    fn test_lists_explode_and_empty_list_is_null_row() {
        let table = normalize_documents(
            docs(vec![
                json!({"_id": "a", "tags": ["x", "y"]}),
                json!({"_id": "b", "tags": []}),
            ]),
            "_id",
            &[],
        );
        assert_eq!(table.len(), 3);
        let tags: Vec<&Value> = table.column("tags").unwrap();
        assert!(tags.contains(&&json!(null)));
    }

    #[test]
    fn test_type_ladder_rewraps_scalars() {
        let table = normalize_documents(
            docs(vec![
                json!({"_id": 1, "score": {"value": 3.5, "label": "high"}}),
                json!({"_id": 2, "score": 7}),
                json!({"_id": 3, "score": "low"}),
                json!({"_id": 4, "score": [true]}),
            ]),
            "_id",
            &[],
        );

        assert_eq!(table.columns(), &["_id", "score.value", "score.label"]);
        let row_of = |id: &str| {
            (0..table.len())
                .find(|&r| table.get(r, "_id") == Some(&json!(id)))
                .unwrap()
        };
        // int widened into the float-typed key
        assert_eq!(table.get(row_of("2"), "score.value"), Some(&json!(7)));
        // str matches only str
        assert_eq!(table.get(row_of("3"), "score.label"), Some(&json!("low")));
        assert_eq!(table.get(row_of("4"), "score.value"), Some(&json!(true)));
    }

    #[test]
    fn test_unmatched_scalar_goes_to_unspecified_column() {
        let table = normalize_documents(
            docs(vec![
                json!({"_id": 1, "meta": {"pages": 10}}),
                json!({"_id": 2, "meta": "draft"}),
            ]),
            "_id",
            &[],
        );
        assert!(table.has_column("meta._unspecified_str"));
        assert!(table.has_column("meta.pages"));
    }

    #[test]
    fn test_flatten_flat_table_is_noop() {
        let flat = TabularResult::from_rows(
            vec!["a".into(), "b".into()],
            vec![vec![json!(1), json!("x")]],
        )
        .unwrap();
        assert_eq!(flatten_table(flat.clone()), flat);
    }

    #[test]
    fn test_expand_merges_into_existing_column() {
        let table = TabularResult::from_rows(
            vec!["a".into(), "a.b".into()],
            vec![
                vec![json!({"b": 1, "c": 2}), json!(null)],
                vec![json!(null), json!(5)],
            ],
        )
        .unwrap();
        let flat = flatten_table(table);
        assert_eq!(flat.columns(), &["a.c", "a.b"]);
        assert_eq!(flat.rows()[0], vec![json!(2), json!(1)]);
        assert_eq!(flat.rows()[1], vec![json!(null), json!(5)]);
    }

    fn element_rows() -> Vec<Map<String, Value>> {
        docs(vec![
            json!({"element_id": "n:1", "element_type": "node", "labels": ["Node"],
                   "properties": {"name": "Alice", "db": "d", "kg": "k"}}),
            json!({"element_id": "n:2", "element_type": "node", "labels": ["Node"],
                   "properties": {"name": "Bob", "db": "d", "kg": "k"}}),
            json!({"element_id": "r:1", "element_type": "relationship", "rel_type": "KNOWS",
                   "start_node_id": "n:1", "end_node_id": "n:2",
                   "properties": {"db": "d", "kg": "k", "weight": 2}}),
        ])
    }

    #[test]
    fn test_graph_elements_lift_properties() {
        let table = normalize_graph_elements(element_rows());
        assert_eq!(&table.columns()[..6], &ELEMENT_COLUMNS);
        assert!(table.has_column("name"));
        assert!(table.has_column("weight"));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_empty_graph_keeps_element_columns() {
        let table = normalize_graph_elements(Vec::new());
        assert_eq!(table.columns(), &ELEMENT_COLUMNS);
        assert!(triple_ids(&table).unwrap().is_empty());
    }

    #[test]
    fn test_pivot_triples() {
        let elements = normalize_graph_elements(element_rows());
        let pivot = pivot_triples(&elements).unwrap();

        assert_eq!(pivot.len(), 1);
        assert!(pivot.has_column("r.rel_type"));
        assert!(pivot.has_column("r.weight"));
        assert!(!pivot.has_column("r.start_node_id"));
        assert!(!pivot.has_column("n1.db"));
        assert!(!pivot.has_column("n1.weight"));
        assert_eq!(pivot.get(0, "n1.name"), Some(&json!("Alice")));
        assert_eq!(pivot.get(0, "n2.name"), Some(&json!("Bob")));
    }

    #[test]
    fn test_triple_ids() {
        let elements = normalize_graph_elements(element_rows());
        let triples = triple_ids(&elements).unwrap();
        assert_eq!(triples.columns(), &["subject_id", "relation_id", "object_id"]);
        assert_eq!(
            triples.rows()[0],
            vec![json!("n:1"), json!("r:1"), json!("n:2")]
        );
    }
}
