//! Element id to display name mapping and triple verbalization

use serde_json::Value;
use std::collections::HashMap;
use strata_core::{value_key, Result, StrataError, TabularResult};

/// Name columns appended by `triples_to_names`, in output order
pub const NAME_COLUMNS: [&str; 3] = ["subject", "relation", "object"];

/// Add `name_columns` holding the display name of each id in `id_columns`
///
/// `lookup` is an element table from `get_dataframe`; names come from its
/// rows of `element_type` and their `name_property` column. Id columns not
/// present in `ids` are skipped along with their name column. Unknown ids map
/// to null.
pub fn find_element_names(
    ids: &TabularResult,
    name_columns: &[&str],
    id_columns: &[&str],
    element_type: &str,
    name_property: &str,
    drop_ids: bool,
    lookup: &TabularResult,
) -> Result<TabularResult> {
    if name_columns.len() != id_columns.len() {
        return Err(StrataError::ValidationFailure(format!(
            "name columns (size {}) and id columns (size {}) must have the same length",
            name_columns.len(),
            id_columns.len()
        )));
    }

    let kept: Vec<&String> = ids
        .columns()
        .iter()
        .filter(|c| !(drop_ids && id_columns.contains(&c.as_str())))
        .collect();

    if ids.is_empty() {
        let columns = kept
            .into_iter()
            .map(String::as_str)
            .chain(name_columns.iter().copied());
        return Ok(TabularResult::new(columns));
    }

    let pairs: Vec<(&str, usize)> = name_columns
        .iter()
        .zip(id_columns)
        .filter_map(|(name, id)| ids.column_index(id).map(|idx| (*name, idx)))
        .collect();
    if pairs.is_empty() {
        return Ok(ids.clone());
    }

    if lookup.is_empty() {
        return Err(StrataError::SchemaMismatch(
            "graph has no elements to look names up in".to_string(),
        ));
    }
    let kind = lookup.require_column("element_type")?;
    let element_id = lookup.require_column("element_id")?;
    let name = lookup.require_column(name_property)?;
    let names: HashMap<String, &Value> = lookup
        .rows()
        .iter()
        .filter(|r| r[kind].as_str() == Some(element_type))
        .map(|r| (value_key(&r[element_id]), &r[name]))
        .collect();

    let kept_idx: Vec<usize> = kept
        .iter()
        .filter_map(|c| ids.column_index(c))
        .collect();
    let columns: Vec<String> = kept
        .into_iter()
        .cloned()
        .chain(pairs.iter().map(|(n, _)| n.to_string()))
        .collect();

    let rows = ids
        .rows()
        .iter()
        .map(|row| {
            let mut out: Vec<Value> = kept_idx.iter().map(|&i| row[i].clone()).collect();
            out.extend(pairs.iter().map(|(_, idx)| {
                names
                    .get(&value_key(&row[*idx]))
                    .map(|v| (*v).clone())
                    .unwrap_or(Value::Null)
            }));
            out
        })
        .collect();

    TabularResult::from_rows(columns, rows)
}

/// Add `subject`, `relation` and `object` names to an id triple table
///
/// Name columns come last, in that order.
pub fn triples_to_names(
    ids: &TabularResult,
    drop_ids: bool,
    lookup: &TabularResult,
) -> Result<TabularResult> {
    let named = find_element_names(
        ids,
        &["subject", "object"],
        &["subject_id", "object_id"],
        "node",
        "name",
        drop_ids,
        lookup,
    )?;
    let named = find_element_names(
        &named,
        &["relation"],
        &["relation_id"],
        "relationship",
        "rel_type",
        drop_ids,
        lookup,
    )?;

    let order: Vec<&str> = named
        .columns()
        .iter()
        .map(String::as_str)
        .filter(|c| !NAME_COLUMNS.contains(c))
        .chain(NAME_COLUMNS.iter().copied().filter(|c| named.has_column(c)))
        .collect();
    named.select(&order)
}

// ============================================================================
// Verbalization
// ============================================================================

/// Text rendering of named triples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TripleFormat {
    /// `subject relation object` per line
    #[default]
    Triple,
    /// `Subject relation words object.` per line
    Natural,
    /// `[{"s": .., "r": .., "o": ..}]`
    Json,
}

impl std::str::FromStr for TripleFormat {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "triple" => Ok(Self::Triple),
            "natural" => Ok(Self::Natural),
            "json" => Ok(Self::Json),
            other => Err(StrataError::ValidationFailure(format!(
                "invalid triple format {other:?}, expected triple, natural or json"
            ))),
        }
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => value_key(other),
    }
}

// "HAS_PART" / "hasPart" -> "has part"
fn relation_words(relation: &str) -> String {
    let mut out = String::with_capacity(relation.len() + 4);
    let mut prev: Option<char> = None;
    for c in relation.chars() {
        if c == '_' {
            out.push(' ');
        } else {
            if c.is_uppercase() && prev.is_some_and(char::is_lowercase) {
                out.push(' ');
            }
            out.extend(c.to_lowercase());
        }
        prev = Some(c);
    }
    out
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Render a table with `subject`, `relation` and `object` columns
pub fn format_triples(names: &TabularResult, format: TripleFormat) -> Result<String> {
    let s = names.require_column("subject")?;
    let r = names.require_column("relation")?;
    let o = names.require_column("object")?;

    let triples = names
        .rows()
        .iter()
        .map(|row| (cell_text(&row[s]), cell_text(&row[r]), cell_text(&row[o])));

    match format {
        TripleFormat::Triple => Ok(triples
            .map(|(s, r, o)| format!("{s} {r} {o}\n"))
            .collect()),
        TripleFormat::Natural => Ok(triples
            .map(|(s, r, o)| {
                format!(
                    "{} {} {}.\n",
                    capitalize(&s.replace('_', " ")),
                    relation_words(&r),
                    o.replace('_', " ")
                )
            })
            .collect()),
        TripleFormat::Json => {
            let objects: Vec<Value> = triples
                .map(|(s, r, o)| serde_json::json!({"s": s, "r": r, "o": o}))
                .collect();
            serde_json::to_string(&objects).map_err(|e| StrataError::Other(e.into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup() -> TabularResult {
        TabularResult::from_rows(
            vec![
                "element_id".into(),
                "element_type".into(),
                "rel_type".into(),
                "name".into(),
            ],
            vec![
                vec![json!("n1"), json!("node"), json!(null), json!("Alice")],
                vec![json!("n2"), json!("node"), json!(null), json!("New_York")],
                vec![json!("e1"), json!("relationship"), json!("LIVES_IN"), json!(null)],
            ],
        )
        .unwrap()
    }

    fn id_triples() -> TabularResult {
        TabularResult::from_rows(
            vec!["subject_id".into(), "relation_id".into(), "object_id".into()],
            vec![vec![json!("n1"), json!("e1"), json!("n2")]],
        )
        .unwrap()
    }

    #[test]
    fn test_triples_to_names_order() {
        let named = triples_to_names(&id_triples(), false, &lookup()).unwrap();
        assert_eq!(
            named.columns(),
            &["subject_id", "relation_id", "object_id", "subject", "relation", "object"]
        );
        assert_eq!(named.get(0, "relation"), Some(&json!("LIVES_IN")));

        let dropped = triples_to_names(&id_triples(), true, &lookup()).unwrap();
        assert_eq!(dropped.columns(), &NAME_COLUMNS);
        assert_eq!(dropped.get(0, "object"), Some(&json!("New_York")));
    }

    #[test]
    fn test_empty_input_keeps_columns() {
        let empty = TabularResult::new(["subject_id", "relation_id", "object_id"]);
        let named = triples_to_names(&empty, true, &TabularResult::default()).unwrap();
        assert!(named.is_empty());
        assert_eq!(named.columns(), &NAME_COLUMNS);
    }

    #[test]
    fn test_length_mismatch() {
        let err = find_element_names(
            &id_triples(),
            &["subject"],
            &["subject_id", "object_id"],
            "node",
            "name",
            false,
            &lookup(),
        )
        .unwrap_err();
        assert!(matches!(err, StrataError::ValidationFailure(_)));
    }

    #[test]
    fn test_formats() {
        let named = triples_to_names(&id_triples(), true, &lookup()).unwrap();

        assert_eq!(
            format_triples(&named, TripleFormat::Triple).unwrap(),
            "Alice LIVES_IN New_York\n"
        );
        assert_eq!(
            format_triples(&named, TripleFormat::Natural).unwrap(),
            "Alice lives in New York.\n"
        );
        let parsed: Value =
            serde_json::from_str(&format_triples(&named, TripleFormat::Json).unwrap()).unwrap();
        assert_eq!(parsed, json!([{"s": "Alice", "r": "LIVES_IN", "o": "New_York"}]));
    }

    #[test]
    fn test_relation_words() {
        assert_eq!(relation_words("employedBy"), "employed by");
        assert_eq!(relation_words("HAS_PART"), "has part");
    }
}
