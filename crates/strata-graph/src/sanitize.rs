//! Label sanitization for triples
//!
//! Relation labels become relationship types, so they are restricted to
//! letters, digits and underscores and must start with a letter. Node names
//! are stored as properties and only need their separators collapsed.

use strata_core::{Result, StrataError};

/// Relationship type used when a label sanitizes to nothing
pub const DEFAULT_RELATION: &str = "RELATED_TO";

/// Output casing for relation labels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationCase {
    /// Neo4j convention, e.g. `RELATED_TO`
    #[default]
    UpperSnake,
    /// OWL/RDF convention, e.g. `relatedTo`
    Camel,
}

impl std::str::FromStr for RelationCase {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UPPER_CASE" | "upper" => Ok(Self::UpperSnake),
            "camelCase" | "camel" => Ok(Self::Camel),
            _ => Err(StrataError::ValidationFailure(format!(
                "invalid relation case {s:?}, expected UPPER_CASE or camelCase"
            ))),
        }
    }
}

fn split_words(label: &str, split_camel: bool) -> Vec<String> {
    let mut spaced = String::with_capacity(label.len() + 4);
    let mut prev: Option<char> = None;
    for c in label.chars() {
        if split_camel && c.is_ascii_uppercase() && prev.is_some_and(|p| p.is_ascii_lowercase()) {
            spaced.push('_');
        }
        let keep = c.is_ascii_alphanumeric() || c == '_' || c == ' ';
        spaced.push(if keep { c } else { '_' });
        prev = Some(c);
    }

    spaced
        .split(['_', ' '])
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_words(words: &[String], case: RelationCase) -> String {
    match case {
        RelationCase::UpperSnake => words
            .iter()
            .map(|w| w.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join("_"),
        RelationCase::Camel => {
            let mut out = String::new();
            for (i, word) in words.iter().enumerate() {
                let lower = word.to_ascii_lowercase();
                if i == 0 {
                    out.push_str(&lower);
                } else {
                    let mut chars = lower.chars();
                    if let Some(first) = chars.next() {
                        out.push(first.to_ascii_uppercase());
                        out.push_str(chars.as_str());
                    }
                }
            }
            out
        }
    }
}

fn starts_with_letter(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// Normalize a relation label into a valid relationship type
///
/// camelCase boundaries become word breaks, other symbols become
/// separators, and the words are re-joined in `case`. Labels that end up
/// empty or not starting with a letter fall back to `default_relation`
/// (itself normalized to `case`).
pub fn sanitize_relation(label: &str, case: RelationCase, default_relation: &str) -> String {
    let fallback = {
        let words = split_words(default_relation, false);
        if words.is_empty() {
            join_words(&split_words(DEFAULT_RELATION, false), case)
        } else {
            join_words(&words, case)
        }
    };

    let sanitized = join_words(&split_words(label, true), case);
    if starts_with_letter(&sanitized) {
        sanitized
    } else {
        fallback
    }
}

/// Collapse runs of non-alphanumeric characters to `_` and trim the edges
pub fn sanitize_node(label: &str) -> Result<String> {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return Err(StrataError::ValidationFailure(format!(
            "node name {label:?} is empty after sanitization"
        )));
    }
    Ok(trimmed.to_string())
}
