//! Subgraph selection over triple tables
//!
//! Every function here is pure: it takes tables already fetched from the
//! graph (`subject_id, relation_id, object_id` triples, the element table or
//! the pivoted property table) and returns a new table. `KnowledgeGraph`
//! wraps them with the database round trips.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use strata_core::sort::natural_cmp;
use strata_core::{value_key, Result, StrataError, TabularResult};

/// Columns of an id triple table
pub const TRIPLE_COLUMNS: [&str; 3] = ["subject_id", "relation_id", "object_id"];

/// Columns of an edge count table
pub const EDGE_COUNT_COLUMNS: [&str; 2] = ["node_id", "edge_count"];

/// Endpoint columns compared by default when selecting by node
pub const ENDPOINT_COLUMNS: [&str; 2] = ["subject_id", "object_id"];

fn empty_triples() -> TabularResult {
    TabularResult::new(TRIPLE_COLUMNS)
}

// ============================================================================
// Selection by node
// ============================================================================

/// Triples where any of `id_columns` holds one of `node_ids`
pub fn subgraph_by_nodes(
    triples: &TabularResult,
    node_ids: &[String],
    id_columns: &[&str],
) -> Result<TabularResult> {
    let missing: Vec<&str> = id_columns
        .iter()
        .copied()
        .filter(|c| !triples.has_column(c))
        .collect();
    if !missing.is_empty() {
        return Err(StrataError::SchemaMismatch(format!(
            "id columns not present in triples: {}",
            missing.join(", ")
        )));
    }

    let wanted: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
    let indices: Vec<usize> = id_columns
        .iter()
        .filter_map(|c| triples.column_index(c))
        .collect();

    Ok(triples.filter_rows(|row| {
        indices
            .iter()
            .any(|&i| wanted.contains(value_key(&row[i]).as_str()))
    }))
}

/// Triples within `depth` hops of `node_id`, ignoring edge direction
///
/// Each round collects edges touching the current frontier; the next
/// frontier is every endpoint not visited yet. Stops early when a round
/// finds no edges. Depth 0 yields an empty table.
pub fn neighborhood(triples: &TabularResult, node_id: &str, depth: usize) -> Result<TabularResult> {
    let subject = triples.require_column("subject_id")?;
    let object = triples.require_column("object_id")?;

    let mut frontier: HashSet<String> = HashSet::from([node_id.to_string()]);
    let mut visited: HashSet<String> = HashSet::new();
    let mut collected: Vec<usize> = Vec::new();

    for _ in 0..depth {
        let round: Vec<usize> = (0..triples.len())
            .filter(|&i| {
                let row = &triples.rows()[i];
                frontier.contains(&value_key(&row[subject]))
                    || frontier.contains(&value_key(&row[object]))
            })
            .collect();
        if round.is_empty() {
            break;
        }

        visited.extend(frontier.drain());
        for &i in &round {
            let row = &triples.rows()[i];
            for endpoint in [value_key(&row[subject]), value_key(&row[object])] {
                if !visited.contains(&endpoint) {
                    frontier.insert(endpoint);
                }
            }
        }
        collected.extend(round);
    }

    let columns = triples.columns().to_vec();
    let rows = collected
        .into_iter()
        .map(|i| triples.rows()[i].clone())
        .collect();
    let mut out = TabularResult::from_rows(columns, rows)?;
    out.dedup();
    Ok(out)
}

// ============================================================================
// Degree
// ============================================================================

/// Relationships touching each node, highest first
///
/// Takes the element table from `get_dataframe`. Nodes without edges are
/// included with a count of 0. Ties are ordered by node id ascending.
pub fn edge_counts(elements: &TabularResult) -> Result<TabularResult> {
    let mut out = TabularResult::new(EDGE_COUNT_COLUMNS);
    if elements.is_empty() {
        return Ok(out);
    }

    let kind = elements.require_column("element_type")?;
    let id = elements.require_column("element_id")?;
    let start = elements.require_column("start_node_id")?;
    let end = elements.require_column("end_node_id")?;

    let mut degree: HashMap<String, i64> = HashMap::new();
    for row in elements.rows() {
        if row[kind].as_str() != Some("relationship") {
            continue;
        }
        let from = value_key(&row[start]);
        let to = value_key(&row[end]);
        *degree.entry(from.clone()).or_default() += 1;
        if to != from {
            *degree.entry(to).or_default() += 1;
        }
    }

    let mut counts: Vec<(Value, i64)> = elements
        .rows()
        .iter()
        .filter(|r| r[kind].as_str() == Some("node") && !r[id].is_null())
        .map(|r| {
            let count = degree.get(&value_key(&r[id])).copied().unwrap_or(0);
            (r[id].clone(), count)
        })
        .collect();
    counts.sort_by(|(a_id, a), (b_id, b)| b.cmp(a).then_with(|| natural_cmp(a_id, b_id)));

    for (node_id, count) in counts {
        out.push_row(vec![node_id, Value::from(count)])?;
    }
    Ok(out)
}

fn degree_pairs(counts: &TabularResult) -> Result<Vec<(String, i64)>> {
    let node = counts.require_column("node_id")?;
    let count = counts.require_column("edge_count")?;
    Ok(counts
        .rows()
        .iter()
        .map(|r| (value_key(&r[node]), r[count].as_i64().unwrap_or(0)))
        .collect())
}

/// `best >= 1`, and `worst >= best` unless `worst` is -1
pub fn validate_rank_bounds(best: i64, worst: i64) -> Result<()> {
    if best < 1 {
        return Err(StrataError::ValidationFailure(format!(
            "best rank must be >= 1, got {best}"
        )));
    }
    if worst != -1 && worst < best {
        return Err(StrataError::ValidationFailure(format!(
            "worst rank must be >= best rank ({best}) or -1, got {worst}"
        )));
    }
    Ok(())
}

/// Node ids whose degree rank lies in `best..=worst`
///
/// Rank 1 is the highest degree. By default ranking is dense, so tied nodes
/// share a rank and the next distinct degree takes the next rank. With
/// `enforce_count` the (already sorted) rows are sliced by position instead,
/// returning exactly `worst - best + 1` nodes when enough exist. `worst`
/// of -1 means no upper bound.
pub fn ranked_degree_nodes(
    counts: &TabularResult,
    best: i64,
    worst: i64,
    enforce_count: bool,
) -> Result<Vec<String>> {
    validate_rank_bounds(best, worst)?;
    let pairs = degree_pairs(counts)?;

    if enforce_count {
        let start = usize::try_from(best - 1).unwrap_or(usize::MAX);
        let end = if worst == -1 {
            pairs.len()
        } else {
            usize::try_from(worst).unwrap_or(usize::MAX).min(pairs.len())
        };
        return Ok(pairs
            .into_iter()
            .take(end)
            .skip(start)
            .map(|(id, _)| id)
            .collect());
    }

    let mut ranked: Vec<(String, i64)> = Vec::with_capacity(pairs.len());
    let mut rank = 0i64;
    let mut last_degree: Option<i64> = None;
    for (id, degree) in pairs {
        if last_degree != Some(degree) {
            rank += 1;
            last_degree = Some(degree);
        }
        ranked.push((id, rank));
    }

    let worst = if worst == -1 { rank } else { worst };
    Ok(ranked
        .into_iter()
        .filter(|(_, r)| (best..=worst).contains(r))
        .map(|(id, _)| id)
        .collect())
}

/// Node ids with `min <= degree <= max`; `max` of -1 means no upper bound
pub fn degree_range_nodes(counts: &TabularResult, min: i64, max: i64) -> Result<Vec<String>> {
    if min < 0 {
        return Err(StrataError::ValidationFailure(format!(
            "minimum degree must be >= 0, got {min}"
        )));
    }
    if max != -1 && max < min {
        return Err(StrataError::ValidationFailure(format!(
            "maximum degree must be >= minimum ({min}) or -1, got {max}"
        )));
    }

    Ok(degree_pairs(counts)?
        .into_iter()
        .filter(|(_, d)| *d >= min && (max == -1 || *d <= max))
        .map(|(id, _)| id)
        .collect())
}

// ============================================================================
// Random walks
// ============================================================================

/// Triples visited by directed random walks
///
/// Each walk picks a start uniformly from the `start_nodes` that have
/// outgoing edges (any node with outgoing edges when none do), then follows
/// up to `walk_length` random outgoing edges, stopping at dead ends.
pub fn random_walk<R>(
    triples: &TabularResult,
    start_nodes: &[String],
    walk_length: usize,
    num_walks: usize,
    rng: &mut R,
) -> Result<TabularResult>
where
    R: Rng + ?Sized,
{
    let subject = triples.require_column("subject_id")?;
    let relation = triples.require_column("relation_id")?;
    let object = triples.require_column("object_id")?;

    let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
    let mut subjects: Vec<String> = Vec::new();
    for (i, row) in triples.rows().iter().enumerate() {
        let key = value_key(&row[subject]);
        outgoing
            .entry(key.clone())
            .or_insert_with(|| {
                subjects.push(key);
                Vec::new()
            })
            .push(i);
    }

    let mut out = empty_triples();
    if outgoing.is_empty() {
        return Ok(out);
    }

    let mut starts: Vec<String> = start_nodes
        .iter()
        .filter(|n| outgoing.contains_key(n.as_str()))
        .cloned()
        .collect();
    if starts.is_empty() {
        tracing::debug!("no start node has outgoing edges, walking from any subject");
        starts = subjects;
    }

    for _ in 0..num_walks {
        let Some(mut current) = starts.choose(rng).cloned() else {
            break;
        };
        for _ in 0..walk_length {
            let Some(&edge) = outgoing.get(&current).and_then(|edges| edges.choose(rng)) else {
                break;
            };
            let row = &triples.rows()[edge];
            out.push_row(vec![
                row[subject].clone(),
                row[relation].clone(),
                row[object].clone(),
            ])?;
            current = value_key(&row[object]);
        }
    }

    out.dedup();
    Ok(out)
}

// ============================================================================
// Communities
// ============================================================================

fn community_of(row: &[Value], id_col: Option<usize>, list_col: Option<usize>) -> Option<i64> {
    if let Some(id) = id_col.and_then(|i| row[i].as_i64()) {
        return Some(id);
    }
    list_col
        .and_then(|i| row[i].as_array())
        .and_then(|levels| levels.last())
        .and_then(Value::as_i64)
}

/// Id triples whose endpoints both belong to `community_id`
///
/// Takes the pivoted property table. Uses `community_id` when present and
/// otherwise the final level of `community_list`.
pub fn community_subgraph(properties: &TabularResult, community_id: i64) -> Result<TabularResult> {
    let n1_id = properties.column_index("n1.community_id");
    let n1_list = properties.column_index("n1.community_list");
    let n2_id = properties.column_index("n2.community_id");
    let n2_list = properties.column_index("n2.community_list");
    if n1_id.is_none() && n1_list.is_none() {
        return Err(StrataError::SchemaMismatch(
            "no community assignment found; community detection has not run".to_string(),
        ));
    }

    let members = properties.filter_rows(|row| {
        community_of(row, n1_id, n1_list) == Some(community_id)
            && community_of(row, n2_id, n2_list) == Some(community_id)
    });
    if members.is_empty() {
        tracing::warn!(community_id, "no triples found for community");
    }
    triples_from_properties(&members)
}

/// Rename the pivoted element ids to an id triple table
pub fn triples_from_properties(properties: &TabularResult) -> Result<TabularResult> {
    let (_, rows) = properties
        .select(&["n1.element_id", "r.element_id", "n2.element_id"])?
        .into_parts();
    TabularResult::from_rows(TRIPLE_COLUMNS.iter().map(|c| c.to_string()).collect(), rows)
}
