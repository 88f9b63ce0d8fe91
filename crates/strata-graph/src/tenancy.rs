//! Tag-based multi-tenancy for a single physical graph
//!
//! Neo4j Community has one graph per server, so logical databases and
//! graphs are emulated with a `(db, kg)` pair of properties on every node
//! and relationship. Each user statement is rewritten so that:
//! - node and fixed-length relationship patterns in `MATCH` filter on the
//!   active pair
//! - patterns in `CREATE` / `MERGE` stamp new elements with the pair
//! - write statements are followed by sweeps that tag anything the rewrite
//!   could not reach
//!
//! This scopes results by tag. It is not an isolation boundary: graph-wide
//! administrative operations still see every tenant.

use serde_json::{Map, Value};

/// Parameter holding the active `db` tag
pub const DB_PARAM: &str = "tenant_db";
/// Parameter holding the active `kg` tag
pub const KG_PARAM: &str = "tenant_kg";

/// Sweeps run after every write statement, in the same transaction
pub const SWEEP_STATEMENTS: [&str; 2] = [
    "MATCH (n) WHERE n.db IS NULL SET n.db = $tenant_db, n.kg = $tenant_kg",
    "MATCH ()-[r]->() WHERE r.db IS NULL SET r.db = $tenant_db, r.kg = $tenant_kg",
];

/// Active logical database and graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantScope {
    pub db: String,
    pub kg: String,
}

/// A user statement after rewriting
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedStatement {
    pub statement: String,
    pub parameters: Map<String, Value>,
    /// Statement contains a data-writing `CREATE` or `MERGE`
    pub writes: bool,
}

impl TenantScope {
    pub fn new(db: impl Into<String>, kg: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            kg: kg.into(),
        }
    }

    /// `$tenant_db` / `$tenant_kg` bindings for this scope
    pub fn parameters(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert(DB_PARAM.to_string(), Value::String(self.db.clone()));
        params.insert(KG_PARAM.to_string(), Value::String(self.kg.clone()));
        params
    }

    /// Rewrite one Cypher statement to filter on and stamp this scope
    pub fn rewrite(&self, statement: &str) -> ScopedStatement {
        let (statement, writes) = Rewriter::new(statement).run();
        ScopedStatement {
            statement,
            parameters: self.parameters(),
            writes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Match,
    Write,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Keyword,
    Ident,
    Punct(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Node,
    Relationship,
}

/// Words after `CREATE` that make it a schema or administration command
const SCHEMA_OBJECTS: &[&str] = &[
    "INDEX", "CONSTRAINT", "DATABASE", "COMPOSITE", "ALIAS", "USER", "ROLE", "OR",
];

/// Index kinds that may precede `INDEX`
const INDEX_KINDS: &[&str] = &["RANGE", "TEXT", "POINT", "FULLTEXT", "VECTOR", "LOOKUP", "BTREE"];

const CLAUSE_ENDS: &[&str] = &[
    "WHERE", "RETURN", "WITH", "SET", "DELETE", "DETACH", "REMOVE", "UNWIND", "ORDER", "SKIP",
    "LIMIT", "CALL", "YIELD", "FOREACH", "UNION", "ON", "LOAD", "USING",
];

struct Rewriter {
    chars: Vec<char>,
    out: String,
    clause: Clause,
    prev: Prev,
    last_keyword: String,
    writes: bool,
}

impl Rewriter {
    fn new(statement: &str) -> Self {
        Self {
            chars: statement.chars().collect(),
            out: String::with_capacity(statement.len() + 64),
            clause: Clause::Other,
            prev: Prev::Start,
            last_keyword: String::new(),
            writes: false,
        }
    }

    fn run(mut self) -> (String, bool) {
        let mut i = 0;
        while i < self.chars.len() {
            let c = self.chars[i];
            i = match c {
                '\'' | '"' | '`' => self.copy_quoted(i),
                c if c.is_alphabetic() || c == '_' => self.word(i),
                '(' if self.clause != Clause::Other && self.prev != Prev::Ident => {
                    self.pattern(i, Pattern::Node)
                }
                '[' if self.clause != Clause::Other
                    && matches!(self.prev, Prev::Punct('-') | Prev::Punct('<')) =>
                {
                    self.pattern(i, Pattern::Relationship)
                }
                c if c.is_whitespace() => {
                    self.out.push(c);
                    i + 1
                }
                c => {
                    self.out.push(c);
                    self.prev = Prev::Punct(c);
                    i + 1
                }
            };
        }
        (self.out, self.writes)
    }

    fn copy_quoted(&mut self, start: usize) -> usize {
        let end = skip_quoted(&self.chars, start);
        self.out.extend(&self.chars[start..end]);
        self.prev = if self.chars[start] == '`' {
            Prev::Ident
        } else {
            Prev::Punct('\'')
        };
        end
    }

    fn word(&mut self, start: usize) -> usize {
        let mut end = start;
        while end < self.chars.len() && (self.chars[end].is_alphanumeric() || self.chars[end] == '_')
        {
            end += 1;
        }
        let word: String = self.chars[start..end].iter().collect();
        self.out.push_str(&word);

        // Property keys, map keys, parameters and labels are never keywords
        let map_key = self.next_non_space(end) == Some(':');
        if map_key || matches!(self.prev, Prev::Punct('.') | Prev::Punct('$') | Prev::Punct(':')) {
            self.prev = Prev::Ident;
            return end;
        }

        let upper = word.to_ascii_uppercase();
        let after_on = self.last_keyword == "ON";
        match upper.as_str() {
            "MATCH" => {
                self.clause = if after_on { Clause::Other } else { Clause::Match };
                self.prev = Prev::Keyword;
            }
            "CREATE" if self.is_schema_command(end) => {
                self.clause = Clause::Other;
                self.prev = Prev::Keyword;
            }
            "CREATE" | "MERGE" => {
                if after_on {
                    self.clause = Clause::Other;
                } else {
                    self.clause = Clause::Write;
                    self.writes = true;
                }
                self.prev = Prev::Keyword;
            }
            "OPTIONAL" => self.prev = Prev::Keyword,
            kw if CLAUSE_ENDS.contains(&kw) => {
                self.clause = Clause::Other;
                self.prev = Prev::Keyword;
            }
            _ => {
                self.prev = Prev::Ident;
                return end;
            }
        }
        self.last_keyword = upper;
        end
    }

    fn next_non_space(&self, from: usize) -> Option<char> {
        self.chars[from..].iter().copied().find(|c| !c.is_whitespace())
    }

    /// Upper-cased words following `from`, up to `n`
    fn next_words(&self, from: usize, n: usize) -> Vec<String> {
        let mut words = Vec::with_capacity(n);
        let mut i = from;
        while words.len() < n {
            while i < self.chars.len() && self.chars[i].is_whitespace() {
                i += 1;
            }
            let start = i;
            while i < self.chars.len() && (self.chars[i].is_alphanumeric() || self.chars[i] == '_') {
                i += 1;
            }
            if start == i {
                break;
            }
            words.push(self.chars[start..i].iter().collect::<String>().to_ascii_uppercase());
        }
        words
    }

    /// `CREATE INDEX`, `CREATE TEXT INDEX`, `CREATE CONSTRAINT` and friends
    ///
    /// Schema commands cannot share a transaction with data writes, so they
    /// must not be followed by the tag sweeps.
    fn is_schema_command(&self, end: usize) -> bool {
        let words = self.next_words(end, 2);
        match words.as_slice() {
            [first, ..] if SCHEMA_OBJECTS.contains(&first.as_str()) => true,
            [kind, second] => INDEX_KINDS.contains(&kind.as_str()) && second == "INDEX",
            _ => false,
        }
    }

    fn pattern(&mut self, start: usize, kind: Pattern) -> usize {
        let (open, close) = match kind {
            Pattern::Node => ('(', ')'),
            Pattern::Relationship => ('[', ']'),
        };
        let Some(end) = matching_close(&self.chars, start, open, close) else {
            self.out.push(open);
            self.prev = Prev::Punct(open);
            return start + 1;
        };

        let inner: String = self.chars[start + 1..end].iter().collect();
        self.out.push(open);
        self.out.push_str(&inject(&inner, kind, self.clause));
        self.out.push(close);
        self.prev = Prev::Punct(close);
        end + 1
    }
}

/// Index just past the closing quote, or the end of input
fn skip_quoted(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if quote != '`' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

fn matching_close(chars: &[char], start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' => {
                i = skip_quoted(chars, i);
                continue;
            }
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Position of `target` at bracket depth 0 outside quotes
fn find_top_level(chars: &[char], target: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' | '`' => {
                i = skip_quoted(chars, i);
                continue;
            }
            c if c == target && depth == 0 => return Some(i),
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

/// Top-level keys of a map literal body (between the braces)
fn map_keys(body: &[char]) -> Vec<String> {
    let mut keys = Vec::new();
    let mut entry_start = 0;
    let mut depth = 0i32;
    let mut i = 0;
    let mut push_key = |entry: &[char]| {
        if let Some(colon) = find_top_level(entry, ':') {
            let key: String = entry[..colon].iter().collect();
            keys.push(key.trim().trim_matches('`').to_string());
        }
    };
    while i < body.len() {
        match body[i] {
            '\'' | '"' | '`' => {
                i = skip_quoted(body, i);
                continue;
            }
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            ',' if depth == 0 => {
                push_key(&body[entry_start..i]);
                entry_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    push_key(&body[entry_start..]);
    keys
}

fn is_bare_variable(inner: &str) -> bool {
    let trimmed = inner.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Add the tenant properties to the contents of one pattern
fn inject(inner: &str, kind: Pattern, clause: Clause) -> String {
    let chars: Vec<char> = inner.chars().collect();

    if kind == Pattern::Relationship && find_top_level(&chars, '*').is_some() {
        return inner.to_string();
    }
    // Bound variables cannot be redeclared in CREATE / MERGE
    if clause == Clause::Write && is_bare_variable(inner) {
        return inner.to_string();
    }

    if let Some(open) = find_top_level(&chars, '{') {
        let Some(close) = matching_close(&chars, open, '{', '}') else {
            return inner.to_string();
        };
        let keys = map_keys(&chars[open + 1..close]);
        let mut additions: Vec<&str> = Vec::new();
        if !keys.iter().any(|k| k == "db") {
            additions.push("db: $tenant_db");
        }
        if !keys.iter().any(|k| k == "kg") {
            additions.push("kg: $tenant_kg");
        }
        if additions.is_empty() {
            return inner.to_string();
        }

        let body: String = chars[open + 1..close].iter().collect();
        let head: String = chars[..=open].iter().collect();
        let tail: String = chars[close..].iter().collect();
        let joined = additions.join(", ");
        return if body.trim().is_empty() {
            format!("{head}{joined}{tail}")
        } else {
            format!("{head}{joined}, {}{tail}", body.trim_start())
        };
    }

    // Inline `WHERE` predicates follow the property map
    let upper = inner.to_ascii_uppercase();
    let split_at = upper.find(" WHERE ").unwrap_or(inner.len());
    let (pattern, predicate) = inner.split_at(split_at);
    let pattern = pattern.trim_end();
    let spacer = if pattern.is_empty() { "" } else { " " };
    format!("{pattern}{spacer}{{db: $tenant_db, kg: $tenant_kg}}{predicate}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(statement: &str) -> ScopedStatement {
        TenantScope::new("library", "novels").rewrite(statement)
    }

    const TAGS: &str = "{db: $tenant_db, kg: $tenant_kg}";

    #[test]
    fn test_match_nodes_are_scoped() {
        let out = rewrite("MATCH (n:Person) RETURN n");
        assert_eq!(out.statement, format!("MATCH (n:Person {TAGS}) RETURN n"));
        assert!(!out.writes);
        assert_eq!(out.parameters["tenant_db"], "library");
        assert_eq!(out.parameters["tenant_kg"], "novels");
    }

    #[test]
    fn test_existing_map_is_merged() {
        let out = rewrite("MATCH (a {name: 'x'})-[r:KNOWS]->(b) RETURN count(a)");
        assert_eq!(
            out.statement,
            format!(
                "MATCH (a {{db: $tenant_db, kg: $tenant_kg, name: 'x'}})-[r:KNOWS {TAGS}]->(b {TAGS}) RETURN count(a)"
            )
        );
    }

    #[test]
    fn test_bound_variables_untouched_in_create() {
        let out = rewrite("MATCH (a), (b) CREATE (a)-[:LIKES]->(b)");
        assert_eq!(
            out.statement,
            format!("MATCH (a {TAGS}), (b {TAGS}) CREATE (a)-[:LIKES {TAGS}]->(b)")
        );
        assert!(out.writes);
    }

    #[test]
    fn test_create_stamps_new_nodes() {
        let out = rewrite("CREATE (:Book {title: 'Dune'}), ()");
        assert_eq!(
            out.statement,
            format!("CREATE (:Book {{db: $tenant_db, kg: $tenant_kg, title: 'Dune'}}), ({TAGS})")
        );
    }

    #[test]
    fn test_literals_and_functions_untouched() {
        let out = rewrite("MATCH (n) WHERE n.name = '(x)' RETURN coalesce(n.title, \"[y]\")");
        assert_eq!(
            out.statement,
            format!("MATCH (n {TAGS}) WHERE n.name = '(x)' RETURN coalesce(n.title, \"[y]\")")
        );
    }

    #[test]
    fn test_on_create_is_not_a_pattern_clause() {
        let out = rewrite("MERGE (n:Tag {id: 1}) ON CREATE SET n.seen = timestamp()");
        assert!(out
            .statement
            .starts_with("MERGE (n:Tag {db: $tenant_db, kg: $tenant_kg, id: 1}) ON CREATE SET"));
        assert!(out.statement.ends_with("timestamp()"));
        assert!(out.writes);
    }

    #[test]
    fn test_variable_length_relationships_skipped() {
        let out = rewrite("MATCH (a)-[*1..3]-(b) RETURN b");
        assert_eq!(
            out.statement,
            format!("MATCH (a {TAGS})-[*1..3]-(b {TAGS}) RETURN b")
        );
    }

    #[test]
    fn test_explicit_tags_are_respected() {
        let out = rewrite("MATCH (n {db: 'other'}) RETURN n");
        assert_eq!(
            out.statement,
            "MATCH (n {kg: $tenant_kg, db: 'other'}) RETURN n"
        );
    }

    #[test]
    fn test_property_named_like_keyword() {
        let out = rewrite("MATCH (n) WHERE n.create = 1 RETURN n");
        assert!(!out.writes);
    }

    #[test]
    fn test_schema_commands_do_not_write() {
        for statement in [
            "CREATE INDEX person_name FOR (n:Person) ON (n.name)",
            "CREATE CONSTRAINT person_key FOR (n:Person) REQUIRE n.name IS UNIQUE",
            "CREATE TEXT INDEX person_bio IF NOT EXISTS FOR (n:Person) ON (n.bio)",
            "create fulltext index titles for (n:Book) on each [n.title]",
            "DROP INDEX person_name",
        ] {
            let out = rewrite(statement);
            assert!(!out.writes, "{statement}");
            assert_eq!(out.statement, statement);
        }
    }

    #[test]
    fn test_node_labelled_like_index_kind_still_writes() {
        let out = rewrite("CREATE (:Text {body: 'x'})");
        assert!(out.writes);
        assert!(out.statement.contains("db: $tenant_db"));
    }

    #[test]
    fn test_map_keys_named_like_keywords() {
        let out = rewrite("MATCH (n) RETURN n {.name, match: 1}, (n)--()");
        assert_eq!(
            out.statement,
            format!("MATCH (n {TAGS}) RETURN n {{.name, match: 1}}, (n)--()")
        );

        let out = rewrite("MATCH (n) RETURN {create: n.name, merge: 2} AS m");
        assert!(!out.writes);
    }

    #[test]
    fn test_subquery_match_is_scoped() {
        let out = rewrite("CALL { MATCH (n) RETURN n } RETURN n");
        assert_eq!(
            out.statement,
            format!("CALL {{ MATCH (n {TAGS}) RETURN n }} RETURN n")
        );
    }

    #[test]
    fn test_different_scopes_bind_different_parameters() {
        let a = TenantScope::new("db1", "kg").rewrite("MATCH (n) RETURN n");
        let b = TenantScope::new("db2", "kg").rewrite("MATCH (n) RETURN n");
        assert_eq!(a.statement, b.statement);
        assert_ne!(a.parameters, b.parameters);
    }
}
