//! Command splitting per dialect
//!
//! Divides a combined command string into independent statements without
//! parsing it:
//! - SQL: boundaries come from the `sqlparser` tokenizer, so `;` inside
//!   literals, quoted identifiers and comments never splits
//! - Document: lenient-JSON cleanup, then a string- and bracket-aware scan
//! - Graph: comment stripping, then a string-aware `;` split
//!
//! Empty input yields no statements. Unterminated strings or brackets flush
//! the trailing buffer as a final best-effort statement.

use crate::Dialect;
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

/// Split `command` into single statements for `dialect`
pub fn split(dialect: Dialect, command: &str) -> Vec<String> {
    if command.trim().is_empty() {
        return Vec::new();
    }
    match dialect {
        Dialect::Sql => split_sql(command),
        Dialect::Document => split_json(command),
        Dialect::Graph => split_cypher(command),
    }
}

/// True iff `command` holds exactly one statement
pub fn is_single(dialect: Dialect, command: &str) -> bool {
    split(dialect, command).len() == 1
}

fn push_trimmed(out: &mut Vec<String>, chunk: &str) {
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        out.push(chunk.to_string());
    }
}

// ============================================================================
// SQL
// ============================================================================

fn split_sql(command: &str) -> Vec<String> {
    let dialect = GenericDialect {};
    let tokens = match Tokenizer::new(&dialect, command).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(error = %e, "SQL tokenizer failed, treating input as one statement");
            let mut out = Vec::new();
            push_trimmed(&mut out, command);
            return out;
        }
    };

    let line_starts = line_starts(command);
    let mut out = Vec::new();
    let mut start = 0;
    let mut has_content = false;

    for tok in tokens {
        match tok.token {
            Token::SemiColon => {
                let end = byte_offset(command, &line_starts, &tok.location);
                if has_content {
                    push_trimmed(&mut out, &command[start..end]);
                }
                start = (end + 1).min(command.len());
                has_content = false;
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => has_content = true,
        }
    }

    if has_content {
        push_trimmed(&mut out, &command[start..]);
    }
    out
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

// Tokenizer locations are 1-based line and character column
fn byte_offset(text: &str, line_starts: &[usize], loc: &Location) -> usize {
    let line = (loc.line as usize).saturating_sub(1);
    let Some(&line_start) = line_starts.get(line) else {
        return text.len();
    };
    let column = (loc.column as usize).saturating_sub(1);
    text[line_start..]
        .char_indices()
        .nth(column)
        .map(|(i, _)| line_start + i)
        .unwrap_or(text.len())
}

// ============================================================================
// Document (JSON command objects)
// ============================================================================

fn split_json(command: &str) -> Vec<String> {
    let cleaned = drop_trailing_commas(&strip_json_noise(command));

    let mut out = Vec::new();
    let mut buf = String::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in cleaned.chars() {
        if let Some(q) = quote {
            buf.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                buf.push(c);
            }
            '{' | '[' => {
                depth += 1;
                buf.push(c);
            }
            '}' | ']' => {
                depth -= 1;
                buf.push(c);
            }
            ';' if depth <= 0 => {
                push_trimmed(&mut out, &buf);
                buf.clear();
                depth = 0;
            }
            _ => buf.push(c),
        }
    }

    if quote.is_some() || depth > 0 {
        tracing::debug!("unterminated document command, flushing trailing buffer");
    }
    push_trimmed(&mut out, &buf);
    out
}

/// Strip `/* */`, `//` and whole-line `#` comments, collapse whitespace runs
fn strip_json_noise(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut at_line_start = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).copied();
        if c == '/' && next == Some('*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
            push_space(&mut out);
            continue;
        }
        if (c == '/' && next == Some('/')) || (c == '#' && at_line_start) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c.is_whitespace() {
            at_line_start = at_line_start || c == '\n';
            push_space(&mut out);
        } else {
            at_line_start = false;
            if c == '"' || c == '\'' {
                quote = Some(c);
            }
            out.push(c);
        }
        i += 1;
    }

    out.trim().to_string()
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(' ') {
        out.push(' ');
    }
}

/// Drop a `,` that is followed only by whitespace and a closing bracket
fn drop_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        if c == ',' {
            let closes = chars[i + 1..]
                .iter()
                .find(|n| !n.is_whitespace())
                .map(|n| *n == '}' || *n == ']')
                .unwrap_or(false);
            if closes {
                continue;
            }
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Graph (Cypher)
// ============================================================================

fn split_cypher(command: &str) -> Vec<String> {
    let chars: Vec<char> = command.chars().collect();
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            buf.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' && q != '`' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).copied();
        match c {
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                buf.push(' ');
                continue;
            }
            '\'' | '"' | '`' => {
                quote = Some(c);
                buf.push(c);
            }
            ';' => {
                push_trimmed(&mut out, &buf);
                buf.clear();
            }
            _ => buf.push(c),
        }
        i += 1;
    }

    push_trimmed(&mut out, &buf);
    out
}
