//! Filter-string -> column-set extraction.
//!
//! PostgreSQL prints filter predicates as plain text, e.g.
//! `((lineitem.l_comment)::text = 'rare'::text)`. This module recovers the
//! ordered, deduplicated list of referenced columns and the top-level
//! logical connective (AND/OR) so the Analyzer can synthesise a canonical
//! index suggestion without ever inventing a column name.

use regex::Regex;
use std::sync::OnceLock;

/// The logical connective joining the conjuncts/disjuncts of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    /// All conjuncts must hold -> one composite index.
    And,
    /// Any disjunct may hold -> one index per disjunct.
    Or,
    /// Single predicate, no top-level connective.
    Single,
}

const RESERVED_WORDS: &[&str] = &[
    "and", "or", "not", "is", "null", "true", "false", "in", "like", "ilike", "between", "any",
    "all", "exists", "some",
];

fn reserved_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

fn comparison_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(<=|>=|<>|!=|=|<|>)").unwrap())
}

/// Strip one layer of balanced outer parentheses, repeatedly, then strip a
/// trailing `::<type>` cast suffix.
fn strip_casts_and_parens(input: &str) -> String {
    let mut s = input.trim().to_string();
    loop {
        let trimmed = s.trim();
        if trimmed.starts_with('(') && trimmed.ends_with(')') && is_balanced_wrap(trimmed) {
            s = trimmed[1..trimmed.len() - 1].trim().to_string();
        } else {
            break;
        }
    }
    strip_type_cast(&s)
}

/// True if the outermost `(` matches the outermost `)`, i.e. stripping them
/// leaves a balanced expression rather than cutting a sub-expression open.
fn is_balanced_wrap(s: &str) -> bool {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != s.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn strip_type_cast(s: &str) -> String {
    let s = s.trim();
    if let Some(idx) = s.rfind("::") {
        // Only strip if what follows looks like a type name (letters/digits,
        // optionally parenthesised precision like numeric(10,2)).
        let rest = &s[idx + 2..];
        let type_like = rest
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '(' || c == ')' || c == ',' || c == ' ');
        if type_like && !rest.is_empty() {
            return strip_casts_and_parens(&s[..idx]);
        }
    }
    s.to_string()
}

/// Split `s` on a top-level logical operator (outside any parentheses),
/// case-insensitively, returning the parts in order.
fn split_top_level<'a>(s: &'a str, op: &str) -> Vec<&'a str> {
    let bytes = s.as_bytes();
    let op_lower = op.to_lowercase();
    let mut depth = 0i32;
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 {
            let remainder = &s[i..];
            let lower = remainder.to_lowercase();
            if lower.starts_with(&op_lower) {
                let before_ok = i == 0 || s.as_bytes()[i - 1] == b' ';
                let after_idx = i + op_lower.len();
                let after_ok = after_idx >= bytes.len() || bytes[after_idx] == b' ';
                if before_ok && after_ok {
                    parts.push(s[start..i].trim());
                    start = i + op_lower.len();
                    i = start;
                    continue;
                }
            }
        }
        i += 1;
    }
    parts.push(s[start..].trim());
    parts
}

/// Extract the left-hand identifier of the first comparison operator in a
/// single conjunct/disjunct, discarding reserved words.
fn extract_column(conjunct: &str) -> Option<String> {
    let stripped = strip_casts_and_parens(conjunct);
    let caps = comparison_pattern().find(&stripped)?;
    let lhs = stripped[..caps.start()].trim();
    let lhs = strip_casts_and_parens(lhs);

    // Take the last dotted segment: `lineitem.l_comment` -> `l_comment`.
    let ident = lhs.rsplit('.').next().unwrap_or(&lhs).trim();
    let ident = ident.trim_matches(|c: char| c == '"' || c == '\'');

    if ident.is_empty() || !reserved_pattern().is_match(ident) {
        return None;
    }
    if RESERVED_WORDS.contains(&ident.to_lowercase().as_str()) {
        return None;
    }
    Some(ident.to_string())
}

/// Parse a PostgreSQL filter-predicate string into an ordered, deduplicated
/// column list plus the top-level connective. Returns an empty list (not an
/// error) when no comparison can be recovered -- the Analyzer never raises.
pub fn extract_columns(filter: &str) -> (Vec<String>, Connective) {
    let normalised = strip_casts_and_parens(filter);

    let or_parts = split_top_level(&normalised, "or");
    let (connective, parts) = if or_parts.len() > 1 {
        (Connective::Or, or_parts)
    } else {
        let and_parts = split_top_level(&normalised, "and");
        if and_parts.len() > 1 {
            (Connective::And, and_parts)
        } else {
            (Connective::Single, vec![normalised.as_str()])
        }
    };

    let mut seen = std::collections::HashSet::new();
    let mut columns = Vec::new();
    for part in parts {
        if let Some(col) = extract_column(part) {
            if seen.insert(col.clone()) {
                columns.push(col);
            }
        }
    }
    (columns, connective)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_type_cast_and_parens() {
        let (cols, conn) = extract_columns("((lineitem.l_comment)::text = 'rare'::text)");
        assert_eq!(cols, vec!["l_comment".to_string()]);
        assert_eq!(conn, Connective::Single);
    }

    #[test]
    fn splits_top_level_and() {
        let (cols, conn) =
            extract_columns("(o_custkey = 123) AND (o_orderstatus = 'F'::bpchar)");
        assert_eq!(cols, vec!["o_custkey".to_string(), "o_orderstatus".to_string()]);
        assert_eq!(conn, Connective::And);
    }

    #[test]
    fn splits_top_level_or() {
        let (cols, conn) =
            extract_columns("(o_custkey = 123) OR (o_orderpriority = '1-URGENT'::text)");
        assert_eq!(cols, vec!["o_custkey".to_string(), "o_orderpriority".to_string()]);
        assert_eq!(conn, Connective::Or);
    }

    #[test]
    fn does_not_split_inside_nested_parens() {
        let (cols, conn) = extract_columns("(a = 1) AND (b = 2 OR c = 3)");
        // top-level connective is AND; the OR is nested and not split here.
        assert_eq!(conn, Connective::And);
        assert_eq!(cols[0], "a");
    }

    #[test]
    fn malformed_filter_yields_empty_list_not_error() {
        let (cols, _) = extract_columns("***garbage***");
        assert!(cols.is_empty());
    }

    #[test]
    fn dotted_identifier_takes_last_segment() {
        let (cols, _) = extract_columns("users.email = 'a@b.com'");
        assert_eq!(cols, vec!["email".to_string()]);
    }
}
