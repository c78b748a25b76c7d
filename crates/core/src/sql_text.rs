//! String-level helpers for the handful of query shapes the viewer composes.
//!
//! None of this parses SQL. Every helper either builds a fresh statement around
//! an opaque query string or inspects whitespace-separated tokens.

/// Table name under which the executor exposes the open source.
pub const SOURCE_TABLE: &str = "t";

const PAGE_WINDOW_ALIAS: &str = "page_window";
const COUNT_WINDOW_ALIAS: &str = "count_window";

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[must_use]
pub fn canonical_select_sql() -> String {
    format!("SELECT * FROM {SOURCE_TABLE}")
}

#[must_use]
pub fn paged_query_sql(base_query: &str, limit: usize, offset: usize) -> String {
    format!("SELECT * FROM ({base_query}) AS {PAGE_WINDOW_ALIAS} LIMIT {limit} OFFSET {offset}")
}

#[must_use]
pub fn count_query_sql(base_query: &str) -> String {
    format!("SELECT COUNT(*) AS row_count FROM ({base_query}) AS {COUNT_WINDOW_ALIAS}")
}

/// Splits a paged query built by [`paged_query_sql`] back into its parts.
#[must_use]
pub fn parse_paged_query_sql(sql: &str) -> Option<(&str, usize, usize)> {
    let inner = sql.strip_prefix("SELECT * FROM (")?;
    let marker = format!(") AS {PAGE_WINDOW_ALIAS} LIMIT ");
    let split_at = inner.rfind(&marker)?;
    let base = &inner[..split_at];
    let mut tail = inner[split_at + marker.len()..].split_whitespace();
    let limit = tail.next()?.parse().ok()?;
    if !tail.next()?.eq_ignore_ascii_case("OFFSET") {
        return None;
    }
    let offset = tail.next()?.parse().ok()?;
    if tail.next().is_some() {
        return None;
    }
    Some((base, limit, offset))
}

#[must_use]
pub fn is_canonical_select(sql: &str) -> bool {
    let tokens = sql
        .trim()
        .trim_end_matches(';')
        .split_whitespace()
        .map(str::to_ascii_uppercase)
        .collect::<Vec<_>>();
    tokens.len() == 4
        && tokens[0] == "SELECT"
        && tokens[1] == "*"
        && tokens[2] == "FROM"
        && is_source_reference(&tokens[3])
}

/// Accepts `t`, `"t"` and upper-cased variants.
#[must_use]
pub fn is_source_reference(token: &str) -> bool {
    let unquoted = token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(token);
    unquoted.eq_ignore_ascii_case(SOURCE_TABLE)
}

#[must_use]
pub fn has_from_clause(sql: &str) -> bool {
    sql.split_whitespace()
        .any(|token| token.eq_ignore_ascii_case("FROM"))
}

/// Whitespace-separated tokens of `sql` with their byte offsets, so callers
/// can cut the original text without rebuilding it.
#[must_use]
pub fn token_spans(sql: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (index, ch) in sql.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(begin)) => {
                spans.push((begin, &sql[begin..index]));
                start = None;
            }
            (false, None) => start = Some(index),
            _ => {}
        }
    }
    if let Some(begin) = start {
        spans.push((begin, &sql[begin..]));
    }
    spans
}

/// Removes the last `ORDER BY ...` tail, matched case-insensitively.
#[must_use]
pub fn strip_trailing_order_by(sql: &str) -> &str {
    let spans = token_spans(sql);
    let position = spans.windows(2).rposition(|pair| {
        pair[0].1.eq_ignore_ascii_case("ORDER") && pair[1].1.eq_ignore_ascii_case("BY")
    });
    match position {
        Some(index) if index > 0 => sql[..spans[index].0].trim_end(),
        _ => sql,
    }
}
