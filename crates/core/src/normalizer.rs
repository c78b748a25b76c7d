use crate::sql_text::{canonical_select_sql, token_spans};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub base_query: String,
    pub page_size: usize,
}

/// Turns raw editor text into a base query plus the page size it implies.
///
/// A trailing `LIMIT <n>` (the last two whitespace-separated tokens, keyword
/// matched case-insensitively) is stripped and, when `n` is a positive
/// integer, becomes the page size. Anything else keeps `current_page_size`.
/// The rest of the text is kept byte for byte.
///
/// Detection is purely token based: a final `LIMIT` token that actually sits
/// inside a string literal is stripped too.
#[must_use]
pub fn normalize_query_text(raw: &str, current_page_size: usize) -> NormalizedQuery {
    let text = raw.trim().trim_end_matches(';').trim_end();
    let spans = token_spans(text);
    let mut page_size = current_page_size.max(1);

    let cut_at = match spans.as_slice() {
        [.., (offset, keyword), (_, argument)] if keyword.eq_ignore_ascii_case("LIMIT") => {
            if let Some(requested) = parse_positive(argument) {
                page_size = requested;
            }
            Some(*offset)
        }
        [.., (offset, keyword)] if keyword.eq_ignore_ascii_case("LIMIT") => Some(*offset),
        _ => None,
    };

    let base = match cut_at {
        Some(offset) => text[..offset].trim_end(),
        None => text,
    };
    let base_query = if base.is_empty() {
        canonical_select_sql()
    } else {
        base.to_string()
    };

    NormalizedQuery {
        base_query,
        page_size,
    }
}

/// Parses user-typed text as a strictly positive integer.
#[must_use]
pub fn parse_positive(text: &str) -> Option<usize> {
    text.trim().parse::<usize>().ok().filter(|value| *value > 0)
}
