use serde::{Deserialize, Serialize};

use crate::sql_text::{
    canonical_select_sql, has_from_clause, quote_identifier, strip_trailing_order_by,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    #[must_use]
    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    #[must_use]
    pub fn arrow(self) -> &'static str {
        match self {
            Self::Ascending => "▲",
            Self::Descending => "▼",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

/// Single-column click-to-sort state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortController {
    key: Option<SortKey>,
}

impl SortController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(&self) -> Option<&SortKey> {
        self.key.as_ref()
    }

    pub fn clear(&mut self) {
        self.key = None;
    }

    pub fn on_column_activated(&mut self, column: &str) -> &SortKey {
        let next = match self.key.take() {
            Some(SortKey {
                column: active,
                direction,
            }) if active == column => SortKey {
                column: active,
                direction: direction.flipped(),
            },
            _ => SortKey {
                column: column.to_string(),
                direction: SortDirection::Ascending,
            },
        };
        self.key.insert(next)
    }

    /// Folds the active key into `raw_base_query`.
    ///
    /// Any trailing `ORDER BY` in the input is replaced. Input without a
    /// detectable `FROM` is swapped for the canonical select first.
    #[must_use]
    pub fn apply(&self, raw_base_query: &str) -> String {
        let Some(key) = &self.key else {
            return raw_base_query.to_string();
        };

        let stripped = strip_trailing_order_by(raw_base_query.trim());
        let base = if has_from_clause(stripped) {
            stripped.to_string()
        } else {
            canonical_select_sql()
        };

        format!(
            "{base} ORDER BY {} {}",
            quote_identifier(&key.column),
            key.direction.sql_keyword()
        )
    }
}
