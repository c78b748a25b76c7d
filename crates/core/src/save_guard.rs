use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use thiserror::Error;

use crate::sql_text::is_source_reference;

/// Why a full rewrite from the current query could lose or reshape data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionRisk {
    MultiStatement,
    NotASelect(String),
    PartialProjection(String),
    DifferentSource(String),
    Filtered,
    Aggregated,
    Joined,
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionAssessment {
    pub statement_count: usize,
    pub risks: Vec<ProjectionRisk>,
    pub normalized_sql: String,
}

impl ProjectionAssessment {
    #[must_use]
    pub fn is_full_projection(&self) -> bool {
        self.risks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveDecision {
    Proceed {
        assessment: ProjectionAssessment,
    },
    RequireConfirmation {
        token: ConfirmationToken,
        assessment: ProjectionAssessment,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaveGuardError {
    #[error("save confirmation is invalid or was already used")]
    InvalidToken,
    #[error("save confirmation was issued for a different query")]
    QueryMismatch,
}

#[derive(Debug, Clone)]
struct PendingConfirmation {
    query_fingerprint: u64,
}

/// Gates full-table saves behind a single-use confirmation whenever the
/// active query is not the plain full projection of the source.
#[derive(Debug, Default)]
pub struct SaveGuard {
    enabled: bool,
    nonce: u64,
    pending_confirmations: HashMap<String, PendingConfirmation>,
}

impl SaveGuard {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.pending_confirmations.clear();
        }
    }

    pub fn evaluate(&mut self, query: &str) -> SaveDecision {
        let assessment = assess_projection(query);
        if !self.enabled || assessment.is_full_projection() {
            return SaveDecision::Proceed { assessment };
        }

        self.nonce = self.nonce.saturating_add(1);
        let fingerprint = fingerprint_query(&assessment.normalized_sql);
        let token_string = format!("save-{}-{fingerprint:016x}", self.nonce);
        self.pending_confirmations.insert(
            token_string.clone(),
            PendingConfirmation {
                query_fingerprint: fingerprint,
            },
        );

        SaveDecision::RequireConfirmation {
            token: ConfirmationToken(token_string),
            assessment,
        }
    }

    pub fn confirm(&mut self, token: &ConfirmationToken, query: &str) -> Result<(), SaveGuardError> {
        let Some(pending) = self.pending_confirmations.remove(token.as_str()) else {
            return Err(SaveGuardError::InvalidToken);
        };

        let assessment = assess_projection(query);
        if pending.query_fingerprint != fingerprint_query(&assessment.normalized_sql) {
            return Err(SaveGuardError::QueryMismatch);
        }

        Ok(())
    }
}

/// Token-level check that `query` is `SELECT * FROM t`, optionally ordered.
#[must_use]
pub fn assess_projection(query: &str) -> ProjectionAssessment {
    let statements = split_statements(query);
    let statement_count = statements.len();
    let mut risks = Vec::new();

    if statement_count > 1 {
        risks.push(ProjectionRisk::MultiStatement);
    }

    if let Some(statement) = statements.first() {
        assess_statement(statement, &mut risks);
    } else {
        risks.push(ProjectionRisk::Unrecognized(String::new()));
    }

    let normalized_sql = statements
        .iter()
        .map(|statement| statement.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("; ");

    ProjectionAssessment {
        statement_count,
        risks,
        normalized_sql,
    }
}

fn assess_statement(statement: &str, risks: &mut Vec<ProjectionRisk>) {
    let tokens = statement.split_whitespace().collect::<Vec<_>>();
    let upper = tokens
        .iter()
        .map(|token| token.to_ascii_uppercase())
        .collect::<Vec<_>>();

    let Some(keyword) = upper.first() else {
        risks.push(ProjectionRisk::Unrecognized(String::new()));
        return;
    };
    if keyword != "SELECT" {
        risks.push(ProjectionRisk::NotASelect(keyword.clone()));
        return;
    }

    let Some(from_index) = upper.iter().position(|token| token == "FROM") else {
        risks.push(ProjectionRisk::PartialProjection(tokens[1..].join(" ")));
        return;
    };

    let projection = &tokens[1..from_index];
    if projection != ["*"] {
        risks.push(ProjectionRisk::PartialProjection(projection.join(" ")));
    }

    let Some(source) = tokens.get(from_index + 1) else {
        risks.push(ProjectionRisk::DifferentSource(String::new()));
        return;
    };
    if !is_source_reference(source) {
        risks.push(ProjectionRisk::DifferentSource((*source).to_string()));
    }

    let rest = &upper[from_index + 2..];
    match rest {
        [] => {}
        [order, by, ordering @ ..] if order == "ORDER" && by == "BY" => {
            if let Some(token) = ordering.iter().find(|token| is_narrowing_keyword(token)) {
                risks.push(ProjectionRisk::Unrecognized(token.clone()));
            }
        }
        [first, ..] if first == "WHERE" => risks.push(ProjectionRisk::Filtered),
        [first, ..] if first == "GROUP" || first == "HAVING" => {
            risks.push(ProjectionRisk::Aggregated);
        }
        [first, ..] if first.ends_with("JOIN") || first == "," || is_join_qualifier(first) => {
            risks.push(ProjectionRisk::Joined);
        }
        [first, ..] => risks.push(ProjectionRisk::Unrecognized(first.clone())),
    }

    if rest.iter().any(|token| token == "GROUP")
        && !risks.contains(&ProjectionRisk::Aggregated)
    {
        risks.push(ProjectionRisk::Aggregated);
    }
}

/// Keywords that cut rows when they follow `ORDER BY`.
fn is_narrowing_keyword(token: &str) -> bool {
    matches!(
        token,
        "LIMIT" | "OFFSET" | "FETCH" | "TOP" | "WHERE" | "HAVING" | "QUALIFY" | "SAMPLE"
    )
}

fn is_join_qualifier(token: &str) -> bool {
    matches!(
        token,
        "INNER" | "LEFT" | "RIGHT" | "FULL" | "CROSS" | "NATURAL"
    )
}

fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = sql.chars().peekable();

    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
                current.push(' ');
            }
            continue;
        }

        if in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
                current.push(' ');
            }
            continue;
        }

        if !in_single_quote && !in_double_quote {
            if ch == '-' && chars.peek() == Some(&'-') {
                chars.next();
                in_line_comment = true;
                continue;
            }

            if ch == '/' && chars.peek() == Some(&'*') {
                chars.next();
                in_block_comment = true;
                continue;
            }
        }

        match ch {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                current.push(ch);
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                current.push(ch);
            }
            ';' if !in_single_quote && !in_double_quote => {
                let statement = current.trim();
                if !statement.is_empty() {
                    statements.push(statement.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }

    statements
}

fn fingerprint_query(normalized_sql: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalized_sql.hash(&mut hasher);
    hasher.finish()
}
