use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::executor::{
    CellValue, ColumnInfo, ExecutorError, OutputFormat, ResultSet, TabularExecutor,
};
use crate::sql_text::{canonical_select_sql, parse_paged_query_sql, strip_trailing_order_by};

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub destination: PathBuf,
    pub format: OutputFormat,
}

#[derive(Debug, Default)]
struct FakeState {
    schema: Vec<ColumnInfo>,
    results: HashMap<String, ResultSet>,
    failures: HashMap<String, String>,
    write_failure: Option<String>,
    calls: Vec<String>,
    writes: Vec<WrittenTable>,
}

/// Serves registered result sets by base query.
///
/// Understands the pager's nested page query and the sort controller's
/// trailing `ORDER BY "<column>" ASC|DESC`, so only unsorted base queries
/// need registering.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    state: Mutex<FakeState>,
}

impl FakeExecutor {
    pub fn with_table(columns: &[(&str, &str)], rows: Vec<Vec<CellValue>>) -> Self {
        let schema = columns
            .iter()
            .map(|(name, data_type)| ColumnInfo::new(*name, *data_type))
            .collect::<Vec<_>>();
        let names = schema.iter().map(|column| column.name.clone()).collect();
        let executor = Self::default();
        {
            let mut state = executor.state.lock().expect("fake executor lock");
            state.schema = schema;
            state
                .results
                .insert(canonical_select_sql(), ResultSet::new(names, rows));
        }
        executor
    }

    pub fn register(&self, query: &str, result: ResultSet) {
        self.lock().results.insert(query.to_string(), result);
    }

    /// Registers `query` as the first `rows` rows of the source table.
    pub fn register_filter(&self, query: &str, rows: usize) {
        let source = self.source_table();
        let filtered = ResultSet::new(
            source.columns,
            source.rows.into_iter().take(rows).collect(),
        );
        self.register(query, filtered);
    }

    /// Registers `query` as the single `column` of the source table.
    pub fn register_projection(&self, query: &str, column: &str) {
        let source = self.source_table();
        let index = source.column_index(column).expect("projected column exists");
        let projected = ResultSet::new(
            vec![column.to_string()],
            source
                .rows
                .into_iter()
                .map(|row| vec![row[index].clone()])
                .collect(),
        );
        self.register(query, projected);
    }

    pub fn fail_on(&self, query: &str, message: &str) {
        self.lock()
            .failures
            .insert(query.to_string(), message.to_string());
    }

    pub fn fail_writes(&self, message: &str) {
        self.lock().write_failure = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn writes(&self) -> Vec<WrittenTable> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake executor lock")
    }

    fn source_table(&self) -> ResultSet {
        self.lock()
            .results
            .get(&canonical_select_sql())
            .cloned()
            .expect("source table registered")
    }

    fn resolve(&self, query: &str) -> Result<ResultSet, ExecutorError> {
        let mut state = self.lock();
        state.calls.push(query.to_string());

        if let Some((base, limit, offset)) = parse_paged_query_sql(query) {
            let full = resolve_base(&state, base)?;
            let rows = full.rows.into_iter().skip(offset).take(limit).collect();
            return Ok(ResultSet::new(full.columns, rows));
        }
        resolve_base(&state, query)
    }
}

fn resolve_base(state: &FakeState, query: &str) -> Result<ResultSet, ExecutorError> {
    if let Some(message) = state.failures.get(query) {
        return Err(ExecutorError::new(message.clone()));
    }
    if let Some(result) = state.results.get(query) {
        return Ok(result.clone());
    }

    let unsorted = strip_trailing_order_by(query);
    if unsorted != query {
        let mut result = resolve_base(state, unsorted)?;
        let clause = query[unsorted.len()..].trim();
        sort_by_clause(&mut result, clause)?;
        return Ok(result);
    }

    Err(ExecutorError::new(format!("no result registered for `{query}`")))
}

fn sort_by_clause(result: &mut ResultSet, clause: &str) -> Result<(), ExecutorError> {
    let spec = clause
        .strip_prefix("ORDER BY ")
        .ok_or_else(|| ExecutorError::new(format!("unsupported ordering `{clause}`")))?;
    let (column, direction) = spec
        .rsplit_once(' ')
        .ok_or_else(|| ExecutorError::new(format!("unsupported ordering `{clause}`")))?;
    let name = column.trim_matches('"').replace("\"\"", "\"");
    let index = result
        .column_index(&name)
        .ok_or_else(|| ExecutorError::new(format!("column `{name}` not found")))?;
    let descending = direction.eq_ignore_ascii_case("DESC");

    result.rows.sort_by(|left, right| {
        let ordering = compare_cells(&left[index], &right[index]);
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    Ok(())
}

fn compare_cells(left: &CellValue, right: &CellValue) -> Ordering {
    match (left, right) {
        (CellValue::Integer(left), CellValue::Integer(right)) => left.cmp(right),
        (CellValue::Float(left), CellValue::Float(right)) => left.total_cmp(right),
        (CellValue::Null, CellValue::Null) => Ordering::Equal,
        (CellValue::Null, _) => Ordering::Less,
        (_, CellValue::Null) => Ordering::Greater,
        (left, right) => left.to_string().cmp(&right.to_string()),
    }
}

#[async_trait]
impl TabularExecutor for FakeExecutor {
    async fn describe(&self, source: &str) -> Result<Vec<ColumnInfo>, ExecutorError> {
        let mut state = self.lock();
        state.calls.push(format!("describe {source}"));
        Ok(state.schema.clone())
    }

    async fn count(&self, query: &str) -> Result<u64, ExecutorError> {
        let result = self.resolve(query)?;
        Ok(result.len() as u64)
    }

    async fn execute(&self, query: &str) -> Result<ResultSet, ExecutorError> {
        self.resolve(query)
    }

    async fn write_full(
        &self,
        columns: &[String],
        rows: &[Vec<CellValue>],
        destination: &Path,
        format: OutputFormat,
    ) -> Result<u64, ExecutorError> {
        let mut state = self.lock();
        if let Some(message) = &state.write_failure {
            return Err(ExecutorError::new(message.clone()));
        }
        state.writes.push(WrittenTable {
            columns: columns.to_vec(),
            rows: rows.to_vec(),
            destination: destination.to_path_buf(),
            format,
        });
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::FakeExecutor;
    use crate::executor::{CellValue, TabularExecutor};
    use crate::sql_text::paged_query_sql;

    #[tokio::test]
    async fn serves_pages_and_sorted_pages() {
        let executor = FakeExecutor::with_table(
            &[("id", "Int64")],
            (1..=5).map(|id| vec![CellValue::Integer(id)]).collect(),
        );
        let page = executor
            .execute(&paged_query_sql("SELECT * FROM t", 2, 2))
            .await
            .expect("page");
        assert_eq!(page.rows, vec![vec![CellValue::Integer(3)], vec![CellValue::Integer(4)]]);

        let sorted = executor
            .execute(&paged_query_sql("SELECT * FROM t ORDER BY \"id\" DESC", 1, 0))
            .await
            .expect("sorted page");
        assert_eq!(sorted.rows, vec![vec![CellValue::Integer(5)]]);
        assert_eq!(executor.count("SELECT * FROM t").await.expect("count"), 5);
    }
}
