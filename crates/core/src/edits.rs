use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::executor::{CellValue, ExecutorError, ResultSet, TabularExecutor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("row {row} is outside the displayed page ({rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },
    #[error("column {column} is outside the result ({columns} columns)")]
    ColumnOutOfRange { column: usize, columns: usize },
    #[error("the displayed result has no columns")]
    NoColumns,
    #[error("no rows selected")]
    NothingSelected,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("full result query failed: {0}")]
    Query(#[source] ExecutorError),
    #[error("full result columns {found:?} no longer match the edited page columns {expected:?}")]
    ColumnsChanged {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("merged row {row} has {found} cells but the result has {expected} columns")]
    ColumnCountMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOrigin {
    Fetched { absolute: usize },
    Inserted,
}

#[derive(Debug, Clone, PartialEq)]
struct WorkingRow {
    origin: RowOrigin,
    cells: Vec<CellValue>,
    edits: BTreeMap<usize, String>,
}

impl WorkingRow {
    fn overlay(&self, mut cells: Vec<CellValue>) -> Vec<CellValue> {
        for (column, text) in &self.edits {
            if let Some(cell) = cells.get_mut(*column) {
                *cell = CellValue::from_edit_text(text);
            }
        }
        cells
    }
}

/// Working copy of the displayed page plus everything needed to replay it
/// onto the full base-query result.
///
/// Page-local row indices always refer to the working copy as currently
/// displayed, so they shift after inserts and deletes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridEditReconciler {
    columns: Vec<String>,
    page_offset: usize,
    rows: Vec<WorkingRow>,
    deleted: BTreeSet<usize>,
    inserted: usize,
}

impl GridEditReconciler {
    #[must_use]
    pub fn from_page(columns: Vec<String>, rows: Vec<Vec<CellValue>>, page_offset: usize) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, cells)| WorkingRow {
                origin: RowOrigin::Fetched {
                    absolute: page_offset + index,
                },
                cells,
                edits: BTreeMap::new(),
            })
            .collect();
        Self {
            columns,
            page_offset,
            rows,
            deleted: BTreeSet::new(),
            inserted: 0,
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.deleted.is_empty()
            || self.inserted > 0
            || self.rows.iter().any(|row| !row.edits.is_empty())
    }

    /// Net change in row count the pending inserts and deletes imply.
    #[must_use]
    pub fn row_delta(&self) -> i64 {
        let inserted = i64::try_from(self.inserted).unwrap_or(i64::MAX);
        let deleted = i64::try_from(self.deleted.len()).unwrap_or(i64::MAX);
        inserted - deleted
    }

    #[must_use]
    pub fn pending_cell_edits(&self) -> usize {
        self.rows.iter().map(|row| row.edits.len()).sum()
    }

    #[must_use]
    pub fn is_edited(&self, page_row: usize, column: usize) -> bool {
        self.rows
            .get(page_row)
            .is_some_and(|row| row.edits.contains_key(&column))
    }

    #[must_use]
    pub fn is_inserted(&self, page_row: usize) -> bool {
        self.rows
            .get(page_row)
            .is_some_and(|row| row.origin == RowOrigin::Inserted)
    }

    /// Absolute index of a page row in the full result, if it was fetched.
    #[must_use]
    pub fn absolute_index(&self, page_row: usize) -> Option<usize> {
        match self.rows.get(page_row)?.origin {
            RowOrigin::Fetched { absolute } => Some(absolute),
            RowOrigin::Inserted => None,
        }
    }

    /// The page as it should be displayed, edits applied.
    #[must_use]
    pub fn working_rows(&self) -> Vec<Vec<CellValue>> {
        self.rows
            .iter()
            .map(|row| row.overlay(row.cells.clone()))
            .collect()
    }

    pub fn record_edit(
        &mut self,
        page_row: usize,
        column: usize,
        new_text: impl Into<String>,
    ) -> Result<(), EditError> {
        let column_count = self.columns.len();
        if column >= column_count {
            return Err(EditError::ColumnOutOfRange {
                column,
                columns: column_count,
            });
        }
        let rows = self.rows.len();
        let row = self
            .rows
            .get_mut(page_row)
            .ok_or(EditError::RowOutOfRange { row: page_row, rows })?;
        row.edits.insert(column, new_text.into());
        Ok(())
    }

    /// Inserts an all-null row at `at_page_row` (clamped to the page end).
    pub fn record_insert(&mut self, at_page_row: usize) -> Result<usize, EditError> {
        if self.columns.is_empty() {
            return Err(EditError::NoColumns);
        }
        let position = at_page_row.min(self.rows.len());
        self.rows.insert(
            position,
            WorkingRow {
                origin: RowOrigin::Inserted,
                cells: vec![CellValue::Null; self.columns.len()],
                edits: BTreeMap::new(),
            },
        );
        self.inserted += 1;
        Ok(position)
    }

    /// Removes rows from the working page; returns how many were removed.
    pub fn record_delete(&mut self, page_rows: &[usize]) -> Result<usize, EditError> {
        let targets = page_rows.iter().copied().collect::<BTreeSet<_>>();
        if targets.is_empty() {
            return Err(EditError::NothingSelected);
        }
        let rows = self.rows.len();
        if let Some(&row) = targets.iter().find(|row| **row >= rows) {
            return Err(EditError::RowOutOfRange { row, rows });
        }

        for &page_row in targets.iter().rev() {
            let removed = self.rows.remove(page_row);
            match removed.origin {
                RowOrigin::Fetched { absolute } => {
                    self.deleted.insert(absolute);
                }
                RowOrigin::Inserted => self.inserted -= 1,
            }
        }
        Ok(targets.len())
    }

    /// Replays the working page onto the full result of `base_query`.
    ///
    /// Fetches every row of the base query, so cost grows with the whole
    /// result rather than with the page.
    pub async fn build_full_row_set<E>(
        &self,
        executor: &E,
        base_query: &str,
    ) -> Result<ResultSet, ReconcileError>
    where
        E: TabularExecutor + ?Sized,
    {
        let full = executor
            .execute(base_query)
            .await
            .map_err(ReconcileError::Query)?;
        self.merge_into(full)
    }

    pub fn merge_into(&self, full: ResultSet) -> Result<ResultSet, ReconcileError> {
        if full.columns != self.columns {
            return Err(ReconcileError::ColumnsChanged {
                expected: self.columns.clone(),
                found: full.columns,
            });
        }

        let original_len = full.rows.len();
        let mut overlays = BTreeMap::new();
        let mut inserted_before: BTreeMap<usize, Vec<Vec<CellValue>>> = BTreeMap::new();
        let mut tail = Vec::new();
        let mut anchor = self.page_offset;

        for row in &self.rows {
            match row.origin {
                RowOrigin::Fetched { absolute } => {
                    if absolute >= original_len {
                        tail.push(row.overlay(row.cells.clone()));
                    } else if !row.edits.is_empty() {
                        overlays.insert(absolute, row);
                    }
                    anchor = absolute + 1;
                }
                RowOrigin::Inserted => {
                    let cells = row.overlay(row.cells.clone());
                    if anchor < original_len {
                        inserted_before.entry(anchor).or_default().push(cells);
                    } else {
                        tail.push(cells);
                    }
                }
            }
        }

        let mut merged = Vec::with_capacity(original_len + self.inserted);
        for (index, cells) in full.rows.into_iter().enumerate() {
            if let Some(batch) = inserted_before.remove(&index) {
                merged.extend(batch);
            }
            if self.deleted.contains(&index) {
                continue;
            }
            match overlays.get(&index) {
                Some(row) => merged.push(row.overlay(cells)),
                None => merged.push(cells),
            }
        }
        merged.extend(tail);

        let expected = full.columns.len();
        if let Some((row, cells)) = merged
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != expected)
        {
            return Err(ReconcileError::ColumnCountMismatch {
                row,
                expected,
                found: cells.len(),
            });
        }

        Ok(ResultSet::new(full.columns, merged))
    }
}
