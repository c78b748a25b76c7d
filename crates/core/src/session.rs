use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit_trail::{
    unix_timestamp_millis, AuditOperation, AuditOutcome, AuditRecord, FileAuditTrail,
};
use crate::edits::{EditError, GridEditReconciler, ReconcileError};
use crate::executor::{CellValue, ColumnInfo, ExecutorError, OutputFormat, TabularExecutor};
use crate::normalizer::{normalize_query_text, parse_positive};
use crate::pager::{Pager, PagerState, DEFAULT_PAGE_SIZE};
use crate::save_guard::{
    ConfirmationToken, ProjectionAssessment, SaveDecision, SaveGuard, SaveGuardError,
};
use crate::sort::{SortController, SortKey};
use crate::sql_text::canonical_select_sql;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("page size must be a positive integer, got `{0}`")]
    InvalidPageSize(String),
    #[error("page number must be a positive integer, got `{0}`")]
    InvalidPageNumber(String),
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error(transparent)]
    Edit(#[from] EditError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("{0}")]
    Query(#[source] ExecutorError),
    #[error("write failed: {0}")]
    Sink(#[source] ExecutorError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    SaveGuard(#[from] SaveGuardError),
    #[error("save needs the source columns {expected:?} but the view returns {found:?}; reset the view first")]
    UnsafeColumns {
        expected: Vec<String>,
        found: Vec<String>,
    },
}

impl From<EditError> for SessionError {
    fn from(error: EditError) -> Self {
        Self::Input(InputError::Edit(error))
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub page_size: usize,
    pub confirm_unsafe_save: bool,
    pub audit: Option<FileAuditTrail>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            confirm_unsafe_save: true,
            audit: None,
        }
    }
}

/// The rows last fetched for display, before any pending edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayedPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub first_row_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// `sorted_by` is the active sort key, if any: the file now holds its
    /// rows in that order.
    Saved {
        rows: u64,
        destination: PathBuf,
        sorted_by: Option<SortKey>,
    },
    ConfirmationRequired {
        token: ConfirmationToken,
        assessment: ProjectionAssessment,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ViewState {
    query_text: String,
    sort: SortController,
    pager: Pager,
}

impl ViewState {
    fn base_query(&self) -> String {
        self.sort.apply(&self.query_text)
    }
}

/// One open data source: its schema, the active view and the pending edits
/// against the displayed page.
///
/// Every operation that runs a query works on a copy of the view and only
/// commits it once the executor calls succeed, so a failed query leaves the
/// previous page, pager and sort untouched. Any operation that replaces the
/// displayed page discards pending edits.
pub struct QuerySession<E> {
    source: String,
    executor: E,
    schema: Vec<ColumnInfo>,
    view: ViewState,
    page: DisplayedPage,
    edits: GridEditReconciler,
    guard: SaveGuard,
    audit: Option<FileAuditTrail>,
}

impl<E: TabularExecutor> QuerySession<E> {
    /// Describes `source`, counts it and fetches the first page.
    pub async fn open(
        executor: E,
        source: impl Into<String>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            source: source.into(),
            executor,
            schema: Vec::new(),
            view: ViewState {
                query_text: canonical_select_sql(),
                sort: SortController::new(),
                pager: Pager::new(options.page_size),
            },
            page: DisplayedPage::default(),
            edits: GridEditReconciler::default(),
            guard: SaveGuard::new(options.confirm_unsafe_save),
            audit: options.audit,
        };

        let started = Instant::now();
        debug!(source = %session.source, "describing source");
        match session.executor.describe(&session.source).await {
            Ok(schema) => session.schema = schema,
            Err(error) => {
                session.record_audit(
                    AuditOperation::Open,
                    AuditOutcome::Failed,
                    "",
                    None,
                    started,
                    Some(error.to_string()),
                );
                return Err(SessionError::Query(error));
            }
        }

        let candidate = session.view.clone();
        session.load(candidate, true, AuditOperation::Open).await?;
        Ok(session)
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    #[must_use]
    pub fn schema(&self) -> &[ColumnInfo] {
        &self.schema
    }

    /// The user's query without the sort clause.
    #[must_use]
    pub fn query_text(&self) -> &str {
        &self.view.query_text
    }

    #[must_use]
    pub fn base_query(&self) -> String {
        self.view.base_query()
    }

    #[must_use]
    pub fn sort_key(&self) -> Option<&SortKey> {
        self.view.sort.key()
    }

    #[must_use]
    pub fn page(&self) -> &DisplayedPage {
        &self.page
    }

    #[must_use]
    pub fn edits(&self) -> &GridEditReconciler {
        &self.edits
    }

    /// Displayed rows with pending edits applied.
    #[must_use]
    pub fn working_rows(&self) -> Vec<Vec<CellValue>> {
        self.edits.working_rows()
    }

    #[must_use]
    pub fn has_pending_edits(&self) -> bool {
        self.edits.has_pending()
    }

    /// Pager state whose `total_rows` counts pending inserts and deletes.
    /// Page numbers and `has_next`/`has_previous` stay those of the committed
    /// result, matching what `next_page` and `previous_page` do.
    #[must_use]
    pub fn pager_state(&self) -> PagerState {
        self.view.pager.state_with_pending(self.edits.row_delta())
    }

    pub fn set_confirm_unsafe_save(&mut self, enabled: bool) {
        self.guard.set_enabled(enabled);
    }

    /// Normalizes `raw` into a new base query and shows its first page.
    ///
    /// A trailing `LIMIT n` becomes the page size. The active sort is dropped
    /// so any `ORDER BY` in the text applies as written.
    pub async fn run_query(&mut self, raw: &str) -> Result<(), SessionError> {
        let normalized = normalize_query_text(raw, self.view.pager.page_size());
        let mut candidate = self.view.clone();
        candidate.query_text = normalized.base_query;
        candidate.sort.clear();
        if !candidate.pager.set_page_size(normalized.page_size) {
            candidate.pager.reset();
        }
        self.load(candidate, true, AuditOperation::Query).await
    }

    pub async fn activate_sort(&mut self, column: &str) -> Result<&SortKey, SessionError> {
        if !self.page.columns.iter().any(|name| name == column) {
            return Err(InputError::UnknownColumn(column.to_string()).into());
        }
        let mut candidate = self.view.clone();
        candidate.sort.on_column_activated(column);
        candidate.pager.reset();
        self.load(candidate, true, AuditOperation::Sort).await?;
        self.view
            .sort
            .key()
            .ok_or_else(|| InputError::UnknownColumn(column.to_string()).into())
    }

    /// Returns `false` without querying when already on the last page.
    pub async fn next_page(&mut self) -> Result<bool, SessionError> {
        let mut candidate = self.view.clone();
        if !candidate.pager.next() {
            return Ok(false);
        }
        self.load(candidate, false, AuditOperation::Navigate).await?;
        Ok(true)
    }

    /// Returns `false` without querying when already on the first page.
    pub async fn previous_page(&mut self) -> Result<bool, SessionError> {
        let mut candidate = self.view.clone();
        if !candidate.pager.previous() {
            return Ok(false);
        }
        self.load(candidate, false, AuditOperation::Navigate).await?;
        Ok(true)
    }

    /// Clamps `page` into range and always redisplays.
    pub async fn go_to_page(&mut self, page: usize) -> Result<usize, SessionError> {
        let mut candidate = self.view.clone();
        candidate.pager.go_to(page);
        self.load(candidate, false, AuditOperation::Navigate).await?;
        Ok(self.view.pager.current_page())
    }

    /// Accepts `3` as well as the `3/10` form shown in the page indicator.
    pub async fn go_to_page_text(&mut self, text: &str) -> Result<usize, SessionError> {
        let requested = text.split('/').next().unwrap_or_default();
        let page = parse_positive(requested)
            .ok_or_else(|| InputError::InvalidPageNumber(text.trim().to_string()))?;
        self.go_to_page(page).await
    }

    pub async fn set_page_size(&mut self, page_size: usize) -> Result<(), SessionError> {
        let mut candidate = self.view.clone();
        if !candidate.pager.set_page_size(page_size) {
            return Err(InputError::InvalidPageSize(page_size.to_string()).into());
        }
        self.load(candidate, true, AuditOperation::PageSize).await
    }

    pub async fn set_page_size_text(&mut self, text: &str) -> Result<(), SessionError> {
        let page_size = parse_positive(text)
            .ok_or_else(|| InputError::InvalidPageSize(text.trim().to_string()))?;
        self.set_page_size(page_size).await
    }

    /// Back to the canonical select, unsorted, on page 1. Page size is kept.
    pub async fn reset_view(&mut self) -> Result<(), SessionError> {
        let mut candidate = self.view.clone();
        candidate.query_text = canonical_select_sql();
        candidate.sort.clear();
        candidate.pager.reset();
        self.load(candidate, true, AuditOperation::Query).await
    }

    /// Recounts and refetches the current page of the current view.
    pub async fn refresh(&mut self) -> Result<(), SessionError> {
        let candidate = self.view.clone();
        self.load(candidate, true, AuditOperation::Refresh).await
    }

    pub fn record_edit(
        &mut self,
        page_row: usize,
        column: usize,
        new_text: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.edits.record_edit(page_row, column, new_text)?;
        Ok(())
    }

    /// Adds an all-null row at the end of the displayed page.
    pub fn record_insert(&mut self) -> Result<usize, SessionError> {
        let at = self.edits.row_count();
        Ok(self.edits.record_insert(at)?)
    }

    pub fn record_delete(&mut self, page_rows: &[usize]) -> Result<usize, SessionError> {
        Ok(self.edits.record_delete(page_rows)?)
    }

    /// Rewrites the whole result with pending edits merged in.
    ///
    /// `destination` defaults to the source itself. When the active query is
    /// not the full projection of the source, the first call returns a
    /// confirmation token; calling again with that token proceeds. Columns
    /// must still match the source schema.
    ///
    /// An active sort does not need confirmation since every row is kept, but
    /// the rows are written in sorted order and the outcome says so.
    pub async fn save(
        &mut self,
        destination: Option<&Path>,
        confirmation: Option<&ConfirmationToken>,
    ) -> Result<SaveOutcome, SessionError> {
        let started = Instant::now();
        let base_query = self.view.base_query();
        let sorted_by = self.view.sort.key().cloned();

        match confirmation {
            Some(token) => self.guard.confirm(token, &self.view.query_text)?,
            None => {
                if let SaveDecision::RequireConfirmation { token, assessment } =
                    self.guard.evaluate(&self.view.query_text)
                {
                    info!(source = %self.source, risks = ?assessment.risks, "save needs confirmation");
                    self.record_audit(
                        AuditOperation::Save,
                        AuditOutcome::Blocked,
                        &base_query,
                        None,
                        started,
                        None,
                    );
                    return Ok(SaveOutcome::ConfirmationRequired { token, assessment });
                }
            }
        }

        let destination = destination.map_or_else(|| PathBuf::from(&self.source), Path::to_path_buf);
        let result = self.write_merged(&base_query, &destination).await;
        match result {
            Ok(rows) => {
                info!(source = %self.source, destination = %destination.display(), rows, "saved");
                self.record_audit(
                    AuditOperation::Save,
                    AuditOutcome::Succeeded,
                    &base_query,
                    Some(rows),
                    started,
                    None,
                );
                if let Err(error) = self.refresh().await {
                    warn!(%error, "refresh after save failed");
                    self.edits = GridEditReconciler::from_page(
                        self.page.columns.clone(),
                        self.page.rows.clone(),
                        self.page.first_row_index,
                    );
                }
                Ok(SaveOutcome::Saved {
                    rows,
                    destination,
                    sorted_by,
                })
            }
            Err(error) => {
                self.record_audit(
                    AuditOperation::Save,
                    AuditOutcome::Failed,
                    &base_query,
                    None,
                    started,
                    Some(error.to_string()),
                );
                Err(error)
            }
        }
    }

    /// Writes the full current view, pending edits included, without touching
    /// the session. No projection check applies.
    pub async fn export_all(
        &self,
        destination: &Path,
        format: OutputFormat,
    ) -> Result<u64, SessionError> {
        let started = Instant::now();
        let base_query = self.view.base_query();
        let merged = match self.edits.build_full_row_set(&self.executor, &base_query).await {
            Ok(merged) => merged,
            Err(error) => {
                self.record_audit(
                    AuditOperation::Export,
                    AuditOutcome::Failed,
                    &base_query,
                    None,
                    started,
                    Some(error.to_string()),
                );
                return Err(error.into());
            }
        };

        let written = self
            .executor
            .write_full(&merged.columns, &merged.rows, destination, format)
            .await;
        match written {
            Ok(rows) => {
                info!(
                    source = %self.source,
                    destination = %destination.display(),
                    format = format.label(),
                    rows,
                    "exported"
                );
                self.record_audit(
                    AuditOperation::Export,
                    AuditOutcome::Succeeded,
                    &base_query,
                    Some(rows),
                    started,
                    None,
                );
                Ok(rows)
            }
            Err(error) => {
                self.record_audit(
                    AuditOperation::Export,
                    AuditOutcome::Failed,
                    &base_query,
                    None,
                    started,
                    Some(error.to_string()),
                );
                Err(SessionError::Sink(error))
            }
        }
    }

    async fn write_merged(
        &self,
        base_query: &str,
        destination: &Path,
    ) -> Result<u64, SessionError> {
        let merged = self
            .edits
            .build_full_row_set(&self.executor, base_query)
            .await?;

        let expected = self
            .schema
            .iter()
            .map(|column| column.name.clone())
            .collect::<Vec<_>>();
        if merged.columns != expected {
            return Err(SessionError::UnsafeColumns {
                expected,
                found: merged.columns,
            });
        }

        let format = OutputFormat::from_path(destination);
        debug!(destination = %destination.display(), format = format.label(), rows = merged.len(), "writing full result");
        self.executor
            .write_full(&merged.columns, &merged.rows, destination, format)
            .await
            .map_err(SessionError::Sink)
    }

    async fn load(
        &mut self,
        mut candidate: ViewState,
        recount: bool,
        operation: AuditOperation,
    ) -> Result<(), SessionError> {
        let started = Instant::now();
        let base_query = candidate.base_query();
        match self.fetch(&mut candidate, &base_query, recount).await {
            Ok(page) => {
                self.record_audit(
                    operation,
                    AuditOutcome::Succeeded,
                    &base_query,
                    Some(candidate.pager.total_rows()),
                    started,
                    None,
                );
                self.edits = GridEditReconciler::from_page(
                    page.columns.clone(),
                    page.rows.clone(),
                    page.first_row_index,
                );
                self.view = candidate;
                self.page = page;
                Ok(())
            }
            Err(error) => {
                self.record_audit(
                    operation,
                    AuditOutcome::Failed,
                    &base_query,
                    None,
                    started,
                    Some(error.to_string()),
                );
                Err(SessionError::Query(error))
            }
        }
    }

    async fn fetch(
        &self,
        candidate: &mut ViewState,
        base_query: &str,
        recount: bool,
    ) -> Result<DisplayedPage, ExecutorError> {
        if recount {
            debug!(source = %self.source, query = base_query, "counting rows");
            let total_rows = self.executor.count(base_query).await?;
            candidate.pager.set_total_rows(total_rows);
        }

        let page_query = candidate.pager.page_query(base_query);
        debug!(source = %self.source, query = %page_query, "fetching page");
        let result = self.executor.execute(&page_query).await?;
        Ok(DisplayedPage {
            columns: result.columns,
            rows: result.rows,
            first_row_index: candidate.pager.offset(),
        })
    }

    fn record_audit(
        &self,
        operation: AuditOperation,
        outcome: AuditOutcome,
        sql: &str,
        rows: Option<u64>,
        started: Instant,
        error: Option<String>,
    ) {
        let Some(trail) = &self.audit else {
            return;
        };
        let record = AuditRecord {
            timestamp_unix_ms: unix_timestamp_millis(),
            source: self.source.clone(),
            operation,
            outcome,
            sql: sql.to_string(),
            rows,
            elapsed_ms: Some(started.elapsed().as_millis()),
            error,
        };
        if let Err(error) = trail.append(&record) {
            warn!(%error, path = %trail.path().display(), "failed to append audit record");
        }
    }
}
