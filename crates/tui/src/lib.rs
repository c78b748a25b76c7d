use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use parqview_adapters::export::export_page;
use parqview_adapters::parquet::ParquetExecutor;
use parqview_core::audit_trail::FileAuditTrail;
use parqview_core::executor::{CellValue, OutputFormat};
use parqview_core::pager::PagerState;
use parqview_core::save_guard::{ConfirmationToken, ProjectionRisk};
use parqview_core::session::{QuerySession, SaveOutcome, SessionError, SessionOptions};
use parqview_core::settings::FileSettingsStore;
use parqview_core::sort::SortKey;
use parqview_core::sql_text::is_canonical_select;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Tabs};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const MAX_COLUMN_WIDTH: usize = 24;
const MIN_COLUMN_WIDTH: usize = 4;
const MAX_RECENT_SHORTCUTS: usize = 9;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Everything the UI needs from the app crate.
pub struct TuiOptions {
    pub initial_sources: Vec<String>,
    pub settings: FileSettingsStore,
    pub audit: Option<FileAuditTrail>,
}

type Session = QuerySession<ParquetExecutor>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    Query,
    Command,
    GoToPage,
    PageSize,
    EditCell,
}

impl PromptKind {
    fn label(self) -> &'static str {
        match self {
            Self::Query => "SQL",
            Self::Command => ":",
            Self::GoToPage => "Go to page",
            Self::PageSize => "Page size",
            Self::EditCell => "Cell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Prompt {
    kind: PromptKind,
    buffer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    Text,
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextTab,
    CloseTab,
    BeginPrompt(PromptKind),
    InputChar(char),
    InputBackspace,
    InputSubmit,
    InputCancel,
    Confirm(bool),
    NextPage,
    PreviousPage,
    SortColumn,
    AddRow,
    DeleteRow,
    ResetView,
    Navigate(DirectionKey),
    OpenRecent(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Open(String),
    Save(Option<PathBuf>),
    Export(PathBuf),
    ExportPage(PathBuf),
    Quit,
}

fn parse_command(text: &str) -> Result<Command, String> {
    let trimmed = text.trim();
    let (name, argument) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (trimmed, ""),
    };
    let required = |usage: &str| {
        if argument.is_empty() {
            Err(format!("usage: {usage}"))
        } else {
            Ok(argument.to_string())
        }
    };

    match name {
        "open" | "o" => required("open <path>").map(Command::Open),
        "save" | "w" => Ok(Command::Save(
            (!argument.is_empty()).then(|| PathBuf::from(argument)),
        )),
        "export" => required("export <path>").map(|path| Command::Export(PathBuf::from(path))),
        "export-page" => {
            required("export-page <path>").map(|path| Command::ExportPage(PathBuf::from(path)))
        }
        "q" | "quit" => Ok(Command::Quit),
        "" => Err("empty command".to_string()),
        other => Err(format!("unknown command `{other}`")),
    }
}

struct Tab {
    session: Session,
    cursor_row: usize,
    cursor_column: usize,
}

impl Tab {
    fn new(session: Session) -> Self {
        Self {
            session,
            cursor_row: 0,
            cursor_column: 0,
        }
    }

    fn title(&self) -> String {
        let name = Path::new(self.session.source())
            .file_name()
            .map_or_else(
                || self.session.source().to_string(),
                |name| name.to_string_lossy().into_owned(),
            );
        if self.session.has_pending_edits() {
            format!("{name}*")
        } else {
            name
        }
    }

    fn clamp_cursor(&mut self) {
        let rows = self.session.edits().row_count();
        let columns = self.session.page().columns.len();
        self.cursor_row = self.cursor_row.min(rows.saturating_sub(1));
        self.cursor_column = self.cursor_column.min(columns.saturating_sub(1));
    }

    fn cursor_column_name(&self) -> Option<&str> {
        self.session
            .page()
            .columns
            .get(self.cursor_column)
            .map(String::as_str)
    }

    fn cursor_text(&self) -> String {
        self.session
            .working_rows()
            .get(self.cursor_row)
            .and_then(|row| row.get(self.cursor_column))
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

struct PendingSave {
    token: ConfirmationToken,
    destination: Option<PathBuf>,
    risks: Vec<ProjectionRisk>,
}

struct TuiApp {
    runtime: Runtime,
    settings: FileSettingsStore,
    audit: Option<FileAuditTrail>,
    tabs: Vec<Tab>,
    active_tab: usize,
    prompt: Option<Prompt>,
    pending_save: Option<PendingSave>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl TuiApp {
    fn new(settings: FileSettingsStore, audit: Option<FileAuditTrail>) -> Result<Self, TuiError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            settings,
            audit,
            tabs: Vec::new(),
            active_tab: 0,
            prompt: None,
            pending_save: None,
            show_help: false,
            should_quit: false,
            status_line: "Open a Parquet file with :open <path>".to_string(),
        })
    }

    fn input_mode(&self) -> InputMode {
        if self.pending_save.is_some() {
            InputMode::Confirm
        } else if self.prompt.is_some() {
            InputMode::Text
        } else {
            InputMode::Normal
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextTab => {
                if !self.tabs.is_empty() {
                    self.active_tab = (self.active_tab + 1) % self.tabs.len();
                    self.status_line = format!("Switched to {}", self.tabs[self.active_tab].title());
                }
            }
            Msg::CloseTab => self.close_tab(),
            Msg::BeginPrompt(kind) => self.begin_prompt(kind),
            Msg::InputChar(character) => {
                if let Some(prompt) = &mut self.prompt {
                    prompt.buffer.push(character);
                }
            }
            Msg::InputBackspace => {
                if let Some(prompt) = &mut self.prompt {
                    prompt.buffer.pop();
                }
            }
            Msg::InputCancel => {
                self.prompt = None;
                self.status_line = "Cancelled".to_string();
            }
            Msg::InputSubmit => {
                if let Some(prompt) = self.prompt.take() {
                    self.submit_prompt(prompt);
                }
            }
            Msg::Confirm(proceed) => self.resolve_confirmation(proceed),
            Msg::NextPage => self.replace_page("Next page", |runtime, session| {
                Ok(if runtime.block_on(session.next_page())? {
                    "Next page".to_string()
                } else {
                    "Already on the last page".to_string()
                })
            }),
            Msg::PreviousPage => self.replace_page("Previous page", |runtime, session| {
                Ok(if runtime.block_on(session.previous_page())? {
                    "Previous page".to_string()
                } else {
                    "Already on the first page".to_string()
                })
            }),
            Msg::SortColumn => self.sort_cursor_column(),
            Msg::AddRow => self.add_row(),
            Msg::DeleteRow => self.delete_row(),
            Msg::ResetView => self.replace_page("Reset", |runtime, session| {
                runtime.block_on(session.reset_view())?;
                Ok("View reset".to_string())
            }),
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::OpenRecent(index) => {
                let recent = self.settings.recent_sources().get(index).cloned();
                match recent {
                    Some(source) => self.open_source(&source),
                    None => self.status_line = format!("No recent file in slot {}", index + 1),
                }
            }
        }
    }

    fn begin_prompt(&mut self, kind: PromptKind) {
        let needs_tab = !matches!(kind, PromptKind::Command);
        let Some(tab) = self.tabs.get(self.active_tab) else {
            if needs_tab {
                self.status_line = "No file open; use :open <path>".to_string();
                return;
            }
            self.prompt = Some(Prompt {
                kind,
                buffer: String::new(),
            });
            return;
        };

        let buffer = match kind {
            PromptKind::Query => tab.session.query_text().to_string(),
            PromptKind::EditCell => {
                if tab.session.page().columns.is_empty() || tab.session.edits().row_count() == 0
                {
                    self.status_line = "No cell under the cursor".to_string();
                    return;
                }
                tab.cursor_text()
            }
            PromptKind::PageSize => tab.session.pager_state().page_size.to_string(),
            PromptKind::Command | PromptKind::GoToPage => String::new(),
        };
        self.prompt = Some(Prompt { kind, buffer });
    }

    fn submit_prompt(&mut self, prompt: Prompt) {
        let text = prompt.buffer;
        match prompt.kind {
            PromptKind::Command => self.run_command(&text),
            PromptKind::Query => self.replace_page("Query", |runtime, session| {
                runtime.block_on(session.run_query(&text))?;
                Ok(format!("{} rows", session.pager_state().total_rows))
            }),
            PromptKind::GoToPage => self.replace_page("Go to page", |runtime, session| {
                let page = runtime.block_on(session.go_to_page_text(&text))?;
                Ok(format!("Page {page}"))
            }),
            PromptKind::PageSize => self.replace_page("Page size", |runtime, session| {
                runtime.block_on(session.set_page_size_text(&text))?;
                Ok(format!("Page size {}", session.pager_state().page_size))
            }),
            PromptKind::EditCell => {
                let Some(tab) = self.tabs.get_mut(self.active_tab) else {
                    return;
                };
                self.status_line = match tab.session.record_edit(tab.cursor_row, tab.cursor_column, text)
                {
                    Ok(()) => "Cell edited (pending save)".to_string(),
                    Err(error) => format!("Edit rejected: {error}"),
                };
            }
        }
    }

    fn run_command(&mut self, text: &str) {
        let command = match parse_command(text) {
            Ok(command) => command,
            Err(message) => {
                self.status_line = message;
                return;
            }
        };

        match command {
            Command::Open(path) => self.open_source(&path),
            Command::Save(destination) => self.save(destination, None),
            Command::Export(destination) => self.export_all(&destination),
            Command::ExportPage(destination) => self.export_current_page(&destination),
            Command::Quit => self.should_quit = true,
        }
    }

    fn open_source(&mut self, source: &str) {
        if let Some(index) = self
            .tabs
            .iter()
            .position(|tab| tab.session.source() == source)
        {
            self.active_tab = index;
            self.status_line = format!("{source} is already open");
            return;
        }

        let options = SessionOptions {
            page_size: self.settings.settings().default_page_size,
            confirm_unsafe_save: self.settings.settings().confirm_unsafe_save,
            audit: self.audit.clone(),
        };
        let opened = self
            .runtime
            .block_on(QuerySession::open(ParquetExecutor::new(), source, options));
        match opened {
            Ok(session) => {
                let rows = session.pager_state().total_rows;
                self.tabs.push(Tab::new(session));
                self.active_tab = self.tabs.len() - 1;
                self.settings.push_recent(source);
                if let Err(error) = self.settings.persist() {
                    warn!(%error, "failed to persist recent sources");
                }
                info!(source, rows, "opened source");
                self.status_line = format!("Opened {source} ({rows} rows)");
            }
            Err(error) => self.status_line = format!("Open failed: {error}"),
        }
    }

    fn close_tab(&mut self) {
        if self.tabs.is_empty() {
            self.status_line = "No file open".to_string();
            return;
        }
        let closed = self.tabs.remove(self.active_tab);
        self.active_tab = self.active_tab.min(self.tabs.len().saturating_sub(1));
        self.status_line = if closed.session.has_pending_edits() {
            format!("Closed {} (pending edits discarded)", closed.title())
        } else {
            format!("Closed {}", closed.title())
        };
    }

    /// Runs an operation that replaces the displayed page and reports whether
    /// pending edits were dropped by it.
    fn replace_page(
        &mut self,
        label: &str,
        operation: impl FnOnce(&Runtime, &mut Session) -> Result<String, SessionError>,
    ) {
        let Some(tab) = self.tabs.get_mut(self.active_tab) else {
            self.status_line = "No file open; use :open <path>".to_string();
            return;
        };
        let had_pending = tab.session.has_pending_edits();
        match operation(&self.runtime, &mut tab.session) {
            Ok(message) => {
                let dropped = had_pending && !tab.session.has_pending_edits();
                tab.cursor_row = 0;
                tab.clamp_cursor();
                self.status_line = if dropped {
                    format!("{message} (pending edits discarded)")
                } else {
                    message
                };
            }
            Err(error) => self.status_line = format!("{label} failed: {error}"),
        }
    }

    fn sort_cursor_column(&mut self) {
        let Some(column) = self
            .tabs
            .get(self.active_tab)
            .and_then(Tab::cursor_column_name)
            .map(str::to_string)
        else {
            self.status_line = "No column under the cursor".to_string();
            return;
        };
        self.replace_page("Sort", |runtime, session| {
            let key = runtime.block_on(session.activate_sort(&column))?;
            Ok(format!("Sorted by {}", sort_label(key)))
        });
    }

    fn add_row(&mut self) {
        let Some(tab) = self.tabs.get_mut(self.active_tab) else {
            self.status_line = "No file open".to_string();
            return;
        };
        match tab.session.record_insert() {
            Ok(row) => {
                tab.cursor_row = row;
                self.status_line = "Row added (pending save)".to_string();
            }
            Err(error) => self.status_line = format!("Add row failed: {error}"),
        }
    }

    fn delete_row(&mut self) {
        let Some(tab) = self.tabs.get_mut(self.active_tab) else {
            self.status_line = "No file open".to_string();
            return;
        };
        match tab.session.record_delete(&[tab.cursor_row]) {
            Ok(_) => {
                tab.clamp_cursor();
                self.status_line = "Row deleted (pending save)".to_string();
            }
            Err(error) => self.status_line = format!("Delete failed: {error}"),
        }
    }

    fn save(&mut self, destination: Option<PathBuf>, token: Option<ConfirmationToken>) {
        let Some(tab) = self.tabs.get_mut(self.active_tab) else {
            self.status_line = "No file open".to_string();
            return;
        };
        let outcome = self
            .runtime
            .block_on(tab.session.save(destination.as_deref(), token.as_ref()));
        tab.clamp_cursor();
        match outcome {
            Ok(SaveOutcome::Saved {
                rows,
                destination,
                sorted_by,
            }) => {
                self.status_line = match sorted_by {
                    Some(key) => format!(
                        "Saved {rows} rows to {} in {} order",
                        destination.display(),
                        sort_label(&key)
                    ),
                    None => format!("Saved {rows} rows to {}", destination.display()),
                };
            }
            Ok(SaveOutcome::ConfirmationRequired { token, assessment }) => {
                self.pending_save = Some(PendingSave {
                    token,
                    destination,
                    risks: assessment.risks,
                });
                self.status_line = "Confirm the save: y to proceed, n to cancel".to_string();
            }
            Err(error) => self.status_line = format!("Save failed: {error}"),
        }
    }

    fn resolve_confirmation(&mut self, proceed: bool) {
        let Some(pending) = self.pending_save.take() else {
            return;
        };
        if proceed {
            self.save(pending.destination, Some(pending.token));
        } else {
            self.status_line = "Save cancelled; press r to reset the view first".to_string();
        }
    }

    fn export_all(&mut self, destination: &Path) {
        let Some(tab) = self.tabs.get(self.active_tab) else {
            self.status_line = "No file open".to_string();
            return;
        };
        let format = OutputFormat::from_path(destination);
        let exported = self
            .runtime
            .block_on(tab.session.export_all(destination, format));
        self.status_line = match exported {
            Ok(rows) => format!(
                "Exported {rows} rows as {} to {}",
                format.label(),
                destination.display()
            ),
            Err(error) => format!("Export failed: {error}"),
        };
    }

    fn export_current_page(&mut self, destination: &Path) {
        let Some(tab) = self.tabs.get(self.active_tab) else {
            self.status_line = "No file open".to_string();
            return;
        };
        let columns = &tab.session.page().columns;
        self.status_line = match export_page(destination, columns, &tab.session.working_rows()) {
            Ok(rows) => format!("Exported {rows} page rows to {}", destination.display()),
            Err(error) => format!("Page export failed: {error}"),
        };
    }

    fn navigate(&mut self, direction: DirectionKey) {
        let Some(tab) = self.tabs.get_mut(self.active_tab) else {
            return;
        };
        match direction {
            DirectionKey::Up => tab.cursor_row = tab.cursor_row.saturating_sub(1),
            DirectionKey::Down => tab.cursor_row += 1,
            DirectionKey::Left => tab.cursor_column = tab.cursor_column.saturating_sub(1),
            DirectionKey::Right => tab.cursor_column += 1,
        }
        tab.clamp_cursor();
    }
}

#[must_use]
pub fn ui_name() -> &'static str {
    "parqview-tui"
}

pub fn run(options: TuiOptions) -> Result<(), TuiError> {
    let mut app = TuiApp::new(options.settings, options.audit)?;
    for source in &options.initial_sources {
        app.open_source(source);
    }

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    loop {
        terminal.draw(|frame| render(frame, app))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.input_mode()) {
                        app.handle(message);
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn page_indicator(state: &PagerState) -> String {
    format!(
        "Page {}/{} | {} rows | {} per page",
        state.current_page, state.total_pages, state.total_rows, state.page_size
    )
}

fn sort_label(key: &SortKey) -> String {
    format!("{} {}", key.column, key.direction.arrow())
}

fn header_label(column: &str, sort_key: Option<&SortKey>) -> String {
    match sort_key {
        Some(key) if key.column == column => sort_label(key),
        _ => column.to_string(),
    }
}

fn cell_text(value: &CellValue) -> String {
    match value {
        CellValue::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn column_width(header: &str, rows: &[Vec<CellValue>], column: usize) -> usize {
    rows.iter()
        .filter_map(|row| row.get(column))
        .map(|value| cell_text(value).chars().count())
        .chain(std::iter::once(header.chars().count()))
        .max()
        .unwrap_or(MIN_COLUMN_WIDTH)
        .clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept = text.chars().take(width.saturating_sub(1)).collect::<String>();
    format!("{kept}~")
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(5),
        ])
        .split(frame.area());

    let titles = if app.tabs.is_empty() {
        vec![Line::from("no file open")]
    } else {
        app.tabs.iter().map(|tab| Line::from(tab.title())).collect()
    };
    let tabs = Tabs::new(titles)
        .select(app.active_tab)
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .block(Block::default().borders(Borders::ALL).title("parqview"));
    frame.render_widget(tabs, chunks[0]);

    match app.tabs.get(app.active_tab) {
        Some(tab) => render_tab(frame, chunks[1], tab),
        None => render_recent(frame, chunks[1], app.settings.recent_sources()),
    }

    render_footer(frame, chunks[2], app);

    if app.show_help {
        render_help_popup(frame);
    }
    if let Some(pending) = &app.pending_save {
        render_confirm_popup(frame, pending);
    }
}

fn render_tab(frame: &mut Frame<'_>, area: Rect, tab: &Tab) {
    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)])
        .split(area);

    let schema_lines = tab
        .session
        .schema()
        .iter()
        .map(|column| {
            Line::from(vec![
                Span::raw(column.name.clone()),
                Span::styled(
                    format!("  {}", column.data_type),
                    Style::default().fg(Color::DarkGray),
                ),
            ])
        })
        .collect::<Vec<_>>();
    let schema = Paragraph::new(schema_lines)
        .block(Block::default().borders(Borders::ALL).title("Schema"))
        .alignment(Alignment::Left);
    frame.render_widget(schema, panes[0]);

    let session = &tab.session;
    let page = session.page();
    let rows = session.working_rows();
    let sort_key = session.sort_key();

    let max_visible = usize::from(panes[1].width / 10).max(1);
    let first_column = tab.cursor_column.saturating_sub(max_visible - 1);
    let visible = (first_column..page.columns.len())
        .take(max_visible)
        .collect::<Vec<_>>();

    let widths = visible
        .iter()
        .map(|&column| {
            let header = header_label(&page.columns[column], sort_key);
            let width = column_width(&header, &rows, column);
            Constraint::Length(u16::try_from(width).unwrap_or(u16::MAX))
        })
        .collect::<Vec<_>>();

    let header = Row::new(
        visible
            .iter()
            .map(|&column| {
                let label = header_label(&page.columns[column], sort_key);
                Cell::from(truncate(&label, MAX_COLUMN_WIDTH))
            })
            .collect::<Vec<_>>(),
    )
    .style(Style::default().add_modifier(Modifier::BOLD));

    let body = rows
        .iter()
        .enumerate()
        .map(|(row_index, row)| {
            let inserted = session.edits().is_inserted(row_index);
            let cells = visible
                .iter()
                .map(|&column| {
                    let value = row.get(column).unwrap_or(&CellValue::Null);
                    let mut style = if value.is_null() {
                        Style::default().fg(Color::DarkGray)
                    } else {
                        Style::default()
                    };
                    if inserted {
                        style = style.fg(Color::Green);
                    }
                    if session.edits().is_edited(row_index, column) {
                        style = style.fg(Color::Yellow);
                    }
                    if row_index == tab.cursor_row && column == tab.cursor_column {
                        style = style.add_modifier(Modifier::REVERSED);
                    }
                    Cell::from(truncate(&cell_text(value), MAX_COLUMN_WIDTH)).style(style)
                })
                .collect::<Vec<_>>();
            Row::new(cells)
        })
        .collect::<Vec<_>>();

    let title = format!(
        "Rows {}-{}",
        page.first_row_index + 1,
        page.first_row_index + rows.len()
    );
    let table = Table::new(body, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(Style::default().bg(Color::Rgb(40, 40, 40)));
    let mut state = TableState::default().with_selected(Some(tab.cursor_row));
    frame.render_stateful_widget(table, panes[1], &mut state);
}

fn render_recent(frame: &mut Frame<'_>, area: Rect, recent: &[String]) {
    let mut lines = vec![
        Line::from("No file open."),
        Line::from(":open <path> opens a Parquet file."),
        Line::from(""),
    ];
    if recent.is_empty() {
        lines.push(Line::from("No recent files."));
    } else {
        lines.push(Line::from("Recent files:"));
        for (index, source) in recent.iter().take(MAX_RECENT_SHORTCUTS).enumerate() {
            lines.push(Line::from(format!("  {}  {source}", index + 1)));
        }
    }
    let body = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Welcome"))
        .alignment(Alignment::Left);
    frame.render_widget(body, area);
}

fn render_footer(frame: &mut Frame<'_>, area: Rect, app: &TuiApp) {
    let tab = app.tabs.get(app.active_tab);
    let input_line = match (&app.prompt, tab) {
        (Some(prompt), _) => Line::from(vec![
            Span::styled(
                format!("{} ", prompt.kind.label()),
                Style::default().fg(Color::Cyan),
            ),
            Span::raw(prompt.buffer.clone()),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ]),
        (None, Some(tab)) => Line::from(format!("SQL {}", tab.session.query_text())),
        (None, None) => Line::from(""),
    };
    let pager_line = tab.map_or_else(
        || Line::from(""),
        |tab| {
            let mut text = page_indicator(&tab.session.pager_state());
            if let Some(key) = tab.session.sort_key() {
                text.push_str(&format!(" | sorted by {}", sort_label(key)));
            }
            if !is_canonical_select(tab.session.query_text()) {
                text.push_str(" | custom query");
            }
            if tab.session.has_pending_edits() {
                text.push_str(" | pending edits");
            }
            Line::from(text)
        },
    );
    let footer = Paragraph::new(vec![
        input_line,
        pager_line,
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("? for help"));
    frame.render_widget(footer, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Keys"),
        Line::from("q: quit    ?: toggle help"),
        Line::from("Tab: next file    Ctrl+W: close file"),
        Line::from("/: edit SQL (Enter runs, trailing LIMIT n sets page size)"),
        Line::from("n / p: next / previous page    g: go to page    z: page size"),
        Line::from("s: sort by cursor column (again to flip)"),
        Line::from("Enter: edit cell    a: add row    d: delete row"),
        Line::from("r: reset view    arrows or hjkl: move cursor"),
        Line::from("1-9: open recent file"),
        Line::from(""),
        Line::from("Commands"),
        Line::from(":open <path>    :save [path]"),
        Line::from(":export <path.parquet|path.csv>    :export-page <path.csv|.csv.gz|.json>"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn render_confirm_popup(frame: &mut Frame<'_>, pending: &PendingSave) {
    let area = centered_rect(60, 30, frame.area());
    frame.render_widget(Clear, area);
    let mut lines = vec![
        Line::from("The active query is not SELECT * FROM t."),
        Line::from("Saving rewrites the whole file from this view:"),
    ];
    lines.extend(
        pending
            .risks
            .iter()
            .map(|risk| Line::from(format!("  - {}", risk_text(risk)))),
    );
    lines.push(Line::from(""));
    lines.push(Line::from("y: save anyway    n: cancel"));
    let popup = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Confirm save"),
    );
    frame.render_widget(popup, area);
}

fn risk_text(risk: &ProjectionRisk) -> String {
    match risk {
        ProjectionRisk::MultiStatement => "more than one statement".to_string(),
        ProjectionRisk::NotASelect(keyword) => format!("`{keyword}` is not a SELECT"),
        ProjectionRisk::PartialProjection(projection) => {
            format!("selects `{projection}` instead of every column")
        }
        ProjectionRisk::DifferentSource(source) => format!("reads from `{source}`"),
        ProjectionRisk::Filtered => "filtered rows would be dropped".to_string(),
        ProjectionRisk::Aggregated => "rows are aggregated".to_string(),
        ProjectionRisk::Joined => "joins other data".to_string(),
        ProjectionRisk::Unrecognized(token) => format!("unrecognized clause `{token}`"),
    }
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, mode: InputMode) -> Option<Msg> {
    match mode {
        InputMode::Confirm => match key.code {
            KeyCode::Char('y' | 'Y') => Some(Msg::Confirm(true)),
            KeyCode::Char('n' | 'N') | KeyCode::Esc => Some(Msg::Confirm(false)),
            _ => None,
        },
        InputMode::Text => match key.code {
            KeyCode::Enter => Some(Msg::InputSubmit),
            KeyCode::Esc => Some(Msg::InputCancel),
            KeyCode::Backspace => Some(Msg::InputBackspace),
            KeyCode::Char(character) => Some(Msg::InputChar(character)),
            _ => None,
        },
        InputMode::Normal => map_normal_key(key),
    }
}

fn map_normal_key(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('w')) => Some(Msg::CloseTab),
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Char('q')) => Some(Msg::Quit),
        (_, KeyCode::Char('?')) => Some(Msg::ToggleHelp),
        (_, KeyCode::Tab) => Some(Msg::NextTab),
        (_, KeyCode::Char('/')) => Some(Msg::BeginPrompt(PromptKind::Query)),
        (_, KeyCode::Char(':')) => Some(Msg::BeginPrompt(PromptKind::Command)),
        (_, KeyCode::Char('g')) => Some(Msg::BeginPrompt(PromptKind::GoToPage)),
        (_, KeyCode::Char('z')) => Some(Msg::BeginPrompt(PromptKind::PageSize)),
        (_, KeyCode::Enter) => Some(Msg::BeginPrompt(PromptKind::EditCell)),
        (_, KeyCode::Char('n') | KeyCode::PageDown) => Some(Msg::NextPage),
        (_, KeyCode::Char('p') | KeyCode::PageUp) => Some(Msg::PreviousPage),
        (_, KeyCode::Char('s')) => Some(Msg::SortColumn),
        (_, KeyCode::Char('a')) => Some(Msg::AddRow),
        (_, KeyCode::Char('d')) => Some(Msg::DeleteRow),
        (_, KeyCode::Char('r')) => Some(Msg::ResetView),
        (_, KeyCode::Up | KeyCode::Char('k')) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down | KeyCode::Char('j')) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left | KeyCode::Char('h')) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right | KeyCode::Char('l')) => Some(Msg::Navigate(DirectionKey::Right)),
        (_, KeyCode::Char(digit @ '1'..='9')) => digit
            .to_digit(10)
            .and_then(|value| usize::try_from(value).ok())
            .map(|value| Msg::OpenRecent(value - 1)),
        _ => None,
    }
}
