use std::fs::File;
use std::path::{Path, PathBuf};

use parqview_adapters::export::export_page;
use parqview_adapters::parquet::ParquetExecutor;
use parqview_core::executor::{CellValue, OutputFormat};
use parqview_core::session::{QuerySession, SaveOutcome, SessionError, SessionOptions};
use parqview_core::sort::SortDirection;
use polars::prelude::{DataFrame, DataType, NamedFrom, ParquetWriter, Series, TimeUnit};
use tempfile::TempDir;

fn write_fixture(path: &Path, rows: i64) {
    let ids = (0..rows).collect::<Vec<_>>();
    let names = (0..rows)
        .map(|index| format!("row-{index}"))
        .collect::<Vec<_>>();
    let scores = (0..rows)
        .map(|index| if index % 4 == 0 { None } else { Some(index as f64 / 2.0) })
        .collect::<Vec<_>>();

    let frame: DataFrame = [
        Series::new("id".into(), ids),
        Series::new("name".into(), names),
        Series::new("score".into(), scores),
    ]
    .into_iter()
    .collect();
    write_frame(path, frame);
}

fn write_frame(path: &Path, mut frame: DataFrame) {
    let mut file = File::create(path).expect("fixture file should be created");
    ParquetWriter::new(&mut file)
        .finish(&mut frame)
        .expect("fixture should be written");
}

fn write_event_fixture(path: &Path) {
    let day = Series::new("day".into(), [Some(19_000_i32), None, Some(19_782)])
        .cast(&DataType::Date)
        .expect("days should cast to dates");
    let at = Series::new(
        "at".into(),
        [Some(1_700_000_000_000_i64), Some(1_709_208_000_250), None],
    )
    .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
    .expect("millis should cast to datetimes");
    let frame: DataFrame = [
        Series::new("id".into(), [1_i64, 2, 3]),
        day,
        at,
        Series::new("note".into(), ["", "kept", ""]),
    ]
    .into_iter()
    .collect();
    write_frame(path, frame);
}

fn fixture(temp_dir: &TempDir, rows: i64) -> PathBuf {
    let path = temp_dir.path().join("prices.parquet");
    write_fixture(&path, rows);
    path
}

async fn open(path: &Path, page_size: usize) -> QuerySession<ParquetExecutor> {
    QuerySession::open(
        ParquetExecutor::new(),
        path.display().to_string(),
        SessionOptions {
            page_size,
            ..SessionOptions::default()
        },
    )
    .await
    .expect("session should open")
}

#[tokio::test(flavor = "current_thread")]
async fn pages_through_a_parquet_file() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 23);
    let mut session = open(&path, 10).await;

    let names = session
        .schema()
        .iter()
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["id", "name", "score"]);

    let state = session.pager_state();
    assert_eq!(state.total_rows, 23);
    assert_eq!(state.total_pages, 3);
    assert_eq!(session.page().rows.len(), 10);

    session.go_to_page(3).await.expect("go to last page");
    assert_eq!(session.page().rows.len(), 3);
    assert_eq!(session.page().rows[0][0], CellValue::Integer(20));
    assert!(!session.next_page().await.expect("boundary is a no-op"));
}

#[tokio::test(flavor = "current_thread")]
async fn sorts_and_filters_through_sql() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 23);
    let mut session = open(&path, 10).await;

    session.activate_sort("id").await.expect("ascending sort");
    let key = session.activate_sort("id").await.expect("descending sort");
    assert_eq!(key.direction, SortDirection::Descending);
    assert_eq!(session.page().rows[0][0], CellValue::Integer(22));

    session
        .run_query("SELECT * FROM t WHERE id >= 5 LIMIT 4")
        .await
        .expect("filtered query");
    assert!(session.sort_key().is_none());
    let state = session.pager_state();
    assert_eq!(state.page_size, 4);
    assert_eq!(state.total_rows, 18);
    assert_eq!(state.total_pages, 5);
    assert_eq!(session.page().rows[0][0], CellValue::Integer(5));
}

#[tokio::test(flavor = "current_thread")]
async fn engine_errors_leave_the_view_intact() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 23);
    let mut session = open(&path, 10).await;
    session.next_page().await.expect("next page");

    let error = session
        .run_query("SELECT * FROM missing_table")
        .await
        .expect_err("unknown table should fail");
    assert!(matches!(error, SessionError::Query(_)));
    assert_eq!(session.pager_state().current_page, 2);
    assert_eq!(session.query_text(), "SELECT * FROM t");
    assert_eq!(session.page().rows[0][0], CellValue::Integer(10));
}

#[tokio::test(flavor = "current_thread")]
async fn saving_edits_rewrites_the_source_in_place() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 5);
    let mut session = open(&path, 2).await;

    session.next_page().await.expect("next page");
    session.record_edit(0, 1, "X").expect("edit name");
    session.record_edit(1, 2, "").expect("null score");
    let outcome = session.save(None, None).await.expect("save");
    assert!(matches!(outcome, SaveOutcome::Saved { rows: 5, .. }));
    assert!(!session.has_pending_edits());
    assert_eq!(session.page().rows[0][1], CellValue::Text("X".to_string()));

    let reopened = open(&path, 10).await;
    let rows = &reopened.page().rows;
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[2][1], CellValue::Text("X".to_string()));
    assert_eq!(rows[3][2], CellValue::Null);
    assert_eq!(rows[1][1], CellValue::Text("row-1".to_string()));
    assert_eq!(reopened.schema()[2].data_type, session.schema()[2].data_type);
}

#[tokio::test(flavor = "current_thread")]
async fn inserted_row_is_saved_to_a_new_file() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 5);
    let copy = temp_dir.path().join("copy.parquet");
    let mut session = open(&path, 2).await;

    session.go_to_page(3).await.expect("last page");
    let row = session.record_insert().expect("insert");
    session.record_edit(row, 0, "99").expect("edit id");
    session.save(Some(&copy), None).await.expect("save copy");

    let original = open(&path, 10).await;
    assert_eq!(original.pager_state().total_rows, 5);

    let saved = open(&copy, 10).await;
    assert_eq!(saved.pager_state().total_rows, 6);
    assert_eq!(
        saved.page().rows[5],
        vec![CellValue::Integer(99), CellValue::Null, CellValue::Null]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn uncoercible_edit_fails_without_touching_the_source() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 5);
    let before = std::fs::read(&path).expect("read fixture");
    let mut session = open(&path, 10).await;

    session.record_edit(0, 0, "not a number").expect("edit id");
    let error = session.save(None, None).await.expect_err("cast should fail");
    assert!(matches!(error, SessionError::Sink(_)));
    assert!(session.has_pending_edits());
    assert_eq!(std::fs::read(&path).expect("read source"), before);

    let leftovers = std::fs::read_dir(temp_dir.path())
        .expect("list temp dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test(flavor = "current_thread")]
async fn filtered_save_asks_for_confirmation_first() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 8);
    let mut session = open(&path, 10).await;
    session
        .run_query("SELECT * FROM t WHERE id < 3")
        .await
        .expect("filtered query");

    let SaveOutcome::ConfirmationRequired { token, .. } =
        session.save(None, None).await.expect("guarded save")
    else {
        panic!("filtered save should ask for confirmation");
    };
    session
        .save(None, Some(&token))
        .await
        .expect("confirmed save");

    let reopened = open(&path, 10).await;
    assert_eq!(reopened.pager_state().total_rows, 3);
}

#[tokio::test(flavor = "current_thread")]
async fn exports_full_view_and_current_page() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = fixture(&temp_dir, 7);
    let mut session = open(&path, 3).await;
    session.record_edit(0, 1, "edited").expect("edit");

    let csv_path = temp_dir.path().join("all.csv");
    let rows = session
        .export_all(&csv_path, OutputFormat::Csv)
        .await
        .expect("export all");
    assert_eq!(rows, 7);
    let exported = std::fs::read_to_string(&csv_path).expect("read export");
    assert!(exported.starts_with("id,name,score\n0,edited,"));
    assert_eq!(exported.lines().count(), 8);

    let page_path = temp_dir.path().join("page.json");
    let page = session.page();
    let written =
        export_page(&page_path, &page.columns, &session.working_rows()).expect("export page");
    assert_eq!(written, 3);
}

#[tokio::test(flavor = "current_thread")]
async fn untouched_empty_text_survives_a_save() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("events.parquet");
    write_event_fixture(&path);
    let mut session = open(&path, 10).await;
    assert_eq!(session.page().rows[0][3], CellValue::Text(String::new()));

    session.record_edit(1, 0, "20").expect("edit id");
    session.save(None, None).await.expect("save");

    let reopened = open(&path, 10).await;
    let notes = reopened
        .page()
        .rows
        .iter()
        .map(|row| row[3].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        notes,
        [
            CellValue::Text(String::new()),
            CellValue::Text("kept".to_string()),
            CellValue::Text(String::new()),
        ]
    );
    assert_eq!(reopened.page().rows[1][0], CellValue::Integer(20));
}

#[tokio::test(flavor = "current_thread")]
async fn date_and_datetime_columns_save_and_export() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("events.parquet");
    write_event_fixture(&path);
    let mut session = open(&path, 10).await;
    let types = session
        .schema()
        .iter()
        .map(|column| column.data_type.clone())
        .collect::<Vec<_>>();

    let first = &session.page().rows[0];
    assert_eq!(first[1], CellValue::Text("2022-01-08".to_string()));
    assert_eq!(first[2], CellValue::Text("2023-11-14 22:13:20".to_string()));
    assert_eq!(
        session.page().rows[1][2],
        CellValue::Text("2024-02-29 12:00:00.250".to_string())
    );

    session.record_edit(1, 1, "2024-03-01").expect("edit day");
    session
        .record_edit(2, 2, "2024-12-31T23:59:59")
        .expect("edit instant");
    session.save(None, None).await.expect("temporal save");

    let reopened = open(&path, 10).await;
    let reopened_types = reopened
        .schema()
        .iter()
        .map(|column| column.data_type.clone())
        .collect::<Vec<_>>();
    assert_eq!(reopened_types, types);
    let rows = &reopened.page().rows;
    assert_eq!(rows[0][1], CellValue::Text("2022-01-08".to_string()));
    assert_eq!(rows[1][1], CellValue::Text("2024-03-01".to_string()));
    assert_eq!(rows[2][1], CellValue::Text("2024-02-29".to_string()));
    assert_eq!(rows[0][2], CellValue::Text("2023-11-14 22:13:20".to_string()));
    assert_eq!(rows[1][2], CellValue::Text("2024-02-29 12:00:00.250".to_string()));
    assert_eq!(rows[2][2], CellValue::Text("2024-12-31 23:59:59".to_string()));

    let copy = temp_dir.path().join("events-copy.parquet");
    let exported = session
        .export_all(&copy, OutputFormat::Parquet)
        .await
        .expect("temporal export");
    assert_eq!(exported, 3);
}
