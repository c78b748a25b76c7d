use std::fmt::Display;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parqview_core::executor::{
    CellValue, ColumnInfo, ExecutorError, OutputFormat, ResultSet, TabularExecutor,
};
use parqview_core::sql_text::{count_query_sql, SOURCE_TABLE};
use polars::prelude::{
    AnyValue, CsvWriter, DataFrame, DataType, LazyFrame, NamedFrom, ParquetWriter, PlPath,
    Schema, SchemaRef, SerWriter, Series, TimeUnit,
};
use polars_sql::SQLContext;
use tempfile::NamedTempFile;
use tokio::task;
use tracing::debug;

struct RegisteredSource {
    path: PathBuf,
    schema: SchemaRef,
    frame: Option<LazyFrame>,
}

/// Runs SQL over one Parquet file with Polars.
///
/// The file is registered as table `t` and scanned lazily; the scan is
/// recreated on first use after the file has been rewritten. Engine work runs
/// on Tokio's blocking pool.
#[derive(Default)]
pub struct ParquetExecutor {
    source: Mutex<Option<RegisteredSource>>,
}

impl ParquetExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn frame(&self) -> Result<LazyFrame, ExecutorError> {
        let mut guard = self
            .source
            .lock()
            .map_err(|_| ExecutorError::new("source handle lock poisoned"))?;
        let registered = guard
            .as_mut()
            .ok_or_else(|| ExecutorError::new("no source is open"))?;
        if let Some(frame) = &registered.frame {
            return Ok(frame.clone());
        }

        debug!(path = %registered.path.display(), "rescanning source");
        let frame = scan(&registered.path)?;
        registered.frame = Some(frame.clone());
        Ok(frame)
    }

    fn source_schema(&self) -> Result<Option<SchemaRef>, ExecutorError> {
        let guard = self
            .source
            .lock()
            .map_err(|_| ExecutorError::new("source handle lock poisoned"))?;
        Ok(guard
            .as_ref()
            .map(|registered| Arc::clone(&registered.schema)))
    }

    fn invalidate_if_source(&self, destination: &Path) {
        let Ok(mut guard) = self.source.lock() else {
            return;
        };
        if let Some(registered) = guard.as_mut() {
            if same_file(&registered.path, destination) {
                registered.frame = None;
            }
        }
    }
}

#[async_trait]
impl TabularExecutor for ParquetExecutor {
    async fn describe(&self, source: &str) -> Result<Vec<ColumnInfo>, ExecutorError> {
        let path = PathBuf::from(source);
        if !path.is_file() {
            return Err(ExecutorError::new(format!("file not found: {source}")));
        }

        let scan_path = path.clone();
        let (frame, schema) = run_blocking(move || {
            let mut frame = scan(&scan_path)?;
            let schema = frame.collect_schema().map_err(engine_error)?;
            Ok((frame, schema))
        })
        .await?;

        let columns = schema
            .iter()
            .map(|(name, data_type)| ColumnInfo::new(name.as_str(), data_type.to_string()))
            .collect();

        let mut guard = self
            .source
            .lock()
            .map_err(|_| ExecutorError::new("source handle lock poisoned"))?;
        *guard = Some(RegisteredSource {
            path,
            schema,
            frame: Some(frame),
        });
        Ok(columns)
    }

    async fn count(&self, query: &str) -> Result<u64, ExecutorError> {
        let frame = self.frame()?;
        let sql = count_query_sql(query);
        run_blocking(move || {
            let counted = run_sql(frame, &sql)?;
            let value = counted
                .get_columns()
                .first()
                .ok_or_else(|| ExecutorError::new("count returned no columns"))?
                .get(0)
                .map_err(engine_error)?;
            value
                .extract::<u64>()
                .ok_or_else(|| ExecutorError::new(format!("count returned `{value}`")))
        })
        .await
    }

    async fn execute(&self, query: &str) -> Result<ResultSet, ExecutorError> {
        let frame = self.frame()?;
        let sql = query.to_string();
        run_blocking(move || {
            let frame = run_sql(frame, &sql)?;
            dataframe_to_result_set(&frame)
        })
        .await
    }

    async fn write_full(
        &self,
        columns: &[String],
        rows: &[Vec<CellValue>],
        destination: &Path,
        format: OutputFormat,
    ) -> Result<u64, ExecutorError> {
        let source_schema = self.source_schema()?;
        let columns = columns.to_vec();
        let rows = rows.to_vec();
        let target = destination.to_path_buf();

        let written = run_blocking(move || {
            let mut frame = build_frame(&columns, &rows, source_schema.as_deref())?;
            write_staged(&mut frame, &target, format)?;
            Ok(frame.height() as u64)
        })
        .await?;

        self.invalidate_if_source(destination);
        Ok(written)
    }
}

async fn run_blocking<T, F>(job: F) -> Result<T, ExecutorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExecutorError> + Send + 'static,
{
    task::spawn_blocking(job)
        .await
        .map_err(|error| ExecutorError::new(format!("engine task failed: {error}")))?
}

fn scan(path: &Path) -> Result<LazyFrame, ExecutorError> {
    let pl_path = PlPath::Local(Arc::from(path));
    LazyFrame::scan_parquet(pl_path, Default::default()).map_err(engine_error)
}

fn run_sql(frame: LazyFrame, sql: &str) -> Result<DataFrame, ExecutorError> {
    let mut context = SQLContext::new();
    context.register(SOURCE_TABLE, frame);
    context
        .execute(sql)
        .and_then(LazyFrame::collect)
        .map_err(engine_error)
}

fn engine_error(error: impl Display) -> ExecutorError {
    ExecutorError::new(error.to_string())
}

fn dataframe_to_result_set(frame: &DataFrame) -> Result<ResultSet, ExecutorError> {
    let columns = frame
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect::<Vec<_>>();
    let mut rows = vec![Vec::with_capacity(columns.len()); frame.height()];
    for column in frame.get_columns() {
        for (index, row) in rows.iter_mut().enumerate() {
            let value = column.get(index).map_err(engine_error)?;
            row.push(cell_from_any(&value));
        }
    }
    Ok(ResultSet::new(columns, rows))
}

fn cell_from_any(value: &AnyValue<'_>) -> CellValue {
    match value {
        AnyValue::Null => CellValue::Null,
        AnyValue::Boolean(value) => CellValue::Boolean(*value),
        AnyValue::Int32(value) => CellValue::Integer(i64::from(*value)),
        AnyValue::Int64(value) => CellValue::Integer(*value),
        AnyValue::UInt32(value) => CellValue::Integer(i64::from(*value)),
        AnyValue::UInt64(value) => {
            i64::try_from(*value)
                .map_or_else(|_| CellValue::Text(value.to_string()), CellValue::Integer)
        }
        AnyValue::Float32(value) => CellValue::Float(f64::from(*value)),
        AnyValue::Float64(value) => CellValue::Float(*value),
        AnyValue::String(value) => CellValue::Text((*value).to_string()),
        AnyValue::StringOwned(value) => CellValue::Text(value.to_string()),
        other => {
            let data_type = other.dtype();
            if let DataType::Datetime(unit, _) = &data_type {
                if let Some(value) = other
                    .extract::<i64>()
                    .and_then(|raw| datetime_from_raw(raw, *unit))
                {
                    return CellValue::Text(value.format(DATETIME_DISPLAY).to_string());
                }
            }
            if data_type.is_integer() {
                if let Some(value) = other.extract::<i64>() {
                    return CellValue::Integer(value);
                }
            }
            if data_type.is_float() {
                if let Some(value) = other.extract::<f64>() {
                    return CellValue::Float(value);
                }
            }
            CellValue::Text(other.str_value().to_string())
        }
    }
}

/// Builds a frame from cell rows, coercing each column to the source's type
/// for that name or to a type inferred from the cells.
fn build_frame(
    columns: &[String],
    rows: &[Vec<CellValue>],
    source_schema: Option<&Schema>,
) -> Result<DataFrame, ExecutorError> {
    let mut built = Vec::with_capacity(columns.len());
    for (index, name) in columns.iter().enumerate() {
        let cells = rows
            .iter()
            .map(|row| row.get(index).unwrap_or(&CellValue::Null))
            .collect::<Vec<_>>();
        let target = source_schema
            .and_then(|schema| schema.get(name.as_str()).cloned())
            .unwrap_or_else(|| infer_data_type(&cells));
        built.push(build_column(name, &cells, &target)?);
    }
    Ok(built.into_iter().collect())
}

fn infer_data_type(cells: &[&CellValue]) -> DataType {
    let mut inferred: Option<DataType> = None;
    for cell in cells {
        let data_type = match cell {
            CellValue::Null => continue,
            CellValue::Boolean(_) => DataType::Boolean,
            CellValue::Integer(_) => DataType::Int64,
            CellValue::Float(_) => DataType::Float64,
            CellValue::Text(_) => return DataType::String,
        };
        inferred = match inferred {
            None => Some(data_type),
            Some(current) if current == data_type => Some(current),
            Some(DataType::Int64 | DataType::Float64)
                if matches!(data_type, DataType::Int64 | DataType::Float64) =>
            {
                Some(DataType::Float64)
            }
            Some(_) => return DataType::String,
        };
    }
    inferred.unwrap_or(DataType::String)
}

fn build_column(
    name: &str,
    cells: &[&CellValue],
    target: &DataType,
) -> Result<Series, ExecutorError> {
    if *target == DataType::Boolean {
        let values = cells
            .iter()
            .map(|cell| parse_boolean(cell))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|text| {
                ExecutorError::new(format!("column `{name}`: `{text}` is not a boolean"))
            })?;
        return Ok(Series::new(name.into(), values));
    }

    let series = match target {
        DataType::String => {
            let texts = cells
                .iter()
                .map(|cell| cell.to_write_text())
                .collect::<Vec<_>>();
            return Ok(Series::new(name.into(), texts));
        }
        DataType::Date => {
            let epoch = NaiveDate::default();
            let days = parse_cells(name, cells, target, |text| {
                let date = parse_date(text)?;
                i32::try_from((date - epoch).num_days()).ok()
            })?;
            Series::new(name.into(), days)
        }
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let stamps = parse_cells(name, cells, target, |text| {
                raw_from_datetime(parse_datetime(text)?, unit)
            })?;
            Series::new(name.into(), stamps)
        }
        _ => {
            let texts = cells
                .iter()
                .map(|cell| cell.to_write_text().filter(|text| !text.trim().is_empty()))
                .collect::<Vec<_>>();
            Series::new(name.into(), texts)
        }
    };
    series
        .strict_cast(target)
        .map_err(|error| {
            ExecutorError::new(format!("column `{name}` cannot be written as {target}: {error}"))
        })
}

const DATETIME_DISPLAY: &str = "%Y-%m-%d %H:%M:%S%.f";

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parses each cell's text with `parse`; blank text and nulls stay null.
fn parse_cells<T>(
    name: &str,
    cells: &[&CellValue],
    target: &DataType,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Vec<Option<T>>, ExecutorError> {
    cells
        .iter()
        .map(|cell| match cell.to_write_text() {
            None => Ok(None),
            Some(text) if text.trim().is_empty() => Ok(None),
            Some(text) => parse(text.trim()).map(Some).ok_or_else(|| {
                ExecutorError::new(format!("column `{name}`: `{text}` is not a valid {target}"))
            }),
        })
        .collect()
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(text).map(|value| value.date()))
}

/// Accepts the display format plus the usual ISO spellings. Values are
/// taken as UTC; a trailing ` UTC` is ignored.
fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.strip_suffix(" UTC").unwrap_or(text);
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn datetime_from_raw(raw: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let value = match unit {
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(raw),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(raw),
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(raw)),
    };
    value.map(|value| value.naive_utc())
}

fn raw_from_datetime(value: NaiveDateTime, unit: TimeUnit) -> Option<i64> {
    let value = value.and_utc();
    match unit {
        TimeUnit::Milliseconds => Some(value.timestamp_millis()),
        TimeUnit::Microseconds => Some(value.timestamp_micros()),
        TimeUnit::Nanoseconds => value.timestamp_nanos_opt(),
    }
}

fn parse_boolean(cell: &CellValue) -> Result<Option<bool>, String> {
    match cell {
        CellValue::Null => Ok(None),
        CellValue::Boolean(value) => Ok(Some(*value)),
        CellValue::Integer(0) => Ok(Some(false)),
        CellValue::Integer(1) => Ok(Some(true)),
        CellValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "true" | "t" | "yes" | "1" => Ok(Some(true)),
            "false" | "f" | "no" | "0" => Ok(Some(false)),
            _ => Err(text.clone()),
        },
        other => Err(other.to_string()),
    }
}

/// Writes into a temp file beside `destination`, then renames it into place.
fn write_staged(
    frame: &mut DataFrame,
    destination: &Path,
    format: OutputFormat,
) -> Result<(), ExecutorError> {
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staged = tempfile::Builder::new()
        .prefix(".parqview-")
        .suffix(".tmp")
        .tempfile_in(&directory)
        .map_err(|error| {
            ExecutorError::new(format!(
                "failed to stage write in {}: {error}",
                directory.display()
            ))
        })?;

    {
        let mut writer = BufWriter::new(staged.as_file());
        match format {
            OutputFormat::Parquet => {
                ParquetWriter::new(&mut writer)
                    .finish(frame)
                    .map_err(engine_error)?;
            }
            OutputFormat::Csv => {
                CsvWriter::new(&mut writer)
                    .include_header(true)
                    .finish(frame)
                    .map_err(engine_error)?;
            }
        }
        writer
            .flush()
            .map_err(|error| ExecutorError::new(format!("failed to flush staged write: {error}")))?;
    }

    persist(staged, destination)
}

fn persist(staged: NamedTempFile, destination: &Path) -> Result<(), ExecutorError> {
    staged.persist(destination).map_err(|error| {
        ExecutorError::new(format!(
            "failed to move staged write to {}: {}",
            destination.display(),
            error.error
        ))
    })?;
    debug!(destination = %destination.display(), "write committed");
    Ok(())
}

fn same_file(left: &Path, right: &Path) -> bool {
    match (left.canonicalize(), right.canonicalize()) {
        (Ok(left), Ok(right)) => left == right,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use parqview_core::executor::CellValue;
    use polars::prelude::{AnyValue, DataType, Field, Schema, TimeUnit};

    use super::{build_frame, cell_from_any, infer_data_type, parse_boolean};

    #[test]
    fn any_values_map_to_cells() {
        assert_eq!(cell_from_any(&AnyValue::Null), CellValue::Null);
        assert_eq!(cell_from_any(&AnyValue::Int32(4)), CellValue::Integer(4));
        assert_eq!(cell_from_any(&AnyValue::Float64(0.5)), CellValue::Float(0.5));
        assert_eq!(
            cell_from_any(&AnyValue::String("abc")),
            CellValue::Text("abc".to_string())
        );
        assert_eq!(
            cell_from_any(&AnyValue::UInt64(u64::MAX)),
            CellValue::Text(u64::MAX.to_string())
        );
    }

    #[test]
    fn inference_widens_numbers_and_falls_back_to_text() {
        let integer = CellValue::Integer(1);
        let float = CellValue::Float(1.5);
        let text = CellValue::Text("x".to_string());
        assert_eq!(infer_data_type(&[&integer, &CellValue::Null]), DataType::Int64);
        assert_eq!(infer_data_type(&[&integer, &float]), DataType::Float64);
        assert_eq!(infer_data_type(&[&integer, &text]), DataType::String);
        assert_eq!(infer_data_type(&[&CellValue::Null]), DataType::String);
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert_eq!(parse_boolean(&CellValue::Text("Yes".to_string())), Ok(Some(true)));
        assert_eq!(parse_boolean(&CellValue::Text(String::new())), Ok(None));
        assert_eq!(parse_boolean(&CellValue::Integer(0)), Ok(Some(false)));
        assert!(parse_boolean(&CellValue::Text("maybe".to_string())).is_err());
    }

    #[test]
    fn edited_text_is_coerced_to_inferred_types() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            vec![CellValue::Integer(1), CellValue::Text("a".to_string())],
            vec![CellValue::Integer(2), CellValue::Null],
        ];
        let frame = build_frame(&columns, &rows, None).expect("frame should build");
        assert_eq!(frame.height(), 2);
        let id = frame.column("id").expect("id column");
        assert_eq!(id.dtype(), &DataType::Int64);
        assert_eq!(
            frame.column("name").expect("name column").null_count(),
            1
        );
    }

    #[test]
    fn temporal_text_is_written_back_with_the_source_type() {
        let columns = vec!["day".to_string(), "at".to_string()];
        let schema = Schema::from_iter([
            Field::new("day".into(), DataType::Date),
            Field::new(
                "at".into(),
                DataType::Datetime(TimeUnit::Milliseconds, None),
            ),
        ]);
        let rows = vec![
            vec![
                CellValue::Text("2022-01-08".to_string()),
                CellValue::Text("2023-11-14 22:13:20".to_string()),
            ],
            vec![
                CellValue::Null,
                CellValue::Text("2024-02-29T12:00:00.250".to_string()),
            ],
        ];
        let frame = build_frame(&columns, &rows, Some(&schema)).expect("frame should build");

        let day = frame.column("day").expect("day column");
        assert_eq!(day.dtype(), &DataType::Date);
        assert_eq!(
            cell_from_any(&day.get(0).expect("first day")),
            CellValue::Text("2022-01-08".to_string())
        );
        assert_eq!(day.null_count(), 1);

        let at = frame.column("at").expect("at column");
        assert_eq!(at.dtype(), &DataType::Datetime(TimeUnit::Milliseconds, None));
        assert_eq!(
            cell_from_any(&at.get(0).expect("first instant")),
            CellValue::Text("2023-11-14 22:13:20".to_string())
        );
        assert_eq!(
            cell_from_any(&at.get(1).expect("second instant")),
            CellValue::Text("2024-02-29 12:00:00.250".to_string())
        );
    }

    #[test]
    fn unparseable_dates_name_the_column() {
        let columns = vec!["day".to_string()];
        let schema = Schema::from_iter([Field::new("day".into(), DataType::Date)]);
        let rows = vec![vec![CellValue::Text("next tuesday".to_string())]];
        let error = build_frame(&columns, &rows, Some(&schema)).expect_err("bad date");
        assert!(error.to_string().contains("column `day`"));
    }
}
