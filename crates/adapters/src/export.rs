use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use parqview_core::executor::CellValue;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported export extension for {0}; use .csv, .csv.gz or .json")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageExportFormat {
    Csv,
    CsvGzip,
    Json,
}

impl PageExportFormat {
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if name.ends_with(".csv.gz") {
            Ok(Self::CsvGzip)
        } else if name.ends_with(".csv") {
            Ok(Self::Csv)
        } else if name.ends_with(".json") {
            Ok(Self::Json)
        } else {
            Err(ExportError::UnsupportedFormat(path.display().to_string()))
        }
    }
}

/// Writes the rows currently displayed, in the format the extension names.
pub fn export_page(
    path: &Path,
    headers: &[String],
    rows: &[Vec<CellValue>],
) -> Result<usize, ExportError> {
    match PageExportFormat::from_path(path)? {
        PageExportFormat::Csv => export_rows_to_csv(path, headers, rows, false),
        PageExportFormat::CsvGzip => export_rows_to_csv(path, headers, rows, true),
        PageExportFormat::Json => export_rows_to_json(path, headers, rows),
    }
}

pub fn export_rows_to_csv(
    path: &Path,
    headers: &[String],
    rows: &[Vec<CellValue>],
    gzip: bool,
) -> Result<usize, ExportError> {
    let mut content = String::new();
    content.push_str(
        &headers
            .iter()
            .map(|header| csv_escape(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for row in rows {
        let mut values = Vec::with_capacity(headers.len());
        for column_index in 0..headers.len() {
            let value = row
                .get(column_index)
                .map(ToString::to_string)
                .unwrap_or_default();
            values.push(csv_escape(&value));
        }
        content.push_str(&values.join(","));
        content.push('\n');
    }

    write_bytes(path, content.as_bytes(), gzip)?;
    Ok(rows.len())
}

pub fn export_rows_to_json(
    path: &Path,
    headers: &[String],
    rows: &[Vec<CellValue>],
) -> Result<usize, ExportError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = Map::with_capacity(headers.len());
        for (column_index, header) in headers.iter().enumerate() {
            let value = match row.get(column_index) {
                Some(cell) => serde_json::to_value(cell)?,
                None => Value::Null,
            };
            object.insert(header.clone(), value);
        }
        records.push(Value::Object(object));
    }

    let payload = serde_json::to_string_pretty(&records)?;
    write_bytes(path, payload.as_bytes(), false)?;
    Ok(rows.len())
}

fn write_bytes(path: &Path, bytes: &[u8], gzip: bool) -> Result<(), ExportError> {
    let to_error = |source| ExportError::Write {
        path: path.display().to_string(),
        source,
    };
    let file = File::create(path).map_err(to_error)?;
    if gzip {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        encoder.write_all(bytes).map_err(to_error)?;
        encoder
            .finish()
            .and_then(|mut writer| writer.flush())
            .map_err(to_error)
    } else {
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes).map_err(to_error)?;
        writer.flush().map_err(to_error)
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
