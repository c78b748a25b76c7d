use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parqview_adapters::parquet::ParquetExecutor;
use parqview_core::normalizer::parse_positive;
use parqview_core::session::{QuerySession, SessionOptions};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Config,
    HelpRequested,
}

#[derive(Debug, Clone, Default)]
struct WalkConfig {
    source: Option<PathBuf>,
    page_size: usize,
    sql: Option<String>,
    sort_column: Option<String>,
    max_pages: Option<usize>,
    json: bool,
    assert_first_page_ms: Option<f64>,
    assert_min_rows_per_sec: Option<f64>,
}

#[derive(Debug, Clone)]
struct WalkMetrics {
    total_rows: u64,
    pages_visited: usize,
    rows_fetched: u64,
    first_page: Duration,
    elapsed: Duration,
}

impl WalkMetrics {
    fn rows_per_sec(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.rows_fetched as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    fn first_page_ms(&self) -> f64 {
        self.first_page.as_secs_f64() * 1_000.0
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;
    let source = config
        .source
        .clone()
        .ok_or_else(|| io_other("a Parquet file path is required"))?;

    let metrics = walk_pages(&config, &source).await?;
    let rows_per_sec = metrics.rows_per_sec();
    let first_page_ms = metrics.first_page_ms();
    let elapsed_ms = metrics.elapsed.as_secs_f64() * 1_000.0;

    if config.json {
        let report = json!({
            "source": source.display().to_string(),
            "page_size": config.page_size,
            "total_rows": metrics.total_rows,
            "pages_visited": metrics.pages_visited,
            "rows_fetched": metrics.rows_fetched,
            "first_page_ms": first_page_ms,
            "elapsed_ms": elapsed_ms,
            "rows_per_sec": rows_per_sec,
            "peak_memory_bytes": peak_memory_bytes_best_effort(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("metric.total_rows={}", metrics.total_rows);
        println!("metric.pages_visited={}", metrics.pages_visited);
        println!("metric.rows_fetched={}", metrics.rows_fetched);
        println!("metric.first_page_ms={first_page_ms:.3}");
        println!("metric.walk_elapsed_ms={elapsed_ms:.3}");
        println!("metric.rows_per_sec={rows_per_sec:.3}");
        if let Some(bytes) = peak_memory_bytes_best_effort() {
            println!("metric.peak_memory_bytes={bytes}");
        } else {
            println!("metric.peak_memory_bytes=n/a");
        }
    }

    enforce_assertions(&config, first_page_ms, rows_per_sec)?;
    Ok(())
}

async fn walk_pages(config: &WalkConfig, source: &std::path::Path) -> io::Result<WalkMetrics> {
    let started_at = Instant::now();
    let options = SessionOptions {
        page_size: config.page_size,
        ..SessionOptions::default()
    };
    let mut session = QuerySession::open(
        ParquetExecutor::new(),
        source.display().to_string(),
        options,
    )
    .await
    .map_err(io_other)?;

    if let Some(sql) = &config.sql {
        session.run_query(sql).await.map_err(io_other)?;
    }
    if let Some(column) = &config.sort_column {
        session.activate_sort(column).await.map_err(io_other)?;
    }
    let first_page = started_at.elapsed();

    let mut pages_visited = 1;
    let mut rows_fetched = session.page().rows.len() as u64;
    while config.max_pages.map_or(true, |limit| pages_visited < limit)
        && session.next_page().await.map_err(io_other)?
    {
        pages_visited += 1;
        rows_fetched += session.page().rows.len() as u64;
    }

    Ok(WalkMetrics {
        total_rows: session.pager_state().total_rows,
        pages_visited,
        rows_fetched,
        first_page,
        elapsed: started_at.elapsed(),
    })
}

fn enforce_assertions(
    config: &WalkConfig,
    first_page_ms: f64,
    rows_per_sec: f64,
) -> io::Result<()> {
    if let Some(max_first_page_ms) = config.assert_first_page_ms {
        if first_page_ms > max_first_page_ms {
            return Err(io_other(format!(
                "first page latency {first_page_ms:.3}ms exceeded threshold {max_first_page_ms:.3}ms"
            )));
        }
    }

    if let Some(min_rows_per_sec) = config.assert_min_rows_per_sec {
        if rows_per_sec < min_rows_per_sec {
            return Err(io_other(format!(
                "rows/sec {rows_per_sec:.3} below threshold {min_rows_per_sec:.3}"
            )));
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/status").ok()?;
    let vm_hwm_line = contents.lines().find(|line| line.starts_with("VmHWM:"))?;
    let kb = vm_hwm_line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb * 1_024)
}

#[cfg(not(target_os = "linux"))]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    None
}

fn parse_args() -> io::Result<WalkConfig> {
    let mut config = WalkConfig {
        page_size: parqview_core::pager::DEFAULT_PAGE_SIZE,
        ..WalkConfig::default()
    };
    let outcome = parse_args_from(std::env::args().skip(1), &mut config)?;
    if outcome == ParseOutcome::HelpRequested {
        print_help();
        std::process::exit(0);
    }
    Ok(config)
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    config: &mut WalkConfig,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--page-size" => {
                let raw = next_value(&mut args, "--page-size")?;
                config.page_size = parse_positive(&raw)
                    .ok_or_else(|| io_other(format!("invalid --page-size value `{raw}`")))?;
            }
            "--sql" => config.sql = Some(next_value(&mut args, "--sql")?),
            "--sort" => config.sort_column = Some(next_value(&mut args, "--sort")?),
            "--max-pages" => {
                let raw = next_value(&mut args, "--max-pages")?;
                config.max_pages = Some(
                    parse_positive(&raw)
                        .ok_or_else(|| io_other(format!("invalid --max-pages value `{raw}`")))?,
                );
            }
            "--json" => config.json = true,
            "--assert-first-page-ms" => {
                config.assert_first_page_ms = Some(
                    next_value(&mut args, "--assert-first-page-ms")?
                        .parse::<f64>()
                        .map_err(|error| {
                            io_other(format!("invalid --assert-first-page-ms value: {error}"))
                        })?,
                );
            }
            "--assert-min-rows-per-sec" => {
                config.assert_min_rows_per_sec = Some(
                    next_value(&mut args, "--assert-min-rows-per-sec")?
                        .parse::<f64>()
                        .map_err(|error| {
                            io_other(format!("invalid --assert-min-rows-per-sec value: {error}"))
                        })?,
                );
            }
            other if other.starts_with("--") => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
            _ => {
                if config.source.is_some() {
                    return Err(io_other(format!("unexpected extra path `{flag}`")));
                }
                config.source = Some(PathBuf::from(flag));
            }
        }
    }

    Ok(ParseOutcome::Config)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "parqview page walker\n\n\
Usage:\n  cargo run -p parqview-app --bin page_walk -- [OPTIONS] <FILE.parquet>\n\n\
Options:\n  --page-size <rows>              Rows per page (default: 100)\n  --sql <query>                   Query to page through instead of SELECT * FROM t\n  --sort <column>                 Sort ascending by column before walking\n  --max-pages <count>             Stop after this many pages\n  --json                          Print metrics as a JSON object\n  --assert-first-page-ms <ms>     Fail if the first page takes longer\n  --assert-min-rows-per-sec <rps> Fail if throughput is below threshold\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::path::{Path, PathBuf};

    use polars::prelude::{DataFrame, NamedFrom, ParquetWriter, Series};
    use tempfile::TempDir;

    use super::{
        enforce_assertions, io_other, next_value, parse_args_from, walk_pages, ParseOutcome,
        WalkConfig,
    };

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn write_fixture(path: &Path, rows: i64) {
        let mut frame: DataFrame = [
            Series::new("id".into(), (0..rows).collect::<Vec<_>>()),
            Series::new(
                "label".into(),
                (0..rows).map(|index| format!("label-{index}")).collect::<Vec<_>>(),
            ),
        ]
        .into_iter()
        .collect();
        let mut file = File::create(path).expect("fixture file should be created");
        ParquetWriter::new(&mut file)
            .finish(&mut frame)
            .expect("fixture should be written");
    }

    #[test]
    fn parse_args_from_applies_overrides() {
        let mut config = WalkConfig::default();
        let outcome = parse_args_from(
            args(&[
                "data.parquet",
                "--page-size",
                "50",
                "--sql",
                "SELECT * FROM t WHERE id > 3",
                "--sort",
                "id",
                "--max-pages",
                "4",
                "--json",
                "--assert-first-page-ms",
                "1500",
                "--assert-min-rows-per-sec",
                "4000",
            ]),
            &mut config,
        )
        .expect("parse should succeed");

        assert_eq!(outcome, ParseOutcome::Config);
        assert_eq!(config.source, Some(PathBuf::from("data.parquet")));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.sql.as_deref(), Some("SELECT * FROM t WHERE id > 3"));
        assert_eq!(config.sort_column.as_deref(), Some("id"));
        assert_eq!(config.max_pages, Some(4));
        assert!(config.json);
        assert_eq!(config.assert_first_page_ms, Some(1500.0));
        assert_eq!(config.assert_min_rows_per_sec, Some(4000.0));
    }

    #[test]
    fn parse_args_from_detects_help_and_rejects_bad_flags() {
        let mut config = WalkConfig::default();
        let outcome = parse_args_from(args(&["--help"]), &mut config).expect("help parse");
        assert_eq!(outcome, ParseOutcome::HelpRequested);

        let err = parse_args_from(args(&["--bogus"]), &mut config)
            .expect_err("unknown flags should fail");
        assert!(err.to_string().contains("unknown argument"));

        let err = parse_args_from(args(&["--page-size", "-1"]), &mut config)
            .expect_err("negative page size should fail");
        assert!(err.to_string().contains("invalid --page-size"));
    }

    #[test]
    fn next_value_reports_missing_flag_values() {
        let mut values = std::iter::empty::<String>();
        let err = next_value(&mut values, "--sql").expect_err("missing value should fail");
        assert!(err.to_string().contains("missing value for `--sql`"));
    }

    #[test]
    fn enforce_assertions_validates_thresholds() {
        let config = WalkConfig {
            assert_first_page_ms: Some(50.0),
            assert_min_rows_per_sec: Some(10_000.0),
            ..WalkConfig::default()
        };

        let first_page_err =
            enforce_assertions(&config, 51.0, 20_000.0).expect_err("first-page threshold");
        assert!(first_page_err.to_string().contains("first page latency"));

        let rows_per_sec_err =
            enforce_assertions(&config, 20.0, 9_999.0).expect_err("throughput threshold");
        assert!(rows_per_sec_err.to_string().contains("rows/sec"));
    }

    #[test]
    fn io_other_uses_display_text() {
        assert_eq!(io_other("boom").to_string(), "boom");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn walks_every_page_of_a_file() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("walk.parquet");
        write_fixture(&path, 25);

        let config = WalkConfig {
            page_size: 10,
            ..WalkConfig::default()
        };
        let metrics = walk_pages(&config, &path).await.expect("walk should succeed");
        assert_eq!(metrics.total_rows, 25);
        assert_eq!(metrics.pages_visited, 3);
        assert_eq!(metrics.rows_fetched, 25);

        let limited = WalkConfig {
            page_size: 10,
            max_pages: Some(2),
            sql: Some("SELECT * FROM t WHERE id >= 5".to_string()),
            ..WalkConfig::default()
        };
        let metrics = walk_pages(&limited, &path).await.expect("limited walk");
        assert_eq!(metrics.total_rows, 20);
        assert_eq!(metrics.pages_visited, 2);
        assert_eq!(metrics.rows_fetched, 20);
    }
}
