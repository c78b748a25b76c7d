use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "PARQVIEW_LOG";

/// Builds the filter from `PARQVIEW_LOG` when set, otherwise from the
/// configured level. Polars internals stay at `warn` unless named explicitly.
pub fn build_env_filter(configured_level: &str, env_override: Option<&str>) -> EnvFilter {
    let level = env_override
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(configured_level);
    let directives = format!("polars=warn,{level}");
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Sends log output to `file_path`; the terminal belongs to the UI.
pub fn init_file_logging(file_path: &Path, configured_level: &str) -> io::Result<()> {
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(file_path)?;
    let env_override = std::env::var(LOG_ENV_VAR).ok();

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_target(true)
        .with_writer(Mutex::new(log_file))
        .with_env_filter(build_env_filter(configured_level, env_override.as_deref()))
        .try_init()
        .map_err(|error| io::Error::other(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::build_env_filter;

    #[test]
    fn env_override_wins_over_configured_level() {
        let filter = build_env_filter("info", Some("parqview_core=trace"));
        assert!(filter.to_string().contains("parqview_core=trace"));
    }

    #[test]
    fn blank_override_falls_back_to_configured_level() {
        let filter = build_env_filter("debug", Some("  "));
        let rendered = filter.to_string();
        assert!(rendered.contains("debug"));
        assert!(rendered.contains("polars=warn"));
    }
}
