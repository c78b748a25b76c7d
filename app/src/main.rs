mod logging;

use std::io;
use std::path::PathBuf;

use parqview_core::audit_trail::FileAuditTrail;
use parqview_core::normalizer::parse_positive;
use parqview_core::settings::FileSettingsStore;
use parqview_tui::{TuiError, TuiOptions};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LaunchConfig {
    sources: Vec<String>,
    settings_path: Option<PathBuf>,
    page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseOutcome {
    Launch(LaunchConfig),
    HelpRequested,
}

fn parse_args_from(args: impl IntoIterator<Item = String>) -> io::Result<ParseOutcome> {
    let mut config = LaunchConfig::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--settings" => config.settings_path = Some(next_value(&mut args, "--settings")?.into()),
            "--page-size" => {
                let raw = next_value(&mut args, "--page-size")?;
                config.page_size = Some(
                    parse_positive(&raw)
                        .ok_or_else(|| io_other(format!("invalid --page-size value `{raw}`")))?,
                );
            }
            flag if flag.starts_with("--") => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
            _ => config.sources.push(arg),
        }
    }

    Ok(ParseOutcome::Launch(config))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "parqview: page, sort, edit and save Parquet files\n\n\
Usage:\n  parqview [OPTIONS] [FILE.parquet ...]\n\n\
Options:\n  --settings <path>    Settings file (default: <config dir>/parqview/settings.toml)\n  --page-size <rows>   Page size for this run\n  -h, --help           Show this help\n\n\
Environment:\n  PARQVIEW_CONFIG_DIR  Overrides the config directory\n  PARQVIEW_LOG         Log filter, e.g. `debug` or `parqview_core=trace`\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}

fn load_settings(config: &LaunchConfig) -> Result<FileSettingsStore, Box<dyn std::error::Error>> {
    let mut store = match &config.settings_path {
        Some(path) => FileSettingsStore::load_from_path(path.clone())?,
        None => FileSettingsStore::load_default()?,
    };
    if let Some(page_size) = config.page_size {
        store.settings_mut().default_page_size = page_size;
    }
    Ok(store)
}

fn build_options(config: LaunchConfig, settings: FileSettingsStore) -> TuiOptions {
    let audit = settings
        .settings()
        .audit_enabled
        .then(|| FileAuditTrail::from_path(settings.path().with_file_name("audit.ndjson")));
    TuiOptions {
        initial_sources: config.sources,
        settings,
        audit,
    }
}

fn run_app(
    options: TuiOptions,
    run_tui: impl FnOnce(TuiOptions) -> Result<(), TuiError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let _ = parqview_core::domain_name();
    let _ = parqview_adapters::adapter_name();
    info!(
        ui = parqview_tui::ui_name(),
        sources = options.initial_sources.len(),
        audit = options.audit.is_some(),
        "starting"
    );
    run_tui(options)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match parse_args_from(std::env::args().skip(1))? {
        ParseOutcome::Launch(config) => config,
        ParseOutcome::HelpRequested => {
            print_help();
            return Ok(());
        }
    };

    let settings = load_settings(&config)?;
    let log_path = settings.path().with_file_name("parqview.log");
    if let Err(error) = logging::init_file_logging(&log_path, &settings.settings().log_level) {
        eprintln!("logging disabled: {error}");
    }
    if config.page_size.is_some() {
        warn!("page size overridden on the command line");
    }

    let options = build_options(config, settings);
    run_app(options, parqview_tui::run)
}
