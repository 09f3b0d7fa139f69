//! bindex - Command-line interface for the behavior index engine
//!
//! Commands:
//! - forecast: Compute the index, forecast and intelligence for one region
//! - live: Run the live monitor for a number of cycles and print summaries
//! - config: Print the default (or a validated) configuration as TOML
//! - doctor: Diagnose configuration, inputs and output environment

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use behavior_index::config::DEFAULT_WEIGHTS;
use behavior_index::{
    EngineConfig, ForecastEngine, IndexError, JsonSeriesDataset, LiveMonitor, RegionRegistry,
    SourceAdapter, SyntheticAdapter, ENGINE_NAME, ENGINE_VERSION,
};

/// bindex - Regional behavior stress index and forecast engine
#[derive(Parser)]
#[command(name = "bindex")]
#[command(author = "Behavior Index Contributors")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Fuse regional data streams into a stress index and forecast", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON dataset file; synthetic data is used when omitted
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a forecast for one region
    Forecast {
        /// Region id
        #[arg(short, long)]
        region: String,

        /// Days of history to analyze
        #[arg(long, default_value = "90")]
        days_back: u32,

        /// Days to forecast
        #[arg(long, default_value = "7")]
        horizon: u32,

        /// Last day of history (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Output format (pretty on a terminal, compact otherwise)
        #[arg(long)]
        format: Option<OutputFormat>,
    },

    /// Run the live monitor and print a summary after each cycle
    Live {
        /// Regions to track (repeatable); all known regions when omitted
        #[arg(short, long)]
        region: Vec<String>,

        /// Number of refresh cycles
        #[arg(long, default_value = "1")]
        cycles: u32,

        /// Seconds between cycles
        #[arg(long, default_value = "5")]
        interval_secs: u64,

        /// Summary window in minutes
        #[arg(long, default_value = "60")]
        window_minutes: u64,

        /// Output format (pretty on a terminal, compact otherwise)
        #[arg(long)]
        format: Option<OutputFormat>,
    },

    /// Print the configuration as TOML
    Config,

    /// Diagnose configuration and inputs
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Single-line JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

impl OutputFormat {
    fn resolve(requested: Option<OutputFormat>) -> OutputFormat {
        requested.unwrap_or(if atty::is(atty::Stream::Stdout) {
            OutputFormat::JsonPretty
        } else {
            OutputFormat::Json
        })
    }

    fn render<T: serde::Serialize>(self, value: &T) -> Result<String, serde_json::Error> {
        match self {
            OutputFormat::Json => serde_json::to_string(value),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(value),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BindexCliError> {
    let config_path = cli.config.as_deref();
    let input = cli.input.as_deref();

    match cli.command {
        Commands::Forecast {
            region,
            days_back,
            horizon,
            as_of,
            format,
        } => cmd_forecast(config_path, input, &region, days_back, horizon, as_of, format),
        Commands::Live {
            region,
            cycles,
            interval_secs,
            window_minutes,
            format,
        } => cmd_live(
            config_path,
            input,
            &region,
            cycles,
            Duration::from_secs(interval_secs),
            window_minutes,
            format,
        ),
        Commands::Config => cmd_config(config_path),
        Commands::Doctor { json } => cmd_doctor(config_path, input, json),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, BindexCliError> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            Ok(EngineConfig::from_file(path)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

/// Region registry plus one adapter per component
struct Sources {
    registry: RegionRegistry,
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

/// Dataset regions come from the file; synthetic regions from the
/// command line and the `[monitor]` section.
fn load_sources(
    input: Option<&Path>,
    config: &EngineConfig,
    requested: &[String],
) -> Result<Sources, BindexCliError> {
    let sources = match input {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            let dataset = JsonSeriesDataset::parse(&raw).map_err(IndexError::from)?;
            let registry = RegionRegistry::from_ids(dataset.regions())?;
            let adapters = dataset
                .into_adapters()
                .into_iter()
                .map(|adapter| Arc::new(adapter) as Arc<dyn SourceAdapter>)
                .collect();
            Sources { registry, adapters }
        }
        None => {
            let registry = RegionRegistry::from_ids(
                requested.iter().chain(config.monitor.regions.iter()),
            )?;
            let adapters = DEFAULT_WEIGHTS
                .iter()
                .map(|(component, _)| {
                    Arc::new(SyntheticAdapter::new(*component)) as Arc<dyn SourceAdapter>
                })
                .collect();
            Sources { registry, adapters }
        }
    };

    if sources.registry.is_empty() {
        return Err(BindexCliError::NoRegions);
    }
    Ok(sources)
}

fn build_engine(
    config_path: Option<&Path>,
    input: Option<&Path>,
    requested: &[String],
) -> Result<ForecastEngine, BindexCliError> {
    let config = load_config(config_path)?;
    let sources = load_sources(input, &config, requested)?;
    info!(
        regions = sources.registry.len(),
        sources = sources.adapters.len(),
        "Engine ready"
    );
    Ok(ForecastEngine::new(config, sources.registry, sources.adapters)?)
}

fn cmd_forecast(
    config_path: Option<&Path>,
    input: Option<&Path>,
    region: &str,
    days_back: u32,
    horizon: u32,
    as_of: Option<NaiveDate>,
    format: Option<OutputFormat>,
) -> Result<(), BindexCliError> {
    let engine = build_engine(config_path, input, &[region.to_string()])?;
    let response = match as_of {
        Some(end) => engine.get_forecast_as_of(region, days_back, horizon, end)?,
        None => engine.get_forecast(region, days_back, horizon)?,
    };

    println!("{}", OutputFormat::resolve(format).render(&*response)?);
    Ok(())
}

fn cmd_live(
    config_path: Option<&Path>,
    input: Option<&Path>,
    regions: &[String],
    cycles: u32,
    interval: Duration,
    window_minutes: u64,
    format: Option<OutputFormat>,
) -> Result<(), BindexCliError> {
    let engine = Arc::new(build_engine(config_path, input, regions)?);
    let format = OutputFormat::resolve(format);

    let mut monitor_config = engine.config().monitor.clone();
    monitor_config.regions = if regions.is_empty() {
        engine.registry().ids().map(str::to_string).collect()
    } else {
        regions.to_vec()
    };
    monitor_config.refresh_interval_secs = interval.as_secs().max(1);

    let monitor = LiveMonitor::start(engine, monitor_config)?;

    for cycle in 1..=cycles {
        let ack = monitor.refresh(None)?;
        for failure in &ack.failures {
            warn!(region = %failure.region, error = %failure.error, "Region refresh failed");
        }
        info!(
            cycle,
            refreshed = ack.refreshed.len(),
            failed = ack.failures.len(),
            "Live cycle complete"
        );

        let summary = monitor.summary(None, window_minutes)?;
        println!("{}", format.render(&summary)?);

        if cycle < cycles {
            std::thread::sleep(interval);
        }
    }

    monitor.shutdown();
    Ok(())
}

fn cmd_config(config_path: Option<&Path>) -> Result<(), BindexCliError> {
    let config = load_config(config_path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn cmd_doctor(
    config_path: Option<&Path>,
    input: Option<&Path>,
    json: bool,
) -> Result<(), BindexCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} {}", ENGINE_NAME, ENGINE_VERSION),
    });

    let config = match config_path {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Configuration {} is valid", path.display()),
                });
                Some(config)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                None
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Using built-in defaults".to_string(),
            });
            Some(EngineConfig::default())
        }
    };

    if let Some(config) = &config {
        let weights: Vec<String> = config
            .index
            .weights
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(c, w)| format!("{}={}", c, w))
            .collect();
        checks.push(DoctorCheck {
            name: "weights".to_string(),
            status: if weights.is_empty() {
                CheckStatus::Warning
            } else {
                CheckStatus::Ok
            },
            message: if weights.is_empty() {
                "No positive weights; defaults will be used".to_string()
            } else {
                weights.join(", ")
            },
        });

        match load_sources(input, config, &[]) {
            Ok(sources) => {
                let components: Vec<&str> =
                    sources.adapters.iter().map(|a| a.component()).collect();
                checks.push(DoctorCheck {
                    name: "regions".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} region(s): {}",
                        sources.registry.len(),
                        sources.registry.ids().collect::<Vec<_>>().join(", ")
                    ),
                });
                checks.push(DoctorCheck {
                    name: "sources".to_string(),
                    status: CheckStatus::Ok,
                    message: components.join(", "),
                });
            }
            Err(e) => {
                let error = CliError::from(e);
                checks.push(DoctorCheck {
                    name: "regions".to_string(),
                    status: if error.code == "NO_REGIONS" && input.is_none() {
                        CheckStatus::Warning
                    } else {
                        CheckStatus::Error
                    },
                    message: error.message,
                });
            }
        }
    }

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        DoctorCheck {
            name: "stdout".to_string(),
            status: CheckStatus::Ok,
            message: "stdout is a TTY (pretty output by default)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdout".to_string(),
            status: CheckStatus::Ok,
            message: "stdout is a pipe (compact JSON by default)".to_string(),
        }
    };
    checks.push(stdout_check);

    let report = DoctorReport {
        engine: ENGINE_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("bindex Doctor Report");
        println!("====================");
        println!("Engine:  {}", report.engine);
        println!("Version: {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BindexCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum BindexCliError {
    Io(io::Error),
    Engine(IndexError),
    Json(serde_json::Error),
    NoRegions,
    DoctorFailed,
}

impl From<io::Error> for BindexCliError {
    fn from(e: io::Error) -> Self {
        BindexCliError::Io(e)
    }
}

impl From<IndexError> for BindexCliError {
    fn from(e: IndexError) -> Self {
        BindexCliError::Engine(e)
    }
}

impl From<serde_json::Error> for BindexCliError {
    fn from(e: serde_json::Error) -> Self {
        BindexCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BindexCliError> for CliError {
    fn from(e: BindexCliError) -> Self {
        match e {
            BindexCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BindexCliError::Engine(e) => {
                let (code, hint) = match &e {
                    IndexError::InvalidRegion(_) => {
                        ("INVALID_REGION", "Use a region id present in the input dataset")
                    }
                    IndexError::InvalidParameter(_) => {
                        ("INVALID_PARAMETER", "Check --days-back and --horizon against [limits]")
                    }
                    IndexError::InvalidWeight { .. }
                    | IndexError::Config(_)
                    | IndexError::Toml(_) => {
                        ("CONFIG_ERROR", "Run 'bindex config' to see a valid configuration")
                    }
                    IndexError::Source(_) | IndexError::Json(_) => {
                        (
                            "INPUT_ERROR",
                            "Ensure the dataset matches {\"regions\": {id: {component: [...]}}}",
                        )
                    }
                    IndexError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    IndexError::Computation(_) => ("COMPUTATION_ERROR", "Retry with more history"),
                    IndexError::MonitorUnavailable(_) => {
                        ("MONITOR_UNAVAILABLE", "Restart the live monitor")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            BindexCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BindexCliError::NoRegions => CliError {
                code: "NO_REGIONS".to_string(),
                message: "Region registry is empty".to_string(),
                hint: Some(
                    "Pass --region, list [monitor] regions, or use --input with a dataset"
                        .to_string(),
                ),
            },
            BindexCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    engine: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
