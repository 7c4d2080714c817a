use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ctm_fetch::config::{ConfigLoader, DatasourceSettings, ResolvedConfig};
use ctm_fetch::domain::FcTime;
use ctm_fetch::error::FetchError;
use ctm_fetch::inspect::NetcdfInspector;
use ctm_fetch::output::{
    FetchReport, JsonOutput, ModelEntry, PruneReport, RunReport, RunSummary, TextOutput,
};

#[derive(Parser)]
#[command(name = "ctm-fetch")]
#[command(about = "Download chemical-transport-model forecasts, one idempotent run per day")]
#[command(version, author)]
struct Cli {
    /// Configuration file (default: ./ctm-fetch.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the daily download for configured datasources")]
    Run(RunArgs),
    #[command(about = "Fetch a single species")]
    Fetch(FetchArgs),
    #[command(about = "Delete run directories older than a retention period")]
    Prune(PruneArgs),
    #[command(about = "List supported models and species")]
    Models,
}

#[derive(Args)]
struct RunArgs {
    /// Datasource to run (repeatable)
    #[arg(long = "model", value_name = "NAME", conflicts_with = "all")]
    models: Vec<String>,

    /// Run every configured datasource (default)
    #[arg(long)]
    all: bool,

    /// Forecast day (YYYY-MM-DD, default: today UTC)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// After running, prune runs older than this many days
    #[arg(long, value_name = "DAYS")]
    prune: Option<u64>,
}

#[derive(Args)]
struct FetchArgs {
    /// Datasource name
    datasource: String,

    /// Species key, e.g. NO2
    species: String,

    #[arg(long)]
    date: Option<NaiveDate>,

    /// Window start: hours after init, `90m`, or a timestamp
    #[arg(long)]
    start: Option<String>,

    /// Window end: hours after init, `90m`, or a timestamp
    #[arg(long)]
    end: Option<String>,

    /// Keep the raw downloaded files in this directory instead of normalizing
    #[arg(long, value_name = "DIR")]
    raw_dir: Option<PathBuf>,
}

#[derive(Args)]
struct PruneArgs {
    /// Retention period in days
    #[arg(long)]
    days: u64,

    /// Datasource to prune (repeatable, default: all)
    #[arg(long = "model", value_name = "NAME")]
    models: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FetchError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::DataNotAvailable(_) => 2,
        FetchError::MissingConfig
        | FetchError::ConfigRead(_)
        | FetchError::ConfigParse(_)
        | FetchError::InvalidConfig(_)
        | FetchError::UnknownDatasource(_)
        | FetchError::UnknownModel(_)
        | FetchError::UnknownSpecies { .. }
        | FetchError::FeatureDisabled(_) => 2,
        FetchError::Transport(_)
        | FetchError::Http(_)
        | FetchError::HttpStatus { .. }
        | FetchError::Ftp(_)
        | FetchError::Sftp(_) => 3,
        FetchError::DimensionMismatch { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Models => {
            let catalog = ModelEntry::catalog();
            if cli.json {
                JsonOutput::print_models(&catalog).into_diagnostic()
            } else {
                TextOutput::print_models(&catalog).into_diagnostic()
            }
        }
        Commands::Run(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            run_days(&config, args, cli.json)
        }
        Commands::Fetch(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            run_fetch(&config, args, cli.json)
        }
        Commands::Prune(args) => {
            let config = ConfigLoader::resolve(cli.config.as_deref())?;
            let sources = select(&config, &args.models)?;
            let reports = prune(&sources, args.days)?;
            if cli.json {
                JsonOutput::print_prune(&reports).into_diagnostic()
            } else {
                TextOutput::print_prune(&reports).into_diagnostic()
            }
        }
    }
}

fn select<'a>(
    config: &'a ResolvedConfig,
    names: &[String],
) -> Result<Vec<&'a DatasourceSettings>, FetchError> {
    if names.is_empty() {
        return Ok(config.datasources.iter().collect());
    }
    names.iter().map(|name| config.datasource(name)).collect()
}

fn run_days(config: &ResolvedConfig, args: RunArgs, json: bool) -> miette::Result<()> {
    let names = if args.all { Vec::new() } else { args.models };
    let sources = select(config, &names)?;
    let day = args.date.unwrap_or_else(|| Utc::now().date_naive());

    let mut reports = Vec::with_capacity(sources.len());
    for source in &sources {
        let orchestrator = source.build_orchestrator(NetcdfInspector)?;
        let outcome = orchestrator.run_day(day)?;
        reports.push(RunReport {
            datasource: source.name.clone(),
            model: source.model.to_string(),
            init: format!("{day}T00:00:00Z"),
            outcome,
        });
    }

    let pruned = args.prune.map(|days| prune(&sources, days)).transpose()?;

    if json {
        let summary = RunSummary {
            runs: reports,
            pruned,
        };
        JsonOutput::print_runs(&summary).into_diagnostic()?;
    } else {
        TextOutput::print_runs(&reports).into_diagnostic()?;
        if let Some(pruned) = &pruned {
            TextOutput::print_prune(pruned).into_diagnostic()?;
        }
    }
    Ok(())
}

fn run_fetch(config: &ResolvedConfig, args: FetchArgs, json: bool) -> miette::Result<()> {
    let source = config.datasource(&args.datasource)?;
    let orchestrator = source.build_orchestrator(NetcdfInspector)?;
    let day = args.date.unwrap_or_else(|| Utc::now().date_naive());

    let windowed = args.start.is_some() || args.end.is_some() || args.raw_dir.is_some();
    let files = if windowed {
        let start: FcTime = args.start.as_deref().unwrap_or("").parse()?;
        let end: FcTime = args.end.as_deref().unwrap_or("").parse()?;
        let staged = orchestrator.acquire(&args.species, day, end, start)?;
        let raw_dir = args.raw_dir.unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&raw_dir)
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let mut kept = Vec::with_capacity(staged.paths().len());
        for path in staged.paths() {
            let Some(name) = path.file_name() else {
                continue;
            };
            let target = raw_dir.join(name);
            fs::copy(path, &target).map_err(|err| FetchError::Filesystem(err.to_string()))?;
            kept.push(target.display().to_string());
        }
        staged.cleanup()?;
        kept
    } else {
        let output = orchestrator.get(&args.species, day)?;
        vec![output.display().to_string()]
    };

    let report = FetchReport {
        datasource: source.name.clone(),
        species: args.species,
        files,
    };
    if json {
        JsonOutput::print_fetch(&report).into_diagnostic()
    } else {
        TextOutput::print_fetch(&report).into_diagnostic()
    }
}

fn prune(sources: &[&DatasourceSettings], days: u64) -> Result<Vec<PruneReport>, FetchError> {
    sources
        .iter()
        .map(|source| {
            let result = source.build_orchestrator(NetcdfInspector)?.prune(days)?;
            Ok(PruneReport {
                datasource: source.name.clone(),
                result,
            })
        })
        .collect()
}
