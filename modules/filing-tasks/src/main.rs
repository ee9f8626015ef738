use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use edgar_client::EdgarClient;
use filing_tasks::config::{load_config, validate_client_identifier, FileConfig};
use filing_tasks::index::{load_companies, write_warnings};
use filing_tasks::listing::{read_listings, write_listing};
use filing_tasks::{
    assemble, build_index, finalize, BrowserlessRenderer, EdgarFilingSource, FinalizeOptions,
    IndexRequest, TargetCounts, TaskStatus, TaskStore,
};

#[derive(Parser)]
#[command(name = "filing-tasks", about = "Assemble filing review tasks and render their documents")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query the filing index for every company and write a filing listing
    BuildIndex(BuildIndexArgs),
    /// Pair listed filings into a task store
    Assemble(AssembleArgs),
    /// Render and checksum every task document
    Finalize(FinalizeArgs),
    /// Print per-status task counts
    Status(StatusArgs),
}

#[derive(Args)]
struct BuildIndexArgs {
    /// Company source CSV (ticker, display_name, sector)
    #[arg(long)]
    companies: PathBuf,
    /// EDGAR company_tickers.json
    #[arg(long)]
    tickers: PathBuf,
    #[arg(long)]
    min_date: Option<NaiveDate>,
    #[arg(long, value_delimiter = ',')]
    forms: Vec<String>,
    #[arg(long)]
    max_per_company: Option<usize>,
    #[arg(long)]
    out: PathBuf,
    /// Client identifier with a contact address
    #[arg(long, env = "SEC_USER_AGENT")]
    user_agent: Option<String>,
}

#[derive(Args)]
struct AssembleArgs {
    /// One or more filing listings
    #[arg(long, required = true, num_args = 1..)]
    listing: Vec<PathBuf>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    a_count: Option<usize>,
    #[arg(long)]
    b_count: Option<usize>,
    #[arg(long)]
    c_yoy_count: Option<usize>,
    #[arg(long)]
    c_peer_count: Option<usize>,
}

#[derive(Args)]
struct FinalizeArgs {
    /// Task store CSV, updated in place
    store: PathBuf,
    #[arg(long)]
    out_dir: PathBuf,
    #[arg(long, env = "SEC_USER_AGENT")]
    user_agent: Option<String>,
    /// Verify artifacts already on disk instead of re-rendering them
    #[arg(long)]
    only_missing: bool,
    /// Re-render and re-download even when local copies exist
    #[arg(long)]
    overwrite: bool,
    #[arg(long)]
    ledger: Option<PathBuf>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long, env = "BROWSERLESS_URL")]
    browserless_url: Option<String>,
    #[arg(long, env = "BROWSERLESS_TOKEN", hide_env_values = true)]
    browserless_token: Option<String>,
}

#[derive(Args)]
struct StatusArgs {
    store: PathBuf,
    /// Print counts as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for krate in ["filing_tasks", "edgar_client", "browserless_client"] {
        filter = filter.add_directive(format!("{krate}={default_level}").parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };

    match cli.command {
        Command::BuildIndex(args) => run_build_index(args, &config).await,
        Command::Assemble(args) => run_assemble(args, &config),
        Command::Finalize(args) => run_finalize(args, &config).await,
        Command::Status(args) => run_status(args),
    }
}

fn client_identifier(raw: Option<String>) -> Result<String> {
    let raw = raw.context("A client identifier is required: pass --user-agent or set SEC_USER_AGENT")?;
    Ok(validate_client_identifier(&raw)?)
}

async fn run_build_index(args: BuildIndexArgs, config: &FileConfig) -> Result<ExitCode> {
    let user_agent = client_identifier(args.user_agent)?;
    let tickers = edgar_client::load_ticker_map(&args.tickers)
        .with_context(|| format!("Failed to load ticker map: {}", args.tickers.display()))?;
    let resolved = load_companies(&args.companies, &tickers)?;
    info!(
        companies = resolved.companies.len(),
        unresolved = resolved.unresolved.len(),
        "Resolved company source"
    );

    let request = IndexRequest::builder()
        .forms(if args.forms.is_empty() {
            config.index.forms.clone()
        } else {
            args.forms
        })
        .min_date(args.min_date.unwrap_or(config.index.min_date))
        .max_per_company(args.max_per_company.unwrap_or(config.index.max_per_company))
        .request_delay(config.index.request_delay())
        .build();

    let source = EdgarFilingSource::new(EdgarClient::new(&user_agent)?);
    let outcome = build_index(&source, &resolved.companies, &request).await;

    write_listing(&args.out, &outcome.filings)?;
    let mut warnings = resolved.unresolved;
    warnings.extend(outcome.warnings);
    write_warnings(&sibling(&args.out, "index_errors.log"), &warnings)?;

    info!(
        path = %args.out.display(),
        filings = outcome.filings.len(),
        warnings = warnings.len(),
        "build-index complete"
    );
    Ok(ExitCode::SUCCESS)
}

fn run_assemble(args: AssembleArgs, config: &FileConfig) -> Result<ExitCode> {
    let filings = read_listings(args.listing.as_slice())?;
    let targets = TargetCounts {
        a: args.a_count.unwrap_or(config.assemble.a_count),
        b: args.b_count.unwrap_or(config.assemble.b_count),
        c_yoy: args.c_yoy_count.unwrap_or(config.assemble.c_yoy_count),
        c_peer: args.c_peer_count.unwrap_or(config.assemble.c_peer_count),
    };

    let store = assemble(&filings, &targets)?;
    store.save(&args.out)?;
    info!(path = %args.out.display(), tasks = store.len(), "assemble complete");
    Ok(ExitCode::SUCCESS)
}

async fn run_finalize(args: FinalizeArgs, config: &FileConfig) -> Result<ExitCode> {
    let user_agent = client_identifier(args.user_agent)?;
    let browserless_url = args
        .browserless_url
        .context("A renderer endpoint is required: pass --browserless-url or set BROWSERLESS_URL")?;

    let mut store = TaskStore::load(&args.store)?;

    let mut retry = config.finalize.retry_policy();
    if let Some(n) = args.max_attempts {
        retry.max_attempts = n;
    }
    let concurrency = args.concurrency.unwrap_or(config.finalize.concurrency);
    let ledger_path = args
        .ledger
        .or_else(|| config.finalize.ledger.clone())
        .unwrap_or_else(|| args.out_dir.join("failed_rows.csv"));

    let renderer = BrowserlessRenderer::new(
        &browserless_url,
        args.browserless_token.as_deref(),
        &user_agent,
        config.finalize.render_timeout(),
        concurrency,
    )?
    .with_html_cache(args.out_dir.join("html_cache"), args.overwrite);

    let options = FinalizeOptions::builder()
        .store_path(args.store.clone())
        .out_dir(args.out_dir.clone())
        .ledger_path(ledger_path)
        .only_missing(args.only_missing)
        .overwrite(args.overwrite)
        .concurrency(concurrency)
        .retry(retry)
        .build();

    let report = finalize(&mut store, &renderer, &options).await?;
    report.save(&args.out_dir.join("finalize_report.json"))?;
    info!("Finalize run complete. {report}");

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_status(args: StatusArgs) -> Result<ExitCode> {
    let store = TaskStore::load(&args.store)?;
    let counts = store.status_counts();
    let count = |s: TaskStatus| counts.get(&s).copied().unwrap_or(0);

    if args.json {
        let summary = serde_json::json!({
            "tasks": store.len(),
            "pending": count(TaskStatus::Pending),
            "partial": count(TaskStatus::Partial),
            "complete": count(TaskStatus::Complete),
            "linked": count(TaskStatus::Linked),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Tasks:    {}", store.len());
        for status in [
            TaskStatus::Pending,
            TaskStatus::Partial,
            TaskStatus::Complete,
            TaskStatus::Linked,
        ] {
            println!("{:<9} {}", format!("{status}:"), count(status));
        }
    }

    Ok(if store.all_done() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// A file next to `path`, in the same directory.
fn sibling(path: &Path, name: &str) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}
