use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use pricewatch_config::{
    PricewatchConfig, config_path, ensure_workspace_config, load_workspace_config_with_warnings,
};
use pricewatch_core::{ChangeEvent, render_overview};
use pricewatch_store::{InMemoryStore, JsonFileStore, ReportStore, RetryPolicy, snapshot_file};
use pricewatchd::pipeline::{CategoryJob, Pipeline, PipelineSettings};
use pricewatchd::runner::{CategoryResult, RunRequest, Runner, plan_jobs};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: text, json"
            )),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Product listing change detector")]
struct Cli {
    #[arg(long, default_value = ".", help = "Workspace root holding .pricewatch/")]
    workspace: PathBuf,

    #[arg(
        long = "category",
        help = "Category to analyze; repeatable. Defaults to every configured category"
    )]
    categories: Vec<String>,

    #[arg(long, help = "Listings JSON to use for the single selected category")]
    input: Option<PathBuf>,

    #[arg(long, help = "Minimum percent price movement to report, overriding the config")]
    threshold: Option<f64>,

    #[arg(long, help = "Print change events as JSON lines")]
    print_events: bool,

    #[arg(long, help = "Keep running, once every interval_hours")]
    watch: bool,

    #[arg(long, help = "Read baselines from disk but write nothing")]
    dry_run: bool,

    #[arg(
        long,
        conflicts_with_all = ["categories", "input", "threshold", "watch", "dry_run"],
        help = "Print an overview of the latest report of every category and exit"
    )]
    summary: bool,

    #[arg(
        long,
        default_value = "text",
        value_parser = parse_log_format,
        help = "Log output format: text or json"
    )]
    log_format: LogFormat,
}

#[derive(Serialize)]
struct EventLine<'a> {
    category: &'a str,
    #[serde(flatten)]
    event: &'a ChangeEvent,
}

fn main() -> Result<()> {
    let cli = parse_cli();
    init_logging(cli.log_format);
    run(cli)
}

fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    if cli.summary {
        return print_summary(&workspace);
    }

    if !cli.dry_run {
        ensure_workspace_config(&workspace).with_context(|| {
            format!(
                "failed to load or create workspace config at {}",
                config_path(&workspace).display()
            )
        })?;
    }
    let (config, warnings) = load_workspace_config_with_warnings(&workspace)
        .with_context(|| format!("failed to load {}", config_path(&workspace).display()))?;
    for warning in &warnings {
        tracing::warn!(code = warning.code, "config warning: {}", warning.message);
    }

    let request = RunRequest {
        categories: cli.categories,
        input: cli.input,
        threshold_percent: cli.threshold,
    };
    let jobs = plan_jobs(&workspace, &config, &request)?;
    if jobs.is_empty() {
        tracing::warn!("no categories to analyze");
        return Ok(());
    }

    let pipeline = if cli.dry_run {
        dry_run_pipeline(&workspace, &config, &jobs)
    } else {
        file_pipeline(&workspace, &config)?
    };
    let runner = Runner::new(pipeline, config.max_concurrent_categories)?;
    let interval = Duration::from_secs(config.interval_hours.saturating_mul(3_600));

    loop {
        let results = runner.run_once(jobs.clone(), Utc::now());
        let failed = report_results(&results, cli.print_events)?;

        if !cli.watch {
            if failed > 0 {
                bail!("{failed} of {} categories failed", results.len());
            }
            return Ok(());
        }

        tracing::info!(
            failed,
            interval_hours = config.interval_hours,
            "run finished, waiting for the next one"
        );
        std::thread::sleep(interval);
    }
}

fn file_pipeline(workspace: &Path, config: &PricewatchConfig) -> Result<Pipeline> {
    let retry = RetryPolicy::new(
        config.store.retry_attempts,
        Duration::from_millis(config.store.retry_backoff_ms),
    );
    let store = Arc::new(
        JsonFileStore::open(workspace)
            .context("failed to open snapshot store")?
            .with_retry(retry),
    );

    Ok(Pipeline::new(
        store.clone(),
        store,
        PipelineSettings::from_config(config),
    ))
}

/// Seeds an in-memory store with whatever baselines are on disk, so a dry
/// run reports real changes without persisting anything.
fn dry_run_pipeline(
    workspace: &Path,
    config: &PricewatchConfig,
    jobs: &[CategoryJob],
) -> Pipeline {
    let store = Arc::new(InMemoryStore::new());
    for job in jobs {
        let path = snapshot_file(workspace, &job.name);
        match fs::read(&path) {
            Ok(bytes) => store.insert_raw(&job.name, bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                category = %job.name,
                path = %path.display(),
                error = %err,
                "could not read baseline for dry run"
            ),
        }
    }

    Pipeline::new(
        store.clone(),
        store,
        PipelineSettings::from_config(config),
    )
}

fn print_summary(workspace: &Path) -> Result<()> {
    let store = JsonFileStore::open(workspace).context("failed to open report store")?;
    let reports = store
        .latest_reports()
        .context("failed to list stored reports")?;

    let mut stdout = io::stdout().lock();
    write!(stdout, "{}", render_overview(&reports, Utc::now()))
        .context("failed to write summary")?;
    stdout.flush().context("failed to flush stdout")
}

fn report_results(results: &[CategoryResult], print_events: bool) -> Result<usize> {
    let mut stdout = io::stdout().lock();
    let mut failed = 0;

    for result in results {
        match &result.outcome {
            Ok(outcome) if print_events => {
                for event in &outcome.report.events {
                    let line = serde_json::to_string(&EventLine {
                        category: &result.category,
                        event,
                    })
                    .context("failed to serialize change event")?;
                    writeln!(stdout, "{line}").context("failed to write change event")?;
                }
            }
            Ok(_) => {}
            Err(err) => {
                failed += 1;
                tracing::error!(
                    category = %result.category,
                    error = %format!("{err:#}"),
                    "category run failed"
                );
            }
        }
    }

    stdout.flush().context("failed to flush stdout")?;
    Ok(failed)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}
