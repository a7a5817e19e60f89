//! content-migrate CLI - Resumable legacy CMS content migration.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use content_migrate::{
    ArticleFilters, BatchOptions, Config, JobProgress, JobStatus, MigrateError, MigrationResult,
    Orchestrator, RunOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Log entries shown by `status`.
const LOG_TAIL: usize = 10;

#[derive(Parser)]
#[command(name = "content-migrate")]
#[command(about = "Resumable migration of legacy CMS articles into the content schema")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MigrateArgs {
    /// Rows per batch (default: migration.batch_size)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Destination content type (default: migration.content_type)
    #[arg(long)]
    content_type: Option<String>,

    /// Run pre-flight validation before migrating
    #[arg(long)]
    validate_first: bool,

    /// Dry run: transform rows and report without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Continue despite validation errors or a changed configuration
    #[arg(long)]
    force: bool,

    /// Only migrate rows with this legacy status
    #[arg(long)]
    status: Option<String>,

    /// Only migrate rows in this legacy category
    #[arg(long)]
    category: Option<String>,

    /// Only migrate rows created on or after this date (YYYY-MM-DD)
    #[arg(long)]
    date_from: Option<NaiveDate>,

    /// Only migrate rows created on or before this date (YYYY-MM-DD)
    #[arg(long)]
    date_to: Option<NaiveDate>,

    /// Only migrate rows whose title or content contains this text
    #[arg(long)]
    search: Option<String>,

    /// Start after this legacy id
    #[arg(long)]
    resume_from_id: Option<i64>,

    /// Stop after this many articles
    #[arg(long)]
    max_articles: Option<u64>,

    /// Resume an existing running job instead of starting a new one
    #[arg(long)]
    job_id: Option<String>,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    show_progress: bool,

    /// Report legacy URL redirects for migrated rows
    #[arg(long)]
    create_redirects: bool,

    /// Keep legacy parent ids in content metadata
    #[arg(long)]
    preserve_hierarchy: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate legacy articles in batches
    Migrate(MigrateArgs),

    /// Validate the legacy database before migrating
    Validate,

    /// Show progress of a job
    Status {
        #[arg(long)]
        job_id: String,
    },

    /// List active jobs, or the most recent jobs with --history
    Jobs {
        /// Show the N most recent jobs of any status
        #[arg(long)]
        history: Option<usize>,
    },

    /// Cancel a running job
    Cancel {
        #[arg(long)]
        job_id: String,
    },

    /// Resync active mappings from the legacy database
    Sync {
        /// Maximum number of mappings to resync
        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Test database connections
    HealthCheck,

    /// Create destination and job tables
    InitSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Migrate(args) => {
            let cancel_token = setup_signal_handler().await?;
            migrate(config, args, cli.output_json, cancel_token).await?;
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::from_config(config)?;
            let report = orchestrator.validate().await;

            if cli.output_json {
                println!("{}", report.to_json());
            } else {
                println!("Validation Report ({:?}):", report.status);
                for test in &report.tests {
                    println!("  [{:?}] {}: {}", test.outcome, test.name, test.message);
                }
                print_list("Errors", &report.errors);
                print_list("Warnings", &report.warnings);
                print_list("Notices", &report.notices);
                print_list("Recommendations", &report.recommendations);
            }

            if report.has_errors() {
                return Err(MigrateError::Validation(format!(
                    "{} validation errors",
                    report.errors.len()
                )));
            }
        }

        Commands::Status { job_id } => {
            let orchestrator = Orchestrator::from_config(config)?;
            let progress = orchestrator.tracker().get_job_progress(&job_id).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                print_job(&progress, true);
            }
        }

        Commands::Jobs { history } => {
            let orchestrator = Orchestrator::from_config(config)?;
            let tracker = orchestrator.tracker();

            match history {
                Some(limit) => {
                    let jobs = tracker.get_job_history(limit).await?;
                    if cli.output_json {
                        println!("{}", serde_json::to_string_pretty(&jobs)?);
                    } else if jobs.is_empty() {
                        println!("No jobs recorded");
                    } else {
                        for job in &jobs {
                            println!(
                                "{}  {:<22} {}/{} rows  started {}",
                                job.job_id,
                                job.status.to_string(),
                                job.processed,
                                job.total,
                                job.started_at.format("%Y-%m-%d %H:%M:%S")
                            );
                        }
                    }
                }
                None => {
                    let jobs = tracker.get_active_jobs().await?;
                    if cli.output_json {
                        println!("{}", serde_json::to_string_pretty(&jobs)?);
                    } else if jobs.is_empty() {
                        println!("No active jobs");
                    } else {
                        for job in &jobs {
                            print_job(job, false);
                        }
                    }
                }
            }
        }

        Commands::Cancel { job_id } => {
            let orchestrator = Orchestrator::from_config(config)?;
            if orchestrator.tracker().cancel_job(&job_id).await? {
                println!("Job {} cancelled", job_id);
            } else {
                let status = orchestrator.tracker().durable_status(&job_id).await?;
                return Err(MigrateError::InvalidTransition {
                    job_id,
                    status: status.to_string(),
                });
            }
        }

        Commands::Sync { limit } => {
            let orchestrator = Orchestrator::from_config(config)?;
            let summary = orchestrator.sync(limit).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Sync completed!");
                println!("  Mappings: {}", summary.total);
                println!("  Updated: {}", summary.updated);
                println!("  Failed: {}", summary.failed);
                for outcome in summary.outcomes.iter().filter(|o| o.error.is_some()) {
                    println!(
                        "    Row {}: {}",
                        outcome.source_id,
                        outcome.error.as_deref().unwrap_or_default()
                    );
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::from_config(config)?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MySQL): {} ({}ms, {} tables)",
                    if result.source.is_success() { "OK" } else { "FAILED" },
                    result.source.latency_ms,
                    result.source.table_count
                );
                if !result.source.is_success() {
                    println!("    Error: {}", result.source.message);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Connection("Health check failed".to_string()));
            }
        }

        Commands::InitSchema => {
            let orchestrator = Orchestrator::from_config(config)?;
            orchestrator.init_schema().await?;
            println!("Schema initialized");
        }
    }

    Ok(())
}

fn run_options(config: &Config, args: &MigrateArgs) -> RunOptions {
    let mut batch = BatchOptions::from_config(config);
    if let Some(size) = args.batch_size {
        batch.batch_size = size;
    }
    if let Some(ref content_type) = args.content_type {
        batch.content_type = content_type.clone();
    }
    batch.filters = ArticleFilters {
        status: args.status.clone(),
        category: args.category.clone(),
        date_from: args.date_from,
        date_to: args.date_to,
        search: args.search.clone(),
    };
    batch.after_id = args.resume_from_id;
    batch.dry_run = args.dry_run;
    batch.create_redirects |= args.create_redirects;
    batch.preserve_hierarchy |= args.preserve_hierarchy;

    RunOptions {
        batch,
        max_items: args.max_articles,
        validate_first: args.validate_first,
        force: args.force,
    }
}

async fn migrate(
    config: Config,
    args: MigrateArgs,
    output_json: bool,
    cancel_token: CancellationToken,
) -> Result<(), MigrateError> {
    if args.batch_size == Some(0) {
        return Err(MigrateError::Config("--batch-size must be at least 1".into()));
    }
    let options = run_options(&config, &args);
    let mut orchestrator = Orchestrator::from_config(config)?;

    let printer = if args.show_progress {
        let (tx, mut rx) = mpsc::channel(64);
        orchestrator = orchestrator.with_progress(tx);
        Some(tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&update) {
                    eprintln!("{}", line);
                }
            }
        }))
    } else {
        None
    };

    let result = match args.job_id {
        Some(ref job_id) => {
            info!("Resuming job {}", job_id);
            orchestrator.resume(job_id, args.force, cancel_token).await
        }
        None => orchestrator.run(options, cancel_token).await,
    };

    // Close the progress channel so the printer drains and exits
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let result = result?;

    if output_json {
        println!("{}", result.to_json()?);
    } else {
        print_result(&result);
    }

    if result.status == JobStatus::Cancelled {
        return Err(MigrateError::Cancelled);
    }
    Ok(())
}

fn print_result(result: &MigrationResult) {
    let status_msg = if result.dry_run {
        "Dry run completed!"
    } else {
        "Migration completed!"
    };
    println!("\n{}", status_msg);
    if let Some(ref job_id) = result.job_id {
        println!("  Job ID: {}", job_id);
    }
    println!("  Status: {}", result.status);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Batches: {}", result.batches);
    println!(
        "  Rows: {}/{} ({} failed, {} skipped)",
        result.successful, result.total, result.failed, result.skipped
    );
    println!("  Throughput: {:.1} rows/sec", result.rows_per_second);
    if let Some(last) = result.last_source_id {
        println!("  Last source id: {}", last);
    }
    if result.redirects > 0 {
        println!("  Redirects: {}", result.redirects);
    }
    if !result.error_samples.is_empty() {
        println!("  Errors:");
        for error in &result.error_samples {
            println!("    Row {}: {}", error.source_id, error.message);
        }
    }
}

fn print_job(progress: &JobProgress, with_logs: bool) {
    let job = &progress.job;
    println!("Job {}", job.job_id);
    println!("  Status: {}", job.status);
    println!(
        "  Progress: {}/{} ({:.1}%), batch {}/{}",
        job.processed, job.total, job.stats.percentage, job.current_batch, job.total_batches
    );
    println!(
        "  Successful: {}  Failed: {}  Skipped: {}",
        job.successful, job.failed, job.skipped
    );
    println!("  Throughput: {:.1} rows/sec", job.stats.throughput);
    if let Some(eta) = job.stats.eta {
        println!("  ETA: {}", eta.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "  Errors: {}  Warnings: {}",
        job.errors.len(),
        job.warnings.len()
    );
    if progress.possibly_orphaned {
        println!("  Possibly orphaned: no update since {}", job.updated_at);
    }

    if with_logs && !job.logs.is_empty() {
        println!("  Recent log:");
        let start = job.logs.len().saturating_sub(LOG_TAIL);
        for entry in &job.logs[start..] {
            println!(
                "    {} {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.message
            );
        }
    }
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("\n{}:", title);
    for item in items {
        println!("  - {}", item);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM; the batch loop stops after the
/// batch in flight.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Stopping after the current batch...");
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Stopping after the current batch...");
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
source:
  host: legacy-db
  database: legacy_cms
  user: reader
target:
  host: localhost
  database: cms
  user: cms
migration:
  batch_size: 50
  create_redirects: true
"#;

    #[test]
    fn test_run_options_from_flags() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let cli = Cli::parse_from([
            "content-migrate",
            "migrate",
            "--batch-size",
            "10",
            "--status",
            "published",
            "--date-from",
            "2020-01-01",
            "--resume-from-id",
            "42",
            "--max-articles",
            "500",
            "--dry-run",
        ]);
        let Commands::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };

        let options = run_options(&config, &args);
        assert_eq!(options.batch.batch_size, 10);
        assert_eq!(options.batch.filters.status.as_deref(), Some("published"));
        assert_eq!(
            options.batch.filters.date_from,
            NaiveDate::from_ymd_opt(2020, 1, 1)
        );
        assert_eq!(options.batch.after_id, Some(42));
        assert_eq!(options.max_items, Some(500));
        assert!(options.batch.dry_run);
        assert!(options.batch.create_redirects);
        assert!(!options.validate_first);
    }

    #[test]
    fn test_run_options_default_to_config() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let cli = Cli::parse_from(["content-migrate", "migrate"]);
        let Commands::Migrate(args) = cli.command else {
            panic!("expected migrate");
        };

        let options = run_options(&config, &args);
        assert_eq!(options.batch.batch_size, 50);
        assert_eq!(options.batch.content_type, config.migration.content_type);
        assert!(options.batch.filters.is_empty());
        assert_eq!(options.max_items, None);
    }
}
