use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

use catapult::broadcast::{LogBroadcaster, MonitorEventBroadcaster, TaskEventBroadcaster};
use catapult::config::{expand_tilde, load_settings, write_worker_template, Settings};
use catapult::db::location_repo::{self, NewLocation, DEFAULT_EXTENSIONS, DEFAULT_IGNORE_TERM};
use catapult::db::{analysis_repo, task_repo, worker_repo, Database};
use catapult::jobs::{AnalysisState, Scheduler};
use catapult::logging::{init_logging, LogConfig};
use catapult::monitor::{LocationHandler, LocationMonitor};
use catapult::readiness::ReadinessDetector;
use catapult::resolver::{self, command_line, descriptor_from_log, job_type_for, Descriptor};
use catapult::worker::{Coordinator, RunnerOptions, WorkerIdentity, WorkerRunner};

#[derive(Parser, Debug)]
#[command(
    name = "catapult",
    version,
    about = "Watch-folder orchestration for mass-spectrometry analyses"
)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true, env = "CATAPULT_CONFIG")]
    config: Option<PathBuf>,

    /// Catalog database; overrides `database_path` from the settings
    #[arg(long, global = true, env = "CATAPULT_DATABASE")]
    database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a watch location (or update its filters)
    AddLocation {
        root: PathBuf,

        /// Paths containing this term are ignored
        #[arg(long, default_value = DEFAULT_IGNORE_TERM)]
        ignore_term: String,

        /// Comma-separated raw-data extensions
        #[arg(long, default_value = DEFAULT_EXTENSIONS)]
        extensions: String,

        /// Poll instead of relying on native filesystem events
        #[arg(long)]
        network: bool,
    },

    /// Monitor every location and run the readiness/scheduling loop
    Sentinel {
        /// Queue new tasks are placed on
        #[arg(long)]
        queue: Option<String>,
    },

    /// Readiness detection, scheduling and stall report
    Check {
        /// Run one cycle and exit
        #[arg(long)]
        once: bool,

        #[arg(long)]
        queue: Option<String>,
    },

    /// Claim and run tasks
    Worker {
        /// Queues to serve (repeatable); `*` serves all
        #[arg(long = "queue")]
        queues: Vec<String>,

        #[arg(long)]
        interval_ms: Option<u64>,

        /// Exit once the queue is empty
        #[arg(long)]
        batch: bool,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        hostname: Option<String>,
    },

    /// Write a settings skeleton for a worker
    WorkerTemplate {
        name: String,
        hostname: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rebuild a descriptor from an engine log
    ConfigFromLog {
        log: PathBuf,

        /// Write the descriptor here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the engine command line a descriptor encodes
    Resolve { descriptor: PathBuf },

    /// Show analyses, their tasks and registered workers
    Status,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Settings::default(),
    };

    let logfile = match &cli.command {
        Commands::Worker { .. } => settings.worker.logfile.as_deref().map(expand_tilde),
        _ => None,
    };
    init_logging(&LogConfig {
        level: settings.logging.level.clone(),
        verbose: cli.verbose,
        json: settings.logging.json,
        logfile,
    })?;

    match cli.command {
        Commands::AddLocation {
            root,
            ignore_term,
            extensions,
            network,
        } => add_location(&open_database(&cli.database, &settings)?, &root, ignore_term, extensions, network),
        Commands::Sentinel { queue } => sentinel(open_database(&cli.database, &settings)?, &settings, queue),
        Commands::Check { once, queue } => check(open_database(&cli.database, &settings)?, &settings, once, queue),
        Commands::Worker {
            queues,
            interval_ms,
            batch,
            name,
            hostname,
        } => {
            let mut worker_settings = settings.worker.clone();
            if !queues.is_empty() {
                worker_settings.queues = queues;
            }
            if let Some(ms) = interval_ms {
                worker_settings.interval_ms = ms;
            }
            let identity = WorkerIdentity::resolve(&worker_settings, name.as_deref(), hostname.as_deref());
            let mut options = RunnerOptions::from_settings(&worker_settings);
            options.batch = batch;
            worker(
                open_database(&cli.database, &settings)?,
                identity,
                worker_settings.queues,
                options,
            )
        }
        Commands::WorkerTemplate {
            name,
            hostname,
            output,
        } => {
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.json", name)));
            write_worker_template(&output, &name, &hostname)?;
            println!("Wrote {}", output.display());
            Ok(())
        }
        Commands::ConfigFromLog { log, output } => {
            let descriptor = descriptor_from_log(&log)?;
            match output {
                Some(path) => {
                    resolver::write_descriptor(&descriptor, &path)?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{}", descriptor.to_yaml(true)?),
            }
            Ok(())
        }
        Commands::Resolve { descriptor } => {
            let parsed = Descriptor::load(&descriptor)?;
            let engine = parsed.engine_path.clone().unwrap_or_else(|| settings.engine.path.clone());
            let argv = command_line(&engine, &parsed);
            println!("# {}", job_type_for(&parsed));
            println!("{}", shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" ")));
            Ok(())
        }
        Commands::Status => status(&open_database(&cli.database, &settings)?),
    }
}

fn open_database(flag: &Option<PathBuf>, settings: &Settings) -> Result<Database> {
    let path = match flag {
        Some(path) => path.clone(),
        None => match settings.database_path() {
            Some(path) => path,
            None => bail!("No catalog path: pass --database or set database_path"),
        },
    };
    Database::open(&path).with_context(|| format!("Failed to open catalog {}", path.display()))
}

fn add_location(db: &Database, root: &Path, ignore_term: String, extensions: String, network: bool) -> Result<()> {
    if !root.is_dir() {
        warn!("{} does not exist yet; it will be scanned once it appears", root.display());
    }
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let location = db.with_conn(|conn| {
        location_repo::upsert(
            conn,
            &NewLocation {
                root_path: root.to_string_lossy().into_owned(),
                ignore_term,
                extensions,
                network,
            },
        )
    })?;
    println!(
        "Location {}: {} (extensions {}, ignore '{}'{})",
        location.id,
        location.root_path,
        location.extensions,
        location.ignore_term,
        if location.network { ", polling" } else { "" }
    );
    Ok(())
}

fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down...");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(flag)
}

struct CheckLoop {
    detector: ReadinessDetector,
    scheduler: Scheduler,
    stall_threshold: Duration,
}

impl CheckLoop {
    fn new(db: Database, settings: &Settings, queue: Option<String>) -> Self {
        let mut scheduler = Scheduler::new(db.clone(), TaskEventBroadcaster::default(), settings.engine.path.clone());
        if let Some(queue) = queue {
            scheduler = scheduler.with_queue(queue);
        }
        Self {
            detector: ReadinessDetector::new(db, Duration::from_secs(settings.detector.threshold_secs)),
            scheduler,
            stall_threshold: Duration::from_secs(settings.detector.stall_threshold_secs),
        }
    }

    /// One pass; errors are logged and the next pass retries.
    fn cycle(&self) {
        let span = info_span!("check");
        let _guard = span.enter();

        if let Err(e) = self.detector.run_cycle() {
            error!("Readiness cycle failed: {}", e);
        }
        if let Err(e) = self.scheduler.run_cycle() {
            error!("Schedule cycle failed: {}", e);
        }
        if let Err(e) = self.scheduler.stall_report(self.stall_threshold, chrono::Utc::now()) {
            error!("Stall report failed: {}", e);
        }
    }
}

fn wait_or_shutdown(period: Duration, shutdown: &AtomicBool) {
    let deadline = std::time::Instant::now() + period;
    while std::time::Instant::now() < deadline && !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn check(db: Database, settings: &Settings, once: bool, queue: Option<String>) -> Result<()> {
    let checks = CheckLoop::new(db, settings, queue);
    if once {
        checks.cycle();
        return Ok(());
    }

    let shutdown = shutdown_flag()?;
    let period = Duration::from_secs(settings.detector.interval_secs);
    while !shutdown.load(Ordering::Relaxed) {
        checks.cycle();
        wait_or_shutdown(period, &shutdown);
    }
    Ok(())
}

fn sentinel(db: Database, settings: &Settings, queue: Option<String>) -> Result<()> {
    let shutdown = shutdown_flag()?;
    let events = MonitorEventBroadcaster::default();
    let poll = Duration::from_secs(settings.monitor.poll_interval_secs);

    let locations = db.with_conn(location_repo::list)?;
    if locations.is_empty() {
        warn!("No watch locations registered; use `catapult add-location`");
    }

    let mut monitors = Vec::new();
    for location in locations {
        let root = location.root_path.clone();
        let handler = LocationHandler::new(db.clone(), location, events.clone());
        let handle = LocationMonitor::new(handler, poll, Arc::clone(&shutdown))
            .spawn()
            .with_context(|| format!("Failed to start monitor for {}", root))?;
        monitors.push((root, handle));
    }

    let checks = CheckLoop::new(db, settings, queue);
    let period = Duration::from_secs(settings.detector.interval_secs);
    while !shutdown.load(Ordering::Relaxed) {
        checks.cycle();
        wait_or_shutdown(period, &shutdown);
    }

    for (root, handle) in monitors {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Monitor for {} stopped: {}", root, e),
            Err(_) => error!("Monitor for {} panicked", root),
        }
    }
    info!("Sentinel stopped");
    Ok(())
}

fn worker(db: Database, identity: WorkerIdentity, queues: Vec<String>, options: RunnerOptions) -> Result<()> {
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, cancelling...");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl+C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let coordinator = Coordinator::register(db, &identity, queues)?;
        let runner = WorkerRunner::new(
            coordinator,
            options,
            LogBroadcaster::default(),
            TaskEventBroadcaster::default(),
            cancel,
        );
        let summary = runner.run().await?;
        info!(
            "Worker '{}' done: {} succeeded, {} failed, {} retried",
            identity.name, summary.succeeded, summary.failed, summary.retried
        );
        Ok::<(), anyhow::Error>(())
    })
}

fn status(db: &Database) -> Result<()> {
    let analyses = db.with_conn(analysis_repo::list)?;
    if analyses.is_empty() {
        println!("No analyses");
    }
    for analysis in &analyses {
        let (claimed, completed, tasks) = db.with_conn(|conn| {
            Ok((
                analysis_repo::claimed_file_ids(conn, analysis.id)?.len(),
                analysis_repo::completed_file_ids(conn, analysis.id)?.len(),
                task_repo::status_counts(conn, analysis.id)?,
            ))
        })?;
        let target = analysis
            .total_files
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        let tasks: Vec<String> = tasks.iter().map(|(s, n)| format!("{}={}", s, n)).collect();
        println!(
            "{:>4}  {:<40} {:<10} {:<14} files {}/{} claimed {}  tasks [{}]",
            analysis.id,
            analysis.name,
            AnalysisState::from_flags(analysis.processing, analysis.completed).as_str(),
            analysis.job_type,
            completed,
            target,
            claimed,
            tasks.join(", ")
        );
    }

    let workers = db.with_conn(worker_repo::list)?;
    if !workers.is_empty() {
        println!();
        for worker in workers {
            println!(
                "worker {:<20} {:<20} {:<8} last seen {}",
                worker.name,
                worker.hostname,
                worker.status,
                worker.last_seen.as_deref().unwrap_or("never")
            );
        }
    }
    Ok(())
}
