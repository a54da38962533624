//! Concurrent read load against the project caches.
//!
//! Readers run on the blocking pool since cache reads may call the supplier
//! inline. A progress task reports aggregate counters once per second until
//! the readers finish.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use rand::seq::SliceRandom;
use rand::Rng;
use timed_cache::{CacheConfig, RefreshSummary};
use tokio::task::JoinSet;

use crate::directory::{project_cache, DirectorySupplier, ProjectCaches};
use crate::output::{
    build_project_stats_row, print_json, print_report_table, OutputFormat, ReadOutcome,
    StressReport,
};

/// Users looked up that are never members, to exercise misses.
const UNKNOWN_USERS: [&str; 2] = ["mallory", "trudy"];

#[derive(Args)]
pub struct StressArgs {
    /// Directory file (YAML, or JSON with a .json extension)
    #[arg(long)]
    pub directory: PathBuf,

    /// Number of concurrent readers
    #[arg(long, default_value = "8")]
    pub readers: usize,

    /// How long to run
    #[arg(long, default_value = "2000")]
    pub duration_ms: u64,

    /// Simulated supplier latency per fetch
    #[arg(long, default_value = "50")]
    pub latency_ms: u64,

    /// Fraction of supplier calls that fail, between 0 and 1
    #[arg(long, default_value = "0.1")]
    pub failure_rate: f64,
}

/// Reads observed so far across all readers.
#[derive(Default)]
struct LiveCounters {
    reads: AtomicU64,
    errors: AtomicU64,
}

pub async fn run(args: &StressArgs, config: &CacheConfig, format: &OutputFormat) -> Result<()> {
    if args.readers == 0 {
        bail!("--readers must be at least 1");
    }
    if !(0.0..=1.0).contains(&args.failure_rate) {
        bail!("--failure-rate must be between 0 and 1");
    }

    let supplier = Arc::new(
        DirectorySupplier::new(&args.directory)
            .with_latency(Duration::from_millis(args.latency_ms))
            .with_failure_rate(args.failure_rate),
    );
    let projects = supplier
        .project_ids()
        .with_context(|| format!("Failed to load {}", args.directory.display()))?;
    if projects.is_empty() {
        bail!("Directory {} lists no projects", args.directory.display());
    }

    let mut users = supplier.user_ids()?;
    users.extend(UNKNOWN_USERS.iter().map(|u| u.to_string()));
    let users = Arc::new(users);
    let projects = Arc::new(projects);
    let caches = Arc::new(ProjectCaches::new());
    let live = Arc::new(LiveCounters::default());
    let config = Arc::new(config.clone());
    let duration = Duration::from_millis(args.duration_ms);

    eprintln!(
        "Running {} readers over {} projects for {} ms",
        args.readers,
        projects.len(),
        args.duration_ms
    );

    let started = Instant::now();
    let progress = {
        let live = Arc::clone(&live);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                eprintln!(
                    "  [{:>5} ms] {} reads, {} errors",
                    started.elapsed().as_millis(),
                    live.reads.load(Ordering::Relaxed),
                    live.errors.load(Ordering::Relaxed)
                );
            }
        })
    };

    let mut join_set = JoinSet::new();
    for _ in 0..args.readers {
        let supplier = Arc::clone(&supplier);
        let caches = Arc::clone(&caches);
        let config = Arc::clone(&config);
        let projects = Arc::clone(&projects);
        let users = Arc::clone(&users);
        let live = Arc::clone(&live);
        join_set.spawn_blocking(move || {
            read_loop(&supplier, &caches, &config, &projects, &users, &live, started + duration)
        });
    }

    let mut reads = ReadOutcome::default();
    while let Some(joined) = join_set.join_next().await {
        reads.merge(&joined.context("reader task panicked")?);
    }
    progress.abort();
    let elapsed = started.elapsed();

    let mut totals = RefreshSummary::default();
    let mut rows = Vec::with_capacity(projects.len());
    for project in projects.iter() {
        let Some(cache) = caches.get(project) else {
            continue;
        };
        let stats = cache.stats();
        totals.merge(&stats);
        rows.push(build_project_stats_row(
            project,
            cache.value().len(),
            &stats,
            cache.is_stale(),
        ));
    }

    let report = StressReport {
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        readers: args.readers,
        reads,
        projects: rows,
        totals,
    };
    tracing::info!(
        reads = report.reads.reads,
        errors = report.reads.errors,
        refreshes = report.totals.refreshes_started,
        "stress run finished"
    );

    match format {
        OutputFormat::Table => print_report_table(&report),
        OutputFormat::Json => print_json(&report),
    }
    Ok(())
}

fn read_loop(
    supplier: &Arc<DirectorySupplier>,
    caches: &ProjectCaches,
    config: &CacheConfig,
    projects: &[String],
    users: &[String],
    live: &LiveCounters,
    deadline: Instant,
) -> ReadOutcome {
    let mut rng = rand::thread_rng();
    let mut outcome = ReadOutcome::default();

    while Instant::now() < deadline {
        let (Some(project), Some(user)) = (projects.choose(&mut rng), users.choose(&mut rng))
        else {
            break;
        };

        let result = match project_cache(caches, supplier, config, project) {
            Ok(cache) => cache.get(user.as_str()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        outcome.reads += 1;
        live.reads.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(Some(_)) => outcome.hits += 1,
            Ok(None) => outcome.misses += 1,
            Err(e) => {
                outcome.errors += 1;
                live.errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("read {}/{} failed: {}", project, user, e);
            }
        }

        // think time
        std::thread::sleep(Duration::from_micros(rng.gen_range(100..1000)));
    }

    outcome
}
