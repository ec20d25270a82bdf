//! YCSB workload driver.
//!
//! Loads an initial key space, runs one client per configured worker for
//! a fixed duration, and prints aggregated throughput and abort counters.
//!
//! ```bash
//! # Workload F, 2 nodes x 2 workers, 10 seconds
//! ycsb --workload F --nodes 2 --workers-per-node 2 --duration-secs 10
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ferrite_bench::client::{load_initial_records, ClientOptions, ClientOutputs, YcsbClient};
use ferrite_bench::workload::YcsbWorkload;
use ferrite_common::config::EngineConfig;
use ferrite_common::types::WorkerId;
use ferrite_engine::Engine;
use ferrite_storage::TableKind;

/// YCSB workload driver for the ferrite engine.
#[derive(Parser, Debug)]
#[command(name = "ycsb", version, about = "YCSB workload driver")]
struct Args {
    /// Workload mix (A-F)
    #[arg(short, long, default_value = "F")]
    workload: char,

    /// Seconds to run the measurement phase
    #[arg(short, long, default_value_t = 10)]
    duration_secs: u64,

    /// Data directory (a temporary directory when omitted)
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// NUMA groups to configure
    #[arg(long, default_value_t = 1)]
    nodes: u16,

    /// Worker threads per node
    #[arg(long, default_value_t = 2)]
    workers_per_node: u16,

    /// Loggers per node
    #[arg(long, default_value_t = 1)]
    loggers_per_node: u16,

    /// Page pool size per node in MB
    #[arg(long, default_value_t = 64)]
    pool_mb: u64,

    /// Records loaded per worker before the measurement phase
    #[arg(long, default_value_t = 10_000)]
    initial_records: u32,

    /// Zipfian skew for key selection
    #[arg(long, default_value_t = 0.99)]
    zipfian_theta: f64,

    /// Insert into random workers' key spaces
    #[arg(long)]
    random_inserts: bool,

    /// Use a hash user table instead of an ordered one
    #[arg(long)]
    hash_table: bool,

    /// Read single fields instead of whole records
    #[arg(long)]
    single_field_reads: bool,

    /// Write whole records instead of single fields
    #[arg(long)]
    write_all_fields: bool,

    /// PRNG seed
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Print per-phase timings
    #[arg(long)]
    profile: bool,

    /// Collect hardware performance counters (not supported)
    #[arg(long)]
    papi: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let data_root = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => tempdir()?,
    };
    let mut config = EngineConfig::default()
        .with_data_root(&data_root)
        .with_group_count(args.nodes)
        .with_threads_per_group(args.workers_per_node)
        .with_loggers_per_node(args.loggers_per_node)
        .with_page_pool_size_mb(args.pool_mb);
    config.debugging.log_level = args.log_level.clone();

    init_logging(&config);

    if args.papi {
        warn!("hardware performance counters are not supported; ignoring --papi");
    }

    let workload = YcsbWorkload::by_desc(args.workload)
        .with_context(|| format!("unknown workload '{}'", args.workload))?;
    let table_kind = if args.hash_table {
        TableKind::Hash
    } else {
        TableKind::Ordered
    };
    if let Err(err) = workload.validate(table_kind) {
        bail!("workload rejected: {err}");
    }

    let setup_started = Instant::now();
    let engine = Arc::new(Engine::new(config).context("engine construction failed")?);
    engine.initialize().context("engine init failed")?;
    let table = engine
        .storage_manager()
        .create_table("ycsb_user_table", table_kind)
        .context("table creation failed")?;

    let total_workers = engine.config().thread.total_workers();
    let key_counters: Arc<Vec<AtomicU32>> =
        Arc::new((0..total_workers).map(|_| AtomicU32::new(0)).collect());

    let load_started = Instant::now();
    for worker in 0..total_workers {
        load_initial_records(
            engine.xct_manager(),
            &table,
            &key_counters,
            WorkerId::new(worker),
            args.initial_records,
        )
        .context("load phase failed")?;
    }
    engine.log_manager().flush();
    info!(
        workers = total_workers,
        records_per_worker = args.initial_records,
        "load phase complete"
    );

    // Measurement phase: one client thread per worker, started together.
    let stop = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(total_workers as usize + 1));
    let run_started = Instant::now();
    let mut handles = Vec::new();
    for worker in 0..total_workers {
        let mut client = YcsbClient::new(
            WorkerId::new(worker),
            Arc::clone(engine.xct_manager()),
            Arc::clone(&table),
            ClientOptions {
                workload,
                zipfian_theta: args.zipfian_theta,
                random_inserts: args.random_inserts,
                read_all_fields: !args.single_field_reads,
                write_all_fields: args.write_all_fields,
                rng_seed: args.seed,
            },
            Arc::clone(&key_counters),
            Arc::clone(&stop),
        );
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            client.run()
        }));
    }

    barrier.wait();
    std::thread::sleep(Duration::from_secs(args.duration_secs));
    stop.store(true, Ordering::Release);

    let mut totals = ClientOutputs::default();
    for handle in handles {
        let outputs = handle
            .join()
            .map_err(|_| anyhow::anyhow!("client thread panicked"))??;
        totals.merge(&outputs);
    }
    let run_elapsed = run_started.elapsed();

    engine.uninitialize().context("engine teardown failed")?;

    let throughput = totals.processed as f64 / run_elapsed.as_secs_f64();
    println!("workload {}: {} workers", workload.desc, total_workers);
    println!(
        "  processed:              {} ({:.0} tps)",
        totals.processed, throughput
    );
    println!("  race aborts:            {}", totals.race_aborts);
    println!("  largereadset aborts:    {}", totals.largereadset_aborts);
    println!("  insert conflict aborts: {}", totals.insert_conflict_aborts);
    println!("  unexpected aborts:      {}", totals.unexpected_aborts);
    if totals.total_scans > 0 {
        println!(
            "  scans:                  {} ({} records)",
            totals.total_scans, totals.total_scan_length
        );
    }
    if args.profile {
        println!("  setup:                  {:?}", load_started - setup_started);
        println!("  load:                   {:?}", run_started - load_started);
        println!("  run:                    {:?}", run_elapsed);
    }
    Ok(())
}

/// Initializes tracing from the engine's debugging options, with
/// per-module verbosity when `verbose_modules` is set.
fn init_logging(config: &EngineConfig) {
    let mut directives = config.debugging.log_level.clone();
    for module in config
        .debugging
        .verbose_modules
        .split(',')
        .filter(|m| !m.is_empty())
    {
        directives.push_str(&format!(",{}=trace", module.trim()));
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives)),
        )
        .init();
}

/// Creates a unique scratch directory under the system temp dir.
fn tempdir() -> Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("ferrite_ycsb_{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
