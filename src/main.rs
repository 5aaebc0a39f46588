// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `poolcnt` — pool reference-count maintenance engine CLI (spec §6).
//!
//! Usage:
//!   poolcnt -h HOST [-f] [-c] [-p] [-v] [--config poolcnt.toml]
//!   poolcnt -m [-f] [-c] [-s] [-r N-M] [-P phase] [-p] [-v] [--config poolcnt.toml]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use poolcnt::backup_walker::ListBackupWalker;
use poolcnt::config::Conf;
use poolcnt::context::MaintenanceContext;
use poolcnt::error::{MaintError, Result};
use poolcnt::host_reconciler::HostReconciler;
use poolcnt::pool_aggregator::PoolAggregator;
use poolcnt::pool_cleaner::PoolCleaner;
use poolcnt::progress::{NullProgressSink, ProgressSink, StdoutProgressSink};
use poolcnt::stats::StatsEmitter;

#[derive(Parser)]
#[command(name = "poolcnt", about = "Pool reference-count maintenance engine", version)]
struct Cli {
    /// Single-host mode: fold pending deltas for HOST.
    #[arg(short = 'h', long = "host", value_name = "HOST")]
    host: Option<String>,

    /// Global mode: reconcile every configured host, then the pool.
    #[arg(short = 'm', long = "global")]
    global: bool,

    /// Force a full rebuild instead of folding pending deltas.
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Single-host mode: compare the rebuild against the existing
    /// counts. Global mode: reclaim unreferenced pool objects.
    #[arg(short = 'c', long = "clean")]
    clean: bool,

    /// Print per-shard stats lines (implied by -c).
    #[arg(short = 's', long = "stats")]
    stats: bool,

    /// Restrict the shard range to N-M (0 <= N <= M <= 255).
    #[arg(short = 'r', long = "range", value_name = "N-M")]
    range: Option<String>,

    /// Full-scan phase slice, 0-15.
    #[arg(short = 'P', long = "phase", default_value_t = 0)]
    phase: u8,

    /// Suppress progress protocol output.
    #[arg(short = 'p', long = "no-progress")]
    no_progress: bool,

    /// Raise log verbosity; repeat for more (-v, -vv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file.
    #[arg(long = "config", default_value = "poolcnt.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_writer(std::io::stderr)
        .init();

    let conf = match Conf::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("poolcnt: {e}");
            std::process::exit(1);
        }
    };

    let progress: Arc<dyn ProgressSink> = if cli.no_progress {
        Arc::new(NullProgressSink)
    } else {
        Arc::new(StdoutProgressSink)
    };
    let ctx = MaintenanceContext::new(progress);
    ctx.progress.start(std::process::id());

    let run_result = match (&cli.host, cli.global) {
        (Some(host), false) => run_single_host(&conf, ctx.clone(), host, &cli),
        (None, true) => run_global(&conf, ctx.clone(), &cli).await,
        (Some(_), true) => Err(MaintError::BadArgs(
            "-h and -m are mutually exclusive".to_string(),
        )),
        (None, false) => Err(MaintError::BadArgs(
            "exactly one of -h HOST or -m is required".to_string(),
        )),
    };

    if let Err(e) = run_result {
        ctx.record_error("cli", &e);
    }

    ctx.progress.finish();

    let errors = ctx.error_count();
    if errors > 0 {
        println!("total errors: {errors}");
    }
    std::process::exit(if errors > 0 { 1 } else { 0 });
}

fn run_single_host(conf: &Conf, ctx: MaintenanceContext, host: &str, cli: &Cli) -> Result<()> {
    if cli.clean && !cli.force {
        return Err(MaintError::BadArgs(
            "-c requires -f in single-host mode".to_string(),
        ));
    }
    let reconciler = HostReconciler::new(conf, ctx);
    let walker = ListBackupWalker::new(conf.host_dir(host));
    reconciler.reconcile(host, cli.force, cli.clean, &walker)
}

async fn run_global(conf: &Conf, ctx: MaintenanceContext, cli: &Cli) -> Result<()> {
    if cli.phase > 15 {
        return Err(MaintError::BadArgs(format!(
            "-P must be 0-15, got {}",
            cli.phase
        )));
    }
    let (start, end) = parse_range(&cli.range)?;

    let mut tasks = Vec::new();
    for host in conf.hosts.clone() {
        let conf_for_task = conf.clone();
        let ctx_for_task = ctx.clone();
        let force = cli.force;
        tasks.push(tokio::spawn(async move {
            let reconciler = HostReconciler::new(&conf_for_task, ctx_for_task.clone());
            let walker = ListBackupWalker::new(conf_for_task.host_dir(&host));
            if let Err(e) = reconciler.reconcile(&host, force, false, &walker) {
                ctx_for_task.record_error(&format!("host:{host}"), &e);
            }
        }));
    }
    for task in tasks {
        let _ = task.await;
    }

    if ctx.error_count() > 0 {
        tracing::warn!("skipping pool aggregation: host reconciliation reported errors");
        return Ok(());
    }

    let aggregator = PoolAggregator::new(conf, ctx.clone());
    let cleaner = PoolCleaner::new(conf, ctx.clone());
    let emit_stats = cli.stats || cli.clean;
    let total_shards = u64::from(end.saturating_sub(start)) + 1;

    for class in 0u8..=1 {
        let emitter = StatsEmitter::new(if class == 0 { "pool" } else { "cpool" });
        let mut done: u64 = 0;
        for shard in start..=end {
            let mut stats = match aggregator.aggregate_shard(class, shard, cli.phase) {
                Ok(s) => s,
                Err(e) => {
                    ctx.record_error(&format!("pool:{class}.{shard:02x}"), &e);
                    done += 1;
                    ctx.progress.file_count(done, total_shards);
                    continue;
                }
            };

            if cli.clean {
                match cleaner.clean_shard(class, shard) {
                    Ok(clean_stats) => {
                        stats.blk_cnt_rm = clean_stats.blk_cnt_rm;
                        stats.file_cnt_rm = clean_stats.file_cnt_rm;
                        stats.file_cnt -= clean_stats.file_cnt_rm;
                        stats.blk_cnt -= clean_stats.blk_cnt_rm;
                    }
                    Err(e) => ctx.record_error(&format!("pool:{class}.{shard:02x}"), &e),
                }
            }

            if emit_stats {
                emitter.emit(shard, &stats);
            }

            done += 1;
            ctx.progress.file_count(done, total_shards);
        }
    }

    Ok(())
}

/// `-r N-M` → `[N/2, M/2]` (spec §6, §9: lossy integer-division mapping
/// is intentional; `-P` is the precise full-scan selector).
fn parse_range(range: &Option<String>) -> Result<(u8, u8)> {
    let Some(s) = range else {
        return Ok((0, 127));
    };
    let (n_str, m_str) = s
        .split_once('-')
        .ok_or_else(|| MaintError::BadArgs(format!("invalid -r range '{s}'")))?;
    let n: u16 = n_str
        .parse()
        .map_err(|_| MaintError::BadArgs(format!("invalid -r range '{s}'")))?;
    let m: u16 = m_str
        .parse()
        .map_err(|_| MaintError::BadArgs(format!("invalid -r range '{s}'")))?;
    if n > m || m > 255 {
        return Err(MaintError::BadArgs(format!(
            "invalid -r range '{s}': need 0 <= N <= M <= 255"
        )));
    }
    Ok(((n / 2) as u8, (m / 2) as u8))
}
