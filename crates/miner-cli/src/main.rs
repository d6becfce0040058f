use clap::{Parser, Subcommand, ValueEnum};
use engine_cpu::{format_rate_human, rate_from_duration, Workload, WorkloadKind};
use miner_service::{
    HostService, MiningService, ServiceConfig, ServiceHost, StartIntent, DEFAULT_POOL_URL,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an experiment session (default behavior)
    Serve {
        /// Pool endpoint label recorded with the session (no connection is made)
        #[arg(long = "pool-url", env = "MINER_POOL_URL", default_value = DEFAULT_POOL_URL)]
        pool_url: String,

        /// Directory under which `experiment_data/` is created
        #[arg(long = "data-dir", env = "MINER_DATA_DIR", default_value = ".")]
        data_dir: PathBuf,

        /// Pause between iterations in milliseconds
        #[arg(long = "interval-ms", env = "MINER_INTERVAL_MS", default_value_t = 100)]
        interval_ms: u64,

        /// Refresh the presence notification every N iterations (0 disables)
        #[arg(long = "notify-every", env = "MINER_NOTIFY_EVERY", default_value_t = 50)]
        notify_every: u64,

        /// Wake lock ceiling in seconds
        #[arg(long = "wake-lock-secs", env = "MINER_WAKE_LOCK_SECS", default_value_t = 600)]
        wake_lock_secs: u64,

        /// Stop after this many iterations
        #[arg(long = "max-iterations", env = "MINER_MAX_ITERATIONS")]
        max_iterations: Option<u64>,

        /// Stop after this many seconds (runs until Ctrl-C if omitted)
        #[arg(long = "duration-secs", env = "MINER_DURATION_SECS")]
        duration_secs: Option<u64>,

        /// Workload to run each iteration
        #[arg(long, env = "MINER_WORKLOAD", value_enum, default_value_t = WorkloadCli::Mix)]
        workload: WorkloadCli,

        /// Rounds per iteration
        #[arg(long, env = "MINER_ROUNDS", default_value_t = engine_cpu::DEFAULT_ROUNDS)]
        rounds: u32,

        /// Optional Prometheus metrics exporter port; if omitted, metrics are not served
        #[arg(long, env = "MINER_METRICS_PORT")]
        metrics_port: Option<u16>,

        /// Enable verbose logging
        #[arg(short, long, env = "MINER_VERBOSE")]
        verbose: bool,
    },
    /// Time the workload in-process without starting a session
    Benchmark {
        /// Workload to benchmark
        #[arg(long, env = "MINER_WORKLOAD", value_enum, default_value_t = WorkloadCli::Mix)]
        workload: WorkloadCli,

        /// Rounds per iteration
        #[arg(long, env = "MINER_ROUNDS", default_value_t = engine_cpu::DEFAULT_ROUNDS)]
        rounds: u32,

        /// Number of iterations to time
        #[arg(short, long, default_value_t = 1000)]
        iterations: u64,

        /// Enable verbose logging during benchmark
        #[arg(short, long, env = "MINER_VERBOSE")]
        verbose: bool,
    },
}

/// Experiment Miner CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum WorkloadCli {
    /// Integer mixing rounds
    Mix,
    /// Square-root / multiply-add rounds
    Float,
}

impl From<WorkloadCli> for WorkloadKind {
    fn from(value: WorkloadCli) -> Self {
        match value {
            WorkloadCli::Mix => WorkloadKind::Mix,
            WorkloadCli::Float => WorkloadKind::Float,
        }
    }
}

fn init_logging(verbose: bool) {
    // If RUST_LOG is not set, default to appropriate level based on verbose flag
    if std::env::var("RUST_LOG").is_err() {
        let log_level = if verbose {
            "debug,miner=debug"
        } else {
            "info,miner=info"
        };
        std::env::set_var("RUST_LOG", log_level);
    }
    env_logger::init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let result = match args.command.unwrap_or(Command::Serve {
        pool_url: DEFAULT_POOL_URL.to_string(),
        data_dir: PathBuf::from("."),
        interval_ms: 100,
        notify_every: 50,
        wake_lock_secs: 600,
        max_iterations: None,
        duration_secs: None,
        workload: WorkloadCli::Mix,
        rounds: engine_cpu::DEFAULT_ROUNDS,
        metrics_port: None,
        verbose: false,
    }) {
        Command::Serve {
            pool_url,
            data_dir,
            interval_ms,
            notify_every,
            wake_lock_secs,
            max_iterations,
            duration_secs,
            workload,
            rounds,
            metrics_port,
            verbose,
        } => {
            init_logging(verbose);
            let config = ServiceConfig {
                pool_url,
                data_root: data_dir,
                iteration_interval: Duration::from_millis(interval_ms),
                notify_every,
                wake_lock_timeout: Duration::from_secs(wake_lock_secs),
                max_iterations,
                ..ServiceConfig::default()
            };
            run_serve_command(config, workload, rounds, duration_secs, metrics_port).await
        }
        Command::Benchmark {
            workload,
            rounds,
            iterations,
            verbose,
        } => {
            init_logging(verbose);
            run_benchmark_command(workload, rounds, iterations);
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("Experiment miner terminated with error: {e:?}");
        std::process::exit(1);
    }
}

async fn run_serve_command(
    config: ServiceConfig,
    workload: WorkloadCli,
    rounds: u32,
    duration_secs: Option<u64>,
    metrics_port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(port) = metrics_port {
        metrics::start_http_exporter(port).await?;
    }

    log::info!("Effective config: {config}");
    let intent = StartIntent::with_pool(config.pool_url.clone());

    let workload: Arc<dyn Workload> = Arc::from(WorkloadKind::from(workload).build(rounds));
    let service = MiningService::builder().workload(workload).build();
    let mut host = ServiceHost::new(service, config);

    host.on_create();
    host.on_start_command(Some(intent));

    let deadline = duration_secs.map(Duration::from_secs);
    let reason = wait_for_stop(tokio::signal::ctrl_c(), &host, deadline).await;
    log::info!("{reason}, stopping");

    host.on_destroy();
    log::info!(
        "Iterations recorded: {}, last rate: {}",
        metrics::iterations_total(),
        format_rate_human(metrics::hash_rate())
    );
    Ok(())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum StopReason {
    Interrupted,
    DurationReached,
    WorkFinished,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StopReason::Interrupted => "Interrupt received",
            StopReason::DurationReached => "Duration reached",
            StopReason::WorkFinished => "Work loop finished",
        })
    }
}

/// Wait until `shutdown` resolves, `deadline` passes or the worker exits.
///
/// `shutdown` is polled through one pinned future for the whole wait, so a
/// signal that lands between ticks is still observed.
async fn wait_for_stop<F, T>(
    shutdown: F,
    host: &ServiceHost,
    deadline: Option<Duration>,
) -> StopReason
where
    F: std::future::Future<Output = T>,
{
    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => return StopReason::Interrupted,
            _ = ticker.tick() => {
                if deadline.is_some_and(|d| started.elapsed() >= d) {
                    return StopReason::DurationReached;
                }
                if host.service().worker_finished() {
                    return StopReason::WorkFinished;
                }
            }
        }
    }
}

fn run_benchmark_command(workload: WorkloadCli, rounds: u32, iterations: u64) {
    let workload = WorkloadKind::from(workload).build(rounds);

    println!("Experiment Miner Benchmark");
    println!("==========================");
    println!("Workload: {} ({} rounds)", workload.name(), rounds);
    println!("Iterations: {}", iterations);
    println!();

    let started = Instant::now();
    let mut fastest = Duration::MAX;
    let mut slowest = Duration::ZERO;
    for _ in 0..iterations {
        let t0 = Instant::now();
        let _ = workload.run();
        let elapsed = t0.elapsed();
        fastest = fastest.min(elapsed);
        slowest = slowest.max(elapsed);
    }
    let total = started.elapsed();

    if iterations == 0 {
        println!("Nothing to measure.");
        return;
    }

    let avg = Duration::from_secs_f64(total.as_secs_f64() / iterations as f64);
    println!("Total time: {:.2} seconds", total.as_secs_f64());
    println!("Average rate: {}", format_rate_human(rate_from_duration(avg)));
    println!("Best rate: {}", format_rate_human(rate_from_duration(fastest)));
    println!("Worst rate: {}", format_rate_human(rate_from_duration(slowest)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_host() -> ServiceHost {
        ServiceHost::new(MiningService::builder().build(), ServiceConfig::default())
    }

    fn running_host(dir: &std::path::Path) -> ServiceHost {
        let config = ServiceConfig {
            data_root: dir.to_path_buf(),
            ..ServiceConfig::default()
        };
        let mut host = ServiceHost::new(MiningService::builder().build(), config);
        host.on_start_command(None);
        host
    }

    #[tokio::test]
    async fn signal_between_ticks_is_observed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut host = running_host(tmp.path());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        let reason = wait_for_stop(rx, &host, None).await;
        assert_eq!(reason, StopReason::Interrupted);
        host.on_destroy();
    }

    #[tokio::test]
    async fn deadline_stops_the_wait() {
        let tmp = tempfile::tempdir().unwrap();
        let mut host = running_host(tmp.path());

        let reason = wait_for_stop(
            std::future::pending::<()>(),
            &host,
            Some(Duration::from_millis(10)),
        )
        .await;
        assert_eq!(reason, StopReason::DurationReached);
        host.on_destroy();
    }

    #[tokio::test]
    async fn idle_service_counts_as_finished() {
        let host = idle_host();
        let reason = wait_for_stop(std::future::pending::<()>(), &host, None).await;
        assert_eq!(reason, StopReason::WorkFinished);
    }
}
