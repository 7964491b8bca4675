// src/bin/request_limiter_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use request_limiter::config::{
    parse_duration, Config, InMemoryConfig, RateLimitConfig, RedisConfig, StorageKind,
};
use request_limiter::storage::{MemoryStorage, RedisStorage, StorageBackend};
use request_limiter::{OpContext, RateLimiter};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "request_limiter_bench",
    about = "Measures rate limiter throughput under concurrent clients"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Requests allowed per window for each client
    #[structopt(short, long, default_value = "100")]
    requests: u64,

    /// Window length
    #[structopt(short, long, default_value = "1s", parse(try_from_str = parse_duration))]
    window: Duration,

    /// Block duration after a client exceeds its quota
    #[structopt(short, long, default_value = "5s", parse(try_from_str = parse_duration))]
    block: Duration,

    /// Key clients by API token instead of IP
    #[structopt(long)]
    tokens: bool,

    /// Number of concurrent clients to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_clients: usize,

    /// Number of requests per client
    #[structopt(short = "n", long, default_value = "200")]
    requests_per_client: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum number of checks in flight
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    allowed: u64,
    denied: u64,
    errors: u64,
}

impl Tally {
    fn total(&self) -> u64 {
        self.allowed + self.denied + self.errors
    }

    fn add(&mut self, other: Tally) {
        self.allowed += other.allowed;
        self.denied += other.denied;
        self.errors += other.errors;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match (opt.disable_logs, opt.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "request_limiter_bench={},request_limiter={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let storage: Arc<dyn StorageBackend> = match opt.storage.parse::<StorageKind>()? {
        StorageKind::Redis => {
            let config = RedisConfig {
                url: opt.redis_url.clone(),
                connection_timeout: Duration::from_secs(5),
            };
            match RedisStorage::new(config).await {
                Ok(storage) => Arc::new(storage),
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    return Err(e.into());
                }
            }
        }
        StorageKind::Memory => Arc::new(MemoryStorage::new(InMemoryConfig::default())),
    };

    let quota = RateLimitConfig::new(opt.requests, opt.window, opt.block);
    let config = Config::new(quota, quota);
    config.validate()?;
    let limiter = Arc::new(RateLimiter::new(storage, config));

    info!(
        storage = opt.storage.as_str(),
        clients = opt.num_clients,
        requests_per_client = opt.requests_per_client,
        "Starting benchmark"
    );

    let mut summary = Table::new();
    summary.add_row(row!["Iteration", "Allowed", "Denied", "Errors", "Duration", "req/s"]);

    let mut overall = Tally::default();
    let mut total_duration = Duration::ZERO;

    for iteration in 0..opt.iterations {
        let (tally, elapsed) = run_iteration(&opt, &limiter).await?;
        overall.add(tally);
        total_duration += elapsed;

        summary.add_row(row![
            iteration + 1,
            tally.allowed,
            tally.denied,
            tally.errors,
            format!("{:?}", elapsed),
            format!("{:.2}", tally.total() as f64 / elapsed.as_secs_f64())
        ]);
    }

    limiter.close().await?;

    println!("\nBenchmark ({} storage)", opt.storage);
    summary.printstd();

    if overall.total() > 0 {
        println!(
            "Allowed {:.1}%, denied {:.1}%, {} errors, {:.2} requests/second overall",
            100.0 * overall.allowed as f64 / overall.total() as f64,
            100.0 * overall.denied as f64 / overall.total() as f64,
            overall.errors,
            overall.total() as f64 / total_duration.as_secs_f64()
        );
    }

    Ok(())
}

/// Client identities for one iteration. Fresh ones each time so earlier
/// blocks don't leak into later iterations.
fn client_identities(opt: &Opt, iteration_seed: u32) -> Vec<(String, String)> {
    let mut rng = rand::rng();
    (0..opt.num_clients)
        .map(|i| {
            if opt.tokens {
                (
                    "127.0.0.1".to_string(),
                    format!("bench-{}-{}-{}", iteration_seed, i, rng.random::<u32>()),
                )
            } else {
                let ip = format!(
                    "10.{}.{}.{}",
                    rng.random_range(0..=255u8),
                    rng.random_range(0..=255u8),
                    rng.random_range(1..=254u8)
                );
                (ip, String::new())
            }
        })
        .collect()
}

async fn run_iteration(
    opt: &Opt,
    limiter: &Arc<RateLimiter>,
) -> Result<(Tally, Duration), Box<dyn std::error::Error>> {
    let clients = client_identities(opt, rand::rng().random());
    let total = (opt.num_clients * opt.requests_per_client) as u64;

    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {per_sec} {msg}")?
            .progress_chars("#>-"),
    );
    if opt.disable_logs {
        progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }

    // Start every client at once
    let barrier = Arc::new(Barrier::new(clients.len()));
    let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
    let start = Instant::now();

    let handles: Vec<_> = clients
        .into_iter()
        .map(|(ip, token)| {
            let limiter = Arc::clone(limiter);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let requests = opt.requests_per_client;

            tokio::spawn(async move {
                barrier.wait().await;
                let ctx = OpContext::background();
                let mut tally = Tally::default();

                for _ in 0..requests {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };
                    match limiter.check_limit(&ctx, &ip, &token).await {
                        Ok(true) => tally.allowed += 1,
                        Ok(false) => tally.denied += 1,
                        Err(e) => {
                            tally.errors += 1;
                            warn!("Error in rate limiting: {}", e);
                        }
                    }
                    progress.inc(1);
                }

                tally
            })
        })
        .collect();

    let mut tally = Tally::default();
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(client) => tally.add(client),
            Err(e) => error!("Client task failed: {}", e),
        }
    }

    let elapsed = start.elapsed();
    progress.finish_and_clear();

    Ok((tally, elapsed))
}
