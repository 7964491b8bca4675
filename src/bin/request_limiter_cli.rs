// src/bin/request_limiter_cli.rs

use prettytable::{row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use request_limiter::config::{parse_duration, Config, InMemoryConfig, RateLimitConfig};
use request_limiter::storage::MemoryStorage;
use request_limiter::{OpContext, RateLimiter, Scope};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "request_limiter_cli",
    about = "Replays a request pattern against an in-memory rate limiter"
)]
struct Opt {
    /// Client IP the requests come from
    #[structopt(long, default_value = "127.0.0.1")]
    ip: String,

    /// API token sent with every request (empty means limit by IP)
    #[structopt(long, default_value = "")]
    token: String,

    /// Requests allowed per window
    #[structopt(short, long, default_value = "5")]
    requests: u64,

    /// Window length, e.g. 1s or 500ms
    #[structopt(short, long, default_value = "1s", parse(try_from_str = parse_duration))]
    window: Duration,

    /// How long a caller stays blocked after exceeding the limit
    #[structopt(short, long, default_value = "5s", parse(try_from_str = parse_duration))]
    block: Duration,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "10")]
    num_requests: usize,

    /// Time between requests in steady mode
    #[structopt(short = "t", long, default_value = "100ms", parse(try_from_str = parse_duration))]
    interval: Duration,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

struct Outcome {
    allowed: bool,
    remaining: u64,
    at: Duration,
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
            "request_limiter_cli={},request_limiter={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // The same quota applies whether the run is keyed by IP or by token
    let quota = RateLimitConfig::new(opt.requests, opt.window, opt.block);
    let config = Config::new(quota, quota);
    config.validate()?;

    let storage = Arc::new(MemoryStorage::new(InMemoryConfig::default()));
    let limiter = RateLimiter::new(storage, config);

    info!(
        requests = opt.requests,
        window = ?opt.window,
        block = ?opt.block,
        simulation = opt.simulation.as_str(),
        "Starting simulation"
    );

    // a burst sends everything back to back
    let interval = match opt.simulation.as_str() {
        "steady" => opt.interval,
        _ => Duration::ZERO,
    };
    let outcomes = simulate(&opt, &limiter, interval).await?;

    print_results(&opt, &outcomes);
    limiter.close().await?;

    Ok(())
}

/// Sends `num_requests` requests spaced `interval` apart
async fn simulate(
    opt: &Opt,
    limiter: &RateLimiter,
    interval: Duration,
) -> request_limiter::Result<Vec<Outcome>> {
    let ctx = OpContext::background();
    let start = Instant::now();
    let mut outcomes = Vec::with_capacity(opt.num_requests);

    for i in 0..opt.num_requests {
        let sent = Instant::now();

        let allowed = limiter.check_limit(&ctx, &opt.ip, &opt.token).await?;
        let remaining = limiter
            .get_remaining_requests(&ctx, &opt.ip, &opt.token)
            .await?;

        if allowed {
            info!("Request {}: ALLOWED (remaining: {})", i + 1, remaining);
        } else {
            warn!("Request {}: DENIED", i + 1);
        }
        outcomes.push(Outcome {
            allowed,
            remaining,
            at: start.elapsed(),
        });

        let elapsed = sent.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    Ok(outcomes)
}

fn print_results(opt: &Opt, outcomes: &[Outcome]) {
    let mut table = Table::new();
    table.add_row(row!["#", "Verdict", "Remaining", "Elapsed"]);
    for (i, outcome) in outcomes.iter().enumerate() {
        let verdict = if outcome.allowed { "allowed" } else { "denied" };
        table.add_row(row![
            i + 1,
            verdict,
            outcome.remaining,
            format!("{:?}", outcome.at)
        ]);
    }

    let allowed = outcomes.iter().filter(|o| o.allowed).count();
    let scope = Scope::resolve(&opt.ip, &opt.token);

    println!("\n{} simulation for {}", opt.simulation, scope);
    table.printstd();
    println!(
        "Allowed: {}  Denied: {}",
        allowed,
        outcomes.len() - allowed
    );
}
