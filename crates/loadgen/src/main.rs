use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use loadgen_core::{
    BatchSender, Config, HttpSender, LoadRunner, MockSender, PayloadMode, Profile, RunReport,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "loadgen")]
#[command(about = "Load test for a Kafka REST proxy - sends batches and reports throughput/latency")]
struct Args {
    /// Optional TOML configuration file (applied on top of the profile)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stock profile to start from
    #[arg(long, value_enum, default_value = "basic")]
    profile: ProfileArg,

    /// Sender: http talks to the proxy, mock answers 200 in-process
    #[arg(long, value_enum, default_value = "http")]
    mode: Mode,

    /// REST proxy URL
    #[arg(long)]
    url: Option<String>,

    /// Topic name
    #[arg(long)]
    topic: Option<String>,

    /// Total number of messages
    #[arg(long)]
    messages: Option<u64>,

    /// Maximum requests in flight
    #[arg(long)]
    concurrency: Option<u32>,

    /// Records per request
    #[arg(long)]
    batch_size: Option<u64>,

    /// Attempts per batch (1 disables retry)
    #[arg(long)]
    retries: Option<u32>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pace sending to this many records per second
    #[arg(long)]
    rate: Option<u64>,

    /// Payload seed for reproducible filler
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated latency of the mock sender in milliseconds
    #[arg(long, default_value = "5")]
    mock_delay_ms: u64,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Basic,
    Optimized,
    Extreme,
    Large,
}

impl From<ProfileArg> for Profile {
    fn from(p: ProfileArg) -> Self {
        match p {
            ProfileArg::Basic => Profile::Basic,
            ProfileArg::Optimized => Profile::Optimized,
            ProfileArg::Extreme => Profile::Extreme,
            ProfileArg::Large => Profile::Large,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Http,
    Mock,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    config.validate().context("Invalid configuration")?;

    info!(
        "Profile {:?}: {} messages, concurrency {}, batch size {}, payload {:?}",
        args.profile,
        config.load.total_messages,
        config.load.concurrency,
        config.load.batch_size,
        config.payload.mode
    );

    let sender: Arc<dyn BatchSender> = match args.mode {
        Mode::Mock => Arc::new(MockSender::new(args.mock_delay_ms)),
        Mode::Http => {
            Arc::new(HttpSender::new(&config).context("Failed to create HTTP sender")?)
        }
    };
    let runner = LoadRunner::new(config, sender)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if watch_interrupts(tokio::signal::ctrl_c, cancel).await == Interrupt::Forced {
                std::process::exit(130);
            }
        });
    }

    let report = runner
        .run(cancel)
        .await
        .context("Load test aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, runner.config().payload.mode);
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// The signal source went away
    Closed,
    /// A second interrupt arrived while draining
    Forced,
}

/// First interrupt cancels the run and lets it drain, a second one asks for
/// an immediate exit.
async fn watch_interrupts<F, Fut>(mut next_signal: F, cancel: CancellationToken) -> Interrupt
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_signal().await.is_err() {
        return Interrupt::Closed;
    }
    warn!("Interrupt received, draining in-flight batches (Ctrl-C again to exit now)...");
    cancel.cancel();

    match next_signal().await {
        Ok(()) => {
            warn!("Second interrupt, exiting without a report");
            Interrupt::Forced
        }
        Err(_) => Interrupt::Closed,
    }
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = Config::preset(args.profile.into());

    if let Some(path) = &args.config {
        config = Config::layered(&config, path)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
    }

    if let Some(url) = &args.url {
        config.target.base_url = url.clone();
    }
    if let Some(topic) = &args.topic {
        config.target.topic = topic.clone();
    }
    if let Some(messages) = args.messages {
        config.load.total_messages = messages;
    }
    if let Some(concurrency) = args.concurrency {
        config.load.concurrency = concurrency;
    }
    if let Some(batch_size) = args.batch_size {
        config.load.batch_size = batch_size;
    }
    if let Some(retries) = args.retries {
        config.retry.attempts = retries;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.retry.timeout_ms = timeout_ms;
    }
    if args.rate.is_some() {
        config.load.target_rate = args.rate;
    }
    if args.seed.is_some() {
        config.payload.seed = args.seed;
    }

    Ok(config)
}

fn print_summary(report: &RunReport, mode: PayloadMode) {
    println!();
    println!("{}", "=".repeat(60));
    if report.interrupted {
        println!("LOAD TEST RESULTS (INTERRUPTED, PARTIAL)");
    } else {
        println!("LOAD TEST RESULTS");
    }
    println!("{}", "=".repeat(60));
    println!("Target: {}", report.target);
    println!("Payload: {:?}", mode);
    println!("Duration: {:.3}s", report.duration_secs);
    println!("Messages planned: {}", report.planned_messages);
    println!(
        "Batches: {}/{}",
        report.completed_batches, report.planned_batches
    );
    println!("Successes: {}", report.successes);
    println!("Errors: {}", report.errors);
    println!("Retries: {}", report.retries);
    println!("Success rate: {:.2}%", report.success_rate_pct);
    println!("Throughput: {:.2} msg/s", report.throughput);
    println!("Requests: {} ({:.0} req/s)", report.requests_sent, report.requests_per_sec);
    println!(
        "Data sent: {:.2} MiB ({:.2} MiB/s)",
        report.mib_sent, report.mib_per_sec
    );

    if let (Some(goal), Some(pct)) = (report.throughput_goal, report.goal_pct) {
        println!("Goal: {:.0} msg/s ({:.1}% reached)", goal, pct);
    }

    if let Some(lat) = &report.latency {
        println!();
        match lat.window {
            Some(n) => println!("LATENCY (ms, last {} of the requests):", n),
            None => println!("LATENCY (ms, {} samples):", lat.samples),
        }
        println!("  Min: {:.2}", lat.min_ms);
        println!("  Max: {:.2}", lat.max_ms);
        println!("  Mean: {:.2}", lat.mean_ms);
        println!("  Median: {:.2}", lat.median_ms);
        if let Some(sd) = lat.stddev_ms {
            println!("  Std dev: {:.2}", sd);
        }
        println!("  P95: {:.2}", lat.p95_ms);
        println!("  P99: {:.2}", lat.p99_ms);
    }

    if !report.errors_by_kind.is_empty() {
        println!();
        println!("ERRORS BY CATEGORY (batches):");
        for (kind, count) in &report.errors_by_kind {
            println!("  {}: {}", kind, count);
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("RECOMMENDATIONS:");
        for r in &report.recommendations {
            println!("  - {}", r);
        }
    }
    println!("{}", "=".repeat(60));
}
