use anyhow::{Context, Result};
use clap::Parser;
use loadgen_core::{BatchSender, Config, HttpSender, Profile};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "preflight")]
#[command(about = "Checks that a Kafka REST proxy answers GET /topics before a load run")]
struct Args {
    /// Optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// REST proxy URL (overrides the config file)
    #[arg(long)]
    url: Option<String>,

    /// Timeout for the probe in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
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
    let mut cfg = Config::preset(Profile::Basic);
    if let Some(path) = &args.config {
        cfg = Config::layered(&cfg, path)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
    }
    if let Some(url) = &args.url {
        cfg.target.base_url = url.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        cfg.target.preflight_timeout_ms = timeout_ms;
    }
    cfg.validate().context("Invalid configuration")?;

    info!("Probing {}", cfg.topics_url());
    let sender = HttpSender::new(&cfg).context("Failed to build HTTP client")?;

    println!();
    println!("=== Preflight ===");
    println!("Proxy: {}", cfg.target.base_url.trim_end_matches('/'));
    println!("Produce path: {}", cfg.produce_url());

    let start = Instant::now();
    let result = sender.probe().await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            println!("GET /topics -> 200 ({}ms)", latency_ms);
            println!();
            println!("Preflight OK.");
            Ok(())
        }
        Err(e) => {
            println!("GET /topics -> FAILED ({}ms)", latency_ms);
            warn!("Proxy not reachable: {e}");
            anyhow::bail!("Preflight failed: {e}");
        }
    }
}
