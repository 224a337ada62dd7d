use crate::admission::AdmissionController;
use crate::config::Config;
use crate::error::Result;
use crate::payload::PayloadGenerator;
use crate::plan::WorkPlan;
use crate::rate_limiter::RateLimiter;
use crate::report::{RunFacts, RunReport};
use crate::stats::{Metrics, MetricsSnapshot};
use crate::transport::{BatchSender, HttpSender, RetryPolicy, Transport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Live view of a run in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub completed_batches: u64,
    pub total_batches: u64,
    pub percent: f64,
    /// Successful messages per second so far
    pub throughput: f64,
    pub requests_per_sec: f64,
    pub successes: u64,
    pub errors: u64,
}

impl Progress {
    pub fn compute(
        snapshot: &MetricsSnapshot,
        completed_batches: u64,
        total_batches: u64,
        elapsed: Duration,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = |v: u64| if secs > 0.0 { v as f64 / secs } else { 0.0 };
        Self {
            completed_batches,
            total_batches,
            percent: if total_batches > 0 {
                completed_batches as f64 / total_batches as f64 * 100.0
            } else {
                100.0
            },
            throughput: rate(snapshot.successes),
            requests_per_sec: rate(snapshot.requests_sent),
            successes: snapshot.successes,
            errors: snapshot.errors,
        }
    }
}

/// Drives a whole run: plan, generate, admit, send, account, report.
pub struct LoadRunner {
    config: Arc<Config>,
    transport: Arc<Transport>,
    metrics: Arc<Metrics>,
    admission: AdmissionController,
}

impl LoadRunner {
    pub fn new(config: Config, sender: Arc<dyn BatchSender>) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new());
        let policy = RetryPolicy::from_config(&config.retry);
        let transport = Arc::new(Transport::new(sender, policy, Arc::clone(&metrics)));
        let admission = AdmissionController::new(config.load.concurrency as usize);

        Ok(Self {
            config: Arc::new(config),
            transport,
            metrics,
            admission,
        })
    }

    /// Runner talking HTTP to the configured REST proxy.
    pub fn http(config: Config) -> Result<Self> {
        config.validate()?;
        let sender = HttpSender::new(&config)?;
        Self::new(config, Arc::new(sender))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn plan(&self) -> WorkPlan {
        WorkPlan::new(
            self.config.load.total_messages,
            self.config.load.concurrency,
            self.config.load.batch_size,
        )
    }

    /// Execute the run.
    ///
    /// Fails only when the preflight probe fails, before any load is sent.
    /// Cancelling `cancel` stops new batches; batches already holding a
    /// permit finish, then a partial report is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport> {
        let load = &self.config.load;

        info!(
            "Preflight GET {} via {} sender",
            self.config.topics_url(),
            self.transport.sender_name()
        );
        self.transport.preflight().await?;
        info!("Connectivity verified");

        let plan = self.plan();
        let total_batches = plan.total_batches();
        let mut generator =
            PayloadGenerator::new(&self.config.payload, &self.config.target.topic, load.batch_size)?;
        if let Some(len) = generator.blob_len() {
            info!("Shared payload blob: {:.2} KiB", len as f64 / 1024.0);
        }

        info!(
            "Starting run: topic={} messages={} batches={} concurrency={} batch_size={} attempts={}",
            self.config.target.topic,
            plan.total_messages(),
            total_batches,
            load.concurrency,
            load.batch_size,
            self.transport.policy().max_attempts
        );

        let mut limiter = load.target_rate.filter(|r| *r > 0).map(RateLimiter::new);
        let start = Instant::now();
        let mut completed = 0u64;
        let mut interrupted = false;

        for chunk in plan.batches().chunks(load.chunk_size.max(1)) {
            let chunk_start = Instant::now();
            let mut tasks = JoinSet::new();

            for spec in chunk {
                if cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                if let Some(limiter) = limiter.as_mut() {
                    let stopped = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => true,
                        _ = limiter.acquire(spec.len) => false,
                    };
                    if stopped {
                        interrupted = true;
                        break;
                    }
                }

                let batch = generator.generate(spec.len, spec.start_id, spec.worker_id);
                let spec = *spec;
                let transport = Arc::clone(&self.transport);
                let admission = self.admission.clone();
                let cancel = cancel.clone();

                tasks.spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        permit = admission.acquire() => permit.ok()?,
                    };
                    let outcome = transport.send(&batch, &spec).await;
                    drop(permit);
                    Some(outcome)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Some(_)) => {
                        completed += 1;
                        if load.progress_every > 0 && completed % load.progress_every == 0 {
                            self.log_progress(completed, total_batches, start.elapsed());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Send task failed: {}", e),
                }
            }

            self.log_progress(completed, total_batches, start.elapsed());
            info!("Chunk finished in {:.2}s", chunk_start.elapsed().as_secs_f64());

            if interrupted || cancel.is_cancelled() {
                interrupted = true;
                break;
            }
        }

        let elapsed = start.elapsed();
        if interrupted {
            warn!(
                "Run interrupted after {}/{} batches, reporting partial results",
                completed, total_batches
            );
        } else {
            info!("Run complete in {:.3}s", elapsed.as_secs_f64());
        }
        info!(
            "Peak in flight: {}/{}",
            self.admission.peak_in_flight(),
            load.concurrency
        );

        Ok(self.report(RunFacts {
            target: self.config.produce_url(),
            duration: elapsed,
            planned_messages: plan.total_messages(),
            planned_batches: total_batches,
            completed_batches: completed,
            interrupted,
            throughput_goal: load.throughput_goal,
        }))
    }

    /// Report from the current metrics, usable at any point of a run.
    pub fn report(&self, facts: RunFacts) -> RunReport {
        RunReport::new(
            self.metrics.snapshot(),
            self.metrics.latency_summary(self.config.load.latency_window),
            facts,
        )
    }

    fn log_progress(&self, completed: u64, total: u64, elapsed: Duration) {
        let p = Progress::compute(&self.metrics.snapshot(), completed, total, elapsed);
        info!(
            "Progress: {:.1}% | throughput {:.0} msg/s | {:.0} req/s | batches {}/{} | ok={} err={}",
            p.percent,
            p.throughput,
            p.requests_per_sec,
            p.completed_batches,
            p.total_batches,
            p.successes,
            p.errors
        );
    }
}
