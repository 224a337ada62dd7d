use crate::stats::{LatencySummary, MetricsSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;
const LOW_SUCCESS_RATE_PCT: f64 = 95.0;
const LOW_THROUGHPUT: f64 = 100.0;

/// Facts about the run that the metrics do not know.
#[derive(Debug, Clone)]
pub struct RunFacts {
    pub target: String,
    pub duration: Duration,
    pub planned_messages: u64,
    pub planned_batches: u64,
    pub completed_batches: u64,
    pub interrupted: bool,
    pub throughput_goal: Option<f64>,
}

/// Final (or partial, when interrupted) result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub target: String,
    pub duration_secs: f64,
    pub interrupted: bool,
    pub planned_messages: u64,
    pub planned_batches: u64,
    pub completed_batches: u64,
    pub successes: u64,
    pub errors: u64,
    /// Successes over records with a final outcome, in percent
    pub success_rate_pct: f64,
    /// Successful messages per second
    pub throughput: f64,
    pub requests_sent: u64,
    pub requests_per_sec: f64,
    pub retries: u64,
    pub bytes_sent: u64,
    pub mib_sent: f64,
    pub mib_per_sec: f64,
    pub latency: Option<LatencySummary>,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub throughput_goal: Option<f64>,
    /// Throughput as a percentage of the goal
    pub goal_pct: Option<f64>,
    pub recommendations: Vec<String>,
}

fn per_sec(value: f64, secs: f64) -> f64 {
    if secs > 0.0 {
        value / secs
    } else {
        0.0
    }
}

impl RunReport {
    pub fn new(snapshot: MetricsSnapshot, latency: Option<LatencySummary>, facts: RunFacts) -> Self {
        let secs = facts.duration.as_secs_f64();
        let accounted = snapshot.accounted();
        let success_rate_pct = if accounted > 0 {
            snapshot.successes as f64 / accounted as f64 * 100.0
        } else {
            0.0
        };
        let throughput = per_sec(snapshot.successes as f64, secs);
        let mib_sent = snapshot.bytes_sent as f64 / MIB;

        let mut report = Self {
            target: facts.target,
            duration_secs: secs,
            interrupted: facts.interrupted,
            planned_messages: facts.planned_messages,
            planned_batches: facts.planned_batches,
            completed_batches: facts.completed_batches,
            successes: snapshot.successes,
            errors: snapshot.errors,
            success_rate_pct,
            throughput,
            requests_sent: snapshot.requests_sent,
            requests_per_sec: per_sec(snapshot.requests_sent as f64, secs),
            retries: snapshot.retries,
            bytes_sent: snapshot.bytes_sent,
            mib_sent,
            mib_per_sec: per_sec(mib_sent, secs),
            latency,
            errors_by_kind: snapshot.errors_by_kind,
            throughput_goal: facts.throughput_goal,
            goal_pct: facts
                .throughput_goal
                .filter(|goal| *goal > 0.0)
                .map(|goal| throughput / goal * 100.0),
            recommendations: Vec::new(),
        };
        report.recommendations = report.recommend();
        report
    }

    /// Records with a final outcome.
    pub fn accounted(&self) -> u64 {
        self.successes + self.errors
    }

    fn recommend(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.accounted() == 0 {
            return out;
        }
        if self.success_rate_pct < LOW_SUCCESS_RATE_PCT {
            out.push("Low success rate: reduce concurrency or raise timeouts".to_string());
        }
        if self.throughput < LOW_THROUGHPUT {
            out.push("Low throughput: raise batch size or check target resources".to_string());
        }
        if self.retries > 0 {
            out.push(format!(
                "{} retries were needed: review timeouts and target capacity",
                self.retries
            ));
        }
        out
    }
}
