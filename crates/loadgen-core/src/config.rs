use crate::error::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Immutable run configuration. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub load: LoadConfig,
    pub retry: RetryConfig,
    pub payload: PayloadConfig,
}

impl Config {
    /// Load `path` on top of `base`: keys present in the file win, everything
    /// else keeps the value from `base`.
    pub fn layered(base: &Config, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::layered_str(base, &contents)
    }

    fn layered_str(base: &Config, contents: &str) -> anyhow::Result<Self> {
        let overlay: toml::Table = toml::from_str(contents)?;
        let mut merged = match toml::Value::try_from(base)? {
            toml::Value::Table(table) => table,
            _ => anyhow::bail!("config did not serialize to a table"),
        };
        merge_tables(&mut merged, overlay);
        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Configuration reproducing one of the stock load profiles.
    pub fn preset(profile: Profile) -> Self {
        let mut cfg = Config::default();
        match profile {
            Profile::Basic => {
                cfg.load.batch_size = 1;
            }
            Profile::Optimized => {
                cfg.retry.attempts = 3;
                cfg.retry.timeout_ms = 5_000;
                cfg.retry.timeout_step_ms = 2_000;
                cfg.retry.backoff_base_ms = 100;
                cfg.payload.key_prefix = "optimized-key".to_string();
                cfg.payload.filler_len = 0;
                cfg.payload.test_type = "optimized_load_test".to_string();
                cfg.payload.payload_size = None;
                cfg.payload.include_test_run = false;
                cfg.payload.include_batch_fields = true;
            }
            Profile::Extreme => {
                cfg.target.topic = "extreme-performance".to_string();
                cfg.target.pool_factor = 4;
                cfg.target.keepalive_ms = 300_000;
                cfg.target.connect_timeout_ms = Some(1_000);
                cfg.load.total_messages = 50_000;
                cfg.load.concurrency = 200;
                cfg.load.batch_size = 500;
                cfg.load.latency_window = Some(1_000);
                cfg.load.throughput_goal = Some(50_000.0);
                cfg.retry.timeout_ms = 5_000;
                cfg.payload.mode = PayloadMode::Cached;
                cfg.payload.key_prefix = "extreme".to_string();
            }
            Profile::Large => {
                cfg.target.topic = "large-messages".to_string();
                cfg.load.total_messages = 50;
                cfg.load.concurrency = 5;
                cfg.load.batch_size = 1;
                cfg.retry.timeout_ms = 60_000;
                cfg.payload.mode = PayloadMode::Large;
                cfg.payload.key_prefix = "large-msg".to_string();
            }
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.target.base_url)
            .map_err(|e| LoadError::config(format!("base_url {:?}: {e}", self.target.base_url)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(LoadError::config(format!(
                "base_url must be http:// or https:// (got {})",
                self.target.base_url
            )));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(LoadError::config("base_url must not include credentials"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(LoadError::config("base_url must not include query/fragment"));
        }
        if self.target.topic.trim().is_empty() {
            return Err(LoadError::config("topic must not be empty"));
        }
        if self.target.pool_factor == 0 {
            return Err(LoadError::config("pool_factor must be at least 1"));
        }
        if self.load.concurrency == 0 {
            return Err(LoadError::config("concurrency must be at least 1"));
        }
        if self.load.batch_size == 0 {
            return Err(LoadError::config("batch_size must be at least 1"));
        }
        if self.load.chunk_size == 0 {
            return Err(LoadError::config("chunk_size must be at least 1"));
        }
        if self.load.latency_window == Some(0) {
            return Err(LoadError::config("latency_window must be at least 1 when set"));
        }
        if self.retry.attempts == 0 {
            return Err(LoadError::config("retry.attempts must be at least 1"));
        }
        if self.retry.timeout_ms == 0 {
            return Err(LoadError::config("retry.timeout_ms must be non-zero"));
        }
        if self.payload.mode == PayloadMode::Cached && self.payload.cache_size == 0 {
            return Err(LoadError::config("cache_size must be at least 1 in cached mode"));
        }
        Ok(())
    }

    /// `{base_url}/topics/{topic}`
    pub fn produce_url(&self) -> String {
        format!(
            "{}/topics/{}",
            self.target.base_url.trim_end_matches('/'),
            self.target.topic
        )
    }

    /// `{base_url}/topics`
    pub fn topics_url(&self) -> String {
        format!("{}/topics", self.target.base_url.trim_end_matches('/'))
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(over) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, over);
                continue;
            }
            base.insert(key, toml::Value::Table(over));
        } else {
            base.insert(key, value);
        }
    }
}

/// The four stock profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Single-record requests with fresh random filler, no retry.
    Basic,
    /// Batches with retry and exponential backoff.
    Optimized,
    /// Cached templates, big batches, aggressive pooling.
    Extreme,
    /// Single-record requests carrying a shared 64 KiB blob.
    Large,
}

impl FromStr for Profile {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(Profile::Basic),
            "optimized" => Ok(Profile::Optimized),
            "extreme" => Ok(Profile::Extreme),
            "large" => Ok(Profile::Large),
            other => Err(LoadError::config(format!(
                "unknown profile {other:?}, expected basic|optimized|extreme|large"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// REST proxy base URL (default `http://localhost:8082`)
    pub base_url: String,
    /// Topic records are produced to (default `test`)
    pub topic: String,
    /// Idle connections kept per host = concurrency * pool_factor (default 2)
    pub pool_factor: u32,
    /// TCP keepalive and idle pool timeout in milliseconds (default 30s)
    pub keepalive_ms: u64,
    /// Optional connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Timeout of the `GET /topics` probe in milliseconds (default 5s)
    pub preflight_timeout_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8082".to_string(),
            topic: "test".to_string(),
            pool_factor: 2,
            keepalive_ms: 30_000,
            connect_timeout_ms: None,
            preflight_timeout_ms: 5_000,
        }
    }
}

impl TargetConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn preflight_timeout(&self) -> Duration {
        Duration::from_millis(self.preflight_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Total number of messages (default 1000)
    pub total_messages: u64,
    /// Maximum requests in flight, also the number of logical workers (default 10)
    pub concurrency: u32,
    /// Records per request (default 10)
    pub batch_size: u64,
    /// Batches scheduled per processing chunk (default 500)
    pub chunk_size: usize,
    /// Log progress every N completed batches (default 10, 0 disables)
    pub progress_every: u64,
    /// Optional pacing in records per second
    pub target_rate: Option<u64>,
    /// Report latency over the last N samples only
    pub latency_window: Option<usize>,
    /// Optional throughput goal in messages per second, shown in the report
    pub throughput_goal: Option<f64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            total_messages: 1_000,
            concurrency: 10,
            batch_size: 10,
            chunk_size: 500,
            progress_every: 10,
            target_rate: None,
            latency_window: None,
            throughput_goal: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per batch, 1 means no retry (default 1)
    pub attempts: u32,
    /// Timeout of the first attempt in milliseconds (default 30s)
    pub timeout_ms: u64,
    /// Added to the timeout for every further attempt (default 0)
    pub timeout_step_ms: u64,
    /// Backoff before retry n (0-based) is backoff_base * 2^n (default 100ms)
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff (default 5s)
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            timeout_ms: 30_000,
            timeout_step_ms: 0,
            backoff_base_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// Every record built on demand with a fresh timestamp.
    Fresh,
    /// Records cloned from a template cache built before the run.
    Cached,
    /// Every record carries the same pre-encoded blob.
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    pub mode: PayloadMode,
    /// Record keys are `{key_prefix}-{id}` (default `key`)
    pub key_prefix: String,
    /// Seed for filler generation; entropy when unset
    pub seed: Option<u64>,
    /// Length of the alphanumeric filler (default 100)
    pub filler_len: usize,
    /// Fresh mode: new filler per record when true, one shared filler otherwise
    pub random_filler: bool,
    /// Value of the `test_type` field in fresh mode
    pub test_type: String,
    /// Fresh mode: `payload_size` label, omitted when unset (default `medium`)
    pub payload_size: Option<String>,
    /// Fresh mode: emit the run's start time as `test_run` (default true)
    pub include_test_run: bool,
    /// Fresh mode: emit `batch_id` and `test_type` (default false)
    pub include_batch_fields: bool,
    /// Number of templates in cached mode (default 1000)
    pub cache_size: usize,
    /// Raw bytes encoded into the large-mode blob (default 48 KiB, 64 KiB as base64)
    pub blob_raw_bytes: usize,
    /// Large mode: `system` field prefix
    pub system_name: String,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            mode: PayloadMode::Fresh,
            key_prefix: "key".to_string(),
            seed: None,
            filler_len: 100,
            random_filler: true,
            test_type: "load_test".to_string(),
            payload_size: Some("medium".to_string()),
            include_test_run: true,
            include_batch_fields: false,
            cache_size: 1_000,
            blob_raw_bytes: 48 * 1024,
            system_name: "load-test".to_string(),
        }
    }
}
