use crate::config::{Config, RetryConfig};
use crate::error::{LoadError, Result};
use crate::payload::BatchRequest;
use crate::plan::BatchSpec;
use crate::stats::Metrics;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

pub const KAFKA_JSON_CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";
pub const KAFKA_ACCEPT: &str = "application/vnd.kafka.v2+json";

/// Longest response body excerpt kept for error logs.
const DETAIL_LIMIT: usize = 100;

/// Why an attempt failed below the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectionRefused,
    Dns,
    Connect,
    Request,
    Body,
    Decode,
    Redirect,
    /// The batch could not be serialized
    Encode,
    /// An I/O failure of a kind not covered above
    Io(std::io::ErrorKind),
    Other,
}

impl TransportErrorKind {
    pub fn classify(err: &reqwest::Error) -> Self {
        let io_kind = io_error_kind(err);
        if err.is_connect() {
            if io_kind == Some(std::io::ErrorKind::ConnectionRefused) {
                TransportErrorKind::ConnectionRefused
            } else if chain_mentions(err, "dns") {
                TransportErrorKind::Dns
            } else {
                TransportErrorKind::Connect
            }
        } else if err.is_redirect() {
            TransportErrorKind::Redirect
        } else if err.is_body() {
            TransportErrorKind::Body
        } else if err.is_decode() {
            TransportErrorKind::Decode
        } else if let Some(kind) = io_kind {
            TransportErrorKind::Io(kind)
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        }
    }

    pub fn label(&self) -> String {
        match self {
            TransportErrorKind::ConnectionRefused => "connection_refused".to_string(),
            TransportErrorKind::Dns => "dns".to_string(),
            TransportErrorKind::Connect => "connect".to_string(),
            TransportErrorKind::Request => "request".to_string(),
            TransportErrorKind::Body => "body".to_string(),
            TransportErrorKind::Decode => "decode".to_string(),
            TransportErrorKind::Redirect => "redirect".to_string(),
            TransportErrorKind::Encode => "encode".to_string(),
            TransportErrorKind::Io(kind) => format!("io_{kind:?}"),
            TransportErrorKind::Other => "other".to_string(),
        }
    }
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<std::io::ErrorKind> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = e.source();
    }
    None
}

fn chain_mentions(err: &(dyn StdError + 'static), needle: &str) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if e.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Outcome class of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    /// Exactly HTTP 200
    Success,
    HttpError { code: u16 },
    Timeout,
    TransportError { kind: TransportErrorKind },
}

impl AttemptStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptStatus::Success)
    }

    /// Category key used in the error breakdown.
    pub fn label(&self) -> String {
        match self {
            AttemptStatus::Success => "OK".to_string(),
            AttemptStatus::HttpError { code } => format!("HTTP_{code}"),
            AttemptStatus::Timeout => "Timeout".to_string(),
            AttemptStatus::TransportError { kind } => format!("Transport_{}", kind.label()),
        }
    }

    fn from_http(code: u16) -> Self {
        if code == 200 {
            AttemptStatus::Success
        } else {
            AttemptStatus::HttpError { code }
        }
    }
}

/// One executed attempt as seen by the metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub elapsed: Duration,
    /// Body bytes offered to the target
    pub bytes: u64,
    /// 0-based attempt index
    pub attempt: u32,
    /// Records in the batch
    pub records: u64,
    /// Success, or the last attempt the policy allows
    pub is_final: bool,
}

/// What a sender reports for a single request.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub status: AttemptStatus,
    /// Response body excerpt or error text, for logs only
    pub detail: Option<String>,
}

impl SendResult {
    fn new(status: AttemptStatus) -> Self {
        Self {
            status,
            detail: None,
        }
    }
}

/// A single-shot request adapter. Retry, timing and accounting live in
/// [`Transport`].
pub trait BatchSender: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connectivity probe run once before any load.
    fn probe<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn post_batch<'a>(
        &'a self,
        topic: &'a str,
        body: Bytes,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>>;
}

/// REST proxy sender over a shared, pooled `reqwest::Client`.
pub struct HttpSender {
    client: reqwest::Client,
    base_url: String,
    preflight_timeout: Duration,
}

impl HttpSender {
    /// The idle pool holds `concurrency * pool_factor` connections so the
    /// pool never serializes requests below the admission limit.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(KAFKA_JSON_CONTENT_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(KAFKA_ACCEPT));

        let pool_size = (config.load.concurrency as usize)
            .saturating_mul(config.target.pool_factor as usize)
            .max(1);
        let keepalive = config.target.keepalive();

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(pool_size)
            .pool_idle_timeout(keepalive)
            .tcp_keepalive(keepalive)
            .tcp_nodelay(true);
        if let Some(ms) = config.target.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.target.base_url.trim_end_matches('/').to_string(),
            preflight_timeout: config.target.preflight_timeout(),
        })
    }
}

impl BatchSender for HttpSender {
    fn name(&self) -> &'static str {
        "http"
    }

    fn probe<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/topics", self.base_url);
            let resp = self
                .client
                .get(&url)
                .timeout(self.preflight_timeout)
                .send()
                .await;

            match resp {
                Ok(r) if r.status().as_u16() == 200 => Ok(()),
                Ok(r) => Err(LoadError::Connectivity {
                    url,
                    reason: format!("GET /topics returned {}", r.status().as_u16()),
                }),
                Err(e) => Err(LoadError::Connectivity {
                    url,
                    reason: e.to_string(),
                }),
            }
        })
    }

    fn post_batch<'a>(
        &'a self,
        topic: &'a str,
        body: Bytes,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            let endpoint = format!("{}/topics/{}", self.base_url, topic);

            match self
                .client
                .post(&endpoint)
                .timeout(timeout)
                .body(body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = AttemptStatus::from_http(response.status().as_u16());
                    // drain so the connection goes back to the pool
                    match response.text().await {
                        Ok(_) if status.is_success() => SendResult::new(status),
                        Ok(text) => SendResult {
                            status,
                            detail: Some(text.chars().take(DETAIL_LIMIT).collect()),
                        },
                        Err(e) => {
                            debug!("Response body from {} could not be read: {}", endpoint, e);
                            SendResult {
                                status,
                                detail: Some(format!("unreadable response body: {e}")),
                            }
                        }
                    }
                }
                Err(e) if e.is_timeout() => SendResult::new(AttemptStatus::Timeout),
                Err(e) => SendResult {
                    status: AttemptStatus::TransportError {
                        kind: TransportErrorKind::classify(&e),
                    },
                    detail: Some(e.to_string()),
                },
            }
        })
    }
}

/// In-process sender for dry runs and tests: answers every request with a
/// fixed status after a fixed delay.
pub struct MockSender {
    delay: Duration,
    status: u16,
    fail_first: u64,
    reachable: bool,
    calls: AtomicU64,
}

impl MockSender {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            status: 200,
            fail_first: 0,
            reachable: true,
            calls: AtomicU64::new(0),
        }
    }

    /// Answer every request with `status`.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Answer the first `n` requests with 500, then with the configured status.
    pub fn failing_first(mut self, n: u64) -> Self {
        self.fail_first = n;
        self
    }

    /// Fail the connectivity probe.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Requests received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BatchSender for MockSender {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn probe<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.reachable {
                Ok(())
            } else {
                Err(LoadError::Connectivity {
                    url: "mock://topics".to_string(),
                    reason: "mock target configured unreachable".to_string(),
                })
            }
        })
    }

    fn post_batch<'a>(
        &'a self,
        _topic: &'a str,
        _body: Bytes,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = SendResult> + Send + 'a>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            let code = if n < self.fail_first { 500 } else { self.status };
            SendResult::new(AttemptStatus::from_http(code))
        })
    }
}

/// How many attempts a batch gets and how long each may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_timeout: Duration,
    /// Added to the timeout for each further attempt
    pub timeout_step: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// One attempt, any failure is final.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            base_timeout: timeout,
            timeout_step: Duration::ZERO,
            backoff_base: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.attempts.max(1),
            base_timeout: Duration::from_millis(cfg.timeout_ms),
            timeout_step: Duration::from_millis(cfg.timeout_step_ms),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }

    /// `base + attempt * step`
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout
            .saturating_add(self.timeout_step.saturating_mul(attempt))
    }

    /// Pause after failed attempt `attempt`: `backoff_base * 2^attempt`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Sends a batch under a retry policy and accounts every attempt.
pub struct Transport {
    sender: Arc<dyn BatchSender>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl Transport {
    pub fn new(sender: Arc<dyn BatchSender>, policy: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self {
            sender,
            policy,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sender_name(&self) -> &'static str {
        self.sender.name()
    }

    pub async fn preflight(&self) -> Result<()> {
        self.sender.probe().await
    }

    /// Send one batch, retrying per policy. Returns the final outcome.
    ///
    /// Bytes and request count are recorded before each attempt goes out,
    /// every attempt adds one latency sample, and only the final attempt
    /// moves the success/error counters.
    pub async fn send(&self, batch: &BatchRequest, spec: &BatchSpec) -> AttemptOutcome {
        let records = batch.len() as u64;

        let body = match batch.to_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    "Batch {} (ids from {}) could not be encoded: {}",
                    spec.index, spec.start_id, e
                );
                let outcome = AttemptOutcome {
                    status: AttemptStatus::TransportError {
                        kind: TransportErrorKind::Encode,
                    },
                    elapsed: Duration::ZERO,
                    bytes: 0,
                    attempt: 0,
                    records,
                    is_final: true,
                };
                self.metrics.record_unsent(&outcome.status, records);
                return outcome;
            }
        };
        let bytes = body.len() as u64;
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 0u32;
        loop {
            let timeout = self.policy.timeout_for(attempt);
            self.metrics.record_offered(bytes);

            let start = Instant::now();
            let result = tokio::time::timeout(
                timeout,
                self.sender.post_batch(&batch.topic, body.clone(), timeout),
            )
            .await
            .unwrap_or_else(|_| SendResult::new(AttemptStatus::Timeout));
            let elapsed = start.elapsed();

            let is_final = result.status.is_success() || attempt + 1 >= max_attempts;
            let outcome = AttemptOutcome {
                status: result.status,
                elapsed,
                bytes,
                attempt,
                records,
                is_final,
            };
            self.metrics.record(&outcome);

            if is_final {
                if !outcome.status.is_success() {
                    warn!(
                        "Batch {} (ids {}..={}) failed: {} after {} attempt(s){}",
                        spec.index,
                        spec.start_id,
                        spec.end_id(),
                        outcome.status.label(),
                        attempt + 1,
                        result
                            .detail
                            .map(|d| format!(", detail: {d}"))
                            .unwrap_or_default()
                    );
                }
                return outcome;
            }

            let backoff = self.policy.backoff_for(attempt);
            debug!(
                "Batch {} attempt {} failed ({}), retrying in {:?}",
                spec.index,
                attempt + 1,
                outcome.status.label(),
                backoff
            );
            sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PayloadConfig;
    use crate::payload::PayloadGenerator;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> Config {
        let mut cfg = Config::default();
        cfg.target.base_url = base_url.to_string();
        cfg.target.topic = "orders".to_string();
        cfg.target.preflight_timeout_ms = 500;
        cfg
    }

    fn batch(len: u64) -> (BatchRequest, BatchSpec) {
        let mut gen = PayloadGenerator::new(&PayloadConfig::default(), "orders", len).unwrap();
        let spec = BatchSpec {
            index: 0,
            start_id: 1,
            len,
            worker_id: 0,
        };
        (gen.generate(len, 1, 0), spec)
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_timeout: Duration::from_secs(2),
            timeout_step: Duration::ZERO,
            backoff_base: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        }
    }

    fn http_transport(server: &MockServer, policy: RetryPolicy) -> (Transport, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let sender = HttpSender::new(&test_config(&server.uri())).unwrap();
        (
            Transport::new(Arc::new(sender), policy, Arc::clone(&metrics)),
            metrics,
        )
    }

    #[test]
    fn test_policy_timeouts_and_backoff() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            attempts: 3,
            timeout_ms: 5_000,
            timeout_step_ms: 2_000,
            backoff_base_ms: 100,
            max_backoff_ms: 300,
        });
        assert_eq!(policy.timeout_for(0), Duration::from_secs(5));
        assert_eq!(policy.timeout_for(1), Duration::from_secs(7));
        assert_eq!(policy.timeout_for(2), Duration::from_secs(9));
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(300));

        let once = RetryPolicy::no_retry(Duration::from_secs(30));
        assert_eq!(once.max_attempts, 1);
        assert_eq!(once.timeout_for(0), Duration::from_secs(30));
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(AttemptStatus::Success.label(), "OK");
        assert_eq!(AttemptStatus::HttpError { code: 500 }.label(), "HTTP_500");
        assert_eq!(AttemptStatus::Timeout.label(), "Timeout");
        assert_eq!(
            AttemptStatus::TransportError {
                kind: TransportErrorKind::ConnectionRefused
            }
            .label(),
            "Transport_connection_refused"
        );
        assert_eq!(
            AttemptStatus::TransportError {
                kind: TransportErrorKind::Io(std::io::ErrorKind::ConnectionReset)
            }
            .label(),
            "Transport_io_ConnectionReset"
        );
        // only exactly 200 counts
        assert_eq!(
            AttemptStatus::from_http(204),
            AttemptStatus::HttpError { code: 204 }
        );
    }

    #[tokio::test]
    async fn test_success_sends_kafka_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/topics/orders"))
            .and(header("content-type", KAFKA_JSON_CONTENT_TYPE))
            .and(header("accept", KAFKA_ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"offsets\":[]}"))
            .expect(1)
            .mount(&server)
            .await;

        let (transport, metrics) = http_transport(&server, fast_retry(1));
        let (batch, spec) = batch(5);
        let outcome = transport.send(&batch, &spec).await;

        assert_eq!(outcome.status, AttemptStatus::Success);
        assert!(outcome.is_final);
        assert_eq!(outcome.records, 5);

        let snap = metrics.snapshot();
        assert_eq!(snap.successes, 5);
        assert_eq!(snap.requests_sent, 1);
        assert_eq!(snap.bytes_sent, outcome.bytes);
        assert!(snap.bytes_sent > 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_always_500() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/topics/orders"))
            .respond_with(ResponseTemplate::new(500).set_body_string("broker unavailable"))
            .expect(3)
            .mount(&server)
            .await;

        let (transport, metrics) = http_transport(&server, fast_retry(3));
        let (batch, spec) = batch(10);
        let outcome = transport.send(&batch, &spec).await;

        assert_eq!(outcome.status, AttemptStatus::HttpError { code: 500 });
        assert_eq!(outcome.attempt, 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.latency_samples, 3);
        assert_eq!(snap.errors, 10);
        assert_eq!(snap.successes, 0);
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.requests_sent, 3);
        assert_eq!(snap.errors_by_kind.len(), 1);
        assert_eq!(snap.errors_by_kind.get("HTTP_500"), Some(&1));
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(2)
            .mount(&server)
            .await;

        let (transport, metrics) = http_transport(&server, fast_retry(3));
        let (batch, spec) = batch(4);
        let outcome = transport.send(&batch, &spec).await;

        assert!(outcome.status.is_success());
        let snap = metrics.snapshot();
        assert_eq!(snap.successes, 4);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.latency_samples, 3);
        assert!(snap.errors_by_kind.is_empty());
    }

    #[tokio::test]
    async fn test_no_retry_is_final_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad schema"))
            .expect(1)
            .mount(&server)
            .await;

        let (transport, metrics) =
            http_transport(&server, RetryPolicy::no_retry(Duration::from_secs(2)));
        let (batch, spec) = batch(3);
        let outcome = transport.send(&batch, &spec).await;

        assert_eq!(outcome.status, AttemptStatus::HttpError { code: 422 });
        assert!(outcome.is_final);
        let snap = metrics.snapshot();
        assert_eq!(snap.errors, 3);
        assert_eq!(snap.retries, 0);
        assert_eq!(snap.errors_by_kind.get("HTTP_422"), Some(&1));
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let (transport, metrics) =
            http_transport(&server, RetryPolicy::no_retry(Duration::from_millis(50)));
        let (batch, spec) = batch(2);
        let outcome = transport.send(&batch, &spec).await;

        assert_eq!(outcome.status, AttemptStatus::Timeout);
        assert!(outcome.elapsed < Duration::from_millis(450));
        assert_eq!(metrics.snapshot().errors_by_kind.get("Timeout"), Some(&1));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let metrics = Arc::new(Metrics::new());
        let sender = HttpSender::new(&test_config("http://127.0.0.1:1")).unwrap();
        let transport = Transport::new(Arc::new(sender), fast_retry(2), Arc::clone(&metrics));
        let (batch, spec) = batch(2);
        let outcome = transport.send(&batch, &spec).await;

        assert!(matches!(
            outcome.status,
            AttemptStatus::TransportError { .. }
        ));
        let snap = metrics.snapshot();
        assert_eq!(snap.latency_samples, 2);
        assert_eq!(snap.errors, 2);
        let label = snap.errors_by_kind.keys().next().unwrap();
        assert!(label.starts_with("Transport_"), "{label}");
    }

    #[tokio::test]
    async fn test_preflight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/topics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[\"orders\"]"))
            .mount(&server)
            .await;
        let (transport, _) = http_transport(&server, fast_retry(1));
        assert!(transport.preflight().await.is_ok());

        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/topics"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&broken)
            .await;
        let (transport, _) = http_transport(&broken, fast_retry(1));
        let err = transport.preflight().await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(err.to_string().contains("404"));

        let sender = HttpSender::new(&test_config("http://127.0.0.1:1")).unwrap();
        assert!(sender.probe().await.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn test_truncated_ok_body_is_reported() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            // read the whole request so closing sends FIN rather than RST
            let complete =
                |r: &[u8]| r.windows(4).any(|w| w == b"\r\n\r\n") && r.ends_with(b"{}");
            while !complete(received.as_slice()) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\n{\"offs")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let sender = HttpSender::new(&test_config(&format!("http://{addr}"))).unwrap();
        let result = sender
            .post_batch("orders", Bytes::from_static(b"{}"), Duration::from_secs(2))
            .await;

        assert_eq!(result.status, AttemptStatus::Success);
        let detail = result.detail.unwrap();
        assert!(detail.starts_with("unreadable response body"), "{detail}");
    }

    #[tokio::test]
    async fn test_mock_sender_timeout_backstop() {
        let metrics = Arc::new(Metrics::new());
        let sender = MockSender::new(200);
        let transport = Transport::new(
            Arc::new(sender),
            RetryPolicy::no_retry(Duration::from_millis(20)),
            Arc::clone(&metrics),
        );
        let (batch, spec) = batch(1);
        let outcome = transport.send(&batch, &spec).await;
        assert_eq!(outcome.status, AttemptStatus::Timeout);
    }

    #[tokio::test]
    async fn test_mock_sender_failing_first() {
        let sender = Arc::new(MockSender::new(0).failing_first(1));
        let metrics = Arc::new(Metrics::new());
        let transport = Transport::new(sender.clone(), fast_retry(2), Arc::clone(&metrics));
        let (batch, spec) = batch(3);
        let outcome = transport.send(&batch, &spec).await;

        assert!(outcome.status.is_success());
        assert_eq!(outcome.attempt, 1);
        assert_eq!(sender.calls(), 2);
        assert_eq!(metrics.snapshot().retries, 1);
    }
}
