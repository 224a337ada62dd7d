use crate::config::{PayloadConfig, PayloadMode};
use crate::error::{LoadError, Result};
use base64::Engine as _;
use bytes::Bytes;
use chrono::SecondsFormat;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

const BLOB_PATTERN: &str =
    "Hello World! This is a test payload for Kafka load testing with 64KB messages. ";

/// One request body: `{"records": [{"key": ..., "value": {...}}, ...]}`.
///
/// The topic travels with the batch but is not part of the body.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    #[serde(skip)]
    pub topic: Arc<str>,
    pub records: Vec<Record>,
}

impl BatchRequest {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize once; the buffer is shared by every attempt of the batch.
    pub fn to_body(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub key: String,
    pub value: RecordValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RecordValue {
    Fresh(FreshValue),
    Cached(CachedValue),
    Large(LargeValue),
}

impl RecordValue {
    pub fn id(&self) -> u64 {
        match self {
            RecordValue::Fresh(v) => v.id,
            RecordValue::Cached(v) => v.id,
            RecordValue::Large(v) => v.id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FreshValue {
    pub id: u64,
    pub thread: u32,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_run: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedValue {
    pub id: u64,
    pub thread: u32,
    pub message: String,
    pub timestamp: String,
    pub data: String,
    pub sequence: u64,
    pub thread_marker: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct LargeValue {
    pub id: u64,
    pub timestamp: String,
    pub system: String,
    pub payload: Arc<str>,
}

enum Source {
    Fresh { shared_filler: Option<String> },
    Cached { templates: Vec<CachedValue> },
    Large { blob: Arc<str> },
}

/// Builds batch bodies for a run.
///
/// Expensive content (template cache, large blob) is built once in [`new`]
/// and reused for every record.
///
/// [`new`]: PayloadGenerator::new
pub struct PayloadGenerator {
    topic: Arc<str>,
    key_prefix: String,
    batch_size: u64,
    filler_len: usize,
    test_type: String,
    payload_size: Option<String>,
    include_test_run: bool,
    include_batch_fields: bool,
    system_name: String,
    test_run: i64,
    rng: StdRng,
    source: Source,
}

impl PayloadGenerator {
    pub fn new(config: &PayloadConfig, topic: &str, batch_size: u64) -> Result<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let source = match config.mode {
            PayloadMode::Fresh => Source::Fresh {
                shared_filler: (!config.random_filler && config.filler_len > 0)
                    .then(|| random_alphanumeric(&mut rng, config.filler_len)),
            },
            PayloadMode::Cached => {
                if config.cache_size == 0 {
                    return Err(LoadError::config("cache_size must be at least 1"));
                }
                Source::Cached {
                    templates: build_cache(&mut rng, config.cache_size, config.filler_len),
                }
            }
            PayloadMode::Large => Source::Large {
                blob: encoded_blob(config.blob_raw_bytes),
            },
        };

        Ok(Self {
            topic: Arc::from(topic),
            key_prefix: config.key_prefix.clone(),
            batch_size: batch_size.max(1),
            filler_len: config.filler_len,
            test_type: config.test_type.clone(),
            payload_size: config.payload_size.clone(),
            include_test_run: config.include_test_run,
            include_batch_fields: config.include_batch_fields,
            system_name: config.system_name.clone(),
            test_run: chrono::Utc::now().timestamp(),
            rng,
            source,
        })
    }

    /// Size in bytes of the shared large-mode blob, if any.
    pub fn blob_len(&self) -> Option<usize> {
        match &self.source {
            Source::Large { blob } => Some(blob.len()),
            _ => None,
        }
    }

    pub fn generate(&mut self, batch_size: u64, start_id: u64, worker_id: u32) -> BatchRequest {
        let mut records = Vec::with_capacity(batch_size as usize);
        let timestamp = now_rfc3339();

        for offset in 0..batch_size {
            let id = start_id + offset;
            let value = match &self.source {
                Source::Fresh { shared_filler } => {
                    let random_data = match shared_filler {
                        Some(filler) => Some(filler.clone()),
                        None if self.filler_len > 0 => {
                            Some(random_alphanumeric(&mut self.rng, self.filler_len))
                        }
                        None => None,
                    };
                    RecordValue::Fresh(FreshValue {
                        id,
                        thread: worker_id,
                        message: format!("Load test message {id} from worker {worker_id}"),
                        timestamp: timestamp.clone(),
                        random_data,
                        payload_size: self.payload_size.clone(),
                        test_run: self.include_test_run.then_some(self.test_run),
                        batch_id: self
                            .include_batch_fields
                            .then(|| start_id / self.batch_size),
                        test_type: self
                            .include_batch_fields
                            .then(|| self.test_type.clone()),
                    })
                }
                Source::Cached { templates } => {
                    let mut value = templates[(id % templates.len() as u64) as usize].clone();
                    value.id = id;
                    value.thread = worker_id;
                    RecordValue::Cached(value)
                }
                Source::Large { blob } => RecordValue::Large(LargeValue {
                    id,
                    timestamp: timestamp.clone(),
                    system: format!("{}-{}", self.system_name, worker_id),
                    payload: Arc::clone(blob),
                }),
            };

            records.push(Record {
                key: format!("{}-{}", self.key_prefix, id),
                value,
            });
        }

        BatchRequest {
            topic: Arc::clone(&self.topic),
            records,
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn random_alphanumeric(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn build_cache(rng: &mut StdRng, size: usize, filler_len: usize) -> Vec<CachedValue> {
    let data = random_alphanumeric(rng, filler_len);
    let timestamp = now_rfc3339();
    (0..size)
        .map(|i| CachedValue {
            id: i as u64,
            thread: 0,
            message: format!("Extreme performance test message {i}"),
            timestamp: timestamp.clone(),
            data: data.clone(),
            sequence: i as u64,
            thread_marker: "extreme-test",
        })
        .collect()
}

/// Base64 of `raw_bytes` bytes of a repeated ASCII pattern.
fn encoded_blob(raw_bytes: usize) -> Arc<str> {
    let raw: Vec<u8> = BLOB_PATTERN.bytes().cycle().take(raw_bytes).collect();
    Arc::from(base64::engine::general_purpose::STANDARD.encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Profile};

    fn config(mode: PayloadMode) -> PayloadConfig {
        PayloadConfig {
            mode,
            seed: Some(42),
            cache_size: 8,
            ..PayloadConfig::default()
        }
    }

    #[test]
    fn test_fresh_batch_shape() {
        let mut cfg = config(PayloadMode::Fresh);
        cfg.include_batch_fields = true;
        let mut gen = PayloadGenerator::new(&cfg, "orders", 10).unwrap();
        let batch = gen.generate(3, 21, 4);

        assert_eq!(&*batch.topic, "orders");
        assert_eq!(batch.len(), 3);
        let ids: Vec<u64> = batch.records.iter().map(|r| r.value.id()).collect();
        assert_eq!(ids, vec![21, 22, 23]);
        assert_eq!(batch.records[0].key, "key-21");

        match &batch.records[1].value {
            RecordValue::Fresh(v) => {
                assert_eq!(v.thread, 4);
                assert_eq!(v.batch_id, Some(2));
                assert_eq!(v.test_type.as_deref(), Some("load_test"));
                assert_eq!(v.random_data.as_ref().map(String::len), Some(100));
                assert!(v.timestamp.ends_with('Z'));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_fresh_filler_random_per_record_unless_fixed() {
        let mut gen = PayloadGenerator::new(&config(PayloadMode::Fresh), "t", 10).unwrap();
        let batch = gen.generate(2, 1, 0);
        let fillers: Vec<_> = batch
            .records
            .iter()
            .map(|r| match &r.value {
                RecordValue::Fresh(v) => v.random_data.clone(),
                _ => None,
            })
            .collect();
        assert_ne!(fillers[0], fillers[1]);

        let mut cfg = config(PayloadMode::Fresh);
        cfg.random_filler = false;
        let mut gen = PayloadGenerator::new(&cfg, "t", 10).unwrap();
        let batch = gen.generate(2, 1, 0);
        let a = serde_json::to_value(&batch.records[0].value).unwrap();
        let b = serde_json::to_value(&batch.records[1].value).unwrap();
        assert_eq!(a["random_data"], b["random_data"]);

        let mut cfg = config(PayloadMode::Fresh);
        cfg.filler_len = 0;
        let mut gen = PayloadGenerator::new(&cfg, "t", 10).unwrap();
        let value = serde_json::to_value(&gen.generate(1, 1, 0).records[0].value).unwrap();
        assert!(value.get("random_data").is_none());
    }

    fn value_keys(profile: Profile) -> Vec<String> {
        let cfg = Config::preset(profile);
        let mut gen = PayloadGenerator::new(&cfg.payload, "t", cfg.load.batch_size).unwrap();
        let batch = gen.generate(1, 1, 0);
        let value = serde_json::to_value(&batch.records[0].value).unwrap();
        let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_preset_record_fields() {
        assert_eq!(
            value_keys(Profile::Basic),
            [
                "id",
                "message",
                "payload_size",
                "random_data",
                "test_run",
                "thread",
                "timestamp"
            ]
        );
        assert_eq!(
            value_keys(Profile::Optimized),
            ["batch_id", "id", "message", "test_type", "thread", "timestamp"]
        );
        assert_eq!(
            value_keys(Profile::Extreme),
            [
                "data",
                "id",
                "message",
                "sequence",
                "thread",
                "thread_marker",
                "timestamp"
            ]
        );
        assert_eq!(
            value_keys(Profile::Large),
            ["id", "payload", "system", "timestamp"]
        );
    }

    #[test]
    fn test_basic_values() {
        let cfg = Config::preset(Profile::Basic);
        let mut gen = PayloadGenerator::new(&cfg.payload, "t", 1).unwrap();
        let value = serde_json::to_value(&gen.generate(1, 7, 2).records[0].value).unwrap();
        assert_eq!(value["payload_size"], "medium");
        assert!(value["test_run"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_cached_overwrites_identity() {
        let mut gen = PayloadGenerator::new(&config(PayloadMode::Cached), "t", 10).unwrap();
        let batch = gen.generate(4, 15, 3);

        for (offset, record) in batch.records.iter().enumerate() {
            let id = 15 + offset as u64;
            match &record.value {
                RecordValue::Cached(v) => {
                    assert_eq!(v.id, id);
                    assert_eq!(v.thread, 3);
                    // template index = id mod cache_size
                    assert_eq!(v.sequence, id % 8);
                    assert_eq!(v.message, format!("Extreme performance test message {}", id % 8));
                    assert_eq!(v.data.len(), 100);
                }
                other => panic!("unexpected value {other:?}"),
            }
        }
    }

    #[test]
    fn test_large_blob_is_shared() {
        let mut gen = PayloadGenerator::new(&config(PayloadMode::Large), "t", 1).unwrap();
        assert_eq!(gen.blob_len(), Some(64 * 1024));

        let a = gen.generate(1, 1, 0);
        let b = gen.generate(1, 2, 1);
        match (&a.records[0].value, &b.records[0].value) {
            (RecordValue::Large(x), RecordValue::Large(y)) => {
                assert!(Arc::ptr_eq(&x.payload, &y.payload));
                assert_eq!(x.system, "load-test-0");
                assert_eq!(y.system, "load-test-1");
            }
            _ => panic!("expected large values"),
        }
    }

    #[test]
    fn test_body_shape() {
        let mut gen = PayloadGenerator::new(&config(PayloadMode::Fresh), "t", 10).unwrap();
        let body = gen.generate(2, 1, 0).to_body().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(json.get("topic").is_none());
        let records = json["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["key"], "key-1");
        assert_eq!(records[1]["value"]["id"], 2);
    }

    #[test]
    fn test_cached_mode_requires_cache() {
        let mut cfg = config(PayloadMode::Cached);
        cfg.cache_size = 0;
        assert!(PayloadGenerator::new(&cfg, "t", 10).is_err());
    }
}
