use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{self, ClientError, ClientResult, SetStore};
use crate::error::Result;
use crate::expression::FieldExpression;
use crate::iterate::iterate_parts_with_span;
use crate::message::Batch;
use crate::registry::{FieldSpec, TypeSpec};
use crate::retry::{Retrier, RetryPolicy};
use crate::shared::{parse_duration, StageError, DEFAULT_RETRIES, DEFAULT_RETRY_PERIOD};
use crate::stage::{Closable, Lifecycle, ProcessOutcome, Processor, StageKind};
use crate::stats::{Counter, Stats};

use super::ProcessorConfig;

pub(super) const TYPE_NAME: &str = "redis";

/// Configuration of the `redis` processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Address of the store. `memory://` selects an in-process store.
    pub url: String,
    /// Maximum time to wait for a connection to the store.
    pub timeout: String,
    /// Indices of the parts to act on, empty for all of them.
    pub parts: Vec<i64>,
    pub operator: String,
    pub key: String,
    pub retries: u32,
    pub retry_period: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            timeout: "5s".to_string(),
            parts: Vec::new(),
            operator: SetOperator::Scard.to_string(),
            key: String::new(),
            retries: DEFAULT_RETRIES,
            retry_period: DEFAULT_RETRY_PERIOD.to_string(),
        }
    }
}

/// The set commands a `redis` processor can apply to each part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    /// Cardinality of the set at the key, `0` if the key does not exist.
    Scard,
    /// Adds the part's payload to the set at the key. Yields `1` if it was added.
    Sadd,
}

impl SetOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetOperator::Scard => "scard",
            SetOperator::Sadd => "sadd",
        }
    }

    async fn apply(&self, store: &dyn SetStore, key: &str, value: &[u8]) -> ClientResult<i64> {
        match self {
            SetOperator::Scard => store.scard(key).await,
            SetOperator::Sadd => store.sadd(key, value).await,
        }
    }
}

impl fmt::Display for SetOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetOperator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scard" => Ok(SetOperator::Scard),
            "sadd" => Ok(SetOperator::Sadd),
            other => Err(format!("operator not recognised: {other}")),
        }
    }
}

/// Runs a set command against a remote store for each selected part of a batch and replaces
/// the part's contents with the command's result.
pub struct Redis {
    parts: Vec<i64>,
    key: FieldExpression,
    operator: SetOperator,
    store: Arc<dyn SetStore>,
    retrier: Retrier,
    lifecycle: Lifecycle,

    count: Counter,
    error: Counter,
    sent: Counter,
    batch_sent: Counter,
}

impl StageError for Redis {
    fn stage_kind() -> StageKind {
        StageKind::Processor
    }
}

impl Redis {
    /// Validates `conf` and creates the store client. The store is connected lazily, so an
    /// unreachable store does not fail construction.
    pub fn new(conf: &RedisConfig, stats: Stats) -> Result<Self> {
        let connect_timeout = parse_duration(&conf.timeout)
            .map_err(|e| Self::config_error(format!("failed to parse timeout string: {e}")))?;
        Self::validate(conf)?;
        let store = client::connect(&conf.url, connect_timeout)
            .map_err(|e| Self::config_error(e.to_string()))?;
        Self::with_store(conf, stats, store)
    }

    /// Like [`Redis::new`] but talking to `store`.
    pub fn with_store(conf: &RedisConfig, stats: Stats, store: Arc<dyn SetStore>) -> Result<Self> {
        let (operator, key, policy) = Self::validate(conf)?;
        let lifecycle = Lifecycle::new();
        let retrier = Retrier::new(policy, stats.counter("redis.retry"), lifecycle.close_token());

        Ok(Self {
            parts: conf.parts.clone(),
            key,
            operator,
            store,
            retrier,
            lifecycle,
            count: stats.counter("count"),
            error: stats.counter("error"),
            sent: stats.counter("sent"),
            batch_sent: stats.counter("batch.sent"),
        })
    }

    fn validate(conf: &RedisConfig) -> Result<(SetOperator, FieldExpression, RetryPolicy)> {
        let policy =
            RetryPolicy::from_config(conf.retries, &conf.retry_period).map_err(Self::config_error)?;
        let key = FieldExpression::parse(&conf.key)
            .map_err(|e| Self::config_error(format!("failed to parse key expression: {e}")))?;
        let operator = conf.operator.parse().map_err(Self::config_error)?;
        Ok((operator, key, policy))
    }

    pub fn operator(&self) -> SetOperator {
        self.operator
    }
}

fn construct(conf: &ProcessorConfig, stats: Stats) -> Result<Box<dyn Processor>> {
    Ok(Box::new(Redis::new(&conf.redis, stats)?))
}

pub(super) fn spec() -> TypeSpec<ProcessorConfig, dyn Processor> {
    TypeSpec::new(
        TYPE_NAME,
        "Performs set operations against redis for each message of a batch, replacing the \
         contents with the result.",
        construct,
    )
    .field(FieldSpec::new("url", "The URL of the target redis server."))
    .field(FieldSpec::new("timeout", "Maximum time to wait when connecting.").advanced())
    .field(
        FieldSpec::new("operator", "The operator to apply.")
            .options(&[SetOperator::Scard.as_str(), SetOperator::Sadd.as_str()]),
    )
    .field(FieldSpec::new("key", "A key to use for the target operator.").interpolated())
    .field(
        FieldSpec::new("retries", "The maximum number of retries before abandoning a request.")
            .advanced(),
    )
    .field(
        FieldSpec::new("retry_period", "The time to wait before consecutive retry attempts.")
            .advanced(),
    )
    .field(
        FieldSpec::new(
            "parts",
            "An optional array of message indexes of a batch that the processor should apply \
             to. If left empty all messages are processed. Negative values are counted \
             backwards from the end of the batch.",
        )
        .advanced(),
    )
    .defaults(&RedisConfig::default())
}

#[async_trait]
impl Closable for Redis {
    fn request_close(&self) {
        self.lifecycle.request_close();
    }

    async fn await_close(&self, timeout: Duration) -> Result<()> {
        self.lifecycle
            .close_within(timeout, async {
                self.store
                    .close()
                    .await
                    .map_err(|e| Self::client_error(e.to_string()))
            })
            .await
    }
}

#[async_trait]
impl Processor for Redis {
    async fn process(&self, batch: Batch) -> ProcessOutcome {
        self.lifecycle.mark_running();
        self.count.incr(1);

        let mut batch = batch;
        let batch_size = batch.len();
        let operation = self.operator.as_str();

        let report = iterate_parts_with_span(TYPE_NAME, &self.parts, &mut batch, |index, part| {
            let key = self.key.evaluate(index, &part, batch_size);
            async move {
                // parts not yet started when a close arrives are not sent at all
                let result = if self.retrier.is_closing() {
                    Err(ClientError::Abandoned)
                } else {
                    self.retrier
                        .run(operation, || {
                            self.operator.apply(self.store.as_ref(), &key, part.payload())
                        })
                        .await
                };
                match result {
                    Ok(value) => Ok(Some(part.with_new_payload(value.to_string()))),
                    Err(e) => {
                        debug!(key = %key, error = %e, "Operator failed");
                        Err(e)
                    }
                }
            }
        })
        .await;

        self.error.incr(report.failed.len() as u64);
        self.batch_sent.incr(1);
        self.sent.incr(batch.len() as u64);
        ProcessOutcome::single(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::client::MemorySetStore;
    use crate::error::{Error, ErrorKind};
    use crate::message::Part;

    fn config(operator: &str, key: &str) -> RedisConfig {
        RedisConfig {
            url: client::MEMORY_URL.to_string(),
            operator: operator.to_string(),
            key: key.to_string(),
            ..Default::default()
        }
    }

    fn forwarded(outcome: ProcessOutcome) -> Batch {
        match outcome {
            ProcessOutcome::Forward(mut batches) => {
                assert_eq!(batches.len(), 1);
                batches.remove(0)
            }
            ProcessOutcome::Respond(response) => panic!("unexpected response {response:?}"),
        }
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!("scard".parse(), Ok(SetOperator::Scard));
        assert_eq!("sadd".parse(), Ok(SetOperator::Sadd));
        assert_eq!(
            "smembers".parse::<SetOperator>(),
            Err("operator not recognised: smembers".to_string())
        );
    }

    #[test]
    fn test_construction_errors() {
        let bad = [
            config("smembers", "k"),
            config("scard", "${! meta(\"k\")"),
            RedisConfig {
                retry_period: "soon".to_string(),
                ..config("scard", "k")
            },
            RedisConfig {
                url: "http://localhost".to_string(),
                ..config("scard", "k")
            },
        ];
        for conf in bad {
            let err = Redis::new(&conf, Stats::new()).err().unwrap();
            assert!(
                matches!(err, Error::ProcessorError(ErrorKind::ConfigError(_))),
                "{conf:?} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_sadd_uses_payload_as_member() {
        let store = Arc::new(MemorySetStore::new().with_set("fruits", ["apple"]));
        let redis = Redis::with_store(&config("sadd", "fruits"), Stats::new(), store.clone()).unwrap();

        let out = forwarded(redis.process(Batch::new(vec!["apple", "pear", "pear"])).await);
        assert_eq!(out.payload(0), b"0");
        assert_eq!(out.payload(1), b"1");
        assert_eq!(out.payload(2), b"0");
        assert_eq!(store.scard("fruits").await, Ok(2));
    }

    #[tokio::test]
    async fn test_only_selected_parts_are_touched() {
        let store = Arc::new(MemorySetStore::new().with_set("s", ["a", "b"]));
        let conf = RedisConfig {
            parts: vec![-1],
            ..config("scard", "s")
        };
        let redis = Redis::with_store(&conf, Stats::new(), store).unwrap();

        let input = Batch::from_parts(vec![Part::new("x"), Part::new("y")]);
        let out = forwarded(redis.process(input.clone()).await);
        assert_eq!(out.payload(0), b"x");
        assert_eq!(out.payload(1), b"2");
        // the incoming batch is left alone
        assert_eq!(input.payload(1), b"y");
    }

    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SetStore for FlakyStore {
        async fn scard(&self, _key: &str) -> ClientResult<i64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(ClientError::Unavailable("connection refused".to_string()));
            }
            Ok(7)
        }

        async fn sadd(&self, _key: &str, _member: &[u8]) -> ClientResult<i64> {
            Err(ClientError::Command("unsupported".to_string()))
        }

        async fn close(&self) -> ClientResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let stats = Stats::new();
        let store = Arc::new(FlakyStore {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let redis = Redis::with_store(&config("scard", "k"), stats.clone(), store.clone()).unwrap();

        let out = forwarded(redis.process(Batch::new(vec!["a"])).await);
        assert_eq!(out.payload(0), b"7");
        assert!(!out.get(0).has_failed());
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.get("redis.retry"), Some(2));
        assert_eq!(stats.get("error"), Some(0));
    }

    #[tokio::test]
    async fn test_parts_after_close_are_not_sent() {
        let stats = Stats::new();
        let store = Arc::new(FlakyStore {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let redis = Redis::with_store(&config("scard", "k"), stats.clone(), store.clone()).unwrap();
        redis.request_close();

        let out = forwarded(redis.process(Batch::new(vec!["a", "b"])).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(out.payload(0), b"a");
        assert_eq!(
            out.get(1).failure(),
            Some(ClientError::Abandoned.to_string().as_str())
        );
        assert_eq!(stats.get("error"), Some(2));
    }

    #[tokio::test]
    async fn test_close_releases_store() {
        let store = Arc::new(MemorySetStore::new());
        let redis = Redis::with_store(&config("scard", "k"), Stats::new(), store.clone()).unwrap();
        redis.request_close();
        redis.await_close(Duration::from_secs(1)).await.unwrap();
        assert!(store.is_closed());
    }
}
