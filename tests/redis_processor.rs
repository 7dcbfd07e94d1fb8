use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowstage::client::{ClientError, ClientResult, MemorySetStore, SetStore};
use flowstage::error::Error;
use flowstage::message::{Batch, Part};
use flowstage::processor::{ProcessorConfig, Redis, RedisConfig};
use flowstage::registry::Registries;
use flowstage::stage::{Closable, ProcessOutcome, Processor};
use flowstage::stats::Stats;
use tokio::time::Instant;

/// A store that can never be reached.
#[derive(Default)]
struct DownStore {
    attempts: AtomicU32,
}

#[async_trait]
impl SetStore for DownStore {
    async fn scard(&self, _key: &str) -> ClientResult<i64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Unavailable("connection refused".to_string()))
    }

    async fn sadd(&self, _key: &str, _member: &[u8]) -> ClientResult<i64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ClientError::Unavailable("connection refused".to_string()))
    }

    async fn close(&self) -> ClientResult<()> {
        Ok(())
    }
}

/// A store that takes a while to shut down.
struct SlowCloseStore(Duration);

#[async_trait]
impl SetStore for SlowCloseStore {
    async fn scard(&self, _key: &str) -> ClientResult<i64> {
        Ok(0)
    }

    async fn sadd(&self, _key: &str, _member: &[u8]) -> ClientResult<i64> {
        Ok(0)
    }

    async fn close(&self) -> ClientResult<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

fn scard_config() -> RedisConfig {
    RedisConfig {
        operator: "scard".to_string(),
        key: r#"${! meta("set_key") }"#.to_string(),
        retries: 3,
        retry_period: "500ms".to_string(),
        ..Default::default()
    }
}

fn set_key_batch() -> Batch {
    Batch::from_parts(vec![
        Part::new("first").with_metadata("set_key", "s1"),
        Part::new("second").with_metadata("set_key", "s2"),
    ])
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

#[tokio::test]
async fn cardinality_of_existing_and_missing_sets() {
    let store = Arc::new(MemorySetStore::new().with_set("s1", ["a", "b", "c", "d"]));
    let stats = Stats::new();
    let redis = Redis::with_store(&scard_config(), stats.clone(), store).unwrap();

    let out = forwarded(redis.process(set_key_batch()).await);

    assert_eq!(out.len(), 2);
    assert_eq!(out.payload(0), b"4");
    assert_eq!(out.payload(1), b"0");
    // metadata survives the payload replacement
    assert_eq!(out.get(0).metadata("set_key"), Some("s1"));
    assert_eq!(stats.get("redis.retry"), Some(0));
    assert_eq!(stats.get("error"), Some(0));
    assert_eq!(stats.get("count"), Some(1));
    assert_eq!(stats.get("sent"), Some(2));
    assert_eq!(stats.get("batch.sent"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn unreachable_store_flags_every_part() {
    let store = Arc::new(DownStore::default());
    let stats = Stats::new();
    let redis = Redis::with_store(&scard_config(), stats.clone(), store.clone()).unwrap();
    let start = Instant::now();

    let out = forwarded(redis.process(set_key_batch()).await);

    // 1 attempt plus 3 retries for each of the 2 parts
    assert_eq!(store.attempts.load(Ordering::SeqCst), 8);
    assert!(start.elapsed() >= Duration::from_millis(2 * 3 * 500));
    assert_eq!(out.len(), 2);
    for index in 0..2 {
        let part = out.get(index);
        assert!(part.has_failed());
        assert!(part.failure().unwrap().contains("connection refused"));
    }
    // failed parts keep their contents
    assert_eq!(out.payload(0), b"first");
    assert_eq!(stats.get("error"), Some(2));
    assert_eq!(stats.get("redis.retry"), Some(6));
    assert_eq!(stats.get("sent"), Some(2));
}

#[tokio::test]
async fn unreachable_redis_server_is_retried_not_fatal() {
    let conf = RedisConfig {
        url: "redis://127.0.0.1:1".to_string(),
        timeout: "1s".to_string(),
        retries: 1,
        retry_period: "1ms".to_string(),
        ..scard_config()
    };
    let stats = Stats::new();
    let redis = Redis::new(&conf, stats.clone()).unwrap();

    let out = forwarded(redis.process(set_key_batch()).await);
    assert!(out.get(0).has_failed());
    assert!(out.get(1).has_failed());
    assert_eq!(stats.get("redis.retry"), Some(2));
    assert_eq!(stats.get("error"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn close_request_abandons_retries() {
    let store = Arc::new(DownStore::default());
    let redis = Arc::new(Redis::with_store(&scard_config(), Stats::new(), store.clone()).unwrap());

    let handle = tokio::spawn({
        let redis = Arc::clone(&redis);
        async move { redis.process(set_key_batch()).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    redis.request_close();

    let out = forwarded(handle.await.unwrap());
    // the part in flight stops waiting and the next part is never sent
    assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    assert!(out.get(0).failure().unwrap().contains("connection refused"));
    assert_eq!(
        out.get(1).failure(),
        Some(ClientError::Abandoned.to_string().as_str())
    );

    redis.await_close(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn construction_is_deterministic() {
    let conf: ProcessorConfig = serde_json::from_str(
        r#"{"type": "redis", "redis": {"url": "memory://", "operator": "sadd", "key": "${! content() }-${! batch_index() }"}}"#,
    )
    .unwrap();
    let registries = Registries::builtin();

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let processor = registries
            .processors
            .construct("redis", &conf, &Stats::new())
            .unwrap();
        let batch = Batch::new(vec!["x", "y", "x"]);
        let out = forwarded(processor.process(batch).await);
        outputs.push(out.iter().map(|p| p.payload().to_vec()).collect::<Vec<_>>());
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], vec![b"1".to_vec(), b"1".to_vec(), b"1".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn await_close_times_out_on_slow_release() {
    let store = Arc::new(SlowCloseStore(Duration::from_secs(1)));
    let redis = Redis::with_store(&scard_config(), Stats::new(), store).unwrap();

    redis.request_close();
    let err = redis
        .await_close(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert_eq!(err, Error::CloseTimeout(Duration::from_millis(100)));

    // a later call with enough time succeeds
    redis.await_close(Duration::from_secs(2)).await.unwrap();
}
