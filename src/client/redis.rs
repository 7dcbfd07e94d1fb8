use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ClientError, ClientResult, SetStore};

/// A [`SetStore`] backed by a redis server.
///
/// The connection is opened on first use and re-opened after a failed attempt, so a store
/// that is briefly unreachable surfaces as retryable [`ClientError::Unavailable`] errors.
pub struct RedisSetStore {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    connect_timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for RedisSetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSetStore")
            .field("connection_info", self.client.get_connection_info())
            .field("closed", &self.closed)
            .finish()
    }
}

impl RedisSetStore {
    /// Parses `url` without connecting.
    pub fn open(url: &str, connect_timeout: Duration) -> ClientResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ClientError::Command(format!("invalid redis url {url:?}: {e}")))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            connect_timeout,
            closed: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> ClientResult<MultiplexedConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }

        debug!(addr = ?self.client.get_connection_info().addr, "Connecting to redis");
        let connection = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            ClientError::Unavailable(format!(
                "connection timed out after {:?}",
                self.connect_timeout
            ))
        })?
        .map_err(classify)?;

        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Drops a connection that failed so the next command reconnects.
    async fn reset_on_unavailable<T>(&self, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(ClientError::Unavailable(_)) = &result {
            self.connection.lock().await.take();
        }
        result
    }
}

fn classify(e: RedisError) -> ClientError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        ClientError::Unavailable(e.to_string())
    } else {
        ClientError::Command(e.to_string())
    }
}

#[async_trait]
impl SetStore for RedisSetStore {
    async fn scard(&self, key: &str) -> ClientResult<i64> {
        let mut connection = self.connection().await?;
        let result: ClientResult<i64> = connection.scard(key).await.map_err(classify);
        self.reset_on_unavailable(result).await
    }

    async fn sadd(&self, key: &str, member: &[u8]) -> ClientResult<i64> {
        let mut connection = self.connection().await?;
        let result: ClientResult<i64> = connection.sadd(key, member).await.map_err(classify);
        self.reset_on_unavailable(result).await
    }

    async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // dropping the multiplexed connection closes the socket
        if self.connection.lock().await.take().is_some() {
            info!("Closed redis connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_invalid_url() {
        assert!(RedisSetStore::open("http://localhost", Duration::from_secs(1)).is_err());
        assert!(RedisSetStore::open("redis://localhost:6379", Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // port 1 is reserved and nothing listens on it
        let store = RedisSetStore::open("redis://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = store.scard("s1").await.unwrap_err();
        assert!(matches!(err, ClientError::Unavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_closed_store_rejects_commands() {
        let store = RedisSetStore::open("redis://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert_eq!(store.scard("s1").await, Err(ClientError::Closed));
    }
}
