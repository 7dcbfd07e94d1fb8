//! Remote set-store clients used by the `redis` processor.
//!
//! The processor only needs the capability to run a set command against a key and get a
//! number back; everything else about the remote system stays behind [`SetStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod redis;

pub use self::memory::MemorySetStore;
pub use self::redis::RedisSetStore;

/// URL selecting the in-process store.
pub const MEMORY_URL: &str = "memory://";

/// Result type of remote client calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The remote system could not be reached.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The remote system rejected the command.
    #[error("command failed: {0}")]
    Command(String),

    /// The client was already closed.
    #[error("client is closed")]
    Closed,

    /// The command was never sent because its stage is closing.
    #[error("request abandoned, stage is closing")]
    Abandoned,
}

/// A remote store holding sets of byte strings keyed by name.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Cardinality of the set at `key`, `0` if the key does not exist.
    async fn scard(&self, key: &str) -> ClientResult<i64>;

    /// Adds `member` to the set at `key`. Returns `1` if it was added, `0` if it was present.
    async fn sadd(&self, key: &str, member: &[u8]) -> ClientResult<i64>;

    /// Releases the underlying connection. Calling it again is a no-op.
    async fn close(&self) -> ClientResult<()>;
}

/// Creates the store addressed by `url`. `memory://` selects a fresh in-process store, any
/// other URL is handed to the redis client. Connections are established lazily, so only a
/// malformed URL fails here.
pub fn connect(url: &str, connect_timeout: Duration) -> ClientResult<Arc<dyn SetStore>> {
    if url == MEMORY_URL {
        return Ok(Arc::new(MemorySetStore::new()));
    }
    Ok(Arc::new(RedisSetStore::open(url, connect_timeout)?))
}
