use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ClientError, ClientResult, SetStore};

/// An in-process [`SetStore`].
#[derive(Debug, Default)]
pub struct MemorySetStore {
    sets: Mutex<HashMap<String, HashSet<Vec<u8>>>>,
    closed: AtomicBool,
}

impl MemorySetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the set at `key` with `members`.
    pub fn with_set<M: Into<Vec<u8>>>(self, key: &str, members: impl IntoIterator<Item = M>) -> Self {
        {
            let mut sets = self.sets.lock().unwrap_or_else(|p| p.into_inner());
            let set = sets.entry(key.to_string()).or_default();
            set.extend(members.into_iter().map(Into::into));
        }
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SetStore for MemorySetStore {
    async fn scard(&self, key: &str) -> ClientResult<i64> {
        self.check_open()?;
        let sets = self.sets.lock().unwrap_or_else(|p| p.into_inner());
        Ok(sets.get(key).map_or(0, |set| set.len() as i64))
    }

    async fn sadd(&self, key: &str, member: &[u8]) -> ClientResult<i64> {
        self.check_open()?;
        let mut sets = self.sets.lock().unwrap_or_else(|p| p.into_inner());
        let added = sets.entry(key.to_string()).or_default().insert(member.to_vec());
        Ok(i64::from(added))
    }

    async fn close(&self) -> ClientResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_commands() {
        let store = MemorySetStore::new().with_set("s1", ["a", "b", "c", "d"]);
        assert_eq!(store.scard("s1").await, Ok(4));
        assert_eq!(store.scard("s2").await, Ok(0));

        assert_eq!(store.sadd("s2", b"x").await, Ok(1));
        assert_eq!(store.sadd("s2", b"x").await, Ok(0));
        assert_eq!(store.scard("s2").await, Ok(1));
    }

    #[tokio::test]
    async fn test_closed_store_rejects_commands() {
        let store = MemorySetStore::new();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.is_closed());
        assert_eq!(store.scard("s").await, Err(ClientError::Closed));
        assert_eq!(store.sadd("s", b"m").await, Err(ClientError::Closed));
    }
}
