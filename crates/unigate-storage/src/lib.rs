//! Key-value repository seam. The gateway persists only OAuth token
//! material and per-credential usage counters; everything else is volatile.
//! Concrete backends (file, SQL, remote) implement [`Repository`]; the
//! bundled [`MemoryRepository`] backs tests and stateless deployments.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("encode/decode failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Namespaces keep token material and counters from colliding; backends may
/// map them to tables, prefixes, or directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Tokens,
    Usage,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Tokens => "tokens",
            Namespace::Usage => "usage",
        }
    }
}

#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, ns: Namespace, key: &str) -> Result<(), StorageError>;
    async fn list(&self, ns: Namespace) -> Result<Vec<String>, StorageError>;
}

/// Persisted per-credential usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub successes: u64,
    pub failures: u64,
}

/// Loads, mutates, and stores one credential's usage record.
pub async fn bump_usage(
    repo: &dyn Repository,
    credential_id: i64,
    success: bool,
) -> Result<UsageRecord, StorageError> {
    let key = credential_id.to_string();
    let mut record: UsageRecord = match repo.get(Namespace::Usage, &key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)?,
        None => UsageRecord::default(),
    };
    if success {
        record.successes += 1;
    } else {
        record.failures += 1;
    }
    repo.put(Namespace::Usage, &key, serde_json::to_vec(&record)?)
        .await?;
    Ok(record)
}

/// In-memory repository; contents die with the process.
#[derive(Default)]
pub struct MemoryRepository {
    maps: RwLock<HashMap<Namespace, HashMap<String, Vec<u8>>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Repository for MemoryRepository {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .maps
            .read()
            .await
            .get(&ns)
            .and_then(|map| map.get(key))
            .cloned())
    }

    async fn put(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.maps
            .write()
            .await
            .entry(ns)
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<(), StorageError> {
        if let Some(map) = self.maps.write().await.get_mut(&ns) {
            map.remove(key);
        }
        Ok(())
    }

    async fn list(&self, ns: Namespace) -> Result<Vec<String>, StorageError> {
        Ok(self
            .maps
            .read()
            .await
            .get(&ns)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn usage_counters_accumulate() {
        let repo = MemoryRepository::new();
        bump_usage(&repo, 7, true).await.unwrap();
        bump_usage(&repo, 7, false).await.unwrap();
        let record = bump_usage(&repo, 7, true).await.unwrap();
        assert_eq!(
            record,
            UsageRecord {
                successes: 2,
                failures: 1
            }
        );
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let repo = MemoryRepository::new();
        repo.put(Namespace::Tokens, "a", b"t".to_vec()).await.unwrap();
        repo.put(Namespace::Usage, "a", b"u".to_vec()).await.unwrap();
        assert_eq!(
            repo.get(Namespace::Tokens, "a").await.unwrap(),
            Some(b"t".to_vec())
        );
        assert_eq!(
            repo.get(Namespace::Usage, "a").await.unwrap(),
            Some(b"u".to_vec())
        );
    }
}
