use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::catalog::GridService;

/// One cached upstream payload. Entries are immutable; a refresh replaces
/// the whole value.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    pub payload: Bytes,
    pub content_type: String,
    pub service: GridService,
    pub ttl: Duration,
    pub cached_at: Instant,
}

impl CachedArtifact {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.cached_at) < self.ttl
    }
}

#[derive(Debug)]
pub enum CacheLookup {
    Fresh(CachedArtifact),
    /// Expired but still present; serveable only when a refresh fails.
    Stale(CachedArtifact),
    Miss,
}

/// Concurrent TTL cache keyed by blake3(service, input). Reads never block
/// writes; the sweeper deletes entries past their TTL every five minutes.
pub struct GridCache {
    entries: Arc<DashMap<[u8; 32], CachedArtifact>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

impl GridCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    pub fn key(service: GridService, input: &str) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(service.label().as_bytes());
        hasher.update(&[0]);
        hasher.update(input.as_bytes());
        *hasher.finalize().as_bytes()
    }

    pub fn lookup(&self, key: &[u8; 32]) -> CacheLookup {
        let Some(entry) = self.entries.get(key) else {
            return CacheLookup::Miss;
        };
        let artifact = entry.clone();
        if artifact.is_fresh(Instant::now()) {
            CacheLookup::Fresh(artifact)
        } else {
            CacheLookup::Stale(artifact)
        }
    }

    /// Stores a fresh payload, resetting `cached_at`.
    pub fn put(&self, key: [u8; 32], service: GridService, payload: Bytes, content_type: String) {
        self.entries.insert(
            key,
            CachedArtifact {
                payload,
                content_type,
                service,
                ttl: service.ttl(),
                cached_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops entries older than their TTL.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, artifact| artifact.is_fresh(now));
    }

    pub fn start_sweeper(&self) {
        let entries = self.entries.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                entries.retain(|_, artifact| artifact.is_fresh(now));
            }
        });
        let mut sweeper = self.sweeper.lock().expect("sweeper slot poisoned");
        if let Some(old) = sweeper.replace(task) {
            old.abort();
        }
    }

    pub fn stop_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().expect("sweeper slot poisoned");
        if let Some(task) = sweeper.take() {
            task.abort();
        }
    }
}

impl Default for GridCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fresh_then_stale_then_swept() {
        let cache = GridCache::new();
        let key = GridCache::key(GridService::Reddit, "r/rust");
        cache.put(
            key,
            GridService::Reddit,
            Bytes::from_static(b"{}"),
            "application/json".into(),
        );

        assert!(matches!(cache.lookup(&key), CacheLookup::Fresh(_)));

        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        assert!(matches!(cache.lookup(&key), CacheLookup::Stale(_)));

        cache.sweep();
        assert!(matches!(cache.lookup(&key), CacheLookup::Miss));
    }

    #[tokio::test(start_paused = true)]
    async fn put_resets_cached_at() {
        let cache = GridCache::new();
        let key = GridCache::key(GridService::GoogleSearch, "x");
        cache.put(
            key,
            GridService::GoogleSearch,
            Bytes::from_static(b"old"),
            "application/json".into(),
        );
        tokio::time::advance(Duration::from_secs(4 * 3600 + 600)).await;
        assert!(matches!(cache.lookup(&key), CacheLookup::Stale(_)));

        cache.put(
            key,
            GridService::GoogleSearch,
            Bytes::from_static(b"new"),
            "application/json".into(),
        );
        match cache.lookup(&key) {
            CacheLookup::Fresh(artifact) => assert_eq!(&artifact.payload[..], b"new"),
            other => panic!("expected fresh entry, got {other:?}"),
        }
    }

    #[test]
    fn keys_differ_by_service_and_input() {
        let a = GridCache::key(GridService::GoogleSearch, "x");
        let b = GridCache::key(GridService::BingSearch, "x");
        let c = GridCache::key(GridService::GoogleSearch, "y");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
