use std::sync::Arc;

use arc_swap::ArcSwap;

use unigate_common::GatewaySnapshot;
use unigate_provider::{
    spawn_observer, BreakerTable, CredentialPool, ObserverHandle, OutcomeSender, UsageSink,
};

/// Everything bound to one configuration snapshot: the pool, its outcome
/// channel, and the observer draining it. Retired wholesale on reload.
pub struct PoolRuntime {
    pub pool: Arc<CredentialPool>,
    pub outcomes: OutcomeSender,
    observer: Option<ObserverHandle>,
}

impl PoolRuntime {
    fn build(
        snapshot: &GatewaySnapshot,
        breakers: Arc<BreakerTable>,
        sinks: Vec<Arc<dyn UsageSink>>,
    ) -> Self {
        let pool = Arc::new(CredentialPool::from_snapshot(snapshot, breakers));
        let (outcomes, observer) = spawn_observer(pool.clone(), sinks, 1024);
        Self {
            pool,
            outcomes,
            observer: Some(observer),
        }
    }

    fn retire(mut self) {
        self.pool.retire();
        if let Some(observer) = self.observer.take() {
            observer.shutdown();
        }
    }
}

/// Hot-swappable gateway state. `config` and `runtime` are immutable
/// snapshots behind [`ArcSwap`]; readers load once per request and keep
/// that view until they finish, so a reload never shows a mixed state.
pub struct GatewayState {
    config: ArcSwap<GatewaySnapshot>,
    runtime: ArcSwap<PoolRuntime>,
    /// blake3 over the canonical JSON encoding of the active snapshot.
    config_hash: ArcSwap<String>,
    breakers: Arc<BreakerTable>,
    sinks: Vec<Arc<dyn UsageSink>>,
}

impl GatewayState {
    pub fn new(snapshot: GatewaySnapshot, sinks: Vec<Arc<dyn UsageSink>>) -> Self {
        let breakers = Arc::new(BreakerTable::new(snapshot.breaker.clone()));
        let runtime = PoolRuntime::build(&snapshot, breakers.clone(), sinks.clone());
        let hash = snapshot_hash(&snapshot);
        Self {
            config: ArcSwap::from_pointee(snapshot),
            runtime: ArcSwap::from_pointee(runtime),
            config_hash: ArcSwap::from_pointee(hash),
            breakers,
            sinks,
        }
    }

    pub fn config(&self) -> Arc<GatewaySnapshot> {
        self.config.load_full()
    }

    pub fn runtime(&self) -> Arc<PoolRuntime> {
        self.runtime.load_full()
    }

    pub fn breakers(&self) -> &Arc<BreakerTable> {
        &self.breakers
    }

    pub fn config_hash(&self) -> Arc<String> {
        self.config_hash.load_full()
    }

    /// Applies a new snapshot. Identical content (by hash) is a no-op so
    /// repeated reloads of the same file cost nothing. In-flight requests
    /// keep the runtime they loaded; the retired pool's background task is
    /// stopped once swapped out.
    ///
    /// Returns whether anything changed.
    pub fn reload(&self, snapshot: GatewaySnapshot) -> bool {
        let hash = snapshot_hash(&snapshot);
        if *self.config_hash.load_full() == hash {
            tracing::info!("config reload: snapshot unchanged, skipping swap");
            return false;
        }

        let runtime = PoolRuntime::build(&snapshot, self.breakers.clone(), self.sinks.clone());
        let old = self.runtime.swap(Arc::new(runtime));
        self.config.store(Arc::new(snapshot));
        self.config_hash.store(Arc::new(hash));

        match Arc::try_unwrap(old) {
            Ok(old) => old.retire(),
            // Requests still hold the old runtime; the last holder dropping
            // it leaks only a parked recovery task until process exit, and
            // the pool itself is unreachable for new selections.
            Err(old) => old.pool.retire(),
        }
        tracing::info!("config reload: new snapshot active");
        true
    }
}

fn snapshot_hash(snapshot: &GatewaySnapshot) -> String {
    let encoded = serde_json::to_vec(snapshot).unwrap_or_default();
    blake3::hash(&encoded).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use unigate_common::GatewaySnapshot;

    #[tokio::test]
    async fn reload_same_snapshot_is_noop() {
        let snapshot = GatewaySnapshot::default();
        let state = GatewayState::new(snapshot.clone(), Vec::new());
        let hash_before = state.config_hash();
        assert!(!state.reload(snapshot));
        assert_eq!(*state.config_hash(), *hash_before);
    }

    #[tokio::test]
    async fn reload_changed_snapshot_swaps() {
        let snapshot = GatewaySnapshot::default();
        let state = GatewayState::new(snapshot.clone(), Vec::new());
        let old_runtime = state.runtime();

        let mut changed = snapshot;
        changed.routing.request_retry = 5;
        assert!(state.reload(changed));
        assert_eq!(state.config().routing.request_retry, 5);
        // The pre-swap runtime stays alive for requests that hold it.
        assert!(!Arc::ptr_eq(&old_runtime, &state.runtime()));
        assert!(old_runtime.pool.usage(0).await.is_none());
    }
}
