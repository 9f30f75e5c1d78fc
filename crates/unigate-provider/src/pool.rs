use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use unigate_common::{GatewaySnapshot, Provider, RoutingStrategy};

use crate::breaker::{BreakerKey, BreakerTable};
use crate::cooldown::CooldownQueue;
use crate::credential::{Credential, CredentialId, CredentialStatus};

/// Per-credential pool bookkeeping: lifecycle status plus usage counters.
#[derive(Debug)]
pub(crate) struct CredState {
    pub(crate) status: CredentialStatus,
    pub(crate) until: Option<Instant>,
    pub(crate) successes: u64,
    pub(crate) failures: u64,
    pub(crate) consecutive_failures: u32,
    pub(crate) last_used: Option<Instant>,
}

impl CredState {
    fn new(enabled: bool) -> Self {
        Self {
            status: if enabled {
                CredentialStatus::Active
            } else {
                CredentialStatus::Disabled
            },
            until: None,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            last_used: None,
        }
    }

    fn selectable(&self, now: Instant) -> bool {
        match self.status {
            CredentialStatus::Active => true,
            CredentialStatus::Disabled => false,
            // The recovery task flips these back; the deadline check covers
            // the window between expiry and wake-up.
            CredentialStatus::QuotaExhausted | CredentialStatus::Failing => {
                self.until.is_some_and(|until| until <= now)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    /// No configured credential admits this model at all.
    #[error("no credential admits model {0:?}")]
    NoMatchingCredential(String),
    /// Credentials exist but every candidate is cooling down, disabled, or
    /// circuit-open.
    #[error("all credentials for the provider are unavailable")]
    UpstreamsUnavailable,
    /// Force-prefix mode and the request carried no routing prefix.
    #[error("model name {0:?} lacks a required routing prefix")]
    InvalidModelName(String),
}

/// Outcome of selection: the credential plus resolved model names.
#[derive(Debug, Clone)]
pub struct Selected {
    pub credential: Arc<Credential>,
    /// Client-visible name with the routing prefix stripped.
    pub client_model: String,
    /// Name to send upstream, post alias mapping.
    pub upstream_model: String,
    pub breaker_key: BreakerKey,
}

/// The credential pool for one configuration snapshot.
///
/// Credentials and provider grouping are immutable after construction;
/// lifecycle state sits behind a shared/exclusive lock so the selection
/// hot path reads shared. Reload replaces the whole pool.
pub struct CredentialPool {
    creds: HashMap<CredentialId, Arc<Credential>>,
    /// Declared order per provider; fill-first depends on it.
    by_provider: HashMap<Provider, Vec<CredentialId>>,
    states: Arc<RwLock<HashMap<CredentialId, CredState>>>,
    rr_cursors: HashMap<Provider, AtomicUsize>,
    strategy: RoutingStrategy,
    force_model_prefix: bool,
    breakers: Arc<BreakerTable>,
    queue: Arc<CooldownQueue>,
}

impl CredentialPool {
    pub fn from_snapshot(snapshot: &GatewaySnapshot, breakers: Arc<BreakerTable>) -> Self {
        let mut creds = HashMap::new();
        let mut by_provider: HashMap<Provider, Vec<CredentialId>> = HashMap::new();
        let mut states = HashMap::new();

        for entry in &snapshot.credentials {
            let credential = Arc::new(Credential::from_entry(entry));
            by_provider
                .entry(credential.provider)
                .or_default()
                .push(credential.id);
            states.insert(credential.id, CredState::new(entry.enabled));
            creds.insert(credential.id, credential);
        }

        let rr_cursors = by_provider
            .keys()
            .map(|provider| (*provider, AtomicUsize::new(0)))
            .collect();

        let states = Arc::new(RwLock::new(states));
        let queue = Arc::new(CooldownQueue::new());
        queue.clone().spawn_recover_task(states.clone());

        Self {
            creds,
            by_provider,
            states,
            rr_cursors,
            strategy: snapshot.routing.strategy,
            force_model_prefix: snapshot.routing.force_model_prefix,
            breakers,
            queue,
        }
    }

    /// Stops the pool's recovery task. Called when a reload retires this
    /// snapshot; in-flight selections already hold their `Arc<Credential>`.
    pub fn retire(&self) {
        self.queue.close();
    }

    pub fn breakers(&self) -> &Arc<BreakerTable> {
        &self.breakers
    }

    /// Splits `tag/model` when the tag names a configured prefix for this
    /// provider; otherwise the whole string is the model.
    fn split_prefix<'m>(&self, provider: Provider, model: &'m str) -> (Option<&'m str>, &'m str) {
        let Some((tag, rest)) = model.split_once('/') else {
            return (None, model);
        };
        let tag_known = self
            .by_provider
            .get(&provider)
            .into_iter()
            .flatten()
            .filter_map(|id| self.creds.get(id))
            .any(|cred| cred.prefix.as_deref() == Some(tag));
        if tag_known {
            (Some(tag), rest)
        } else {
            (None, model)
        }
    }

    /// Selects one credential for `(provider, model)`, skipping `excluded`
    /// ids (earlier attempts of the same request), cooled-down entries, and
    /// circuit-open triples.
    pub async fn select(
        &self,
        provider: Provider,
        model: &str,
        excluded: &[CredentialId],
    ) -> Result<Selected, SelectError> {
        let (tag, stripped) = self.split_prefix(provider, model);
        if self.force_model_prefix && tag.is_none() {
            return Err(SelectError::InvalidModelName(model.to_string()));
        }

        let ids = self
            .by_provider
            .get(&provider)
            .cloned()
            .unwrap_or_default();
        if ids.is_empty() {
            return Err(SelectError::UpstreamsUnavailable);
        }

        // Policy pass first: distinguishes "nothing admits this model"
        // from "everything is unhealthy".
        let mut admitted: Vec<&Arc<Credential>> = Vec::new();
        for id in &ids {
            let Some(cred) = self.creds.get(id) else {
                continue;
            };
            if let Some(tag) = tag
                && cred.prefix.as_deref() != Some(tag)
            {
                continue;
            }
            if cred.policy.admits(stripped) {
                admitted.push(cred);
            }
        }
        if admitted.is_empty() {
            return Err(SelectError::NoMatchingCredential(model.to_string()));
        }

        let now = Instant::now();
        let states = self.states.read().await;
        let healthy: Vec<&Arc<Credential>> = admitted
            .into_iter()
            .filter(|cred| !excluded.contains(&cred.id))
            .filter(|cred| {
                states
                    .get(&cred.id)
                    .is_some_and(|state| state.selectable(now))
            })
            .filter(|cred| {
                self.breakers.admits(&BreakerKey {
                    provider,
                    model: cred.policy.resolve_upstream(stripped),
                    base_url: cred.effective_base_url().to_string(),
                })
            })
            .collect();
        drop(states);

        if healthy.is_empty() {
            return Err(SelectError::UpstreamsUnavailable);
        }

        let chosen = match self.strategy {
            RoutingStrategy::RoundRobin => {
                let cursor = self
                    .rr_cursors
                    .get(&provider)
                    .map(|cursor| cursor.fetch_add(1, Ordering::Relaxed))
                    .unwrap_or(0);
                healthy[cursor % healthy.len()]
            }
            // Declared order is preserved through the filters, so the head
            // of the healthy set is the fill-first choice: an exhausted
            // head drops out and the next entry takes over until recovery.
            RoutingStrategy::FillFirst => healthy[0],
            RoutingStrategy::Weighted => {
                let total: u64 = healthy.iter().map(|cred| u64::from(cred.weight)).sum();
                let mut roll = rand::rng().random_range(0..total.max(1));
                let mut pick = healthy[healthy.len() - 1];
                for cred in healthy.iter().copied() {
                    let weight = u64::from(cred.weight);
                    if roll < weight {
                        pick = cred;
                        break;
                    }
                    roll -= weight;
                }
                pick
            }
        };

        let upstream_model = chosen.policy.resolve_upstream(stripped);
        Ok(Selected {
            credential: chosen.clone(),
            client_model: stripped.to_string(),
            upstream_model: upstream_model.clone(),
            breaker_key: BreakerKey {
                provider,
                model: upstream_model,
                base_url: chosen.effective_base_url().to_string(),
            },
        })
    }

    /// Marks a credential quota-exhausted until the reset hint elapses.
    pub async fn mark_quota_exhausted(&self, id: CredentialId, retry_after: Duration) {
        self.mark_cooldown(id, retry_after, CredentialStatus::QuotaExhausted)
            .await;
    }

    /// Short cooldown after repeated upstream trouble on this credential.
    pub async fn mark_failing(&self, id: CredentialId, cooldown: Duration) {
        self.mark_cooldown(id, cooldown, CredentialStatus::Failing).await;
    }

    async fn mark_cooldown(&self, id: CredentialId, duration: Duration, status: CredentialStatus) {
        let until = Instant::now() + duration;
        {
            let mut states = self.states.write().await;
            let Some(state) = states.get_mut(&id) else {
                return;
            };
            if state.status == CredentialStatus::Disabled {
                return;
            }
            state.status = status;
            state.until = Some(until);
        }
        self.queue.push(until, id).await;
        tracing::info!(
            credential_id = id,
            cooldown_secs = duration.as_secs(),
            status = ?status,
            "credential cooling down"
        );
    }

    /// Updates usage counters and returns the credential's consecutive
    /// failure count after this attempt.
    pub async fn record_usage(&self, id: CredentialId, success: bool) -> u32 {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(&id) else {
            return 0;
        };
        state.last_used = Some(Instant::now());
        if success {
            state.successes += 1;
            state.consecutive_failures = 0;
        } else {
            state.failures += 1;
            state.consecutive_failures += 1;
        }
        state.consecutive_failures
    }

    pub async fn status(&self, id: CredentialId) -> Option<CredentialStatus> {
        self.states.read().await.get(&id).map(|state| state.status)
    }

    /// (successes, failures) counters for one credential.
    pub async fn usage(&self, id: CredentialId) -> Option<(u64, u64)> {
        self.states
            .read()
            .await
            .get(&id)
            .map(|state| (state.successes, state.failures))
    }

    pub fn credential(&self, id: CredentialId) -> Option<&Arc<Credential>> {
        self.creds.get(&id)
    }

    pub fn has_credentials(&self, provider: Provider) -> bool {
        self.by_provider
            .get(&provider)
            .is_some_and(|ids| !ids.is_empty())
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.by_provider.keys().copied()
    }

    /// Credentials of one provider in declared order.
    pub fn credentials_for(&self, provider: Provider) -> Vec<Arc<Credential>> {
        self.by_provider
            .get(&provider)
            .into_iter()
            .flatten()
            .filter_map(|id| self.creds.get(id).cloned())
            .collect()
    }
}
