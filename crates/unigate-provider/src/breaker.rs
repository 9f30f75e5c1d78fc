use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::time::{Duration, Instant};

use unigate_common::{BreakerConfig, Provider};

/// Circuit state is tracked per (provider, model, base-url) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Entry {
    phase: Phase,
    /// Incremented on every transition; reports stamped with an earlier
    /// generation are discarded.
    generation: u64,
    consecutive_successes: u32,
    consecutive_failures: u32,
    total_successes: u64,
    total_failures: u64,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
}

impl Entry {
    fn new() -> Self {
        Self {
            phase: Phase::Closed,
            generation: 0,
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            last_success: None,
            last_failure: None,
        }
    }

    fn transition(&mut self, phase: Phase) {
        self.phase = phase;
        self.generation += 1;
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
    }
}

/// Point-in-time view for metrics and tests.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub generation: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Breaker table. Selection consults [`BreakerTable::admits`] (pure read);
/// the dispatcher stamps each attempt via [`BreakerTable::register_attempt`];
/// only the outcome observer calls [`BreakerTable::record`].
pub struct BreakerTable {
    entries: RwLock<HashMap<BreakerKey, Arc<Mutex<Entry>>>>,
    config: BreakerConfig,
}

impl BreakerTable {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn entry(&self, key: &BreakerKey) -> Arc<Mutex<Entry>> {
        if let Some(entry) = self.entries.read().expect("breaker map poisoned").get(key) {
            return entry.clone();
        }
        let mut map = self.entries.write().expect("breaker map poisoned");
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Entry::new())))
            .clone()
    }

    /// Whether selection may route to this triple right now. Does not
    /// mutate state: an expired open circuit reads as admissible and flips
    /// to half-open when the attempt registers.
    pub fn admits(&self, key: &BreakerKey) -> bool {
        let Some(entry) = self
            .entries
            .read()
            .expect("breaker map poisoned")
            .get(key)
            .cloned()
        else {
            return true;
        };
        let entry = entry.lock().expect("breaker entry poisoned");
        match entry.phase {
            Phase::Closed | Phase::HalfOpen => true,
            Phase::Open { until } => Instant::now() >= until,
        }
    }

    /// Stamps an attempt with the current generation, performing the lazy
    /// open → half-open transition when the open window has expired.
    pub fn register_attempt(&self, key: &BreakerKey) -> u64 {
        let entry = self.entry(key);
        let mut entry = entry.lock().expect("breaker entry poisoned");
        if let Phase::Open { until } = entry.phase
            && Instant::now() >= until
        {
            entry.transition(Phase::HalfOpen);
        }
        entry.generation
    }

    /// Feeds one attempt outcome. Reports from a superseded generation are
    /// dropped so in-flight stragglers cannot mutate a newer circuit.
    /// Returns the new state when this report caused a transition.
    pub fn record(&self, key: &BreakerKey, generation: u64, success: bool) -> Option<BreakerState> {
        let entry = self.entry(key);
        let mut entry = entry.lock().expect("breaker entry poisoned");
        if generation != entry.generation {
            return None;
        }
        let before = entry.generation;
        let now = Instant::now();
        if success {
            entry.total_successes += 1;
            entry.last_success = Some(now);
            entry.consecutive_failures = 0;
            entry.consecutive_successes += 1;
            if matches!(entry.phase, Phase::HalfOpen)
                && entry.consecutive_successes >= self.config.success_threshold
            {
                entry.transition(Phase::Closed);
            }
        } else {
            entry.total_failures += 1;
            entry.last_failure = Some(now);
            entry.consecutive_successes = 0;
            entry.consecutive_failures += 1;
            let open_until = now + Duration::from_secs(self.config.open_timeout);
            match entry.phase {
                Phase::HalfOpen => entry.transition(Phase::Open { until: open_until }),
                Phase::Closed => {
                    if entry.consecutive_failures >= self.config.failure_threshold {
                        entry.transition(Phase::Open { until: open_until });
                    }
                }
                Phase::Open { .. } => {}
            }
        }

        (entry.generation != before).then(|| match entry.phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen => BreakerState::HalfOpen,
        })
    }

    pub fn snapshot(&self, key: &BreakerKey) -> Option<BreakerSnapshot> {
        let entry = self
            .entries
            .read()
            .expect("breaker map poisoned")
            .get(key)
            .cloned()?;
        let entry = entry.lock().expect("breaker entry poisoned");
        let state = match entry.phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen => BreakerState::HalfOpen,
        };
        Some(BreakerSnapshot {
            state,
            generation: entry.generation,
            consecutive_successes: entry.consecutive_successes,
            consecutive_failures: entry.consecutive_failures,
            total_successes: entry.total_successes,
            total_failures: entry.total_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> BreakerKey {
        BreakerKey {
            provider: Provider::OpenAi,
            model: "gpt-4".into(),
            base_url: "https://api.openai.com".into(),
        }
    }

    fn table() -> BreakerTable {
        BreakerTable::new(BreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: 60,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_recovers() {
        let table = table();
        let key = key();

        for _ in 0..5 {
            let generation = table.register_attempt(&key);
            table.record(&key, generation, false);
        }
        assert!(!table.admits(&key));
        assert_eq!(table.snapshot(&key).unwrap().state, BreakerState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(table.admits(&key));

        // First probe flips to half-open; one success is not yet enough.
        let generation = table.register_attempt(&key);
        assert_eq!(table.snapshot(&key).unwrap().state, BreakerState::HalfOpen);
        table.record(&key, generation, true);
        assert_eq!(table.snapshot(&key).unwrap().state, BreakerState::HalfOpen);

        let generation = table.register_attempt(&key);
        table.record(&key, generation, true);
        assert_eq!(table.snapshot(&key).unwrap().state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let table = table();
        let key = key();
        for _ in 0..5 {
            let generation = table.register_attempt(&key);
            table.record(&key, generation, false);
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        let generation = table.register_attempt(&key);
        table.record(&key, generation, false);
        assert_eq!(table.snapshot(&key).unwrap().state, BreakerState::Open);
        assert!(!table.admits(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_report_is_discarded() {
        let table = table();
        let key = key();
        let stale = table.register_attempt(&key);
        for _ in 0..5 {
            let generation = table.register_attempt(&key);
            table.record(&key, generation, false);
        }
        let before = table.snapshot(&key).unwrap();
        // A success stamped before the circuit opened must not close it.
        table.record(&key, stale, true);
        let after = table.snapshot(&key).unwrap();
        assert_eq!(after.state, BreakerState::Open);
        assert_eq!(after.generation, before.generation);
    }

    #[tokio::test(start_paused = true)]
    async fn counters_reset_on_transition() {
        let table = table();
        let key = key();
        for _ in 0..5 {
            let generation = table.register_attempt(&key);
            table.record(&key, generation, false);
        }
        let snap = table.snapshot(&key).unwrap();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.consecutive_successes, 0);
    }
}
