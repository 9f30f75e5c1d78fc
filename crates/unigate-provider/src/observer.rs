use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::breaker::BreakerKey;
use crate::credential::CredentialId;
use crate::outcome::{Outcome, QUOTA_FALLBACK};
use crate::pool::CredentialPool;

/// Cooldown applied once a credential keeps failing.
const FAILING_COOLDOWN: Duration = Duration::from_secs(10);

/// Consecutive retryable failures before the credential is cooled down.
/// A lone 5xx must not bench the credential; the retry loop may still want
/// one more try on it.
const FAILING_THRESHOLD: u32 = 3;

/// One attempt's result, queued to the observer after the call returns.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub credential_id: CredentialId,
    pub breaker_key: BreakerKey,
    /// Breaker generation stamped when the attempt registered.
    pub generation: u64,
    pub outcome: Outcome,
}

/// Extra consumer of outcome reports (metrics, persisted usage counters).
#[async_trait::async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, report: &OutcomeReport);
}

/// Sending half of the outcome channel. Reports are fire-and-forget; a full
/// channel drops the report rather than stalling the request path.
#[derive(Clone)]
pub struct OutcomeSender {
    tx: mpsc::Sender<OutcomeReport>,
}

impl OutcomeSender {
    pub fn report(&self, report: OutcomeReport) {
        if let Err(err) = self.tx.try_send(report) {
            tracing::warn!(error = %err, "outcome channel saturated; report dropped");
        }
    }
}

pub struct ObserverHandle {
    task: tokio::task::JoinHandle<()>,
}

impl ObserverHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// Spawns the single observer task draining the outcome channel. Keeping
/// all pool/breaker mutation on one task means selection never contends
/// with reporting.
pub fn spawn_observer(
    pool: Arc<CredentialPool>,
    sinks: Vec<Arc<dyn UsageSink>>,
    buffer: usize,
) -> (OutcomeSender, ObserverHandle) {
    let (tx, mut rx) = mpsc::channel::<OutcomeReport>(buffer);
    let task = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            apply(&pool, &report).await;
            for sink in &sinks {
                sink.record(&report).await;
            }
        }
    });
    (OutcomeSender { tx }, ObserverHandle { task })
}

async fn apply(pool: &CredentialPool, report: &OutcomeReport) {
    let id = report.credential_id;
    match &report.outcome {
        Outcome::Success => {
            pool.record_usage(id, true).await;
            record_breaker(pool, report, true);
        }
        Outcome::QuotaExceeded { retry_after } => {
            pool.record_usage(id, false).await;
            pool.mark_quota_exhausted(id, retry_after.unwrap_or(QUOTA_FALLBACK))
                .await;
            record_breaker(pool, report, false);
        }
        Outcome::Retryable(_) | Outcome::Timeout => {
            let consecutive = pool.record_usage(id, false).await;
            if consecutive >= FAILING_THRESHOLD {
                pool.mark_failing(id, FAILING_COOLDOWN).await;
            }
            record_breaker(pool, report, false);
        }
        Outcome::Fatal(_) => {
            pool.record_usage(id, false).await;
            record_breaker(pool, report, false);
        }
        // Cancellation says nothing about upstream health.
        Outcome::Canceled => {}
    }
}

fn record_breaker(pool: &CredentialPool, report: &OutcomeReport, success: bool) {
    if let Some(state) = pool
        .breakers()
        .record(&report.breaker_key, report.generation, success)
    {
        tracing::info!(
            provider = %report.breaker_key.provider,
            model = %report.breaker_key.model,
            base_url = %report.breaker_key.base_url,
            state = ?state,
            "circuit transition"
        );
    }
}
