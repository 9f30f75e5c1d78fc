use std::sync::Arc;

use unigate_provider::{Outcome, OutcomeReport, UsageSink};
use unigate_storage::{bump_usage, Repository};

/// Persists per-credential usage counters through the repository seam.
pub struct RepositoryUsageSink {
    repository: Arc<dyn Repository>,
}

impl RepositoryUsageSink {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }
}

#[async_trait::async_trait]
impl UsageSink for RepositoryUsageSink {
    async fn record(&self, report: &OutcomeReport) {
        let success = matches!(report.outcome, Outcome::Success);
        if matches!(report.outcome, Outcome::Canceled) {
            return;
        }
        if let Err(err) = bump_usage(self.repository.as_ref(), report.credential_id, success).await
        {
            tracing::warn!(
                credential_id = report.credential_id,
                error = %err,
                "usage persistence failed"
            );
        }
    }
}
