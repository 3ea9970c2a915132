//! Retry sweep: due failure rows are re-queued or archived.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument};

use crate::app::retry::has_exceeded_max;
use crate::app::scheduler::Job;
use crate::app::signals::{Signal, SignalBus};
use crate::domain::{
    AppError, ArchiveReason, FailureCategory, InteractionStore, PendingInteraction,
};

#[derive(Debug, Clone)]
pub struct RetrySweepConfig {
    pub batch_size: i64,
    /// Rows older than this are archived as expired regardless of their budget
    pub max_age: Option<Duration>,
}

impl Default for RetrySweepConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_age: None,
        }
    }
}

/// Where the sweep sends each candidate
#[derive(Debug, Default, PartialEq)]
pub struct SweepPlan {
    pub exhausted: Vec<PendingInteraction>,
    pub expired: Vec<PendingInteraction>,
    pub to_execution: Vec<i64>,
    pub to_simulation: Vec<i64>,
}

impl SweepPlan {
    /// Classify candidates using the counters recorded by the failing stage
    #[must_use]
    pub fn classify(candidates: Vec<PendingInteraction>, max_age: Option<Duration>) -> Self {
        let now = Utc::now();
        let max_age = max_age.and_then(|age| chrono::Duration::from_std(age).ok());
        let mut plan = Self::default();
        for row in candidates {
            let Some(category) = row.status.failure_category() else {
                continue;
            };
            if has_exceeded_max(category, row.retry_count) {
                plan.exhausted.push(row);
            } else if max_age.is_some_and(|age| now - row.created_at > age) {
                plan.expired.push(row);
            } else if category == FailureCategory::ExecutionFailed {
                plan.to_execution.push(row.id);
            } else {
                plan.to_simulation.push(row.id);
            }
        }
        plan
    }
}

pub struct RetrySweepJob {
    store: Arc<dyn InteractionStore>,
    signals: Arc<SignalBus>,
    config: RetrySweepConfig,
}

impl RetrySweepJob {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        signals: Arc<SignalBus>,
        config: RetrySweepConfig,
    ) -> Self {
        Self {
            store,
            signals,
            config,
        }
    }

    async fn archive(&self, rows: &[PendingInteraction], reason: ArchiveReason) {
        if rows.is_empty() {
            return;
        }
        match self.store.archive(rows, reason).await {
            Ok(archived) => info!(
                archived,
                skipped = rows.len() as u64 - archived,
                reason = %reason,
                "Interactions archived"
            ),
            Err(e) => error!(error = %e, count = rows.len(), reason = %reason, "Archive failed"),
        }
    }
}

#[async_trait]
impl Job for RetrySweepJob {
    fn name(&self) -> &'static str {
        "retry"
    }

    #[instrument(skip(self))]
    async fn run(&self) -> Result<(), AppError> {
        let candidates = self.store.get_retry_candidates(self.config.batch_size).await?;
        if candidates.is_empty() {
            debug!("No interactions due for retry");
            return Ok(());
        }

        let plan = SweepPlan::classify(candidates, self.config.max_age);
        debug!(
            exhausted = plan.exhausted.len(),
            expired = plan.expired.len(),
            to_execution = plan.to_execution.len(),
            to_simulation = plan.to_simulation.len(),
            "Retry sweep planned"
        );

        self.archive(&plan.exhausted, ArchiveReason::MaxRetries).await;
        self.archive(&plan.expired, ArchiveReason::Expired).await;

        if !plan.to_execution.is_empty() {
            match self.store.reset_for_execution(&plan.to_execution).await {
                Ok(0) => debug!("Execution candidates moved on before re-queue"),
                Ok(_) => self.signals.emit(Signal::InteractionsSimulated),
                Err(e) => error!(error = %e, "Failed to re-queue interactions for execution"),
            }
        }
        if !plan.to_simulation.is_empty() {
            match self.store.reset_for_simulation(&plan.to_simulation).await {
                Ok(0) => debug!("Simulation candidates moved on before re-queue"),
                Ok(_) => self.signals.emit(Signal::NewInteractions),
                Err(e) => error!(error = %e, "Failed to re-queue interactions for simulation"),
            }
        }
        Ok(())
    }
}
