//! Simulation stage: `pending` rows become `succeeded`, `failed` or `no_session`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, error, info, instrument};

use super::{finish, release};
use crate::app::retry::calculate_next_retry;
use crate::app::scheduler::Job;
use crate::app::signals::{Signal, SignalBus};
use crate::app::simulator::{InteractionSimulator, SimulationResult};
use crate::domain::{
    AppError, FailureCategory, InteractionOutcome, InteractionStatus, InteractionStore,
    PendingInteraction, SkipPredicate, WalletSessionOracle,
};

pub const NO_SESSION_REASON: &str = "No valid session for wallet";

#[derive(Debug, Clone)]
pub struct SimulateConfig {
    pub batch_size: i64,
    /// Smaller batches wait unless one of their rows is older than `max_wait`
    pub min_batch: usize,
    pub max_wait: Duration,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            min_batch: 2,
            max_wait: Duration::from_secs(60),
        }
    }
}

/// Abandon small batches made only of fresh rows
#[must_use]
pub fn skip_small_fresh_batch(rows: &[PendingInteraction], min_batch: usize, max_wait: Duration) -> bool {
    if rows.is_empty() {
        return true;
    }
    let max_wait = chrono::Duration::from_std(max_wait).unwrap_or(chrono::Duration::MAX);
    let now = Utc::now();
    rows.len() < min_batch && rows.iter().all(|row| now - row.created_at < max_wait)
}

pub struct SimulateJob {
    store: Arc<dyn InteractionStore>,
    sessions: Arc<dyn WalletSessionOracle>,
    simulator: Arc<InteractionSimulator>,
    signals: Arc<SignalBus>,
    config: SimulateConfig,
}

impl SimulateJob {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        sessions: Arc<dyn WalletSessionOracle>,
        simulator: Arc<InteractionSimulator>,
        signals: Arc<SignalBus>,
        config: SimulateConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            simulator,
            signals,
            config,
        }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn simulate_batch(&self, rows: &[PendingInteraction]) -> Result<(), AppError> {
        let sessions = self.check_sessions(rows).await;

        let results = join_all(rows.iter().map(|row| async {
            if !sessions.get(&row.wallet).copied().unwrap_or(false) {
                return None;
            }
            Some(
                self.simulator
                    .simulate_interaction(
                        row.wallet,
                        row.product_id,
                        row.type_denominator,
                        &row.interaction_data,
                    )
                    .await,
            )
        }))
        .await;

        let mut outcomes = Vec::with_capacity(rows.len());
        for (row, result) in rows.iter().zip(results) {
            outcomes.push(match result {
                None => failure(row, FailureCategory::NoSession, NO_SESSION_REASON)?,
                Some(SimulationResult::Success) => {
                    InteractionOutcome::transition(row, InteractionStatus::Succeeded)?
                }
                Some(SimulationResult::Failure { reason }) => {
                    failure(row, FailureCategory::Failed, reason)?
                }
            });
        }

        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == InteractionStatus::Succeeded)
            .count();
        debug!(
            succeeded,
            failed = outcomes.len() - succeeded,
            "Simulation batch evaluated"
        );

        if let Err(e) = self.store.apply_outcomes(&outcomes).await {
            error!(error = %e, count = outcomes.len(), "Failed to record simulation outcomes");
            return Ok(());
        }
        if succeeded > 0 {
            info!(succeeded, "Interactions simulated");
            self.signals.emit(Signal::InteractionsSimulated);
        }
        Ok(())
    }

    /// One session lookup per distinct wallet
    async fn check_sessions(&self, rows: &[PendingInteraction]) -> HashMap<Address, bool> {
        let mut wallets: Vec<Address> = rows.iter().map(|row| row.wallet).collect();
        wallets.sort_unstable();
        wallets.dedup();

        let checks = join_all(wallets.iter().map(|wallet| self.sessions.is_session_valid(*wallet))).await;
        wallets.into_iter().zip(checks).collect()
    }
}

fn failure(
    row: &PendingInteraction,
    category: FailureCategory,
    reason: impl Into<String>,
) -> Result<InteractionOutcome, AppError> {
    let retry_count = row.retry_count + 1;
    Ok(InteractionOutcome::transition(row, category.status())?.with_failure(
        reason,
        retry_count,
        calculate_next_retry(category, retry_count),
    ))
}

#[async_trait]
impl Job for SimulateJob {
    fn name(&self) -> &'static str {
        "simulate"
    }

    async fn run(&self) -> Result<(), AppError> {
        let (min_batch, max_wait) = (self.config.min_batch, self.config.max_wait);
        let skip: &SkipPredicate =
            &move |rows: &[PendingInteraction]| skip_small_fresh_batch(rows, min_batch, max_wait);
        let rows = self
            .store
            .get_and_lock(InteractionStatus::Pending, self.config.batch_size, Some(skip))
            .await?;
        if rows.is_empty() {
            debug!("No interactions to simulate");
            return Ok(());
        }

        let result = AssertUnwindSafe(self.simulate_batch(&rows)).catch_unwind().await;
        release(self.store.as_ref(), &rows).await;
        finish(result)
    }
}
