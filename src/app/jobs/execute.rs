//! Execution stage: `succeeded` rows are signed and pushed in one transaction.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use super::{finish, release};
use crate::app::executor::BatchExecutor;
use crate::app::retry::calculate_next_retry;
use crate::app::scheduler::Job;
use crate::app::signer::InteractionSigner;
use crate::domain::{
    AppError, FailureCategory, InteractionOutcome, InteractionStatus, InteractionStore,
    PendingInteraction, PreparedInteraction,
};
use crate::infra::blockchain::contracts::package_interaction_data;

pub const SIGNER_NOT_AUTHORIZED: &str = "signer_not_authorized";
pub const PUSH_FAILED_REASON: &str = "Failed to push transaction on-chain";

#[derive(Debug, Clone)]
pub struct ExecuteConfig {
    pub batch_size: i64,
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self { batch_size: 200 }
    }
}

pub struct ExecuteJob {
    store: Arc<dyn InteractionStore>,
    signer: Arc<InteractionSigner>,
    executor: Arc<BatchExecutor>,
    config: ExecuteConfig,
}

impl ExecuteJob {
    pub fn new(
        store: Arc<dyn InteractionStore>,
        signer: Arc<InteractionSigner>,
        executor: Arc<BatchExecutor>,
        config: ExecuteConfig,
    ) -> Self {
        Self {
            store,
            signer,
            executor,
            config,
        }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()))]
    async fn execute_batch(&self, rows: &[PendingInteraction]) -> Result<(), AppError> {
        let signatures = join_all(rows.iter().map(|row| async {
            match &row.signature {
                Some(signature) => Some(signature.clone()),
                None => {
                    self.signer
                        .sign_interaction(&row.interaction_data, row.wallet, row.product_id)
                        .await
                }
            }
        }))
        .await;

        let mut prepared = Vec::with_capacity(rows.len());
        let mut unsigned = Vec::new();
        for (row, signature) in rows.iter().zip(signatures) {
            match signature {
                Some(signature) => prepared.push(PreparedInteraction {
                    packed_interaction: package_interaction_data(
                        row.type_denominator,
                        &row.interaction_data,
                        &signature,
                    ),
                    interaction: row.clone(),
                    signature,
                }),
                None => unsigned.push(execution_failure(row, SIGNER_NOT_AUTHORIZED)?),
            }
        }

        if !unsigned.is_empty() {
            warn!(count = unsigned.len(), "Interactions without signature marked execution_failed");
            self.record(&unsigned).await;
        }
        if prepared.is_empty() {
            debug!("No interactions to execute post preparation");
            return Ok(());
        }

        let Some(tx_hash) = self.executor.push_prepared_interactions(&prepared).await else {
            let failed = prepared
                .iter()
                .map(|p| execution_failure(&p.interaction, PUSH_FAILED_REASON))
                .collect::<Result<Vec<_>, _>>()?;
            warn!(count = failed.len(), "Push failed, interactions marked execution_failed");
            self.record(&failed).await;
            return Ok(());
        };

        let recorded = match self.store.mark_pushed(&prepared, tx_hash).await {
            Ok(recorded) => recorded,
            Err(e) => {
                // On-chain already, the rows stay in pending and may be pushed again
                error!(
                    error = %e,
                    tx_hash = %tx_hash,
                    ids = ?prepared.iter().map(|p| p.interaction.id).collect::<Vec<_>>(),
                    "CRITICAL: pushed batch could not be recorded"
                );
                return Ok(());
            }
        };
        info!(tx_hash = %tx_hash, count = prepared.len(), recorded, "Interactions pushed");
        Ok(())
    }

    async fn record(&self, outcomes: &[InteractionOutcome]) {
        if let Err(e) = self.store.apply_outcomes(outcomes).await {
            error!(error = %e, count = outcomes.len(), "Failed to record execution failures");
        }
    }
}

fn execution_failure(row: &PendingInteraction, reason: &str) -> Result<InteractionOutcome, AppError> {
    let retry_count = row.retry_count + 1;
    Ok(
        InteractionOutcome::transition(row, InteractionStatus::ExecutionFailed)?.with_failure(
            reason,
            retry_count,
            calculate_next_retry(FailureCategory::ExecutionFailed, retry_count),
        ),
    )
}

#[async_trait]
impl Job for ExecuteJob {
    fn name(&self) -> &'static str {
        "execute"
    }

    async fn run(&self) -> Result<(), AppError> {
        let rows = self
            .store
            .get_and_lock(InteractionStatus::Succeeded, self.config.batch_size, None)
            .await?;
        if rows.is_empty() {
            debug!("No interactions to execute");
            return Ok(());
        }

        let result = AssertUnwindSafe(self.execute_batch(&rows)).catch_unwind().await;
        release(self.store.as_ref(), &rows).await;
        finish(result)
    }
}
