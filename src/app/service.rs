//! Application service behind the HTTP surface.

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::scheduler::{JobRun, JobScheduler};
use super::signals::{Signal, SignalBus};
use crate::domain::{
    AppError, ArchiveReason, HealthResponse, HealthStatus, InteractionChain, InteractionStore,
    PushInteractionsRequest, PushInteractionsResponse, QueueStats, ValidationError, WalletHistory,
};

/// Application service containing the producer and operator operations
pub struct AppService {
    store: Arc<dyn InteractionStore>,
    chain: Arc<dyn InteractionChain>,
    signals: Arc<SignalBus>,
    scheduler: Option<Arc<JobScheduler>>,
}

impl AppService {
    #[must_use]
    pub fn new(
        store: Arc<dyn InteractionStore>,
        chain: Arc<dyn InteractionChain>,
        signals: Arc<SignalBus>,
    ) -> Self {
        Self {
            store,
            chain,
            signals,
            scheduler: None,
        }
    }

    /// Attach the job registry used by manual triggers
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Queue new interactions, duplicates of queued rows are ignored
    #[instrument(skip(self, request), fields(count = request.interactions.len()))]
    pub async fn push_interactions(
        &self,
        request: &PushInteractionsRequest,
    ) -> Result<PushInteractionsResponse, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let inserted = self.store.insert_pending(&request.interactions).await?;
        info!(
            received = request.interactions.len(),
            inserted, "Interactions queued"
        );
        if inserted > 0 {
            self.signals.emit(Signal::NewInteractions);
        }
        Ok(PushInteractionsResponse { inserted })
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, AppError> {
        self.store.queue_stats().await
    }

    #[instrument(skip(self), fields(wallet = %wallet))]
    pub async fn wallet_history(&self, wallet: Address) -> Result<WalletHistory, AppError> {
        let (pending, pushed, archived) = tokio::try_join!(
            self.store.get_pending_by_wallet(wallet),
            self.store.get_pushed_by_wallet(wallet),
            self.store.get_archived_by_wallet(wallet),
        )?;
        Ok(WalletHistory {
            pending,
            pushed,
            archived,
        })
    }

    /// Manually archive a queued interaction that no worker currently owns
    #[instrument(skip(self))]
    pub async fn archive_interaction(&self, id: i64) -> Result<(), AppError> {
        let row = self
            .store
            .get_pending(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Interaction {}", id)))?;
        if row.is_locked() {
            return Err(AppError::Conflict(format!(
                "Interaction {} is being processed",
                id
            )));
        }
        if self.store.archive(&[row], ArchiveReason::Manual).await? == 0 {
            // Leased or moved on between the read and the archive
            return match self.store.get_pending(id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "Interaction {} is being processed",
                    id
                ))),
                None => Err(AppError::NotFound(format!("Interaction {}", id))),
            };
        }
        info!(id, "Interaction archived manually");
        Ok(())
    }

    /// Run a registered job now
    #[instrument(skip(self))]
    pub async fn trigger_job(&self, name: &str) -> Result<JobRun, AppError> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| AppError::NotSupported("Jobs are disabled".to_string()))?;
        scheduler.trigger(name).await
    }

    /// Check health of all dependencies
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.store.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let blockchain_health = match self.chain.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(db_health, blockchain_health)
    }
}
