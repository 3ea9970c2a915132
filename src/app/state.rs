//! Application state management.

use std::sync::Arc;

use crate::domain::{InteractionChain, InteractionStore};

use super::scheduler::JobScheduler;
use super::service::AppService;
use super::signals::SignalBus;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
    pub store: Arc<dyn InteractionStore>,
    pub chain: Arc<dyn InteractionChain>,
    pub signals: Arc<SignalBus>,
}

impl AppState {
    /// Create a new application state
    #[must_use]
    pub fn new(
        store: Arc<dyn InteractionStore>,
        chain: Arc<dyn InteractionChain>,
        signals: Arc<SignalBus>,
    ) -> Self {
        let service = Arc::new(AppService::new(
            Arc::clone(&store),
            Arc::clone(&chain),
            Arc::clone(&signals),
        ));
        Self {
            service,
            store,
            chain,
            signals,
        }
    }

    /// Expose the job registry to the admin endpoints (builder pattern)
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
        self.service = Arc::new(
            AppService::new(
                Arc::clone(&self.store),
                Arc::clone(&self.chain),
                Arc::clone(&self.signals),
            )
            .with_scheduler(scheduler),
        );
        self
    }
}
