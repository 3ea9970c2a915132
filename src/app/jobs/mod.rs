//! The pipeline stages run by the scheduler.

pub mod execute;
pub mod retry;
pub mod simulate;

pub use execute::{ExecuteConfig, ExecuteJob, PUSH_FAILED_REASON, SIGNER_NOT_AUTHORIZED};
pub use retry::{RetrySweepConfig, RetrySweepJob, SweepPlan};
pub use simulate::{NO_SESSION_REASON, SimulateConfig, SimulateJob};

use std::panic::resume_unwind;

use tracing::error;

use crate::domain::{InteractionStore, PendingInteraction};

/// Release leases after a batch, logging instead of failing
pub(crate) async fn release(store: &dyn InteractionStore, rows: &[PendingInteraction]) {
    if let Err(e) = store.unlock(rows).await {
        error!(error = %e, count = rows.len(), "Failed to release interaction locks");
    }
}

/// Resume a panic caught around a batch once its leases are released
pub(crate) fn finish<T>(result: std::thread::Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(panic) => resume_unwind(panic),
    }
}
