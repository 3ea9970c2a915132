//! Domain traits defining contracts for external systems.

use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use super::error::AppError;
use super::types::{
    ArchiveReason, ArchivedInteraction, FeeEstimate, InteractionOutcome, InteractionStatus,
    NewInteraction, PendingInteraction, PreparedInteraction, PushedInteraction, QueueStats,
    ReceiptStatus,
};

/// Caller predicate over a candidate set; `true` abandons the batch without locking
pub type SkipPredicate = dyn Fn(&[PendingInteraction]) -> bool + Send + Sync;

/// Default abandon rule: nothing to do
pub fn skip_if_empty(candidates: &[PendingInteraction]) -> bool {
    candidates.is_empty()
}

/// Durable queue of in-flight interactions with row-level leases
#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Select and lease up to `limit` unlocked rows with the given status.
    ///
    /// Stale leases are released first. When `skip_process` returns `true`
    /// for the candidate set nothing is locked and an empty list is returned.
    async fn get_and_lock(
        &self,
        status: InteractionStatus,
        limit: i64,
        skip_process: Option<&SkipPredicate>,
    ) -> Result<Vec<PendingInteraction>, AppError>;

    /// Release the leases held on `rows`
    async fn unlock(&self, rows: &[PendingInteraction]) -> Result<(), AppError>;

    /// Send due `failed`/`no_session` rows back to simulation without touching
    /// retry counters.
    ///
    /// Rows that are leased, not yet due, or no longer in one of those statuses
    /// are left alone. Returns the number of rows moved.
    async fn reset_for_simulation(&self, ids: &[i64]) -> Result<u64, AppError>;

    /// Send due `execution_failed` rows back to execution, same guards as
    /// `reset_for_simulation`
    async fn reset_for_execution(&self, ids: &[i64]) -> Result<u64, AppError>;

    /// Insert-or-ignore new interactions, returns the number actually inserted
    async fn insert_pending(&self, interactions: &[NewInteraction]) -> Result<u64, AppError>;

    /// Apply per-row status writes in one transaction
    async fn apply_outcomes(&self, outcomes: &[InteractionOutcome]) -> Result<(), AppError>;

    /// Move the batch into the pushed table.
    ///
    /// Only rows still present in the pending table get a pushed record.
    /// Returns how many were moved.
    async fn mark_pushed(
        &self,
        prepared: &[PreparedInteraction],
        tx_hash: B256,
    ) -> Result<u64, AppError>;

    /// Unlocked failure rows whose retry time has come
    async fn get_retry_candidates(&self, limit: i64) -> Result<Vec<PendingInteraction>, AppError>;

    /// Move rows into the archive table.
    ///
    /// A row is only moved while it is unlocked and still has the status of
    /// the given snapshot. Returns the number of rows archived.
    async fn archive(
        &self,
        rows: &[PendingInteraction],
        reason: ArchiveReason,
    ) -> Result<u64, AppError>;

    async fn get_pending(&self, id: i64) -> Result<Option<PendingInteraction>, AppError>;

    async fn get_pending_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<PendingInteraction>, AppError>;

    async fn get_pushed_by_wallet(&self, wallet: Address)
    -> Result<Vec<PushedInteraction>, AppError>;

    async fn get_archived_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<ArchivedInteraction>, AppError>;

    /// Count rows per status plus leased and terminal totals
    async fn queue_stats(&self) -> Result<QueueStats, AppError>;
}

/// EVM chain access used by the pipeline stages
#[async_trait]
pub trait InteractionChain: Send + Sync {
    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    async fn chain_id(&self) -> Result<u64, AppError>;

    /// Read-only `eth_call`, a revert surfaces as `BlockchainError::Reverted`
    async fn call(&self, from: Option<Address>, to: Address, data: Bytes)
    -> Result<Bytes, AppError>;

    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes) -> Result<u64, AppError>;

    /// Pending nonce of `address`
    async fn transaction_count(&self, address: Address) -> Result<u64, AppError>;

    async fn fees(&self) -> Result<FeeEstimate, AppError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, AppError>;

    /// Poll for the receipt, `None` when `timeout` elapses first
    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<ReceiptStatus>, AppError>;
}

/// Wallet session validity oracle
#[async_trait]
pub trait WalletSessionOracle: Send + Sync {
    /// Lookup failures count as an invalid session
    async fn is_session_valid(&self, wallet: Address) -> bool;
}

/// Maps a product to its interaction contract
#[async_trait]
pub trait ContractResolver: Send + Sync {
    async fn interaction_contract(&self, product_id: B256) -> Result<Option<Address>, AppError>;
}

/// Provides signing accounts scoped by product or by named key
#[async_trait]
pub trait SignerResolver: Send + Sync {
    async fn product_signer(&self, product_id: B256) -> Result<PrivateKeySigner, AppError>;

    async fn key_signer(&self, key: &str) -> Result<PrivateKeySigner, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate() -> PendingInteraction {
        PendingInteraction {
            id: 1,
            wallet: Address::repeat_byte(1),
            product_id: B256::ZERO,
            type_denominator: 0,
            interaction_data: Bytes::from_static(&[1]),
            signature: None,
            status: InteractionStatus::Pending,
            failure_reason: None,
            retry_count: 0,
            last_retry_at: None,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: None,
            locked_at: None,
        }
    }

    #[test]
    fn test_default_skip_only_abandons_empty_sets() {
        assert!(skip_if_empty(&[]));
        assert!(!skip_if_empty(&[candidate()]));
    }

    #[test]
    fn test_skip_predicate_is_object_safe() {
        let predicate: Box<SkipPredicate> = Box::new(|rows| rows.len() < 2);
        assert!(predicate(&[candidate()]));
        assert!(!predicate(&[candidate(), candidate()]));
    }
}
