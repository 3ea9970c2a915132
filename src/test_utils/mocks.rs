//! Mock implementations for testing.

use alloy::primitives::{Address, B256, Bytes, keccak256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{
    AppError, ArchiveReason, ArchivedInteraction, BlockchainError, ContractResolver,
    DatabaseError, FeeEstimate, InteractionChain, InteractionOutcome, InteractionStatus,
    InteractionStore, NewInteraction, PendingInteraction, PreparedInteraction, PushedInteraction,
    QueueStats, ReceiptStatus, SkipPredicate, WalletSessionOracle, skip_if_empty,
};
use crate::infra::blockchain::contracts::executeCall;

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetAndLock,
    Unlock,
    ResetForSimulation,
    ResetForExecution,
    InsertPending,
    ApplyOutcomes,
    MarkPushed,
    GetRetryCandidates,
    Archive,
}

#[derive(Default)]
struct StoreState {
    next_id: i64,
    next_pushed_id: i64,
    next_archived_id: i64,
    pending: BTreeMap<i64, PendingInteraction>,
    pushed: Vec<PushedInteraction>,
    archived: Vec<ArchivedInteraction>,
}

/// In-memory pending store with the same lease semantics as Postgres.
///
/// The whole `get_and_lock` runs under one mutex, so two concurrent callers
/// never lease the same row.
pub struct MockInteractionStore {
    state: Mutex<StoreState>,
    failing: Mutex<HashSet<StoreOp>>,
    is_healthy: AtomicBool,
    lock_timeout: chrono::Duration,
}

impl MockInteractionStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            failing: Mutex::new(HashSet::new()),
            is_healthy: AtomicBool::new(true),
            lock_timeout: chrono::Duration::minutes(5),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Make every later call of `op` fail with a query error
    pub fn fail_on(&self, op: StoreOp) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, op: StoreOp) -> Result<(), AppError> {
        if self.failing.lock().unwrap().contains(&op) {
            return Err(AppError::Database(DatabaseError::Query(format!(
                "Mock failure in {:?}",
                op
            ))));
        }
        Ok(())
    }

    /// Insert a row directly with the given status, returns its id
    pub fn seed(&self, interaction: NewInteraction, status: InteractionStatus) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.pending.insert(id, Self::new_row(id, interaction, status));
        id
    }

    /// Overwrite retry metadata on a seeded row
    pub fn set_retry(&self, id: i64, retry_count: i32, next_retry_at: Option<DateTime<Utc>>) {
        if let Some(row) = self.state.lock().unwrap().pending.get_mut(&id) {
            row.retry_count = retry_count;
            row.next_retry_at = next_retry_at;
        }
    }

    pub fn set_locked_at(&self, id: i64, locked_at: Option<DateTime<Utc>>) {
        if let Some(row) = self.state.lock().unwrap().pending.get_mut(&id) {
            row.locked_at = locked_at;
        }
    }

    pub fn set_created_at(&self, id: i64, created_at: DateTime<Utc>) {
        if let Some(row) = self.state.lock().unwrap().pending.get_mut(&id) {
            row.created_at = created_at;
        }
    }

    pub fn row(&self, id: i64) -> Option<PendingInteraction> {
        self.state.lock().unwrap().pending.get(&id).cloned()
    }

    pub fn pending_rows(&self) -> Vec<PendingInteraction> {
        self.state.lock().unwrap().pending.values().cloned().collect()
    }

    pub fn pushed_rows(&self) -> Vec<PushedInteraction> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn archived_rows(&self) -> Vec<ArchivedInteraction> {
        self.state.lock().unwrap().archived.clone()
    }

    fn new_row(id: i64, interaction: NewInteraction, status: InteractionStatus) -> PendingInteraction {
        PendingInteraction {
            id,
            wallet: interaction.wallet,
            product_id: interaction.product_id,
            type_denominator: interaction.type_denominator,
            interaction_data: interaction.interaction_data,
            signature: interaction.signature,
            status,
            failure_reason: None,
            retry_count: 0,
            last_retry_at: None,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: None,
            locked_at: None,
        }
    }

    /// Same guards as the Postgres requeue: due, unlocked and still in `from`
    fn requeue(&self, ids: &[i64], from: &[InteractionStatus], to: InteractionStatus) -> u64 {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let mut moved = 0;
        for id in ids {
            let Some(row) = state.pending.get_mut(id) else {
                continue;
            };
            if from.contains(&row.status)
                && row.locked_at.is_none()
                && row.next_retry_at.is_none_or(|at| at <= now)
            {
                row.status = to;
                row.updated_at = Some(now);
                moved += 1;
            }
        }
        moved
    }
}

impl Default for MockInteractionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InteractionStore for MockInteractionStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn get_and_lock(
        &self,
        status: InteractionStatus,
        limit: i64,
        skip_process: Option<&SkipPredicate>,
    ) -> Result<Vec<PendingInteraction>, AppError> {
        self.check(StoreOp::GetAndLock)?;
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();

        for row in state.pending.values_mut() {
            if row.locked_at.is_some_and(|at| at < now - self.lock_timeout) {
                row.locked_at = None;
            }
        }

        let mut candidates: Vec<PendingInteraction> = state
            .pending
            .values()
            .filter(|row| row.status == status && row.locked_at.is_none())
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        candidates.truncate(limit.max(0) as usize);

        let skip = match skip_process {
            Some(predicate) => predicate(&candidates),
            None => skip_if_empty(&candidates),
        };
        if skip {
            return Ok(Vec::new());
        }

        for candidate in &mut candidates {
            candidate.locked_at = Some(now);
            if let Some(row) = state.pending.get_mut(&candidate.id) {
                row.locked_at = Some(now);
            }
        }
        Ok(candidates)
    }

    async fn unlock(&self, rows: &[PendingInteraction]) -> Result<(), AppError> {
        self.check(StoreOp::Unlock)?;
        let mut state = self.state.lock().unwrap();
        for r in rows {
            if let Some(row) = state.pending.get_mut(&r.id) {
                row.locked_at = None;
            }
        }
        Ok(())
    }

    async fn reset_for_simulation(&self, ids: &[i64]) -> Result<u64, AppError> {
        self.check(StoreOp::ResetForSimulation)?;
        Ok(self.requeue(
            ids,
            &[InteractionStatus::Failed, InteractionStatus::NoSession],
            InteractionStatus::Pending,
        ))
    }

    async fn reset_for_execution(&self, ids: &[i64]) -> Result<u64, AppError> {
        self.check(StoreOp::ResetForExecution)?;
        Ok(self.requeue(
            ids,
            &[InteractionStatus::ExecutionFailed],
            InteractionStatus::Succeeded,
        ))
    }

    async fn insert_pending(&self, interactions: &[NewInteraction]) -> Result<u64, AppError> {
        self.check(StoreOp::InsertPending)?;
        let mut state = self.state.lock().unwrap();
        let mut inserted = 0;
        for interaction in interactions {
            let duplicate = state.pending.values().any(|row| {
                row.wallet == interaction.wallet
                    && row.product_id == interaction.product_id
                    && row.type_denominator == interaction.type_denominator
                    && row.interaction_data == interaction.interaction_data
            });
            if duplicate {
                continue;
            }
            state.next_id += 1;
            let id = state.next_id;
            state.pending.insert(
                id,
                Self::new_row(id, interaction.clone(), InteractionStatus::Pending),
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn apply_outcomes(&self, outcomes: &[InteractionOutcome]) -> Result<(), AppError> {
        self.check(StoreOp::ApplyOutcomes)?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        for outcome in outcomes {
            if let Some(row) = state.pending.get_mut(&outcome.id) {
                row.status = outcome.status;
                row.failure_reason = outcome.failure_reason.clone();
                row.retry_count = outcome.retry_count;
                row.last_retry_at = outcome.last_retry_at;
                row.next_retry_at = outcome.next_retry_at;
                row.updated_at = Some(now);
            }
        }
        Ok(())
    }

    async fn mark_pushed(
        &self,
        prepared: &[PreparedInteraction],
        tx_hash: B256,
    ) -> Result<u64, AppError> {
        self.check(StoreOp::MarkPushed)?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut moved = 0;
        for p in prepared {
            if state.pending.remove(&p.interaction.id).is_none() {
                continue;
            }
            moved += 1;
            state.next_pushed_id += 1;
            let id = state.next_pushed_id;
            let row = &p.interaction;
            state.pushed.push(PushedInteraction {
                id,
                wallet: row.wallet,
                product_id: row.product_id,
                type_denominator: row.type_denominator,
                interaction_data: row.interaction_data.clone(),
                signature: p.signature.clone(),
                tx_hash,
                created_at: row.created_at,
                pushed_at: now,
            });
        }
        Ok(moved)
    }

    async fn get_retry_candidates(&self, limit: i64) -> Result<Vec<PendingInteraction>, AppError> {
        self.check(StoreOp::GetRetryCandidates)?;
        let now = Utc::now();
        let state = self.state.lock().unwrap();
        let mut rows: Vec<PendingInteraction> = state
            .pending
            .values()
            .filter(|row| {
                row.status.failure_category().is_some()
                    && row.locked_at.is_none()
                    && row.next_retry_at.is_none_or(|at| at <= now)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.next_retry_at.cmp(&b.next_retry_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn archive(
        &self,
        rows: &[PendingInteraction],
        reason: ArchiveReason,
    ) -> Result<u64, AppError> {
        self.check(StoreOp::Archive)?;
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut archived = 0;
        for r in rows {
            let movable = state
                .pending
                .get(&r.id)
                .is_some_and(|row| row.locked_at.is_none() && row.status == r.status);
            let Some(row) = movable.then(|| state.pending.remove(&r.id)).flatten() else {
                continue;
            };
            archived += 1;
            state.next_archived_id += 1;
            let id = state.next_archived_id;
            state.archived.push(ArchivedInteraction {
                id,
                original_id: row.id,
                wallet: row.wallet,
                product_id: row.product_id,
                type_denominator: row.type_denominator,
                interaction_data: row.interaction_data,
                signature: row.signature,
                final_status: row.status,
                failure_reason: row.failure_reason,
                total_retries: row.retry_count,
                archive_reason: reason,
                archived_at: now,
                original_created_at: row.created_at,
            });
        }
        Ok(archived)
    }

    async fn get_pending(&self, id: i64) -> Result<Option<PendingInteraction>, AppError> {
        Ok(self.row(id))
    }

    async fn get_pending_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<PendingInteraction>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pending
            .values()
            .filter(|row| row.wallet == wallet)
            .cloned()
            .collect())
    }

    async fn get_pushed_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<PushedInteraction>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pushed
            .iter()
            .filter(|row| row.wallet == wallet)
            .cloned()
            .collect())
    }

    async fn get_archived_by_wallet(
        &self,
        wallet: Address,
    ) -> Result<Vec<ArchivedInteraction>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .archived
            .iter()
            .filter(|row| row.wallet == wallet)
            .cloned()
            .collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats, AppError> {
        let state = self.state.lock().unwrap();
        let mut stats = QueueStats::default();
        for row in state.pending.values() {
            stats.add_status(row.status, 1);
            if row.is_locked() {
                stats.locked += 1;
            }
        }
        stats.pushed = state.pushed.len() as i64;
        stats.archived = state.archived.len() as i64;
        Ok(stats)
    }
}

type GasEstimator = Arc<dyn Fn(&Bytes) -> Result<u64, BlockchainError> + Send + Sync>;

/// A recorded `eth_call`
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

/// Scriptable chain with per-selector call responses
pub struct MockChain {
    chain_id: u64,
    default_response: Mutex<Result<Bytes, BlockchainError>>,
    responses: Mutex<HashMap<[u8; 4], Result<Bytes, BlockchainError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    gas: Mutex<GasEstimator>,
    nonce: AtomicU64,
    sent: Mutex<Vec<Bytes>>,
    send_attempts: AtomicUsize,
    fail_sends: AtomicBool,
    receipt: Mutex<Option<ReceiptStatus>>,
    is_healthy: AtomicBool,
}

impl MockChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chain_id: 31_337,
            default_response: Mutex::new(Ok(Bytes::new())),
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gas: Mutex::new(Arc::new(|data: &Bytes| Ok(21_000 + 16 * data.len() as u64))),
            nonce: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            receipt: Mutex::new(Some(ReceiptStatus::Success)),
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Response for calls whose selector has no specific response
    pub fn set_call_response(&self, response: Result<Bytes, AppError>) {
        *self.default_response.lock().unwrap() = Self::to_blockchain_result(response);
    }

    pub fn set_call_response_for(&self, selector: [u8; 4], response: Result<Bytes, AppError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(selector, Self::to_blockchain_result(response));
    }

    pub fn set_gas_estimator(
        &self,
        estimator: impl Fn(&Bytes) -> Result<u64, BlockchainError> + Send + Sync + 'static,
    ) {
        *self.gas.lock().unwrap() = Arc::new(estimator);
    }

    /// Fixed estimates for raw `execute` calldata and for anything else
    pub fn set_gas_for_encodings(&self, raw: u64, compressed: u64) {
        self.set_gas_estimator(move |data| {
            if data.starts_with(&executeCall::SELECTOR) {
                Ok(raw)
            } else {
                Ok(compressed)
            }
        });
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// `None` makes the receipt wait time out
    pub fn set_receipt(&self, receipt: Option<ReceiptStatus>) {
        *self.receipt.lock().unwrap() = receipt;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that carried the given selector
    pub fn calls_with_selector(&self, selector: [u8; 4]) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.data.starts_with(&selector))
            .cloned()
            .collect()
    }

    pub fn sent_transactions(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::Relaxed)
    }

    fn to_blockchain_result(response: Result<Bytes, AppError>) -> Result<Bytes, BlockchainError> {
        response.map_err(|e| match e {
            AppError::Blockchain(inner) => inner,
            other => BlockchainError::RpcError(other.to_string()),
        })
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InteractionChain for MockChain {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn chain_id(&self) -> Result<u64, AppError> {
        Ok(self.chain_id)
    }

    async fn call(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, AppError> {
        self.calls.lock().unwrap().push(RecordedCall {
            from,
            to,
            data: data.clone(),
        });
        let selector: Option<[u8; 4]> = data.get(..4).and_then(|s| s.try_into().ok());
        let responses = self.responses.lock().unwrap();
        let response = match selector.and_then(|s| responses.get(&s)) {
            Some(response) => response.clone(),
            None => self.default_response.lock().unwrap().clone(),
        };
        response.map_err(AppError::Blockchain)
    }

    async fn estimate_gas(&self, _from: Address, _to: Address, data: Bytes) -> Result<u64, AppError> {
        let estimator = self.gas.lock().unwrap().clone();
        estimator(&data).map_err(AppError::Blockchain)
    }

    async fn transaction_count(&self, _address: Address) -> Result<u64, AppError> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn fees(&self) -> Result<FeeEstimate, AppError> {
        Ok(FeeEstimate {
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        })
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, AppError> {
        self.send_attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::TransactionFailed(
                "Mock send failure".to_string(),
            )));
        }
        let hash = keccak256(&raw);
        self.sent.lock().unwrap().push(raw);
        self.nonce.fetch_add(1, Ordering::SeqCst);
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        _tx_hash: B256,
        _timeout: Duration,
    ) -> Result<Option<ReceiptStatus>, AppError> {
        Ok(*self.receipt.lock().unwrap())
    }
}

/// Session oracle answering from a fixed wallet set
pub struct MockSessionOracle {
    default_valid: bool,
    overrides: Mutex<HashMap<Address, bool>>,
    checks: Mutex<Vec<Address>>,
}

impl MockSessionOracle {
    #[must_use]
    pub fn all_valid() -> Self {
        Self::with_default(true)
    }

    #[must_use]
    pub fn none_valid() -> Self {
        Self::with_default(false)
    }

    fn with_default(default_valid: bool) -> Self {
        Self {
            default_valid,
            overrides: Mutex::new(HashMap::new()),
            checks: Mutex::new(Vec::new()),
        }
    }

    pub fn set_valid(&self, wallet: Address, valid: bool) {
        self.overrides.lock().unwrap().insert(wallet, valid);
    }

    /// Wallets queried so far, in call order
    pub fn checked_wallets(&self) -> Vec<Address> {
        self.checks.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletSessionOracle for MockSessionOracle {
    async fn is_session_valid(&self, wallet: Address) -> bool {
        self.checks.lock().unwrap().push(wallet);
        self.overrides
            .lock()
            .unwrap()
            .get(&wallet)
            .copied()
            .unwrap_or(self.default_valid)
    }
}

/// Resolver backed by a fixed product map
#[derive(Default)]
pub struct StaticContractResolver {
    contracts: HashMap<B256, Address>,
    fallback: Option<Address>,
}

impl StaticContractResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every product to `contract`
    #[must_use]
    pub fn resolve_all(contract: Address) -> Self {
        Self {
            contracts: HashMap::new(),
            fallback: Some(contract),
        }
    }

    #[must_use]
    pub fn with_product(mut self, product_id: B256, contract: Address) -> Self {
        self.contracts.insert(product_id, contract);
        self
    }
}

#[async_trait]
impl ContractResolver for StaticContractResolver {
    async fn interaction_contract(&self, product_id: B256) -> Result<Option<Address>, AppError> {
        Ok(self.contracts.get(&product_id).copied().or(self.fallback))
    }
}
