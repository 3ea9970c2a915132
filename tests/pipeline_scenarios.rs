//! Whole-pipeline scenarios over the in-memory store and mock chain.

use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes};
use alloy::sol_types::{SolCall, SolValue};
use chrono::Utc;
use secrecy::SecretString;

use interaction_relayer::app::jobs::{NO_SESSION_REASON, PUSH_FAILED_REASON};
use interaction_relayer::app::{
    AppService, BatchExecutor, ExecuteConfig, ExecuteJob, ExecutorConfig, InteractionSigner,
    InteractionSimulator, Job, RetrySweepConfig, RetrySweepJob, SignalBus, SimulateConfig,
    SimulateJob,
};
use interaction_relayer::domain::{
    AppError, ArchiveReason, BlockchainError, InteractionOutcome, InteractionStatus,
    InteractionStore, NewInteraction, PendingInteraction, PreparedInteraction,
    PushInteractionsRequest,
};
use interaction_relayer::infra::DerivedSignerResolver;
use interaction_relayer::infra::blockchain::contracts::{delegateToFacetCall, hasAllRolesCall};
use interaction_relayer::test_utils::{
    MockChain, MockInteractionStore, MockSessionOracle, StaticContractResolver, TEST_MASTER_KEY,
};

const CONTRACT: Address = Address::repeat_byte(0xcc);
const DELEGATOR: Address = Address::repeat_byte(0xde);

struct Pipeline {
    store: Arc<MockInteractionStore>,
    chain: Arc<MockChain>,
    sessions: Arc<MockSessionOracle>,
    service: AppService,
    simulate: SimulateJob,
    execute: ExecuteJob,
    retry: RetrySweepJob,
}

impl Pipeline {
    fn new(sessions: MockSessionOracle) -> Self {
        let store = Arc::new(MockInteractionStore::new());
        let chain = Arc::new(MockChain::new());
        chain.set_call_response_for(hasAllRolesCall::SELECTOR, Ok(true.abi_encode().into()));
        let sessions = Arc::new(sessions);
        let signals = Arc::new(SignalBus::new());
        let resolver = Arc::new(StaticContractResolver::resolve_all(CONTRACT));
        let signers =
            Arc::new(DerivedSignerResolver::new(&SecretString::from(TEST_MASTER_KEY)).unwrap());

        let simulate = SimulateJob::new(
            store.clone(),
            sessions.clone(),
            Arc::new(InteractionSimulator::new(chain.clone(), resolver.clone())),
            signals.clone(),
            SimulateConfig {
                min_batch: 1,
                ..SimulateConfig::default()
            },
        );
        let execute = ExecuteJob::new(
            store.clone(),
            Arc::new(InteractionSigner::new(
                chain.clone(),
                resolver,
                signers.clone(),
            )),
            Arc::new(BatchExecutor::new(
                chain.clone(),
                signers,
                ExecutorConfig {
                    delegator: DELEGATOR,
                    ..ExecutorConfig::default()
                },
            )),
            ExecuteConfig::default(),
        );
        let retry = RetrySweepJob::new(store.clone(), signals.clone(), RetrySweepConfig::default());
        let service = AppService::new(store.clone(), chain.clone(), signals);

        Self {
            store,
            chain,
            sessions,
            service,
            simulate,
            execute,
            retry,
        }
    }

    async fn push(&self, interactions: Vec<NewInteraction>) -> u64 {
        self.service
            .push_interactions(&PushInteractionsRequest { interactions })
            .await
            .unwrap()
            .inserted
    }

    /// Make every failure row due for the next sweep
    fn make_due(&self) {
        for row in self.store.pending_rows() {
            self.store.set_retry(
                row.id,
                row.retry_count,
                Some(Utc::now() - chrono::Duration::seconds(1)),
            );
        }
    }
}

fn interaction(wallet: u8, payload: u8) -> NewInteraction {
    NewInteraction::new(
        Address::repeat_byte(wallet),
        B256::repeat_byte(0x01),
        2,
        Bytes::from(vec![payload; 16]),
    )
}

#[tokio::test]
async fn test_end_to_end_single_transaction() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    let inserted = p
        .push(vec![interaction(1, 1), interaction(2, 2), interaction(3, 3)])
        .await;
    assert_eq!(inserted, 3);

    p.simulate.run().await.unwrap();
    assert!(
        p.store
            .pending_rows()
            .iter()
            .all(|row| row.status == InteractionStatus::Succeeded && !row.is_locked())
    );
    assert_eq!(p.chain.calls_with_selector(delegateToFacetCall::SELECTOR).len(), 3);

    p.execute.run().await.unwrap();

    assert!(p.store.pending_rows().is_empty());
    let pushed = p.store.pushed_rows();
    assert_eq!(pushed.len(), 3);
    assert!(pushed.iter().all(|row| row.tx_hash == pushed[0].tx_hash));
    assert_eq!(p.chain.sent_transactions().len(), 1);

    let history = p
        .service
        .wallet_history(Address::repeat_byte(2))
        .await
        .unwrap();
    assert!(history.pending.is_empty());
    assert_eq!(history.pushed.len(), 1);
}

#[tokio::test]
async fn test_no_session_recovers_once_session_opens() {
    let p = Pipeline::new(MockSessionOracle::none_valid());
    p.push(vec![interaction(1, 1)]).await;

    p.simulate.run().await.unwrap();

    let row = &p.store.pending_rows()[0];
    assert_eq!(row.status, InteractionStatus::NoSession);
    assert_eq!(row.failure_reason.as_deref(), Some(NO_SESSION_REASON));
    assert_eq!(row.retry_count, 1);
    assert!(row.next_retry_at.unwrap() > Utc::now());
    // No simulation without a session
    assert!(p.chain.calls_with_selector(delegateToFacetCall::SELECTOR).is_empty());

    p.make_due();
    p.retry.run().await.unwrap();
    assert_eq!(p.store.pending_rows()[0].status, InteractionStatus::Pending);

    p.sessions.set_valid(Address::repeat_byte(1), true);
    p.simulate.run().await.unwrap();
    p.execute.run().await.unwrap();

    assert_eq!(p.store.pushed_rows().len(), 1);
}

#[tokio::test]
async fn test_reverted_simulation_is_retried_then_archived() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.chain.set_call_response_for(
        delegateToFacetCall::SELECTOR,
        Err(AppError::Blockchain(BlockchainError::Reverted(
            "Facet rejected".to_string(),
        ))),
    );
    p.push(vec![interaction(1, 1)]).await;

    p.simulate.run().await.unwrap();
    let row = p.store.pending_rows()[0].clone();
    assert_eq!(row.status, InteractionStatus::Failed);
    assert_eq!(row.failure_reason.as_deref(), Some("Facet rejected"));

    // Spend the simulation budget
    p.store.set_retry(
        row.id,
        31,
        Some(Utc::now() - chrono::Duration::seconds(1)),
    );
    p.retry.run().await.unwrap();

    assert!(p.store.pending_rows().is_empty());
    let archived = p.store.archived_rows();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].original_id, row.id);
    assert_eq!(archived[0].final_status, InteractionStatus::Failed);
    assert_eq!(archived[0].archive_reason, ArchiveReason::MaxRetries);
    assert_eq!(archived[0].total_retries, 31);
    assert_eq!(archived[0].failure_reason.as_deref(), Some("Facet rejected"));
}

#[tokio::test]
async fn test_failed_push_is_requeued_for_execution() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1), interaction(2, 2)]).await;
    p.simulate.run().await.unwrap();

    p.chain.set_fail_sends(true);
    p.execute.run().await.unwrap();
    let rows = p.store.pending_rows();
    assert!(rows.iter().all(|row| {
        row.status == InteractionStatus::ExecutionFailed
            && row.failure_reason.as_deref() == Some(PUSH_FAILED_REASON)
    }));

    p.make_due();
    p.retry.run().await.unwrap();
    assert!(
        p.store
            .pending_rows()
            .iter()
            .all(|row| row.status == InteractionStatus::Succeeded)
    );

    p.chain.set_fail_sends(false);
    p.execute.run().await.unwrap();
    assert_eq!(p.store.pushed_rows().len(), 2);
    // Simulation is not repeated on the way back
    assert_eq!(p.chain.calls_with_selector(delegateToFacetCall::SELECTOR).len(), 2);
}

#[tokio::test]
async fn test_concurrent_workers_never_share_rows() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    let batch: Vec<NewInteraction> = (1..=40).map(|i| interaction(i, i)).collect();
    p.push(batch).await;

    let store: Arc<dyn InteractionStore> = p.store.clone();
    let (a, b) = tokio::join!(
        store.get_and_lock(InteractionStatus::Pending, 25, None),
        store.get_and_lock(InteractionStatus::Pending, 25, None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.len() + b.len(), 40);
    assert!(a.iter().all(|row| b.iter().all(|other| other.id != row.id)));

    // Fully leased, a third worker gets nothing
    assert!(
        store
            .get_and_lock(InteractionStatus::Pending, 25, None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_stale_lock_is_recovered() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1)]).await;
    let id = p.store.pending_rows()[0].id;
    p.store
        .set_locked_at(id, Some(Utc::now() - chrono::Duration::minutes(6)));

    p.simulate.run().await.unwrap();

    let row = p.store.row(id).unwrap();
    assert_eq!(row.status, InteractionStatus::Succeeded);
    assert!(!row.is_locked());
}

#[tokio::test]
async fn test_fresh_lock_blocks_other_workers() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1)]).await;
    let id = p.store.pending_rows()[0].id;
    p.store
        .set_locked_at(id, Some(Utc::now() - chrono::Duration::minutes(1)));

    p.simulate.run().await.unwrap();

    assert_eq!(p.store.row(id).unwrap().status, InteractionStatus::Pending);
    assert_eq!(p.chain.call_count(), 0);
}

fn prepared(rows: &[PendingInteraction]) -> Vec<PreparedInteraction> {
    rows.iter()
        .map(|row| PreparedInteraction {
            interaction: row.clone(),
            signature: Bytes::from(vec![0x11; 65]),
            packed_interaction: row.interaction_data.clone(),
        })
        .collect()
}

#[tokio::test]
async fn test_archive_of_leased_row_is_refused() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1)]).await;
    p.simulate.run().await.unwrap();
    let id = p.store.pending_rows()[0].id;

    // Operator reads the row before the execute stage leases it
    let snapshot = p.store.get_pending(id).await.unwrap().unwrap();
    let leased = p
        .store
        .get_and_lock(InteractionStatus::Succeeded, 10, None)
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);

    let archived = p
        .store
        .archive(&[snapshot], ArchiveReason::Manual)
        .await
        .unwrap();
    assert_eq!(archived, 0);

    let pushed = p
        .store
        .mark_pushed(&prepared(&leased), B256::repeat_byte(0x77))
        .await
        .unwrap();
    assert_eq!(pushed, 1);
    assert_eq!(p.store.pushed_rows().len(), 1);
    assert!(p.store.archived_rows().is_empty());
}

#[tokio::test]
async fn test_mark_pushed_skips_rows_already_archived() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1), interaction(2, 2)]).await;
    p.simulate.run().await.unwrap();
    let leased = p
        .store
        .get_and_lock(InteractionStatus::Succeeded, 10, None)
        .await
        .unwrap();

    // A lease outlived by the stale-lock timeout lets the row be archived
    let gone = leased[0].id;
    p.store.set_locked_at(gone, None);
    let snapshot = p.store.row(gone).unwrap();
    assert_eq!(
        p.store.archive(&[snapshot], ArchiveReason::Manual).await.unwrap(),
        1
    );

    let recorded = p
        .store
        .mark_pushed(&prepared(&leased), B256::repeat_byte(0x77))
        .await
        .unwrap();

    assert_eq!(recorded, 1);
    let pushed = p.store.pushed_rows();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].wallet, leased[1].wallet);
    assert_eq!(p.store.archived_rows().len(), 1);
}

#[tokio::test]
async fn test_archive_twice_writes_one_record() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1)]).await;
    let snapshot = p.store.pending_rows()[0].clone();

    let (a, b) = tokio::join!(
        p.store.archive(std::slice::from_ref(&snapshot), ArchiveReason::Expired),
        p.store.archive(std::slice::from_ref(&snapshot), ArchiveReason::Expired),
    );

    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(p.store.archived_rows().len(), 1);
}

#[tokio::test]
async fn test_stale_simulation_requeue_is_ignored() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.chain.set_call_response_for(
        delegateToFacetCall::SELECTOR,
        Err(AppError::Blockchain(BlockchainError::Reverted(
            "Facet rejected".to_string(),
        ))),
    );
    p.push(vec![interaction(1, 1)]).await;
    p.simulate.run().await.unwrap();
    p.make_due();

    // First sweep reads its candidates
    let candidates = p.store.get_retry_candidates(10).await.unwrap();
    let ids: Vec<i64> = candidates.iter().map(|row| row.id).collect();

    // A second sweep re-queues and the simulation now succeeds
    p.retry.run().await.unwrap();
    p.chain
        .set_call_response_for(delegateToFacetCall::SELECTOR, Ok(Bytes::new()));
    p.simulate.run().await.unwrap();
    assert_eq!(p.store.row(ids[0]).unwrap().status, InteractionStatus::Succeeded);

    let moved = p.store.reset_for_simulation(&ids).await.unwrap();

    assert_eq!(moved, 0);
    assert_eq!(p.store.row(ids[0]).unwrap().status, InteractionStatus::Succeeded);
}

#[tokio::test]
async fn test_stale_execution_requeue_respects_new_retry_time() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1)]).await;
    p.simulate.run().await.unwrap();
    p.chain.set_fail_sends(true);
    p.execute.run().await.unwrap();
    p.make_due();

    let ids: Vec<i64> = p
        .store
        .get_retry_candidates(10)
        .await
        .unwrap()
        .iter()
        .map(|row| row.id)
        .collect();

    // Another sweep re-queues, the push fails again and backs off
    p.retry.run().await.unwrap();
    p.execute.run().await.unwrap();
    let row = p.store.row(ids[0]).unwrap();
    assert_eq!(row.status, InteractionStatus::ExecutionFailed);
    assert!(row.next_retry_at.unwrap() > Utc::now());

    let moved = p.store.reset_for_execution(&ids).await.unwrap();

    assert_eq!(moved, 0);
    assert_eq!(
        p.store.row(ids[0]).unwrap().status,
        InteractionStatus::ExecutionFailed
    );
}

#[tokio::test]
async fn test_requeue_skips_leased_rows() {
    let p = Pipeline::new(MockSessionOracle::all_valid());
    p.push(vec![interaction(1, 1)]).await;
    let row = p.store.pending_rows()[0].clone();
    let failed = InteractionOutcome::transition(&row, InteractionStatus::Failed)
        .unwrap()
        .with_failure("reverted", 1, Utc::now() - chrono::Duration::seconds(1));
    p.store.apply_outcomes(&[failed]).await.unwrap();
    p.store.set_locked_at(row.id, Some(Utc::now()));

    assert_eq!(p.store.reset_for_simulation(&[row.id]).await.unwrap(), 0);
    assert_eq!(p.store.row(row.id).unwrap().status, InteractionStatus::Failed);
}
