//! Dry-run validation of interactions against the product contract.

use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes};
use tracing::{debug, instrument};

use crate::domain::{AppError, BlockchainError, ContractResolver, InteractionChain};
use crate::infra::blockchain::contracts::encode_delegate_to_facet;

pub const NO_CONTRACT_REASON: &str = "No diamond contract found for product";

/// Outcome of a single simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationResult {
    Success,
    Failure { reason: String },
}

impl SimulationResult {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

pub struct InteractionSimulator {
    chain: Arc<dyn InteractionChain>,
    resolver: Arc<dyn ContractResolver>,
}

impl InteractionSimulator {
    pub fn new(chain: Arc<dyn InteractionChain>, resolver: Arc<dyn ContractResolver>) -> Self {
        Self { chain, resolver }
    }

    /// `eth_call` of `delegateToFacet` from `wallet`. Never errors, every
    /// problem is reported as a failure with its reason.
    #[instrument(skip(self, interaction_data), fields(wallet = %wallet, product_id = %product_id))]
    pub async fn simulate_interaction(
        &self,
        wallet: Address,
        product_id: B256,
        type_denominator: u8,
        interaction_data: &Bytes,
    ) -> SimulationResult {
        let contract = match self.resolver.interaction_contract(product_id).await {
            Ok(Some(contract)) => contract,
            Ok(None) => return SimulationResult::failure(NO_CONTRACT_REASON),
            Err(e) => return SimulationResult::failure(failure_reason(&e)),
        };

        let data = encode_delegate_to_facet(type_denominator, interaction_data);
        match self.chain.call(Some(wallet), contract, data).await {
            Ok(_) => SimulationResult::Success,
            Err(e) => {
                debug!(error = %e, "Simulation failed");
                SimulationResult::failure(failure_reason(&e))
            }
        }
    }
}

fn failure_reason(error: &AppError) -> String {
    match error {
        AppError::Blockchain(BlockchainError::Reverted(reason)) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::blockchain::contracts::delegateToFacetCall;
    use crate::test_utils::{MockChain, StaticContractResolver};
    use alloy::sol_types::SolCall;

    const CONTRACT: Address = Address::repeat_byte(0xcc);
    const WALLET: Address = Address::repeat_byte(0x11);

    fn simulator(chain: Arc<MockChain>, resolver: StaticContractResolver) -> InteractionSimulator {
        InteractionSimulator::new(chain, Arc::new(resolver))
    }

    #[tokio::test]
    async fn test_successful_call_is_success() {
        let chain = Arc::new(MockChain::new());
        let sim = simulator(chain.clone(), StaticContractResolver::resolve_all(CONTRACT));
        let data = Bytes::from(vec![0xab, 0xcd]);

        let result = sim.simulate_interaction(WALLET, B256::ZERO, 3, &data).await;
        assert_eq!(result, SimulationResult::Success);

        let calls = chain.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].from, Some(WALLET));
        assert_eq!(calls[0].to, CONTRACT);
        let decoded = delegateToFacetCall::abi_decode(&calls[0].data).unwrap();
        assert_eq!(decoded.facetIndex, 3);
        assert_eq!(decoded.data, data);
    }

    #[tokio::test]
    async fn test_unresolved_contract_is_failure_without_call() {
        let chain = Arc::new(MockChain::new());
        let sim = simulator(chain.clone(), StaticContractResolver::new());
        let result = sim
            .simulate_interaction(WALLET, B256::ZERO, 0, &Bytes::new())
            .await;
        assert_eq!(result, SimulationResult::failure(NO_CONTRACT_REASON));
        assert_eq!(chain.call_count(), 0);
    }

    #[tokio::test]
    async fn test_revert_reason_is_reported() {
        let chain = Arc::new(MockChain::new());
        chain.set_call_response(Err(AppError::Blockchain(BlockchainError::Reverted(
            "InvalidInteraction()".to_string(),
        ))));
        let sim = simulator(chain, StaticContractResolver::resolve_all(CONTRACT));
        let result = sim
            .simulate_interaction(WALLET, B256::ZERO, 0, &Bytes::new())
            .await;
        assert_eq!(result, SimulationResult::failure("InvalidInteraction()"));
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn test_rpc_error_is_failure() {
        let chain = Arc::new(MockChain::new());
        chain.set_call_response(Err(AppError::Blockchain(BlockchainError::Timeout(
            "eth_call".to_string(),
        ))));
        let sim = simulator(chain, StaticContractResolver::resolve_all(CONTRACT));
        let result = sim
            .simulate_interaction(WALLET, B256::ZERO, 0, &Bytes::new())
            .await;
        assert!(matches!(result, SimulationResult::Failure { reason } if reason.contains("timed out")));
    }
}
