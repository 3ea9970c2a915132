//! Product to interaction-contract resolution through the interaction manager.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use moka::future::Cache;
use tracing::{debug, instrument};

use super::contracts::{encode_get_interaction_contract, getInteractionContractCall};
use crate::domain::{AppError, BlockchainError, ContractResolver, InteractionChain};

/// Reads `getInteractionContract(uint256)` and caches hits
pub struct OnChainContractResolver {
    chain: Arc<dyn InteractionChain>,
    manager: Address,
    cache: Cache<B256, Address>,
}

impl OnChainContractResolver {
    pub fn new(chain: Arc<dyn InteractionChain>, manager: Address) -> Self {
        Self::with_cache(chain, manager, 1_024, Duration::from_secs(60 * 60))
    }

    pub fn with_cache(
        chain: Arc<dyn InteractionChain>,
        manager: Address,
        capacity: u64,
        ttl: Duration,
    ) -> Self {
        Self {
            chain,
            manager,
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl ContractResolver for OnChainContractResolver {
    #[instrument(skip(self), fields(product_id = %product_id))]
    async fn interaction_contract(&self, product_id: B256) -> Result<Option<Address>, AppError> {
        if let Some(address) = self.cache.get(&product_id).await {
            return Ok(Some(address));
        }

        let data = encode_get_interaction_contract(product_id);
        let output = match self.chain.call(None, self.manager, data).await {
            Ok(output) => output,
            // The manager reverts for products without a deployed contract
            Err(AppError::Blockchain(BlockchainError::Reverted(reason))) => {
                debug!(reason = %reason, "No interaction contract for product");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let address = getInteractionContractCall::abi_decode_returns(&output).map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string()))
        })?;
        if address.is_zero() {
            return Ok(None);
        }

        self.cache.insert(product_id, address).await;
        Ok(Some(address))
    }
}
