//! EIP-712 signing of interactions by product-scoped validator accounts.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, keccak256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolStruct, eip712_domain};
use moka::future::Cache;
use tracing::{error, instrument, warn};

use crate::domain::{AppError, BlockchainError, ContractResolver, InteractionChain, SignerResolver};
use crate::infra::blockchain::contracts::{
    INTERACTION_VALIDATOR_ROLE, ValidateInteraction, encode_has_all_roles, hasAllRolesCall,
    product_id_to_u256,
};

pub const DOMAIN_NAME: &str = "Frak.ProductInteraction";
pub const DOMAIN_VERSION: &str = "0.0.1";

pub struct InteractionSigner {
    chain: Arc<dyn InteractionChain>,
    resolver: Arc<dyn ContractResolver>,
    signers: Arc<dyn SignerResolver>,
    /// Role check results keyed by signer address
    allowed: Cache<Address, bool>,
}

impl InteractionSigner {
    pub fn new(
        chain: Arc<dyn InteractionChain>,
        resolver: Arc<dyn ContractResolver>,
        signers: Arc<dyn SignerResolver>,
    ) -> Self {
        Self {
            chain,
            resolver,
            signers,
            allowed: Cache::builder()
                .max_capacity(64)
                .time_to_live(Duration::from_secs(10 * 60))
                .build(),
        }
    }

    /// Sign `facet_data` for `user`, `None` when the product signer may not sign.
    #[instrument(skip(self, facet_data), fields(user = %user, product_id = %product_id))]
    pub async fn sign_interaction(
        &self,
        facet_data: &Bytes,
        user: Address,
        product_id: B256,
    ) -> Option<Bytes> {
        let contract = match self.resolver.interaction_contract(product_id).await {
            Ok(Some(contract)) => contract,
            Ok(None) => {
                warn!("No diamond contract found for product");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Interaction contract lookup failed");
                return None;
            }
        };

        let signer = match self.signers.product_signer(product_id).await {
            Ok(signer) => signer,
            Err(e) => {
                error!(error = %e, "Product signer unavailable");
                return None;
            }
        };

        if !self.is_signer_allowed(contract, signer.address()).await {
            warn!(
                contract = %contract,
                signer = %signer.address(),
                "Signer not allowed on product"
            );
            return None;
        }

        match self.sign_typed(&signer, contract, facet_data, user, product_id).await {
            Ok(signature) => Some(signature),
            Err(e) => {
                error!(error = %e, "Interaction signing failed");
                None
            }
        }
    }

    async fn sign_typed(
        &self,
        signer: &PrivateKeySigner,
        contract: Address,
        facet_data: &Bytes,
        user: Address,
        product_id: B256,
    ) -> Result<Bytes, AppError> {
        let chain_id = self.chain.chain_id().await?;
        let domain = eip712_domain! {
            name: DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id: chain_id,
            verifying_contract: contract,
        };
        let message = ValidateInteraction {
            productId: product_id_to_u256(product_id),
            interactionData: keccak256(facet_data),
            user,
        };
        let hash = message.eip712_signing_hash(&domain);
        let signature = signer
            .sign_hash_sync(&hash)
            .map_err(|e| AppError::Signing(e.to_string()))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    /// Role check through the cache, lookup errors count as not allowed and are not cached
    async fn is_signer_allowed(&self, contract: Address, signer: Address) -> bool {
        if let Some(allowed) = self.allowed.get(&signer).await {
            return allowed;
        }

        let data = encode_has_all_roles(signer, INTERACTION_VALIDATOR_ROLE);
        let allowed = match self.chain.call(None, contract, data).await.and_then(|output| {
            hasAllRolesCall::abi_decode_returns(&output)
                .map_err(|e| AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string())))
        }) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(signer = %signer, error = %e, "Role check failed");
                return false;
            }
        };
        self.allowed.insert(signer, allowed).await;
        allowed
    }
}
