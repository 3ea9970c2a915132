//! Contract ABIs and calldata builders for the interaction contracts.

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::domain::PreparedInteraction;

/// Role bit an account needs on an interaction contract to sign interactions
pub const INTERACTION_VALIDATOR_ROLE: U256 = U256::from_limbs([1 << 4, 0, 0, 0]);

sol! {
    /// EIP-712 message signed for every interaction
    #[derive(Debug, PartialEq, Eq)]
    struct ValidateInteraction {
        uint256 productId;
        bytes32 interactionData;
        address user;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct InteractionPayload {
        uint256 productId;
        bytes data;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct DelegatedInteraction {
        address wallet;
        InteractionPayload interaction;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct SessionStatus {
        uint48 validAfter;
        uint48 validUntil;
        address executor;
        address validator;
    }

    /// Interaction contract entry point, dry-run during simulation
    function delegateToFacet(uint8 facetIndex, bytes data) external returns (bytes);

    function hasAllRoles(address user, uint256 roles) external view returns (bool);

    /// Interaction manager lookup
    function getInteractionContract(uint256 productId) external view returns (address);

    /// Delegator batch entry point
    function execute(DelegatedInteraction[] interactions) external;

    /// Delegator session lookup
    function getCurrentSession(address wallet) external view returns (SessionStatus);
}

#[must_use]
pub fn product_id_to_u256(product_id: B256) -> U256 {
    U256::from_be_bytes(product_id.0)
}

/// `abi.encodePacked(uint8 denominator, bytes data, bytes signature)`
#[must_use]
pub fn package_interaction_data(type_denominator: u8, data: &[u8], signature: &[u8]) -> Bytes {
    let mut packed = Vec::with_capacity(1 + data.len() + signature.len());
    packed.push(type_denominator);
    packed.extend_from_slice(data);
    packed.extend_from_slice(signature);
    packed.into()
}

#[must_use]
pub fn encode_delegate_to_facet(type_denominator: u8, data: &Bytes) -> Bytes {
    delegateToFacetCall {
        facetIndex: type_denominator,
        data: data.clone(),
    }
    .abi_encode()
    .into()
}

#[must_use]
pub fn encode_has_all_roles(account: Address, roles: U256) -> Bytes {
    hasAllRolesCall { user: account, roles }.abi_encode().into()
}

#[must_use]
pub fn encode_get_interaction_contract(product_id: B256) -> Bytes {
    getInteractionContractCall {
        productId: product_id_to_u256(product_id),
    }
    .abi_encode()
    .into()
}

#[must_use]
pub fn encode_get_current_session(wallet: Address) -> Bytes {
    getCurrentSessionCall { wallet }.abi_encode().into()
}

/// Raw delegator `execute` calldata for a prepared batch
#[must_use]
pub fn encode_execute(prepared: &[PreparedInteraction]) -> Bytes {
    let interactions = prepared
        .iter()
        .map(|p| DelegatedInteraction {
            wallet: p.interaction.wallet,
            interaction: InteractionPayload {
                productId: product_id_to_u256(p.interaction.product_id),
                data: p.packed_interaction.clone(),
            },
        })
        .collect();
    executeCall { interactions }.abi_encode().into()
}
