//! Wallet session oracle backed by the delegator's session storage.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use tracing::{debug, warn};

use super::contracts::{SessionStatus, encode_get_current_session, getCurrentSessionCall};
use crate::domain::{AppError, BlockchainError, InteractionChain, WalletSessionOracle};

/// Addresses a session must delegate to for the relayer to act on it
#[derive(Debug, Clone)]
pub struct SessionOracleConfig {
    /// Contract exposing `getCurrentSession(address)`
    pub session_contract: Address,
    pub expected_executor: Address,
    pub expected_validator: Address,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
}

impl SessionOracleConfig {
    pub fn new(session_contract: Address, expected_executor: Address, expected_validator: Address) -> Self {
        Self {
            session_contract,
            expected_executor,
            expected_validator,
            cache_ttl: Duration::from_secs(30),
            cache_capacity: 10_000,
        }
    }
}

pub struct OnChainSessionOracle {
    chain: Arc<dyn InteractionChain>,
    config: SessionOracleConfig,
    cache: Cache<Address, bool>,
}

impl OnChainSessionOracle {
    pub fn new(chain: Arc<dyn InteractionChain>, config: SessionOracleConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();
        Self {
            chain,
            config,
            cache,
        }
    }

    fn is_valid_now(&self, session: &SessionStatus) -> bool {
        let now = Utc::now().timestamp().max(0) as u64;
        let valid_after = session.validAfter.to::<u64>();
        let valid_until = session.validUntil.to::<u64>();
        valid_after < now
            && now < valid_until
            && session.executor == self.config.expected_executor
            && session.validator == self.config.expected_validator
    }

    async fn fetch(&self, wallet: Address) -> Result<SessionStatus, AppError> {
        let output = self
            .chain
            .call(
                None,
                self.config.session_contract,
                encode_get_current_session(wallet),
            )
            .await?;
        getCurrentSessionCall::abi_decode_returns(&output)
            .map_err(|e| AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string())))
    }
}

#[async_trait]
impl WalletSessionOracle for OnChainSessionOracle {
    async fn is_session_valid(&self, wallet: Address) -> bool {
        if let Some(valid) = self.cache.get(&wallet).await {
            return valid;
        }

        let valid = match self.fetch(wallet).await {
            Ok(session) => self.is_valid_now(&session),
            Err(e) => {
                warn!(wallet = %wallet, error = ?e, "Session lookup failed");
                return false;
            }
        };
        debug!(wallet = %wallet, valid, "Session checked");
        self.cache.insert(wallet, valid).await;
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockChain;
    use alloy::primitives::aliases::U48;
    use alloy::sol_types::SolValue;

    const EXECUTOR: Address = Address::repeat_byte(0xe0);
    const VALIDATOR: Address = Address::repeat_byte(0xa0);

    fn session(valid_after: i64, valid_until: i64, executor: Address, validator: Address) -> SessionStatus {
        SessionStatus {
            validAfter: U48::from(valid_after as u64),
            validUntil: U48::from(valid_until as u64),
            executor,
            validator,
        }
    }

    fn oracle(chain: Arc<MockChain>) -> OnChainSessionOracle {
        OnChainSessionOracle::new(
            chain,
            SessionOracleConfig::new(Address::repeat_byte(0x01), EXECUTOR, VALIDATOR),
        )
    }

    async fn check(status: SessionStatus) -> bool {
        let chain = Arc::new(MockChain::new());
        chain.set_call_response(Ok(status.abi_encode().into()));
        oracle(chain).is_session_valid(Address::repeat_byte(0x11)).await
    }

    #[tokio::test]
    async fn test_active_session_is_valid() {
        let now = Utc::now().timestamp();
        assert!(check(session(now - 3600, now + 3600, EXECUTOR, VALIDATOR)).await);
    }

    #[tokio::test]
    async fn test_wrong_executor_is_invalid() {
        let now = Utc::now().timestamp();
        let other = Address::repeat_byte(0x99);
        assert!(!check(session(now - 3600, now + 3600, other, VALIDATOR)).await);
    }

    #[tokio::test]
    async fn test_wrong_validator_is_invalid() {
        let now = Utc::now().timestamp();
        let other = Address::repeat_byte(0x99);
        assert!(!check(session(now - 3600, now + 3600, EXECUTOR, other)).await);
    }

    #[tokio::test]
    async fn test_not_started_session_is_invalid() {
        let now = Utc::now().timestamp();
        assert!(!check(session(now + 3600, now + 7200, EXECUTOR, VALIDATOR)).await);
    }

    #[tokio::test]
    async fn test_expired_session_is_invalid() {
        let now = Utc::now().timestamp();
        assert!(!check(session(now - 7200, now - 3600, EXECUTOR, VALIDATOR)).await);
    }

    #[tokio::test]
    async fn test_lookup_error_is_invalid_and_not_cached() {
        let chain = Arc::new(MockChain::new());
        chain.set_call_response(Err(AppError::Blockchain(BlockchainError::Reverted(
            "no session".to_string(),
        ))));
        let oracle = oracle(chain.clone());
        let wallet = Address::repeat_byte(0x11);
        assert!(!oracle.is_session_valid(wallet).await);
        assert!(!oracle.is_session_valid(wallet).await);
        assert_eq!(chain.call_count(), 2);
    }

    #[tokio::test]
    async fn test_result_is_cached_per_wallet() {
        let now = Utc::now().timestamp();
        let chain = Arc::new(MockChain::new());
        chain.set_call_response(Ok(session(now - 10, now + 3600, EXECUTOR, VALIDATOR)
            .abi_encode()
            .into()));
        let oracle = oracle(chain.clone());
        let wallet = Address::repeat_byte(0x11);
        assert!(oracle.is_session_valid(wallet).await);
        assert!(oracle.is_session_valid(wallet).await);
        assert_eq!(chain.call_count(), 1);
    }
}
