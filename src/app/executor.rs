//! Batch submission of prepared interactions through the delegator.

use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, B256, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AppError, BlockchainError, InteractionChain, PreparedInteraction, ReceiptStatus,
    SignerResolver,
};
use crate::infra::blockchain::compression::cd_compress;
use crate::infra::blockchain::contracts::encode_execute;

/// Raw calldata above this size is always sent compressed
pub const MAX_RAW_CALLDATA: usize = 8192;

/// Calldata variant picked for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalldataEncoding {
    Raw,
    Compressed,
}

/// Raw wins only when it is strictly cheaper and small enough
#[must_use]
pub fn select_encoding(raw_gas: u64, compressed_gas: u64, raw_len: usize) -> CalldataEncoding {
    if raw_gas < compressed_gas && raw_len < MAX_RAW_CALLDATA {
        CalldataEncoding::Raw
    } else {
        CalldataEncoding::Compressed
    }
}

#[must_use]
pub fn apply_gas_margin(gas: u64, margin_percent: u64) -> u64 {
    gas.saturating_mul(100 + margin_percent) / 100
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Delegator receiving the `execute` batch
    pub delegator: Address,
    /// Named key of the submitting account
    pub executor_key: String,
    pub receipt_timeout: Duration,
    /// Extra gas on top of the estimate, in percent
    pub gas_margin_percent: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            delegator: Address::ZERO,
            executor_key: "interaction-executor".to_string(),
            receipt_timeout: Duration::from_secs(60),
            gas_margin_percent: 25,
        }
    }
}

/// Calldata and gas chosen for a batch
#[derive(Debug, Clone)]
struct EncodedBatch {
    encoding: CalldataEncoding,
    data: Bytes,
    gas: u64,
}

pub struct BatchExecutor {
    chain: Arc<dyn InteractionChain>,
    signers: Arc<dyn SignerResolver>,
    config: ExecutorConfig,
    /// Held from nonce fetch to broadcast, one per executor address
    submit_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl BatchExecutor {
    pub fn new(
        chain: Arc<dyn InteractionChain>,
        signers: Arc<dyn SignerResolver>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            chain,
            signers,
            config,
            submit_locks: DashMap::new(),
        }
    }

    /// Submit the batch in one transaction, `None` on any failure
    #[instrument(skip(self, prepared), fields(count = prepared.len()))]
    pub async fn push_prepared_interactions(
        &self,
        prepared: &[PreparedInteraction],
    ) -> Option<B256> {
        if prepared.is_empty() {
            return None;
        }
        match self.push(prepared).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                error!(error = %e, "Unable to push interactions");
                None
            }
        }
    }

    async fn push(&self, prepared: &[PreparedInteraction]) -> Result<B256, AppError> {
        let executor = self.signers.key_signer(&self.config.executor_key).await?;
        let batch = self.encode(executor.address(), prepared).await?;
        let gas_limit = apply_gas_margin(batch.gas, self.config.gas_margin_percent);
        debug!(
            encoding = ?batch.encoding,
            size = batch.data.len(),
            gas = batch.gas,
            gas_limit,
            "Batch encoded"
        );

        let tx_hash = self.submit(&executor, batch.data, gas_limit).await?;
        info!(tx_hash = %tx_hash, count = prepared.len(), "Interactions batch submitted");

        match self
            .chain
            .wait_for_receipt(tx_hash, self.config.receipt_timeout)
            .await?
        {
            Some(ReceiptStatus::Success) => Ok(tx_hash),
            Some(ReceiptStatus::Reverted) => Err(AppError::Blockchain(
                BlockchainError::TransactionFailed(format!("Batch {} reverted", tx_hash)),
            )),
            None => {
                warn!(tx_hash = %tx_hash, "Receipt not seen before timeout, keeping hash");
                Ok(tx_hash)
            }
        }
    }

    async fn encode(
        &self,
        from: Address,
        prepared: &[PreparedInteraction],
    ) -> Result<EncodedBatch, AppError> {
        let raw = encode_execute(prepared);
        let compressed = Bytes::from(cd_compress(&raw));

        let (raw_gas, compressed_gas) = tokio::try_join!(
            self.chain.estimate_gas(from, self.config.delegator, raw.clone()),
            self.chain
                .estimate_gas(from, self.config.delegator, compressed.clone()),
        )?;
        debug!(
            raw_size = raw.len(),
            compressed_size = compressed.len(),
            raw_gas,
            compressed_gas,
            "Calldata variants estimated"
        );

        let encoding = select_encoding(raw_gas, compressed_gas, raw.len());
        Ok(match encoding {
            CalldataEncoding::Raw => EncodedBatch {
                encoding,
                data: raw,
                gas: raw_gas,
            },
            CalldataEncoding::Compressed => EncodedBatch {
                encoding,
                data: compressed,
                gas: compressed_gas,
            },
        })
    }

    async fn submit(
        &self,
        executor: &PrivateKeySigner,
        data: Bytes,
        gas_limit: u64,
    ) -> Result<B256, AppError> {
        let lock = self
            .submit_locks
            .entry(executor.address())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let chain_id = self.chain.chain_id().await?;
        let nonce = self.chain.transaction_count(executor.address()).await?;
        let fees = self.chain.fees().await?;

        let mut tx = TxEip1559 {
            chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            to: TxKind::Call(self.config.delegator),
            value: U256::ZERO,
            access_list: Default::default(),
            input: data,
        };
        let signature = executor
            .sign_transaction_sync(&mut tx)
            .map_err(|e| AppError::Signing(format!("Sign tx failed: {}", e)))?;
        let envelope: TxEnvelope = tx.into_signed(signature).into();

        // Sent exactly once, resubmission belongs to the retry sweep
        self.chain
            .send_raw_transaction(envelope.encoded_2718().into())
            .await
    }
}
