//! JSON-RPC chain client for EVM networks.

use std::num::NonZeroU32;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, U64, U256};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, BlockchainError, FeeEstimate, InteractionChain, ReceiptStatus,
};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub receipt_poll_interval: Duration,
    /// Outbound request budget, `None` disables throttling
    pub max_requests_per_second: Option<NonZeroU32>,
    /// Known chain id, fetched with `eth_chainId` when absent
    pub chain_id: Option<u64>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            receipt_poll_interval: Duration::from_secs(1),
            max_requests_per_second: NonZeroU32::new(25),
            chain_id: None,
        }
    }
}

/// Abstract provider for JSON-RPC transport to enable testing
#[async_trait]
pub trait EvmRpcProvider: Send + Sync {
    /// Send a JSON-RPC request, a `null` result comes back as `Value::Null`
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AppError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Node error code for `execution reverted`
const EXECUTION_REVERTED: i64 = 3;

impl JsonRpcError {
    fn into_app_error(self) -> AppError {
        if self.code == EXECUTION_REVERTED || self.message.contains("revert") {
            let reason = match self.data {
                Some(data) => format!("{} ({})", self.message, data),
                None => self.message,
            };
            return AppError::Blockchain(BlockchainError::Reverted(reason));
        }
        AppError::Blockchain(BlockchainError::RpcError(format!(
            "{}: {}",
            self.code, self.message
        )))
    }
}

/// HTTP-based JSON-RPC provider
pub struct HttpEvmRpcProvider {
    http_client: Client,
    rpc_url: String,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl HttpEvmRpcProvider {
    pub fn new(
        rpc_url: &str,
        timeout: Duration,
        max_requests_per_second: Option<NonZeroU32>,
    ) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))?;

        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
            limiter: max_requests_per_second.map(|rps| RateLimiter::direct(Quota::per_second(rps))),
        })
    }
}

#[async_trait]
impl EvmRpcProvider for HttpEvmRpcProvider {
    async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: method.to_string(),
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Blockchain(BlockchainError::Timeout(e.to_string()))
                } else if e.is_connect() {
                    AppError::Blockchain(BlockchainError::Connection(e.to_string()))
                } else {
                    AppError::Blockchain(BlockchainError::RpcError(e.to_string()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "HTTP {}",
                status
            ))));
        }

        let rpc_response: JsonRpcResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| AppError::Blockchain(BlockchainError::InvalidResponse(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Err(error.into_app_error());
        }

        Ok(rpc_response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockHeader {
    base_fee_per_gas: Option<U256>,
}

#[derive(Debug, Deserialize)]
struct ReceiptResponse {
    status: Option<U64>,
}

/// EVM chain client on top of an [`EvmRpcProvider`]
pub struct RpcChainClient {
    provider: Box<dyn EvmRpcProvider>,
    config: RpcClientConfig,
    chain_id: OnceCell<u64>,
}

impl RpcChainClient {
    /// Create a new chain client over HTTP
    pub fn new(rpc_url: &str, config: RpcClientConfig) -> Result<Self, AppError> {
        let provider =
            HttpEvmRpcProvider::new(rpc_url, config.timeout, config.max_requests_per_second)?;
        info!(rpc_url = %rpc_url, "Created EVM chain client");
        Ok(Self::with_provider(Box::new(provider), config))
    }

    /// Create a new chain client with default configuration
    pub fn with_defaults(rpc_url: &str) -> Result<Self, AppError> {
        Self::new(rpc_url, RpcClientConfig::default())
    }

    /// Create a new client with a specific provider (useful for testing)
    pub fn with_provider(provider: Box<dyn EvmRpcProvider>, config: RpcClientConfig) -> Self {
        let chain_id = match config.chain_id {
            Some(id) => OnceCell::new_with(Some(id)),
            None => OnceCell::new(),
        };
        Self {
            provider,
            config,
            chain_id,
        }
    }

    /// Make an RPC call with retries; reverts are returned immediately
    #[instrument(skip(self, params))]
    async fn rpc_call<R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<R, AppError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.provider.send_request(method, params.clone()).await {
                Ok(result_value) => {
                    return serde_json::from_value(result_value).map_err(|e| {
                        AppError::Blockchain(BlockchainError::InvalidResponse(format!(
                            "Deserialization error: {}",
                            e
                        )))
                    });
                }
                Err(e @ AppError::Blockchain(BlockchainError::Reverted(_))) => return Err(e),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Blockchain(BlockchainError::RpcError("Unknown error".to_string()))
        }))
    }

    async fn fetch_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptStatus>, AppError> {
        let receipt: Option<ReceiptResponse> = self
            .rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        Ok(receipt.map(|r| match r.status {
            Some(status) if status == U64::from(1) => ReceiptStatus::Success,
            _ => ReceiptStatus::Reverted,
        }))
    }
}

fn call_object(from: Option<Address>, to: Address, data: &Bytes) -> serde_json::Value {
    match from {
        Some(from) => json!({ "from": from, "to": to, "data": data }),
        None => json!({ "to": to, "data": data }),
    }
}

fn saturating_u128(value: U256) -> u128 {
    u128::try_from(value).unwrap_or(u128::MAX)
}

#[async_trait]
impl InteractionChain for RpcChainClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let _: U64 = self.rpc_call("eth_blockNumber", json!([])).await?;
        Ok(())
    }

    async fn chain_id(&self) -> Result<u64, AppError> {
        self.chain_id
            .get_or_try_init(|| async {
                let id: U64 = self.rpc_call("eth_chainId", json!([])).await?;
                Ok::<u64, AppError>(id.to::<u64>())
            })
            .await
            .copied()
    }

    #[instrument(skip(self, data), fields(data_len = data.len()))]
    async fn call(
        &self,
        from: Option<Address>,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, AppError> {
        self.rpc_call("eth_call", json!([call_object(from, to, &data), "latest"]))
            .await
    }

    #[instrument(skip(self, data), fields(data_len = data.len()))]
    async fn estimate_gas(&self, from: Address, to: Address, data: Bytes) -> Result<u64, AppError> {
        let gas: U64 = self
            .rpc_call("eth_estimateGas", json!([call_object(Some(from), to, &data)]))
            .await?;
        Ok(gas.to::<u64>())
    }

    #[instrument(skip(self))]
    async fn transaction_count(&self, address: Address) -> Result<u64, AppError> {
        let nonce: U64 = self
            .rpc_call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(nonce.to::<u64>())
    }

    #[instrument(skip(self))]
    async fn fees(&self) -> Result<FeeEstimate, AppError> {
        let header: BlockHeader = self
            .rpc_call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let priority: U256 = self.rpc_call("eth_maxPriorityFeePerGas", json!([])).await?;

        let base_fee = saturating_u128(header.base_fee_per_gas.unwrap_or_default());
        let max_priority_fee_per_gas = saturating_u128(priority);
        let max_fee_per_gas = base_fee
            .saturating_mul(2)
            .saturating_add(max_priority_fee_per_gas);
        debug!(base_fee, max_fee_per_gas, max_priority_fee_per_gas, "Fetched fees");

        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    #[instrument(skip(self, raw), fields(raw_len = raw.len()))]
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, AppError> {
        // Sent exactly once, resubmission belongs to the executor
        let value = self
            .provider
            .send_request("eth_sendRawTransaction", json!([raw]))
            .await?;
        serde_json::from_value(value).map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!(
                "Invalid transaction hash: {}",
                e
            )))
        })
    }

    #[instrument(skip(self))]
    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<ReceiptStatus>, AppError> {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            match self.fetch_receipt(tx_hash).await {
                Ok(Some(status)) => {
                    info!(tx_hash = %tx_hash, status = ?status, "Transaction mined");
                    return Ok(Some(status));
                }
                Ok(None) => debug!(tx_hash = %tx_hash, "Transaction not yet mined"),
                Err(e) => {
                    warn!(tx_hash = %tx_hash, error = ?e, "Error fetching transaction receipt")
                }
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
        Ok(None)
    }
}
