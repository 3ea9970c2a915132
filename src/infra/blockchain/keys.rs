//! Signing accounts derived from a single master key.

use alloy::primitives::{B256, keccak256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::domain::{AppError, ConfigError, SignerResolver};

/// Parse a hex-encoded secp256k1 private key
pub fn signer_from_hex(secret: &SecretString) -> Result<PrivateKeySigner, AppError> {
    let raw = secret.expose_secret().trim();
    raw.trim_start_matches("0x")
        .parse::<PrivateKeySigner>()
        .map_err(|e| {
            AppError::Config(ConfigError::Invalid {
                key: "MASTER_PRIVATE_KEY".to_string(),
                message: e.to_string(),
            })
        })
}

/// Derives one account per product and one per named key.
///
/// Product accounts use `keccak256(master || productId)` and named accounts use
/// `keccak256(master || name)` as their private key.
pub struct DerivedSignerResolver {
    master: B256,
    products: Cache<B256, PrivateKeySigner>,
    named: Cache<String, PrivateKeySigner>,
}

impl DerivedSignerResolver {
    pub fn new(master_key: &SecretString) -> Result<Self, AppError> {
        let master = signer_from_hex(master_key)?.to_bytes();
        info!("Derived signer resolver initialized");
        Ok(Self {
            master,
            products: Cache::builder().max_capacity(1_024).build(),
            named: Cache::builder().max_capacity(64).build(),
        })
    }

    fn derive(&self, salt: &[u8]) -> Result<PrivateKeySigner, AppError> {
        let mut material = Vec::with_capacity(32 + salt.len());
        material.extend_from_slice(self.master.as_slice());
        material.extend_from_slice(salt);
        PrivateKeySigner::from_bytes(&keccak256(&material))
            .map_err(|e| AppError::Signing(format!("Key derivation failed: {}", e)))
    }
}

#[async_trait]
impl SignerResolver for DerivedSignerResolver {
    async fn product_signer(&self, product_id: B256) -> Result<PrivateKeySigner, AppError> {
        if let Some(signer) = self.products.get(&product_id).await {
            return Ok(signer);
        }
        let signer = self.derive(product_id.as_slice())?;
        self.products.insert(product_id, signer.clone()).await;
        Ok(signer)
    }

    async fn key_signer(&self, key: &str) -> Result<PrivateKeySigner, AppError> {
        if let Some(signer) = self.named.get(key).await {
            return Ok(signer);
        }
        let signer = self.derive(key.as_bytes())?;
        self.named.insert(key.to_string(), signer.clone()).await;
        Ok(signer)
    }
}
