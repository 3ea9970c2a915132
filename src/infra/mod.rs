//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;

pub use blockchain::{
    DerivedSignerResolver, HttpEvmRpcProvider, OnChainContractResolver, OnChainSessionOracle,
    RpcChainClient, RpcClientConfig, SessionOracleConfig, signer_from_hex,
};
pub use database::{PostgresClient, PostgresConfig};
