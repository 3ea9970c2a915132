//! EVM chain access.
//!
//! JSON-RPC transport, contract bindings, calldata compression and the
//! on-chain implementations of the resolver and session collaborators.

pub mod compression;
pub mod contracts;
pub mod keys;
pub mod resolver;
pub mod rpc;
pub mod session;

pub use compression::{cd_compress, cd_decompress};
pub use keys::{DerivedSignerResolver, signer_from_hex};
pub use resolver::OnChainContractResolver;
pub use rpc::{EvmRpcProvider, HttpEvmRpcProvider, RpcChainClient, RpcClientConfig};
pub use session::{OnChainSessionOracle, SessionOracleConfig};
