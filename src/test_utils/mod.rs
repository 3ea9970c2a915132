//! Test doubles for the pipeline collaborators.

pub mod mocks;

pub use mocks::{
    MockChain, MockInteractionStore, MockSessionOracle, RecordedCall, StaticContractResolver,
    StoreOp,
};

/// Well-known development key, never funded on a real network
pub const TEST_MASTER_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
