//! Interaction relayer.
//!
//! Turns queued user interactions into batched on-chain transactions. Rows are
//! leased from a Postgres queue, simulated against the product's interaction
//! contract, signed with EIP-712 and pushed through the delegator in a single
//! transaction per batch. Failures are retried on per-category backoff curves
//! and archived once their budget runs out.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
