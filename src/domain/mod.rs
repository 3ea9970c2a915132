//! Domain layer containing core pipeline types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AppError, BlockchainError, ConfigError, DatabaseError, ValidationError};
pub use traits::{
    ContractResolver, InteractionChain, InteractionStore, SignerResolver, SkipPredicate,
    WalletSessionOracle, skip_if_empty,
};
pub use types::{
    ArchiveReason, ArchivedInteraction, ErrorDetail, ErrorResponse, FailureCategory, FeeEstimate,
    HealthResponse, HealthStatus, InteractionOutcome, InteractionStatus, NewInteraction,
    PendingInteraction, PreparedInteraction, PushInteractionsRequest, PushInteractionsResponse,
    PushedInteraction, QueueStats, RateLimitResponse, ReceiptStatus, WalletHistory,
};
