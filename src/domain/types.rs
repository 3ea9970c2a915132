//! Domain types for the interaction pipeline.

use alloy::primitives::{Address, B256, Bytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::error::{AppError, ValidationError};

/// Queue status of a pending interaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    /// Waiting for simulation
    #[default]
    Pending,
    /// Wallet session was invalid at simulation time
    NoSession,
    /// Simulation reverted or errored
    Failed,
    /// Simulation passed, waiting for execution
    Succeeded,
    /// Signing or on-chain submission failed
    ExecutionFailed,
}

impl InteractionStatus {
    pub const ALL: [InteractionStatus; 5] = [
        Self::Pending,
        Self::NoSession,
        Self::Failed,
        Self::Succeeded,
        Self::ExecutionFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NoSession => "no_session",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
            Self::ExecutionFailed => "execution_failed",
        }
    }

    /// Whether the pipeline may move a row from `self` to `next`.
    ///
    /// Removal into the pushed or archived tables happens outside the status
    /// field and is not part of this table.
    #[must_use]
    pub fn can_transition_to(&self, next: InteractionStatus) -> bool {
        use InteractionStatus::*;
        matches!(
            (self, next),
            (Pending, Succeeded | Failed | NoSession)
                | (Succeeded, ExecutionFailed)
                | (Failed | NoSession, Pending)
                | (ExecutionFailed, Succeeded)
        )
    }

    /// Failure category for the three retryable statuses
    #[must_use]
    pub fn failure_category(&self) -> Option<FailureCategory> {
        match self {
            Self::NoSession => Some(FailureCategory::NoSession),
            Self::Failed => Some(FailureCategory::Failed),
            Self::ExecutionFailed => Some(FailureCategory::ExecutionFailed),
            Self::Pending | Self::Succeeded => None,
        }
    }
}

impl std::str::FromStr for InteractionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "no_session" => Ok(Self::NoSession),
            "failed" => Ok(Self::Failed),
            "succeeded" => Ok(Self::Succeeded),
            "execution_failed" => Ok(Self::ExecutionFailed),
            _ => Err(format!("Invalid interaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure class driving the retry curve
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    NoSession,
    Failed,
    ExecutionFailed,
}

impl FailureCategory {
    #[must_use]
    pub fn status(&self) -> InteractionStatus {
        match self {
            Self::NoSession => InteractionStatus::NoSession,
            Self::Failed => InteractionStatus::Failed,
            Self::ExecutionFailed => InteractionStatus::ExecutionFailed,
        }
    }
}

/// Why an interaction left the queue without being pushed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    MaxRetries,
    Expired,
    Manual,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxRetries => "max_retries",
            Self::Expired => "expired",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ArchiveReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max_retries" => Ok(Self::MaxRetries),
            "expired" => Ok(Self::Expired),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid archive reason: {}", s)),
        }
    }
}

impl std::fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queued interaction, owned by the pending store until pushed or archived
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PendingInteraction {
    pub id: i64,
    /// Wallet the interaction is executed for
    #[schema(value_type = String, example = "0x1234567890123456789012345678901234567890")]
    pub wallet: Address,
    /// Product the interaction belongs to
    #[schema(value_type = String)]
    pub product_id: B256,
    /// Facet selector inside the product's interaction contract
    pub type_denominator: u8,
    /// Opaque facet payload
    #[schema(value_type = String, example = "0xdeadbeef")]
    pub interaction_data: Bytes,
    /// Signature supplied by the producer, skips signing when present
    #[schema(value_type = Option<String>)]
    pub signature: Option<Bytes>,
    pub status: InteractionStatus,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set while exactly one worker owns the row
    pub locked_at: Option<DateTime<Utc>>,
}

impl PendingInteraction {
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }
}

/// Terminal success record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PushedInteraction {
    pub id: i64,
    #[schema(value_type = String)]
    pub wallet: Address,
    #[schema(value_type = String)]
    pub product_id: B256,
    pub type_denominator: u8,
    #[schema(value_type = String)]
    pub interaction_data: Bytes,
    #[schema(value_type = String)]
    pub signature: Bytes,
    #[schema(value_type = String)]
    pub tx_hash: B256,
    pub created_at: DateTime<Utc>,
    pub pushed_at: DateTime<Utc>,
}

/// Terminal failure record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ArchivedInteraction {
    pub id: i64,
    /// Id the interaction had in the pending table
    pub original_id: i64,
    #[schema(value_type = String)]
    pub wallet: Address,
    #[schema(value_type = String)]
    pub product_id: B256,
    pub type_denominator: u8,
    #[schema(value_type = String)]
    pub interaction_data: Bytes,
    #[schema(value_type = Option<String>)]
    pub signature: Option<Bytes>,
    pub final_status: InteractionStatus,
    pub failure_reason: Option<String>,
    pub total_retries: i32,
    pub archive_reason: ArchiveReason,
    pub archived_at: DateTime<Utc>,
    pub original_created_at: DateTime<Utc>,
}

/// Producer payload for a new interaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate, ToSchema)]
pub struct NewInteraction {
    #[validate(custom(function = "validate_wallet"))]
    #[schema(value_type = String, example = "0x1234567890123456789012345678901234567890")]
    pub wallet: Address,
    #[schema(value_type = String)]
    pub product_id: B256,
    pub type_denominator: u8,
    #[validate(custom(function = "validate_payload"))]
    #[schema(value_type = String, example = "0xdeadbeef")]
    pub interaction_data: Bytes,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub signature: Option<Bytes>,
}

impl NewInteraction {
    #[must_use]
    pub fn new(wallet: Address, product_id: B256, type_denominator: u8, data: Bytes) -> Self {
        Self {
            wallet,
            product_id,
            type_denominator,
            interaction_data: data,
            signature: None,
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: Bytes) -> Self {
        self.signature = Some(signature);
        self
    }
}

fn validate_wallet(wallet: &Address) -> Result<(), validator::ValidationError> {
    if wallet.is_zero() {
        return Err(validator::ValidationError::new("zero_address")
            .with_message("Wallet must not be the zero address".into()));
    }
    Ok(())
}

fn validate_payload(data: &Bytes) -> Result<(), validator::ValidationError> {
    if data.is_empty() {
        return Err(validator::ValidationError::new("empty_payload")
            .with_message("Interaction data is required".into()));
    }
    Ok(())
}

/// Batch of interactions pushed by a producer
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PushInteractionsRequest {
    #[validate(length(min = 1, max = 500, message = "Between 1 and 500 interactions"), nested)]
    pub interactions: Vec<NewInteraction>,
}

/// Result of a producer push
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PushInteractionsResponse {
    /// Rows actually inserted, duplicates are ignored
    pub inserted: u64,
}

/// Status write recorded by a stage for one row
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionOutcome {
    pub id: i64,
    pub status: InteractionStatus,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl InteractionOutcome {
    /// Build an outcome for `row`, rejecting edges outside the state machine.
    pub fn transition(
        row: &PendingInteraction,
        next: InteractionStatus,
    ) -> Result<Self, AppError> {
        if !row.status.can_transition_to(next) {
            return Err(AppError::Validation(ValidationError::IllegalTransition {
                from: row.status.to_string(),
                to: next.to_string(),
            }));
        }
        Ok(Self {
            id: row.id,
            status: next,
            failure_reason: None,
            retry_count: row.retry_count,
            last_retry_at: row.last_retry_at,
            next_retry_at: None,
        })
    }

    /// Record a failure with its retry schedule
    #[must_use]
    pub fn with_failure(
        mut self,
        reason: impl Into<String>,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        self.failure_reason = Some(reason.into());
        self.retry_count = retry_count;
        self.last_retry_at = Some(Utc::now());
        self.next_retry_at = Some(next_retry_at);
        self
    }
}

/// A signed interaction ready for batch execution
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInteraction {
    pub interaction: PendingInteraction,
    pub signature: Bytes,
    /// Payload forwarded to the interaction contract
    pub packed_interaction: Bytes,
}

/// EIP-1559 fee parameters for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Final status of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Queue depth per status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct QueueStats {
    pub pending: i64,
    pub no_session: i64,
    pub failed: i64,
    pub succeeded: i64,
    pub execution_failed: i64,
    /// Rows currently owned by a worker
    pub locked: i64,
    pub pushed: i64,
    pub archived: i64,
}

impl QueueStats {
    pub fn add_status(&mut self, status: InteractionStatus, count: i64) {
        match status {
            InteractionStatus::Pending => self.pending += count,
            InteractionStatus::NoSession => self.no_session += count,
            InteractionStatus::Failed => self.failed += count,
            InteractionStatus::Succeeded => self.succeeded += count,
            InteractionStatus::ExecutionFailed => self.execution_failed += count,
        }
    }
}

/// Every record known for one wallet
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WalletHistory {
    pub pending: Vec<PendingInteraction>,
    pub pushed: Vec<PushedInteraction>,
    pub archived: Vec<ArchivedInteraction>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall system status
    pub status: HealthStatus,
    /// Database health status
    pub database: HealthStatus,
    /// Chain RPC health status
    pub blockchain: HealthStatus,
    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
    /// Application version
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, blockchain: HealthStatus) -> Self {
        // The queue keeps accepting rows without the chain, so a dead RPC only degrades.
        let status = match (&database, &blockchain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            blockchain,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Rate limit exceeded response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    /// Seconds to wait before retrying
    #[schema(example = 1)]
    pub retry_after: u64,
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "validation_error")]
    pub r#type: String,
    /// Human-readable error message
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn row(status: InteractionStatus) -> PendingInteraction {
        PendingInteraction {
            id: 7,
            wallet: Address::repeat_byte(0x11),
            product_id: B256::repeat_byte(0x22),
            type_denominator: 1,
            interaction_data: Bytes::from_static(&[0xde, 0xad]),
            signature: None,
            status,
            failure_reason: None,
            retry_count: 3,
            last_retry_at: None,
            next_retry_at: None,
            created_at: Utc::now(),
            updated_at: None,
            locked_at: None,
        }
    }

    #[test]
    fn test_interaction_status_display_and_parsing() {
        for status in InteractionStatus::ALL {
            assert_eq!(status.to_string(), status.as_str());
            assert_eq!(InteractionStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(InteractionStatus::from_str("archived").is_err());
    }

    #[test]
    fn test_state_machine_edges() {
        use InteractionStatus::*;
        let allowed = [
            (Pending, Succeeded),
            (Pending, Failed),
            (Pending, NoSession),
            (Succeeded, ExecutionFailed),
            (Failed, Pending),
            (NoSession, Pending),
            (ExecutionFailed, Succeeded),
        ];
        for from in InteractionStatus::ALL {
            for to in InteractionStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_succeeded_never_goes_back_to_no_session() {
        assert!(!InteractionStatus::Succeeded.can_transition_to(InteractionStatus::NoSession));
        assert!(!InteractionStatus::Succeeded.can_transition_to(InteractionStatus::Pending));
    }

    #[test]
    fn test_failure_categories_round_trip_through_status() {
        for status in InteractionStatus::ALL {
            if let Some(category) = status.failure_category() {
                assert_eq!(category.status(), status);
            }
        }
        assert!(InteractionStatus::Pending.failure_category().is_none());
        assert!(InteractionStatus::Succeeded.failure_category().is_none());
    }

    #[test]
    fn test_outcome_rejects_illegal_transition() {
        let pending = row(InteractionStatus::Pending);
        let err = InteractionOutcome::transition(&pending, InteractionStatus::ExecutionFailed)
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_outcome_with_failure_sets_retry_metadata() {
        let pending = row(InteractionStatus::Pending);
        let next = Utc::now() + chrono::Duration::hours(3);
        let outcome = InteractionOutcome::transition(&pending, InteractionStatus::Failed)
            .unwrap()
            .with_failure("reverted", 4, next);

        assert_eq!(outcome.id, 7);
        assert_eq!(outcome.status, InteractionStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("reverted"));
        assert_eq!(outcome.retry_count, 4);
        assert_eq!(outcome.next_retry_at, Some(next));
        assert!(outcome.last_retry_at.is_some());
    }

    #[test]
    fn test_new_interaction_validation() {
        let valid = NewInteraction::new(
            Address::repeat_byte(0x01),
            B256::repeat_byte(0x02),
            3,
            Bytes::from_static(&[0x01]),
        );
        assert!(valid.validate().is_ok());

        let zero_wallet = NewInteraction {
            wallet: Address::ZERO,
            ..valid.clone()
        };
        assert!(zero_wallet.validate().is_err());

        let empty_payload = NewInteraction {
            interaction_data: Bytes::new(),
            ..valid
        };
        assert!(empty_payload.validate().is_err());
    }

    #[test]
    fn test_push_request_rejects_empty_batch() {
        let request = PushInteractionsRequest {
            interactions: vec![],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_queue_stats_accumulates_per_status() {
        let mut stats = QueueStats::default();
        stats.add_status(InteractionStatus::Pending, 2);
        stats.add_status(InteractionStatus::ExecutionFailed, 5);
        stats.add_status(InteractionStatus::Pending, 1);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.execution_failed, 5);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_health_response_degrades_without_chain() {
        let health = HealthResponse::new(HealthStatus::Healthy, HealthStatus::Unhealthy);
        assert_eq!(health.status, HealthStatus::Degraded);
        let health = HealthResponse::new(HealthStatus::Unhealthy, HealthStatus::Healthy);
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_new_interaction_json_uses_hex() {
        let interaction = NewInteraction::new(
            Address::repeat_byte(0xab),
            B256::repeat_byte(0x01),
            2,
            Bytes::from_static(&[0xbe, 0xef]),
        );
        let json = serde_json::to_value(&interaction).unwrap();
        assert_eq!(json["interaction_data"], "0xbeef");
        assert_eq!(json["type_denominator"], 2);
        let parsed: NewInteraction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, interaction);
    }
}
