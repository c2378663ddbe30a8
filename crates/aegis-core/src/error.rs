use thiserror::Error;

use crate::types::{Amount, Price, Timestamp};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AegisError {
    // ── Validation errors ────────────────────────────────────────────────────
    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("address must be non-zero")]
    ZeroAddress,

    #[error("source and target token must differ")]
    SameToken,

    #[error("interval out of range: {got}s (allowed {min}s to {max}s)")]
    IntervalOutOfRange { got: Timestamp, min: Timestamp, max: Timestamp },

    #[error("execution count out of range: {got} (allowed {min} to {max})")]
    ExecutionCountOutOfRange { got: u32, min: u32, max: u32 },

    #[error("fee exceeds maximum: {got} bps (max {max} bps)")]
    FeeTooHigh { got: u32, max: u32 },

    #[error("trigger price must be greater than zero")]
    ZeroTriggerPrice,

    #[error("trigger percentage out of range: {got} bps (allowed {min} to {max})")]
    TriggerPctOutOfRange { got: u32, min: u32, max: u32 },

    #[error("trailing distance out of range: {got} bps (allowed {min} to {max})")]
    TrailingDistanceOutOfRange { got: u32, min: u32, max: u32 },

    #[error("allocation count out of range: {got} (allowed {min} to {max})")]
    AllocationCountOutOfRange { got: usize, min: usize, max: usize },

    #[error("allocation weights must sum to 10000 bps; got {got}")]
    WeightSumMismatch { got: u32 },

    #[error("allocation weight must be greater than zero")]
    ZeroWeight,

    #[error("duplicate token in allocation set")]
    DuplicateAllocation,

    #[error("subscriber and recipient must differ")]
    SelfSubscription,

    #[error("native-token subscriptions are not supported")]
    NativeTokenSubscription,

    #[error("shield limit below minimum: {got} (min {min})")]
    LimitBelowMinimum { got: Amount, min: Amount },

    #[error("single-tx limit {single_tx} exceeds daily limit {daily}")]
    SingleTxAboveDaily { single_tx: Amount, daily: Amount },

    // ── Policy errors (shield denials) ───────────────────────────────────────
    #[error("protocol is paused")]
    ProtocolPaused,

    #[error("shield is not active for user {0}")]
    ShieldNotActive(String),

    #[error("shield already active for user {0}")]
    ShieldAlreadyActive(String),

    #[error("emergency mode is active")]
    EmergencyActive,

    #[error("amount {amount} exceeds single-transaction limit {limit}")]
    ExceedsSingleTx { amount: Amount, limit: Amount },

    #[error("amount {amount} exceeds remaining daily allowance {remaining}")]
    ExceedsDaily { amount: Amount, remaining: Amount },

    #[error("amount {amount} exceeds remaining per-token daily allowance {remaining}")]
    ExceedsTokenDaily { amount: Amount, remaining: Amount },

    #[error("target {0} is not whitelisted")]
    NotWhitelisted(String),

    #[error("caller {0} is not an authorized executor")]
    NotAuthorized(String),

    #[error("no pending config update")]
    NoPendingConfigUpdate,

    #[error("config update timelock not expired (effective at {effective_at})")]
    ConfigTimelockNotExpired { effective_at: Timestamp },

    // ── Caveat errors (delegation-level denials) ─────────────────────────────
    #[error("caveat per-transaction cap exceeded: {amount} > {cap}")]
    CaveatPerTxExceeded { amount: Amount, cap: Amount },

    #[error("caveat daily cap exceeded: {amount} over remaining {remaining}")]
    CaveatDailyExceeded { amount: Amount, remaining: Amount },

    #[error("caveat lifetime cap exceeded: {amount} over remaining {remaining}")]
    CaveatLifetimeExceeded { amount: Amount, remaining: Amount },

    #[error("target {0} denied by allowed-targets caveat")]
    TargetDenied(String),

    #[error("calldata too short to carry a target address ({0} bytes)")]
    MalformedCalldata(usize),

    #[error("outside the permitted time window")]
    OutsideTimeBound,

    #[error("caveat execution count exhausted (max {max})")]
    CaveatExecutionsExhausted { max: u32 },

    // ── State errors (strategy lifecycle) ────────────────────────────────────
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("strategy is not active (status: {status})")]
    StrategyNotActive { status: String },

    #[error("strategy is not paused (status: {status})")]
    StrategyNotPaused { status: String },

    #[error("strategy already completed")]
    StrategyCompleted,

    #[error("strategy already cancelled")]
    StrategyAlreadyCancelled,

    #[error("execution too early (due at {due_at})")]
    ExecutionTooEarly { due_at: Timestamp },

    #[error("caller is not the strategy owner")]
    NotOwner,

    #[error("stop-loss trigger condition not met")]
    TriggerNotMet,

    #[error("trigger price can only be updated on fixed-price stop-losses")]
    TriggerNotUpdatable,

    #[error("rebalance not needed")]
    RebalanceNotNeeded,

    // ── Execution errors (adapter / oracle side) ─────────────────────────────
    #[error("slippage exceeded: received {received}, minimum {minimum}")]
    SlippageExceeded { received: Amount, minimum: Amount },

    #[error("swap deadline expired at {0}")]
    DeadlineExpired(Timestamp),

    #[error("swap failed: {0}")]
    SwapFailed(String),

    #[error("price oracle unavailable for token {0}")]
    OracleUnavailable(String),

    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: Amount, have: Amount },

    #[error("insufficient allowance: need {need}, granted {granted}")]
    InsufficientAllowance { need: Amount, granted: Amount },

    // ── Anomaly (advisory) ───────────────────────────────────────────────────
    #[error("price anomaly detected: realized {realized}, rolling average {average}")]
    PriceAnomalyDetected { realized: Price, average: Price },

    // ── Operator errors (emergency withdraw timelock) ────────────────────────
    #[error("no pending emergency withdraw proposal")]
    NoPendingProposal,

    #[error("emergency withdraw timelock not expired (executable at {execute_after})")]
    TimelockNotExpired { execute_after: Timestamp },

    #[error("caller is not the operator")]
    NotOperator,

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("missing required configuration key: {0}")]
    MissingConfig(&'static str),

    #[error("invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}
