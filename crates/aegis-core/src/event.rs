//! Domain events.
//!
//! Every externally observable mutation emits exactly one [`EventKind`].
//! Engines produce bare kinds; the ingestion layer stamps the
//! `(block_number, log_index, tx_hash, timestamp)` envelope, and the
//! projection folds the stamped stream into the read model.
//!
//! Field ordering within each variant is fixed and part of the compatibility
//! surface — reordering fields is a wire-format break.

use serde::{Deserialize, Serialize};

use crate::types::{
    Address, Amount, BillingPeriod, PauseReason, Price, StopLossKind, StrategyId, Timestamp,
    TxHash,
};

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A stamped event: envelope plus payload. Total order is `(block, log_index)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: TxHash,
    pub timestamp: Timestamp,
    pub kind: EventKind,
}

// ── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    // ── Shield ───────────────────────────────────────────────────────────────
    ShieldActivated {
        user: Address,
        daily_limit: Amount,
        single_tx_limit: Amount,
    },
    ShieldConfigUpdated {
        user: Address,
        daily_limit: Amount,
        single_tx_limit: Amount,
    },
    ShieldDeactivated {
        user: Address,
    },
    EmergencyEnabled {
        user: Address,
    },
    EmergencyDisabled {
        user: Address,
    },
    SpendingRecorded {
        user: Address,
        token: Address,
        amount: Amount,
        new_daily_total: Amount,
    },
    ContractWhitelisted {
        user: Address,
        target: Address,
    },
    ContractUnwhitelisted {
        user: Address,
        target: Address,
    },
    WhitelistModeEnabled {
        user: Address,
    },
    WhitelistModeDisabled {
        user: Address,
    },
    ConfigUpdateProposed {
        user: Address,
        new_daily_limit: Amount,
        new_single_tx_limit: Amount,
        effective_at: Timestamp,
    },
    ConfigUpdateExecuted {
        user: Address,
        daily_limit: Amount,
        single_tx_limit: Amount,
    },
    ConfigUpdateCancelled {
        user: Address,
    },
    TokenLimitSet {
        user: Address,
        token: Address,
        daily_limit: Amount,
    },
    TokenLimitRemoved {
        user: Address,
        token: Address,
    },
    ExecutorAuthorized {
        executor: Address,
    },
    ExecutorRevoked {
        executor: Address,
    },
    ProtocolPauseSet {
        paused: bool,
    },

    // ── DCA ──────────────────────────────────────────────────────────────────
    DcaStrategyCreated {
        id: StrategyId,
        owner: Address,
        source_token: Address,
        target_token: Address,
        amount_per_execution: Amount,
        interval_s: Timestamp,
        total_executions: u32,
    },
    DcaExecuted {
        id: StrategyId,
        owner: Address,
        execution_index: u32,
        amount_in: Amount,
        fee: Amount,
        amount_out: Amount,
        realized_price: Price,
    },
    DcaStrategyPaused {
        id: StrategyId,
        reason: PauseReason,
    },
    DcaStrategyResumed {
        id: StrategyId,
    },
    DcaStrategyCancelled {
        id: StrategyId,
    },
    DcaStrategyCompleted {
        id: StrategyId,
    },
    DcaStrategyUpdated {
        id: StrategyId,
        amount_per_execution: Amount,
        min_amount_out: Amount,
    },
    DcaAutoPaused {
        id: StrategyId,
        rolling_avg_price: Price,
        realized_price: Price,
        deviation_bps: u128,
    },

    // ── Stop-loss ────────────────────────────────────────────────────────────
    StopLossCreated {
        id: StrategyId,
        owner: Address,
        token_to_sell: Address,
        token_to_receive: Address,
        amount: Amount,
        kind: StopLossKind,
        trigger_price: Price,
    },
    StopLossTriggered {
        id: StrategyId,
        trigger_price: Price,
        current_price: Price,
    },
    StopLossExecuted {
        id: StrategyId,
        amount_in: Amount,
        amount_out: Amount,
    },
    StopLossUpdated {
        id: StrategyId,
        trigger_price: Price,
        min_amount_out: Amount,
    },
    StopLossPaused {
        id: StrategyId,
    },
    StopLossResumed {
        id: StrategyId,
    },
    StopLossCancelled {
        id: StrategyId,
    },
    HighestPriceUpdated {
        id: StrategyId,
        highest_price: Price,
        trigger_price: Price,
    },

    // ── Rebalance ────────────────────────────────────────────────────────────
    RebalanceCreated {
        id: StrategyId,
        owner: Address,
        allocations: Vec<(Address, u32)>,
        threshold_bps: u32,
        min_interval_s: Timestamp,
    },
    RebalanceExecuted {
        id: StrategyId,
        legs_executed: u32,
        total_value: Amount,
    },
    RebalancePaused {
        id: StrategyId,
    },
    RebalanceResumed {
        id: StrategyId,
    },
    RebalanceCancelled {
        id: StrategyId,
    },
    RebalanceAllocationUpdated {
        id: StrategyId,
        allocations: Vec<(Address, u32)>,
    },
    RebalanceThresholdUpdated {
        id: StrategyId,
        threshold_bps: u32,
    },

    // ── Subscription ─────────────────────────────────────────────────────────
    SubscriptionCreated {
        id: StrategyId,
        subscriber: Address,
        recipient: Address,
        token: Address,
        amount: Amount,
        billing_period: BillingPeriod,
        max_payments: u32,
    },
    SubscriptionPaymentExecuted {
        id: StrategyId,
        payment_index: u32,
        amount: Amount,
        fee: Amount,
    },
    SubscriptionPaused {
        id: StrategyId,
    },
    SubscriptionResumed {
        id: StrategyId,
    },
    SubscriptionCancelled {
        id: StrategyId,
    },
    SubscriptionExpired {
        id: StrategyId,
    },
    SubscriptionAmountUpdated {
        id: StrategyId,
        amount: Amount,
    },

    // ── Emergency withdraw (operator path) ───────────────────────────────────
    EmergencyWithdrawProposed {
        token: Address,
        to: Address,
        amount: Amount,
        execute_after: Timestamp,
    },
    EmergencyWithdrawExecuted {
        token: Address,
        to: Address,
        amount: Amount,
    },
    EmergencyWithdrawCancelled,
}

impl EventKind {
    /// Stable wire name of this event, used for activity-log rows and
    /// observability. Not derived from the Rust identifier.
    pub fn name(&self) -> &'static str {
        use EventKind::*;
        match self {
            ShieldActivated { .. } => "ShieldActivated",
            ShieldConfigUpdated { .. } => "ShieldConfigUpdated",
            ShieldDeactivated { .. } => "ShieldDeactivated",
            EmergencyEnabled { .. } => "EmergencyEnabled",
            EmergencyDisabled { .. } => "EmergencyDisabled",
            SpendingRecorded { .. } => "SpendingRecorded",
            ContractWhitelisted { .. } => "ContractWhitelisted",
            ContractUnwhitelisted { .. } => "ContractUnwhitelisted",
            WhitelistModeEnabled { .. } => "WhitelistModeEnabled",
            WhitelistModeDisabled { .. } => "WhitelistModeDisabled",
            ConfigUpdateProposed { .. } => "ConfigUpdateProposed",
            ConfigUpdateExecuted { .. } => "ConfigUpdateExecuted",
            ConfigUpdateCancelled { .. } => "ConfigUpdateCancelled",
            TokenLimitSet { .. } => "TokenLimitSet",
            TokenLimitRemoved { .. } => "TokenLimitRemoved",
            ExecutorAuthorized { .. } => "ExecutorAuthorized",
            ExecutorRevoked { .. } => "ExecutorRevoked",
            ProtocolPauseSet { .. } => "ProtocolPauseSet",
            DcaStrategyCreated { .. } => "DCAStrategyCreated",
            DcaExecuted { .. } => "DCAExecuted",
            DcaStrategyPaused { .. } => "DCAStrategyPaused",
            DcaStrategyResumed { .. } => "DCAStrategyResumed",
            DcaStrategyCancelled { .. } => "DCAStrategyCancelled",
            DcaStrategyCompleted { .. } => "DCAStrategyCompleted",
            DcaStrategyUpdated { .. } => "DCAStrategyUpdated",
            DcaAutoPaused { .. } => "DCAAutoPaused",
            StopLossCreated { .. } => "StopLossCreated",
            StopLossTriggered { .. } => "StopLossTriggered",
            StopLossExecuted { .. } => "StopLossExecuted",
            StopLossUpdated { .. } => "StopLossUpdated",
            StopLossPaused { .. } => "StopLossPaused",
            StopLossResumed { .. } => "StopLossResumed",
            StopLossCancelled { .. } => "StopLossCancelled",
            HighestPriceUpdated { .. } => "HighestPriceUpdated",
            RebalanceCreated { .. } => "RebalanceCreated",
            RebalanceExecuted { .. } => "RebalanceExecuted",
            RebalancePaused { .. } => "RebalancePaused",
            RebalanceResumed { .. } => "RebalanceResumed",
            RebalanceCancelled { .. } => "RebalanceCancelled",
            RebalanceAllocationUpdated { .. } => "RebalanceAllocationUpdated",
            RebalanceThresholdUpdated { .. } => "RebalanceThresholdUpdated",
            SubscriptionCreated { .. } => "SubscriptionCreated",
            SubscriptionPaymentExecuted { .. } => "SubscriptionPaymentExecuted",
            SubscriptionPaused { .. } => "SubscriptionPaused",
            SubscriptionResumed { .. } => "SubscriptionResumed",
            SubscriptionCancelled { .. } => "SubscriptionCancelled",
            SubscriptionExpired { .. } => "SubscriptionExpired",
            SubscriptionAmountUpdated { .. } => "SubscriptionAmountUpdated",
            EmergencyWithdrawProposed { .. } => "EmergencyWithdrawProposed",
            EmergencyWithdrawExecuted { .. } => "EmergencyWithdrawExecuted",
            EmergencyWithdrawCancelled => "EmergencyWithdrawCancelled",
        }
    }

    /// The user principal this event concerns, if any. Drives user upserts in
    /// the projection.
    pub fn principal_user(&self) -> Option<Address> {
        use EventKind::*;
        match self {
            ShieldActivated { user, .. }
            | ShieldConfigUpdated { user, .. }
            | ShieldDeactivated { user }
            | EmergencyEnabled { user }
            | EmergencyDisabled { user }
            | SpendingRecorded { user, .. }
            | ContractWhitelisted { user, .. }
            | ContractUnwhitelisted { user, .. }
            | WhitelistModeEnabled { user }
            | WhitelistModeDisabled { user }
            | ConfigUpdateProposed { user, .. }
            | ConfigUpdateExecuted { user, .. }
            | ConfigUpdateCancelled { user }
            | TokenLimitSet { user, .. }
            | TokenLimitRemoved { user, .. } => Some(*user),
            DcaStrategyCreated { owner, .. }
            | DcaExecuted { owner, .. }
            | StopLossCreated { owner, .. }
            | RebalanceCreated { owner, .. } => Some(*owner),
            SubscriptionCreated { subscriber, .. } => Some(*subscriber),
            _ => None,
        }
    }
}
