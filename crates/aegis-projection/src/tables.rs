//! Read-model row types.
//!
//! One struct per projection table. Primary keys are the natural entity key
//! (address, strategy id) or `(tx_hash, log_index)` for append-only rows.
//! Rows are bincode-encoded; the encoding is part of the determinism
//! contract (re-folding must reproduce byte-equal rows).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use aegis_core::types::{
    Address, Amount, BillingPeriod, Price, StopLossKind, StrategyId, StrategyStatus, Timestamp,
    TxHash,
};

// ── Users & shields ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub address: Address,
    pub total_invested: Amount,
    pub total_received: Amount,
    pub execution_count: u64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

impl UserRow {
    pub fn new(address: Address, now: Timestamp) -> Self {
        Self {
            address,
            total_invested: 0,
            total_received: 0,
            execution_count: 0,
            first_seen: now,
            last_seen: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldRow {
    pub user: Address,
    pub daily_limit: Amount,
    pub single_tx_limit: Amount,
    pub spent_today: Amount,
    pub is_active: bool,
    pub emergency_mode: bool,
    pub whitelist_enabled: bool,
    /// token → per-token daily limit.
    pub token_limits: BTreeMap<Address, Amount>,
    pub pending_daily_limit: Option<Amount>,
    pub pending_single_tx_limit: Option<Amount>,
    pub pending_effective_at: Option<Timestamp>,
    pub activated_at: Timestamp,
}

// ── DCA ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcaStrategyRow {
    pub id: StrategyId,
    pub owner: Address,
    pub status: StrategyStatus,
    pub source_token: Address,
    pub target_token: Address,
    pub amount_per_execution: Amount,
    pub min_amount_out: Amount,
    pub interval_s: Timestamp,
    pub total_executions: u32,
    pub executions_completed: u32,
    pub total_invested: Amount,
    pub total_received: Amount,
    pub last_price: Price,
    pub rolling_avg_price: Price,
    /// Volume-weighted average price: total_invested · 10^18 / total_received.
    pub average_price: Price,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcaExecutionRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub strategy_id: StrategyId,
    pub execution_index: u32,
    pub amount_in: Amount,
    pub fee: Amount,
    pub amount_out: Amount,
    pub realized_price: Price,
    pub block_number: u64,
    pub timestamp: Timestamp,
}

// ── Stop-loss ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLossRow {
    pub id: StrategyId,
    pub owner: Address,
    pub status: StrategyStatus,
    pub token_to_sell: Address,
    pub token_to_receive: Address,
    pub amount: Amount,
    pub kind: StopLossKind,
    pub trigger_price: Price,
    pub highest_price: Price,
    pub min_amount_out: Amount,
    pub triggered_at: Option<Timestamp>,
    pub executed_at: Option<Timestamp>,
    pub executed_amount: Amount,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLossExecutionRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub strategy_id: StrategyId,
    pub amount_in: Amount,
    pub amount_out: Amount,
    pub block_number: u64,
    pub timestamp: Timestamp,
}

// ── Rebalance ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceRow {
    pub id: StrategyId,
    pub owner: Address,
    pub status: StrategyStatus,
    pub allocations: Vec<(Address, u32)>,
    pub threshold_bps: u32,
    pub min_interval_s: Timestamp,
    pub last_rebalance_time: Timestamp,
    pub total_rebalances: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One row per (strategy, allocation slot); key is `strategy_id ‖ index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceAllocationRow {
    pub strategy_id: StrategyId,
    pub index: u32,
    pub token: Address,
    pub target_weight_bps: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceExecutionRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub strategy_id: StrategyId,
    pub legs_executed: u32,
    pub total_value: Amount,
    pub block_number: u64,
    pub timestamp: Timestamp,
}

// ── Subscriptions ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub id: StrategyId,
    pub subscriber: Address,
    pub recipient: Address,
    pub status: StrategyStatus,
    pub token: Address,
    pub amount: Amount,
    pub billing_period: BillingPeriod,
    pub max_payments: u32,
    pub payments_completed: u32,
    pub total_paid: Amount,
    pub cancelled_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub subscription_id: StrategyId,
    pub payment_index: u32,
    pub amount: Amount,
    pub fee: Amount,
    pub block_number: u64,
    pub timestamp: Timestamp,
}

// ── Cross-cutting tables ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRow {
    pub address: Address,
    pub spend_volume: Amount,
    pub spend_count: u64,
    pub first_seen: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistedContractRow {
    pub user: Address,
    pub target: Address,
    pub active: bool,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingRecordRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub user: Address,
    pub token: Address,
    pub amount: Amount,
    pub new_daily_total: Amount,
    pub block_number: u64,
    pub timestamp: Timestamp,
}

/// Append-only audit row, one per folded event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRow {
    pub tx_hash: TxHash,
    pub log_index: u32,
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub event_name: String,
    pub user: Option<Address>,
}

/// Per-user per-calendar-day aggregates; key is `user ‖ YYYY-MM-DD`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStatsRow {
    pub user: Address,
    pub date: String,
    pub spend_volume: Amount,
    pub spend_count: u64,
    pub executions: u64,
}

// ── Global stats ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyStats {
    pub strategies_created: u64,
    pub executions: u64,
    pub volume: Amount,
}

/// Singleton monotonic aggregates, advanced exactly once per domain event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_users: u64,
    pub total_spend_volume: Amount,
    pub spending_records: u64,
    pub dca: FamilyStats,
    pub stop_loss: FamilyStats,
    pub rebalance: FamilyStats,
    pub subscription: FamilyStats,
}
