//! ─── Aegis Protocol Constants ───────────────────────────────────────────────
//!
//! Bounds and defaults for the policy engine, the strategy families, the
//! anomaly guard, and the operator timelocks. Amounts are token base units,
//! prices are 18-fractional fixed-point, durations are seconds.

use crate::types::{Amount, Bps, Price, Timestamp};

// ── Fixed-point scales ───────────────────────────────────────────────────────

/// Scale of all prices and realized-price computations (18 fractional digits).
pub const PRICE_SCALE: Price = 1_000_000_000_000_000_000;

/// Basis-point denominator. 10_000 bps = 100%.
pub const BPS_DENOM: u128 = 10_000;

// ── Rolling day ──────────────────────────────────────────────────────────────

/// Width of the rolling spending-limit day bucket.
pub const DAY_SECS: Timestamp = 86_400;

// ── Shield (policy engine) ───────────────────────────────────────────────────

/// Minimum value accepted for both the daily and the single-transaction limit.
pub const MIN_SHIELD_LIMIT: Amount = 1_000_000;

/// Cooldown between proposing a shield config update and executing it.
pub const CONFIG_UPDATE_DELAY_SECS: Timestamp = 24 * 3600;

// ── Emergency withdraw (operator path) ───────────────────────────────────────

/// Delay between proposing an emergency withdraw and executing it.
pub const EMERGENCY_WITHDRAW_DELAY_SECS: Timestamp = 48 * 3600;

// ── DCA ──────────────────────────────────────────────────────────────────────

/// Minimum execution interval: 1 hour.
pub const DCA_MIN_INTERVAL_SECS: Timestamp = 3_600;

/// Maximum execution interval: 365 days.
pub const DCA_MAX_INTERVAL_SECS: Timestamp = 365 * 86_400;

/// Bounds on the total execution count of a single DCA strategy.
pub const DCA_MIN_EXECUTIONS: u32 = 1;
pub const DCA_MAX_EXECUTIONS: u32 = 1_000;

/// Protocol fee on DCA swaps, in basis points of `amount_per_execution`.
pub const DCA_DEFAULT_FEE_BPS: Bps = 30;
pub const DCA_MAX_FEE_BPS: Bps = 100;

// ── Stop-loss ────────────────────────────────────────────────────────────────

/// Percentage-kind trigger bounds: 1% to 50% below the creation price.
pub const STOP_LOSS_MIN_PCT_BPS: Bps = 100;
pub const STOP_LOSS_MAX_PCT_BPS: Bps = 5_000;

/// Trailing-distance bounds: 1% to 50% below the running peak.
pub const TRAILING_MIN_DISTANCE_BPS: Bps = 100;
pub const TRAILING_MAX_DISTANCE_BPS: Bps = 5_000;

// ── Rebalance ────────────────────────────────────────────────────────────────

/// Bounds on the number of portfolio allocations.
pub const REBALANCE_MIN_ALLOCATIONS: usize = 1;
pub const REBALANCE_MAX_ALLOCATIONS: usize = 10;

/// Target weights must sum to exactly this many basis points.
pub const REBALANCE_WEIGHT_SUM_BPS: Bps = 10_000;

// ── Subscription ─────────────────────────────────────────────────────────────

/// Protocol fee on subscription payments, in basis points.
pub const SUBSCRIPTION_DEFAULT_FEE_BPS: Bps = 50;
pub const SUBSCRIPTION_MAX_FEE_BPS: Bps = 200;

/// Billing period lengths. Monthly and yearly use the flat 30/365-day
/// convention; these exact values are part of the compatibility surface.
pub const BILLING_DAILY_SECS: Timestamp = 86_400;
pub const BILLING_WEEKLY_SECS: Timestamp = 7 * 86_400;
pub const BILLING_MONTHLY_SECS: Timestamp = 30 * 86_400;
pub const BILLING_QUARTERLY_SECS: Timestamp = 90 * 86_400;
pub const BILLING_YEARLY_SECS: Timestamp = 365 * 86_400;

// ── Anomaly guard ────────────────────────────────────────────────────────────

/// Deviation (bps) of realized price from the rolling average above which a
/// strategy auto-pauses. Exactly 20% does not trip; 20% + ε does.
pub const ANOMALY_THRESHOLD_BPS: u128 = 2_000;

/// EMA weights for the rolling average: avg ← (7·avg + 3·sample) / 10.
/// Truncating integer division; the rounding mode is part of the contract.
pub const EMA_KEEP_WEIGHT: u128 = 7;
pub const EMA_SAMPLE_WEIGHT: u128 = 3;
pub const EMA_WEIGHT_DENOM: u128 = 10;

// ── Keeper / execution ───────────────────────────────────────────────────────

/// Swap deadline offset: a submitted swap expires this many seconds after
/// submission. Expiry is a normal per-item failure.
pub const SWAP_DEADLINE_SECS: Timestamp = 300;

/// Default page size for due-work enumeration scans.
pub const DUE_WORK_PAGE_SIZE: usize = 50;

/// Default spacing between per-item submissions inside a keeper tick
/// (milliseconds). Absorbs adapter rate limits.
pub const KEEPER_SPACING_MS: u64 = 1_000;
