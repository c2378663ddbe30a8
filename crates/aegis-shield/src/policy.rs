//! Per-user spending policy.
//!
//! A [`Shield`] is a user's standing protection record: daily and
//! single-transaction caps, optional per-token caps, an optional target
//! whitelist, and an emergency freeze. Spending counters live in rolling 24h
//! buckets that reset lazily; there are no background jobs.
//!
//! [`ShieldBook`] is the single-writer facade over every shield. All
//! spending flows through [`ShieldBook::record_spending`], which either
//! mutates and emits [`EventKind::SpendingRecorded`] or fails with a precise
//! policy error — never both, never neither.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use aegis_core::constants::{CONFIG_UPDATE_DELAY_SECS, DAY_SECS, MIN_SHIELD_LIMIT};
use aegis_core::error::AegisError;
use aegis_core::event::EventKind;
use aegis_core::types::{Address, Amount, Timestamp};

// ── Rolling buckets ──────────────────────────────────────────────────────────

/// A per-token daily cap with its own independent rolling day bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    pub daily_limit: Amount,
    pub spent_today: Amount,
    pub day_epoch_start: Timestamp,
}

impl TokenBucket {
    fn new(daily_limit: Amount, now: Timestamp) -> Self {
        Self {
            daily_limit,
            spent_today: 0,
            day_epoch_start: now,
        }
    }

    /// Lazily close the day bucket: at `day_epoch_start + 86400` the counter
    /// resets and the anchor advances to `now`.
    fn roll(&mut self, now: Timestamp) {
        if now >= self.day_epoch_start + DAY_SECS {
            self.spent_today = 0;
            self.day_epoch_start = now;
        }
    }

    /// Remaining allowance as of `now`, without mutating the bucket.
    fn remaining(&self, now: Timestamp) -> Amount {
        if now >= self.day_epoch_start + DAY_SECS {
            self.daily_limit
        } else {
            self.daily_limit.saturating_sub(self.spent_today)
        }
    }
}

/// A two-phase limit change awaiting its cooldown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfigUpdate {
    pub new_daily_limit: Amount,
    pub new_single_tx_limit: Amount,
    pub proposed_at: Timestamp,
    pub effective_at: Timestamp,
}

// ── Shield ───────────────────────────────────────────────────────────────────

/// One user's policy record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shield {
    pub owner: Address,
    pub daily_limit: Amount,
    pub single_tx_limit: Amount,
    pub spent_today: Amount,
    pub day_epoch_start: Timestamp,
    pub is_active: bool,
    pub emergency_mode: bool,
    pub whitelist_enabled: bool,
    pub whitelist: BTreeSet<Address>,
    pub token_limits: BTreeMap<Address, TokenBucket>,
    pub pending_config_update: Option<PendingConfigUpdate>,
}

impl Shield {
    fn new(owner: Address, daily_limit: Amount, single_tx_limit: Amount, now: Timestamp) -> Self {
        Self {
            owner,
            daily_limit,
            single_tx_limit,
            spent_today: 0,
            day_epoch_start: now,
            is_active: true,
            emergency_mode: false,
            whitelist_enabled: false,
            whitelist: BTreeSet::new(),
            token_limits: BTreeMap::new(),
            pending_config_update: None,
        }
    }

    fn roll_day(&mut self, now: Timestamp) {
        if now >= self.day_epoch_start + DAY_SECS {
            self.spent_today = 0;
            self.day_epoch_start = now;
        }
    }

    /// Remaining global daily allowance as of `now` (view, no mutation).
    fn remaining_global(&self, now: Timestamp) -> Amount {
        if now >= self.day_epoch_start + DAY_SECS {
            self.daily_limit
        } else {
            self.daily_limit.saturating_sub(self.spent_today)
        }
    }
}

/// Both limits must clear the protocol minimum, and the per-transaction cap
/// can never exceed the daily cap.
fn validate_limits(daily_limit: Amount, single_tx_limit: Amount) -> Result<(), AegisError> {
    if daily_limit < MIN_SHIELD_LIMIT {
        return Err(AegisError::LimitBelowMinimum {
            got: daily_limit,
            min: MIN_SHIELD_LIMIT,
        });
    }
    if single_tx_limit < MIN_SHIELD_LIMIT {
        return Err(AegisError::LimitBelowMinimum {
            got: single_tx_limit,
            min: MIN_SHIELD_LIMIT,
        });
    }
    if single_tx_limit > daily_limit {
        return Err(AegisError::SingleTxAboveDaily {
            single_tx: single_tx_limit,
            daily: daily_limit,
        });
    }
    Ok(())
}

// ── ShieldBook ───────────────────────────────────────────────────────────────

/// Single-writer facade over every user's shield, the executor ACL, and the
/// protocol-wide pause flag.
pub struct ShieldBook {
    operator: Address,
    protocol_paused: bool,
    authorized: BTreeSet<Address>,
    shields: BTreeMap<Address, Shield>,
    /// Spend events not yet drained by the ingestion layer. Kept on the book
    /// rather than returned so an execution that fails after the spend still
    /// surfaces the event: the counter move and the emission are one unit.
    journal: Vec<EventKind>,
}

impl ShieldBook {
    pub fn new(operator: Address) -> Self {
        Self {
            operator,
            protocol_paused: false,
            authorized: BTreeSet::new(),
            shields: BTreeMap::new(),
            journal: Vec::new(),
        }
    }

    /// Drain spend events recorded since the last drain, in order.
    pub fn take_events(&mut self) -> Vec<EventKind> {
        std::mem::take(&mut self.journal)
    }

    pub fn operator(&self) -> Address {
        self.operator
    }

    pub fn is_protocol_paused(&self) -> bool {
        self.protocol_paused
    }

    /// Snapshot of a user's shield for readers outside the write path.
    pub fn snapshot(&self, user: Address) -> Option<Shield> {
        self.shields.get(&user).cloned()
    }

    fn shield_mut(&mut self, user: Address) -> Result<&mut Shield, AegisError> {
        self.shields
            .get_mut(&user)
            .ok_or_else(|| AegisError::ShieldNotActive(user.to_hex()))
    }

    fn active_shield_mut(&mut self, user: Address) -> Result<&mut Shield, AegisError> {
        let shield = self.shield_mut(user)?;
        if !shield.is_active {
            return Err(AegisError::ShieldNotActive(shield.owner.to_hex()));
        }
        Ok(shield)
    }

    // ── Operator surface ─────────────────────────────────────────────────────

    fn require_operator(&self, caller: Address) -> Result<(), AegisError> {
        if caller != self.operator {
            return Err(AegisError::NotOperator);
        }
        Ok(())
    }

    pub fn authorize_executor(
        &mut self,
        caller: Address,
        executor: Address,
    ) -> Result<Vec<EventKind>, AegisError> {
        self.require_operator(caller)?;
        if self.authorized.insert(executor) {
            Ok(vec![EventKind::ExecutorAuthorized { executor }])
        } else {
            Ok(vec![])
        }
    }

    pub fn revoke_executor(
        &mut self,
        caller: Address,
        executor: Address,
    ) -> Result<Vec<EventKind>, AegisError> {
        self.require_operator(caller)?;
        if self.authorized.remove(&executor) {
            Ok(vec![EventKind::ExecutorRevoked { executor }])
        } else {
            Ok(vec![])
        }
    }

    pub fn set_protocol_paused(
        &mut self,
        caller: Address,
        paused: bool,
    ) -> Result<Vec<EventKind>, AegisError> {
        self.require_operator(caller)?;
        if self.protocol_paused == paused {
            return Ok(vec![]);
        }
        self.protocol_paused = paused;
        Ok(vec![EventKind::ProtocolPauseSet { paused }])
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn activate(
        &mut self,
        user: Address,
        daily_limit: Amount,
        single_tx_limit: Amount,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        validate_limits(daily_limit, single_tx_limit)?;
        match self.shields.get_mut(&user) {
            Some(existing) if existing.is_active => {
                return Err(AegisError::ShieldAlreadyActive(user.to_hex()))
            }
            Some(existing) => {
                // Re-activation after a deactivate: fresh counters, fresh config.
                *existing = Shield::new(user, daily_limit, single_tx_limit, now);
            }
            None => {
                self.shields
                    .insert(user, Shield::new(user, daily_limit, single_tx_limit, now));
            }
        }
        info!(user = %user, daily_limit, single_tx_limit, "shield activated");
        Ok(vec![EventKind::ShieldActivated {
            user,
            daily_limit,
            single_tx_limit,
        }])
    }

    pub fn deactivate(&mut self, user: Address) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.active_shield_mut(user)?;
        shield.is_active = false;
        Ok(vec![EventKind::ShieldDeactivated { user }])
    }

    // ── Timelocked config updates ────────────────────────────────────────────

    pub fn propose_config_update(
        &mut self,
        user: Address,
        new_daily_limit: Amount,
        new_single_tx_limit: Amount,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        validate_limits(new_daily_limit, new_single_tx_limit)?;
        let shield = self.active_shield_mut(user)?;
        if shield.emergency_mode {
            return Err(AegisError::EmergencyActive);
        }
        let effective_at = now + CONFIG_UPDATE_DELAY_SECS;
        // A new proposal overwrites any pending one.
        shield.pending_config_update = Some(PendingConfigUpdate {
            new_daily_limit,
            new_single_tx_limit,
            proposed_at: now,
            effective_at,
        });
        Ok(vec![EventKind::ConfigUpdateProposed {
            user,
            new_daily_limit,
            new_single_tx_limit,
            effective_at,
        }])
    }

    pub fn execute_config_update(
        &mut self,
        user: Address,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.active_shield_mut(user)?;
        let pending = shield
            .pending_config_update
            .clone()
            .ok_or(AegisError::NoPendingConfigUpdate)?;
        if now < pending.effective_at {
            return Err(AegisError::ConfigTimelockNotExpired {
                effective_at: pending.effective_at,
            });
        }
        shield.daily_limit = pending.new_daily_limit;
        shield.single_tx_limit = pending.new_single_tx_limit;
        shield.pending_config_update = None;
        info!(user = %user, daily_limit = pending.new_daily_limit, "shield config update executed");
        Ok(vec![
            EventKind::ConfigUpdateExecuted {
                user,
                daily_limit: pending.new_daily_limit,
                single_tx_limit: pending.new_single_tx_limit,
            },
            EventKind::ShieldConfigUpdated {
                user,
                daily_limit: pending.new_daily_limit,
                single_tx_limit: pending.new_single_tx_limit,
            },
        ])
    }

    pub fn cancel_config_update(&mut self, user: Address) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.active_shield_mut(user)?;
        if shield.pending_config_update.take().is_none() {
            return Err(AegisError::NoPendingConfigUpdate);
        }
        Ok(vec![EventKind::ConfigUpdateCancelled { user }])
    }

    // ── Emergency freeze ─────────────────────────────────────────────────────

    pub fn enable_emergency(&mut self, user: Address) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.shield_mut(user)?;
        if shield.emergency_mode {
            return Ok(vec![]);
        }
        shield.emergency_mode = true;
        info!(user = %user, "emergency mode enabled");
        Ok(vec![EventKind::EmergencyEnabled { user }])
    }

    pub fn disable_emergency(&mut self, user: Address) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.shield_mut(user)?;
        if !shield.emergency_mode {
            return Ok(vec![]);
        }
        shield.emergency_mode = false;
        Ok(vec![EventKind::EmergencyDisabled { user }])
    }

    // ── Whitelist ────────────────────────────────────────────────────────────

    pub fn enable_whitelist_mode(&mut self, user: Address) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.active_shield_mut(user)?;
        if shield.whitelist_enabled {
            return Ok(vec![]);
        }
        shield.whitelist_enabled = true;
        Ok(vec![EventKind::WhitelistModeEnabled { user }])
    }

    pub fn disable_whitelist_mode(&mut self, user: Address) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.active_shield_mut(user)?;
        if !shield.whitelist_enabled {
            return Ok(vec![]);
        }
        shield.whitelist_enabled = false;
        Ok(vec![EventKind::WhitelistModeDisabled { user }])
    }

    pub fn add_whitelist(
        &mut self,
        user: Address,
        target: Address,
    ) -> Result<Vec<EventKind>, AegisError> {
        if target.is_zero() {
            return Err(AegisError::ZeroAddress);
        }
        let shield = self.active_shield_mut(user)?;
        if shield.whitelist.insert(target) {
            Ok(vec![EventKind::ContractWhitelisted { user, target }])
        } else {
            Ok(vec![])
        }
    }

    pub fn remove_whitelist(
        &mut self,
        user: Address,
        target: Address,
    ) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.active_shield_mut(user)?;
        if shield.whitelist.remove(&target) {
            Ok(vec![EventKind::ContractUnwhitelisted { user, target }])
        } else {
            Ok(vec![])
        }
    }

    /// Whitelist enforcement point, applied when a candidate action is
    /// constructed (not inside `record_spending`).
    pub fn check_target(&self, user: Address, target: Address) -> Result<(), AegisError> {
        let shield = self
            .shields
            .get(&user)
            .ok_or_else(|| AegisError::ShieldNotActive(user.to_hex()))?;
        if shield.whitelist_enabled && !shield.whitelist.contains(&target) {
            return Err(AegisError::NotWhitelisted(target.to_hex()));
        }
        Ok(())
    }

    // ── Per-token limits ─────────────────────────────────────────────────────

    pub fn set_token_limit(
        &mut self,
        user: Address,
        token: Address,
        daily_limit: Amount,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        if daily_limit == 0 {
            return Err(AegisError::ZeroAmount);
        }
        let shield = self.active_shield_mut(user)?;
        shield
            .token_limits
            .entry(token)
            .and_modify(|b| b.daily_limit = daily_limit)
            .or_insert_with(|| TokenBucket::new(daily_limit, now));
        Ok(vec![EventKind::TokenLimitSet {
            user,
            token,
            daily_limit,
        }])
    }

    pub fn remove_token_limit(
        &mut self,
        user: Address,
        token: Address,
    ) -> Result<Vec<EventKind>, AegisError> {
        let shield = self.active_shield_mut(user)?;
        if shield.token_limits.remove(&token).is_some() {
            Ok(vec![EventKind::TokenLimitRemoved { user, token }])
        } else {
            Ok(vec![])
        }
    }

    // ── Spending ─────────────────────────────────────────────────────────────

    /// Record a spend against the user's shield. Authorized executors only.
    ///
    /// The check ordering is normative — it determines which error kind a
    /// caller observes:
    ///   protocol pause → shield active → emergency → day rollover →
    ///   single-tx cap → daily cap → per-token daily cap → apply.
    ///
    /// All-or-nothing: an accepted call advances every counter and journals
    /// [`EventKind::SpendingRecorded`] (drained via [`Self::take_events`]);
    /// a rejected call mutates nothing beyond the lazy day rollover.
    pub fn record_spending(
        &mut self,
        caller: Address,
        user: Address,
        token: Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), AegisError> {
        if !self.authorized.contains(&caller) {
            return Err(AegisError::NotAuthorized(caller.to_hex()));
        }
        if amount == 0 {
            return Err(AegisError::ZeroAmount);
        }
        if self.protocol_paused {
            return Err(AegisError::ProtocolPaused);
        }
        let shield = self.shield_mut(user)?;
        if !shield.is_active {
            return Err(AegisError::ShieldNotActive(user.to_hex()));
        }
        if shield.emergency_mode {
            return Err(AegisError::EmergencyActive);
        }

        shield.roll_day(now);
        if let Some(bucket) = shield.token_limits.get_mut(&token) {
            bucket.roll(now);
        }

        if amount > shield.single_tx_limit {
            return Err(AegisError::ExceedsSingleTx {
                amount,
                limit: shield.single_tx_limit,
            });
        }
        if shield.spent_today + amount > shield.daily_limit {
            return Err(AegisError::ExceedsDaily {
                amount,
                remaining: shield.daily_limit - shield.spent_today,
            });
        }
        if let Some(bucket) = shield.token_limits.get(&token) {
            if bucket.spent_today + amount > bucket.daily_limit {
                return Err(AegisError::ExceedsTokenDaily {
                    amount,
                    remaining: bucket.daily_limit - bucket.spent_today,
                });
            }
        }

        shield.spent_today += amount;
        if let Some(bucket) = shield.token_limits.get_mut(&token) {
            bucket.spent_today += amount;
        }
        let new_daily_total = shield.spent_today;
        info!(user = %user, token = %token, amount, new_daily_total, "spending recorded");
        self.journal.push(EventKind::SpendingRecorded {
            user,
            token,
            amount,
            new_daily_total,
        });
        Ok(())
    }

    /// Pure dry-run mirror of [`Self::record_spending`]: same ordering, same
    /// error kinds, no mutation (day rollovers are evaluated virtually).
    pub fn check_spending_allowed(
        &self,
        caller: Address,
        user: Address,
        token: Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), AegisError> {
        if !self.authorized.contains(&caller) {
            return Err(AegisError::NotAuthorized(caller.to_hex()));
        }
        if amount == 0 {
            return Err(AegisError::ZeroAmount);
        }
        if self.protocol_paused {
            return Err(AegisError::ProtocolPaused);
        }
        let shield = self
            .shields
            .get(&user)
            .ok_or_else(|| AegisError::ShieldNotActive(user.to_hex()))?;
        if !shield.is_active {
            return Err(AegisError::ShieldNotActive(user.to_hex()));
        }
        if shield.emergency_mode {
            return Err(AegisError::EmergencyActive);
        }
        if amount > shield.single_tx_limit {
            return Err(AegisError::ExceedsSingleTx {
                amount,
                limit: shield.single_tx_limit,
            });
        }
        let remaining = shield.remaining_global(now);
        if amount > remaining {
            return Err(AegisError::ExceedsDaily { amount, remaining });
        }
        if let Some(bucket) = shield.token_limits.get(&token) {
            let remaining = bucket.remaining(now);
            if amount > remaining {
                return Err(AegisError::ExceedsTokenDaily { amount, remaining });
            }
        }
        Ok(())
    }

    /// Remaining daily allowance for (`user`, `token`) as of `now`. The
    /// effective cap is the minimum of the global and per-token buckets,
    /// each with its rolling reset applied virtually.
    pub fn remaining_daily(&self, user: Address, token: Address, now: Timestamp) -> Amount {
        let Some(shield) = self.shields.get(&user) else {
            return 0;
        };
        if !shield.is_active || shield.emergency_mode {
            return 0;
        }
        let global = shield.remaining_global(now);
        match shield.token_limits.get(&token) {
            Some(bucket) => global.min(bucket.remaining(now)),
            None => global,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Timestamp = 1_700_000_000;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    /// Book with one authorized executor and one active shield.
    fn setup(daily: Amount, single: Amount) -> (ShieldBook, Address, Address, Address) {
        let operator = addr(0xFF);
        let executor = addr(0xE0);
        let user = addr(1);
        let mut book = ShieldBook::new(operator);
        book.authorize_executor(operator, executor).unwrap();
        book.activate(user, daily, single, T0).unwrap();
        (book, executor, user, addr(0xA0))
    }

    #[test]
    fn activate_validates_limits() {
        let mut book = ShieldBook::new(addr(0xFF));
        let user = addr(1);
        assert!(matches!(
            book.activate(user, 500, 500, T0),
            Err(AegisError::LimitBelowMinimum { .. })
        ));
        assert!(matches!(
            book.activate(user, 1_000_000, 2_000_000, T0),
            Err(AegisError::SingleTxAboveDaily { .. })
        ));
        book.activate(user, 2_000_000, 1_000_000, T0).unwrap();
        assert!(matches!(
            book.activate(user, 2_000_000, 1_000_000, T0),
            Err(AegisError::ShieldAlreadyActive(_))
        ));
    }

    #[test]
    fn record_spending_requires_authorization() {
        let (mut book, _executor, user, token) = setup(1_000_000_000, 100_000_000);
        let stranger = addr(0x99);
        assert!(matches!(
            book.record_spending(stranger, user, token, 1_000_000, T0),
            Err(AegisError::NotAuthorized(_))
        ));
    }

    #[test]
    fn daily_limit_gate_scenario() {
        // daily = 1000e6, single_tx = 100e6.
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);

        for _ in 0..10 {
            book.record_spending(executor, user, usdc, 100_000_000, T0)
                .unwrap();
        }
        assert_eq!(book.snapshot(user).unwrap().spent_today, 1_000_000_000);

        // The 11th spend of even 1e6 must fail with zero remaining.
        assert_eq!(
            book.record_spending(executor, user, usdc, 1_000_000, T0)
                .unwrap_err(),
            AegisError::ExceedsDaily {
                amount: 1_000_000,
                remaining: 0
            }
        );

        // A day later the bucket resets.
        let later = T0 + DAY_SECS;
        book.record_spending(executor, user, usdc, 100_000_000, later)
            .unwrap();
        assert_eq!(book.snapshot(user).unwrap().spent_today, 100_000_000);
    }

    #[test]
    fn day_rollover_boundary() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 1_000_000_000);
        book.record_spending(executor, user, usdc, 900_000_000, T0)
            .unwrap();

        // One second before the boundary the old bucket still applies.
        let boundary = T0 + DAY_SECS;
        assert!(matches!(
            book.record_spending(executor, user, usdc, 200_000_000, boundary - 1),
            Err(AegisError::ExceedsDaily { .. })
        ));

        // At the boundary the counter resets and the spend lands in a fresh
        // bucket: remaining = daily_limit - amount.
        book.record_spending(executor, user, usdc, 200_000_000, boundary)
            .unwrap();
        let shield = book.snapshot(user).unwrap();
        assert_eq!(shield.spent_today, 200_000_000);
        assert_eq!(shield.day_epoch_start, boundary);
        assert_eq!(book.remaining_daily(user, usdc, boundary), 800_000_000);
    }

    #[test]
    fn single_tx_cap_checked_before_daily() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        assert!(matches!(
            book.record_spending(executor, user, usdc, 100_000_001, T0),
            Err(AegisError::ExceedsSingleTx { .. })
        ));
    }

    #[test]
    fn per_token_limit_is_an_additional_bound() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 500_000_000);
        book.set_token_limit(user, usdc, 150_000_000, T0).unwrap();

        assert_eq!(book.remaining_daily(user, usdc, T0), 150_000_000);
        book.record_spending(executor, user, usdc, 100_000_000, T0)
            .unwrap();
        assert_eq!(
            book.record_spending(executor, user, usdc, 100_000_000, T0)
                .unwrap_err(),
            AegisError::ExceedsTokenDaily {
                amount: 100_000_000,
                remaining: 50_000_000
            }
        );

        // Another token only sees the global bound.
        let weth = addr(0xB0);
        book.record_spending(executor, user, weth, 400_000_000, T0)
            .unwrap();
        assert_eq!(book.remaining_daily(user, weth, T0), 500_000_000);
    }

    #[test]
    fn token_bucket_rolls_independently() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 500_000_000);
        book.set_token_limit(user, usdc, 200_000_000, T0).unwrap();
        book.record_spending(executor, user, usdc, 200_000_000, T0)
            .unwrap();

        let later = T0 + DAY_SECS;
        book.record_spending(executor, user, usdc, 200_000_000, later)
            .unwrap();
        let shield = book.snapshot(user).unwrap();
        assert_eq!(shield.token_limits[&usdc].spent_today, 200_000_000);
        assert_eq!(shield.token_limits[&usdc].day_epoch_start, later);
    }

    #[test]
    fn emergency_blocks_spending() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        book.enable_emergency(user).unwrap();
        assert_eq!(
            book.record_spending(executor, user, usdc, 1_000_000, T0)
                .unwrap_err(),
            AegisError::EmergencyActive
        );
        book.disable_emergency(user).unwrap();
        book.record_spending(executor, user, usdc, 1_000_000, T0)
            .unwrap();
    }

    #[test]
    fn protocol_pause_precedes_everything() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        book.enable_emergency(user).unwrap();
        let operator = book.operator();
        book.set_protocol_paused(operator, true).unwrap();
        // Pause is observed before the emergency state.
        assert_eq!(
            book.record_spending(executor, user, usdc, 1_000_000, T0)
                .unwrap_err(),
            AegisError::ProtocolPaused
        );
    }

    #[test]
    fn config_update_honors_cooldown() {
        let (mut book, _executor, user, _) = setup(1_000_000_000, 100_000_000);
        book.propose_config_update(user, 2_000_000_000, 200_000_000, T0)
            .unwrap();

        let early = T0 + CONFIG_UPDATE_DELAY_SECS - 1;
        assert_eq!(
            book.execute_config_update(user, early).unwrap_err(),
            AegisError::ConfigTimelockNotExpired {
                effective_at: T0 + CONFIG_UPDATE_DELAY_SECS
            }
        );

        let events = book
            .execute_config_update(user, T0 + CONFIG_UPDATE_DELAY_SECS)
            .unwrap();
        assert_eq!(events.len(), 2);
        let shield = book.snapshot(user).unwrap();
        assert_eq!(shield.daily_limit, 2_000_000_000);
        assert_eq!(shield.single_tx_limit, 200_000_000);
        assert!(shield.pending_config_update.is_none());

        assert_eq!(
            book.execute_config_update(user, T0 + CONFIG_UPDATE_DELAY_SECS)
                .unwrap_err(),
            AegisError::NoPendingConfigUpdate
        );
    }

    #[test]
    fn new_proposal_overwrites_pending() {
        let (mut book, _executor, user, _) = setup(1_000_000_000, 100_000_000);
        book.propose_config_update(user, 2_000_000_000, 200_000_000, T0)
            .unwrap();
        book.propose_config_update(user, 3_000_000_000, 300_000_000, T0 + 10)
            .unwrap();
        let pending = book.snapshot(user).unwrap().pending_config_update.unwrap();
        assert_eq!(pending.new_daily_limit, 3_000_000_000);
        assert_eq!(pending.effective_at, T0 + 10 + CONFIG_UPDATE_DELAY_SECS);
    }

    #[test]
    fn cancel_clears_pending() {
        let (mut book, _executor, user, _) = setup(1_000_000_000, 100_000_000);
        assert_eq!(
            book.cancel_config_update(user).unwrap_err(),
            AegisError::NoPendingConfigUpdate
        );
        book.propose_config_update(user, 2_000_000_000, 200_000_000, T0)
            .unwrap();
        book.cancel_config_update(user).unwrap();
        assert!(book.snapshot(user).unwrap().pending_config_update.is_none());
    }

    #[test]
    fn whitelist_gates_targets_not_spends() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        let venue = addr(0xC0);
        book.enable_whitelist_mode(user).unwrap();

        // Target checks happen at action construction.
        assert!(matches!(
            book.check_target(user, venue),
            Err(AegisError::NotWhitelisted(_))
        ));
        book.add_whitelist(user, venue).unwrap();
        book.check_target(user, venue).unwrap();

        // record_spending itself operates on tokens, not targets.
        book.record_spending(executor, user, usdc, 1_000_000, T0)
            .unwrap();

        book.remove_whitelist(user, venue).unwrap();
        assert!(book.check_target(user, venue).is_err());
        book.disable_whitelist_mode(user).unwrap();
        book.check_target(user, venue).unwrap();
    }

    #[test]
    fn check_spending_allowed_is_pure() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        book.record_spending(executor, user, usdc, 100_000_000, T0)
            .unwrap();
        let before = book.snapshot(user).unwrap();

        book.check_spending_allowed(executor, user, usdc, 100_000_000, T0)
            .unwrap();
        assert!(book
            .check_spending_allowed(executor, user, usdc, 1_000_000_000, T0)
            .is_err());

        assert_eq!(book.snapshot(user).unwrap(), before, "views must not mutate");
    }

    #[test]
    fn spend_events_are_journaled_until_drained() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        book.record_spending(executor, user, usdc, 1_000_000, T0)
            .unwrap();
        book.record_spending(executor, user, usdc, 2_000_000, T0)
            .unwrap();
        let _ = book
            .record_spending(executor, user, usdc, 999_000_000, T0)
            .unwrap_err();

        let events = book.take_events();
        assert_eq!(events.len(), 2, "rejected spends never journal");
        assert!(matches!(
            events[1],
            EventKind::SpendingRecorded {
                amount: 2_000_000,
                new_daily_total: 3_000_000,
                ..
            }
        ));
        assert!(book.take_events().is_empty());
    }

    #[test]
    fn rejected_spend_leaves_counters_unchanged() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        book.record_spending(executor, user, usdc, 100_000_000, T0)
            .unwrap();
        let spent_before = book.snapshot(user).unwrap().spent_today;
        let _ = book
            .record_spending(executor, user, usdc, 999_000_000, T0)
            .unwrap_err();
        assert_eq!(book.snapshot(user).unwrap().spent_today, spent_before);
    }

    #[test]
    fn deactivate_then_reactivate_resets_counters() {
        let (mut book, executor, user, usdc) = setup(1_000_000_000, 100_000_000);
        book.record_spending(executor, user, usdc, 100_000_000, T0)
            .unwrap();
        book.deactivate(user).unwrap();
        assert!(matches!(
            book.record_spending(executor, user, usdc, 1_000_000, T0),
            Err(AegisError::ShieldNotActive(_))
        ));
        book.activate(user, 1_000_000_000, 100_000_000, T0).unwrap();
        assert_eq!(book.snapshot(user).unwrap().spent_today, 0);
    }
}
