//! Stop-loss engine: price-triggered, one-shot sales.
//!
//! Three trigger derivations: an absolute price, a percentage below the
//! creation price, and a trailing distance below the running peak. Trailing
//! stops re-anchor on every fresh peak before the comparison, so a new high
//! can never trigger the sale in the evaluation that observed it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aegis_core::constants::{
    BPS_DENOM, STOP_LOSS_MAX_PCT_BPS, STOP_LOSS_MIN_PCT_BPS, SWAP_DEADLINE_SECS,
    TRAILING_MAX_DISTANCE_BPS, TRAILING_MIN_DISTANCE_BPS,
};
use aegis_core::error::AegisError;
use aegis_core::event::EventKind;
use aegis_core::types::{
    Address, Amount, PauseReason, Price, StopLossKind, StrategyId, StrategyStatus, Timestamp,
};
use aegis_adapters::{PriceOracle, SwapRequest, WalletAdapter};
use aegis_shield::ShieldBook;

use crate::ExecutionContext;

// ── Strategy record ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLossStrategy {
    pub id: StrategyId,
    pub owner: Address,
    pub status: StrategyStatus,
    pub pause_reason: Option<PauseReason>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    pub token_to_sell: Address,
    pub token_to_receive: Address,
    pub amount: Amount,
    pub kind: StopLossKind,
    /// Effective trigger: derived at creation, re-derived on trailing peaks.
    pub trigger_price: Price,
    /// Percentage below creation price (Percentage kind only).
    pub trigger_pct_bps: u32,
    /// Distance below the running peak (TrailingStop kind only).
    pub trailing_distance_bps: u32,
    /// Oracle sample at creation (0 when the feed was absent for FixedPrice).
    pub initial_price: Price,
    /// Running peak (TrailingStop kind only).
    pub highest_price: Price,
    pub min_amount_out: Amount,
    pub pool_fee_bps: u32,
    pub triggered_at: Option<Timestamp>,
    pub executed_at: Option<Timestamp>,
    pub executed_amount: Amount,
}

/// Trigger derivation selected at creation.
#[derive(Clone, Copy, Debug)]
pub enum StopLossTrigger {
    FixedPrice { price: Price },
    Percentage { pct_bps: u32 },
    TrailingStop { distance_bps: u32 },
}

/// Creation parameters as submitted by the owner.
#[derive(Clone, Debug)]
pub struct StopLossCreateParams {
    pub token_to_sell: Address,
    pub token_to_receive: Address,
    pub amount: Amount,
    pub trigger: StopLossTrigger,
    pub min_amount_out: Amount,
    pub pool_fee_bps: u32,
}

fn price_below(price: Price, bps: u32) -> Price {
    price * (BPS_DENOM - bps as u128) / BPS_DENOM
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct StopLossEngine {
    strategies: BTreeMap<StrategyId, StopLossStrategy>,
    order: Vec<StrategyId>,
    seq: u64,
}

impl StopLossEngine {
    pub fn new() -> Self {
        Self {
            strategies: BTreeMap::new(),
            order: Vec::new(),
            seq: 0,
        }
    }

    pub fn get(&self, id: &StrategyId) -> Option<&StopLossStrategy> {
        self.strategies.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn get_mut(&mut self, id: &StrategyId) -> Result<&mut StopLossStrategy, AegisError> {
        self.strategies
            .get_mut(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))
    }

    fn owned_mut(
        &mut self,
        caller: Address,
        id: &StrategyId,
    ) -> Result<&mut StopLossStrategy, AegisError> {
        let s = self.get_mut(id)?;
        if s.owner != caller {
            return Err(AegisError::NotOwner);
        }
        Ok(s)
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    pub fn create(
        &mut self,
        owner: Address,
        params: StopLossCreateParams,
        oracle: &dyn PriceOracle,
        now: Timestamp,
    ) -> Result<(StrategyId, Vec<EventKind>), AegisError> {
        if params.token_to_sell.is_zero() || params.token_to_receive.is_zero() {
            return Err(AegisError::ZeroAddress);
        }
        if params.token_to_sell == params.token_to_receive {
            return Err(AegisError::SameToken);
        }
        if params.amount == 0 {
            return Err(AegisError::ZeroAmount);
        }

        let (kind, trigger_price, trigger_pct_bps, trailing_distance_bps, initial_price, highest) =
            match params.trigger {
                StopLossTrigger::FixedPrice { price } => {
                    if price == 0 {
                        return Err(AegisError::ZeroTriggerPrice);
                    }
                    // The feed is optional for fixed triggers.
                    let p0 = oracle.price(params.token_to_sell).unwrap_or(0);
                    (StopLossKind::FixedPrice, price, 0, 0, p0, 0)
                }
                StopLossTrigger::Percentage { pct_bps } => {
                    if !(STOP_LOSS_MIN_PCT_BPS..=STOP_LOSS_MAX_PCT_BPS).contains(&pct_bps) {
                        return Err(AegisError::TriggerPctOutOfRange {
                            got: pct_bps,
                            min: STOP_LOSS_MIN_PCT_BPS,
                            max: STOP_LOSS_MAX_PCT_BPS,
                        });
                    }
                    let p0 = oracle.price(params.token_to_sell)?;
                    (
                        StopLossKind::Percentage,
                        price_below(p0, pct_bps),
                        pct_bps,
                        0,
                        p0,
                        0,
                    )
                }
                StopLossTrigger::TrailingStop { distance_bps } => {
                    if !(TRAILING_MIN_DISTANCE_BPS..=TRAILING_MAX_DISTANCE_BPS)
                        .contains(&distance_bps)
                    {
                        return Err(AegisError::TrailingDistanceOutOfRange {
                            got: distance_bps,
                            min: TRAILING_MIN_DISTANCE_BPS,
                            max: TRAILING_MAX_DISTANCE_BPS,
                        });
                    }
                    let p0 = oracle.price(params.token_to_sell)?;
                    (
                        StopLossKind::TrailingStop,
                        price_below(p0, distance_bps),
                        0,
                        distance_bps,
                        p0,
                        p0,
                    )
                }
            };

        let id = StrategyId::derive(
            &owner,
            &params.token_to_sell,
            &params.token_to_receive,
            params.amount,
            now,
            self.seq,
        );
        self.seq += 1;

        let strategy = StopLossStrategy {
            id,
            owner,
            status: StrategyStatus::Active,
            pause_reason: None,
            created_at: now,
            updated_at: now,
            token_to_sell: params.token_to_sell,
            token_to_receive: params.token_to_receive,
            amount: params.amount,
            kind,
            trigger_price,
            trigger_pct_bps,
            trailing_distance_bps,
            initial_price,
            highest_price: highest,
            min_amount_out: params.min_amount_out,
            pool_fee_bps: params.pool_fee_bps,
            triggered_at: None,
            executed_at: None,
            executed_amount: 0,
        };

        let event = EventKind::StopLossCreated {
            id,
            owner,
            token_to_sell: strategy.token_to_sell,
            token_to_receive: strategy.token_to_receive,
            amount: strategy.amount,
            kind,
            trigger_price,
        };
        self.strategies.insert(id, strategy);
        self.order.push(id);
        info!(strategy = %id, owner = %owner, ?kind, trigger_price, "stop-loss created");
        Ok((id, vec![event]))
    }

    // ── Trigger evaluation ───────────────────────────────────────────────────

    /// Evaluate the trigger at the current oracle price. For trailing stops a
    /// fresh peak first re-anchors `highest_price` and the trigger (emitting
    /// [`EventKind::HighestPriceUpdated`]); the comparison then uses the new
    /// values, so a fresh peak never triggers in the same evaluation.
    ///
    /// An unavailable oracle reads as "not triggered".
    pub fn should_trigger(
        &mut self,
        id: &StrategyId,
        oracle: &dyn PriceOracle,
    ) -> Result<(bool, Vec<EventKind>), AegisError> {
        let s = self.get_mut(id)?;
        if s.status != StrategyStatus::Active {
            return Ok((false, vec![]));
        }
        let Ok(current) = oracle.price(s.token_to_sell) else {
            return Ok((false, vec![]));
        };

        let mut events = Vec::new();
        if s.kind == StopLossKind::TrailingStop && current > s.highest_price {
            s.highest_price = current;
            s.trigger_price = price_below(current, s.trailing_distance_bps);
            events.push(EventKind::HighestPriceUpdated {
                id: *id,
                highest_price: s.highest_price,
                trigger_price: s.trigger_price,
            });
        }
        Ok((current <= s.trigger_price, events))
    }

    /// Pure variant of [`Self::should_trigger`] for dry-runs: same answer,
    /// no peak re-anchoring.
    fn would_trigger(s: &StopLossStrategy, current: Price) -> bool {
        if s.kind == StopLossKind::TrailingStop && current > s.highest_price {
            // A fresh peak re-anchors above the current price.
            return false;
        }
        current <= s.trigger_price
    }

    // ── Dry-run ──────────────────────────────────────────────────────────────

    pub fn can_execute(
        &self,
        id: &StrategyId,
        shield: &ShieldBook,
        wallet: &dyn WalletAdapter,
        oracle: &dyn PriceOracle,
        executor: Address,
        now: Timestamp,
    ) -> Result<(), AegisError> {
        let s = self
            .strategies
            .get(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;
        if s.status != StrategyStatus::Active {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        let current = oracle.price(s.token_to_sell)?;
        if !Self::would_trigger(s, current) {
            return Err(AegisError::TriggerNotMet);
        }
        let balance = wallet.balance_of(s.owner, s.token_to_sell);
        let executed = s.amount.min(balance);
        if executed == 0 {
            return Err(AegisError::InsufficientBalance {
                need: s.amount,
                have: 0,
            });
        }
        shield.check_spending_allowed(executor, s.owner, s.token_to_sell, executed, now)
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// If the strategy is active and its trigger condition holds, sell.
    ///
    /// Partial fills are allowed when the owner's balance is below the
    /// configured amount; the executed amount is recorded and the one-shot
    /// still finishes in `Completed` (with `min_amount_out` scaled to the
    /// filled fraction).
    pub fn check_and_execute(
        &mut self,
        id: &StrategyId,
        ctx: &mut ExecutionContext<'_>,
        oracle: &dyn PriceOracle,
    ) -> Result<(Amount, Vec<EventKind>), AegisError> {
        {
            let s = self.get_mut(id)?;
            if s.status != StrategyStatus::Active {
                return Err(AegisError::StrategyNotActive {
                    status: s.status.to_string(),
                });
            }
        }

        let (triggered, mut events) = self.should_trigger(id, oracle)?;
        if !triggered {
            return Err(AegisError::TriggerNotMet);
        }

        let s = self.get_mut(id)?;
        let current = oracle.price(s.token_to_sell)?;

        let balance = ctx.wallet.balance_of(s.owner, s.token_to_sell);
        let executed = s.amount.min(balance);
        if executed == 0 {
            return Err(AegisError::InsufficientBalance {
                need: s.amount,
                have: 0,
            });
        }

        // Shield first: the spend either records (journaled on the book) or
        // the whole step fails while the strategy stays Active and retryable.
        ctx.shield
            .record_spending(ctx.executor, s.owner, s.token_to_sell, executed, ctx.now)?;

        s.status = StrategyStatus::Triggered;
        s.triggered_at = Some(ctx.now);
        events.push(EventKind::StopLossTriggered {
            id: *id,
            trigger_price: s.trigger_price,
            current_price: current,
        });

        ctx.wallet.pull(s.owner, s.token_to_sell, executed)?;
        ctx.wallet
            .approve(s.token_to_sell, ctx.exchange.venue(), executed)?;

        // Scale the output floor to the filled fraction on partial fills.
        let min_out = if executed == s.amount {
            s.min_amount_out
        } else {
            s.min_amount_out * executed / s.amount
        };
        let amount_out = ctx.exchange.swap(
            &SwapRequest {
                token_in: s.token_to_sell,
                token_out: s.token_to_receive,
                amount_in: executed,
                min_out,
                pool_fee_bps: s.pool_fee_bps,
                recipient: s.owner,
                deadline: ctx.now + SWAP_DEADLINE_SECS,
            },
            ctx.now,
        )?;

        s.executed_at = Some(ctx.now);
        s.executed_amount = executed;
        s.status = StrategyStatus::Completed;
        s.updated_at = ctx.now;
        events.push(EventKind::StopLossExecuted {
            id: *id,
            amount_in: executed,
            amount_out,
        });

        if executed < s.amount {
            warn!(strategy = %id, executed, requested = s.amount, "partial stop-loss fill");
        }
        info!(strategy = %id, amount_in = executed, amount_out, "stop-loss executed");
        Ok((amount_out, events))
    }

    // ── Owner lifecycle ──────────────────────────────────────────────────────

    pub fn pause(
        &mut self,
        caller: Address,
        id: &StrategyId,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let s = self.owned_mut(caller, id)?;
        if s.status != StrategyStatus::Active {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        s.status = StrategyStatus::Paused;
        s.pause_reason = Some(PauseReason::Owner);
        s.updated_at = now;
        Ok(vec![EventKind::StopLossPaused { id: *id }])
    }

    pub fn resume(
        &mut self,
        caller: Address,
        id: &StrategyId,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let s = self.owned_mut(caller, id)?;
        if s.status != StrategyStatus::Paused {
            return Err(AegisError::StrategyNotPaused {
                status: s.status.to_string(),
            });
        }
        s.status = StrategyStatus::Active;
        s.pause_reason = None;
        s.updated_at = now;
        Ok(vec![EventKind::StopLossResumed { id: *id }])
    }

    pub fn cancel(
        &mut self,
        caller: Address,
        id: &StrategyId,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let s = self.owned_mut(caller, id)?;
        match s.status {
            StrategyStatus::Cancelled => return Err(AegisError::StrategyAlreadyCancelled),
            StrategyStatus::Completed => return Err(AegisError::StrategyCompleted),
            _ => {}
        }
        s.status = StrategyStatus::Cancelled;
        s.updated_at = now;
        Ok(vec![EventKind::StopLossCancelled { id: *id }])
    }

    /// Update `min_amount_out`, and for fixed-price stops the trigger price.
    pub fn update(
        &mut self,
        caller: Address,
        id: &StrategyId,
        new_trigger_price: Option<Price>,
        new_min_amount_out: Option<Amount>,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let s = self.owned_mut(caller, id)?;
        if s.status.is_terminal() || s.status == StrategyStatus::Triggered {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        if let Some(price) = new_trigger_price {
            if s.kind != StopLossKind::FixedPrice {
                return Err(AegisError::TriggerNotUpdatable);
            }
            if price == 0 {
                return Err(AegisError::ZeroTriggerPrice);
            }
            s.trigger_price = price;
        }
        if let Some(min_out) = new_min_amount_out {
            s.min_amount_out = min_out;
        }
        s.updated_at = now;
        Ok(vec![EventKind::StopLossUpdated {
            id: *id,
            trigger_price: s.trigger_price,
            min_amount_out: s.min_amount_out,
        }])
    }

    // ── Due-work enumeration ─────────────────────────────────────────────────

    /// Active strategies in insertion order; trigger feasibility is the
    /// dry-run's job since it needs the oracle.
    pub fn due_page(&self, start: usize, limit: usize) -> (Vec<StrategyId>, usize) {
        let mut due = Vec::new();
        let mut idx = start.min(self.order.len());
        while idx < self.order.len() && due.len() < limit {
            let id = self.order[idx];
            if let Some(s) = self.strategies.get(&id) {
                if s.status == StrategyStatus::Active {
                    due.push(id);
                }
            }
            idx += 1;
        }
        (due, idx)
    }
}

impl Default for StopLossEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use aegis_adapters::{SimExchange, SimOracle, SimWallet};
    use aegis_core::constants::PRICE_SCALE;

    const T0: Timestamp = 1_700_000_000;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    struct Rig {
        shield: ShieldBook,
        wallet: Arc<SimWallet>,
        exchange: SimExchange,
        oracle: SimOracle,
        executor: Address,
        owner: Address,
        weth: Address,
        usdc: Address,
    }

    impl Rig {
        fn ctx(&mut self, now: Timestamp) -> ExecutionContext<'_> {
            ExecutionContext {
                shield: &mut self.shield,
                wallet: self.wallet.as_ref(),
                exchange: &self.exchange,
                executor: self.executor,
                now,
            }
        }
    }

    fn rig() -> (Rig, StopLossEngine) {
        let operator = addr(0xFF);
        let executor = addr(0xE0);
        let owner = addr(1);
        let weth = addr(0xB0);
        let usdc = addr(0xA0);

        let mut shield = ShieldBook::new(operator);
        shield.authorize_executor(operator, executor).unwrap();
        shield
            .activate(owner, 100_000 * PRICE_SCALE, 50_000 * PRICE_SCALE, T0)
            .unwrap();

        let wallet = Arc::new(SimWallet::new());
        wallet.credit(owner, weth, PRICE_SCALE); // 1 WETH
        let exchange = SimExchange::new(addr(0xEE), Arc::clone(&wallet));
        exchange.set_rate(weth, usdc, PRICE_SCALE);

        let oracle = SimOracle::new();
        oracle.set_price(weth, 2_500 * PRICE_SCALE);

        (
            Rig {
                shield,
                wallet,
                exchange,
                oracle,
                executor,
                owner,
                weth,
                usdc,
            },
            StopLossEngine::new(),
        )
    }

    fn trailing_params(weth: Address, usdc: Address, distance_bps: u32) -> StopLossCreateParams {
        StopLossCreateParams {
            token_to_sell: weth,
            token_to_receive: usdc,
            amount: PRICE_SCALE,
            trigger: StopLossTrigger::TrailingStop { distance_bps },
            min_amount_out: 0,
            pool_fee_bps: 30,
        }
    }

    #[test]
    fn percentage_bounds() {
        let (r, mut engine) = rig();
        for bad in [99, 5_001] {
            let p = StopLossCreateParams {
                token_to_sell: r.weth,
                token_to_receive: r.usdc,
                amount: 1,
                trigger: StopLossTrigger::Percentage { pct_bps: bad },
                min_amount_out: 0,
                pool_fee_bps: 30,
            };
            assert!(matches!(
                engine.create(r.owner, p, &r.oracle, T0),
                Err(AegisError::TriggerPctOutOfRange { .. })
            ));
        }
        for good in [100, 5_000] {
            let p = StopLossCreateParams {
                token_to_sell: r.weth,
                token_to_receive: r.usdc,
                amount: 1,
                trigger: StopLossTrigger::Percentage { pct_bps: good },
                min_amount_out: 0,
                pool_fee_bps: 30,
            };
            engine.create(r.owner, p, &r.oracle, T0).unwrap();
        }
    }

    #[test]
    fn percentage_derivation_from_creation_price() {
        let (r, mut engine) = rig();
        let p = StopLossCreateParams {
            token_to_sell: r.weth,
            token_to_receive: r.usdc,
            amount: 1,
            trigger: StopLossTrigger::Percentage { pct_bps: 1_000 },
            min_amount_out: 0,
            pool_fee_bps: 30,
        };
        let (id, _) = engine.create(r.owner, p, &r.oracle, T0).unwrap();
        let s = engine.get(&id).unwrap();
        assert_eq!(s.trigger_price, 2_250 * PRICE_SCALE);
        assert_eq!(s.initial_price, 2_500 * PRICE_SCALE);
    }

    #[test]
    fn trailing_follows_the_peak() {
        let (r, mut engine) = rig();
        let (id, _) = engine
            .create(r.owner, trailing_params(r.weth, r.usdc, 1_000), &r.oracle, T0)
            .unwrap();
        assert_eq!(engine.get(&id).unwrap().trigger_price, 2_250 * PRICE_SCALE);

        // Price rallies: peak and trigger re-anchor, no trigger yet.
        r.oracle.set_price(r.weth, 3_000 * PRICE_SCALE);
        let (fire, events) = engine.should_trigger(&id, &r.oracle).unwrap();
        assert!(!fire, "a fresh peak never triggers in the same evaluation");
        assert!(events
            .iter()
            .any(|e| matches!(e, EventKind::HighestPriceUpdated { .. })));
        let s = engine.get(&id).unwrap();
        assert_eq!(s.highest_price, 3_000 * PRICE_SCALE);
        assert_eq!(s.trigger_price, 2_700 * PRICE_SCALE);

        // Invariant: trigger = peak · (1 − distance/10000) at any observation.
        assert_eq!(
            s.trigger_price,
            s.highest_price * (10_000 - s.trailing_distance_bps as u128) / 10_000
        );

        // Drop below the re-anchored trigger fires.
        r.oracle.set_price(r.weth, 2_600 * PRICE_SCALE);
        let (fire, _) = engine.should_trigger(&id, &r.oracle).unwrap();
        assert!(fire);
    }

    #[test]
    fn trailing_distance_bounds() {
        let (r, mut engine) = rig();
        for bad in [99, 5_001] {
            assert!(matches!(
                engine.create(r.owner, trailing_params(r.weth, r.usdc, bad), &r.oracle, T0),
                Err(AegisError::TrailingDistanceOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn oracle_outage_reads_as_not_triggered() {
        let (r, mut engine) = rig();
        let (id, _) = engine
            .create(r.owner, trailing_params(r.weth, r.usdc, 1_000), &r.oracle, T0)
            .unwrap();
        r.oracle.clear_price(r.weth);
        let (fire, events) = engine.should_trigger(&id, &r.oracle).unwrap();
        assert!(!fire);
        assert!(events.is_empty());
    }

    #[test]
    fn fixed_trigger_executes_once() {
        let (mut r, mut engine) = rig();
        let p = StopLossCreateParams {
            token_to_sell: r.weth,
            token_to_receive: r.usdc,
            amount: PRICE_SCALE,
            trigger: StopLossTrigger::FixedPrice {
                price: 2_000 * PRICE_SCALE,
            },
            min_amount_out: 0,
            pool_fee_bps: 30,
        };
        let (id, _) = engine.create(r.owner, p, &r.oracle, T0).unwrap();

        // Above the trigger: nothing fires.
        assert_eq!(
            engine
                .check_and_execute(&id, &mut ExecutionContext { shield: &mut r.shield, wallet: r.wallet.as_ref(), exchange: &r.exchange, executor: r.executor, now: T0 }, &r.oracle)
                .unwrap_err(),
            AegisError::TriggerNotMet
        );

        r.oracle.set_price(r.weth, 1_900 * PRICE_SCALE);
        let (out, events) = engine
            .check_and_execute(&id, &mut ExecutionContext { shield: &mut r.shield, wallet: r.wallet.as_ref(), exchange: &r.exchange, executor: r.executor, now: T0 + 60 }, &r.oracle)
            .unwrap();
        assert_eq!(out, PRICE_SCALE);
        assert!(events
            .iter()
            .any(|e| matches!(e, EventKind::StopLossTriggered { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, EventKind::StopLossExecuted { .. })));

        let s = engine.get(&id).unwrap();
        assert_eq!(s.status, StrategyStatus::Completed);
        assert_eq!(s.triggered_at, Some(T0 + 60));
        assert_eq!(s.executed_at, Some(T0 + 60));
        assert_eq!(s.executed_amount, PRICE_SCALE);

        // One-shot: a second attempt is a state error.
        assert!(matches!(
            engine.check_and_execute(&id, &mut ExecutionContext { shield: &mut r.shield, wallet: r.wallet.as_ref(), exchange: &r.exchange, executor: r.executor, now: T0 + 120 }, &r.oracle),
            Err(AegisError::StrategyNotActive { .. })
        ));
    }

    #[test]
    fn partial_fill_is_terminal() {
        let (mut r, mut engine) = rig();
        let p = StopLossCreateParams {
            token_to_sell: r.weth,
            token_to_receive: r.usdc,
            amount: 2 * PRICE_SCALE, // owner only holds 1 WETH
            trigger: StopLossTrigger::FixedPrice {
                price: 3_000 * PRICE_SCALE,
            },
            min_amount_out: 0,
            pool_fee_bps: 30,
        };
        let (id, _) = engine.create(r.owner, p, &r.oracle, T0).unwrap();
        let (out, _) = engine
            .check_and_execute(&id, &mut ExecutionContext { shield: &mut r.shield, wallet: r.wallet.as_ref(), exchange: &r.exchange, executor: r.executor, now: T0 }, &r.oracle)
            .unwrap();
        assert_eq!(out, PRICE_SCALE);
        let s = engine.get(&id).unwrap();
        assert_eq!(s.executed_amount, PRICE_SCALE);
        assert_eq!(s.status, StrategyStatus::Completed);
    }

    #[test]
    fn shield_denial_keeps_strategy_retryable() {
        let (mut r, mut engine) = rig();
        // Spending the full WETH amount exceeds the single-tx limit.
        let owner = r.owner;
        r.shield.deactivate(owner).unwrap();
        r.shield
            .activate(owner, 2_000_000, 1_000_000, T0)
            .unwrap();

        let p = StopLossCreateParams {
            token_to_sell: r.weth,
            token_to_receive: r.usdc,
            amount: PRICE_SCALE,
            trigger: StopLossTrigger::FixedPrice {
                price: 3_000 * PRICE_SCALE,
            },
            min_amount_out: 0,
            pool_fee_bps: 30,
        };
        let (id, _) = engine.create(r.owner, p, &r.oracle, T0).unwrap();
        assert!(matches!(
            engine.check_and_execute(&id, &mut ExecutionContext { shield: &mut r.shield, wallet: r.wallet.as_ref(), exchange: &r.exchange, executor: r.executor, now: T0 }, &r.oracle),
            Err(AegisError::ExceedsSingleTx { .. })
        ));
        assert_eq!(engine.get(&id).unwrap().status, StrategyStatus::Active);
    }

    #[test]
    fn update_rules_per_kind() {
        let (r, mut engine) = rig();
        let (trailing, _) = engine
            .create(r.owner, trailing_params(r.weth, r.usdc, 1_000), &r.oracle, T0)
            .unwrap();
        assert_eq!(
            engine
                .update(r.owner, &trailing, Some(PRICE_SCALE), None, T0)
                .unwrap_err(),
            AegisError::TriggerNotUpdatable
        );
        engine
            .update(r.owner, &trailing, None, Some(42), T0)
            .unwrap();
        assert_eq!(engine.get(&trailing).unwrap().min_amount_out, 42);

        let p = StopLossCreateParams {
            token_to_sell: r.weth,
            token_to_receive: r.usdc,
            amount: 1,
            trigger: StopLossTrigger::FixedPrice {
                price: 2_000 * PRICE_SCALE,
            },
            min_amount_out: 0,
            pool_fee_bps: 30,
        };
        let (fixed, _) = engine.create(r.owner, p, &r.oracle, T0).unwrap();
        engine
            .update(r.owner, &fixed, Some(1_800 * PRICE_SCALE), None, T0)
            .unwrap();
        assert_eq!(
            engine.get(&fixed).unwrap().trigger_price,
            1_800 * PRICE_SCALE
        );
    }

    #[test]
    fn paused_strategy_neither_triggers_nor_tracks_peaks() {
        let (r, mut engine) = rig();
        let (id, _) = engine
            .create(r.owner, trailing_params(r.weth, r.usdc, 1_000), &r.oracle, T0)
            .unwrap();
        engine.pause(r.owner, &id, T0).unwrap();

        r.oracle.set_price(r.weth, 5_000 * PRICE_SCALE);
        let (fire, events) = engine.should_trigger(&id, &r.oracle).unwrap();
        assert!(!fire);
        assert!(events.is_empty());
        assert_eq!(engine.get(&id).unwrap().highest_price, 2_500 * PRICE_SCALE);

        engine.resume(r.owner, &id, T0).unwrap();
        let (_, events) = engine.should_trigger(&id, &r.oracle).unwrap();
        assert_eq!(events.len(), 1);
    }
}
