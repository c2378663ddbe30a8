//! Rebalance engine: restore a portfolio to target weights by routing every
//! leg through a configurable numeraire hub token.
//!
//! Value space is 18-fractional: `value_i = balance_i · price_i / 10^18`
//! with the oracle quoting per base unit. Weights are basis points of the
//! portfolio total. Execution is two-phase: sell every surplus asset into
//! the numeraire, then buy deficit assets largest-deficit-first from the
//! proceeds. Each leg spends user funds and therefore records against the
//! shield; a denied leg is skipped, not fatal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aegis_core::constants::{
    PRICE_SCALE, REBALANCE_MAX_ALLOCATIONS, REBALANCE_MIN_ALLOCATIONS, REBALANCE_WEIGHT_SUM_BPS,
    SWAP_DEADLINE_SECS,
};
use aegis_core::error::AegisError;
use aegis_core::event::EventKind;
use aegis_core::types::{
    Address, Amount, PauseReason, StrategyId, StrategyStatus, Timestamp,
};
use aegis_adapters::{PriceOracle, SwapRequest, WalletAdapter};

use crate::ExecutionContext;

/// `a · b / den` guarding against 128-bit overflow in the product.
fn mul_div(a: u128, b: u128, den: u128) -> u128 {
    match a.checked_mul(b) {
        Some(p) => p / den,
        None => {
            let q = a / den;
            let r = a % den;
            q.saturating_mul(b).saturating_add(r.saturating_mul(b) / den)
        }
    }
}

// ── Strategy record ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceStrategy {
    pub id: StrategyId,
    pub owner: Address,
    pub status: StrategyStatus,
    pub pause_reason: Option<PauseReason>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    /// Ordered (token, target weight in bps); weights sum to 10_000.
    pub allocations: Vec<(Address, u32)>,
    pub rebalance_threshold_bps: u32,
    pub min_interval_s: Timestamp,
    pub last_rebalance_time: Timestamp,
    pub total_rebalances: u32,
    pub pool_fee_bps: u32,
}

/// Creation parameters as submitted by the owner.
#[derive(Clone, Debug)]
pub struct RebalanceCreateParams {
    pub allocations: Vec<(Address, u32)>,
    pub rebalance_threshold_bps: u32,
    pub min_interval_s: Timestamp,
    pub pool_fee_bps: u32,
}

fn validate_allocations(allocations: &[(Address, u32)]) -> Result<(), AegisError> {
    let count = allocations.len();
    if !(REBALANCE_MIN_ALLOCATIONS..=REBALANCE_MAX_ALLOCATIONS).contains(&count) {
        return Err(AegisError::AllocationCountOutOfRange {
            got: count,
            min: REBALANCE_MIN_ALLOCATIONS,
            max: REBALANCE_MAX_ALLOCATIONS,
        });
    }
    let mut sum: u32 = 0;
    for (i, (token, weight)) in allocations.iter().enumerate() {
        if token.is_zero() {
            return Err(AegisError::ZeroAddress);
        }
        if *weight == 0 {
            return Err(AegisError::ZeroWeight);
        }
        if allocations[..i].iter().any(|(t, _)| t == token) {
            return Err(AegisError::DuplicateAllocation);
        }
        sum += weight;
    }
    if sum != REBALANCE_WEIGHT_SUM_BPS {
        return Err(AegisError::WeightSumMismatch { got: sum });
    }
    Ok(())
}

/// Per-asset valuation snapshot used by both the gate and the executor.
struct Valuation {
    /// (balance, price, value) per allocation, in allocation order.
    assets: Vec<(Amount, u128, u128)>,
    total_value: u128,
}

fn portfolio_valuation(
    s: &RebalanceStrategy,
    oracle: &dyn PriceOracle,
    wallet: &dyn WalletAdapter,
) -> Result<Valuation, AegisError> {
    let mut assets = Vec::with_capacity(s.allocations.len());
    let mut total_value: u128 = 0;
    for (token, _) in &s.allocations {
        let price = oracle.price(*token)?;
        let balance = wallet.balance_of(s.owner, *token);
        let value = mul_div(balance, price, PRICE_SCALE);
        total_value += value;
        assets.push((balance, price, value));
    }
    Ok(Valuation {
        assets,
        total_value,
    })
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct RebalanceEngine {
    strategies: BTreeMap<StrategyId, RebalanceStrategy>,
    order: Vec<StrategyId>,
    seq: u64,
    /// The hub token every leg routes through.
    numeraire: Address,
}

impl RebalanceEngine {
    pub fn new(numeraire: Address) -> Self {
        Self {
            strategies: BTreeMap::new(),
            order: Vec::new(),
            seq: 0,
            numeraire,
        }
    }

    pub fn numeraire(&self) -> Address {
        self.numeraire
    }

    pub fn get(&self, id: &StrategyId) -> Option<&RebalanceStrategy> {
        self.strategies.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn owned_mut(
        &mut self,
        caller: Address,
        id: &StrategyId,
    ) -> Result<&mut RebalanceStrategy, AegisError> {
        let s = self
            .strategies
            .get_mut(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;
        if s.owner != caller {
            return Err(AegisError::NotOwner);
        }
        Ok(s)
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    pub fn create(
        &mut self,
        owner: Address,
        params: RebalanceCreateParams,
        now: Timestamp,
    ) -> Result<(StrategyId, Vec<EventKind>), AegisError> {
        validate_allocations(&params.allocations)?;
        let first_token = params.allocations[0].0;
        let id = StrategyId::derive(
            &owner,
            &first_token,
            &self.numeraire,
            params.allocations.len() as u128,
            now,
            self.seq,
        );
        self.seq += 1;

        let strategy = RebalanceStrategy {
            id,
            owner,
            status: StrategyStatus::Active,
            pause_reason: None,
            created_at: now,
            updated_at: now,
            allocations: params.allocations.clone(),
            rebalance_threshold_bps: params.rebalance_threshold_bps,
            min_interval_s: params.min_interval_s,
            last_rebalance_time: 0,
            total_rebalances: 0,
            pool_fee_bps: params.pool_fee_bps,
        };

        let event = EventKind::RebalanceCreated {
            id,
            owner,
            allocations: params.allocations,
            threshold_bps: strategy.rebalance_threshold_bps,
            min_interval_s: strategy.min_interval_s,
        };
        self.strategies.insert(id, strategy);
        self.order.push(id);
        info!(strategy = %id, owner = %owner, "rebalance strategy created");
        Ok((id, vec![event]))
    }

    // ── Gate ─────────────────────────────────────────────────────────────────

    /// True iff the strategy is active, the cadence gate passed, the
    /// portfolio has value, and some weight drifted beyond the threshold.
    /// Oracle failure propagates: drift cannot be evaluated without prices.
    pub fn needs_rebalance(
        &self,
        id: &StrategyId,
        oracle: &dyn PriceOracle,
        wallet: &dyn WalletAdapter,
        now: Timestamp,
    ) -> Result<bool, AegisError> {
        let s = self
            .strategies
            .get(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;
        if s.status != StrategyStatus::Active {
            return Ok(false);
        }
        if now < s.last_rebalance_time + s.min_interval_s {
            return Ok(false);
        }
        let val = portfolio_valuation(s, oracle, wallet)?;
        if val.total_value == 0 {
            return Ok(false);
        }
        let drifted = s.allocations.iter().enumerate().any(|(i, (_, target))| {
            let current_bps = mul_div(val.assets[i].2, 10_000, val.total_value) as u32;
            current_bps.abs_diff(*target) > s.rebalance_threshold_bps
        });
        Ok(drifted)
    }

    pub fn can_execute(
        &self,
        id: &StrategyId,
        oracle: &dyn PriceOracle,
        wallet: &dyn WalletAdapter,
        now: Timestamp,
    ) -> Result<(), AegisError> {
        if self.needs_rebalance(id, oracle, wallet, now)? {
            Ok(())
        } else {
            Err(AegisError::RebalanceNotNeeded)
        }
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Two-phase restore: sell surpluses into the numeraire (allocation
    /// order), then buy deficits largest-first from the proceeds. Shield
    /// denials skip the leg; counters advance only when at least one leg
    /// settled.
    pub fn execute(
        &mut self,
        id: &StrategyId,
        ctx: &mut ExecutionContext<'_>,
        oracle: &dyn PriceOracle,
    ) -> Result<(u32, Vec<EventKind>), AegisError> {
        let numeraire = self.numeraire;
        let s = self
            .strategies
            .get_mut(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;
        if s.status != StrategyStatus::Active {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        if ctx.now < s.last_rebalance_time + s.min_interval_s {
            return Err(AegisError::ExecutionTooEarly {
                due_at: s.last_rebalance_time + s.min_interval_s,
            });
        }

        let val = portfolio_valuation(s, oracle, ctx.wallet)?;
        if val.total_value == 0 {
            return Err(AegisError::RebalanceNotNeeded);
        }
        let drifted = s.allocations.iter().enumerate().any(|(i, (_, target))| {
            let current_bps = mul_div(val.assets[i].2, 10_000, val.total_value) as u32;
            current_bps.abs_diff(*target) > s.rebalance_threshold_bps
        });
        if !drifted {
            return Err(AegisError::RebalanceNotNeeded);
        }

        let numeraire_price = oracle.price(numeraire)?;
        let mut events = Vec::new();
        let mut legs: u32 = 0;
        let mut first_err: Option<AegisError> = None;

        // Target value per asset and the signed drift, in allocation order.
        let targets: Vec<u128> = s
            .allocations
            .iter()
            .map(|(_, w)| mul_div(val.total_value, *w as u128, 10_000))
            .collect();

        // ── Sell phase: surpluses → numeraire ─────────────────────────────────
        let mut proceeds_value: u128 = 0;
        for (i, (token, _)) in s.allocations.iter().enumerate() {
            if *token == numeraire {
                continue;
            }
            let (balance, price, value) = val.assets[i];
            if value <= targets[i] || price == 0 {
                continue;
            }
            let surplus_value = value - targets[i];
            let sell_amount = mul_div(surplus_value, PRICE_SCALE, price).min(balance);
            if sell_amount == 0 {
                continue;
            }

            let leg = (|| -> Result<Amount, AegisError> {
                ctx.shield
                    .record_spending(ctx.executor, s.owner, *token, sell_amount, ctx.now)?;
                ctx.wallet.pull(s.owner, *token, sell_amount)?;
                ctx.wallet
                    .approve(*token, ctx.exchange.venue(), sell_amount)?;
                ctx.exchange.swap(
                    &SwapRequest {
                        token_in: *token,
                        token_out: numeraire,
                        amount_in: sell_amount,
                        min_out: 0,
                        pool_fee_bps: s.pool_fee_bps,
                        recipient: s.owner,
                        deadline: ctx.now + SWAP_DEADLINE_SECS,
                    },
                    ctx.now,
                )
            })();
            match leg {
                Ok(out) => {
                    legs += 1;
                    proceeds_value += mul_div(out, numeraire_price, PRICE_SCALE);
                }
                Err(e) => {
                    warn!(strategy = %id, token = %token, error = %e, "sell leg skipped");
                    first_err.get_or_insert(e);
                }
            }
        }

        // Numeraire surplus (if the hub itself is overweight) adds to the
        // buy budget directly from the owner's wallet.
        for (i, (token, _)) in s.allocations.iter().enumerate() {
            if *token == numeraire && val.assets[i].2 > targets[i] {
                proceeds_value += val.assets[i].2 - targets[i];
            }
        }

        // ── Buy phase: deficits, largest first ────────────────────────────────
        let mut deficits: Vec<(usize, u128)> = s
            .allocations
            .iter()
            .enumerate()
            .filter(|(i, (token, _))| *token != numeraire && val.assets[*i].2 < targets[*i])
            .map(|(i, _)| (i, targets[i] - val.assets[i].2))
            .collect();
        // Largest deficit first; ties break deterministically by index.
        deficits.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (i, deficit_value) in deficits {
            if proceeds_value == 0 || numeraire_price == 0 {
                break;
            }
            let token = s.allocations[i].0;
            let spend_value = deficit_value.min(proceeds_value);
            let numeraire_amount = mul_div(spend_value, PRICE_SCALE, numeraire_price)
                .min(ctx.wallet.balance_of(s.owner, numeraire));
            if numeraire_amount == 0 {
                continue;
            }

            let leg = (|| -> Result<(), AegisError> {
                ctx.shield.record_spending(
                    ctx.executor,
                    s.owner,
                    numeraire,
                    numeraire_amount,
                    ctx.now,
                )?;
                ctx.wallet.pull(s.owner, numeraire, numeraire_amount)?;
                ctx.wallet
                    .approve(numeraire, ctx.exchange.venue(), numeraire_amount)?;
                ctx.exchange.swap(
                    &SwapRequest {
                        token_in: numeraire,
                        token_out: token,
                        amount_in: numeraire_amount,
                        min_out: 0,
                        pool_fee_bps: s.pool_fee_bps,
                        recipient: s.owner,
                        deadline: ctx.now + SWAP_DEADLINE_SECS,
                    },
                    ctx.now,
                )?;
                Ok(())
            })();
            match leg {
                Ok(()) => {
                    legs += 1;
                    proceeds_value -= spend_value;
                }
                Err(e) => {
                    warn!(strategy = %id, token = %token, error = %e, "buy leg skipped");
                    first_err.get_or_insert(e);
                }
            }
        }

        if legs == 0 {
            // Every leg was denied or failed; surface the first reason.
            return Err(first_err.unwrap_or(AegisError::RebalanceNotNeeded));
        }

        s.last_rebalance_time = ctx.now;
        s.total_rebalances += 1;
        s.updated_at = ctx.now;
        events.push(EventKind::RebalanceExecuted {
            id: *id,
            legs_executed: legs,
            total_value: val.total_value,
        });
        info!(strategy = %id, legs, total_value = val.total_value, "rebalance executed");
        Ok((legs, events))
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
        Ok(vec![EventKind::RebalancePaused { id: *id }])
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
        Ok(vec![EventKind::RebalanceResumed { id: *id }])
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
        Ok(vec![EventKind::RebalanceCancelled { id: *id }])
    }

    pub fn update_allocations(
        &mut self,
        caller: Address,
        id: &StrategyId,
        allocations: Vec<(Address, u32)>,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        validate_allocations(&allocations)?;
        let s = self.owned_mut(caller, id)?;
        if s.status.is_terminal() {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        s.allocations = allocations.clone();
        s.updated_at = now;
        Ok(vec![EventKind::RebalanceAllocationUpdated {
            id: *id,
            allocations,
        }])
    }

    pub fn update_threshold(
        &mut self,
        caller: Address,
        id: &StrategyId,
        threshold_bps: u32,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let s = self.owned_mut(caller, id)?;
        if s.status.is_terminal() {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        s.rebalance_threshold_bps = threshold_bps;
        s.updated_at = now;
        Ok(vec![EventKind::RebalanceThresholdUpdated {
            id: *id,
            threshold_bps,
        }])
    }

    // ── Due-work enumeration ─────────────────────────────────────────────────

    /// Active strategies past their cadence gate, in insertion order. Drift
    /// evaluation is left to the dry-run since it needs the oracle.
    pub fn due_page(
        &self,
        now: Timestamp,
        start: usize,
        limit: usize,
    ) -> (Vec<StrategyId>, usize) {
        let mut due = Vec::new();
        let mut idx = start.min(self.order.len());
        while idx < self.order.len() && due.len() < limit {
            let id = self.order[idx];
            if let Some(s) = self.strategies.get(&id) {
                if s.status == StrategyStatus::Active
                    && now >= s.last_rebalance_time + s.min_interval_s
                {
                    due.push(id);
                }
            }
            idx += 1;
        }
        (due, idx)
    }
}
