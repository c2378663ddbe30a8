//! Dollar-cost-averaging engine: time-interval, bounded-count accumulation
//! of a target token out of a source token.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aegis_core::constants::{
    BPS_DENOM, DCA_DEFAULT_FEE_BPS, DCA_MAX_EXECUTIONS, DCA_MAX_FEE_BPS, DCA_MAX_INTERVAL_SECS,
    DCA_MIN_EXECUTIONS, DCA_MIN_INTERVAL_SECS, SWAP_DEADLINE_SECS,
};
use aegis_core::error::AegisError;
use aegis_core::event::EventKind;
use aegis_core::types::{
    Address, Amount, Bps, PauseReason, Price, StrategyId, StrategyStatus, Timestamp,
};
use aegis_adapters::{SwapRequest, WalletAdapter};
use aegis_shield::ShieldBook;

use crate::anomaly;
use crate::ExecutionContext;

// ── Strategy record ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DcaStrategy {
    pub id: StrategyId,
    pub owner: Address,
    pub status: StrategyStatus,
    pub pause_reason: Option<PauseReason>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    pub source_token: Address,
    pub target_token: Address,
    pub amount_per_execution: Amount,
    pub min_amount_out: Amount,
    pub interval_s: Timestamp,
    pub next_execution_time: Timestamp,
    pub total_executions: u32,
    pub executions_completed: u32,
    pub pool_fee_bps: u32,

    /// Realized price of the most recent execution (source as unit).
    pub last_price: Price,
    /// EMA of realized prices; anomalous samples are excluded.
    pub rolling_avg_price: Price,
    pub total_invested: Amount,
    pub total_received: Amount,
}

/// Creation parameters as submitted by the owner.
#[derive(Clone, Debug)]
pub struct DcaCreateParams {
    pub source_token: Address,
    pub target_token: Address,
    pub amount_per_execution: Amount,
    pub min_amount_out: Amount,
    pub interval_s: Timestamp,
    pub total_executions: u32,
    pub pool_fee_bps: u32,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Registry and state machine for every DCA strategy.
pub struct DcaEngine {
    strategies: BTreeMap<StrategyId, DcaStrategy>,
    /// Insertion order; the paginated due-work scan walks this.
    order: Vec<StrategyId>,
    seq: u64,
    fee_bps: Bps,
    fee_recipient: Address,
}

impl DcaEngine {
    pub fn new(fee_bps: Bps, fee_recipient: Address) -> Result<Self, AegisError> {
        if fee_bps > DCA_MAX_FEE_BPS {
            return Err(AegisError::FeeTooHigh {
                got: fee_bps,
                max: DCA_MAX_FEE_BPS,
            });
        }
        Ok(Self {
            strategies: BTreeMap::new(),
            order: Vec::new(),
            seq: 0,
            fee_bps,
            fee_recipient,
        })
    }

    pub fn with_default_fee(fee_recipient: Address) -> Self {
        Self::new(DCA_DEFAULT_FEE_BPS, fee_recipient).expect("default fee is within bounds")
    }

    pub fn get(&self, id: &StrategyId) -> Option<&DcaStrategy> {
        self.strategies.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn get_mut(&mut self, id: &StrategyId) -> Result<&mut DcaStrategy, AegisError> {
        self.strategies
            .get_mut(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))
    }

    fn owned_mut(
        &mut self,
        caller: Address,
        id: &StrategyId,
    ) -> Result<&mut DcaStrategy, AegisError> {
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
        params: DcaCreateParams,
        now: Timestamp,
    ) -> Result<(StrategyId, Vec<EventKind>), AegisError> {
        if params.source_token.is_zero() || params.target_token.is_zero() {
            return Err(AegisError::ZeroAddress);
        }
        if params.source_token == params.target_token {
            return Err(AegisError::SameToken);
        }
        if params.amount_per_execution == 0 {
            return Err(AegisError::ZeroAmount);
        }
        if !(DCA_MIN_INTERVAL_SECS..=DCA_MAX_INTERVAL_SECS).contains(&params.interval_s) {
            return Err(AegisError::IntervalOutOfRange {
                got: params.interval_s,
                min: DCA_MIN_INTERVAL_SECS,
                max: DCA_MAX_INTERVAL_SECS,
            });
        }
        if !(DCA_MIN_EXECUTIONS..=DCA_MAX_EXECUTIONS).contains(&params.total_executions) {
            return Err(AegisError::ExecutionCountOutOfRange {
                got: params.total_executions,
                min: DCA_MIN_EXECUTIONS,
                max: DCA_MAX_EXECUTIONS,
            });
        }

        let id = StrategyId::derive(
            &owner,
            &params.source_token,
            &params.target_token,
            params.amount_per_execution,
            now,
            self.seq,
        );
        self.seq += 1;

        let strategy = DcaStrategy {
            id,
            owner,
            status: StrategyStatus::Active,
            pause_reason: None,
            created_at: now,
            updated_at: now,
            source_token: params.source_token,
            target_token: params.target_token,
            amount_per_execution: params.amount_per_execution,
            min_amount_out: params.min_amount_out,
            interval_s: params.interval_s,
            // The first execution is immediately due.
            next_execution_time: now,
            total_executions: params.total_executions,
            executions_completed: 0,
            pool_fee_bps: params.pool_fee_bps,
            last_price: 0,
            rolling_avg_price: 0,
            total_invested: 0,
            total_received: 0,
        };

        let event = EventKind::DcaStrategyCreated {
            id,
            owner,
            source_token: strategy.source_token,
            target_token: strategy.target_token,
            amount_per_execution: strategy.amount_per_execution,
            interval_s: strategy.interval_s,
            total_executions: strategy.total_executions,
        };
        self.strategies.insert(id, strategy);
        self.order.push(id);
        info!(strategy = %id, owner = %owner, "dca strategy created");
        Ok((id, vec![event]))
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
        Ok(vec![EventKind::DcaStrategyPaused {
            id: *id,
            reason: PauseReason::Owner,
        }])
    }

    pub fn resume(
        &mut self,
        caller: Address,
        id: &StrategyId,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let s = self.owned_mut(caller, id)?;
        if s.executions_completed >= s.total_executions {
            return Err(AegisError::StrategyCompleted);
        }
        if s.status != StrategyStatus::Paused {
            return Err(AegisError::StrategyNotPaused {
                status: s.status.to_string(),
            });
        }
        s.status = StrategyStatus::Active;
        s.pause_reason = None;
        s.updated_at = now;
        Ok(vec![EventKind::DcaStrategyResumed { id: *id }])
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
        Ok(vec![EventKind::DcaStrategyCancelled { id: *id }])
    }

    pub fn update(
        &mut self,
        caller: Address,
        id: &StrategyId,
        amount_per_execution: Amount,
        min_amount_out: Amount,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        if amount_per_execution == 0 {
            return Err(AegisError::ZeroAmount);
        }
        let s = self.owned_mut(caller, id)?;
        if s.status.is_terminal() {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        s.amount_per_execution = amount_per_execution;
        s.min_amount_out = min_amount_out;
        s.updated_at = now;
        Ok(vec![EventKind::DcaStrategyUpdated {
            id: *id,
            amount_per_execution,
            min_amount_out,
        }])
    }

    // ── Dry-run ──────────────────────────────────────────────────────────────

    /// Feasibility check mirroring [`Self::execute`] without mutating
    /// anything. The scheduler uses this to discard infeasible candidates
    /// with a reportable reason.
    pub fn can_execute(
        &self,
        id: &StrategyId,
        shield: &ShieldBook,
        wallet: &dyn WalletAdapter,
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
        if s.executions_completed >= s.total_executions {
            return Err(AegisError::StrategyCompleted);
        }
        if now < s.next_execution_time {
            return Err(AegisError::ExecutionTooEarly {
                due_at: s.next_execution_time,
            });
        }
        shield.check_spending_allowed(executor, s.owner, s.source_token, s.amount_per_execution, now)?;
        let have = wallet.balance_of(s.owner, s.source_token);
        if have < s.amount_per_execution {
            return Err(AegisError::InsufficientBalance {
                need: s.amount_per_execution,
                have,
            });
        }
        Ok(())
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Run one accumulation step. The check ordering is normative:
    /// status → count → cadence → shield record → pull → fee → swap →
    /// anomaly guard → counters / completion.
    ///
    /// An anomaly pause does not fail the call: the swap commits and the
    /// pause lands as a post-condition transition.
    pub fn execute(
        &mut self,
        id: &StrategyId,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(Amount, Vec<EventKind>), AegisError> {
        let fee_bps = self.fee_bps;
        let fee_recipient = self.fee_recipient;
        let s = self.get_mut(id)?;

        if s.status != StrategyStatus::Active {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        if s.executions_completed >= s.total_executions {
            return Err(AegisError::StrategyCompleted);
        }
        if ctx.now < s.next_execution_time {
            return Err(AegisError::ExecutionTooEarly {
                due_at: s.next_execution_time,
            });
        }

        let amount = s.amount_per_execution;
        // Journals SpendingRecorded on the book; drained by the ingestion
        // layer even if a later step fails.
        ctx.shield
            .record_spending(ctx.executor, s.owner, s.source_token, amount, ctx.now)?;
        let mut events: Vec<EventKind> = Vec::new();

        ctx.wallet.pull(s.owner, s.source_token, amount)?;

        let fee = amount * fee_bps as u128 / BPS_DENOM;
        if fee > 0 {
            ctx.wallet.pay(s.source_token, fee_recipient, fee)?;
        }
        let swap_in = amount - fee;

        // One-shot allowance equal to the input, then the swap itself. Output
        // below min_amount_out surfaces as SlippageExceeded from the venue.
        ctx.wallet
            .approve(s.source_token, ctx.exchange.venue(), swap_in)?;
        let amount_out = ctx.exchange.swap(
            &SwapRequest {
                token_in: s.source_token,
                token_out: s.target_token,
                amount_in: swap_in,
                min_out: s.min_amount_out,
                pool_fee_bps: s.pool_fee_bps,
                recipient: s.owner,
                deadline: ctx.now + SWAP_DEADLINE_SECS,
            },
            ctx.now,
        )?;

        // Anomaly guard: the swap has committed either way.
        let realized = anomaly::realized_price(swap_in, amount_out);
        let first = s.executions_completed == 0;
        let assessment = anomaly::assess(s.rolling_avg_price, realized);
        if first {
            s.rolling_avg_price = realized;
        } else if assessment.anomalous {
            warn!(
                strategy = %id,
                rolling_avg = s.rolling_avg_price,
                realized,
                deviation_bps = assessment.deviation_bps,
                "price anomaly; auto-pausing"
            );
        } else {
            s.rolling_avg_price = anomaly::ema(s.rolling_avg_price, realized);
        }
        s.last_price = realized;

        s.executions_completed += 1;
        s.next_execution_time += s.interval_s;
        s.total_invested += amount;
        s.total_received += amount_out;
        s.updated_at = ctx.now;

        events.push(EventKind::DcaExecuted {
            id: *id,
            owner: s.owner,
            execution_index: s.executions_completed,
            amount_in: amount,
            fee,
            amount_out,
            realized_price: realized,
        });

        if !first && assessment.anomalous {
            s.status = StrategyStatus::Paused;
            s.pause_reason = Some(PauseReason::PriceAnomaly);
            events.push(EventKind::DcaAutoPaused {
                id: *id,
                rolling_avg_price: s.rolling_avg_price,
                realized_price: realized,
                deviation_bps: assessment.deviation_bps,
            });
            events.push(EventKind::DcaStrategyPaused {
                id: *id,
                reason: PauseReason::PriceAnomaly,
            });
        }

        if s.executions_completed == s.total_executions {
            s.status = StrategyStatus::Completed;
            s.pause_reason = None;
            events.push(EventKind::DcaStrategyCompleted { id: *id });
        }

        info!(
            strategy = %id,
            execution = s.executions_completed,
            amount_in = amount,
            amount_out,
            "dca executed"
        );
        Ok((amount_out, events))
    }

    /// Execute a batch of strategies. Each entry is isolated: a failure
    /// yields 0 for that entry and the batch continues.
    pub fn execute_batch(
        &mut self,
        ids: &[StrategyId],
        ctx: &mut ExecutionContext<'_>,
    ) -> (Vec<Amount>, Vec<EventKind>) {
        let mut outputs = Vec::with_capacity(ids.len());
        let mut events = Vec::new();
        for id in ids {
            match self.execute(id, ctx) {
                Ok((out, mut evs)) => {
                    outputs.push(out);
                    events.append(&mut evs);
                }
                Err(e) => {
                    warn!(strategy = %id, error = %e, "batch entry failed");
                    outputs.push(0);
                }
            }
        }
        (outputs, events)
    }

    // ── Due-work enumeration ─────────────────────────────────────────────────

    /// Paginated, resumable scan over the registry in insertion order.
    /// Returns at most `limit` due strategies and the index at which to
    /// resume; an index of `self.len()` means the scan is exhausted.
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
                    && s.executions_completed < s.total_executions
                    && now >= s.next_execution_time
                {
                    due.push(id);
                }
            }
            idx += 1;
        }
        (due, idx)
    }
}
