//! Subscription engine: recurring fixed-amount transfers from a subscriber
//! to a recipient on a named billing cadence.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use aegis_core::constants::{
    BILLING_MONTHLY_SECS, BPS_DENOM, SUBSCRIPTION_DEFAULT_FEE_BPS, SUBSCRIPTION_MAX_FEE_BPS,
};
use aegis_core::error::AegisError;
use aegis_core::event::EventKind;
use aegis_core::types::{
    Address, Amount, BillingPeriod, Bps, PauseReason, StrategyId, StrategyStatus, Timestamp,
};
use aegis_shield::ShieldBook;

use crate::ExecutionContext;

// ── Subscription record ──────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: StrategyId,
    pub subscriber: Address,
    pub recipient: Address,
    pub status: StrategyStatus,
    pub pause_reason: Option<PauseReason>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,

    pub token: Address,
    pub amount: Amount,
    pub billing_period: BillingPeriod,
    pub next_payment_time: Timestamp,
    /// 0 = unbounded.
    pub max_payments: u32,
    pub payments_completed: u32,
    pub total_paid: Amount,
    pub cancelled_at: Option<Timestamp>,
}

/// Creation parameters as submitted by the subscriber.
#[derive(Clone, Debug)]
pub struct SubscriptionCreateParams {
    pub recipient: Address,
    pub token: Address,
    pub amount: Amount,
    pub billing_period: BillingPeriod,
    pub max_payments: u32,
    /// When set, the first payment is due immediately instead of one period
    /// from creation.
    pub execute_first_payment: bool,
}

/// Aggregated recipient-side view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientStats {
    pub active_count: u32,
    pub unique_subscribers: u32,
    /// Monthly-normalized revenue across active subscriptions.
    pub monthly_revenue: Amount,
}

/// Amount normalized to the flat 30-day month:
/// `amount · month_seconds / period_seconds`.
fn monthly_normalized(amount: Amount, period: BillingPeriod) -> Amount {
    amount * BILLING_MONTHLY_SECS as u128 / period.seconds() as u128
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct SubscriptionEngine {
    subscriptions: BTreeMap<StrategyId, Subscription>,
    order: Vec<StrategyId>,
    seq: u64,
    fee_bps: Bps,
    fee_recipient: Address,
}

impl SubscriptionEngine {
    pub fn new(fee_bps: Bps, fee_recipient: Address) -> Result<Self, AegisError> {
        if fee_bps > SUBSCRIPTION_MAX_FEE_BPS {
            return Err(AegisError::FeeTooHigh {
                got: fee_bps,
                max: SUBSCRIPTION_MAX_FEE_BPS,
            });
        }
        Ok(Self {
            subscriptions: BTreeMap::new(),
            order: Vec::new(),
            seq: 0,
            fee_bps,
            fee_recipient,
        })
    }

    pub fn with_default_fee(fee_recipient: Address) -> Self {
        Self::new(SUBSCRIPTION_DEFAULT_FEE_BPS, fee_recipient)
            .expect("default fee is within bounds")
    }

    pub fn get(&self, id: &StrategyId) -> Option<&Subscription> {
        self.subscriptions.get(id)
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
    ) -> Result<&mut Subscription, AegisError> {
        let s = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;
        if s.subscriber != caller {
            return Err(AegisError::NotOwner);
        }
        Ok(s)
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    pub fn create(
        &mut self,
        subscriber: Address,
        params: SubscriptionCreateParams,
        now: Timestamp,
    ) -> Result<(StrategyId, Vec<EventKind>), AegisError> {
        if params.recipient.is_zero() {
            return Err(AegisError::ZeroAddress);
        }
        if params.recipient == subscriber {
            return Err(AegisError::SelfSubscription);
        }
        if params.token.is_zero() {
            return Err(AegisError::NativeTokenSubscription);
        }
        if params.amount == 0 {
            return Err(AegisError::ZeroAmount);
        }

        let id = StrategyId::derive(
            &subscriber,
            &params.recipient,
            &params.token,
            params.amount,
            now,
            self.seq,
        );
        self.seq += 1;

        let next_payment_time = if params.execute_first_payment {
            now
        } else {
            now + params.billing_period.seconds()
        };

        let sub = Subscription {
            id,
            subscriber,
            recipient: params.recipient,
            status: StrategyStatus::Active,
            pause_reason: None,
            created_at: now,
            updated_at: now,
            token: params.token,
            amount: params.amount,
            billing_period: params.billing_period,
            next_payment_time,
            max_payments: params.max_payments,
            payments_completed: 0,
            total_paid: 0,
            cancelled_at: None,
        };

        let event = EventKind::SubscriptionCreated {
            id,
            subscriber,
            recipient: sub.recipient,
            token: sub.token,
            amount: sub.amount,
            billing_period: sub.billing_period,
            max_payments: sub.max_payments,
        };
        self.subscriptions.insert(id, sub);
        self.order.push(id);
        info!(subscription = %id, subscriber = %subscriber, "subscription created");
        Ok((id, vec![event]))
    }

    // ── Dry-run ──────────────────────────────────────────────────────────────

    pub fn can_execute(
        &self,
        id: &StrategyId,
        shield: &ShieldBook,
        executor: Address,
        now: Timestamp,
    ) -> Result<(), AegisError> {
        let s = self
            .subscriptions
            .get(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;
        if s.status != StrategyStatus::Active {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        if now < s.next_payment_time {
            return Err(AegisError::ExecutionTooEarly {
                due_at: s.next_payment_time,
            });
        }
        shield.check_spending_allowed(executor, s.subscriber, s.token, s.amount, now)
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Run one billing cycle: record the spend, pull the amount, route the
    /// protocol fee, transfer the remainder, advance the cadence. A bounded
    /// subscription that reaches its count expires.
    pub fn execute_payment(
        &mut self,
        id: &StrategyId,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(Amount, Vec<EventKind>), AegisError> {
        let fee_bps = self.fee_bps;
        let fee_recipient = self.fee_recipient;
        let s = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;
        if s.status != StrategyStatus::Active {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        if ctx.now < s.next_payment_time {
            return Err(AegisError::ExecutionTooEarly {
                due_at: s.next_payment_time,
            });
        }

        let amount = s.amount;
        ctx.shield
            .record_spending(ctx.executor, s.subscriber, s.token, amount, ctx.now)?;
        let mut events: Vec<EventKind> = Vec::new();

        ctx.wallet.pull(s.subscriber, s.token, amount)?;
        let fee = amount * fee_bps as u128 / BPS_DENOM;
        if fee > 0 {
            ctx.wallet.pay(s.token, fee_recipient, fee)?;
        }
        ctx.wallet.pay(s.token, s.recipient, amount - fee)?;

        s.next_payment_time += s.billing_period.seconds();
        s.payments_completed += 1;
        s.total_paid += amount;
        s.updated_at = ctx.now;
        events.push(EventKind::SubscriptionPaymentExecuted {
            id: *id,
            payment_index: s.payments_completed,
            amount,
            fee,
        });

        if s.max_payments > 0 && s.payments_completed == s.max_payments {
            s.status = StrategyStatus::Completed;
            events.push(EventKind::SubscriptionExpired { id: *id });
        }

        info!(
            subscription = %id,
            payment = s.payments_completed,
            amount,
            fee,
            "subscription payment executed"
        );
        Ok((amount - fee, events))
    }

    // ── Subscriber lifecycle ─────────────────────────────────────────────────

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
        Ok(vec![EventKind::SubscriptionPaused { id: *id }])
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
        Ok(vec![EventKind::SubscriptionResumed { id: *id }])
    }

    /// Cancellation marks `cancelled_at` once; repeat cancels are no-ops.
    pub fn cancel(
        &mut self,
        caller: Address,
        id: &StrategyId,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        let s = self.owned_mut(caller, id)?;
        if s.cancelled_at.is_some() {
            return Ok(vec![]);
        }
        s.status = StrategyStatus::Cancelled;
        s.cancelled_at = Some(now);
        s.updated_at = now;
        Ok(vec![EventKind::SubscriptionCancelled { id: *id }])
    }

    pub fn update_amount(
        &mut self,
        caller: Address,
        id: &StrategyId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        if amount == 0 {
            return Err(AegisError::ZeroAmount);
        }
        let s = self.owned_mut(caller, id)?;
        if s.status.is_terminal() {
            return Err(AegisError::StrategyNotActive {
                status: s.status.to_string(),
            });
        }
        s.amount = amount;
        s.updated_at = now;
        Ok(vec![EventKind::SubscriptionAmountUpdated { id: *id, amount }])
    }

    // ── Aggregation views ────────────────────────────────────────────────────

    /// Monthly-normalized outflow across the subscriber's active
    /// subscriptions.
    pub fn monthly_cost(&self, subscriber: Address) -> Amount {
        self.subscriptions
            .values()
            .filter(|s| s.subscriber == subscriber && s.status == StrategyStatus::Active)
            .map(|s| monthly_normalized(s.amount, s.billing_period))
            .sum()
    }

    /// Recipient-side aggregate over active subscriptions.
    pub fn recipient_stats(&self, recipient: Address) -> RecipientStats {
        let mut active_count = 0u32;
        let mut subscribers = BTreeSet::new();
        let mut monthly_revenue: Amount = 0;
        for s in self.subscriptions.values() {
            if s.recipient == recipient && s.status == StrategyStatus::Active {
                active_count += 1;
                subscribers.insert(s.subscriber);
                monthly_revenue += monthly_normalized(s.amount, s.billing_period);
            }
        }
        RecipientStats {
            active_count,
            unique_subscribers: subscribers.len() as u32,
            monthly_revenue,
        }
    }

    // ── Due-work enumeration ─────────────────────────────────────────────────

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
            if let Some(s) = self.subscriptions.get(&id) {
                if s.status == StrategyStatus::Active && now >= s.next_payment_time {
                    due.push(id);
                }
            }
            idx += 1;
        }
        (due, idx)
    }
}
