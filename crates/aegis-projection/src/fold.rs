//! The projection fold.
//!
//! [`Projection::apply`] consumes stamped events in `(block, log_index)`
//! order and, per event: (a) upserts the user and the global counters,
//! (b) mutates the principal entity row, (c) appends the activity row,
//! (d) advances derived aggregates (per-strategy price averages and
//! per-user daily stats). The fold is pure over the event stream: clearing
//! every table and re-folding reproduces byte-equal rows.

use tracing::debug;

use aegis_core::constants::{EMA_KEEP_WEIGHT, EMA_SAMPLE_WEIGHT, EMA_WEIGHT_DENOM, PRICE_SCALE};
use aegis_core::error::AegisError;
use aegis_core::event::{Event, EventKind};
use aegis_core::types::{Address, Amount, Price, StrategyId, StrategyStatus, Timestamp};

use crate::db::ProjectionDb;
use crate::log::EventLog;
use crate::tables::*;

/// Calendar-day bucket key (UTC) for daily stats.
fn date_string(ts: Timestamp) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.date_naive().format("%Y-%m-%d").to_string(),
        None => "0000-00-00".to_string(),
    }
}

fn ema(avg: Price, sample: Price) -> Price {
    (avg * EMA_KEEP_WEIGHT + sample * EMA_SAMPLE_WEIGHT) / EMA_WEIGHT_DENOM
}

fn vw_average(total_in: Amount, total_out: Amount) -> Price {
    if total_out == 0 {
        return 0;
    }
    match total_in.checked_mul(PRICE_SCALE) {
        Some(scaled) => scaled / total_out,
        None => (total_in / total_out).saturating_mul(PRICE_SCALE),
    }
}

pub struct Projection {
    db: ProjectionDb,
}

impl Projection {
    pub fn new(db: ProjectionDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &ProjectionDb {
        &self.db
    }

    /// Fold one stamped event into the read model.
    pub fn apply(&self, event: &Event) -> Result<(), AegisError> {
        let ts = event.timestamp;

        // (a) user upsert; creation bumps the global user count exactly once.
        if let Some(user) = event.kind.principal_user() {
            self.upsert_user(user, ts)?;
        }

        // (b) principal entity + (d) aggregates.
        self.apply_kind(event)?;

        // (c) activity audit row.
        self.db.put_activity(&ActivityRow {
            tx_hash: event.tx_hash,
            log_index: event.log_index,
            block_number: event.block_number,
            timestamp: ts,
            event_name: event.kind.name().to_string(),
            user: event.kind.principal_user(),
        })?;
        debug!(event = event.kind.name(), block = event.block_number, "event folded");
        Ok(())
    }

    /// Drop every row and re-fold the full log. Returns the event count.
    pub fn refold(&self, log: &EventLog) -> Result<usize, AegisError> {
        self.db.clear_all()?;
        let events = log.iter_all()?;
        for event in &events {
            self.apply(event)?;
        }
        Ok(events.len())
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn upsert_user(&self, address: Address, ts: Timestamp) -> Result<(), AegisError> {
        match self.db.get_user(&address)? {
            Some(mut row) => {
                row.last_seen = ts;
                self.db.put_user(&row)
            }
            None => {
                self.db.put_user(&UserRow::new(address, ts))?;
                let mut stats = self.db.global_stats()?;
                stats.total_users += 1;
                self.db.put_global_stats(&stats)
            }
        }
    }

    fn shield_or_default(&self, user: Address, ts: Timestamp) -> Result<ShieldRow, AegisError> {
        Ok(self.db.get_shield(&user)?.unwrap_or(ShieldRow {
            user,
            daily_limit: 0,
            single_tx_limit: 0,
            spent_today: 0,
            is_active: false,
            emergency_mode: false,
            whitelist_enabled: false,
            token_limits: Default::default(),
            pending_daily_limit: None,
            pending_single_tx_limit: None,
            pending_effective_at: None,
            activated_at: ts,
        }))
    }

    fn credit_user_execution(
        &self,
        user: Address,
        invested: Amount,
        received: Amount,
        ts: Timestamp,
    ) -> Result<(), AegisError> {
        let mut row = self
            .db
            .get_user(&user)?
            .unwrap_or_else(|| UserRow::new(user, ts));
        row.total_invested += invested;
        row.total_received += received;
        row.execution_count += 1;
        row.last_seen = ts;
        self.db.put_user(&row)
    }

    fn bump_daily_execution(&self, user: Address, ts: Timestamp) -> Result<(), AegisError> {
        let date = date_string(ts);
        let mut row = self
            .db
            .get_daily_stats(&user, &date)?
            .unwrap_or(DailyStatsRow {
                user,
                date: date.clone(),
                spend_volume: 0,
                spend_count: 0,
                executions: 0,
            });
        row.executions += 1;
        self.db.put_daily_stats(&row)
    }

    fn dca_mut(&self, id: &StrategyId) -> Result<Option<DcaStrategyRow>, AegisError> {
        self.db.get_dca(id)
    }

    // ── Event dispatch ───────────────────────────────────────────────────────

    fn apply_kind(&self, event: &Event) -> Result<(), AegisError> {
        use EventKind::*;
        let ts = event.timestamp;
        match &event.kind {
            // ── Shield ───────────────────────────────────────────────────────
            ShieldActivated {
                user,
                daily_limit,
                single_tx_limit,
            } => {
                self.db.put_shield(&ShieldRow {
                    user: *user,
                    daily_limit: *daily_limit,
                    single_tx_limit: *single_tx_limit,
                    spent_today: 0,
                    is_active: true,
                    emergency_mode: false,
                    whitelist_enabled: false,
                    token_limits: Default::default(),
                    pending_daily_limit: None,
                    pending_single_tx_limit: None,
                    pending_effective_at: None,
                    activated_at: ts,
                })?;
            }
            ShieldConfigUpdated {
                user,
                daily_limit,
                single_tx_limit,
            } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.daily_limit = *daily_limit;
                row.single_tx_limit = *single_tx_limit;
                self.db.put_shield(&row)?;
            }
            ShieldDeactivated { user } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.is_active = false;
                self.db.put_shield(&row)?;
            }
            EmergencyEnabled { user } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.emergency_mode = true;
                self.db.put_shield(&row)?;
            }
            EmergencyDisabled { user } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.emergency_mode = false;
                self.db.put_shield(&row)?;
            }
            SpendingRecorded {
                user,
                token,
                amount,
                new_daily_total,
            } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.spent_today = *new_daily_total;
                self.db.put_shield(&row)?;

                self.db.put_spending_record(&SpendingRecordRow {
                    tx_hash: event.tx_hash,
                    log_index: event.log_index,
                    user: *user,
                    token: *token,
                    amount: *amount,
                    new_daily_total: *new_daily_total,
                    block_number: event.block_number,
                    timestamp: ts,
                })?;

                let mut token_row = self.db.get_token(token)?.unwrap_or(TokenRow {
                    address: *token,
                    spend_volume: 0,
                    spend_count: 0,
                    first_seen: ts,
                });
                token_row.spend_volume += amount;
                token_row.spend_count += 1;
                self.db.put_token(&token_row)?;

                let date = date_string(ts);
                let mut daily = self
                    .db
                    .get_daily_stats(user, &date)?
                    .unwrap_or(DailyStatsRow {
                        user: *user,
                        date: date.clone(),
                        spend_volume: 0,
                        spend_count: 0,
                        executions: 0,
                    });
                daily.spend_volume += amount;
                daily.spend_count += 1;
                self.db.put_daily_stats(&daily)?;

                let mut stats = self.db.global_stats()?;
                stats.total_spend_volume += amount;
                stats.spending_records += 1;
                self.db.put_global_stats(&stats)?;
            }
            ContractWhitelisted { user, target } => {
                self.db.put_whitelisted(&WhitelistedContractRow {
                    user: *user,
                    target: *target,
                    active: true,
                    updated_at: ts,
                })?;
            }
            ContractUnwhitelisted { user, target } => {
                self.db.put_whitelisted(&WhitelistedContractRow {
                    user: *user,
                    target: *target,
                    active: false,
                    updated_at: ts,
                })?;
            }
            WhitelistModeEnabled { user } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.whitelist_enabled = true;
                self.db.put_shield(&row)?;
            }
            WhitelistModeDisabled { user } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.whitelist_enabled = false;
                self.db.put_shield(&row)?;
            }
            ConfigUpdateProposed {
                user,
                new_daily_limit,
                new_single_tx_limit,
                effective_at,
            } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.pending_daily_limit = Some(*new_daily_limit);
                row.pending_single_tx_limit = Some(*new_single_tx_limit);
                row.pending_effective_at = Some(*effective_at);
                self.db.put_shield(&row)?;
            }
            ConfigUpdateExecuted {
                user,
                daily_limit,
                single_tx_limit,
            } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.daily_limit = *daily_limit;
                row.single_tx_limit = *single_tx_limit;
                row.pending_daily_limit = None;
                row.pending_single_tx_limit = None;
                row.pending_effective_at = None;
                self.db.put_shield(&row)?;
            }
            ConfigUpdateCancelled { user } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.pending_daily_limit = None;
                row.pending_single_tx_limit = None;
                row.pending_effective_at = None;
                self.db.put_shield(&row)?;
            }
            TokenLimitSet {
                user,
                token,
                daily_limit,
            } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.token_limits.insert(*token, *daily_limit);
                self.db.put_shield(&row)?;
            }
            TokenLimitRemoved { user, token } => {
                let mut row = self.shield_or_default(*user, ts)?;
                row.token_limits.remove(token);
                self.db.put_shield(&row)?;
            }
            ExecutorAuthorized { .. } | ExecutorRevoked { .. } | ProtocolPauseSet { .. } => {}

            // ── DCA ──────────────────────────────────────────────────────────
            DcaStrategyCreated {
                id,
                owner,
                source_token,
                target_token,
                amount_per_execution,
                interval_s,
                total_executions,
            } => {
                self.db.put_dca(&DcaStrategyRow {
                    id: *id,
                    owner: *owner,
                    status: StrategyStatus::Active,
                    source_token: *source_token,
                    target_token: *target_token,
                    amount_per_execution: *amount_per_execution,
                    min_amount_out: 0,
                    interval_s: *interval_s,
                    total_executions: *total_executions,
                    executions_completed: 0,
                    total_invested: 0,
                    total_received: 0,
                    last_price: 0,
                    rolling_avg_price: 0,
                    average_price: 0,
                    created_at: ts,
                    updated_at: ts,
                })?;
                let mut stats = self.db.global_stats()?;
                stats.dca.strategies_created += 1;
                self.db.put_global_stats(&stats)?;
            }
            DcaExecuted {
                id,
                owner,
                execution_index,
                amount_in,
                fee,
                amount_out,
                realized_price,
            } => {
                if let Some(mut row) = self.dca_mut(id)? {
                    row.executions_completed = *execution_index;
                    row.total_invested += amount_in;
                    row.total_received += amount_out;
                    row.last_price = *realized_price;
                    // Anomalous samples get reverted by the trailing
                    // DCAAutoPaused event, which carries the preserved
                    // average.
                    row.rolling_avg_price = if *execution_index == 1 {
                        *realized_price
                    } else {
                        ema(row.rolling_avg_price, *realized_price)
                    };
                    row.average_price = vw_average(row.total_invested, row.total_received);
                    row.updated_at = ts;
                    self.db.put_dca(&row)?;
                }
                self.db.put_dca_execution(&DcaExecutionRow {
                    tx_hash: event.tx_hash,
                    log_index: event.log_index,
                    strategy_id: *id,
                    execution_index: *execution_index,
                    amount_in: *amount_in,
                    fee: *fee,
                    amount_out: *amount_out,
                    realized_price: *realized_price,
                    block_number: event.block_number,
                    timestamp: ts,
                })?;
                self.credit_user_execution(*owner, *amount_in, *amount_out, ts)?;
                self.bump_daily_execution(*owner, ts)?;
                let mut stats = self.db.global_stats()?;
                stats.dca.executions += 1;
                stats.dca.volume += amount_in;
                self.db.put_global_stats(&stats)?;
            }
            DcaStrategyPaused { id, .. } => {
                if let Some(mut row) = self.dca_mut(id)? {
                    row.status = StrategyStatus::Paused;
                    row.updated_at = ts;
                    self.db.put_dca(&row)?;
                }
            }
            DcaStrategyResumed { id } => {
                if let Some(mut row) = self.dca_mut(id)? {
                    row.status = StrategyStatus::Active;
                    row.updated_at = ts;
                    self.db.put_dca(&row)?;
                }
            }
            DcaStrategyCancelled { id } => {
                if let Some(mut row) = self.dca_mut(id)? {
                    row.status = StrategyStatus::Cancelled;
                    row.updated_at = ts;
                    self.db.put_dca(&row)?;
                }
            }
            DcaStrategyCompleted { id } => {
                if let Some(mut row) = self.dca_mut(id)? {
                    row.status = StrategyStatus::Completed;
                    row.updated_at = ts;
                    self.db.put_dca(&row)?;
                }
            }
            DcaStrategyUpdated {
                id,
                amount_per_execution,
                min_amount_out,
            } => {
                if let Some(mut row) = self.dca_mut(id)? {
                    row.amount_per_execution = *amount_per_execution;
                    row.min_amount_out = *min_amount_out;
                    row.updated_at = ts;
                    self.db.put_dca(&row)?;
                }
            }
            DcaAutoPaused {
                id,
                rolling_avg_price,
                ..
            } => {
                if let Some(mut row) = self.dca_mut(id)? {
                    row.status = StrategyStatus::Paused;
                    // Restore the pre-anomaly average the event preserved.
                    row.rolling_avg_price = *rolling_avg_price;
                    row.updated_at = ts;
                    self.db.put_dca(&row)?;
                }
            }

            // ── Stop-loss ────────────────────────────────────────────────────
            StopLossCreated {
                id,
                owner,
                token_to_sell,
                token_to_receive,
                amount,
                kind,
                trigger_price,
            } => {
                self.db.put_stop_loss(&StopLossRow {
                    id: *id,
                    owner: *owner,
                    status: StrategyStatus::Active,
                    token_to_sell: *token_to_sell,
                    token_to_receive: *token_to_receive,
                    amount: *amount,
                    kind: *kind,
                    trigger_price: *trigger_price,
                    highest_price: 0,
                    min_amount_out: 0,
                    triggered_at: None,
                    executed_at: None,
                    executed_amount: 0,
                    created_at: ts,
                    updated_at: ts,
                })?;
                let mut stats = self.db.global_stats()?;
                stats.stop_loss.strategies_created += 1;
                self.db.put_global_stats(&stats)?;
            }
            StopLossTriggered { id, .. } => {
                if let Some(mut row) = self.db.get_stop_loss(id)? {
                    row.status = StrategyStatus::Triggered;
                    row.triggered_at = Some(ts);
                    row.updated_at = ts;
                    self.db.put_stop_loss(&row)?;
                }
            }
            StopLossExecuted {
                id,
                amount_in,
                amount_out,
            } => {
                let mut owner = None;
                if let Some(mut row) = self.db.get_stop_loss(id)? {
                    row.status = StrategyStatus::Completed;
                    row.executed_at = Some(ts);
                    row.executed_amount = *amount_in;
                    row.updated_at = ts;
                    owner = Some(row.owner);
                    self.db.put_stop_loss(&row)?;
                }
                self.db.put_stop_loss_execution(&StopLossExecutionRow {
                    tx_hash: event.tx_hash,
                    log_index: event.log_index,
                    strategy_id: *id,
                    amount_in: *amount_in,
                    amount_out: *amount_out,
                    block_number: event.block_number,
                    timestamp: ts,
                })?;
                if let Some(owner) = owner {
                    self.credit_user_execution(owner, *amount_in, *amount_out, ts)?;
                    self.bump_daily_execution(owner, ts)?;
                }
                let mut stats = self.db.global_stats()?;
                stats.stop_loss.executions += 1;
                stats.stop_loss.volume += amount_in;
                self.db.put_global_stats(&stats)?;
            }
            StopLossUpdated {
                id,
                trigger_price,
                min_amount_out,
            } => {
                if let Some(mut row) = self.db.get_stop_loss(id)? {
                    row.trigger_price = *trigger_price;
                    row.min_amount_out = *min_amount_out;
                    row.updated_at = ts;
                    self.db.put_stop_loss(&row)?;
                }
            }
            StopLossPaused { id } => {
                if let Some(mut row) = self.db.get_stop_loss(id)? {
                    row.status = StrategyStatus::Paused;
                    row.updated_at = ts;
                    self.db.put_stop_loss(&row)?;
                }
            }
            StopLossResumed { id } => {
                if let Some(mut row) = self.db.get_stop_loss(id)? {
                    row.status = StrategyStatus::Active;
                    row.updated_at = ts;
                    self.db.put_stop_loss(&row)?;
                }
            }
            StopLossCancelled { id } => {
                if let Some(mut row) = self.db.get_stop_loss(id)? {
                    row.status = StrategyStatus::Cancelled;
                    row.updated_at = ts;
                    self.db.put_stop_loss(&row)?;
                }
            }
            HighestPriceUpdated {
                id,
                highest_price,
                trigger_price,
            } => {
                if let Some(mut row) = self.db.get_stop_loss(id)? {
                    row.highest_price = *highest_price;
                    row.trigger_price = *trigger_price;
                    row.updated_at = ts;
                    self.db.put_stop_loss(&row)?;
                }
            }

            // ── Rebalance ────────────────────────────────────────────────────
            RebalanceCreated {
                id,
                owner,
                allocations,
                threshold_bps,
                min_interval_s,
            } => {
                self.db.put_rebalance(&RebalanceRow {
                    id: *id,
                    owner: *owner,
                    status: StrategyStatus::Active,
                    allocations: allocations.clone(),
                    threshold_bps: *threshold_bps,
                    min_interval_s: *min_interval_s,
                    last_rebalance_time: 0,
                    total_rebalances: 0,
                    created_at: ts,
                    updated_at: ts,
                })?;
                self.db.replace_allocations(id, allocations)?;
                let mut stats = self.db.global_stats()?;
                stats.rebalance.strategies_created += 1;
                self.db.put_global_stats(&stats)?;
            }
            RebalanceExecuted {
                id,
                legs_executed,
                total_value,
            } => {
                let mut owner = None;
                if let Some(mut row) = self.db.get_rebalance(id)? {
                    row.total_rebalances += 1;
                    row.last_rebalance_time = ts;
                    row.updated_at = ts;
                    owner = Some(row.owner);
                    self.db.put_rebalance(&row)?;
                }
                self.db.put_rebalance_execution(&RebalanceExecutionRow {
                    tx_hash: event.tx_hash,
                    log_index: event.log_index,
                    strategy_id: *id,
                    legs_executed: *legs_executed,
                    total_value: *total_value,
                    block_number: event.block_number,
                    timestamp: ts,
                })?;
                if let Some(owner) = owner {
                    self.bump_daily_execution(owner, ts)?;
                }
                let mut stats = self.db.global_stats()?;
                stats.rebalance.executions += 1;
                stats.rebalance.volume += total_value;
                self.db.put_global_stats(&stats)?;
            }
            RebalancePaused { id } => {
                if let Some(mut row) = self.db.get_rebalance(id)? {
                    row.status = StrategyStatus::Paused;
                    row.updated_at = ts;
                    self.db.put_rebalance(&row)?;
                }
            }
            RebalanceResumed { id } => {
                if let Some(mut row) = self.db.get_rebalance(id)? {
                    row.status = StrategyStatus::Active;
                    row.updated_at = ts;
                    self.db.put_rebalance(&row)?;
                }
            }
            RebalanceCancelled { id } => {
                if let Some(mut row) = self.db.get_rebalance(id)? {
                    row.status = StrategyStatus::Cancelled;
                    row.updated_at = ts;
                    self.db.put_rebalance(&row)?;
                }
            }
            RebalanceAllocationUpdated { id, allocations } => {
                if let Some(mut row) = self.db.get_rebalance(id)? {
                    row.allocations = allocations.clone();
                    row.updated_at = ts;
                    self.db.put_rebalance(&row)?;
                }
                self.db.replace_allocations(id, allocations)?;
            }
            RebalanceThresholdUpdated { id, threshold_bps } => {
                if let Some(mut row) = self.db.get_rebalance(id)? {
                    row.threshold_bps = *threshold_bps;
                    row.updated_at = ts;
                    self.db.put_rebalance(&row)?;
                }
            }

            // ── Subscription ─────────────────────────────────────────────────
            SubscriptionCreated {
                id,
                subscriber,
                recipient,
                token,
                amount,
                billing_period,
                max_payments,
            } => {
                self.db.put_subscription(&SubscriptionRow {
                    id: *id,
                    subscriber: *subscriber,
                    recipient: *recipient,
                    status: StrategyStatus::Active,
                    token: *token,
                    amount: *amount,
                    billing_period: *billing_period,
                    max_payments: *max_payments,
                    payments_completed: 0,
                    total_paid: 0,
                    cancelled_at: None,
                    created_at: ts,
                    updated_at: ts,
                })?;
                let mut stats = self.db.global_stats()?;
                stats.subscription.strategies_created += 1;
                self.db.put_global_stats(&stats)?;
            }
            SubscriptionPaymentExecuted {
                id,
                payment_index,
                amount,
                fee,
            } => {
                let mut subscriber = None;
                if let Some(mut row) = self.db.get_subscription(id)? {
                    row.payments_completed = *payment_index;
                    row.total_paid += amount;
                    row.updated_at = ts;
                    subscriber = Some(row.subscriber);
                    self.db.put_subscription(&row)?;
                }
                self.db.put_payment(&PaymentRow {
                    tx_hash: event.tx_hash,
                    log_index: event.log_index,
                    subscription_id: *id,
                    payment_index: *payment_index,
                    amount: *amount,
                    fee: *fee,
                    block_number: event.block_number,
                    timestamp: ts,
                })?;
                if let Some(subscriber) = subscriber {
                    self.credit_user_execution(subscriber, *amount, 0, ts)?;
                    self.bump_daily_execution(subscriber, ts)?;
                }
                let mut stats = self.db.global_stats()?;
                stats.subscription.executions += 1;
                stats.subscription.volume += amount;
                self.db.put_global_stats(&stats)?;
            }
            SubscriptionPaused { id } => {
                if let Some(mut row) = self.db.get_subscription(id)? {
                    row.status = StrategyStatus::Paused;
                    row.updated_at = ts;
                    self.db.put_subscription(&row)?;
                }
            }
            SubscriptionResumed { id } => {
                if let Some(mut row) = self.db.get_subscription(id)? {
                    row.status = StrategyStatus::Active;
                    row.updated_at = ts;
                    self.db.put_subscription(&row)?;
                }
            }
            SubscriptionCancelled { id } => {
                if let Some(mut row) = self.db.get_subscription(id)? {
                    row.status = StrategyStatus::Cancelled;
                    row.cancelled_at = Some(ts);
                    row.updated_at = ts;
                    self.db.put_subscription(&row)?;
                }
            }
            SubscriptionExpired { id } => {
                if let Some(mut row) = self.db.get_subscription(id)? {
                    row.status = StrategyStatus::Completed;
                    row.updated_at = ts;
                    self.db.put_subscription(&row)?;
                }
            }
            SubscriptionAmountUpdated { id, amount } => {
                if let Some(mut row) = self.db.get_subscription(id)? {
                    row.amount = *amount;
                    row.updated_at = ts;
                    self.db.put_subscription(&row)?;
                }
            }

            // ── Emergency withdraw (audit trail only) ────────────────────────
            EmergencyWithdrawProposed { .. }
            | EmergencyWithdrawExecuted { .. }
            | EmergencyWithdrawCancelled => {}
        }
        Ok(())
    }

    // ── Read API for the scheduler ───────────────────────────────────────────

    /// DCA strategies whose next execution (creation anchor + completed
    /// intervals) is due. Eventually consistent with the engine; the
    /// dry-run re-checks everything.
    pub fn due_dca(&self, now: Timestamp, limit: usize) -> Result<Vec<StrategyId>, AegisError> {
        let mut out = Vec::new();
        for row in self.db.iter_dca()? {
            if out.len() >= limit {
                break;
            }
            let next_due = row.created_at + row.executions_completed as i64 * row.interval_s;
            if row.status == StrategyStatus::Active
                && row.executions_completed < row.total_executions
                && now >= next_due
            {
                out.push(row.id);
            }
        }
        Ok(out)
    }

    /// Subscriptions whose next billing window has opened, assuming the
    /// deferred-first-payment anchor. Subscriptions created with an
    /// immediate first payment surface one period late here; the engine
    /// scan and dry-run stay authoritative.
    pub fn due_subscriptions(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<StrategyId>, AegisError> {
        let mut out = Vec::new();
        for row in self.db.iter_subscriptions()? {
            if out.len() >= limit {
                break;
            }
            let next_due =
                row.created_at + (row.payments_completed as i64 + 1) * row.billing_period.seconds();
            if row.status == StrategyStatus::Active
                && (row.max_payments == 0 || row.payments_completed < row.max_payments)
                && now >= next_due
            {
                out.push(row.id);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::types::{BillingPeriod, PauseReason};

    const T0: Timestamp = 1_700_000_000;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn sid(b: u8) -> StrategyId {
        StrategyId::from_bytes([b; 32])
    }

    fn open(tag: &str) -> (sled::Db, EventLog, Projection) {
        let path = std::env::temp_dir().join(format!("aegis_fold_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        let db = sled::open(&path).unwrap();
        let log = EventLog::open(&db).unwrap();
        let projection = Projection::new(ProjectionDb::open(&db).unwrap());
        (db, log, projection)
    }

    fn sample_kinds() -> Vec<Vec<EventKind>> {
        let user = addr(1);
        let usdc = addr(0xA0);
        let weth = addr(0xB0);
        let dca = sid(0xD0);
        let sub = sid(0x50);
        vec![
            vec![EventKind::ShieldActivated {
                user,
                daily_limit: 1_000_000_000,
                single_tx_limit: 100_000_000,
            }],
            vec![EventKind::DcaStrategyCreated {
                id: dca,
                owner: user,
                source_token: usdc,
                target_token: weth,
                amount_per_execution: 20_000_000,
                interval_s: 86_400,
                total_executions: 30,
            }],
            vec![
                EventKind::SpendingRecorded {
                    user,
                    token: usdc,
                    amount: 20_000_000,
                    new_daily_total: 20_000_000,
                },
                EventKind::DcaExecuted {
                    id: dca,
                    owner: user,
                    execution_index: 1,
                    amount_in: 20_000_000,
                    fee: 60_000,
                    amount_out: 19_940_000,
                    realized_price: PRICE_SCALE,
                },
            ],
            vec![EventKind::SubscriptionCreated {
                id: sub,
                subscriber: user,
                recipient: addr(2),
                token: usdc,
                amount: 10_000_000,
                billing_period: BillingPeriod::Monthly,
                max_payments: 3,
            }],
            vec![EventKind::DcaStrategyPaused {
                id: dca,
                reason: PauseReason::Owner,
            }],
        ]
    }

    #[test]
    fn fold_builds_read_model() {
        let (_db, mut log, projection) = open("build");
        for (i, batch) in sample_kinds().into_iter().enumerate() {
            let stamped = log.append_block(batch, T0 + i as i64 * 60).unwrap();
            for e in &stamped {
                projection.apply(e).unwrap();
            }
        }

        let stats = projection.db().global_stats().unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.dca.strategies_created, 1);
        assert_eq!(stats.dca.executions, 1);
        assert_eq!(stats.dca.volume, 20_000_000);
        assert_eq!(stats.subscription.strategies_created, 1);
        assert_eq!(stats.spending_records, 1);

        let user = projection.db().get_user(&addr(1)).unwrap().unwrap();
        assert_eq!(user.total_invested, 20_000_000);
        assert_eq!(user.execution_count, 1);

        let dca = projection.db().get_dca(&sid(0xD0)).unwrap().unwrap();
        assert_eq!(dca.executions_completed, 1);
        assert_eq!(dca.status, StrategyStatus::Paused);
        assert_eq!(dca.rolling_avg_price, PRICE_SCALE);

        let shield = projection.db().get_shield(&addr(1)).unwrap().unwrap();
        assert_eq!(shield.spent_today, 20_000_000);

        assert_eq!(projection.db().count_activity(), 6);
    }

    #[test]
    fn refold_is_byte_identical() {
        let (_db, mut log, projection) = open("refold");
        for (i, batch) in sample_kinds().into_iter().enumerate() {
            let stamped = log.append_block(batch, T0 + i as i64 * 60).unwrap();
            for e in &stamped {
                projection.apply(e).unwrap();
            }
        }
        let before = projection.db().fingerprint().unwrap();

        let count = projection.refold(&log).unwrap();
        assert_eq!(count, 6);
        let after = projection.db().fingerprint().unwrap();
        assert_eq!(before, after, "re-folding must reproduce byte-equal rows");
    }

    #[test]
    fn auto_pause_restores_preserved_average() {
        let (_db, mut log, projection) = open("anomaly");
        let user = addr(1);
        let dca = sid(0xD0);
        let batches = vec![
            vec![EventKind::DcaStrategyCreated {
                id: dca,
                owner: user,
                source_token: addr(0xA0),
                target_token: addr(0xB0),
                amount_per_execution: 20_000_000,
                interval_s: 86_400,
                total_executions: 30,
            }],
            vec![EventKind::DcaExecuted {
                id: dca,
                owner: user,
                execution_index: 1,
                amount_in: 20_000_000,
                fee: 0,
                amount_out: 20_000_000,
                realized_price: PRICE_SCALE,
            }],
            vec![
                EventKind::DcaExecuted {
                    id: dca,
                    owner: user,
                    execution_index: 2,
                    amount_in: 20_000_000,
                    fee: 0,
                    amount_out: 10_000_000,
                    realized_price: 2 * PRICE_SCALE,
                },
                EventKind::DcaAutoPaused {
                    id: dca,
                    rolling_avg_price: PRICE_SCALE,
                    realized_price: 2 * PRICE_SCALE,
                    deviation_bps: 10_000,
                },
                EventKind::DcaStrategyPaused {
                    id: dca,
                    reason: PauseReason::PriceAnomaly,
                },
            ],
        ];
        for (i, batch) in batches.into_iter().enumerate() {
            for e in &log.append_block(batch, T0 + i as i64).unwrap() {
                projection.apply(e).unwrap();
            }
        }
        let row = projection.db().get_dca(&dca).unwrap().unwrap();
        assert_eq!(row.status, StrategyStatus::Paused);
        assert_eq!(row.rolling_avg_price, PRICE_SCALE);
        assert_eq!(row.last_price, 2 * PRICE_SCALE);
    }

    #[test]
    fn due_queries_follow_projected_cadence() {
        let (_db, mut log, projection) = open("due");
        let user = addr(1);
        let dca = sid(0xD0);
        for e in &log
            .append_block(
                vec![EventKind::DcaStrategyCreated {
                    id: dca,
                    owner: user,
                    source_token: addr(0xA0),
                    target_token: addr(0xB0),
                    amount_per_execution: 20_000_000,
                    interval_s: 86_400,
                    total_executions: 30,
                }],
                T0,
            )
            .unwrap()
        {
            projection.apply(e).unwrap();
        }

        // Immediately due at creation.
        assert_eq!(projection.due_dca(T0, 10).unwrap(), vec![dca]);

        for e in &log
            .append_block(
                vec![EventKind::DcaExecuted {
                    id: dca,
                    owner: user,
                    execution_index: 1,
                    amount_in: 20_000_000,
                    fee: 0,
                    amount_out: 20_000_000,
                    realized_price: PRICE_SCALE,
                }],
                T0,
            )
            .unwrap()
        {
            projection.apply(e).unwrap();
        }
        assert!(projection.due_dca(T0 + 1, 10).unwrap().is_empty());
        assert_eq!(projection.due_dca(T0 + 86_400, 10).unwrap(), vec![dca]);
    }
}
