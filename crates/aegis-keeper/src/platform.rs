//! The composition root.
//!
//! [`Platform`] owns the shield book, the four strategy engines, the
//! emergency timelock, the custodial adapters, the event log, and the
//! projection. Every mutation enters through a typed [`Command`] (or one of
//! the `execute_*` fast paths the scheduler uses); the resulting events are
//! stamped into the log and folded into the projection in the same step.
//!
//! Spend events journaled by the shield are ingested even when a later step
//! of the same execution fails: the spend counter and its event are one
//! observable unit.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use aegis_core::error::AegisError;
use aegis_core::event::{Event, EventKind};
use aegis_core::types::{Address, Amount, Price, StrategyId, Timestamp};
use aegis_adapters::{Clock, SimExchange, SimOracle, SimWallet};
use aegis_projection::{EventLog, Projection, ProjectionDb};
use aegis_shield::ShieldBook;
use aegis_strategies::{
    DcaCreateParams, DcaEngine, EmergencyTimelock, ExecutionContext, RebalanceCreateParams,
    RebalanceEngine, StopLossCreateParams, StopLossEngine, SubscriptionCreateParams,
    SubscriptionEngine,
};

// ── Commands ─────────────────────────────────────────────────────────────────

/// Typed mutation surface. Every variant maps to exactly one engine or
/// shield operation and emits that operation's events.
#[derive(Clone, Debug)]
pub enum Command {
    // ── Shield ───────────────────────────────────────────────────────────────
    ActivateShield { user: Address, daily_limit: Amount, single_tx_limit: Amount },
    DeactivateShield { user: Address },
    ProposeConfigUpdate { user: Address, new_daily_limit: Amount, new_single_tx_limit: Amount },
    ExecuteConfigUpdate { user: Address },
    CancelConfigUpdate { user: Address },
    EnableEmergency { user: Address },
    DisableEmergency { user: Address },
    EnableWhitelistMode { user: Address },
    DisableWhitelistMode { user: Address },
    AddWhitelist { user: Address, target: Address },
    RemoveWhitelist { user: Address, target: Address },
    SetTokenLimit { user: Address, token: Address, daily_limit: Amount },
    RemoveTokenLimit { user: Address, token: Address },
    AuthorizeExecutor { caller: Address, executor: Address },
    RevokeExecutor { caller: Address, executor: Address },
    SetProtocolPaused { caller: Address, paused: bool },

    // ── DCA ──────────────────────────────────────────────────────────────────
    CreateDca { owner: Address, params: DcaCreateParams },
    PauseDca { caller: Address, id: StrategyId },
    ResumeDca { caller: Address, id: StrategyId },
    CancelDca { caller: Address, id: StrategyId },
    UpdateDca { caller: Address, id: StrategyId, amount_per_execution: Amount, min_amount_out: Amount },
    ExecuteDca { id: StrategyId },
    /// Isolated batch: one entry failing does not abort the others.
    ExecuteDcaBatch { ids: Vec<StrategyId> },

    // ── Stop-loss ────────────────────────────────────────────────────────────
    CreateStopLoss { owner: Address, params: StopLossCreateParams },
    PauseStopLoss { caller: Address, id: StrategyId },
    ResumeStopLoss { caller: Address, id: StrategyId },
    CancelStopLoss { caller: Address, id: StrategyId },
    UpdateStopLoss { caller: Address, id: StrategyId, trigger_price: Option<Price>, min_amount_out: Option<Amount> },
    ExecuteStopLoss { id: StrategyId },

    // ── Rebalance ────────────────────────────────────────────────────────────
    CreateRebalance { owner: Address, params: RebalanceCreateParams },
    PauseRebalance { caller: Address, id: StrategyId },
    ResumeRebalance { caller: Address, id: StrategyId },
    CancelRebalance { caller: Address, id: StrategyId },
    UpdateRebalanceAllocations { caller: Address, id: StrategyId, allocations: Vec<(Address, u32)> },
    UpdateRebalanceThreshold { caller: Address, id: StrategyId, threshold_bps: u32 },
    ExecuteRebalance { id: StrategyId },

    // ── Subscription ─────────────────────────────────────────────────────────
    CreateSubscription { subscriber: Address, params: SubscriptionCreateParams },
    PauseSubscription { caller: Address, id: StrategyId },
    ResumeSubscription { caller: Address, id: StrategyId },
    CancelSubscription { caller: Address, id: StrategyId },
    UpdateSubscriptionAmount { caller: Address, id: StrategyId, amount: Amount },
    ExecuteSubscription { id: StrategyId },

    // ── Emergency withdraw ───────────────────────────────────────────────────
    ProposeEmergencyWithdraw { caller: Address, token: Address, to: Address, amount: Amount },
    ExecuteEmergencyWithdraw { caller: Address },
    CancelEmergencyWithdraw { caller: Address },
}

/// What a command produced: the stamped events plus the id/amount outputs of
/// creation and execution commands.
#[derive(Clone, Debug, Default)]
pub struct CommandOutcome {
    pub events: Vec<Event>,
    pub strategy_id: Option<StrategyId>,
    pub amount_out: Option<Amount>,
}

// ── Platform ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// Operator principal (executor ACL, protocol pause, emergency path).
    pub operator: Address,
    /// Executor principal recording spends.
    pub executor: Address,
    /// Rebalance routing hub token.
    pub numeraire: Address,
    /// Swap venue principal (allowance spender).
    pub venue: Address,
    /// Protocol fee sink.
    pub fee_recipient: Address,
}

pub struct Platform {
    pub shield: ShieldBook,
    pub dca: DcaEngine,
    pub stop_loss: StopLossEngine,
    pub rebalance: RebalanceEngine,
    pub subscriptions: SubscriptionEngine,
    pub emergency: EmergencyTimelock,
    wallet: Arc<SimWallet>,
    exchange: Arc<SimExchange>,
    oracle: Arc<SimOracle>,
    clock: Arc<dyn Clock>,
    log: EventLog,
    projection: Projection,
    executor: Address,
}

impl Platform {
    /// Open (or create) a platform instance with custodial adapters and
    /// sled-backed log + projection under `data_dir`.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        config: &PlatformConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AegisError> {
        let db = sled::open(data_dir).map_err(|e| AegisError::Storage(e.to_string()))?;
        let log = EventLog::open(&db)?;
        let projection = Projection::new(ProjectionDb::open(&db)?);

        let wallet = Arc::new(SimWallet::new());
        let exchange = Arc::new(SimExchange::new(config.venue, Arc::clone(&wallet)));
        let oracle = Arc::new(SimOracle::new());

        let mut shield = ShieldBook::new(config.operator);
        shield.authorize_executor(config.operator, config.executor)?;

        Ok(Self {
            shield,
            dca: DcaEngine::with_default_fee(config.fee_recipient),
            stop_loss: StopLossEngine::new(),
            rebalance: RebalanceEngine::new(config.numeraire),
            subscriptions: SubscriptionEngine::with_default_fee(config.fee_recipient),
            emergency: EmergencyTimelock::new(config.operator),
            wallet,
            exchange,
            oracle,
            clock,
            log,
            projection,
            executor: config.executor,
        })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn executor(&self) -> Address {
        self.executor
    }

    pub fn wallet(&self) -> &Arc<SimWallet> {
        &self.wallet
    }

    pub fn exchange(&self) -> &Arc<SimExchange> {
        &self.exchange
    }

    pub fn oracle(&self) -> &Arc<SimOracle> {
        &self.oracle
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    // ── Ingestion ────────────────────────────────────────────────────────────

    /// Stamp a batch of event kinds as one block and fold it.
    fn ingest(&mut self, kinds: Vec<EventKind>) -> Result<Vec<Event>, AegisError> {
        let stamped = self.log.append_block(kinds, self.clock.now())?;
        for event in &stamped {
            self.projection.apply(event)?;
        }
        Ok(stamped)
    }

    /// Merge journaled spend events with an operation's own events and
    /// ingest. On failure the journaled spends are still ingested — a
    /// recorded spend is observable even when the execution around it died.
    fn finish(
        &mut self,
        result: Result<Vec<EventKind>, AegisError>,
    ) -> Result<Vec<Event>, AegisError> {
        let mut kinds = self.shield.take_events();
        match result {
            Ok(own) => {
                kinds.extend(own);
                self.ingest(kinds)
            }
            Err(e) => {
                if !kinds.is_empty() {
                    self.ingest(kinds)?;
                }
                Err(e)
            }
        }
    }

    // ── Execution fast paths (used by the scheduler) ─────────────────────────

    pub fn execute_dca(&mut self, id: &StrategyId) -> Result<(Amount, Vec<Event>), AegisError> {
        let now = self.clock.now();
        let mut out = 0;
        let result = self
            .dca
            .execute(
                id,
                &mut ExecutionContext {
                    shield: &mut self.shield,
                    wallet: self.wallet.as_ref(),
                    exchange: self.exchange.as_ref(),
                    executor: self.executor,
                    now,
                },
            )
            .map(|(amount, events)| {
                out = amount;
                events
            });
        let events = self.finish(result)?;
        Ok((out, events))
    }

    /// Evaluate a stop-loss trigger at the current price, ratcheting the
    /// trailing peak. Peak re-anchor events are ingested even when nothing
    /// fires — the mutation must reach the log either way.
    pub fn poll_stop_loss(&mut self, id: &StrategyId) -> Result<bool, AegisError> {
        let oracle = Arc::clone(&self.oracle);
        let (triggered, events) = self.stop_loss.should_trigger(id, oracle.as_ref())?;
        if !events.is_empty() {
            self.ingest(events)?;
        }
        Ok(triggered)
    }

    pub fn execute_stop_loss(
        &mut self,
        id: &StrategyId,
    ) -> Result<(Amount, Vec<Event>), AegisError> {
        // Ratchet first: a fresh peak that suppresses the trigger still
        // lands in the log before the (failed) execution surfaces.
        self.poll_stop_loss(id)?;
        let now = self.clock.now();
        let oracle = Arc::clone(&self.oracle);
        let mut out = 0;
        let result = self
            .stop_loss
            .check_and_execute(
                id,
                &mut ExecutionContext {
                    shield: &mut self.shield,
                    wallet: self.wallet.as_ref(),
                    exchange: self.exchange.as_ref(),
                    executor: self.executor,
                    now,
                },
                oracle.as_ref(),
            )
            .map(|(amount, events)| {
                out = amount;
                events
            });
        let events = self.finish(result)?;
        Ok((out, events))
    }

    pub fn execute_rebalance(&mut self, id: &StrategyId) -> Result<(u32, Vec<Event>), AegisError> {
        let now = self.clock.now();
        let oracle = Arc::clone(&self.oracle);
        let mut legs = 0;
        let result = self
            .rebalance
            .execute(
                id,
                &mut ExecutionContext {
                    shield: &mut self.shield,
                    wallet: self.wallet.as_ref(),
                    exchange: self.exchange.as_ref(),
                    executor: self.executor,
                    now,
                },
                oracle.as_ref(),
            )
            .map(|(count, events)| {
                legs = count;
                events
            });
        let events = self.finish(result)?;
        Ok((legs, events))
    }

    pub fn execute_subscription(
        &mut self,
        id: &StrategyId,
    ) -> Result<(Amount, Vec<Event>), AegisError> {
        let now = self.clock.now();
        let mut out = 0;
        let result = self
            .subscriptions
            .execute_payment(
                id,
                &mut ExecutionContext {
                    shield: &mut self.shield,
                    wallet: self.wallet.as_ref(),
                    exchange: self.exchange.as_ref(),
                    executor: self.executor,
                    now,
                },
            )
            .map(|(amount, events)| {
                out = amount;
                events
            });
        let events = self.finish(result)?;
        Ok((out, events))
    }

    // ── Command dispatch ─────────────────────────────────────────────────────

    pub fn apply(&mut self, command: Command) -> Result<CommandOutcome, AegisError> {
        use Command::*;
        let now = self.clock.now();
        match command {
            // ── Shield ───────────────────────────────────────────────────────
            ActivateShield { user, daily_limit, single_tx_limit } => {
                let result = self.shield.activate(user, daily_limit, single_tx_limit, now);
                self.outcome(result)
            }
            DeactivateShield { user } => {
                let result = self.shield.deactivate(user);
                self.outcome(result)
            }
            ProposeConfigUpdate { user, new_daily_limit, new_single_tx_limit } => {
                let result = self
                    .shield
                    .propose_config_update(user, new_daily_limit, new_single_tx_limit, now);
                self.outcome(result)
            }
            ExecuteConfigUpdate { user } => {
                let result = self.shield.execute_config_update(user, now);
                self.outcome(result)
            }
            CancelConfigUpdate { user } => {
                let result = self.shield.cancel_config_update(user);
                self.outcome(result)
            }
            EnableEmergency { user } => {
                let result = self.shield.enable_emergency(user);
                self.outcome(result)
            }
            DisableEmergency { user } => {
                let result = self.shield.disable_emergency(user);
                self.outcome(result)
            }
            EnableWhitelistMode { user } => {
                let result = self.shield.enable_whitelist_mode(user);
                self.outcome(result)
            }
            DisableWhitelistMode { user } => {
                let result = self.shield.disable_whitelist_mode(user);
                self.outcome(result)
            }
            AddWhitelist { user, target } => {
                let result = self.shield.add_whitelist(user, target);
                self.outcome(result)
            }
            RemoveWhitelist { user, target } => {
                let result = self.shield.remove_whitelist(user, target);
                self.outcome(result)
            }
            SetTokenLimit { user, token, daily_limit } => {
                let result = self.shield.set_token_limit(user, token, daily_limit, now);
                self.outcome(result)
            }
            RemoveTokenLimit { user, token } => {
                let result = self.shield.remove_token_limit(user, token);
                self.outcome(result)
            }
            AuthorizeExecutor { caller, executor } => {
                let result = self.shield.authorize_executor(caller, executor);
                self.outcome(result)
            }
            RevokeExecutor { caller, executor } => {
                let result = self.shield.revoke_executor(caller, executor);
                self.outcome(result)
            }
            SetProtocolPaused { caller, paused } => {
                let result = self.shield.set_protocol_paused(caller, paused);
                self.outcome(result)
            }

            // ── DCA ──────────────────────────────────────────────────────────
            CreateDca { owner, params } => {
                let (id, kinds) = self.dca.create(owner, params, now)?;
                let events = self.ingest(kinds)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: None,
                })
            }
            PauseDca { caller, id } => {
                let result = self.dca.pause(caller, &id, now);
                self.outcome(result)
            }
            ResumeDca { caller, id } => {
                let result = self.dca.resume(caller, &id, now);
                self.outcome(result)
            }
            CancelDca { caller, id } => {
                let result = self.dca.cancel(caller, &id, now);
                self.outcome(result)
            }
            UpdateDca { caller, id, amount_per_execution, min_amount_out } => {
                let result = self
                    .dca
                    .update(caller, &id, amount_per_execution, min_amount_out, now);
                self.outcome(result)
            }
            ExecuteDca { id } => {
                let (amount, events) = self.execute_dca(&id)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: Some(amount),
                })
            }
            ExecuteDcaBatch { ids } => {
                let (outputs, kinds) = self.dca.execute_batch(
                    &ids,
                    &mut ExecutionContext {
                        shield: &mut self.shield,
                        wallet: self.wallet.as_ref(),
                        exchange: self.exchange.as_ref(),
                        executor: self.executor,
                        now,
                    },
                );
                let events = self.finish(Ok(kinds))?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: None,
                    amount_out: Some(outputs.iter().sum()),
                })
            }

            // ── Stop-loss ────────────────────────────────────────────────────
            CreateStopLoss { owner, params } => {
                let oracle = Arc::clone(&self.oracle);
                let (id, kinds) = self.stop_loss.create(owner, params, oracle.as_ref(), now)?;
                let events = self.ingest(kinds)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: None,
                })
            }
            PauseStopLoss { caller, id } => {
                let result = self.stop_loss.pause(caller, &id, now);
                self.outcome(result)
            }
            ResumeStopLoss { caller, id } => {
                let result = self.stop_loss.resume(caller, &id, now);
                self.outcome(result)
            }
            CancelStopLoss { caller, id } => {
                let result = self.stop_loss.cancel(caller, &id, now);
                self.outcome(result)
            }
            UpdateStopLoss { caller, id, trigger_price, min_amount_out } => {
                let result = self
                    .stop_loss
                    .update(caller, &id, trigger_price, min_amount_out, now);
                self.outcome(result)
            }
            ExecuteStopLoss { id } => {
                let (amount, events) = self.execute_stop_loss(&id)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: Some(amount),
                })
            }

            // ── Rebalance ────────────────────────────────────────────────────
            CreateRebalance { owner, params } => {
                let (id, kinds) = self.rebalance.create(owner, params, now)?;
                let events = self.ingest(kinds)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: None,
                })
            }
            PauseRebalance { caller, id } => {
                let result = self.rebalance.pause(caller, &id, now);
                self.outcome(result)
            }
            ResumeRebalance { caller, id } => {
                let result = self.rebalance.resume(caller, &id, now);
                self.outcome(result)
            }
            CancelRebalance { caller, id } => {
                let result = self.rebalance.cancel(caller, &id, now);
                self.outcome(result)
            }
            UpdateRebalanceAllocations { caller, id, allocations } => {
                let result = self
                    .rebalance
                    .update_allocations(caller, &id, allocations, now);
                self.outcome(result)
            }
            UpdateRebalanceThreshold { caller, id, threshold_bps } => {
                let result = self.rebalance.update_threshold(caller, &id, threshold_bps, now);
                self.outcome(result)
            }
            ExecuteRebalance { id } => {
                let (legs, events) = self.execute_rebalance(&id)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: Some(legs as u128),
                })
            }

            // ── Subscription ─────────────────────────────────────────────────
            CreateSubscription { subscriber, params } => {
                let (id, kinds) = self.subscriptions.create(subscriber, params, now)?;
                let events = self.ingest(kinds)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: None,
                })
            }
            PauseSubscription { caller, id } => {
                let result = self.subscriptions.pause(caller, &id, now);
                self.outcome(result)
            }
            ResumeSubscription { caller, id } => {
                let result = self.subscriptions.resume(caller, &id, now);
                self.outcome(result)
            }
            CancelSubscription { caller, id } => {
                let result = self.subscriptions.cancel(caller, &id, now);
                self.outcome(result)
            }
            UpdateSubscriptionAmount { caller, id, amount } => {
                let result = self.subscriptions.update_amount(caller, &id, amount, now);
                self.outcome(result)
            }
            ExecuteSubscription { id } => {
                let (amount, events) = self.execute_subscription(&id)?;
                Ok(CommandOutcome {
                    events,
                    strategy_id: Some(id),
                    amount_out: Some(amount),
                })
            }

            // ── Emergency withdraw ───────────────────────────────────────────
            ProposeEmergencyWithdraw { caller, token, to, amount } => {
                let result = self.emergency.propose(caller, token, to, amount, now);
                self.outcome(result)
            }
            ExecuteEmergencyWithdraw { caller } => {
                let wallet = Arc::clone(&self.wallet);
                let result = self.emergency.execute(caller, wallet.as_ref(), now);
                self.outcome(result)
            }
            CancelEmergencyWithdraw { caller } => {
                let result = self.emergency.cancel(caller);
                self.outcome(result)
            }
        }
    }

    fn outcome(
        &mut self,
        result: Result<Vec<EventKind>, AegisError>,
    ) -> Result<CommandOutcome, AegisError> {
        let events = self.finish(result)?;
        Ok(CommandOutcome {
            events,
            strategy_id: None,
            amount_out: None,
        })
    }

    /// Rebuild the projection from the event log (operator recovery path).
    pub fn refold_projection(&mut self) -> Result<usize, AegisError> {
        let count = self.projection.refold(&self.log)?;
        info!(events = count, "projection re-folded from genesis");
        Ok(count)
    }
}
