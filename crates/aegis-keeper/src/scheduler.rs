//! The cooperative keeper loop.
//!
//! Each tick enumerates due work per family, dry-runs every candidate
//! against the engines' `can_execute` views, then submits the feasible ones
//! sequentially with a spacing delay between items. Per-item failures are
//! recorded and never abort the tick; cancellation is honored between items
//! but never mid-item, so already-executed items stay committed.
//!
//! The due-work set prefers the projection read model where it can answer
//! (DCA and subscriptions); a projection error falls back to the paginated
//! engine scan. Stop-loss and rebalance need live oracle reads and always
//! scan the engines. Divergence between the two sources is a staleness
//! concern only — the dry-run re-checks everything.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use aegis_core::constants::{DUE_WORK_PAGE_SIZE, KEEPER_SPACING_MS};
use aegis_core::error::AegisError;
use aegis_core::types::StrategyId;

use crate::platform::Platform;

// ── Options & report ─────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct KeeperOptions {
    pub page_size: usize,
    /// Delay between per-item submissions; absorbs adapter rate limits.
    pub spacing: Duration,
    pub tick_interval: Duration,
    /// When false, every feasible item is reported but nothing executes.
    pub execution_enabled: bool,
    /// Prefer the projection for the due-work set where it can answer.
    pub use_projection: bool,
}

impl Default for KeeperOptions {
    fn default() -> Self {
        Self {
            page_size: DUE_WORK_PAGE_SIZE,
            spacing: Duration::from_millis(KEEPER_SPACING_MS),
            tick_interval: Duration::from_secs(60),
            execution_enabled: true,
            use_projection: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Family {
    Dca,
    StopLoss,
    Rebalance,
    Subscription,
}

impl Family {
    fn name(self) -> &'static str {
        match self {
            Family::Dca => "dca",
            Family::StopLoss => "stop_loss",
            Family::Rebalance => "rebalance",
            Family::Subscription => "subscription",
        }
    }
}

/// What one tick did.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub selected: usize,
    pub executed: usize,
    /// Feasible items not executed because execution is disabled.
    pub dry_run: usize,
    pub failed: usize,
    /// Candidates discarded at dry-run or execution, with the reason.
    pub skipped: Vec<(StrategyId, String)>,
    pub cancelled: bool,
}

// ── Keeper ───────────────────────────────────────────────────────────────────

pub struct Keeper {
    platform: Platform,
    options: KeeperOptions,
    shutdown: watch::Receiver<bool>,
}

impl Keeper {
    /// Build a keeper; the returned sender cancels in-progress ticks between
    /// items and stops [`Self::run`].
    pub fn new(platform: Platform, options: KeeperOptions) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                platform,
                options,
                shutdown: rx,
            },
            tx,
        )
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut Platform {
        &mut self.platform
    }

    fn cancel_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    // ── Candidate selection ──────────────────────────────────────────────────

    /// Exhaust a resumable engine scan into a candidate list.
    fn scan_engine(&self, family: Family) -> Vec<StrategyId> {
        let now = self.platform.now();
        // A zero page size would stall the resumable scan.
        let page = self.options.page_size.max(1);
        let mut candidates = Vec::new();
        let mut idx = 0;
        loop {
            let (due, next, len) = match family {
                Family::Dca => {
                    let (d, n) = self.platform.dca.due_page(now, idx, page);
                    (d, n, self.platform.dca.len())
                }
                Family::StopLoss => {
                    let (d, n) = self.platform.stop_loss.due_page(idx, page);
                    (d, n, self.platform.stop_loss.len())
                }
                Family::Rebalance => {
                    let (d, n) = self.platform.rebalance.due_page(now, idx, page);
                    (d, n, self.platform.rebalance.len())
                }
                Family::Subscription => {
                    let (d, n) = self.platform.subscriptions.due_page(now, idx, page);
                    (d, n, self.platform.subscriptions.len())
                }
            };
            candidates.extend(due);
            if next >= len {
                break;
            }
            idx = next;
        }
        candidates
    }

    fn candidates(&self, family: Family) -> Vec<StrategyId> {
        if self.options.use_projection {
            let now = self.platform.now();
            let projected = match family {
                Family::Dca => Some(self.platform.projection().due_dca(now, usize::MAX)),
                Family::Subscription => {
                    Some(self.platform.projection().due_subscriptions(now, usize::MAX))
                }
                // Trigger and drift checks need live prices; scan the engine.
                Family::StopLoss | Family::Rebalance => None,
            };
            if let Some(result) = projected {
                match result {
                    Ok(ids) => return ids,
                    Err(e) => {
                        warn!(family = family.name(), error = %e, "projection unreachable; falling back to engine scan");
                    }
                }
            }
        }
        self.scan_engine(family)
    }

    fn dry_run(&mut self, family: Family, id: &StrategyId) -> Result<(), AegisError> {
        if family == Family::StopLoss {
            // Mutating poll: trailing peaks ratchet every tick, and the
            // re-anchor events reach the log even when nothing fires.
            if !self.platform.poll_stop_loss(id)? {
                return Err(AegisError::TriggerNotMet);
            }
        }
        let now = self.platform.now();
        let p = &self.platform;
        match family {
            Family::Dca => p
                .dca
                .can_execute(id, &p.shield, p.wallet().as_ref(), p.executor(), now),
            Family::StopLoss => p.stop_loss.can_execute(
                id,
                &p.shield,
                p.wallet().as_ref(),
                p.oracle().as_ref(),
                p.executor(),
                now,
            ),
            Family::Rebalance => {
                p.rebalance
                    .can_execute(id, p.oracle().as_ref(), p.wallet().as_ref(), now)
            }
            Family::Subscription => p
                .subscriptions
                .can_execute(id, &p.shield, p.executor(), now),
        }
    }

    fn submit(&mut self, family: Family, id: &StrategyId) -> Result<(), AegisError> {
        match family {
            Family::Dca => self.platform.execute_dca(id).map(|_| ()),
            Family::StopLoss => self.platform.execute_stop_loss(id).map(|_| ()),
            Family::Rebalance => self.platform.execute_rebalance(id).map(|_| ()),
            Family::Subscription => self.platform.execute_subscription(id).map(|_| ()),
        }
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// Run one scheduling pass over every family.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        for family in [
            Family::Dca,
            Family::StopLoss,
            Family::Rebalance,
            Family::Subscription,
        ] {
            let candidates = self.candidates(family);
            report.selected += candidates.len();
            debug!(family = family.name(), candidates = candidates.len(), "due work selected");

            for id in candidates {
                // Cancellation takes effect between items, never mid-item.
                if self.cancel_requested() {
                    report.cancelled = true;
                    info!("tick cancelled; committed items stand");
                    return report;
                }

                if let Err(reason) = self.dry_run(family, &id) {
                    debug!(family = family.name(), strategy = %id, reason = %reason, "candidate infeasible");
                    report.skipped.push((id, reason.to_string()));
                    continue;
                }

                if !self.options.execution_enabled {
                    info!(family = family.name(), strategy = %id, "dry-run only; execution disabled");
                    report.dry_run += 1;
                    continue;
                }

                match self.submit(family, &id) {
                    Ok(()) => {
                        report.executed += 1;
                    }
                    Err(e) => {
                        // Per-item failure: record and continue the tick.
                        warn!(family = family.name(), strategy = %id, error = %e, "execution failed");
                        report.failed += 1;
                        report.skipped.push((id, e.to_string()));
                    }
                }

                if !self.options.spacing.is_zero() {
                    tokio::time::sleep(self.options.spacing).await;
                }
            }
        }
        report
    }

    /// Tick forever until the shutdown sender fires.
    pub async fn run(&mut self) {
        info!(
            tick_interval_s = self.options.tick_interval.as_secs(),
            execution_enabled = self.options.execution_enabled,
            "keeper loop starting"
        );
        loop {
            let report = self.tick().await;
            info!(
                selected = report.selected,
                executed = report.executed,
                dry_run = report.dry_run,
                failed = report.failed,
                skipped = report.skipped.len(),
                "tick complete"
            );
            if report.cancelled || self.cancel_requested() {
                break;
            }
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.options.tick_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("keeper loop stopped");
    }
}
