use aegis_core::error::AegisError;
use aegis_core::types::{Address, Amount, StrategyId, StrategyStatus, Timestamp};

use crate::db::ProjectionDb;
use crate::tables::{DcaStrategyRow, RebalanceRow, StopLossRow, SubscriptionRow};

/// One user's position across every strategy family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSummary {
    pub user: Address,
    pub total_invested: Amount,
    pub total_received: Amount,
    pub execution_count: u64,
    pub shield_active: bool,
    pub remaining_today: Amount,
    pub active_strategies: u64,
}

/// Dashboard-facing read helpers over the projection store.
pub struct DashboardQuery<'a> {
    db: &'a ProjectionDb,
}

impl<'a> DashboardQuery<'a> {
    pub fn new(db: &'a ProjectionDb) -> Self {
        Self { db }
    }

    /// Aggregate view of a user, or `None` if the user was never observed.
    pub fn user_summary(&self, user: Address) -> Result<Option<UserSummary>, AegisError> {
        let Some(user_row) = self.db.get_user(&user)? else {
            return Ok(None);
        };
        let shield = self.db.get_shield(&user)?;
        let (shield_active, remaining_today) = match &shield {
            Some(s) if s.is_active && !s.emergency_mode => {
                (true, s.daily_limit.saturating_sub(s.spent_today))
            }
            Some(_) => (false, 0),
            None => (false, 0),
        };

        let active = |status: &StrategyStatus| *status == StrategyStatus::Active;
        let active_strategies = self
            .dca_of(user)?
            .iter()
            .filter(|r| active(&r.status))
            .count() as u64
            + self
                .stop_loss_of(user)?
                .iter()
                .filter(|r| active(&r.status))
                .count() as u64
            + self
                .rebalance_of(user)?
                .iter()
                .filter(|r| active(&r.status))
                .count() as u64
            + self
                .subscriptions_of(user)?
                .iter()
                .filter(|r| active(&r.status))
                .count() as u64;

        Ok(Some(UserSummary {
            user,
            total_invested: user_row.total_invested,
            total_received: user_row.total_received,
            execution_count: user_row.execution_count,
            shield_active,
            remaining_today,
            active_strategies,
        }))
    }

    pub fn dca_of(&self, owner: Address) -> Result<Vec<DcaStrategyRow>, AegisError> {
        Ok(self
            .db
            .iter_dca()?
            .into_iter()
            .filter(|r| r.owner == owner)
            .collect())
    }

    pub fn stop_loss_of(&self, owner: Address) -> Result<Vec<StopLossRow>, AegisError> {
        Ok(self
            .db
            .iter_stop_loss()?
            .into_iter()
            .filter(|r| r.owner == owner)
            .collect())
    }

    pub fn rebalance_of(&self, owner: Address) -> Result<Vec<RebalanceRow>, AegisError> {
        Ok(self
            .db
            .iter_rebalance()?
            .into_iter()
            .filter(|r| r.owner == owner)
            .collect())
    }

    pub fn subscriptions_of(&self, subscriber: Address) -> Result<Vec<SubscriptionRow>, AegisError> {
        Ok(self
            .db
            .iter_subscriptions()?
            .into_iter()
            .filter(|r| r.subscriber == subscriber)
            .collect())
    }

    /// Human-readable summary of a DCA strategy's state.
    pub fn describe_dca(&self, id: &StrategyId, now: Timestamp) -> Result<String, AegisError> {
        let row = self
            .db
            .get_dca(id)?
            .ok_or_else(|| AegisError::StrategyNotFound(id.to_hex()))?;

        let status_str = match row.status {
            StrategyStatus::Active => {
                let next_due = row.created_at + row.executions_completed as i64 * row.interval_s;
                if now >= next_due {
                    "active — execution due".to_string()
                } else {
                    let secs = next_due - now;
                    format!("active — next execution in {}h{:02}m", secs / 3_600, secs % 3_600 / 60)
                }
            }
            StrategyStatus::Paused => "paused".to_string(),
            StrategyStatus::Completed => "completed".to_string(),
            StrategyStatus::Cancelled => "cancelled".to_string(),
            StrategyStatus::Triggered => "triggered".to_string(),
        };

        Ok(format!(
            "DCA {} | {}/{} executions | {} per run | {}",
            &id.to_hex()[..16],
            row.executions_completed,
            row.total_executions,
            row.amount_per_execution,
            status_str
        ))
    }
}
