//! Operator rescue path for funds stuck in engine custody.
//!
//! Two-phase with a 48h delay: propose, wait, execute. A single pending
//! slot; a new proposal overwrites the old one. This path never touches
//! user wallets or shield limits — it only disburses engine custody.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aegis_core::constants::EMERGENCY_WITHDRAW_DELAY_SECS;
use aegis_core::error::AegisError;
use aegis_core::event::EventKind;
use aegis_core::types::{Address, Amount, Timestamp};
use aegis_adapters::WalletAdapter;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyWithdrawProposal {
    pub token: Address,
    pub to: Address,
    pub amount: Amount,
    pub proposed_at: Timestamp,
    pub execute_after: Timestamp,
}

pub struct EmergencyTimelock {
    operator: Address,
    pending: Option<EmergencyWithdrawProposal>,
}

impl EmergencyTimelock {
    pub fn new(operator: Address) -> Self {
        Self {
            operator,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&EmergencyWithdrawProposal> {
        self.pending.as_ref()
    }

    fn require_operator(&self, caller: Address) -> Result<(), AegisError> {
        if caller != self.operator {
            return Err(AegisError::NotOperator);
        }
        Ok(())
    }

    pub fn propose(
        &mut self,
        caller: Address,
        token: Address,
        to: Address,
        amount: Amount,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        self.require_operator(caller)?;
        if token.is_zero() || to.is_zero() {
            return Err(AegisError::ZeroAddress);
        }
        if amount == 0 {
            return Err(AegisError::ZeroAmount);
        }
        let execute_after = now + EMERGENCY_WITHDRAW_DELAY_SECS;
        if self.pending.is_some() {
            warn!("overwriting pending emergency withdraw proposal");
        }
        self.pending = Some(EmergencyWithdrawProposal {
            token,
            to,
            amount,
            proposed_at: now,
            execute_after,
        });
        info!(token = %token, to = %to, amount, execute_after, "emergency withdraw proposed");
        Ok(vec![EventKind::EmergencyWithdrawProposed {
            token,
            to,
            amount,
            execute_after,
        }])
    }

    pub fn execute(
        &mut self,
        caller: Address,
        wallet: &dyn WalletAdapter,
        now: Timestamp,
    ) -> Result<Vec<EventKind>, AegisError> {
        self.require_operator(caller)?;
        let pending = self
            .pending
            .as_ref()
            .ok_or(AegisError::NoPendingProposal)?
            .clone();
        if now < pending.execute_after {
            return Err(AegisError::TimelockNotExpired {
                execute_after: pending.execute_after,
            });
        }
        wallet.pay(pending.token, pending.to, pending.amount)?;
        self.pending = None;
        info!(token = %pending.token, to = %pending.to, amount = pending.amount, "emergency withdraw executed");
        Ok(vec![EventKind::EmergencyWithdrawExecuted {
            token: pending.token,
            to: pending.to,
            amount: pending.amount,
        }])
    }

    pub fn cancel(&mut self, caller: Address) -> Result<Vec<EventKind>, AegisError> {
        self.require_operator(caller)?;
        if self.pending.take().is_none() {
            return Err(AegisError::NoPendingProposal);
        }
        Ok(vec![EventKind::EmergencyWithdrawCancelled])
    }
}
