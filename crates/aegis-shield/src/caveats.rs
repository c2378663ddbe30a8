//! Caveat evaluators.
//!
//! A caveat is a local predicate attached to a delegated capability. Unlike
//! the shield (which protects the *user*), caveats bound a single
//! *delegation*: each evaluator keeps its own counters, independent of the
//! shield's. Evaluators expose a pre-hook (accept or reject the candidate
//! action) and a post-hook (advance delegation-level counters after the
//! action settled), plus a list of callers authorized to invoke the hooks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use aegis_core::constants::DAY_SECS;
use aegis_core::error::AegisError;
use aegis_core::types::{Address, Amount, Timestamp};

// ── Candidate action ─────────────────────────────────────────────────────────

/// The action a delegation is about to carry out, as seen by the evaluators.
#[derive(Clone, Debug)]
pub struct CandidateAction<'a> {
    /// Canonical execution calldata. The first 20 bytes are the target.
    pub calldata: &'a [u8],
    pub token: Address,
    pub amount: Amount,
    pub now: Timestamp,
}

/// Extract the target principal from canonical calldata. Anything shorter
/// than 20 bytes is malformed and rejects.
pub fn extract_target(calldata: &[u8]) -> Result<Address, AegisError> {
    if calldata.len() < 20 {
        return Err(AegisError::MalformedCalldata(calldata.len()));
    }
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&calldata[..20]);
    Ok(Address::from_bytes(arr))
}

/// Pre/post evaluation hooks shared by every caveat kind.
pub trait Caveat {
    /// Reject or accept the candidate action before execution.
    fn pre(&mut self, caller: Address, action: &CandidateAction<'_>) -> Result<(), AegisError>;

    /// Advance delegation-level counters once the action has settled.
    fn post(&mut self, caller: Address, action: &CandidateAction<'_>) -> Result<(), AegisError>;
}

fn require_caller(authorized: &BTreeSet<Address>, caller: Address) -> Result<(), AegisError> {
    if !authorized.contains(&caller) {
        return Err(AegisError::NotAuthorized(caller.to_hex()));
    }
    Ok(())
}

// ── SpendingLimitCaveat ──────────────────────────────────────────────────────

/// Delegation-level spending caps: per transaction, per rolling day, and
/// over the delegation's lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpendingLimitTerms {
    pub token: Address,
    pub per_tx_cap: Amount,
    pub daily_cap: Amount,
    pub lifetime_cap: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpendingLimitCaveat {
    pub terms: SpendingLimitTerms,
    pub spent_today: Amount,
    pub day_epoch_start: Timestamp,
    pub lifetime_spent: Amount,
    authorized: BTreeSet<Address>,
}

impl SpendingLimitCaveat {
    pub fn new(terms: SpendingLimitTerms, now: Timestamp, authorized: BTreeSet<Address>) -> Self {
        Self {
            terms,
            spent_today: 0,
            day_epoch_start: now,
            lifetime_spent: 0,
            authorized,
        }
    }

    fn roll(&mut self, now: Timestamp) {
        if now >= self.day_epoch_start + DAY_SECS {
            self.spent_today = 0;
            self.day_epoch_start = now;
        }
    }
}

impl Caveat for SpendingLimitCaveat {
    fn pre(&mut self, caller: Address, action: &CandidateAction<'_>) -> Result<(), AegisError> {
        require_caller(&self.authorized, caller)?;
        self.roll(action.now);
        if action.amount > self.terms.per_tx_cap {
            return Err(AegisError::CaveatPerTxExceeded {
                amount: action.amount,
                cap: self.terms.per_tx_cap,
            });
        }
        if self.spent_today + action.amount > self.terms.daily_cap {
            return Err(AegisError::CaveatDailyExceeded {
                amount: action.amount,
                remaining: self.terms.daily_cap - self.spent_today,
            });
        }
        if self.lifetime_spent + action.amount > self.terms.lifetime_cap {
            return Err(AegisError::CaveatLifetimeExceeded {
                amount: action.amount,
                remaining: self.terms.lifetime_cap - self.lifetime_spent,
            });
        }
        Ok(())
    }

    fn post(&mut self, caller: Address, action: &CandidateAction<'_>) -> Result<(), AegisError> {
        require_caller(&self.authorized, caller)?;
        self.roll(action.now);
        self.spent_today += action.amount;
        self.lifetime_spent += action.amount;
        Ok(())
    }
}

// ── AllowedTargetsCaveat ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetMode {
    /// Accept only targets in the set.
    Whitelist,
    /// Reject exactly the targets in the set.
    Blacklist,
}

/// Target filter over the principal extracted from the calldata head.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllowedTargetsCaveat {
    pub mode: TargetMode,
    pub targets: BTreeSet<Address>,
    authorized: BTreeSet<Address>,
}

impl AllowedTargetsCaveat {
    pub fn new(
        mode: TargetMode,
        targets: BTreeSet<Address>,
        authorized: BTreeSet<Address>,
    ) -> Self {
        Self {
            mode,
            targets,
            authorized,
        }
    }
}

impl Caveat for AllowedTargetsCaveat {
    fn pre(&mut self, caller: Address, action: &CandidateAction<'_>) -> Result<(), AegisError> {
        require_caller(&self.authorized, caller)?;
        let target = extract_target(action.calldata)?;
        let listed = self.targets.contains(&target);
        let denied = match self.mode {
            TargetMode::Whitelist => !listed,
            TargetMode::Blacklist => listed,
        };
        if denied {
            return Err(AegisError::TargetDenied(target.to_hex()));
        }
        Ok(())
    }

    fn post(&mut self, caller: Address, _action: &CandidateAction<'_>) -> Result<(), AegisError> {
        require_caller(&self.authorized, caller)
    }
}

// ── TimeBoundCaveat ──────────────────────────────────────────────────────────

/// Validity window plus a bounded execution count. A bound of 0 means
/// unbounded on that side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeBoundCaveat {
    pub not_before: Timestamp,
    pub not_after: Timestamp,
    pub max_executions: u32,
    pub executions: u32,
    authorized: BTreeSet<Address>,
}

impl TimeBoundCaveat {
    pub fn new(
        not_before: Timestamp,
        not_after: Timestamp,
        max_executions: u32,
        authorized: BTreeSet<Address>,
    ) -> Self {
        Self {
            not_before,
            not_after,
            max_executions,
            executions: 0,
            authorized,
        }
    }
}

impl Caveat for TimeBoundCaveat {
    fn pre(&mut self, caller: Address, action: &CandidateAction<'_>) -> Result<(), AegisError> {
        require_caller(&self.authorized, caller)?;
        if self.not_before != 0 && action.now < self.not_before {
            return Err(AegisError::OutsideTimeBound);
        }
        if self.not_after != 0 && action.now > self.not_after {
            return Err(AegisError::OutsideTimeBound);
        }
        if self.max_executions != 0 && self.executions >= self.max_executions {
            return Err(AegisError::CaveatExecutionsExhausted {
                max: self.max_executions,
            });
        }
        Ok(())
    }

    fn post(&mut self, caller: Address, _action: &CandidateAction<'_>) -> Result<(), AegisError> {
        require_caller(&self.authorized, caller)?;
        self.executions += 1;
        Ok(())
    }
}
