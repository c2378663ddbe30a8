use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use aegis_core::constants::PRICE_SCALE;
use aegis_core::error::AegisError;
use aegis_core::types::{Address, Amount, Timestamp};

use crate::wallet::SimWallet;

/// One exact-input, single-hop swap submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: Amount,
    pub min_out: Amount,
    pub pool_fee_bps: u32,
    pub recipient: Address,
    pub deadline: Timestamp,
}

/// The swap venue. Exact-input, single-hop; the caller grants the venue a
/// one-shot allowance equal to `amount_in` before submitting.
pub trait ExchangeAdapter: Send + Sync {
    /// The venue's principal address (the allowance spender).
    fn venue(&self) -> Address;

    /// Execute the swap, settling `amount_out` to `req.recipient`.
    fn swap(&self, req: &SwapRequest, now: Timestamp) -> Result<Amount, AegisError>;
}

// ── SimExchange ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimExchangeState {
    /// (token_in, token_out) → output units per input unit, scaled by 1e18.
    rates: BTreeMap<(Address, Address), u128>,
    /// Forced output for the next swap, overriding the rate table. Lets tests
    /// realize an anomalous price.
    next_output: Option<Amount>,
    /// Forced failure for the next swap.
    next_failure: Option<AegisError>,
    /// Every request this venue has settled, in order.
    calls: Vec<SwapRequest>,
}

/// In-memory venue settling against a rate table and the [`SimWallet`]
/// custody ledger.
pub struct SimExchange {
    venue: Address,
    wallet: Arc<SimWallet>,
    state: Mutex<SimExchangeState>,
}

impl SimExchange {
    pub fn new(venue: Address, wallet: Arc<SimWallet>) -> Self {
        Self {
            venue,
            wallet,
            state: Mutex::new(SimExchangeState::default()),
        }
    }

    /// Set the conversion rate: `amount_out = amount_in · rate / 1e18`.
    pub fn set_rate(&self, token_in: Address, token_out: Address, rate_scaled: u128) {
        self.state
            .lock()
            .unwrap()
            .rates
            .insert((token_in, token_out), rate_scaled);
    }

    /// Force the next swap to return exactly `amount_out`.
    pub fn force_next_output(&self, amount_out: Amount) {
        self.state.lock().unwrap().next_output = Some(amount_out);
    }

    /// Force the next swap to fail with `err`.
    pub fn fail_next(&self, err: AegisError) {
        self.state.lock().unwrap().next_failure = Some(err);
    }

    pub fn calls(&self) -> Vec<SwapRequest> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl ExchangeAdapter for SimExchange {
    fn venue(&self) -> Address {
        self.venue
    }

    fn swap(&self, req: &SwapRequest, now: Timestamp) -> Result<Amount, AegisError> {
        if now > req.deadline {
            return Err(AegisError::DeadlineExpired(req.deadline));
        }
        if req.amount_in == 0 {
            return Err(AegisError::ZeroAmount);
        }

        let amount_out = {
            let mut st = self.state.lock().unwrap();
            if let Some(err) = st.next_failure.take() {
                return Err(err);
            }
            match st.next_output.take() {
                Some(forced) => forced,
                None => {
                    let rate = st
                        .rates
                        .get(&(req.token_in, req.token_out))
                        .copied()
                        .ok_or_else(|| {
                            AegisError::SwapFailed(format!(
                                "no route {} -> {}",
                                req.token_in, req.token_out
                            ))
                        })?;
                    req.amount_in
                        .checked_mul(rate)
                        .map(|v| v / PRICE_SCALE)
                        .ok_or_else(|| AegisError::SwapFailed("rate overflow".into()))?
                }
            }
        };

        if amount_out < req.min_out {
            return Err(AegisError::SlippageExceeded {
                received: amount_out,
                minimum: req.min_out,
            });
        }

        // Settle: consume the one-shot allowance and custody input, credit
        // the recipient with the output.
        self.wallet
            .spend_custody_with_allowance(req.token_in, self.venue, req.amount_in)?;
        self.wallet.settle_to(req.token_out, req.recipient, amount_out);

        self.state.lock().unwrap().calls.push(req.clone());
        Ok(amount_out)
    }
}
