use std::collections::BTreeMap;
use std::sync::Mutex;

use aegis_core::error::AegisError;
use aegis_core::types::{Address, Amount};

/// The delegated-spend surface the engines were granted by the user.
///
/// `pull` moves funds from a user wallet into engine custody under the
/// standing permission; `pay` disburses from custody; `approve` grants a
/// venue a one-shot allowance over custody funds. Approvals are idempotent
/// re-sets, never additive increments.
pub trait WalletAdapter: Send + Sync {
    fn balance_of(&self, owner: Address, token: Address) -> Amount;

    fn custody_balance(&self, token: Address) -> Amount;

    /// Move `amount` of `token` from `owner` into engine custody.
    fn pull(&self, owner: Address, token: Address, amount: Amount) -> Result<(), AegisError>;

    /// Disburse `amount` of `token` from engine custody to `to`.
    fn pay(&self, token: Address, to: Address, amount: Amount) -> Result<(), AegisError>;

    /// Set `spender`'s allowance over custody `token` funds to exactly `amount`.
    fn approve(&self, token: Address, spender: Address, amount: Amount) -> Result<(), AegisError>;
}

// ── SimWallet ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimWalletState {
    /// (owner, token) → balance.
    balances: BTreeMap<(Address, Address), Amount>,
    /// token → engine custody balance.
    custody: BTreeMap<Address, Amount>,
    /// (token, spender) → allowance over custody funds.
    allowances: BTreeMap<(Address, Address), Amount>,
}

/// In-memory ledger: user balances, engine custody, venue allowances.
pub struct SimWallet {
    state: Mutex<SimWalletState>,
}

impl SimWallet {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimWalletState::default()),
        }
    }

    /// Mint `amount` of `token` into `owner`'s wallet.
    pub fn credit(&self, owner: Address, token: Address, amount: Amount) {
        let mut st = self.state.lock().unwrap();
        *st.balances.entry((owner, token)).or_insert(0) += amount;
    }

    /// Mint `amount` of `token` directly into engine custody (funds stuck in
    /// engine contracts, the emergency-withdraw case).
    pub fn credit_custody(&self, token: Address, amount: Amount) {
        let mut st = self.state.lock().unwrap();
        *st.custody.entry(token).or_insert(0) += amount;
    }

    pub fn allowance(&self, token: Address, spender: Address) -> Amount {
        self.state
            .lock()
            .unwrap()
            .allowances
            .get(&(token, spender))
            .copied()
            .unwrap_or(0)
    }

    /// Consume `amount` of `spender`'s custody allowance and debit custody.
    /// Used by the simulated venue to settle a swap's input side.
    pub(crate) fn spend_custody_with_allowance(
        &self,
        token: Address,
        spender: Address,
        amount: Amount,
    ) -> Result<(), AegisError> {
        let mut st = self.state.lock().unwrap();
        let granted = st.allowances.get(&(token, spender)).copied().unwrap_or(0);
        if granted < amount {
            return Err(AegisError::InsufficientAllowance {
                need: amount,
                granted,
            });
        }
        let have = st.custody.get(&token).copied().unwrap_or(0);
        if have < amount {
            return Err(AegisError::InsufficientBalance { need: amount, have });
        }
        st.allowances.insert((token, spender), granted - amount);
        st.custody.insert(token, have - amount);
        Ok(())
    }

    /// Credit `to`'s wallet with freshly settled swap output.
    pub(crate) fn settle_to(&self, token: Address, to: Address, amount: Amount) {
        let mut st = self.state.lock().unwrap();
        *st.balances.entry((to, token)).or_insert(0) += amount;
    }
}

impl Default for SimWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletAdapter for SimWallet {
    fn balance_of(&self, owner: Address, token: Address) -> Amount {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(owner, token))
            .copied()
            .unwrap_or(0)
    }

    fn custody_balance(&self, token: Address) -> Amount {
        self.state
            .lock()
            .unwrap()
            .custody
            .get(&token)
            .copied()
            .unwrap_or(0)
    }

    fn pull(&self, owner: Address, token: Address, amount: Amount) -> Result<(), AegisError> {
        let mut st = self.state.lock().unwrap();
        let have = st.balances.get(&(owner, token)).copied().unwrap_or(0);
        if have < amount {
            return Err(AegisError::InsufficientBalance { need: amount, have });
        }
        st.balances.insert((owner, token), have - amount);
        *st.custody.entry(token).or_insert(0) += amount;
        Ok(())
    }

    fn pay(&self, token: Address, to: Address, amount: Amount) -> Result<(), AegisError> {
        let mut st = self.state.lock().unwrap();
        let have = st.custody.get(&token).copied().unwrap_or(0);
        if have < amount {
            return Err(AegisError::InsufficientBalance { need: amount, have });
        }
        st.custody.insert(token, have - amount);
        *st.balances.entry((to, token)).or_insert(0) += amount;
        Ok(())
    }

    fn approve(&self, token: Address, spender: Address, amount: Amount) -> Result<(), AegisError> {
        let mut st = self.state.lock().unwrap();
        // Idempotent re-set, not an additive increment.
        st.allowances.insert((token, spender), amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn pull_moves_funds_into_custody() {
        let w = SimWallet::new();
        let (alice, usdc) = (addr(1), addr(9));
        w.credit(alice, usdc, 1_000);
        w.pull(alice, usdc, 400).unwrap();
        assert_eq!(w.balance_of(alice, usdc), 600);
        assert_eq!(w.custody_balance(usdc), 400);
    }

    #[test]
    fn pull_fails_on_insufficient_balance() {
        let w = SimWallet::new();
        let (alice, usdc) = (addr(1), addr(9));
        w.credit(alice, usdc, 10);
        let err = w.pull(alice, usdc, 11).unwrap_err();
        assert_eq!(err, AegisError::InsufficientBalance { need: 11, have: 10 });
    }

    #[test]
    fn approve_resets_instead_of_accumulating() {
        let w = SimWallet::new();
        let (usdc, venue) = (addr(9), addr(5));
        w.approve(usdc, venue, 100).unwrap();
        w.approve(usdc, venue, 100).unwrap();
        assert_eq!(w.allowance(usdc, venue), 100);
    }

    #[test]
    fn custody_spend_consumes_allowance() {
        let w = SimWallet::new();
        let (usdc, venue) = (addr(9), addr(5));
        w.credit_custody(usdc, 500);
        w.approve(usdc, venue, 300).unwrap();
        w.spend_custody_with_allowance(usdc, venue, 300).unwrap();
        assert_eq!(w.custody_balance(usdc), 200);
        assert_eq!(w.allowance(usdc, venue), 0);
        assert!(matches!(
            w.spend_custody_with_allowance(usdc, venue, 1),
            Err(AegisError::InsufficientAllowance { .. })
        ));
    }
}
