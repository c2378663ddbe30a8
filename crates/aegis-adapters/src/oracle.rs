use std::collections::BTreeMap;
use std::sync::Mutex;

use aegis_core::error::AegisError;
use aegis_core::types::{Address, Price};

/// Token price source. Prices are 18-fractional fixed-point in the
/// deployment's quote convention. A missing or stale feed surfaces as
/// [`AegisError::OracleUnavailable`]; engines treat that as "not triggered"
/// (stop-loss) or "cannot evaluate" (rebalance).
pub trait PriceOracle: Send + Sync {
    fn price(&self, token: Address) -> Result<Price, AegisError>;
}

/// Settable in-memory price store.
pub struct SimOracle {
    prices: Mutex<BTreeMap<Address, Price>>,
}

impl SimOracle {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_price(&self, token: Address, price: Price) {
        self.prices.lock().unwrap().insert(token, price);
    }

    /// Drop the feed for `token`; subsequent reads fail.
    pub fn clear_price(&self, token: Address) {
        self.prices.lock().unwrap().remove(&token);
    }
}

impl Default for SimOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceOracle for SimOracle {
    fn price(&self, token: Address) -> Result<Price, AegisError> {
        self.prices
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .ok_or_else(|| AegisError::OracleUnavailable(token.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_feed_is_unavailable() {
        let oracle = SimOracle::new();
        let weth = Address::from_bytes([1; 20]);
        assert!(matches!(
            oracle.price(weth),
            Err(AegisError::OracleUnavailable(_))
        ));
        oracle.set_price(weth, 2_500 * aegis_core::constants::PRICE_SCALE);
        assert_eq!(
            oracle.price(weth).unwrap(),
            2_500 * aegis_core::constants::PRICE_SCALE
        );
        oracle.clear_price(weth);
        assert!(oracle.price(weth).is_err());
    }
}
