use serde::{Deserialize, Serialize};
use std::fmt;

/// Token amount in the token's native base units (e.g. 1e6 for USDC, 1e18
/// for WETH). u128 holds the full range of any ERC-20 balance.
pub type Amount = u128;

/// Price as an 18-fractional fixed-point number (USD-equivalent convention:
/// 2500e18 means one unit of the token is worth 2500).
pub type Price = u128;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Basis points. 10_000 = 100%.
pub type Bps = u32;

// ── Address ──────────────────────────────────────────────────────────────────

/// 20-byte opaque principal (users, tokens, contracts, operators).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The all-zero address. Doubles as the native-token sentinel and the
    /// "unset" value.
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// `0x`-prefixed lowercase hex representation.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}…)", &self.to_hex()[..10])
    }
}

// ── StrategyId ───────────────────────────────────────────────────────────────

/// 32-byte strategy identifier: BLAKE3 over the creation tuple
/// (owner, token pair, amount, creation time, creation sequence).
/// The per-registry sequence makes the id globally unique even for identical
/// parameters created in the same second.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrategyId(pub [u8; 32]);

impl StrategyId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the id from the creation tuple.
    pub fn derive(
        owner: &Address,
        token_a: &Address,
        token_b: &Address,
        amount: Amount,
        created_at: Timestamp,
        seq: u64,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(owner.as_bytes());
        hasher.update(token_a.as_bytes());
        hasher.update(token_b.as_bytes());
        hasher.update(&amount.to_le_bytes());
        hasher.update(&created_at.to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrategyId({}…)", &self.to_hex()[..16])
    }
}

// ── TxHash ───────────────────────────────────────────────────────────────────

/// 32-byte transaction hash. On-chain deployments carry the real hash; the
/// custodial runtime synthesizes BLAKE3(block ‖ log_index ‖ payload).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({}…)", &self.to_hex()[..16])
    }
}

// ── Strategy status ──────────────────────────────────────────────────────────

/// Lifecycle status shared by every strategy family.
///
/// `Triggered` applies only to stop-loss one-shots: the trigger condition was
/// observed and the sale is in flight. A finished stop-loss (including a
/// partial fill) transitions to `Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
    Triggered,
}

impl StrategyStatus {
    /// True if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StrategyStatus::Completed | StrategyStatus::Cancelled)
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyStatus::Active => "active",
            StrategyStatus::Paused => "paused",
            StrategyStatus::Completed => "completed",
            StrategyStatus::Cancelled => "cancelled",
            StrategyStatus::Triggered => "triggered",
        };
        write!(f, "{s}")
    }
}

/// Why a strategy is sitting in `Paused`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// The owner asked for the pause.
    Owner,
    /// The anomaly guard tripped on abnormal price realization.
    PriceAnomaly,
}

// ── Family payload enums (part of the event wire format) ─────────────────────

/// How a stop-loss trigger price is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopLossKind {
    /// Trigger at an absolute price supplied at creation.
    FixedPrice,
    /// Trigger a fixed percentage below the price sampled at creation.
    Percentage,
    /// Trigger a fixed distance below the running peak price.
    TrailingStop,
}

/// Recurring billing cadence for subscriptions. Monthly is flat 30 days and
/// yearly flat 365 days; the exact second counts are normative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingPeriod {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingPeriod {
    /// Period length in seconds.
    pub fn seconds(&self) -> Timestamp {
        use crate::constants::*;
        match self {
            BillingPeriod::Daily => BILLING_DAILY_SECS,
            BillingPeriod::Weekly => BILLING_WEEKLY_SECS,
            BillingPeriod::Monthly => BILLING_MONTHLY_SECS,
            BillingPeriod::Quarterly => BILLING_QUARTERLY_SECS,
            BillingPeriod::Yearly => BILLING_YEARLY_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_round_trip() {
        let a = Address::from_bytes([0xab; 20]);
        let hex = a.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(Address::from_hex(&hex).unwrap(), a);
        assert_eq!(Address::from_hex(hex.trim_start_matches("0x")).unwrap(), a);
    }

    #[test]
    fn address_from_hex_rejects_wrong_length() {
        assert!(Address::from_hex("0xdeadbeef").is_err());
    }

    #[test]
    fn strategy_id_is_sensitive_to_sequence() {
        let owner = Address::from_bytes([1; 20]);
        let a = Address::from_bytes([2; 20]);
        let b = Address::from_bytes([3; 20]);
        let id0 = StrategyId::derive(&owner, &a, &b, 1_000, 1_700_000_000, 0);
        let id1 = StrategyId::derive(&owner, &a, &b, 1_000, 1_700_000_000, 1);
        assert_ne!(id0, id1, "same parameters, different sequence must differ");
    }

    #[test]
    fn terminal_statuses() {
        assert!(StrategyStatus::Completed.is_terminal());
        assert!(StrategyStatus::Cancelled.is_terminal());
        assert!(!StrategyStatus::Active.is_terminal());
        assert!(!StrategyStatus::Paused.is_terminal());
        assert!(!StrategyStatus::Triggered.is_terminal());
    }
}
