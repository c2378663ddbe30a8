//! Environment-driven keeper configuration.
//!
//! Required keys:
//!   AEGIS_CHAIN_ENDPOINT       — chain RPC URL
//!   AEGIS_EXECUTOR_KEY         — executor signing key (hex)
//!   AEGIS_DCA_ADAPTER          — DCA engine adapter address
//!   AEGIS_STOP_LOSS_ADAPTER    — stop-loss engine adapter address
//!   AEGIS_REBALANCE_ADAPTER    — rebalance engine adapter address
//!   AEGIS_SUBSCRIPTION_ADAPTER — subscription engine adapter address
//!   AEGIS_ORACLE_ADDRESS       — price oracle address
//! Optional:
//!   AEGIS_INDEXER_ENDPOINT     — projection/indexer URL
//!   AEGIS_EXECUTION_ENABLED    — "true"/"false"; false dry-runs every item
//!   AEGIS_NUMERAIRE_TOKEN      — rebalance routing hub token address

use aegis_core::error::AegisError;
use aegis_core::types::Address;

#[derive(Clone, Debug)]
pub struct KeeperConfig {
    pub chain_endpoint: String,
    pub executor_key: String,
    pub dca_adapter: Address,
    pub stop_loss_adapter: Address,
    pub rebalance_adapter: Address,
    pub subscription_adapter: Address,
    pub oracle_address: Address,
    pub indexer_endpoint: Option<String>,
    pub execution_enabled: bool,
    pub numeraire_token: Address,
}

fn required(key: &'static str) -> Result<String, AegisError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AegisError::MissingConfig(key)),
    }
}

fn required_address(key: &'static str) -> Result<Address, AegisError> {
    let raw = required(key)?;
    Address::from_hex(&raw).map_err(|e| AegisError::InvalidConfig {
        key,
        reason: e.to_string(),
    })
}

impl KeeperConfig {
    pub fn from_env() -> Result<Self, AegisError> {
        let execution_enabled = match std::env::var("AEGIS_EXECUTION_ENABLED") {
            Ok(v) => v.trim().parse::<bool>().map_err(|_| AegisError::InvalidConfig {
                key: "AEGIS_EXECUTION_ENABLED",
                reason: format!("expected true or false, got {v:?}"),
            })?,
            Err(_) => false,
        };
        let numeraire_token = match std::env::var("AEGIS_NUMERAIRE_TOKEN") {
            Ok(v) if !v.trim().is_empty() => {
                Address::from_hex(&v).map_err(|e| AegisError::InvalidConfig {
                    key: "AEGIS_NUMERAIRE_TOKEN",
                    reason: e.to_string(),
                })?
            }
            _ => Address::ZERO,
        };
        Ok(Self {
            chain_endpoint: required("AEGIS_CHAIN_ENDPOINT")?,
            executor_key: required("AEGIS_EXECUTOR_KEY")?,
            dca_adapter: required_address("AEGIS_DCA_ADAPTER")?,
            stop_loss_adapter: required_address("AEGIS_STOP_LOSS_ADAPTER")?,
            rebalance_adapter: required_address("AEGIS_REBALANCE_ADAPTER")?,
            subscription_adapter: required_address("AEGIS_SUBSCRIPTION_ADAPTER")?,
            oracle_address: required_address("AEGIS_ORACLE_ADDRESS")?,
            indexer_endpoint: std::env::var("AEGIS_INDEXER_ENDPOINT").ok().filter(|v| !v.is_empty()),
            execution_enabled,
            numeraire_token,
        })
    }

    /// Executor principal derived from the signing key material.
    pub fn executor_address(&self) -> Address {
        let digest = blake3::hash(self.executor_key.as_bytes());
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&digest.as_bytes()[..20]);
        Address::from_bytes(arr)
    }
}
