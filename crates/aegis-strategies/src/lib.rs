//! Strategy state machines: DCA, stop-loss, rebalance, and subscriptions,
//! plus the anomaly guard and the operator emergency-withdraw timelock.
//!
//! Each engine owns its strategies behind a single-writer registry. Engines
//! never mutate each other's state; all spending flows through the shield
//! passed in via [`ExecutionContext`], and every mutation returns the domain
//! events it produced for the caller to stamp and ingest.

pub mod anomaly;
pub mod dca;
pub mod emergency;
pub mod rebalance;
pub mod stoploss;
pub mod subscription;

use aegis_core::types::{Address, Timestamp};
use aegis_adapters::{ExchangeAdapter, WalletAdapter};
use aegis_shield::ShieldBook;

/// Everything an execute step needs besides the engine's own registry.
///
/// The shield is the only shared mutable collaborator; adapters are
/// interior-mutable behind `&dyn`.
pub struct ExecutionContext<'a> {
    pub shield: &'a mut ShieldBook,
    pub wallet: &'a dyn WalletAdapter,
    pub exchange: &'a dyn ExchangeAdapter,
    /// The executor principal recording spends against the shield ACL.
    pub executor: Address,
    pub now: Timestamp,
}

pub use dca::{DcaCreateParams, DcaEngine, DcaStrategy};
pub use emergency::{EmergencyTimelock, EmergencyWithdrawProposal};
pub use rebalance::{RebalanceCreateParams, RebalanceEngine, RebalanceStrategy};
pub use stoploss::{StopLossCreateParams, StopLossEngine, StopLossStrategy, StopLossTrigger};
pub use subscription::{
    RecipientStats, SubscriptionCreateParams, SubscriptionEngine, Subscription,
};
