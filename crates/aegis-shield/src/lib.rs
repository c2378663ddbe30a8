//! The per-user policy engine ("shield") and the delegation-level caveat
//! evaluators. Every spend the platform makes on a user's behalf passes
//! through [`policy::ShieldBook::record_spending`], the single serialization
//! point for spending state.

pub mod caveats;
pub mod policy;

pub use policy::{PendingConfigUpdate, Shield, ShieldBook, TokenBucket};
