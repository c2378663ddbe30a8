//! External-collaborator boundaries: wall-clock, price oracle, exchange
//! venue, and the delegated-spend wallet surface.
//!
//! Engines only ever see the traits. The `Sim*` implementations are the
//! conformant custodial variant: funds live in an in-memory ledger, swaps
//! settle against a rate table, prices come from a settable store. They back
//! the operator binary's dry-run mode and every test suite.

pub mod clock;
pub mod exchange;
pub mod oracle;
pub mod wallet;

pub use clock::{Clock, ManualClock, SystemClock};
pub use exchange::{ExchangeAdapter, SimExchange, SwapRequest};
pub use oracle::{PriceOracle, SimOracle};
pub use wallet::{SimWallet, WalletAdapter};
