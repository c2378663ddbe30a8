//! The off-chain keeper: environment-driven configuration, the [`Platform`]
//! composition root (engines + shield + adapters + event log + projection,
//! driven by typed commands), and the cooperative [`Keeper`] scheduler that
//! selects due work, dry-runs it, executes, and ingests the results.

pub mod config;
pub mod platform;
pub mod scheduler;

pub use config::KeeperConfig;
pub use platform::{Command, CommandOutcome, Platform, PlatformConfig};
pub use scheduler::{Keeper, KeeperOptions, TickReport};
