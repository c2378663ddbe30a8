//! Event log and read-model projection.
//!
//! The log is append-only with a `(block, log_index)` total order. The
//! projection is a deterministic fold over that order: deleting every row
//! and re-folding from genesis reproduces byte-equal state.

pub mod db;
pub mod fold;
pub mod log;
pub mod query;
pub mod tables;

pub use db::ProjectionDb;
pub use fold::Projection;
pub use log::EventLog;
pub use query::{DashboardQuery, UserSummary};
