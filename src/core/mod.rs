//! Framework-agnostic ledger logic.
//!
//! Writers go through [`ledger::PointsLedger`]; the other modules hold the queries
//! and pure computations it is built from.

/// Per-student aggregates, replay and drift verification
pub mod aggregate;
/// Behavior catalog management
pub mod behavior;
/// Append-only history log queries
pub mod history;
/// The ledger writer: awards, undos and change notifications
pub mod ledger;
/// Class statistics over an aggregate snapshot
pub mod statistics;
/// Live snapshots of aggregates and history
pub mod subscription;
