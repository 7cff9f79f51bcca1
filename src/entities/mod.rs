//! Entity module - SeaORM definitions for the ledger tables.
//!
//! `behavior` is the per-class catalog, `history_entry` is the append-mostly event log
//! and `student_points` is the materialized per-student aggregate derived from it.

pub mod behavior;
pub mod history_entry;
pub mod student_points;

// Re-export specific types to avoid conflicts
pub use behavior::{BehaviorCategory, Entity as Behavior, Model as BehaviorModel};
pub use history_entry::{
    Column as HistoryEntryColumn, Entity as HistoryEntry, Model as HistoryEntryModel,
};
pub use student_points::{Entity as StudentPoints, Model as StudentPointsModel};
