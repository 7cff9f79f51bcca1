//! History entry entity - one immutable ledger event.
//!
//! Every field except `is_undone` / `undone_at` is fixed at insert time. `student_name`
//! and `behavior_name` are snapshots taken when the award was made, so renaming a
//! student or deleting a behavior never rewrites past records. `operation_id` is the
//! caller's idempotency key and is unique across the whole log.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// History entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "history_entries")]
pub struct Model {
    /// Unique identifier, also the tie-breaker for entries with equal timestamps
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Class the award was made in
    pub class_id: String,
    /// Student who received the points
    pub student_id: String,
    /// Student name at award time
    pub student_name: String,
    /// Catalog behavior, `None` for inline behaviors
    pub behavior_id: Option<i64>,
    /// Behavior name at award time
    pub behavior_name: String,
    /// Signed delta that was applied to the aggregate
    pub points: i64,
    /// Teacher who made the award
    pub awarded_by: String,
    /// Server timestamp of the award
    pub awarded_at: DateTimeUtc,
    /// Client-supplied idempotency key
    #[sea_orm(unique)]
    pub operation_id: String,
    /// Optional note attached by the teacher
    pub note: Option<String>,
    /// Set once when the entry is reversed
    pub is_undone: bool,
    /// When the entry was reversed
    pub undone_at: Option<DateTimeUtc>,
}

/// `HistoryEntry` has no relations; it is keyed by plain class and student ids.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
