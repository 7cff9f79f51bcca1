//! Student points entity - the materialized aggregate for one (class, student) pair.
//!
//! `negative_points` is stored signed (zero or below), so `total_points` always equals
//! `positive_points + negative_points`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Student points database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "student_points")]
pub struct Model {
    /// Class half of the composite key
    #[sea_orm(primary_key, auto_increment = false)]
    pub class_id: String,
    /// Student half of the composite key
    #[sea_orm(primary_key, auto_increment = false)]
    pub student_id: String,
    /// Most recent student name seen by the ledger
    pub student_name: String,
    /// Sum of all non-undone deltas
    pub total_points: i64,
    /// Sum of the positive non-undone deltas
    pub positive_points: i64,
    /// Sum of the negative non-undone deltas (never above zero)
    pub negative_points: i64,
    /// When the aggregate last changed
    pub last_updated: DateTimeUtc,
}

/// `StudentPoints` has no relations.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A zero aggregate, the starting point before the first award.
    #[must_use]
    pub fn zeroed(
        class_id: &str,
        student_id: &str,
        student_name: &str,
        now: DateTimeUtc,
    ) -> Self {
        Self {
            class_id: class_id.to_string(),
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            total_points: 0,
            positive_points: 0,
            negative_points: 0,
            last_updated: now,
        }
    }
}
