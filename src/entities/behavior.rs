//! Behavior entity - an awardable behavior in a class catalog.
//!
//! The sign of `point_value` always agrees with `category`. Behaviors are hard-deleted;
//! history entries keep their own snapshot of the name and points, so there is no
//! relation from the log back to this table.

use crate::errors::Error;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Whether a behavior adds or removes points.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum BehaviorCategory {
    /// Rewarded behavior, strictly positive points
    #[sea_orm(string_value = "positive")]
    Positive,
    /// Discouraged behavior, strictly negative points
    #[sea_orm(string_value = "negative")]
    Negative,
}

impl BehaviorCategory {
    /// Lowercase name as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }

    /// Checks that `points` is non-zero and carries the sign this category requires.
    pub fn check_points(self, points: i64) -> crate::errors::Result<()> {
        if points == 0 {
            return Err(Error::ZeroPoints);
        }
        let sign_ok = match self {
            Self::Positive => points > 0,
            Self::Negative => points < 0,
        };
        if sign_ok {
            Ok(())
        } else {
            Err(Error::CategoryMismatch {
                points,
                category: self.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for BehaviorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BehaviorCategory {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            _ => Err(Error::InvalidCategory {
                value: s.to_string(),
            }),
        }
    }
}

/// Behavior database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "behaviors")]
pub struct Model {
    /// Unique identifier for the behavior
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Class this behavior belongs to
    pub class_id: String,
    /// Display name (e.g., "Participation", "Disruption")
    pub name: String,
    /// Free-form description shown to teachers
    pub description: String,
    /// Signed point value applied on award
    pub point_value: i64,
    /// Positive or negative, must agree with the sign of `point_value`
    pub category: BehaviorCategory,
    /// True when a teacher defined it, false for the built-in catalog
    pub is_custom: bool,
    /// Teacher who defined the behavior
    pub owner_id: String,
    /// When the behavior was created
    pub created_at: DateTimeUtc,
    /// When the behavior was last edited
    pub updated_at: DateTimeUtc,
}

/// `Behavior` has no relations; the history log stores denormalized snapshots instead.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
