//! Shared test utilities for the points ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and building requests with sensible defaults.

use crate::{
    config::LedgerSettings,
    core::{
        behavior::{self, NewBehavior},
        history::{self, NewEntry},
        ledger::{AwardRequest, BehaviorRef, PointsLedger, UndoRequest, UndoTarget},
    },
    entities::{BehaviorCategory, behavior as behavior_entity, history_entry, student_points},
    errors::Result,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tempfile::TempDir;

/// Class used by every helper unless told otherwise.
pub const TEST_CLASS: &str = "class-1";
/// Teacher recorded as awarder and behavior owner.
pub const TEST_TEACHER: &str = "teacher-1";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a ledger over a fresh in-memory database with default settings.
pub async fn setup_test_ledger() -> Result<PointsLedger> {
    setup_test_ledger_with(LedgerSettings::default()).await
}

/// Creates a ledger over a fresh in-memory database with custom settings.
pub async fn setup_test_ledger_with(settings: LedgerSettings) -> Result<PointsLedger> {
    let db = setup_test_db().await?;
    Ok(PointsLedger::new(db, settings))
}

/// Creates a ledger over an `SQLite` file in a temporary directory.
///
/// Unlike `sqlite::memory:`, the pool holds several connections, so concurrent
/// writers really contend for the database lock. Keep the returned directory alive
/// for the duration of the test.
pub async fn setup_file_test_ledger(settings: LedgerSettings) -> Result<(TempDir, PointsLedger)> {
    let dir = TempDir::new()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.sqlite").display());
    let db = crate::config::database::create_connection(&url).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((dir, PointsLedger::new(db, settings)))
}

/// Creates a custom behavior in [`TEST_CLASS`]; the category follows the sign of `points`.
pub async fn create_test_behavior(
    db: &DatabaseConnection,
    name: &str,
    points: i64,
) -> Result<behavior_entity::Model> {
    behavior::create_behavior(
        db,
        NewBehavior {
            class_id: TEST_CLASS.to_string(),
            name: name.to_string(),
            description: String::new(),
            point_value: points,
            category: category_for(points),
            is_custom: true,
            owner_id: TEST_TEACHER.to_string(),
        },
    )
    .await
}

/// Appends a history entry directly, bypassing the writer. The aggregate is not touched.
///
/// # Defaults
/// * `student_name`: "Student {id}"
/// * `behavior_name`: "Test"
pub async fn insert_test_entry(
    db: &DatabaseConnection,
    student_id: &str,
    points: i64,
    operation_id: &str,
) -> Result<history_entry::Model> {
    insert_test_entry_in_class(db, TEST_CLASS, student_id, points, operation_id).await
}

/// Same as [`insert_test_entry`] for an arbitrary class.
pub async fn insert_test_entry_in_class(
    db: &DatabaseConnection,
    class_id: &str,
    student_id: &str,
    points: i64,
    operation_id: &str,
) -> Result<history_entry::Model> {
    history::append(
        db,
        NewEntry {
            class_id: class_id.to_string(),
            student_id: student_id.to_string(),
            student_name: format!("Student {student_id}"),
            behavior_id: None,
            behavior_name: "Test".to_string(),
            points,
            awarded_by: TEST_TEACHER.to_string(),
            operation_id: operation_id.to_string(),
            note: None,
        },
        chrono::Utc::now(),
    )
    .await
}

/// Writes an aggregate whose split does not add up to its total.
pub async fn insert_malformed_aggregate(
    db: &DatabaseConnection,
    student_id: &str,
) -> Result<student_points::Model> {
    let model = student_points::ActiveModel {
        class_id: Set(TEST_CLASS.to_string()),
        student_id: Set(student_id.to_string()),
        student_name: Set(format!("Student {student_id}")),
        total_points: Set(5),
        positive_points: Set(1),
        negative_points: Set(0),
        last_updated: Set(chrono::Utc::now()),
    };
    model.insert(db).await.map_err(Into::into)
}

/// Inline award in [`TEST_CLASS`] by [`TEST_TEACHER`].
///
/// Non-negative points are recorded as "Participation", negative ones as "Disruption".
pub fn inline_award(
    student_id: &str,
    student_name: &str,
    points: i64,
    operation_id: &str,
) -> AwardRequest {
    let name = if points >= 0 { "Participation" } else { "Disruption" };
    let mut request = named_award(student_id, name, points, operation_id);
    request.student_name = student_name.to_string();
    request
}

/// Inline award with an explicit behavior name; the student is named "Student {id}".
pub fn named_award(
    student_id: &str,
    behavior_name: &str,
    points: i64,
    operation_id: &str,
) -> AwardRequest {
    AwardRequest {
        class_id: TEST_CLASS.to_string(),
        student_id: student_id.to_string(),
        student_name: format!("Student {student_id}"),
        behavior: BehaviorRef::Inline {
            name: behavior_name.to_string(),
            points,
            category: category_for(points),
        },
        operation_id: operation_id.to_string(),
        awarded_by: TEST_TEACHER.to_string(),
        note: None,
    }
}

/// Undo request in [`TEST_CLASS`].
pub fn undo_request(student_id: &str, target: UndoTarget) -> UndoRequest {
    UndoRequest {
        class_id: TEST_CLASS.to_string(),
        student_id: student_id.to_string(),
        target,
    }
}

const fn category_for(points: i64) -> BehaviorCategory {
    if points >= 0 {
        BehaviorCategory::Positive
    } else {
        BehaviorCategory::Negative
    }
}
