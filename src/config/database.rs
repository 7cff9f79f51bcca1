//! Database configuration module for the points ledger.
//!
//! Handles the `SQLite` connection and schema creation through `SeaORM`. Tables are
//! generated from the entity definitions with `Schema::create_table_from_entity`, so the
//! schema always matches the Rust structs; the history log additionally gets the two
//! secondary indexes its read paths rely on.

use crate::entities::{Behavior, HistoryEntry, HistoryEntryColumn, StudentPoints};
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info};

/// Fallback used when `DATABASE_URL` is not set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/points_ledger.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the given database URL.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    debug!("Connecting to database at {database_url}");
    Database::connect(database_url).await.map_err(Into::into)
}

/// Creates all ledger tables and indexes if they do not exist yet.
///
/// Safe to call on every start-up.
pub async fn create_tables<C>(db: &C) -> Result<()>
where
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut behavior_table = schema.create_table_from_entity(Behavior);
    let mut history_table = schema.create_table_from_entity(HistoryEntry);
    let mut points_table = schema.create_table_from_entity(StudentPoints);

    behavior_table.if_not_exists();
    history_table.if_not_exists();
    points_table.if_not_exists();

    db.execute(builder.build(&behavior_table)).await?;
    db.execute(builder.build(&history_table)).await?;
    db.execute(builder.build(&points_table)).await?;

    // Per-student history, newest first
    let student_index = Index::create()
        .name("idx_history_class_student_awarded")
        .table(HistoryEntry)
        .col(HistoryEntryColumn::ClassId)
        .col(HistoryEntryColumn::StudentId)
        .col(HistoryEntryColumn::AwardedAt)
        .if_not_exists()
        .to_owned();
    // Class-wide history across students
    let class_index = Index::create()
        .name("idx_history_class_awarded")
        .table(HistoryEntry)
        .col(HistoryEntryColumn::ClassId)
        .col(HistoryEntryColumn::AwardedAt)
        .if_not_exists()
        .to_owned();

    db.execute(builder.build(&student_index)).await?;
    db.execute(builder.build(&class_index)).await?;

    info!("Ledger tables and indexes ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BehaviorModel, HistoryEntryModel, StudentPointsModel};
    use sea_orm::{EntityTrait, QuerySelect};

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<BehaviorModel> = Behavior::find().limit(1).all(&db).await?;
        let _: Vec<HistoryEntryModel> = HistoryEntry::find().limit(1).all(&db).await?;
        let _: Vec<StudentPointsModel> = StudentPoints::find().limit(1).all(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
