//! History log - the ordered record of every award.
//!
//! Entries are appended by the ledger writer only, and the only mutation ever applied
//! afterwards is marking an entry undone. "Recent" views order by `awarded_at`
//! descending with the entry id as tie-breaker and hide undone entries; the audit views
//! return everything, oldest first.

use crate::{
    entities::{HistoryEntry, history_entry},
    errors::Result,
};
use sea_orm::{QueryOrder, QuerySelect, Set, prelude::*, sea_query::Expr};

/// Snapshot fields of an entry about to be appended.
#[derive(Debug, Clone)]
pub(crate) struct NewEntry {
    pub class_id: String,
    pub student_id: String,
    pub student_name: String,
    pub behavior_id: Option<i64>,
    pub behavior_name: String,
    pub points: i64,
    pub awarded_by: String,
    pub operation_id: String,
    pub note: Option<String>,
}

/// Appends an immutable entry. Only the ledger writer calls this, inside its transaction.
pub(crate) async fn append<C>(db: &C, entry: NewEntry, now: DateTimeUtc) -> Result<history_entry::Model>
where
    C: ConnectionTrait,
{
    let model = history_entry::ActiveModel {
        class_id: Set(entry.class_id),
        student_id: Set(entry.student_id),
        student_name: Set(entry.student_name),
        behavior_id: Set(entry.behavior_id),
        behavior_name: Set(entry.behavior_name),
        points: Set(entry.points),
        awarded_by: Set(entry.awarded_by),
        awarded_at: Set(now),
        operation_id: Set(entry.operation_id),
        note: Set(entry.note),
        is_undone: Set(false),
        undone_at: Set(None),
        ..Default::default()
    };
    model.insert(db).await.map_err(Into::into)
}

/// Marks an entry undone if it is not already. Returns false when another writer got there first.
pub(crate) async fn mark_undone<C>(db: &C, entry_id: i64, now: DateTimeUtc) -> Result<bool>
where
    C: ConnectionTrait,
{
    let result = HistoryEntry::update_many()
        .col_expr(history_entry::Column::IsUndone, Expr::value(true))
        .col_expr(history_entry::Column::UndoneAt, Expr::value(Some(now)))
        .filter(history_entry::Column::Id.eq(entry_id))
        .filter(history_entry::Column::IsUndone.eq(false))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Looks up a single entry by id, undone or not.
pub async fn get_entry<C>(db: &C, entry_id: i64) -> Result<Option<history_entry::Model>>
where
    C: ConnectionTrait,
{
    HistoryEntry::find_by_id(entry_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Looks up the entry recorded for an idempotency key.
pub async fn get_entry_by_operation<C>(
    db: &C,
    operation_id: &str,
) -> Result<Option<history_entry::Model>>
where
    C: ConnectionTrait,
{
    HistoryEntry::find()
        .filter(history_entry::Column::OperationId.eq(operation_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Most recent non-undone entries across all students of a class.
pub async fn recent_for_class<C>(
    db: &C,
    class_id: &str,
    limit: u64,
) -> Result<Vec<history_entry::Model>>
where
    C: ConnectionTrait,
{
    recent_entries(db, class_id, None, limit).await
}

/// Most recent non-undone entries of one student.
pub async fn recent_for_student<C>(
    db: &C,
    class_id: &str,
    student_id: &str,
    limit: u64,
) -> Result<Vec<history_entry::Model>>
where
    C: ConnectionTrait,
{
    recent_entries(db, class_id, Some(student_id), limit).await
}

/// Shared query behind the recent-history views; `student_id = None` means class-wide.
pub async fn recent_entries<C>(
    db: &C,
    class_id: &str,
    student_id: Option<&str>,
    limit: u64,
) -> Result<Vec<history_entry::Model>>
where
    C: ConnectionTrait,
{
    let mut query = HistoryEntry::find()
        .filter(history_entry::Column::ClassId.eq(class_id))
        .filter(history_entry::Column::IsUndone.eq(false));
    if let Some(student_id) = student_id {
        query = query.filter(history_entry::Column::StudentId.eq(student_id));
    }
    query
        .order_by_desc(history_entry::Column::AwardedAt)
        .order_by_desc(history_entry::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The newest entry of a student that can still be undone.
pub async fn latest_active_for_student<C>(
    db: &C,
    class_id: &str,
    student_id: &str,
) -> Result<Option<history_entry::Model>>
where
    C: ConnectionTrait,
{
    Ok(recent_for_student(db, class_id, student_id, 1)
        .await?
        .into_iter()
        .next())
}

/// Every entry of a student, including undone ones, oldest first.
///
/// This is the replay input for aggregate rebuilds and the audit view of a student.
pub async fn audit_trail<C>(
    db: &C,
    class_id: &str,
    student_id: &str,
) -> Result<Vec<history_entry::Model>>
where
    C: ConnectionTrait,
{
    HistoryEntry::find()
        .filter(history_entry::Column::ClassId.eq(class_id))
        .filter(history_entry::Column::StudentId.eq(student_id))
        .order_by_asc(history_entry::Column::AwardedAt)
        .order_by_asc(history_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Every entry of a class, including undone ones, oldest first.
pub async fn class_audit_trail<C>(db: &C, class_id: &str) -> Result<Vec<history_entry::Model>>
where
    C: ConnectionTrait,
{
    HistoryEntry::find()
        .filter(history_entry::Column::ClassId.eq(class_id))
        .order_by_asc(history_entry::Column::AwardedAt)
        .order_by_asc(history_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Number of entries recorded for a student, undone ones included.
pub async fn count_for_student<C>(db: &C, class_id: &str, student_id: &str) -> Result<u64>
where
    C: ConnectionTrait,
{
    HistoryEntry::find()
        .filter(history_entry::Column::ClassId.eq(class_id))
        .filter(history_entry::Column::StudentId.eq(student_id))
        .count(db)
        .await
        .map_err(Into::into)
}
