//! Aggregate store - the per-student running totals.
//!
//! One `student_points` row per (class, student), created lazily on the first award and
//! shifted by the ledger writer with atomic column expressions inside its transaction.
//! The row is a cache: the history log is the source of truth, and [`replay`] recomputes
//! the same totals from it. [`verify_aggregate`] compares the two and reports drift
//! without touching anything; [`repair_aggregate`] is the explicit operator action that
//! overwrites a drifted row.

use crate::{
    core::history,
    entities::{HistoryEntry, StudentPoints, history_entry, student_points},
    errors::{Error, Result},
};
use sea_orm::{
    QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*,
    sea_query::{Expr, OnConflict},
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Signed totals of a student; `negative` is zero or below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointTotals {
    /// Sum of all non-undone deltas
    pub total: i64,
    /// Sum of positive deltas
    pub positive: i64,
    /// Sum of negative deltas
    pub negative: i64,
}

impl PointTotals {
    /// Adds one delta, routing it to the positive or negative split.
    pub const fn apply(&mut self, points: i64) {
        self.total += points;
        if points > 0 {
            self.positive += points;
        } else {
            self.negative += points;
        }
    }

    /// Totals currently stored on an aggregate row.
    #[must_use]
    pub const fn of(model: &student_points::Model) -> Self {
        Self {
            total: model.total_points,
            positive: model.positive_points,
            negative: model.negative_points,
        }
    }

    /// Whether the split is internally consistent.
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.positive >= 0 && self.negative <= 0 && self.positive + self.negative == self.total
    }
}

/// Replays history entries into totals, skipping undone entries.
///
/// Pure function over the entry list; order does not matter for the result.
#[must_use]
pub fn replay(entries: &[history_entry::Model]) -> PointTotals {
    let mut totals = PointTotals::default();
    for entry in entries.iter().filter(|e| !e.is_undone) {
        totals.apply(entry.points);
    }
    totals
}

/// Outcome of comparing a stored aggregate against a replay of its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    /// Class of the aggregate
    pub class_id: String,
    /// Student of the aggregate
    pub student_id: String,
    /// Stored totals, `None` when no aggregate row exists
    pub stored: Option<PointTotals>,
    /// Totals obtained from the history log
    pub replayed: PointTotals,
}

impl DriftReport {
    /// True when the stored aggregate matches the replay. A missing row matches an empty replay.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.stored.unwrap_or_default() == self.replayed
    }

    /// Converts a drifted report into an integrity error.
    #[must_use]
    pub fn to_error(&self) -> Error {
        Error::Drift {
            class_id: self.class_id.clone(),
            student_id: self.student_id.clone(),
            stored_total: self.stored.unwrap_or_default().total,
            replayed_total: self.replayed.total,
        }
    }
}

/// Fetches the aggregate of one student.
pub async fn get_aggregate<C>(
    db: &C,
    class_id: &str,
    student_id: &str,
) -> Result<Option<student_points::Model>>
where
    C: ConnectionTrait,
{
    StudentPoints::find_by_id((class_id.to_string(), student_id.to_string()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All aggregates of a class, ordered by student id.
pub async fn get_class_aggregates<C>(
    db: &C,
    class_id: &str,
) -> Result<Vec<student_points::Model>>
where
    C: ConnectionTrait,
{
    StudentPoints::find()
        .filter(student_points::Column::ClassId.eq(class_id))
        .order_by_asc(student_points::Column::StudentId)
        .all(db)
        .await
        .map_err(Into::into)
}

/// All aggregates of a class keyed by student id.
pub async fn get_class_aggregate_map<C>(
    db: &C,
    class_id: &str,
) -> Result<BTreeMap<String, student_points::Model>>
where
    C: ConnectionTrait,
{
    Ok(get_class_aggregates(db, class_id)
        .await?
        .into_iter()
        .map(|a| (a.student_id.clone(), a))
        .collect())
}

/// Inserts a zero aggregate unless one already exists.
async fn ensure_aggregate<C>(
    db: &C,
    class_id: &str,
    student_id: &str,
    student_name: &str,
    now: DateTimeUtc,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let zero: student_points::ActiveModel =
        student_points::Model::zeroed(class_id, student_id, student_name, now).into();
    let inserted = StudentPoints::insert(zero)
        .on_conflict(
            OnConflict::columns([
                student_points::Column::ClassId,
                student_points::Column::StudentId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    if inserted > 0 {
        debug!("Created aggregate for student {student_id} in class {class_id}");
    }
    Ok(())
}

/// Shifts the entry's aggregate by `delta`; the sign of the entry's own points picks the split column.
async fn shift<C>(
    db: &C,
    entry: &history_entry::Model,
    delta: i64,
    student_name: Option<&str>,
    now: DateTimeUtc,
) -> Result<student_points::Model>
where
    C: ConnectionTrait,
{
    let split_column = if entry.points > 0 {
        student_points::Column::PositivePoints
    } else {
        student_points::Column::NegativePoints
    };

    let mut update = StudentPoints::update_many()
        .col_expr(
            student_points::Column::TotalPoints,
            Expr::col(student_points::Column::TotalPoints).add(delta),
        )
        .col_expr(split_column, Expr::col(split_column).add(delta))
        .col_expr(student_points::Column::LastUpdated, Expr::value(now));
    if let Some(name) = student_name {
        update = update.col_expr(student_points::Column::StudentName, Expr::value(name));
    }
    update
        .filter(student_points::Column::ClassId.eq(entry.class_id.as_str()))
        .filter(student_points::Column::StudentId.eq(entry.student_id.as_str()))
        .exec(db)
        .await?;

    get_aggregate(db, &entry.class_id, &entry.student_id)
        .await?
        .ok_or_else(|| Error::Drift {
            class_id: entry.class_id.clone(),
            student_id: entry.student_id.clone(),
            stored_total: 0,
            replayed_total: entry.points,
        })
}

/// Adds a freshly appended entry to its aggregate, creating the row if needed.
pub(crate) async fn apply_entry<C>(
    db: &C,
    entry: &history_entry::Model,
) -> Result<student_points::Model>
where
    C: ConnectionTrait,
{
    ensure_aggregate(
        db,
        &entry.class_id,
        &entry.student_id,
        &entry.student_name,
        entry.awarded_at,
    )
    .await?;
    shift(
        db,
        entry,
        entry.points,
        Some(&entry.student_name),
        entry.awarded_at,
    )
    .await
}

/// Removes an entry's contribution from its aggregate.
pub(crate) async fn revert_entry<C>(
    db: &C,
    entry: &history_entry::Model,
    now: DateTimeUtc,
) -> Result<student_points::Model>
where
    C: ConnectionTrait,
{
    shift(db, entry, -entry.points, None, now).await
}

/// Recomputes a student's totals from the history log.
pub async fn rebuild_aggregate<C>(db: &C, class_id: &str, student_id: &str) -> Result<PointTotals>
where
    C: ConnectionTrait,
{
    let entries = history::audit_trail(db, class_id, student_id).await?;
    Ok(replay(&entries))
}

/// Compares the stored aggregate with a replay of history.
///
/// Drift is logged at error level for operators and returned in the report; nothing is
/// corrected here.
pub async fn verify_aggregate<C>(db: &C, class_id: &str, student_id: &str) -> Result<DriftReport>
where
    C: ConnectionTrait,
{
    let stored = get_aggregate(db, class_id, student_id)
        .await?
        .map(|a| PointTotals::of(&a));
    let replayed = rebuild_aggregate(db, class_id, student_id).await?;

    let report = DriftReport {
        class_id: class_id.to_string(),
        student_id: student_id.to_string(),
        stored,
        replayed,
    };
    if !report.is_consistent() {
        error!(
            "Aggregate drift detected for student {student_id} in class {class_id}: stored {:?}, replayed {:?}",
            report.stored, report.replayed
        );
    }
    Ok(report)
}

/// Every (class, student) pair known to either the aggregate table or the history log.
async fn known_students<C>(db: &C, class_id: Option<&str>) -> Result<BTreeSet<(String, String)>>
where
    C: ConnectionTrait,
{
    let mut aggregate_query = StudentPoints::find()
        .select_only()
        .column(student_points::Column::ClassId)
        .column(student_points::Column::StudentId);
    let mut history_query = HistoryEntry::find()
        .select_only()
        .column(history_entry::Column::ClassId)
        .column(history_entry::Column::StudentId)
        .distinct();
    if let Some(class_id) = class_id {
        aggregate_query = aggregate_query.filter(student_points::Column::ClassId.eq(class_id));
        history_query = history_query.filter(history_entry::Column::ClassId.eq(class_id));
    }

    let mut pairs: BTreeSet<(String, String)> = aggregate_query
        .into_tuple::<(String, String)>()
        .all(db)
        .await?
        .into_iter()
        .collect();
    pairs.extend(history_query.into_tuple::<(String, String)>().all(db).await?);
    Ok(pairs)
}

/// Verifies every student of a class; returns only the drifted reports.
pub async fn verify_class<C>(db: &C, class_id: &str) -> Result<Vec<DriftReport>>
where
    C: ConnectionTrait,
{
    verify_pairs(db, known_students(db, Some(class_id)).await?).await
}

/// Verifies every aggregate in the store; returns only the drifted reports.
pub async fn verify_all<C>(db: &C) -> Result<Vec<DriftReport>>
where
    C: ConnectionTrait,
{
    verify_pairs(db, known_students(db, None).await?).await
}

async fn verify_pairs<C>(db: &C, pairs: BTreeSet<(String, String)>) -> Result<Vec<DriftReport>>
where
    C: ConnectionTrait,
{
    let checked = pairs.len();
    let mut drifted = Vec::new();
    for (class_id, student_id) in pairs {
        let report = verify_aggregate(db, &class_id, &student_id).await?;
        if !report.is_consistent() {
            drifted.push(report);
        }
    }
    info!(
        "Verified {checked} aggregates, {} drifted",
        drifted.len()
    );
    Ok(drifted)
}

/// Overwrites a student's aggregate with the replay of its history.
///
/// Operator action for repairing detected drift. The previous and new totals are logged
/// so the correction itself leaves a trace.
pub async fn repair_aggregate<C>(
    db: &C,
    class_id: &str,
    student_id: &str,
) -> Result<student_points::Model>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;

    let entries = history::audit_trail(&txn, class_id, student_id).await?;
    let replayed = replay(&entries);
    let now = chrono::Utc::now();
    let existing = get_aggregate(&txn, class_id, student_id).await?;

    let repaired = if let Some(existing) = existing {
        let previous = PointTotals::of(&existing);
        let mut active_model: student_points::ActiveModel = existing.into();
        active_model.total_points = Set(replayed.total);
        active_model.positive_points = Set(replayed.positive);
        active_model.negative_points = Set(replayed.negative);
        active_model.last_updated = Set(now);
        let repaired = active_model.update(&txn).await?;
        if previous != replayed {
            warn!(
                "Repaired aggregate for student {student_id} in class {class_id}: {:?} -> {:?}",
                previous, replayed
            );
        }
        repaired
    } else {
        let student_name = entries
            .last()
            .map(|e| e.student_name.clone())
            .unwrap_or_default();
        let mut model = student_points::Model::zeroed(class_id, student_id, &student_name, now);
        model.total_points = replayed.total;
        model.positive_points = replayed.positive;
        model.negative_points = replayed.negative;
        let active_model: student_points::ActiveModel = model.into();
        let repaired = active_model.insert(&txn).await?;
        warn!(
            "Recreated missing aggregate for student {student_id} in class {class_id}: {:?}",
            replayed
        );
        repaired
    };

    txn.commit().await?;
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;

    fn entry(points: i64, is_undone: bool) -> history_entry::Model {
        history_entry::Model {
            id: 0,
            class_id: TEST_CLASS.to_string(),
            student_id: "s1".to_string(),
            student_name: "Ada".to_string(),
            behavior_id: None,
            behavior_name: "Test".to_string(),
            points,
            awarded_by: TEST_TEACHER.to_string(),
            awarded_at: chrono::Utc::now(),
            operation_id: format!("op-{points}-{is_undone}"),
            note: None,
            is_undone,
            undone_at: None,
        }
    }

    #[test]
    fn test_replay_skips_undone_and_splits_by_sign() {
        let entries = vec![entry(5, false), entry(-3, false), entry(10, true), entry(2, false)];
        let totals = replay(&entries);
        assert_eq!(
            totals,
            PointTotals {
                total: 4,
                positive: 7,
                negative: -3,
            }
        );
        assert!(totals.is_balanced());
    }

    #[test]
    fn test_replay_empty() {
        assert_eq!(replay(&[]), PointTotals::default());
    }

    #[test]
    fn test_missing_aggregate_matches_empty_replay() {
        let report = DriftReport {
            class_id: TEST_CLASS.to_string(),
            student_id: "s1".to_string(),
            stored: None,
            replayed: PointTotals::default(),
        };
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn test_apply_and_revert_entry() -> Result<()> {
        let db = setup_test_db().await?;

        let plus = insert_test_entry(&db, "s1", 5, "op-1").await?;
        let minus = insert_test_entry(&db, "s1", -3, "op-2").await?;

        apply_entry(&db, &plus).await?;
        let aggregate = apply_entry(&db, &minus).await?;
        assert_eq!(aggregate.total_points, 2);
        assert_eq!(aggregate.positive_points, 5);
        assert_eq!(aggregate.negative_points, -3);
        assert_eq!(aggregate.student_name, "Student s1");

        let aggregate = revert_entry(&db, &plus, chrono::Utc::now()).await?;
        assert_eq!(aggregate.total_points, -3);
        assert_eq!(aggregate.positive_points, 0);
        assert_eq!(aggregate.negative_points, -3);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_class_aggregate_map() -> Result<()> {
        let db = setup_test_db().await?;
        let a = insert_test_entry(&db, "s2", 1, "op-1").await?;
        let b = insert_test_entry(&db, "s1", 2, "op-2").await?;
        apply_entry(&db, &a).await?;
        apply_entry(&db, &b).await?;

        let map = get_class_aggregate_map(&db, TEST_CLASS).await?;
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["s1", "s2"]);
        assert_eq!(map["s1"].total_points, 2);

        assert!(get_aggregate(&db, TEST_CLASS, "nobody").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_verify_detects_drift_without_correcting() -> Result<()> {
        let db = setup_test_db().await?;
        let plus = insert_test_entry(&db, "s1", 5, "op-1").await?;
        apply_entry(&db, &plus).await?;

        assert!(verify_aggregate(&db, TEST_CLASS, "s1").await?.is_consistent());

        // Manual data correction behind the ledger's back
        let corrupt = insert_test_entry(&db, "s1", 4, "op-2").await?;
        let report = verify_aggregate(&db, TEST_CLASS, "s1").await?;
        assert!(!report.is_consistent());
        assert_eq!(report.stored.map(|t| t.total), Some(5));
        assert_eq!(report.replayed.total, 9);
        assert!(matches!(
            report.to_error(),
            Error::Drift {
                stored_total: 5,
                replayed_total: 9,
                ..
            }
        ));

        // Verification never rewrites the aggregate
        let stored = get_aggregate(&db, TEST_CLASS, "s1").await?.unwrap();
        assert_eq!(stored.total_points, 5);

        let drifted = verify_class(&db, TEST_CLASS).await?;
        assert_eq!(drifted.len(), 1);
        assert_eq!(verify_all(&db).await?.len(), 1);

        let repaired = repair_aggregate(&db, TEST_CLASS, "s1").await?;
        assert_eq!(repaired.total_points, 9);
        assert!(verify_all(&db).await?.is_empty());
        assert_eq!(corrupt.points, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_repair_recreates_missing_aggregate() -> Result<()> {
        let db = setup_test_db().await?;
        insert_test_entry(&db, "s1", 3, "op-1").await?;
        insert_test_entry(&db, "s1", -1, "op-2").await?;

        let drifted = verify_all(&db).await?;
        assert_eq!(drifted.len(), 1);
        assert!(drifted[0].stored.is_none());

        let repaired = repair_aggregate(&db, TEST_CLASS, "s1").await?;
        assert_eq!(repaired.total_points, 2);
        assert_eq!(repaired.positive_points, 3);
        assert_eq!(repaired.negative_points, -1);
        assert_eq!(repaired.student_name, "Student s1");
        Ok(())
    }
}
