//! Ledger writer - awards and undoes behavior points.
//!
//! Each award or undo runs as one database transaction scoped to a single student: the
//! history entry and the aggregate row are written together or not at all. Awards are
//! idempotent on the caller's `operation_id`, and undo only ever flags an entry, so the
//! audit trail shows both the award and its reversal.
//!
//! Write contention (a locked database, or a concurrent writer winning the race to
//! create the same aggregate row or `operation_id`) is retried here with a bounded
//! budget. Callers see either a final outcome or [`Error::Transient`], and may retry
//! with the same `operation_id` without risking a double award.

use crate::{
    config::LedgerSettings,
    core::{aggregate, behavior, history},
    entities::{BehaviorCategory, history_entry, student_points},
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::{future::Future, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Capacity of the in-process change bus.
pub(crate) const EVENT_BUS_CAPACITY: usize = 256;

/// Which behavior an award applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BehaviorRef {
    /// A behavior from the class catalog
    Catalog(i64),
    /// An ad-hoc behavior described inline
    Inline {
        /// Behavior name recorded on the entry
        name: String,
        /// Signed point value
        points: i64,
        /// Must agree with the sign of `points`
        category: BehaviorCategory,
    },
}

/// An award request.
#[derive(Debug, Clone)]
pub struct AwardRequest {
    /// Class the award is made in
    pub class_id: String,
    /// Receiving student
    pub student_id: String,
    /// Student name, snapshotted onto the entry
    pub student_name: String,
    /// Behavior being awarded
    pub behavior: BehaviorRef,
    /// Caller-generated idempotency key, reused on retries
    pub operation_id: String,
    /// Authenticated teacher making the award
    pub awarded_by: String,
    /// Optional free-form note
    pub note: Option<String>,
}

/// Result of an award.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    /// The award was recorded now
    Applied {
        /// The new history entry
        entry: history_entry::Model,
        /// The aggregate after the award
        aggregate: student_points::Model,
    },
    /// The `operation_id` was already recorded; nothing was applied again
    Duplicate {
        /// The entry recorded by the original request
        entry: history_entry::Model,
    },
}

impl AwardOutcome {
    /// The entry backing this award, new or previously recorded.
    #[must_use]
    pub const fn entry(&self) -> &history_entry::Model {
        match self {
            Self::Applied { entry, .. } | Self::Duplicate { entry } => entry,
        }
    }

    /// Id of the backing entry.
    #[must_use]
    pub const fn entry_id(&self) -> i64 {
        self.entry().id
    }

    /// True when this call was an idempotent replay.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Which entry an undo targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoTarget {
    /// A specific history entry
    Entry(i64),
    /// The student's most recent entry that is not undone yet
    Latest,
}

/// An undo request.
#[derive(Debug, Clone)]
pub struct UndoRequest {
    /// Class of the entry
    pub class_id: String,
    /// Student of the entry
    pub student_id: String,
    /// Entry to reverse
    pub target: UndoTarget,
}

/// Why an undo changed nothing. All of these leave the ledger in the state the caller wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoNoOp {
    /// No such entry for this class and student
    NotFound,
    /// The entry was already reversed
    AlreadyUndone,
    /// `Latest` was requested but the student has nothing left to undo
    NothingToUndo,
}

/// Result of an undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// The entry was reversed now
    Undone {
        /// The entry, now flagged undone
        entry: history_entry::Model,
        /// The aggregate after the reversal
        aggregate: student_points::Model,
    },
    /// Nothing to do
    NoOp(UndoNoOp),
}

impl UndoOutcome {
    /// True when this call reversed an entry.
    #[must_use]
    pub const fn is_undone(&self) -> bool {
        matches!(self, Self::Undone { .. })
    }
}

/// Change notification published after a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// Points were awarded
    Awarded {
        /// Class of the award
        class_id: String,
        /// Receiving student
        student_id: String,
        /// New history entry
        entry_id: i64,
    },
    /// An award was reversed
    Undone {
        /// Class of the entry
        class_id: String,
        /// Student of the entry
        student_id: String,
        /// Reversed history entry
        entry_id: i64,
    },
}

impl LedgerEvent {
    /// Class affected by the change.
    #[must_use]
    pub fn class_id(&self) -> &str {
        match self {
            Self::Awarded { class_id, .. } | Self::Undone { class_id, .. } => class_id,
        }
    }

    /// Student affected by the change.
    #[must_use]
    pub fn student_id(&self) -> &str {
        match self {
            Self::Awarded { student_id, .. } | Self::Undone { student_id, .. } => student_id,
        }
    }
}

/// The ledger writer plus the shared state the read side needs.
///
/// Cheap to clone; clones share the connection pool and the change bus.
#[derive(Clone)]
pub struct PointsLedger {
    database: Arc<DatabaseConnection>,
    settings: Arc<LedgerSettings>,
    events: broadcast::Sender<LedgerEvent>,
}

impl PointsLedger {
    /// Creates a ledger over an existing connection.
    #[must_use]
    pub fn new(database: DatabaseConnection, settings: LedgerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            database: Arc::new(database),
            settings: Arc::new(settings),
            events,
        }
    }

    /// The underlying connection, for read-only queries.
    #[must_use]
    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    pub(crate) fn shared_database(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.database)
    }

    /// Active settings.
    #[must_use]
    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub(crate) fn shared_settings(&self) -> Arc<LedgerSettings> {
        Arc::clone(&self.settings)
    }

    /// Raw change notifications, one per committed award or undo.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Awards points to a student.
    ///
    /// Validation failures are returned before anything is written. A replayed
    /// `operation_id` returns [`AwardOutcome::Duplicate`] with the original entry.
    #[instrument(
        skip(self, request),
        fields(
            class_id = %request.class_id,
            student_id = %request.student_id,
            operation_id = %request.operation_id
        )
    )]
    pub async fn award(&self, request: AwardRequest) -> Result<AwardOutcome> {
        self.validate_award(&request)?;

        let outcome = self
            .with_retries("award", || award_once(&self.database, &request))
            .await?;

        match &outcome {
            AwardOutcome::Applied { entry, aggregate } => {
                info!(
                    "Awarded {:+} ({}) to {} by {}, total now {}",
                    entry.points,
                    entry.behavior_name,
                    entry.student_id,
                    entry.awarded_by,
                    aggregate.total_points
                );
                self.publish(LedgerEvent::Awarded {
                    class_id: entry.class_id.clone(),
                    student_id: entry.student_id.clone(),
                    entry_id: entry.id,
                });
            }
            AwardOutcome::Duplicate { entry } => {
                debug!(
                    "Operation {} already recorded as entry {}, not reapplied",
                    entry.operation_id, entry.id
                );
            }
        }
        Ok(outcome)
    }

    /// Reverses a previously awarded entry.
    ///
    /// Missing or already-reversed entries yield [`UndoOutcome::NoOp`], never an error.
    #[instrument(
        skip(self, request),
        fields(class_id = %request.class_id, student_id = %request.student_id)
    )]
    pub async fn undo(&self, request: UndoRequest) -> Result<UndoOutcome> {
        require_identifier("class_id", &request.class_id)?;
        require_identifier("student_id", &request.student_id)?;

        let outcome = self
            .with_retries("undo", || undo_once(&self.database, &request))
            .await?;

        match &outcome {
            UndoOutcome::Undone { entry, aggregate } => {
                info!(
                    "Undid entry {} ({:+}) for {}, total now {}",
                    entry.id, entry.points, entry.student_id, aggregate.total_points
                );
                self.publish(LedgerEvent::Undone {
                    class_id: entry.class_id.clone(),
                    student_id: entry.student_id.clone(),
                    entry_id: entry.id,
                });
            }
            UndoOutcome::NoOp(reason) => {
                debug!("Undo {:?} was a no-op: {:?}", request.target, reason);
            }
        }
        Ok(outcome)
    }

    fn validate_award(&self, request: &AwardRequest) -> Result<()> {
        require_identifier("class_id", &request.class_id)?;
        require_identifier("student_id", &request.student_id)?;
        require_identifier("operation_id", &request.operation_id)?;
        require_identifier("awarded_by", &request.awarded_by)?;

        if self.settings.is_placeholder_name(&request.student_name) {
            return Err(Error::PlaceholderStudentName {
                name: request.student_name.clone(),
            });
        }

        if let BehaviorRef::Inline {
            name,
            points,
            category,
        } = &request.behavior
        {
            behavior::validate_behavior(name, *points, *category)?;
        }
        Ok(())
    }

    fn publish(&self, event: LedgerEvent) {
        // No receivers is fine; subscribers come and go
        let _ = self.events.send(event);
    }

    /// Runs `operation` until it succeeds, fails permanently, or the retry budget is spent.
    async fn with_retries<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.settings.attempts();
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_conflict() => {
                    if attempt >= attempts {
                        warn!("{name} gave up after {attempt} attempts: {err}");
                        return Err(Error::Transient {
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    warn!("{name} attempt {attempt}/{attempts} hit contention, retrying: {err}");
                    tokio::time::sleep(self.settings.retry_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn require_identifier(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::EmptyIdentifier { field })
    } else {
        Ok(())
    }
}

/// Resolves the behavior snapshot (id, name, points) recorded on the entry.
async fn resolve_behavior<C>(db: &C, request: &AwardRequest) -> Result<(Option<i64>, String, i64)>
where
    C: sea_orm::ConnectionTrait,
{
    match &request.behavior {
        BehaviorRef::Catalog(behavior_id) => {
            let found = behavior::get_behavior(db, *behavior_id)
                .await?
                .filter(|b| b.class_id == request.class_id)
                .ok_or(Error::BehaviorNotFound { id: *behavior_id })?;
            behavior::validate_behavior(&found.name, found.point_value, found.category)?;
            Ok((Some(found.id), found.name, found.point_value))
        }
        BehaviorRef::Inline { name, points, .. } => Ok((None, name.trim().to_string(), *points)),
    }
}

/// One award attempt in its own transaction. Dropping `txn` on an early return rolls back.
async fn award_once(db: &DatabaseConnection, request: &AwardRequest) -> Result<AwardOutcome> {
    let txn = db.begin().await?;

    if let Some(existing) = history::get_entry_by_operation(&txn, &request.operation_id).await? {
        if existing.class_id != request.class_id || existing.student_id != request.student_id {
            return Err(Error::OperationIdReused {
                operation_id: request.operation_id.clone(),
            });
        }
        return Ok(AwardOutcome::Duplicate { entry: existing });
    }

    let (behavior_id, behavior_name, points) = resolve_behavior(&txn, request).await?;
    let now = chrono::Utc::now();

    let entry = history::append(
        &txn,
        history::NewEntry {
            class_id: request.class_id.clone(),
            student_id: request.student_id.clone(),
            student_name: request.student_name.trim().to_string(),
            behavior_id,
            behavior_name,
            points,
            awarded_by: request.awarded_by.clone(),
            operation_id: request.operation_id.clone(),
            note: request.note.clone(),
        },
        now,
    )
    .await?;
    let aggregate = aggregate::apply_entry(&txn, &entry).await?;

    txn.commit().await?;
    Ok(AwardOutcome::Applied { entry, aggregate })
}

/// One undo attempt in its own transaction.
async fn undo_once(db: &DatabaseConnection, request: &UndoRequest) -> Result<UndoOutcome> {
    let txn = db.begin().await?;

    let entry = match request.target {
        UndoTarget::Entry(entry_id) => match history::get_entry(&txn, entry_id).await? {
            Some(entry)
                if entry.class_id == request.class_id && entry.student_id == request.student_id =>
            {
                entry
            }
            _ => return Ok(UndoOutcome::NoOp(UndoNoOp::NotFound)),
        },
        UndoTarget::Latest => {
            match history::latest_active_for_student(&txn, &request.class_id, &request.student_id)
                .await?
            {
                Some(entry) => entry,
                None => return Ok(UndoOutcome::NoOp(UndoNoOp::NothingToUndo)),
            }
        }
    };

    if entry.is_undone {
        return Ok(UndoOutcome::NoOp(UndoNoOp::AlreadyUndone));
    }

    let now = chrono::Utc::now();
    if !history::mark_undone(&txn, entry.id, now).await? {
        return Ok(UndoOutcome::NoOp(UndoNoOp::AlreadyUndone));
    }
    let aggregate = aggregate::revert_entry(&txn, &entry, now).await?;

    txn.commit().await?;
    Ok(UndoOutcome::Undone {
        entry: history_entry::Model {
            is_undone: true,
            undone_at: Some(now),
            ..entry
        },
        aggregate,
    })
}
