//! Read side - live subscriptions and point-in-time snapshots.
//!
//! A subscription delivers the current snapshot immediately and a fresh one after every
//! committed ledger change that touches its scope. Each subscription is fed by its own
//! task listening on the ledger's broadcast bus, so a slow or abandoned subscriber never
//! holds up a writer: it only falls behind on the bus and is resynchronised with a new
//! snapshot. Dropping the [`Subscription`] stops the task.
//!
//! Rows that do not look like valid ledger records (legacy or hand-edited data) are
//! left out of snapshots and logged, rather than ending the stream.

use crate::{
    config::LedgerSettings,
    core::{
        aggregate::{self, PointTotals},
        history,
        ledger::{LedgerEvent, PointsLedger},
        statistics::{self, ClassStatistics},
    },
    entities::{history_entry, student_points},
    errors::Result,
};
use sea_orm::ConnectionTrait;
use std::{collections::BTreeMap, future::Future, sync::Arc};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Snapshot of a class: `student_id -> aggregate`.
pub type ClassSnapshot = BTreeMap<String, student_points::Model>;

/// A live stream of snapshots.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
    feeder: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// Waits for the next snapshot. `None` once the ledger is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns a snapshot if one is already waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.feeder.abort();
    }
}

/// Why a stored aggregate row is not usable, if it is not.
fn aggregate_defect(
    model: &student_points::Model,
    settings: &LedgerSettings,
) -> Option<&'static str> {
    if model.class_id.trim().is_empty() || model.student_id.trim().is_empty() {
        Some("empty identifier")
    } else if settings.is_placeholder_name(&model.student_name) {
        Some("placeholder student name")
    } else if !PointTotals::of(model).is_balanced() {
        Some("positive/negative split does not add up to the total")
    } else {
        None
    }
}

/// Why a stored history row is not usable, if it is not.
fn entry_defect(model: &history_entry::Model, settings: &LedgerSettings) -> Option<&'static str> {
    if model.class_id.trim().is_empty()
        || model.student_id.trim().is_empty()
        || model.operation_id.trim().is_empty()
    {
        Some("empty identifier")
    } else if settings.is_placeholder_name(&model.student_name) {
        Some("placeholder student name")
    } else if model.points == 0 {
        Some("zero point delta")
    } else if model.behavior_name.trim().is_empty() {
        Some("empty behavior name")
    } else {
        None
    }
}

/// Current aggregates of a class, with malformed rows dropped.
pub async fn class_snapshot<C>(
    db: &C,
    settings: &LedgerSettings,
    class_id: &str,
) -> Result<ClassSnapshot>
where
    C: ConnectionTrait,
{
    let mut snapshot = ClassSnapshot::new();
    for model in aggregate::get_class_aggregates(db, class_id).await? {
        if let Some(defect) = aggregate_defect(&model, settings) {
            warn!(
                "Skipping malformed aggregate for student '{}' in class '{}': {defect}",
                model.student_id, model.class_id
            );
            continue;
        }
        snapshot.insert(model.student_id.clone(), model);
    }
    Ok(snapshot)
}

/// Recent non-undone entries (class-wide or for one student), with malformed rows dropped.
pub async fn history_snapshot<C>(
    db: &C,
    settings: &LedgerSettings,
    class_id: &str,
    student_id: Option<&str>,
    limit: u64,
) -> Result<Vec<history_entry::Model>>
where
    C: ConnectionTrait,
{
    let entries = history::recent_entries(db, class_id, student_id, limit).await?;
    Ok(entries
        .into_iter()
        .filter(|entry| match entry_defect(entry, settings) {
            Some(defect) => {
                warn!("Skipping malformed history entry {}: {defect}", entry.id);
                false
            }
            None => true,
        })
        .collect())
}

/// Sends a snapshot; false once the subscriber has gone away.
async fn deliver<T>(sender: &mpsc::Sender<T>, snapshot: Result<T>) -> bool {
    match snapshot {
        Ok(snapshot) => sender.send(snapshot).await.is_ok(),
        Err(err) => {
            // Keep the stream alive; the next change triggers another load
            warn!("Failed to load subscription snapshot: {err}");
            !sender.is_closed()
        }
    }
}

impl PointsLedger {
    /// Streams the full `student_id -> aggregate` map of a class after every change in it.
    #[must_use]
    pub fn subscribe_class_aggregates(&self, class_id: &str) -> Subscription<ClassSnapshot> {
        let db = self.shared_database();
        let settings = self.shared_settings();
        let class_id = class_id.to_string();
        let scope_class = class_id.clone();

        self.spawn_feed(
            move |event| event.class_id() == scope_class,
            move || {
                let db = Arc::clone(&db);
                let settings = Arc::clone(&settings);
                let class_id = class_id.clone();
                async move { class_snapshot(&*db, &settings, &class_id).await }
            },
        )
    }

    /// Streams recent history of a class, or of one student when `student_id` is given.
    ///
    /// `limit = None` uses the configured default.
    #[must_use]
    pub fn subscribe_history(
        &self,
        class_id: &str,
        student_id: Option<&str>,
        limit: Option<u64>,
    ) -> Subscription<Vec<history_entry::Model>> {
        let db = self.shared_database();
        let settings = self.shared_settings();
        let limit = limit.unwrap_or(self.settings().default_history_limit);
        let class_id = class_id.to_string();
        let student_id = student_id.map(str::to_string);
        let (scope_class, scope_student) = (class_id.clone(), student_id.clone());

        self.spawn_feed(
            move |event| {
                event.class_id() == scope_class
                    && scope_student
                        .as_deref()
                        .is_none_or(|student| event.student_id() == student)
            },
            move || {
                let db = Arc::clone(&db);
                let settings = Arc::clone(&settings);
                let class_id = class_id.clone();
                let student_id = student_id.clone();
                async move {
                    history_snapshot(&*db, &settings, &class_id, student_id.as_deref(), limit).await
                }
            },
        )
    }

    /// One-shot recent history query, same filtering as the subscription.
    pub async fn get_history(
        &self,
        class_id: &str,
        student_id: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<history_entry::Model>> {
        let limit = limit.unwrap_or(self.settings().default_history_limit);
        history_snapshot(self.database(), self.settings(), class_id, student_id, limit).await
    }

    /// Current aggregates of a class.
    pub async fn get_class_aggregates(&self, class_id: &str) -> Result<ClassSnapshot> {
        class_snapshot(self.database(), self.settings(), class_id).await
    }

    /// Statistics over the latest aggregate snapshot of a class.
    pub async fn get_class_statistics(&self, class_id: &str) -> Result<ClassStatistics> {
        let snapshot = class_snapshot(self.database(), self.settings(), class_id).await?;
        Ok(statistics::compute_class_statistics(
            &snapshot,
            self.settings().top_performers,
        ))
    }

    fn spawn_feed<T, P, L, Fut>(&self, in_scope: P, load: L) -> Subscription<T>
    where
        T: Send + 'static,
        P: Fn(&LedgerEvent) -> bool + Send + 'static,
        L: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(self.settings().subscription_buffer.max(1));
        // Subscribe before the first load so no change can slip in between
        let mut events = self.subscribe_events();

        let feeder = tokio::spawn(async move {
            if !deliver(&sender, load().await).await {
                return;
            }
            loop {
                match events.recv().await {
                    Ok(event) if in_scope(&event) => {}
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Subscriber lagged by {skipped} events, resynchronising");
                    }
                    Err(RecvError::Closed) => break,
                }
                if !deliver(&sender, load().await).await {
                    break;
                }
            }
        });

        Subscription { receiver, feeder }
    }
}
