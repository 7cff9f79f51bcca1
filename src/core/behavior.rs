//! Behavior catalog - per-class definitions of awardable behaviors.
//!
//! The catalog is read-heavy and rarely written. Every write validates that the name is
//! present, the point value is non-zero and its sign agrees with the category. Deletion
//! is a hard delete: history entries carry their own snapshot of name and points.

use crate::{
    config::BehaviorConfig,
    entities::{Behavior, BehaviorCategory, behavior},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, TransactionTrait, prelude::*};
use std::collections::HashSet;
use tracing::{debug, info};

/// Arguments for creating a catalog behavior.
#[derive(Debug, Clone)]
pub struct NewBehavior {
    /// Class the behavior belongs to
    pub class_id: String,
    /// Display name
    pub name: String,
    /// Description shown to teachers
    pub description: String,
    /// Signed point value
    pub point_value: i64,
    /// Category, must agree with the sign of `point_value`
    pub category: BehaviorCategory,
    /// True for teacher-defined behaviors
    pub is_custom: bool,
    /// Teacher who owns the definition
    pub owner_id: String,
}

/// Partial update of a behavior; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct BehaviorChanges {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New point value
    pub point_value: Option<i64>,
    /// New category
    pub category: Option<BehaviorCategory>,
}

/// Checks the catalog invariants shared by catalog and inline behaviors.
pub fn validate_behavior(name: &str, point_value: i64, category: BehaviorCategory) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::EmptyBehaviorName);
    }
    category.check_points(point_value)
}

/// Creates a new catalog behavior after validating it.
pub async fn create_behavior<C>(db: &C, new: NewBehavior) -> Result<behavior::Model>
where
    C: ConnectionTrait,
{
    if new.class_id.trim().is_empty() {
        return Err(Error::EmptyIdentifier { field: "class_id" });
    }
    validate_behavior(&new.name, new.point_value, new.category)?;

    let now = chrono::Utc::now();
    let model = behavior::ActiveModel {
        class_id: Set(new.class_id),
        name: Set(new.name.trim().to_string()),
        description: Set(new.description),
        point_value: Set(new.point_value),
        category: Set(new.category),
        is_custom: Set(new.is_custom),
        owner_id: Set(new.owner_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let result = model.insert(db).await?;
    debug!(
        "Created behavior {} '{}' ({:+}) in class {}",
        result.id, result.name, result.point_value, result.class_id
    );
    Ok(result)
}

/// Finds a behavior by id.
pub async fn get_behavior<C>(db: &C, behavior_id: i64) -> Result<Option<behavior::Model>>
where
    C: ConnectionTrait,
{
    Behavior::find_by_id(behavior_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists a class catalog, positive behaviors first, then by name.
pub async fn list_behaviors<C>(db: &C, class_id: &str) -> Result<Vec<behavior::Model>>
where
    C: ConnectionTrait,
{
    Behavior::find()
        .filter(behavior::Column::ClassId.eq(class_id))
        .order_by_desc(behavior::Column::Category)
        .order_by_asc(behavior::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Lists the behaviors of one category in a class, ordered by name.
pub async fn list_behaviors_by_category<C>(
    db: &C,
    class_id: &str,
    category: BehaviorCategory,
) -> Result<Vec<behavior::Model>>
where
    C: ConnectionTrait,
{
    Behavior::find()
        .filter(behavior::Column::ClassId.eq(class_id))
        .filter(behavior::Column::Category.eq(category))
        .order_by_asc(behavior::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Applies `changes` to a behavior, validating the merged result.
///
/// Past history entries are unaffected: they keep the name and points of the award.
pub async fn update_behavior<C>(
    db: &C,
    behavior_id: i64,
    changes: BehaviorChanges,
) -> Result<behavior::Model>
where
    C: ConnectionTrait,
{
    let existing = get_behavior(db, behavior_id)
        .await?
        .ok_or(Error::BehaviorNotFound { id: behavior_id })?;

    let name = changes.name.unwrap_or_else(|| existing.name.clone());
    let point_value = changes.point_value.unwrap_or(existing.point_value);
    let category = changes.category.unwrap_or(existing.category);
    validate_behavior(&name, point_value, category)?;

    let mut active_model: behavior::ActiveModel = existing.into();
    active_model.name = Set(name.trim().to_string());
    if let Some(description) = changes.description {
        active_model.description = Set(description);
    }
    active_model.point_value = Set(point_value);
    active_model.category = Set(category);
    active_model.updated_at = Set(chrono::Utc::now());

    active_model.update(db).await.map_err(Into::into)
}

/// Hard-deletes a behavior. Returns false when it did not exist.
pub async fn delete_behavior<C>(db: &C, behavior_id: i64) -> Result<bool>
where
    C: ConnectionTrait,
{
    let result = Behavior::delete_by_id(behavior_id).exec(db).await?;
    if result.rows_affected > 0 {
        info!("Deleted behavior {behavior_id}");
    }
    Ok(result.rows_affected > 0)
}

/// Seeds the built-in catalog into a class.
///
/// Behaviors whose name already exists in the class are skipped, so seeding twice is
/// harmless. All inserts happen in one transaction. Returns the newly created rows.
pub async fn seed_default_behaviors<C>(
    db: &C,
    class_id: &str,
    owner_id: &str,
    defaults: &[BehaviorConfig],
) -> Result<Vec<behavior::Model>>
where
    C: ConnectionTrait + TransactionTrait,
{
    // Validate everything before writing anything
    for cfg in defaults {
        validate_behavior(&cfg.name, cfg.points, cfg.category)?;
    }

    let txn = db.begin().await?;

    let mut existing: HashSet<String> = Behavior::find()
        .filter(behavior::Column::ClassId.eq(class_id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|b| b.name.to_lowercase())
        .collect();

    let mut created = Vec::new();
    for cfg in defaults {
        if !existing.insert(cfg.name.trim().to_lowercase()) {
            debug!("Behavior '{}' already present in class {class_id}, skipping", cfg.name);
            continue;
        }
        let model = create_behavior(
            &txn,
            NewBehavior {
                class_id: class_id.to_string(),
                name: cfg.name.clone(),
                description: cfg.description.clone(),
                point_value: cfg.points,
                category: cfg.category,
                is_custom: false,
                owner_id: owner_id.to_string(),
            },
        )
        .await?;
        created.push(model);
    }

    txn.commit().await?;
    info!(
        "Seeded {} default behaviors into class {class_id}",
        created.len()
    );
    Ok(created)
}
