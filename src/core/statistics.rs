//! Class statistics derived from an aggregate snapshot.
//!
//! Pure functions: no storage access and no state. Callers pass whatever snapshot they
//! hold (typically the latest one from a class subscription).

use crate::entities::student_points;
use std::collections::BTreeMap;

/// One student in a ranked list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedStudent {
    /// Student id
    pub student_id: String,
    /// Student name as last recorded
    pub student_name: String,
    /// Current total
    pub total_points: i64,
}

/// Class-wide summary of the points ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassStatistics {
    /// Number of students with an aggregate
    pub student_count: usize,
    /// Mean total points, 0.0 for an empty class
    pub average_points: f64,
    /// Sum of positive points across the class
    pub total_positive: i64,
    /// Sum of negative points across the class (zero or below)
    pub total_negative: i64,
    /// Students with a positive total, best first (ties by student id)
    pub top_performers: Vec<RankedStudent>,
    /// Students with a negative total, lowest first (ties by student id)
    pub needs_attention: Vec<RankedStudent>,
}

/// Computes class statistics from a `student_id -> aggregate` snapshot.
///
/// `top_k` caps the top performers list; the needs-attention list is never truncated.
#[must_use]
pub fn compute_class_statistics(
    snapshot: &BTreeMap<String, student_points::Model>,
    top_k: usize,
) -> ClassStatistics {
    let student_count = snapshot.len();
    let total_points: i64 = snapshot.values().map(|a| a.total_points).sum();
    let total_positive = snapshot.values().map(|a| a.positive_points).sum();
    let total_negative = snapshot.values().map(|a| a.negative_points).sum();

    // Precision loss only matters beyond 2^53 points
    #[allow(clippy::cast_precision_loss)]
    let average_points = if student_count == 0 {
        0.0
    } else {
        total_points as f64 / student_count as f64
    };

    let ranked = |(student_id, aggregate): (&String, &student_points::Model)| RankedStudent {
        student_id: student_id.clone(),
        student_name: aggregate.student_name.clone(),
        total_points: aggregate.total_points,
    };

    let mut top_performers: Vec<RankedStudent> = snapshot
        .iter()
        .filter(|(_, a)| a.total_points > 0)
        .map(ranked)
        .collect();
    top_performers.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    top_performers.truncate(top_k);

    let mut needs_attention: Vec<RankedStudent> = snapshot
        .iter()
        .filter(|(_, a)| a.total_points < 0)
        .map(ranked)
        .collect();
    needs_attention.sort_by(|a, b| {
        a.total_points
            .cmp(&b.total_points)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });

    ClassStatistics {
        student_count,
        average_points,
        total_positive,
        total_negative,
        top_performers,
        needs_attention,
    }
}

/// Formats a signed point delta for display, e.g. `+5` or `-3`.
#[must_use]
pub fn format_points(points: i64) -> String {
    format!("{points:+}")
}
