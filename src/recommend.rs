//! Read-only analytics over progress and catalog state.
//!
//! Nothing here persists anything; every function is a pure derivation from
//! a [`CourseProgress`] and a [`CatalogSnapshot`].

use crate::models::{CatalogSnapshot, CourseProgress, StepType};

/// Completion ratio outcome. `UnknownCourse` is distinct from zero: a stale
/// progress record referencing a course no longer in the catalog must not
/// masquerade as "0% complete".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    Ratio(f64),
    UnknownCourse,
}

/// Modules whose latest assessment score falls below the threshold, ordered
/// ascending by score (weakest first).
pub fn weak_areas(progress: &CourseProgress, threshold: f64) -> Vec<(String, f64)> {
    let mut weak: Vec<(String, f64)> = progress
        .assessment_scores
        .iter()
        .filter(|(_, score)| **score < threshold)
        .map(|(module_id, score)| (module_id.clone(), *score))
        .collect();
    weak.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    weak
}

/// Fraction of the course's steps this learner has completed, in `[0, 1]`.
///
/// Only steps that exist in the current catalog count; completions recorded
/// against steps that have since vanished drop out of the ratio.
pub fn completion(
    progress: &CourseProgress,
    catalog: &CatalogSnapshot,
    course_key: &str,
) -> Completion {
    let Some(course) = catalog.course(course_key) else {
        return Completion::UnknownCourse;
    };

    let step_ids = course.step_ids();
    if step_ids.is_empty() {
        return Completion::Ratio(0.0);
    }

    let done = step_ids
        .iter()
        .filter(|id| progress.completed_steps.contains(*id))
        .count();
    Completion::Ratio(done as f64 / step_ids.len() as f64)
}

/// First not-yet-completed step of the learner's current course, in catalog
/// order. `None` when unenrolled, the course is gone, or everything is done.
pub fn suggested_next(
    progress: &CourseProgress,
    catalog: &CatalogSnapshot,
) -> Option<(String, StepType)> {
    let course_key = progress.current_course_key.as_deref()?;
    let course = catalog.course(course_key)?;

    for module in &course.modules {
        for step in &module.steps {
            let id = crate::models::step_id(course_key, &module.module_id, step.step_type);
            if !progress.completed_steps.contains(&id) {
                return Some((module.module_id.clone(), step.step_type));
            }
        }
    }
    None
}
