//! Catalog aggregation: merge per-source course lists into one keyed index.
//!
//! Lists are processed in configured descriptor order. When two courses would
//! share a key, the later source's course is kept under a provenance-suffixed
//! key and the collision is recorded as a diagnostic; nothing is silently
//! dropped.

use std::collections::BTreeMap;

use tracing::warn;

use crate::models::{BuildDiagnostic, CourseStructure, DiagnosticScope};

/// Merge course lists in source order into an order-stable keyed map.
pub fn merge(
    course_lists: Vec<Vec<CourseStructure>>,
) -> (BTreeMap<String, CourseStructure>, Vec<BuildDiagnostic>) {
    let mut courses: BTreeMap<String, CourseStructure> = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for list in course_lists {
        for mut course in list {
            if !courses.contains_key(&course.course_key) {
                courses.insert(course.course_key.clone(), course);
                continue;
            }

            let original_key = course.course_key.clone();
            let suffixed = resolve_collision(&courses, &course);
            let kept_by = courses[&original_key].provenance.source_name.clone();

            warn!(
                key = %original_key,
                winner = %kept_by,
                renamed_to = %suffixed,
                "course key collision"
            );
            diagnostics.push(BuildDiagnostic {
                scope: DiagnosticScope::Catalog,
                source: course.provenance.source_name.clone(),
                subject: original_key.clone(),
                message: format!(
                    "course key '{}' already provided by source '{}'; kept as '{}'",
                    original_key, kept_by, suffixed
                ),
            });

            course.course_key = suffixed.clone();
            courses.insert(suffixed, course);
        }
    }

    (courses, diagnostics)
}

/// Suffix a colliding key with its provenance tag. Source names are unique by
/// config validation, so one extra numeric round only guards against a source
/// providing the same key twice.
fn resolve_collision(
    courses: &BTreeMap<String, CourseStructure>,
    course: &CourseStructure,
) -> String {
    let tagged = format!("{}@{}", course.course_key, course.provenance.source_name);
    if !courses.contains_key(&tagged) {
        return tagged;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}#{}", tagged, n);
        if !courses.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provenance, SourceKind};

    fn course(key: &str, source_name: &str, kind: SourceKind) -> CourseStructure {
        let (level, title) = key.split_once('/').unwrap();
        CourseStructure {
            course_key: key.to_string(),
            level: level.to_string(),
            title: title.to_string(),
            description: String::new(),
            estimated_duration: None,
            modules: Vec::new(),
            provenance: Provenance {
                source_name: source_name.to_string(),
                kind,
            },
        }
    }

    #[test]
    fn test_merge_disjoint_sources() {
        let (courses, diagnostics) = merge(vec![
            vec![course("beginner/Intro", "core", SourceKind::Local)],
            vec![course("advanced/Systems", "community", SourceKind::Remote)],
        ]);
        assert_eq!(courses.len(), 2);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_collision_keeps_both_with_provenance() {
        let (courses, diagnostics) = merge(vec![
            vec![course("beginner/Intro", "core", SourceKind::Local)],
            vec![course("beginner/Intro", "community", SourceKind::Remote)],
        ]);

        assert_eq!(courses.len(), 2);
        assert_eq!(
            courses["beginner/Intro"].provenance.source_name,
            "core"
        );
        let renamed = &courses["beginner/Intro@community"];
        assert_eq!(renamed.provenance.source_name, "community");
        assert_eq!(renamed.course_key, "beginner/Intro@community");

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("beginner/Intro"));
        assert!(diagnostics[0].message.contains("community"));
    }

    #[test]
    fn test_earlier_source_wins_unsuffixed_key() {
        let (first, _) = merge(vec![
            vec![course("beginner/Intro", "a", SourceKind::Local)],
            vec![course("beginner/Intro", "b", SourceKind::Local)],
        ]);
        let (second, _) = merge(vec![
            vec![course("beginner/Intro", "b", SourceKind::Local)],
            vec![course("beginner/Intro", "a", SourceKind::Local)],
        ]);
        assert_eq!(first["beginner/Intro"].provenance.source_name, "a");
        assert_eq!(second["beginner/Intro"].provenance.source_name, "b");
    }

    #[test]
    fn test_reorder_without_collisions_same_course_set() {
        let a = vec![course("beginner/Intro", "a", SourceKind::Local)];
        let b = vec![course("advanced/Systems", "b", SourceKind::Local)];

        let (first, _) = merge(vec![a.clone(), b.clone()]);
        let (second, _) = merge(vec![b, a]);
        let first_keys: Vec<_> = first.keys().collect();
        let second_keys: Vec<_> = second.keys().collect();
        assert_eq!(first_keys, second_keys);
    }
}
