//! Content normalization: snapshot directory → canonical course structures.
//!
//! Directory convention (bit-exact):
//!
//! ```text
//! <level-dir>/                  # name starts with a level identifier
//!   course.toml | course.json   # title, description, ordered module ids
//!   <module-dir>/               # one per module id
//!     intro.*  main.*  conclusion.*  assessment.*  summary.*
//! ```
//!
//! Failure scoping: a missing or unparseable metadata file is fatal for that
//! course; a module missing any of its five step files is excluded from the
//! course and recorded as a diagnostic. Normalizing identical bytes always
//! yields identical structures.

use std::path::Path;

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::models::{
    BuildDiagnostic, CourseStructure, DiagnosticScope, ModuleStructure, Provenance,
    SourceDescriptor, StepContent, StepType,
};

/// Recognized level prefixes for top-level course directories.
pub const LEVELS: [&str; 3] = ["beginner", "intermediate", "advanced"];

const METADATA_TOML: &str = "course.toml";
const METADATA_JSON: &str = "course.json";

/// Words-per-minute used for the derived duration estimate.
const READING_WPM: usize = 200;

/// Course-level metadata descriptor, required per level directory.
#[derive(Debug, Deserialize)]
struct CourseMetadata {
    title: String,
    #[serde(default)]
    description: String,
    /// Ordered module ids; each names a subdirectory.
    modules: Vec<String>,
    #[serde(default)]
    estimated_duration: Option<String>,
}

/// Walk one snapshot and extract every course it provides.
///
/// Never fails as a whole: problems are scoped to the smallest affected unit
/// and returned as diagnostics alongside whatever normalized cleanly.
pub fn normalize(
    root: &Path,
    descriptor: &SourceDescriptor,
) -> (Vec<CourseStructure>, Vec<BuildDiagnostic>) {
    let mut courses = Vec::new();
    let mut diagnostics = Vec::new();

    // Top-level directories only; sorted walk keeps output deterministic
    let level_dirs = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir());

    for entry in level_dirs {
        let dir_name = entry.file_name().to_string_lossy().to_string();
        let Some(level) = level_of(&dir_name) else {
            // Not a level directory; outside the convention, skipped
            continue;
        };

        if let Some(course) =
            normalize_course(entry.path(), level, &dir_name, descriptor, &mut diagnostics)
        {
            courses.push(course);
        }
    }

    debug!(
        source = %descriptor.name,
        courses = courses.len(),
        diagnostics = diagnostics.len(),
        "normalized snapshot"
    );
    (courses, diagnostics)
}

/// Extract the level identifier prefix from a directory name, if any.
/// Accepts the bare level (`beginner`) or a separated prefix
/// (`beginner-rust`, `intermediate_networking`).
fn level_of(dir_name: &str) -> Option<&'static str> {
    let lower = dir_name.to_lowercase();
    LEVELS.iter().copied().find(|level| {
        lower == *level
            || (lower.starts_with(level)
                && lower[level.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| !c.is_alphanumeric()))
    })
}

fn normalize_course(
    course_dir: &Path,
    level: &str,
    dir_name: &str,
    descriptor: &SourceDescriptor,
    diagnostics: &mut Vec<BuildDiagnostic>,
) -> Option<CourseStructure> {
    let metadata = match load_metadata(course_dir) {
        Ok(m) => m,
        Err(message) => {
            // Course-fatal: no partial ingestion without trustworthy metadata
            diagnostics.push(BuildDiagnostic {
                scope: DiagnosticScope::Course,
                source: descriptor.name.clone(),
                subject: dir_name.to_string(),
                message,
            });
            return None;
        }
    };

    let course_key = format!("{}/{}", level, metadata.title);
    let mut modules = Vec::new();

    for module_id in &metadata.modules {
        match normalize_module(course_dir, module_id) {
            Ok(module) => modules.push(module),
            Err(message) => {
                // Module-fatal only: the rest of the course stays usable
                diagnostics.push(BuildDiagnostic {
                    scope: DiagnosticScope::Module,
                    source: descriptor.name.clone(),
                    subject: format!("{}/{}", course_key, module_id),
                    message,
                });
            }
        }
    }

    Some(CourseStructure {
        course_key,
        level: level.to_string(),
        title: metadata.title,
        description: metadata.description,
        estimated_duration: metadata.estimated_duration,
        modules,
        provenance: Provenance {
            source_name: descriptor.name.clone(),
            kind: descriptor.kind,
        },
    })
}

/// Read `course.toml` or `course.json`. TOML wins when both exist.
fn load_metadata(course_dir: &Path) -> Result<CourseMetadata, String> {
    let toml_path = course_dir.join(METADATA_TOML);
    if toml_path.exists() {
        let content = std::fs::read_to_string(&toml_path)
            .map_err(|e| format!("cannot read {}: {}", METADATA_TOML, e))?;
        return toml::from_str(&content).map_err(|e| format!("malformed {}: {}", METADATA_TOML, e));
    }

    let json_path = course_dir.join(METADATA_JSON);
    if json_path.exists() {
        let content = std::fs::read_to_string(&json_path)
            .map_err(|e| format!("cannot read {}: {}", METADATA_JSON, e))?;
        return serde_json::from_str(&content)
            .map_err(|e| format!("malformed {}: {}", METADATA_JSON, e));
    }

    Err(format!(
        "missing metadata file ({} or {})",
        METADATA_TOML, METADATA_JSON
    ))
}

fn normalize_module(course_dir: &Path, module_id: &str) -> Result<ModuleStructure, String> {
    let module_dir = course_dir.join(module_id);
    if !module_dir.is_dir() {
        return Err(format!("module directory '{}' not found", module_id));
    }

    // Sorted file listing so `intro.md` vs `intro.txt` resolves the same way
    // every run
    let mut file_names: Vec<String> = std::fs::read_dir(&module_dir)
        .map_err(|e| format!("cannot read module directory '{}': {}", module_id, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    file_names.sort();

    let mut steps = Vec::with_capacity(StepType::ALL.len());
    let mut missing = Vec::new();

    for step_type in StepType::ALL {
        let glob = step_glob(step_type).map_err(|e| format!("bad step pattern: {}", e))?;
        match file_names.iter().find(|name| glob.is_match(name.as_str())) {
            Some(file_name) => {
                let path = module_dir.join(file_name);
                let body = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read {}: {}", file_name, e))?;
                steps.push(StepContent {
                    step_type,
                    title: extract_title(&body)
                        .unwrap_or_else(|| format!("{} {}", module_id, step_type)),
                    word_count: body.split_whitespace().count(),
                    source_file: format!("{}/{}", module_id, file_name),
                    body,
                });
            }
            None => missing.push(format!("{}.*", step_type)),
        }
    }

    if !missing.is_empty() {
        return Err(format!("missing required step files: {}", missing.join(", ")));
    }

    let total_words: usize = steps.iter().map(|s| s.word_count).sum();
    let estimated_minutes = if total_words == 0 {
        None
    } else {
        Some(((total_words + READING_WPM - 1) / READING_WPM) as u32)
    };

    let title = steps
        .iter()
        .find(|s| s.step_type == StepType::Intro)
        .map(|s| s.title.clone())
        .unwrap_or_else(|| module_id.to_string());

    Ok(ModuleStructure {
        module_id: module_id.to_string(),
        title,
        steps,
        estimated_minutes,
    })
}

fn step_glob(step_type: StepType) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(&format!("{}.*", step_type.as_str()))?);
    builder.build()
}

/// First Markdown heading, or the first non-empty line.
fn extract_title(body: &str) -> Option<String> {
    body.lines().map(str::trim).find(|l| !l.is_empty()).map(|line| {
        line.trim_start_matches('#').trim().to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use std::fs;

    fn descriptor() -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::Local,
            locator: "/tmp/unused".to_string(),
            revision: None,
            name: "core".to_string(),
        }
    }

    fn write_module(course_dir: &Path, module_id: &str, step_names: &[&str]) {
        let module_dir = course_dir.join(module_id);
        fs::create_dir_all(&module_dir).unwrap();
        for name in step_names {
            fs::write(
                module_dir.join(name),
                format!("# {} of {}\n\nSome body text here.", name, module_id),
            )
            .unwrap();
        }
    }

    const ALL_STEPS: [&str; 5] = [
        "intro.md",
        "main.md",
        "conclusion.md",
        "assessment.md",
        "summary.md",
    ];

    fn write_course(root: &Path, dir: &str, title: &str, module_ids: &[&str]) {
        let course_dir = root.join(dir);
        fs::create_dir_all(&course_dir).unwrap();
        let module_list = module_ids
            .iter()
            .map(|m| format!("\"{}\"", m))
            .collect::<Vec<_>>()
            .join(", ");
        fs::write(
            course_dir.join("course.toml"),
            format!(
                "title = \"{}\"\ndescription = \"A test course\"\nmodules = [{}]\n",
                title, module_list
            ),
        )
        .unwrap();
        for module_id in module_ids {
            write_module(&course_dir, module_id, &ALL_STEPS);
        }
    }

    #[test]
    fn test_level_prefix_detection() {
        assert_eq!(level_of("beginner"), Some("beginner"));
        assert_eq!(level_of("beginner-rust"), Some("beginner"));
        assert_eq!(level_of("Intermediate_networking"), Some("intermediate"));
        assert_eq!(level_of("beginnerrust"), None);
        assert_eq!(level_of("notes"), None);
    }

    #[test]
    fn test_normalize_complete_course() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_course(tmp.path(), "beginner-rust", "Intro", &["module_01", "module_02"]);

        let (courses, diagnostics) = normalize(tmp.path(), &descriptor());
        assert_eq!(courses.len(), 1);
        assert!(diagnostics.is_empty());

        let course = &courses[0];
        assert_eq!(course.course_key, "beginner/Intro");
        assert_eq!(course.level, "beginner");
        assert_eq!(course.modules.len(), 2);
        let module = course.module("module_01").unwrap();
        assert_eq!(module.steps.len(), 5);
        assert_eq!(module.steps[0].step_type, StepType::Intro);
        assert_eq!(module.steps[4].step_type, StepType::Summary);
        assert!(module.steps[0].word_count > 0);
    }

    #[test]
    fn test_missing_metadata_is_course_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let course_dir = tmp.path().join("beginner-empty");
        fs::create_dir_all(&course_dir).unwrap();
        write_module(&course_dir, "module_01", &ALL_STEPS);

        let (courses, diagnostics) = normalize(tmp.path(), &descriptor());
        assert!(courses.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].scope, DiagnosticScope::Course);
        assert!(diagnostics[0].message.contains("missing metadata"));
    }

    #[test]
    fn test_malformed_metadata_is_course_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let course_dir = tmp.path().join("beginner-broken");
        fs::create_dir_all(&course_dir).unwrap();
        fs::write(course_dir.join("course.toml"), "title = [not toml").unwrap();

        let (courses, diagnostics) = normalize(tmp.path(), &descriptor());
        assert!(courses.is_empty());
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("malformed"));
    }

    #[test]
    fn test_incomplete_module_excluded_and_named() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_course(tmp.path(), "beginner-rust", "Intro", &["module_01"]);
        // Second module without its assessment file
        let course_dir = tmp.path().join("beginner-rust");
        write_module(
            &course_dir,
            "module_02",
            &["intro.md", "main.md", "conclusion.md", "summary.md"],
        );
        let meta = course_dir.join("course.toml");
        fs::write(
            &meta,
            "title = \"Intro\"\ndescription = \"d\"\nmodules = [\"module_01\", \"module_02\"]\n",
        )
        .unwrap();

        let (courses, diagnostics) = normalize(tmp.path(), &descriptor());
        assert_eq!(courses.len(), 1);
        let course = &courses[0];
        assert_eq!(course.modules.len(), 1);
        assert!(course.module("module_02").is_none());

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].scope, DiagnosticScope::Module);
        assert!(diagnostics[0].subject.contains("module_02"));
        assert!(diagnostics[0].message.contains("assessment.*"));
    }

    #[test]
    fn test_missing_module_directory_is_module_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_course(tmp.path(), "beginner-rust", "Intro", &["module_01"]);
        let meta = tmp.path().join("beginner-rust/course.toml");
        fs::write(
            &meta,
            "title = \"Intro\"\ndescription = \"d\"\nmodules = [\"module_01\", \"ghost\"]\n",
        )
        .unwrap();

        let (courses, diagnostics) = normalize(tmp.path(), &descriptor());
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].modules.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("not found"));
    }

    #[test]
    fn test_json_metadata_accepted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let course_dir = tmp.path().join("advanced-systems");
        fs::create_dir_all(&course_dir).unwrap();
        fs::write(
            course_dir.join("course.json"),
            r#"{"title": "Systems", "description": "d", "modules": ["m1"]}"#,
        )
        .unwrap();
        write_module(&course_dir, "m1", &ALL_STEPS);

        let (courses, diagnostics) = normalize(tmp.path(), &descriptor());
        assert!(diagnostics.is_empty());
        assert_eq!(courses[0].course_key, "advanced/Systems");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_course(tmp.path(), "beginner-a", "Alpha", &["m1", "m2"]);
        write_course(tmp.path(), "intermediate-b", "Beta", &["m1"]);

        let (first, d1) = normalize(tmp.path(), &descriptor());
        let (second, d2) = normalize(tmp.path(), &descriptor());
        assert_eq!(first, second);
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_title_extraction() {
        assert_eq!(extract_title("# Heading\n\nbody"), Some("Heading".to_string()));
        assert_eq!(extract_title("\n\nplain first line\nmore"), Some("plain first line".to_string()));
        assert_eq!(extract_title("   \n \n"), None);
    }
}
