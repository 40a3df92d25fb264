//! Core data models for the course catalog and learner progress.
//!
//! Catalog types ([`CourseStructure`], [`ModuleStructure`], [`StepContent`])
//! are produced by normalization and merged into a [`CatalogSnapshot`], the
//! unit that is fingerprinted, persisted, and served to queries. Progress
//! types ([`CourseProgress`], [`AssessmentRecord`]) are owned by the progress
//! store and never embedded in the catalog.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bump when the persisted catalog blob layout changes. A blob carrying a
/// different version is discarded and rebuilt instead of failing at load time.
pub const CATALOG_FORMAT_VERSION: u32 = 1;

/// Where a source's content physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Remote,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Remote => "remote",
        }
    }

    pub fn parse(s: &str) -> Option<SourceKind> {
        match s {
            "local" => Some(SourceKind::Local),
            "remote" => Some(SourceKind::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative pointer to one content origin.
///
/// The ordered descriptor list is the unit hashed into the cache fingerprint;
/// order matters because collision precedence during the merge depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    /// Directory path for local sources, repository URL for remote ones.
    pub locator: String,
    /// Branch or ref to fetch; remote sources only.
    pub revision: Option<String>,
    /// Display name, unique across the configured source list.
    pub name: String,
}

/// The five step types every module must provide, in course order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Intro,
    Main,
    Conclusion,
    Assessment,
    Summary,
}

impl StepType {
    pub const ALL: [StepType; 5] = [
        StepType::Intro,
        StepType::Main,
        StepType::Conclusion,
        StepType::Assessment,
        StepType::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Intro => "intro",
            StepType::Main => "main",
            StepType::Conclusion => "conclusion",
            StepType::Assessment => "assessment",
            StepType::Summary => "summary",
        }
    }

    pub fn parse(s: &str) -> Option<StepType> {
        match s {
            "intro" => Some(StepType::Intro),
            "main" => Some(StepType::Main),
            "conclusion" => Some(StepType::Conclusion),
            "assessment" => Some(StepType::Assessment),
            "summary" => Some(StepType::Summary),
            _ => None,
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step's content, derived deterministically from its source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepContent {
    pub step_type: StepType,
    pub title: String,
    pub body: String,
    /// Path of the backing file, relative to the snapshot root.
    pub source_file: String,
    pub word_count: usize,
}

/// A module with its five ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleStructure {
    pub module_id: String,
    pub title: String,
    /// Always exactly five entries in [`StepType::ALL`] order; a module
    /// missing any step type is rejected during normalization.
    pub steps: Vec<StepContent>,
    /// Reading-time estimate in minutes, derived from word counts.
    pub estimated_minutes: Option<u32>,
}

impl ModuleStructure {
    pub fn step(&self, step_type: StepType) -> Option<&StepContent> {
        self.steps.iter().find(|s| s.step_type == step_type)
    }
}

/// Which source produced a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_name: String,
    pub kind: SourceKind,
}

/// A fully normalized course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseStructure {
    /// `{level}/{title}`, possibly suffixed with `@{source_name}` after a
    /// merge collision. Globally unique within a catalog.
    pub course_key: String,
    pub level: String,
    pub title: String,
    pub description: String,
    pub estimated_duration: Option<String>,
    pub modules: Vec<ModuleStructure>,
    pub provenance: Provenance,
}

impl CourseStructure {
    pub fn module(&self, module_id: &str) -> Option<&ModuleStructure> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    /// Every step id in this course, in module/step order.
    pub fn step_ids(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.steps
                    .iter()
                    .map(|s| step_id(&self.course_key, &m.module_id, s.step_type))
            })
            .collect()
    }

    pub fn total_steps(&self) -> usize {
        self.modules.len() * StepType::ALL.len()
    }
}

/// Canonical step identifier: `{course_key}/{module_id}/{step_type}`.
pub fn step_id(course_key: &str, module_id: &str, step_type: StepType) -> String {
    format!("{}/{}/{}", course_key, module_id, step_type)
}

/// Scope of a build diagnostic, smallest affected unit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticScope {
    Module,
    Course,
    Source,
    Catalog,
}

impl fmt::Display for DiagnosticScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticScope::Module => "module",
            DiagnosticScope::Course => "course",
            DiagnosticScope::Source => "source",
            DiagnosticScope::Catalog => "catalog",
        };
        f.write_str(s)
    }
}

/// A non-fatal problem recorded during a catalog build.
///
/// Diagnostics never abort a rebuild; they ride along on the snapshot so
/// callers can see what was excluded and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiagnostic {
    pub scope: DiagnosticScope,
    /// Name of the source the diagnostic originated from.
    pub source: String,
    /// The affected unit: a course key, module id, or the source itself.
    pub subject: String,
    pub message: String,
}

/// The persisted, queryable merged course index for one fingerprint.
///
/// Replaced wholesale on rebuild, never partially mutated. `courses` is a
/// `BTreeMap` so serialization order is stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub format_version: u32,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
    pub courses: BTreeMap<String, CourseStructure>,
    pub diagnostics: Vec<BuildDiagnostic>,
}

impl CatalogSnapshot {
    pub fn course(&self, course_key: &str) -> Option<&CourseStructure> {
        self.courses.get(course_key)
    }
}

/// Durable per-learner position and history within the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub user_id: String,
    pub current_course_key: Option<String>,
    pub current_module_id: Option<String>,
    pub current_step_type: Option<StepType>,
    pub completed_steps: BTreeSet<String>,
    /// Latest assessment score per module (not the best).
    pub assessment_scores: BTreeMap<String, f64>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// One graded assessment submission. Appended, never mutated, so the audit
/// trail survives later re-submissions for the same module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub id: String,
    pub module_id: String,
    pub raw_answers: serde_json::Value,
    pub score: f64,
    pub feedback_summary: Option<String>,
    pub graded_at: DateTime<Utc>,
}

/// Result of advancing a learner's position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextPosition {
    Step {
        module_id: String,
        step_type: StepType,
    },
    Complete,
}
