//! Engine facade: the operation surface exposed to external callers.
//!
//! Wires [`CacheManager`], [`ProgressStore`], and the recommendation
//! functions together. Catalog queries go through the cache (lazily
//! refreshed), progress commands go straight to the store, and
//! recommendations read from both. The CLI and any MCP tool layer call only
//! these methods.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::cache::{CacheManager, CatalogHandle};
use crate::config::Config;
use crate::error::EngineError;
use crate::models::{
    AssessmentRecord, CatalogSnapshot, CourseProgress, CourseStructure, ModuleStructure,
    NextPosition, SourceKind, StepContent, StepType,
};
use crate::progress::{new_assessment_record, ProgressStore};
use crate::recommend::{self, Completion};
use crate::search::{search_catalog, SearchHit};

/// One row of `list_courses` output.
#[derive(Debug, Clone, Serialize)]
pub struct CourseSummary {
    pub course_key: String,
    pub title: String,
    pub level: String,
    pub source_name: String,
    pub kind: SourceKind,
    pub modules: usize,
}

/// Configured source with a cheap reachability check (no network).
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub kind: SourceKind,
    pub locator: String,
    pub status: String,
}

/// Combined recommendation answer for one learner.
#[derive(Debug, Clone)]
pub struct Recommendations {
    pub weak_areas: Vec<(String, f64)>,
    pub completion: Option<Completion>,
    pub next: Option<(String, StepType)>,
}

pub struct CourseEngine {
    config: Arc<Config>,
    cache: CacheManager,
    progress: ProgressStore,
}

impl CourseEngine {
    pub async fn open(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let cache = CacheManager::new(config.clone());
        let progress = ProgressStore::open(&config).await?;
        Ok(Self {
            config,
            cache,
            progress,
        })
    }

    // ── Catalog queries ────────────────────────────────────────────────

    pub async fn list_courses(
        &self,
        level_filter: Option<&str>,
        kind_filter: Option<SourceKind>,
    ) -> Result<Vec<CourseSummary>> {
        let catalog = self.cache.catalog().await?;
        Ok(catalog
            .courses
            .values()
            .filter(|c| {
                level_filter
                    .map(|l| c.level.eq_ignore_ascii_case(l))
                    .unwrap_or(true)
            })
            .filter(|c| {
                kind_filter
                    .map(|k| c.provenance.kind == k)
                    .unwrap_or(true)
            })
            .map(|c| CourseSummary {
                course_key: c.course_key.clone(),
                title: c.title.clone(),
                level: c.level.clone(),
                source_name: c.provenance.source_name.clone(),
                kind: c.provenance.kind,
                modules: c.modules.len(),
            })
            .collect())
    }

    pub async fn course_outline(&self, course_key: &str) -> Result<CourseStructure> {
        let catalog = self.cache.catalog().await?;
        let course = catalog
            .course(course_key)
            .ok_or_else(|| EngineError::NotFound(format!("course '{}'", course_key)))?;
        Ok(course.clone())
    }

    pub async fn module_content(
        &self,
        course_key: &str,
        module_id: &str,
    ) -> Result<ModuleStructure> {
        let course = self.course_outline(course_key).await?;
        let module = course.module(module_id).ok_or_else(|| {
            EngineError::NotFound(format!("module '{}' in course '{}'", module_id, course_key))
        })?;
        Ok(module.clone())
    }

    pub async fn step_content(
        &self,
        course_key: &str,
        module_id: &str,
        step_type: StepType,
    ) -> Result<StepContent> {
        let module = self.module_content(course_key, module_id).await?;
        let step = module.step(step_type).ok_or_else(|| {
            EngineError::NotFound(format!(
                "step '{}' in module '{}' of course '{}'",
                step_type, module_id, course_key
            ))
        })?;
        Ok(step.clone())
    }

    pub async fn search(&self, query: &str, level_filter: Option<&str>) -> Result<Vec<SearchHit>> {
        let catalog = self.cache.catalog().await?;
        Ok(search_catalog(&catalog, query, level_filter))
    }

    /// Force a full rebuild, bypassing the persisted blob.
    pub async fn rebuild(&self) -> Result<Arc<CatalogSnapshot>> {
        self.cache.rebuild().await
    }

    /// Non-blocking catalog access; see [`CacheManager::catalog_now`].
    pub async fn catalog_now(&self) -> CatalogHandle {
        self.cache.catalog_now().await
    }

    /// Configured sources with a local-only status check. Remote sources are
    /// not contacted here; `rebuild` is the operation that fetches.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.config
            .descriptors()
            .into_iter()
            .map(|d| {
                let status = match d.kind {
                    SourceKind::Local => {
                        if std::path::Path::new(&d.locator).is_dir() {
                            "OK".to_string()
                        } else {
                            "MISSING (directory does not exist)".to_string()
                        }
                    }
                    SourceKind::Remote => format!(
                        "REMOTE ({})",
                        d.revision.as_deref().unwrap_or("main")
                    ),
                };
                SourceStatus {
                    name: d.name,
                    kind: d.kind,
                    locator: d.locator,
                    status,
                }
            })
            .collect()
    }

    // ── Progress commands ──────────────────────────────────────────────

    pub async fn start_course(&self, user_id: &str, course_key: &str) -> Result<CourseProgress> {
        let catalog = self.cache.catalog().await?;
        let course = catalog
            .course(course_key)
            .ok_or_else(|| EngineError::NotFound(format!("course '{}'", course_key)))?;
        Ok(self.progress.start_course(user_id, course).await?)
    }

    pub async fn get_progress(&self, user_id: &str) -> Result<CourseProgress> {
        Ok(self.progress.get_or_create(user_id).await?)
    }

    /// Mark a step completed. The step must exist in the current catalog.
    pub async fn complete_step(&self, user_id: &str, step_id: &str) -> Result<CourseProgress> {
        let catalog = self.cache.catalog().await?;
        if !step_exists(&catalog, step_id) {
            return Err(EngineError::NotFound(format!("step '{}'", step_id)).into());
        }
        Ok(self.progress.apply_step_completion(user_id, step_id).await?)
    }

    /// Record a graded assessment submission. Grading itself happens
    /// upstream; the engine validates the module, appends the audit record,
    /// and moves the current score to this submission.
    pub async fn submit_assessment(
        &self,
        user_id: &str,
        module_id: &str,
        raw_answers: serde_json::Value,
        score: f64,
        feedback_summary: Option<String>,
    ) -> Result<AssessmentRecord> {
        if !(0.0..=1.0).contains(&score) {
            anyhow::bail!("score must be in [0.0, 1.0], got {}", score);
        }

        let progress = self.progress.get_or_create(user_id).await?;
        let course_key = progress
            .current_course_key
            .as_deref()
            .ok_or_else(|| EngineError::NotEnrolled(user_id.to_string()))?;

        let catalog = self.cache.catalog().await?;
        let course = catalog
            .course(course_key)
            .ok_or_else(|| EngineError::NotFound(format!("course '{}'", course_key)))?;
        if course.module(module_id).is_none() {
            return Err(EngineError::NotFound(format!(
                "module '{}' in course '{}'",
                module_id, course_key
            ))
            .into());
        }

        let record = new_assessment_record(module_id, raw_answers, score, feedback_summary);
        self.progress
            .apply_assessment_result(user_id, &record)
            .await?;
        Ok(record)
    }

    pub async fn advance(&self, user_id: &str) -> Result<NextPosition> {
        let catalog = self.cache.catalog().await?;
        Ok(self.progress.advance(user_id, &catalog).await?)
    }

    pub async fn assessment_history(
        &self,
        user_id: &str,
        module_id: Option<&str>,
    ) -> Result<Vec<AssessmentRecord>> {
        Ok(self.progress.assessment_history(user_id, module_id).await?)
    }

    // ── Recommendations ────────────────────────────────────────────────

    pub async fn recommendations(&self, user_id: &str) -> Result<Recommendations> {
        let catalog = self.cache.catalog().await?;
        let progress = self.progress.get_or_create(user_id).await?;

        let completion = progress
            .current_course_key
            .as_deref()
            .map(|key| recommend::completion(&progress, &catalog, key));

        Ok(Recommendations {
            weak_areas: recommend::weak_areas(
                &progress,
                self.config.recommendation.weak_score_threshold,
            ),
            completion,
            next: recommend::suggested_next(&progress, &catalog),
        })
    }
}

/// Check a step id against the catalog. Course keys themselves contain `/`,
/// so the id is matched by course-key prefix rather than split blindly.
fn step_exists(catalog: &CatalogSnapshot, step_id: &str) -> bool {
    for (course_key, course) in &catalog.courses {
        let Some(rest) = step_id
            .strip_prefix(course_key.as_str())
            .and_then(|r| r.strip_prefix('/'))
        else {
            continue;
        };
        let Some((module_id, step_name)) = rest.split_once('/') else {
            continue;
        };
        let Some(step_type) = StepType::parse(step_name) else {
            continue;
        };
        if course
            .module(module_id)
            .is_some_and(|m| m.step(step_type).is_some())
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{step_id, ModuleStructure, Provenance, StepContent};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn catalog() -> CatalogSnapshot {
        let steps = StepType::ALL
            .iter()
            .map(|st| StepContent {
                step_type: *st,
                title: st.to_string(),
                body: String::new(),
                source_file: String::new(),
                word_count: 0,
            })
            .collect();
        let course = CourseStructure {
            course_key: "beginner/Intro".to_string(),
            level: "beginner".to_string(),
            title: "Intro".to_string(),
            description: String::new(),
            estimated_duration: None,
            modules: vec![ModuleStructure {
                module_id: "m1".to_string(),
                title: "m1".to_string(),
                steps,
                estimated_minutes: None,
            }],
            provenance: Provenance {
                source_name: "core".to_string(),
                kind: SourceKind::Local,
            },
        };
        let mut courses = BTreeMap::new();
        courses.insert(course.course_key.clone(), course);
        CatalogSnapshot {
            format_version: 1,
            fingerprint: "test".to_string(),
            built_at: Utc::now(),
            courses,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn test_step_exists_parses_slashed_course_keys() {
        let cat = catalog();
        assert!(step_exists(
            &cat,
            &step_id("beginner/Intro", "m1", StepType::Assessment)
        ));
        assert!(!step_exists(&cat, "beginner/Intro/m1/quiz"));
        assert!(!step_exists(&cat, "beginner/Intro/ghost/intro"));
        assert!(!step_exists(&cat, "beginner/Other/m1/intro"));
        assert!(!step_exists(&cat, "garbage"));
    }
}
