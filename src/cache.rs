//! Catalog caching and rebuild orchestration.
//!
//! The manager owns the only mutable catalog reference. Callers get immutable
//! [`CatalogSnapshot`] handles: [`CacheManager::catalog`] waits for a valid
//! snapshot (reusing the persisted blob when its fingerprint and age allow),
//! while [`CacheManager::catalog_now`] never blocks and reports the last-good
//! snapshot when a rebuild would be needed.
//!
//! Rebuilds fan resolution and normalization out across sources under a
//! bounded concurrency limit; per-source failures are captured as diagnostics
//! so the merge proceeds with whatever succeeded. The merge and persist steps
//! run single-threaded in descriptor order to keep collision handling
//! deterministic. Persistence is write-to-temp-then-rename, so a crash mid
//! write never corrupts an existing usable blob.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CacheError;
use crate::models::{
    BuildDiagnostic, CatalogSnapshot, CourseStructure, DiagnosticScope, SourceDescriptor,
    CATALOG_FORMAT_VERSION,
};
use crate::normalize;
use crate::registry;
use crate::resolver::{self, SourceResolver};

/// Non-blocking catalog access result.
#[derive(Debug, Clone)]
pub enum CatalogHandle {
    /// A fully built snapshot valid for the current fingerprint.
    Ready(Arc<CatalogSnapshot>),
    /// A rebuild is required; the last-good snapshot, if any, is still
    /// servable. Stale-but-available beats blocking.
    Building {
        last_good: Option<Arc<CatalogSnapshot>>,
    },
}

pub struct CacheManager {
    config: Arc<Config>,
    resolvers: Vec<Arc<dyn SourceResolver>>,
    fingerprint: String,
    current: RwLock<Option<Arc<CatalogSnapshot>>>,
    /// Single-flight gate: at most one rebuild for this fingerprint runs at a
    /// time; concurrent callers queue on it and then find the fresh snapshot.
    rebuild_gate: Mutex<()>,
}

impl CacheManager {
    pub fn new(config: Arc<Config>) -> Self {
        let resolvers = resolver::resolvers_from_config(&config);
        Self::with_resolvers(config, resolvers)
    }

    /// Construct with an explicit resolver list. Used by tests to observe
    /// fetch behavior.
    pub fn with_resolvers(config: Arc<Config>, resolvers: Vec<Arc<dyn SourceResolver>>) -> Self {
        let descriptors: Vec<SourceDescriptor> =
            resolvers.iter().map(|r| r.descriptor().clone()).collect();
        Self {
            config,
            resolvers,
            fingerprint: fingerprint(&descriptors),
            current: RwLock::new(None),
            rebuild_gate: Mutex::new(()),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Return a valid catalog snapshot, rebuilding only when necessary.
    ///
    /// With an unchanged source list and a usable persisted blob, repeated
    /// calls touch no source at all.
    pub async fn catalog(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.valid_in_memory().await {
            return Ok(snapshot);
        }

        let _gate = self.rebuild_gate.lock().await;

        // Attached callers land here after the in-flight rebuild finished
        if let Some(snapshot) = self.valid_in_memory().await {
            return Ok(snapshot);
        }

        match self.load_persisted() {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write().await = Some(snapshot.clone());
                info!(fingerprint = %self.fingerprint, "catalog loaded from cache");
                return Ok(snapshot);
            }
            Err(e) => {
                // Self-healing: any cache problem just means rebuild
                warn!(error = %e, "catalog cache unusable, rebuilding");
            }
        }

        self.rebuild_locked().await
    }

    /// Explicit reload: bypass the persisted blob entirely.
    pub async fn rebuild(&self) -> Result<Arc<CatalogSnapshot>> {
        let _gate = self.rebuild_gate.lock().await;
        self.rebuild_locked().await
    }

    /// Non-blocking accessor. Never waits on a rebuild.
    pub async fn catalog_now(&self) -> CatalogHandle {
        match self.valid_in_memory().await {
            Some(snapshot) => CatalogHandle::Ready(snapshot),
            None => CatalogHandle::Building {
                last_good: self.current.read().await.clone(),
            },
        }
    }

    async fn valid_in_memory(&self) -> Option<Arc<CatalogSnapshot>> {
        let snapshot = self.current.read().await.clone()?;
        (snapshot.fingerprint == self.fingerprint && self.is_fresh(&snapshot)).then_some(snapshot)
    }

    fn is_fresh(&self, snapshot: &CatalogSnapshot) -> bool {
        match self.config.catalog.max_age_secs {
            None => true,
            Some(max_age) => {
                let age = Utc::now().signed_duration_since(snapshot.built_at);
                age.num_seconds() >= 0 && age.num_seconds() as u64 <= max_age
            }
        }
    }

    fn load_persisted(&self) -> Result<CatalogSnapshot, CacheError> {
        let path = &self.config.catalog.path;
        let bytes =
            std::fs::read(path).map_err(|e| CacheError::Corrupt(format!("read failed: {}", e)))?;
        let snapshot: CatalogSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::Corrupt(format!("parse failed: {}", e)))?;

        if snapshot.format_version != CATALOG_FORMAT_VERSION {
            return Err(CacheError::UnsupportedVersion(snapshot.format_version));
        }
        if snapshot.fingerprint != self.fingerprint {
            return Err(CacheError::FingerprintMismatch {
                cached: snapshot.fingerprint,
                expected: self.fingerprint.clone(),
            });
        }
        if !self.is_fresh(&snapshot) {
            return Err(CacheError::Expired);
        }
        Ok(snapshot)
    }

    /// Full rebuild. Caller must hold `rebuild_gate`.
    async fn rebuild_locked(&self) -> Result<Arc<CatalogSnapshot>> {
        info!(
            fingerprint = %self.fingerprint,
            sources = self.resolvers.len(),
            "rebuilding catalog"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.rebuild.concurrency));
        let mut set: JoinSet<(usize, Vec<CourseStructure>, Vec<BuildDiagnostic>)> = JoinSet::new();

        for (index, source) in self.resolvers.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Vec::new(), Vec::new()),
                };
                let descriptor = source.descriptor().clone();
                match source.resolve().await {
                    Ok(snapshot) => {
                        let result = normalize::normalize(snapshot.root(), &descriptor);
                        // snapshot drops here: remote workspaces are reclaimed
                        // whether or not normalization produced anything
                        (index, result.0, result.1)
                    }
                    Err(e) => {
                        warn!(source = %descriptor.name, error = %e, "source failed to resolve");
                        let diagnostic = BuildDiagnostic {
                            scope: DiagnosticScope::Source,
                            source: descriptor.name.clone(),
                            subject: descriptor.locator.clone(),
                            message: e.to_string(),
                        };
                        (index, Vec::new(), vec![diagnostic])
                    }
                }
            });
        }

        let mut results: Vec<(usize, Vec<CourseStructure>, Vec<BuildDiagnostic>)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "source task failed"),
            }
        }
        // Restore descriptor order before the deterministic merge
        results.sort_by_key(|(index, _, _)| *index);

        let mut course_lists = Vec::with_capacity(results.len());
        let mut diagnostics = Vec::new();
        for (_, courses, diags) in results {
            course_lists.push(courses);
            diagnostics.extend(diags);
        }

        let (courses, merge_diagnostics) = registry::merge(course_lists);
        diagnostics.extend(merge_diagnostics);

        let snapshot = Arc::new(CatalogSnapshot {
            format_version: CATALOG_FORMAT_VERSION,
            fingerprint: self.fingerprint.clone(),
            built_at: Utc::now(),
            courses,
            diagnostics,
        });

        self.persist(&snapshot)
            .with_context(|| "failed to persist catalog snapshot")?;
        *self.current.write().await = Some(snapshot.clone());

        info!(
            courses = snapshot.courses.len(),
            diagnostics = snapshot.diagnostics.len(),
            "catalog rebuilt"
        );
        Ok(snapshot)
    }

    fn persist(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let path = &self.config.catalog.path;
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let payload = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&payload)?;
        tmp.flush()?;
        // Atomic rename: readers see either the old blob or the new one
        tmp.persist(path)
            .map_err(|e| anyhow::anyhow!("rename failed: {}", e))?;
        Ok(())
    }
}

/// Stable hash over the ordered descriptor list. Order is part of the hash
/// because collision precedence depends on it.
pub fn fingerprint(descriptors: &[SourceDescriptor]) -> String {
    let mut hasher = Sha256::new();
    for d in descriptors {
        hasher.update(d.kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(d.locator.as_bytes());
        hasher.update([0]);
        hasher.update(d.revision.as_deref().unwrap_or("").as_bytes());
        hasher.update([0]);
        hasher.update(d.name.as_bytes());
        hasher.update([0xff]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CatalogConfig, ProgressConfig, RebuildConfig, RecommendationConfig};
    use crate::error::SourceError;
    use crate::models::SourceKind;
    use crate::resolver::Snapshot;
    use async_trait::async_trait;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(root: &Path) -> Arc<Config> {
        Arc::new(Config {
            sources: Vec::new(),
            catalog: CatalogConfig {
                path: root.join("catalog.json"),
                max_age_secs: None,
            },
            rebuild: RebuildConfig::default(),
            progress: ProgressConfig {
                db_path: root.join("progress.sqlite"),
            },
            recommendation: RecommendationConfig::default(),
        })
    }

    /// Resolver that counts how many times it was asked to fetch.
    struct CountingSource {
        descriptor: SourceDescriptor,
        content_root: PathBuf,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceResolver for CountingSource {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.descriptor
        }

        async fn resolve(&self) -> Result<Snapshot, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Snapshot::Local(self.content_root.clone()))
        }
    }

    /// Resolver that always fails.
    struct FailingSource {
        descriptor: SourceDescriptor,
    }

    #[async_trait]
    impl SourceResolver for FailingSource {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.descriptor
        }

        async fn resolve(&self) -> Result<Snapshot, SourceError> {
            Err(SourceError::Unreachable("host is down".to_string()))
        }
    }

    fn descriptor(name: &str) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::Local,
            locator: format!("/content/{}", name),
            revision: None,
            name: name.to_string(),
        }
    }

    fn write_fixture_course(root: &Path, dir: &str, title: &str) {
        let course_dir = root.join(dir);
        fs::create_dir_all(&course_dir).unwrap();
        fs::write(
            course_dir.join("course.toml"),
            format!("title = \"{}\"\ndescription = \"d\"\nmodules = [\"m1\"]\n", title),
        )
        .unwrap();
        let module_dir = course_dir.join("m1");
        fs::create_dir_all(&module_dir).unwrap();
        for step in ["intro", "main", "conclusion", "assessment", "summary"] {
            fs::write(module_dir.join(format!("{}.md", step)), format!("# {}\n\nbody", step))
                .unwrap();
        }
    }

    fn counting_manager(
        root: &Path,
        content: &Path,
    ) -> (CacheManager, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            descriptor: descriptor("core"),
            content_root: content.to_path_buf(),
            fetches: fetches.clone(),
        };
        let manager = CacheManager::with_resolvers(test_config(root), vec![Arc::new(source)]);
        (manager, fetches)
    }

    #[test]
    fn test_fingerprint_is_order_sensitive() {
        let a = descriptor("a");
        let b = descriptor("b");
        let forward = fingerprint(&[a.clone(), b.clone()]);
        let reversed = fingerprint(&[b, a]);
        assert_ne!(forward, reversed);
        assert_eq!(forward, fingerprint(&[descriptor("a"), descriptor("b")]));
    }

    #[tokio::test]
    async fn test_second_catalog_call_performs_zero_fetches() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("content");
        write_fixture_course(&content, "beginner-rust", "Intro");

        let (manager, fetches) = counting_manager(tmp.path(), &content);

        let first = manager.catalog().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(first.courses.len(), 1);

        let second = manager.catalog().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1, "second call must not fetch");
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[tokio::test]
    async fn test_persisted_blob_reused_across_managers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("content");
        write_fixture_course(&content, "beginner-rust", "Intro");

        let (manager, _) = counting_manager(tmp.path(), &content);
        let built = manager.catalog().await.unwrap();

        // Fresh manager for the same descriptor list: must load, not fetch
        let (manager2, fetches2) = counting_manager(tmp.path(), &content);
        let loaded = manager2.catalog().await.unwrap();
        assert_eq!(fetches2.load(Ordering::SeqCst), 0);
        assert_eq!(loaded.fingerprint, built.fingerprint);
        assert_eq!(loaded.courses, built.courses);
    }

    #[tokio::test]
    async fn test_failed_source_does_not_abort_rebuild() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("content");
        write_fixture_course(&content, "beginner-rust", "Intro");

        let ok = CountingSource {
            descriptor: descriptor("core"),
            content_root: content.clone(),
            fetches: Arc::new(AtomicUsize::new(0)),
        };
        let bad = FailingSource {
            descriptor: descriptor("flaky"),
        };
        let manager = CacheManager::with_resolvers(
            test_config(tmp.path()),
            vec![Arc::new(bad), Arc::new(ok)],
        );

        let snapshot = manager.catalog().await.unwrap();
        assert_eq!(snapshot.courses.len(), 1, "surviving source must appear");
        assert!(snapshot
            .diagnostics
            .iter()
            .any(|d| d.scope == DiagnosticScope::Source && d.message.contains("host is down")));
    }

    #[tokio::test]
    async fn test_corrupt_blob_self_heals() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("content");
        write_fixture_course(&content, "beginner-rust", "Intro");

        let config = test_config(tmp.path());
        fs::write(&config.catalog.path, b"{not json").unwrap();

        let (manager, fetches) = counting_manager(tmp.path(), &content);
        let snapshot = manager.catalog().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.courses.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("content");
        write_fixture_course(&content, "beginner-rust", "Intro");

        let (manager, _) = counting_manager(tmp.path(), &content);
        let built = manager.catalog().await.unwrap();

        let bytes = fs::read(tmp.path().join("catalog.json")).unwrap();
        let loaded: CatalogSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(loaded.fingerprint, built.fingerprint);
        assert_eq!(loaded.courses, built.courses);
    }

    #[tokio::test]
    async fn test_catalog_now_reports_building_before_first_build() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("content");
        write_fixture_course(&content, "beginner-rust", "Intro");

        let (manager, _) = counting_manager(tmp.path(), &content);
        match manager.catalog_now().await {
            CatalogHandle::Building { last_good: None } => {}
            other => panic!("expected Building without last-good, got {:?}", other),
        }

        manager.catalog().await.unwrap();
        match manager.catalog_now().await {
            CatalogHandle::Ready(snapshot) => assert_eq!(snapshot.courses.len(), 1),
            other => panic!("expected Ready, got {:?}", other),
        }
    }
}
