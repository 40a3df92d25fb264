use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::{SourceDescriptor, SourceKind};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Ordered source list; order determines collision precedence.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub rebuild: RebuildConfig,
    pub progress: ProgressConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Local {
        name: String,
        path: PathBuf,
    },
    Remote {
        name: String,
        url: String,
        #[serde(default = "default_branch")]
        branch: String,
    },
}

fn default_branch() -> String {
    "main".to_string()
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Local { name, .. } => name,
            SourceConfig::Remote { name, .. } => name,
        }
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        match self {
            SourceConfig::Local { name, path } => SourceDescriptor {
                kind: SourceKind::Local,
                locator: path.to_string_lossy().to_string(),
                revision: None,
                name: name.clone(),
            },
            SourceConfig::Remote { name, url, branch } => SourceDescriptor {
                kind: SourceKind::Remote,
                locator: url.clone(),
                revision: Some(branch.clone()),
                name: name.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Path of the persisted catalog blob.
    pub path: PathBuf,
    /// Maximum blob age in seconds before a rebuild is forced. Absent means
    /// the blob never expires on age alone.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RebuildConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_fetch_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProgressConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecommendationConfig {
    /// Modules whose latest score falls below this are flagged as weak areas.
    #[serde(default = "default_weak_score_threshold")]
    pub weak_score_threshold: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            weak_score_threshold: default_weak_score_threshold(),
        }
    }
}

fn default_weak_score_threshold() -> f64 {
    0.7
}

impl Config {
    /// The ordered descriptor list derived from `[[sources]]`.
    pub fn descriptors(&self) -> Vec<SourceDescriptor> {
        self.sources.iter().map(|s| s.descriptor()).collect()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate sources: names must be unique (collision suffixes depend on it)
    let mut seen = std::collections::HashSet::new();
    for source in &config.sources {
        if source.name().is_empty() {
            anyhow::bail!("source name must not be empty");
        }
        if !seen.insert(source.name().to_string()) {
            anyhow::bail!("duplicate source name: '{}'", source.name());
        }
        if let SourceConfig::Remote { url, branch, .. } = source {
            if url.is_empty() {
                anyhow::bail!("remote source '{}' has an empty url", source.name());
            }
            if branch.is_empty() {
                anyhow::bail!("remote source '{}' has an empty branch", source.name());
            }
        }
    }

    // Validate rebuild
    if config.rebuild.concurrency == 0 {
        anyhow::bail!("rebuild.concurrency must be >= 1");
    }
    if config.rebuild.fetch_timeout_secs == 0 {
        anyhow::bail!("rebuild.fetch_timeout_secs must be >= 1");
    }

    // Validate recommendation
    if !(0.0..=1.0).contains(&config.recommendation.weak_score_threshold) {
        anyhow::bail!("recommendation.weak_score_threshold must be in [0.0, 1.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("crs.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[catalog]
path = "data/catalog.json"

[progress]
db_path = "data/progress.sqlite"

[[sources]]
kind = "local"
name = "core"
path = "./content"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.rebuild.concurrency, 4);
        assert_eq!(config.recommendation.weak_score_threshold, 0.7);
        let descriptors = config.descriptors();
        assert_eq!(descriptors[0].kind, SourceKind::Local);
        assert_eq!(descriptors[0].name, "core");
    }

    #[test]
    fn test_duplicate_source_names_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[catalog]
path = "catalog.json"

[progress]
db_path = "progress.sqlite"

[[sources]]
kind = "local"
name = "core"
path = "./a"

[[sources]]
kind = "remote"
name = "core"
url = "https://example.com/repo.git"
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate source name"));
    }

    #[test]
    fn test_remote_defaults_branch_to_main() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[catalog]
path = "catalog.json"

[progress]
db_path = "progress.sqlite"

[[sources]]
kind = "remote"
name = "community"
url = "https://example.com/courses.git"
"#,
        );
        let config = load_config(&path).unwrap();
        let descriptor = config.descriptors().remove(0);
        assert_eq!(descriptor.revision.as_deref(), Some("main"));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[catalog]
path = "catalog.json"

[progress]
db_path = "progress.sqlite"

[recommendation]
weak_score_threshold = 1.5
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
