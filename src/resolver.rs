//! Source resolution: descriptor → materialized on-disk snapshot.
//!
//! Local sources resolve to a direct path reference and are never copied or
//! deleted. Remote sources are shallow-cloned into a uniquely named temporary
//! workspace that is reclaimed when the [`Snapshot`] is dropped, regardless
//! of whether normalization succeeded.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::debug;

use crate::config::Config;
use crate::error::SourceError;
use crate::models::SourceDescriptor;

/// Walkable filesystem view of one source at a point in time.
#[derive(Debug)]
pub enum Snapshot {
    /// Direct reference to a configured directory; not owned by us.
    Local(PathBuf),
    /// Shallow clone in a temporary workspace; dropping it reclaims the disk.
    Remote { workspace: TempDir },
}

impl Snapshot {
    pub fn root(&self) -> &Path {
        match self {
            Snapshot::Local(path) => path,
            Snapshot::Remote { workspace } => workspace.path(),
        }
    }
}

/// One configured source that can be materialized into a [`Snapshot`].
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    /// Materialize the source. Fails closed: on any error no partial
    /// snapshot is returned and any temporary workspace is released.
    async fn resolve(&self) -> Result<Snapshot, SourceError>;
}

/// Local directory source. Validates existence and readability only.
pub struct LocalSource {
    descriptor: SourceDescriptor,
}

impl LocalSource {
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl SourceResolver for LocalSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn resolve(&self) -> Result<Snapshot, SourceError> {
        let path = PathBuf::from(&self.descriptor.locator);
        if !path.is_dir() {
            return Err(SourceError::Unreachable(format!(
                "directory does not exist: {}",
                path.display()
            )));
        }
        // Read permission check; a directory we cannot list is unusable
        std::fs::read_dir(&path).map_err(|e| {
            SourceError::Unreachable(format!("cannot read {}: {}", path.display(), e))
        })?;

        debug!(source = %self.descriptor.name, path = %path.display(), "resolved local source");
        Ok(Snapshot::Local(path))
    }
}

/// Remote git repository source. Performs a shallow single-branch clone of
/// the configured revision under a fetch timeout.
pub struct RemoteSource {
    descriptor: SourceDescriptor,
    fetch_timeout: Duration,
}

impl RemoteSource {
    pub fn new(descriptor: SourceDescriptor, fetch_timeout: Duration) -> Self {
        Self {
            descriptor,
            fetch_timeout,
        }
    }
}

#[async_trait]
impl SourceResolver for RemoteSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn resolve(&self) -> Result<Snapshot, SourceError> {
        let workspace = tempfile::Builder::new()
            .prefix("courseloom-src-")
            .tempdir()
            .map_err(|e| SourceError::Unreachable(format!("cannot create workspace: {}", e)))?;

        let branch = self.descriptor.revision.as_deref().unwrap_or("main");

        let mut cmd = tokio::process::Command::new("git");
        cmd.args(["clone", "--depth", "1", "--single-branch", "--branch", branch])
            .arg(&self.descriptor.locator)
            .arg(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Never prompt for credentials inside the engine
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            SourceError::Unreachable(format!("failed to execute 'git clone': {}", e))
        })?;

        let output = match tokio::time::timeout(self.fetch_timeout, child.wait_with_output()).await
        {
            // Timeout: kill_on_drop reaps the clone, workspace drop reclaims disk
            Err(_) => return Err(SourceError::Timeout(self.fetch_timeout.as_secs())),
            Ok(Err(e)) => {
                return Err(SourceError::Unreachable(format!("git clone failed: {}", e)))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_git_failure(stderr.trim()));
        }

        debug!(
            source = %self.descriptor.name,
            url = %self.descriptor.locator,
            branch,
            "fetched remote source"
        );
        Ok(Snapshot::Remote { workspace })
    }
}

/// Map git's stderr onto the source error taxonomy.
fn classify_git_failure(stderr: &str) -> SourceError {
    let lower = stderr.to_lowercase();
    let auth_markers = [
        "authentication failed",
        "could not read username",
        "could not read password",
        "permission denied",
        "access denied",
    ];
    if auth_markers.iter().any(|m| lower.contains(m)) {
        SourceError::AuthFailure(stderr.to_string())
    } else {
        SourceError::Unreachable(format!("git clone failed: {}", stderr))
    }
}

/// Build the ordered resolver list from the config, one per `[[sources]]`
/// entry. Order is preserved; it drives both the fingerprint and collision
/// precedence.
pub fn resolvers_from_config(config: &Config) -> Vec<Arc<dyn SourceResolver>> {
    let fetch_timeout = Duration::from_secs(config.rebuild.fetch_timeout_secs);
    config
        .descriptors()
        .into_iter()
        .map(|descriptor| -> Arc<dyn SourceResolver> {
            match descriptor.kind {
                crate::models::SourceKind::Local => Arc::new(LocalSource::new(descriptor)),
                crate::models::SourceKind::Remote => {
                    Arc::new(RemoteSource::new(descriptor, fetch_timeout))
                }
            }
        })
        .collect()
}
