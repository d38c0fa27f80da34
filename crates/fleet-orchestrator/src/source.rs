//! Topology sources: where fresh snapshots come from.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use fleet_model::{TopologyDocument, TopologySnapshot};

/// Builds a complete topology snapshot from the authoritative source.
///
/// The model cache never calls `build` concurrently with itself, but one
/// source may be shared by several caches.
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn build(&self) -> anyhow::Result<TopologySnapshot>;
}

/// Reads a JSON topology document from disk on every build.
#[derive(Debug, Clone)]
pub struct FileTopologySource {
    path: PathBuf,
}

impl FileTopologySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TopologySource for FileTopologySource {
    async fn build(&self) -> anyhow::Result<TopologySnapshot> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading topology from {}", self.path.display()))?;
        let snapshot = TopologyDocument::from_json(&json)
            .and_then(TopologyDocument::into_snapshot)
            .with_context(|| format!("invalid topology in {}", self.path.display()))?;
        debug!(
            path = %self.path.display(),
            applications = snapshot.application_count(),
            hosts = snapshot.host_count(),
            "topology loaded"
        );
        Ok(snapshot)
    }
}

/// Serves a fixed snapshot that can be swapped at runtime.
#[derive(Debug, Default)]
pub struct StaticTopologySource {
    snapshot: Mutex<Arc<TopologySnapshot>>,
}

impl StaticTopologySource {
    pub fn new(snapshot: TopologySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Arc::new(snapshot)),
        }
    }

    /// Replace the snapshot returned by later builds.
    pub fn replace(&self, snapshot: TopologySnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }
}

#[async_trait]
impl TopologySource for StaticTopologySource {
    async fn build(&self) -> anyhow::Result<TopologySnapshot> {
        let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(TopologySnapshot::clone(&snapshot))
    }
}
