use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, info};

use branchline_core::{BranchGraph, GraphError};

use crate::document::FlowDocument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not read `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not write `{path}`: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("could not parse `{path}`: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("suggestion log failure: {0}")]
    Log(String),
}

/// Loads and persists the branches document. Loading always produces a
/// validated [`BranchGraph`]; a document that fails validation never becomes a
/// snapshot.
#[derive(Clone, Debug)]
pub struct FlowStore {
    path: PathBuf,
}

impl FlowStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<BranchGraph, StoreError> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|source| StoreError::Read { path: self.path.clone(), source })?;
        let document: FlowDocument = serde_json::from_str(&raw)
            .map_err(|source| StoreError::Parse { path: self.path.clone(), source })?;
        let graph = BranchGraph::from_parts(
            document.metadata,
            document.branches,
            document.interruptions,
        )?;
        debug!(path = %self.path.display(), branches = graph.len(), "graph loaded");
        Ok(graph)
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// document.
    pub fn save(&self, graph: &BranchGraph) -> Result<(), StoreError> {
        let (metadata, branches, interruptions) = graph.to_parts();
        let document = FlowDocument { metadata, branches, interruptions };
        let rendered = serde_json::to_string_pretty(&document)
            .map_err(|source| StoreError::Parse { path: self.path.clone(), source })?;

        let tmp = temp_sibling(&self.path);
        fs::write(&tmp, rendered)
            .map_err(|source| StoreError::Write { path: tmp.clone(), source })?;
        fs::rename(&tmp, &self.path)
            .map_err(|source| StoreError::Write { path: self.path.clone(), source })?;
        info!(path = %self.path.display(), branches = graph.len(), "graph persisted");
        Ok(())
    }
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// The live snapshot shared across conversations. Readers clone the `Arc` and
/// keep it for the whole turn; the applier's commit is the only writer.
#[derive(Clone)]
pub struct SharedGraph {
    inner: Arc<RwLock<Arc<BranchGraph>>>,
}

impl SharedGraph {
    pub fn new(graph: BranchGraph) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(graph))) }
    }

    pub fn snapshot(&self) -> Arc<BranchGraph> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            // A poisoned lock still holds a complete snapshot.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn swap(&self, graph: BranchGraph) {
        let next = Arc::new(graph);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
