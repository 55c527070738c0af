//! Tabula propagation engine
//!
//! Keeps computed fields and both sides of link fields consistent after
//! record writes, one change-set per pass.

pub mod buffer;
pub mod cache;
pub mod change;
pub mod coordinator;
pub mod eval;
pub mod graph;
pub mod link_sync;
pub mod locks;
pub mod planner;
pub mod scheduler;
pub mod vertex;

#[cfg(test)]
mod tests;

pub use buffer::{CellKey, PassView};
pub use cache::GraphCache;
pub use change::{CellChange, ChangeSet, PropagationUnit};
pub use coordinator::{PassReport, PassState, PropagationEngine};
pub use graph::DependencyGraph;
pub use link_sync::LinkSynchronizer;
pub use locks::{RecordKey, RecordLockGuard, RecordLockManager};
pub use planner::{Plan, Planner};
pub use scheduler::{Layer, Scheduler};
pub use vertex::{Edge, FieldCaps, FieldNode, FieldNodeId, RecordMapping};

use std::sync::Arc;
use std::time::Duration;

use crate::traits::{FieldMetadataStore, RecordStore};

/// Configuration for the propagation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a pass waits for its records before giving up with a
    /// retryable timeout.
    pub lock_timeout: Duration,
    /// Upper bound on (field, record) units in one pass.
    pub max_units_per_pass: Option<usize>,
    /// Run independent change-sets of `apply_many` on a thread pool.
    pub enable_parallel: bool,
    pub max_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            max_units_per_pass: None,
            enable_parallel: true,
            max_threads: None,
        }
    }
}

/// Construct a new engine over the given stores and configuration
pub fn new_engine<M, S>(metadata: Arc<M>, store: Arc<S>, config: EngineConfig) -> PropagationEngine<M, S>
where
    M: FieldMetadataStore,
    S: RecordStore,
{
    PropagationEngine::new(metadata, store, config)
}
