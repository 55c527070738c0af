use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tabula_common::TableId;

use super::graph::DependencyGraph;
use crate::error::EngineError;
use crate::traits::FieldMetadataStore;

/// Versioned, explicitly owned dependency graph cache.
///
/// The cached graph is reused while the metadata version it was built from
/// is current and it covers the requested tables. Rebuilding takes the write
/// lock, so in-flight readers keep their `Arc` while new passes wait.
#[derive(Debug, Default)]
pub struct GraphCache {
    slot: RwLock<Option<Arc<DependencyGraph>>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<M>(&self, metadata: &M, tables: &[TableId]) -> Result<Arc<DependencyGraph>, EngineError>
    where
        M: FieldMetadataStore + ?Sized,
    {
        let version = metadata.version();
        if let Some(g) = self.fresh(version, tables) {
            return Ok(g);
        }

        let mut slot = self.slot.write();
        if let Some(g) = slot.as_ref() {
            if g.version() == version && tables.iter().all(|t| g.contains_table(t)) {
                return Ok(Arc::clone(g));
            }
        }
        // Keep covering what the previous graph covered.
        let mut roots: Vec<TableId> = tables.to_vec();
        if let Some(g) = slot.as_ref() {
            let known: FxHashSet<&TableId> = roots.iter().collect();
            let mut extra: Vec<TableId> = g
                .table_ids()
                .filter(|t| !known.contains(t))
                .cloned()
                .collect();
            extra.sort();
            roots.extend(extra);
        }
        let _span = tracing::debug_span!("graph_rebuild", version, roots = roots.len()).entered();
        let graph = Arc::new(DependencyGraph::build(metadata, &roots)?);
        *slot = Some(Arc::clone(&graph));
        Ok(graph)
    }

    fn fresh(&self, version: u64, tables: &[TableId]) -> Option<Arc<DependencyGraph>> {
        let slot = self.slot.read();
        let g = slot.as_ref()?;
        (g.version() == version && tables.iter().all(|t| g.contains_table(t))).then(|| Arc::clone(g))
    }

    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }

    pub fn cached_version(&self) -> Option<u64> {
        self.slot.read().as_ref().map(|g| g.version())
    }
}
