use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::{CellValue, FieldDef, FieldId, RecordId, TableId};

use super::EngineConfig;
use super::buffer::{CellKey, PassView};
use super::cache::GraphCache;
use super::change::{CellChange, ChangeSet, PropagationUnit};
use super::eval::compute_field;
use super::graph::DependencyGraph;
use super::link_sync::{LinkSynchronizer, shape};
use super::locks::{RecordKey, RecordLockGuard, RecordLockManager};
use super::planner::{Plan, Planner};
use super::vertex::{FieldNode, FieldNodeId, RecordMapping};
use crate::error::EngineError;
use crate::interpreter::settle;
use crate::traits::{
    CellWrite, ChangeSink, FieldMetadataStore, RecordStore, RecordUpdate, SetRecordOp,
};

/// Lifecycle of one change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Received,
    Planned,
    Executing,
    Committed,
    Failed,
}

/// Outcome of a committed pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub state: PassState,
    /// Units executed, in execution order.
    pub units: Vec<PropagationUnit>,
    /// Committed writes the engine made beyond the client's own.
    pub derived: Vec<CellChange>,
    /// Record updates handed to the sink.
    pub notifications: usize,
}

/// A validated client write.
#[derive(Debug, Clone)]
struct Original {
    node: FieldNodeId,
    key: CellKey,
    client_old: CellValue,
    value: CellValue,
}

/// Groups record ops per (table, record), in first-write order.
#[derive(Default)]
struct UpdateBuilder {
    grouped: Vec<RecordUpdate>,
    slot_of: FxHashMap<(TableId, RecordId), usize>,
}

impl UpdateBuilder {
    fn push(&mut self, key: CellKey, old: CellValue, new: CellValue) {
        let grouped = &mut self.grouped;
        let slot = *self
            .slot_of
            .entry((key.table.clone(), key.record.clone()))
            .or_insert_with(|| {
                grouped.push(RecordUpdate {
                    table: key.table,
                    record: key.record,
                    ops: Vec::new(),
                });
                grouped.len() - 1
            });
        self.grouped[slot].ops.push(SetRecordOp {
            field_id: key.field,
            old_cell_value: old,
            new_cell_value: new,
        });
    }

    fn finish(self) -> Vec<RecordUpdate> {
        self.grouped
    }
}

pub struct PropagationEngine<M, S> {
    metadata: Arc<M>,
    store: Arc<S>,
    pub config: EngineConfig,
    graphs: GraphCache,
    locks: RecordLockManager,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
}

impl<M, S> PropagationEngine<M, S>
where
    M: FieldMetadataStore,
    S: RecordStore,
{
    pub fn new(metadata: Arc<M>, store: Arc<S>, config: EngineConfig) -> Self {
        let thread_pool = if config.enable_parallel {
            let mut builder = ThreadPoolBuilder::new();
            if let Some(max_threads) = config.max_threads {
                builder = builder.num_threads(max_threads);
            }
            match builder.build() {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    tracing::warn!(error = %e, "thread pool unavailable, lanes run sequentially");
                    None
                }
            }
        } else {
            None
        };

        Self {
            metadata,
            store,
            config,
            graphs: GraphCache::new(),
            locks: RecordLockManager::new(),
            thread_pool,
        }
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lock_manager(&self) -> &RecordLockManager {
        &self.locks
    }

    pub fn graph_cache(&self) -> &GraphCache {
        &self.graphs
    }

    /// Current dependency graph covering `tables`.
    pub fn graph(&self, tables: &[TableId]) -> Result<Arc<DependencyGraph>, EngineError> {
        self.graphs.get(&*self.metadata, tables)
    }

    /* ─────────────────────────── Passes ─────────────────────────────── */

    /// Apply one change-set and everything derived from it as a single pass.
    pub fn apply(
        &self,
        change_set: &ChangeSet,
        sink: &dyn ChangeSink,
    ) -> Result<PassReport, EngineError> {
        let _span = tracing::info_span!("propagation_pass", changes = change_set.len()).entered();
        tracing::debug!(state = ?PassState::Received);
        if change_set.is_empty() {
            return Ok(PassReport {
                state: PassState::Committed,
                units: Vec::new(),
                derived: Vec::new(),
                notifications: 0,
            });
        }

        let tables = change_set.tables();
        let graph = self.graph(&tables)?;
        let originals = self.validate(&graph, change_set)?;

        let mut seeds: Vec<FieldNodeId> = originals.iter().map(|o| o.node).collect();
        seeds.sort_unstable();
        seeds.dedup();
        let mut plan = Planner::plan(&graph, &seeds, self.config.max_units_per_pass)?;
        tracing::debug!(state = ?PassState::Planned, steps = plan.order().len());

        let closure = graph.closure_tables(&tables);
        let _guard = self.lock_component(&graph, &closure, &originals)?;
        tracing::debug!(state = ?PassState::Executing);

        let mut view = PassView::new(&*self.store);
        let outcome = self
            .execute(&graph, &mut view, &mut plan, &originals)
            .and_then(|units| self.commit(&view, &originals, units, sink));
        match outcome {
            Ok(report) => {
                tracing::debug!(
                    state = ?report.state,
                    units = report.units.len(),
                    derived = report.derived.len()
                );
                Ok(report)
            }
            Err(e) => {
                self.fail(&graph, &originals, &e);
                Err(e)
            }
        }
    }

    /// Apply many change-sets. Change-sets whose table closures overlap share a
    /// lane and run in the given order; lanes run in parallel on the engine's
    /// thread pool. Results come back in input order.
    pub fn apply_many(
        &self,
        change_sets: &[ChangeSet],
        sink: &dyn ChangeSink,
    ) -> Vec<Result<PassReport, EngineError>> {
        let lanes = self.lanes(change_sets);
        tracing::debug!(change_sets = change_sets.len(), lanes = lanes.len(), "apply_many");

        let run_lane = |lane: &Vec<usize>| {
            lane.iter()
                .map(|&i| (i, self.apply(&change_sets[i], sink)))
                .collect::<Vec<_>>()
        };
        let results: Vec<(usize, Result<PassReport, EngineError>)> = match &self.thread_pool {
            Some(pool) if lanes.len() > 1 => {
                pool.install(|| lanes.par_iter().flat_map_iter(run_lane).collect())
            }
            _ => lanes.iter().flat_map(run_lane).collect(),
        };

        let mut slots: Vec<Option<Result<PassReport, EngineError>>> =
            (0..change_sets.len()).map(|_| None).collect();
        for (i, r) in results {
            slots[i] = Some(r);
        }
        slots.into_iter().flatten().collect()
    }

    /// Recompute `field` for every record of `table`. For a link field the
    /// symmetric side is rebuilt from it first.
    pub fn backfill(
        &self,
        table: &TableId,
        field: &FieldId,
        sink: &dyn ChangeSink,
    ) -> Result<PassReport, EngineError> {
        let _span = tracing::info_span!("backfill", %table, %field).entered();
        let graph = self.graph(std::slice::from_ref(table))?;
        let id = graph
            .resolve(table, field)
            .ok_or_else(|| EngineError::MissingField {
                table: table.clone(),
                field: field.clone(),
            })?;
        let node = graph.node(id);

        let mut seeds = vec![id];
        seeds.extend(node.symmetric);
        let mut plan = Planner::plan(&graph, &seeds, self.config.max_units_per_pass)?;

        let closure = graph.closure_tables(std::slice::from_ref(table));
        let mut keys: FxHashSet<RecordKey> = FxHashSet::default();
        for t in &closure {
            keys.extend(self.store.record_ids(t)?.into_iter().map(|r| (t.clone(), r)));
        }
        let _guard = self
            .locks
            .acquire(keys, Instant::now() + self.config.lock_timeout)?;

        let mut view = PassView::new(&*self.store);
        let units = self.backfill_units(&graph, &mut view, &mut plan, id)?;
        self.commit(&view, &[], units, sink)
    }

    fn backfill_units(
        &self,
        graph: &DependencyGraph,
        view: &mut PassView<'_>,
        plan: &mut Plan,
        id: FieldNodeId,
    ) -> Result<Vec<PropagationUnit>, EngineError> {
        let node = graph.node(id);
        let own = self.store.record_ids(&node.table)?;
        let sync = LinkSynchronizer::new(graph);
        if node.is_link() {
            let foreign = match node.symmetric {
                Some(sym) => self.store.record_ids(&graph.node(sym).table)?,
                None => Vec::new(),
            };
            sync.resync_link_field(view, plan, id, &own, &foreign)?;
        } else {
            for r in own {
                plan.schedule(id, r)?;
            }
        }
        self.run_steps(graph, view, plan, &sync)
    }

    /// Definition-time check for a field about to be created or altered.
    /// The field is checked as if it were already part of `table`, together
    /// with the symmetric counterpart a new link would get.
    pub fn validate_new_field(&self, table: &TableId, field: &FieldDef) -> Result<(), EngineError> {
        let _span = tracing::info_span!("validate_new_field", %table, field = %field.id).entered();
        let mut roots = vec![table.clone()];
        if let Some(opts) = field.link_options() {
            if self.metadata.fields_for_table(&opts.foreign_table_id).is_err() {
                return Err(EngineError::InvalidFieldDefinition {
                    field: field.id.clone(),
                    reason: format!("foreign table {} does not exist", opts.foreign_table_id),
                });
            }
            roots.push(opts.foreign_table_id.clone());
        }
        let overlay = Overlay {
            inner: &*self.metadata,
            table,
            field,
        };
        let graph = DependencyGraph::build(&overlay, &roots)?;
        graph.validate_field(table, &field.id)
    }

    /* ─────────────────────────── Stages ─────────────────────────────── */

    fn validate(
        &self,
        graph: &DependencyGraph,
        change_set: &ChangeSet,
    ) -> Result<Vec<Original>, EngineError> {
        let mut out = Vec::with_capacity(change_set.len());
        for c in change_set.changes() {
            let id = graph
                .resolve(&c.table, &c.field)
                .ok_or_else(|| EngineError::MissingField {
                    table: c.table.clone(),
                    field: c.field.clone(),
                })?;
            let node = graph.node(id);
            if node.is_computed() {
                return Err(EngineError::ReadOnlyField {
                    table: c.table.clone(),
                    field: c.field.clone(),
                });
            }
            self.store.cell_value(&c.table, &c.record, &c.field)?;
            out.push(Original {
                node: id,
                key: CellKey::new(&c.table, &c.record, &c.field),
                client_old: c.old_value.clone(),
                value: normalize(node, c)?,
            });
        }
        Ok(out)
    }

    fn execute(
        &self,
        graph: &DependencyGraph,
        view: &mut PassView<'_>,
        plan: &mut Plan,
        originals: &[Original],
    ) -> Result<Vec<PropagationUnit>, EngineError> {
        let sync = LinkSynchronizer::new(graph);
        {
            let _span = tracing::debug_span!("link_sync").entered();
            for o in originals {
                let old = view.get(&o.key)?;
                if o.client_old != old && !o.client_old.is_empty() {
                    tracing::debug!(cell = ?o.key, "client old value is stale; using stored value");
                }
                view.set(o.key.clone(), o.value.clone());
                if graph.node(o.node).is_link() {
                    sync.apply_write(view, plan, o.node, &o.key.record, &old, &o.value)?;
                }
                plan.schedule(o.node, o.key.record.clone())?;
            }
        }
        self.run_steps(graph, view, plan, &sync)
    }

    fn run_steps(
        &self,
        graph: &DependencyGraph,
        view: &mut PassView<'_>,
        plan: &mut Plan,
        sync: &LinkSynchronizer<'_>,
    ) -> Result<Vec<PropagationUnit>, EngineError> {
        let mut units = Vec::new();
        while let Some((id, records)) = plan.next_step() {
            let node = graph.node(id);
            view.prefetch(&node.table, &records)?;
            for record in records {
                let key = CellKey::new(&node.table, &record, &node.def.id);
                if node.is_link() {
                    sync.retitle(view, id, &record)?;
                } else if node.is_computed() {
                    let value = compute_field(graph, view, id, &record)?;
                    if view.get(&key)? != value {
                        view.set(key.clone(), value);
                    }
                }
                let changed = view.get(&key)? != view.base(&key)?;
                units.push(PropagationUnit {
                    table: key.table.clone(),
                    record: key.record.clone(),
                    field: key.field.clone(),
                });
                if changed {
                    propagate(graph, view, plan, node, &record)?;
                }
            }
        }
        Ok(units)
    }

    fn commit(
        &self,
        view: &PassView<'_>,
        originals: &[Original],
        units: Vec<PropagationUnit>,
        sink: &dyn ChangeSink,
    ) -> Result<PassReport, EngineError> {
        let _span = tracing::debug_span!("commit").entered();
        let changes = view.changes()?;
        let client: FxHashMap<&CellKey, &CellValue> =
            originals.iter().map(|o| (&o.key, &o.value)).collect();

        let writes: Vec<CellWrite> = changes
            .iter()
            .map(|(key, _, new)| CellWrite {
                table: key.table.clone(),
                record: key.record.clone(),
                field: key.field.clone(),
                value: new.clone(),
            })
            .collect();
        if !writes.is_empty() {
            let result = self.store.write_cell_values(&writes)?;
            tracing::debug!(written = result.written, "committed");
        }

        let mut derived = Vec::new();
        let mut updates = UpdateBuilder::default();
        let mut seen: FxHashSet<CellKey> = FxHashSet::default();
        for (key, stored, new) in changes {
            let known = client.get(&key).map(|v| (*v).clone());
            if known.is_none() {
                derived.push(CellChange {
                    table: key.table.clone(),
                    record: key.record.clone(),
                    field: key.field.clone(),
                    old_value: stored.clone(),
                    new_value: new.clone(),
                });
            }
            let known = known.unwrap_or(stored);
            seen.insert(key.clone());
            if known != new {
                updates.push(key, known, new);
            }
        }
        // A client write undone within the pass leaves the stored value in
        // place; the writer still has to hear about it.
        for o in originals {
            if !seen.insert(o.key.clone()) {
                continue;
            }
            let sent = client.get(&o.key).map(|v| (*v).clone()).unwrap_or(CellValue::Empty);
            let committed = view.get(&o.key)?;
            if sent != committed {
                updates.push(o.key.clone(), sent, committed);
            }
        }
        let grouped = updates.finish();

        let notifications = grouped.len();
        for update in grouped {
            sink.publish(update);
        }
        Ok(PassReport {
            state: PassState::Committed,
            units,
            derived,
            notifications,
        })
    }

    /// Keep the client's own writes after a failed pass. Link writes are
    /// dropped with the rest: without their symmetric side they would leave
    /// the relationship half applied.
    fn fail(&self, graph: &DependencyGraph, originals: &[Original], error: &EngineError) {
        tracing::warn!(state = ?PassState::Failed, %error, "propagation pass failed");
        let mut last: FxHashMap<&CellKey, &CellValue> = FxHashMap::default();
        let mut order: Vec<&CellKey> = Vec::new();
        for o in originals {
            if graph.node(o.node).is_link() {
                continue;
            }
            if last.insert(&o.key, &o.value).is_none() {
                order.push(&o.key);
            }
        }
        let writes: Vec<CellWrite> = order
            .into_iter()
            .map(|key| CellWrite {
                table: key.table.clone(),
                record: key.record.clone(),
                field: key.field.clone(),
                value: last[key].clone(),
            })
            .collect();
        if writes.is_empty() {
            return;
        }
        if let Err(e) = self.store.write_cell_values(&writes) {
            tracing::warn!(error = %e, "client writes of failed pass could not be kept");
        }
    }

    /* ─────────────────────────── Locking ────────────────────────────── */

    /// Lock the records the pass can reach. The component is recomputed once
    /// held; if it grew meanwhile the locks are retaken with the larger set.
    fn lock_component(
        &self,
        graph: &DependencyGraph,
        closure: &FxHashSet<TableId>,
        originals: &[Original],
    ) -> Result<RecordLockGuard<'_>, EngineError> {
        let started = Instant::now();
        let deadline = started + self.config.lock_timeout;
        let mut wanted = self.record_component(graph, closure, originals)?;
        loop {
            let guard = self.locks.acquire(wanted.clone(), deadline)?;
            let now = self.record_component(graph, closure, originals)?;
            if guard.covers(&now) {
                tracing::debug!(records = guard.keys().len(), "records locked");
                return Ok(guard);
            }
            drop(guard);
            wanted.extend(now);
            if Instant::now() >= deadline {
                return Err(EngineError::ResourceTimeout {
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// Records connected to the written records through link cells of the
    /// pass's tables, including links the change-set is about to add.
    fn record_component(
        &self,
        graph: &DependencyGraph,
        closure: &FxHashSet<TableId>,
        originals: &[Original],
    ) -> Result<FxHashSet<RecordKey>, EngineError> {
        let links_of = |table: &TableId| -> Vec<&FieldNode> {
            graph
                .table_fields(table)
                .iter()
                .map(|id| graph.node(*id))
                .filter(|n| {
                    n.def
                        .link_options()
                        .is_some_and(|o| closure.contains(&o.foreign_table_id))
                })
                .collect()
        };

        let mut out: FxHashSet<RecordKey> = FxHashSet::default();
        let mut queue: VecDeque<RecordKey> = VecDeque::new();
        for o in originals {
            queue.push_back((o.key.table.clone(), o.key.record.clone()));
            if let Some(opts) = graph.node(o.node).def.link_options() {
                for id in o.value.link_ids() {
                    queue.push_back((opts.foreign_table_id.clone(), id));
                }
            }
        }

        while let Some(key) = queue.pop_front() {
            if out.contains(&key) {
                continue;
            }
            let links = links_of(&key.0);
            if !links.is_empty() {
                for snap in self
                    .store
                    .batch_get_records(&key.0, std::slice::from_ref(&key.1))?
                {
                    for link in &links {
                        let Some(opts) = link.def.link_options() else {
                            continue;
                        };
                        for id in snap.value(&link.def.id).link_ids() {
                            let next = (opts.foreign_table_id.clone(), id);
                            if !out.contains(&next) {
                                queue.push_back(next);
                            }
                        }
                    }
                }
            }
            out.insert(key);
        }
        Ok(out)
    }

    /// Group change-sets whose table closures overlap. Lanes are ordered by
    /// their first change-set; members keep input order.
    pub(crate) fn lanes(&self, change_sets: &[ChangeSet]) -> Vec<Vec<usize>> {
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        let mut parent: Vec<usize> = (0..change_sets.len()).collect();
        let mut owner: FxHashMap<TableId, usize> = FxHashMap::default();
        for (i, cs) in change_sets.iter().enumerate() {
            let tables = cs.tables();
            let closure = match self.graph(&tables) {
                Ok(g) => g.closure_tables(&tables),
                Err(_) => tables.into_iter().collect(),
            };
            for t in closure {
                match owner.get(&t) {
                    Some(&j) => {
                        let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                        if a != b {
                            parent[a.max(b)] = a.min(b);
                        }
                    }
                    None => {
                        owner.insert(t, i);
                    }
                }
            }
        }

        let mut lanes: Vec<Vec<usize>> = Vec::new();
        let mut lane_of: FxHashMap<usize, usize> = FxHashMap::default();
        for i in 0..change_sets.len() {
            let root = find(&mut parent, i);
            let lane = *lane_of.entry(root).or_insert_with(|| {
                lanes.push(Vec::new());
                lanes.len() - 1
            });
            lanes[lane].push(i);
        }
        lanes
    }
}

/// Schedule the dependents of a changed (field, record).
fn propagate(
    graph: &DependencyGraph,
    view: &PassView<'_>,
    plan: &mut Plan,
    node: &FieldNode,
    record: &RecordId,
) -> Result<(), EngineError> {
    for edge in &node.dependents {
        match edge.mapping {
            RecordMapping::SameRecord => {
                plan.schedule(edge.node, record.clone())?;
            }
            RecordMapping::ViaLink {
                symmetric_field, ..
            } => {
                let sym = graph.node(symmetric_field);
                let linked = view
                    .get(&CellKey::new(&sym.table, record, &sym.def.id))?
                    .link_ids();
                for r in linked {
                    plan.schedule(edge.node, r)?;
                }
            }
        }
    }
    Ok(())
}

/// Shape a client value for its field. Link values are de-duplicated and
/// must fit the field's cardinality.
fn normalize(node: &FieldNode, change: &CellChange) -> Result<CellValue, EngineError> {
    let invalid = |reason: String| EngineError::InvalidCellValue {
        table: change.table.clone(),
        record: change.record.clone(),
        field: change.field.clone(),
        reason,
    };
    let value = &change.new_value;
    if !node.is_link() {
        if matches!(value, CellValue::Link(_) | CellValue::Links(_)) {
            return Err(invalid("link value written to a non-link field".to_string()));
        }
        return Ok(settle(value.clone()));
    }
    match value {
        CellValue::Empty => Ok(CellValue::Empty),
        CellValue::Link(_) | CellValue::Links(_) => {
            let items = CellValue::links(value.link_items()).link_items();
            if !node.is_plural() && items.len() > 1 {
                return Err(invalid(format!(
                    "a single-record link accepts one record, got {}",
                    items.len()
                )));
            }
            Ok(shape(node.is_plural(), items))
        }
        other => Err(invalid(format!(
            "expected a link value, got '{}'",
            other.display_text()
        ))),
    }
}

/// Metadata with one field definition inserted or replaced, plus the
/// symmetric counterpart of a new link when it does not exist yet.
struct Overlay<'a, M: ?Sized> {
    inner: &'a M,
    table: &'a TableId,
    field: &'a FieldDef,
}

impl<M> FieldMetadataStore for Overlay<'_, M>
where
    M: FieldMetadataStore + ?Sized,
{
    fn fields_for_table(&self, table: &TableId) -> Result<Vec<FieldDef>, EngineError> {
        let mut fields = self.inner.fields_for_table(table)?;
        if table == self.table {
            match fields.iter_mut().find(|f| f.id == self.field.id) {
                Some(slot) => *slot = self.field.clone(),
                None => fields.push(self.field.clone()),
            }
        }
        if let Some(opts) = self.field.link_options() {
            let own_primary = self
                .inner
                .fields_for_table(self.table)?
                .first()
                .map(|f| f.id.clone())
                .unwrap_or_else(|| self.field.id.clone());
            if table == &opts.foreign_table_id
                && !fields.iter().any(|f| f.id == opts.symmetric_field_id)
            {
                if let Some(counterpart) =
                    self.field
                        .symmetric_counterpart(self.table, &own_primary, self.table.as_str())
                {
                    fields.push(counterpart);
                }
            }
        }
        Ok(fields)
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }
}
