use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tabula_common::{FieldDef, FieldId, FieldKind, TableId};
use tabula_parse::parse;

use super::scheduler::Scheduler;
use super::vertex::{Edge, FieldCaps, FieldNode, FieldNodeId, RecordMapping};
use crate::error::EngineError;
use crate::traits::FieldMetadataStore;

/// Field-level dependency graph over every table reachable from a set of
/// roots through link fields.
///
/// Nodes live in an arena and refer to each other by [`FieldNodeId`]. Edges
/// point from a dependent to the field it reads and carry the
/// [`RecordMapping`] used to fan a record change out to dependent records.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<FieldNode>,
    index: FxHashMap<(TableId, FieldId), FieldNodeId>,
    tables: FxHashMap<TableId, Vec<FieldNodeId>>,
    /// Metadata version the graph was built from.
    version: u64,
}

impl DependencyGraph {
    /// Load every table reachable from `roots` and build the graph.
    pub fn build<M>(metadata: &M, roots: &[TableId]) -> Result<Self, EngineError>
    where
        M: FieldMetadataStore + ?Sized,
    {
        let version = metadata.version();
        let mut seen: FxHashSet<TableId> = FxHashSet::default();
        let mut queue: VecDeque<TableId> = roots.iter().cloned().collect();
        let mut tables = Vec::new();

        while let Some(table) = queue.pop_front() {
            if !seen.insert(table.clone()) {
                continue;
            }
            let fields = metadata.fields_for_table(&table)?;
            for f in &fields {
                if let Some(opts) = f.link_options() {
                    if !seen.contains(&opts.foreign_table_id) {
                        queue.push_back(opts.foreign_table_id.clone());
                    }
                }
            }
            tables.push((table, fields));
        }

        Ok(Self::from_tables(tables, version))
    }

    /// Build from already loaded definitions. Tables keep their field order;
    /// the first field of each is its primary field.
    pub fn from_tables(tables: Vec<(TableId, Vec<FieldDef>)>, version: u64) -> Self {
        let mut g = DependencyGraph {
            version,
            ..Default::default()
        };

        for (table, fields) in tables {
            let mut ids = Vec::with_capacity(fields.len());
            for (pos, def) in fields.into_iter().enumerate() {
                let id = FieldNodeId::new(g.nodes.len() as u32);
                let mut caps = FieldCaps::empty();
                if def.is_computed() {
                    caps |= FieldCaps::COMPUTED;
                }
                if let Some(opts) = def.link_options() {
                    caps |= FieldCaps::LINK;
                    if opts.relationship.is_plural() {
                        caps |= FieldCaps::PLURAL;
                    }
                }
                if pos == 0 {
                    caps |= FieldCaps::PRIMARY;
                }
                let (ast, parse_error) = match &def.kind {
                    FieldKind::Formula(opts) => match parse(&opts.expression) {
                        Ok(ast) => (Some(ast), None),
                        Err(e) => (None, Some(e)),
                    },
                    _ => (None, None),
                };
                g.index.insert((table.clone(), def.id.clone()), id);
                g.nodes.push(FieldNode {
                    table: table.clone(),
                    def,
                    caps,
                    ast,
                    parse_error,
                    dependencies: SmallVec::new(),
                    dependents: SmallVec::new(),
                    symmetric: None,
                });
                ids.push(id);
            }
            g.tables.insert(table, ids);
        }

        for i in 0..g.nodes.len() {
            let symmetric = g.nodes[i]
                .def
                .link_options()
                .and_then(|o| g.resolve(&o.foreign_table_id, &o.symmetric_field_id));
            g.nodes[i].symmetric = symmetric;
        }

        for i in 0..g.nodes.len() {
            let id = FieldNodeId::new(i as u32);
            for (dep, mapping) in g.collect_edges(id) {
                g.add_edge(id, dep, mapping);
            }
        }

        g
    }

    fn collect_edges(&self, id: FieldNodeId) -> Vec<(FieldNodeId, RecordMapping)> {
        let node = self.node(id);
        let mut out = Vec::new();
        match &node.def.kind {
            FieldKind::Formula(_) => {
                let refs = node
                    .ast
                    .as_ref()
                    .map(|ast| ast.field_references())
                    .unwrap_or_default();
                for field in refs {
                    let Some(dep) = self.resolve(&node.table, &field) else {
                        continue;
                    };
                    out.push((dep, RecordMapping::SameRecord));
                    // A referenced link is read as its titles.
                    if let Some(edge) = self.title_edge(dep) {
                        out.push(edge);
                    }
                }
            }
            FieldKind::Lookup(opts) => {
                out.extend(self.lookup_edges(node, &opts.link_field_id, &opts.lookup_field_id));
            }
            FieldKind::Rollup(opts) => {
                out.extend(self.lookup_edges(node, &opts.link_field_id, &opts.lookup_field_id));
            }
            FieldKind::Link(_) => {
                out.extend(self.title_edge(id));
            }
            _ => {}
        }
        out
    }

    /// Standing dependency of a link on the foreign field cached as its title.
    fn title_edge(&self, link: FieldNodeId) -> Option<(FieldNodeId, RecordMapping)> {
        let node = self.node(link);
        let opts = node.def.link_options()?;
        let symmetric = node.symmetric?;
        let title = self.resolve(&opts.foreign_table_id, &opts.lookup_field_id)?;
        Some((
            title,
            RecordMapping::ViaLink {
                link_field: link,
                symmetric_field: symmetric,
            },
        ))
    }

    fn lookup_edges(
        &self,
        node: &FieldNode,
        link_field: &FieldId,
        lookup_field: &FieldId,
    ) -> Vec<(FieldNodeId, RecordMapping)> {
        let mut out = Vec::new();
        let Some(link) = self.resolve(&node.table, link_field) else {
            return out;
        };
        out.push((link, RecordMapping::SameRecord));
        let link_node = self.node(link);
        if let (Some(opts), Some(symmetric)) = (link_node.def.link_options(), link_node.symmetric)
        {
            if let Some(foreign) = self.resolve(&opts.foreign_table_id, lookup_field) {
                out.push((
                    foreign,
                    RecordMapping::ViaLink {
                        link_field: link,
                        symmetric_field: symmetric,
                    },
                ));
            }
        }
        out
    }

    fn add_edge(&mut self, dependent: FieldNodeId, dependency: FieldNodeId, mapping: RecordMapping) {
        let forward = Edge {
            node: dependency,
            mapping,
        };
        if self.nodes[dependent.as_index()].dependencies.contains(&forward) {
            return;
        }
        self.nodes[dependent.as_index()].dependencies.push(forward);
        self.nodes[dependency.as_index()].dependents.push(Edge {
            node: dependent,
            mapping,
        });
    }

    /* ───────────────────────────── Queries ─────────────────────────── */

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[FieldNode] {
        &self.nodes
    }

    pub fn node(&self, id: FieldNodeId) -> &FieldNode {
        &self.nodes[id.as_index()]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = FieldNodeId> + '_ {
        (0..self.nodes.len() as u32).map(FieldNodeId::new)
    }

    pub fn resolve(&self, table: &TableId, field: &FieldId) -> Option<FieldNodeId> {
        self.index.get(&(table.clone(), field.clone())).copied()
    }

    pub fn contains_table(&self, table: &TableId) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_ids(&self) -> impl Iterator<Item = &TableId> {
        self.tables.keys()
    }

    /// Fields of a table in definition order.
    pub fn table_fields(&self, table: &TableId) -> &[FieldNodeId] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tables whose fields can be touched by a pass starting from `roots`:
    /// the roots plus every table holding a transitive dependent or a
    /// symmetric link of a visited field.
    pub fn closure_tables(&self, roots: &[TableId]) -> FxHashSet<TableId> {
        let mut seen_nodes: FxHashSet<FieldNodeId> = FxHashSet::default();
        let mut queue: VecDeque<FieldNodeId> = roots
            .iter()
            .flat_map(|t| self.table_fields(t).iter().copied())
            .collect();
        let mut out: FxHashSet<TableId> = roots.iter().cloned().collect();
        while let Some(id) = queue.pop_front() {
            if !seen_nodes.insert(id) {
                continue;
            }
            let node = self.node(id);
            out.insert(node.table.clone());
            queue.extend(node.dependents.iter().map(|e| e.node));
            queue.extend(node.symmetric);
        }
        out
    }

    /* ──────────────────────────── Validation ───────────────────────── */

    /// Definition-time checks for one field already present in the graph.
    pub fn validate_field(&self, table: &TableId, field: &FieldId) -> Result<(), EngineError> {
        let id = self
            .resolve(table, field)
            .ok_or_else(|| EngineError::MissingField {
                table: table.clone(),
                field: field.clone(),
            })?;
        let node = self.node(id);
        let invalid = |reason: String| EngineError::InvalidFieldDefinition {
            field: field.clone(),
            reason,
        };
        let missing = |t: &TableId, f: &FieldId| EngineError::MissingField {
            table: t.clone(),
            field: f.clone(),
        };

        if let Some((link_field, lookup_field)) = node.def.kind.lookup_source() {
            let link = self
                .resolve(table, link_field)
                .ok_or_else(|| missing(table, link_field))?;
            let Some(opts) = self.node(link).def.link_options() else {
                return Err(invalid(format!("{link_field} is not a link field")));
            };
            if self.resolve(&opts.foreign_table_id, lookup_field).is_none() {
                return Err(missing(&opts.foreign_table_id, lookup_field));
            }
        }

        match &node.def.kind {
            FieldKind::Formula(_) => {
                if let Some(e) = &node.parse_error {
                    return Err(EngineError::Parse {
                        field: field.clone(),
                        source: e.clone(),
                    });
                }
                let refs = node
                    .ast
                    .as_ref()
                    .map(|a| a.field_references())
                    .unwrap_or_default();
                for r in refs {
                    if self.resolve(table, &r).is_none() {
                        return Err(missing(table, &r));
                    }
                }
            }
            FieldKind::Link(opts) => {
                if !self.contains_table(&opts.foreign_table_id) {
                    return Err(invalid(format!(
                        "foreign table {} does not exist",
                        opts.foreign_table_id
                    )));
                }
                if self
                    .resolve(&opts.foreign_table_id, &opts.lookup_field_id)
                    .is_none()
                {
                    return Err(missing(&opts.foreign_table_id, &opts.lookup_field_id));
                }
                // The symmetric field may not exist yet while the pair is
                // being created; when it does, it has to match.
                if let Some(sym) = node.symmetric {
                    self.check_symmetric_pair(id, sym)
                        .map_err(invalid)?;
                }
            }
            _ => {}
        }

        self.check_acyclic(id)
    }

    /// Why the two link fields are not a valid symmetric pair, if they are not.
    pub fn check_symmetric_pair(&self, link: FieldNodeId, sym: FieldNodeId) -> Result<(), String> {
        let a = self.node(link);
        let b = self.node(sym);
        let (Some(ao), Some(bo)) = (a.def.link_options(), b.def.link_options()) else {
            return Err(format!(
                "symmetric field {} is not a link field",
                b.qualified_name()
            ));
        };
        if bo.symmetric_field_id != a.def.id || bo.foreign_table_id != a.table {
            return Err(format!(
                "symmetric field {} does not point back to {}",
                b.qualified_name(),
                a.qualified_name()
            ));
        }
        if bo.relationship != ao.relationship.complement() {
            return Err(format!(
                "relationships {:?} and {:?} are not complementary",
                ao.relationship, bo.relationship
            ));
        }
        Ok(())
    }

    fn check_acyclic(&self, id: FieldNodeId) -> Result<(), EngineError> {
        let all: Vec<FieldNodeId> = self.node_ids().collect();
        let cycles = Scheduler::new(self).cycles(&all);
        let Some(scc) = cycles.into_iter().find(|c| c.contains(&id)) else {
            return Ok(());
        };
        let members: FxHashSet<FieldNodeId> = scc.into_iter().collect();
        let path = self.cycle_path(id, &members);
        Err(EngineError::CyclicDependency {
            cycle: path.iter().map(|n| self.node(*n).qualified_name()).collect(),
        })
    }

    /// Walk dependencies inside one strongly connected component from
    /// `start` back to itself. The start node appears at both ends.
    fn cycle_path(&self, start: FieldNodeId, members: &FxHashSet<FieldNodeId>) -> Vec<FieldNodeId> {
        let mut parent: FxHashMap<FieldNodeId, FieldNodeId> = FxHashMap::default();
        let mut visited: FxHashSet<FieldNodeId> = FxHashSet::default();
        visited.insert(start);
        let mut queue = VecDeque::from([start]);
        while let Some(n) = queue.pop_front() {
            for e in &self.node(n).dependencies {
                if e.node == start {
                    let mut path = vec![n];
                    let mut cur = n;
                    while let Some(&p) = parent.get(&cur) {
                        path.push(p);
                        cur = p;
                    }
                    path.reverse();
                    path.push(start);
                    return path;
                }
                if members.contains(&e.node) && visited.insert(e.node) {
                    parent.insert(e.node, n);
                    queue.push_back(e.node);
                }
            }
        }
        vec![start, start]
    }

    /// Dependency-first order of `subset`. Fails if the subset holds a cycle.
    pub fn topological_order(
        &self,
        subset: &FxHashSet<FieldNodeId>,
    ) -> Result<Vec<FieldNodeId>, EngineError> {
        let scheduler = Scheduler::new(self);
        let layers = scheduler.build_layers(subset)?;
        Ok(layers.into_iter().flat_map(|l| l.vertices).collect())
    }
}
