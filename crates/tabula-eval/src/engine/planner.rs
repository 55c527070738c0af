use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::RecordId;

use super::graph::DependencyGraph;
use super::vertex::FieldNodeId;
use crate::error::EngineError;

/// Ordered field steps of one pass and the records pending in each.
///
/// Steps follow the dependency order of the reachable subgraph. Records are
/// added with [`Plan::schedule`], before execution for seeds and during
/// execution as changes fan out. Every (field, record) runs at most once.
#[derive(Debug)]
pub struct Plan {
    order: Vec<FieldNodeId>,
    position: FxHashMap<FieldNodeId, usize>,
    pending: Vec<Vec<RecordId>>,
    visited: FxHashSet<(FieldNodeId, RecordId)>,
    // Index of the first step not yet handed out.
    cursor: usize,
    units: usize,
    max_units: Option<usize>,
}

impl Plan {
    fn new(order: Vec<FieldNodeId>, max_units: Option<usize>) -> Self {
        let position = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let pending = vec![Vec::new(); order.len()];
        Self {
            order,
            position,
            pending,
            visited: FxHashSet::default(),
            cursor: 0,
            units: 0,
            max_units,
        }
    }

    /// Field steps in execution order.
    pub fn order(&self) -> &[FieldNodeId] {
        &self.order
    }

    pub fn contains(&self, node: FieldNodeId) -> bool {
        self.position.contains_key(&node)
    }

    /// Units scheduled so far.
    pub fn units(&self) -> usize {
        self.units
    }

    /// Add `record` to the step of `node`. Returns `false` when the unit was
    /// already scheduled in this pass.
    pub fn schedule(&mut self, node: FieldNodeId, record: RecordId) -> Result<bool, EngineError> {
        let Some(&pos) = self.position.get(&node) else {
            return Err(EngineError::PlanViolation(format!(
                "field node {node:?} is outside the plan"
            )));
        };
        let unit = (node, record);
        if self.visited.contains(&unit) {
            return Ok(false);
        }
        if pos < self.cursor {
            return Err(EngineError::PlanViolation(format!(
                "record {} scheduled into executed step {pos} of {}",
                unit.1,
                self.order.len()
            )));
        }
        self.units += 1;
        if let Some(max) = self.max_units {
            if self.units > max {
                return Err(EngineError::PlanViolation(format!(
                    "pass exceeds {max} propagation units"
                )));
            }
        }
        let (node, record) = unit;
        self.pending[pos].push(record.clone());
        self.visited.insert((node, record));
        Ok(true)
    }

    /// Next step with pending records. Steps handed out are closed to
    /// further scheduling.
    pub fn next_step(&mut self) -> Option<(FieldNodeId, Vec<RecordId>)> {
        while self.cursor < self.order.len() {
            let pos = self.cursor;
            self.cursor += 1;
            if !self.pending[pos].is_empty() {
                return Some((self.order[pos], std::mem::take(&mut self.pending[pos])));
            }
        }
        None
    }
}

pub struct Planner;

impl Planner {
    /// Plan over every field reachable from `seeds` through dependents and
    /// through the link ↔ symmetric link relation.
    pub fn plan(
        graph: &DependencyGraph,
        seeds: &[FieldNodeId],
        max_units: Option<usize>,
    ) -> Result<Plan, EngineError> {
        let _span = tracing::debug_span!("plan", seeds = seeds.len()).entered();

        let mut reachable: FxHashSet<FieldNodeId> = FxHashSet::default();
        let mut queue: VecDeque<FieldNodeId> = seeds.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            let node = graph.node(id);
            queue.extend(node.dependents.iter().map(|e| e.node));
            queue.extend(node.symmetric);
        }

        let order = graph.topological_order(&reachable)?;
        tracing::debug!(steps = order.len(), "planned");
        Ok(Plan::new(order, max_units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_common::{FieldDef, FieldKind, FormulaOptions, TableId};

    fn formula(id: &str, expr: &str) -> FieldDef {
        FieldDef::new(
            id,
            id,
            FieldKind::Formula(FormulaOptions {
                expression: expr.to_string(),
            }),
        )
    }

    fn chain() -> DependencyGraph {
        DependencyGraph::from_tables(
            vec![(
                TableId::new("tbl1"),
                vec![
                    FieldDef::new("fldA", "a", FieldKind::Number { precision: 0 }),
                    formula("fldC", "{fldB} + 1"),
                    formula("fldB", "{fldA} * 2"),
                    FieldDef::new("fldOther", "other", FieldKind::SingleLineText),
                ],
            )],
            1,
        )
    }

    fn id(g: &DependencyGraph, f: &str) -> FieldNodeId {
        g.resolve(&TableId::new("tbl1"), &f.into()).unwrap()
    }

    #[test]
    fn order_follows_dependencies_not_definition_order() {
        let g = chain();
        let plan = Planner::plan(&g, &[id(&g, "fldA")], None).unwrap();
        assert_eq!(
            plan.order(),
            &[id(&g, "fldA"), id(&g, "fldB"), id(&g, "fldC")]
        );
        assert!(!plan.contains(id(&g, "fldOther")));
    }

    #[test]
    fn units_run_once_and_executed_steps_close() {
        let g = chain();
        let mut plan = Planner::plan(&g, &[id(&g, "fldA")], None).unwrap();
        let r = RecordId::new("rec1");
        assert!(plan.schedule(id(&g, "fldA"), r.clone()).unwrap());
        assert!(!plan.schedule(id(&g, "fldA"), r.clone()).unwrap());

        let (step, records) = plan.next_step().unwrap();
        assert_eq!(step, id(&g, "fldA"));
        assert_eq!(records, vec![r.clone()]);

        let err = plan.schedule(id(&g, "fldA"), RecordId::new("rec2")).unwrap_err();
        assert!(matches!(err, EngineError::PlanViolation(_)));
        assert!(plan.schedule(id(&g, "fldC"), r.clone()).unwrap());
        // fldB has nothing pending and is skipped.
        assert_eq!(plan.next_step().unwrap().0, id(&g, "fldC"));
        assert!(plan.next_step().is_none());
    }

    #[test]
    fn unit_bound_aborts_runaway_passes() {
        let g = chain();
        let mut plan = Planner::plan(&g, &[id(&g, "fldA")], Some(1)).unwrap();
        plan.schedule(id(&g, "fldA"), RecordId::new("rec1")).unwrap();
        let err = plan
            .schedule(id(&g, "fldA"), RecordId::new("rec2"))
            .unwrap_err();
        assert!(matches!(err, EngineError::PlanViolation(_)));
    }
}
