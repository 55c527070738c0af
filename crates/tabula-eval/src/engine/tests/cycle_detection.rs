//! Definition-time validation of new and altered fields.
use super::common::*;
use crate::engine::{DependencyGraph, FieldNodeId, Scheduler};
use crate::error::EngineError;
use rustc_hash::FxHashSet;
use tabula_common::{FieldId, Relationship, RollupFunction, TableId};

fn cycle_of(err: EngineError) -> Vec<String> {
    match err {
        EngineError::CyclicDependency { cycle } => cycle,
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn self_reference_is_rejected() {
    let fx = fixture();
    let err = fx
        .engine
        .validate_new_field(&TableId::new(T1), &formula("fldLoop", "{fldLoop} + 1"))
        .unwrap_err();
    assert_eq!(cycle_of(err), vec!["tblT1.fldLoop", "tblT1.fldLoop"]);
}

#[test]
fn two_field_cycle_reports_its_path() {
    let fx = fixture();
    fx.add_field(T1, formula("fldY", "{fldT1Number} + 1"));
    fx.add_field(T1, formula("fldX", "{fldY} * 2"));

    let err = fx
        .engine
        .validate_new_field(&TableId::new(T1), &formula("fldY", "{fldX} - 1"))
        .unwrap_err();
    let cycle = cycle_of(err);
    assert_eq!(cycle.first(), cycle.last());
    assert_eq!(cycle.len(), 3);
    assert!(cycle.contains(&"tblT1.fldX".to_string()));
    assert!(cycle.contains(&"tblT1.fldY".to_string()));
}

#[test]
fn cycle_through_a_link_is_rejected() {
    let fx = fixture();
    fx.add_field(T2, formula("fldT2Calc", "{fldT2Number}"));
    fx.add_field(
        T1,
        rollup("fldT1Sum", "fldT1Link", "fldT2Calc", RollupFunction::Sum),
    );
    fx.add_field(T2, lookup("fldT2Back", "fldT2Link", "fldT1Sum"));

    let err = fx
        .engine
        .validate_new_field(&TableId::new(T2), &formula("fldT2Calc", "{fldT2Back}"))
        .unwrap_err();
    let cycle = cycle_of(err);
    assert!(cycle.contains(&"tblT1.fldT1Sum".to_string()));
    assert!(cycle.contains(&"tblT2.fldT2Back".to_string()));
}

#[test]
fn unknown_references_and_bad_expressions_are_rejected() {
    let fx = fixture();
    let t1 = TableId::new(T1);

    let err = fx
        .engine
        .validate_new_field(&t1, &formula("fldBad", "{fldNope} + 1"))
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingField { ref field, .. } if field.as_str() == "fldNope"));

    let err = fx
        .engine
        .validate_new_field(&t1, &formula("fldBad", "1 +"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Parse { .. }));

    let err = fx
        .engine
        .validate_new_field(&t1, &lookup("fldBad", "fldT1Number", "fldT2Text"))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFieldDefinition { .. }));
}

#[test]
fn new_link_pair_is_checked_with_its_counterpart() {
    let fx = fixture();
    let t1 = TableId::new(T1);

    // Counterpart does not exist yet: checked as the CRUD layer will create it.
    fx.engine
        .validate_new_field(
            &t1,
            &link_def("fldT1Tags", Relationship::ManyMany, T2, "fldT2Text", "fldT2Tags"),
        )
        .unwrap();

    // Pointing at an existing field that is not its counterpart.
    let err = fx
        .engine
        .validate_new_field(
            &t1,
            &link_def("fldT1Other", Relationship::ManyMany, T2, "fldT2Text", "fldT2Link"),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFieldDefinition { .. }));

    let err = fx
        .engine
        .validate_new_field(
            &t1,
            &link_def("fldT1Far", Relationship::ManyOne, "tblNowhere", "fldX", "fldY"),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFieldDefinition { .. }));
}

#[test]
fn scheduler_finds_cycles_the_builder_was_handed() {
    // Metadata that was never validated can still hold a cycle.
    let g = DependencyGraph::from_tables(
        vec![(
            TableId::new("tbl1"),
            vec![
                formula("fldA", "{fldB}"),
                formula("fldB", "{fldA}"),
                formula("fldC", "{fldA} + 1"),
                formula("fldSelf", "{fldSelf}"),
            ],
        )],
        1,
    );
    let scheduler = Scheduler::new(&g);
    let all: Vec<FieldNodeId> = g.node_ids().collect();
    let cycles = scheduler.cycles(&all);

    assert_eq!(cycles.len(), 2);
    let sizes: Vec<usize> = cycles.iter().map(Vec::len).collect();
    assert!(sizes.contains(&2));
    assert!(sizes.contains(&1));

    // Only fldC is left to layer.
    let c = g.resolve(&TableId::new("tbl1"), &FieldId::new("fldC")).unwrap();
    let acyclic: FxHashSet<FieldNodeId> = all
        .iter()
        .copied()
        .filter(|v| !cycles.iter().any(|cycle| cycle.contains(v)))
        .collect();
    assert_eq!(acyclic, FxHashSet::from_iter([c]));
    let layers = scheduler.build_layers(&acyclic).unwrap();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].vertices, vec![c]);

    // fldC reads the cycle, so it comes after it.
    let components = scheduler.components(&all);
    let pos = |v: FieldNodeId| components.iter().position(|comp| comp.contains(&v)).unwrap();
    let a = g.resolve(&TableId::new("tbl1"), &FieldId::new("fldA")).unwrap();
    assert!(pos(a) < pos(c));

    let err = g
        .validate_field(&TableId::new("tbl1"), &FieldId::new("fldA"))
        .unwrap_err();
    assert_eq!(cycle_of(err).len(), 3);
}

#[test]
fn runtime_order_rechecks_acyclicity() {
    let g = DependencyGraph::from_tables(
        vec![(
            TableId::new("tbl1"),
            vec![formula("fldA", "{fldB}"), formula("fldB", "{fldA}")],
        )],
        1,
    );
    let subset = g.node_ids().collect();
    assert!(matches!(
        g.topological_order(&subset),
        Err(EngineError::CyclicDependency { .. })
    ));
}
