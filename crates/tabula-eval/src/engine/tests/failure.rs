use std::time::Duration;

use super::common::*;
use crate::engine::{ChangeSet, EngineConfig, PassState};
use crate::error::EngineError;
use tabula_common::CellValue;

#[test]
fn computed_fields_are_read_only() {
    let fx = fixture();
    fx.add_field(T1, formula("fldT1Calc", "{fldT1Number} + 1"));
    let err = fx.set(T1, "recA1", "fldT1Calc", num(3.0)).unwrap_err();
    assert!(matches!(err, EngineError::ReadOnlyField { .. }));
    assert_eq!(fx.get(T1, "recA1", "fldT1Calc"), num(1.0));
}

#[test]
fn unknown_field_or_record_rejects_the_whole_change_set() {
    let fx = fixture();
    let err = fx
        .apply(
            ChangeSet::new()
                .set(T1, "recA1", "fldT1Number", num(1.0))
                .set(T1, "recA1", "fldNope", num(2.0)),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingField { .. }));

    let err = fx
        .apply(
            ChangeSet::new()
                .set(T1, "recA1", "fldT1Number", num(1.0))
                .set(T1, "recZZ", "fldT1Number", num(2.0)),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingRecord { .. }));

    // Rejected before execution: not even the valid write lands.
    assert_eq!(fx.get(T1, "recA1", "fldT1Number"), CellValue::Empty);
}

#[test]
fn failed_pass_keeps_only_the_client_write() {
    let fx = fixture_with(EngineConfig {
        lock_timeout: Duration::from_millis(200),
        max_units_per_pass: Some(1),
        ..EngineConfig::default()
    });
    // Set up links with a roomy engine over the same store.
    let roomy = crate::engine::PropagationEngine::new(
        fx.base.clone(),
        fx.base.clone(),
        EngineConfig::default(),
    );
    roomy
        .apply(
            &ChangeSet::new().set(T2, "recB1", "fldT2Link", link("recA1")),
            &fx.sink,
        )
        .unwrap();
    fx.sink.take();

    let err = fx.set(T1, "recA1", "fldT1Text", text("AX")).unwrap_err();

    assert!(matches!(err, EngineError::PlanViolation(_)));
    assert_eq!(fx.get(T1, "recA1", "fldT1Text"), text("AX"));
    // The derived title refresh was discarded with the pass.
    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), titled("recA1", "A1"));
    assert!(fx.sink.updates().is_empty());
    assert_eq!(fx.engine.lock_manager().held_count(), 0);
}

#[test]
fn empty_change_set_commits_nothing() {
    let fx = fixture();
    let report = fx.apply(ChangeSet::new()).unwrap();
    assert_eq!(report.state, PassState::Committed);
    assert!(report.units.is_empty());
    assert_eq!(report.notifications, 0);
}

#[test]
fn stale_old_value_does_not_override_store() {
    let fx = fixture();
    fx.set(T2, "recB1", "fldT2Link", link("recA1")).unwrap();

    // The client believes recB1 pointed at recA3; the store says recA1.
    let mut cs = ChangeSet::new();
    cs.push(
        crate::engine::CellChange::new(T2, "recB1", "fldT2Link", link("recA2"))
            .with_old(titled("recA3", "A3")),
    );
    fx.apply(cs).unwrap();

    assert_eq!(fx.get(T1, "recA1", "fldT1Link"), CellValue::Empty);
    assert_eq!(fx.ids(T1, "recA2", "fldT1Link"), vec!["recB1"]);
    assert_eq!(fx.get(T1, "recA3", "fldT1Link"), CellValue::Empty);
    fx.assert_symmetric();
}

#[test]
fn unparsable_formula_in_metadata_yields_error_cells() {
    let fx = fixture();
    // Written directly, skipping definition-time validation.
    fx.base
        .add_field(&tabula_common::TableId::new(T1), formula("fldT1Broken", "1 +"))
        .unwrap();
    fx.add_field(T1, formula("fldT1After", "{fldT1Number} * 3"));

    let report = fx.set(T1, "recA1", "fldT1Number", num(2.0)).unwrap();
    assert_eq!(report.state, PassState::Committed);
    assert_eq!(fx.get(T1, "recA1", "fldT1After"), num(6.0));

    fx.engine
        .backfill(
            &tabula_common::TableId::new(T1),
            &tabula_common::FieldId::new("fldT1Broken"),
            &fx.sink,
        )
        .unwrap();
    assert!(fx.get(T1, "recA1", "fldT1Broken").is_error());
}

#[test]
fn out_of_range_round_digits_become_an_error_cell() {
    let fx = fixture();
    fx.set(T1, "recA1", "fldT1Number", num(2.5)).unwrap();
    fx.add_field(T1, formula("fldT1Rounded", "ROUND({fldT1Number}, 0 - 10^300)"));

    let cell = fx.get(T1, "recA1", "fldT1Rounded");
    match cell {
        CellValue::Error(e) => assert_eq!(e.kind, tabula_common::CellErrorKind::Num),
        other => panic!("expected #NUM!, got {other:?}"),
    }
}
