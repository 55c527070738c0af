use super::common::*;
use crate::error::EngineError;
use tabula_common::{CellValue, FieldId, LinkItem, Relationship, TableId};

#[test]
fn many_one_write_adds_to_symmetric_side_only() {
    let fx = fixture();
    let report = fx.set(T2, "recB1", "fldT2Link", link("recA2")).unwrap();

    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), titled("recA2", "A2"));
    assert_eq!(fx.get(T1, "recA2", "fldT1Link"), titled_many(&[("recB1", "B1")]));
    assert_eq!(fx.get(T1, "recA1", "fldT1Link"), CellValue::Empty);
    assert_eq!(report.derived.len(), 1);
    assert_eq!(report.derived[0].record.as_str(), "recA2");
    fx.assert_symmetric();
}

#[test]
fn repointing_moves_record_between_symmetric_sets_in_one_pass() {
    let fx = fixture();
    fx.set(T2, "recB1", "fldT2Link", link("recA1")).unwrap();
    fx.set(T2, "recB2", "fldT2Link", link("recA1")).unwrap();
    fx.sink.take();

    let report = fx.set(T2, "recB1", "fldT2Link", link("recA2")).unwrap();

    assert_eq!(fx.ids(T1, "recA1", "fldT1Link"), vec!["recB2"]);
    assert_eq!(fx.ids(T1, "recA2", "fldT1Link"), vec!["recB1"]);
    // One pass, one batch of notifications covering both foreign records.
    let updates = fx.sink.take();
    assert_eq!(report.notifications, updates.len());
    let touched: Vec<&str> = updates.iter().map(|u| u.record.as_str()).collect();
    assert!(touched.contains(&"recA1"));
    assert!(touched.contains(&"recA2"));
    assert!(touched.contains(&"recB1"));
    fx.assert_symmetric();
}

#[test]
fn plural_side_write_steals_from_previous_owner() {
    let fx = fixture();
    fx.set(T1, "recA1", "fldT1Link", links(&["recB1", "recB2"])).unwrap();
    fx.set(T1, "recA2", "fldT1Link", links(&["recB2", "recB3"])).unwrap();

    // recB2 links a single record, so recA2 takes it away from recA1.
    assert_eq!(fx.ids(T1, "recA1", "fldT1Link"), vec!["recB1"]);
    assert_eq!(fx.ids(T1, "recA2", "fldT1Link"), vec!["recB2", "recB3"]);
    assert_eq!(fx.get(T2, "recB2", "fldT2Link"), titled("recA2", "A2"));
    fx.assert_symmetric();
}

#[test]
fn clearing_plural_side_clears_every_foreign_record() {
    let fx = fixture();
    fx.set(T1, "recA1", "fldT1Link", links(&["recB1", "recB2"])).unwrap();
    fx.set(T1, "recA1", "fldT1Link", CellValue::Empty).unwrap();

    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), CellValue::Empty);
    assert_eq!(fx.get(T2, "recB2", "fldT2Link"), CellValue::Empty);
    fx.assert_symmetric();
}

#[test]
fn one_one_eviction_cascades_one_hop() {
    let fx = fixture();
    let (t1, t2) = (TableId::new(T1), TableId::new(T2));
    fx.base
        .add_field(
            &t1,
            link_def("fldT1Mate", Relationship::OneOne, T2, "fldT2Text", "fldT2Mate"),
        )
        .unwrap();
    fx.base
        .add_field(
            &t2,
            link_def("fldT2Mate", Relationship::OneOne, T1, "fldT1Text", "fldT1Mate"),
        )
        .unwrap();

    fx.set(T1, "recA1", "fldT1Mate", link("recB1")).unwrap();
    fx.set(T1, "recA2", "fldT1Mate", link("recB2")).unwrap();
    // recA2 moves to recB1: recB2 is released and recA1 loses its mate.
    fx.set(T1, "recA2", "fldT1Mate", link("recB1")).unwrap();

    assert_eq!(fx.get(T1, "recA2", "fldT1Mate"), titled("recB1", "B1"));
    assert_eq!(fx.get(T2, "recB1", "fldT2Mate"), titled("recA2", "A2"));
    assert_eq!(fx.get(T1, "recA1", "fldT1Mate"), CellValue::Empty);
    assert_eq!(fx.get(T2, "recB2", "fldT2Mate"), CellValue::Empty);
    assert_pair_symmetric(&fx.base, (T1, "fldT1Mate"), (T2, "fldT2Mate"));
}

#[test]
fn client_titles_are_replaced_and_reported_back() {
    let fx = fixture();
    fx.set(T2, "recB1", "fldT2Link", titled("recA2", "test"))
        .unwrap();

    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), titled("recA2", "A2"));
    let updates = fx.sink.take();
    let own = updates
        .iter()
        .find(|u| u.record.as_str() == "recB1")
        .expect("writer record is notified when its value was normalised");
    assert_eq!(own.ops.len(), 1);
    assert_eq!(own.ops[0].old_cell_value, titled("recA2", "test"));
    assert_eq!(own.ops[0].new_cell_value, titled("recA2", "A2"));
}

#[test]
fn unchanged_client_write_is_not_echoed() {
    let fx = fixture();
    fx.set(T1, "recA1", "fldT1Number", num(3.0)).unwrap();
    let updates = fx.sink.take();
    assert!(updates.is_empty());
    assert_eq!(fx.get(T1, "recA1", "fldT1Number"), num(3.0));
}

#[test]
fn title_change_retitles_every_linking_record() {
    let fx = fixture();
    fx.set(T2, "recB1", "fldT2Link", link("recA1")).unwrap();
    fx.set(T2, "recB2", "fldT2Link", link("recA1")).unwrap();

    let report = fx.set(T1, "recA1", "fldT1Text", text("AX")).unwrap();

    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), titled("recA1", "AX"));
    assert_eq!(fx.get(T2, "recB2", "fldT2Link"), titled("recA1", "AX"));
    assert_eq!(fx.get(T2, "recB3", "fldT2Link"), CellValue::Empty);
    assert_eq!(report.derived.len(), 2);
}

#[test]
fn duplicate_ids_collapse_to_first_occurrence() {
    let fx = fixture();
    let dup = CellValue::Links(vec![
        LinkItem::new("recB2"),
        LinkItem::new("recB1"),
        LinkItem::new("recB2"),
    ]);
    fx.set(T1, "recA1", "fldT1Link", dup).unwrap();
    assert_eq!(
        fx.get(T1, "recA1", "fldT1Link"),
        titled_many(&[("recB2", "B2"), ("recB1", "B1")])
    );
}

#[test]
fn singular_side_rejects_several_ids() {
    let fx = fixture();
    let err = fx
        .set(T2, "recB1", "fldT2Link", links(&["recA1", "recA2"]))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCellValue { .. }));
    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), CellValue::Empty);
}

#[test]
fn non_link_value_in_link_field_is_rejected() {
    let fx = fixture();
    let err = fx.set(T2, "recB1", "fldT2Link", text("A1")).unwrap_err();
    assert!(matches!(err, EngineError::InvalidCellValue { .. }));
}

#[test]
fn link_to_unknown_record_aborts_without_half_applied_link() {
    let fx = fixture();
    let err = fx
        .set(T1, "recA1", "fldT1Link", links(&["recB1", "recNope"]))
        .unwrap_err();
    assert!(matches!(err, EngineError::ReferentialInconsistency(_)));
    assert!(!err.is_retryable());
    assert_eq!(fx.get(T1, "recA1", "fldT1Link"), CellValue::Empty);
    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), CellValue::Empty);
    assert!(fx.sink.updates().is_empty());
    assert_eq!(fx.engine.lock_manager().held_count(), 0);
}

#[test]
fn missing_symmetric_field_fails_the_pass_and_keeps_plain_writes() {
    let fx = fixture();
    // A link whose counterpart was never created.
    fx.base
        .add_field(
            &TableId::new(T1),
            link_def("fldT1Orphan", Relationship::ManyMany, T2, "fldT2Text", "fldGone"),
        )
        .unwrap();

    let cs = crate::engine::ChangeSet::new()
        .set(T1, "recA1", "fldT1Number", num(5.0))
        .set(T1, "recA1", "fldT1Orphan", link("recB1"));
    let err = fx.apply(cs).unwrap_err();

    assert!(matches!(err, EngineError::ReferentialInconsistency(_)));
    assert_eq!(fx.get(T1, "recA1", "fldT1Number"), num(5.0));
    assert_eq!(fx.get(T1, "recA1", "fldT1Orphan"), CellValue::Empty);
    assert!(fx.sink.updates().is_empty());
}

#[test]
fn backfill_rebuilds_symmetric_side_from_link_side() {
    let fx = fixture();
    let (t1, t2) = (TableId::new(T1), TableId::new(T2));
    // Written behind the engine's back: only one side, one dangling id and
    // a singular target claimed twice.
    fx.base.insert_record(
        &t1,
        "recA1",
        [(
            FieldId::new("fldT1Link"),
            CellValue::Links(vec![LinkItem::new("recB1"), LinkItem::new("recGhost")]),
        )],
    );
    fx.base.insert_record(
        &t1,
        "recA2",
        [(FieldId::new("fldT1Link"), links(&["recB1", "recB2"]))],
    );
    fx.base
        .insert_record(&t2, "recB3", [(FieldId::new("fldT2Link"), link("recA3"))]);

    fx.engine
        .backfill(&t1, &FieldId::new("fldT1Link"), &fx.sink)
        .unwrap();

    assert_eq!(fx.get(T1, "recA1", "fldT1Link"), titled_many(&[("recB1", "B1")]));
    assert_eq!(fx.get(T1, "recA2", "fldT1Link"), titled_many(&[("recB2", "B2")]));
    assert_eq!(fx.get(T2, "recB1", "fldT2Link"), titled("recA1", "A1"));
    assert_eq!(fx.get(T2, "recB2", "fldT2Link"), titled("recA2", "A2"));
    // The link side is the truth: recA3 does not list recB3.
    assert_eq!(fx.get(T2, "recB3", "fldT2Link"), CellValue::Empty);
    fx.assert_symmetric();
}
