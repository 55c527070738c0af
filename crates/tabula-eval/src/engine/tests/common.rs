//! Common test helpers
//!
//! Two tables linked to each other:
//!
//! * `tblT1`: `fldT1Text` (primary), `fldT1Number`, `fldT1Link` (one-many to `tblT2`)
//! * `tblT2`: `fldT2Text` (primary), `fldT2Number`, `fldT2Link` (many-one to `tblT1`)
//!
//! with records `recA1..recA3` titled `A1..A3` and `recB1..recB3` titled `B1..B3`.
use std::sync::Arc;
use std::time::Duration;

use tabula_common::{
    CellValue, FieldDef, FieldId, FieldKind, FormulaOptions, LinkItem, LinkOptions, LookupOptions,
    RecordId, Relationship, RollupFunction, RollupOptions, TableId,
};

use crate::engine::{ChangeSet, EngineConfig, PassReport, PropagationEngine};
use crate::error::EngineError;
use crate::memory::{MemoryBase, RecordingSink};
use crate::traits::RecordStore;

pub const T1: &str = "tblT1";
pub const T2: &str = "tblT2";

pub struct Fixture {
    pub base: Arc<MemoryBase>,
    pub engine: PropagationEngine<MemoryBase, MemoryBase>,
    pub sink: RecordingSink,
}

pub fn link_def(
    id: &str,
    relationship: Relationship,
    foreign: &str,
    title: &str,
    symmetric: &str,
) -> FieldDef {
    FieldDef::new(
        id,
        id,
        FieldKind::Link(LinkOptions {
            relationship,
            foreign_table_id: TableId::new(foreign),
            lookup_field_id: FieldId::new(title),
            symmetric_field_id: FieldId::new(symmetric),
        }),
    )
}

pub fn formula(id: &str, expr: &str) -> FieldDef {
    FieldDef::new(
        id,
        id,
        FieldKind::Formula(FormulaOptions {
            expression: expr.to_string(),
        }),
    )
}

pub fn lookup(id: &str, link: &str, field: &str) -> FieldDef {
    FieldDef::new(
        id,
        id,
        FieldKind::Lookup(LookupOptions {
            link_field_id: FieldId::new(link),
            lookup_field_id: FieldId::new(field),
        }),
    )
}

pub fn rollup(id: &str, link: &str, field: &str, function: RollupFunction) -> FieldDef {
    FieldDef::new(
        id,
        id,
        FieldKind::Rollup(RollupOptions {
            link_field_id: FieldId::new(link),
            lookup_field_id: FieldId::new(field),
            function,
        }),
    )
}

pub fn link(id: &str) -> CellValue {
    CellValue::Link(LinkItem::new(id))
}

pub fn links(ids: &[&str]) -> CellValue {
    CellValue::links(ids.iter().map(|id| LinkItem::new(*id)))
}

pub fn titled(id: &str, title: &str) -> CellValue {
    CellValue::Link(LinkItem::titled(id, title))
}

pub fn titled_many(items: &[(&str, &str)]) -> CellValue {
    CellValue::links(items.iter().map(|(id, t)| LinkItem::titled(*id, *t)))
}

pub fn num(n: f64) -> CellValue {
    CellValue::Number(n)
}

pub fn text(s: &str) -> CellValue {
    CellValue::text(s)
}

pub fn base_with_tables() -> Arc<MemoryBase> {
    let base = MemoryBase::new();
    base.create_table(
        T1,
        vec![
            FieldDef::new("fldT1Text", "Text", FieldKind::SingleLineText),
            FieldDef::new("fldT1Number", "Number", FieldKind::Number { precision: 2 }),
            link_def("fldT1Link", Relationship::OneMany, T2, "fldT2Text", "fldT2Link"),
        ],
    );
    base.create_table(
        T2,
        vec![
            FieldDef::new("fldT2Text", "Text", FieldKind::SingleLineText),
            FieldDef::new("fldT2Number", "Number", FieldKind::Number { precision: 2 }),
            link_def("fldT2Link", Relationship::ManyOne, T1, "fldT1Text", "fldT1Link"),
        ],
    );
    let (t1, t2) = (TableId::new(T1), TableId::new(T2));
    for i in 1..=3 {
        base.insert_record(
            &t1,
            format!("recA{i}"),
            [(FieldId::new("fldT1Text"), text(&format!("A{i}")))],
        );
        base.insert_record(
            &t2,
            format!("recB{i}"),
            [(FieldId::new("fldT2Text"), text(&format!("B{i}")))],
        );
    }
    Arc::new(base)
}

pub fn fixture() -> Fixture {
    fixture_with(EngineConfig {
        lock_timeout: Duration::from_millis(200),
        ..EngineConfig::default()
    })
}

pub fn fixture_with(config: EngineConfig) -> Fixture {
    let base = base_with_tables();
    let engine = PropagationEngine::new(base.clone(), base.clone(), config);
    Fixture {
        base,
        engine,
        sink: RecordingSink::new(),
    }
}

impl Fixture {
    pub fn get(&self, table: &str, record: &str, field: &str) -> CellValue {
        self.base
            .get(&TableId::new(table), &RecordId::new(record), &FieldId::new(field))
    }

    pub fn set(
        &self,
        table: &str,
        record: &str,
        field: &str,
        value: CellValue,
    ) -> Result<PassReport, EngineError> {
        self.apply(ChangeSet::new().set(table, record, field, value))
    }

    pub fn apply(&self, cs: ChangeSet) -> Result<PassReport, EngineError> {
        self.engine.apply(&cs, &self.sink)
    }

    /// Validate, create and backfill a field, the way the CRUD layer does.
    pub fn add_field(&self, table: &str, def: FieldDef) {
        let t = TableId::new(table);
        self.engine.validate_new_field(&t, &def).unwrap();
        let id = def.id.clone();
        self.base.add_field(&t, def).unwrap();
        self.engine.backfill(&t, &id, &self.sink).unwrap();
        self.sink.take();
    }

    pub fn ids(&self, table: &str, record: &str, field: &str) -> Vec<String> {
        self.get(table, record, field)
            .link_ids()
            .into_iter()
            .map(|r| r.as_str().to_string())
            .collect()
    }

    /// Every link of `fldT1Link` is mirrored by `fldT2Link` and the other
    /// way round.
    pub fn assert_symmetric(&self) {
        assert_pair_symmetric(&self.base, (T1, "fldT1Link"), (T2, "fldT2Link"));
    }
}

pub fn assert_pair_symmetric(base: &MemoryBase, a: (&str, &str), b: (&str, &str)) {
    let (ta, tb) = (TableId::new(a.0), TableId::new(b.0));
    let (fa, fb) = (FieldId::new(a.1), FieldId::new(b.1));
    for r in base.record_ids(&ta).unwrap() {
        for f in base.get(&ta, &r, &fa).link_ids() {
            assert!(
                base.get(&tb, &f, &fb).contains_link(&r),
                "{}.{} holds {f} but {f}.{} does not hold {r}",
                r,
                a.1,
                b.1
            );
        }
    }
    for f in base.record_ids(&tb).unwrap() {
        for r in base.get(&tb, &f, &fb).link_ids() {
            assert!(
                base.get(&ta, &r, &fa).contains_link(&f),
                "{}.{} holds {r} but {r}.{} does not hold {f}",
                f,
                b.1,
                a.1
            );
        }
    }
}
