//! In-memory metadata and record store.
//!
//! Used by the tests and by embedders that keep a base entirely in memory.
//! Both store traits are implemented on the same [`MemoryBase`].

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tabula_common::{CellValue, FieldDef, FieldId, RecordId, TableId};

use crate::error::EngineError;
use crate::traits::{
    ChangeSink, CellWrite, CommitResult, FieldMetadataStore, RecordSnapshot, RecordStore,
    RecordUpdate,
};

#[derive(Debug, Default)]
struct MemoryTable {
    fields: Vec<FieldDef>,
    record_order: Vec<RecordId>,
    records: FxHashMap<RecordId, FxHashMap<FieldId, CellValue>>,
}

#[derive(Debug, Default)]
pub struct MemoryBase {
    tables: RwLock<FxHashMap<TableId, MemoryTable>>,
    version: AtomicU64,
}

impl MemoryBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, table: impl Into<TableId>, fields: Vec<FieldDef>) {
        self.tables.write().insert(
            table.into(),
            MemoryTable {
                fields,
                ..MemoryTable::default()
            },
        );
        self.bump();
    }

    /// Append a field definition. Values of existing records stay empty
    /// until a backfill fills them.
    pub fn add_field(&self, table: &TableId, field: FieldDef) -> Result<(), EngineError> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| EngineError::Store(format!("unknown table {table}")))?;
        if t.fields.iter().any(|f| f.id == field.id) {
            return Err(EngineError::InvalidFieldDefinition {
                field: field.id,
                reason: "field id already exists".to_string(),
            });
        }
        t.fields.push(field);
        drop(tables);
        self.bump();
        Ok(())
    }

    pub fn replace_field(&self, table: &TableId, field: FieldDef) -> Result<(), EngineError> {
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| EngineError::Store(format!("unknown table {table}")))?;
        let slot = t
            .fields
            .iter_mut()
            .find(|f| f.id == field.id)
            .ok_or_else(|| EngineError::MissingField {
                table: table.clone(),
                field: field.id.clone(),
            })?;
        *slot = field;
        drop(tables);
        self.bump();
        Ok(())
    }

    /// Insert a record with initial plain values. The values are stored as
    /// given; no propagation runs.
    pub fn insert_record<I>(&self, table: &TableId, record: impl Into<RecordId>, values: I)
    where
        I: IntoIterator<Item = (FieldId, CellValue)>,
    {
        let record = record.into();
        let mut tables = self.tables.write();
        let t = tables.entry(table.clone()).or_default();
        if !t.records.contains_key(&record) {
            t.record_order.push(record.clone());
        }
        let cells = t.records.entry(record).or_default();
        for (field, value) in values {
            if value.is_empty() {
                cells.remove(&field);
            } else {
                cells.insert(field, value);
            }
        }
    }

    /// Stored value, `Empty` for unknown records or fields.
    pub fn get(&self, table: &TableId, record: &RecordId, field: &FieldId) -> CellValue {
        self.tables
            .read()
            .get(table)
            .and_then(|t| t.records.get(record))
            .and_then(|cells| cells.get(field))
            .cloned()
            .unwrap_or_default()
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

impl FieldMetadataStore for MemoryBase {
    fn fields_for_table(&self, table: &TableId) -> Result<Vec<FieldDef>, EngineError> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.fields.clone())
            .ok_or_else(|| EngineError::Store(format!("unknown table {table}")))
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

impl RecordStore for MemoryBase {
    fn cell_value(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
    ) -> Result<Option<CellValue>, EngineError> {
        let tables = self.tables.read();
        let cells = tables
            .get(table)
            .and_then(|t| t.records.get(record))
            .ok_or_else(|| EngineError::MissingRecord {
                table: table.clone(),
                record: record.clone(),
            })?;
        Ok(cells.get(field).cloned())
    }

    fn batch_get_records(
        &self,
        table: &TableId,
        records: &[RecordId],
    ) -> Result<Vec<RecordSnapshot>, EngineError> {
        let tables = self.tables.read();
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter_map(|id| {
                t.records.get(id).map(|cells| RecordSnapshot {
                    id: id.clone(),
                    fields: cells.clone(),
                })
            })
            .collect())
    }

    fn record_ids(&self, table: &TableId) -> Result<Vec<RecordId>, EngineError> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.record_order.clone())
            .ok_or_else(|| EngineError::Store(format!("unknown table {table}")))
    }

    fn write_cell_values(&self, writes: &[CellWrite]) -> Result<CommitResult, EngineError> {
        let mut tables = self.tables.write();
        // Validate everything first so a bad write leaves the store untouched.
        for w in writes {
            let known = tables
                .get(&w.table)
                .is_some_and(|t| t.records.contains_key(&w.record));
            if !known {
                return Err(EngineError::MissingRecord {
                    table: w.table.clone(),
                    record: w.record.clone(),
                });
            }
        }
        for w in writes {
            if let Some(cells) = tables
                .get_mut(&w.table)
                .and_then(|t| t.records.get_mut(&w.record))
            {
                if w.value.is_empty() {
                    cells.remove(&w.field);
                } else {
                    cells.insert(w.field.clone(), w.value.clone());
                }
            }
        }
        Ok(CommitResult {
            written: writes.len(),
        })
    }
}

/// Sink keeping every published update, in publish order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<RecordUpdate>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<RecordUpdate> {
        self.updates.lock().clone()
    }

    pub fn take(&self) -> Vec<RecordUpdate> {
        std::mem::take(&mut *self.updates.lock())
    }
}

impl ChangeSink for RecordingSink {
    fn publish(&self, update: RecordUpdate) {
        self.updates.lock().push(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_common::FieldKind;

    fn base() -> (MemoryBase, TableId) {
        let base = MemoryBase::new();
        let t = TableId::new("tbl1");
        base.create_table(
            t.clone(),
            vec![FieldDef::new("fldName", "name", FieldKind::SingleLineText)],
        );
        base.insert_record(&t, "rec1", [(FieldId::new("fldName"), CellValue::text("A1"))]);
        (base, t)
    }

    #[test]
    fn failed_batch_writes_nothing() {
        let (base, t) = base();
        let err = base
            .write_cell_values(&[
                CellWrite {
                    table: t.clone(),
                    record: RecordId::new("rec1"),
                    field: FieldId::new("fldName"),
                    value: CellValue::text("changed"),
                },
                CellWrite {
                    table: t.clone(),
                    record: RecordId::new("recMissing"),
                    field: FieldId::new("fldName"),
                    value: CellValue::text("x"),
                },
            ])
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingRecord { .. }));
        assert_eq!(
            base.get(&t, &RecordId::new("rec1"), &FieldId::new("fldName")),
            CellValue::text("A1")
        );
    }

    #[test]
    fn metadata_mutations_bump_version() {
        let (base, t) = base();
        let v0 = base.version();
        base.add_field(&t, FieldDef::new("fldNum", "n", FieldKind::Number { precision: 0 }))
            .unwrap();
        assert!(base.version() > v0);
        assert!(base
            .add_field(&t, FieldDef::new("fldNum", "dup", FieldKind::Checkbox))
            .is_err());
    }

    #[test]
    fn batch_get_omits_unknown_ids() {
        let (base, t) = base();
        let got = base
            .batch_get_records(&t, &[RecordId::new("nope"), RecordId::new("rec1")])
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value(&FieldId::new("fldName")), CellValue::text("A1"));
    }
}
