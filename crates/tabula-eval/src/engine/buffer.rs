use std::cell::RefCell;

use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::{CellValue, FieldId, RecordId, TableId};

use crate::error::EngineError;
use crate::traits::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub table: TableId,
    pub record: RecordId,
    pub field: FieldId,
}

impl CellKey {
    pub fn new(table: &TableId, record: &RecordId, field: &FieldId) -> Self {
        Self {
            table: table.clone(),
            record: record.clone(),
            field: field.clone(),
        }
    }
}

/// Pass-local view over the record store.
///
/// Reads fall through to the store once per cell and are cached; writes stay
/// in the buffer until the coordinator commits them. Later units of a pass
/// read the buffered values of earlier ones.
pub struct PassView<'s> {
    store: &'s dyn RecordStore,
    base: RefCell<FxHashMap<CellKey, CellValue>>,
    // Records whose full snapshot is in `base`; absent fields are empty.
    loaded: RefCell<FxHashSet<(TableId, RecordId)>>,
    exists: RefCell<FxHashMap<(TableId, RecordId), bool>>,
    writes: FxHashMap<CellKey, CellValue>,
    write_order: Vec<CellKey>,
}

impl<'s> PassView<'s> {
    pub fn new(store: &'s dyn RecordStore) -> Self {
        Self {
            store,
            base: RefCell::new(FxHashMap::default()),
            loaded: RefCell::new(FxHashSet::default()),
            exists: RefCell::new(FxHashMap::default()),
            writes: FxHashMap::default(),
            write_order: Vec::new(),
        }
    }

    /// Current value: buffered if written in this pass, stored otherwise.
    pub fn get(&self, key: &CellKey) -> Result<CellValue, EngineError> {
        if let Some(v) = self.writes.get(key) {
            return Ok(v.clone());
        }
        self.base(key)
    }

    /// Stored value as of the start of the pass. Cells of missing records
    /// read as empty.
    pub fn base(&self, key: &CellKey) -> Result<CellValue, EngineError> {
        if let Some(v) = self.base.borrow().get(key) {
            return Ok(v.clone());
        }
        let rec = (key.table.clone(), key.record.clone());
        if self.loaded.borrow().contains(&rec) {
            return Ok(CellValue::Empty);
        }
        let value = match self.store.cell_value(&key.table, &key.record, &key.field) {
            Ok(v) => {
                self.exists.borrow_mut().insert(rec, true);
                v.unwrap_or_default()
            }
            Err(EngineError::MissingRecord { .. }) => {
                self.exists.borrow_mut().insert(rec, false);
                CellValue::Empty
            }
            Err(e) => return Err(e),
        };
        self.base.borrow_mut().insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn set(&mut self, key: CellKey, value: CellValue) {
        if !self.writes.contains_key(&key) {
            self.write_order.push(key.clone());
        }
        self.writes.insert(key, value);
    }

    /// Load whole records in one store call.
    pub fn prefetch(&self, table: &TableId, records: &[RecordId]) -> Result<(), EngineError> {
        let wanted: Vec<RecordId> = {
            let loaded = self.loaded.borrow();
            records
                .iter()
                .filter(|r| !loaded.contains(&(table.clone(), (*r).clone())))
                .cloned()
                .collect()
        };
        if wanted.is_empty() {
            return Ok(());
        }
        let snapshots = self.store.batch_get_records(table, &wanted)?;
        let mut base = self.base.borrow_mut();
        let mut loaded = self.loaded.borrow_mut();
        let mut exists = self.exists.borrow_mut();
        for r in &wanted {
            exists.insert((table.clone(), r.clone()), false);
        }
        for snap in snapshots {
            for (field, value) in snap.fields {
                base.entry(CellKey::new(table, &snap.id, &field))
                    .or_insert(value);
            }
            exists.insert((table.clone(), snap.id.clone()), true);
            loaded.insert((table.clone(), snap.id));
        }
        Ok(())
    }

    pub fn record_exists(&self, table: &TableId, record: &RecordId) -> Result<bool, EngineError> {
        let rec = (table.clone(), record.clone());
        if let Some(known) = self.exists.borrow().get(&rec) {
            return Ok(*known);
        }
        self.prefetch(table, std::slice::from_ref(record))?;
        Ok(self.exists.borrow().get(&rec).copied().unwrap_or(false))
    }

    pub fn is_written(&self, key: &CellKey) -> bool {
        self.writes.contains_key(key)
    }

    /// Buffered cells whose value differs from the stored one, in first
    /// write order, as `(key, stored, new)`.
    pub fn changes(&self) -> Result<Vec<(CellKey, CellValue, CellValue)>, EngineError> {
        let mut out = Vec::new();
        for key in &self.write_order {
            let new = &self.writes[key];
            let old = self.base(key)?;
            if &old != new {
                out.push((key.clone(), old, new.clone()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBase;
    use tabula_common::{FieldDef, FieldKind};

    #[test]
    fn buffered_writes_shadow_the_store() {
        let base = MemoryBase::new();
        let t = TableId::new("tbl1");
        let f = FieldId::new("fldName");
        base.create_table(t.clone(), vec![FieldDef::new("fldName", "name", FieldKind::SingleLineText)]);
        base.insert_record(&t, "rec1", [(f.clone(), CellValue::text("A1"))]);

        let mut view = PassView::new(&base);
        let key = CellKey::new(&t, &RecordId::new("rec1"), &f);
        assert_eq!(view.get(&key).unwrap(), CellValue::text("A1"));
        view.set(key.clone(), CellValue::text("AX"));
        assert_eq!(view.get(&key).unwrap(), CellValue::text("AX"));
        assert_eq!(view.base(&key).unwrap(), CellValue::text("A1"));
        // Store untouched until commit.
        assert_eq!(base.get(&t, &RecordId::new("rec1"), &f), CellValue::text("A1"));

        let changes = view.changes().unwrap();
        assert_eq!(changes.len(), 1);
        view.set(key.clone(), CellValue::text("A1"));
        assert!(view.changes().unwrap().is_empty());
    }

    #[test]
    fn missing_records_read_empty_and_do_not_exist() {
        let base = MemoryBase::new();
        let t = TableId::new("tbl1");
        base.create_table(t.clone(), vec![FieldDef::new("fldName", "name", FieldKind::SingleLineText)]);
        let view = PassView::new(&base);
        let key = CellKey::new(&t, &RecordId::new("ghost"), &FieldId::new("fldName"));
        assert_eq!(view.get(&key).unwrap(), CellValue::Empty);
        assert!(!view.record_exists(&t, &RecordId::new("ghost")).unwrap());
    }
}
