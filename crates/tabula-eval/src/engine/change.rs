use tabula_common::{CellValue, FieldId, RecordId, TableId};

/// One client write. `old_value` is what the client believed was stored; the
/// record store stays authoritative when the two disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub table: TableId,
    pub record: RecordId,
    pub field: FieldId,
    pub old_value: CellValue,
    pub new_value: CellValue,
}

impl CellChange {
    pub fn new(
        table: impl Into<TableId>,
        record: impl Into<RecordId>,
        field: impl Into<FieldId>,
        new_value: CellValue,
    ) -> Self {
        Self {
            table: table.into(),
            record: record.into(),
            field: field.into(),
            old_value: CellValue::Empty,
            new_value,
        }
    }

    pub fn with_old(mut self, old_value: CellValue) -> Self {
        self.old_value = old_value;
        self
    }
}

/// Ordered batch of client writes applied as one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<CellChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: CellChange) {
        self.changes.push(change);
    }

    /// Builder form of [`push`](Self::push) for a write with unknown old value.
    pub fn set(
        mut self,
        table: impl Into<TableId>,
        record: impl Into<RecordId>,
        field: impl Into<FieldId>,
        value: CellValue,
    ) -> Self {
        self.push(CellChange::new(table, record, field, value));
        self
    }

    pub fn changes(&self) -> &[CellChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Distinct tables written, in first-write order.
    pub fn tables(&self) -> Vec<TableId> {
        let mut out: Vec<TableId> = Vec::new();
        for c in &self.changes {
            if !out.contains(&c.table) {
                out.push(c.table.clone());
            }
        }
        out
    }
}

impl FromIterator<CellChange> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = CellChange>>(iter: I) -> Self {
        Self {
            changes: iter.into_iter().collect(),
        }
    }
}

/// One (table, record, field) executed in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropagationUnit {
    pub table: TableId,
    pub record: RecordId,
    pub field: FieldId,
}
