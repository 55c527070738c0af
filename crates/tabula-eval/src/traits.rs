//! Interfaces to the collaborators the engine reads from and writes to.
//!
//! The engine never owns table data. Field definitions come from a
//! [`FieldMetadataStore`], cell values from a [`RecordStore`], and committed
//! derived writes leave through a [`ChangeSink`].

use rustc_hash::FxHashMap;
use tabula_common::{CellError, CellValue, FieldDef, FieldId, RecordId, TableId};

use crate::error::EngineError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ───────────────────────────── Metadata ────────────────────────────── */

pub trait FieldMetadataStore: Send + Sync {
    /// Ordered field definitions of a table. The first one is the primary field.
    fn fields_for_table(&self, table: &TableId) -> Result<Vec<FieldDef>, EngineError>;

    fn field(&self, table: &TableId, field: &FieldId) -> Result<FieldDef, EngineError> {
        self.fields_for_table(table)?
            .into_iter()
            .find(|f| &f.id == field)
            .ok_or_else(|| EngineError::MissingField {
                table: table.clone(),
                field: field.clone(),
            })
    }

    /// Monotonic counter bumped on every committed metadata mutation.
    fn version(&self) -> u64;
}

/* ───────────────────────────── Records ─────────────────────────────── */

/// The stored values of one record. Absent keys are empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub id: RecordId,
    pub fields: FxHashMap<FieldId, CellValue>,
}

impl RecordSnapshot {
    pub fn value(&self, field: &FieldId) -> CellValue {
        self.fields.get(field).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub table: TableId,
    pub record: RecordId,
    pub field: FieldId,
    pub value: CellValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitResult {
    pub written: usize,
}

pub trait RecordStore: Send + Sync {
    /// `Ok(None)` when the record exists but the cell is empty,
    /// `MissingRecord` when the record does not exist.
    fn cell_value(
        &self,
        table: &TableId,
        record: &RecordId,
        field: &FieldId,
    ) -> Result<Option<CellValue>, EngineError>;

    /// Snapshots for the requested ids, in request order. Unknown ids are
    /// omitted rather than reported.
    fn batch_get_records(
        &self,
        table: &TableId,
        records: &[RecordId],
    ) -> Result<Vec<RecordSnapshot>, EngineError>;

    /// All record ids of a table, in table order.
    fn record_ids(&self, table: &TableId) -> Result<Vec<RecordId>, EngineError>;

    /// Apply every write or none of them.
    fn write_cell_values(&self, writes: &[CellWrite]) -> Result<CommitResult, EngineError>;
}

/* ──────────────────────────── Notifications ────────────────────────── */

/// One field change inside a record update, shaped like the document
/// layer's `setRecord` operation.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, PartialEq)]
pub struct SetRecordOp {
    pub field_id: FieldId,
    pub old_cell_value: CellValue,
    pub new_cell_value: CellValue,
}

/// All committed changes of one record in one pass.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub table: TableId,
    pub record: RecordId,
    pub ops: Vec<SetRecordOp>,
}

pub trait ChangeSink: Send + Sync {
    fn publish(&self, update: RecordUpdate);
}

/// Sink that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ChangeSink for NoopSink {
    fn publish(&self, _update: RecordUpdate) {}
}

/* ───────────────────────────── Evaluation ──────────────────────────── */

/// Values visible to a formula while it is evaluated for one record.
pub trait EvaluationContext {
    /// Value of `field` for the record under evaluation, shaped for formula
    /// use (link fields resolve to their titles).
    fn field_value(&self, field: &FieldId) -> Result<CellValue, CellError>;
}
