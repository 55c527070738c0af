use std::time::Duration;

use tabula_common::{FieldId, RecordId, TableId};
use tabula_parse::ParserError;
use thiserror::Error;

/// Pass-level and definition-level failures.
///
/// Cell-level problems are not represented here: they become
/// [`CellError`](tabula_common::CellError) values stored in the affected cell.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Adding or altering a field would close a dependency cycle.
    /// Raised at definition time only.
    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A link and its symmetric counterpart disagree, or a link points at a
    /// record that does not exist. Aborts the whole change-set.
    #[error("referential inconsistency: {0}")]
    ReferentialInconsistency(String),

    /// Records needed by the pass stayed locked by another pass for too long.
    /// The caller may resubmit the same change-set.
    #[error("timed out after {waited:?} waiting for records held by another pass")]
    ResourceTimeout { waited: Duration },

    #[error("field {field} not found in table {table}")]
    MissingField { table: TableId, field: FieldId },

    #[error("record {record} not found in table {table}")]
    MissingRecord { table: TableId, record: RecordId },

    #[error("field {field} in table {table} is computed and cannot be written")]
    ReadOnlyField { table: TableId, field: FieldId },

    #[error("invalid value for {table}/{record}/{field}: {reason}")]
    InvalidCellValue {
        table: TableId,
        record: RecordId,
        field: FieldId,
        reason: String,
    },

    #[error("invalid definition for field {field}: {reason}")]
    InvalidFieldDefinition { field: FieldId, reason: String },

    #[error("expression of field {field} does not parse: {source}")]
    Parse {
        field: FieldId,
        #[source]
        source: ParserError,
    },

    /// A unit was scheduled into a step that already ran.
    #[error("propagation plan violated: {0}")]
    PlanViolation(String),

    #[error("record store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Whether resubmitting the same change-set may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ResourceTimeout { .. })
    }
}
