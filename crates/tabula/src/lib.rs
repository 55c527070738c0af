//! Meta crate that re-exports the Tabula building blocks. Downstream users
//! can depend on this crate and opt into specific layers via feature flags
//! while keeping access to the underlying crates.

#[cfg(feature = "common")]
pub use tabula_common as common;

#[cfg(feature = "parse")]
pub use tabula_parse as parse;

#[cfg(feature = "eval")]
pub use tabula_eval as eval;

#[cfg(feature = "common")]
pub use tabula_common::{
    CellError, CellErrorKind, CellValue, FieldDef, FieldId, FieldKind, LinkItem, RecordId,
    Relationship, TableId,
};

#[cfg(feature = "eval")]
pub use tabula_eval::{
    ChangeSet, ChangeSink, EngineConfig, EngineError, FieldMetadataStore, PassReport,
    PropagationEngine, RecordStore, RecordUpdate,
};
