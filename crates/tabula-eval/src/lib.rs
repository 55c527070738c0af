pub mod coercion;
pub mod error;
pub mod function;
pub mod function_registry;
pub mod interpreter;
pub mod lookup;
pub mod memory;
pub mod traits;

pub mod builtins;

pub mod engine;

pub use engine::{
    ChangeSet, CellChange, DependencyGraph, EngineConfig, PassReport, PassState,
    PropagationEngine, PropagationUnit, new_engine,
};
pub use error::EngineError;
pub use memory::{MemoryBase, RecordingSink};
pub use traits::{
    CellWrite, ChangeSink, CommitResult, EvaluationContext, FieldMetadataStore, NoopSink,
    RecordSnapshot, RecordStore, RecordUpdate, SetRecordOp,
};
