//! Shaping of lookup and rollup results from the values read through a link.

use tabula_common::{CellError, CellErrorKind, CellValue, RollupFunction};

use crate::function::FnCaps;
use crate::function_registry;
use crate::interpreter::settle;

/// Value of a lookup field given the looked-up values of the linked records,
/// in link order. A singular link yields the single value; a plural link an
/// array with nested arrays flattened.
pub fn lookup_result(plural: bool, values: Vec<CellValue>) -> CellValue {
    if !plural {
        return settle(values.into_iter().next().unwrap_or_default());
    }
    let flat: Vec<CellValue> = values.into_iter().flat_map(CellValue::flatten).collect();
    settle(CellValue::Array(flat))
}

/// Value of a rollup field: the rollup's aggregate applied to the
/// looked-up values.
pub fn rollup_result(function: RollupFunction, values: Vec<CellValue>) -> CellValue {
    let name = function.builtin_name();
    let Some(f) = function_registry::get(name) else {
        return CellValue::Error(
            CellError::new(CellErrorKind::Name).with_message(format!("Unknown rollup {name}")),
        );
    };
    if !f.caps().contains(FnCaps::REDUCTION) {
        return CellValue::Error(
            CellError::new(CellErrorKind::NImpl)
                .with_message(format!("{name} cannot aggregate values")),
        );
    }
    match f.eval(&[CellValue::Array(values)]) {
        Ok(v) => settle(v),
        Err(e) => CellValue::Error(e),
    }
}
