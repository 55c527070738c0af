//! Logical builtins. `IF` is not here: the interpreter evaluates it lazily
//! so that the branch not taken is never computed.

use std::sync::Arc;

use tabula_common::{CellError, CellValue};

use crate::function::{FnCaps, Function, flatten_args};
use crate::function_registry::register;

/* ─────────────────────────── AND() ──────────────────────────────── */

/// True when every value is truthy. Empty values are skipped, so a rollup
/// over no links is true.
#[derive(Debug)]
pub struct AndFn;

impl Function for AndFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION | FnCaps::FLATTENS
    }
    fn name(&self) -> &'static str {
        "AND"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        for v in flatten_args(args) {
            match v {
                CellValue::Error(e) => return Err(e),
                v if v.is_empty() => {}
                v if !v.is_truthy() => return Ok(CellValue::Boolean(false)),
                _ => {}
            }
        }
        Ok(CellValue::Boolean(true))
    }
}

/* ─────────────────────────── OR() ───────────────────────────────── */

#[derive(Debug)]
pub struct OrFn;

impl Function for OrFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION | FnCaps::FLATTENS
    }
    fn name(&self) -> &'static str {
        "OR"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let mut found = false;
        for v in flatten_args(args) {
            match v {
                CellValue::Error(e) => return Err(e),
                v if v.is_truthy() => found = true,
                _ => {}
            }
        }
        Ok(CellValue::Boolean(found))
    }
}

/* ─────────────────────────── NOT() ──────────────────────────────── */

#[derive(Debug)]
pub struct NotFn;

impl Function for NotFn {
    fn name(&self) -> &'static str {
        "NOT"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        match &args[0] {
            CellValue::Error(e) => Err(e.clone()),
            v => Ok(CellValue::Boolean(!v.is_truthy())),
        }
    }
}

pub fn register_builtins() {
    register(Arc::new(AndFn));
    register(Arc::new(OrFn));
    register(Arc::new(NotFn));
}
