//! Aggregates over any number of values. Every function here is also
//! available as a rollup.

use std::sync::Arc;

use tabula_common::{CellError, CellErrorKind, CellValue, LIST_SEPARATOR};

use crate::coercion::to_text;
use crate::function::{FnCaps, Function, flatten_args};
use crate::function_registry::register;

/// Numbers among the flattened arguments. Text that parses counts; other
/// values are skipped. The first error wins.
fn numbers(args: &[CellValue]) -> Result<Vec<f64>, CellError> {
    let mut out = Vec::new();
    for v in flatten_args(args) {
        match v {
            CellValue::Error(e) => return Err(e),
            CellValue::Number(n) => out.push(n),
            CellValue::Text(ref s) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    out.push(n);
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

macro_rules! reduction_caps {
    () => {
        fn caps(&self) -> FnCaps {
            FnCaps::PURE | FnCaps::REDUCTION | FnCaps::FLATTENS
        }
    };
}

/* ─────────────────────────── SUM() ──────────────────────────── */

#[derive(Debug)]
pub struct SumFn;

impl Function for SumFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "SUM"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        Ok(CellValue::Number(numbers(args)?.iter().sum()))
    }
}

/* ───────────────────────── AVERAGE() ────────────────────────── */

#[derive(Debug)]
pub struct AverageFn;

impl Function for AverageFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "AVERAGE"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let nums = numbers(args)?;
        if nums.is_empty() {
            return Err(CellError::new(CellErrorKind::Div)
                .with_message("AVERAGE of no numeric values"));
        }
        Ok(CellValue::Number(nums.iter().sum::<f64>() / nums.len() as f64))
    }
}

/* ──────────────────────── MIN() / MAX() ─────────────────────── */

#[derive(Debug)]
pub struct MinFn;

impl Function for MinFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "MIN"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let nums = numbers(args)?;
        Ok(CellValue::Number(
            nums.into_iter().reduce(f64::min).unwrap_or(0.0),
        ))
    }
}

#[derive(Debug)]
pub struct MaxFn;

impl Function for MaxFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "MAX"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let nums = numbers(args)?;
        Ok(CellValue::Number(
            nums.into_iter().reduce(f64::max).unwrap_or(0.0),
        ))
    }
}

/* ─────────────────── COUNT / COUNTA / COUNTALL ──────────────── */

#[derive(Debug)]
pub struct CountFn;

impl Function for CountFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "COUNT"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let n = flatten_args(args)
            .iter()
            .filter(|v| matches!(v, CellValue::Number(_)))
            .count();
        Ok(CellValue::Number(n as f64))
    }
}

#[derive(Debug)]
pub struct CountAFn;

impl Function for CountAFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "COUNTA"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let n = flatten_args(args).iter().filter(|v| !v.is_empty()).count();
        Ok(CellValue::Number(n as f64))
    }
}

#[derive(Debug)]
pub struct CountAllFn;

impl Function for CountAllFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "COUNTALL"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        Ok(CellValue::Number(flatten_args(args).len() as f64))
    }
}

/* ─────────────────────── CONCATENATE() ──────────────────────── */

#[derive(Debug)]
pub struct ConcatenateFn;

impl Function for ConcatenateFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "CONCATENATE"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let mut out = String::new();
        for v in flatten_args(args) {
            out.push_str(&to_text(&v)?);
        }
        Ok(CellValue::Text(out))
    }
}

/* ─────────────────────── ARRAY_JOIN() ───────────────────────── */

/// `ARRAY_JOIN(values, [separator])`, separator defaults to `", "`.
#[derive(Debug)]
pub struct ArrayJoinFn;

impl Function for ArrayJoinFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "ARRAY_JOIN"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let sep = match args.get(1) {
            Some(v) => to_text(v)?,
            None => LIST_SEPARATOR.to_string(),
        };
        let parts = args[0]
            .clone()
            .flatten()
            .iter()
            .filter(|v| !v.is_empty())
            .map(to_text)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CellValue::Text(parts.join(&sep)))
    }
}

/* ────────────────────── ARRAY_UNIQUE() ──────────────────────── */

#[derive(Debug)]
pub struct ArrayUniqueFn;

impl Function for ArrayUniqueFn {
    reduction_caps!();
    fn name(&self) -> &'static str {
        "ARRAY_UNIQUE"
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let mut out: Vec<CellValue> = Vec::new();
        for v in flatten_args(args) {
            if v.is_empty() || out.contains(&v) {
                continue;
            }
            out.push(v);
        }
        Ok(CellValue::Array(out))
    }
}

pub fn register_builtins() {
    register(Arc::new(SumFn));
    register(Arc::new(AverageFn));
    register(Arc::new(MinFn));
    register(Arc::new(MaxFn));
    register(Arc::new(CountFn));
    register(Arc::new(CountAFn));
    register(Arc::new(CountAllFn));
    register(Arc::new(ConcatenateFn));
    register(Arc::new(ArrayJoinFn));
    register(Arc::new(ArrayUniqueFn));
}
