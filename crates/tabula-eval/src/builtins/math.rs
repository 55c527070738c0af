use std::sync::Arc;

use tabula_common::{CellError, CellErrorKind, CellValue};

use crate::coercion::{to_int, to_number};
use crate::function::Function;
use crate::function_registry::register;

/* ─────────────────────────── ROUND() ────────────────────────────── */

/// `ROUND(number, [digits])`, halves away from zero.
#[derive(Debug)]
pub struct RoundFn;

impl Function for RoundFn {
    fn name(&self) -> &'static str {
        "ROUND"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let n = to_number(&args[0])?;
        let digits = match args.get(1) {
            Some(d) => to_int(d)?,
            None => 0,
        };
        if !(-15..=15).contains(&digits) {
            return Err(CellError::new(CellErrorKind::Num)
                .with_message("ROUND digits out of range"));
        }
        let factor = 10f64.powi(digits as i32);
        Ok(CellValue::Number((n * factor).round() / factor))
    }
}

/* ─────────────────────────── ABS() ──────────────────────────────── */

#[derive(Debug)]
pub struct AbsFn;

impl Function for AbsFn {
    fn name(&self) -> &'static str {
        "ABS"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(1)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        Ok(CellValue::Number(to_number(&args[0])?.abs()))
    }
}

pub fn register_builtins() {
    register(Arc::new(RoundFn));
    register(Arc::new(AbsFn));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_half_away_from_zero() {
        assert_eq!(
            RoundFn.eval(&[CellValue::Number(2.5)]).unwrap(),
            CellValue::Number(3.0)
        );
        assert_eq!(
            RoundFn
                .eval(&[CellValue::Number(-1.234), CellValue::Number(2.0)])
                .unwrap(),
            CellValue::Number(-1.23)
        );
    }

    #[test]
    fn round_rejects_digits_out_of_range() {
        for digits in [16.0, -16.0, -1e300, 1e300] {
            let err = RoundFn
                .eval(&[CellValue::Number(1.5), CellValue::Number(digits)])
                .unwrap_err();
            assert_eq!(err.kind, CellErrorKind::Num);
        }
    }

    #[test]
    fn abs_rejects_text() {
        let err = AbsFn.eval(&[CellValue::text("abc")]).unwrap_err();
        assert_eq!(err.kind, CellErrorKind::Value);
    }
}
