use std::sync::Arc;

use tabula_common::{CellError, CellErrorKind, CellValue};

use crate::coercion::{to_int, to_text};
use crate::function::Function;
use crate::function_registry::register;

macro_rules! unary_text_fn {
    ($ty:ident, $name:literal, $body:expr) => {
        #[derive(Debug)]
        pub struct $ty;

        impl Function for $ty {
            fn name(&self) -> &'static str {
                $name
            }
            fn min_args(&self) -> usize {
                1
            }
            fn max_args(&self) -> Option<usize> {
                Some(1)
            }
            fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
                let s = to_text(&args[0])?;
                let f: fn(&str) -> CellValue = $body;
                Ok(f(&s))
            }
        }
    };
}

unary_text_fn!(UpperFn, "UPPER", |s| CellValue::Text(s.to_uppercase()));
unary_text_fn!(LowerFn, "LOWER", |s| CellValue::Text(s.to_lowercase()));
unary_text_fn!(LenFn, "LEN", |s| CellValue::Number(s.chars().count() as f64));
unary_text_fn!(TrimFn, "TRIM", |s| CellValue::Text(
    s.split_whitespace().collect::<Vec<_>>().join(" ")
));

/// Character count argument of LEFT/RIGHT; defaults to one.
fn char_count(args: &[CellValue]) -> Result<usize, CellError> {
    let n = match args.get(1) {
        Some(v) => to_int(v)?,
        None => 1,
    };
    usize::try_from(n).map_err(|_| {
        CellError::new(CellErrorKind::Value).with_message("character count must not be negative")
    })
}

/* ─────────────────────────── LEFT() ─────────────────────────────── */

#[derive(Debug)]
pub struct LeftFn;

impl Function for LeftFn {
    fn name(&self) -> &'static str {
        "LEFT"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let s = to_text(&args[0])?;
        let n = char_count(args)?;
        Ok(CellValue::Text(s.chars().take(n).collect()))
    }
}

/* ─────────────────────────── RIGHT() ────────────────────────────── */

#[derive(Debug)]
pub struct RightFn;

impl Function for RightFn {
    fn name(&self) -> &'static str {
        "RIGHT"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn max_args(&self) -> Option<usize> {
        Some(2)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let s = to_text(&args[0])?;
        let n = char_count(args)?;
        let len = s.chars().count();
        Ok(CellValue::Text(s.chars().skip(len.saturating_sub(n)).collect()))
    }
}

pub fn register_builtins() {
    register(Arc::new(UpperFn));
    register(Arc::new(LowerFn));
    register(Arc::new(LenFn));
    register(Arc::new(TrimFn));
    register(Arc::new(LeftFn));
    register(Arc::new(RightFn));
}
