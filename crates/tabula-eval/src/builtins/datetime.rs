use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tabula_common::{CellError, CellErrorKind, CellValue};

use crate::coercion::{to_date, to_int, to_text};
use crate::function::Function;
use crate::function_registry::register;

/* ─────────────────────────── DATE() ─────────────────────────────── */

#[derive(Debug)]
pub struct DateFn;

impl Function for DateFn {
    fn name(&self) -> &'static str {
        "DATE"
    }
    fn min_args(&self) -> usize {
        3
    }
    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let y = to_int(&args[0])?;
        let m = to_int(&args[1])?;
        let d = to_int(&args[2])?;
        let date = i32::try_from(y)
            .ok()
            .zip(u32::try_from(m).ok())
            .zip(u32::try_from(d).ok())
            .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
            .ok_or_else(|| {
                CellError::new(CellErrorKind::Num).with_message(format!("invalid date {y}-{m}-{d}"))
            })?;
        Ok(CellValue::Date(date))
    }
}

/* ─────────────────────── YEAR / MONTH / DAY ─────────────────────── */

macro_rules! date_part_fn {
    ($ty:ident, $name:literal, $part:ident) => {
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
                if args[0].is_empty() {
                    return Ok(CellValue::Empty);
                }
                Ok(CellValue::Number(to_date(&args[0])?.$part() as f64))
            }
        }
    };
}

date_part_fn!(YearFn, "YEAR", year);
date_part_fn!(MonthFn, "MONTH", month);
date_part_fn!(DayFn, "DAY", day);

/* ─────────────────────── DATETIME_DIFF() ────────────────────────── */

/// `DATETIME_DIFF(date1, date2, [unit])`: `date1 - date2` in whole units.
/// Units: `day` (default), `week`, `month`, `year`.
#[derive(Debug)]
pub struct DatetimeDiffFn;

fn whole_months(from: NaiveDate, to: NaiveDate) -> i64 {
    let mut months =
        (to.year() as i64 - from.year() as i64) * 12 + to.month() as i64 - from.month() as i64;
    if months > 0 && to.day() < from.day() {
        months -= 1;
    } else if months < 0 && to.day() > from.day() {
        months += 1;
    }
    months
}

impl Function for DatetimeDiffFn {
    fn name(&self) -> &'static str {
        "DATETIME_DIFF"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError> {
        let d1 = to_date(&args[0])?;
        let d2 = to_date(&args[1])?;
        let unit = match args.get(2) {
            Some(u) => to_text(u)?.to_ascii_lowercase(),
            None => "day".to_string(),
        };
        let diff = match unit.trim_end_matches('s') {
            "day" | "d" => (d1 - d2).num_days(),
            "week" | "w" => (d1 - d2).num_weeks(),
            "month" | "m" => whole_months(d2, d1),
            "year" | "y" => whole_months(d2, d1) / 12,
            other => {
                return Err(CellError::new(CellErrorKind::Value)
                    .with_message(format!("unknown unit '{other}'")));
            }
        };
        Ok(CellValue::Number(diff as f64))
    }
}

pub fn register_builtins() {
    register(Arc::new(DateFn));
    register(Arc::new(YearFn));
    register(Arc::new(MonthFn));
    register(Arc::new(DayFn));
    register(Arc::new(DatetimeDiffFn));
}
