//! Value coercion shared by operators and builtins.

use std::cmp::Ordering;

use chrono::NaiveDate;
use tabula_common::{CellError, CellErrorKind, CellValue};

fn value_error(msg: impl Into<String>) -> CellError {
    CellError::new(CellErrorKind::Value).with_message(msg)
}

/// Numeric view of a value. Empty counts as zero; text must parse.
pub fn to_number(v: &CellValue) -> Result<f64, CellError> {
    match v {
        CellValue::Empty => Ok(0.0),
        CellValue::Error(e) => Err(e.clone()),
        CellValue::Text(s) if s.trim().is_empty() => Ok(0.0),
        CellValue::Array(items) if items.is_empty() => Ok(0.0),
        other => other
            .as_number()
            .ok_or_else(|| value_error(format!("cannot use '{}' as a number", other.display_text()))),
    }
}

pub fn to_text(v: &CellValue) -> Result<String, CellError> {
    match v {
        CellValue::Error(e) => Err(e.clone()),
        other => Ok(other.display_text()),
    }
}

pub fn to_date(v: &CellValue) -> Result<NaiveDate, CellError> {
    match v {
        CellValue::Date(d) => Ok(*d),
        CellValue::Error(e) => Err(e.clone()),
        CellValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| value_error(format!("cannot use '{s}' as a date"))),
        CellValue::Array(items) if items.len() == 1 => to_date(&items[0]),
        other => Err(value_error(format!(
            "cannot use '{}' as a date",
            other.display_text()
        ))),
    }
}

pub fn to_int(v: &CellValue) -> Result<i64, CellError> {
    let n = to_number(v)?;
    if !n.is_finite() {
        return Err(CellError::new(CellErrorKind::Num));
    }
    Ok(n.trunc() as i64)
}

fn is_numeric(v: &CellValue) -> bool {
    matches!(v, CellValue::Number(_) | CellValue::Boolean(_))
}

/// Ordering used by comparison operators.
///
/// Numbers compare numerically (empty counts as zero next to a number),
/// dates chronologically, everything else by case-insensitive text.
pub fn compare(a: &CellValue, b: &CellValue) -> Result<Ordering, CellError> {
    if let CellValue::Error(e) = a {
        return Err(e.clone());
    }
    if let CellValue::Error(e) = b {
        return Err(e.clone());
    }
    match (a, b) {
        (CellValue::Date(x), CellValue::Date(y)) => Ok(x.cmp(y)),
        (CellValue::Date(x), CellValue::Text(_)) => Ok(x.cmp(&to_date(b)?)),
        (CellValue::Text(_), CellValue::Date(y)) => Ok(to_date(a)?.cmp(y)),
        _ if (is_numeric(a) || a.is_empty()) && (is_numeric(b) || b.is_empty()) => {
            let (x, y) = (to_number(a)?, to_number(b)?);
            x.partial_cmp(&y)
                .ok_or_else(|| CellError::new(CellErrorKind::Num))
        }
        _ => {
            let x = a.display_text().to_lowercase();
            let y = b.display_text().to_lowercase();
            Ok(x.cmp(&y))
        }
    }
}
