use crate::{
    coercion::{compare, to_number, to_text},
    function::check_arity,
    function_registry,
    traits::EvaluationContext,
};
use chrono::{Duration, NaiveDate};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use tabula_common::{CellError, CellErrorKind, CellValue, FieldId};
use tabula_parse::{ASTNode, ASTNodeType};

pub struct Interpreter<'a> {
    pub context: &'a dyn EvaluationContext,
    // A field referenced twice in one expression is read once.
    reference_cache: RefCell<FxHashMap<FieldId, Result<CellValue, CellError>>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(context: &'a dyn EvaluationContext) -> Self {
        Self {
            context,
            reference_cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// Evaluate a formula and shape the result for storage: arrays become
    /// their joined text, empty results become `Empty`, errors become an
    /// error cell.
    pub fn evaluate_formula(&self, node: &ASTNode) -> CellValue {
        match self.evaluate_ast(node) {
            Ok(CellValue::Array(items)) => settle(CellValue::Text(
                CellValue::Array(items).display_text(),
            )),
            Ok(v) => settle(v),
            Err(e) => CellValue::Error(e),
        }
    }

    pub fn evaluate_ast(&self, node: &ASTNode) -> Result<CellValue, CellError> {
        match &node.node_type {
            ASTNodeType::Literal(v) => Ok(v.clone()),
            ASTNodeType::Reference { field_id, .. } => self.resolve_reference(field_id),
            ASTNodeType::UnaryOp { op, expr } => self.eval_unary(op, expr),
            ASTNodeType::BinaryOp { op, left, right } => self.eval_binary(op, left, right),
            ASTNodeType::Function { name, args } => self.eval_function(name, args),
        }
    }

    fn resolve_reference(&self, field: &FieldId) -> Result<CellValue, CellError> {
        if let Some(hit) = self.reference_cache.borrow().get(field) {
            return hit.clone();
        }
        let v = self.context.field_value(field).and_then(|v| match v {
            CellValue::Error(e) => Err(e),
            other => Ok(other),
        });
        self.reference_cache
            .borrow_mut()
            .insert(field.clone(), v.clone());
        v
    }

    fn eval_unary(&self, op: &str, expr: &ASTNode) -> Result<CellValue, CellError> {
        let v = self.evaluate_ast(expr)?;
        let n = to_number(&v)?;
        let out = match op {
            "-" => -n,
            "+" => n,
            "%" => n / 100.0,
            _ => {
                return Err(CellError::new(CellErrorKind::NImpl)
                    .with_message(format!("Unary op {op}")));
            }
        };
        finite(out)
    }

    fn eval_binary(
        &self,
        op: &str,
        left: &ASTNode,
        right: &ASTNode,
    ) -> Result<CellValue, CellError> {
        let l = self.evaluate_ast(left)?;
        let r = self.evaluate_ast(right)?;

        match op {
            "&" => Ok(CellValue::Text(format!("{}{}", to_text(&l)?, to_text(&r)?))),
            "=" | "<>" | "<" | ">" | "<=" | ">=" => {
                let ord = compare(&l, &r)?;
                let b = match op {
                    "=" => ord == Ordering::Equal,
                    "<>" => ord != Ordering::Equal,
                    "<" => ord == Ordering::Less,
                    ">" => ord == Ordering::Greater,
                    "<=" => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                Ok(CellValue::Boolean(b))
            }
            "+" | "-" => match (&l, &r) {
                (CellValue::Date(d), _) if !matches!(r, CellValue::Date(_)) => {
                    let days = to_number(&r)?;
                    shift_date(*d, if op == "+" { days } else { -days })
                }
                (_, CellValue::Date(d)) if op == "+" && !matches!(l, CellValue::Date(_)) => {
                    shift_date(*d, to_number(&l)?)
                }
                (CellValue::Date(a), CellValue::Date(b)) if op == "-" => {
                    Ok(CellValue::Number((*a - *b).num_days() as f64))
                }
                _ => {
                    let (x, y) = (to_number(&l)?, to_number(&r)?);
                    finite(if op == "+" { x + y } else { x - y })
                }
            },
            "*" => finite(to_number(&l)? * to_number(&r)?),
            "/" => {
                let y = to_number(&r)?;
                if y == 0.0 {
                    return Err(CellError::new(CellErrorKind::Div));
                }
                finite(to_number(&l)? / y)
            }
            "^" => finite(to_number(&l)?.powf(to_number(&r)?)),
            _ => Err(CellError::new(CellErrorKind::NImpl)
                .with_message(format!("Binary op {op}"))),
        }
    }

    fn eval_function(&self, name: &str, args: &[ASTNode]) -> Result<CellValue, CellError> {
        if name.eq_ignore_ascii_case("IF") {
            return self.eval_if(args);
        }
        let Some(f) = function_registry::get(name) else {
            return Err(CellError::new(CellErrorKind::Name)
                .with_message(format!("Unknown function {name}")));
        };
        check_arity(f.as_ref(), args.len())?;
        let values = args
            .iter()
            .map(|a| self.evaluate_ast(a))
            .collect::<Result<Vec<_>, _>>()?;
        f.eval(&values)
    }

    /// `IF(condition, then, [else])`. Only the selected branch is evaluated.
    fn eval_if(&self, args: &[ASTNode]) -> Result<CellValue, CellError> {
        if !(2..=3).contains(&args.len()) {
            return Err(CellError::new(CellErrorKind::Value)
                .with_message(format!("IF expects 2 or 3 arguments, got {}", args.len())));
        }
        let cond = self.evaluate_ast(&args[0])?;
        if cond.is_truthy() {
            self.evaluate_ast(&args[1])
        } else if let Some(otherwise) = args.get(2) {
            self.evaluate_ast(otherwise)
        } else {
            Ok(CellValue::Empty)
        }
    }
}

/// Empty-looking values are stored as `Empty`.
pub fn settle(v: CellValue) -> CellValue {
    if v.is_empty() { CellValue::Empty } else { v }
}

fn finite(n: f64) -> Result<CellValue, CellError> {
    if n.is_finite() {
        Ok(CellValue::Number(n))
    } else {
        Err(CellError::new(CellErrorKind::Num))
    }
}

fn shift_date(d: NaiveDate, days: f64) -> Result<CellValue, CellError> {
    if !days.is_finite() || days.abs() > 3.0e6 {
        return Err(CellError::new(CellErrorKind::Num));
    }
    d.checked_add_signed(Duration::days(days.trunc() as i64))
        .map(CellValue::Date)
        .ok_or_else(|| CellError::new(CellErrorKind::Num).with_message("date out of range"))
}
