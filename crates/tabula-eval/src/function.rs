use bitflags::bitflags;
use tabula_common::{CellError, CellErrorKind, CellValue};

bitflags! {
    /// Describes the static capabilities of a builtin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FnCaps: u8 {
        /// Same inputs always give the same output.
        const PURE      = 0b0000_0001;
        /// Folds any number of values into one; usable as a rollup.
        const REDUCTION = 0b0000_0010;
        /// Accepts arrays and flattens them before use.
        const FLATTENS  = 0b0000_0100;
    }
}

/// A formula builtin. Arguments arrive fully evaluated; errors in arguments
/// have already short-circuited in the interpreter unless the function is
/// given them through an array.
pub trait Function: Send + Sync + 'static {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE
    }

    fn name(&self) -> &'static str;

    fn min_args(&self) -> usize {
        0
    }

    /// `None` means variadic.
    fn max_args(&self) -> Option<usize> {
        None
    }

    fn eval(&self, args: &[CellValue]) -> Result<CellValue, CellError>;
}

/// Reject calls with the wrong number of arguments.
pub fn check_arity(f: &dyn Function, given: usize) -> Result<(), CellError> {
    let too_few = given < f.min_args();
    let too_many = f.max_args().is_some_and(|max| given > max);
    if too_few || too_many {
        let expected = match f.max_args() {
            Some(max) if max == f.min_args() => format!("{max}"),
            Some(max) => format!("{} to {max}", f.min_args()),
            None => format!("at least {}", f.min_args()),
        };
        return Err(CellError::new(CellErrorKind::Value).with_message(format!(
            "{} expects {expected} argument(s), got {given}",
            f.name()
        )));
    }
    Ok(())
}

/// Scalars of every argument, arrays expanded in order.
pub fn flatten_args(args: &[CellValue]) -> Vec<CellValue> {
    args.iter().cloned().flat_map(CellValue::flatten).collect()
}
