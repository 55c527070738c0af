//! Cell-level compute errors.
//!
//! - **`CellErrorKind`** : the canonical set of error markers a computed cell can show
//! - **`ErrorOrigin`**   : lightweight location info (which table/record/field failed first)
//! - **`CellError`**     : one struct that glues the two together
//!
//! A `CellError` never aborts a propagation pass. It is stored in the cell as
//! [`CellValue::Error`](crate::CellValue::Error) and rendered as its marker.

use std::{error::Error, fmt};

use crate::CellValue;

/// All recognised error markers.
///
/// **Note:** names are CamelCase while `Display` renders the marker shown in
/// the grid (`#DIV/0!`, …).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CellErrorKind {
    /// Type mismatch or unusable operand.
    Value,
    /// Division by zero.
    Div,
    /// Reference to a field or record that cannot be resolved.
    Ref,
    /// Unknown function name.
    Name,
    /// Numeric overflow or invalid numeric result.
    Num,
    /// Value not available.
    Na,
    /// Operator or function shape not implemented.
    NImpl,
}

impl fmt::Display for CellErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Value => "#VALUE!",
            Self::Div => "#DIV/0!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
            Self::Na => "#N/A",
            Self::NImpl => "#N/IMPL!",
        })
    }
}

impl CellErrorKind {
    /// Parse a rendered marker back into its kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "#value!" => Some(Self::Value),
            "#div/0!" => Some(Self::Div),
            "#ref!" => Some(Self::Ref),
            "#name?" => Some(Self::Name),
            "#num!" => Some(Self::Num),
            "#n/a" => Some(Self::Na),
            "#n/impl!" => Some(Self::NImpl),
            _ => None,
        }
    }
}

/// Where an error first occurred, if it did not occur in the cell showing it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ErrorOrigin {
    pub table: Option<String>,
    pub record: Option<String>,
    pub field: Option<String>,
}

/// The error payload of a computed cell.
///
/// It combines:
/// * **kind**    – the mandatory marker
/// * **message** – optional human explanation
/// * **origin**  – optional location of the first failure
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellError {
    pub kind: CellErrorKind,
    pub message: Option<String>,
    pub origin: Option<ErrorOrigin>,
}

/* ───────────────────── Constructors & helpers ─────────────────────── */

impl From<CellErrorKind> for CellError {
    fn from(kind: CellErrorKind) -> Self {
        Self {
            kind,
            message: None,
            origin: None,
        }
    }
}

impl CellError {
    /// Basic constructor (no message, no origin).
    pub fn new(kind: CellErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attach the location where the error first occurred.
    /// An origin that is already set is kept.
    pub fn with_origin(mut self, table: &str, record: &str, field: &str) -> Self {
        if self.origin.is_none() {
            self.origin = Some(ErrorOrigin {
                table: Some(table.to_string()),
                record: Some(record.to_string()),
                field: Some(field.to_string()),
            });
        }
        self
    }
}

/* ───────────────────────── Display / Error ────────────────────────── */

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }

        if let Some(ErrorOrigin {
            table: Some(table),
            record: Some(record),
            field: Some(field),
        }) = &self.origin
        {
            write!(f, " [origin: {table}/{record}/{field}]")?;
        }

        Ok(())
    }
}

impl Error for CellError {}

impl From<CellError> for CellValue {
    fn from(error: CellError) -> Self {
        CellValue::Error(error)
    }
}

impl PartialEq<str> for CellError {
    fn eq(&self, other: &str) -> bool {
        self.kind.to_string() == other
    }
}

impl PartialEq<&str> for CellError {
    fn eq(&self, other: &&str) -> bool {
        self.kind.to_string() == *other
    }
}
