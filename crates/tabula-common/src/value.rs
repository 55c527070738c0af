use chrono::NaiveDate;
use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

use crate::{CellError, RecordId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Separator used when a list of values is rendered as text.
pub const LIST_SEPARATOR: &str = ", ";

/// Separator used when attachment names are rendered as text.
pub const ATTACHMENT_SEPARATOR: &str = ",";

/// One reference held by a link cell: the foreign record and its cached title.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkItem {
    pub id: RecordId,
    pub title: Option<String>,
}

impl LinkItem {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            title: None,
        }
    }

    pub fn titled(id: impl Into<RecordId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Some(title.into()),
        }
    }
}

/// Metadata of one stored attachment. The bytes live elsewhere.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentItem {
    pub id: String,
    pub name: String,
    pub token: String,
    pub size: u64,
    pub mimetype: String,
    pub path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A cell value as stored in a record or produced by the evaluator.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    /// Singular side of a link relationship.
    Link(LinkItem),
    /// Plural side of a link relationship; ordered, no duplicate ids.
    Links(Vec<LinkItem>),
    Attachments(Vec<AttachmentItem>),
    /// Multiple values read through a plural link.
    Array(Vec<CellValue>),
    Error(CellError),
}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::Empty => {}
            CellValue::Text(s) => s.hash(state),
            CellValue::Number(n) => n.to_bits().hash(state),
            CellValue::Boolean(b) => b.hash(state),
            CellValue::Date(d) => d.hash(state),
            CellValue::Link(item) => item.hash(state),
            CellValue::Links(items) => items.hash(state),
            CellValue::Attachments(items) => items.hash(state),
            CellValue::Array(values) => values.hash(state),
            CellValue::Error(e) => e.hash(state),
        }
    }
}

impl Eq for CellValue {}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    /// Build a plural link cell, dropping duplicate ids (first occurrence wins).
    /// An empty list collapses to `Empty`.
    pub fn links<I>(items: I) -> Self
    where
        I: IntoIterator<Item = LinkItem>,
    {
        let mut out: Vec<LinkItem> = Vec::new();
        for item in items {
            if !out.iter().any(|existing| existing.id == item.id) {
                out.push(item);
            }
        }
        if out.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Links(out)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            CellValue::Links(items) => items.is_empty(),
            CellValue::Attachments(items) => items.is_empty(),
            CellValue::Array(values) => values.iter().all(CellValue::is_empty),
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// Record ids referenced by a link cell, in cell order.
    pub fn link_ids(&self) -> Vec<RecordId> {
        match self {
            CellValue::Link(item) => vec![item.id.clone()],
            CellValue::Links(items) => items.iter().map(|i| i.id.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Link items held by a link cell, in cell order.
    pub fn link_items(&self) -> Vec<LinkItem> {
        match self {
            CellValue::Link(item) => vec![item.clone()],
            CellValue::Links(items) => items.clone(),
            _ => Vec::new(),
        }
    }

    pub fn contains_link(&self, id: &RecordId) -> bool {
        match self {
            CellValue::Link(item) => &item.id == id,
            CellValue::Links(items) => items.iter().any(|i| &i.id == id),
            _ => false,
        }
    }

    /// Text rendering used for titles, joins and string operators.
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::Link(item) => item.title.clone().unwrap_or_default(),
            CellValue::Links(items) => items
                .iter()
                .map(|i| i.title.clone().unwrap_or_default())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            CellValue::Attachments(items) => items
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(ATTACHMENT_SEPARATOR),
            CellValue::Array(values) => values
                .iter()
                .map(CellValue::display_text)
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            CellValue::Error(e) => e.kind.to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse::<f64>().ok(),
            CellValue::Array(values) if values.len() == 1 => values[0].as_number(),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Boolean(b) => *b,
            CellValue::Number(n) => *n != 0.0,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Date(_) => true,
            CellValue::Link(_) => true,
            CellValue::Links(items) => !items.is_empty(),
            CellValue::Attachments(items) => !items.is_empty(),
            CellValue::Array(values) => values.iter().any(CellValue::is_truthy),
            CellValue::Error(_) | CellValue::Empty => false,
        }
    }

    /// Flatten nested arrays into a single sequence of scalars.
    pub fn flatten(self) -> Vec<CellValue> {
        match self {
            CellValue::Array(values) => values.into_iter().flat_map(CellValue::flatten).collect(),
            other => vec![other],
        }
    }
}

/// Render whole numbers without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
