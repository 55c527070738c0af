//! Field definitions as the metadata store hands them to the engine.

use crate::{FieldId, TableId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cardinality of a link field, seen from the table that owns it.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Relationship {
    /// Many records here point at one foreign record (singular cell).
    ManyOne,
    /// One record here holds many foreign records (plural cell).
    OneMany,
    ManyMany,
    OneOne,
}

impl Relationship {
    /// Relationship the symmetric field on the foreign table must carry.
    pub fn complement(self) -> Self {
        match self {
            Relationship::ManyOne => Relationship::OneMany,
            Relationship::OneMany => Relationship::ManyOne,
            Relationship::ManyMany => Relationship::ManyMany,
            Relationship::OneOne => Relationship::OneOne,
        }
    }

    /// Whether a cell of this side holds a list of references.
    pub fn is_plural(self) -> bool {
        matches!(self, Relationship::OneMany | Relationship::ManyMany)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkOptions {
    pub relationship: Relationship,
    pub foreign_table_id: TableId,
    /// Foreign field whose value is cached as the link title.
    pub lookup_field_id: FieldId,
    pub symmetric_field_id: FieldId,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormulaOptions {
    /// Expression text; fields are referenced as `{fldId}`.
    pub expression: String,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupOptions {
    pub link_field_id: FieldId,
    /// Field on the link's foreign table to read.
    pub lookup_field_id: FieldId,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RollupFunction {
    Sum,
    Average,
    Min,
    Max,
    /// Count of numeric values.
    Count,
    /// Count of non-empty values.
    CountA,
    /// Count of linked values, empty included.
    CountAll,
    Concatenate,
    ArrayJoin,
    ArrayUnique,
    And,
    Or,
}

impl RollupFunction {
    /// Name of the formula builtin implementing the same aggregate.
    pub fn builtin_name(self) -> &'static str {
        match self {
            RollupFunction::Sum => "SUM",
            RollupFunction::Average => "AVERAGE",
            RollupFunction::Min => "MIN",
            RollupFunction::Max => "MAX",
            RollupFunction::Count => "COUNT",
            RollupFunction::CountA => "COUNTA",
            RollupFunction::CountAll => "COUNTALL",
            RollupFunction::Concatenate => "CONCATENATE",
            RollupFunction::ArrayJoin => "ARRAY_JOIN",
            RollupFunction::ArrayUnique => "ARRAY_UNIQUE",
            RollupFunction::And => "AND",
            RollupFunction::Or => "OR",
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RollupOptions {
    pub link_field_id: FieldId,
    pub lookup_field_id: FieldId,
    pub function: RollupFunction,
}

/// Declared type of a field together with its type-specific options.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    SingleLineText,
    LongText,
    Number { precision: u8 },
    Checkbox,
    Date,
    Attachment,
    Link(LinkOptions),
    Formula(FormulaOptions),
    Lookup(LookupOptions),
    Rollup(RollupOptions),
}

impl FieldKind {
    pub fn is_computed(&self) -> bool {
        matches!(
            self,
            FieldKind::Formula(_) | FieldKind::Lookup(_) | FieldKind::Rollup(_)
        )
    }

    pub fn link_options(&self) -> Option<&LinkOptions> {
        match self {
            FieldKind::Link(opts) => Some(opts),
            _ => None,
        }
    }

    /// `(link field, looked-up field)` of a lookup or rollup.
    pub fn lookup_source(&self) -> Option<(&FieldId, &FieldId)> {
        match self {
            FieldKind::Lookup(o) => Some((&o.link_field_id, &o.lookup_field_id)),
            FieldKind::Rollup(o) => Some((&o.link_field_id, &o.lookup_field_id)),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(id: impl Into<FieldId>, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.kind.is_computed()
    }

    pub fn link_options(&self) -> Option<&LinkOptions> {
        self.kind.link_options()
    }

    /// Definition of the symmetric field the CRUD layer creates alongside a
    /// new link field. `own_table` is the table owning `self` and
    /// `own_primary` its primary field.
    pub fn symmetric_counterpart(
        &self,
        own_table: &TableId,
        own_primary: &FieldId,
        name: impl Into<String>,
    ) -> Option<FieldDef> {
        let opts = self.link_options()?;
        Some(FieldDef::new(
            opts.symmetric_field_id.clone(),
            name,
            FieldKind::Link(LinkOptions {
                relationship: opts.relationship.complement(),
                foreign_table_id: own_table.clone(),
                lookup_field_id: own_primary.clone(),
                symmetric_field_id: self.id.clone(),
            }),
        ))
    }
}
