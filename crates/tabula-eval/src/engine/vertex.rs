use bitflags::bitflags;
use smallvec::SmallVec;
use tabula_common::{FieldDef, TableId};
use tabula_parse::{ASTNode, ParserError};

/// Arena index of a field node inside one [`DependencyGraph`](super::DependencyGraph).
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldNodeId(pub(crate) u32);

impl FieldNodeId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub(crate) fn as_index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldCaps: u8 {
        /// Formula, lookup or rollup; never written by clients.
        const COMPUTED = 0b0000_0001;
        const LINK     = 0b0000_0010;
        /// Link whose cells hold a list of references.
        const PLURAL   = 0b0000_0100;
        /// First field of its table.
        const PRIMARY  = 0b0000_1000;
    }
}

/// How the records of a dependent relate to the records of its dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordMapping {
    /// A change on record `r` of the dependency affects record `r` of the
    /// dependent.
    SameRecord,
    /// A change on foreign record `f` affects every record listed in `f`'s
    /// `symmetric_field` cell. `link_field` is the dependent table's link.
    ViaLink {
        link_field: FieldNodeId,
        symmetric_field: FieldNodeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub node: FieldNodeId,
    pub mapping: RecordMapping,
}

#[derive(Debug, Clone)]
pub struct FieldNode {
    pub table: TableId,
    pub def: FieldDef,
    pub caps: FieldCaps,
    /// Parsed expression of a formula field.
    pub ast: Option<ASTNode>,
    pub parse_error: Option<ParserError>,
    /// Fields this one reads.
    pub dependencies: SmallVec<[Edge; 4]>,
    /// Fields reading this one.
    pub dependents: SmallVec<[Edge; 4]>,
    /// Counterpart on the foreign table, for link fields whose symmetric
    /// field exists.
    pub symmetric: Option<FieldNodeId>,
}

impl FieldNode {
    pub fn is_computed(&self) -> bool {
        self.caps.contains(FieldCaps::COMPUTED)
    }

    pub fn is_link(&self) -> bool {
        self.caps.contains(FieldCaps::LINK)
    }

    pub fn is_plural(&self) -> bool {
        self.caps.contains(FieldCaps::PLURAL)
    }

    /// `table.field`, as used in cycle reports and logs.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.table, self.def.id)
    }
}
