//! Both-sides consistency of link fields.
//!
//! A client write to link field `L` of record `r` (table A) changes the
//! symmetric field `S` (table B) of every foreign record added to or removed
//! from `r.L`. When `S` is singular an added foreign record `f` is taken from
//! whatever record `p` it pointed at before, and `f` is removed from `p.L`.
//! That cascade stops after one hop because `f.S` already points at `r`.

use rustc_hash::{FxHashMap, FxHashSet};
use tabula_common::{CellValue, LinkItem, RecordId, TableId};

use super::buffer::{CellKey, PassView};
use super::graph::DependencyGraph;
use super::planner::Plan;
use super::vertex::{FieldNode, FieldNodeId};
use crate::error::EngineError;

pub struct LinkSynchronizer<'g> {
    graph: &'g DependencyGraph,
}

/// The two fields of a link relationship, resolved in the graph.
#[derive(Debug, Clone, Copy)]
struct LinkPair<'g> {
    link: FieldNodeId,
    symmetric: FieldNodeId,
    link_node: &'g FieldNode,
    symmetric_node: &'g FieldNode,
}

impl<'g> LinkSynchronizer<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self { graph }
    }

    fn pair(&self, link: FieldNodeId) -> Result<LinkPair<'g>, EngineError> {
        let link_node = self.graph.node(link);
        let opts = link_node.def.link_options().ok_or_else(|| {
            EngineError::ReferentialInconsistency(format!(
                "{} is not a link field",
                link_node.qualified_name()
            ))
        })?;
        let symmetric = link_node.symmetric.ok_or_else(|| {
            EngineError::ReferentialInconsistency(format!(
                "symmetric field {}.{} of {} does not exist",
                opts.foreign_table_id,
                opts.symmetric_field_id,
                link_node.qualified_name()
            ))
        })?;
        self.graph
            .check_symmetric_pair(link, symmetric)
            .map_err(EngineError::ReferentialInconsistency)?;
        Ok(LinkPair {
            link,
            symmetric,
            link_node,
            symmetric_node: self.graph.node(symmetric),
        })
    }

    /// Mirror a client write `old -> new` on `record.link` onto the
    /// symmetric side. Every cell touched is scheduled in `plan`.
    pub fn apply_write(
        &self,
        view: &mut PassView<'_>,
        plan: &mut Plan,
        link: FieldNodeId,
        record: &RecordId,
        old: &CellValue,
        new: &CellValue,
    ) -> Result<(), EngineError> {
        let pair = self.pair(link)?;
        let foreign = &pair.symmetric_node.table;
        let old_ids = old.link_ids();
        let new_ids = new.link_ids();

        for id in &new_ids {
            if !view.record_exists(foreign, id)? {
                return Err(EngineError::ReferentialInconsistency(format!(
                    "{}/{} links to {foreign}/{id}, which does not exist",
                    pair.link_node.table, record
                )));
            }
        }

        for f in old_ids.iter().filter(|id| !new_ids.contains(id)) {
            self.detach(view, plan, pair.symmetric, f, record)?;
        }
        for f in new_ids.iter().filter(|id| !old_ids.contains(id)) {
            self.attach(view, plan, &pair, f, record)?;
        }
        Ok(())
    }

    /// Remove `target` from `record.field`, if present.
    fn detach(
        &self,
        view: &mut PassView<'_>,
        plan: &mut Plan,
        field: FieldNodeId,
        record: &RecordId,
        target: &RecordId,
    ) -> Result<(), EngineError> {
        let node = self.graph.node(field);
        let key = CellKey::new(&node.table, record, &node.def.id);
        let cur = view.get(&key)?;
        if !cur.contains_link(target) {
            return Ok(());
        }
        let kept = cur.link_items().into_iter().filter(|i| &i.id != target);
        view.set(key, shape(node.is_plural(), kept));
        plan.schedule(field, record.clone())?;
        Ok(())
    }

    /// Add `record` to `f.S`, displacing a previous singular target.
    fn attach(
        &self,
        view: &mut PassView<'_>,
        plan: &mut Plan,
        pair: &LinkPair<'_>,
        f: &RecordId,
        record: &RecordId,
    ) -> Result<(), EngineError> {
        let sym = pair.symmetric_node;
        let key = CellKey::new(&sym.table, f, &sym.def.id);
        let cur = view.get(&key)?;
        if cur.contains_link(record) {
            return Ok(());
        }

        if sym.is_plural() {
            let mut items = cur.link_items();
            items.push(LinkItem::new(record.clone()));
            view.set(key, shape(true, items));
        } else {
            view.set(key, CellValue::Link(LinkItem::new(record.clone())));
            for previous in cur.link_ids() {
                tracing::debug!(
                    foreign = %f,
                    from = %previous,
                    to = %record,
                    "singular link displaced"
                );
                self.detach(view, plan, pair.link, &previous, f)?;
            }
        }
        plan.schedule(pair.symmetric, f.clone())?;
        Ok(())
    }

    /// Refresh the cached titles of `record.link` from the foreign title field.
    /// Returns whether the cell changed.
    pub fn retitle(&self, view: &mut PassView<'_>, link: FieldNodeId, record: &RecordId) -> Result<bool, EngineError> {
        let node = self.graph.node(link);
        let Some(opts) = node.def.link_options() else {
            return Ok(false);
        };
        let key = CellKey::new(&node.table, record, &node.def.id);
        let cur = view.get(&key)?;
        let items = cur.link_items();
        if items.is_empty() {
            return Ok(false);
        }
        let mut titled = Vec::with_capacity(items.len());
        for item in items {
            let title_key = CellKey::new(&opts.foreign_table_id, &item.id, &opts.lookup_field_id);
            let text = view.get(&title_key)?.display_text();
            titled.push(LinkItem {
                id: item.id,
                title: (!text.is_empty()).then_some(text),
            });
        }
        let next = shape(node.is_plural(), titled);
        if next == cur {
            return Ok(false);
        }
        view.set(key, next);
        Ok(true)
    }

    /// Rebuild the symmetric side of `link` from the link side, for every
    /// record of both tables. Dangling ids are dropped. When the symmetric
    /// side is singular and several records claim the same foreign record,
    /// the first claimant in record order keeps it.
    ///
    /// Schedules every record of both tables for their link steps.
    pub fn resync_link_field(
        &self,
        view: &mut PassView<'_>,
        plan: &mut Plan,
        link: FieldNodeId,
        own_records: &[RecordId],
        foreign_records: &[RecordId],
    ) -> Result<(), EngineError> {
        let _span = tracing::info_span!("link_resync", link = ?link).entered();
        let pair = self.pair(link)?;
        let own_table: &TableId = &pair.link_node.table;
        let foreign_table: &TableId = &pair.symmetric_node.table;
        view.prefetch(own_table, own_records)?;
        view.prefetch(foreign_table, foreign_records)?;

        let foreign_known: FxHashSet<&RecordId> = foreign_records.iter().collect();
        let mut claims: FxHashMap<RecordId, Vec<RecordId>> = FxHashMap::default();

        for r in own_records {
            let key = CellKey::new(own_table, r, &pair.link_node.def.id);
            let cur = view.get(&key)?;
            let mut kept = Vec::new();
            let mut dropped = false;
            for item in cur.link_items() {
                if !foreign_known.contains(&item.id) {
                    tracing::warn!(record = %r, missing = %item.id, "dropping dangling link");
                    dropped = true;
                    continue;
                }
                let claimants = claims.entry(item.id.clone()).or_default();
                if !pair.symmetric_node.is_plural() && !claimants.is_empty() {
                    tracing::warn!(
                        record = %r,
                        foreign = %item.id,
                        "foreign record already claimed by a singular link"
                    );
                    dropped = true;
                    continue;
                }
                claimants.push(r.clone());
                kept.push(item);
            }
            if dropped {
                view.set(key, shape(pair.link_node.is_plural(), kept));
            }
            plan.schedule(pair.link, r.clone())?;
        }

        for f in foreign_records {
            let key = CellKey::new(foreign_table, f, &pair.symmetric_node.def.id);
            let cur = view.get(&key)?;
            let desired_ids = claims.remove(f).unwrap_or_default();
            let current_ids = cur.link_ids();
            if current_ids != desired_ids {
                let items = desired_ids.into_iter().map(|id| {
                    // Keep known titles; retitling fixes the rest.
                    cur.link_items()
                        .into_iter()
                        .find(|i| i.id == id)
                        .unwrap_or_else(|| LinkItem::new(id))
                });
                view.set(key, shape(pair.symmetric_node.is_plural(), items));
            }
            plan.schedule(pair.symmetric, f.clone())?;
        }
        Ok(())
    }
}

/// Cell value for a list of link items on a side of the given cardinality.
pub(crate) fn shape<I>(plural: bool, items: I) -> CellValue
where
    I: IntoIterator<Item = LinkItem>,
{
    if plural {
        CellValue::links(items)
    } else {
        items
            .into_iter()
            .next()
            .map(CellValue::Link)
            .unwrap_or(CellValue::Empty)
    }
}
