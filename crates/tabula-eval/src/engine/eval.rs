//! Per-record evaluation of computed fields against a pass view.

use std::cell::RefCell;

use tabula_common::{CellError, CellErrorKind, CellValue, FieldId, FieldKind, RecordId};

use super::buffer::{CellKey, PassView};
use super::graph::DependencyGraph;
use super::vertex::{FieldNode, FieldNodeId};
use crate::error::EngineError;
use crate::interpreter::Interpreter;
use crate::lookup::{lookup_result, rollup_result};
use crate::traits::EvaluationContext;

/// Formula inputs of one record. Store failures cannot be expressed as cell
/// errors, so the first one is kept aside and fails the pass afterwards.
struct RecordContext<'a, 'v> {
    graph: &'a DependencyGraph,
    view: &'a PassView<'v>,
    node: &'a FieldNode,
    record: &'a RecordId,
    fatal: RefCell<Option<EngineError>>,
}

impl RecordContext<'_, '_> {
    fn stash(&self, e: EngineError) -> CellError {
        let msg = e.to_string();
        self.fatal.borrow_mut().get_or_insert(e);
        CellError::new(CellErrorKind::Ref).with_message(msg)
    }
}

impl EvaluationContext for RecordContext<'_, '_> {
    fn field_value(&self, field: &FieldId) -> Result<CellValue, CellError> {
        let Some(id) = self.graph.resolve(&self.node.table, field) else {
            return Err(CellError::new(CellErrorKind::Ref)
                .with_message(format!("Unknown field {field}")));
        };
        let dep = self.graph.node(id);
        let key = CellKey::new(&dep.table, self.record, &dep.def.id);
        let value = self.view.get(&key).map_err(|e| self.stash(e))?;
        if !dep.is_link() {
            return Ok(value);
        }
        // Links read as their titles.
        let mut titles = value.link_items().into_iter().map(|item| match item.title {
            Some(t) if !t.is_empty() => CellValue::Text(t),
            _ => CellValue::Empty,
        });
        if dep.is_plural() {
            Ok(CellValue::Array(titles.collect()))
        } else {
            Ok(titles.next().unwrap_or_default())
        }
    }
}

/// Value of computed field `id` for `record`. Cell-level problems come back
/// as `Ok(CellValue::Error)`; only store failures are `Err`.
pub fn compute_field(
    graph: &DependencyGraph,
    view: &PassView<'_>,
    id: FieldNodeId,
    record: &RecordId,
) -> Result<CellValue, EngineError> {
    let node = graph.node(id);
    let value = match &node.def.kind {
        FieldKind::Formula(_) => match &node.ast {
            Some(ast) => {
                let ctx = RecordContext {
                    graph,
                    view,
                    node,
                    record,
                    fatal: RefCell::new(None),
                };
                let v = Interpreter::new(&ctx).evaluate_formula(ast);
                if let Some(e) = ctx.fatal.into_inner() {
                    return Err(e);
                }
                v
            }
            None => CellValue::Error(
                CellError::new(CellErrorKind::Value).with_message(format!(
                    "expression does not parse: {}",
                    node.parse_error
                        .as_ref()
                        .map(|e| e.message.as_str())
                        .unwrap_or("unknown error")
                )),
            ),
        },
        FieldKind::Lookup(opts) => {
            let (plural, values) =
                linked_values(graph, view, node, record, &opts.link_field_id, &opts.lookup_field_id)?;
            match values {
                Ok(values) => lookup_result(plural, values),
                Err(e) => CellValue::Error(e),
            }
        }
        FieldKind::Rollup(opts) => {
            let (_, values) =
                linked_values(graph, view, node, record, &opts.link_field_id, &opts.lookup_field_id)?;
            match values {
                Ok(values) => rollup_result(opts.function, values),
                Err(e) => CellValue::Error(e),
            }
        }
        _ => return view.get(&CellKey::new(&node.table, record, &node.def.id)),
    };

    Ok(match value {
        CellValue::Error(e) => CellValue::Error(e.with_origin(
            node.table.as_str(),
            record.as_str(),
            node.def.id.as_str(),
        )),
        other => other,
    })
}

/// Values of `lookup_field` on the records linked from `record` through
/// `link_field`, in link order, and whether the link is plural.
fn linked_values(
    graph: &DependencyGraph,
    view: &PassView<'_>,
    node: &FieldNode,
    record: &RecordId,
    link_field: &FieldId,
    lookup_field: &FieldId,
) -> Result<(bool, Result<Vec<CellValue>, CellError>), EngineError> {
    let Some(link) = graph.resolve(&node.table, link_field) else {
        return Ok((false, Err(ref_error(format!("Unknown link field {link_field}")))));
    };
    let link_node = graph.node(link);
    let Some(opts) = link_node.def.link_options() else {
        return Ok((false, Err(ref_error(format!("{link_field} is not a link")))));
    };
    if graph.resolve(&opts.foreign_table_id, lookup_field).is_none() {
        return Ok((
            link_node.is_plural(),
            Err(ref_error(format!("Unknown field {lookup_field}"))),
        ));
    }
    let ids = view
        .get(&CellKey::new(&node.table, record, link_field))?
        .link_ids();
    view.prefetch(&opts.foreign_table_id, &ids)?;
    let mut values = Vec::with_capacity(ids.len());
    for id in &ids {
        values.push(view.get(&CellKey::new(&opts.foreign_table_id, id, lookup_field))?);
    }
    Ok((link_node.is_plural(), Ok(values)))
}

fn ref_error(msg: String) -> CellError {
    CellError::new(CellErrorKind::Ref).with_message(msg)
}
