use super::common::*;
use crate::engine::{DependencyGraph, FieldNodeId, GraphCache, RecordMapping};
use crate::traits::FieldMetadataStore;
use std::sync::Arc;
use tabula_common::{FieldId, RollupFunction, TableId};

fn id(g: &DependencyGraph, table: &str, field: &str) -> FieldNodeId {
    g.resolve(&TableId::new(table), &FieldId::new(field))
        .unwrap_or_else(|| panic!("{table}.{field} not in graph"))
}

#[test]
fn build_follows_links_to_foreign_tables() {
    let base = base_with_tables();
    let g = DependencyGraph::build(&*base, &[TableId::new(T2)]).unwrap();
    assert!(g.contains_table(&TableId::new(T1)));
    assert!(g.contains_table(&TableId::new(T2)));
    assert_eq!(g.len(), 6);
    assert_eq!(g.version(), base.version());

    let l1 = id(&g, T1, "fldT1Link");
    let l2 = id(&g, T2, "fldT2Link");
    assert_eq!(g.node(l1).symmetric, Some(l2));
    assert_eq!(g.node(l2).symmetric, Some(l1));
    assert!(g.node(l1).is_plural());
    assert!(!g.node(l2).is_plural());
}

#[test]
fn links_depend_on_foreign_title_field() {
    let base = base_with_tables();
    let g = DependencyGraph::build(&*base, &[TableId::new(T1)]).unwrap();
    let l2 = id(&g, T2, "fldT2Link");
    let title = id(&g, T1, "fldT1Text");
    let dependents: Vec<_> = g.node(title).dependents.iter().collect();
    assert_eq!(dependents.len(), 1);
    assert_eq!(dependents[0].node, l2);
    assert_eq!(
        dependents[0].mapping,
        RecordMapping::ViaLink {
            link_field: l2,
            symmetric_field: id(&g, T1, "fldT1Link"),
        }
    );
}

#[test]
fn lookups_depend_on_their_link_and_the_foreign_field() {
    let base = base_with_tables();
    base.add_field(&TableId::new(T1), rollup("fldT1Sum", "fldT1Link", "fldT2Number", RollupFunction::Sum))
        .unwrap();
    base.add_field(&TableId::new(T1), formula("fldT1Twice", "{fldT1Sum} * 2"))
        .unwrap();
    let g = DependencyGraph::build(&*base, &[TableId::new(T1)]).unwrap();

    let sum = g.node(id(&g, T1, "fldT1Sum"));
    let deps: Vec<(FieldNodeId, RecordMapping)> =
        sum.dependencies.iter().map(|e| (e.node, e.mapping)).collect();
    assert!(deps.contains(&(id(&g, T1, "fldT1Link"), RecordMapping::SameRecord)));
    assert!(deps.contains(&(
        id(&g, T2, "fldT2Number"),
        RecordMapping::ViaLink {
            link_field: id(&g, T1, "fldT1Link"),
            symmetric_field: id(&g, T2, "fldT2Link"),
        }
    )));

    let twice = g.node(id(&g, T1, "fldT1Twice"));
    assert_eq!(twice.dependencies.len(), 1);
    assert_eq!(twice.dependencies[0].mapping, RecordMapping::SameRecord);
}

#[test]
fn closure_spans_dependents_and_symmetric_links() {
    let base = base_with_tables();
    base.create_table("tblLonely", vec![formula("fldOne", "1")]);
    let g = DependencyGraph::build(&*base, &[TableId::new(T1), TableId::new("tblLonely")]).unwrap();

    let closure = g.closure_tables(&[TableId::new(T1)]);
    assert!(closure.contains(&TableId::new(T1)));
    assert!(closure.contains(&TableId::new(T2)));
    assert!(!closure.contains(&TableId::new("tblLonely")));

    let lonely = g.closure_tables(&[TableId::new("tblLonely")]);
    assert_eq!(lonely.len(), 1);
}

#[test]
fn cache_rebuilds_after_metadata_change_only() {
    let base = base_with_tables();
    let cache = GraphCache::new();
    let first = cache.get(&*base, &[TableId::new(T1)]).unwrap();
    let again = cache.get(&*base, &[TableId::new(T2)]).unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    base.add_field(&TableId::new(T1), formula("fldT1Calc", "{fldT1Number} + 1"))
        .unwrap();
    let rebuilt = cache.get(&*base, &[TableId::new(T1)]).unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
    assert_eq!(cache.cached_version(), Some(base.version()));
    assert!(rebuilt.resolve(&TableId::new(T1), &FieldId::new("fldT1Calc")).is_some());
    // The old graph stays usable by whoever still holds it.
    assert!(first.resolve(&TableId::new(T1), &FieldId::new("fldT1Calc")).is_none());

    cache.invalidate();
    assert_eq!(cache.cached_version(), None);
}

#[test]
fn cache_extends_to_tables_outside_the_cached_graph() {
    let base = base_with_tables();
    base.create_table("tblLonely", vec![formula("fldOne", "1")]);
    let cache = GraphCache::new();
    let first = cache.get(&*base, &[TableId::new(T1)]).unwrap();
    assert!(!first.contains_table(&TableId::new("tblLonely")));

    let wider = cache.get(&*base, &[TableId::new("tblLonely")]).unwrap();
    assert!(wider.contains_table(&TableId::new("tblLonely")));
    assert!(wider.contains_table(&TableId::new(T1)));
}
