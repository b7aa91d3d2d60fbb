use super::*;
use catalog::Catalog;
use common::DbError;
use expr::ExprKind;
use pretty_assertions::assert_eq;
use types::SqlType;

/// Four-column demo tables in the style the integration suite uses:
/// table `a` has `a1..a4`, `b` has `b1..b4`, and so on.
fn demo_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    for t in ["a", "b", "c", "d"] {
        let columns = (1..=4)
            .map(|i| (format!("{t}{i}"), SqlType::Int))
            .collect();
        catalog.create(t, columns).unwrap();
    }
    catalog
}

fn bind(sql: &str) -> DbResult<BoundStatement> {
    let catalog = demo_catalog();
    match parser::parse_one(sql)? {
        parser::Statement::Select(stmt) => bind_statement(&catalog, &stmt),
        other => panic!("expected SELECT, got {other:?}"),
    }
}

#[test]
fn columns_resolve_to_table_and_ordinal() {
    let bound = bind("SELECT a2 FROM a WHERE a1 > 0").unwrap();
    let col = bound.select.projection[0].as_column().unwrap();
    assert_eq!(col.table, Some(TableSeq(0)));
    assert_eq!(col.ordinal, Some(1));
    assert!(!col.is_outer);
    assert_eq!(bound.select.projection[0].ty, Some(SqlType::Int));
    assert!(bound.select.projection[0].bound);
}

#[test]
fn binding_assigns_table_sets() {
    let bound = bind("SELECT a1 + b1 FROM a, b").unwrap();
    let e = &bound.select.projection[0];
    let tables: Vec<_> = e.tables.iter().copied().collect();
    assert_eq!(tables, vec![TableSeq(0), TableSeq(1)]);
}

#[test]
fn bind_is_idempotent() {
    let bound = bind("SELECT a1 + 1 FROM a").unwrap();
    let e = bound.select.projection[0].clone();
    // Re-binding the already bound expression is a no-op.
    let catalog = demo_catalog();
    let mut binder = Binder::new(&catalog);
    let again = binder.bind_maybe(e.clone()).unwrap();
    assert_eq!(again, e);
    assert_eq!(again.ty, e.ty);
    assert_eq!(again.tables, e.tables);
}

#[test]
fn star_expansion_covers_all_scope_tables() {
    let bound = bind("SELECT * FROM a, b").unwrap();
    assert_eq!(bound.select.projection.len(), 8);
    assert_eq!(
        bound.select.projection[0].as_column().unwrap().name,
        "a1"
    );
    assert_eq!(
        bound.select.projection[4].as_column().unwrap().name,
        "b1"
    );

    let bound = bind("SELECT b.* FROM a, b").unwrap();
    assert_eq!(bound.select.projection.len(), 4);
    assert_eq!(
        bound.select.projection[0].as_column().unwrap().table,
        Some(TableSeq(1))
    );
}

#[test]
fn ambiguous_and_unknown_columns() {
    let mut catalog = demo_catalog();
    catalog
        .create("e", vec![("a1".into(), SqlType::Int)])
        .unwrap();
    let stmt = match parser::parse_one("SELECT a1 FROM a, e").unwrap() {
        parser::Statement::Select(s) => s,
        _ => unreachable!(),
    };
    assert!(matches!(
        bind_statement(&catalog, &stmt),
        Err(DbError::AmbiguousColumn(_))
    ));

    assert!(matches!(
        bind("SELECT zz FROM a"),
        Err(DbError::UnknownColumn(_))
    ));
    assert!(matches!(
        bind("SELECT a1 FROM ghost"),
        Err(DbError::UnknownTable(_))
    ));
}

#[test]
fn qualified_lookup_beats_ambiguity() {
    let mut catalog = demo_catalog();
    catalog
        .create("e", vec![("a1".into(), SqlType::Int)])
        .unwrap();
    let stmt = match parser::parse_one("SELECT e.a1 FROM a, e").unwrap() {
        parser::Statement::Select(s) => s,
        _ => unreachable!(),
    };
    let bound = bind_statement(&catalog, &stmt).unwrap();
    assert_eq!(
        bound.select.projection[0].as_column().unwrap().table,
        Some(TableSeq(1))
    );
}

#[test]
fn duplicate_aliases_conflict() {
    assert!(matches!(
        bind("SELECT 1 FROM a x, b x"),
        Err(DbError::TableAliasConflict(_))
    ));
    // Same alias in different scopes is fine.
    assert!(bind("SELECT a1 FROM a WHERE EXISTS (SELECT 1 FROM b a)").is_ok());
}

#[test]
fn outer_references_are_recorded_once() {
    let bound = bind("SELECT a1 FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b1 = a1 AND b2 > a1)")
        .unwrap();
    // a1 referenced twice from the subquery; recorded once under table a.
    let a = bound.registry.get(TableSeq(0));
    assert_eq!(a.outer_cols, vec![0]);

    let sub = &bound.subqueries[0];
    assert!(!sub.cacheable);
    assert_eq!(
        sub.outer_tables.iter().copied().collect::<Vec<_>>(),
        vec![TableSeq(0)]
    );
    // The outer column inside the subquery is marked.
    let constraint = sub.select.selection.as_ref().unwrap();
    let mut outer_cols = 0;
    constraint.visit_each(&mut |e| {
        if let ExprKind::Column(c) = &e.kind {
            if c.is_outer {
                outer_cols += 1;
                assert_eq!(c.table, Some(TableSeq(0)));
            }
        }
    });
    assert_eq!(outer_cols, 2);
}

#[test]
fn uncorrelated_subqueries_are_cacheable() {
    let bound = bind("SELECT a1 FROM a WHERE a1 IN (SELECT b2 FROM b WHERE b1 < 2)").unwrap();
    assert_eq!(bound.subqueries.len(), 1);
    let sub = &bound.subqueries[0];
    assert!(sub.cacheable);
    assert!(sub.outer_tables.is_empty());
    assert_eq!(sub.id, SubqueryId(1));
}

#[test]
fn nested_correlation_poisons_the_outer_subquery() {
    // The innermost subquery reaches a1, so both enclosing subqueries
    // correlate to the outside.
    let bound = bind(
        "SELECT a1 FROM a WHERE EXISTS \
         (SELECT 1 FROM b WHERE EXISTS (SELECT 1 FROM c WHERE c1 = a1))",
    )
    .unwrap();
    assert_eq!(bound.subqueries.len(), 2);
    assert!(bound.subqueries.iter().all(|s| !s.cacheable));
}

#[test]
fn inner_correlation_does_not_escape_its_owner() {
    // c correlates only to b, which is inside the outer subquery; the outer
    // subquery itself stays cacheable.
    let bound = bind(
        "SELECT a1 FROM a WHERE EXISTS \
         (SELECT 1 FROM b WHERE EXISTS (SELECT 1 FROM c WHERE c1 = b1))",
    )
    .unwrap();
    let mut flags: Vec<bool> = bound.subqueries.iter().map(|s| s.cacheable).collect();
    flags.sort_unstable();
    // Inner one correlates (not cacheable), outer one does not.
    assert_eq!(flags, vec![false, true]);
}

#[test]
fn subquery_shape_is_checked() {
    assert!(matches!(
        bind("SELECT a1 FROM a WHERE a1 IN (SELECT b1, b2 FROM b)"),
        Err(DbError::SubqueryShape(2))
    ));
}

#[test]
fn type_mismatches_surface_at_bind() {
    let mut catalog = demo_catalog();
    catalog
        .create(
            "s",
            vec![("name".into(), SqlType::Char(8)), ("n".into(), SqlType::Int)],
        )
        .unwrap();
    for bad in [
        "SELECT n + name FROM s",
        "SELECT 1 FROM s WHERE n = name",
        "SELECT 1 FROM s WHERE n IN (1, name)",
        "SELECT CASE WHEN n > 0 THEN n ELSE name END FROM s",
        "SELECT n FROM s UNION SELECT name FROM s",
        "SELECT 1 FROM s WHERE n LIKE '%x%'",
    ] {
        let stmt = match parser::parse_one(bad).unwrap() {
            parser::Statement::Select(s) => s,
            _ => unreachable!(),
        };
        assert!(
            matches!(bind_statement(&catalog, &stmt), Err(DbError::TypeMismatch(_))),
            "expected type mismatch for {bad}"
        );
    }
}

#[test]
fn where_aggregates_migrate_to_having() {
    let bound = bind("SELECT a1 FROM a WHERE SUM(a2) > 1 AND a1 > 0 GROUP BY a1").unwrap();
    let having = bound.select.having.unwrap();
    assert!(having.contains_agg());
    let selection = bound.select.selection.unwrap();
    assert!(!selection.contains_agg());
}

#[test]
fn aggregates_are_collected_in_discovery_order() {
    let bound =
        bind("SELECT a1, SUM(a2), COUNT(a3) FROM a GROUP BY a1 HAVING SUM(a2) > 1").unwrap();
    assert_eq!(bound.select.aggs.len(), 2);
    assert!(bound.select.has_aggregation());
}

#[test]
fn order_by_select_alias_resolves() {
    let bound = bind("SELECT a1 + a2 AS total FROM a ORDER BY total DESC").unwrap();
    let (e, desc) = &bound.select.order_by[0];
    assert!(*desc);
    assert_eq!(e, &bound.select.projection[0]);
}

#[test]
fn limit_must_be_a_constant() {
    let bound = bind("SELECT a1 FROM a LIMIT 2").unwrap();
    assert_eq!(bound.select.limit, Some(2));
    assert!(bind("SELECT a1 FROM a LIMIT a1").is_err());
}

#[test]
fn ctes_bind_and_shadow_walk() {
    let bound = bind("WITH r AS (SELECT a1 FROM a) SELECT * FROM r WHERE a1 = 1").unwrap();
    assert_eq!(bound.select.projection.len(), 1);
    let col = bound.select.projection[0].as_column().unwrap();
    assert_eq!(col.name, "a1");
    let table = bound.registry.get(col.table.unwrap());
    assert_eq!(table.source, TableSource::Cte { name: "r".into() });
}

#[test]
fn derived_tables_expose_aliased_columns() {
    let bound = bind("SELECT x.total FROM (SELECT a1 + a2 AS total FROM a) x").unwrap();
    let col = bound.select.projection[0].as_column().unwrap();
    assert_eq!(col.name, "total");
    assert_eq!(col.ordinal, Some(0));
}

#[test]
fn nested_aggregates_are_rejected() {
    assert!(matches!(
        bind("SELECT SUM(COUNT(a1)) FROM a"),
        Err(DbError::TypeMismatch(_))
    ));
}

#[test]
fn set_op_arms_bind_independently() {
    let bound = bind("SELECT a1 FROM a UNION SELECT b1 FROM b").unwrap();
    let tail = bound.select.set_op.as_ref().unwrap();
    assert_eq!(tail.kind, SetOpKind::Union);
    assert!(!tail.all);
    assert_eq!(tail.right.projection.len(), 1);
}
