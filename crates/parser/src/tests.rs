use super::*;
use pretty_assertions::assert_eq;

fn select(sql: &str) -> SelectStmt {
    match parse_one(sql).unwrap() {
        Statement::Select(s) => s,
        other => panic!("expected SELECT, got {other:?}"),
    }
}

#[test]
fn simple_select_maps_clauses() {
    let s = select("SELECT a1, a2 FROM a WHERE a1 > 0");
    assert_eq!(s.projection.len(), 2);
    assert_eq!(s.projection[0], Expr::column(None, "a1"));
    assert_eq!(s.from.len(), 1);
    assert!(matches!(&s.from[0], FromItem::Base { name, alias: None } if name == "a"));
    let wher = s.selection.unwrap();
    assert_eq!(
        wher,
        Expr::binary(BinOp::Gt, Expr::column(None, "a1"), Expr::int(0))
    );
}

#[test]
fn identifiers_normalize_to_lowercase() {
    let s = select("SELECT A1 FROM A");
    assert_eq!(s.projection[0], Expr::column(None, "a1"));
    assert!(matches!(&s.from[0], FromItem::Base { name, .. } if name == "a"));
}

#[test]
fn qualified_columns_and_aliases() {
    let s = select("SELECT t.a1 AS x FROM a t");
    assert_eq!(s.projection[0].alias.as_deref(), Some("x"));
    assert_eq!(s.projection[0], Expr::column(Some("t"), "a1"));
    assert!(
        matches!(&s.from[0], FromItem::Base { name, alias: Some(a) } if name == "a" && a == "t")
    );
}

#[test]
fn group_by_having_order_limit() {
    let s = select(
        "SELECT a1, SUM(a2) FROM a GROUP BY a1 HAVING SUM(a2) > 1 ORDER BY a1 DESC LIMIT 2",
    );
    assert_eq!(s.group_by.len(), 1);
    assert!(s.having.is_some());
    assert_eq!(s.order_by.len(), 1);
    assert!(s.order_by[0].desc);
    assert_eq!(s.limit, Some(Expr::int(2)));
    assert!(s.projection[1].is_agg());
}

#[test]
fn count_star_parses_without_argument() {
    let s = select("SELECT COUNT(*) FROM a");
    match &s.projection[0].kind {
        ExprKind::Agg { kind, arg } => {
            assert_eq!(*kind, AggKind::CountStar);
            assert!(arg.is_none());
        }
        other => panic!("expected agg, got {other:?}"),
    }
}

#[test]
fn joins_fold_left_deep() {
    let s = select("SELECT * FROM a JOIN b ON a1 = b1 LEFT JOIN c ON b1 = c1");
    match &s.from[0] {
        FromItem::Join {
            left, kind: JoinKind::Left, ..
        } => {
            assert!(matches!(**left, FromItem::Join { kind: JoinKind::Inner, .. }));
        }
        other => panic!("expected join, got {other:?}"),
    }
}

#[test]
fn subquery_flavors() {
    let s = select("SELECT a1 FROM a WHERE a1 IN (SELECT b2 FROM b)");
    match &s.selection.as_ref().unwrap().kind {
        ExprKind::Subquery(sub) => {
            assert_eq!(sub.kind, SubqueryKind::In { negated: false });
            assert!(sub.probe.is_some());
        }
        other => panic!("expected subquery, got {other:?}"),
    }

    let s = select("SELECT a1 FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b1 = a1)");
    match &s.selection.as_ref().unwrap().kind {
        ExprKind::Subquery(sub) => {
            assert_eq!(sub.kind, SubqueryKind::Exists { negated: false });
        }
        other => panic!("expected subquery, got {other:?}"),
    }

    let s = select("SELECT (SELECT b1 FROM b) FROM a");
    assert!(matches!(
        &s.projection[0].kind,
        ExprKind::Subquery(sub) if sub.kind == SubqueryKind::Scalar
    ));
}

#[test]
fn not_exists_carries_negation() {
    let s = select("SELECT a1 FROM a WHERE NOT EXISTS (SELECT 1 FROM b)");
    // sqlparser folds NOT into the EXISTS node.
    match &s.selection.as_ref().unwrap().kind {
        ExprKind::Subquery(sub) => {
            assert_eq!(sub.kind, SubqueryKind::Exists { negated: true });
        }
        other => panic!("expected negated exists, got {other:?}"),
    }
}

#[test]
fn ctes_map_to_with_list() {
    let s = select("WITH r AS (SELECT a1 FROM a) SELECT * FROM r WHERE a1 = 1");
    assert_eq!(s.ctes.len(), 1);
    assert_eq!(s.ctes[0].name, "r");
    assert_eq!(s.ctes[0].query.projection.len(), 1);
}

#[test]
fn set_ops_chain_in_order() {
    let s = select("SELECT a1 FROM a UNION ALL SELECT b1 FROM b UNION SELECT c1 FROM c");
    let first = s.set_op.as_ref().unwrap();
    assert_eq!(first.kind, SetOpKind::Union);
    assert!(first.all);
    let second = first.right.set_op.as_ref().unwrap();
    assert_eq!(second.kind, SetOpKind::Union);
    assert!(!second.all);
    assert!(second.right.set_op.is_none());
}

#[test]
fn all_is_union_only() {
    // INTERSECT and EXCEPT are distinct-only.
    assert!(matches!(
        parse_one("SELECT a1 FROM a INTERSECT ALL SELECT b1 FROM b"),
        Err(DbError::Parse(_))
    ));
    assert!(matches!(
        parse_one("SELECT a1 FROM a EXCEPT ALL SELECT b1 FROM b"),
        Err(DbError::Parse(_))
    ));
    assert!(parse_one("SELECT a1 FROM a INTERSECT SELECT b1 FROM b").is_ok());
    assert!(parse_one("SELECT a1 FROM a EXCEPT SELECT b1 FROM b").is_ok());
}

#[test]
fn date_and_interval_literals() {
    let s = select("SELECT date '2024-02-29' FROM a WHERE a1 > date '2024-01-01'");
    assert!(matches!(
        &s.projection[0].kind,
        ExprKind::Literal(Value::Date(_))
    ));

    let s = select("SELECT interval '2 months' FROM a");
    assert_eq!(s.projection[0], Expr::literal(Value::Interval(60)));
}

#[test]
fn like_and_in_list() {
    let s = select("SELECT a1 FROM a WHERE a2 LIKE '%x%' AND a1 IN (1, 2)");
    let wher = s.selection.unwrap();
    let parts = wher.conjuncts();
    assert_eq!(parts.len(), 2);
    assert!(matches!(
        &parts[0].kind,
        ExprKind::Binary { op: BinOp::Like, .. }
    ));
    assert!(matches!(&parts[1].kind, ExprKind::InList { negated: false, .. }));
}

#[test]
fn negative_numbers_fold_to_literals() {
    let s = select("SELECT -3, -2.5 FROM a");
    assert_eq!(s.projection[0], Expr::int(-3));
    assert_eq!(s.projection[1], Expr::literal(Value::double(-2.5)));
}

#[test]
fn ddl_and_dml_statements() {
    match parse_one("CREATE TABLE t (x1 INT, x2 CHAR(8), x3 DOUBLE)").unwrap() {
        Statement::CreateTable { name, columns } => {
            assert_eq!(name, "t");
            assert_eq!(columns.len(), 3);
            assert_eq!(columns[1].1, SqlType::Char(8));
        }
        other => panic!("expected CREATE TABLE, got {other:?}"),
    }

    match parse_one("CREATE UNIQUE INDEX i1 ON t (x1, x2)").unwrap() {
        Statement::CreateIndex {
            name,
            table,
            columns,
            unique,
        } => {
            assert_eq!(name, "i1");
            assert_eq!(table, "t");
            assert_eq!(columns, vec!["x1", "x2"]);
            assert!(unique);
        }
        other => panic!("expected CREATE INDEX, got {other:?}"),
    }

    match parse_one("INSERT INTO t VALUES (1, 'a'), (2, 'b')").unwrap() {
        Statement::Insert { table, source, .. } => {
            assert_eq!(table, "t");
            match source {
                InsertSource::Values(rows) => assert_eq!(rows.len(), 2),
                other => panic!("expected VALUES, got {other:?}"),
            }
        }
        other => panic!("expected INSERT, got {other:?}"),
    }

    match parse_one("INSERT INTO t SELECT a1, a2 FROM a").unwrap() {
        Statement::Insert { source, .. } => {
            assert!(matches!(source, InsertSource::Query(_)));
        }
        other => panic!("expected INSERT, got {other:?}"),
    }

    match parse_one("COPY t FROM 'data.tbl'").unwrap() {
        Statement::Copy { table, path } => {
            assert_eq!(table, "t");
            assert_eq!(path, "data.tbl");
        }
        other => panic!("expected COPY, got {other:?}"),
    }

    assert!(matches!(
        parse_one("ANALYZE t").unwrap(),
        Statement::Analyze { .. }
    ));
    assert!(matches!(
        parse_one("DROP TABLE t").unwrap(),
        Statement::DropTable { .. }
    ));
    assert!(matches!(
        parse_one("EXPLAIN SELECT a1 FROM a").unwrap(),
        Statement::Explain { .. }
    ));
}

#[test]
fn derived_tables_require_an_alias() {
    let s = select("SELECT x.a1 FROM (SELECT a1 FROM a) x");
    assert!(matches!(&s.from[0], FromItem::Derived { alias, .. } if alias == "x"));
    assert!(parse_one("SELECT a1 FROM (SELECT a1 FROM a)").is_err());
}

#[test]
fn unsupported_shapes_surface_parse_errors() {
    assert!(matches!(
        parse_one("SELECT a1 FROM a OFFSET 2"),
        Err(DbError::Parse(_))
    ));
    assert!(matches!(
        parse_one("SELECT a1 FROM a FULL JOIN b ON a1 = b1"),
        Err(DbError::Parse(_))
    ));
    assert!(matches!(
        parse_one("SELECT frobnicate(a1) FROM a"),
        Err(DbError::Parse(_))
    ));
    assert!(matches!(parse_one("not sql at all"), Err(DbError::Parse(_))));
}

#[test]
fn batches_are_rejected_by_parse_one() {
    assert!(parse_one("SELECT 1 FROM a; SELECT 2 FROM a").is_err());
    assert_eq!(parse_sql("SELECT 1 FROM a; SELECT 2 FROM a").unwrap().len(), 2);
}
