use super::*;
use common::QueryOptions;
use expr::ast::{FromItem, SelectStmt};
use pretty_assertions::assert_eq;
use std::io::Write;
use types::SqlType;

fn demo_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    for t in ["a", "b", "c", "d"] {
        let columns = (1..=4)
            .map(|i| (format!("{t}{i}"), SqlType::Int))
            .collect();
        catalog.create(t, columns).unwrap();
        for base in 0..3i64 {
            catalog
                .insert_row(
                    t,
                    Row::new(vec![
                        Value::Int(base),
                        Value::Int(base + 1),
                        Value::Int(base + 2),
                        Value::Int(base + 3),
                    ]),
                )
                .unwrap();
        }
    }
    catalog
}

/// Compile one SELECT the way the orchestration layer does: bind, plan,
/// lower, and compile every subquery into the shared plan map.
fn compile(
    catalog: &Catalog,
    stmt: &SelectStmt,
    opts: &QueryOptions,
) -> (PhysNode, binder::BoundStatement, Rc<SubqueryPlans>) {
    let bound = binder::bind_statement(catalog, stmt).unwrap();
    let root = planner::plan_query(&bound.select).unwrap();
    let phys = planner::direct_to_physical(&root, opts, catalog, &bound.registry).unwrap();
    let mut subs = SubqueryPlans::default();
    for sub in &bound.subqueries {
        let sroot = planner::plan_query(&sub.select).unwrap();
        let splan = planner::direct_to_physical(&sroot, opts, catalog, &bound.registry).unwrap();
        subs.insert(sub.id, splan, sub.cacheable);
    }
    (phys, bound, Rc::new(subs))
}

fn run_opts(catalog: &Catalog, sql: &str, opts: &QueryOptions) -> DbResult<Vec<Row>> {
    let stmt = match parser::parse_one(sql)? {
        parser::Statement::Select(s) => s,
        other => panic!("expected SELECT, got {other:?}"),
    };
    let (phys, bound, subs) = compile(catalog, &stmt, opts);
    let mut ctx = ExecContext::new(catalog, &bound.registry, subs);
    execute_collect(&phys, &mut ctx)
}

fn run(catalog: &Catalog, sql: &str) -> Vec<Row> {
    run_opts(catalog, sql, &QueryOptions::default()).unwrap()
}

fn ints(rows: &[Row]) -> Vec<Vec<i64>> {
    rows.iter()
        .map(|r| {
            r.values
                .iter()
                .map(|v| v.as_int().expect("int value"))
                .collect()
        })
        .collect()
}

fn sorted(mut rows: Vec<Vec<i64>>) -> Vec<Vec<i64>> {
    rows.sort();
    rows
}

#[test]
fn scan_with_filter_and_projection() {
    let catalog = demo_catalog();
    let rows = run(&catalog, "SELECT a1, a2 FROM a WHERE a1 > 0");
    assert_eq!(ints(&rows), vec![vec![1, 2], vec![2, 3]]);
}

#[test]
fn projection_evaluates_expressions() {
    let catalog = demo_catalog();
    let rows = run(&catalog, "SELECT a1 + a2 * 2 FROM a WHERE a1 = 2");
    assert_eq!(ints(&rows), vec![vec![8]]);
}

#[test]
fn in_subquery_membership() {
    let catalog = demo_catalog();
    let rows = run(&catalog, "SELECT a1 FROM a WHERE a1 IN (SELECT b2 FROM b WHERE b1 < 2)");
    assert_eq!(sorted(ints(&rows)), vec![vec![1], vec![2]]);
}

#[test]
fn group_by_having() {
    let catalog = demo_catalog();
    let rows = run(
        &catalog,
        "SELECT a1, SUM(a2) FROM a GROUP BY a1 HAVING SUM(a2) > 1",
    );
    assert_eq!(sorted(ints(&rows)), vec![vec![1, 2], vec![2, 3]]);
}

#[test]
fn correlated_exists() {
    let catalog = demo_catalog();
    let rows = run(
        &catalog,
        "SELECT a1 FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b1 = a1)",
    );
    assert_eq!(sorted(ints(&rows)), vec![vec![0], vec![1], vec![2]]);
}

#[test]
fn not_exists_inverts() {
    let catalog = demo_catalog();
    let rows = run(
        &catalog,
        "SELECT a1 FROM a WHERE NOT EXISTS (SELECT 1 FROM b WHERE b1 = a1 AND b2 > 10)",
    );
    assert_eq!(sorted(ints(&rows)), vec![vec![0], vec![1], vec![2]]);
}

#[test]
fn order_desc_with_limit() {
    let catalog = demo_catalog();
    let rows = run(&catalog, "SELECT a1 FROM a ORDER BY a2 DESC LIMIT 2");
    assert_eq!(ints(&rows), vec![vec![2], vec![1]]);
}

#[test]
fn order_key_outside_projection_is_trimmed() {
    let catalog = demo_catalog();
    let rows = run(&catalog, "SELECT a1 FROM a ORDER BY a2 DESC");
    // One visible column only.
    assert!(rows.iter().all(|r| r.len() == 1));
    assert_eq!(ints(&rows), vec![vec![2], vec![1], vec![0]]);
}

#[test]
fn scalar_subquery_value_and_null() {
    let catalog = demo_catalog();
    let rows = run(
        &catalog,
        "SELECT a1, (SELECT b2 FROM b WHERE b1 = 9) FROM a WHERE a1 = 0",
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values[0], Value::Int(0));
    assert!(rows[0].values[1].is_null());

    let rows = run(
        &catalog,
        "SELECT (SELECT b2 FROM b WHERE b1 = a1) FROM a WHERE a1 < 2",
    );
    assert_eq!(sorted(ints(&rows)), vec![vec![1], vec![2]]);
}

#[test]
fn scalar_subquery_with_many_rows_fails() {
    let catalog = demo_catalog();
    let result = run_opts(
        &catalog,
        "SELECT (SELECT b1 FROM b) FROM a",
        &QueryOptions::default(),
    );
    assert!(matches!(result, Err(DbError::SubqueryMultipleRows)));
}

#[test]
fn inner_join_hash_and_nested_loop_agree() {
    let catalog = demo_catalog();
    let sql = "SELECT a1, b2 FROM a JOIN b ON a1 = b1 WHERE b2 > 1";
    let hash = run(&catalog, sql);
    let mut nl_opts = QueryOptions::default();
    nl_opts.optimize.enable_hashjoin = false;
    let nl = run_opts(&catalog, sql, &nl_opts).unwrap();
    assert_eq!(sorted(ints(&hash)), sorted(ints(&nl)));
    assert_eq!(sorted(ints(&hash)), vec![vec![1, 2], vec![2, 3]]);
}

#[test]
fn left_join_pads_with_nulls() {
    let catalog = demo_catalog();
    let rows = run(
        &catalog,
        "SELECT a1, b1 FROM a LEFT JOIN b ON b1 = a1 - 2",
    );
    let mut shaped: Vec<(i64, Option<i64>)> = rows
        .iter()
        .map(|r| (r.values[0].as_int().unwrap(), r.values[1].as_int()))
        .collect();
    shaped.sort();
    assert_eq!(shaped, vec![(0, None), (1, None), (2, Some(0))]);
}

#[test]
fn cross_join_produces_all_pairs() {
    let catalog = demo_catalog();
    let rows = run(&catalog, "SELECT a1, b1 FROM a, b");
    assert_eq!(rows.len(), 9);
}

#[test]
fn division_by_zero_aborts_the_statement() {
    let catalog = demo_catalog();
    let result = run_opts(
        &catalog,
        "SELECT a2 / a1 FROM a",
        &QueryOptions::default(),
    );
    assert!(matches!(result, Err(DbError::Eval(_))));
}

#[test]
fn limit_zero_emits_nothing() {
    let catalog = demo_catalog();
    let rows = run(&catalog, "SELECT a1 FROM a LIMIT 0");
    assert!(rows.is_empty());
}

#[test]
fn whole_table_aggregate_over_empty_input() {
    let mut catalog = demo_catalog();
    catalog
        .create("empty", vec![("x".into(), SqlType::Int)])
        .unwrap();
    let rows = run(&catalog, "SELECT COUNT(x) FROM empty");
    assert_eq!(ints(&rows), vec![vec![0]]);
}

#[test]
fn cacheable_subquery_runs_once_under_profile() {
    let catalog = demo_catalog();
    let mut opts = QueryOptions::default();
    opts.profile = true;

    let stmt = match parser::parse_one(
        "SELECT a1 FROM a WHERE a1 IN (SELECT b2 FROM b WHERE b1 < 2)",
    )
    .unwrap()
    {
        parser::Statement::Select(s) => s,
        _ => unreachable!(),
    };
    let (phys, bound, subs) = compile(&catalog, &stmt, &opts);
    let sub_id = bound.subqueries[0].id;
    assert!(bound.subqueries[0].cacheable);

    let mut ctx = ExecContext::new(&catalog, &bound.registry, Rc::clone(&subs));
    let rows = execute_collect(&phys, &mut ctx).unwrap();
    assert_eq!(sorted(ints(&rows)), vec![vec![1], vec![2]]);

    // Cached after the first probe: the inner plan ran exactly once even
    // though three outer rows probed it.
    match &subs.get(sub_id).unwrap().plan.op {
        PhysOp::Profile { loops, .. } => assert_eq!(loops.get(), 1),
        other => panic!("expected profile wrapper, got {other:?}"),
    }
}

#[test]
fn correlated_subquery_runs_per_outer_row() {
    let catalog = demo_catalog();
    let mut opts = QueryOptions::default();
    opts.profile = true;

    let stmt = match parser::parse_one(
        "SELECT a1 FROM a WHERE EXISTS (SELECT 1 FROM b WHERE b1 = a1)",
    )
    .unwrap()
    {
        parser::Statement::Select(s) => s,
        _ => unreachable!(),
    };
    let (phys, bound, subs) = compile(&catalog, &stmt, &opts);
    let sub_id = bound.subqueries[0].id;
    assert!(!bound.subqueries[0].cacheable);

    let mut ctx = ExecContext::new(&catalog, &bound.registry, Rc::clone(&subs));
    let rows = execute_collect(&phys, &mut ctx).unwrap();
    assert_eq!(rows.len(), 3);

    match &subs.get(sub_id).unwrap().plan.op {
        PhysOp::Profile { loops, .. } => assert_eq!(loops.get(), 3),
        other => panic!("expected profile wrapper, got {other:?}"),
    }
}

#[test]
fn semi_join_emits_once_per_left_match() {
    use expr::ast::JoinKind;
    use expr::BinOp;

    let mut catalog = demo_catalog();
    // Duplicate a b-row so a plain inner join would emit twice.
    catalog
        .insert_row(
            "b",
            Row::new(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Int(4),
            ]),
        )
        .unwrap();

    let join = |kind: JoinKind| {
        SelectStmt::new(
            vec![Expr::column(None, "a1")],
            vec![FromItem::Join {
                left: Box::new(FromItem::Base {
                    name: "a".into(),
                    alias: None,
                }),
                right: Box::new(FromItem::Base {
                    name: "b".into(),
                    alias: None,
                }),
                kind,
                constraint: Some(Expr::binary(
                    BinOp::Eq,
                    Expr::column(None, "a1"),
                    Expr::column(None, "b1"),
                )),
            }],
        )
    };

    let (phys, bound, subs) = compile(&catalog, &join(JoinKind::Semi), &QueryOptions::default());
    let mut ctx = ExecContext::new(&catalog, &bound.registry, subs);
    let rows = execute_collect(&phys, &mut ctx).unwrap();
    // One row per matching left row, duplicates on the right ignored.
    assert_eq!(sorted(ints(&rows)), vec![vec![0], vec![1], vec![2]]);

    let (phys, bound, subs) =
        compile(&catalog, &join(JoinKind::AntiSemi), &QueryOptions::default());
    let mut ctx = ExecContext::new(&catalog, &bound.registry, subs);
    let rows = execute_collect(&phys, &mut ctx).unwrap();
    // Every left row matched something; the anti join is empty.
    assert!(rows.is_empty());

    // Nested-loop path agrees.
    let mut nl = QueryOptions::default();
    nl.optimize.enable_hashjoin = false;
    let (phys, bound, subs) = compile(&catalog, &join(JoinKind::Semi), &nl);
    let mut ctx = ExecContext::new(&catalog, &bound.registry, subs);
    let rows = execute_collect(&phys, &mut ctx).unwrap();
    assert_eq!(sorted(ints(&rows)), vec![vec![0], vec![1], vec![2]]);
}

#[test]
fn anti_semi_join_pads_unmatched_left_rows() {
    use expr::ast::JoinKind;
    use expr::BinOp;

    let catalog = demo_catalog();
    let stmt = SelectStmt::new(
        vec![Expr::column(None, "a1"), Expr::column(None, "b1")],
        vec![FromItem::Join {
            left: Box::new(FromItem::Base {
                name: "a".into(),
                alias: None,
            }),
            right: Box::new(FromItem::Base {
                name: "b".into(),
                alias: None,
            }),
            kind: JoinKind::AntiSemi,
            // Matches only a1 = 0.
            constraint: Some(Expr::binary(
                BinOp::Eq,
                Expr::binary(BinOp::Mul, Expr::column(None, "a1"), Expr::int(5)),
                Expr::column(None, "b1"),
            )),
        }],
    );
    let (phys, bound, subs) = compile(&catalog, &stmt, &QueryOptions::default());
    let mut ctx = ExecContext::new(&catalog, &bound.registry, subs);
    let rows = execute_collect(&phys, &mut ctx).unwrap();
    // a1 in {1, 2} found no match; their b side is null-padded.
    let mut shaped: Vec<(i64, Option<i64>)> = rows
        .iter()
        .map(|r| (r.values[0].as_int().unwrap(), r.values[1].as_int()))
        .collect();
    shaped.sort();
    assert_eq!(shaped, vec![(1, None), (2, None)]);
}

#[test]
fn scan_file_parses_fields_by_type() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "5|6|7|8").unwrap();
    writeln!(file, "9|10|11|12|").unwrap();
    file.flush().unwrap();

    let catalog = demo_catalog();
    let stmt = SelectStmt::new(
        vec![Expr::star(None)],
        vec![FromItem::External {
            path: file.path().to_string_lossy().into_owned(),
            schema_table: "a".into(),
            alias: "f".into(),
        }],
    );
    let (phys, bound, subs) = compile(&catalog, &stmt, &QueryOptions::default());
    let mut ctx = ExecContext::new(&catalog, &bound.registry, subs);
    let rows = execute_collect(&phys, &mut ctx).unwrap();
    assert_eq!(ints(&rows), vec![vec![5, 6, 7, 8], vec![9, 10, 11, 12]]);
}

#[test]
fn scan_file_bad_field_is_an_eval_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "5|oops|7|8").unwrap();
    file.flush().unwrap();

    let catalog = demo_catalog();
    let stmt = SelectStmt::new(
        vec![Expr::star(None)],
        vec![FromItem::External {
            path: file.path().to_string_lossy().into_owned(),
            schema_table: "a".into(),
            alias: "f".into(),
        }],
    );
    let (phys, bound, subs) = compile(&catalog, &stmt, &QueryOptions::default());
    let mut ctx = ExecContext::new(&catalog, &bound.registry, subs);
    assert!(matches!(
        execute_collect(&phys, &mut ctx),
        Err(DbError::Eval(_))
    ));
}

#[test]
fn publish_then_read_outer_param() {
    let catalog = demo_catalog();
    let registry = {
        let stmt = match parser::parse_one("SELECT a1 FROM a").unwrap() {
            parser::Statement::Select(s) => s,
            _ => unreachable!(),
        };
        binder::bind_statement(&catalog, &stmt).unwrap().registry
    };
    let mut ctx = ExecContext::new(&catalog, &registry, Rc::new(SubqueryPlans::default()));
    ctx.publish(TableSeq(0), Row::new(vec![Value::Int(7), Value::Int(8)]));
    assert_eq!(ctx.outer_value(TableSeq(0), 1).unwrap(), Value::Int(8));
    assert!(ctx.outer_value(TableSeq(1), 0).is_err());
}
