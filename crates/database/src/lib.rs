//! Statement orchestration: the public entry point of the engine.
//!
//! Each SELECT runs the full pipeline - parse, bind, logical plan, ordinal
//! resolution, optional memo search, physical lowering, execution into a
//! collector. DDL, INSERT, COPY and ANALYZE mutate the catalog directly;
//! set operations run their arms separately and combine the row sets.
//! Compile- and run-time failures abort the statement and leave the catalog
//! as it was.

use binder::{bind_statement, BoundSelect, BoundStatement};
use catalog::Catalog;
use common::{DbError, DbResult, ExplainOptions, QueryOptions, Row};
use executor::{execute_collect, ExecContext, SubqueryPlans};
use expr::ast::{FromItem, SelectStmt, SetOpKind};
use expr::Expr;
use hashbrown::HashSet;
use parser::{parse_one, InsertSource, Statement};
use planner::PhysNode;
use std::rc::Rc;
use tracing::debug;
use types::Value;

/// Result of one statement.
#[derive(Debug)]
pub enum QueryResult {
    /// Query returned rows.
    Rows { schema: Vec<String>, rows: Vec<Row> },
    /// DML affected N rows.
    Count { affected: u64 },
    /// EXPLAIN rendered a plan.
    Text(String),
    /// DDL or other operation with no result.
    Empty,
}

impl QueryResult {
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryResult::Rows { rows, .. } => rows,
            _ => &[],
        }
    }

    /// Human-friendly rendering, the way the REPL prints results.
    pub fn render(&self) -> String {
        match self {
            QueryResult::Rows { schema, rows } => common::pretty::render_record_batch(
                &common::RecordBatch {
                    columns: schema.clone(),
                    rows: rows.clone(),
                },
                common::pretty::TableStyleKind::Ascii,
            ),
            QueryResult::Count { affected } => format!("{affected} rows affected"),
            QueryResult::Text(text) => text.clone(),
            QueryResult::Empty => "ok".into(),
        }
    }
}

/// An in-memory analytical SQL engine instance.
#[derive(Default)]
pub struct Database {
    catalog: Catalog,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run one statement with default options.
    pub fn run(&mut self, sql: &str) -> DbResult<QueryResult> {
        self.run_with(sql, &QueryOptions::default())
    }

    /// Run one statement.
    pub fn run_with(&mut self, sql: &str, opts: &QueryOptions) -> DbResult<QueryResult> {
        let stmt = parse_one(sql)?;
        self.execute(stmt, opts)
    }

    /// Compile a SELECT and render its physical plan.
    pub fn explain(
        &self,
        sql: &str,
        opts: &QueryOptions,
        eopts: &ExplainOptions,
    ) -> DbResult<String> {
        let stmt = parse_one(sql)?;
        let stmt = match stmt {
            Statement::Explain { query } => *query,
            other => other,
        };
        match stmt {
            Statement::Select(select) => {
                let compiled = compile_select(&self.catalog, &select, opts)?;
                Ok(planner::explain_physical(
                    &compiled.plan,
                    &compiled.bound.registry,
                    eopts,
                ))
            }
            other => Err(DbError::Plan(format!(
                "EXPLAIN supports SELECT only, got {other:?}"
            ))),
        }
    }

    fn execute(&mut self, stmt: Statement, opts: &QueryOptions) -> DbResult<QueryResult> {
        match stmt {
            Statement::Select(select) => {
                let (schema, rows) = run_select(&self.catalog, &select, opts)?;
                Ok(QueryResult::Rows { schema, rows })
            }
            Statement::Insert {
                table,
                columns,
                source,
            } => self.insert(&table, &columns, source, opts),
            Statement::Copy { table, path } => self.copy_from(&table, &path, opts),
            Statement::CreateTable { name, columns } => {
                self.catalog.create(&name, columns)?;
                Ok(QueryResult::Empty)
            }
            Statement::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                self.catalog.create_index(&table, &name, &columns, unique)?;
                Ok(QueryResult::Empty)
            }
            Statement::DropTable { name } => {
                self.catalog.drop(&name)?;
                Ok(QueryResult::Empty)
            }
            Statement::Analyze { table } => {
                let n = self.catalog.analyze(&table)?;
                debug!(table, rows = n, "analyzed");
                Ok(QueryResult::Empty)
            }
            Statement::Explain { query } => match *query {
                Statement::Select(select) => {
                    let compiled = compile_select(&self.catalog, &select, opts)?;
                    let eopts = ExplainOptions {
                        show_tablename: true,
                        ..ExplainOptions::default()
                    };
                    Ok(QueryResult::Text(planner::explain_physical(
                        &compiled.plan,
                        &compiled.bound.registry,
                        &eopts,
                    )))
                }
                other => Err(DbError::Plan(format!(
                    "EXPLAIN supports SELECT only, got {other:?}"
                ))),
            },
        }
    }

    fn insert(
        &mut self,
        table: &str,
        columns: &[String],
        source: InsertSource,
        opts: &QueryOptions,
    ) -> DbResult<QueryResult> {
        let rows = match source {
            InsertSource::Values(value_rows) => {
                let mut rows = Vec::with_capacity(value_rows.len());
                for exprs in value_rows {
                    rows.push(self.values_to_row(table, columns, &exprs)?);
                }
                rows
            }
            InsertSource::Query(select) => {
                let (_, rows) = run_select(&self.catalog, &select, opts)?;
                let width = self.catalog.table(table)?.arity();
                if !columns.is_empty() {
                    return Err(DbError::Plan(
                        "INSERT ... SELECT does not take a column list".into(),
                    ));
                }
                for row in &rows {
                    if row.len() != width {
                        return Err(DbError::Plan(format!(
                            "INSERT source has {} columns, table '{table}' has {width}",
                            row.len()
                        )));
                    }
                }
                rows
            }
        };

        let affected = rows.len() as u64;
        for row in rows {
            self.catalog.insert_row(table, row)?;
        }
        Ok(QueryResult::Count { affected })
    }

    /// Evaluate one VALUES tuple into a full-width row; unnamed columns are
    /// null-filled.
    fn values_to_row(
        &self,
        table: &str,
        columns: &[String],
        exprs: &[Expr],
    ) -> DbResult<Row> {
        let def = self.catalog.table(table)?;
        let targets: Vec<usize> = if columns.is_empty() {
            (0..def.arity()).collect()
        } else {
            columns
                .iter()
                .map(|name| {
                    def.column(name)
                        .map(|c| c.ordinal)
                        .ok_or_else(|| DbError::UnknownColumn(format!("{table}.{name}")))
                })
                .collect::<DbResult<Vec<_>>>()?
        };
        if exprs.len() != targets.len() {
            return Err(DbError::Plan(format!(
                "INSERT has {} values for {} columns",
                exprs.len(),
                targets.len()
            )));
        }

        let mut values = vec![Value::Null; def.arity()];
        for (expr, &ordinal) in exprs.iter().zip(targets.iter()) {
            let v = expr.eval_const()?;
            let col = &def.columns()[ordinal];
            if let Some(vt) = v.ty() {
                if !vt.compatible(&col.ty) {
                    return Err(DbError::TypeMismatch(format!(
                        "cannot insert {vt} into {} column '{}'",
                        col.ty, col.name
                    )));
                }
            }
            values[ordinal] = v;
        }
        Ok(Row::new(values))
    }

    /// `COPY t FROM 'file'`: a file scan with the target table's schema,
    /// collected and appended to the heap.
    fn copy_from(&mut self, table: &str, path: &str, opts: &QueryOptions) -> DbResult<QueryResult> {
        self.catalog.table(table)?;
        let select = SelectStmt::new(
            vec![Expr::star(None)],
            vec![FromItem::External {
                path: path.to_string(),
                schema_table: table.to_string(),
                alias: table.to_string(),
            }],
        );
        let (_, rows) = run_select(&self.catalog, &select, opts)?;
        let affected = rows.len() as u64;
        for row in rows {
            self.catalog.insert_row(table, row)?;
        }
        Ok(QueryResult::Count { affected })
    }
}

struct Compiled {
    bound: BoundStatement,
    plan: PhysNode,
    subs: Rc<SubqueryPlans>,
}

/// Plan one arm of a bound statement: memo search when enabled, the direct
/// lowering otherwise.
fn plan_arm(
    catalog: &Catalog,
    bound: &BoundStatement,
    arm: &BoundSelect,
    opts: &QueryOptions,
) -> DbResult<PhysNode> {
    if opts.optimize.use_memo {
        optimizer::optimize_select(arm, opts, catalog, &bound.registry)
    } else {
        let root = planner::plan_query(arm)?;
        planner::direct_to_physical(&root, opts, catalog, &bound.registry)
    }
}

/// Bind and lower a SELECT, compiling every subquery into the shared plan
/// map. Subqueries always take the direct path; the memo decides the outer
/// shape.
fn compile_select(
    catalog: &Catalog,
    select: &SelectStmt,
    opts: &QueryOptions,
) -> DbResult<Compiled> {
    let bound = bind_statement(catalog, select)?;
    let mut subs = SubqueryPlans::default();
    for sub in &bound.subqueries {
        let root = planner::plan_query(&sub.select)?;
        let plan = planner::direct_to_physical(&root, opts, catalog, &bound.registry)?;
        subs.insert(sub.id, plan, sub.cacheable);
    }
    let plan = plan_arm(catalog, &bound, &bound.select, opts)?;
    Ok(Compiled {
        bound,
        plan,
        subs: Rc::new(subs),
    })
}

fn run_select(
    catalog: &Catalog,
    select: &SelectStmt,
    opts: &QueryOptions,
) -> DbResult<(Vec<String>, Vec<Row>)> {
    let compiled = compile_select(catalog, select, opts)?;
    let bound = &compiled.bound;
    let schema: Vec<String> = bound
        .select
        .output_columns()
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    let mut ctx = ExecContext::new(catalog, &bound.registry, Rc::clone(&compiled.subs));

    if bound.select.set_op.is_none() {
        let rows = execute_collect(&compiled.plan, &mut ctx)?;
        return Ok((schema, rows));
    }

    // Set operation: run each arm bare, combine, then apply the statement's
    // ORDER BY / LIMIT to the combined set.
    let mut left = bound.select.clone();
    let order_by = std::mem::take(&mut left.order_by);
    let limit = left.limit.take();
    let mut tail = left.set_op.take();

    let mut rows = {
        let plan = plan_arm(catalog, bound, &left, opts)?;
        execute_collect(&plan, &mut ctx)?
    };

    while let Some(op) = tail {
        let mut right = *op.right;
        let next = right.set_op.take();
        let right_rows = {
            let plan = plan_arm(catalog, bound, &right, opts)?;
            execute_collect(&plan, &mut ctx)?
        };
        rows = combine_set_op(rows, right_rows, op.kind, op.all);
        tail = next;
    }

    if !order_by.is_empty() {
        let keys = order_by
            .iter()
            .map(|(key, desc)| {
                bound
                    .select
                    .projection
                    .iter()
                    .position(|p| p == key)
                    .map(|i| (i, *desc))
                    .ok_or_else(|| {
                        DbError::Plan(
                            "ORDER BY over a set operation must name a select-list column"
                                .into(),
                        )
                    })
            })
            .collect::<DbResult<Vec<_>>>()?;
        rows.sort_by(|a, b| {
            for (i, desc) in &keys {
                let ord = a.values[*i].cmp_for_sort(&b.values[*i]);
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }
    if let Some(n) = limit {
        rows.truncate(n);
    }

    Ok((schema, rows))
}

fn combine_set_op(left: Vec<Row>, right: Vec<Row>, kind: SetOpKind, all: bool) -> Vec<Row> {
    match (kind, all) {
        (SetOpKind::Union, true) => {
            let mut rows = left;
            rows.extend(right);
            rows
        }
        (SetOpKind::Union, false) => {
            let mut seen: HashSet<Row> = HashSet::new();
            let mut rows = Vec::new();
            for row in left.into_iter().chain(right) {
                if seen.insert(row.clone()) {
                    rows.push(row);
                }
            }
            rows
        }
        // The parser rejects ALL on INTERSECT/EXCEPT; both are distinct-only.
        (SetOpKind::Intersect, _) => {
            let right_set: HashSet<Row> = right.into_iter().collect();
            let mut seen: HashSet<Row> = HashSet::new();
            left.into_iter()
                .filter(|row| right_set.contains(row) && seen.insert(row.clone()))
                .collect()
        }
        (SetOpKind::Except, _) => {
            let right_set: HashSet<Row> = right.into_iter().collect();
            let mut seen: HashSet<Row> = HashSet::new();
            left.into_iter()
                .filter(|row| !right_set.contains(row) && seen.insert(row.clone()))
                .collect()
        }
    }
}
