//! Row execution engine.
//!
//! Operators run in a pull-by-callback model: each operator drives its
//! children by handing them a sink, `|ctx, row| -> DbResult<()>`, and may
//! emit zero or many rows per input row. The context threads through every
//! sink so an operator deep inside a correlated subquery sees the
//! parameters published by its enclosing scan.
//!
//! Early termination (LIMIT, EXISTS, semi joins) travels as
//! [`DbError::Interrupted`]; the operator that asked for the stop swallows
//! it, everything else passes it on.

mod join;
mod scan;
#[cfg(test)]
mod tests;

use ahash::RandomState;
use binder::TableRegistry;
use catalog::Catalog;
use common::{DbError, DbResult, Row, SubqueryId, TableSeq};
use expr::{AggAcc, EvalScope, Expr, ExprKind};
use hashbrown::HashMap;
use planner::{PhysNode, PhysOp};
use std::rc::Rc;
use types::Value;

/// The row sink an operator hands to its child.
pub type Sink<'a> = &'a mut dyn FnMut(&mut ExecContext, Row) -> DbResult<()>;

/// Compiled subquery plans, keyed by the binder-assigned id.
#[derive(Debug, Default)]
pub struct SubqueryPlans {
    plans: HashMap<SubqueryId, SubPlan, RandomState>,
}

#[derive(Debug)]
pub struct SubPlan {
    pub plan: PhysNode,
    pub cacheable: bool,
}

impl SubqueryPlans {
    pub fn insert(&mut self, id: SubqueryId, plan: PhysNode, cacheable: bool) {
        self.plans.insert(id, SubPlan { plan, cacheable });
    }

    pub fn get(&self, id: SubqueryId) -> Option<&SubPlan> {
        self.plans.get(&id)
    }

    fn lookup(&self, id: SubqueryId) -> DbResult<&SubPlan> {
        self.get(id)
            .ok_or_else(|| DbError::Executor(format!("no plan for subquery {id}")))
    }
}

#[derive(Clone, Debug)]
enum SubResult {
    Scalar(Value),
    Exists(bool),
    Set(Rc<Vec<Value>>),
}

/// Per-execution state: the catalog and registry to read from, the rows
/// published for correlated scans, compiled subquery plans and their
/// result caches.
pub struct ExecContext<'a> {
    pub catalog: &'a Catalog,
    pub registry: &'a TableRegistry,
    params: HashMap<TableSeq, Row, RandomState>,
    subs: Rc<SubqueryPlans>,
    cache: HashMap<SubqueryId, SubResult, RandomState>,
}

impl<'a> ExecContext<'a> {
    pub fn new(catalog: &'a Catalog, registry: &'a TableRegistry, subs: Rc<SubqueryPlans>) -> Self {
        Self {
            catalog,
            registry,
            params: HashMap::default(),
            subs,
            cache: HashMap::default(),
        }
    }

    /// Publish the current row of `table` for nested scopes to read.
    pub fn publish(&mut self, table: TableSeq, row: Row) {
        self.params.insert(table, row);
    }

    fn run_subquery<F>(&mut self, id: SubqueryId, mut each: F) -> DbResult<()>
    where
        F: FnMut(&mut ExecContext, Row) -> DbResult<()>,
    {
        let subs = Rc::clone(&self.subs);
        let sub = subs.lookup(id)?;
        sub.plan.exec(self, &mut each)
    }

    fn cacheable(&self, id: SubqueryId) -> bool {
        self.subs
            .plans
            .get(&id)
            .map(|s| s.cacheable)
            .unwrap_or(false)
    }
}

impl EvalScope for ExecContext<'_> {
    fn outer_value(&self, table: TableSeq, ordinal: usize) -> DbResult<Value> {
        let row = self.params.get(&table).ok_or_else(|| {
            DbError::Eval(format!("no row published for outer reference into {table}"))
        })?;
        row.values
            .get(ordinal)
            .cloned()
            .ok_or_else(|| DbError::Eval(format!("published row has no column {ordinal}")))
    }

    fn subquery_scalar(&mut self, id: SubqueryId) -> DbResult<Value> {
        if let Some(SubResult::Scalar(v)) = self.cache.get(&id) {
            return Ok(v.clone());
        }
        let mut result: Option<Value> = None;
        let outcome = self.run_subquery(id, |_ctx, row| {
            if result.is_some() {
                return Err(DbError::SubqueryMultipleRows);
            }
            let v = row
                .values
                .first()
                .cloned()
                .ok_or_else(|| DbError::Executor("subquery emitted a zero-width row".into()))?;
            result = Some(v);
            Ok(())
        });
        outcome?;
        let value = result.unwrap_or(Value::Null);
        if self.cacheable(id) {
            self.cache.insert(id, SubResult::Scalar(value.clone()));
        }
        Ok(value)
    }

    fn subquery_exists(&mut self, id: SubqueryId) -> DbResult<bool> {
        if let Some(SubResult::Exists(b)) = self.cache.get(&id) {
            return Ok(*b);
        }
        let mut found = false;
        let outcome = self.run_subquery(id, |_ctx, _row| {
            found = true;
            Err(DbError::Interrupted)
        });
        match outcome {
            Ok(()) => {}
            Err(DbError::Interrupted) if found => {}
            Err(e) => return Err(e),
        }
        if self.cacheable(id) {
            self.cache.insert(id, SubResult::Exists(found));
        }
        Ok(found)
    }

    fn subquery_contains(&mut self, id: SubqueryId, probe: &Value) -> DbResult<bool> {
        let set = match self.cache.get(&id) {
            Some(SubResult::Set(set)) => Rc::clone(set),
            _ => {
                let mut values = Vec::new();
                self.run_subquery(id, |_ctx, row| {
                    let v = row.values.first().cloned().ok_or_else(|| {
                        DbError::Executor("subquery emitted a zero-width row".into())
                    })?;
                    values.push(v);
                    Ok(())
                })?;
                let set = Rc::new(values);
                if self.cacheable(id) {
                    self.cache.insert(id, SubResult::Set(Rc::clone(&set)));
                }
                set
            }
        };
        Ok(set
            .iter()
            .any(|v| probe.eq_values(v) == Some(true)))
    }
}

/// One operator driving its children. Implemented on the physical node so a
/// plan executes in place.
pub trait Execute {
    fn exec(&self, ctx: &mut ExecContext, out: Sink) -> DbResult<()>;
}

impl Execute for PhysNode {
    fn exec(&self, ctx: &mut ExecContext, out: Sink) -> DbResult<()> {
        match &self.op {
            PhysOp::ScanTable { table, filter, .. } => {
                scan::scan_table(*table, filter.as_ref(), &self.output, ctx, out)
            }
            PhysOp::ScanFile {
                table,
                path,
                filter,
            } => scan::scan_file(*table, path, filter.as_ref(), &self.output, ctx, out),
            PhysOp::NLJoin { kind, filter } => join::nl_join(self, *kind, filter.as_ref(), ctx, out),
            PhysOp::HashJoin {
                kind,
                left_keys,
                right_keys,
                residual,
            } => join::hash_join(self, *kind, left_keys, right_keys, residual.as_ref(), ctx, out),
            PhysOp::Filter { pred } => {
                let output = &self.output;
                self.children[0].exec(ctx, &mut |ctx, row| {
                    if !predicate_passes(Some(pred), ctx, &row)? {
                        return Ok(());
                    }
                    let projected = project(output, ctx, &row)?;
                    out(ctx, projected)
                })
            }
            PhysOp::HashAgg { keys, aggs, having } => {
                hash_agg(self, keys, aggs, having.as_ref(), ctx, out)
            }
            PhysOp::Order { keys } => order_by(self, keys, ctx, out),
            PhysOp::Limit { n } => {
                let n = *n;
                let output = &self.output;
                if n == 0 {
                    return Ok(());
                }
                let mut emitted = 0usize;
                let outcome = self.children[0].exec(ctx, &mut |ctx, row| {
                    let projected = project(output, ctx, &row)?;
                    out(ctx, projected)?;
                    emitted += 1;
                    if emitted == n {
                        // Stop driving the child.
                        return Err(DbError::Interrupted);
                    }
                    Ok(())
                });
                match outcome {
                    Err(DbError::Interrupted) if emitted == n => Ok(()),
                    other => other,
                }
            }
            PhysOp::FromQuery { table } => {
                let table = *table;
                let publish = !ctx.registry.get(table).outer_cols.is_empty();
                let output = &self.output;
                self.children[0].exec(ctx, &mut |ctx, row| {
                    if publish {
                        ctx.publish(table, row.clone());
                    }
                    let projected = project(output, ctx, &row)?;
                    out(ctx, projected)
                })
            }
            PhysOp::Profile { rows, loops } => {
                loops.set(loops.get() + 1);
                self.children[0].exec(ctx, &mut |ctx, row| {
                    rows.set(rows.get() + 1);
                    out(ctx, row)
                })
            }
        }
    }
}

/// Evaluate an optional predicate; only a definite `true` passes.
pub(crate) fn predicate_passes(
    pred: Option<&Expr>,
    ctx: &mut ExecContext,
    row: &Row,
) -> DbResult<bool> {
    match pred {
        None => Ok(true),
        Some(p) => Ok(p.eval(ctx, row)? == Value::Bool(true)),
    }
}

/// Evaluate an output list over the composed input row.
pub(crate) fn project(output: &[Expr], ctx: &mut ExecContext, row: &Row) -> DbResult<Row> {
    let values = output
        .iter()
        .map(|e| e.eval(ctx, row))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(Row::new(values))
}

fn hash_agg(
    node: &PhysNode,
    keys: &[Expr],
    aggs: &[Expr],
    having: Option<&Expr>,
    ctx: &mut ExecContext,
    out: Sink,
) -> DbResult<()> {
    let mut index: HashMap<Vec<Value>, usize, RandomState> = HashMap::default();
    let mut groups: Vec<(Vec<Value>, Vec<AggAcc>)> = Vec::new();

    node.children[0].exec(ctx, &mut |ctx, row| {
        let key = keys
            .iter()
            .map(|k| k.eval(ctx, &row))
            .collect::<DbResult<Vec<_>>>()?;
        let slot = match index.get(&key) {
            Some(&i) => i,
            None => {
                let accs = aggs.iter().map(new_acc).collect::<DbResult<Vec<_>>>()?;
                groups.push((key.clone(), accs));
                index.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        let (_, accs) = &mut groups[slot];
        for (agg, acc) in aggs.iter().zip(accs.iter_mut()) {
            let v = agg_input(agg, ctx, &row)?;
            acc.accumulate(&v)?;
        }
        Ok(())
    })?;

    // A whole-table aggregation over no rows still yields one row.
    if groups.is_empty() && keys.is_empty() {
        let accs = aggs.iter().map(new_acc).collect::<DbResult<Vec<_>>>()?;
        groups.push((Vec::new(), accs));
    }

    for (key, accs) in groups {
        let mut values = key;
        values.extend(accs.iter().map(|a| a.finish()));
        let agg_row = Row::new(values);
        if !predicate_passes(having, ctx, &agg_row)? {
            continue;
        }
        let projected = project(&node.output, ctx, &agg_row)?;
        out(ctx, projected)?;
    }
    Ok(())
}

fn new_acc(agg: &Expr) -> DbResult<AggAcc> {
    match &agg.kind {
        ExprKind::Agg { kind, .. } => Ok(AggAcc::new(*kind)),
        other => Err(DbError::Executor(format!(
            "aggregate slot holds {other:?}"
        ))),
    }
}

fn agg_input(agg: &Expr, ctx: &mut ExecContext, row: &Row) -> DbResult<Value> {
    match &agg.kind {
        ExprKind::Agg { arg: Some(a), .. } => a.eval(ctx, row),
        ExprKind::Agg { arg: None, .. } => Ok(Value::Int(1)),
        other => Err(DbError::Executor(format!(
            "aggregate slot holds {other:?}"
        ))),
    }
}

fn order_by(
    node: &PhysNode,
    keys: &[(Expr, bool)],
    ctx: &mut ExecContext,
    out: Sink,
) -> DbResult<()> {
    let mut buffered: Vec<(Vec<Value>, Row)> = Vec::new();
    node.children[0].exec(ctx, &mut |ctx, row| {
        let key = keys
            .iter()
            .map(|(e, _)| e.eval(ctx, &row))
            .collect::<DbResult<Vec<_>>>()?;
        buffered.push((key, row));
        Ok(())
    })?;

    buffered.sort_by(|(ka, _), (kb, _)| {
        for ((va, vb), (_, desc)) in ka.iter().zip(kb.iter()).zip(keys.iter()) {
            let ord = va.cmp_for_sort(vb);
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });

    for (_, row) in buffered {
        let projected = project(&node.output, ctx, &row)?;
        out(ctx, projected)?;
    }
    Ok(())
}

/// Terminal collector: runs the plan to completion and gathers the final
/// rows, trimming columns that were requested for binding but are not
/// user-visible.
pub fn execute_collect(plan: &PhysNode, ctx: &mut ExecContext) -> DbResult<Vec<Row>> {
    let visible: Vec<usize> = plan
        .output
        .iter()
        .enumerate()
        .filter(|(_, e)| e.visible)
        .map(|(i, _)| i)
        .collect();
    let trim = visible.len() != plan.output.len();

    let mut rows = Vec::new();
    plan.exec(ctx, &mut |_ctx, row| {
        let row = if trim {
            Row::new(visible.iter().map(|&i| row.values[i].clone()).collect())
        } else {
            row
        };
        rows.push(row);
        Ok(())
    })?;
    tracing::debug!(rows = rows.len(), "statement collected");
    Ok(rows)
}
