//! Top-down ordinal resolution.
//!
//! `resolve(node, req)` fixes `node.output` to produce exactly `req` and
//! rewrites every expression the node keeps (filters, keys, aggregate
//! arguments) against its children's outputs, replacing column names with
//! positional refs. After resolution no expression above a scan references
//! a column by name.

use crate::{LogicNode, LogicOp};
use common::{DbError, DbResult};
use expr::{Expr, ExprKind};

pub fn resolve(node: &mut LogicNode, req: Vec<Expr>) -> DbResult<()> {
    match &node.op {
        LogicOp::Get { table, filter } => {
            let table = *table;
            if let Some(f) = filter {
                validate_single_table(f, table)?;
            }
            for e in &req {
                validate_single_table(e, table)?;
            }
            node.output = req;
            Ok(())
        }

        LogicOp::FromQuery { table } => {
            // The inner query was planned with its own projection; our
            // columns map by ordinal onto that projection.
            let table = *table;
            node.output = req
                .iter()
                .map(|e| rewrite_derived(e, table))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(())
        }

        LogicOp::Filter { pred } => {
            let pred = pred.clone();
            let mut wanted = Vec::new();
            collect_columns(req.iter().chain(std::iter::once(&pred)), &mut wanted);
            resolve(&mut node.children[0], wanted)?;
            let child_out = node.children[0].output.clone();
            let pred = rewrite(&pred, &child_out, &strict_missing)?;
            node.output = req
                .iter()
                .map(|e| rewrite(e, &child_out, &strict_missing))
                .collect::<DbResult<Vec<_>>>()?;
            node.op = LogicOp::Filter { pred };
            Ok(())
        }

        LogicOp::Join { kind, filter } => {
            let kind = *kind;
            let filter = filter.clone();
            let left_tables = node.children[0].tables();
            let right_tables = node.children[1].tables();

            // Straddling predicates decompose into per-column requests and
            // fan out to the side that owns each column.
            let mut wanted = Vec::new();
            collect_columns(req.iter().chain(filter.iter()), &mut wanted);
            let mut left_req = Vec::new();
            let mut right_req = Vec::new();
            for col in wanted {
                let seq = col
                    .as_column()
                    .and_then(|c| c.table)
                    .ok_or_else(|| DbError::Plan("unbound column in join request".into()))?;
                if left_tables.contains(&seq) {
                    left_req.push(col);
                } else if right_tables.contains(&seq) {
                    right_req.push(col);
                } else {
                    return Err(DbError::Plan(format!(
                        "column {col} belongs to neither join side"
                    )));
                }
            }

            resolve(&mut node.children[0], left_req)?;
            resolve(&mut node.children[1], right_req)?;

            // Parent expressions see the concatenated row, left then right.
            let mut combined = node.children[0].output.clone();
            combined.extend(node.children[1].output.iter().cloned());

            let filter = filter
                .map(|f| rewrite(&f, &combined, &strict_missing))
                .transpose()?;
            node.output = req
                .iter()
                .map(|e| rewrite(e, &combined, &strict_missing))
                .collect::<DbResult<Vec<_>>>()?;
            node.op = LogicOp::Join { kind, filter };
            Ok(())
        }

        LogicOp::Agg { keys, aggs, having } => {
            let keys = keys.clone();
            let aggs = aggs.clone();
            let having = having.clone();

            // Push only key columns and aggregate-argument columns.
            let mut wanted = Vec::new();
            collect_columns(keys.iter().chain(aggs.iter()), &mut wanted);
            resolve(&mut node.children[0], wanted)?;
            let child_out = node.children[0].output.clone();

            let keys_r = keys
                .iter()
                .map(|k| rewrite(k, &child_out, &strict_missing))
                .collect::<DbResult<Vec<_>>>()?;
            let aggs_r = aggs
                .iter()
                .map(|a| rewrite(a, &child_out, &strict_missing))
                .collect::<DbResult<Vec<_>>>()?;

            // The aggregate's own rows are [key values..., aggregate
            // results...]; everything above maps onto that layout.
            let having_r = having
                .map(|h| rewrite_over_agg(&h, &keys, &aggs))
                .transpose()?;
            node.output = req
                .iter()
                .map(|e| rewrite_over_agg(e, &keys, &aggs))
                .collect::<DbResult<Vec<_>>>()?;
            node.op = LogicOp::Agg {
                keys: keys_r,
                aggs: aggs_r,
                having: having_r,
            };
            Ok(())
        }

        LogicOp::Order { keys } => {
            let keys = keys.clone();
            resolve(&mut node.children[0], req.clone())?;
            let child_out = node.children[0].output.clone();
            let keys = keys
                .into_iter()
                .map(|(e, desc)| Ok((rewrite(&e, &child_out, &strict_missing)?, desc)))
                .collect::<DbResult<Vec<_>>>()?;
            node.output = req
                .iter()
                .map(|e| rewrite(e, &child_out, &strict_missing))
                .collect::<DbResult<Vec<_>>>()?;
            node.op = LogicOp::Order { keys };
            Ok(())
        }

        LogicOp::Limit { n } => {
            let n = *n;
            resolve(&mut node.children[0], req.clone())?;
            let child_out = node.children[0].output.clone();
            node.output = req
                .iter()
                .map(|e| rewrite(e, &child_out, &strict_missing))
                .collect::<DbResult<Vec<_>>>()?;
            node.op = LogicOp::Limit { n };
            Ok(())
        }
    }
}

/// Distinct non-outer column expressions in visit order.
fn collect_columns<'a>(exprs: impl Iterator<Item = &'a Expr>, out: &mut Vec<Expr>) {
    for e in exprs {
        e.visit_each(&mut |node| {
            if let ExprKind::Column(c) = &node.kind {
                if !c.is_outer && !out.iter().any(|seen| seen == node) {
                    out.push(node.clone());
                }
            }
        });
    }
}

fn strict_missing(e: &Expr) -> DbError {
    DbError::Plan(format!("column {e} missing from child output"))
}

/// Rewrite `e` against a child output: a whole-expression match becomes a
/// positional ref, otherwise the structure is preserved and children
/// recurse. A leftover raw column is the caller's error.
fn rewrite(
    e: &Expr,
    child_out: &[Expr],
    missing: &dyn Fn(&Expr) -> DbError,
) -> DbResult<Expr> {
    if let Some(i) = child_out.iter().position(|o| o == e) {
        return Ok(e.clone().into_ref(i));
    }
    if let ExprKind::Column(c) = &e.kind {
        if !c.is_outer {
            return Err(missing(e));
        }
        return Ok(e.clone());
    }
    let mut out = e.clone();
    for child in out.children_mut() {
        *child = rewrite(child, child_out, missing)?;
    }
    Ok(out)
}

/// Rewrite against the aggregate's output layout: whole group keys map to
/// their key slot, aggregate calls to `nkeys + index`; any surviving raw
/// column violates GROUP BY.
fn rewrite_over_agg(e: &Expr, keys: &[Expr], aggs: &[Expr]) -> DbResult<Expr> {
    if let Some(i) = keys.iter().position(|k| k == e) {
        return Ok(e.clone().into_ref(i));
    }
    if e.is_agg() {
        let j = aggs
            .iter()
            .position(|a| a == e)
            .ok_or_else(|| DbError::Plan(format!("aggregate {e} was not collected")))?;
        return Ok(e.clone().into_ref(keys.len() + j));
    }
    if let ExprKind::Column(c) = &e.kind {
        if !c.is_outer {
            return Err(DbError::MissingGroupBy(c.name.clone()));
        }
        return Ok(e.clone());
    }
    let mut out = e.clone();
    for child in out.children_mut() {
        *child = rewrite_over_agg(child, keys, aggs)?;
    }
    Ok(out)
}

/// Map a derived-table column onto the inner query's projection ordinal.
fn rewrite_derived(e: &Expr, table: common::TableSeq) -> DbResult<Expr> {
    if let ExprKind::Column(c) = &e.kind {
        if !c.is_outer {
            if c.table != Some(table) {
                return Err(DbError::Plan(format!(
                    "column {e} does not belong to this derived table"
                )));
            }
            let ordinal = c
                .ordinal
                .ok_or_else(|| DbError::Plan(format!("unresolved column {e}")))?;
            return Ok(e.clone().into_ref(ordinal));
        }
        return Ok(e.clone());
    }
    let mut out = e.clone();
    for child in out.children_mut() {
        *child = rewrite_derived(child, table)?;
    }
    Ok(out)
}

/// Scans accept constants, subqueries and their own columns only.
fn validate_single_table(e: &Expr, table: common::TableSeq) -> DbResult<()> {
    let mut bad = None;
    e.visit_each(&mut |node| {
        if let ExprKind::Column(c) = &node.kind {
            if !c.is_outer && c.table != Some(table) && bad.is_none() {
                bad = Some(c.name.clone());
            }
        }
    });
    match bad {
        Some(name) => Err(DbError::Plan(format!(
            "column '{name}' requested from the wrong scan"
        ))),
        None => Ok(()),
    }
}
