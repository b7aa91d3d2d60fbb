//! Join operators.
//!
//! Both joins compose `Row(l, r)` and project the node's output over it.
//! Nested-loop re-drives the right child per left row, which is what makes
//! parameter passing for correlated inputs work; hash join builds the right
//! side once and probes with the left.

use crate::{predicate_passes, project, ExecContext, Execute, Sink};
use ahash::RandomState;
use common::{DbError, DbResult, Row};
use expr::ast::JoinKind;
use expr::Expr;
use hashbrown::HashMap;
use planner::PhysNode;
use types::{SqlType, Value};

pub(crate) fn nl_join(
    node: &PhysNode,
    kind: JoinKind,
    filter: Option<&Expr>,
    ctx: &mut ExecContext,
    out: Sink,
) -> DbResult<()> {
    let left = &node.children[0];
    let right = &node.children[1];
    let right_width = right.output.len();
    let output = &node.output;

    left.exec(ctx, &mut |ctx, lrow| {
        let mut matched = false;
        let mut stop_right = false;
        let outcome = right.exec(ctx, &mut |ctx, rrow| {
            let combined = Row::concat(&lrow, &rrow);
            if !predicate_passes(filter, ctx, &combined)? {
                return Ok(());
            }
            matched = true;
            match kind {
                JoinKind::Semi => {
                    let projected = project(output, ctx, &combined)?;
                    out(ctx, projected)?;
                    stop_right = true;
                    Err(DbError::Interrupted)
                }
                JoinKind::AntiSemi => {
                    stop_right = true;
                    Err(DbError::Interrupted)
                }
                _ => {
                    let projected = project(output, ctx, &combined)?;
                    out(ctx, projected)
                }
            }
        });
        match outcome {
            Ok(()) => {}
            Err(DbError::Interrupted) if stop_right => {}
            Err(e) => return Err(e),
        }

        if !matched && matches!(kind, JoinKind::Left | JoinKind::AntiSemi) {
            let combined = Row::concat(&lrow, &Row::nulls(right_width));
            let projected = project(output, ctx, &combined)?;
            out(ctx, projected)?;
        }
        Ok(())
    })
}

pub(crate) fn hash_join(
    node: &PhysNode,
    kind: JoinKind,
    left_keys: &[Expr],
    right_keys: &[Expr],
    residual: Option<&Expr>,
    ctx: &mut ExecContext,
    out: Sink,
) -> DbResult<()> {
    let left = &node.children[0];
    let right = &node.children[1];
    let right_width = right.output.len();
    let output = &node.output;

    // Mixed numeric key pairs hash as doubles so `int = double` still meets.
    let promote: Vec<bool> = left_keys
        .iter()
        .zip(right_keys.iter())
        .map(|(l, r)| {
            l.ty == Some(SqlType::Double) || r.ty == Some(SqlType::Double)
        })
        .collect();

    // Build side: the right child, keyed by its join columns. Null keys
    // never match and stay out of the table.
    let mut table: HashMap<Vec<Value>, Vec<Row>, RandomState> = HashMap::default();
    right.exec(ctx, &mut |ctx, rrow| {
        if let Some(key) = eval_key(right_keys, &promote, ctx, &rrow)? {
            table.entry(key).or_default().push(rrow);
        }
        Ok(())
    })?;

    left.exec(ctx, &mut |ctx, lrow| {
        let mut matched = false;
        if let Some(key) = eval_key(left_keys, &promote, ctx, &lrow)? {
            if let Some(bucket) = table.get(&key) {
                for rrow in bucket {
                    let combined = Row::concat(&lrow, rrow);
                    if !predicate_passes(residual, ctx, &combined)? {
                        continue;
                    }
                    matched = true;
                    match kind {
                        JoinKind::Semi => {
                            let projected = project(output, ctx, &combined)?;
                            out(ctx, projected)?;
                            break;
                        }
                        JoinKind::AntiSemi => break,
                        _ => {
                            let projected = project(output, ctx, &combined)?;
                            out(ctx, projected)?;
                        }
                    }
                }
            }
        }
        if !matched && matches!(kind, JoinKind::Left | JoinKind::AntiSemi) {
            let combined = Row::concat(&lrow, &Row::nulls(right_width));
            let projected = project(output, ctx, &combined)?;
            out(ctx, projected)?;
        }
        Ok(())
    })
}

/// Evaluate a key column list; `None` when any component is null.
fn eval_key(
    keys: &[Expr],
    promote: &[bool],
    ctx: &mut ExecContext,
    row: &Row,
) -> DbResult<Option<Vec<Value>>> {
    let mut values = Vec::with_capacity(keys.len());
    for (key, promote) in keys.iter().zip(promote.iter()) {
        let v = key.eval(ctx, row)?;
        if v.is_null() {
            return Ok(None);
        }
        let v = match (promote, v) {
            (true, Value::Int(i)) => Value::double(i as f64),
            (_, v) => v,
        };
        values.push(v);
    }
    Ok(Some(values))
}
