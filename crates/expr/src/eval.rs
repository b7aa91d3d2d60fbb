//! The expression interpreter.
//!
//! `eval` reaches everything outside the current row through [`EvalScope`]:
//! outer-reference parameters published by enclosing operators, and subquery
//! execution. The executor's context is the production implementation;
//! [`ConstScope`] serves bind-time constant evaluation.

use crate::{BinOp, Expr, ExprKind, FuncKind, SubqueryKind};
use common::{DbError, DbResult, Row, SubqueryId, TableSeq};
use types::{ArithError, ArithOp, Value};

/// Ambient state an expression may need beyond the current row.
pub trait EvalScope {
    /// The value of `ordinal` in the row most recently published for
    /// `table` by an enclosing operator.
    fn outer_value(&self, table: TableSeq, ordinal: usize) -> DbResult<Value>;

    /// Run a scalar subquery: its single column of its zero-or-one row
    /// (`Null` when empty, `SubqueryMultipleRows` past one).
    fn subquery_scalar(&mut self, id: SubqueryId) -> DbResult<Value>;

    /// Whether the subquery produces at least one row.
    fn subquery_exists(&mut self, id: SubqueryId) -> DbResult<bool>;

    /// Membership of `probe` in the subquery's single-column result set.
    fn subquery_contains(&mut self, id: SubqueryId, probe: &Value) -> DbResult<bool>;
}

/// Scope for contexts where only constants make sense (bind-time folding of
/// LIMIT, CHECK-style validation). Everything ambient is an error.
pub struct ConstScope;

impl EvalScope for ConstScope {
    fn outer_value(&self, table: TableSeq, _ordinal: usize) -> DbResult<Value> {
        Err(DbError::Eval(format!(
            "outer reference to {table} in constant context"
        )))
    }

    fn subquery_scalar(&mut self, id: SubqueryId) -> DbResult<Value> {
        Err(DbError::Eval(format!("subquery {id} in constant context")))
    }

    fn subquery_exists(&mut self, id: SubqueryId) -> DbResult<bool> {
        Err(DbError::Eval(format!("subquery {id} in constant context")))
    }

    fn subquery_contains(&mut self, id: SubqueryId, _probe: &Value) -> DbResult<bool> {
        Err(DbError::Eval(format!("subquery {id} in constant context")))
    }
}

/// Three-valued truth of a value: `None` is the SQL unknown.
fn truth(v: &Value) -> DbResult<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(DbError::Eval(format!("expected a boolean, got {other}"))),
    }
}

fn from_truth(t: Option<bool>) -> Value {
    match t {
        Some(b) => Value::Bool(b),
        None => Value::Null,
    }
}

impl Expr {
    /// Interpret this expression against `row`. A filter predicate passes
    /// only on `Bool(true)`; unknown gates to false at the operator.
    pub fn eval(&self, scope: &mut dyn EvalScope, row: &Row) -> DbResult<Value> {
        match &self.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Column(c) => {
                let ordinal = c.ordinal.ok_or_else(|| {
                    DbError::Eval(format!("unresolved column '{}'", c.name))
                })?;
                if c.is_outer {
                    let table = c.table.ok_or_else(|| {
                        DbError::Eval(format!("outer column '{}' has no table", c.name))
                    })?;
                    return scope.outer_value(table, ordinal);
                }
                row.values
                    .get(ordinal)
                    .cloned()
                    .ok_or_else(|| DbError::Eval(format!("row has no column {ordinal}")))
            }
            ExprKind::Ref { ordinal, .. } => row
                .values
                .get(*ordinal)
                .cloned()
                .ok_or_else(|| DbError::Eval(format!("row has no column {ordinal}"))),
            ExprKind::Binary { op, left, right } => {
                let l = left.eval(scope, row)?;
                let r = right.eval(scope, row)?;
                eval_binary(*op, &l, &r)
            }
            ExprKind::And { left, right } => {
                let l = truth(&left.eval(scope, row)?)?;
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = truth(&right.eval(scope, row)?)?;
                Ok(from_truth(match (l, r) {
                    (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }))
            }
            ExprKind::Not(inner) => {
                let t = truth(&inner.eval(scope, row)?)?;
                Ok(from_truth(t.map(|b| !b)))
            }
            ExprKind::InList {
                probe,
                list,
                negated,
            } => {
                let v = probe.eval(scope, row)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let mut found = false;
                for item in list {
                    let iv = item.eval(scope, row)?;
                    if iv.is_null() {
                        continue;
                    }
                    if v.eq_values(&iv) == Some(true) {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Bool(found != *negated))
            }
            ExprKind::Case {
                operand,
                whens,
                thens,
                else_expr,
            } => {
                let probe = match operand {
                    Some(op) => Some(op.eval(scope, row)?),
                    None => None,
                };
                for (when, then) in whens.iter().zip(thens.iter()) {
                    let w = when.eval(scope, row)?;
                    let hit = match &probe {
                        Some(p) => p.eq_values(&w) == Some(true),
                        None => truth(&w)? == Some(true),
                    };
                    if hit {
                        return then.eval(scope, row);
                    }
                }
                match else_expr {
                    Some(e) => e.eval(scope, row),
                    None => Ok(Value::Null),
                }
            }
            ExprKind::Func { func, args } => {
                let vals = args
                    .iter()
                    .map(|a| a.eval(scope, row))
                    .collect::<DbResult<Vec<_>>>()?;
                eval_func(*func, &vals)
            }
            ExprKind::Agg { kind, .. } => Err(DbError::Eval(format!(
                "aggregate {kind}() outside an aggregation"
            ))),
            ExprKind::Subquery(sub) => {
                let id = sub
                    .id
                    .ok_or_else(|| DbError::Eval("unbound subquery".into()))?;
                match sub.kind {
                    SubqueryKind::Scalar => scope.subquery_scalar(id),
                    SubqueryKind::Exists { negated } => {
                        let exists = scope.subquery_exists(id)?;
                        Ok(Value::Bool(exists != negated))
                    }
                    SubqueryKind::In { negated } => {
                        let probe = sub
                            .probe
                            .as_ref()
                            .ok_or_else(|| DbError::Eval("IN subquery without probe".into()))?
                            .eval(scope, row)?;
                        if probe.is_null() {
                            return Ok(Value::Null);
                        }
                        let contains = scope.subquery_contains(id, &probe)?;
                        Ok(Value::Bool(contains != negated))
                    }
                }
            }
            ExprKind::Star { .. } => {
                Err(DbError::Eval("unexpanded * reached evaluation".into()))
            }
        }
    }

    /// Evaluate with no ambient scope; fails on columns, outer refs and
    /// subqueries. Used for LIMIT and other bind-time constants.
    pub fn eval_const(&self) -> DbResult<Value> {
        self.eval(&mut ConstScope, &Row::new(vec![]))
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> DbResult<Value> {
    if op.is_arith() {
        let arith_op = match op {
            BinOp::Add => ArithOp::Add,
            BinOp::Sub => ArithOp::Sub,
            BinOp::Mul => ArithOp::Mul,
            _ => ArithOp::Div,
        };
        return Value::arith(arith_op, l, r).map_err(|e| match e {
            ArithError::DivideByZero => DbError::Eval("division by zero".into()),
            ArithError::Incompatible => {
                DbError::Eval(format!("cannot apply {op} to {l} and {r}"))
            }
        });
    }
    match op {
        BinOp::Or => {
            let lt = truth(l)?;
            let rt = truth(r)?;
            Ok(from_truth(match (lt, rt) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }))
        }
        BinOp::Like => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            l.like(r)
                .map(Value::Bool)
                .ok_or_else(|| DbError::Eval(format!("cannot apply like to {l} and {r}")))
        }
        _ => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ord = l.cmp_values(r).ok_or_else(|| {
                DbError::Eval(format!("cannot compare {l} with {r}"))
            })?;
            use std::cmp::Ordering::*;
            let result = match op {
                BinOp::Eq => ord == Equal,
                BinOp::Ne => ord != Equal,
                BinOp::Lt => ord == Less,
                BinOp::Le => ord != Greater,
                BinOp::Gt => ord == Greater,
                BinOp::Ge => ord != Less,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
    }
}

fn eval_func(func: FuncKind, args: &[Value]) -> DbResult<Value> {
    match (func, args) {
        (_, [Value::Null]) => Ok(Value::Null),
        (FuncKind::Upper, [Value::Str(s)]) => Ok(Value::Str(s.to_uppercase())),
        (FuncKind::Lower, [Value::Str(s)]) => Ok(Value::Str(s.to_lowercase())),
        (FuncKind::Abs, [Value::Int(v)]) => Ok(Value::Int(v.abs())),
        (FuncKind::Abs, [Value::Double(v)]) => Ok(Value::double(v.0.abs())),
        _ => Err(DbError::Eval(format!(
            "bad arguments to {func:?}: {args:?}"
        ))),
    }
}
