//! Expression binding: identifier resolution and type assignment.

use crate::{Binder, BoundSubquery, SubqueryFrame};
use common::{DbError, DbResult, TableSeq};
use expr::{BinOp, ColumnRef, Expr, ExprKind, FuncKind, SubqueryExpr, SubqueryKind};
use std::collections::BTreeSet;
use types::SqlType;

impl<'a> Binder<'a> {
    /// Bind a clone of `e`, leaving the input untouched.
    pub(crate) fn bind_new(&mut self, e: &Expr) -> DbResult<Expr> {
        let mut out = e.clone();
        self.bind_expr(&mut out)?;
        Ok(out)
    }

    /// Bind an owned expression; already-bound subtrees (injected by alias
    /// substitution) pass through untouched.
    pub(crate) fn bind_maybe(&mut self, mut e: Expr) -> DbResult<Expr> {
        self.bind_expr(&mut e)?;
        Ok(e)
    }

    /// Resolve and type one expression tree. Binding an already-bound node
    /// is a no-op, which makes `bind` idempotent by construction.
    pub(crate) fn bind_expr(&mut self, e: &mut Expr) -> DbResult<()> {
        if e.bound {
            return Ok(());
        }

        let ty: Option<SqlType> = match &mut e.kind {
            ExprKind::Literal(v) => v.ty(),
            ExprKind::Column(col) => Some(self.resolve_column(col)?),
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                self.bind_expr(left)?;
                self.bind_expr(right)?;
                Some(binary_result_type(op, left, right)?)
            }
            ExprKind::And { left, right } => {
                self.bind_expr(left)?;
                self.bind_expr(right)?;
                expect_boolean(left, "AND")?;
                expect_boolean(right, "AND")?;
                Some(SqlType::Bool)
            }
            ExprKind::Not(inner) => {
                self.bind_expr(inner)?;
                expect_boolean(inner, "NOT")?;
                Some(SqlType::Bool)
            }
            ExprKind::InList { probe, list, .. } => {
                self.bind_expr(probe)?;
                for item in list.iter_mut() {
                    self.bind_expr(item)?;
                    check_compatible(probe.ty, item.ty, "IN list")?;
                }
                Some(SqlType::Bool)
            }
            ExprKind::Case {
                operand,
                whens,
                thens,
                else_expr,
            } => {
                if let Some(op) = operand {
                    self.bind_expr(op)?;
                }
                let operand_ty = operand.as_ref().and_then(|o| o.ty);
                let mut result_ty: Option<SqlType> = None;
                for when in whens.iter_mut() {
                    self.bind_expr(when)?;
                    match operand_ty {
                        Some(t) => check_compatible(Some(t), when.ty, "CASE WHEN")?,
                        None if operand.is_none() => expect_boolean(when, "CASE WHEN")?,
                        None => {}
                    }
                }
                for then in thens.iter_mut() {
                    self.bind_expr(then)?;
                    check_compatible(result_ty, then.ty, "CASE arms")?;
                    result_ty = result_ty.or(then.ty);
                }
                if let Some(els) = else_expr {
                    self.bind_expr(els)?;
                    check_compatible(result_ty, els.ty, "CASE arms")?;
                    result_ty = result_ty.or(els.ty);
                }
                result_ty
            }
            ExprKind::Func { func, args } => {
                let func = *func;
                for arg in args.iter_mut() {
                    self.bind_expr(arg)?;
                }
                Some(func_result_type(func, args)?)
            }
            ExprKind::Agg { kind, arg } => {
                let kind = *kind;
                if let Some(a) = arg {
                    self.bind_expr(a)?;
                    if a.contains_agg() {
                        return Err(DbError::TypeMismatch(
                            "aggregates cannot nest".into(),
                        ));
                    }
                }
                Some(kind.result_type(arg.as_ref().and_then(|a| a.ty))?)
            }
            ExprKind::Subquery(sub) => Some(self.bind_subquery(sub)?),
            ExprKind::Ref { .. } => {
                return Err(DbError::Plan("positional ref before resolution".into()))
            }
            ExprKind::Star { .. } => {
                return Err(DbError::Plan("unexpanded * reached binding".into()))
            }
        };

        e.ty = ty;
        e.tables = union_child_tables(e);
        if let ExprKind::Column(c) = &e.kind {
            // Outer references stay out of the table set so push-down never
            // assigns them to this scope's nodes.
            if !c.is_outer {
                if let Some(seq) = c.table {
                    e.tables.insert(seq);
                }
            }
        }
        e.bound = true;
        Ok(())
    }

    /// Search the current scope, then ancestors. A hit in an ancestor marks
    /// the column as an outer reference and records it on the owning table.
    fn resolve_column(&mut self, col: &mut ColumnRef) -> DbResult<SqlType> {
        let nscopes = self.scopes.len();
        for depth in (0..nscopes).rev() {
            let mut found: Option<(TableSeq, usize, SqlType)> = None;
            match &col.qualifier {
                Some(q) => {
                    let seq = self.scopes[depth]
                        .tables
                        .iter()
                        .copied()
                        .find(|s| self.registry.get(*s).alias.eq_ignore_ascii_case(q));
                    if let Some(seq) = seq {
                        match self.registry.locate_column(seq, &col.name) {
                            Some((ordinal, ty)) => found = Some((seq, ordinal, ty)),
                            None => {
                                return Err(DbError::UnknownColumn(format!(
                                    "{q}.{}",
                                    col.name
                                )))
                            }
                        }
                    }
                }
                None => {
                    let mut matches = self.scopes[depth]
                        .tables
                        .iter()
                        .copied()
                        .filter_map(|s| {
                            self.registry
                                .locate_column(s, &col.name)
                                .map(|(o, t)| (s, o, t))
                        });
                    if let Some(first) = matches.next() {
                        if matches.next().is_some() {
                            return Err(DbError::AmbiguousColumn(col.name.clone()));
                        }
                        found = Some(first);
                    }
                }
            }

            if let Some((seq, ordinal, ty)) = found {
                col.table = Some(seq);
                col.ordinal = Some(ordinal);
                col.is_outer = depth + 1 < nscopes;
                if col.is_outer {
                    let table = self.registry.get_mut(seq);
                    if !table.outer_cols.contains(&ordinal) {
                        table.outer_cols.push(ordinal);
                    }
                    for frame in &mut self.frames {
                        if depth < frame.boundary {
                            frame.escapes.insert(seq);
                        }
                    }
                }
                return Ok(ty);
            }
        }
        Err(DbError::UnknownColumn(col.name.clone()))
    }

    /// Bind the inner statement in a fresh child frame, check its shape,
    /// assign the statement-global id and decide cacheability.
    fn bind_subquery(&mut self, sub: &mut SubqueryExpr) -> DbResult<SqlType> {
        if let Some(probe) = &mut sub.probe {
            self.bind_expr(probe)?;
        }

        self.frames.push(SubqueryFrame {
            boundary: self.scopes.len(),
            escapes: BTreeSet::new(),
        });
        let bound = self.bind_select(&sub.query);
        let frame = self.frames.pop().expect("frame pushed above");
        let bound = bound?;

        let needs_single_column = matches!(
            sub.kind,
            SubqueryKind::Scalar | SubqueryKind::In { .. }
        );
        if needs_single_column && bound.projection.len() != 1 {
            return Err(DbError::SubqueryShape(bound.projection.len()));
        }

        let result_ty = match sub.kind {
            SubqueryKind::Scalar => bound.projection[0].ty.unwrap_or(SqlType::Int),
            SubqueryKind::Exists { .. } => SqlType::Bool,
            SubqueryKind::In { .. } => {
                let probe_ty = sub.probe.as_ref().and_then(|p| p.ty);
                check_compatible(probe_ty, bound.projection[0].ty, "IN subquery")?;
                SqlType::Bool
            }
        };

        let id = self.next_subquery_id();
        sub.id = Some(id);
        sub.cacheable = frame.escapes.is_empty();
        self.subqueries.push(BoundSubquery {
            id,
            kind: sub.kind,
            select: bound,
            cacheable: sub.cacheable,
            outer_tables: frame.escapes,
        });
        Ok(result_ty)
    }
}

fn union_child_tables(e: &Expr) -> BTreeSet<TableSeq> {
    let mut set = BTreeSet::new();
    for child in e.children() {
        set.extend(child.tables.iter().copied());
    }
    set
}

fn expect_boolean(e: &Expr, what: &str) -> DbResult<()> {
    match e.ty {
        Some(SqlType::Bool) | None => Ok(()),
        Some(other) => Err(DbError::TypeMismatch(format!(
            "{what} needs a boolean, got {other}"
        ))),
    }
}

fn check_compatible(l: Option<SqlType>, r: Option<SqlType>, what: &str) -> DbResult<()> {
    match (l, r) {
        (Some(lt), Some(rt)) if !lt.compatible(&rt) => Err(DbError::TypeMismatch(format!(
            "{what}: {lt} and {rt} are incompatible"
        ))),
        _ => Ok(()),
    }
}

fn binary_result_type(op: BinOp, left: &Expr, right: &Expr) -> DbResult<SqlType> {
    let (lt, rt) = (left.ty, right.ty);
    if op.is_arith() {
        return match (lt, rt) {
            (Some(l), Some(r)) if l.is_numeric() && r.is_numeric() => {
                if l == SqlType::Double || r == SqlType::Double {
                    Ok(SqlType::Double)
                } else {
                    Ok(SqlType::Int)
                }
            }
            (Some(SqlType::Date), Some(SqlType::Interval)) => Ok(SqlType::Date),
            (Some(SqlType::Interval), Some(SqlType::Date)) if op == BinOp::Add => {
                Ok(SqlType::Date)
            }
            (Some(SqlType::Interval), Some(SqlType::Interval))
                if matches!(op, BinOp::Add | BinOp::Sub) =>
            {
                Ok(SqlType::Interval)
            }
            // A null literal adopts the other side.
            (None, Some(t)) | (Some(t), None) => Ok(t),
            (None, None) => Ok(SqlType::Int),
            (Some(l), Some(r)) => Err(DbError::TypeMismatch(format!(
                "cannot apply {op} to {l} and {r}"
            ))),
        };
    }
    if op.is_comparison() {
        check_compatible(lt, rt, "comparison")?;
        return Ok(SqlType::Bool);
    }
    match op {
        BinOp::Or => {
            expect_boolean(left, "OR")?;
            expect_boolean(right, "OR")?;
            Ok(SqlType::Bool)
        }
        BinOp::Like => {
            let char_ok = |t: Option<SqlType>| matches!(t, Some(SqlType::Char(_)) | None);
            if char_ok(lt) && char_ok(rt) {
                Ok(SqlType::Bool)
            } else {
                Err(DbError::TypeMismatch("LIKE needs character operands".into()))
            }
        }
        _ => unreachable!("arith and comparison handled above"),
    }
}

fn func_result_type(func: FuncKind, args: &[Expr]) -> DbResult<SqlType> {
    match func {
        FuncKind::Upper | FuncKind::Lower => match args {
            [a] if matches!(a.ty, Some(SqlType::Char(_)) | None) => {
                Ok(a.ty.unwrap_or(SqlType::Char(64)))
            }
            _ => Err(DbError::TypeMismatch(format!(
                "{func:?} takes one character argument"
            ))),
        },
        FuncKind::Abs => match args {
            [a] if a.ty.map(|t| t.is_numeric()).unwrap_or(true) => {
                Ok(a.ty.unwrap_or(SqlType::Int))
            }
            _ => Err(DbError::TypeMismatch("abs takes one numeric argument".into())),
        },
    }
}
