//! Expression algebra: the tagged expression tree shared by the binder, the
//! planner and the executor.
//!
//! Every variant carries a common envelope (`alias`, `visible`, `ty`,
//! `bound`, `tables`) and exposes its children explicitly through
//! [`Expr::children`]; all traversals (visit, search/replace, table-set
//! computation) iterate those uniformly. Equality and hashing are structural
//! and strip [`ExprKind::Ref`] wrappers, so a rewritten expression still
//! matches the one it was rewritten from.

pub mod agg;
pub mod ast;
mod eval;

pub use agg::{AggAcc, AggKind};
pub use eval::{ConstScope, EvalScope};

use common::{SubqueryId, TableSeq};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use types::{SqlType, Value};

/// Binary operators. `AND` is its own variant on [`ExprKind`] so predicate
/// conjunction lists stay easy to normalize.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Or,
    Like,
}

impl BinOp {
    pub fn is_arith(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "=",
            BinOp::Ne => "<>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Or => "or",
            BinOp::Like => "like",
        };
        write!(f, "{s}")
    }
}

/// Column reference. `qualifier`/`name` come from the parser; `table`,
/// `ordinal` and `is_outer` are filled in by binding. An outer reference
/// resolves into an enclosing scope and is read from execution parameters
/// rather than the current row.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
    pub table: Option<TableSeq>,
    pub ordinal: Option<usize>,
    pub is_outer: bool,
}

impl ColumnRef {
    pub fn new(qualifier: Option<String>, name: String) -> Self {
        Self {
            qualifier,
            name,
            table: None,
            ordinal: None,
            is_outer: false,
        }
    }
}

/// Subquery flavors as they appear in expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SubqueryKind {
    Scalar,
    Exists { negated: bool },
    In { negated: bool },
}

/// A subquery expression: the inner statement plus bind products. The id is
/// assigned by the statement-global counter on the binder; `cacheable` means
/// no correlation crosses the subquery's own boundary, so one evaluation
/// serves every outer row.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct SubqueryExpr {
    pub kind: SubqueryKind,
    pub probe: Option<Box<Expr>>,
    pub query: Box<ast::SelectStmt>,
    pub id: Option<SubqueryId>,
    pub cacheable: bool,
}

/// Scalar functions dispatched by name at bind time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FuncKind {
    Upper,
    Lower,
    Abs,
}

impl FuncKind {
    pub fn parse(name: &str) -> Option<FuncKind> {
        match name {
            "upper" => Some(FuncKind::Upper),
            "lower" => Some(FuncKind::Lower),
            "abs" => Some(FuncKind::Abs),
            _ => None,
        }
    }
}

/// The expression variants.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum ExprKind {
    Literal(Value),
    Column(ColumnRef),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    InList {
        probe: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<Expr>,
        thens: Vec<Expr>,
        else_expr: Option<Box<Expr>>,
    },
    Func {
        func: FuncKind,
        args: Vec<Expr>,
    },
    Agg {
        kind: AggKind,
        arg: Option<Box<Expr>>,
    },
    Subquery(SubqueryExpr),
    /// Positional reference into the child operator's output; wraps the
    /// expression it replaced for display and equality. Never wraps another
    /// `Ref`.
    Ref {
        expr: Box<Expr>,
        ordinal: usize,
    },
    /// `*` or `t.*`; expanded during binding, never survives into a bound
    /// tree.
    Star {
        qualifier: Option<String>,
    },
}

/// An expression node: variant plus the common envelope.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub alias: Option<String>,
    pub visible: bool,
    pub ty: Option<SqlType>,
    pub bound: bool,
    pub tables: BTreeSet<TableSeq>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            alias: None,
            visible: true,
            ty: None,
            bound: false,
            tables: BTreeSet::new(),
        }
    }

    pub fn literal(v: Value) -> Self {
        Self::new(ExprKind::Literal(v))
    }

    pub fn int(v: i64) -> Self {
        Self::literal(Value::Int(v))
    }

    pub fn column(qualifier: Option<&str>, name: &str) -> Self {
        Self::new(ExprKind::Column(ColumnRef::new(
            qualifier.map(|s| s.to_string()),
            name.to_string(),
        )))
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::And {
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn not(inner: Expr) -> Self {
        Self::new(ExprKind::Not(Box::new(inner)))
    }

    pub fn star(qualifier: Option<&str>) -> Self {
        Self::new(ExprKind::Star {
            qualifier: qualifier.map(|s| s.to_string()),
        })
    }

    pub fn agg(kind: AggKind, arg: Option<Expr>) -> Self {
        Self::new(ExprKind::Agg {
            kind,
            arg: arg.map(Box::new),
        })
    }

    /// Wrap into a positional reference. Wrapping an existing `Ref` re-points
    /// its ordinal instead of nesting.
    pub fn into_ref(self, ordinal: usize) -> Expr {
        let mut wrapped = match self.kind {
            ExprKind::Ref { expr, .. } => *expr,
            _ => self,
        };
        debug_assert!(!matches!(wrapped.kind, ExprKind::Ref { .. }));
        let alias = wrapped.alias.take();
        let visible = wrapped.visible;
        let ty = wrapped.ty;
        let bound = wrapped.bound;
        let tables = wrapped.tables.clone();
        Expr {
            kind: ExprKind::Ref {
                expr: Box::new(wrapped),
                ordinal,
            },
            alias,
            visible,
            ty,
            bound,
            tables,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn is_agg(&self) -> bool {
        matches!(self.kind, ExprKind::Agg { .. })
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match &self.kind {
            ExprKind::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Strip `Ref` wrappers down to the underlying expression.
    pub fn unwrap_ref(&self) -> &Expr {
        match &self.kind {
            ExprKind::Ref { expr, .. } => expr.unwrap_ref(),
            _ => self,
        }
    }

    /// Immediate children, in evaluation order. Subquery inner statements are
    /// a scope boundary and are not exposed here; only the probe of an `IN`
    /// subquery is a child.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Column(_) | ExprKind::Star { .. } => vec![],
            ExprKind::Binary { left, right, .. } | ExprKind::And { left, right } => {
                vec![left, right]
            }
            ExprKind::Not(inner) => vec![inner],
            ExprKind::InList { probe, list, .. } => {
                let mut out: Vec<&Expr> = vec![probe];
                out.extend(list.iter());
                out
            }
            ExprKind::Case {
                operand,
                whens,
                thens,
                else_expr,
            } => {
                let mut out: Vec<&Expr> = Vec::new();
                if let Some(op) = operand {
                    out.push(op);
                }
                out.extend(whens.iter());
                out.extend(thens.iter());
                if let Some(e) = else_expr {
                    out.push(e);
                }
                out
            }
            ExprKind::Func { args, .. } => args.iter().collect(),
            ExprKind::Agg { arg, .. } => arg.iter().map(|b| b.as_ref()).collect(),
            ExprKind::Subquery(sub) => sub.probe.iter().map(|b| b.as_ref()).collect(),
            ExprKind::Ref { expr, .. } => vec![expr],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Literal(_) | ExprKind::Column(_) | ExprKind::Star { .. } => vec![],
            ExprKind::Binary { left, right, .. } | ExprKind::And { left, right } => {
                vec![left, right]
            }
            ExprKind::Not(inner) => vec![inner],
            ExprKind::InList { probe, list, .. } => {
                let mut out: Vec<&mut Expr> = vec![probe];
                out.extend(list.iter_mut());
                out
            }
            ExprKind::Case {
                operand,
                whens,
                thens,
                else_expr,
            } => {
                let mut out: Vec<&mut Expr> = Vec::new();
                if let Some(op) = operand {
                    out.push(op);
                }
                out.extend(whens.iter_mut());
                out.extend(thens.iter_mut());
                if let Some(e) = else_expr {
                    out.push(e);
                }
                out
            }
            ExprKind::Func { args, .. } => args.iter_mut().collect(),
            ExprKind::Agg { arg, .. } => arg.iter_mut().map(|b| b.as_mut()).collect(),
            ExprKind::Subquery(sub) => sub.probe.iter_mut().map(|b| b.as_mut()).collect(),
            ExprKind::Ref { expr, .. } => vec![expr],
        }
    }

    /// Pre-order traversal over this node and every descendant.
    pub fn visit_each<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.visit_each(f);
        }
    }

    /// Pre-order short-circuiting search.
    pub fn any_expr(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().iter().any(|c| c.any_expr(pred))
    }

    pub fn contains_agg(&self) -> bool {
        self.any_expr(&mut |e| e.is_agg())
    }

    /// Clone with every subexpression equal to `from` replaced by a clone of
    /// `to`. Does not descend into replaced nodes.
    pub fn search_replace(&self, from: &Expr, to: &Expr) -> Expr {
        if self == from {
            let mut replaced = to.clone();
            if replaced.alias.is_none() {
                replaced.alias = self.alias.clone();
            }
            replaced.visible = self.visible;
            return replaced;
        }
        let mut out = self.clone();
        for child in out.children_mut() {
            *child = child.search_replace(from, to);
        }
        out
    }

    /// Clone with every subexpression aliased `alias` replaced by a clone of
    /// `to`; the string-keyed sibling of [`Expr::search_replace`].
    pub fn replace_by_alias(&self, alias: &str, to: &Expr) -> Expr {
        if self.alias.as_deref() == Some(alias) {
            return to.clone().with_alias(alias);
        }
        let mut out = self.clone();
        for child in out.children_mut() {
            *child = child.replace_by_alias(alias, to);
        }
        out
    }

    /// Split an `AND` tree into its conjunct list.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::And { left, right } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            _ => vec![self],
        }
    }

    /// Rebuild an `AND` tree from conjuncts; `None` for an empty list.
    pub fn conjoin(mut conjuncts: Vec<Expr>) -> Option<Expr> {
        let first = if conjuncts.is_empty() {
            return None;
        } else {
            conjuncts.remove(0)
        };
        Some(conjuncts.into_iter().fold(first, Expr::and))
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        kind_eq(&self.unwrap_ref().kind, &other.unwrap_ref().kind)
    }
}

impl Eq for Expr {}

fn column_eq(a: &ColumnRef, b: &ColumnRef) -> bool {
    // Once both sides are bound, identity is the bound (table, ordinal).
    if let (Some(ta), Some(tb)) = (a.table, b.table) {
        return ta == tb && a.ordinal == b.ordinal;
    }
    if !a.name.eq_ignore_ascii_case(&b.name) {
        return false;
    }
    // A missing qualifier on either side is tolerated.
    match (&a.qualifier, &b.qualifier) {
        (Some(qa), Some(qb)) => qa.eq_ignore_ascii_case(qb),
        _ => true,
    }
}

fn kind_eq(a: &ExprKind, b: &ExprKind) -> bool {
    use ExprKind::*;
    match (a, b) {
        (Literal(x), Literal(y)) => x == y,
        (Column(x), Column(y)) => column_eq(x, y),
        (
            Binary {
                op: o1,
                left: l1,
                right: r1,
            },
            Binary {
                op: o2,
                left: l2,
                right: r2,
            },
        ) => o1 == o2 && l1 == l2 && r1 == r2,
        (And { left: l1, right: r1 }, And { left: l2, right: r2 }) => l1 == l2 && r1 == r2,
        (Not(x), Not(y)) => x == y,
        (
            InList {
                probe: p1,
                list: v1,
                negated: n1,
            },
            InList {
                probe: p2,
                list: v2,
                negated: n2,
            },
        ) => n1 == n2 && p1 == p2 && v1 == v2,
        (
            Case {
                operand: o1,
                whens: w1,
                thens: t1,
                else_expr: e1,
            },
            Case {
                operand: o2,
                whens: w2,
                thens: t2,
                else_expr: e2,
            },
        ) => o1 == o2 && w1 == w2 && t1 == t2 && e1 == e2,
        (Func { func: f1, args: a1 }, Func { func: f2, args: a2 }) => f1 == f2 && a1 == a2,
        (Agg { kind: k1, arg: a1 }, Agg { kind: k2, arg: a2 }) => k1 == k2 && a1 == a2,
        (Subquery(s1), Subquery(s2)) => {
            if let (Some(i1), Some(i2)) = (s1.id, s2.id) {
                return i1 == i2 && s1.kind == s2.kind;
            }
            s1.kind == s2.kind && s1.probe == s2.probe && s1.query == s2.query
        }
        (Star { qualifier: q1 }, Star { qualifier: q2 }) => q1 == q2,
        // `Ref` is stripped before we get here.
        _ => false,
    }
}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let node = self.unwrap_ref();
        std::mem::discriminant(&node.kind).hash(state);
        match &node.kind {
            ExprKind::Literal(v) => v.hash(state),
            // Only the name: equality tolerates a missing qualifier, so the
            // hash must not depend on it (or on bind products).
            ExprKind::Column(c) => c.name.to_ascii_lowercase().hash(state),
            ExprKind::Binary { op, .. } => op.hash(state),
            ExprKind::InList { negated, .. } => negated.hash(state),
            ExprKind::Func { func, .. } => func.hash(state),
            ExprKind::Agg { kind, .. } => kind.hash(state),
            ExprKind::Subquery(sub) => {
                sub.kind.hash(state);
                sub.id.hash(state);
            }
            ExprKind::Star { qualifier } => qualifier.hash(state),
            _ => {}
        }
        for child in node.children() {
            child.hash(state);
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(v) => write!(f, "{v}"),
            ExprKind::Column(c) => match &c.qualifier {
                Some(q) => write!(f, "{q}.{}", c.name),
                None => write!(f, "{}", c.name),
            },
            ExprKind::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            ExprKind::And { left, right } => write!(f, "({left} and {right})"),
            ExprKind::Not(inner) => write!(f, "(not {inner})"),
            ExprKind::InList {
                probe,
                list,
                negated,
            } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                let not = if *negated { " not" } else { "" };
                write!(f, "({probe}{not} in ({}))", items.join(", "))
            }
            ExprKind::Case { .. } => write!(f, "case"),
            ExprKind::Func { func, args } => {
                let items: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{func:?}({})", items.join(", "))
            }
            ExprKind::Agg { kind, arg } => match arg {
                Some(a) => write!(f, "{kind}({a})"),
                None => write!(f, "{kind}(*)"),
            },
            ExprKind::Subquery(sub) => match sub.kind {
                SubqueryKind::Scalar => write!(f, "(subquery {:?})", sub.id),
                SubqueryKind::Exists { negated } => {
                    write!(f, "({}exists {:?})", if negated { "not " } else { "" }, sub.id)
                }
                SubqueryKind::In { negated } => write!(
                    f,
                    "({:?}{} in subquery {:?})",
                    sub.probe,
                    if negated { " not" } else { "" },
                    sub.id
                ),
            },
            ExprKind::Ref { expr, ordinal } => write!(f, "{{{expr}}}@{ordinal}"),
            ExprKind::Star { qualifier } => match qualifier {
                Some(q) => write!(f, "{q}.*"),
                None => write!(f, "*"),
            },
        }
    }
}
