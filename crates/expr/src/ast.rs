//! Query AST: the parsed shape of a SELECT statement. Subquery expressions
//! embed these nodes, so they live next to the expression algebra; the
//! parser crate maps SQL text into them and re-exports them.

use crate::Expr;
use types::SqlType;

/// Join flavors. `Semi`/`AntiSemi` are internal plan vocabulary, never
/// produced by the parser; `Right` is normalized to `Left` with flipped
/// inputs during binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
    Semi,
    AntiSemi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

/// One FROM item. Joins nest left-deep.
#[derive(Clone, Debug, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FromItem {
    Base {
        name: String,
        alias: Option<String>,
    },
    /// Delimited file scanned with the schema of an existing table; reached
    /// through COPY rather than a SQL surface of its own.
    External {
        path: String,
        schema_table: String,
        alias: String,
    },
    Derived {
        query: Box<SelectStmt>,
        alias: String,
    },
    Join {
        left: Box<FromItem>,
        right: Box<FromItem>,
        kind: JoinKind,
        constraint: Option<Expr>,
    },
}

impl FromItem {
    /// The alias this item binds under, when it has a single one.
    pub fn alias(&self) -> Option<&str> {
        match self {
            FromItem::Base { name, alias } => Some(alias.as_deref().unwrap_or(name)),
            FromItem::External { alias, .. } | FromItem::Derived { alias, .. } => Some(alias),
            FromItem::Join { .. } => None,
        }
    }
}

/// ORDER BY item: expression plus descending flag.
#[derive(Clone, Debug, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct OrderItem {
    pub expr: Expr,
    pub desc: bool,
}

/// A WITH-list entry.
#[derive(Clone, Debug, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Cte {
    pub name: String,
    pub query: SelectStmt,
}

/// Trailing set operation: `<stmt> UNION [ALL] <right>` and friends.
#[derive(Clone, Debug, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SetOpTail {
    pub kind: SetOpKind,
    pub all: bool,
    pub right: Box<SelectStmt>,
}

/// A parsed SELECT. Field names follow the parser's vocabulary:
/// `projection` is the select list, `selection` the WHERE predicate.
#[derive(Clone, Debug, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SelectStmt {
    pub ctes: Vec<Cte>,
    pub projection: Vec<Expr>,
    pub from: Vec<FromItem>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<Expr>,
    pub set_op: Option<SetOpTail>,
}

impl SelectStmt {
    /// An empty SELECT shell; the parser fills the clauses it finds.
    pub fn new(projection: Vec<Expr>, from: Vec<FromItem>) -> Self {
        Self {
            ctes: Vec::new(),
            projection,
            from,
            selection: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            set_op: None,
        }
    }
}
