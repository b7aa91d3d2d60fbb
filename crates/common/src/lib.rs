#[cfg(test)]
mod tests;

pub mod pretty;

use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};
use thiserror::Error;
use types::Value;

/// Statement-global handle for a table reference produced by binding.
/// Expressions and plan nodes name tables through this, never by pointer.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TableSeq(pub u32);

/// Statement-global handle for a subquery expression, assigned during bind.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SubqueryId(pub u32);

impl std::fmt::Display for TableSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl std::fmt::Display for SubqueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sq{}", self.0)
    }
}

/// Positional row representation backed by `types::Value`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// All-null row of the given width, used to pad the missing side of
    /// outer and anti-semi joins.
    pub fn nulls(width: usize) -> Self {
        Self {
            values: vec![Value::Null; width],
        }
    }

    /// Join composition: left values followed by right values.
    pub fn concat(left: &Row, right: &Row) -> Self {
        let mut values = Vec::with_capacity(left.values.len() + right.values.len());
        values.extend(left.values.iter().cloned());
        values.extend(right.values.iter().cloned());
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Rectangular result set carrying column labels and rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Canonical error type shared across the query pipeline. Bind- and
/// plan-time kinds abort compilation; runtime kinds abort the statement and
/// leave the catalog intact.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("parse: {0}")]
    Parse(String),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("ambiguous column '{0}'")]
    AmbiguousColumn(String),
    #[error("duplicate table alias '{0}'")]
    TableAliasConflict(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("column '{0}' must appear in GROUP BY or an aggregate")]
    MissingGroupBy(String),
    #[error("subquery must return one column, got {0}")]
    SubqueryShape(usize),
    #[error("scalar subquery returned more than one row")]
    SubqueryMultipleRows,
    #[error("no physical plan in memo group {0}")]
    NoPhysicalPlan(usize),
    #[error("eval: {0}")]
    Eval(String),
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("plan: {0}")]
    Plan(String),
    #[error("exec: {0}")]
    Executor(String),
    /// Internal control-flow marker for operators that stop a producer
    /// early (LIMIT, EXISTS, semi joins). Callers never observe it.
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Optimizer toggles, the enumerated surface threaded through planning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptimizeOptions {
    pub enable_subquery_to_markjoin: bool,
    pub remove_from: bool,
    pub enable_hashjoin: bool,
    pub enable_nljoin: bool,
    pub enable_indexseek: bool,
    pub use_memo: bool,
    pub memo_disable_crossjoin: bool,
    pub use_codegen: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            enable_subquery_to_markjoin: false,
            remove_from: false,
            enable_hashjoin: true,
            enable_nljoin: true,
            enable_indexseek: false,
            use_memo: false,
            memo_disable_crossjoin: false,
            use_codegen: false,
        }
    }
}

/// Per-statement execution options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub profile: bool,
    pub optimize: OptimizeOptions,
}

/// EXPLAIN rendering toggles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExplainOptions {
    pub show_tablename: bool,
    pub show_cost: bool,
    pub show_output: bool,
}

/// Read a delimited text file, handing each line's fields to `each_line`.
/// The default delimiter in this system is `|`; a trailing delimiter (as in
/// TPC-style `.tbl` files) does not produce an empty final field.
pub fn read_csv<F>(path: &Path, delim: char, mut each_line: F) -> DbResult<()>
where
    F: FnMut(&[&str]) -> DbResult<()>,
{
    let data = fs::read_to_string(path)?;
    for line in data.lines() {
        if line.is_empty() {
            continue;
        }
        let trimmed = line.strip_suffix(delim).unwrap_or(line);
        let fields: Vec<&str> = trimmed.split(delim).collect();
        each_line(&fields)?;
    }
    Ok(())
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        DbError, DbResult, ExplainOptions, OptimizeOptions, QueryOptions, RecordBatch, Row,
        SubqueryId, TableSeq,
    };
    pub use types::{SqlType, Value};
}
