//! Statement-level AST. The query shapes (`SelectStmt`, `FromItem`, …) live
//! in the `expr` crate next to the expression algebra and are re-exported
//! from here.

pub use expr::ast::{Cte, FromItem, JoinKind, OrderItem, SelectStmt, SetOpKind, SetOpTail};

use expr::Expr;
use types::SqlType;

/// Source of INSERT rows.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Query(Box<SelectStmt>),
}

/// One parsed statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(SelectStmt),
    Insert {
        table: String,
        columns: Vec<String>,
        source: InsertSource,
    },
    /// `COPY table FROM 'file'`: bulk-load a delimited file.
    Copy {
        table: String,
        path: String,
    },
    CreateTable {
        name: String,
        columns: Vec<(String, SqlType)>,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropTable {
        name: String,
    },
    Analyze {
        table: String,
    },
    Explain {
        query: Box<Statement>,
    },
}
