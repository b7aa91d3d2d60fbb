//! SQL text → internal AST.
//!
//! Parsing proper is delegated to the `sqlparser` crate; this layer maps its
//! AST into the engine's own statement and expression shapes, rejecting
//! everything the engine does not speak. Identifiers are normalized to
//! lowercase on the way through.

mod ast;
#[cfg(test)]
mod tests;

pub use ast::*;

use common::{DbError, DbResult};
use expr::{AggKind, BinOp, Expr, ExprKind, FuncKind, SubqueryExpr, SubqueryKind};
use sqlparser::ast as sqlast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use types::{SqlType, Value};

/// Parse SQL text into the internal AST statements.
pub fn parse_sql(sql: &str) -> DbResult<Vec<Statement>> {
    let dialect = GenericDialect {};
    let stmts = SqlParser::parse_sql(&dialect, sql)
        .map_err(|e| DbError::Parse(format!("SQL parse error: {e}")))?;

    stmts.into_iter().map(map_statement).collect()
}

/// Parse a single statement, rejecting batches.
pub fn parse_one(sql: &str) -> DbResult<Statement> {
    let mut stmts = parse_sql(sql)?;
    match stmts.len() {
        1 => Ok(stmts.remove(0)),
        n => Err(DbError::Parse(format!("expected one statement, got {n}"))),
    }
}

fn map_statement(stmt: sqlast::Statement) -> DbResult<Statement> {
    use sqlast::Statement as SqlStatement;

    match stmt {
        SqlStatement::Query(query) => Ok(Statement::Select(map_query(*query)?)),
        SqlStatement::Insert {
            table_name,
            columns,
            source,
            ..
        } => {
            let table = normalize_object_name(&table_name)?;
            let columns = columns.iter().map(normalize_ident).collect();
            let source = source.ok_or_else(|| DbError::Parse("INSERT source missing".into()))?;
            let source = map_insert_source(*source)?;
            Ok(Statement::Insert {
                table,
                columns,
                source,
            })
        }
        SqlStatement::Copy {
            source, to, target, ..
        } => {
            if to {
                return Err(DbError::Parse("COPY TO not supported".into()));
            }
            let table = match source {
                sqlast::CopySource::Table { table_name, .. } => {
                    normalize_object_name(&table_name)?
                }
                sqlast::CopySource::Query(_) => {
                    return Err(DbError::Parse("COPY of a query not supported".into()))
                }
            };
            let path = match target {
                sqlast::CopyTarget::File { filename } => filename,
                other => {
                    return Err(DbError::Parse(format!(
                        "unsupported COPY target: {other:?}"
                    )))
                }
            };
            Ok(Statement::Copy { table, path })
        }
        SqlStatement::CreateTable { name, columns, .. } => {
            let table = normalize_object_name(&name)?;
            let mapped = columns
                .into_iter()
                .map(|col| {
                    let type_name = col.data_type.to_string();
                    let ty = SqlType::parse(&type_name).ok_or_else(|| {
                        DbError::Parse(format!("unsupported column type: {type_name}"))
                    })?;
                    Ok((normalize_ident(&col.name), ty))
                })
                .collect::<DbResult<Vec<_>>>()?;
            Ok(Statement::CreateTable {
                name: table,
                columns: mapped,
            })
        }
        SqlStatement::CreateIndex {
            name,
            table_name,
            columns,
            unique,
            ..
        } => {
            let index_name = name
                .ok_or_else(|| DbError::Parse("index name required".into()))
                .map(|n| normalize_object_name(&n))??;
            let table = normalize_object_name(&table_name)?;
            let columns = columns
                .iter()
                .map(map_index_column)
                .collect::<DbResult<Vec<_>>>()?;
            Ok(Statement::CreateIndex {
                name: index_name,
                table,
                columns,
                unique,
            })
        }
        SqlStatement::Drop {
            object_type, names, ..
        } => match object_type {
            sqlast::ObjectType::Table => Ok(Statement::DropTable {
                name: first_name(names)?,
            }),
            other => Err(DbError::Parse(format!("unsupported DROP type: {other:?}"))),
        },
        SqlStatement::Analyze { table_name, .. } => Ok(Statement::Analyze {
            table: normalize_object_name(&table_name)?,
        }),
        SqlStatement::Explain { statement, .. } => Ok(Statement::Explain {
            query: Box::new(map_statement(*statement)?),
        }),
        other => Err(DbError::Parse(format!("unsupported statement: {other}"))),
    }
}

fn map_insert_source(mut query: sqlast::Query) -> DbResult<InsertSource> {
    match *query.body {
        sqlast::SetExpr::Values(values) => {
            let rows = values
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(map_expr).collect::<DbResult<Vec<_>>>())
                .collect::<DbResult<Vec<_>>>()?;
            if rows.is_empty() {
                return Err(DbError::Parse("INSERT requires at least one row".into()));
            }
            Ok(InsertSource::Values(rows))
        }
        other => {
            query.body = Box::new(other);
            Ok(InsertSource::Query(Box::new(map_query(query)?)))
        }
    }
}

fn map_query(query: sqlast::Query) -> DbResult<SelectStmt> {
    let ctes = match query.with {
        Some(with) => with
            .cte_tables
            .into_iter()
            .map(|cte| {
                Ok(Cte {
                    name: normalize_ident(&cte.alias.name),
                    query: map_query(*cte.query)?,
                })
            })
            .collect::<DbResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    let mut stmt = map_set_expr(*query.body)?;
    // A parenthesized inner query may already carry clauses of its own;
    // only layer on what this level actually wrote.
    if !ctes.is_empty() {
        stmt.ctes = ctes;
    }
    if !query.order_by.is_empty() {
        // ORDER BY attaches to the whole statement, set tail included.
        stmt.order_by = query
            .order_by
            .into_iter()
            .map(map_order_item)
            .collect::<DbResult<Vec<_>>>()?;
    }
    if let Some(limit) = query.limit {
        stmt.limit = Some(map_expr(limit)?);
    }
    if query.offset.is_some() {
        return Err(DbError::Parse("OFFSET not supported".into()));
    }
    Ok(stmt)
}

fn map_set_expr(body: sqlast::SetExpr) -> DbResult<SelectStmt> {
    match body {
        sqlast::SetExpr::Select(select) => map_select_core(*select),
        sqlast::SetExpr::Query(query) => map_query(*query),
        sqlast::SetExpr::SetOperation {
            op,
            set_quantifier,
            left,
            right,
        } => {
            let kind = match op {
                sqlast::SetOperator::Union => SetOpKind::Union,
                sqlast::SetOperator::Intersect => SetOpKind::Intersect,
                sqlast::SetOperator::Except => SetOpKind::Except,
            };
            let all = match set_quantifier {
                sqlast::SetQuantifier::All => true,
                sqlast::SetQuantifier::None | sqlast::SetQuantifier::Distinct => false,
                other => {
                    return Err(DbError::Parse(format!(
                        "unsupported set quantifier: {other:?}"
                    )))
                }
            };
            // ALL belongs to UNION; the other set operations are distinct-only.
            if all && kind != SetOpKind::Union {
                return Err(DbError::Parse(format!(
                    "{kind:?} ALL not supported"
                )));
            }
            let mut stmt = map_set_expr(*left)?;
            let right = map_set_expr(*right)?;
            append_set_tail(
                &mut stmt,
                SetOpTail {
                    kind,
                    all,
                    right: Box::new(right),
                },
            );
            Ok(stmt)
        }
        sqlast::SetExpr::Values(_) => {
            Err(DbError::Parse("standalone VALUES not supported".into()))
        }
        other => Err(DbError::Parse(format!("unsupported query body: {other}"))),
    }
}

/// Chains like `a UNION b UNION c` parse left-nested; tails append in order.
fn append_set_tail(stmt: &mut SelectStmt, tail: SetOpTail) {
    let mut slot = &mut stmt.set_op;
    while let Some(existing) = slot {
        slot = &mut existing.right.set_op;
    }
    *slot = Some(tail);
}

fn map_select_core(select: sqlast::Select) -> DbResult<SelectStmt> {
    let sqlast::Select {
        projection,
        from,
        selection,
        group_by,
        having,
        ..
    } = select;

    let projection = projection
        .into_iter()
        .map(map_select_item)
        .collect::<DbResult<Vec<_>>>()?;

    let from = from
        .into_iter()
        .map(map_table_with_joins)
        .collect::<DbResult<Vec<_>>>()?;

    let mut stmt = SelectStmt::new(projection, from);
    stmt.selection = selection.map(map_expr).transpose()?;
    stmt.group_by = match group_by {
        sqlast::GroupByExpr::Expressions(exprs) => exprs
            .into_iter()
            .map(map_expr)
            .collect::<DbResult<Vec<_>>>()?,
        sqlast::GroupByExpr::All => {
            return Err(DbError::Parse("GROUP BY ALL not supported".into()))
        }
    };
    stmt.having = having.map(map_expr).transpose()?;
    Ok(stmt)
}

fn map_select_item(item: sqlast::SelectItem) -> DbResult<Expr> {
    match item {
        sqlast::SelectItem::UnnamedExpr(e) => map_expr(e),
        sqlast::SelectItem::ExprWithAlias { expr, alias } => {
            let mut mapped = map_expr(expr)?;
            mapped.alias = Some(normalize_ident(&alias));
            Ok(mapped)
        }
        sqlast::SelectItem::Wildcard(_) => Ok(Expr::star(None)),
        sqlast::SelectItem::QualifiedWildcard(name, _) => {
            Ok(Expr::star(Some(&normalize_object_name(&name)?)))
        }
    }
}

fn map_table_with_joins(twj: sqlast::TableWithJoins) -> DbResult<FromItem> {
    let mut item = map_table_factor(twj.relation)?;
    for join in twj.joins {
        let right = map_table_factor(join.relation)?;
        let (kind, constraint) = match join.join_operator {
            sqlast::JoinOperator::Inner(c) => (JoinKind::Inner, map_join_constraint(c)?),
            sqlast::JoinOperator::LeftOuter(c) => (JoinKind::Left, map_join_constraint(c)?),
            sqlast::JoinOperator::RightOuter(c) => (JoinKind::Right, map_join_constraint(c)?),
            sqlast::JoinOperator::CrossJoin => (JoinKind::Cross, None),
            other => {
                return Err(DbError::Parse(format!("unsupported join: {other:?}")));
            }
        };
        item = FromItem::Join {
            left: Box::new(item),
            right: Box::new(right),
            kind,
            constraint,
        };
    }
    Ok(item)
}

fn map_table_factor(factor: sqlast::TableFactor) -> DbResult<FromItem> {
    match factor {
        sqlast::TableFactor::Table { name, alias, .. } => Ok(FromItem::Base {
            name: normalize_object_name(&name)?,
            alias: alias.map(|a| normalize_ident(&a.name)),
        }),
        sqlast::TableFactor::Derived {
            lateral,
            subquery,
            alias,
        } => {
            if lateral {
                return Err(DbError::Parse("LATERAL not supported".into()));
            }
            let alias = alias
                .map(|a| normalize_ident(&a.name))
                .ok_or_else(|| DbError::Parse("derived table requires an alias".into()))?;
            Ok(FromItem::Derived {
                query: Box::new(map_query(*subquery)?),
                alias,
            })
        }
        sqlast::TableFactor::NestedJoin {
            table_with_joins,
            alias,
        } => {
            if alias.is_some() {
                return Err(DbError::Parse("aliased join groups not supported".into()));
            }
            map_table_with_joins(*table_with_joins)
        }
        other => Err(DbError::Parse(format!(
            "unsupported table factor: {other}"
        ))),
    }
}

fn map_join_constraint(constraint: sqlast::JoinConstraint) -> DbResult<Option<Expr>> {
    match constraint {
        sqlast::JoinConstraint::On(e) => Ok(Some(map_expr(e)?)),
        sqlast::JoinConstraint::None => Ok(None),
        other => Err(DbError::Parse(format!(
            "unsupported join constraint: {other:?}"
        ))),
    }
}

fn map_order_item(order: sqlast::OrderByExpr) -> DbResult<OrderItem> {
    Ok(OrderItem {
        expr: map_expr(order.expr)?,
        desc: order.asc == Some(false),
    })
}

fn map_expr(e: sqlast::Expr) -> DbResult<Expr> {
    use sqlast::Expr as SqlExpr;

    match e {
        SqlExpr::Identifier(ident) => Ok(Expr::column(None, &normalize_ident(&ident))),
        SqlExpr::CompoundIdentifier(parts) => match parts.as_slice() {
            [qualifier, name] => Ok(Expr::column(
                Some(&normalize_ident(qualifier)),
                &normalize_ident(name),
            )),
            _ => Err(DbError::Parse(format!(
                "unsupported identifier: {parts:?}"
            ))),
        },
        SqlExpr::Value(v) => Ok(Expr::literal(map_value(v)?)),
        SqlExpr::BinaryOp { left, op, right } => {
            let l = map_expr(*left)?;
            let r = map_expr(*right)?;
            if matches!(op, sqlast::BinaryOperator::And) {
                return Ok(Expr::and(l, r));
            }
            Ok(Expr::binary(map_binary_op(op)?, l, r))
        }
        SqlExpr::UnaryOp { op, expr } => match op {
            sqlast::UnaryOperator::Not => Ok(Expr::not(map_expr(*expr)?)),
            sqlast::UnaryOperator::Plus => map_expr(*expr),
            sqlast::UnaryOperator::Minus => {
                let inner = map_expr(*expr)?;
                match &inner.kind {
                    ExprKind::Literal(Value::Int(v)) => Ok(Expr::int(-v)),
                    ExprKind::Literal(Value::Double(v)) => {
                        Ok(Expr::literal(Value::double(-v.0)))
                    }
                    _ => Ok(Expr::binary(BinOp::Sub, Expr::int(0), inner)),
                }
            }
            other => Err(DbError::Parse(format!(
                "unsupported unary operator: {other:?}"
            ))),
        },
        SqlExpr::Nested(inner) => map_expr(*inner),
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::new(ExprKind::InList {
            probe: Box::new(map_expr(*expr)?),
            list: list.into_iter().map(map_expr).collect::<DbResult<Vec<_>>>()?,
            negated,
        })),
        SqlExpr::InSubquery {
            expr,
            subquery,
            negated,
        } => Ok(Expr::new(ExprKind::Subquery(SubqueryExpr {
            kind: SubqueryKind::In { negated },
            probe: Some(Box::new(map_expr(*expr)?)),
            query: Box::new(map_query(*subquery)?),
            id: None,
            cacheable: false,
        }))),
        SqlExpr::Exists { subquery, negated } => {
            Ok(Expr::new(ExprKind::Subquery(SubqueryExpr {
                kind: SubqueryKind::Exists { negated },
                probe: None,
                query: Box::new(map_query(*subquery)?),
                id: None,
                cacheable: false,
            })))
        }
        SqlExpr::Subquery(subquery) => Ok(Expr::new(ExprKind::Subquery(SubqueryExpr {
            kind: SubqueryKind::Scalar,
            probe: None,
            query: Box::new(map_query(*subquery)?),
            id: None,
            cacheable: false,
        }))),
        SqlExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => Ok(Expr::new(ExprKind::Case {
            operand: operand.map(|e| map_expr(*e).map(Box::new)).transpose()?,
            whens: conditions
                .into_iter()
                .map(map_expr)
                .collect::<DbResult<Vec<_>>>()?,
            thens: results
                .into_iter()
                .map(map_expr)
                .collect::<DbResult<Vec<_>>>()?,
            else_expr: else_result.map(|e| map_expr(*e).map(Box::new)).transpose()?,
        })),
        SqlExpr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let like = Expr::binary(BinOp::Like, map_expr(*expr)?, map_expr(*pattern)?);
            Ok(if negated { Expr::not(like) } else { like })
        }
        SqlExpr::Function(func) => map_function(func),
        SqlExpr::TypedString { data_type, value } => match data_type {
            sqlast::DataType::Date => {
                let date = types::parse_date(&value)
                    .ok_or_else(|| DbError::Parse(format!("invalid date literal: {value}")))?;
                Ok(Expr::literal(Value::Date(date)))
            }
            other => Err(DbError::Parse(format!(
                "unsupported typed literal: {other}"
            ))),
        },
        SqlExpr::Interval(interval) => map_interval(interval),
        other => Err(DbError::Parse(format!("unsupported expr: {other}"))),
    }
}

fn map_function(func: sqlast::Function) -> DbResult<Expr> {
    let sqlast::Function { name, args, .. } = func;
    let name = normalize_object_name(&name)?;

    let mut star = false;
    let mut mapped = Vec::new();
    for arg in args {
        match arg {
            sqlast::FunctionArg::Unnamed(sqlast::FunctionArgExpr::Expr(e)) => {
                mapped.push(map_expr(e)?)
            }
            sqlast::FunctionArg::Unnamed(sqlast::FunctionArgExpr::Wildcard) => star = true,
            other => {
                return Err(DbError::Parse(format!(
                    "unsupported function argument: {other}"
                )))
            }
        }
    }

    if let Some(kind) = AggKind::parse(&name, star) {
        if star {
            return Ok(Expr::agg(kind, None));
        }
        if mapped.len() != 1 {
            return Err(DbError::Parse(format!(
                "{name}() takes exactly one argument"
            )));
        }
        return Ok(Expr::agg(kind, Some(mapped.remove(0))));
    }

    match FuncKind::parse(&name) {
        Some(kind) => Ok(Expr::new(ExprKind::Func {
            func: kind,
            args: mapped,
        })),
        None => Err(DbError::Parse(format!("unknown function: {name}"))),
    }
}

fn map_interval(interval: sqlast::Interval) -> DbResult<Expr> {
    let body = match *interval.value {
        sqlast::Expr::Value(sqlast::Value::SingleQuotedString(s)) => s,
        sqlast::Expr::Value(sqlast::Value::Number(n, _)) => n,
        other => {
            return Err(DbError::Parse(format!(
                "unsupported interval value: {other}"
            )))
        }
    };
    let days = match interval.leading_field {
        // `interval '3' day` carries the unit outside the string.
        Some(field) => {
            let unit = match field {
                sqlast::DateTimeField::Day => "days",
                sqlast::DateTimeField::Month => "months",
                sqlast::DateTimeField::Year => "years",
                other => {
                    return Err(DbError::Parse(format!(
                        "unsupported interval unit: {other}"
                    )))
                }
            };
            types::parse_interval(&format!("{body} {unit}"))
        }
        None => types::parse_interval(&body),
    };
    let days =
        days.ok_or_else(|| DbError::Parse(format!("invalid interval literal: {body}")))?;
    Ok(Expr::literal(Value::Interval(days)))
}

fn map_value(value: sqlast::Value) -> DbResult<Value> {
    use sqlast::Value as SqlValue;

    match value {
        SqlValue::Number(num, _) => {
            if let Ok(v) = num.parse::<i64>() {
                return Ok(Value::Int(v));
            }
            num.parse::<f64>()
                .map(Value::double)
                .map_err(|_| DbError::Parse(format!("invalid number literal: {num}")))
        }
        SqlValue::SingleQuotedString(s) => Ok(Value::Str(s)),
        SqlValue::Boolean(b) => Ok(Value::Bool(b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(DbError::Parse(format!("unsupported literal: {other}"))),
    }
}

fn map_binary_op(op: sqlast::BinaryOperator) -> DbResult<BinOp> {
    use sqlast::BinaryOperator as SqlBinary;

    Ok(match op {
        SqlBinary::Plus => BinOp::Add,
        SqlBinary::Minus => BinOp::Sub,
        SqlBinary::Multiply => BinOp::Mul,
        SqlBinary::Divide => BinOp::Div,
        SqlBinary::Eq => BinOp::Eq,
        SqlBinary::NotEq => BinOp::Ne,
        SqlBinary::Lt => BinOp::Lt,
        SqlBinary::LtEq => BinOp::Le,
        SqlBinary::Gt => BinOp::Gt,
        SqlBinary::GtEq => BinOp::Ge,
        SqlBinary::Or => BinOp::Or,
        other => return Err(DbError::Parse(format!("unsupported operator: {other:?}"))),
    })
}

fn normalize_ident(ident: &sqlast::Ident) -> String {
    ident.value.to_lowercase()
}

fn normalize_object_name(name: &sqlast::ObjectName) -> DbResult<String> {
    match name.0.as_slice() {
        [ident] => Ok(ident.value.to_lowercase()),
        _ => Err(DbError::Parse(format!("invalid object name: {name}"))),
    }
}

fn first_name(mut names: Vec<sqlast::ObjectName>) -> DbResult<String> {
    if names.is_empty() {
        return Err(DbError::Parse("DROP requires a target".into()));
    }
    normalize_object_name(&names.remove(0))
}

fn map_index_column(column: &sqlast::OrderByExpr) -> DbResult<String> {
    match &column.expr {
        sqlast::Expr::Identifier(ident) => Ok(normalize_ident(ident)),
        other => Err(DbError::Parse(format!(
            "unsupported index column: {other}"
        ))),
    }
}
