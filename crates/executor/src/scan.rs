//! Scan operators: table heaps and delimited files.

use crate::{predicate_passes, project, ExecContext, Sink};
use binder::TableSource;
use common::{read_csv, DbError, DbResult, Row, TableSeq};
use expr::Expr;
use std::path::Path;
use types::Value;

/// Iterate a base table's heap. If nested scopes reference this table, each
/// row is published before the filter runs so correlated subqueries inside
/// the filter already see it.
pub(crate) fn scan_table(
    table: TableSeq,
    filter: Option<&Expr>,
    output: &[Expr],
    ctx: &mut ExecContext,
    out: Sink,
) -> DbResult<()> {
    let bound = ctx.registry.get(table);
    let name = match &bound.source {
        TableSource::Base { table: name } => name.clone(),
        other => {
            return Err(DbError::Executor(format!(
                "scan over non-base source {other:?}"
            )))
        }
    };
    let publish = !bound.outer_cols.is_empty();

    // The catalog reference outlives the context borrow, so the heap can be
    // iterated while the context mutates.
    let catalog = ctx.catalog;
    let heap = &catalog.table(&name)?.heap;

    for row in heap {
        if publish {
            ctx.publish(table, row.clone());
        }
        if !predicate_passes(filter, ctx, row)? {
            continue;
        }
        let projected = project(output, ctx, row)?;
        out(ctx, projected)?;
    }
    Ok(())
}

/// Read a `|`-delimited file with the bound table's schema, parsing each
/// field by its column type.
pub(crate) fn scan_file(
    table: TableSeq,
    path: &str,
    filter: Option<&Expr>,
    output: &[Expr],
    ctx: &mut ExecContext,
    out: Sink,
) -> DbResult<()> {
    let bound = ctx.registry.get(table);
    let publish = !bound.outer_cols.is_empty();
    let columns = bound.columns.clone();

    let mut drive = |ctx: &mut ExecContext, fields: &[&str]| -> DbResult<()> {
        if fields.len() != columns.len() {
            return Err(DbError::Eval(format!(
                "line has {} fields, table expects {}",
                fields.len(),
                columns.len()
            )));
        }
        let values = fields
            .iter()
            .zip(columns.iter())
            .map(|(field, (name, ty))| {
                Value::parse_as(*ty, field).ok_or_else(|| {
                    DbError::Eval(format!("cannot parse '{field}' as {ty} for column {name}"))
                })
            })
            .collect::<DbResult<Vec<_>>>()?;
        let row = Row::new(values);
        if publish {
            ctx.publish(table, row.clone());
        }
        if !predicate_passes(filter, ctx, &row)? {
            return Ok(());
        }
        let projected = project(output, ctx, &row)?;
        out(ctx, projected)
    };

    read_csv(Path::new(path), '|', |fields| drive(ctx, fields))
}
