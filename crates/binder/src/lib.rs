//! Name binding.
//!
//! The binder turns a parsed SELECT into a [`BoundSelect`]: identifiers are
//! resolved against the catalog through a stack of scopes, `*` is expanded,
//! aggregates are extracted, and every expression gets a type. Tables are
//! registered in a statement-global [`TableRegistry`] and referred to by
//! [`TableSeq`] from then on; subqueries get statement-global ids from a
//! counter on the binder itself, so parallel statements never share state.

mod expression;
#[cfg(test)]
mod tests;

use catalog::Catalog;
use common::{DbError, DbResult, SubqueryId, TableSeq};
use expr::ast::{Cte, FromItem, JoinKind, SelectStmt, SetOpKind};
use expr::{Expr, ExprKind, SubqueryKind};
use std::collections::BTreeSet;
use tracing::debug;
use types::SqlType;

/// Where a bound table's rows come from.
#[derive(Clone, Debug, PartialEq)]
pub enum TableSource {
    Base { table: String },
    External { path: String, schema_table: String },
    Derived,
    Cte { name: String },
}

/// A table registered during binding. `outer_cols` is the back-reference
/// collection of column ordinals referenced from nested scopes; the executor
/// publishes rows for tables that have any.
#[derive(Clone, Debug)]
pub struct BoundTable {
    pub seq: TableSeq,
    pub alias: String,
    pub source: TableSource,
    pub columns: Vec<(String, SqlType)>,
    pub outer_cols: Vec<usize>,
}

/// Statement-global table registry, indexed by [`TableSeq`].
#[derive(Clone, Debug, Default)]
pub struct TableRegistry {
    tables: Vec<BoundTable>,
}

impl TableRegistry {
    fn add(&mut self, alias: String, source: TableSource, columns: Vec<(String, SqlType)>) -> TableSeq {
        let seq = TableSeq(self.tables.len() as u32);
        self.tables.push(BoundTable {
            seq,
            alias,
            source,
            columns,
            outer_cols: Vec::new(),
        });
        seq
    }

    pub fn get(&self, seq: TableSeq) -> &BoundTable {
        &self.tables[seq.0 as usize]
    }

    fn get_mut(&mut self, seq: TableSeq) -> &mut BoundTable {
        &mut self.tables[seq.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundTable> {
        self.tables.iter()
    }

    /// `(ordinal, type)` of a column on a bound table.
    pub fn locate_column(&self, seq: TableSeq, name: &str) -> Option<(usize, SqlType)> {
        self.get(seq)
            .columns
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|i| (i, self.get(seq).columns[i].1))
    }

    /// Bound column expressions for every column of the table, in ordinal
    /// order, qualified with the table's alias.
    pub fn all_columns(&self, seq: TableSeq) -> Vec<Expr> {
        let table = self.get(seq);
        table
            .columns
            .iter()
            .enumerate()
            .map(|(ordinal, (name, ty))| {
                let mut e = Expr::column(Some(&table.alias), name);
                if let ExprKind::Column(c) = &mut e.kind {
                    c.table = Some(seq);
                    c.ordinal = Some(ordinal);
                }
                e.ty = Some(*ty);
                e.bound = true;
                e.tables = std::iter::once(seq).collect();
                e
            })
            .collect()
    }
}

/// One FROM entry after binding. Joins stay left-deep; each join keeps its
/// own ON predicate so outer-join padding stays scoped to the right node.
#[derive(Clone, Debug)]
pub enum BoundFrom {
    Table(TableSeq),
    Query {
        table: TableSeq,
        query: Box<BoundSelect>,
    },
    Join {
        left: Box<BoundFrom>,
        right: Box<BoundFrom>,
        kind: JoinKind,
        constraint: Option<Expr>,
    },
}

/// Trailing set operation on a bound statement.
#[derive(Clone, Debug)]
pub struct BoundSetOp {
    pub kind: SetOpKind,
    pub all: bool,
    pub right: Box<BoundSelect>,
}

/// A fully bound SELECT: stars expanded, names resolved, types assigned,
/// aggregates pulled out, LIMIT folded to a constant.
#[derive(Clone, Debug)]
pub struct BoundSelect {
    pub projection: Vec<Expr>,
    pub from: Vec<BoundFrom>,
    pub selection: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub aggs: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<(Expr, bool)>,
    pub limit: Option<usize>,
    pub set_op: Option<BoundSetOp>,
}

impl BoundSelect {
    /// `(name, type)` per output column, used for derived tables and CTEs.
    pub fn output_columns(&self) -> Vec<(String, SqlType)> {
        self.projection
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let name = e
                    .alias
                    .clone()
                    .or_else(|| e.as_column().map(|c| c.name.clone()))
                    .unwrap_or_else(|| format!("col{i}"));
                (name, e.ty.unwrap_or(SqlType::Int))
            })
            .collect()
    }

    pub fn has_aggregation(&self) -> bool {
        !self.group_by.is_empty() || !self.aggs.is_empty()
    }
}

/// A subquery bound inside some expression, keyed by its id. The expression
/// keeps the raw AST; planning picks the bound form up from here.
#[derive(Clone, Debug)]
pub struct BoundSubquery {
    pub id: SubqueryId,
    pub kind: SubqueryKind,
    pub select: BoundSelect,
    pub cacheable: bool,
    pub outer_tables: BTreeSet<TableSeq>,
}

/// The binder's output for one statement.
#[derive(Clone, Debug)]
pub struct BoundStatement {
    pub select: BoundSelect,
    pub registry: TableRegistry,
    pub subqueries: Vec<BoundSubquery>,
}

pub(crate) struct Scope {
    pub tables: Vec<TableSeq>,
    pub ctes: Vec<Cte>,
}

pub(crate) struct SubqueryFrame {
    /// Scope-stack depth at subquery entry; a column resolving into a scope
    /// below this boundary correlates the subquery to the outside.
    pub boundary: usize,
    pub escapes: BTreeSet<TableSeq>,
}

/// Binds one statement. Create per statement; counters are instance state.
pub struct Binder<'a> {
    catalog: &'a Catalog,
    pub(crate) registry: TableRegistry,
    pub(crate) scopes: Vec<Scope>,
    pub(crate) frames: Vec<SubqueryFrame>,
    pub(crate) subqueries: Vec<BoundSubquery>,
    next_subquery: u32,
}

/// Bind a parsed SELECT against the catalog.
pub fn bind_statement(catalog: &Catalog, stmt: &SelectStmt) -> DbResult<BoundStatement> {
    let mut binder = Binder::new(catalog);
    let select = binder.bind_select(stmt)?;
    debug!(
        tables = binder.registry.len(),
        subqueries = binder.subqueries.len(),
        "bound statement"
    );
    Ok(BoundStatement {
        select,
        registry: binder.registry,
        subqueries: binder.subqueries,
    })
}

impl<'a> Binder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            registry: TableRegistry::default(),
            scopes: Vec::new(),
            frames: Vec::new(),
            subqueries: Vec::new(),
            next_subquery: 0,
        }
    }

    pub(crate) fn next_subquery_id(&mut self) -> SubqueryId {
        self.next_subquery += 1;
        SubqueryId(self.next_subquery)
    }

    pub fn bind_select(&mut self, stmt: &SelectStmt) -> DbResult<BoundSelect> {
        self.scopes.push(Scope {
            tables: Vec::new(),
            ctes: stmt.ctes.clone(),
        });
        let result = self.bind_select_body(stmt);
        self.scopes.pop();

        let mut bound = result?;
        if let Some(tail) = &stmt.set_op {
            // The right arm binds under a scope holding only the WITH list,
            // so CTEs span the whole set operation but table names do not.
            self.scopes.push(Scope {
                tables: Vec::new(),
                ctes: stmt.ctes.clone(),
            });
            let right = self.bind_select(&tail.right);
            self.scopes.pop();
            let right = right?;
            check_set_op_shape(&bound, &right)?;
            bound.set_op = Some(BoundSetOp {
                kind: tail.kind,
                all: tail.all,
                right: Box::new(right),
            });
        }
        Ok(bound)
    }

    fn bind_select_body(&mut self, stmt: &SelectStmt) -> DbResult<BoundSelect> {
        let mut from = Vec::with_capacity(stmt.from.len());
        for item in &stmt.from {
            let bound = self.bind_from(item)?;
            from.push(bound);
        }

        let mut selection = stmt
            .selection
            .as_ref()
            .map(|e| self.bind_new(e))
            .transpose()?;

        // Projection: expand stars, then bind.
        let mut projection = Vec::new();
        for item in &stmt.projection {
            match &item.kind {
                ExprKind::Star { qualifier } => {
                    projection.extend(self.expand_star(qualifier.as_deref())?)
                }
                _ => projection.push(self.bind_new(item)?),
            }
        }
        if projection.is_empty() {
            return Err(DbError::Plan("empty select list".into()));
        }

        let group_by = stmt
            .group_by
            .iter()
            .map(|e| {
                let substituted = substitute_aliases(e, &projection);
                self.bind_maybe(substituted)
            })
            .collect::<DbResult<Vec<_>>>()?;

        let mut having = stmt
            .having
            .as_ref()
            .map(|e| self.bind_maybe(substitute_aliases(e, &projection)))
            .transpose()?;

        let order_by = stmt
            .order_by
            .iter()
            .map(|item| {
                let substituted = substitute_aliases(&item.expr, &projection);
                Ok((self.bind_maybe(substituted)?, item.desc))
            })
            .collect::<DbResult<Vec<(Expr, bool)>>>()?;

        // WHERE conjuncts that contain aggregates belong to HAVING.
        if let Some(pred) = selection.take() {
            let (agg_parts, plain_parts): (Vec<Expr>, Vec<Expr>) = pred
                .conjuncts()
                .into_iter()
                .cloned()
                .partition(|c| c.contains_agg());
            selection = Expr::conjoin(plain_parts);
            if let Some(extra) = Expr::conjoin(agg_parts) {
                having = match having {
                    Some(h) => Some(Expr::and(h, extra)),
                    None => Some(extra),
                };
            }
        }

        // Aggregates used anywhere in the statement, in discovery order.
        let mut aggs: Vec<Expr> = Vec::new();
        for e in projection
            .iter()
            .chain(having.iter())
            .chain(order_by.iter().map(|(e, _)| e))
        {
            collect_aggs(e, &mut aggs);
        }

        let limit = stmt.limit.as_ref().map(bind_limit).transpose()?;

        Ok(BoundSelect {
            projection,
            from,
            selection,
            group_by,
            aggs,
            having,
            order_by,
            limit,
            set_op: None,
        })
    }

    fn bind_from(&mut self, item: &FromItem) -> DbResult<BoundFrom> {
        match item {
            FromItem::Base { name, alias } => {
                let alias = alias.clone().unwrap_or_else(|| name.clone());
                if let Some(table) = self.catalog.try_table(name) {
                    let columns = table
                        .columns()
                        .iter()
                        .map(|c| (c.name.clone(), c.ty))
                        .collect();
                    let seq =
                        self.register_table(alias, TableSource::Base { table: name.clone() }, columns)?;
                    return Ok(BoundFrom::Table(seq));
                }
                // Unresolved base table: walk the scope chain for a CTE.
                if let Some(cte_query) = self.find_cte(name) {
                    let bound = self.bind_select(&cte_query)?;
                    let columns = bound.output_columns();
                    let seq = self.register_table(
                        alias,
                        TableSource::Cte { name: name.clone() },
                        columns,
                    )?;
                    return Ok(BoundFrom::Query {
                        table: seq,
                        query: Box::new(bound),
                    });
                }
                Err(DbError::UnknownTable(name.clone()))
            }
            FromItem::External {
                path,
                schema_table,
                alias,
            } => {
                let table = self.catalog.table(schema_table)?;
                let columns = table
                    .columns()
                    .iter()
                    .map(|c| (c.name.clone(), c.ty))
                    .collect();
                let seq = self.register_table(
                    alias.clone(),
                    TableSource::External {
                        path: path.clone(),
                        schema_table: schema_table.clone(),
                    },
                    columns,
                )?;
                Ok(BoundFrom::Table(seq))
            }
            FromItem::Derived { query, alias } => {
                let bound = self.bind_select(query)?;
                let columns = bound.output_columns();
                let seq = self.register_table(alias.clone(), TableSource::Derived, columns)?;
                Ok(BoundFrom::Query {
                    table: seq,
                    query: Box::new(bound),
                })
            }
            FromItem::Join {
                left,
                right,
                kind,
                constraint,
            } => {
                // RIGHT JOIN is LEFT JOIN with the inputs flipped.
                let (first, second, kind) = match kind {
                    JoinKind::Right => (right, left, JoinKind::Left),
                    other => (left, right, *other),
                };
                let l = self.bind_from(first)?;
                let r = self.bind_from(second)?;
                let constraint = constraint
                    .as_ref()
                    .map(|e| self.bind_new(e))
                    .transpose()?;
                Ok(BoundFrom::Join {
                    left: Box::new(l),
                    right: Box::new(r),
                    kind,
                    constraint,
                })
            }
        }
    }

    fn register_table(
        &mut self,
        alias: String,
        source: TableSource,
        columns: Vec<(String, SqlType)>,
    ) -> DbResult<TableSeq> {
        let scope = self.scopes.last().expect("binding inside a scope");
        for seq in &scope.tables {
            if self.registry.get(*seq).alias.eq_ignore_ascii_case(&alias) {
                return Err(DbError::TableAliasConflict(alias));
            }
        }
        let seq = self.registry.add(alias, source, columns);
        self.scopes
            .last_mut()
            .expect("binding inside a scope")
            .tables
            .push(seq);
        Ok(seq)
    }

    fn find_cte(&self, name: &str) -> Option<SelectStmt> {
        for scope in self.scopes.iter().rev() {
            if let Some(cte) = scope
                .ctes
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name))
            {
                return Some(cte.query.clone());
            }
        }
        None
    }

    /// `*` / `t.*` into bound column lists.
    fn expand_star(&mut self, qualifier: Option<&str>) -> DbResult<Vec<Expr>> {
        let scope = self.scopes.last().expect("binding inside a scope");
        let seqs: Vec<TableSeq> = match qualifier {
            Some(q) => {
                let seq = scope
                    .tables
                    .iter()
                    .copied()
                    .find(|s| self.registry.get(*s).alias.eq_ignore_ascii_case(q))
                    .ok_or_else(|| DbError::UnknownTable(q.to_string()))?;
                vec![seq]
            }
            None => scope.tables.clone(),
        };
        if seqs.is_empty() {
            return Err(DbError::Plan("* with no FROM tables".into()));
        }
        Ok(seqs
            .into_iter()
            .flat_map(|seq| self.registry.all_columns(seq))
            .collect())
    }
}

fn check_set_op_shape(left: &BoundSelect, right: &BoundSelect) -> DbResult<()> {
    if left.projection.len() != right.projection.len() {
        return Err(DbError::TypeMismatch(format!(
            "set operation arms have {} and {} columns",
            left.projection.len(),
            right.projection.len()
        )));
    }
    for (l, r) in left.projection.iter().zip(right.projection.iter()) {
        if let (Some(lt), Some(rt)) = (l.ty, r.ty) {
            if !lt.compatible(&rt) {
                return Err(DbError::TypeMismatch(format!(
                    "set operation column types {lt} and {rt} are incompatible"
                )));
            }
        }
    }
    Ok(())
}

/// Replace bare columns naming a select-list alias with that expression.
/// Serves GROUP BY / HAVING / ORDER BY alias references.
fn substitute_aliases(e: &Expr, projection: &[Expr]) -> Expr {
    if let ExprKind::Column(c) = &e.kind {
        if c.qualifier.is_none() {
            if let Some(p) = projection
                .iter()
                .find(|p| p.alias.as_deref() == Some(c.name.as_str()))
            {
                return p.clone();
            }
        }
    }
    let mut out = e.clone();
    for child in out.children_mut() {
        *child = substitute_aliases(child, projection);
    }
    out
}

fn collect_aggs(e: &Expr, out: &mut Vec<Expr>) {
    e.visit_each(&mut |node| {
        if node.is_agg() && !out.iter().any(|a| a == node) {
            out.push(node.clone());
        }
    });
}

fn bind_limit(e: &Expr) -> DbResult<usize> {
    let v = e
        .eval_const()
        .map_err(|_| DbError::Plan("LIMIT must be a constant".into()))?;
    match v.as_int() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(DbError::Plan("LIMIT must be a non-negative integer".into())),
    }
}
