//! Query planner: bound statements to logical trees to physical plans.
//!
//! Three stages, kept separate so the memo optimizer can slot between the
//! last two:
//!
//! 1. [`build_logical`] - the bound SELECT becomes a tree of logical
//!    operators (scans at the leaves, joins left-deep, aggregation, order,
//!    limit above).
//! 2. [`resolve`] - top-down ordinal resolution: each parent tells its child
//!    which expressions it needs, the child fixes its `output`, and the
//!    parent's expressions are rewritten to positional refs into it.
//! 3. [`direct_to_physical`] - an honest one-to-one lowering, choosing hash
//!    vs nested-loop joins per the optimizer toggles.

mod physical;
mod resolve;

pub use physical::{direct_to_physical, extract_equi_keys, scan_op, PhysNode, PhysOp};
pub use resolve::resolve;

use binder::{BoundFrom, BoundSelect, TableRegistry};
use common::{DbResult, ExplainOptions, TableSeq};
use expr::ast::JoinKind;
use expr::Expr;
use std::collections::BTreeSet;

/// Logical operators. Every node also carries `children` and a resolved
/// `output` on [`LogicNode`].
#[derive(Clone, Debug)]
pub enum LogicOp {
    /// Base-table or external-file scan; the registry knows which. A WHERE
    /// predicate over just this table rides on the scan itself.
    Get {
        table: TableSeq,
        filter: Option<Expr>,
    },
    /// Derived table or CTE instance: the child is the inner query's plan.
    FromQuery { table: TableSeq },
    Join {
        kind: JoinKind,
        filter: Option<Expr>,
    },
    Filter { pred: Expr },
    Agg {
        keys: Vec<Expr>,
        aggs: Vec<Expr>,
        having: Option<Expr>,
    },
    Order { keys: Vec<(Expr, bool)> },
    Limit { n: usize },
}

#[derive(Clone, Debug)]
pub struct LogicNode {
    pub op: LogicOp,
    pub children: Vec<LogicNode>,
    pub output: Vec<Expr>,
}

impl LogicNode {
    pub fn new(op: LogicOp, children: Vec<LogicNode>) -> Self {
        Self {
            op,
            children,
            output: Vec::new(),
        }
    }

    /// Table seqs reachable in this subtree; drives join-side partitioning.
    pub fn tables(&self) -> BTreeSet<TableSeq> {
        let mut out = BTreeSet::new();
        self.collect_tables(&mut out);
        out
    }

    fn collect_tables(&self, out: &mut BTreeSet<TableSeq>) {
        match &self.op {
            LogicOp::Get { table, .. } | LogicOp::FromQuery { table } => {
                out.insert(*table);
            }
            _ => {}
        }
        for child in &self.children {
            child.collect_tables(out);
        }
    }
}

/// Build the logical tree for a bound SELECT (set-operation tails are
/// orchestrated a level up and do not appear here).
pub fn build_logical(bound: &BoundSelect) -> DbResult<LogicNode> {
    let mut node = build_from(&bound.from)?;

    if let Some(pred) = &bound.selection {
        // A predicate that reads one base table rides on its scan; anything
        // wider gets its own filter node.
        let absorbed = match &mut node.op {
            LogicOp::Get { table, filter } if pred.tables.iter().all(|t| *t == *table) => {
                *filter = Some(pred.clone());
                true
            }
            _ => false,
        };
        if !absorbed {
            node = LogicNode::new(
                LogicOp::Filter {
                    pred: pred.clone(),
                },
                vec![node],
            );
        }
    }

    if bound.has_aggregation() {
        node = LogicNode::new(
            LogicOp::Agg {
                keys: bound.group_by.clone(),
                aggs: bound.aggs.clone(),
                having: bound.having.clone(),
            },
            vec![node],
        );
    }

    if !bound.order_by.is_empty() {
        node = LogicNode::new(
            LogicOp::Order {
                keys: bound.order_by.clone(),
            },
            vec![node],
        );
    }

    if let Some(n) = bound.limit {
        node = LogicNode::new(LogicOp::Limit { n }, vec![node]);
    }

    Ok(node)
}

fn build_from(items: &[BoundFrom]) -> DbResult<LogicNode> {
    let mut nodes = items
        .iter()
        .map(build_from_item)
        .collect::<DbResult<Vec<_>>>()?;
    if nodes.is_empty() {
        return Err(common::DbError::Plan("SELECT requires FROM".into()));
    }
    // Comma-separated items cross-join left-deep.
    let mut node = nodes.remove(0);
    for right in nodes {
        node = LogicNode::new(
            LogicOp::Join {
                kind: JoinKind::Cross,
                filter: None,
            },
            vec![node, right],
        );
    }
    Ok(node)
}

fn build_from_item(item: &BoundFrom) -> DbResult<LogicNode> {
    match item {
        BoundFrom::Table(seq) => Ok(LogicNode::new(
            LogicOp::Get {
                table: *seq,
                filter: None,
            },
            vec![],
        )),
        BoundFrom::Query { table, query } => {
            let inner = plan_query(query)?;
            Ok(LogicNode::new(
                LogicOp::FromQuery { table: *table },
                vec![inner],
            ))
        }
        BoundFrom::Join {
            left,
            right,
            kind,
            constraint,
        } => {
            let l = build_from_item(left)?;
            let r = build_from_item(right)?;
            Ok(LogicNode::new(
                LogicOp::Join {
                    kind: *kind,
                    filter: constraint.clone(),
                },
                vec![l, r],
            ))
        }
    }
}

/// What the root of a plan is asked to produce: the projection plus any
/// ORDER BY keys it does not already cover, appended invisible (the
/// collector trims them back off).
pub fn root_request(bound: &BoundSelect) -> Vec<Expr> {
    let mut request = bound.projection.clone();
    for (key, _) in &bound.order_by {
        if !request.iter().any(|e| e == key) {
            let mut extra = key.clone();
            extra.visible = false;
            request.push(extra);
        }
    }
    request
}

/// Build and resolve a whole query.
pub fn plan_query(bound: &BoundSelect) -> DbResult<LogicNode> {
    let mut root = build_logical(bound)?;
    resolve(&mut root, root_request(bound))?;
    Ok(root)
}

/// Render a logical plan as an indented tree.
pub fn explain_logical(
    node: &LogicNode,
    registry: &TableRegistry,
    opts: &ExplainOptions,
) -> String {
    let mut out = String::new();
    explain_logical_inner(node, registry, opts, 0, &mut out);
    out
}

fn explain_logical_inner(
    node: &LogicNode,
    registry: &TableRegistry,
    opts: &ExplainOptions,
    depth: usize,
    out: &mut String,
) {
    let pad = "  ".repeat(depth);
    let label = match &node.op {
        LogicOp::Get { table, filter } => {
            let name = if opts.show_tablename {
                registry.get(*table).alias.clone()
            } else {
                table.to_string()
            };
            match filter {
                Some(f) => format!("Get {name} filter {f}"),
                None => format!("Get {name}"),
            }
        }
        LogicOp::FromQuery { table } => {
            if opts.show_tablename {
                format!("FromQuery {}", registry.get(*table).alias)
            } else {
                format!("FromQuery {table}")
            }
        }
        LogicOp::Join { kind, filter } => match filter {
            Some(f) => format!("Join {kind:?} on {f}"),
            None => format!("Join {kind:?}"),
        },
        LogicOp::Filter { pred } => format!("Filter {pred}"),
        LogicOp::Agg { keys, aggs, .. } => {
            format!("Agg keys={} aggs={}", keys.len(), aggs.len())
        }
        LogicOp::Order { keys } => format!("Order by {} keys", keys.len()),
        LogicOp::Limit { n } => format!("Limit {n}"),
    };
    out.push_str(&pad);
    out.push_str(&label);
    if opts.show_output {
        let cols: Vec<String> = node.output.iter().map(|e| e.to_string()).collect();
        out.push_str(&format!(" output=[{}]", cols.join(", ")));
    }
    out.push('\n');
    for child in &node.children {
        explain_logical_inner(child, registry, opts, depth + 1, out);
    }
}

/// Render a physical plan as an indented tree, honoring the explain options.
pub fn explain_physical(
    node: &PhysNode,
    registry: &TableRegistry,
    opts: &ExplainOptions,
) -> String {
    let mut out = String::new();
    physical::explain_inner(node, registry, opts, 0, &mut out);
    out
}
