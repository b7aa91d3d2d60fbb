//! Physical plan: operator shapes, direct lowering, cost.

use crate::{LogicNode, LogicOp};
use binder::{TableRegistry, TableSource};
use catalog::Catalog;
use common::{DbError, DbResult, ExplainOptions, QueryOptions, TableSeq};
use expr::ast::JoinKind;
use expr::{BinOp, Expr, ExprKind};
use std::cell::Cell;
use tracing::debug;

#[derive(Clone, Debug)]
pub enum PhysOp {
    ScanTable {
        table: TableSeq,
        filter: Option<Expr>,
        est_rows: f64,
    },
    ScanFile {
        table: TableSeq,
        path: String,
        filter: Option<Expr>,
    },
    NLJoin {
        kind: JoinKind,
        filter: Option<Expr>,
    },
    /// Real hash probe: build on the right side, probe with the left.
    HashJoin {
        kind: JoinKind,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        residual: Option<Expr>,
    },
    Filter {
        pred: Expr,
    },
    HashAgg {
        keys: Vec<Expr>,
        aggs: Vec<Expr>,
        having: Option<Expr>,
    },
    Order {
        keys: Vec<(Expr, bool)>,
    },
    Limit {
        n: usize,
    },
    FromQuery {
        table: TableSeq,
    },
    /// Wraps any operator, counting emitted rows and invocations.
    Profile {
        rows: Cell<u64>,
        loops: Cell<u64>,
    },
}

#[derive(Clone, Debug)]
pub struct PhysNode {
    pub op: PhysOp,
    pub children: Vec<PhysNode>,
    pub output: Vec<Expr>,
}

impl PhysNode {
    pub fn new(op: PhysOp, children: Vec<PhysNode>, output: Vec<Expr>) -> Self {
        Self {
            op,
            children,
            output,
        }
    }

    /// Compositional cost: scans are leaf constants, nested-loop joins
    /// multiply their inputs, hash joins add them, everything else passes
    /// its child through.
    pub fn cost(&self) -> f64 {
        let children: Vec<f64> = self.children.iter().map(|c| c.cost()).collect();
        op_cost(&self.op, &children)
    }
}

pub fn op_cost(op: &PhysOp, children: &[f64]) -> f64 {
    match op {
        PhysOp::ScanTable { est_rows, .. } => est_rows.max(1.0),
        PhysOp::ScanFile { .. } => 1000.0,
        PhysOp::NLJoin { .. } => children.iter().product::<f64>().max(1.0),
        PhysOp::HashJoin { .. } => children.iter().sum::<f64>().max(1.0),
        _ => children.first().copied().unwrap_or(1.0),
    }
}

/// Honest one-to-one lowering of a resolved logical tree.
pub fn direct_to_physical(
    node: &LogicNode,
    opts: &QueryOptions,
    catalog: &Catalog,
    registry: &TableRegistry,
) -> DbResult<PhysNode> {
    let phys = lower(node, opts, catalog, registry)?;
    debug!(cost = phys.cost(), "lowered plan");
    Ok(phys)
}

fn lower(
    node: &LogicNode,
    opts: &QueryOptions,
    catalog: &Catalog,
    registry: &TableRegistry,
) -> DbResult<PhysNode> {
    let children = node
        .children
        .iter()
        .map(|c| lower(c, opts, catalog, registry))
        .collect::<DbResult<Vec<_>>>()?;

    let op = match &node.op {
        LogicOp::Get { table, filter } => scan_op(*table, filter.clone(), catalog, registry)?,
        LogicOp::FromQuery { table } => PhysOp::FromQuery { table: *table },
        LogicOp::Filter { pred } => PhysOp::Filter { pred: pred.clone() },
        LogicOp::Agg { keys, aggs, having } => PhysOp::HashAgg {
            keys: keys.clone(),
            aggs: aggs.clone(),
            having: having.clone(),
        },
        LogicOp::Order { keys } => PhysOp::Order { keys: keys.clone() },
        LogicOp::Limit { n } => PhysOp::Limit { n: *n },
        LogicOp::Join { kind, filter } => {
            join_op(node, *kind, filter.as_ref(), &children, opts, registry)?
        }
    };

    let mut phys = PhysNode::new(op, children, node.output.clone());
    if opts.profile {
        let output = phys.output.clone();
        phys = PhysNode::new(
            PhysOp::Profile {
                rows: Cell::new(0),
                loops: Cell::new(0),
            },
            vec![phys],
            output,
        );
    }
    Ok(phys)
}

pub fn scan_op(
    table: TableSeq,
    filter: Option<Expr>,
    catalog: &Catalog,
    registry: &TableRegistry,
) -> DbResult<PhysOp> {
    let bound = registry.get(table);
    match &bound.source {
        TableSource::Base { table: name } => {
            let est_rows = catalog.table(name)?.estimated_rows() as f64;
            Ok(PhysOp::ScanTable {
                table,
                filter,
                est_rows,
            })
        }
        TableSource::External { path, .. } => Ok(PhysOp::ScanFile {
            table,
            path: path.clone(),
            filter,
        }),
        other => Err(DbError::Plan(format!(
            "table source {other:?} is not a scan"
        ))),
    }
}

pub(crate) fn join_op(
    node: &LogicNode,
    kind: JoinKind,
    filter: Option<&Expr>,
    children: &[PhysNode],
    opts: &QueryOptions,
    registry: &TableRegistry,
) -> DbResult<PhysOp> {
    let left_len = children[0].output.len();
    let equi = filter
        .map(|f| extract_equi_keys(f, left_len))
        .unwrap_or_else(|| (Vec::new(), Vec::new(), None));
    let (left_keys, right_keys, residual) = equi;

    // Parameter passing only works when the right side is re-driven per
    // left row, so a correlated left subtree forces nested-loop.
    let left_has_outer = node.children[0]
        .tables()
        .iter()
        .any(|seq| !registry.get(*seq).outer_cols.is_empty());

    let hash_ok = opts.optimize.enable_hashjoin
        && !left_keys.is_empty()
        && !left_has_outer
        && kind != JoinKind::Cross;

    if hash_ok {
        return Ok(PhysOp::HashJoin {
            kind,
            left_keys,
            right_keys,
            residual,
        });
    }
    if !opts.optimize.enable_nljoin {
        return Err(DbError::Plan(
            "both join strategies disabled for a join that needs one".into(),
        ));
    }
    Ok(PhysOp::NLJoin {
        kind,
        filter: filter.cloned(),
    })
}

/// Split a join filter into hash keys and a residual. A conjunct
/// `l = r` becomes a key pair when one side references only the left
/// child's columns and the other only the right's; right-side keys are
/// re-based to the right child's local row.
pub fn extract_equi_keys(
    filter: &Expr,
    left_len: usize,
) -> (Vec<Expr>, Vec<Expr>, Option<Expr>) {
    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    let mut residual = Vec::new();

    for conjunct in filter.conjuncts() {
        if let ExprKind::Binary {
            op: BinOp::Eq,
            left,
            right,
        } = &conjunct.kind
        {
            match (side_of(left, left_len), side_of(right, left_len)) {
                (Some(Side::Left), Some(Side::Right)) => {
                    left_keys.push((**left).clone());
                    right_keys.push(shift_refs((**right).clone(), left_len));
                    continue;
                }
                (Some(Side::Right), Some(Side::Left)) => {
                    left_keys.push((**right).clone());
                    right_keys.push(shift_refs((**left).clone(), left_len));
                    continue;
                }
                _ => {}
            }
        }
        residual.push(conjunct.clone());
    }

    (left_keys, right_keys, Expr::conjoin(residual))
}

#[derive(PartialEq)]
enum Side {
    Left,
    Right,
}

/// Which child's columns an expression reads, if exactly one.
fn side_of(e: &Expr, left_len: usize) -> Option<Side> {
    let mut ordinals = Vec::new();
    collect_ref_ordinals(e, &mut ordinals);
    if ordinals.is_empty() {
        return None;
    }
    if ordinals.iter().all(|&o| o < left_len) {
        Some(Side::Left)
    } else if ordinals.iter().all(|&o| o >= left_len) {
        Some(Side::Right)
    } else {
        None
    }
}

fn collect_ref_ordinals(e: &Expr, out: &mut Vec<usize>) {
    if let ExprKind::Ref { ordinal, .. } = &e.kind {
        out.push(*ordinal);
        return;
    }
    for child in e.children() {
        collect_ref_ordinals(child, out);
    }
}

/// Re-base positional refs from the combined join row onto the right
/// child's local row.
fn shift_refs(mut e: Expr, left_len: usize) -> Expr {
    if let ExprKind::Ref { ordinal, .. } = &mut e.kind {
        *ordinal -= left_len;
        return e;
    }
    for child in e.children_mut() {
        let shifted = shift_refs(child.clone(), left_len);
        *child = shifted;
    }
    e
}

pub(crate) fn explain_inner(
    node: &PhysNode,
    registry: &TableRegistry,
    opts: &ExplainOptions,
    depth: usize,
    out: &mut String,
) {
    let pad = "  ".repeat(depth);
    let label = match &node.op {
        PhysOp::ScanTable { table, filter, .. } => {
            let name = if opts.show_tablename {
                registry.get(*table).alias.clone()
            } else {
                table.to_string()
            };
            match filter {
                Some(f) => format!("ScanTable {name} filter {f}"),
                None => format!("ScanTable {name}"),
            }
        }
        PhysOp::ScanFile { table, path, .. } => {
            if opts.show_tablename {
                format!("ScanFile {} '{}'", registry.get(*table).alias, path)
            } else {
                format!("ScanFile '{path}'")
            }
        }
        PhysOp::NLJoin { kind, filter } => match filter {
            Some(f) => format!("NLJoin {kind:?} on {f}"),
            None => format!("NLJoin {kind:?}"),
        },
        PhysOp::HashJoin { kind, left_keys, .. } => {
            format!("HashJoin {kind:?} keys={}", left_keys.len())
        }
        PhysOp::Filter { pred } => format!("Filter {pred}"),
        PhysOp::HashAgg { keys, aggs, .. } => {
            format!("HashAgg keys={} aggs={}", keys.len(), aggs.len())
        }
        PhysOp::Order { keys } => format!("Order by {} keys", keys.len()),
        PhysOp::Limit { n } => format!("Limit {n}"),
        PhysOp::FromQuery { table } => {
            if opts.show_tablename {
                format!("FromQuery {}", registry.get(*table).alias)
            } else {
                format!("FromQuery {table}")
            }
        }
        PhysOp::Profile { rows, loops } => {
            format!("Profile rows={} loops={}", rows.get(), loops.get())
        }
    };
    out.push_str(&pad);
    out.push_str(&label);
    if opts.show_cost {
        out.push_str(&format!(" cost={:.0}", node.cost()));
    }
    if opts.show_output {
        let cols: Vec<String> = node.output.iter().map(|e| e.to_string()).collect();
        out.push_str(&format!(" output=[{}]", cols.join(", ")));
    }
    out.push('\n');
    for child in &node.children {
        explain_inner(child, registry, opts, depth + 1, out);
    }
}
