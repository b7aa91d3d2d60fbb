//! Rewrite and implementation rules.
//!
//! A rule declares applicability over one logical member and produces either
//! a new logical member of the same group (the engine asserts the signature
//! is preserved) or a physical implementation for it.

use crate::{LogicalMember, Memo, PhysAlgo};
use binder::{TableRegistry, TableSource};
use catalog::Catalog;
use common::QueryOptions;
use expr::ast::JoinKind;
use expr::{BinOp, ExprKind};
use planner::LogicOp;

pub struct RuleCtx<'a> {
    pub opts: &'a QueryOptions,
    pub catalog: &'a Catalog,
    pub registry: &'a TableRegistry,
}

pub enum RuleResult {
    Logical(LogicalMember),
    Physical(PhysAlgo),
}

pub trait Rule {
    fn name(&self) -> &'static str;
    fn applicable(&self, member: &LogicalMember, memo: &Memo, ctx: &RuleCtx) -> bool;
    fn apply(&self, member: &LogicalMember, memo: &Memo, ctx: &RuleCtx) -> RuleResult;
}

pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(JoinCommute),
        Box::new(GetToScan),
        Box::new(JoinToNLJoin),
        Box::new(JoinToHashJoin),
        Box::new(FilterToFilter),
        Box::new(AggToHashAgg),
        Box::new(OrderToOrder),
        Box::new(LimitToLimit),
        Box::new(FromQueryToFromQuery),
    ]
}

/// `A ⋈ B  →  B ⋈ A` for inner joins (and cross joins unless disabled).
struct JoinCommute;

impl Rule for JoinCommute {
    fn name(&self) -> &'static str {
        "join_commute"
    }

    fn applicable(&self, member: &LogicalMember, _memo: &Memo, ctx: &RuleCtx) -> bool {
        match member.op {
            LogicOp::Join {
                kind: JoinKind::Inner,
                ..
            } => true,
            LogicOp::Join {
                kind: JoinKind::Cross,
                ..
            } => !ctx.opts.optimize.memo_disable_crossjoin,
            _ => false,
        }
    }

    fn apply(&self, member: &LogicalMember, _memo: &Memo, _ctx: &RuleCtx) -> RuleResult {
        let mut swapped = member.clone();
        swapped.children.swap(0, 1);
        RuleResult::Logical(swapped)
    }
}

struct GetToScan;

impl Rule for GetToScan {
    fn name(&self) -> &'static str {
        "get_to_scan"
    }

    fn applicable(&self, member: &LogicalMember, _memo: &Memo, _ctx: &RuleCtx) -> bool {
        matches!(member.op, LogicOp::Get { .. })
    }

    fn apply(&self, member: &LogicalMember, _memo: &Memo, ctx: &RuleCtx) -> RuleResult {
        let algo = match &member.op {
            LogicOp::Get { table, .. } => {
                match &ctx.registry.get(*table).source {
                    TableSource::External { .. } => PhysAlgo::ScanFile,
                    _ => PhysAlgo::ScanTable,
                }
            }
            _ => unreachable!("guarded by applicable"),
        };
        RuleResult::Physical(algo)
    }
}

struct JoinToNLJoin;

impl Rule for JoinToNLJoin {
    fn name(&self) -> &'static str {
        "join_to_nljoin"
    }

    fn applicable(&self, member: &LogicalMember, _memo: &Memo, ctx: &RuleCtx) -> bool {
        matches!(member.op, LogicOp::Join { .. }) && ctx.opts.optimize.enable_nljoin
    }

    fn apply(&self, _member: &LogicalMember, _memo: &Memo, _ctx: &RuleCtx) -> RuleResult {
        RuleResult::Physical(PhysAlgo::NLJoin)
    }
}

/// Hash join needs an equi-conjunct whose sides split cleanly across the
/// children, and an uncorrelated left input (parameter passing is a
/// nested-loop affair).
struct JoinToHashJoin;

impl Rule for JoinToHashJoin {
    fn name(&self) -> &'static str {
        "join_to_hashjoin"
    }

    fn applicable(&self, member: &LogicalMember, memo: &Memo, ctx: &RuleCtx) -> bool {
        if !ctx.opts.optimize.enable_hashjoin {
            return false;
        }
        let (kind, filter) = match &member.op {
            LogicOp::Join { kind, filter } => (*kind, filter.as_ref()),
            _ => return false,
        };
        if kind == JoinKind::Cross {
            return false;
        }
        let filter = match filter {
            Some(f) => f,
            None => return false,
        };
        let left = memo.group(member.children[0]);
        let right = memo.group(member.children[1]);

        let left_correlated = left
            .tables
            .iter()
            .any(|seq| !ctx.registry.get(*seq).outer_cols.is_empty());
        if left_correlated {
            return false;
        }

        filter.conjuncts().iter().any(|c| {
            if let ExprKind::Binary {
                op: BinOp::Eq,
                left: l,
                right: r,
            } = &c.kind
            {
                let l_tabs = &l.tables;
                let r_tabs = &r.tables;
                if l_tabs.is_empty() || r_tabs.is_empty() {
                    return false;
                }
                (l_tabs.iter().all(|t| left.tables.contains(t))
                    && r_tabs.iter().all(|t| right.tables.contains(t)))
                    || (l_tabs.iter().all(|t| right.tables.contains(t))
                        && r_tabs.iter().all(|t| left.tables.contains(t)))
            } else {
                false
            }
        })
    }

    fn apply(&self, _member: &LogicalMember, _memo: &Memo, _ctx: &RuleCtx) -> RuleResult {
        RuleResult::Physical(PhysAlgo::HashJoin)
    }
}

macro_rules! implementation_rule {
    ($name:ident, $rule_name:literal, $pattern:pat, $algo:expr) => {
        struct $name;

        impl Rule for $name {
            fn name(&self) -> &'static str {
                $rule_name
            }

            fn applicable(&self, member: &LogicalMember, _memo: &Memo, _ctx: &RuleCtx) -> bool {
                matches!(member.op, $pattern)
            }

            fn apply(&self, _member: &LogicalMember, _memo: &Memo, _ctx: &RuleCtx) -> RuleResult {
                RuleResult::Physical($algo)
            }
        }
    };
}

implementation_rule!(
    FilterToFilter,
    "filter_to_filter",
    LogicOp::Filter { .. },
    PhysAlgo::Filter
);
implementation_rule!(
    AggToHashAgg,
    "agg_to_hashagg",
    LogicOp::Agg { .. },
    PhysAlgo::HashAgg
);
implementation_rule!(
    OrderToOrder,
    "order_to_order",
    LogicOp::Order { .. },
    PhysAlgo::Order
);
implementation_rule!(
    LimitToLimit,
    "limit_to_limit",
    LogicOp::Limit { .. },
    PhysAlgo::Limit
);
implementation_rule!(
    FromQueryToFromQuery,
    "fromquery_to_fromquery",
    LogicOp::FromQuery { .. },
    PhysAlgo::FromQuery
);
