//! Cascades-style memo optimizer.
//!
//! The memo holds equivalence groups keyed by a logical signature computed
//! over the commutative/associative normal form of each subtree: inner-join
//! shapes flatten to a multiset of atomic relations plus a multiset of AND
//! conjuncts, so `A ⋈ B` and `B ⋈ A` (and either association of a join
//! chain) land in the same group. Rules add logically equivalent members
//! and physical implementations; extraction walks min-cost physical members
//! into a plan.
//!
//! Exploration runs on unresolved logical trees (expressions still name
//! columns), which keeps rewrites free of positional bookkeeping; the
//! winning tree is resolved and lowered afterwards.

mod rules;

pub use rules::{default_rules, Rule, RuleCtx, RuleResult};

use ahash::RandomState;
use binder::{BoundSelect, TableRegistry, TableSource};
use catalog::Catalog;
use common::{DbError, DbResult, QueryOptions, TableSeq};
use expr::Expr;
use hashbrown::{HashMap, HashSet};
use planner::{LogicNode, LogicOp, PhysNode, PhysOp};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use tracing::debug;

pub type GroupId = usize;

/// Physical implementation choices a rule can attach to a logical member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhysAlgo {
    ScanTable,
    ScanFile,
    FromQuery,
    Filter,
    HashAgg,
    Order,
    Limit,
    NLJoin,
    HashJoin,
}

/// A logical member: an operator whose non-leaf children have been replaced
/// by group references. A `FromQuery` keeps its already-planned inner tree
/// opaque instead of exploring it.
#[derive(Clone, Debug)]
pub struct LogicalMember {
    pub op: LogicOp,
    pub children: Vec<GroupId>,
    pub opaque: Vec<LogicNode>,
}

/// A physical member: an algorithm choice for one of the group's logical
/// members.
#[derive(Clone, Debug)]
pub struct PhysicalMember {
    pub algo: PhysAlgo,
    pub member: usize,
}

#[derive(Clone, Debug)]
pub struct Group {
    pub id: GroupId,
    pub signature: u64,
    pub tables: BTreeSet<TableSeq>,
    pub logical: Vec<LogicalMember>,
    pub physical: Vec<PhysicalMember>,
    pub explored: bool,
    atoms: u64,
    preds: u64,
    fingerprints: HashSet<u64, RandomState>,
}

/// The chosen algorithm per node, mirroring the extracted logical tree.
#[derive(Clone, Debug)]
pub struct AlgoTree {
    pub algo: PhysAlgo,
    pub children: Vec<AlgoTree>,
}

#[derive(Debug, Default)]
pub struct Memo {
    pub groups: Vec<Group>,
    sig_index: HashMap<u64, GroupId, RandomState>,
    stack: Vec<GroupId>,
}

/// The inner-join normal form of a prospective member.
struct NormalForm {
    atoms: u64,
    preds: u64,
    sig: u64,
    tables: BTreeSet<TableSeq>,
}

fn hash_of<T: Hash + ?Sized>(t: &T) -> u64 {
    let mut h = DefaultHasher::new();
    t.hash(&mut h);
    h.finish()
}

/// Order-insensitive multiset hash: wrapping sum of element hashes.
fn multiset<'a>(exprs: impl Iterator<Item = &'a Expr>) -> u64 {
    exprs.fold(0u64, |acc, e| acc.wrapping_add(hash_of(e)))
}

fn conjunct_hash(filter: Option<&Expr>) -> u64 {
    filter
        .map(|f| multiset(f.conjuncts().into_iter()))
        .unwrap_or(0)
}

impl Memo {
    /// Register a logical subtree, deduplicating by signature, and replace
    /// its children with group references.
    pub fn enqueue(&mut self, node: &LogicNode) -> GroupId {
        let (children, opaque) = match &node.op {
            LogicOp::FromQuery { .. } => (Vec::new(), node.children.clone()),
            _ => (
                node.children.iter().map(|c| self.enqueue(c)).collect(),
                Vec::new(),
            ),
        };
        let member = LogicalMember {
            op: node.op.clone(),
            children,
            opaque,
        };
        self.insert_logical(member).0
    }

    /// Insert a logical member, creating its group when the signature is
    /// new. Returns the group and whether the member was new.
    fn insert_logical(&mut self, member: LogicalMember) -> (GroupId, bool) {
        let nf = self.normal_form(&member);
        let fp = self.fingerprint(&member);

        if let Some(&gid) = self.sig_index.get(&nf.sig) {
            let group = &mut self.groups[gid];
            debug_assert_eq!(group.atoms, nf.atoms, "signature collision across shapes");
            debug_assert_eq!(group.preds, nf.preds, "signature collision across predicates");
            if group.fingerprints.insert(fp) {
                group.logical.push(member);
                return (gid, true);
            }
            return (gid, false);
        }

        let gid = self.groups.len();
        let mut fingerprints = HashSet::default();
        fingerprints.insert(fp);
        self.groups.push(Group {
            id: gid,
            signature: nf.sig,
            tables: nf.tables,
            logical: vec![member],
            physical: Vec::new(),
            explored: false,
            atoms: nf.atoms,
            preds: nf.preds,
            fingerprints,
        });
        self.sig_index.insert(nf.sig, gid);
        self.stack.push(gid);
        (gid, true)
    }

    fn insert_physical(&mut self, gid: GroupId, member: usize, algo: PhysAlgo) {
        let group = &mut self.groups[gid];
        if !group
            .physical
            .iter()
            .any(|p| p.algo == algo && p.member == member)
        {
            group.physical.push(PhysicalMember { algo, member });
        }
    }

    /// Pop unexplored groups and run every rule over every member; members
    /// inserted mid-pass are picked up before the group is marked explored.
    pub fn explore(&mut self, rules: &[Box<dyn Rule>], ctx: &RuleCtx) {
        while let Some(gid) = self.stack.pop() {
            let mut i = 0;
            while i < self.groups[gid].logical.len() {
                for rule in rules {
                    let member = self.groups[gid].logical[i].clone();
                    if !rule.applicable(&member, self, ctx) {
                        continue;
                    }
                    match rule.apply(&member, self, ctx) {
                        RuleResult::Logical(new_member) => {
                            let sig_before = self.groups[gid].signature;
                            let nf = self.normal_form(&new_member);
                            debug_assert_eq!(
                                nf.sig, sig_before,
                                "rule {} changed the logical signature",
                                rule.name()
                            );
                            let fp = self.fingerprint(&new_member);
                            let group = &mut self.groups[gid];
                            if group.fingerprints.insert(fp) {
                                group.logical.push(new_member);
                            }
                        }
                        RuleResult::Physical(algo) => self.insert_physical(gid, i, algo),
                    }
                }
                i += 1;
            }
            self.groups[gid].explored = true;
        }
        debug!(groups = self.groups.len(), "memo explored");
    }

    pub fn group(&self, gid: GroupId) -> &Group {
        &self.groups[gid]
    }

    /// Minimum cost over the group's physical members.
    pub fn min_cost(&self, gid: GroupId, ctx: &RuleCtx) -> DbResult<f64> {
        self.best_member(gid, ctx).map(|(_, cost)| cost)
    }

    fn best_member(&self, gid: GroupId, ctx: &RuleCtx) -> DbResult<(usize, f64)> {
        let group = &self.groups[gid];
        if group.physical.is_empty() {
            return Err(DbError::NoPhysicalPlan(gid));
        }
        let mut best: Option<(usize, f64)> = None;
        for (i, pm) in group.physical.iter().enumerate() {
            let cost = self.member_cost(gid, pm, ctx)?;
            if best.map(|(_, c)| cost < c).unwrap_or(true) {
                best = Some((i, cost));
            }
        }
        Ok(best.expect("at least one physical member"))
    }

    fn member_cost(&self, gid: GroupId, pm: &PhysicalMember, ctx: &RuleCtx) -> DbResult<f64> {
        let lm = &self.groups[gid].logical[pm.member];
        let children = lm
            .children
            .iter()
            .map(|c| self.min_cost(*c, ctx))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(algo_cost(pm.algo, &lm.op, &children, ctx))
    }

    /// Materialize the optimal plan: pick the min-cost physical member of
    /// each group and recurse through its children.
    pub fn extract(&self, gid: GroupId, ctx: &RuleCtx) -> DbResult<(LogicNode, AlgoTree)> {
        let (idx, _) = self.best_member(gid, ctx)?;
        let pm = &self.groups[gid].physical[idx];
        let lm = &self.groups[gid].logical[pm.member];

        let mut child_nodes = Vec::new();
        let mut child_algos = Vec::new();
        for &child in &lm.children {
            let (n, a) = self.extract(child, ctx)?;
            child_nodes.push(n);
            child_algos.push(a);
        }
        if !lm.opaque.is_empty() {
            child_nodes.extend(lm.opaque.iter().cloned());
        }

        Ok((
            LogicNode::new(lm.op.clone(), child_nodes),
            AlgoTree {
                algo: pm.algo,
                children: child_algos,
            },
        ))
    }

    fn fingerprint(&self, member: &LogicalMember) -> u64 {
        let payload = op_payload_hash(&member.op);
        let mut h = DefaultHasher::new();
        payload.hash(&mut h);
        for c in &member.children {
            c.hash(&mut h);
        }
        h.finish()
    }

    fn normal_form(&self, member: &LogicalMember) -> NormalForm {
        let child = |i: usize| &self.groups[member.children[i]];
        match &member.op {
            LogicOp::Get { table, filter } => {
                let atoms = hash_of(&(1u8, table.0));
                let preds = conjunct_hash(filter.as_ref());
                NormalForm {
                    atoms,
                    preds,
                    sig: hash_of(&(1u8, atoms, preds)),
                    tables: std::iter::once(*table).collect(),
                }
            }
            LogicOp::FromQuery { table } => {
                let atoms = hash_of(&(2u8, table.0));
                let mut tables: BTreeSet<TableSeq> = std::iter::once(*table).collect();
                for inner in &member.opaque {
                    tables.extend(inner.tables());
                }
                NormalForm {
                    atoms,
                    preds: 0,
                    sig: atoms,
                    tables,
                }
            }
            LogicOp::Join { kind, filter } => {
                let (l, r) = (child(0), child(1));
                let mut tables = l.tables.clone();
                tables.extend(r.tables.iter().copied());
                if matches!(kind, expr::ast::JoinKind::Inner | expr::ast::JoinKind::Cross) {
                    // Commutative/associative normal form: a multiset of
                    // atoms plus a multiset of conjuncts.
                    let atoms = l.atoms.wrapping_add(r.atoms);
                    let preds = l
                        .preds
                        .wrapping_add(r.preds)
                        .wrapping_add(conjunct_hash(filter.as_ref()));
                    let class = matches!(kind, expr::ast::JoinKind::Cross) as u8;
                    NormalForm {
                        atoms,
                        preds,
                        sig: hash_of(&(3u8, class, atoms, preds)),
                        tables,
                    }
                } else {
                    let sig = hash_of(&(
                        4u8,
                        *kind as u8,
                        l.signature,
                        r.signature,
                        conjunct_hash(filter.as_ref()),
                    ));
                    NormalForm {
                        atoms: sig,
                        preds: 0,
                        sig,
                        tables,
                    }
                }
            }
            LogicOp::Filter { pred } => {
                let c = child(0);
                let sig = hash_of(&(
                    5u8,
                    multiset(pred.conjuncts().into_iter()),
                    c.signature,
                ));
                NormalForm {
                    atoms: sig,
                    preds: 0,
                    sig,
                    tables: c.tables.clone(),
                }
            }
            LogicOp::Agg { keys, aggs, having } => {
                let c = child(0);
                let sig = hash_of(&(
                    6u8,
                    multiset(keys.iter()),
                    multiset(aggs.iter()),
                    conjunct_hash(having.as_ref()),
                    c.signature,
                ));
                NormalForm {
                    atoms: sig,
                    preds: 0,
                    sig,
                    tables: c.tables.clone(),
                }
            }
            LogicOp::Order { keys } => {
                let c = child(0);
                let mut h = DefaultHasher::new();
                7u8.hash(&mut h);
                for (e, desc) in keys {
                    hash_of(e).hash(&mut h);
                    desc.hash(&mut h);
                }
                c.signature.hash(&mut h);
                let sig = h.finish();
                NormalForm {
                    atoms: sig,
                    preds: 0,
                    sig,
                    tables: c.tables.clone(),
                }
            }
            LogicOp::Limit { n } => {
                let c = child(0);
                let sig = hash_of(&(8u8, *n as u64, c.signature));
                NormalForm {
                    atoms: sig,
                    preds: 0,
                    sig,
                    tables: c.tables.clone(),
                }
            }
        }
    }
}

/// Order-sensitive hash of an operator's payload, used for member dedup.
fn op_payload_hash(op: &LogicOp) -> u64 {
    let mut h = DefaultHasher::new();
    match op {
        LogicOp::Get { table, filter } => {
            (10u8, table.0).hash(&mut h);
            conjunct_hash(filter.as_ref()).hash(&mut h);
        }
        LogicOp::FromQuery { table } => (11u8, table.0).hash(&mut h),
        LogicOp::Join { kind, filter } => {
            (12u8, *kind as u8).hash(&mut h);
            conjunct_hash(filter.as_ref()).hash(&mut h);
        }
        LogicOp::Filter { pred } => {
            13u8.hash(&mut h);
            hash_of(pred).hash(&mut h);
        }
        LogicOp::Agg { keys, aggs, having } => {
            14u8.hash(&mut h);
            multiset(keys.iter()).hash(&mut h);
            multiset(aggs.iter()).hash(&mut h);
            conjunct_hash(having.as_ref()).hash(&mut h);
        }
        LogicOp::Order { keys } => {
            15u8.hash(&mut h);
            for (e, desc) in keys {
                hash_of(e).hash(&mut h);
                desc.hash(&mut h);
            }
        }
        LogicOp::Limit { n } => (16u8, *n as u64).hash(&mut h),
    }
    h.finish()
}

fn algo_cost(algo: PhysAlgo, op: &LogicOp, children: &[f64], ctx: &RuleCtx) -> f64 {
    match algo {
        PhysAlgo::ScanTable => match op {
            LogicOp::Get { table, .. } => scan_rows(*table, ctx),
            _ => 1.0,
        },
        PhysAlgo::ScanFile => 1000.0,
        PhysAlgo::NLJoin => children.iter().product::<f64>().max(1.0),
        PhysAlgo::HashJoin => children.iter().sum::<f64>().max(1.0),
        _ => children.first().copied().unwrap_or(1.0),
    }
}

fn scan_rows(table: TableSeq, ctx: &RuleCtx) -> f64 {
    match &ctx.registry.get(table).source {
        TableSource::Base { table: name } => ctx
            .catalog
            .try_table(name)
            .map(|t| t.estimated_rows() as f64)
            .unwrap_or(1.0)
            .max(1.0),
        _ => 1000.0,
    }
}

/// Full memo pipeline for one bound SELECT: build the logical tree, explore,
/// extract the min-cost plan, then resolve and realize it.
pub fn optimize_select(
    bound: &BoundSelect,
    opts: &QueryOptions,
    catalog: &Catalog,
    registry: &TableRegistry,
) -> DbResult<PhysNode> {
    let root = planner::build_logical(bound)?;
    let mut memo = Memo::default();
    let root_gid = memo.enqueue(&root);
    let ctx = RuleCtx {
        opts,
        catalog,
        registry,
    };
    memo.explore(&default_rules(), &ctx);
    let (mut logic, algos) = memo.extract(root_gid, &ctx)?;
    planner::resolve(&mut logic, planner::root_request(bound))?;
    realize(&logic, &algos, opts, catalog, registry)
}

/// Lower a resolved tree following the algorithm choices the memo made.
pub fn realize(
    node: &LogicNode,
    algo: &AlgoTree,
    opts: &QueryOptions,
    catalog: &Catalog,
    registry: &TableRegistry,
) -> DbResult<PhysNode> {
    // FromQuery children are opaque plans lowered directly.
    let children = if matches!(node.op, LogicOp::FromQuery { .. }) {
        node.children
            .iter()
            .map(|c| planner::direct_to_physical(c, opts, catalog, registry))
            .collect::<DbResult<Vec<_>>>()?
    } else {
        node.children
            .iter()
            .zip(algo.children.iter())
            .map(|(c, a)| realize(c, a, opts, catalog, registry))
            .collect::<DbResult<Vec<_>>>()?
    };

    let op = match (&algo.algo, &node.op) {
        (PhysAlgo::ScanTable | PhysAlgo::ScanFile, LogicOp::Get { table, filter }) => {
            planner::scan_op(*table, filter.clone(), catalog, registry)?
        }
        (PhysAlgo::FromQuery, LogicOp::FromQuery { table }) => {
            PhysOp::FromQuery { table: *table }
        }
        (PhysAlgo::Filter, LogicOp::Filter { pred }) => PhysOp::Filter { pred: pred.clone() },
        (PhysAlgo::HashAgg, LogicOp::Agg { keys, aggs, having }) => PhysOp::HashAgg {
            keys: keys.clone(),
            aggs: aggs.clone(),
            having: having.clone(),
        },
        (PhysAlgo::Order, LogicOp::Order { keys }) => PhysOp::Order { keys: keys.clone() },
        (PhysAlgo::Limit, LogicOp::Limit { n }) => PhysOp::Limit { n: *n },
        (PhysAlgo::NLJoin, LogicOp::Join { kind, filter }) => PhysOp::NLJoin {
            kind: *kind,
            filter: filter.clone(),
        },
        (PhysAlgo::HashJoin, LogicOp::Join { kind, filter }) => {
            let left_len = children[0].output.len();
            let (left_keys, right_keys, residual) = filter
                .as_ref()
                .map(|f| planner::extract_equi_keys(f, left_len))
                .unwrap_or((Vec::new(), Vec::new(), None));
            if left_keys.is_empty() {
                // The rule fired on a name-level match that resolution did
                // not preserve; fall back to the general join.
                PhysOp::NLJoin {
                    kind: *kind,
                    filter: filter.clone(),
                }
            } else {
                PhysOp::HashJoin {
                    kind: *kind,
                    left_keys,
                    right_keys,
                    residual,
                }
            }
        }
        (a, op) => {
            return Err(DbError::Plan(format!(
                "algorithm {a:?} does not implement {op:?}"
            )))
        }
    };

    let mut phys = PhysNode::new(op, children, node.output.clone());
    if opts.profile {
        let output = phys.output.clone();
        phys = PhysNode::new(
            PhysOp::Profile {
                rows: std::cell::Cell::new(0),
                loops: std::cell::Cell::new(0),
            },
            vec![phys],
            output,
        );
    }
    Ok(phys)
}
