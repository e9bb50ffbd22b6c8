//! Decision nodes of the search tree.
//!
//! Nodes live in a [`NodeArena`] and refer to their children by [`NodeId`].
//! Every tree position starts out as a [`Node::Stem`]. The first execution
//! that reaches it grows the stem in place into a concrete node kind, and
//! every later execution reuses that node. Ancestors learn about finished
//! subtrees through [`NodeArena::update_result`], called in reverse along
//! the path of the finished execution.

use crate::error::{ExplorationError, ExplorationResult};
use crate::merge::merge_node_results;
use crate::stats::StatsCounter;
use crate::verdict::{CallAnalysis, VerificationStatus};
use pathspace_solver::{ConstraintSolver, SatResult};
use rand::rngs::StdRng;
use rand::Rng;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::panic::Location;
use tracing::debug;

/// Probability of taking the negative branch when both are open, for a
/// race whose requested bias is not a number.
pub const DEFAULT_FALSE_PROBABILITY: f64 = 0.5;

/// Bias toward the negative branch for program decisions. Loop conditions
/// tend to repeat on true, and deep recursive structures are built along
/// true branches, so favoring false tends to finish paths sooner.
pub const WORST_RESULT_FALSE_PROBABILITY: f64 = 0.75;

/// Source location of the instrumentation call that first visited a node.
pub type CallSite = &'static Location<'static>;

/// Bookkeeping shared by every materialized node.
#[derive(Debug, Clone, Default)]
pub struct NodeCore {
    pub(crate) site: Option<CallSite>,
    pub(crate) result: CallAnalysis,
    pub(crate) exhausted: bool,
}

impl NodeCore {
    fn exhausted_with(result: CallAnalysis) -> Self {
        Self {
            site: None,
            result,
            exhausted: true,
        }
    }

    pub fn site(&self) -> Option<CallSite> {
        self.site
    }
}

/// Ask whether `expr` is satisfiable under the solver's current constraints.
pub(crate) fn solver_is_sat<S: ConstraintSolver>(
    solver: &mut S,
    expr: &S::Bool,
) -> ExplorationResult<bool> {
    match solver.check(std::slice::from_ref(expr)) {
        SatResult::Sat => Ok(true),
        SatResult::Unsat => Ok(false),
        SatResult::Unknown => {
            debug!(expr = %expr, state = %solver.dump(), "unknown satisfiability");
            Err(ExplorationError::UnknownSatisfiability)
        }
    }
}

/// Clamp a requested race bias into `[0, 1]`.
pub(crate) fn race_probability(false_probability: f64) -> f64 {
    if false_probability.is_nan() {
        DEFAULT_FALSE_PROBABILITY
    } else {
        false_probability.clamp(0.0, 1.0)
    }
}

/// A program decision on a boolean expression, possibly forced one way.
#[derive(Debug, Clone)]
pub struct Decision<B> {
    pub expr: B,
    /// `Some(side)` if the other side is unsatisfiable under the constraints
    /// in force when the decision was first reached.
    pub forced: Option<bool>,
}

impl<B: Clone + fmt::Display> Decision<B> {
    /// Check both sides of `expr` against the solver once.
    pub fn new<S>(expr: B, solver: &mut S) -> ExplorationResult<Self>
    where
        S: ConstraintSolver<Bool = B>,
    {
        let negated = solver.negate(&expr);
        let could_be_true = solver_is_sat(solver, &expr)?;
        let could_be_false = solver_is_sat(solver, &negated)?;
        let forced = match (could_be_true, could_be_false) {
            (false, false) => {
                debug!(expr = %expr, state = %solver.dump(), "reached impossible code path");
                return Err(ExplorationError::internal("reached impossible code path"));
            }
            (false, true) => Some(false),
            (true, false) => Some(true),
            (true, true) => None,
        };
        Ok(Self { expr, forced })
    }
}

/// Decision that pins a term to one value of the solver's model.
pub struct ModelValue<S: ConstraintSolver> {
    /// Decision on `term == value`.
    pub decision: Decision<S::Bool>,
    pub term: S::Term,
    pub value: S::Value,
    /// Realization counter name, for plain symbolic inputs.
    pub stats_key: Option<String>,
}

/// The policy distinguishing binary nodes.
pub enum BinaryKind<S: ConstraintSolver> {
    /// A program branch: a refuted side dominates, forced sides short-circuit.
    WorstResult(Decision<S::Bool>),
    /// Two alternative search strategies; the first decisive one wins.
    Parallel { false_probability: f64, desc: String },
    /// A step toward a concrete value for a term.
    ModelValue(ModelValue<S>),
}

impl<S: ConstraintSolver> BinaryKind<S> {
    /// A race between two strategies. A bias outside `[0, 1]` is clamped.
    pub fn parallel(false_probability: f64, desc: impl Into<String>) -> Self {
        BinaryKind::Parallel {
            false_probability: race_probability(false_probability),
            desc: desc.into(),
        }
    }
}

/// Index of a node within its [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

pub struct Leaf {
    core: NodeCore,
    stats: StatsCounter,
}

pub struct SinglePath {
    core: NodeCore,
    decision: bool,
    child: NodeId,
}

impl SinglePath {
    pub fn decision(&self) -> bool {
        self.decision
    }

    pub fn child(&self) -> NodeId {
        self.child
    }
}

/// A path that stopped branching. Stays unexhausted until its one child
/// completes, so that nothing treats the path as finished too early.
pub struct DetachedPath {
    core: NodeCore,
    child: NodeId,
    stats: Option<StatsCounter>,
}

impl DetachedPath {
    pub fn child(&self) -> NodeId {
        self.child
    }
}

pub struct BinaryPath<S: ConstraintSolver> {
    core: NodeCore,
    kind: BinaryKind<S>,
    positive: NodeId,
    negative: NodeId,
    stats: StatsCounter,
}

impl<S: ConstraintSolver> BinaryPath<S> {
    pub fn kind(&self) -> &BinaryKind<S> {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut BinaryKind<S> {
        &mut self.kind
    }

    pub fn positive(&self) -> NodeId {
        self.positive
    }

    pub fn negative(&self) -> NodeId {
        self.negative
    }

    /// The side this node is permanently routed to, if any.
    pub fn forced(&self) -> Option<bool> {
        match &self.kind {
            BinaryKind::WorstResult(decision) => decision.forced,
            BinaryKind::ModelValue(mv) => mv.decision.forced,
            BinaryKind::Parallel { .. } => None,
        }
    }

    pub fn false_probability(&self, nodes: &NodeArena<S>) -> f64 {
        match &self.kind {
            BinaryKind::WorstResult(_) | BinaryKind::ModelValue(_) => {
                WORST_RESULT_FALSE_PROBABILITY
            }
            BinaryKind::Parallel {
                false_probability, ..
            } => {
                if nodes[self.positive].is_exhausted() {
                    1.0
                } else {
                    *false_probability
                }
            }
        }
    }

    /// Pick the branch to take next.
    ///
    /// Forced nodes always take their forced side. Otherwise an exhausted
    /// side is never chosen, and when both sides are open the choice is
    /// `favor_true` or a biased coin flip.
    pub fn choose(
        &self,
        nodes: &NodeArena<S>,
        rng: &mut StdRng,
        favor_true: bool,
    ) -> ExplorationResult<bool> {
        if let Some(forced) = self.forced() {
            return Ok(forced);
        }
        let positive_ok = !nodes[self.positive].is_exhausted();
        let negative_ok = !nodes[self.negative].is_exhausted();
        match (positive_ok, negative_ok) {
            (true, true) => {
                if favor_true {
                    Ok(true)
                } else {
                    Ok(rng.gen::<f64>() > self.false_probability(nodes))
                }
            }
            (true, false) => Ok(true),
            (false, true) => Ok(false),
            (false, false) => Err(ExplorationError::internal(
                "tried to choose a branch of an exhausted node",
            )),
        }
    }

    fn compute_result(&self, nodes: &NodeArena<S>) -> (CallAnalysis, bool, StatsCounter) {
        match &self.kind {
            BinaryKind::WorstResult(decision) => self.compute_worst(nodes, decision.forced),
            BinaryKind::Parallel { .. } => self.compute_parallel(nodes),
            BinaryKind::ModelValue(mv) => {
                let (result, exhausted, mut stats) = self.compute_worst(nodes, mv.decision.forced);
                if let Some(key) = &mv.stats_key {
                    stats.set_realizations(key.as_str(), self.stats.realizations(key) + 1);
                }
                (result, exhausted, stats)
            }
        }
    }

    fn compute_worst(
        &self,
        nodes: &NodeArena<S>,
        forced: Option<bool>,
    ) -> (CallAnalysis, bool, StatsCounter) {
        let positive = &nodes[self.positive];
        let negative = &nodes[self.negative];
        let positive_exhausted = positive.is_exhausted();
        let negative_exhausted = negative.is_exhausted();
        let exhausted = (positive_exhausted && negative_exhausted)
            || (forced == Some(true) && positive_exhausted)
            || (forced == Some(false) && negative_exhausted);
        if positive.status() == Some(VerificationStatus::Refuted) || forced == Some(true) {
            return (positive.result(), exhausted, nodes.stats(self.positive));
        }
        if negative.status() == Some(VerificationStatus::Refuted) || forced == Some(false) {
            return (negative.result(), exhausted, nodes.stats(self.negative));
        }
        let stats = nodes.stats(self.positive) + nodes.stats(self.negative);
        let (result, exhausted) =
            merge_node_results(positive.result(), positive_exhausted, negative);
        (result, exhausted, stats)
    }

    /// A race looks like a leaf from above: only verdict buckets go up.
    fn compute_parallel(&self, nodes: &NodeArena<S>) -> (CallAnalysis, bool, StatsCounter) {
        let positive = &nodes[self.positive];
        let negative = &nodes[self.negative];
        let positive_exhausted = positive.is_exhausted();
        let negative_exhausted = negative.is_exhausted();
        if positive_exhausted && positive.status() != Some(VerificationStatus::Unknown) {
            let stats = nodes.stats(self.positive).statuses_only();
            return (positive.result(), true, stats);
        }
        if negative_exhausted && negative.status() != Some(VerificationStatus::Unknown) {
            let stats = nodes.stats(self.negative).statuses_only();
            return (negative.result(), true, stats);
        }
        let stats = (nodes.stats(self.positive) + nodes.stats(self.negative)).statuses_only();
        let (result, exhausted) = merge_node_results(
            positive.result(),
            positive_exhausted && negative_exhausted,
            negative,
        );
        (result, exhausted, stats)
    }
}

/// One position of the search tree.
pub enum Node<S: ConstraintSolver> {
    /// Not yet visited; becomes another kind on first visit.
    Stem,
    /// End of a path, holding its report.
    Leaf(Leaf),
    /// One fixed continuation.
    Single(SinglePath),
    /// A path that stopped searching further branches.
    Detached(DetachedPath),
    /// A two-way decision.
    Binary(BinaryPath<S>),
}

impl<S: ConstraintSolver> Node<S> {
    pub fn leaf(result: CallAnalysis) -> Self {
        let stats = StatsCounter::leaf(result.status);
        Node::Leaf(Leaf {
            core: NodeCore::exhausted_with(result),
            stats,
        })
    }

    pub fn is_stem(&self) -> bool {
        matches!(self, Node::Stem)
    }

    pub fn is_exhausted(&self) -> bool {
        self.core().is_some_and(|core| core.exhausted)
    }

    /// Report for this subtree. A stem reports unknown.
    pub fn result(&self) -> CallAnalysis {
        match self.core() {
            Some(core) => core.result.clone(),
            None => CallAnalysis::unknown(),
        }
    }

    pub fn status(&self) -> Option<VerificationStatus> {
        match self.core() {
            Some(core) => core.result.status,
            None => Some(VerificationStatus::Unknown),
        }
    }

    pub fn core(&self) -> Option<&NodeCore> {
        match self {
            Node::Stem => None,
            Node::Leaf(leaf) => Some(&leaf.core),
            Node::Single(single) => Some(&single.core),
            Node::Detached(detached) => Some(&detached.core),
            Node::Binary(binary) => Some(&binary.core),
        }
    }

    pub(crate) fn core_mut(&mut self) -> Option<&mut NodeCore> {
        match self {
            Node::Stem => None,
            Node::Leaf(leaf) => Some(&mut leaf.core),
            Node::Single(single) => Some(&mut single.core),
            Node::Detached(detached) => Some(&mut detached.core),
            Node::Binary(binary) => Some(&mut binary.core),
        }
    }

    /// The child reached by taking `branch` here.
    pub fn child(&self, branch: bool) -> Option<NodeId> {
        match self {
            Node::Stem | Node::Leaf(_) => None,
            Node::Single(single) => (single.decision == branch).then_some(single.child),
            Node::Detached(detached) => branch.then_some(detached.child),
            Node::Binary(binary) => Some(if branch {
                binary.positive
            } else {
                binary.negative
            }),
        }
    }

    /// Terminate the path at this already-materialized node.
    pub(crate) fn mark_exhausted(&mut self, analysis: CallAnalysis) -> bool {
        match self.core_mut() {
            Some(core) => {
                core.result = analysis;
                core.exhausted = true;
                true
            }
            None => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Stem => "stem",
            Node::Leaf(_) => "leaf",
            Node::Single(_) => "single-path",
            Node::Detached(_) => "detached",
            Node::Binary(binary) => match binary.kind {
                BinaryKind::WorstResult(_) => "worst-result",
                BinaryKind::Parallel { .. } => "parallel",
                BinaryKind::ModelValue(_) => "model-value",
            },
        }
    }
}

impl<S: ConstraintSolver> fmt::Debug for Node<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exhausted = if self.is_exhausted() { " : exhausted" } else { "" };
        match self {
            Node::Stem => write!(f, "Stem"),
            Node::Leaf(leaf) => write!(f, "Leaf({:?})", leaf.core.result.status),
            Node::Single(single) => write!(f, "SinglePath({}{exhausted})", single.decision),
            Node::Detached(_) => write!(f, "DetachedPath({exhausted})"),
            Node::Binary(binary) => match &binary.kind {
                BinaryKind::WorstResult(decision) => {
                    write!(f, "WorstResult({}{exhausted})", decision.expr)
                }
                BinaryKind::Parallel {
                    false_probability,
                    desc,
                } => write!(f, "Parallel(false_pct={false_probability}, {desc}{exhausted})"),
                BinaryKind::ModelValue(mv) => {
                    write!(f, "ModelValue({} == {}{exhausted})", mv.term, mv.value)
                }
            },
        }
    }
}

/// Owns every node of one search tree.
///
/// Nodes are never removed, so a [`NodeId`] stays valid for the arena's
/// lifetime. Walking, updating and dropping a path are all flat.
pub struct NodeArena<S: ConstraintSolver> {
    nodes: Vec<Node<S>>,
}

impl<S: ConstraintSolver> NodeArena<S> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn stem(&mut self) -> NodeId {
        self.nodes.push(Node::Stem);
        NodeId(self.nodes.len() - 1)
    }

    /// A fresh single-path node over a new stem.
    pub fn single(&mut self, decision: bool) -> NodeId {
        let child = self.stem();
        self.nodes.push(Node::Single(SinglePath {
            core: NodeCore::default(),
            decision,
            child,
        }));
        NodeId(self.nodes.len() - 1)
    }

    /// Grow the stem at `id` into a two-way node with two new stems.
    pub fn grow_binary(&mut self, id: NodeId, kind: BinaryKind<S>) {
        let positive = self.stem();
        let negative = self.stem();
        self[id] = Node::Binary(BinaryPath {
            core: NodeCore::default(),
            kind,
            positive,
            negative,
            stats: StatsCounter::new(),
        });
    }

    pub fn grow_detached(&mut self, id: NodeId) {
        let child = self.stem();
        self[id] = Node::Detached(DetachedPath {
            core: NodeCore::default(),
            child,
            stats: None,
        });
    }

    pub fn grow_leaf(&mut self, id: NodeId, result: CallAnalysis) {
        self[id] = Node::leaf(result);
    }

    /// Statistics of the subtree at `id`.
    pub fn stats(&self, id: NodeId) -> StatsCounter {
        let mut id = id;
        loop {
            return match &self[id] {
                Node::Stem => StatsCounter::new(),
                Node::Leaf(leaf) => leaf.stats.clone(),
                Node::Single(single) => {
                    id = single.child;
                    continue;
                }
                Node::Detached(detached) => detached
                    .stats
                    .clone()
                    .unwrap_or_else(|| self.stats(detached.child).statuses_only()),
                Node::Binary(binary) => binary.stats.clone(),
            };
        }
    }

    /// Branch to take from `id`.
    pub fn choose(
        &self,
        id: NodeId,
        rng: &mut StdRng,
        favor_true: bool,
    ) -> ExplorationResult<bool> {
        match &self[id] {
            Node::Single(single) => Ok(single.decision),
            Node::Detached(_) => Ok(true),
            Node::Binary(binary) => binary.choose(self, rng, favor_true),
            other => Err(ExplorationError::internal(format!(
                "cannot choose a branch at a {} node",
                other.kind_name()
            ))),
        }
    }

    /// Recompute the report at `id` from its children after an execution
    /// ending in `leaf_analysis` passed through it. Exhausted nodes are final.
    /// Returns whether anything changed.
    pub fn update_result(&mut self, id: NodeId, leaf_analysis: &CallAnalysis) -> bool {
        let (result, exhausted, stats) = match &self[id] {
            node if node.is_exhausted() => return false,
            Node::Stem | Node::Leaf(_) => return false,
            Node::Single(single) => {
                let child = &self[single.child];
                (child.result(), child.is_exhausted(), None)
            }
            // Only verdict buckets go up; from above this looks like a leaf.
            Node::Detached(detached) => (
                leaf_analysis.clone(),
                true,
                Some(self.stats(detached.child).statuses_only()),
            ),
            Node::Binary(binary) => {
                let (result, exhausted, stats) = binary.compute_result(self);
                (result, exhausted, Some(stats))
            }
        };
        let node = &mut self[id];
        match &mut *node {
            Node::Detached(detached) => detached.stats = stats,
            Node::Binary(binary) => {
                if let Some(stats) = stats {
                    binary.stats = stats;
                }
            }
            _ => {}
        }
        let Some(core) = node.core_mut() else {
            return false;
        };
        let changed = core.exhausted != exhausted || core.result != result;
        core.result = result;
        core.exhausted = exhausted;
        changed
    }
}

impl<S: ConstraintSolver> Default for NodeArena<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ConstraintSolver> Index<NodeId> for NodeArena<S> {
    type Output = Node<S>;

    fn index(&self, id: NodeId) -> &Node<S> {
        &self.nodes[id.0]
    }
}

impl<S: ConstraintSolver> IndexMut<NodeId> for NodeArena<S> {
    fn index_mut(&mut self, id: NodeId) -> &mut Node<S> {
        &mut self.nodes[id.0]
    }
}
