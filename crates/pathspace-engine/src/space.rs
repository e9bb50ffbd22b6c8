//! The exploration session: one execution of the program under test.
//!
//! A [`SearchTree`] accumulates what every previous execution learned. Each
//! execution opens a fresh [`StateSpace`] on that tree with a fresh solver,
//! replays decisions from the root, grows the tree by at least one node, and
//! ends with [`StateSpace::finalize`], which folds the path's report back up
//! to the root through the nodes it passed.

use crate::error::{ExplorationError, ExplorationResult};
use crate::heap::{HeapHandle, SnapshotRef, SymbolicHeap, TypeTag};
use crate::node::{
    race_probability, solver_is_sat, BinaryKind, CallSite, Decision, ModelValue, Node, NodeArena,
    NodeId,
};
use crate::stats::StatsCounter;
use crate::verdict::CallAnalysis;
use ahash::AHashSet;
use pathspace_solver::{Concrete, ConstraintSolver, SatResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::Cell;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::panic::Location;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Seed of the search RNG unless configured otherwise.
pub const DEFAULT_SEARCH_SEED: u64 = 1801243388510242075;

/// Extra time a path gets once it detaches, for deferred assumptions and
/// counterexample extraction.
pub const DETACH_GRACE: Duration = Duration::from_secs(2);

/// The persistent search tree shared by all executions of one run.
pub struct SearchTree<S: ConstraintSolver> {
    nodes: NodeArena<S>,
    root: NodeId,
    rng: StdRng,
}

impl<S: ConstraintSolver> SearchTree<S> {
    pub fn new(seed: u64) -> Self {
        let mut nodes = NodeArena::new();
        let root = nodes.single(true);
        Self {
            nodes,
            root,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn nodes(&self) -> &NodeArena<S> {
        &self.nodes
    }

    /// Whether every path below the root has been explored.
    pub fn is_exhausted(&self) -> bool {
        self.nodes[self.root].is_exhausted()
    }

    pub fn result(&self) -> CallAnalysis {
        self.nodes[self.root].result()
    }

    pub fn stats(&self) -> StatsCounter {
        self.nodes.stats(self.root)
    }
}

impl<S: ConstraintSolver> Default for SearchTree<S> {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_SEED)
    }
}

/// The child of `id` on the `choice` side.
fn step_from<S: ConstraintSolver>(
    nodes: &NodeArena<S>,
    id: NodeId,
    choice: bool,
) -> ExplorationResult<NodeId> {
    let node = &nodes[id];
    node.child(choice).ok_or_else(|| {
        let kind = node.kind_name();
        ExplorationError::internal(format!("search path runs through a {kind} node"))
    })
}

/// Record `site` on the node's first visit. On a later visit from anywhere
/// else, describe the mismatch.
fn site_mismatch<S: ConstraintSolver>(node: &mut Node<S>, site: CallSite) -> Option<String> {
    let kind = node.kind_name();
    let core = node.core_mut()?;
    let first = *core.site.get_or_insert(site);
    (first != site).then(|| format!("{kind} node reached from {site}, first reached from {first}"))
}

thread_local! {
    static SESSION_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a session, for the guard's lifetime.
pub struct SessionGuard {
    _not_send: PhantomData<*const ()>,
}

impl SessionGuard {
    pub fn enter() -> ExplorationResult<Self> {
        SESSION_ACTIVE.with(|active| {
            if active.replace(true) {
                return Err(ExplorationError::SessionActive);
            }
            Ok(Self {
                _not_send: PhantomData,
            })
        })
    }

    pub fn is_active() -> bool {
        SESSION_ACTIVE.with(Cell::get)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSION_ACTIVE.with(|active| {
            let was_active = active.replace(false);
            debug_assert!(was_active, "session flag was altered while a session was active");
        });
    }
}

/// Result of a deferred assumption check.
#[derive(Debug, Clone)]
pub enum Assumption<B> {
    Concrete(bool),
    /// Decided with a bias toward true.
    Symbolic(B),
}

type DeferredCheck<'t, B> = Box<dyn FnOnce() -> Assumption<B> + 't>;

/// One execution's view of the search: a solver, a cursor into the tree,
/// the symbolic heap, and the per-path deadline.
pub struct StateSpace<'t, S: ConstraintSolver, V> {
    tree: &'t mut SearchTree<S>,
    solver: S,
    /// The node this execution reaches next.
    cursor: NodeId,
    /// Nodes passed on the way to the cursor, starting at the root.
    choices_made: Vec<NodeId>,
    heap: SymbolicHeap<S::Term, V>,
    next_uniq: u64,
    detached: bool,
    execution_deadline: Instant,
    deferred: Vec<(String, DeferredCheck<'t, S::Bool>)>,
    already_logged: AHashSet<String>,
    realized: BTreeSet<String>,
    _guard: SessionGuard,
}

impl<'t, S: ConstraintSolver, V: Clone> StateSpace<'t, S, V> {
    /// Start an execution on `tree`. Fails if another session is active on
    /// this thread.
    pub fn new(
        tree: &'t mut SearchTree<S>,
        solver: S,
        execution_deadline: Instant,
    ) -> ExplorationResult<Self> {
        let guard = SessionGuard::enter()?;
        let root = tree.root;
        let first = tree.nodes.choose(root, &mut tree.rng, false)?;
        let cursor = step_from(&tree.nodes, root, first)?;
        Ok(Self {
            tree,
            solver,
            cursor,
            choices_made: vec![root],
            heap: SymbolicHeap::new(),
            next_uniq: 1,
            detached: false,
            execution_deadline,
            deferred: Vec::new(),
            already_logged: AHashSet::new(),
            realized: BTreeSet::new(),
            _guard: guard,
        })
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    /// Number of decisions made on this path so far.
    pub fn decisions(&self) -> usize {
        self.choices_made.len() - 1
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn execution_deadline(&self) -> Instant {
        self.execution_deadline
    }

    /// Commit to `expr` for the rest of this execution.
    pub fn assert(&mut self, expr: &S::Bool) {
        self.solver.assert(expr);
    }

    /// Whether `expr` could hold, without committing to it.
    pub fn is_possible(&mut self, expr: &S::Bool) -> ExplorationResult<bool> {
        solver_is_sat(&mut self.solver, expr)
    }

    /// Terms realized to concrete values on this path so far.
    pub fn realized_exprs(&self) -> &BTreeSet<String> {
        &self.realized
    }

    /// A fresh name suffix, deterministic within an execution.
    pub fn uniq(&mut self) -> String {
        self.next_uniq += 1;
        format!("_{:x}", self.next_uniq)
    }

    fn cursor(&mut self) -> &mut Node<S> {
        &mut self.tree.nodes[self.cursor]
    }

    /// Take the `choice` side of the cursor node.
    fn advance(&mut self, choice: bool) -> ExplorationResult<()> {
        let next = step_from(&self.tree.nodes, self.cursor, choice)?;
        self.choices_made.push(self.cursor);
        self.cursor = next;
        Ok(())
    }

    fn not_deterministic(&self, detail: String) -> ExplorationError {
        let prior: Vec<String> = self.choices_made[1..]
            .iter()
            .map(|&id| format!("{:?}", self.tree.nodes[id]))
            .collect();
        warn!(
            decisions = self.decisions(),
            prior = ?prior,
            "not deterministic: {detail}"
        );
        ExplorationError::NotDeterministic { detail }
    }

    /// Decide a program branch on `expr`.
    ///
    /// The first execution to get here materializes a decision node for
    /// `expr`, checking each side once with the solver. Later executions
    /// must ask about the same expression from the same call site.
    #[track_caller]
    pub fn decide(&mut self, expr: &S::Bool, favor_true: bool) -> ExplorationResult<bool> {
        self.decide_at(expr, favor_true, Location::caller())
    }

    fn decide_at(
        &mut self,
        expr: &S::Bool,
        favor_true: bool,
        site: CallSite,
    ) -> ExplorationResult<bool> {
        if Instant::now() > self.execution_deadline {
            warn!(decisions = self.decisions(), "path execution timeout");
            return Err(ExplorationError::PathTimeout {
                decisions: self.decisions(),
            });
        }
        let mismatch = {
            let id = self.cursor;
            let nodes = &mut self.tree.nodes;
            if nodes[id].is_stem() {
                let decision = Decision::new(expr.clone(), &mut self.solver)?;
                nodes.grow_binary(id, BinaryKind::WorstResult(decision));
            }
            let node = &mut nodes[id];
            let found = node.kind_name();
            site_mismatch(node, site).or_else(|| match &*node {
                Node::Binary(binary) => match binary.kind() {
                    BinaryKind::WorstResult(decision) if decision.expr == *expr => None,
                    BinaryKind::WorstResult(decision) => Some(format!(
                        "decision expression changed from {} to {expr}",
                        decision.expr
                    )),
                    _ => Some(format!("expected a decision on {expr}, found a {found} node")),
                },
                _ => Some(format!("expected a decision on {expr}, found a {found} node")),
            })
        };
        if let Some(detail) = mismatch {
            return Err(self.not_deterministic(detail));
        }

        let SearchTree { nodes, rng, .. } = &mut *self.tree;
        let choice = nodes.choose(self.cursor, rng, favor_true)?;
        self.advance(choice)?;

        let chosen = if choice {
            expr.clone()
        } else {
            self.solver.negate(expr)
        };
        let text = chosen.to_string();
        if !self.already_logged.contains(&text) {
            debug!(literal = %text, "solver chose");
            self.already_logged.insert(text);
        }
        self.solver.assert(&chosen);
        Ok(choice)
    }

    /// Decide on a freshly named boolean, for choices with no program
    /// expression behind them.
    #[track_caller]
    pub fn fork_fresh(&mut self, desc: &str, favor_true: bool) -> ExplorationResult<bool> {
        let name = format!("{desc}{}", self.uniq());
        let expr = self.solver.named_bool(&name);
        self.decide_at(&expr, favor_true, Location::caller())
    }

    /// Race two search strategies at this point. No constraint is added.
    #[track_caller]
    pub fn fork(&mut self, false_probability: f64, desc: &str) -> ExplorationResult<bool> {
        let site = Location::caller();
        let mismatch = {
            let id = self.cursor;
            let nodes = &mut self.tree.nodes;
            if nodes[id].is_stem() {
                nodes.grow_binary(id, BinaryKind::parallel(false_probability, desc));
            }
            let node = &mut nodes[id];
            let found = node.kind_name();
            let unexpected = || format!("expected a parallel fork ({desc}), found a {found} node");
            site_mismatch(node, site).or_else(|| match node {
                Node::Binary(binary) => match binary.kind_mut() {
                    BinaryKind::Parallel {
                        false_probability: current,
                        ..
                    } => {
                        *current = race_probability(false_probability);
                        None
                    }
                    _ => Some(unexpected()),
                },
                _ => Some(unexpected()),
            })
        };
        if let Some(detail) = mismatch {
            return Err(self.not_deterministic(detail));
        }
        let SearchTree { nodes, rng, .. } = &mut *self.tree;
        let choice = nodes.choose(self.cursor, rng, false)?;
        self.advance(choice)?;
        Ok(choice)
    }

    /// Pin `term` to one concrete value consistent with the constraints.
    ///
    /// Each step offers the current model's value for `term`; a rejected
    /// candidate is excluded before the next one is drawn, so the same value
    /// is never offered twice.
    #[track_caller]
    pub fn materialize_value(&mut self, term: &S::Term) -> ExplorationResult<Concrete> {
        let site = Location::caller();
        loop {
            let step = {
                let id = self.cursor;
                let SearchTree { nodes, rng, .. } = &mut *self.tree;
                if nodes[id].is_stem() {
                    match self.solver.check(&[]) {
                        SatResult::Sat => {}
                        SatResult::Unsat => {
                            debug!(state = %self.solver.dump(), "solver unexpectedly unsat");
                            return Err(ExplorationError::internal(
                                "unexpected unsat from solver",
                            ));
                        }
                        SatResult::Unknown => return Err(ExplorationError::UnknownSatisfiability),
                    }
                    let value = self.solver.model_value(term).ok_or_else(|| {
                        ExplorationError::internal(format!("model has no value for {term}"))
                    })?;
                    let eq = self.solver.value_eq(term, &value);
                    let decision = Decision::new(eq, &mut self.solver)?;
                    let stats_key = self
                        .solver
                        .is_constant(term)
                        .then(|| format!("realize_{term}"));
                    nodes.grow_binary(
                        id,
                        BinaryKind::ModelValue(ModelValue {
                            decision,
                            term: term.clone(),
                            value,
                            stats_key,
                        }),
                    );
                }
                let node = &mut nodes[id];
                let found = node.kind_name();
                let unexpected =
                    || format!("model value node for {term} expected, found a {found} node");
                match site_mismatch(node, site) {
                    Some(detail) => Err(detail),
                    None => match &nodes[id] {
                        Node::Binary(binary) => match binary.kind() {
                            BinaryKind::ModelValue(mv) if mv.term == *term => Ok((
                                nodes.choose(id, rng, true)?,
                                mv.decision.expr.clone(),
                                mv.value.clone(),
                            )),
                            _ => Err(unexpected()),
                        },
                        _ => Err(unexpected()),
                    },
                }
            };
            let (choice, eq, value) = match step {
                Ok(step) => step,
                Err(detail) => return Err(self.not_deterministic(detail)),
            };
            self.advance(choice)?;
            if choice {
                self.solver.assert(&eq);
                let concrete = self.solver.concretize(&value);
                let text = term.to_string();
                if !self.detached && !self.already_logged.contains(&text) {
                    debug!(term = %text, value = %concrete, "solver realized symbolic");
                    self.already_logged.insert(text.clone());
                }
                self.realized.insert(text);
                return Ok(concrete);
            }
            let excluded = self.solver.negate(&eq);
            self.solver.assert(&excluded);
        }
    }

    pub fn current_snapshot(&self) -> SnapshotRef {
        self.heap.current_snapshot()
    }

    pub fn checkpoint(&mut self) -> SnapshotRef {
        self.heap.checkpoint()
    }

    pub fn heap(&self) -> &SymbolicHeap<S::Term, V> {
        &self.heap
    }

    pub fn heap_value(&self, handle: HeapHandle) -> Option<&V> {
        self.heap.get(handle)
    }

    pub fn heap_value_mut(&mut self, handle: HeapHandle) -> Option<&mut V> {
        self.heap.get_mut(handle)
    }

    pub fn add_value_to_heaps(&mut self, reference: S::Term, ty: TypeTag, value: V) -> HeapHandle {
        self.heap.add_value_to_heaps(reference, ty, value)
    }

    /// Resolve `reference` in `snapshot` (the live one if `None`).
    ///
    /// Each entry of a unifiable type is a candidate; whether the reference
    /// equals the candidate's is decided like any other branch. If no
    /// candidate matches, `generate` makes a new value, which is added to
    /// the target snapshot and every later one.
    #[track_caller]
    pub fn find_key_in_heap(
        &mut self,
        reference: &S::Term,
        ty: &TypeTag,
        generate: impl FnOnce(&TypeTag) -> V,
        snapshot: Option<SnapshotRef>,
    ) -> ExplorationResult<HeapHandle> {
        let site = Location::caller();
        let snapshot = snapshot.unwrap_or_else(|| self.heap.current_snapshot());
        let candidates: Vec<(usize, S::Term)> = self
            .heap
            .entries(snapshot)
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.ty.unifies_with(ty))
            .map(|(index, entry)| (index, entry.reference.clone()))
            .collect();
        for (index, candidate) in candidates {
            let same = self.solver.term_eq(&candidate, reference);
            if self.decide_at(&same, false, site)? {
                debug!(reference = %reference, ty = %ty, index, "heap lookup found existing");
                return Ok(HeapHandle { snapshot, index });
            }
        }
        let value = generate(ty);
        let handle = self
            .heap
            .add_value_since(snapshot, reference.clone(), ty.clone(), value);
        debug!(reference = %reference, ty = %ty, index = handle.index, "heap lookup created new");
        Ok(handle)
    }

    /// Register a check to run when the path detaches.
    pub fn defer(
        &mut self,
        description: impl Into<String>,
        check: impl FnOnce() -> Assumption<S::Bool> + 't,
    ) {
        self.deferred.push((description.into(), Box::new(check)));
    }

    /// Stop branching on this path.
    ///
    /// Grants the path [`DETACH_GRACE`] more time and runs every deferred
    /// assumption; if one fails the attempt is ignored. The space stays
    /// usable afterwards, e.g. to realize values for a counterexample.
    #[track_caller]
    pub fn detach(&mut self) -> ExplorationResult<()> {
        if self.detached {
            debug!("path is already detached");
            return Ok(());
        }
        let site = Location::caller();
        self.execution_deadline += DETACH_GRACE;
        for (description, check) in std::mem::take(&mut self.deferred) {
            let holds = match check() {
                Assumption::Concrete(holds) => holds,
                Assumption::Symbolic(expr) => self.decide_at(&expr, true, site)?,
            };
            if !holds {
                return Err(ExplorationError::IgnoreAttempt {
                    reason: format!("deferred assumption failed: {description}"),
                });
            }
        }
        let node = self.cursor();
        if !node.is_stem() {
            return Err(ExplorationError::internal(format!(
                "cannot detach at a {} node",
                node.kind_name()
            )));
        }
        self.tree.nodes.grow_detached(self.cursor);
        if let Some(core) = self.cursor().core_mut() {
            core.site = Some(site);
        }
        self.advance(true)?;
        self.detached = true;
        debug!("detached from search tree");
        Ok(())
    }

    /// Statistics of the two subtrees below the cursor.
    pub fn stats_lookahead(&self) -> ExplorationResult<(StatsCounter, StatsCounter)> {
        let nodes = &self.tree.nodes;
        match &nodes[self.cursor] {
            Node::Stem => Ok((StatsCounter::new(), StatsCounter::new())),
            Node::Binary(binary) => {
                Ok((nodes.stats(binary.positive()), nodes.stats(binary.negative())))
            }
            other => Err(ExplorationError::internal(format!(
                "stats lookahead at a {} node",
                other.kind_name()
            ))),
        }
    }

    /// End this execution with `analysis` and fold it up the tree.
    ///
    /// Returns the aggregate report of the whole tree and whether the tree
    /// is now fully explored.
    pub fn finalize(
        mut self,
        mut analysis: CallAnalysis,
    ) -> ExplorationResult<(CallAnalysis, bool)> {
        analysis
            .realized_exprs
            .extend(std::mem::take(&mut self.realized));
        let nodes = &mut self.tree.nodes;
        let cursor = self.cursor;
        if nodes[cursor].is_stem() {
            nodes.grow_leaf(cursor, analysis.clone());
        } else {
            nodes[cursor].mark_exhausted(analysis.clone());
        }
        for &id in self.choices_made.iter().rev() {
            nodes.update_result(id, &analysis);
        }
        Ok((self.tree.result(), self.tree.is_exhausted()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OpenSolver, Prop, ScriptedSolver};
    use crate::verdict::{AnalysisMessage, MessageKind, VerificationStatus};

    type Space<'t> = StateSpace<'t, ScriptedSolver, i32>;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(600)
    }

    fn space(tree: &mut SearchTree<ScriptedSolver>, solver: ScriptedSolver) -> Space<'_> {
        StateSpace::new(tree, solver, far_deadline()).unwrap()
    }

    // Replayed decisions must come from the same call site.
    fn decide(s: &mut Space<'_>, expr: &Prop, favor_true: bool) -> ExplorationResult<bool> {
        s.decide(expr, favor_true)
    }

    fn materialize(s: &mut Space<'_>, term: &str) -> ExplorationResult<Concrete> {
        s.materialize_value(&term.to_string())
    }

    #[test]
    fn test_no_decisions_exhausts_immediately() {
        let mut tree = SearchTree::default();
        let s = space(&mut tree, ScriptedSolver::new());
        let (result, exhausted) = s.finalize(CallAnalysis::confirmed()).unwrap();
        assert!(exhausted);
        assert_eq!(result.status, Some(VerificationStatus::Confirmed));
    }

    #[test]
    fn test_two_way_branch_explores_both_sides() {
        let p = Prop::var("p");
        let mut tree = SearchTree::default();
        let mut seen = Vec::new();
        for iteration in 0..2 {
            let mut s = space(&mut tree, ScriptedSolver::new());
            seen.push(s.decide(&p, false).unwrap());
            let (result, exhausted) = s.finalize(CallAnalysis::confirmed()).unwrap();
            assert_eq!(exhausted, iteration == 1);
            if iteration == 0 {
                assert_eq!(result.status, Some(VerificationStatus::Unknown));
            } else {
                assert_eq!(result.status, Some(VerificationStatus::Confirmed));
            }
        }
        seen.sort();
        assert_eq!(seen, [false, true]);
        assert_eq!(tree.stats().count(VerificationStatus::Confirmed), 2);
    }

    #[test]
    fn test_decide_asserts_chosen_literal() {
        let p = Prop::var("p");
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new().impossible(p.clone()));
        assert!(!s.decide(&p, true).unwrap());
        assert_eq!(s.solver().asserted(), [p.not()]);
    }

    #[test]
    fn test_replay_reuses_node_without_solver_checks() {
        let p = Prop::var("p");
        let mut tree = SearchTree::default();

        let first = ScriptedSolver::new();
        let first_checks = first.check_counter();
        let mut s = space(&mut tree, first);
        assert!(decide(&mut s, &p, true).unwrap());
        s.finalize(CallAnalysis::confirmed()).unwrap();
        assert_eq!(first_checks.get(), 2);

        let second = ScriptedSolver::new();
        let second_checks = second.check_counter();
        let mut s = space(&mut tree, second);
        assert!(!decide(&mut s, &p, true).unwrap());
        assert_eq!(second_checks.get(), 0);
        s.finalize(CallAnalysis::confirmed()).unwrap();
    }

    #[test]
    fn test_changed_expression_is_not_deterministic() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        decide(&mut s, &Prop::var("p"), true).unwrap();
        s.finalize(CallAnalysis::confirmed()).unwrap();

        let mut s = space(&mut tree, ScriptedSolver::new());
        let err = decide(&mut s, &Prop::var("q"), true).unwrap_err();
        assert!(!err.is_fatal());
        match err {
            ExplorationError::NotDeterministic { detail } => {
                assert!(detail.contains("changed from p to q"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_changed_kind_is_not_deterministic() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        s.fork(0.5, "strategy").unwrap();
        s.finalize(CallAnalysis::unknown()).unwrap();

        let mut s = space(&mut tree, ScriptedSolver::new());
        let err = s.decide(&Prop::var("p"), true).unwrap_err();
        assert!(matches!(err, ExplorationError::NotDeterministic { .. }));
    }

    #[test]
    fn test_changed_call_site_is_not_deterministic() {
        let p = Prop::var("p");
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        s.decide(&p, true).unwrap();
        s.finalize(CallAnalysis::unknown()).unwrap();

        let mut s = space(&mut tree, ScriptedSolver::new());
        let err = s.decide(&p, true).unwrap_err();
        match err {
            ExplorationError::NotDeterministic { detail } => {
                assert!(detail.contains("first reached from"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_deadline_is_checked_before_deciding() {
        let mut tree = SearchTree::default();
        let mut s: Space<'_> =
            StateSpace::new(&mut tree, ScriptedSolver::new(), Instant::now()).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let err = s.decide(&Prop::var("p"), false).unwrap_err();
        assert!(matches!(err, ExplorationError::PathTimeout { decisions: 0 }));
        // The tree did not grow.
        assert!(s.cursor().is_stem());
    }

    #[test]
    fn test_second_session_on_thread_is_rejected() {
        let mut first_tree = SearchTree::default();
        let mut second_tree = SearchTree::default();
        let s = space(&mut first_tree, ScriptedSolver::new());
        assert!(SessionGuard::is_active());
        assert!(matches!(
            StateSpace::<_, i32>::new(&mut second_tree, ScriptedSolver::new(), far_deadline()),
            Err(ExplorationError::SessionActive)
        ));
        drop(s);
        assert!(!SessionGuard::is_active());
        assert!(
            StateSpace::<_, i32>::new(&mut second_tree, ScriptedSolver::new(), far_deadline())
                .is_ok()
        );
    }

    #[test]
    fn test_materialize_value_enumerates_domain() {
        let mut tree = SearchTree::default();
        let mut realized = Vec::new();
        for _ in 0..10 {
            let mut s = space(&mut tree, ScriptedSolver::new().domain("x", &[0, 1, 2]));
            let value = s.materialize_value(&"x".to_string()).unwrap();
            realized.push(value.as_int().unwrap());
            let (_, exhausted) = s.finalize(CallAnalysis::confirmed()).unwrap();
            if exhausted {
                break;
            }
        }
        assert_eq!(realized, [0, 1, 2]);
        assert!(tree.is_exhausted());
        assert_eq!(tree.result().status, Some(VerificationStatus::Confirmed));
        assert!(tree.result().realized_exprs.contains("x"));
    }

    #[test]
    fn test_materialize_value_excludes_rejected_candidates() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new().domain("x", &[4, 5]));
        assert_eq!(materialize(&mut s, "x").unwrap(), Concrete::Int(4));
        s.finalize(CallAnalysis::confirmed()).unwrap();

        let mut s = space(&mut tree, ScriptedSolver::new().domain("x", &[4, 5]));
        assert_eq!(materialize(&mut s, "x").unwrap(), Concrete::Int(5));
        let asserted = s.solver().asserted().to_vec();
        assert_eq!(
            asserted,
            [Prop::Eq("x".into(), 4).not(), Prop::Eq("x".into(), 5)]
        );
        s.finalize(CallAnalysis::confirmed()).unwrap();
        assert!(tree.is_exhausted());
    }

    #[test]
    fn test_materialize_value_on_unsat_solver_is_internal() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new().domain("x", &[]));
        let err = s.materialize_value(&"x".to_string()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_heap_lookup_aliases_equal_references() {
        let a = "a".to_string();
        let b = "b".to_string();
        let mut tree = SearchTree::default();
        let solver = ScriptedSolver::new().impossible(Prop::var("a==b").not());
        let mut s = space(&mut tree, solver);
        let ha = s
            .find_key_in_heap(&a, &TypeTag::new("int"), |_| 10, None)
            .unwrap();
        let hb = s
            .find_key_in_heap(&b, &TypeTag::new("int"), |_| 20, None)
            .unwrap();
        assert_eq!(ha, hb);
        assert_eq!(s.heap_value(hb), Some(&10));
        assert_eq!(s.heap().entries(s.current_snapshot()).len(), 1);
    }

    #[test]
    fn test_heap_lookup_creates_once_and_respects_snapshots() {
        let a = "a".to_string();
        let b = "b".to_string();
        let mut tree = SearchTree::default();
        let solver = ScriptedSolver::new().impossible(Prop::var("a==b"));
        let mut s = space(&mut tree, solver);
        let initial = s.current_snapshot();
        let before = s.checkpoint();
        let ha = s
            .find_key_in_heap(&a, &TypeTag::new("int"), |_| 1, None)
            .unwrap();
        let hb = s
            .find_key_in_heap(&b, &TypeTag::new("int"), |_| 2, None)
            .unwrap();
        assert_ne!(ha, hb);
        let after = s.checkpoint();
        assert_eq!(s.heap().entries(after).len(), 2);
        assert_eq!(s.heap().entries(before).len(), 2);
        assert!(s.heap().entries(initial).is_empty());
    }

    #[test]
    fn test_heap_lookup_against_older_snapshot() {
        let a = "a".to_string();
        let int = TypeTag::new("int");
        let mut tree = SearchTree::default();
        let solver = ScriptedSolver::new().impossible(Prop::var("a==a").not());
        let mut s = space(&mut tree, solver);
        let initial = s.current_snapshot();
        let first = s.checkpoint();
        let live = s.checkpoint();

        let created = s.find_key_in_heap(&a, &int, |_| 7, Some(first)).unwrap();
        assert_eq!(created.snapshot, live);
        assert!(s.heap().entries(initial).is_empty());
        assert_eq!(s.heap().entries(first).len(), 1);
        assert_eq!(s.heap().entries(live).len(), 1);

        // The value predates the newest checkpoint, so a live lookup finds it.
        let found = s.find_key_in_heap(&a, &int, |_| 8, None).unwrap();
        assert_eq!(found, created);
        assert_eq!(s.heap_value(found), Some(&7));
        assert_eq!(s.heap().entries(live).len(), 1);
        assert_eq!(s.decisions(), 1);
    }

    #[test]
    fn test_heap_lookup_skips_non_unifiable_types() {
        let mut tree = SearchTree::default();
        let checks = {
            let solver = ScriptedSolver::new();
            let counter = solver.check_counter();
            let mut s = space(&mut tree, solver);
            s.find_key_in_heap(&"a".to_string(), &TypeTag::new("int"), |_| 1, None)
                .unwrap();
            s.find_key_in_heap(&"b".to_string(), &TypeTag::new("str"), |_| 2, None)
                .unwrap();
            counter.get()
        };
        assert_eq!(checks, 0);
    }

    #[test]
    fn test_detach_grows_detached_node_and_extends_deadline() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        let deadline = s.execution_deadline();
        s.detach().unwrap();
        assert!(s.is_detached());
        assert_eq!(s.execution_deadline(), deadline + DETACH_GRACE);
        s.detach().unwrap();
        assert_eq!(s.execution_deadline(), deadline + DETACH_GRACE);
        let (result, exhausted) = s.finalize(CallAnalysis::confirmed()).unwrap();
        assert!(exhausted);
        assert_eq!(result.status, Some(VerificationStatus::Confirmed));
        let nodes = tree.nodes();
        let child = nodes[tree.root()].child(true).unwrap();
        assert!(matches!(nodes[child], Node::Detached(_)));
    }

    #[test]
    fn test_failed_deferred_assumption_ignores_attempt() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        s.defer("always fine", || Assumption::Concrete(true));
        s.defer("list is sorted", || Assumption::Concrete(false));
        let err = s.detach().unwrap_err();
        match err {
            ExplorationError::IgnoreAttempt { reason } => {
                assert!(reason.contains("list is sorted"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!s.is_detached());
        let (result, _) = s.finalize(CallAnalysis::ignored()).unwrap();
        assert_eq!(result.status, None);
    }

    #[test]
    fn test_symbolic_deferred_assumption_is_decided() {
        let q = Prop::var("q");
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new().impossible(q.clone().not()));
        let expr = q.clone();
        s.defer("q holds", move || Assumption::Symbolic(expr));
        s.detach().unwrap();
        assert_eq!(s.solver().asserted(), [q]);
    }

    #[test]
    fn test_finalize_at_materialized_node_marks_it_exhausted() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        s.decide(&Prop::var("p"), true).unwrap();
        s.finalize(CallAnalysis::confirmed()).unwrap();

        // Replay diverges at the materialized node; the report lands there.
        let mut s = space(&mut tree, ScriptedSolver::new());
        assert!(s.decide(&Prop::var("other"), true).is_err());
        let report = CallAnalysis::refuted(AnalysisMessage::new(
            MessageKind::NotDeterministic,
            "decision expression changed",
        ));
        let (result, exhausted) = s.finalize(report).unwrap();
        assert!(exhausted);
        assert_eq!(result.status, Some(VerificationStatus::Refuted));
    }

    #[test]
    fn test_parallel_fork_adds_no_constraint() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        s.fork(0.0, "always true").unwrap();
        assert!(s.solver().asserted().is_empty());
        assert_eq!(s.stats_lookahead().unwrap(), (StatsCounter::new(), StatsCounter::new()));
    }

    #[test]
    fn test_fork_fresh_names_are_stable_across_executions() {
        let mut tree = SearchTree::default();
        let mut s = space(&mut tree, ScriptedSolver::new());
        s.fork_fresh("fork", false).unwrap();
        assert!(s.solver().asserted()[0].to_string().contains("fork_2"));
        s.finalize(CallAnalysis::unknown()).unwrap();
    }

    #[test]
    fn test_long_path_replays_and_folds() {
        const DEPTH: usize = 50_000;
        let p = Prop::var("p");
        let mut tree = SearchTree::default();
        for _ in 0..2 {
            let mut s: StateSpace<'_, OpenSolver, ()> =
                StateSpace::new(&mut tree, OpenSolver::default(), far_deadline()).unwrap();
            for _ in 0..DEPTH {
                s.decide(&p, true).unwrap();
            }
            assert_eq!(s.decisions(), DEPTH);
            assert_eq!(s.solver().asserted(), DEPTH);
            let (result, exhausted) = s.finalize(CallAnalysis::confirmed()).unwrap();
            assert!(!exhausted);
            assert_eq!(result.status, Some(VerificationStatus::Unknown));
        }
        assert_eq!(tree.stats().count(VerificationStatus::Confirmed), 2);
        // The root and its stem, then two children under every decision.
        assert_eq!(tree.nodes().len(), 2 + 2 * DEPTH);
        drop(tree);
    }
}
