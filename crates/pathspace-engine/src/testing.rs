//! A scripted solver for unit tests that need to control or count solver answers.

use pathspace_solver::{Concrete, ConstraintSolver, SatResult};
use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Prop {
    Var(String),
    Not(Box<Prop>),
    Eq(String, i64),
}

impl Prop {
    pub(crate) fn var(name: &str) -> Self {
        Prop::Var(name.to_string())
    }

    pub(crate) fn not(self) -> Self {
        match self {
            Prop::Not(inner) => *inner,
            other => Prop::Not(Box::new(other)),
        }
    }
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::Var(name) => f.write_str(name),
            Prop::Not(inner) => write!(f, "(not {inner})"),
            Prop::Eq(term, value) => write!(f, "(= {term} {value})"),
        }
    }
}

/// Answers `Unsat` for any query containing an impossible proposition, a
/// proposition together with its negation, or a variable pinned outside its
/// domain. Everything else is `Sat`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSolver {
    asserted: Vec<Prop>,
    impossible: HashSet<Prop>,
    undecidable: HashSet<Prop>,
    domains: BTreeMap<String, Vec<i64>>,
    checks: Rc<Cell<usize>>,
}

impl ScriptedSolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn impossible(mut self, prop: Prop) -> Self {
        self.impossible.insert(prop);
        self
    }

    pub(crate) fn undecidable(mut self, prop: Prop) -> Self {
        self.undecidable.insert(prop);
        self
    }

    pub(crate) fn domain(mut self, term: &str, values: &[i64]) -> Self {
        self.domains.insert(term.to_string(), values.to_vec());
        self
    }

    /// Shared handle on the number of `check` calls made so far.
    pub(crate) fn check_counter(&self) -> Rc<Cell<usize>> {
        self.checks.clone()
    }

    pub(crate) fn asserted(&self) -> &[Prop] {
        &self.asserted
    }

    fn remaining(&self, term: &str, props: &[&Prop]) -> Option<Vec<i64>> {
        let domain = self.domains.get(term)?;
        let pinned: Vec<i64> = props
            .iter()
            .filter_map(|p| match p {
                Prop::Eq(t, v) if t == term => Some(*v),
                _ => None,
            })
            .collect();
        Some(
            domain
                .iter()
                .copied()
                .filter(|v| pinned.iter().all(|p| p == v))
                .filter(|v| !props.contains(&&Prop::Eq(term.to_string(), *v).not()))
                .collect(),
        )
    }
}

impl ConstraintSolver for ScriptedSolver {
    type Bool = Prop;
    type Term = String;
    type Value = i64;

    fn assert(&mut self, constraint: &Prop) {
        self.asserted.push(constraint.clone());
    }

    fn check(&mut self, assumptions: &[Prop]) -> SatResult {
        self.checks.set(self.checks.get() + 1);
        let props: Vec<&Prop> = self.asserted.iter().chain(assumptions).collect();
        if props.iter().any(|p| self.undecidable.contains(*p)) {
            return SatResult::Unknown;
        }
        if props.iter().any(|p| self.impossible.contains(*p)) {
            return SatResult::Unsat;
        }
        if props.iter().any(|p| props.contains(&&(*p).clone().not())) {
            return SatResult::Unsat;
        }
        for term in self.domains.keys() {
            if self.remaining(term, &props).is_some_and(|r| r.is_empty()) {
                return SatResult::Unsat;
            }
        }
        SatResult::Sat
    }

    fn model_value(&mut self, term: &String) -> Option<i64> {
        let props: Vec<&Prop> = self.asserted.iter().collect();
        self.remaining(term, &props)?.first().copied()
    }

    fn negate(&self, constraint: &Prop) -> Prop {
        constraint.clone().not()
    }

    fn value_eq(&self, term: &String, value: &i64) -> Prop {
        Prop::Eq(term.clone(), *value)
    }

    fn term_eq(&self, left: &String, right: &String) -> Prop {
        Prop::Var(format!("{left}=={right}"))
    }

    fn named_bool(&mut self, name: &str) -> Prop {
        Prop::var(name)
    }

    fn is_constant(&self, _term: &String) -> bool {
        true
    }

    fn concretize(&self, value: &i64) -> Concrete {
        Concrete::Int(*value)
    }

    fn dump(&self) -> String {
        self.asserted
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Answers `Sat` to every query in constant time, for paths too long for
/// [`ScriptedSolver`]'s scans.
#[derive(Debug, Default)]
pub(crate) struct OpenSolver {
    asserted: usize,
}

impl OpenSolver {
    pub(crate) fn asserted(&self) -> usize {
        self.asserted
    }
}

impl ConstraintSolver for OpenSolver {
    type Bool = Prop;
    type Term = String;
    type Value = i64;

    fn assert(&mut self, _constraint: &Prop) {
        self.asserted += 1;
    }

    fn check(&mut self, _assumptions: &[Prop]) -> SatResult {
        SatResult::Sat
    }

    fn model_value(&mut self, _term: &String) -> Option<i64> {
        Some(0)
    }

    fn negate(&self, constraint: &Prop) -> Prop {
        constraint.clone().not()
    }

    fn value_eq(&self, term: &String, value: &i64) -> Prop {
        Prop::Eq(term.clone(), *value)
    }

    fn term_eq(&self, left: &String, right: &String) -> Prop {
        Prop::Var(format!("{left}=={right}"))
    }

    fn named_bool(&mut self, name: &str) -> Prop {
        Prop::var(name)
    }

    fn is_constant(&self, _term: &String) -> bool {
        true
    }

    fn concretize(&self, value: &i64) -> Concrete {
        Concrete::Int(*value)
    }

    fn dump(&self) -> String {
        format!("{} assertions", self.asserted)
    }
}
