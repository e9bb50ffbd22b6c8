//! Constraint-solving capability consumed by the pathspace exploration engine.
//!
//! The engine never builds solver expressions on its own. Everything it needs
//! from a solver (satisfiability under assumptions, one model value for a
//! term, negation and equality literals) goes through [`ConstraintSolver`],
//! and the expressions themselves are stored opaquely.

#[cfg(feature = "z3")]
pub mod z3_backend;

#[cfg(feature = "z3")]
pub use z3_backend::Z3Backend;

use std::fmt;

/// Answer of a satisfiability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// The solver gave up (timeout, incompleteness). Callers must surface this
    /// rather than read it as either of the decisive answers.
    Unknown,
}

impl fmt::Display for SatResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SatResult::Sat => write!(f, "sat"),
            SatResult::Unsat => write!(f, "unsat"),
            SatResult::Unknown => write!(f, "unknown"),
        }
    }
}

/// A concrete value read back out of a satisfying model.
#[derive(Debug, Clone, PartialEq)]
pub enum Concrete {
    Bool(bool),
    Int(i64),
    Real(f64),
    /// A sequence, in element order.
    Seq(Vec<Concrete>),
    /// Any model value without a native representation, kept as solver text.
    Other(String),
}

impl Concrete {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Concrete::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Concrete::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Concrete]> {
        match self {
            Concrete::Seq(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Concrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concrete::Bool(b) => write!(f, "{b}"),
            Concrete::Int(n) => write!(f, "{n}"),
            Concrete::Real(r) => write!(f, "{r}"),
            Concrete::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Concrete::Other(s) => f.write_str(s),
        }
    }
}

/// An incremental solver holding an accumulating set of asserted constraints.
///
/// `Bool` is the solver's boolean expression type, `Term` any expression the
/// engine may ask a value for (including heap references), and `Value` a
/// model value that can be compared back against a `Term`.
pub trait ConstraintSolver {
    type Bool: Clone + PartialEq + fmt::Debug + fmt::Display;
    type Term: Clone + PartialEq + fmt::Debug + fmt::Display;
    type Value: Clone + PartialEq + fmt::Debug + fmt::Display;

    /// Add a constraint for the rest of this solver's lifetime.
    fn assert(&mut self, constraint: &Self::Bool);

    /// Check satisfiability of the asserted constraints together with
    /// `assumptions`, without committing to the assumptions.
    fn check(&mut self, assumptions: &[Self::Bool]) -> SatResult;

    /// Value of `term` in the model of the last `Sat` check.
    fn model_value(&mut self, term: &Self::Term) -> Option<Self::Value>;

    fn negate(&self, constraint: &Self::Bool) -> Self::Bool;

    /// The literal `term == value`.
    fn value_eq(&self, term: &Self::Term, value: &Self::Value) -> Self::Bool;

    /// The literal `left == right`.
    fn term_eq(&self, left: &Self::Term, right: &Self::Term) -> Self::Bool;

    /// A boolean constant with the given name. Equal names give structurally
    /// equal expressions.
    fn named_bool(&mut self, name: &str) -> Self::Bool;

    /// Whether `term` is an uninterpreted constant (a plain symbolic input).
    fn is_constant(&self, term: &Self::Term) -> bool;

    fn concretize(&self, value: &Self::Value) -> Concrete;

    /// Human-readable dump of the asserted constraints, for diagnostics.
    fn dump(&self) -> String;
}
