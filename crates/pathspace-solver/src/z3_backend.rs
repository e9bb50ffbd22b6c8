//! Z3 implementation of [`ConstraintSolver`].

use crate::{Concrete, ConstraintSolver, SatResult};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use z3::ast::{Ast, Bool, Dynamic};
use z3::{DeclKind, Params, Solver, SortKind};

/// Fixed seed so that repeated iterations over the same constraints get the
/// same models back.
const SOLVER_SEED: u32 = 42;

/// A Z3 solver configured for replayable exploration.
pub struct Z3Backend {
    solver: Solver,
}

impl Z3Backend {
    /// Create a solver whose individual checks give up after `timeout`.
    pub fn new(timeout: Option<Duration>) -> Self {
        let solver = Solver::new();
        let mut params = Params::new();
        if let Some(timeout) = timeout {
            let ms = timeout.as_millis().clamp(1, u32::MAX as u128) as u32;
            params.set_u32("timeout", ms);
        }
        params.set_u32("random_seed", SOLVER_SEED);
        solver.set_params(&params);
        Self { solver }
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }
}

impl Default for Z3Backend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for Z3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Z3Backend").finish_non_exhaustive()
    }
}

impl ConstraintSolver for Z3Backend {
    type Bool = Bool;
    type Term = Dynamic;
    type Value = Dynamic;

    fn assert(&mut self, constraint: &Bool) {
        self.solver.assert(constraint);
    }

    fn check(&mut self, assumptions: &[Bool]) -> SatResult {
        let result = if assumptions.is_empty() {
            self.solver.check()
        } else {
            self.solver.check_assumptions(assumptions)
        };
        match result {
            z3::SatResult::Sat => SatResult::Sat,
            z3::SatResult::Unsat => SatResult::Unsat,
            z3::SatResult::Unknown => {
                debug!(reason = ?self.solver.get_reason_unknown(), "z3 returned unknown");
                SatResult::Unknown
            }
        }
    }

    fn model_value(&mut self, term: &Dynamic) -> Option<Dynamic> {
        self.solver.get_model()?.eval(term, true)
    }

    fn negate(&self, constraint: &Bool) -> Bool {
        constraint.not()
    }

    fn value_eq(&self, term: &Dynamic, value: &Dynamic) -> Bool {
        term.eq(value)
    }

    fn term_eq(&self, left: &Dynamic, right: &Dynamic) -> Bool {
        left.eq(right)
    }

    fn named_bool(&mut self, name: &str) -> Bool {
        Bool::new_const(name)
    }

    fn is_constant(&self, term: &Dynamic) -> bool {
        term.is_const()
    }

    fn concretize(&self, value: &Dynamic) -> Concrete {
        if let Some(items) = sequence_items(value) {
            return Concrete::Seq(items.iter().map(|item| self.concretize(item)).collect());
        }
        if let Some(b) = value.as_bool().and_then(|b| b.as_bool()) {
            return Concrete::Bool(b);
        }
        if let Some(n) = value.as_int().and_then(|i| i.as_i64()) {
            return Concrete::Int(n);
        }
        let text = value.to_string();
        if value.as_real().is_some() {
            if let Some(r) = parse_real(&text) {
                return Concrete::Real(r);
            }
        }
        Concrete::Other(text)
    }

    fn dump(&self) -> String {
        self.solver.to_string()
    }
}

/// Flatten a sequence model value built from `seq.empty`, `seq.unit` and
/// `seq.++` into its elements. `None` for anything else, including sequences
/// the model leaves in another shape.
fn sequence_items(value: &Dynamic) -> Option<Vec<Dynamic>> {
    if value.sort_kind() != SortKind::Seq {
        return None;
    }
    let decl = value.safe_decl().ok()?;
    match decl.kind() {
        DeclKind::SEQ_EMPTY => Some(Vec::new()),
        DeclKind::SEQ_UNIT => Some(value.children()),
        DeclKind::SEQ_CONCAT => {
            let mut items = Vec::new();
            for part in value.children() {
                items.extend(sequence_items(&part)?);
            }
            Some(items)
        }
        _ => None,
    }
}

/// Parse Z3's printed real numerals: `2.5`, `1/3`, `(- 1.0)`, `(/ 1.0 3.0)`.
fn parse_real(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(r) = text.parse::<f64>() {
        return Some(r);
    }
    if let Some((num, den)) = text.split_once('/') {
        if !text.starts_with('(') {
            return Some(num.trim().parse::<f64>().ok()? / den.trim().parse::<f64>().ok()?);
        }
    }
    let inner = text.strip_prefix('(')?.strip_suffix(')')?.trim();
    if let Some(rest) = inner.strip_prefix("- ") {
        return parse_real(rest).map(|r| -r);
    }
    let rest = inner.strip_prefix("/ ")?;
    let (num, den) = split_operands(rest)?;
    Some(parse_real(num)? / parse_real(den)?)
}

/// Split `a b` where either operand may itself be parenthesized.
fn split_operands(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ' ' if depth == 0 => return Some((&text[..i], text[i + 1..].trim())),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::ast::{Int, Seq};

    #[test]
    fn test_parse_real_forms() {
        assert_eq!(parse_real("2.5"), Some(2.5));
        assert_eq!(parse_real("1/4"), Some(0.25));
        assert_eq!(parse_real("(- 2.0)"), Some(-2.0));
        assert_eq!(parse_real("(/ 1.0 4.0)"), Some(0.25));
        assert_eq!(parse_real("(/ (- 1.0) 2.0)"), Some(-0.5));
        assert_eq!(parse_real("x"), None);
    }

    #[test]
    fn test_check_with_assumptions_does_not_commit() {
        let mut backend = Z3Backend::new(Some(Duration::from_secs(5)));
        let x = Int::new_const("x");
        let zero = Int::from_i64(0);
        backend.assert(&x.gt(&zero));
        let negative = x.lt(&zero);
        assert_eq!(backend.check(&[negative.clone()]), SatResult::Unsat);
        assert_eq!(backend.check(&[backend.negate(&negative)]), SatResult::Sat);
        assert_eq!(backend.check(&[]), SatResult::Sat);
    }

    #[test]
    fn test_model_value_concretizes() {
        let mut backend = Z3Backend::default();
        let x = Int::new_const("x");
        backend.assert(&x.eq(&Int::from_i64(41)));
        assert_eq!(backend.check(&[]), SatResult::Sat);
        let term = Dynamic::from_ast(&x);
        let value = backend.model_value(&term).unwrap();
        assert_eq!(backend.concretize(&value), Concrete::Int(41));
        assert!(backend.is_constant(&term));
    }

    #[test]
    fn test_sequence_model_values_concretize_elementwise() {
        let mut backend = Z3Backend::default();
        let xs = Seq::new_const("xs", &z3::Sort::int());
        let expected = Seq::concat(&[
            Seq::unit(&Int::from_i64(3)),
            Seq::unit(&Int::from_i64(-1)),
            Seq::unit(&Int::from_i64(4)),
        ]);
        backend.assert(&xs.eq(&expected));
        assert_eq!(backend.check(&[]), SatResult::Sat);
        let value = backend.model_value(&Dynamic::from_ast(&xs)).unwrap();
        let concrete = backend.concretize(&value);
        assert_eq!(
            concrete,
            Concrete::Seq(vec![Concrete::Int(3), Concrete::Int(-1), Concrete::Int(4)])
        );
        assert_eq!(concrete.to_string(), "[3, -1, 4]");
    }

    #[test]
    fn test_empty_sequence_concretizes() {
        let mut backend = Z3Backend::default();
        let xs = Seq::new_const("xs", &z3::Sort::int());
        backend.assert(&xs.length().eq(&Int::from_i64(0)));
        assert_eq!(backend.check(&[]), SatResult::Sat);
        let value = backend.model_value(&Dynamic::from_ast(&xs)).unwrap();
        assert_eq!(backend.concretize(&value), Concrete::Seq(vec![]));
    }

    #[test]
    fn test_named_bools_are_structurally_equal() {
        let mut backend = Z3Backend::default();
        assert_eq!(backend.named_bool("fork_2"), backend.named_bool("fork_2"));
        assert_ne!(backend.named_bool("fork_2"), backend.named_bool("fork_3"));
    }
}
