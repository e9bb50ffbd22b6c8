//! Built-in instrumented properties.
//!
//! Each demo stands in for a function under test plus its contract, written
//! directly against the session primitives: branches go through `decide`,
//! the postcondition is a decision whose false side is a counterexample.

use pathspace_engine::{
    AnalysisMessage, Assumption, CallAnalysis, ExplorationReport, ExplorationResult, Explorer,
    MessageKind, PathError, StateSpace, TypeTag,
};
use pathspace_solver::Z3Backend;
use std::cell::Cell;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use z3::ast::{Ast, Bool, Dynamic, Int};

type Space<'t, V> = StateSpace<'t, Z3Backend, V>;

pub struct Demo {
    pub name: &'static str,
    pub description: &'static str,
    pub run: fn(&mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport>,
}

pub static DEMOS: &[Demo] = &[
    Demo {
        name: "abs",
        description: "abs(x) >= 0",
        run: abs,
    },
    Demo {
        name: "shifted-abs",
        description: "x + 5 >= 0 unless x < -5 (wrong for x < -5)",
        run: shifted_abs,
    },
    Demo {
        name: "division",
        description: "x / y != 0 implies x != 0, with y unconstrained",
        run: division,
    },
    Demo {
        name: "wall-clock",
        description: "branches on the current time",
        run: wall_clock,
    },
    Demo {
        name: "small-range",
        description: "realizes every x in 0..3",
        run: small_range,
    },
    Demo {
        name: "aliasing",
        description: "two list references may name the same list",
        run: aliasing,
    },
    Demo {
        name: "racing",
        description: "races a giving-up strategy against the real one",
        run: racing,
    },
    Demo {
        name: "deferred",
        description: "detaches with a deferred assumption, then realizes x",
        run: deferred,
    },
];

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|demo| demo.name == name)
}

fn solver(timeout: Duration) -> Z3Backend {
    Z3Backend::new(Some(timeout))
}

fn postcondition<V: Clone>(
    space: &mut Space<'_, V>,
    holds: &Bool,
    call: &str,
) -> Result<CallAnalysis, PathError> {
    if space.decide(holds, true)? {
        Ok(CallAnalysis::confirmed())
    } else {
        Ok(CallAnalysis::refuted(AnalysisMessage::new(
            MessageKind::PostFail,
            format!("false when calling {call}"),
        )))
    }
}

fn abs(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let x = Int::new_const("x");
    let zero = Int::from_i64(0);
    explorer.run(solver, |space: &mut Space<'_, ()>| {
        let result = if space.decide(&x.lt(&zero), false)? {
            x.unary_minus()
        } else {
            x.clone()
        };
        postcondition(space, &result.ge(&zero), "abs(x)")
    })
}

fn shifted_abs(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let x = Int::new_const("x");
    let zero = Int::from_i64(0);
    explorer.run(solver, |space: &mut Space<'_, ()>| {
        let result = if space.decide(&x.lt(&Int::from_i64(-5)), false)? {
            x.clone()
        } else {
            Int::add(&[x.clone(), Int::from_i64(5)])
        };
        if space.decide(&result.ge(&zero), true)? {
            return Ok(CallAnalysis::confirmed());
        }
        let witness = space.materialize_value(&Dynamic::from_ast(&x))?;
        Ok(CallAnalysis::refuted(AnalysisMessage::new(
            MessageKind::PostFail,
            format!("false when calling shifted_abs(x = {witness})"),
        )))
    })
}

fn division(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let x = Int::new_const("x");
    let y = Int::new_const("y");
    let zero = Int::from_i64(0);
    explorer.run(solver, |space: &mut Space<'_, ()>| {
        if space.decide(&y.eq(&zero), false)? {
            return Err(PathError::raised("ZeroDivisionError", "division by zero"));
        }
        let quotient = x.div(&y);
        if space.decide(&quotient.eq(&zero).not(), false)? {
            postcondition(space, &x.eq(&zero).not(), "quotient(x, y)")
        } else {
            Ok(CallAnalysis::confirmed())
        }
    })
}

fn wall_clock(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let x = Int::new_const("x");
    explorer.run(solver, |space: &mut Space<'_, ()>| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.subsec_nanos());
        let threshold = Int::from_i64(i64::from(nanos));
        space.decide(&x.gt(&threshold), false)?;
        Ok(CallAnalysis::confirmed())
    })
}

fn small_range(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let x = Int::new_const("x");
    let term = Dynamic::from_ast(&x);
    explorer.run(solver, |space: &mut Space<'_, ()>| {
        space.assert(&x.ge(&Int::from_i64(0)));
        space.assert(&x.lt(&Int::from_i64(3)));
        let value = space.materialize_value(&term)?;
        match value.as_int() {
            Some(n) if (0..3).contains(&n) => Ok(CallAnalysis::confirmed()),
            _ => Ok(CallAnalysis::refuted(AnalysisMessage::new(
                MessageKind::PostFail,
                format!("realized x = {value} outside 0..3"),
            ))),
        }
    })
}

fn aliasing(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let a = Dynamic::from_ast(&Int::new_const("a"));
    let b = Dynamic::from_ast(&Int::new_const("b"));
    let list = TypeTag::generic("list", vec![TypeTag::new("int")]);
    explorer.run(solver, |space: &mut Space<'_, Vec<i64>>| {
        let before = space.current_snapshot();
        space.checkpoint();
        let first = space.find_key_in_heap(&a, &list, |_| Vec::new(), None)?;
        let second = space.find_key_in_heap(&b, &list, |_| Vec::new(), None)?;
        if let Some(values) = space.heap_value_mut(first) {
            values.push(1);
        }
        let seen = space.heap_value(second).map_or(0, Vec::len);
        // Values created after a checkpoint are absent from older snapshots.
        let hidden = space.heap().entries(before).is_empty();
        // Appending through `a` is visible through `b` exactly when they alias.
        let aliased = first == second;
        if (seen == 1) == aliased && hidden {
            Ok(CallAnalysis::confirmed())
        } else {
            Ok(CallAnalysis::refuted(AnalysisMessage::new(
                MessageKind::PostFail,
                format!("aliased = {aliased}, but b has {seen} items"),
            )))
        }
    })
}

fn racing(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let x = Int::new_const("x");
    let zero = Int::from_i64(0);
    explorer.run(solver, |space: &mut Space<'_, ()>| {
        if space.fork(0.0, "give up first")? {
            return Ok(CallAnalysis::unknown());
        }
        let result = if space.decide(&x.lt(&zero), false)? {
            x.unary_minus()
        } else {
            x.clone()
        };
        postcondition(space, &result.ge(&zero), "abs(x)")
    })
}

fn deferred(explorer: &mut Explorer<Z3Backend>) -> ExplorationResult<ExplorationReport> {
    let x = Int::new_const("x");
    let term = Dynamic::from_ast(&x);
    let detached_paths = Cell::new(0);
    let report = explorer.run(solver, |space: &mut Space<'_, ()>| {
        let big = space.decide(&x.gt(&Int::from_i64(100)), false)?;
        let even = x.modulo(&Int::from_i64(2)).eq(&Int::from_i64(0));
        space.defer("x is even", move || Assumption::Symbolic(even));
        space.detach()?;
        detached_paths.set(detached_paths.get() + 1);
        let witness = space.materialize_value(&term)?;
        if big {
            Ok(CallAnalysis::refuted(AnalysisMessage::new(
                MessageKind::PostFail,
                format!("false when calling halve(x = {witness})"),
            )))
        } else {
            Ok(CallAnalysis::confirmed())
        }
    })?;
    tracing::debug!(detached_paths = detached_paths.get(), "deferred demo finished");
    Ok(report)
}
