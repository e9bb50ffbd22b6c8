//! Combining reports from sibling subtrees.

use crate::node::Node;
use crate::verdict::CallAnalysis;
use pathspace_solver::ConstraintSolver;

/// Merge two reports from different branches of the same decision.
///
/// A side without a status is ignored. Otherwise the worse status wins,
/// messages are concatenated left then right, and the failing precondition
/// comes from whichever side has one (the left side's if it sits on a later
/// line, the right side's otherwise).
pub fn merge_analyses(left: CallAnalysis, right: CallAnalysis) -> CallAnalysis {
    let (left_status, right_status) = match (left.status, right.status) {
        (None, _) => return right,
        (_, None) => return left,
        (Some(l), Some(r)) => (l, r),
    };
    let take_left_precondition = match (&left.failing_precondition, &right.failing_precondition) {
        (Some(lc), Some(rc)) => lc.line > rc.line,
        (Some(_), None) => true,
        _ => false,
    };
    let CallAnalysis {
        mut messages,
        failing_precondition: left_precondition,
        failing_precondition_reason: left_reason,
        mut realized_exprs,
        ..
    } = left;
    let CallAnalysis {
        messages: right_messages,
        failing_precondition: right_precondition,
        failing_precondition_reason: right_reason,
        realized_exprs: right_realized,
        ..
    } = right;
    messages.extend(right_messages);
    realized_exprs.extend(right_realized);
    let (failing_precondition, failing_precondition_reason) = if take_left_precondition {
        (left_precondition, left_reason)
    } else {
        (right_precondition, right_reason)
    };
    CallAnalysis {
        status: Some(left_status.min(right_status)),
        messages,
        failing_precondition,
        failing_precondition_reason,
        realized_exprs,
    }
}

/// Merge `left` with the report of `node`.
///
/// The merged report is fully explored only if the caller says so and `node`
/// itself is exhausted.
pub fn merge_node_results<S: ConstraintSolver>(
    left: CallAnalysis,
    exhausted: bool,
    node: &Node<S>,
) -> (CallAnalysis, bool) {
    let exhausted = exhausted && node.is_exhausted();
    (merge_analyses(left, node.result()), exhausted)
}
