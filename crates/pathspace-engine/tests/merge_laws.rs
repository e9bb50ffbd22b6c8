//! Property: the verdict order is a total order and report merging behaves
//! like a meet on it.

use pathspace_engine::{
    merge_analyses, AnalysisMessage, CallAnalysis, MessageKind, Precondition, VerificationStatus,
};
use proptest::prelude::*;

fn status() -> impl Strategy<Value = VerificationStatus> {
    prop::sample::select(VerificationStatus::ALL.to_vec())
}

fn analysis() -> impl Strategy<Value = CallAnalysis> {
    (
        prop::option::of(status()),
        prop::collection::vec("[a-z]{1,8}", 0..3),
        prop::option::of(1u32..200),
    )
        .prop_map(|(status, messages, precondition_line)| {
            let mut analysis = CallAnalysis {
                status,
                ..CallAnalysis::default()
            };
            for text in messages {
                analysis = analysis.with_message(AnalysisMessage::new(MessageKind::PostFail, text));
            }
            if let Some(line) = precondition_line {
                analysis = analysis.with_failing_precondition(
                    Precondition::new("x > 0", "module.rs", line),
                    format!("line {line}"),
                );
            }
            analysis
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn verdict_order_is_total_and_transitive(a in status(), b in status(), c in status()) {
        prop_assert!(a <= b || b <= a);
        if a <= b && b <= c {
            prop_assert!(a <= c);
        }
        prop_assert!(VerificationStatus::Refuted < VerificationStatus::Unknown);
        prop_assert!(VerificationStatus::Unknown < VerificationStatus::Confirmed);
    }

    #[test]
    fn merge_is_idempotent_on_status(x in analysis()) {
        let merged = merge_analyses(x.clone(), x.clone());
        prop_assert_eq!(merged.status, x.status);
    }

    #[test]
    fn merge_takes_the_worse_status(left in analysis(), right in analysis()) {
        let merged = merge_analyses(left.clone(), right.clone());
        match (left.status, right.status) {
            (None, _) => prop_assert_eq!(merged, right),
            (_, None) => prop_assert_eq!(merged, left),
            (Some(l), Some(r)) => {
                prop_assert_eq!(merged.status, Some(l.min(r)));
                let expected: Vec<_> = left.messages.iter().chain(&right.messages).cloned().collect();
                prop_assert_eq!(merged.messages, expected);
            }
        }
    }

    #[test]
    fn merge_status_is_commutative(left in analysis(), right in analysis()) {
        let forward = merge_analyses(left.clone(), right.clone());
        let backward = merge_analyses(right, left);
        prop_assert_eq!(forward.status, backward.status);
    }

    #[test]
    fn merge_keeps_some_failing_precondition(left in analysis(), right in analysis()) {
        let merged = merge_analyses(left.clone(), right.clone());
        let either = left.failing_precondition.is_some() || right.failing_precondition.is_some();
        if left.status.is_some() && right.status.is_some() {
            prop_assert_eq!(merged.failing_precondition.is_some(), either);
        }
    }
}
