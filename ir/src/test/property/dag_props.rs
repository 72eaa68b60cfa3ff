//! Properties of DAG validation and the access analyzer.

use proptest::prelude::*;

use super::generators::*;
use crate::{ComputeDag, Error};

// ============================================================================
// Validation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Producers-first graphs are accepted.
    #[test]
    fn generated_graphs_validate(ops in arb_chain()) {
        let n = ops.len();
        let dag = ComputeDag::new(ops).unwrap();
        prop_assert_eq!(dag.ops().len(), n);
    }

    /// Listing the last compute before its producers is rejected.
    #[test]
    fn reversed_graphs_rejected(ops in arb_chain()) {
        let reversed: Vec<_> = ops.into_iter().rev().collect();
        let err = ComputeDag::new(reversed).unwrap_err();
        prop_assert!(matches!(err, Error::NotTopological { .. }), "{:?}", err);
    }
}

// ============================================================================
// Access Analysis
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// `consumers` and `producers` describe the same edges.
    #[test]
    fn consumers_mirror_producers(ops in arb_chain()) {
        let dag = ComputeDag::new(ops).unwrap();
        let analyzer = dag.analyzer();
        for id in 0..analyzer.len() {
            for c in analyzer.consumers(id) {
                prop_assert!(c > id);
                prop_assert!(analyzer.producers(c).contains(&id));
            }
            for p in analyzer.producers(id) {
                prop_assert!(analyzer.consumers(p).contains(&id));
            }
        }
    }

    /// Every compute without consumers is an output and placeholders never are.
    #[test]
    fn outputs_are_sinks(ops in arb_chain()) {
        let dag = ComputeDag::new(ops).unwrap();
        let analyzer = dag.analyzer();
        prop_assert!(!analyzer.is_output(0));
        prop_assert!(analyzer.is_output(analyzer.len() - 1));
        for id in 1..analyzer.len() {
            prop_assert_eq!(analyzer.is_output(id), analyzer.consumers(id).is_empty());
        }
    }

    /// A stage always matches itself, and a reducing stage is never strictly
    /// inlineable.
    #[test]
    fn inlining_excludes_reductions(ops in arb_chain()) {
        let dag = ComputeDag::new(ops).unwrap();
        let analyzer = dag.analyzer();
        for id in 0..analyzer.len() {
            prop_assert!(analyzer.elementwise_match(id, id));
            if analyzer.op(id).has_reduce() {
                prop_assert!(!analyzer.is_strict_inlineable(id));
            }
        }
    }
}
