//! Property tests over randomly generated capability DAGs.
//!
//! Each case builds a layered DAG of capability sets (node i may only extend
//! nodes built before it, mirroring the construction rule of the engine) and
//! checks the structural invariants of every resulting resolution order.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use crest_core::{CapabilityDef, SpecGraph, SpecId};

/// Per-node base picks: each inner vec selects (by index) among the
/// previously built capability sets.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<prop::sample::Index>>> {
    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..24)
}

/// Build the DAG, skipping nodes whose base combination produces a genuine
/// order conflict (the engine reports those rather than resolving them).
fn build(graph: &mut SpecGraph, picks: &[Vec<prop::sample::Index>]) -> Vec<SpecId> {
    let mut built: Vec<SpecId> = Vec::new();
    for (i, node_picks) in picks.iter().enumerate() {
        let mut bases: Vec<SpecId> = Vec::new();
        if !built.is_empty() {
            for pick in node_picks {
                let base = built[pick.index(built.len())];
                if !bases.contains(&base) {
                    bases.push(base);
                }
            }
        }
        let def = CapabilityDef::new(format!("C{i}"), "prop").with_bases(bases.iter().copied());
        if let Ok(id) = graph.create_capability(def) {
            built.push(id);
        }
    }
    built
}

proptest! {
    #[test]
    fn orders_end_with_the_root(picks in dag_strategy()) {
        let mut graph = SpecGraph::new();
        let built = build(&mut graph, &picks);
        let root = graph.root();
        for id in built {
            let order = graph.resolution_order(id).unwrap();
            prop_assert_eq!(order.last(), Some(&root));
            prop_assert_eq!(order.first(), Some(&id));
        }
    }

    #[test]
    fn implied_set_matches_order(picks in dag_strategy()) {
        let mut graph = SpecGraph::new();
        let built = build(&mut graph, &picks);
        for id in built {
            let order = graph.resolution_order(id).unwrap();
            let implied = graph.implied_set(id).unwrap();
            prop_assert_eq!(order.len(), implied.len(), "order has duplicates");
            for member in order {
                prop_assert!(implied.contains(member));
            }
        }
        if let Err(violations) = graph.verify_invariants() {
            return Err(TestCaseError::fail(violations.join("; ")));
        }
    }

    #[test]
    fn orders_are_monotonic_over_bases(picks in dag_strategy()) {
        let mut graph = SpecGraph::new();
        let built = build(&mut graph, &picks);
        for id in built {
            let order = graph.resolution_order(id).unwrap().to_vec();
            let position = |x: SpecId| order.iter().position(|y| *y == x);
            for base in graph.bases(id).unwrap().to_vec() {
                let base_order = graph.resolution_order(base).unwrap();
                let mut last = None;
                for member in base_order {
                    let Some(pos) = position(*member) else {
                        return Err(TestCaseError::fail(format!(
                            "{} missing from the order of its dependent",
                            graph.describe(*member)
                        )));
                    };
                    if let Some(prev) = last {
                        prop_assert!(pos > prev, "base order not preserved");
                    }
                    last = Some(pos);
                }
            }
        }
    }

    #[test]
    fn local_precedence_of_direct_bases(picks in dag_strategy()) {
        let mut graph = SpecGraph::new();
        let built = build(&mut graph, &picks);
        for id in built {
            let order = graph.resolution_order(id).unwrap().to_vec();
            let mut last = None;
            for base in graph.bases(id).unwrap().to_vec() {
                let pos = order.iter().position(|y| *y == base).unwrap();
                if let Some(prev) = last {
                    prop_assert!(pos > prev, "declared base order not preserved");
                }
                last = Some(pos);
            }
        }
    }

    #[test]
    fn compositions_share_their_capability_closure(picks in dag_strategy()) {
        let mut graph = SpecGraph::new();
        let built = build(&mut graph, &picks);
        if built.is_empty() {
            return Ok(());
        }
        // A plain composition over every built capability implies exactly
        // the union of their implied sets.
        if let Ok(node) = graph.create_composition("everything", &built) {
            for id in &built {
                let order = graph.resolution_order(*id).unwrap().to_vec();
                for member in order {
                    prop_assert!(graph.is_or_extends(node, member).unwrap());
                }
            }
            let order = graph.resolution_order(node).unwrap();
            prop_assert!(!order.contains(&node));
        }
    }
}
