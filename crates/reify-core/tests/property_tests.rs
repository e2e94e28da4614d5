//! # Property-Based Tests
//!
//! Determinism and correctness invariants checked with proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use reify_core::{
    AggregationDefinitions, Binding, FactStore, Graph, Pattern, Quad, QuadStore, Query, Term,
    current_results, current_value, install_aggregation, match_all,
};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

// =============================================================================
// STRATEGIES
// =============================================================================

/// Small alphabet so joins actually meet.
fn quad_strategy() -> impl Strategy<Value = Quad> {
    (0u8..5, 0u8..2, 0u8..5, 0u8..2).prop_map(|(e, a, v, c)| {
        Quad::new(
            format!("n{}", e),
            ["p", "q"][a as usize],
            format!("n{}", v),
            format!("c{}", c),
        )
    })
}

fn quads_strategy() -> impl Strategy<Value = Vec<Quad>> {
    vec(quad_strategy(), 0..40)
}

fn store_of(quads: &[Quad]) -> QuadStore {
    let mut store = QuadStore::new();
    for quad in quads {
        store.insert(quad.clone());
    }
    store
}

fn path_patterns() -> Vec<Pattern> {
    vec![
        Pattern::new("?x", "p", "?y", "*"),
        Pattern::new("?y", "p", "?z", "*"),
    ]
}

fn triple(binding: &Binding) -> Option<(Term, Term, Term)> {
    Some((
        binding.get("x")?.clone(),
        binding.get("y")?.clone(),
        binding.get("z")?.clone(),
    ))
}

/// Nested-loop reference for `path_patterns`.
fn brute_force_paths(quads: &[Quad]) -> BTreeSet<(Term, Term, Term)> {
    let p = Term::word("p");
    let mut out = BTreeSet::new();
    for first in quads.iter().filter(|q| q.attribute() == &p) {
        for second in quads.iter().filter(|q| q.attribute() == &p) {
            if first.value() == second.entity() {
                out.insert((
                    first.entity().clone(),
                    first.value().clone(),
                    second.value().clone(),
                ));
            }
        }
    }
    out
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Re-adding every quad leaves cardinality and checksum unchanged.
    #[test]
    fn idempotent_insert(quads in quads_strategy()) {
        let mut graph = Graph::new();
        for quad in &quads {
            graph.insert(quad.clone()).expect("insert");
        }
        let len = graph.len();
        let checksum = graph.store().checksum();

        for quad in &quads {
            graph.insert(quad.clone()).expect("insert");
        }
        prop_assert_eq!(graph.len(), len);
        prop_assert_eq!(graph.store().checksum(), checksum);

        let distinct: BTreeSet<_> = quads.iter().map(Quad::id).collect();
        prop_assert_eq!(len, distinct.len());
    }

    /// The checksum depends on the set of quads, not the insertion order.
    #[test]
    fn checksum_is_order_independent(quads in quads_strategy()) {
        let forward = store_of(&quads);
        let reversed: Vec<Quad> = quads.iter().rev().cloned().collect();
        let backward = store_of(&reversed);
        prop_assert_eq!(forward.checksum(), backward.checksum());
    }

    /// Same insertions give the same bindings in the same order.
    #[test]
    fn matching_is_deterministic(quads in quads_strategy()) {
        let a = store_of(&quads);
        let b = store_of(&quads);
        prop_assert_eq!(match_all(&a, &path_patterns()), match_all(&b, &path_patterns()));
    }

    /// The indexed join agrees with a nested-loop join over all quads.
    #[test]
    fn join_matches_brute_force(quads in quads_strategy()) {
        let store = store_of(&quads);
        let bindings = match_all(&store, &path_patterns());
        let found: BTreeSet<_> = bindings.iter().filter_map(triple).collect();

        prop_assert_eq!(found.len(), bindings.len());
        prop_assert_eq!(found, brute_force_paths(&quads));
    }

    /// A NAC only removes bindings, and only those it matches.
    #[test]
    fn nac_partitions_bindings(quads in quads_strategy()) {
        let mut graph = Graph::new();
        for quad in &quads {
            graph.insert(quad.clone()).expect("insert");
        }
        let positive = graph.query(Pattern::new("?x", "p", "?y", "*"));
        let nac = vec![Pattern::new("?y", "q", "*", "*")];
        let filtered = graph.query(
            Query::new(vec![Pattern::new("?x", "p", "?y", "*")]).with_nac(nac.clone()),
        );

        for binding in &positive {
            let blocked = !graph.query(Query::new(
                nac.iter().map(|pattern| pattern.substitute(binding)).collect(),
            )).is_empty();
            prop_assert_eq!(filtered.contains(binding), !blocked);
        }
        prop_assert!(filtered.len() <= positive.len());
    }

    /// A watch registered on an empty graph sees every final binding exactly once.
    #[test]
    fn watch_fires_exactly_the_final_bindings(quads in quads_strategy()) {
        let mut graph = Graph::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _handle = graph.watch(path_patterns(), move |_: &mut Graph, binding: &Binding| {
            sink.borrow_mut().push(binding.clone());
            Ok(())
        });

        for quad in &quads {
            graph.insert(quad.clone()).expect("insert");
        }

        let fired = seen.borrow().clone();
        let unique: BTreeSet<_> = fired.iter().cloned().collect();
        prop_assert_eq!(unique.len(), fired.len());

        let expected: BTreeSet<_> = graph.query(path_patterns()).into_iter().collect();
        prop_assert_eq!(unique, expected);
    }

    /// SUM over distinct items is the current value, with one current result.
    #[test]
    fn sum_tracks_distinct_items(items in vec(0i32..20, 1..20)) {
        let mut graph = Graph::new();
        let _handle = install_aggregation(
            &mut graph,
            &AggregationDefinitions::standard(),
            &Term::word("sys"),
        ).expect("install");
        graph.add("total", "AGGREGATE", "SUM", "stats").expect("declare");

        for item in &items {
            graph.add("total", "ITEM", *item, "*").expect("item");
        }

        let distinct: BTreeSet<i32> = items.iter().copied().collect();
        let expected: i32 = distinct.iter().sum();
        let agg = Term::word("total");
        prop_assert_eq!(current_results(&graph, &agg).len(), 1);
        prop_assert_eq!(current_value(&graph, &agg), Some(Term::from(expected)));
    }
}
