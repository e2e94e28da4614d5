//! # Pattern Matcher
//!
//! Conjunctive matching over a `FactStore`.
//!
//! Pattern lists are joined left to right by nested loops: each pattern is
//! substituted with the binding so far and probed against the store's
//! indices. Bindings come out in a deterministic order (the order of the
//! join), with duplicates removed keeping the first occurrence.
//!
//! Every function here has a `horizon`-bounded form used by the watch engine
//! to ask "did this hold before quad N was stored?".

use crate::pattern::{Binding, Pattern};
use crate::query::Query;
use crate::store::FactStore;
use std::collections::BTreeSet;
use std::ops::ControlFlow;

/// All bindings of a single pattern.
#[must_use]
pub fn match_one<S: FactStore + ?Sized>(store: &S, pattern: &Pattern) -> Vec<Binding> {
    match_all(store, std::slice::from_ref(pattern))
}

/// All bindings that satisfy every pattern in the list.
///
/// An empty list matches once, with the empty binding.
#[must_use]
pub fn match_all<S: FactStore + ?Sized>(store: &S, patterns: &[Pattern]) -> Vec<Binding> {
    let patterns: Vec<&Pattern> = patterns.iter().collect();
    let mut out = Vec::new();
    join(store, &patterns, &Binding::new(), store.len(), &mut out);
    dedupe(out)
}

/// Drop bindings under which the NAC list matches.
///
/// An empty NAC list removes nothing.
#[must_use]
pub fn apply_nac<S: FactStore + ?Sized>(
    store: &S,
    bindings: Vec<Binding>,
    nac: &[Pattern],
) -> Vec<Binding> {
    bindings
        .into_iter()
        .filter(|binding| !blocked(store, nac, binding))
        .collect()
}

/// Whether the pattern list has at least one match.
#[must_use]
pub fn exists<S: FactStore + ?Sized>(store: &S, patterns: &[Pattern]) -> bool {
    holds(store, patterns, &Binding::new(), store.len())
}

/// Evaluate a query: positive join, then NAC filter.
#[must_use]
pub fn query<S: FactStore + ?Sized>(store: &S, query: &Query) -> Vec<Binding> {
    apply_nac(store, match_all(store, &query.patterns), &query.nac)
}

// =============================================================================
// JOIN PRIMITIVES
// =============================================================================

/// Extend `seed` through every pattern, collecting complete bindings.
///
/// Only quads below `horizon` are visible. Output is not deduplicated.
pub(crate) fn join<S: FactStore + ?Sized>(
    store: &S,
    patterns: &[&Pattern],
    seed: &Binding,
    horizon: usize,
    out: &mut Vec<Binding>,
) {
    let _ = extend(store, patterns, seed, horizon, &mut |binding| {
        out.push(binding);
        ControlFlow::Continue(())
    });
}

/// Whether the list has a match extending `seed` below `horizon`.
pub(crate) fn holds<S: FactStore + ?Sized>(
    store: &S,
    patterns: &[Pattern],
    seed: &Binding,
    horizon: usize,
) -> bool {
    let patterns: Vec<&Pattern> = patterns.iter().collect();
    extend(store, &patterns, seed, horizon, &mut |_| ControlFlow::Break(())).is_break()
}

/// Whether a non-empty NAC list matches under `binding` in the current store.
pub(crate) fn blocked<S: FactStore + ?Sized>(
    store: &S,
    nac: &[Pattern],
    binding: &Binding,
) -> bool {
    !nac.is_empty() && holds(store, nac, binding, store.len())
}

fn extend<S: FactStore + ?Sized>(
    store: &S,
    patterns: &[&Pattern],
    binding: &Binding,
    horizon: usize,
    visit: &mut dyn FnMut(Binding) -> ControlFlow<()>,
) -> ControlFlow<()> {
    let Some((first, rest)) = patterns.split_first() else {
        return visit(binding.clone());
    };

    let probe = first.substitute(binding);
    for quad in store.candidates(&probe, horizon) {
        if let Some(next) = probe.bind(quad, binding) {
            extend(store, rest, &next, horizon, visit)?;
        }
    }
    ControlFlow::Continue(())
}

/// Remove duplicate bindings, keeping first occurrences in order.
pub(crate) fn dedupe(bindings: Vec<Binding>) -> Vec<Binding> {
    let mut seen = BTreeSet::new();
    bindings
        .into_iter()
        .filter(|binding| seen.insert(binding.clone()))
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================
