//! # Watch Engine
//!
//! Standing queries that fire a callback once per new binding.
//!
//! When a quad is stored at position `p`, each candidate watch computes its
//! delta: bindings of its pattern list that use the new quad and did not
//! hold over the quads below `p`. For every pattern the quad satisfies, the
//! quad seeds a binding and the remaining patterns are joined over the store
//! up to and including `p`. A candidate is dropped when the full list already
//! held before `p`, or when the watch's NAC matches the current store.
//!
//! Watches are kept in registration order and indexed by the constant
//! attributes of their patterns, so a quad only visits watches that could
//! possibly use it.

use crate::graph::Graph;
use crate::matcher::{blocked, holds, join};
use crate::pattern::{Binding, Pattern};
use crate::query::Query;
use crate::store::FactStore;
use crate::{GraphError, Quad, Term, WatchId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// A watch callback. It receives the graph mutably so it can add facts.
pub type WatchCallback = Rc<dyn Fn(&mut Graph, &Binding) -> Result<(), GraphError>>;

/// Returned by `Graph::watch`; pass it to `Graph::unwatch` to stop the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use = "a watch handle is the only way to remove the watch"]
pub struct WatchHandle(pub(crate) WatchId);

impl WatchHandle {
    #[must_use]
    pub fn id(&self) -> WatchId {
        self.0
    }
}

pub(crate) struct Watch {
    pub(crate) query: Query,
    pub(crate) callback: WatchCallback,
    /// Store length at registration; earlier quads never trigger this watch.
    pub(crate) registered_at: usize,
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
pub(crate) struct WatchRegistry {
    next_id: u64,
    watches: BTreeMap<WatchId, Watch>,
    /// Constant attribute -> watches with a pattern on that attribute.
    by_attribute: BTreeMap<Term, BTreeSet<WatchId>>,
    /// Watches with a pattern whose attribute is not constant.
    unkeyed: BTreeSet<WatchId>,
}

impl WatchRegistry {
    pub(crate) fn register(
        &mut self,
        query: Query,
        callback: WatchCallback,
        registered_at: usize,
    ) -> WatchId {
        let id = WatchId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        for pattern in &query.patterns {
            match pattern.attribute.as_constant() {
                Some(attribute) => {
                    self.by_attribute
                        .entry(attribute.clone())
                        .or_default()
                        .insert(id);
                }
                None => {
                    self.unkeyed.insert(id);
                }
            }
        }

        self.watches.insert(
            id,
            Watch {
                query,
                callback,
                registered_at,
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: WatchId) -> bool {
        let Some(watch) = self.watches.remove(&id) else {
            return false;
        };
        for pattern in &watch.query.patterns {
            if let Some(attribute) = pattern.attribute.as_constant() {
                if let Some(ids) = self.by_attribute.get_mut(attribute) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_attribute.remove(attribute);
                    }
                }
            }
        }
        self.unkeyed.remove(&id);
        true
    }

    pub(crate) fn get(&self, id: WatchId) -> Option<&Watch> {
        self.watches.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.watches.len()
    }

    /// Watches with at least one pattern accepting the quad, in
    /// registration order.
    pub(crate) fn candidates(&self, quad: &Quad) -> Vec<WatchId> {
        let keyed = self
            .by_attribute
            .get(quad.attribute())
            .into_iter()
            .flatten();
        let ids: BTreeSet<WatchId> = keyed.chain(self.unkeyed.iter()).copied().collect();
        ids.into_iter()
            .filter(|id| {
                self.watches.get(id).is_some_and(|watch| {
                    watch.query.patterns.iter().any(|pattern| pattern.accepts(quad))
                })
            })
            .collect()
    }
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watches", &self.watches.len())
            .field("keyed_attributes", &self.by_attribute.len())
            .field("unkeyed", &self.unkeyed.len())
            .finish()
    }
}

// =============================================================================
// DELTA
// =============================================================================

/// New bindings of `query` caused by the quad stored at `position`.
///
/// Each returned binding uses the quad, held in no state before it, and is
/// not blocked by the NAC in the current store.
pub(crate) fn delta<S: FactStore + ?Sized>(
    store: &S,
    query: &Query,
    quad: &Quad,
    position: usize,
) -> Vec<Binding> {
    let mut seen = BTreeSet::new();
    let mut fresh = Vec::new();

    for (index, pattern) in query.patterns.iter().enumerate() {
        let Some(seed) = pattern.bind(quad, &Binding::new()) else {
            continue;
        };
        let rest: Vec<&Pattern> = query
            .patterns
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != index)
            .map(|(_, pattern)| pattern)
            .collect();

        let mut candidates = Vec::new();
        join(store, &rest, &seed, position + 1, &mut candidates);

        for binding in candidates {
            if !seen.insert(binding.clone()) {
                continue;
            }
            if holds(store, &query.patterns, &binding, position) {
                continue;
            }
            if blocked(store, &query.nac, &binding) {
                continue;
            }
            fresh.push(binding);
        }
    }

    fresh
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QuadStore;

    fn noop() -> WatchCallback {
        Rc::new(|_: &mut Graph, _: &Binding| Ok::<(), GraphError>(()))
    }

    fn stored(quads: &[Quad]) -> QuadStore {
        let mut store = QuadStore::new();
        for quad in quads {
            store.insert(quad.clone());
        }
        store
    }

    #[test]
    fn registry_indexes_by_attribute() {
        let mut registry = WatchRegistry::default();
        let age = registry.register(
            Query::new(vec![Pattern::new("?p", "age", "?a", "*")]),
            noop(),
            0,
        );
        let open = registry.register(
            Query::new(vec![Pattern::new("?p", "?attr", "?v", "*")]),
            noop(),
            0,
        );

        assert_eq!(
            registry.candidates(&Quad::new("alice", "age", 30, "c")),
            vec![age, open]
        );
        assert_eq!(
            registry.candidates(&Quad::new("alice", "name", "A", "c")),
            vec![open]
        );
    }

    #[test]
    fn registry_remove() {
        let mut registry = WatchRegistry::default();
        let id = registry.register(
            Query::new(vec![Pattern::new("?p", "age", "?a", "*")]),
            noop(),
            0,
        );
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.len(), 0);
        assert!(registry
            .candidates(&Quad::new("alice", "age", 30, "c"))
            .is_empty());
    }

    #[test]
    fn delta_seeds_from_new_quad() {
        let name = Quad::new("alice", "name", "Alice", "c");
        let age = Quad::new("alice", "age", 30, "c");
        let store = stored(&[name, age.clone()]);
        let query = Query::new(vec![
            Pattern::new("?p", "name", "?n", "*"),
            Pattern::new("?p", "age", "?a", "*"),
        ]);

        let fresh = delta(&store, &query, &age, 1);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].get("n"), Some(&Term::word("Alice")));
    }

    #[test]
    fn delta_ignores_bindings_that_already_held() {
        let first = Quad::new("alice", "knows", "bob", "c1");
        let second = Quad::new("alice", "knows", "bob", "c2");
        let store = stored(&[first, second.clone()]);
        let query = Query::new(vec![Pattern::new("?x", "knows", "?y", "*")]);

        assert!(delta(&store, &query, &second, 1).is_empty());
    }

    #[test]
    fn delta_respects_nac() {
        let age = Quad::new("alice", "age", 30, "c");
        let store = stored(&[Quad::new("alice", "retired", true, "c"), age.clone()]);
        let query = Query::new(vec![Pattern::new("?p", "age", "?a", "*")])
            .with_nac(vec![Pattern::new("?p", "retired", true, "*")]);

        assert!(delta(&store, &query, &age, 1).is_empty());
    }

    #[test]
    fn delta_self_join_counts_once() {
        let edge = Quad::new("a", "link", "a", "c");
        let store = stored(&[edge.clone()]);
        let query = Query::new(vec![
            Pattern::new("?x", "link", "?y", "*"),
            Pattern::new("?y", "link", "?z", "*"),
        ]);

        assert_eq!(delta(&store, &query, &edge, 0).len(), 1);
    }
}
