//! # Graph Engine
//!
//! The fact store plus its standing queries.
//!
//! `Graph` owns a `QuadStore`, the watch registry, and the queue of effect
//! executions still in flight. `add` stores a quad and propagates it to every
//! watch synchronously: callbacks run before `add` returns and may add facts
//! themselves, which propagate depth-first in the same way.
//!
//! A callback failure never stops propagation. Every candidate watch gets its
//! turn; failures are collected and reported together once the quad has
//! been fully propagated. Writers that must store a group of facts use
//! `insert_all`, which stores the whole group before reporting failures.

use crate::matcher;
use crate::pattern::Binding;
use crate::productions::effect::{self, PendingEffect};
use crate::query::Query;
use crate::store::{FactStore, QuadStore};
use crate::watch::{WatchHandle, WatchRegistry, delta};
use crate::{GraphError, Quad, QuadId, Term};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Summary counters of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GraphStats {
    pub quads: usize,
    pub entities: usize,
    pub attributes: usize,
    pub contexts: usize,
    pub watches: usize,
    pub pending_effects: usize,
}

/// The main Graph structure.
#[derive(Default)]
pub struct Graph {
    store: QuadStore,
    watches: WatchRegistry,
    pending: Vec<PendingEffect>,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // FACTS
    // =========================================================================

    /// Store `(entity, attribute, value, context)` and propagate it.
    ///
    /// Adding a quad that is already stored changes nothing and fires no
    /// watch. On `GraphError::Propagation` the quad is stored regardless.
    pub fn add(
        &mut self,
        entity: impl Into<Term>,
        attribute: impl Into<Term>,
        value: impl Into<Term>,
        context: impl Into<Term>,
    ) -> Result<Quad, GraphError> {
        self.insert(Quad::new(entity, attribute, value, context))
    }

    /// Store an already-built quad and propagate it.
    pub fn insert(&mut self, quad: Quad) -> Result<Quad, GraphError> {
        let Some(position) = self.store.insert(quad.clone()) else {
            trace!(quad = %quad, "duplicate quad ignored");
            return Ok(quad);
        };
        trace!(quad = %quad, position, "quad stored");
        self.propagate(&quad, position)?;
        Ok(quad)
    }

    /// Store every quad in order, even when propagating one of them fails.
    ///
    /// The callback failures of all quads are merged into one
    /// `GraphError::Propagation` naming the first quad that failed.
    pub fn insert_all(
        &mut self,
        quads: impl IntoIterator<Item = Quad>,
    ) -> Result<(), GraphError> {
        let mut failures = Failures::default();
        for quad in quads {
            failures.absorb(self.insert(quad))?;
        }
        failures.finish()
    }

    fn propagate(&mut self, quad: &Quad, position: usize) -> Result<(), GraphError> {
        let mut failures = Vec::new();

        for id in self.watches.candidates(quad) {
            // Re-read each time: an earlier callback may have removed this watch.
            let (bindings, nac, callback) = match self.watches.get(id) {
                Some(watch) if watch.registered_at <= position => (
                    delta(&self.store, &watch.query, quad, position),
                    watch.query.nac.clone(),
                    Rc::clone(&watch.callback),
                ),
                _ => continue,
            };

            for binding in bindings {
                // Earlier callbacks of this wave may have written a NAC match.
                if matcher::blocked(&self.store, &nac, &binding) {
                    trace!(watch = %id, binding = %binding, "binding blocked mid-wave");
                    continue;
                }
                trace!(watch = %id, binding = %binding, "watch fired");
                if let Err(source) = callback(self, &binding) {
                    warn!(watch = %id, quad = %quad, error = %source, "watch callback failed");
                    failures.push(GraphError::Callback {
                        watch: id,
                        source: Box::new(source),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GraphError::Propagation {
                quad: quad.id(),
                failures,
            })
        }
    }

    /// Whether the exact quad is stored.
    #[must_use]
    pub fn has(&self, quad: &Quad) -> bool {
        self.store.contains(quad.id())
    }

    /// Whether a quad with this identity is stored.
    #[must_use]
    pub fn contains(&self, id: QuadId) -> bool {
        self.store.contains(id)
    }

    /// Read-only access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &QuadStore {
        &self.store
    }

    /// All quads in insertion order.
    pub fn quads(&self) -> impl Iterator<Item = &Quad> {
        self.store.quads()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    // =========================================================================
    // QUERIES AND WATCHES
    // =========================================================================

    /// Evaluate a query against the current store.
    #[must_use]
    pub fn query(&self, query: impl Into<Query>) -> Vec<Binding> {
        matcher::query(&self.store, &query.into())
    }

    /// Register a standing query.
    ///
    /// The callback runs once for each new binding produced by a quad stored
    /// after this call. Quads already stored do not fire it.
    pub fn watch<F>(&mut self, query: impl Into<Query>, callback: F) -> WatchHandle
    where
        F: Fn(&mut Graph, &Binding) -> Result<(), GraphError> + 'static,
    {
        let query = query.into();
        debug!(query = %query, "watch registered");
        let id = self
            .watches
            .register(query, Rc::new(callback), self.store.len());
        WatchHandle(id)
    }

    /// Remove a watch. Returns `false` if it was already removed.
    pub fn unwatch(&mut self, handle: WatchHandle) -> bool {
        let removed = self.watches.remove(handle.id());
        if removed {
            debug!(watch = %handle.id(), "watch removed");
        }
        removed
    }

    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            quads: self.store.len(),
            entities: self.store.entity_count(),
            attributes: self.store.attribute_count(),
            contexts: self.store.context_count(),
            watches: self.watches.len(),
            pending_effects: self.pending.len(),
        }
    }

    // =========================================================================
    // ASYNC EFFECTS
    // =========================================================================

    pub(crate) fn defer(&mut self, effect: PendingEffect) {
        self.pending.push(effect);
    }

    /// Number of effect executions awaiting `settle`.
    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.pending.len()
    }

    /// Drive every pending effect to completion and record its outcome.
    ///
    /// Pending effects are awaited concurrently in batches. Recording an
    /// outcome may trigger further effects; those join the next batch, and
    /// `settle` returns only when the queue is empty. Returns the number of
    /// effects settled.
    ///
    /// If recording outcomes made callbacks fail, all outcomes are still
    /// recorded and the first failure is returned.
    pub async fn settle(&mut self) -> Result<usize, GraphError> {
        let mut settled = 0usize;
        let mut first_failure = None;

        loop {
            let batch = std::mem::take(&mut self.pending);
            if batch.is_empty() {
                break;
            }
            debug!(count = batch.len(), "settling effect batch");

            for outcome in join_all(batch.into_iter().map(PendingEffect::resolve)).await {
                settled += 1;
                if let Err(err) = effect::record(self, outcome) {
                    warn!(error = %err, "recording effect outcome failed");
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(settled),
        }
    }
}

/// Callback failures collected across a group of writes.
#[derive(Debug, Default)]
pub(crate) struct Failures {
    quad: Option<QuadId>,
    failures: Vec<GraphError>,
}

impl Failures {
    /// Keep `Propagation` failures for later and pass the value through.
    /// Any other error is returned at once.
    pub(crate) fn absorb<T>(
        &mut self,
        result: Result<T, GraphError>,
    ) -> Result<Option<T>, GraphError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(GraphError::Propagation { quad, failures }) => {
                self.quad.get_or_insert(quad);
                self.failures.extend(failures);
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    pub(crate) fn finish(self) -> Result<(), GraphError> {
        match self.quad {
            Some(quad) => Err(GraphError::Propagation {
                quad,
                failures: self.failures,
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("store", &self.store)
            .field("watches", &self.watches)
            .field("pending", &self.pending.len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use std::cell::{Cell, RefCell};

    type Seen = Rc<RefCell<Vec<Binding>>>;

    fn recorder() -> (
        Seen,
        impl Fn(&mut Graph, &Binding) -> Result<(), GraphError>,
    ) {
        let seen: Seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let callback = move |_: &mut Graph, binding: &Binding| {
            sink.borrow_mut().push(binding.clone());
            Ok::<(), GraphError>(())
        };
        (seen, callback)
    }

    #[test]
    fn add_is_idempotent() {
        let mut graph = Graph::new();
        let quad = graph.add("alice", "age", 30, "ctx").expect("add");
        graph.add("alice", "age", 30, "ctx").expect("add again");
        assert_eq!(graph.len(), 1);
        assert!(graph.has(&quad));
    }

    #[test]
    fn watch_fires_once_per_new_binding() {
        let mut graph = Graph::new();
        let (seen, callback) = recorder();
        let _handle = graph.watch(
            vec![
                Pattern::new("?p", "name", "?n", "*"),
                Pattern::new("?p", "age", "?a", "*"),
            ],
            callback,
        );

        graph.add("alice", "name", "Alice", "c").expect("add");
        assert!(seen.borrow().is_empty());

        graph.add("alice", "age", 30, "c").expect("add");
        assert_eq!(seen.borrow().len(), 1);

        // Duplicate add fires nothing.
        graph.add("alice", "age", 30, "c").expect("add");
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn watch_ignores_facts_stored_before_registration() {
        let mut graph = Graph::new();
        graph.add("alice", "age", 30, "c").expect("add");

        let (seen, callback) = recorder();
        let _handle = graph.watch(Pattern::new("?p", "age", "?a", "*"), callback);
        assert!(seen.borrow().is_empty());

        graph.add("bob", "age", 25, "c").expect("add");
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn unwatch_stops_callbacks() {
        let mut graph = Graph::new();
        let (seen, callback) = recorder();
        let handle = graph.watch(Pattern::new("?p", "age", "?a", "*"), callback);

        assert!(graph.unwatch(handle));
        assert!(!graph.unwatch(handle));
        graph.add("alice", "age", 30, "c").expect("add");
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn callbacks_can_add_facts() {
        let mut graph = Graph::new();
        let _handle = graph.watch(
            Pattern::new("?x", "parent", "?y", "*"),
            |graph: &mut Graph, binding: &Binding| {
                if let (Some(x), Some(y)) = (binding.get("x"), binding.get("y")) {
                    graph.add(y.clone(), "child", x.clone(), "derived")?;
                }
                Ok(())
            },
        );

        graph.add("alice", "parent", "bob", "c").expect("add");
        assert!(graph.has(&Quad::new("bob", "child", "alice", "derived")));
    }

    #[test]
    fn callback_failure_does_not_stop_other_watches() {
        let mut graph = Graph::new();
        let _failing = graph.watch(
            Pattern::new("?p", "age", "?a", "*"),
            |_: &mut Graph, _: &Binding| Err(GraphError::Definition("boom".to_string())),
        );
        let (seen, callback) = recorder();
        let _ok = graph.watch(Pattern::new("?p", "age", "?a", "*"), callback);

        let result = graph.add("alice", "age", 30, "c");
        assert!(matches!(
            result,
            Err(GraphError::Propagation { ref failures, .. }) if failures.len() == 1
        ));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn stats_count_everything() {
        let mut graph = Graph::new();
        graph.add("a", "p", 1, "c1").expect("add");
        graph.add("b", "q", 2, "c2").expect("add");
        let _handle = graph.watch(
            Pattern::new("?x", "p", "*", "*"),
            |_: &mut Graph, _: &Binding| Ok(()),
        );

        let stats = graph.stats();
        assert_eq!(stats.quads, 2);
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.contexts, 2);
        assert_eq!(stats.watches, 1);
        assert_eq!(stats.pending_effects, 0);
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn logger(
        log: &Log,
        label: &'static str,
    ) -> impl Fn(&mut Graph, &Binding) -> Result<(), GraphError> + 'static {
        let log = Rc::clone(log);
        move |_: &mut Graph, _: &Binding| {
            log.borrow_mut().push(label.to_string());
            Ok(())
        }
    }

    #[test]
    fn watches_fire_in_registration_order() {
        let mut graph = Graph::new();
        let log = Log::default();
        let _first = graph.watch(Pattern::new("?x", "age", "?a", "*"), logger(&log, "first"));
        let _second = graph.watch(Pattern::new("?x", "?attr", "?v", "*"), logger(&log, "second"));
        let _third = graph.watch(Pattern::new("alice", "age", "?a", "*"), logger(&log, "third"));

        graph.add("alice", "age", 30, "c").expect("add");
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn nested_adds_propagate_depth_first() {
        let mut graph = Graph::new();
        let log = Log::default();
        let _derive = graph.watch(Pattern::new("?x", "parent", "?y", "*"), {
            let log = Rc::clone(&log);
            move |graph: &mut Graph, binding: &Binding| {
                log.borrow_mut().push("derive".to_string());
                if let (Some(x), Some(y)) = (binding.get("x"), binding.get("y")) {
                    graph.add(y.clone(), "child", x.clone(), "derived")?;
                }
                Ok(())
            }
        });
        let _child = graph.watch(Pattern::new("?c", "child", "?p", "*"), logger(&log, "child"));
        let _after = graph.watch(Pattern::new("?x", "parent", "?y", "*"), logger(&log, "after"));

        graph.add("alice", "parent", "bob", "c").expect("add");
        assert_eq!(*log.borrow(), vec!["derive", "child", "after"]);
    }

    #[test]
    fn cascade_reaches_fixpoint_before_add_returns() {
        let mut graph = Graph::new();
        let _countdown = graph.watch(
            Pattern::new("s", "count", "?n", "*"),
            |graph: &mut Graph, binding: &Binding| {
                if let Some(n) = binding.get("n").and_then(Term::as_number).filter(|n| *n > 0.0) {
                    graph.add("s", "count", n - 1.0, "c")?;
                }
                Ok(())
            },
        );

        graph.add("s", "count", 5, "c").expect("add");
        assert_eq!(graph.len(), 6);
        assert!(graph.has(&Quad::new("s", "count", 0, "c")));
    }

    #[test]
    fn watch_registered_mid_wave_skips_triggering_quad() {
        let mut graph = Graph::new();
        let log = Log::default();
        let registered = Rc::new(Cell::new(false));
        let _registrar = graph.watch(Pattern::new("?x", "age", "?a", "*"), {
            let log = Rc::clone(&log);
            move |graph: &mut Graph, _: &Binding| {
                if !registered.replace(true) {
                    let _late =
                        graph.watch(Pattern::new("?x", "age", "?a", "*"), logger(&log, "late"));
                }
                Ok(())
            }
        });

        graph.add("alice", "age", 30, "c").expect("add");
        assert!(log.borrow().is_empty());
        assert_eq!(graph.watch_count(), 2);

        graph.add("bob", "age", 25, "c").expect("add");
        assert_eq!(*log.borrow(), vec!["late"]);
    }

    #[test]
    fn watch_removed_mid_wave_stops_at_once() {
        let mut graph = Graph::new();
        let log = Log::default();
        let victim: Rc<Cell<Option<WatchHandle>>> = Rc::new(Cell::new(None));
        let _remover = graph.watch(Pattern::new("?x", "age", "?a", "*"), {
            let victim = Rc::clone(&victim);
            move |graph: &mut Graph, _: &Binding| {
                if let Some(handle) = victim.take() {
                    graph.unwatch(handle);
                }
                Ok(())
            }
        });
        victim.set(Some(graph.watch(
            Pattern::new("?x", "age", "?a", "*"),
            logger(&log, "victim"),
        )));

        graph.add("alice", "age", 30, "c").expect("add");
        assert!(log.borrow().is_empty());
        assert_eq!(graph.watch_count(), 1);
    }

    #[test]
    fn nac_is_rechecked_before_each_binding() {
        let mut graph = Graph::new();
        graph.add("a", "knows", "b", "c").expect("add");
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let _claim = graph.watch(
            Query::new(vec![
                Pattern::new("?x", "knows", "?y", "*"),
                Pattern::new("?u", "knows", "?v", "*"),
            ])
            .with_nac(vec![Pattern::new("pair", "claimed", "*", "*")]),
            move |graph: &mut Graph, binding: &Binding| {
                counter.set(counter.get() + 1);
                if let Some(x) = binding.get("x") {
                    graph.add("pair", "claimed", x.clone(), "c")?;
                }
                Ok(())
            },
        );

        // The new quad yields three bindings; the first one's claim blocks the rest.
        graph.add("d", "knows", "e", "c").expect("add");
        assert_eq!(fired.get(), 1);
        assert_eq!(graph.query(Pattern::new("pair", "claimed", "?x", "*")).len(), 1);
    }

    #[test]
    fn insert_all_stores_every_quad_despite_failures() {
        let mut graph = Graph::new();
        let _failing = graph.watch(
            Pattern::new("?x", "p", "*", "*"),
            |_: &mut Graph, _: &Binding| Err(GraphError::Definition("boom".to_string())),
        );

        let result = graph.insert_all([
            Quad::new("a", "p", 1, "c"),
            Quad::new("b", "p", 2, "c"),
            Quad::new("c", "q", 3, "c"),
        ]);
        assert!(matches!(
            result,
            Err(GraphError::Propagation { quad, ref failures })
                if quad == Quad::new("a", "p", 1, "c").id() && failures.len() == 2
        ));
        assert_eq!(graph.len(), 3);
    }
}
