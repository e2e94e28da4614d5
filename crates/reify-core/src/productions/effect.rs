//! # Effects
//!
//! Named side effects requested by facts.
//!
//! ```text
//! (job EFFECT LOG ctx) (job INPUT "hello" *)
//!   =>  (job RESULT "hello" ctx) (job STATUS SUCCESS ctx)
//! ```
//!
//! A failing effect writes `(job ERROR "message" ctx)` and
//! `(job STATUS ERROR ctx)` instead; failures are data and never surface as
//! errors of `add`.
//!
//! An effect may finish synchronously or hand back a future. Futures are
//! queued on the graph and driven by `Graph::settle`, which records their
//! outcome the same way. The CORE never spawns tasks or owns a runtime.

use crate::graph::{Failures, Graph};
use crate::pattern::{Binding, Pattern};
use crate::primitives::{
    EFFECT, EFFECT_TYPE, ERROR, INPUT, RESULT, STATUS, STATUS_ERROR, STATUS_SUCCESS,
};
use crate::productions::describe::{declare_type, describe};
use crate::query::Query;
use crate::watch::WatchHandle;
use crate::{EffectError, GraphError, Quad, Term};
use futures::future::LocalBoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

/// What an effect hands back.
pub enum EffectOutcome {
    /// Finished during `execute`.
    Ready(Result<Term, EffectError>),
    /// Finishes when the future resolves; recorded by `Graph::settle`.
    Pending(LocalBoxFuture<'static, Result<Term, EffectError>>),
}

impl EffectOutcome {
    #[must_use]
    pub fn success(result: impl Into<Term>) -> Self {
        Self::Ready(Ok(result.into()))
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Ready(Err(EffectError::new(message)))
    }

    #[must_use]
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<Term, EffectError>> + 'static,
    {
        Self::Pending(Box::pin(future))
    }
}

impl fmt::Debug for EffectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// A named side effect.
pub trait Effect {
    fn execute(&self, input: &Term) -> EffectOutcome;
}

impl<F> Effect for F
where
    F: Fn(&Term) -> EffectOutcome,
{
    fn execute(&self, input: &Term) -> EffectOutcome {
        self(input)
    }
}

// =============================================================================
// DEFINITIONS
// =============================================================================

/// A named effect with its description.
#[derive(Clone)]
pub struct EffectDefinition {
    pub docs: String,
    pub category: String,
    pub effect: Rc<dyn Effect>,
}

/// Registry of effects, keyed by upper-cased name.
#[derive(Clone, Default)]
pub struct EffectDefinitions {
    definitions: BTreeMap<String, EffectDefinition>,
}

impl EffectDefinitions {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `LOG` (emits a tracing event) and `ECHO`; both return their input.
    #[must_use]
    pub fn standard() -> Self {
        let mut defs = Self::new();
        defs.define("LOG", "log the input and return it", "io", |input: &Term| {
            info!(target: "reify::effect", input = %input, "LOG");
            EffectOutcome::success(input)
        });
        defs.define("ECHO", "return the input unchanged", "debug", |input: &Term| {
            EffectOutcome::success(input)
        });
        defs
    }

    /// Add or replace a definition.
    pub fn define(
        &mut self,
        name: &str,
        docs: &str,
        category: &str,
        effect: impl Effect + 'static,
    ) {
        self.definitions.insert(
            name.to_uppercase(),
            EffectDefinition {
                docs: docs.to_string(),
                category: category.to_string(),
                effect: Rc::new(effect),
            },
        );
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EffectDefinition> {
        self.definitions.get(&name.to_uppercase())
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EffectDefinition)> {
        self.definitions
            .iter()
            .map(|(name, definition)| (name.as_str(), definition))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl fmt::Debug for EffectDefinitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.definitions.keys()).finish()
    }
}

// =============================================================================
// PENDING EXECUTIONS
// =============================================================================

/// An effect execution waiting on its future.
pub(crate) struct PendingEffect {
    entity: Term,
    context: Term,
    future: LocalBoxFuture<'static, Result<Term, EffectError>>,
}

/// A finished execution, ready to be recorded.
pub(crate) struct Settled {
    entity: Term,
    context: Term,
    outcome: Result<Term, EffectError>,
}

impl PendingEffect {
    pub(crate) async fn resolve(self) -> Settled {
        Settled {
            outcome: self.future.await,
            entity: self.entity,
            context: self.context,
        }
    }
}

/// Write the outcome facts of a finished execution.
///
/// `STATUS` is always written after `RESULT` or `ERROR`, even if a watch
/// fails on the first fact.
pub(crate) fn record(graph: &mut Graph, settled: Settled) -> Result<(), GraphError> {
    let Settled {
        entity,
        context,
        outcome,
    } = settled;
    let quads = match outcome {
        Ok(result) => {
            trace!(entity = %entity, result = %result, "effect succeeded");
            [
                Quad::new(&entity, RESULT, result, &context),
                Quad::new(&entity, STATUS, STATUS_SUCCESS, &context),
            ]
        }
        Err(err) => {
            warn!(entity = %entity, error = %err, "effect failed");
            [
                Quad::new(&entity, ERROR, Term::string(err.to_string()), &context),
                Quad::new(&entity, STATUS, STATUS_ERROR, &context),
            ]
        }
    };
    graph.insert_all(quads)
}

// =============================================================================
// INSTALLATION
// =============================================================================

/// Describe every effect and start watching for effect requests.
///
/// On `GraphError::Propagation` the effects are installed regardless.
pub fn install_effects(
    graph: &mut Graph,
    defs: &EffectDefinitions,
    ctx: &Term,
) -> Result<WatchHandle, GraphError> {
    let mut failures = Failures::default();
    failures.absorb(declare_type(graph, EFFECT_TYPE, ctx))?;
    for (name, definition) in defs.iter() {
        failures.absorb(describe(
            graph,
            &Term::word(name),
            EFFECT_TYPE,
            &definition.docs,
            &definition.category,
            ctx,
        ))?;
    }

    let defs = Rc::new(defs.clone());
    let handle = graph.watch(
        Query::new(vec![
            Pattern::new("?e", EFFECT, "?name", "?ctx"),
            Pattern::new("?e", INPUT, "?input", "*"),
        ]),
        move |graph, binding| dispatch(graph, &defs, binding),
    );
    debug!(watch = %handle.id(), "effects installed");
    failures.finish()?;
    Ok(handle)
}

fn dispatch(graph: &mut Graph, defs: &EffectDefinitions, binding: &Binding) -> Result<(), GraphError> {
    let (Some(entity), Some(name), Some(input), Some(ctx)) = (
        binding.get("e"),
        binding.get("name"),
        binding.get("input"),
        binding.get("ctx"),
    ) else {
        return Ok(());
    };
    let Some(definition) = name.as_text().and_then(|name| defs.get(name)) else {
        trace!(effect = %name, "unknown effect");
        return Ok(());
    };

    trace!(entity = %entity, effect = %name, "effect requested");
    match definition.effect.execute(input) {
        EffectOutcome::Ready(outcome) => record(
            graph,
            Settled {
                entity: entity.clone(),
                context: ctx.clone(),
                outcome,
            },
        ),
        EffectOutcome::Pending(future) => {
            graph.defer(PendingEffect {
                entity: entity.clone(),
                context: ctx.clone(),
                future,
            });
            Ok(())
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Quad;
    use std::cell::Cell;

    fn installed(defs: &EffectDefinitions) -> Graph {
        let mut graph = Graph::new();
        let _handle = install_effects(&mut graph, defs, &Term::word("sys")).expect("install");
        graph
    }

    #[test]
    fn sync_effect_writes_result_and_status() {
        let mut graph = installed(&EffectDefinitions::standard());
        graph.add("job", "EFFECT", "ECHO", "run").expect("add");
        graph.add("job", "INPUT", Term::string("hi"), "run").expect("add");

        assert!(graph.has(&Quad::new("job", "RESULT", Term::string("hi"), "run")));
        assert!(graph.has(&Quad::new("job", "STATUS", "SUCCESS", "run")));
    }

    #[test]
    fn failing_effect_writes_error_facts() {
        let mut defs = EffectDefinitions::new();
        defs.define("FAIL", "always fails", "test", |_: &Term| {
            EffectOutcome::failure("nope")
        });
        let mut graph = installed(&defs);

        let result = graph.add("job", "EFFECT", "FAIL", "run").and_then(|_| {
            graph.add("job", "INPUT", 1, "run")
        });
        assert!(result.is_ok());
        assert!(graph.has(&Quad::new("job", "ERROR", Term::string("nope"), "run")));
        assert!(graph.has(&Quad::new("job", "STATUS", "ERROR", "run")));
    }

    #[test]
    fn unknown_effect_is_ignored() {
        let mut graph = installed(&EffectDefinitions::standard());
        graph.add("job", "EFFECT", "LAUNCH", "run").expect("add");
        graph.add("job", "INPUT", 1, "run").expect("add");
        assert!(graph
            .query(Pattern::new("job", "STATUS", "*", "*"))
            .is_empty());
    }

    #[test]
    fn effect_runs_once_per_request() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut defs = EffectDefinitions::new();
        defs.define("COUNT", "", "test", move |input: &Term| {
            counter.set(counter.get() + 1);
            EffectOutcome::success(input)
        });
        let mut graph = installed(&defs);

        graph.add("job", "EFFECT", "COUNT", "run").expect("add");
        graph.add("job", "INPUT", 1, "run").expect("add");
        graph.add("job", "INPUT", 1, "run").expect("add");
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn async_effect_settles() {
        let mut defs = EffectDefinitions::new();
        defs.define("LATER", "doubles after a yield", "test", |input: &Term| {
            let n = input.as_number();
            EffectOutcome::pending(async move {
                tokio::task::yield_now().await;
                n.map(|n| Term::number(n * 2.0))
                    .ok_or_else(|| EffectError::new("not a number"))
            })
        });
        let mut graph = installed(&defs);

        graph.add("a", "EFFECT", "LATER", "run").expect("add");
        graph.add("a", "INPUT", 21, "run").expect("add");
        graph.add("b", "EFFECT", "LATER", "run").expect("add");
        graph.add("b", "INPUT", "x", "run").expect("add");

        assert_eq!(graph.pending_effects(), 2);
        assert!(!graph.has(&Quad::new("a", "STATUS", "SUCCESS", "run")));

        assert_eq!(graph.settle().await.expect("settle"), 2);
        assert_eq!(graph.pending_effects(), 0);
        assert!(graph.has(&Quad::new("a", "RESULT", 42, "run")));
        assert!(graph.has(&Quad::new("b", "STATUS", "ERROR", "run")));
        assert!(graph.has(&Quad::new(
            "b",
            "ERROR",
            Term::string("not a number"),
            "run"
        )));
    }

    #[test]
    fn failing_result_watch_still_records_status() {
        let mut graph = installed(&EffectDefinitions::standard());
        let _failing = graph.watch(
            Pattern::new("?e", "RESULT", "?r", "*"),
            |_: &mut Graph, _: &Binding| Err(GraphError::Definition("boom".to_string())),
        );
        graph.add("job", "EFFECT", "ECHO", "run").expect("add");

        let result = graph.add("job", "INPUT", 1, "run");
        assert!(matches!(result, Err(GraphError::Propagation { .. })));
        assert!(graph.has(&Quad::new("job", "RESULT", 1, "run")));
        assert!(graph.has(&Quad::new("job", "STATUS", "SUCCESS", "run")));
    }

    #[tokio::test]
    async fn unwatch_does_not_cancel_queued_effects() {
        let mut defs = EffectDefinitions::new();
        defs.define("LATER", "echoes after a yield", "test", |input: &Term| {
            let input = input.clone();
            EffectOutcome::pending(async move {
                tokio::task::yield_now().await;
                Ok(input)
            })
        });
        let mut graph = Graph::new();
        let handle = install_effects(&mut graph, &defs, &Term::word("sys")).expect("install");

        graph.add("job", "EFFECT", "LATER", "run").expect("add");
        graph.add("job", "INPUT", 7, "run").expect("add");
        assert!(graph.unwatch(handle));
        assert_eq!(graph.pending_effects(), 1);

        assert_eq!(graph.settle().await.expect("settle"), 1);
        assert!(graph.has(&Quad::new("job", "RESULT", 7, "run")));
        assert!(graph.has(&Quad::new("job", "STATUS", "SUCCESS", "run")));

        // New requests are no longer dispatched.
        graph.add("next", "EFFECT", "LATER", "run").expect("add");
        graph.add("next", "INPUT", 1, "run").expect("add");
        assert_eq!(graph.pending_effects(), 0);
    }
}
