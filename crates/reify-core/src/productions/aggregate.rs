//! # Aggregations
//!
//! Versioned reductions over a growing set of items.
//!
//! A declaration `(agg AGGREGATE SUM ctx)` activates aggregation `agg`. Each
//! new `(agg ITEM v *)` fact is folded into its accumulator and a new
//! version of the result is written:
//!
//! ```text
//! (agg          agg:RESULT:V2  result  ctx)
//! (agg:RESULT:V2  REFINES      agg:RESULT:V1  ctx)   -- from version 2 on
//! (agg:VERSION  CURRENT        2       ctx)
//! ```
//!
//! Old versions are never removed. The current value is the one result key
//! that nothing refines, which is a NAC query (see `current_results`).
//!
//! Items stored before the declaration are folded in when it activates.
//! Identical `ITEM` facts are one fact, so duplicates count once.

use crate::graph::{Failures, Graph};
use crate::pattern::{Binding, Pattern, Slot};
use crate::primitives::{
    AGGREGATE, AGGREGATION_TYPE, CURRENT, ITEM, REFINES, RESULT_KEY_INFIX, VERSION_KEY_SUFFIX,
};
use crate::productions::describe::{declare_type, describe};
use crate::query::Query;
use crate::watch::WatchHandle;
use crate::{GraphError, Quad, Term};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

// =============================================================================
// AGGREGATOR TRAITS
// =============================================================================

/// Running state of one aggregation.
pub trait Accumulator {
    /// Fold one raw item value in.
    fn accumulate(&mut self, item: &Term);

    /// The result over everything folded so far.
    fn reduce(&self) -> Term;
}

/// Factory of accumulators: one per activated aggregation.
pub trait Aggregator {
    fn start(&self) -> Box<dyn Accumulator>;
}

impl<F> Aggregator for F
where
    F: Fn() -> Box<dyn Accumulator>,
{
    fn start(&self) -> Box<dyn Accumulator> {
        self()
    }
}

#[derive(Debug, Default)]
struct Sum(f64);

impl Accumulator for Sum {
    fn accumulate(&mut self, item: &Term) {
        if let Some(n) = item.as_number() {
            self.0 += n;
        }
    }

    fn reduce(&self) -> Term {
        Term::number(self.0)
    }
}

#[derive(Debug, Default)]
struct Count(u64);

impl Accumulator for Count {
    fn accumulate(&mut self, _item: &Term) {
        self.0 += 1;
    }

    fn reduce(&self) -> Term {
        Term::from(self.0)
    }
}

#[derive(Debug, Default)]
struct Average {
    total: f64,
    count: u64,
}

impl Accumulator for Average {
    fn accumulate(&mut self, item: &Term) {
        if let Some(n) = item.as_number() {
            self.total += n;
            self.count += 1;
        }
    }

    fn reduce(&self) -> Term {
        if self.count == 0 {
            Term::Null
        } else {
            Term::number(self.total / self.count as f64)
        }
    }
}

/// Keeps the extreme numeric item under `prefer`.
#[derive(Debug)]
struct Extreme {
    best: Option<f64>,
    prefer: fn(f64, f64) -> f64,
}

impl Accumulator for Extreme {
    fn accumulate(&mut self, item: &Term) {
        if let Some(n) = item.as_number() {
            self.best = Some(self.best.map_or(n, |best| (self.prefer)(best, n)));
        }
    }

    fn reduce(&self) -> Term {
        self.best.map_or(Term::Null, Term::number)
    }
}

// =============================================================================
// DEFINITIONS
// =============================================================================

/// A named aggregation with its description.
#[derive(Clone)]
pub struct AggregationDefinition {
    pub docs: String,
    pub aggregator: Rc<dyn Aggregator>,
}

/// Registry of aggregation definitions, keyed by upper-cased name.
#[derive(Clone, Default)]
pub struct AggregationDefinitions {
    definitions: BTreeMap<String, AggregationDefinition>,
}

impl AggregationDefinitions {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `SUM`, `COUNT`, `AVG`, `MIN` and `MAX`.
    ///
    /// Non-numeric items are skipped by every definition except `COUNT`.
    /// `AVG`, `MIN` and `MAX` reduce to null until a numeric item arrives.
    #[must_use]
    pub fn standard() -> Self {
        let mut defs = Self::new();
        defs.define("SUM", "sum of numeric items", || -> Box<dyn Accumulator> {
            Box::new(Sum::default())
        });
        defs.define("COUNT", "number of distinct items", || -> Box<dyn Accumulator> {
            Box::new(Count::default())
        });
        defs.define("AVG", "mean of numeric items", || -> Box<dyn Accumulator> {
            Box::new(Average::default())
        });
        defs.define("MIN", "smallest numeric item", || -> Box<dyn Accumulator> {
            Box::new(Extreme {
                best: None,
                prefer: f64::min,
            })
        });
        defs.define("MAX", "largest numeric item", || -> Box<dyn Accumulator> {
            Box::new(Extreme {
                best: None,
                prefer: f64::max,
            })
        });
        defs
    }

    /// Add or replace a definition.
    pub fn define(&mut self, name: &str, docs: &str, aggregator: impl Aggregator + 'static) {
        self.definitions.insert(
            name.to_uppercase(),
            AggregationDefinition {
                docs: docs.to_string(),
                aggregator: Rc::new(aggregator),
            },
        );
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AggregationDefinition> {
        self.definitions.get(&name.to_uppercase())
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AggregationDefinition)> {
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

impl fmt::Debug for AggregationDefinitions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.definitions.keys()).finish()
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Per-aggregation running state.
struct Refinement {
    accumulator: Box<dyn Accumulator>,
    version: u64,
}

/// Shared by the declaration watch and every item watch.
struct Engine {
    definitions: AggregationDefinitions,
    /// Activated aggregation -> its item watch.
    active: RefCell<BTreeMap<Term, WatchHandle>>,
}

impl Engine {
    fn on_declaration(&self, graph: &mut Graph, binding: &Binding) -> Result<(), GraphError> {
        let (Some(agg), Some(op), Some(ctx)) =
            (binding.get("agg"), binding.get("op"), binding.get("ctx"))
        else {
            return Ok(());
        };
        if self.active.borrow().contains_key(agg) {
            trace!(aggregation = %agg, "aggregation already active");
            return Ok(());
        }
        let Some(definition) = op.as_text().and_then(|name| self.definitions.get(name)) else {
            trace!(aggregation = %agg, op = %op, "unknown aggregation");
            return Ok(());
        };

        let state = Rc::new(RefCell::new(Refinement {
            accumulator: definition.aggregator.start(),
            version: 0,
        }));
        let items = item_query(agg);
        let existing = graph.query(&items);

        let handle = {
            let (agg, ctx, state) = (agg.clone(), ctx.clone(), Rc::clone(&state));
            graph.watch(items, move |graph, binding| {
                refine(graph, &agg, &ctx, &state, binding)
            })
        };
        self.active.borrow_mut().insert(agg.clone(), handle);
        debug!(aggregation = %agg, op = %op, existing = existing.len(), "aggregation activated");

        let mut failures = Failures::default();
        for binding in &existing {
            failures.absorb(refine(graph, agg, ctx, &state, binding))?;
        }
        failures.finish()
    }
}

fn declaration_query() -> Query {
    Query::new(vec![Pattern::new("?agg", AGGREGATE, "?op", "?ctx")])
}

fn item_query(agg: &Term) -> Query {
    Query::new(vec![Pattern::new(agg, ITEM, "?item", "*")])
}

/// Fold one item in and write the next version.
///
/// The result, its `REFINES` link and the `CURRENT` marker are written as one
/// group, so a failing watch elsewhere never leaves two unrefined versions.
fn refine(
    graph: &mut Graph,
    agg: &Term,
    ctx: &Term,
    state: &RefCell<Refinement>,
    binding: &Binding,
) -> Result<(), GraphError> {
    let Some(item) = binding.get("item") else {
        return Ok(());
    };
    // Release the borrow before adding: the writes below may re-enter.
    let (version, result) = {
        let mut state = state.borrow_mut();
        state.accumulator.accumulate(item);
        state.version += 1;
        (state.version, state.accumulator.reduce())
    };
    trace!(aggregation = %agg, version, result = %result, "aggregation refined");

    let key = result_key(agg, version);
    let mut quads = vec![Quad::new(agg, &key, result, ctx)];
    if version > 1 {
        quads.push(Quad::new(&key, REFINES, result_key(agg, version - 1), ctx));
    }
    quads.push(Quad::new(version_key(agg), CURRENT, version, ctx));
    graph.insert_all(quads)
}

fn label(agg: &Term) -> String {
    agg.as_text()
        .map_or_else(|| agg.to_string(), ToString::to_string)
}

/// The result key of version `n`: `{agg}:RESULT:V{n}`.
#[must_use]
pub fn result_key(agg: &Term, version: u64) -> Term {
    Term::word(format!("{}{}V{}", label(agg), RESULT_KEY_INFIX, version))
}

/// The entity holding the current version number: `{agg}:VERSION`.
#[must_use]
pub fn version_key(agg: &Term) -> Term {
    Term::word(format!("{}{}", label(agg), VERSION_KEY_SUFFIX))
}

fn parse_version(agg: &Term, key: &Term) -> Option<u64> {
    let prefix = format!("{}{}V", label(agg), RESULT_KEY_INFIX);
    key.as_text()?.strip_prefix(&prefix)?.parse().ok()
}

// =============================================================================
// INSTALLATION AND READING
// =============================================================================

/// Describe every definition and start watching for declarations.
///
/// Declarations already in the store are activated immediately. On
/// `GraphError::Propagation` the engine is installed regardless.
pub fn install_aggregation(
    graph: &mut Graph,
    defs: &AggregationDefinitions,
    ctx: &Term,
) -> Result<WatchHandle, GraphError> {
    let mut failures = Failures::default();
    failures.absorb(declare_type(graph, AGGREGATION_TYPE, ctx))?;
    for (name, definition) in defs.iter() {
        failures.absorb(describe(
            graph,
            &Term::word(name),
            AGGREGATION_TYPE,
            &definition.docs,
            "aggregation",
            ctx,
        ))?;
    }

    let engine = Rc::new(Engine {
        definitions: defs.clone(),
        active: RefCell::new(BTreeMap::new()),
    });
    let existing = graph.query(declaration_query());
    let handle = {
        let engine = Rc::clone(&engine);
        graph.watch(declaration_query(), move |graph, binding| {
            engine.on_declaration(graph, binding)
        })
    };
    for binding in &existing {
        failures.absorb(engine.on_declaration(graph, binding))?;
    }
    debug!(definitions = defs.len(), "aggregation installed");
    failures.finish()?;
    Ok(handle)
}

/// Bindings of `?key`/`?value` for the result no version refines.
///
/// Exactly one binding once the aggregation has seen an item, none before.
#[must_use]
pub fn current_results(graph: &Graph, agg: &Term) -> Vec<Binding> {
    let query = Query::new(vec![Pattern::new(agg, "?key", "?value", "*")])
        .with_nac(vec![Pattern::new("?newer", REFINES, "?key", "*")]);
    graph
        .query(query)
        .into_iter()
        .filter(|binding| {
            binding
                .get("key")
                .is_some_and(|key| parse_version(agg, key).is_some())
        })
        .collect()
}

/// The current result of an aggregation.
#[must_use]
pub fn current_value(graph: &Graph, agg: &Term) -> Option<Term> {
    current_results(graph, agg)
        .into_iter()
        .find_map(|binding| binding.get("value").cloned())
}

/// The current version number, from the `CURRENT` fact with the highest value.
#[must_use]
pub fn current_version(graph: &Graph, agg: &Term) -> Option<u64> {
    graph
        .query(Pattern::new(
            Slot::Constant(version_key(agg)),
            CURRENT,
            "?n",
            "*",
        ))
        .into_iter()
        .filter_map(|binding| binding.get("n").and_then(Term::as_number))
        .map(|n| n as u64)
        .max()
}

/// Every version's result, oldest first.
#[must_use]
pub fn result_history(graph: &Graph, agg: &Term) -> Vec<(u64, Term)> {
    let mut history: Vec<(u64, Term)> = graph
        .query(Pattern::new(agg, "?key", "?value", "*"))
        .into_iter()
        .filter_map(|binding| {
            let version = parse_version(agg, binding.get("key")?)?;
            Some((version, binding.get("value")?.clone()))
        })
        .collect();
    history.sort_by_key(|(version, _)| *version);
    history
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Quad;

    fn installed() -> Graph {
        let mut graph = Graph::new();
        let _handle = install_aggregation(
            &mut graph,
            &AggregationDefinitions::standard(),
            &Term::word("sys"),
        )
        .expect("install");
        graph
    }

    fn total() -> Term {
        Term::word("total")
    }

    #[test]
    fn sum_refines_per_item() {
        let mut graph = installed();
        graph.add("total", "AGGREGATE", "SUM", "stats").expect("add");
        for n in [10, 20, 30] {
            graph.add("total", "ITEM", n, "stats").expect("add");
        }

        assert_eq!(current_value(&graph, &total()), Some(Term::from(60)));
        assert_eq!(current_version(&graph, &total()), Some(3));
        assert!(graph.has(&Quad::new(
            "total:RESULT:V3",
            "REFINES",
            "total:RESULT:V2",
            "stats"
        )));
        assert_eq!(
            result_history(&graph, &total()),
            vec![
                (1, Term::from(10)),
                (2, Term::from(30)),
                (3, Term::from(60))
            ]
        );
    }

    #[test]
    fn exactly_one_current_result() {
        let mut graph = installed();
        graph.add("total", "AGGREGATE", "SUM", "stats").expect("add");
        assert!(current_results(&graph, &total()).is_empty());

        for n in 1..=5 {
            graph.add("total", "ITEM", n, "stats").expect("add");
            assert_eq!(current_results(&graph, &total()).len(), 1);
        }
    }

    #[test]
    fn items_before_declaration_are_folded_in() {
        let mut graph = installed();
        graph.add("n", "ITEM", "a", "*").expect("add");
        graph.add("n", "ITEM", "b", "*").expect("add");
        graph.add("n", "AGGREGATE", "COUNT", "stats").expect("add");
        graph.add("n", "ITEM", "c", "*").expect("add");

        assert_eq!(current_value(&graph, &Term::word("n")), Some(Term::from(3)));
    }

    #[test]
    fn declarations_before_install_are_activated() {
        let mut graph = Graph::new();
        graph.add("m", "AGGREGATE", "max", "stats").expect("add");
        graph.add("m", "ITEM", 4, "*").expect("add");
        let _handle = install_aggregation(
            &mut graph,
            &AggregationDefinitions::standard(),
            &Term::word("sys"),
        )
        .expect("install");
        graph.add("m", "ITEM", 9, "*").expect("add");
        graph.add("m", "ITEM", 2, "*").expect("add");

        assert_eq!(current_value(&graph, &Term::word("m")), Some(Term::from(9)));
    }

    #[test]
    fn duplicate_items_count_once() {
        let mut graph = installed();
        graph.add("n", "AGGREGATE", "COUNT", "stats").expect("add");
        graph.add("n", "ITEM", "x", "*").expect("add");
        graph.add("n", "ITEM", "x", "*").expect("add");
        assert_eq!(current_value(&graph, &Term::word("n")), Some(Term::from(1)));
    }

    #[test]
    fn average_of_non_numeric_is_null() {
        let mut graph = installed();
        graph.add("avg", "AGGREGATE", "AVG", "stats").expect("add");
        graph.add("avg", "ITEM", "apple", "*").expect("add");
        assert_eq!(current_value(&graph, &Term::word("avg")), Some(Term::Null));

        graph.add("avg", "ITEM", 4, "*").expect("add");
        graph.add("avg", "ITEM", 8, "*").expect("add");
        assert_eq!(current_value(&graph, &Term::word("avg")), Some(Term::from(6)));
    }

    #[test]
    fn unknown_aggregation_is_ignored() {
        let mut graph = installed();
        graph.add("x", "AGGREGATE", "MEDIAN", "stats").expect("add");
        graph.add("x", "ITEM", 1, "*").expect("add");
        assert_eq!(current_value(&graph, &Term::word("x")), None);
    }

    #[test]
    fn redeclaration_does_not_restart() {
        let mut graph = installed();
        graph.add("total", "AGGREGATE", "SUM", "stats").expect("add");
        graph.add("total", "ITEM", 5, "*").expect("add");
        graph.add("total", "AGGREGATE", "SUM", "other").expect("add");
        graph.add("total", "ITEM", 6, "*").expect("add");
        assert_eq!(current_value(&graph, &total()), Some(Term::from(11)));
        assert_eq!(current_version(&graph, &total()), Some(2));
    }

    #[test]
    fn custom_definitions() {
        struct Concat(String);
        impl Accumulator for Concat {
            fn accumulate(&mut self, item: &Term) {
                self.0.push_str(item.as_text().unwrap_or_default());
            }
            fn reduce(&self) -> Term {
                Term::string(&self.0)
            }
        }

        let mut defs = AggregationDefinitions::new();
        defs.define("CONCAT", "joined text", || -> Box<dyn Accumulator> {
            Box::new(Concat(String::new()))
        });
        let mut graph = Graph::new();
        let _handle = install_aggregation(&mut graph, &defs, &Term::word("sys")).expect("install");

        graph.add("s", "AGGREGATE", "concat", "c").expect("add");
        graph.add("s", "ITEM", "ab", "*").expect("add");
        graph.add("s", "ITEM", "cd", "*").expect("add");
        assert_eq!(current_value(&graph, &Term::word("s")), Some(Term::string("abcd")));
        assert!(graph.has(&Quad::new("CONCAT", "TYPE", "AGGREGATION!", "sys")));
    }

    #[test]
    fn failing_result_watch_keeps_refinement_chain() {
        let mut graph = installed();
        let _failing = graph.watch(
            Pattern::new("total", "total:RESULT:V2", "?v", "*"),
            |_: &mut Graph, _: &Binding| Err(GraphError::Definition("boom".to_string())),
        );
        graph.add("total", "AGGREGATE", "SUM", "stats").expect("add");
        graph.add("total", "ITEM", 3, "stats").expect("add");

        let result = graph.add("total", "ITEM", 4, "stats");
        assert!(matches!(result, Err(GraphError::Propagation { .. })));

        assert!(graph.has(&Quad::new(
            "total:RESULT:V2",
            "REFINES",
            "total:RESULT:V1",
            "stats"
        )));
        assert_eq!(current_results(&graph, &total()).len(), 1);
        assert_eq!(current_value(&graph, &total()), Some(Term::from(7)));
        assert_eq!(current_version(&graph, &total()), Some(2));
    }
}
