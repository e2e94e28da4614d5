//! # Rules
//!
//! A rule is a watch whose callback instantiates a template.
//!
//! Installing a rule writes its description into the store:
//!
//! ```text
//! (id  TYPE     RULE!              ctx)
//! (id  WHERE    "(?x parent ?y *)" ctx)
//! (id  NAC      "..."              ctx)   -- only when the NAC is non-empty
//! (id  PRODUCE  "(?y child ?x *)"  ctx)
//! ```
//!
//! and registers one watch on `WHERE` (with the NAC). For each new binding
//! the `PRODUCE` patterns are instantiated and added. Bound variables become
//! their terms; unbound variables and wildcards pass through as literal words.
//!
//! Rule output is ordinary facts, so rules chain, including into themselves.

use crate::graph::{Failures, Graph};
use crate::pattern::{Binding, Pattern, render};
use crate::primitives::{NAC, PRODUCE, RULE_TYPE, WHERE};
use crate::productions::describe::{declare_type, describe};
use crate::query::Query;
use crate::watch::WatchHandle;
use crate::{GraphError, Quad, Term};
use std::rc::Rc;
use tracing::debug;

/// A declarative rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: Term,
    /// The `WHERE` patterns and the `NAC` patterns.
    pub body: Query,
    pub produce: Vec<Pattern>,
}

impl Rule {
    #[must_use]
    pub fn new(id: impl Into<Term>, body: impl Into<Query>, produce: Vec<Pattern>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            produce,
        }
    }

    /// Attach NAC patterns to the rule body.
    #[must_use]
    pub fn unless(mut self, nac: Vec<Pattern>) -> Self {
        self.body.nac = nac;
        self
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        self.body.validate()?;
        if self.body.patterns.is_empty() {
            return Err(GraphError::InvalidPattern(format!(
                "rule {} has an empty WHERE clause",
                self.id
            )));
        }
        if self.produce.is_empty() {
            return Err(GraphError::InvalidPattern(format!(
                "rule {} produces nothing",
                self.id
            )));
        }
        Ok(())
    }
}

/// Describe the rule and start watching its body.
///
/// Only facts stored after installation fire the rule; use `replay_rule` to
/// apply it to facts already present. On `GraphError::Propagation` the rule
/// is installed regardless.
pub fn install_rule(graph: &mut Graph, rule: &Rule, ctx: &Term) -> Result<WatchHandle, GraphError> {
    rule.validate()?;

    let mut failures = Failures::default();
    failures.absorb(declare_type(graph, RULE_TYPE, ctx))?;
    failures.absorb(describe(graph, &rule.id, RULE_TYPE, "", "", ctx))?;

    let mut facts = vec![Quad::new(
        &rule.id,
        WHERE,
        Term::string(render(&rule.body.patterns)),
        ctx,
    )];
    if !rule.body.nac.is_empty() {
        facts.push(Quad::new(
            &rule.id,
            NAC,
            Term::string(render(&rule.body.nac)),
            ctx,
        ));
    }
    facts.push(Quad::new(
        &rule.id,
        PRODUCE,
        Term::string(render(&rule.produce)),
        ctx,
    ));
    failures.absorb(graph.insert_all(facts))?;

    let template: Rc<[Pattern]> = Rc::from(rule.produce.as_slice());
    let handle = graph.watch(rule.body.clone(), move |graph, binding| {
        produce(graph, &template, binding)
    });
    debug!(rule = %rule.id, watch = %handle.id(), "rule installed");
    failures.finish()?;
    Ok(handle)
}

/// Fire the rule for every binding of its body in the current store.
///
/// Returns the number of bindings applied.
pub fn replay_rule(graph: &mut Graph, rule: &Rule) -> Result<usize, GraphError> {
    let bindings = graph.query(&rule.body);
    let mut failures = Failures::default();
    for binding in &bindings {
        failures.absorb(produce(graph, &rule.produce, binding))?;
    }
    debug!(rule = %rule.id, count = bindings.len(), "rule replayed");
    failures.finish()?;
    Ok(bindings.len())
}

/// Every quad of the template is written, even if a watch fails on one.
fn produce(graph: &mut Graph, template: &[Pattern], binding: &Binding) -> Result<(), GraphError> {
    graph.insert_all(template.iter().map(|pattern| pattern.instantiate(binding)))
}

// =============================================================================
// TESTS
// =============================================================================
