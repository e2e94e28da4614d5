//! # Program Loader
//!
//! A program is a serde document holding facts, rules and named queries.
//!
//! - Validate the whole document before anything is written
//! - Install productions, then rules, then facts, so every fact propagates
//! - Evaluate named queries against the settled store
//!
//! The loader is format-agnostic; the binary reads TOML or JSON into a
//! `Program`.

use crate::graph::{Failures, Graph};
use crate::pattern::{Binding, Pattern};
use crate::primitives::{MAX_PROGRAM_FACTS, MAX_TERM_LENGTH};
use crate::productions::aggregate::{AggregationDefinitions, install_aggregation};
use crate::productions::compute::{ComputeDefinitions, install_compute};
use crate::productions::effect::{EffectDefinitions, install_effects};
use crate::productions::rule::{Rule, install_rule};
use crate::query::Query;
use crate::{GraphError, Quad, Term};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

fn default_context() -> Term {
    Term::word("default")
}

fn default_system_context() -> Term {
    Term::word("system")
}

/// Which standard productions to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Install {
    pub compute: bool,
    pub aggregation: bool,
    pub effects: bool,
}

impl Default for Install {
    fn default() -> Self {
        Self {
            compute: true,
            aggregation: true,
            effects: true,
        }
    }
}

/// A rule as written in a program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub id: Term,
    #[serde(rename = "where")]
    pub body: Vec<Pattern>,
    #[serde(default)]
    pub nac: Vec<Pattern>,
    pub produce: Vec<Pattern>,
}

impl RuleDef {
    #[must_use]
    pub fn to_rule(&self) -> Rule {
        Rule::new(self.id.clone(), self.body.clone(), self.produce.clone()).unless(self.nac.clone())
    }
}

/// A named query evaluated after loading.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamedQuery {
    pub name: String,
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub nac: Vec<Pattern>,
}

impl NamedQuery {
    #[must_use]
    pub fn to_query(&self) -> Query {
        Query::new(self.patterns.clone()).with_nac(self.nac.clone())
    }
}

/// The result of one named query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    pub name: String,
    pub bindings: Vec<Binding>,
}

/// What `Program::load` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LoadReport {
    /// Facts listed in the program.
    pub facts: usize,
    /// Rules installed.
    pub rules: usize,
    /// Quads in the store after loading, derived ones included.
    pub quads: usize,
}

/// Production registries used by `Program::load`.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub compute: ComputeDefinitions,
    pub aggregation: AggregationDefinitions,
    pub effects: EffectDefinitions,
}

impl Registries {
    /// The standard operators, aggregations and effects.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            compute: ComputeDefinitions::standard(),
            aggregation: AggregationDefinitions::standard(),
            effects: EffectDefinitions::standard(),
        }
    }
}

/// A Reify program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Program {
    /// Context of facts written without one.
    #[serde(default = "default_context")]
    pub context: Term,
    /// Context of self-description facts.
    #[serde(default = "default_system_context")]
    pub system_context: Term,
    #[serde(default)]
    pub install: Install,
    /// Facts as `[entity, attribute, value]` or `[entity, attribute, value, context]`.
    #[serde(default)]
    pub facts: Vec<Vec<Term>>,
    #[serde(default)]
    pub rules: Vec<RuleDef>,
    #[serde(default)]
    pub queries: Vec<NamedQuery>,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            context: default_context(),
            system_context: default_system_context(),
            install: Install::default(),
            facts: Vec::new(),
            rules: Vec::new(),
            queries: Vec::new(),
        }
    }
}

impl Program {
    /// Validate a program.
    ///
    /// A program is valid if:
    /// - It has at most `MAX_PROGRAM_FACTS` facts, each of 3 or 4 terms
    /// - No word or string term exceeds `MAX_TERM_LENGTH`
    /// - Every rule is valid and rule ids are unique
    /// - Every query is within list limits and query names are unique
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.facts.len() > MAX_PROGRAM_FACTS {
            return Err(GraphError::InvalidProgram(format!(
                "{} facts (limit {})",
                self.facts.len(),
                MAX_PROGRAM_FACTS
            )));
        }
        for (index, fact) in self.facts.iter().enumerate() {
            self.fact_quad(index, fact)?;
        }

        let mut ids = BTreeSet::new();
        for def in &self.rules {
            def.to_rule().validate()?;
            if !ids.insert(&def.id) {
                return Err(GraphError::InvalidProgram(format!(
                    "duplicate rule id {}",
                    def.id
                )));
            }
        }

        let mut names = BTreeSet::new();
        for named in &self.queries {
            named.to_query().validate()?;
            if !names.insert(named.name.as_str()) {
                return Err(GraphError::InvalidProgram(format!(
                    "duplicate query name {}",
                    named.name
                )));
            }
        }
        Ok(())
    }

    fn fact_quad(&self, index: usize, fact: &[Term]) -> Result<Quad, GraphError> {
        if let Some(term) = fact
            .iter()
            .find(|term| term.as_text().is_some_and(|text| text.len() > MAX_TERM_LENGTH))
        {
            return Err(GraphError::InvalidFact(format!(
                "fact {}: term of {} bytes exceeds limit {}",
                index,
                term.as_text().map_or(0, str::len),
                MAX_TERM_LENGTH
            )));
        }
        match fact {
            [e, a, v] => Ok(Quad::new(e, a, v, &self.context)),
            [e, a, v, c] => Ok(Quad::new(e, a, v, c)),
            _ => Err(GraphError::InvalidFact(format!(
                "fact {} has {} terms, expected 3 or 4",
                index,
                fact.len()
            ))),
        }
    }

    /// The program's facts as quads.
    pub fn quads(&self) -> Result<Vec<Quad>, GraphError> {
        self.facts
            .iter()
            .enumerate()
            .map(|(index, fact)| self.fact_quad(index, fact))
            .collect()
    }

    /// Validate, then install productions and rules, then add every fact.
    ///
    /// A watch failing on one fact does not stop the load: every fact is
    /// added and the failures are returned together as
    /// `GraphError::Propagation`.
    pub fn load(&self, graph: &mut Graph, registries: &Registries) -> Result<LoadReport, GraphError> {
        self.validate()?;
        let quads = self.quads()?;
        let system = &self.system_context;

        let mut failures = Failures::default();
        if self.install.compute {
            let _handles = failures.absorb(install_compute(graph, &registries.compute, system))?;
        }
        if self.install.aggregation {
            let _handle =
                failures.absorb(install_aggregation(graph, &registries.aggregation, system))?;
        }
        if self.install.effects {
            let _handle = failures.absorb(install_effects(graph, &registries.effects, system))?;
        }
        for def in &self.rules {
            let _handle = failures.absorb(install_rule(graph, &def.to_rule(), system))?;
        }
        debug!(rules = self.rules.len(), "productions installed");

        failures.absorb(graph.insert_all(quads))?;

        let report = LoadReport {
            facts: self.facts.len(),
            rules: self.rules.len(),
            quads: graph.len(),
        };
        info!(
            facts = report.facts,
            rules = report.rules,
            quads = report.quads,
            "program loaded"
        );
        failures.finish()?;
        Ok(report)
    }

    /// Evaluate every named query, in program order.
    #[must_use]
    pub fn evaluate(&self, graph: &Graph) -> Vec<QueryResult> {
        self.queries
            .iter()
            .map(|named| QueryResult {
                name: named.name.clone(),
                bindings: graph.query(named.to_query()),
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
