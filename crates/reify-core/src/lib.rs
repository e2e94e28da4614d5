//! # reify-core
//!
//! The fact store and production engine for Reify - THE LOGIC.
//!
//! Everything is a quad `(entity, attribute, value, context)`. Behaviour is
//! quads too: rules, aggregations, operators and effects are installed as
//! standing queries and describe themselves with facts in the same store,
//! so the system can be inspected with the query language it runs on.
//!
//! ## Layers
//!
//! - `types`: terms, quads and errors
//! - `store`: the append-only, indexed quad log
//! - `pattern` / `query` / `matcher`: conjunctive matching with NAC
//! - `watch` / `graph`: incremental standing queries over the store
//! - `productions`: rules, aggregations, compute operators, effects
//! - `program`: loading serde programs into a graph
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Is deterministic: `BTreeMap` ordering, insertion-ordered log, no randomness
//! - Is append-only: facts are never mutated or removed
//! - Never spawns tasks or owns a runtime; async effects are driven by the caller
//! - Has NO network or storage dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod graph;
pub mod matcher;
pub mod pattern;
pub mod primitives;
pub mod productions;
pub mod program;
pub mod query;
pub mod store;
pub mod types;
pub mod watch;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{EffectError, GraphError, Quad, QuadId, Term, TermHash, WatchId};

// =============================================================================
// RE-EXPORTS: Store, Matching and Watches
// =============================================================================

pub use graph::{Graph, GraphStats};
pub use matcher::{apply_nac, exists, match_all, match_one};
pub use pattern::{Binding, Pattern, Slot, Var};
pub use query::Query;
pub use store::{FactStore, QuadStore};
pub use watch::{WatchCallback, WatchHandle};

// =============================================================================
// RE-EXPORTS: Productions
// =============================================================================

pub use productions::aggregate::{
    Accumulator, AggregationDefinitions, Aggregator, current_results, current_value,
    current_version, install_aggregation, result_history,
};
pub use productions::compute::{ComputeDefinitions, OperatorKind, install_compute};
pub use productions::describe::{Entry, catalog};
pub use productions::effect::{Effect, EffectDefinitions, EffectOutcome, install_effects};
pub use productions::rule::{Rule, install_rule, replay_rule};

// =============================================================================
// RE-EXPORTS: Programs
// =============================================================================

pub use program::{Install, LoadReport, NamedQuery, Program, QueryResult, Registries, RuleDef};
