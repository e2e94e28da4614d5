//! # Self-Description
//!
//! Every installed production writes facts about itself:
//!
//! ```text
//! (ADD  TYPE      OPERATION!  ctx)
//! (ADD  DOCS      "x + y"     ctx)
//! (ADD  CATEGORY  arithmetic  ctx)
//! (OPERATION!  TYPE  TYPE!  ctx)
//! (TYPE!       TYPE  TYPE!  ctx)
//! ```
//!
//! The meta-types are ordinary words, so discovery is an ordinary query.

use crate::graph::Graph;
use crate::pattern::{Pattern, Slot};
use crate::primitives::{CATEGORY, DOCS, META_TYPE, TYPE};
use crate::{GraphError, Quad, Term};
use serde::Serialize;

/// Declare `meta_type` as a type. Also declares `TYPE!` as its own type.
pub fn declare_type(graph: &mut Graph, meta_type: &str, ctx: &Term) -> Result<(), GraphError> {
    graph.insert_all([
        Quad::new(META_TYPE, TYPE, META_TYPE, ctx),
        Quad::new(meta_type, TYPE, META_TYPE, ctx),
    ])
}

/// Write the `TYPE`, `DOCS` and `CATEGORY` facts of a named production.
///
/// Empty docs or category are omitted. All facts are written even if a
/// watch fails on one of them.
pub fn describe(
    graph: &mut Graph,
    name: &Term,
    meta_type: &str,
    docs: &str,
    category: &str,
    ctx: &Term,
) -> Result<(), GraphError> {
    let mut quads = vec![Quad::new(name, TYPE, meta_type, ctx)];
    if !docs.is_empty() {
        quads.push(Quad::new(name, DOCS, Term::string(docs), ctx));
    }
    if !category.is_empty() {
        quads.push(Quad::new(name, CATEGORY, category, ctx));
    }
    graph.insert_all(quads)
}

/// Names typed `meta_type`, in store order.
#[must_use]
pub fn members(graph: &Graph, meta_type: &str) -> Vec<Term> {
    graph
        .query(Pattern::new("?name", TYPE, Slot::Constant(Term::word(meta_type)), "*"))
        .into_iter()
        .filter_map(|binding| binding.get("name").cloned())
        .collect()
}

/// One discovered production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub name: Term,
    pub kind: Term,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<Term>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Term>,
}

/// Every typed name except the meta-types themselves.
#[must_use]
pub fn catalog(graph: &Graph) -> Vec<Entry> {
    let meta = Term::word(META_TYPE);
    graph
        .query(Pattern::new("?name", TYPE, "?kind", "*"))
        .into_iter()
        .filter_map(|binding| {
            let kind = binding.get("kind")?.clone();
            if kind == meta {
                return None;
            }
            let name = binding.get("name")?.clone();
            Some(Entry {
                docs: attribute(graph, &name, DOCS),
                category: attribute(graph, &name, CATEGORY),
                name,
                kind,
            })
        })
        .collect()
}

fn attribute(graph: &Graph, name: &Term, attribute: &str) -> Option<Term> {
    graph
        .query(Pattern::new(name, attribute, "?value", "*"))
        .into_iter()
        .find_map(|binding| binding.get("value").cloned())
}

// =============================================================================
// TESTS
// =============================================================================
