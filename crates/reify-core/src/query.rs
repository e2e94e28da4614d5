//! # Query Module
//!
//! A query is a conjunctive pattern list plus an optional negative
//! application condition (NAC). A binding of the positive list survives only
//! if the NAC list, with the binding substituted, has no match.

use crate::pattern::{Pattern, Var, render};
use crate::primitives::MAX_PATTERNS_PER_LIST;
use crate::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A conjunctive query with a negative application condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Patterns that must all match, joined left to right.
    pub patterns: Vec<Pattern>,
    /// Patterns that must NOT all match under a surviving binding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nac: Vec<Pattern>,
}

impl Query {
    /// Create a query without a NAC.
    #[must_use]
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self {
            patterns,
            nac: Vec::new(),
        }
    }

    /// Attach a NAC list.
    #[must_use]
    pub fn with_nac(mut self, nac: Vec<Pattern>) -> Self {
        self.nac = nac;
        self
    }

    /// Variables bound by the positive list, in name order.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<&Var> {
        self.patterns.iter().flat_map(Pattern::variables).collect()
    }

    /// Check list sizes against the compiled limits.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (label, list) in [("patterns", &self.patterns), ("nac", &self.nac)] {
            if list.len() > MAX_PATTERNS_PER_LIST {
                return Err(GraphError::InvalidPattern(format!(
                    "{} list has {} patterns (limit {})",
                    label,
                    list.len(),
                    MAX_PATTERNS_PER_LIST
                )));
            }
        }
        Ok(())
    }
}

impl From<Vec<Pattern>> for Query {
    fn from(patterns: Vec<Pattern>) -> Self {
        Self::new(patterns)
    }
}

impl From<Pattern> for Query {
    fn from(pattern: Pattern) -> Self {
        Self::new(vec![pattern])
    }
}

impl From<&Query> for Query {
    fn from(query: &Query) -> Self {
        query.clone()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.patterns))?;
        if !self.nac.is_empty() {
            write!(f, " NOT {}", render(&self.nac))?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
