//! # Compute Operators
//!
//! Arithmetic and comparison as watches over operand facts.
//!
//! ```text
//! (c OP ADD ctx) (c X 2 *) (c Y 3 *)      =>  (c RESULT 5 ctx)
//! (c OP NEG ctx) (c VALUE 4 *)            =>  (c RESULT -4 ctx)
//! (c COMPARE LT ctx) (c LEFT 1 *) (c RIGHT 2 *)  =>  (c RESULT true ctx)
//! ```
//!
//! Operator names are matched case-insensitively. Unknown operators,
//! operands that do not coerce to numbers, and non-finite results
//! (division by zero, `SQRT` of a negative) produce nothing.

use crate::graph::{Failures, Graph};
use crate::pattern::{Binding, Pattern};
use crate::primitives::{COMPARE, LEFT, OP, OPERATION_TYPE, RESULT, RIGHT, VALUE, X, Y};
use crate::productions::describe::{declare_type, describe};
use crate::query::Query;
use crate::watch::WatchHandle;
use crate::{GraphError, Term};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, trace};

/// How an operator reads its operands.
#[derive(Debug, Clone, Copy)]
pub enum OperatorKind {
    /// Reads `X` and `Y`, triggered by `OP`.
    Binary(fn(f64, f64) -> Option<f64>),
    /// Reads `VALUE`, triggered by `OP`.
    Unary(fn(f64) -> Option<f64>),
    /// Reads `LEFT` and `RIGHT`, triggered by `COMPARE`; yields a boolean.
    Compare(fn(f64, f64) -> bool),
}

/// A named operator with its description.
#[derive(Debug, Clone)]
pub struct Operator {
    pub docs: String,
    pub category: String,
    pub kind: OperatorKind,
}

/// Registry of compute operators, keyed by upper-cased name.
#[derive(Debug, Clone, Default)]
pub struct ComputeDefinitions {
    operators: BTreeMap<String, Operator>,
}

impl ComputeDefinitions {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard operator table.
    #[must_use]
    pub fn standard() -> Self {
        use OperatorKind::{Binary, Compare, Unary};

        let mut defs = Self::new();
        let arithmetic = "arithmetic";
        let comparison = "comparison";

        defs.define("ADD", "x + y", arithmetic, Binary(|x, y| Some(x + y)));
        defs.define("SUB", "x - y", arithmetic, Binary(|x, y| Some(x - y)));
        defs.define("MUL", "x * y", arithmetic, Binary(|x, y| Some(x * y)));
        defs.define(
            "DIV",
            "x / y; nothing when y is zero",
            arithmetic,
            Binary(|x, y| if y == 0.0 { None } else { Some(x / y) }),
        );
        defs.define(
            "MOD",
            "remainder of x / y; nothing when y is zero",
            arithmetic,
            Binary(|x, y| if y == 0.0 { None } else { Some(x % y) }),
        );
        defs.define("POW", "x raised to y", arithmetic, Binary(|x, y| Some(x.powf(y))));
        defs.define("MIN", "smaller of x and y", arithmetic, Binary(|x, y| Some(x.min(y))));
        defs.define("MAX", "larger of x and y", arithmetic, Binary(|x, y| Some(x.max(y))));

        defs.define("NEG", "-value", arithmetic, Unary(|v| Some(-v)));
        defs.define("ABS", "absolute value", arithmetic, Unary(|v| Some(v.abs())));
        defs.define(
            "SQRT",
            "square root; nothing for negative values",
            arithmetic,
            Unary(|v| if v < 0.0 { None } else { Some(v.sqrt()) }),
        );
        defs.define("FLOOR", "round down", arithmetic, Unary(|v| Some(v.floor())));
        defs.define("CEIL", "round up", arithmetic, Unary(|v| Some(v.ceil())));
        defs.define("ROUND", "round half away from zero", arithmetic, Unary(|v| Some(v.round())));

        defs.define("EQ", "left = right", comparison, Compare(|l, r| l == r));
        defs.define("NE", "left != right", comparison, Compare(|l, r| l != r));
        defs.define("LT", "left < right", comparison, Compare(|l, r| l < r));
        defs.define("LE", "left <= right", comparison, Compare(|l, r| l <= r));
        defs.define("GT", "left > right", comparison, Compare(|l, r| l > r));
        defs.define("GE", "left >= right", comparison, Compare(|l, r| l >= r));

        defs
    }

    /// Add or replace an operator.
    pub fn define(&mut self, name: &str, docs: &str, category: &str, kind: OperatorKind) {
        self.operators.insert(
            name.to_uppercase(),
            Operator {
                docs: docs.to_string(),
                category: category.to_string(),
                kind,
            },
        );
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.operators.get(&name.to_uppercase())
    }

    /// Operators in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Operator)> {
        self.operators.iter().map(|(name, op)| (name.as_str(), op))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

// =============================================================================
// INSTALLATION
// =============================================================================

/// Describe every operator and register the three operator watches.
///
/// Returns the handles of the binary, unary and comparison watches. On
/// `GraphError::Propagation` the operators are installed regardless.
pub fn install_compute(
    graph: &mut Graph,
    defs: &ComputeDefinitions,
    ctx: &Term,
) -> Result<Vec<WatchHandle>, GraphError> {
    let mut failures = Failures::default();
    failures.absorb(declare_type(graph, OPERATION_TYPE, ctx))?;
    for (name, op) in defs.iter() {
        failures.absorb(describe(
            graph,
            &Term::word(name),
            OPERATION_TYPE,
            &op.docs,
            &op.category,
            ctx,
        ))?;
    }

    let count = defs.len();
    let defs = Rc::new(defs.clone());
    let mut handles = Vec::with_capacity(3);
    for (shape, query) in [
        (
            Shape::Binary,
            vec![
                Pattern::new("?c", OP, "?op", "?ctx"),
                Pattern::new("?c", X, "?x", "*"),
                Pattern::new("?c", Y, "?y", "*"),
            ],
        ),
        (
            Shape::Unary,
            vec![
                Pattern::new("?c", OP, "?op", "?ctx"),
                Pattern::new("?c", VALUE, "?x", "*"),
            ],
        ),
        (
            Shape::Compare,
            vec![
                Pattern::new("?c", COMPARE, "?op", "?ctx"),
                Pattern::new("?c", LEFT, "?x", "*"),
                Pattern::new("?c", RIGHT, "?y", "*"),
            ],
        ),
    ] {
        let defs = Rc::clone(&defs);
        handles.push(graph.watch(Query::new(query), move |graph, binding| {
            apply(graph, &defs, shape, binding)
        }));
    }

    debug!(operators = count, "compute installed");
    failures.finish()?;
    Ok(handles)
}

/// Operand layout a watch provides.
#[derive(Debug, Clone, Copy)]
enum Shape {
    Binary,
    Unary,
    Compare,
}

/// Evaluate one operator binding. An operator whose kind does not fit the
/// watch's operand shape is a no-op.
fn apply(
    graph: &mut Graph,
    defs: &ComputeDefinitions,
    shape: Shape,
    binding: &Binding,
) -> Result<(), GraphError> {
    let (Some(cell), Some(name), Some(ctx)) =
        (binding.get("c"), binding.get("op"), binding.get("ctx"))
    else {
        return Ok(());
    };
    let Some(op) = name.as_text().and_then(|name| defs.get(name)) else {
        trace!(op = %name, "unknown operator");
        return Ok(());
    };
    let x = binding.get("x").and_then(Term::as_number);
    let y = binding.get("y").and_then(Term::as_number);

    let result = match (shape, op.kind) {
        (Shape::Binary, OperatorKind::Binary(f)) => x
            .zip(y)
            .and_then(|(x, y)| f(x, y))
            .filter(|r| r.is_finite())
            .map(Term::number),
        (Shape::Unary, OperatorKind::Unary(f)) => {
            x.and_then(f).filter(|r| r.is_finite()).map(Term::number)
        }
        (Shape::Compare, OperatorKind::Compare(f)) => {
            x.zip(y).map(|(x, y)| Term::Boolean(f(x, y)))
        }
        _ => None,
    };

    if let Some(result) = result {
        trace!(cell = %cell, op = %name, result = %result, "operator evaluated");
        graph.add(cell.clone(), RESULT, result, ctx.clone())?;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
