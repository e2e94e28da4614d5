//! # Patterns and Bindings
//!
//! A pattern is a quad template: each of its four slots is a constant term,
//! a variable, or the wildcard. Matching a pattern against a quad extends a
//! binding; the same template, filled from a binding, instantiates a quad.
//!
//! When a variable appears in several slots (or several patterns of one
//! list) every occurrence must take the same term.

use crate::primitives::{VARIABLE_PREFIX, WILDCARD};
use crate::{GraphError, Quad, Term};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// VARIABLE
// =============================================================================

/// A named variable. The name is stored without the `?` marker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(Arc<str>);

impl Var {
    /// Create a variable; a leading `?` is accepted and stripped.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self(Arc::from(name.strip_prefix(VARIABLE_PREFIX).unwrap_or(name)))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Var {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", VARIABLE_PREFIX, self.0)
    }
}

impl Serialize for Var {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// =============================================================================
// SLOT
// =============================================================================

/// One position of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(from = "Term")]
pub enum Slot {
    /// Matches exactly this term.
    Constant(Term),
    /// Matches any term, consistently across occurrences.
    Variable(Var),
    /// Matches any term; never binds, never constrains.
    Wildcard,
}

impl Slot {
    /// Read a grammar token: `?name` is a variable, `*` the wildcard, and
    /// anything else a constant.
    #[must_use]
    pub fn token(term: Term) -> Self {
        if let Term::Word(word) = &term {
            if &**word == WILDCARD {
                return Self::Wildcard;
            }
            if word.len() > VARIABLE_PREFIX.len_utf8() && word.starts_with(VARIABLE_PREFIX) {
                return Self::Variable(Var::new(&**word));
            }
        }
        Self::Constant(term)
    }

    /// Create a variable slot.
    #[must_use]
    pub fn var(name: impl AsRef<str>) -> Self {
        Self::Variable(Var::new(name))
    }

    /// The constant term, if this slot is constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<&Term> {
        match self {
            Self::Constant(term) => Some(term),
            _ => None,
        }
    }

    fn resolve<'a>(&'a self, binding: &'a Binding) -> Option<&'a Term> {
        match self {
            Self::Constant(term) => Some(term),
            Self::Variable(var) => binding.get_var(var),
            Self::Wildcard => None,
        }
    }
}

impl From<Term> for Slot {
    fn from(term: Term) -> Self {
        Self::token(term)
    }
}

impl From<&str> for Slot {
    fn from(s: &str) -> Self {
        Self::token(Term::word(s))
    }
}

impl From<&Term> for Slot {
    fn from(term: &Term) -> Self {
        Self::Constant(term.clone())
    }
}

impl From<Var> for Slot {
    fn from(var: Var) -> Self {
        Self::Variable(var)
    }
}

impl From<f64> for Slot {
    fn from(n: f64) -> Self {
        Self::Constant(Term::number(n))
    }
}

impl From<i64> for Slot {
    fn from(n: i64) -> Self {
        Self::Constant(Term::from(n))
    }
}

impl From<i32> for Slot {
    fn from(n: i32) -> Self {
        Self::Constant(Term::from(n))
    }
}

impl From<bool> for Slot {
    fn from(b: bool) -> Self {
        Self::Constant(Term::Boolean(b))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(term) => write!(f, "{}", term),
            Self::Variable(var) => write!(f, "{}", var),
            Self::Wildcard => f.write_str(WILDCARD),
        }
    }
}

impl Serialize for Slot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Constant(term) => term.serialize(serializer),
            Self::Variable(var) => var.serialize(serializer),
            Self::Wildcard => serializer.serialize_str(WILDCARD),
        }
    }
}

// =============================================================================
// BINDING
// =============================================================================

/// An assignment of terms to variables, ordered by variable name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Binding(BTreeMap<Var, Term>);

impl Binding {
    /// Create an empty binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a variable by name (with or without the `?` marker).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.0
            .get(name.strip_prefix(VARIABLE_PREFIX).unwrap_or(name))
    }

    #[must_use]
    pub fn get_var(&self, var: &Var) -> Option<&Term> {
        self.0.get(var)
    }

    /// Bind a variable, replacing any previous term.
    pub fn insert(&mut self, var: Var, term: Term) {
        self.0.insert(var, term);
    }

    /// Builder form of `insert`.
    #[must_use]
    pub fn with(mut self, name: impl AsRef<str>, term: impl Into<Term>) -> Self {
        self.insert(Var::new(name), term.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(variable, term)` pairs in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.0.iter()
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (var, term)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} = {}", var, term)?;
        }
        f.write_str("}")
    }
}

// =============================================================================
// PATTERN
// =============================================================================

/// A quad template of four slots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "Vec<Slot>")]
pub struct Pattern {
    pub entity: Slot,
    pub attribute: Slot,
    pub value: Slot,
    pub context: Slot,
}

impl Pattern {
    /// Create a pattern. String arguments are read as grammar tokens.
    #[must_use]
    pub fn new(
        entity: impl Into<Slot>,
        attribute: impl Into<Slot>,
        value: impl Into<Slot>,
        context: impl Into<Slot>,
    ) -> Self {
        Self {
            entity: entity.into(),
            attribute: attribute.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    /// The four slots in canonical order.
    #[must_use]
    pub fn slots(&self) -> [&Slot; 4] {
        [&self.entity, &self.attribute, &self.value, &self.context]
    }

    /// Variables in slot order (repeats included).
    pub fn variables(&self) -> impl Iterator<Item = &Var> {
        self.slots().into_iter().filter_map(|slot| match slot {
            Slot::Variable(var) => Some(var),
            _ => None,
        })
    }

    /// Whether every constant slot equals the quad's term in that position.
    ///
    /// Variables and wildcards are ignored, so this is a necessary (not
    /// sufficient) condition for `bind` to succeed.
    #[must_use]
    pub fn accepts(&self, quad: &Quad) -> bool {
        self.slots()
            .into_iter()
            .zip(quad.terms())
            .all(|(slot, term)| slot.as_constant().is_none_or(|c| c == term))
    }

    /// Match the quad under `binding`, returning the extended binding.
    #[must_use]
    pub fn bind(&self, quad: &Quad, binding: &Binding) -> Option<Binding> {
        let mut extended = binding.clone();
        for (slot, term) in self.slots().into_iter().zip(quad.terms()) {
            match slot {
                Slot::Wildcard => {}
                Slot::Constant(constant) => {
                    if constant != term {
                        return None;
                    }
                }
                Slot::Variable(var) => match extended.get_var(var) {
                    Some(bound) if bound != term => return None,
                    Some(_) => {}
                    None => extended.insert(var.clone(), term.clone()),
                },
            }
        }
        Some(extended)
    }

    /// Replace bound variables with their terms.
    #[must_use]
    pub fn substitute(&self, binding: &Binding) -> Self {
        let fill = |slot: &Slot| match slot {
            Slot::Variable(var) => binding
                .get_var(var)
                .map_or_else(|| slot.clone(), |term| Slot::Constant(term.clone())),
            _ => slot.clone(),
        };
        Self {
            entity: fill(&self.entity),
            attribute: fill(&self.attribute),
            value: fill(&self.value),
            context: fill(&self.context),
        }
    }

    /// Fill the template from a binding.
    ///
    /// Bound variables become their terms; unbound variables and wildcards
    /// pass through as the literal words `?name` and `*`.
    #[must_use]
    pub fn instantiate(&self, binding: &Binding) -> Quad {
        let fill = |slot: &Slot| {
            slot.resolve(binding)
                .cloned()
                .unwrap_or_else(|| Term::word(slot.to_string()))
        };
        Quad::new(
            fill(&self.entity),
            fill(&self.attribute),
            fill(&self.value),
            fill(&self.context),
        )
    }
}

impl TryFrom<Vec<Slot>> for Pattern {
    type Error = GraphError;

    /// Four tokens, or three with the context defaulting to the wildcard.
    fn try_from(slots: Vec<Slot>) -> Result<Self, Self::Error> {
        let count = slots.len();
        let mut slots = slots.into_iter();
        match (slots.next(), slots.next(), slots.next(), slots.next(), count) {
            (Some(entity), Some(attribute), Some(value), context, 3 | 4) => Ok(Self {
                entity,
                attribute,
                value,
                context: context.unwrap_or(Slot::Wildcard),
            }),
            _ => Err(GraphError::InvalidPattern(format!(
                "expected 3 or 4 slots, found {}",
                count
            ))),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} {} {} {})",
            self.entity, self.attribute, self.value, self.context
        )
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.entity, &self.attribute, &self.value, &self.context).serialize(serializer)
    }
}

/// Render a pattern list as space-separated patterns.
#[must_use]
pub fn render(patterns: &[Pattern]) -> String {
    patterns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// TESTS
// =============================================================================
