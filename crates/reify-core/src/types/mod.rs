//! # Core Type Definitions
//!
//! This module contains the value model of the Reify fact store:
//! - Atomic values (`Term`) and their content hashes (`TermHash`)
//! - Facts (`Quad`) and their identities (`QuadId`)
//! - Watch identifiers (`WatchId`)
//! - Error types (`GraphError`, `EffectError`)
//!
//! ## Value Semantics
//!
//! All types in this module:
//! - Compare, order and hash by content, never by identity
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Are immutable once constructed

use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// TERM
// =============================================================================

/// An atomic value stored in a quad slot.
///
/// Two terms with equal content are interchangeable. A `Word` and a `String`
/// with the same text are different terms: words are symbols (entity ids,
/// attribute names, operator names), strings are data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "TermRepr", into = "TermRepr")]
pub enum Term {
    /// An interned symbol.
    Word(Arc<str>),
    /// A number. `-0.0` and `0.0` are the same term, as are all NaNs.
    Number(f64),
    /// A string literal.
    String(Arc<str>),
    /// A boolean.
    Boolean(bool),
    /// The absent value.
    Null,
}

impl Term {
    /// Create a word term.
    #[must_use]
    pub fn word(s: impl AsRef<str>) -> Self {
        Self::Word(Arc::from(s.as_ref()))
    }

    /// Create a string term.
    #[must_use]
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Arc::from(s.as_ref()))
    }

    /// Create a number term.
    #[must_use]
    pub fn number(n: f64) -> Self {
        Self::Number(canonical_number(n))
    }

    /// Best-effort numeric coercion.
    ///
    /// Numbers coerce to themselves; words and strings coerce when their
    /// trimmed text parses as a finite number. Everything else is `None`.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Word(s) | Self::String(s) => {
                s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    /// The text of a word or string term.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Word(s) | Self::String(s) => Some(&**s),
            _ => None,
        }
    }

    /// Stable 128-bit content hash.
    ///
    /// The hash depends only on the variant and the content, so it is stable
    /// across processes and platforms.
    #[must_use]
    pub fn content_hash(&self) -> TermHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.rank()]);
        match self {
            Self::Word(s) | Self::String(s) => {
                hasher.update(s.as_bytes());
            }
            Self::Number(n) => {
                hasher.update(&canonical_bits(*n).to_le_bytes());
            }
            Self::Boolean(b) => {
                hasher.update(&[u8::from(*b)]);
            }
            Self::Null => {}
        }
        TermHash(truncate_digest(&hasher.finalize()))
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Number(_) => 2,
            Self::Word(_) => 3,
            Self::String(_) => 4,
        }
    }
}

fn canonical_number(n: f64) -> f64 {
    if n.is_nan() {
        f64::NAN
    } else if n == 0.0 {
        0.0
    } else {
        n
    }
}

fn canonical_bits(n: f64) -> u64 {
    canonical_number(n).to_bits()
}

fn truncate_digest(hash: &blake3::Hash) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&hash.as_bytes()[..16]);
    u128::from_le_bytes(buf)
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Term {}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Word(a), Self::Word(b)) | (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => {
                canonical_number(*a).total_cmp(&canonical_number(*b))
            }
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Word(s) | Self::String(s) => s.hash(state),
            Self::Number(n) => canonical_bits(*n).hash(state),
            Self::Boolean(b) => b.hash(state),
            Self::Null => {}
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", &**s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Self::word(s)
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Self::Word(Arc::from(s))
    }
}

impl From<&String> for Term {
    fn from(s: &String) -> Self {
        Self::word(s)
    }
}

impl From<f64> for Term {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<i64> for Term {
    fn from(n: i64) -> Self {
        Self::number(n as f64)
    }
}

impl From<i32> for Term {
    fn from(n: i32) -> Self {
        Self::number(f64::from(n))
    }
}

impl From<u64> for Term {
    fn from(n: u64) -> Self {
        Self::number(n as f64)
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<&Term> for Term {
    fn from(t: &Term) -> Self {
        t.clone()
    }
}

/// Serde shape of a term.
///
/// Plain strings read as words; `{ string = "..." }` reads as a string
/// literal so the distinction survives formats without a symbol type.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TermRepr {
    Null,
    Boolean(bool),
    Number(f64),
    Word(String),
    Quoted { string: String },
}

impl From<TermRepr> for Term {
    fn from(repr: TermRepr) -> Self {
        match repr {
            TermRepr::Null => Self::Null,
            TermRepr::Boolean(b) => Self::Boolean(b),
            TermRepr::Number(n) => Self::number(n),
            TermRepr::Word(s) => Self::from(s),
            TermRepr::Quoted { string } => Self::String(Arc::from(string)),
        }
    }
}

impl From<Term> for TermRepr {
    fn from(term: Term) -> Self {
        match term {
            Term::Null => Self::Null,
            Term::Boolean(b) => Self::Boolean(b),
            Term::Number(n) => Self::Number(n),
            Term::Word(s) => Self::Word(s.to_string()),
            Term::String(s) => Self::Quoted {
                string: s.to_string(),
            },
        }
    }
}

/// Content hash of a single term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermHash(pub u128);

// =============================================================================
// QUAD
// =============================================================================

/// Identity of a quad: the hash of its four term hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuadId(pub u128);

impl QuadId {
    /// Combine four term hashes into a quad identity.
    #[must_use]
    pub fn from_hashes(hashes: [TermHash; 4]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for hash in hashes {
            hasher.update(&hash.0.to_le_bytes());
        }
        Self(truncate_digest(&hasher.finalize()))
    }

    /// Raw little-endian bytes of the identity.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for QuadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A fact: `(entity, attribute, value, context)`.
///
/// Quads are immutable. The identity is computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quad {
    entity: Term,
    attribute: Term,
    value: Term,
    context: Term,
    id: QuadId,
}

impl Quad {
    /// Create a new quad.
    #[must_use]
    pub fn new(
        entity: impl Into<Term>,
        attribute: impl Into<Term>,
        value: impl Into<Term>,
        context: impl Into<Term>,
    ) -> Self {
        let entity = entity.into();
        let attribute = attribute.into();
        let value = value.into();
        let context = context.into();
        let id = QuadId::from_hashes([
            entity.content_hash(),
            attribute.content_hash(),
            value.content_hash(),
            context.content_hash(),
        ]);
        Self {
            entity,
            attribute,
            value,
            context,
            id,
        }
    }

    #[must_use]
    pub fn id(&self) -> QuadId {
        self.id
    }

    #[must_use]
    pub fn entity(&self) -> &Term {
        &self.entity
    }

    #[must_use]
    pub fn attribute(&self) -> &Term {
        &self.attribute
    }

    #[must_use]
    pub fn value(&self) -> &Term {
        &self.value
    }

    #[must_use]
    pub fn context(&self) -> &Term {
        &self.context
    }

    /// The four slots in canonical order.
    #[must_use]
    pub fn terms(&self) -> [&Term; 4] {
        [&self.entity, &self.attribute, &self.value, &self.context]
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({} {} {} {})",
            self.entity, self.attribute, self.value, self.context
        )
    }
}

impl Serialize for Quad {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.entity, &self.attribute, &self.value, &self.context).serialize(serializer)
    }
}

// =============================================================================
// WATCH IDENTIFIER
// =============================================================================

/// Identifier of a registered watch.
///
/// Ids are assigned in registration order and never reused, so ordering by
/// id is ordering by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchId(pub u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Failure reported by an effect's `execute`.
///
/// Effect failures are data: they are recorded as `ERROR`/`STATUS` facts and
/// never propagate out of `add`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EffectError(pub String);

impl EffectError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that can occur in the Reify system.
///
/// - Join failures are not errors; they yield zero bindings
/// - Unknown operator and effect names are not errors; they are no-ops
/// - The CORE never panics; all errors are recoverable
#[derive(Debug, Error)]
pub enum GraphError {
    /// A pattern does not have the shape of the pattern grammar.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// A fact tuple cannot be turned into a quad.
    #[error("Invalid fact: {0}")]
    InvalidFact(String),

    /// A program failed validation before anything was written.
    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    /// A production definition reported a programming error.
    #[error("Definition error: {0}")]
    Definition(String),

    /// A watch callback failed.
    #[error("Watch {watch} callback failed: {source}")]
    Callback {
        watch: WatchId,
        #[source]
        source: Box<GraphError>,
    },

    /// One or more callbacks failed while propagating a new quad.
    ///
    /// The quad is stored regardless; every watch still had its turn.
    #[error("{} watch callback(s) failed while propagating quad {quad}", .failures.len())]
    Propagation {
        quad: QuadId,
        failures: Vec<GraphError>,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Program text could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),
}

// =============================================================================
// TESTS
// =============================================================================
