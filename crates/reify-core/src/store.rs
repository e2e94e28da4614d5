//! # Fact Store
//!
//! The append-only quad log for Reify CORE.
//!
//! This module implements the `FactStore` trait. Every accepted quad gets a
//! position in the log; positions are dense, start at zero and never change.
//! A position doubles as a logical timestamp: readers pass a `horizon` and see
//! only the quads stored before it.
//!
//! All indices use `BTreeMap` for deterministic ordering.
//! No `HashMap` allowed.

use crate::pattern::{Pattern, Slot};
use crate::{Quad, QuadId, Term};
use std::collections::BTreeMap;

// =============================================================================
// FACTSTORE TRAIT
// =============================================================================

/// The FactStore trait defines the storage operations the matcher needs.
///
/// Quads are never removed or mutated. `insert` of an identical quad is a
/// no-op.
pub trait FactStore {
    /// Append a quad. Returns its position, or `None` if it was already stored.
    fn insert(&mut self, quad: Quad) -> Option<usize>;

    /// Position of a stored quad.
    fn position(&self, id: QuadId) -> Option<usize>;

    /// The quad stored at a position.
    fn at(&self, position: usize) -> Option<&Quad>;

    /// Number of stored quads.
    fn len(&self) -> usize;

    /// Quads below `horizon` whose terms equal every constant slot of the
    /// pattern, in insertion order.
    ///
    /// Variables are not checked; the caller unifies.
    fn candidates<'a>(
        &'a self,
        pattern: &Pattern,
        horizon: usize,
    ) -> Box<dyn Iterator<Item = &'a Quad> + 'a>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: QuadId) -> bool {
        self.position(id).is_some()
    }

    fn get(&self, id: QuadId) -> Option<&Quad> {
        self.position(id).and_then(|position| self.at(position))
    }
}

// =============================================================================
// QUADSTORE IMPLEMENTATION
// =============================================================================

type Postings = Vec<usize>;

/// In-memory quad log with single-slot and pair indices.
///
/// Posting lists hold log positions in ascending order, so a horizon cut is
/// a binary search.
#[derive(Debug, Clone, Default)]
pub struct QuadStore {
    /// Insertion-ordered log.
    log: Vec<Quad>,

    /// Identity -> position.
    positions: BTreeMap<QuadId, usize>,

    by_entity: BTreeMap<Term, Postings>,
    by_attribute: BTreeMap<Term, Postings>,
    by_value: BTreeMap<Term, Postings>,
    by_context: BTreeMap<Term, Postings>,
    by_entity_attribute: BTreeMap<(Term, Term), Postings>,
    by_attribute_value: BTreeMap<(Term, Term), Postings>,
}

impl QuadStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All quads in insertion order.
    pub fn quads(&self) -> impl Iterator<Item = &Quad> {
        self.log.iter()
    }

    /// Number of distinct entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    /// Number of distinct attributes.
    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.by_attribute.len()
    }

    /// Number of distinct contexts.
    #[must_use]
    pub fn context_count(&self) -> usize {
        self.by_context.len()
    }

    /// Order-independent checksum of the stored set.
    ///
    /// Hashes quad identities in identity order, so two stores holding the
    /// same quads agree regardless of insertion order.
    #[must_use]
    pub fn checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for id in self.positions.keys() {
            hasher.update(&id.to_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Shortest posting list over the constant slots, or `None` for a full scan.
    fn postings(&self, pattern: &Pattern) -> Option<&[usize]> {
        let [entity, attribute, value, context] = pattern.slots().map(Slot::as_constant);
        let mut lists: Vec<&[usize]> = Vec::with_capacity(6);

        if let Some(e) = entity {
            lists.push(lookup(&self.by_entity, e));
        }
        if let Some(a) = attribute {
            lists.push(lookup(&self.by_attribute, a));
        }
        if let Some(v) = value {
            lists.push(lookup(&self.by_value, v));
        }
        if let Some(c) = context {
            lists.push(lookup(&self.by_context, c));
        }
        if let (Some(e), Some(a)) = (entity, attribute) {
            lists.push(lookup(&self.by_entity_attribute, &(e.clone(), a.clone())));
        }
        if let (Some(a), Some(v)) = (attribute, value) {
            lists.push(lookup(&self.by_attribute_value, &(a.clone(), v.clone())));
        }

        lists.into_iter().min_by_key(|list| list.len())
    }
}

fn lookup<'a, K: Ord>(index: &'a BTreeMap<K, Postings>, key: &K) -> &'a [usize] {
    index.get(key).map(Vec::as_slice).unwrap_or_default()
}

fn post<K: Ord>(index: &mut BTreeMap<K, Postings>, key: K, position: usize) {
    index.entry(key).or_default().push(position);
}

impl FactStore for QuadStore {
    fn insert(&mut self, quad: Quad) -> Option<usize> {
        if self.positions.contains_key(&quad.id()) {
            return None;
        }

        let position = self.log.len();
        self.positions.insert(quad.id(), position);

        let [e, a, v, c] = quad.terms().map(Term::clone);
        post(&mut self.by_entity_attribute, (e.clone(), a.clone()), position);
        post(&mut self.by_attribute_value, (a.clone(), v.clone()), position);
        post(&mut self.by_entity, e, position);
        post(&mut self.by_attribute, a, position);
        post(&mut self.by_value, v, position);
        post(&mut self.by_context, c, position);

        self.log.push(quad);
        Some(position)
    }

    fn position(&self, id: QuadId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    fn at(&self, position: usize) -> Option<&Quad> {
        self.log.get(position)
    }

    fn len(&self) -> usize {
        self.log.len()
    }

    fn candidates<'a>(
        &'a self,
        pattern: &Pattern,
        horizon: usize,
    ) -> Box<dyn Iterator<Item = &'a Quad> + 'a> {
        let filter = pattern.clone();
        match self.postings(pattern) {
            Some(list) => {
                let end = list.partition_point(|&position| position < horizon);
                Box::new(
                    list[..end]
                        .iter()
                        .filter_map(move |&position| self.log.get(position))
                        .filter(move |quad| filter.accepts(quad)),
                )
            }
            None => Box::new(self.log.iter().take(horizon)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
