//! # Innate Primitives
//!
//! Hardcoded vocabulary and limits for the Reify CORE.
//!
//! The store starts with zero facts but a fixed vocabulary: the attribute
//! names that productions read and write, the meta-types that describe them,
//! and the token markers of the pattern grammar. These are compiled into the
//! binary and are immutable at runtime.

// =============================================================================
// PATTERN GRAMMAR
// =============================================================================

/// Leading marker of a variable token (`?x`).
pub const VARIABLE_PREFIX: char = '?';

/// Token matching any term without binding it.
pub const WILDCARD: &str = "*";

// =============================================================================
// META TYPES
// =============================================================================

/// The type of all types. `TYPE!` is itself typed `TYPE!`.
pub const META_TYPE: &str = "TYPE!";

/// Type of registered compute operators.
pub const OPERATION_TYPE: &str = "OPERATION!";

/// Type of registered effects.
pub const EFFECT_TYPE: &str = "EFFECT!";

/// Type of registered aggregation definitions.
pub const AGGREGATION_TYPE: &str = "AGGREGATION!";

/// Type of installed rules.
pub const RULE_TYPE: &str = "RULE!";

// =============================================================================
// SELF-DESCRIPTION ATTRIBUTES
// =============================================================================

pub const TYPE: &str = "TYPE";
pub const DOCS: &str = "DOCS";
pub const CATEGORY: &str = "CATEGORY";

// =============================================================================
// PRODUCTION ATTRIBUTES
// =============================================================================

/// Rule description attributes.
pub const WHERE: &str = "WHERE";
pub const NAC: &str = "NAC";
pub const PRODUCE: &str = "PRODUCE";

/// Aggregation attributes.
pub const AGGREGATE: &str = "AGGREGATE";
pub const ITEM: &str = "ITEM";
pub const REFINES: &str = "REFINES";
pub const CURRENT: &str = "CURRENT";

/// Infix of versioned aggregation result keys: `{agg}:RESULT:V{n}`.
pub const RESULT_KEY_INFIX: &str = ":RESULT:";

/// Suffix of the aggregation version entity: `{agg}:VERSION`.
pub const VERSION_KEY_SUFFIX: &str = ":VERSION";

/// Compute operator attributes.
pub const OP: &str = "OP";
pub const X: &str = "X";
pub const Y: &str = "Y";
pub const VALUE: &str = "VALUE";
pub const COMPARE: &str = "COMPARE";
pub const LEFT: &str = "LEFT";
pub const RIGHT: &str = "RIGHT";

/// Effect attributes.
pub const EFFECT: &str = "EFFECT";
pub const INPUT: &str = "INPUT";
pub const STATUS: &str = "STATUS";
pub const ERROR: &str = "ERROR";

/// Written by compute operators and effects.
pub const RESULT: &str = "RESULT";

/// Effect status values.
pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_ERROR: &str = "ERROR";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of patterns in a single pattern list.
///
/// Joins are nested loops; this keeps loaded programs computationally bounded.
pub const MAX_PATTERNS_PER_LIST: usize = 64;

/// Maximum number of facts accepted from a single program.
pub const MAX_PROGRAM_FACTS: usize = 100_000;

/// Maximum length for word and string terms read from a program.
pub const MAX_TERM_LENGTH: usize = 65536;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_distinct() {
        assert_ne!(WILDCARD.chars().next(), Some(VARIABLE_PREFIX));
    }

    #[test]
    fn meta_types_are_marked() {
        for name in [
            META_TYPE,
            OPERATION_TYPE,
            EFFECT_TYPE,
            AGGREGATION_TYPE,
            RULE_TYPE,
        ] {
            assert!(name.ends_with('!'));
        }
    }
}
