// anvil-rules/src/error.rs
// ============================================================================
// Module: Rule Errors
// Description: Error types for rule validation and evaluation.
// Purpose: Distinguish construction-time rejection from evaluation faults.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Rules are validated when they are constructed; evaluation over a
//! validated rule is total. [`RuleError`] covers both the construction-time
//! rejections and the faults that can only occur when an unvalidated rule
//! reaches evaluation (for example after a store version skew).

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Rule validation and evaluation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// A `like` pattern failed to compile as a regular expression.
    #[error("invalid pattern {pattern:?}: {detail}")]
    InvalidPattern {
        /// The offending pattern text.
        pattern: String,
        /// Compilation failure detail.
        detail: String,
    },
    /// An `and`/`or` combinator carried no operands.
    #[error("{op} requires at least one operand")]
    EmptyCombinator {
        /// The combinator name.
        op: &'static str,
    },
    /// A numeric leaf carried a non-finite literal.
    #[error("numeric comparison against non-finite literal for fact {fact:?}")]
    NonFiniteLiteral {
        /// The fact name the leaf compares.
        fact: String,
    },
    /// A fact name was empty.
    #[error("rule leaf references an empty fact name")]
    EmptyFactName,
    /// The rule tree exceeded the nesting depth limit.
    #[error("rule nesting exceeds depth limit of {limit}")]
    TooDeep {
        /// Maximum permitted nesting depth.
        limit: usize,
    },
}
