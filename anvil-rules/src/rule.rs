// anvil-rules/src/rule.rs
// ============================================================================
// Module: Rule Algebra
// Description: Boolean match rules over string-valued node facts.
// Purpose: Define the `Rule` tree, its validation, and pure evaluation.
// Dependencies: regex, serde, smallvec
// ============================================================================

//! ## Overview
//! A [`Rule`] is a composable boolean tree: comparison leaves over named
//! facts, combined with `and`/`or`/`not`. Evaluation short-circuits and is
//! free of side effects; identical inputs always produce identical output.
//! A missing fact makes any leaf evaluate false rather than erroring, so
//! policy decisions stay reproducible across repeated checkins.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::RuleError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum permitted nesting depth for a rule tree.
pub const MAX_RULE_DEPTH: usize = 32;

// ============================================================================
// SECTION: Facts
// ============================================================================

/// Fact map evaluated by rules: ordered fact name to string value.
pub type Facts = BTreeMap<String, String>;

// ============================================================================
// SECTION: Rule Definition
// ============================================================================

/// Boolean match rule over node facts.
///
/// Combinators are universal; leaves compare a single named fact against a
/// literal. Leaves never error on missing facts: a fact that is absent (or
/// unparsable for numeric leaves) simply fails the comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Rule {
    /// Logical AND: all sub-rules must match. Short-circuits on the first
    /// failure. An empty `and` is rejected at validation.
    And {
        /// Sub-rules, evaluated in order.
        rules: SmallVec<[Box<Rule>; 4]>,
    },
    /// Logical OR: at least one sub-rule must match. Short-circuits on the
    /// first success. An empty `or` is rejected at validation.
    Or {
        /// Sub-rules, evaluated in order.
        rules: SmallVec<[Box<Rule>; 4]>,
    },
    /// Logical NOT: inverts the sub-rule.
    Not {
        /// The inverted sub-rule.
        rule: Box<Rule>,
    },
    /// String equality against the fact value.
    Eq {
        /// Fact name.
        fact: String,
        /// Literal to compare against.
        value: String,
    },
    /// String inequality against the fact value. A missing fact fails the
    /// leaf rather than counting as "not equal".
    Neq {
        /// Fact name.
        fact: String,
        /// Literal to compare against.
        value: String,
    },
    /// Anchored regular-expression match against the fact value.
    Like {
        /// Fact name.
        fact: String,
        /// Regular expression pattern; anchored to the whole value.
        pattern: String,
    },
    /// Numeric less-than comparison.
    Lt {
        /// Fact name; the value is parsed as a float.
        fact: String,
        /// Literal to compare against.
        value: f64,
    },
    /// Numeric less-than-or-equal comparison.
    Lte {
        /// Fact name; the value is parsed as a float.
        fact: String,
        /// Literal to compare against.
        value: f64,
    },
    /// Numeric greater-than comparison.
    Gt {
        /// Fact name; the value is parsed as a float.
        fact: String,
        /// Literal to compare against.
        value: f64,
    },
    /// Numeric greater-than-or-equal comparison.
    Gte {
        /// Fact name; the value is parsed as a float.
        fact: String,
        /// Literal to compare against.
        value: f64,
    },
}

// ============================================================================
// SECTION: Constructors
// ============================================================================

impl Rule {
    /// Builds a logical AND over the provided rules.
    #[must_use]
    pub fn and(rules: Vec<Self>) -> Self {
        Self::And {
            rules: rules.into_iter().map(Box::new).collect(),
        }
    }

    /// Builds a logical OR over the provided rules.
    #[must_use]
    pub fn or(rules: Vec<Self>) -> Self {
        Self::Or {
            rules: rules.into_iter().map(Box::new).collect(),
        }
    }

    /// Builds a logical NOT over the provided rule.
    #[must_use]
    pub fn not(rule: Self) -> Self {
        Self::Not {
            rule: Box::new(rule),
        }
    }

    /// Builds an equality leaf.
    #[must_use]
    pub fn eq(fact: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            fact: fact.into(),
            value: value.into(),
        }
    }

    /// Builds an inequality leaf.
    #[must_use]
    pub fn neq(fact: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Neq {
            fact: fact.into(),
            value: value.into(),
        }
    }

    /// Builds an anchored regular-expression leaf.
    #[must_use]
    pub fn like(fact: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            fact: fact.into(),
            pattern: pattern.into(),
        }
    }

    /// Builds a numeric less-than leaf.
    #[must_use]
    pub fn lt(fact: impl Into<String>, value: f64) -> Self {
        Self::Lt {
            fact: fact.into(),
            value,
        }
    }

    /// Builds a numeric less-than-or-equal leaf.
    #[must_use]
    pub fn lte(fact: impl Into<String>, value: f64) -> Self {
        Self::Lte {
            fact: fact.into(),
            value,
        }
    }

    /// Builds a numeric greater-than leaf.
    #[must_use]
    pub fn gt(fact: impl Into<String>, value: f64) -> Self {
        Self::Gt {
            fact: fact.into(),
            value,
        }
    }

    /// Builds a numeric greater-than-or-equal leaf.
    #[must_use]
    pub fn gte(fact: impl Into<String>, value: f64) -> Self {
        Self::Gte {
            fact: fact.into(),
            value,
        }
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

impl Rule {
    /// Validates the rule tree for use in a tag.
    ///
    /// This is the construction-time gate: patterns must compile,
    /// combinators must carry operands, numeric literals must be finite,
    /// fact names must be non-empty, and nesting must stay within
    /// [`MAX_RULE_DEPTH`]. A rule that passes validation evaluates without
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] describing the first defect found.
    pub fn validate(&self) -> Result<(), RuleError> {
        self.validate_at(0)
    }

    /// Validates one level of the rule tree.
    fn validate_at(&self, depth: usize) -> Result<(), RuleError> {
        if depth >= MAX_RULE_DEPTH {
            return Err(RuleError::TooDeep {
                limit: MAX_RULE_DEPTH,
            });
        }
        match self {
            Self::And {
                rules,
            } => {
                if rules.is_empty() {
                    return Err(RuleError::EmptyCombinator {
                        op: "and",
                    });
                }
                rules.iter().try_for_each(|rule| rule.validate_at(depth + 1))
            }
            Self::Or {
                rules,
            } => {
                if rules.is_empty() {
                    return Err(RuleError::EmptyCombinator {
                        op: "or",
                    });
                }
                rules.iter().try_for_each(|rule| rule.validate_at(depth + 1))
            }
            Self::Not {
                rule,
            } => rule.validate_at(depth + 1),
            Self::Eq {
                fact, ..
            }
            | Self::Neq {
                fact, ..
            } => validate_fact_name(fact),
            Self::Like {
                fact,
                pattern,
            } => {
                validate_fact_name(fact)?;
                compile_pattern(pattern).map(|_| ())
            }
            Self::Lt {
                fact,
                value,
            }
            | Self::Lte {
                fact,
                value,
            }
            | Self::Gt {
                fact,
                value,
            }
            | Self::Gte {
                fact,
                value,
            } => {
                validate_fact_name(fact)?;
                if value.is_finite() {
                    Ok(())
                } else {
                    Err(RuleError::NonFiniteLiteral {
                        fact: fact.clone(),
                    })
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

impl Rule {
    /// Evaluates the rule against a fact map with short-circuiting.
    ///
    /// Evaluation is pure: no clock, no environment, no I/O. Missing facts
    /// fail the enclosing leaf and never error.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] only for rules that escaped validation, such
    /// as a `like` pattern that no longer compiles after a store version
    /// skew.
    pub fn matches(&self, facts: &Facts) -> Result<bool, RuleError> {
        match self {
            Self::And {
                rules,
            } => {
                for rule in rules {
                    if !rule.matches(facts)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or {
                rules,
            } => {
                for rule in rules {
                    if rule.matches(facts)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not {
                rule,
            } => Ok(!rule.matches(facts)?),
            Self::Eq {
                fact,
                value,
            } => Ok(facts.get(fact).is_some_and(|actual| actual == value)),
            Self::Neq {
                fact,
                value,
            } => Ok(facts.get(fact).is_some_and(|actual| actual != value)),
            Self::Like {
                fact,
                pattern,
            } => {
                let Some(actual) = facts.get(fact) else {
                    return Ok(false);
                };
                let regex = compile_pattern(pattern)?;
                Ok(regex.is_match(actual))
            }
            Self::Lt {
                fact,
                value,
            } => Ok(numeric_fact(facts, fact).is_some_and(|actual| actual < *value)),
            Self::Lte {
                fact,
                value,
            } => Ok(numeric_fact(facts, fact).is_some_and(|actual| actual <= *value)),
            Self::Gt {
                fact,
                value,
            } => Ok(numeric_fact(facts, fact).is_some_and(|actual| actual > *value)),
            Self::Gte {
                fact,
                value,
            } => Ok(numeric_fact(facts, fact).is_some_and(|actual| actual >= *value)),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects empty fact names at validation.
fn validate_fact_name(fact: &str) -> Result<(), RuleError> {
    if fact.is_empty() {
        return Err(RuleError::EmptyFactName);
    }
    Ok(())
}

/// Compiles a `like` pattern anchored to the whole fact value.
fn compile_pattern(pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|err| RuleError::InvalidPattern {
        pattern: pattern.to_string(),
        detail: err.to_string(),
    })
}

/// Parses a fact as a finite float, or `None` when absent or unparsable.
fn numeric_fact(facts: &Facts, fact: &str) -> Option<f64> {
    facts.get(fact).and_then(|value| value.trim().parse::<f64>().ok()).filter(|v| v.is_finite())
}
