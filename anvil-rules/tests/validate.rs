// anvil-rules/tests/validate.rs
// ============================================================================
// Module: Rule Validation Tests
// Description: Tests for construction-time rule rejection.
// ============================================================================
//! ## Overview
//! Malformed rules must be rejected when a tag is created, never during
//! evaluation.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic rule fixtures.")]

use anvil_rules::MAX_RULE_DEPTH;
use anvil_rules::Rule;
use anvil_rules::RuleError;
use smallvec::smallvec;

#[test]
fn test_invalid_pattern_is_a_construction_error() {
    let rule = Rule::Like {
        fact: "productname".to_string(),
        pattern: "(".to_string(),
    };
    assert!(matches!(rule.validate(), Err(RuleError::InvalidPattern { .. })));
}

#[test]
fn test_empty_combinators_are_rejected() {
    let and = Rule::And {
        rules: smallvec![],
    };
    let or = Rule::Or {
        rules: smallvec![],
    };
    assert_eq!(
        and.validate(),
        Err(RuleError::EmptyCombinator {
            op: "and"
        })
    );
    assert_eq!(
        or.validate(),
        Err(RuleError::EmptyCombinator {
            op: "or"
        })
    );
}

#[test]
fn test_non_finite_literal_is_rejected() {
    let rule = Rule::Gt {
        fact: "memorysize_mb".to_string(),
        value: f64::NAN,
    };
    assert!(matches!(rule.validate(), Err(RuleError::NonFiniteLiteral { .. })));
}

#[test]
fn test_empty_fact_name_is_rejected() {
    let rule = Rule::Eq {
        fact: String::new(),
        value: "x".to_string(),
    };
    assert_eq!(rule.validate(), Err(RuleError::EmptyFactName));
}

#[test]
fn test_depth_limit_is_enforced() {
    let mut rule = Rule::Eq {
        fact: "a".to_string(),
        value: "b".to_string(),
    };
    for _ in 0..MAX_RULE_DEPTH {
        rule = Rule::Not {
            rule: Box::new(rule),
        };
    }
    assert_eq!(
        rule.validate(),
        Err(RuleError::TooDeep {
            limit: MAX_RULE_DEPTH
        })
    );
}

#[test]
fn test_valid_rule_passes() {
    let rule = Rule::And {
        rules: smallvec![
            Box::new(Rule::Like {
                fact: "macaddress".to_string(),
                pattern: "de:ad:.*".to_string(),
            }),
            Box::new(Rule::Lte {
                fact: "boot_count".to_string(),
                value: 10.0,
            }),
        ],
    };
    rule.validate().unwrap();
}
