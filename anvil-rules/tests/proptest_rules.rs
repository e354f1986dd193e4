// anvil-rules/tests/proptest_rules.rs
// ============================================================================
// Module: Rule Determinism Properties
// Description: Property tests for rule evaluation determinism and totality.
// ============================================================================
//! ## Overview
//! Evaluation over validated rules must be total (never error) and
//! deterministic for arbitrary fact maps.

#![allow(clippy::unwrap_used, reason = "Property tests unwrap on validated fixtures.")]

use anvil_rules::Facts;
use anvil_rules::Rule;
use proptest::prelude::*;
use smallvec::smallvec;

/// Fixed rule exercising every leaf kind under combinators.
fn fixture_rule() -> Rule {
    Rule::Or {
        rules: smallvec![
            Box::new(Rule::And {
                rules: smallvec![
                    Box::new(Rule::Eq {
                        fact: "osfamily".to_string(),
                        value: "RedHat".to_string(),
                    }),
                    Box::new(Rule::Gte {
                        fact: "memorysize_mb".to_string(),
                        value: 2048.0,
                    }),
                ],
            }),
            Box::new(Rule::Not {
                rule: Box::new(Rule::Like {
                    fact: "productname".to_string(),
                    pattern: "Virtual.*".to_string(),
                }),
            }),
            Box::new(Rule::Lt {
                fact: "uptime_days".to_string(),
                value: 7.0,
            }),
        ],
    }
}

/// Strategy producing small fact maps with provisioning-shaped keys.
fn arb_facts() -> impl Strategy<Value = Facts> {
    let key = prop_oneof![
        Just("osfamily".to_string()),
        Just("memorysize_mb".to_string()),
        Just("productname".to_string()),
        Just("uptime_days".to_string()),
        "[a-z_]{1,12}",
    ];
    let value = prop_oneof![
        Just("RedHat".to_string()),
        Just("VirtualBox".to_string()),
        "[ -~]{0,24}",
        (0u32..100_000).prop_map(|n| n.to_string()),
    ];
    proptest::collection::btree_map(key, value, 0..8)
}

proptest! {
    #[test]
    fn prop_evaluation_is_total_over_validated_rules(facts in arb_facts()) {
        let rule = fixture_rule();
        rule.validate().unwrap();
        prop_assert!(rule.matches(&facts).is_ok());
    }

    #[test]
    fn prop_evaluation_is_deterministic(facts in arb_facts()) {
        let rule = fixture_rule();
        let first = rule.matches(&facts).unwrap();
        let second = rule.matches(&facts).unwrap();
        prop_assert_eq!(first, second);
    }
}
