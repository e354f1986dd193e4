// anvil-rules/tests/eval.rs
// ============================================================================
// Module: Rule Evaluation Tests
// Description: Tests for rule evaluation semantics over fact maps.
// ============================================================================
//! ## Overview
//! Validates short-circuit combinators, missing-fact semantics, and the
//! comparison leaves.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic rule fixtures.")]
#![allow(clippy::expect_used, reason = "Tests use expect for explicit failure messages.")]

use anvil_rules::Facts;
use anvil_rules::Rule;
use smallvec::smallvec;

/// Builds a fact map from string pairs.
fn facts(pairs: &[(&str, &str)]) -> Facts {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

#[test]
fn test_eq_matches_exact_value() {
    let rule = Rule::Eq {
        fact: "osfamily".to_string(),
        value: "RedHat".to_string(),
    };
    assert!(rule.matches(&facts(&[("osfamily", "RedHat")])).unwrap());
    assert!(!rule.matches(&facts(&[("osfamily", "Debian")])).unwrap());
}

#[test]
fn test_missing_fact_fails_every_leaf() {
    let empty = Facts::new();
    let leaves = [
        Rule::Eq {
            fact: "memory".to_string(),
            value: "8".to_string(),
        },
        Rule::Neq {
            fact: "memory".to_string(),
            value: "8".to_string(),
        },
        Rule::Like {
            fact: "memory".to_string(),
            pattern: ".*".to_string(),
        },
        Rule::Gt {
            fact: "memory".to_string(),
            value: 0.0,
        },
    ];
    for rule in leaves {
        assert!(!rule.matches(&empty).unwrap(), "missing fact must fail {rule:?}");
    }
}

#[test]
fn test_neq_requires_fact_presence() {
    let rule = Rule::Neq {
        fact: "virtual".to_string(),
        value: "physical".to_string(),
    };
    assert!(rule.matches(&facts(&[("virtual", "kvm")])).unwrap());
    assert!(!rule.matches(&facts(&[("virtual", "physical")])).unwrap());
    assert!(!rule.matches(&Facts::new()).unwrap());
}

#[test]
fn test_like_is_anchored() {
    let rule = Rule::Like {
        fact: "productname".to_string(),
        pattern: "PowerEdge.*".to_string(),
    };
    assert!(rule.matches(&facts(&[("productname", "PowerEdge R740")])).unwrap());
    assert!(!rule.matches(&facts(&[("productname", "Dell PowerEdge R740")])).unwrap());
}

#[test]
fn test_numeric_ordering_parses_fact_values() {
    let rule = Rule::Gte {
        fact: "processorcount".to_string(),
        value: 4.0,
    };
    assert!(rule.matches(&facts(&[("processorcount", "8")])).unwrap());
    assert!(rule.matches(&facts(&[("processorcount", " 4 ")])).unwrap());
    assert!(!rule.matches(&facts(&[("processorcount", "2")])).unwrap());
    assert!(!rule.matches(&facts(&[("processorcount", "lots")])).unwrap());
}

#[test]
fn test_and_or_not_combine() {
    let rule = Rule::And {
        rules: smallvec![
            Box::new(Rule::Eq {
                fact: "osfamily".to_string(),
                value: "RedHat".to_string(),
            }),
            Box::new(Rule::Or {
                rules: smallvec![
                    Box::new(Rule::Gte {
                        fact: "memorysize_mb".to_string(),
                        value: 4096.0,
                    }),
                    Box::new(Rule::Eq {
                        fact: "is_lab".to_string(),
                        value: "true".to_string(),
                    }),
                ],
            }),
            Box::new(Rule::Not {
                rule: Box::new(Rule::Eq {
                    fact: "virtual".to_string(),
                    value: "docker".to_string(),
                }),
            }),
        ],
    };
    let matching = facts(&[("osfamily", "RedHat"), ("memorysize_mb", "8192"), ("virtual", "kvm")]);
    assert!(rule.matches(&matching).unwrap());

    let excluded =
        facts(&[("osfamily", "RedHat"), ("memorysize_mb", "8192"), ("virtual", "docker")]);
    assert!(!rule.matches(&excluded).unwrap());
}

#[test]
fn test_evaluation_is_deterministic_across_calls() {
    let rule = Rule::Like {
        fact: "serialnumber".to_string(),
        pattern: "[A-Z]{3}[0-9]+".to_string(),
    };
    let map = facts(&[("serialnumber", "ABC123")]);
    let first = rule.matches(&map).unwrap();
    for _ in 0..16 {
        assert_eq!(rule.matches(&map).unwrap(), first);
    }
}

#[test]
fn test_serde_round_trips_tagged_form() {
    let json = serde_json::json!({
        "op": "and",
        "rules": [
            {"op": "eq", "fact": "osfamily", "value": "Debian"},
            {"op": "lt", "fact": "uptime_days", "value": 30.0},
        ],
    });
    let rule: Rule = serde_json::from_value(json).unwrap();
    rule.validate().unwrap();
    assert!(rule.matches(&facts(&[("osfamily", "Debian"), ("uptime_days", "2")])).unwrap());
}
