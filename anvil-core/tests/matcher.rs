// anvil-core/tests/matcher.rs
// ============================================================================
// Module: Policy Matcher Tests
// Description: Tests for first-match policy selection.
// ============================================================================
//! ## Overview
//! Validates that `rule_number` order is the sole priority, that disabled
//! policies never match, that frozen tags survive tag deletion, and that
//! `max_count` caps binding.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic store fixtures.")]

use anvil_core::BrokerName;
use anvil_core::FactMap;
use anvil_core::InMemoryProvisionStore;
use anvil_core::InstallerName;
use anvil_core::Policy;
use anvil_core::PolicyName;
use anvil_core::ProvisionStore;
use anvil_core::RepoName;
use anvil_core::Tag;
use anvil_core::TagName;
use anvil_core::Timestamp;
use anvil_core::runtime::matcher;
use anvil_rules::Rule;

/// Fixed timestamp for deterministic fixtures.
const NOW: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

/// Builds a policy fixture with frozen tags.
fn policy(name: &str, rule_number: u32, tags: Vec<Tag>) -> Policy {
    Policy {
        name: PolicyName::new(name),
        rule_number,
        enabled: true,
        tags,
        repo: RepoName::new("r1"),
        broker: BrokerName::new("b1"),
        installer: InstallerName::new("i1"),
        hostname_pattern: "host${id}.example.com".to_string(),
        max_count: None,
    }
}

/// Tag matching `osfamily = RedHat`.
fn redhat_tag() -> Tag {
    Tag {
        name: TagName::new("redhat"),
        rule: Rule::eq("osfamily", "RedHat"),
    }
}

/// Builds a fact map from string pairs.
fn facts(pairs: &[(&str, &str)]) -> FactMap {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

#[test]
fn test_lowest_rule_number_wins_regardless_of_creation_order() {
    let store = InMemoryProvisionStore::new();
    // Create the catch-all second policy first: creation order must not
    // matter, only rule_number.
    store.create_policy(&policy("catch-all", 2, Vec::new())).unwrap();
    store.create_policy(&policy("redhat-only", 1, vec![redhat_tag()])).unwrap();

    let mut node = store.create_node(facts(&[("net0", "52-54-00-00-00-01")]), NOW).unwrap();
    node.merge_facts(&facts(&[("osfamily", "RedHat")]));

    let matched = matcher::match_policy(&store, &node).unwrap().unwrap();
    assert_eq!(matched.name.as_str(), "redhat-only");
}

#[test]
fn test_unsatisfied_tags_fall_through_to_later_policies() {
    let store = InMemoryProvisionStore::new();
    store.create_policy(&policy("redhat-only", 1, vec![redhat_tag()])).unwrap();
    store.create_policy(&policy("catch-all", 2, Vec::new())).unwrap();

    let mut node = store.create_node(facts(&[("net0", "52-54-00-00-00-02")]), NOW).unwrap();
    node.merge_facts(&facts(&[("osfamily", "Debian")]));

    let matched = matcher::match_policy(&store, &node).unwrap().unwrap();
    assert_eq!(matched.name.as_str(), "catch-all");
}

#[test]
fn test_disabled_policies_are_never_eligible() {
    let store = InMemoryProvisionStore::new();
    let mut disabled = policy("redhat-only", 1, vec![redhat_tag()]);
    disabled.enabled = false;
    store.create_policy(&disabled).unwrap();

    let mut node = store.create_node(facts(&[("net0", "52-54-00-00-00-03")]), NOW).unwrap();
    node.merge_facts(&facts(&[("osfamily", "RedHat")]));

    assert!(matcher::match_policy(&store, &node).unwrap().is_none());
}

#[test]
fn test_frozen_tags_survive_tag_deletion() {
    let store = InMemoryProvisionStore::new();
    let tag = redhat_tag();
    store.create_tag(&tag).unwrap();
    store.create_policy(&policy("redhat-only", 1, vec![tag.clone()])).unwrap();
    assert!(store.delete_tag(&tag.name).unwrap());

    let mut node = store.create_node(facts(&[("net0", "52-54-00-00-00-04")]), NOW).unwrap();
    node.merge_facts(&facts(&[("osfamily", "RedHat")]));

    // The policy's frozen copy still gates eligibility.
    let matched = matcher::match_policy(&store, &node).unwrap().unwrap();
    assert_eq!(matched.name.as_str(), "redhat-only");
}

#[test]
fn test_max_count_caps_binding() {
    let store = InMemoryProvisionStore::new();
    let mut capped = policy("capped", 1, Vec::new());
    capped.max_count = Some(1);
    store.create_policy(&capped).unwrap();

    let mut first = store.create_node(facts(&[("net0", "52-54-00-00-00-05")]), NOW).unwrap();
    first.policy = Some(PolicyName::new("capped"));
    store.save_node(&first).unwrap();

    let second = store.create_node(facts(&[("net0", "52-54-00-00-00-06")]), NOW).unwrap();
    assert!(matcher::match_policy(&store, &second).unwrap().is_none());
}
