// anvil-core/tests/identity.rs
// ============================================================================
// Module: Identity Resolver Tests
// Description: Tests for hardware identity resolution and ambiguity handling.
// ============================================================================
//! ## Overview
//! Pins down the partial-match predicate with explicit fixtures and
//! validates determinism, duplicate-registration conflicts, and ambiguity
//! reporting.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic store fixtures.")]
#![allow(clippy::expect_used, reason = "Tests use expect for explicit failure messages.")]

use anvil_core::FactMap;
use anvil_core::InMemoryProvisionStore;
use anvil_core::NodeEvent;
use anvil_core::ProvisionStore;
use anvil_core::StoreError;
use anvil_core::Timestamp;
use anvil_core::runtime::identity;
use anvil_core::runtime::identity::IdentityError;
use anvil_core::runtime::identity::Lookup;

/// Builds a fact map from string pairs.
fn facts(pairs: &[(&str, &str)]) -> FactMap {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

/// Fixed timestamp for deterministic fixtures.
const NOW: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

#[test]
fn test_lookup_is_deterministic() {
    let store = InMemoryProvisionStore::new();
    let boot_facts = facts(&[("net0", "52-54-00-aa-bb-01"), ("serial", "SER-1")]);
    let node = identity::lookup_or_register(&store, &boot_facts, NOW).unwrap();

    for _ in 0..8 {
        match identity::lookup(&store, &boot_facts, NOW).unwrap() {
            Lookup::Found(found) => assert_eq!(found.id, node.id),
            Lookup::NotFound => panic!("node must keep resolving"),
        }
    }
}

#[test]
fn test_nic_reordering_keeps_identity() {
    let store = InMemoryProvisionStore::new();
    let first = facts(&[("net0", "52-54-00-aa-bb-01"), ("net1", "52-54-00-aa-bb-02")]);
    let node = identity::lookup_or_register(&store, &first, NOW).unwrap();

    // Same MACs, swapped interface slots and different separator style.
    let reordered = facts(&[("net0", "52:54:00:AA:BB:02"), ("net1", "52:54:00:aa:bb:01")]);
    match identity::lookup(&store, &reordered, NOW).unwrap() {
        Lookup::Found(found) => assert_eq!(found.id, node.id),
        Lookup::NotFound => panic!("reordered NICs must resolve to the same node"),
    }
}

#[test]
fn test_partial_fact_availability_still_matches() {
    let store = InMemoryProvisionStore::new();
    let full = facts(&[("net0", "52-54-00-aa-bb-01"), ("serial", "SER-1"), ("uuid", "U-1")]);
    let node = identity::lookup_or_register(&store, &full, NOW).unwrap();

    // A later boot may only know the serial.
    let partial = facts(&[("serial", "ser-1")]);
    match identity::lookup(&store, &partial, NOW).unwrap() {
        Lookup::Found(found) => assert_eq!(found.id, node.id),
        Lookup::NotFound => panic!("one shared component is a match"),
    }
}

#[test]
fn test_unmatched_lookup_reports_not_found_without_creating() {
    let store = InMemoryProvisionStore::new();
    let result = identity::lookup(&store, &facts(&[("serial", "GHOST")]), NOW).unwrap();
    assert_eq!(result, Lookup::NotFound);
    assert!(store.nodes().unwrap().is_empty());
}

#[test]
fn test_no_identity_facts_is_an_error() {
    let store = InMemoryProvisionStore::new();
    let result = identity::lookup(&store, &facts(&[("hostname", "x")]), NOW);
    assert!(matches!(result, Err(IdentityError::NoIdentityFacts)));
}

#[test]
fn test_duplicate_registration_loses_with_conflict() {
    let store = InMemoryProvisionStore::new();
    let shared = facts(&[("net0", "52-54-00-aa-bb-01")]);
    store.create_node(shared.clone(), NOW).unwrap();
    let second = store.create_node(shared, NOW);
    assert!(matches!(second, Err(StoreError::Conflict(_))));
    assert_eq!(store.nodes().unwrap().len(), 1);
}

#[test]
fn test_register_retries_after_losing_the_race() {
    let store = InMemoryProvisionStore::new();
    let shared = facts(&[("net0", "52-54-00-aa-bb-01")]);
    let winner = store.create_node(shared.clone(), NOW).unwrap();

    // The loser's create conflicts; lookup_or_register must resolve to
    // the winner instead of erroring or duplicating.
    let resolved = identity::lookup_or_register(&store, &shared, NOW).unwrap();
    assert_eq!(resolved.id, winner.id);
    assert_eq!(store.nodes().unwrap().len(), 1);
}

#[test]
fn test_ambiguity_is_fatal_and_logged_against_every_match() {
    let store = InMemoryProvisionStore::new();
    let a = store.create_node(facts(&[("net0", "52-54-00-aa-bb-01")]), NOW).unwrap();
    let b = store.create_node(facts(&[("serial", "SER-9")]), NOW).unwrap();

    // Incoming facts overlap both stored identities.
    let overlap = facts(&[("net0", "52-54-00-aa-bb-01"), ("serial", "SER-9")]);
    let result = identity::lookup(&store, &overlap, NOW);
    let Err(IdentityError::Ambiguous {
        nodes,
    }) = result
    else {
        panic!("overlapping identities must be ambiguous");
    };
    assert_eq!(nodes, vec![a.id, b.id]);

    for id in [a.id, b.id] {
        let node = store.node(id).unwrap().unwrap();
        assert!(
            node.log
                .iter()
                .any(|entry| matches!(entry.event, NodeEvent::DuplicateIdentity { .. })),
            "ambiguity must be logged against {}",
            node.name()
        );
    }
}
