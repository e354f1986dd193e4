// anvil-core/tests/end_to_end.rs
// ============================================================================
// Module: Provisioning End-To-End Tests
// Description: Full command-to-boot-to-fetch provisioning sequence.
// ============================================================================
//! ## Overview
//! Drives the documented happy path: create a repo, a tag-gated policy, a
//! node via boot, binding on first boot, and the file-fetch precondition
//! flipping from conflict to success at bind time.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic store fixtures.")]

use anvil_core::CommandRouter;
use anvil_core::FactMap;
use anvil_core::InMemoryProvisionStore;
use anvil_core::NoopNotifier;
use anvil_core::PlaneError;
use anvil_core::ProvisionPlane;
use anvil_core::Timestamp;
use serde_json::json;

/// Fixed timestamp for deterministic fixtures.
const NOW: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

/// Builds a fact map from string pairs.
fn facts(pairs: &[(&str, &str)]) -> FactMap {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

#[test]
fn test_repo_policy_boot_bind_fetch_sequence() {
    let store = InMemoryProvisionStore::new();
    let router = CommandRouter::new(store.clone(), NoopNotifier);
    let plane = ProvisionPlane::new(store.clone());

    // Management side: repo, broker, installer, then the gated policy.
    router
        .execute("create-repo", json!({"name": "r1", "url": "http://mirror.example.com"}), NOW)
        .unwrap();
    router.execute("create-broker", json!({"name": "b1", "broker_type": "noop"}), NOW).unwrap();
    router
        .execute(
            "create-installer",
            json!({"name": "i1", "boot_seq": {"default": "install-kernel"}}),
            NOW,
        )
        .unwrap();
    router
        .execute(
            "create-policy",
            json!({
                "name": "p1",
                "rule_number": 1,
                "tags": [{"name": "t1", "rule": {"op": "eq", "fact": "role", "value": "worker"}}],
                "repo": "r1",
                "broker": "b1",
                "installer": "i1",
                "hostname_pattern": "worker${id}.example.com",
            }),
            NOW,
        )
        .unwrap();

    // A node boots without the classifying fact: registered but unbound,
    // and template fetches are refused with a policy conflict.
    let first = plane.boot(&facts(&[("net0", "52-54-00-00-03-01")]), NOW).unwrap();
    let id = first.node.id;
    assert!(!first.node.bound());
    assert!(matches!(
        plane.file(id, "post-install", "http://anvil/svc", NOW),
        Err(PlaneError::NoBoundPolicy(_))
    ));

    // The same hardware boots again once its facts classify it: the
    // matcher binds p1 on that boot.
    let second = plane.boot(&facts(&[("net0", "52-54-00-00-03-01"), ("role", "worker")]), NOW).unwrap();
    assert_eq!(second.node.id, id);
    assert_eq!(second.node.policy.as_ref().unwrap().as_str(), "p1");
    assert_eq!(second.template, "install-kernel");

    // With the binding in place the fetch succeeds and resolves the repo.
    let fetch = plane.file(id, "post-install", "http://anvil/svc", NOW).unwrap();
    assert_eq!(fetch.repo.name.as_str(), "r1");
    assert_eq!(fetch.installer.name.as_str(), "i1");
}
