// anvil-core/tests/commands.rs
// ============================================================================
// Module: Command Pipeline Tests
// Description: Tests for transactional command execution.
// ============================================================================
//! ## Overview
//! Validates all-or-nothing command semantics, the repo outbox commit,
//! idempotent toggles, and the closed command set.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic store fixtures.")]
#![allow(clippy::expect_used, reason = "Tests use expect for explicit failure messages.")]

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use anvil_core::CommandError;
use anvil_core::CommandOutcome;
use anvil_core::CommandRouter;
use anvil_core::CommitNotifier;
use anvil_core::FactMap;
use anvil_core::InMemoryProvisionStore;
use anvil_core::NodeEvent;
use anvil_core::NoopNotifier;
use anvil_core::OutboxEvent;
use anvil_core::PolicyName;
use anvil_core::ProvisionStore;
use anvil_core::RepoName;
use anvil_core::RepoState;
use anvil_core::Timestamp;
use serde_json::json;

/// Fixed timestamp for deterministic fixtures.
const NOW: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

/// Notifier counting commit notifications.
#[derive(Debug, Default, Clone)]
struct CountingNotifier {
    /// Number of notifications observed.
    count: Arc<AtomicUsize>,
}

impl CommitNotifier for CountingNotifier {
    fn notify(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds a router over a fresh in-memory store.
fn router() -> CommandRouter<InMemoryProvisionStore, NoopNotifier> {
    CommandRouter::new(InMemoryProvisionStore::new(), NoopNotifier)
}

/// Seeds the referenced repo/broker/installer rows for policy creation.
fn seed_references(store: &InMemoryProvisionStore) {
    let router = CommandRouter::new(store.clone(), NoopNotifier);
    router
        .execute(
            "create-repo",
            json!({"name": "r1", "url": "http://mirror.example.com/centos"}),
            NOW,
        )
        .unwrap();
    router.execute("create-broker", json!({"name": "b1", "broker_type": "noop"}), NOW).unwrap();
    router
        .execute(
            "create-installer",
            json!({"name": "i1", "boot_seq": {"1": "install-kernel", "default": "boot-local"}}),
            NOW,
        )
        .unwrap();
}

#[test]
fn test_unknown_command_is_rejected() {
    let result = router().execute("mint-node", json!({}), NOW);
    assert!(matches!(result, Err(CommandError::UnknownCommand(_))));
}

#[test]
fn test_malformed_payload_is_rejected_before_any_effect() {
    let store = InMemoryProvisionStore::new();
    let router = CommandRouter::new(store.clone(), NoopNotifier);
    let result = router.execute("create-repo", json!({"iso_url": "http://x/img.iso"}), NOW);
    assert!(matches!(result, Err(CommandError::Payload(_))));
    assert!(store.repos().unwrap().is_empty());
}

#[test]
fn test_create_repo_with_iso_url_commits_pending_row_and_fetch_event() {
    let store = InMemoryProvisionStore::new();
    let notifier = CountingNotifier::default();
    let router = CommandRouter::new(store.clone(), notifier.clone());

    let outcome = router
        .execute(
            "create-repo",
            json!({"name": "centos9", "iso_url": "http://mirror.example.com/centos9.iso"}),
            NOW,
        )
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Reference {
            collection: "repos",
            name: "centos9".to_string(),
        }
    );

    // The pending row and its fetch event are one committed state.
    let repo = store.repo(&RepoName::new("centos9")).unwrap().unwrap();
    assert_eq!(repo.state, RepoState::Pending);
    let events = store.claim_outbox(16).unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0].event,
        OutboxEvent::RepoFetch { repo } if repo.as_str() == "centos9"
    ));
    assert_eq!(notifier.count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_create_repo_with_external_url_is_available_immediately() {
    let store = InMemoryProvisionStore::new();
    let notifier = CountingNotifier::default();
    let router = CommandRouter::new(store.clone(), notifier.clone());

    router
        .execute("create-repo", json!({"name": "r1", "url": "http://mirror.example.com"}), NOW)
        .unwrap();
    let repo = store.repo(&RepoName::new("r1")).unwrap().unwrap();
    assert_eq!(repo.state, RepoState::Available);
    assert!(store.claim_outbox(16).unwrap().is_empty());
    assert_eq!(notifier.count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_create_repo_rejects_both_sources() {
    let result = router().execute(
        "create-repo",
        json!({"name": "r1", "url": "http://a", "iso_url": "http://b"}),
        NOW,
    );
    assert!(matches!(result, Err(CommandError::Validation(_))));
}

#[test]
fn test_create_policy_with_unknown_repo_persists_nothing() {
    let store = InMemoryProvisionStore::new();
    let router = CommandRouter::new(store.clone(), NoopNotifier);
    let result = router.execute(
        "create-policy",
        json!({
            "name": "p1",
            "repo": "missing",
            "broker": "b1",
            "installer": "i1",
            "hostname_pattern": "host${id}",
        }),
        NOW,
    );
    assert!(matches!(result, Err(CommandError::Validation(_))));
    assert!(store.policies().unwrap().is_empty());
}

#[test]
fn test_create_policy_defaults_rule_number_past_the_maximum() {
    let store = InMemoryProvisionStore::new();
    seed_references(&store);
    let router = CommandRouter::new(store.clone(), NoopNotifier);

    router
        .execute(
            "create-policy",
            json!({
                "name": "first",
                "rule_number": 7,
                "repo": "r1",
                "broker": "b1",
                "installer": "i1",
                "hostname_pattern": "a${id}",
            }),
            NOW,
        )
        .unwrap();
    router
        .execute(
            "create-policy",
            json!({
                "name": "second",
                "repo": "r1",
                "broker": "b1",
                "installer": "i1",
                "hostname_pattern": "b${id}",
            }),
            NOW,
        )
        .unwrap();

    let second = store.policy(&PolicyName::new("second")).unwrap().unwrap();
    assert_eq!(second.rule_number, 8);
}

#[test]
fn test_enable_policy_reports_no_changes_when_already_enabled() {
    let store = InMemoryProvisionStore::new();
    seed_references(&store);
    let router = CommandRouter::new(store.clone(), NoopNotifier);
    router
        .execute(
            "create-policy",
            json!({
                "name": "p1",
                "repo": "r1",
                "broker": "b1",
                "installer": "i1",
                "hostname_pattern": "host${id}",
            }),
            NOW,
        )
        .unwrap();

    let outcome = router.execute("enable-policy", json!({"name": "p1"}), NOW).unwrap();
    let CommandOutcome::Result {
        detail,
    } = outcome
    else {
        panic!("toggles return a textual result");
    };
    assert!(detail.contains("no changes"));

    let disabled = router.execute("disable-policy", json!({"name": "p1"}), NOW).unwrap();
    assert!(matches!(disabled, CommandOutcome::Result { detail } if detail == "policy p1 disabled"));
}

#[test]
fn test_toggle_on_missing_policy_is_not_found() {
    let result = router().execute("enable-policy", json!({"name": "ghost"}), NOW);
    assert!(matches!(result, Err(CommandError::NotFound(_))));
}

#[test]
fn test_unbind_node_is_idempotent_and_logs_the_previous_policy() {
    let store = InMemoryProvisionStore::new();
    let router = CommandRouter::new(store.clone(), NoopNotifier);

    let mut facts = FactMap::new();
    facts.insert("net0".to_string(), "52-54-00-00-02-01".to_string());
    let mut node = store.create_node(facts, NOW).unwrap();
    node.policy = Some(PolicyName::new("p1"));
    store.save_node(&node).unwrap();
    let name = node.name();

    let unbound = router.execute("unbind-node", json!({"name": name}), NOW).unwrap();
    assert!(matches!(
        unbound,
        CommandOutcome::Result { detail } if detail.contains("unbound from p1")
    ));
    let stored = store.node(node.id).unwrap().unwrap();
    assert!(stored.policy.is_none());
    let unbind_events = stored
        .log
        .iter()
        .filter(|entry| matches!(entry.event, NodeEvent::Unbind { .. }))
        .count();
    assert_eq!(unbind_events, 1);

    // A second unbind is a "no changes" result and appends nothing.
    let again = router.execute("unbind-node", json!({"name": name}), NOW).unwrap();
    assert!(matches!(
        again,
        CommandOutcome::Result { detail } if detail.contains("no changes")
    ));
    let after = store.node(node.id).unwrap().unwrap();
    assert_eq!(
        after.log.iter().filter(|e| matches!(e.event, NodeEvent::Unbind { .. })).count(),
        1
    );
}

#[test]
fn test_delete_commands_report_no_changes_for_missing_targets() {
    let router = router();
    for (command, payload) in [
        ("delete-repo", json!({"name": "ghost"})),
        ("delete-tag", json!({"name": "ghost"})),
        ("delete-broker", json!({"name": "ghost"})),
        ("delete-installer", json!({"name": "ghost"})),
        ("delete-policy", json!({"name": "ghost"})),
        ("delete-node", json!({"name": "node99"})),
    ] {
        let outcome = router.execute(command, payload, NOW).unwrap();
        assert!(
            matches!(&outcome, CommandOutcome::Result { detail } if detail.contains("no changes")),
            "{command} must be idempotent on missing targets"
        );
    }
}

#[test]
fn test_delete_repo_referenced_by_a_policy_is_rejected() {
    let store = InMemoryProvisionStore::new();
    seed_references(&store);
    let router = CommandRouter::new(store.clone(), NoopNotifier);
    router
        .execute(
            "create-policy",
            json!({
                "name": "p1",
                "repo": "r1",
                "broker": "b1",
                "installer": "i1",
                "hostname_pattern": "host${id}",
            }),
            NOW,
        )
        .unwrap();

    let result = router.execute("delete-repo", json!({"name": "r1"}), NOW);
    assert!(matches!(result, Err(CommandError::Validation(_))));
    assert!(store.repo(&RepoName::new("r1")).unwrap().is_some());
}

#[test]
fn test_create_tag_accepts_identical_duplicate_and_rejects_different_rule() {
    let store = InMemoryProvisionStore::new();
    let router = CommandRouter::new(store.clone(), NoopNotifier);
    let rule = json!({"op": "eq", "fact": "osfamily", "value": "RedHat"});

    router.execute("create-tag", json!({"name": "redhat", "rule": rule}), NOW).unwrap();
    router.execute("create-tag", json!({"name": "redhat", "rule": rule}), NOW).unwrap();

    let different = json!({"op": "eq", "fact": "osfamily", "value": "Debian"});
    let result = router.execute("create-tag", json!({"name": "redhat", "rule": different}), NOW);
    assert!(matches!(result, Err(CommandError::Validation(_))));
    assert_eq!(store.tags().unwrap().len(), 1);
}

#[test]
fn test_create_tag_rejects_malformed_rules_at_creation() {
    let result = router().execute(
        "create-tag",
        json!({"name": "bad", "rule": {"op": "like", "fact": "productname", "pattern": "("}}),
        NOW,
    );
    assert!(matches!(result, Err(CommandError::Validation(_))));
}
