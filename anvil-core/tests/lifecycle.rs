// anvil-core/tests/lifecycle.rs
// ============================================================================
// Module: Node Lifecycle Tests
// Description: Tests for the boot/checkin/stage/file lifecycle transitions.
// ============================================================================
//! ## Overview
//! Validates the microkernel fallback, sticky binding, idempotent stage
//! checkpoints, the attribute whitelist, and log append ordering.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic store fixtures.")]
#![allow(clippy::expect_used, reason = "Tests use expect for explicit failure messages.")]

use std::collections::BTreeMap;

use anvil_core::Broker;
use anvil_core::BrokerName;
use anvil_core::CheckinAction;
use anvil_core::FactMap;
use anvil_core::InMemoryProvisionStore;
use anvil_core::Installer;
use anvil_core::InstallerName;
use anvil_core::LogSeverity;
use anvil_core::MICROKERNEL_BOOT_TEMPLATE;
use anvil_core::MICROKERNEL_INSTALLER;
use anvil_core::NodeEvent;
use anvil_core::NodeId;
use anvil_core::PlaneError;
use anvil_core::Policy;
use anvil_core::PolicyName;
use anvil_core::ProvisionPlane;
use anvil_core::ProvisionStore;
use anvil_core::Repo;
use anvil_core::RepoName;
use anvil_core::RepoState;
use anvil_core::StageOutcome;
use anvil_core::Tag;
use anvil_core::TagName;
use anvil_core::Timestamp;
use anvil_rules::Rule;

/// Fixed timestamp for deterministic fixtures.
const NOW: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

/// Builds a fact map from string pairs.
fn facts(pairs: &[(&str, &str)]) -> FactMap {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

/// Seeds repo, broker, installer, and a tag-gated policy.
fn seed_policy(store: &InMemoryProvisionStore) {
    store
        .create_repo(
            &Repo {
                name: RepoName::new("r1"),
                url: Some("http://mirror.example.com/centos".to_string()),
                iso_url: None,
                state: RepoState::Available,
            },
            &[],
            NOW,
        )
        .unwrap();
    store
        .create_broker(&Broker {
            name: BrokerName::new("b1"),
            broker_type: "noop".to_string(),
            configuration: BTreeMap::new(),
        })
        .unwrap();
    let mut boot_seq = BTreeMap::new();
    boot_seq.insert("1".to_string(), "install-kernel".to_string());
    boot_seq.insert("default".to_string(), "boot-local".to_string());
    store
        .create_installer(&Installer {
            name: InstallerName::new("i1"),
            os: Some("CentOS".to_string()),
            os_version: Some("9".to_string()),
            description: None,
            boot_seq,
        })
        .unwrap();
    store
        .create_policy(&Policy {
            name: PolicyName::new("p1"),
            rule_number: 1,
            enabled: true,
            tags: vec![Tag {
                name: TagName::new("redhat"),
                rule: Rule::eq("osfamily", "RedHat"),
            }],
            repo: RepoName::new("r1"),
            broker: BrokerName::new("b1"),
            installer: InstallerName::new("i1"),
            hostname_pattern: "host${id}.example.com".to_string(),
            max_count: None,
        })
        .unwrap();
}

#[test]
fn test_first_boot_of_unseen_hardware_falls_back_to_microkernel() {
    let store = InMemoryProvisionStore::new();
    let plane = ProvisionPlane::new(store.clone());

    let instruction = plane.boot(&facts(&[("net0", "52-54-00-00-01-01")]), NOW).unwrap();
    assert_eq!(instruction.installer.name.as_str(), MICROKERNEL_INSTALLER);
    assert_eq!(instruction.template, MICROKERNEL_BOOT_TEMPLATE);
    assert!(instruction.repo.is_none());
    assert!(!instruction.node.bound());

    // The boot is logged unconditionally, even for the fallback path.
    let node = store.node(instruction.node.id).unwrap().unwrap();
    assert!(node.log.iter().any(|entry| matches!(entry.event, NodeEvent::Boot { .. })));
    assert_eq!(node.boot_count, 1);
}

#[test]
fn test_boot_with_matching_facts_binds_on_first_boot() {
    let store = InMemoryProvisionStore::new();
    seed_policy(&store);
    let plane = ProvisionPlane::new(store.clone());

    let boot_facts = facts(&[("net0", "52-54-00-00-01-02"), ("osfamily", "RedHat")]);
    let instruction = plane.boot(&boot_facts, NOW).unwrap();

    assert_eq!(instruction.node.policy.as_ref().unwrap().as_str(), "p1");
    assert_eq!(instruction.installer.name.as_str(), "i1");
    assert_eq!(instruction.template, "install-kernel");
    assert_eq!(instruction.repo.unwrap().name.as_str(), "r1");
    assert_eq!(
        instruction.node.hostname.as_deref(),
        Some(format!("host{}.example.com", instruction.node.id).as_str())
    );

    let node = store.node(instruction.node.id).unwrap().unwrap();
    let kinds: Vec<&str> = node
        .log
        .iter()
        .map(|entry| match entry.event {
            NodeEvent::Bind { .. } => "bind",
            NodeEvent::Boot { .. } => "boot",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["bind", "boot"]);
}

#[test]
fn test_second_boot_advances_the_boot_sequence() {
    let store = InMemoryProvisionStore::new();
    seed_policy(&store);
    let plane = ProvisionPlane::new(store.clone());

    let boot_facts = facts(&[("net0", "52-54-00-00-01-03"), ("osfamily", "RedHat")]);
    let first = plane.boot(&boot_facts, NOW).unwrap();
    assert_eq!(first.template, "install-kernel");

    let second = plane.boot(&boot_facts, NOW).unwrap();
    assert_eq!(second.node.id, first.node.id);
    assert_eq!(second.template, "boot-local");
    assert_eq!(second.node.boot_count, 2);
}

#[test]
fn test_checkin_requires_a_registered_node() {
    let store = InMemoryProvisionStore::new();
    let plane = ProvisionPlane::new(store);
    let result = plane.checkin(NodeId::new(42), &facts(&[("hostname", "x")]), NOW);
    assert!(matches!(result, Err(PlaneError::NodeNotFound(_))));
}

#[test]
fn test_checkin_binds_once_and_stays_sticky() {
    let store = InMemoryProvisionStore::new();
    seed_policy(&store);
    let plane = ProvisionPlane::new(store.clone());

    // Register via boot with no classifying facts: stays unbound.
    let instruction = plane.boot(&facts(&[("net0", "52-54-00-00-01-04")]), NOW).unwrap();
    let id = instruction.node.id;

    // Facts arrive at checkin; the matcher binds and asks for a reboot.
    let first = plane.checkin(id, &facts(&[("osfamily", "RedHat")]), NOW).unwrap();
    assert_eq!(first.action, CheckinAction::Reboot);

    // Binding is sticky: routine checkins do not re-run the matcher.
    let second = plane.checkin(id, &facts(&[("osfamily", "RedHat")]), NOW).unwrap();
    assert_eq!(second.action, CheckinAction::None);
}

#[test]
fn test_stage_done_is_idempotent() {
    let store = InMemoryProvisionStore::new();
    let plane = ProvisionPlane::new(store.clone());
    let id = plane.boot(&facts(&[("net0", "52-54-00-00-01-05")]), NOW).unwrap().node.id;

    assert_eq!(plane.stage_done(id, "partition", NOW).unwrap(), StageOutcome::Advanced);
    assert_eq!(plane.stage_done(id, "partition", NOW).unwrap(), StageOutcome::Unchanged);

    let node = store.node(id).unwrap().unwrap();
    assert_eq!(node.installed_stage.as_deref(), Some("partition"));
    let completions = node
        .log
        .iter()
        .filter(|entry| {
            matches!(&entry.event, NodeEvent::StageDone { stage } if stage == "partition")
        })
        .count();
    assert_eq!(completions, 1);
}

#[test]
fn test_store_attr_whitelists_ip_only() {
    let store = InMemoryProvisionStore::new();
    let plane = ProvisionPlane::new(store.clone());
    let id = plane.boot(&facts(&[("net0", "52-54-00-00-01-06")]), NOW).unwrap().node.id;

    plane.store_attr(id, "ip", "192.0.2.17", NOW).unwrap();
    let node = store.node(id).unwrap().unwrap();
    assert_eq!(node.ip_address.as_deref(), Some("192.0.2.17"));
    assert!(node.log.iter().any(|entry| matches!(entry.event, NodeEvent::Store { .. })));

    let rejected = plane.store_attr(id, "hostname", "evil", NOW);
    assert!(matches!(rejected, Err(PlaneError::UnknownAttribute(_))));
    let unchanged = store.node(id).unwrap().unwrap();
    assert_eq!(unchanged.log.len(), node.log.len());
}

#[test]
fn test_file_fetch_requires_a_bound_policy() {
    let store = InMemoryProvisionStore::new();
    seed_policy(&store);
    let plane = ProvisionPlane::new(store.clone());

    let id = plane.boot(&facts(&[("net0", "52-54-00-00-01-07")]), NOW).unwrap().node.id;
    let before = plane.file(id, "post-install", "http://anvil/svc/file", NOW);
    assert!(matches!(before, Err(PlaneError::NoBoundPolicy(_))));

    plane.checkin(id, &facts(&[("osfamily", "RedHat")]), NOW).unwrap();
    let after = plane.file(id, "post-install", "http://anvil/svc/file", NOW).unwrap();
    assert_eq!(after.repo.name.as_str(), "r1");

    let node = store.node(id).unwrap().unwrap();
    assert!(node.log.iter().any(|entry| {
        matches!(&entry.event, NodeEvent::GetFile { template, .. } if template == "post-install")
    }));
}

#[test]
fn test_log_message_appends_with_severity() {
    let store = InMemoryProvisionStore::new();
    let plane = ProvisionPlane::new(store.clone());
    let id = plane.boot(&facts(&[("net0", "52-54-00-00-01-08")]), NOW).unwrap().node.id;

    plane.log_message(id, "partitioning disk", LogSeverity::Info, NOW).unwrap();
    let node = store.node(id).unwrap().unwrap();
    assert!(node.log.iter().any(|entry| {
        matches!(&entry.event, NodeEvent::NodeLog { msg, severity: LogSeverity::Info }
            if msg == "partitioning disk")
    }));
}
