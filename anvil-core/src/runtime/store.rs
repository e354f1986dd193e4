// anvil-core/src/runtime/store.rs
// ============================================================================
// Module: Anvil In-Memory Store
// Description: Simple in-memory provision store for tests and examples.
// Purpose: Provide a deterministic store implementation without external deps.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! This module provides an in-memory implementation of [`ProvisionStore`]
//! for tests and local demos. A single mutex serializes every operation,
//! which trivially satisfies the store's atomic check-then-act contract.
//! It is not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::facts::FactMap;
use crate::core::facts::HwSignature;
use crate::core::identifiers::BrokerName;
use crate::core::identifiers::InstallerName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::PolicyName;
use crate::core::identifiers::RepoName;
use crate::core::identifiers::TagName;
use crate::core::inventory::Broker;
use crate::core::inventory::Installer;
use crate::core::inventory::Repo;
use crate::core::node::Node;
use crate::core::policy::Policy;
use crate::core::policy::Tag;
use crate::core::time::Timestamp;
use crate::interfaces::OutboxEvent;
use crate::interfaces::OutboxRecord;
use crate::interfaces::ProvisionStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Shared Store
// ============================================================================

/// Shared provision store handle: any store behind an `Arc`.
pub type SharedProvisionStore = Arc<dyn ProvisionStore + Send + Sync>;

impl<T: ProvisionStore + ?Sized> ProvisionStore for Arc<T> {
    fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        (**self).node(id)
    }

    fn nodes(&self) -> Result<Vec<Node>, StoreError> {
        (**self).nodes()
    }

    fn nodes_matching(&self, signature: &HwSignature) -> Result<Vec<Node>, StoreError> {
        (**self).nodes_matching(signature)
    }

    fn create_node(&self, facts: FactMap, registered_at: Timestamp) -> Result<Node, StoreError> {
        (**self).create_node(facts, registered_at)
    }

    fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        (**self).save_node(node)
    }

    fn delete_node(&self, id: NodeId) -> Result<bool, StoreError> {
        (**self).delete_node(id)
    }

    fn tag(&self, name: &TagName) -> Result<Option<Tag>, StoreError> {
        (**self).tag(name)
    }

    fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        (**self).tags()
    }

    fn create_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        (**self).create_tag(tag)
    }

    fn delete_tag(&self, name: &TagName) -> Result<bool, StoreError> {
        (**self).delete_tag(name)
    }

    fn policy(&self, name: &PolicyName) -> Result<Option<Policy>, StoreError> {
        (**self).policy(name)
    }

    fn policies(&self) -> Result<Vec<Policy>, StoreError> {
        (**self).policies()
    }

    fn create_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        (**self).create_policy(policy)
    }

    fn save_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        (**self).save_policy(policy)
    }

    fn delete_policy(&self, name: &PolicyName) -> Result<bool, StoreError> {
        (**self).delete_policy(name)
    }

    fn repo(&self, name: &RepoName) -> Result<Option<Repo>, StoreError> {
        (**self).repo(name)
    }

    fn repos(&self) -> Result<Vec<Repo>, StoreError> {
        (**self).repos()
    }

    fn create_repo(
        &self,
        repo: &Repo,
        events: &[OutboxEvent],
        now: Timestamp,
    ) -> Result<(), StoreError> {
        (**self).create_repo(repo, events, now)
    }

    fn save_repo(&self, repo: &Repo) -> Result<(), StoreError> {
        (**self).save_repo(repo)
    }

    fn delete_repo(&self, name: &RepoName) -> Result<bool, StoreError> {
        (**self).delete_repo(name)
    }

    fn broker(&self, name: &BrokerName) -> Result<Option<Broker>, StoreError> {
        (**self).broker(name)
    }

    fn brokers(&self) -> Result<Vec<Broker>, StoreError> {
        (**self).brokers()
    }

    fn create_broker(&self, broker: &Broker) -> Result<(), StoreError> {
        (**self).create_broker(broker)
    }

    fn delete_broker(&self, name: &BrokerName) -> Result<bool, StoreError> {
        (**self).delete_broker(name)
    }

    fn installer(&self, name: &InstallerName) -> Result<Option<Installer>, StoreError> {
        (**self).installer(name)
    }

    fn installers(&self) -> Result<Vec<Installer>, StoreError> {
        (**self).installers()
    }

    fn create_installer(&self, installer: &Installer) -> Result<(), StoreError> {
        (**self).create_installer(installer)
    }

    fn delete_installer(&self, name: &InstallerName) -> Result<bool, StoreError> {
        (**self).delete_installer(name)
    }

    fn claim_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        (**self).claim_outbox(limit)
    }

    fn complete_outbox(&self, id: i64) -> Result<(), StoreError> {
        (**self).complete_outbox(id)
    }
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Outbox entry with its completion flag.
#[derive(Debug, Clone)]
struct OutboxEntry {
    /// The committed record.
    record: OutboxRecord,
    /// Whether a processor completed the event.
    completed: bool,
}

/// Mutable store contents behind the mutex.
#[derive(Debug, Default)]
struct Inner {
    /// Next node identifier.
    next_node_id: i64,
    /// Nodes by identifier, including their logs.
    nodes: BTreeMap<i64, Node>,
    /// Tags by name.
    tags: BTreeMap<String, Tag>,
    /// Policies by name.
    policies: BTreeMap<String, Policy>,
    /// Repos by name.
    repos: BTreeMap<String, Repo>,
    /// Brokers by name.
    brokers: BTreeMap<String, Broker>,
    /// Installers by name.
    installers: BTreeMap<String, Installer>,
    /// Next outbox identifier.
    next_outbox_id: i64,
    /// Committed outbox entries in enqueue order.
    outbox: Vec<OutboxEntry>,
}

/// In-memory provision store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProvisionStore {
    /// Store contents protected by a mutex.
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryProvisionStore {
    /// Creates a new in-memory provision store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the store contents.
    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Store("provision store mutex poisoned".to_string()))
    }
}

impl ProvisionStore for InMemoryProvisionStore {
    fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.nodes.get(&id.value()).cloned())
    }

    fn nodes(&self) -> Result<Vec<Node>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.nodes.values().cloned().map(strip_log).collect())
    }

    fn nodes_matching(&self, signature: &HwSignature) -> Result<Vec<Node>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .nodes
            .values()
            .filter(|node| node.hw_info.overlaps(signature))
            .cloned()
            .map(strip_log)
            .collect())
    }

    fn create_node(&self, facts: FactMap, registered_at: Timestamp) -> Result<Node, StoreError> {
        let mut guard = self.lock()?;
        let signature = HwSignature::from_facts(&facts);
        for existing in guard.nodes.values() {
            if existing.hw_info.overlaps(&signature) {
                return Err(StoreError::Conflict(format!(
                    "hardware identity already registered to {}",
                    existing.name()
                )));
            }
        }
        guard.next_node_id += 1;
        let node = Node::new(NodeId::new(guard.next_node_id), facts, registered_at);
        guard.nodes.insert(node.id.value(), node.clone());
        Ok(node)
    }

    fn save_node(&self, node: &Node) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.nodes.contains_key(&node.id.value()) {
            return Err(StoreError::Invalid(format!("node {} does not exist", node.id)));
        }
        guard.nodes.insert(node.id.value(), node.clone());
        Ok(())
    }

    fn delete_node(&self, id: NodeId) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        Ok(guard.nodes.remove(&id.value()).is_some())
    }

    fn tag(&self, name: &TagName) -> Result<Option<Tag>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.tags.get(name.as_str()).cloned())
    }

    fn tags(&self) -> Result<Vec<Tag>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.tags.values().cloned().collect())
    }

    fn create_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.tags.contains_key(tag.name.as_str()) {
            return Err(StoreError::Conflict(format!("tag {} already exists", tag.name)));
        }
        guard.tags.insert(tag.name.to_string(), tag.clone());
        Ok(())
    }

    fn delete_tag(&self, name: &TagName) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        Ok(guard.tags.remove(name.as_str()).is_some())
    }

    fn policy(&self, name: &PolicyName) -> Result<Option<Policy>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.policies.get(name.as_str()).cloned())
    }

    fn policies(&self) -> Result<Vec<Policy>, StoreError> {
        let guard = self.lock()?;
        let mut policies: Vec<Policy> = guard.policies.values().cloned().collect();
        policies.sort_by_key(|policy| policy.rule_number);
        Ok(policies)
    }

    fn create_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.policies.contains_key(policy.name.as_str()) {
            return Err(StoreError::Conflict(format!("policy {} already exists", policy.name)));
        }
        if let Some(holder) =
            guard.policies.values().find(|existing| existing.rule_number == policy.rule_number)
        {
            return Err(StoreError::Conflict(format!(
                "rule_number {} already used by policy {}",
                policy.rule_number, holder.name
            )));
        }
        guard.policies.insert(policy.name.to_string(), policy.clone());
        Ok(())
    }

    fn save_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.policies.contains_key(policy.name.as_str()) {
            return Err(StoreError::Invalid(format!("policy {} does not exist", policy.name)));
        }
        guard.policies.insert(policy.name.to_string(), policy.clone());
        Ok(())
    }

    fn delete_policy(&self, name: &PolicyName) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        Ok(guard.policies.remove(name.as_str()).is_some())
    }

    fn repo(&self, name: &RepoName) -> Result<Option<Repo>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.repos.get(name.as_str()).cloned())
    }

    fn repos(&self) -> Result<Vec<Repo>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.repos.values().cloned().collect())
    }

    fn create_repo(
        &self,
        repo: &Repo,
        events: &[OutboxEvent],
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.repos.contains_key(repo.name.as_str()) {
            return Err(StoreError::Conflict(format!("repo {} already exists", repo.name)));
        }
        guard.repos.insert(repo.name.to_string(), repo.clone());
        // Same critical section as the insert: the repo row and its
        // events commit together or not at all.
        for event in events {
            guard.next_outbox_id += 1;
            let id = guard.next_outbox_id;
            guard.outbox.push(OutboxEntry {
                record: OutboxRecord {
                    id,
                    event: event.clone(),
                    enqueued_at: now,
                },
                completed: false,
            });
        }
        Ok(())
    }

    fn save_repo(&self, repo: &Repo) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.repos.contains_key(repo.name.as_str()) {
            return Err(StoreError::Invalid(format!("repo {} does not exist", repo.name)));
        }
        guard.repos.insert(repo.name.to_string(), repo.clone());
        Ok(())
    }

    fn delete_repo(&self, name: &RepoName) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        Ok(guard.repos.remove(name.as_str()).is_some())
    }

    fn broker(&self, name: &BrokerName) -> Result<Option<Broker>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.brokers.get(name.as_str()).cloned())
    }

    fn brokers(&self) -> Result<Vec<Broker>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.brokers.values().cloned().collect())
    }

    fn create_broker(&self, broker: &Broker) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.brokers.contains_key(broker.name.as_str()) {
            return Err(StoreError::Conflict(format!("broker {} already exists", broker.name)));
        }
        guard.brokers.insert(broker.name.to_string(), broker.clone());
        Ok(())
    }

    fn delete_broker(&self, name: &BrokerName) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        Ok(guard.brokers.remove(name.as_str()).is_some())
    }

    fn installer(&self, name: &InstallerName) -> Result<Option<Installer>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.installers.get(name.as_str()).cloned())
    }

    fn installers(&self) -> Result<Vec<Installer>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.installers.values().cloned().collect())
    }

    fn create_installer(&self, installer: &Installer) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if guard.installers.contains_key(installer.name.as_str()) {
            return Err(StoreError::Conflict(format!(
                "installer {} already exists",
                installer.name
            )));
        }
        guard.installers.insert(installer.name.to_string(), installer.clone());
        Ok(())
    }

    fn delete_installer(&self, name: &InstallerName) -> Result<bool, StoreError> {
        let mut guard = self.lock()?;
        Ok(guard.installers.remove(name.as_str()).is_some())
    }

    fn claim_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .outbox
            .iter()
            .filter(|entry| !entry.completed)
            .take(limit)
            .map(|entry| entry.record.clone())
            .collect())
    }

    fn complete_outbox(&self, id: i64) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        match guard.outbox.iter_mut().find(|entry| entry.record.id == id) {
            Some(entry) => {
                entry.completed = true;
                Ok(())
            }
            None => Err(StoreError::Invalid(format!("outbox event {id} does not exist"))),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Drops the event log for collection reads.
fn strip_log(mut node: Node) -> Node {
    node.log = Vec::new();
    node
}
