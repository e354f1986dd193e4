// anvil-core/src/interfaces/mod.rs
// ============================================================================
// Module: Anvil Interfaces
// Description: Backend-agnostic interfaces for storage, rendering, and handoff.
// Purpose: Define the contract surfaces used by the provisioning runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the provisioning core integrates with its
//! collaborators without embedding backend detail. Store implementations
//! must provide atomic check-then-act creation and must persist a node and
//! its newly appended log entries in one transaction; renderer and lookup
//! implementations must be deterministic and fail closed on missing data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

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

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Provision store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("provision store io error: {0}")]
    Io(String),
    /// Store data is corrupted or fails integrity checks.
    #[error("provision store corruption: {0}")]
    Corrupt(String),
    /// Store schema version is incompatible.
    #[error("provision store version mismatch: {0}")]
    VersionMismatch(String),
    /// Store data is invalid.
    #[error("provision store invalid data: {0}")]
    Invalid(String),
    /// A uniqueness constraint rejected the commit.
    #[error("provision store conflict: {0}")]
    Conflict(String),
    /// Store reported an error.
    #[error("provision store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Outbox
// ============================================================================

/// Background work enqueued atomically with the commit that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxEvent {
    /// A repo image must be fetched into the repo store root.
    RepoFetch {
        /// Repo to fetch.
        repo: RepoName,
    },
}

/// A committed outbox event awaiting completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Store-assigned event identifier.
    pub id: i64,
    /// The enqueued event.
    pub event: OutboxEvent,
    /// Enqueue timestamp.
    pub enqueued_at: Timestamp,
}

// ============================================================================
// SECTION: Provision Store
// ============================================================================

/// Persistent store for all provisioning entities.
///
/// Multi-step read-then-write units are serialized by the store: node
/// creation enforces hardware-signature uniqueness at commit time, and
/// `save_node` persists the node state together with its newly appended
/// log entries. Collection reads (`nodes`) omit node logs; single-node
/// loads include them.
pub trait ProvisionStore {
    /// Loads a node, including its event log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError>;

    /// Loads a node by its stable name (`node<id>`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn node_by_name(&self, name: &str) -> Result<Option<Node>, StoreError> {
        match NodeId::from_name(name) {
            Some(id) => self.node(id),
            None => Ok(None),
        }
    }

    /// Lists all nodes without their event logs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn nodes(&self) -> Result<Vec<Node>, StoreError>;

    /// Lists nodes whose hardware signature overlaps the given signature.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the scan fails.
    fn nodes_matching(&self, signature: &HwSignature) -> Result<Vec<Node>, StoreError>;

    /// Creates a node from first-seen facts, assigning its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when another node already owns one
    /// of the signature components; creation and the uniqueness check are
    /// one atomic unit.
    fn create_node(&self, facts: FactMap, registered_at: Timestamp) -> Result<Node, StoreError>;

    /// Persists node state and newly appended log entries atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails; on error no log
    /// entry is recorded and no state is mutated.
    fn save_node(&self, node: &Node) -> Result<(), StoreError>;

    /// Deletes a node; returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete_node(&self, id: NodeId) -> Result<bool, StoreError>;

    /// Loads a tag by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn tag(&self, name: &TagName) -> Result<Option<Tag>, StoreError>;

    /// Lists all tags.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn tags(&self) -> Result<Vec<Tag>, StoreError>;

    /// Creates a tag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is taken.
    fn create_tag(&self, tag: &Tag) -> Result<(), StoreError>;

    /// Deletes a tag; returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete_tag(&self, name: &TagName) -> Result<bool, StoreError>;

    /// Loads a policy by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn policy(&self, name: &PolicyName) -> Result<Option<Policy>, StoreError>;

    /// Lists all policies in ascending `rule_number` order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn policies(&self) -> Result<Vec<Policy>, StoreError>;

    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name or `rule_number` is
    /// taken.
    fn create_policy(&self, policy: &Policy) -> Result<(), StoreError>;

    /// Persists policy state (enable/disable).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn save_policy(&self, policy: &Policy) -> Result<(), StoreError>;

    /// Deletes a policy; returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete_policy(&self, name: &PolicyName) -> Result<bool, StoreError>;

    /// Loads a repo by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn repo(&self, name: &RepoName) -> Result<Option<Repo>, StoreError>;

    /// Lists all repos.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn repos(&self) -> Result<Vec<Repo>, StoreError>;

    /// Creates a repo, committing the given outbox events atomically with
    /// the repo row. `now` timestamps the enqueued events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is taken. On any
    /// error neither the repo nor the events are committed.
    fn create_repo(
        &self,
        repo: &Repo,
        events: &[OutboxEvent],
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// Persists repo state (loader lifecycle updates).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn save_repo(&self, repo: &Repo) -> Result<(), StoreError>;

    /// Deletes a repo; returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete_repo(&self, name: &RepoName) -> Result<bool, StoreError>;

    /// Loads a broker by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn broker(&self, name: &BrokerName) -> Result<Option<Broker>, StoreError>;

    /// Lists all brokers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn brokers(&self) -> Result<Vec<Broker>, StoreError>;

    /// Creates a broker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is taken.
    fn create_broker(&self, broker: &Broker) -> Result<(), StoreError>;

    /// Deletes a broker; returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete_broker(&self, name: &BrokerName) -> Result<bool, StoreError>;

    /// Loads an installer by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when loading fails.
    fn installer(&self, name: &InstallerName) -> Result<Option<Installer>, StoreError>;

    /// Lists all installers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when listing fails.
    fn installers(&self) -> Result<Vec<Installer>, StoreError>;

    /// Creates an installer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the name is taken.
    fn create_installer(&self, installer: &Installer) -> Result<(), StoreError>;

    /// Deletes an installer; returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when deletion fails.
    fn delete_installer(&self, name: &InstallerName) -> Result<bool, StoreError>;

    /// Returns up to `limit` uncompleted outbox events, oldest first.
    ///
    /// Claiming does not mark events; completion does. Repeated claims of
    /// the same event are expected and must be tolerated by processors.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the scan fails.
    fn claim_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Marks an outbox event completed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn complete_outbox(&self, id: i64) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Template Renderer
// ============================================================================

/// Variables handed to the renderer for a template expansion.
pub type RenderVars = BTreeMap<String, String>;

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The template does not exist for the installer.
    #[error("installer {installer} has no template {template:?}")]
    TemplateNotFound {
        /// Installer searched.
        installer: InstallerName,
        /// Template requested.
        template: String,
    },
    /// Rendering failed.
    #[error("template render error: {0}")]
    Render(String),
}

/// Renders boot and install templates for a node.
pub trait TemplateRenderer {
    /// Renders a template with the provided context variables.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] when the template is missing or rendering
    /// fails.
    fn render(
        &self,
        installer: &InstallerName,
        template: &str,
        vars: &RenderVars,
    ) -> Result<Vec<u8>, RenderError>;
}

// ============================================================================
// SECTION: File Lookup
// ============================================================================

/// File lookup errors.
#[derive(Debug, Error)]
pub enum FileLookupError {
    /// The file does not exist.
    #[error("file {name:?} not found")]
    NotFound {
        /// File name requested.
        name: String,
    },
    /// The request was rejected before touching the filesystem.
    #[error("invalid file request: {0}")]
    Invalid(String),
    /// Filesystem error.
    #[error("file lookup io error: {0}")]
    Io(String),
}

/// Locates installer files and repo content on disk.
pub trait FileLookup {
    /// Finds a file belonging to an installer.
    ///
    /// # Errors
    ///
    /// Returns [`FileLookupError`] when the file is missing or the name is
    /// rejected.
    fn find_file(&self, installer: &InstallerName, name: &str)
    -> Result<PathBuf, FileLookupError>;

    /// Finds repo content case-insensitively under the repo's root.
    ///
    /// ISO9660 only guarantees upper-case names while installers commonly
    /// request lower-case paths, so lookup ignores case per component.
    ///
    /// # Errors
    ///
    /// Returns [`FileLookupError`] when the file is missing or the path is
    /// rejected.
    fn find_repo_file(&self, repo: &RepoName, path: &str) -> Result<PathBuf, FileLookupError>;
}

// ============================================================================
// SECTION: Install Script Source
// ============================================================================

/// Install script generation errors.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The broker type has no script source.
    #[error("unknown broker type {0:?}")]
    UnknownType(String),
    /// Script generation failed.
    #[error("install script error: {0}")]
    Script(String),
}

/// Generates the post-install handoff script for a bound node.
pub trait InstallScriptSource {
    /// Generates the install script for a node handled by a broker.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] when the broker type is unknown or
    /// generation fails.
    fn install_script(&self, broker: &Broker, node: &Node) -> Result<Vec<u8>, ScriptError>;
}

// ============================================================================
// SECTION: Commit Notifier
// ============================================================================

/// Wakes background processors after a commit enqueued outbox work.
///
/// Notification is an optimization: processors also poll, so a missed
/// notify never strands an event.
pub trait CommitNotifier {
    /// Signals that outbox work may be available.
    fn notify(&self);
}

/// Notifier that does nothing; for tests and offline tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl CommitNotifier for NoopNotifier {
    fn notify(&self) {}
}
