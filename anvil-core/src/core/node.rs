// anvil-core/src/core/node.rs
// ============================================================================
// Module: Anvil Node Model
// Description: Node records, lifecycle events, and the append-only log.
// Purpose: Track a physical machine through its provisioning lifecycle.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! A node is created lazily the first time its hardware identity is seen.
//! It accumulates facts on every checkin, binds to at most one policy, and
//! carries an append-only, ordered log of lifecycle events. The log is a
//! causal record: every transition appends its event before or atomically
//! with the mutation it describes, and the persist never drops a logged
//! event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::facts::FactMap;
use crate::core::facts::HwSignature;
use crate::core::facts::is_identity_fact;
use crate::core::identifiers::InstallerName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::PolicyName;
use crate::core::identifiers::RepoName;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Node
// ============================================================================

/// A physical machine tracked by hardware identity.
///
/// # Invariants
/// - `hw_info` is unique among stored nodes at component granularity; the
///   store enforces this at commit time.
/// - `log` is append-only; entries are ordered by commit.
/// - `installed_stage` advances monotonically within a policy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Store-assigned identifier.
    pub id: NodeId,
    /// Canonical hardware identity signature.
    pub hw_info: HwSignature,
    /// Current fact set, merged on every boot and checkin.
    pub facts: FactMap,
    /// Last stored IP address, if reported.
    pub ip_address: Option<String>,
    /// Hostname generated from the bound policy's pattern.
    pub hostname: Option<String>,
    /// Bound policy, if any.
    pub policy: Option<PolicyName>,
    /// Number of boot requests served for this node.
    pub boot_count: u32,
    /// Name of the last completed installation stage.
    pub installed_stage: Option<String>,
    /// Timestamp of first registration.
    pub registered_at: Timestamp,
    /// Append-only lifecycle event log; persisted separately from the
    /// node snapshot, ordered by commit.
    #[serde(skip, default)]
    pub log: Vec<NodeLogEntry>,
}

impl Node {
    /// Creates a fresh node from its first-seen facts.
    #[must_use]
    pub fn new(id: NodeId, facts: FactMap, registered_at: Timestamp) -> Self {
        let hw_info = HwSignature::from_facts(&facts);
        Self {
            id,
            hw_info,
            facts,
            ip_address: None,
            hostname: None,
            policy: None,
            boot_count: 0,
            installed_stage: None,
            registered_at,
            log: Vec::new(),
        }
    }

    /// Returns the stable node name (`node<id>`).
    #[must_use]
    pub fn name(&self) -> String {
        self.id.name()
    }

    /// Returns true when the node is bound to a policy.
    #[must_use]
    pub const fn bound(&self) -> bool {
        self.policy.is_some()
    }

    /// Merges incoming facts into the node, refreshing the hardware
    /// signature when identity facts are present.
    pub fn merge_facts(&mut self, incoming: &FactMap) {
        for (key, value) in incoming {
            self.facts.insert(key.clone(), value.clone());
        }
        if incoming.keys().any(|key| is_identity_fact(key)) {
            self.hw_info.merge(&HwSignature::from_facts(incoming));
        }
    }

    /// Appends a lifecycle event to the node log.
    pub fn log_append(&mut self, at: Timestamp, event: NodeEvent) {
        self.log.push(NodeLogEntry {
            at,
            event,
        });
    }
}

// ============================================================================
// SECTION: Log Entries
// ============================================================================

/// One entry in a node's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLogEntry {
    /// Timestamp supplied by the boundary layer at append time.
    pub at: Timestamp,
    /// The lifecycle event recorded.
    pub event: NodeEvent,
}

/// Lifecycle events recorded against a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A boot request was served.
    Boot {
        /// Installer that selected the template.
        installer: InstallerName,
        /// Boot template served.
        template: String,
        /// Repo the boot script points at.
        repo: RepoName,
    },
    /// The node was bound to a policy.
    Bind {
        /// Policy bound.
        policy: PolicyName,
    },
    /// The node was unbound from a policy.
    Unbind {
        /// Previously bound policy.
        policy: PolicyName,
    },
    /// A rendered template was fetched.
    GetFile {
        /// Template name requested.
        template: String,
        /// Requesting URL.
        url: String,
    },
    /// A raw installer file was fetched.
    GetRawFile {
        /// File name requested.
        template: String,
        /// Requesting URL.
        url: String,
    },
    /// An installation stage completed.
    StageDone {
        /// Completed stage name.
        stage: String,
    },
    /// A whitelisted node attribute was stored.
    Store {
        /// Attribute values stored.
        vars: FactMap,
    },
    /// A free-form message logged by the node or its agent.
    NodeLog {
        /// Message text.
        msg: String,
        /// Message severity.
        severity: LogSeverity,
    },
    /// The node was part of an ambiguous identity match.
    DuplicateIdentity {
        /// Human-readable conflict detail, including the signature.
        detail: String,
    },
}

/// Severity attached to free-form node log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    /// Informational message.
    #[default]
    Info,
    /// Warning message.
    Warn,
    /// Error message.
    Error,
}

impl LogSeverity {
    /// Parses a severity label, if recognized.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}
