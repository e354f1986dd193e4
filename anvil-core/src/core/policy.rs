// anvil-core/src/core/policy.rs
// ============================================================================
// Module: Anvil Tags and Policies
// Description: Tag rules and ordered, tag-gated installation policies.
// Purpose: Define the entities that decide which install applies to a node.
// Dependencies: anvil-rules, crate::core, serde
// ============================================================================

//! ## Overview
//! Tags classify nodes with boolean fact rules; policies gate an
//! installation (repo + broker + installer) behind a conjunction of tags.
//! A policy freezes copies of its tags at creation: deleting a tag later
//! never rewrites an existing policy's eligibility. `rule_number` is the
//! sole match priority and is unique across policies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use anvil_rules::Rule;
use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::BrokerName;
use crate::core::identifiers::InstallerName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::PolicyName;
use crate::core::identifiers::RepoName;
use crate::core::identifiers::TagName;
use crate::core::inventory::EntityError;

// ============================================================================
// SECTION: Tag
// ============================================================================

/// A named boolean rule over node facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name, unique among tags.
    pub name: TagName,
    /// Match rule evaluated against node facts.
    pub rule: Rule,
}

impl Tag {
    /// Validates the tag for creation.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError`] when the name is empty or the rule is
    /// malformed.
    pub fn validate(&self) -> Result<(), EntityError> {
        if self.name.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "tag",
                field: "name",
            });
        }
        self.rule.validate().map_err(|source| EntityError::Rule {
            tag: self.name.clone(),
            source,
        })
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// An ordered, tag-gated association of repo, broker, and installer.
///
/// # Invariants
/// - `rule_number` is unique and is the only determinant of match
///   priority; lower numbers match first.
/// - `tags` are frozen copies taken at creation time.
/// - Disabled policies are never eligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name, unique among policies.
    pub name: PolicyName,
    /// Evaluation priority; lower numbers are evaluated first.
    pub rule_number: u32,
    /// Whether the policy participates in matching.
    pub enabled: bool,
    /// Frozen tag snapshot; all must match for eligibility.
    pub tags: Vec<Tag>,
    /// Repo serving the installation content.
    pub repo: RepoName,
    /// Broker handing the node off after installation.
    pub broker: BrokerName,
    /// Installer driving the boot sequence.
    pub installer: InstallerName,
    /// Hostname pattern; `${id}` expands to the node id.
    pub hostname_pattern: String,
    /// Optional cap on the number of bound nodes.
    pub max_count: Option<u32>,
}

impl Policy {
    /// Validates the policy for creation.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError`] when a required field is empty or a frozen
    /// tag is malformed.
    pub fn validate(&self) -> Result<(), EntityError> {
        if self.name.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "policy",
                field: "name",
            });
        }
        if self.repo.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "policy",
                field: "repo",
            });
        }
        if self.broker.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "policy",
                field: "broker",
            });
        }
        if self.installer.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "policy",
                field: "installer",
            });
        }
        if self.hostname_pattern.is_empty() {
            return Err(EntityError::MissingField {
                entity: "policy",
                field: "hostname_pattern",
            });
        }
        self.tags.iter().try_for_each(Tag::validate)
    }

    /// Expands the hostname pattern for a node.
    #[must_use]
    pub fn hostname_for(&self, id: NodeId) -> String {
        self.hostname_pattern.replace("${id}", &id.value().to_string())
    }
}
