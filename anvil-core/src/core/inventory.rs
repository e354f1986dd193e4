// anvil-core/src/core/inventory.rs
// ============================================================================
// Module: Anvil Inventory Entities
// Description: Repos, installers, and brokers referenced by policies.
// Purpose: Define the installation content and handoff entities.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Repos hold installation content (an external URL or a locally fetched
//! image), installers know the staged boot sequence and its templates, and
//! brokers generate the post-install handoff script. All three are
//! created and destroyed only through commands.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use anvil_rules::RuleError;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::BrokerName;
use crate::core::identifiers::InstallerName;
use crate::core::identifiers::RepoName;
use crate::core::identifiers::TagName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the built-in microkernel installer used for unbound nodes.
pub const MICROKERNEL_INSTALLER: &str = "microkernel";
/// Bootstrap template served to unbound nodes.
pub const MICROKERNEL_BOOT_TEMPLATE: &str = "bootstrap";
/// Boot-sequence key selecting the fallback template.
pub const BOOT_SEQ_DEFAULT_KEY: &str = "default";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Entity validation errors raised at command boundaries.
#[derive(Debug, Error)]
pub enum EntityError {
    /// A required field was missing or empty.
    #[error("{entity} requires a non-empty {field}")]
    MissingField {
        /// Entity kind.
        entity: &'static str,
        /// Field name.
        field: &'static str,
    },
    /// A field carried an invalid value.
    #[error("{0}")]
    Invalid(String),
    /// A tag rule failed validation.
    #[error("tag {tag} has an invalid rule: {source}")]
    Rule {
        /// Tag carrying the rule.
        tag: TagName,
        /// Underlying rule defect.
        source: RuleError,
    },
}

// ============================================================================
// SECTION: Repo
// ============================================================================

/// Loading lifecycle of a repo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RepoState {
    /// Created; image fetch not yet completed.
    Pending,
    /// Content is ready to serve.
    Available,
    /// Image fetch failed.
    Failed {
        /// Failure detail from the loader.
        detail: String,
    },
}

/// Installation content source referenced by policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Repo name, unique among repos.
    pub name: RepoName,
    /// External content URL; mutually exclusive with `iso_url`.
    pub url: Option<String>,
    /// Image URL fetched into the local repo store root.
    pub iso_url: Option<String>,
    /// Loading lifecycle state.
    pub state: RepoState,
}

impl Repo {
    /// Validates the repo for creation.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError`] when the name is empty or the repo does not
    /// carry exactly one content source.
    pub fn validate(&self) -> Result<(), EntityError> {
        if self.name.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "repo",
                field: "name",
            });
        }
        match (&self.url, &self.iso_url) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(EntityError::Invalid(
                "repo takes either url or iso_url, not both".to_string(),
            )),
            (None, None) => Err(EntityError::Invalid(
                "repo requires one of url or iso_url".to_string(),
            )),
        }
    }
}

// ============================================================================
// SECTION: Installer
// ============================================================================

/// Installer entity: boot sequence knowledge and template ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installer {
    /// Installer name, unique among installers.
    pub name: InstallerName,
    /// Operating system the installer provisions.
    pub os: Option<String>,
    /// Operating system version.
    pub os_version: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Boot template per boot count, with a `"default"` fallback.
    pub boot_seq: BTreeMap<String, String>,
}

impl Installer {
    /// Validates the installer for creation.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError`] when the name is empty or a boot sequence
    /// key is neither a boot count nor `"default"`.
    pub fn validate(&self) -> Result<(), EntityError> {
        if self.name.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "installer",
                field: "name",
            });
        }
        for (key, template) in &self.boot_seq {
            let is_count = !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit());
            if !is_count && key != BOOT_SEQ_DEFAULT_KEY {
                return Err(EntityError::Invalid(format!(
                    "boot_seq key {key:?} must be a boot count or {BOOT_SEQ_DEFAULT_KEY:?}"
                )));
            }
            if template.is_empty() {
                return Err(EntityError::Invalid(format!("boot_seq entry {key:?} names no template")));
            }
        }
        Ok(())
    }

    /// Selects the boot template for a boot count, falling back to the
    /// `"default"` entry.
    #[must_use]
    pub fn boot_template(&self, boot_count: u32) -> Option<&str> {
        self.boot_seq
            .get(&boot_count.to_string())
            .or_else(|| self.boot_seq.get(BOOT_SEQ_DEFAULT_KEY))
            .map(String::as_str)
    }

    /// Returns the built-in microkernel installer used for unbound nodes.
    #[must_use]
    pub fn microkernel() -> Self {
        let mut boot_seq = BTreeMap::new();
        boot_seq
            .insert(BOOT_SEQ_DEFAULT_KEY.to_string(), MICROKERNEL_BOOT_TEMPLATE.to_string());
        Self {
            name: InstallerName::new(MICROKERNEL_INSTALLER),
            os: None,
            os_version: None,
            description: Some("built-in discovery microkernel".to_string()),
            boot_seq,
        }
    }
}

// ============================================================================
// SECTION: Broker
// ============================================================================

/// Broker entity: post-install handoff script generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broker {
    /// Broker name, unique among brokers.
    pub name: BrokerName,
    /// Broker type selecting the install script source.
    pub broker_type: String,
    /// Type-specific configuration values.
    pub configuration: BTreeMap<String, String>,
}

impl Broker {
    /// Validates the broker for creation.
    ///
    /// # Errors
    ///
    /// Returns [`EntityError`] when the name or type is empty.
    pub fn validate(&self) -> Result<(), EntityError> {
        if self.name.as_str().is_empty() {
            return Err(EntityError::MissingField {
                entity: "broker",
                field: "name",
            });
        }
        if self.broker_type.is_empty() {
            return Err(EntityError::MissingField {
                entity: "broker",
                field: "broker_type",
            });
        }
        Ok(())
    }
}
