// anvil-core/src/runtime/commands.rs
// ============================================================================
// Module: Anvil Command Pipeline
// Description: Transactional mutating operations over the provision store.
// Purpose: Execute create/delete/toggle commands with all-or-nothing effect.
// Dependencies: anvil-rules, crate::{core, interfaces}, serde
// ============================================================================

//! ## Overview
//! Commands are the only way to create, mutate, or destroy entities from
//! the management API. The command set is closed and assembled at process
//! initialization; there is no runtime registration. Handlers resolve and
//! validate every referenced entity before any persistence, so a failed
//! command never partially applies. Side-effecting commands commit their
//! entity and the background work they trigger in one store transaction
//! (commit-then-notify), never the other way around.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use anvil_rules::Rule;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::BrokerName;
use crate::core::identifiers::InstallerName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::PolicyName;
use crate::core::identifiers::RepoName;
use crate::core::identifiers::TagName;
use crate::core::inventory::Broker;
use crate::core::inventory::Installer;
use crate::core::inventory::Repo;
use crate::core::inventory::RepoState;
use crate::core::node::NodeEvent;
use crate::core::policy::Policy;
use crate::core::policy::Tag;
use crate::core::time::Timestamp;
use crate::interfaces::CommitNotifier;
use crate::interfaces::OutboxEvent;
use crate::interfaces::ProvisionStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Command Names
// ============================================================================

/// The closed set of management commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    /// Create a repo, triggering its image fetch when needed.
    CreateRepo,
    /// Delete a repo by name.
    DeleteRepo,
    /// Create an installer.
    CreateInstaller,
    /// Delete an installer by name.
    DeleteInstaller,
    /// Create a tag with a match rule.
    CreateTag,
    /// Delete a tag by name.
    DeleteTag,
    /// Create a broker.
    CreateBroker,
    /// Delete a broker by name.
    DeleteBroker,
    /// Create a policy referencing repo, broker, installer, and tags.
    CreatePolicy,
    /// Delete a policy by name.
    DeletePolicy,
    /// Enable a policy for matching.
    EnablePolicy,
    /// Disable a policy for matching.
    DisablePolicy,
    /// Delete a node by name.
    DeleteNode,
    /// Unbind a node from its policy.
    UnbindNode,
}

impl CommandName {
    /// Every command, in the order advertised by the API directory.
    pub const ALL: [Self; 14] = [
        Self::CreateRepo,
        Self::DeleteRepo,
        Self::CreateInstaller,
        Self::DeleteInstaller,
        Self::CreateTag,
        Self::DeleteTag,
        Self::CreateBroker,
        Self::DeleteBroker,
        Self::CreatePolicy,
        Self::DeletePolicy,
        Self::EnablePolicy,
        Self::DisablePolicy,
        Self::DeleteNode,
        Self::UnbindNode,
    ];

    /// Returns the wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateRepo => "create-repo",
            Self::DeleteRepo => "delete-repo",
            Self::CreateInstaller => "create-installer",
            Self::DeleteInstaller => "delete-installer",
            Self::CreateTag => "create-tag",
            Self::DeleteTag => "delete-tag",
            Self::CreateBroker => "create-broker",
            Self::DeleteBroker => "delete-broker",
            Self::CreatePolicy => "create-policy",
            Self::DeletePolicy => "delete-policy",
            Self::EnablePolicy => "enable-policy",
            Self::DisablePolicy => "disable-policy",
            Self::DeleteNode => "delete-node",
            Self::UnbindNode => "unbind-node",
        }
    }

    /// Parses a wire name into a command, if known.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.as_str() == name)
    }
}

// ============================================================================
// SECTION: Outcomes and Errors
// ============================================================================

/// Successful command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Reference to the primary affected entity.
    Reference {
        /// Collection the entity lives in (`repos`, `tags`, ...).
        collection: &'static str,
        /// Entity name within the collection.
        name: String,
    },
    /// Human-readable result description, including "no changes" results
    /// for toggles that found the target already in the requested state.
    Result {
        /// Result text.
        detail: String,
    },
}

/// Command execution errors.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command name is not in the closed set.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    /// The payload failed to parse into the command's input shape.
    #[error("invalid command payload: {0}")]
    Payload(String),
    /// The payload parsed but failed business validation.
    #[error("{0}")]
    Validation(String),
    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The store failed; surfaced as a client error with detail.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Payload for `create-repo`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateRepoPayload {
    /// Repo name.
    name: String,
    /// External content URL.
    #[serde(default)]
    url: Option<String>,
    /// Image URL to fetch locally.
    #[serde(default)]
    iso_url: Option<String>,
}

/// Payload for commands that only name their target.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NamePayload {
    /// Target entity name.
    name: String,
}

/// Payload for `create-installer`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateInstallerPayload {
    /// Installer name.
    name: String,
    /// Operating system.
    #[serde(default)]
    os: Option<String>,
    /// Operating system version.
    #[serde(default)]
    os_version: Option<String>,
    /// Description.
    #[serde(default)]
    description: Option<String>,
    /// Boot template per boot count with a `"default"` fallback.
    #[serde(default)]
    boot_seq: BTreeMap<String, String>,
}

/// Payload for `create-tag`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTagPayload {
    /// Tag name.
    name: String,
    /// Match rule.
    rule: Rule,
}

/// Payload for `create-broker`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateBrokerPayload {
    /// Broker name.
    name: String,
    /// Broker type.
    broker_type: String,
    /// Type-specific configuration.
    #[serde(default)]
    configuration: BTreeMap<String, String>,
}

/// Tag reference in `create-policy`: an existing tag by name, or an
/// inline definition created alongside the policy.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagRef {
    /// Existing tag by name.
    Name(String),
    /// Inline tag definition.
    Inline {
        /// Tag name.
        name: String,
        /// Match rule.
        rule: Rule,
    },
}

/// Payload for `create-policy`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreatePolicyPayload {
    /// Policy name.
    name: String,
    /// Explicit priority; defaults to one past the current maximum.
    #[serde(default)]
    rule_number: Option<u32>,
    /// Whether the policy starts enabled.
    #[serde(default)]
    enabled: Option<bool>,
    /// Required tags.
    #[serde(default)]
    tags: Vec<TagRef>,
    /// Referenced repo name.
    repo: String,
    /// Referenced broker name.
    broker: String,
    /// Referenced installer name.
    installer: String,
    /// Hostname pattern; `${id}` expands to the node id.
    hostname_pattern: String,
    /// Optional cap on bound nodes.
    #[serde(default)]
    max_count: Option<u32>,
}

// ============================================================================
// SECTION: Command Router
// ============================================================================

/// Dispatches management commands against the provision store.
///
/// The router holds the full command table; transports parse a name and a
/// JSON payload and call [`CommandRouter::execute`].
pub struct CommandRouter<S, N> {
    /// Backing provision store.
    store: S,
    /// Notifier woken after commits that enqueued background work.
    notifier: N,
}

impl<S: ProvisionStore, N: CommitNotifier> CommandRouter<S, N> {
    /// Creates a command router.
    pub const fn new(store: S, notifier: N) -> Self {
        Self {
            store,
            notifier,
        }
    }

    /// Executes a named command against a parsed JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`]; on error no persistence has occurred.
    pub fn execute(
        &self,
        name: &str,
        payload: Value,
        now: Timestamp,
    ) -> Result<CommandOutcome, CommandError> {
        let command =
            CommandName::parse(name).ok_or_else(|| CommandError::UnknownCommand(name.to_string()))?;
        match command {
            CommandName::CreateRepo => self.create_repo(parse(payload)?, now),
            CommandName::DeleteRepo => self.delete_repo(parse(payload)?),
            CommandName::CreateInstaller => self.create_installer(parse(payload)?),
            CommandName::DeleteInstaller => self.delete_installer(parse(payload)?),
            CommandName::CreateTag => self.create_tag(parse(payload)?),
            CommandName::DeleteTag => self.delete_tag(parse(payload)?),
            CommandName::CreateBroker => self.create_broker(parse(payload)?),
            CommandName::DeleteBroker => self.delete_broker(parse(payload)?),
            CommandName::CreatePolicy => self.create_policy(parse(payload)?),
            CommandName::DeletePolicy => self.delete_policy(parse(payload)?),
            CommandName::EnablePolicy => self.toggle_policy(parse(payload)?, true),
            CommandName::DisablePolicy => self.toggle_policy(parse(payload)?, false),
            CommandName::DeleteNode => self.delete_node(parse(payload)?),
            CommandName::UnbindNode => self.unbind_node(parse(payload)?, now),
        }
    }

    // ------------------------------------------------------------------
    // Repo commands
    // ------------------------------------------------------------------

    /// Creates a repo; an `iso_url` repo commits as pending together with
    /// its fetch event, then wakes the loader.
    fn create_repo(
        &self,
        payload: CreateRepoPayload,
        now: Timestamp,
    ) -> Result<CommandOutcome, CommandError> {
        let state = if payload.iso_url.is_some() {
            RepoState::Pending
        } else {
            RepoState::Available
        };
        let repo = Repo {
            name: RepoName::new(payload.name),
            url: payload.url,
            iso_url: payload.iso_url,
            state,
        };
        repo.validate().map_err(|err| CommandError::Validation(err.to_string()))?;

        let events: Vec<OutboxEvent> = if repo.iso_url.is_some() {
            vec![OutboxEvent::RepoFetch {
                repo: repo.name.clone(),
            }]
        } else {
            Vec::new()
        };
        self.store.create_repo(&repo, &events, now)?;
        if !events.is_empty() {
            self.notifier.notify();
        }
        Ok(CommandOutcome::Reference {
            collection: "repos",
            name: repo.name.to_string(),
        })
    }

    /// Deletes a repo unless a policy still references it.
    fn delete_repo(&self, payload: NamePayload) -> Result<CommandOutcome, CommandError> {
        let name = RepoName::new(payload.name);
        self.ensure_unreferenced("repo", &name.to_string(), |policy| policy.repo == name)?;
        if self.store.delete_repo(&name)? {
            Ok(result("repo destroyed"))
        } else {
            Ok(result(format!("no changes; repo {name} does not exist")))
        }
    }

    // ------------------------------------------------------------------
    // Installer commands
    // ------------------------------------------------------------------

    /// Creates an installer.
    fn create_installer(
        &self,
        payload: CreateInstallerPayload,
    ) -> Result<CommandOutcome, CommandError> {
        let installer = Installer {
            name: InstallerName::new(payload.name),
            os: payload.os,
            os_version: payload.os_version,
            description: payload.description,
            boot_seq: payload.boot_seq,
        };
        installer.validate().map_err(|err| CommandError::Validation(err.to_string()))?;
        self.store.create_installer(&installer)?;
        Ok(CommandOutcome::Reference {
            collection: "installers",
            name: installer.name.to_string(),
        })
    }

    /// Deletes an installer unless a policy still references it.
    fn delete_installer(&self, payload: NamePayload) -> Result<CommandOutcome, CommandError> {
        let name = InstallerName::new(payload.name);
        self.ensure_unreferenced("installer", &name.to_string(), |policy| {
            policy.installer == name
        })?;
        if self.store.delete_installer(&name)? {
            Ok(result("installer destroyed"))
        } else {
            Ok(result(format!("no changes; installer {name} does not exist")))
        }
    }

    // ------------------------------------------------------------------
    // Tag commands
    // ------------------------------------------------------------------

    /// Creates a tag, or accepts an identical existing one.
    fn create_tag(&self, payload: CreateTagPayload) -> Result<CommandOutcome, CommandError> {
        let tag = Tag {
            name: TagName::new(payload.name),
            rule: payload.rule,
        };
        tag.validate().map_err(|err| CommandError::Validation(err.to_string()))?;
        match self.store.tag(&tag.name)? {
            Some(existing) if existing.rule == tag.rule => {}
            Some(_) => {
                return Err(CommandError::Validation(format!(
                    "tag {} already exists with a different rule",
                    tag.name
                )));
            }
            None => self.store.create_tag(&tag)?,
        }
        Ok(CommandOutcome::Reference {
            collection: "tags",
            name: tag.name.to_string(),
        })
    }

    /// Deletes a tag. Policies hold frozen tag copies, so deletion never
    /// rewrites existing policy eligibility.
    fn delete_tag(&self, payload: NamePayload) -> Result<CommandOutcome, CommandError> {
        let name = TagName::new(payload.name);
        if self.store.delete_tag(&name)? {
            Ok(result("tag destroyed"))
        } else {
            Ok(result(format!("no changes; tag {name} does not exist")))
        }
    }

    // ------------------------------------------------------------------
    // Broker commands
    // ------------------------------------------------------------------

    /// Creates a broker.
    fn create_broker(&self, payload: CreateBrokerPayload) -> Result<CommandOutcome, CommandError> {
        let broker = Broker {
            name: BrokerName::new(payload.name),
            broker_type: payload.broker_type,
            configuration: payload.configuration,
        };
        broker.validate().map_err(|err| CommandError::Validation(err.to_string()))?;
        self.store.create_broker(&broker)?;
        Ok(CommandOutcome::Reference {
            collection: "brokers",
            name: broker.name.to_string(),
        })
    }

    /// Deletes a broker unless a policy still references it.
    fn delete_broker(&self, payload: NamePayload) -> Result<CommandOutcome, CommandError> {
        let name = BrokerName::new(payload.name);
        self.ensure_unreferenced("broker", &name.to_string(), |policy| policy.broker == name)?;
        if self.store.delete_broker(&name)? {
            Ok(result("broker destroyed"))
        } else {
            Ok(result(format!("no changes; broker {name} does not exist")))
        }
    }

    // ------------------------------------------------------------------
    // Policy commands
    // ------------------------------------------------------------------

    /// Creates a policy after resolving every reference it names.
    ///
    /// All validation happens before any persistence; inline tags are the
    /// only rows created besides the policy itself.
    fn create_policy(&self, payload: CreatePolicyPayload) -> Result<CommandOutcome, CommandError> {
        let repo = RepoName::new(payload.repo);
        if self.store.repo(&repo)?.is_none() {
            return Err(CommandError::Validation(format!("repo {repo} not found")));
        }
        let broker = BrokerName::new(payload.broker);
        if self.store.broker(&broker)?.is_none() {
            return Err(CommandError::Validation(format!("broker {broker} not found")));
        }
        let installer = InstallerName::new(payload.installer);
        if self.store.installer(&installer)?.is_none() {
            return Err(CommandError::Validation(format!("installer {installer} not found")));
        }

        let mut frozen: Vec<Tag> = Vec::with_capacity(payload.tags.len());
        let mut inline_tags: Vec<Tag> = Vec::new();
        for reference in payload.tags {
            match reference {
                TagRef::Name(name) => {
                    let name = TagName::new(name);
                    let tag = self
                        .store
                        .tag(&name)?
                        .ok_or_else(|| CommandError::Validation(format!("tag {name} not found")))?;
                    frozen.push(tag);
                }
                TagRef::Inline {
                    name,
                    rule,
                } => {
                    let tag = Tag {
                        name: TagName::new(name),
                        rule,
                    };
                    tag.validate().map_err(|err| CommandError::Validation(err.to_string()))?;
                    match self.store.tag(&tag.name)? {
                        Some(existing) if existing.rule == tag.rule => frozen.push(existing),
                        Some(_) => {
                            return Err(CommandError::Validation(format!(
                                "tag {} already exists with a different rule",
                                tag.name
                            )));
                        }
                        None => {
                            inline_tags.push(tag.clone());
                            frozen.push(tag);
                        }
                    }
                }
            }
        }

        let rule_number = match payload.rule_number {
            Some(number) => number,
            None => {
                self.store.policies()?.iter().map(|policy| policy.rule_number).max().map_or(1, |max| {
                    max.saturating_add(1)
                })
            }
        };

        let policy = Policy {
            name: PolicyName::new(payload.name),
            rule_number,
            enabled: payload.enabled.unwrap_or(true),
            tags: frozen,
            repo,
            broker,
            installer,
            hostname_pattern: payload.hostname_pattern,
            max_count: payload.max_count,
        };
        policy.validate().map_err(|err| CommandError::Validation(err.to_string()))?;

        for tag in &inline_tags {
            self.store.create_tag(tag)?;
        }
        self.store.create_policy(&policy)?;
        Ok(CommandOutcome::Reference {
            collection: "policies",
            name: policy.name.to_string(),
        })
    }

    /// Deletes a policy unless nodes are still bound to it.
    fn delete_policy(&self, payload: NamePayload) -> Result<CommandOutcome, CommandError> {
        let name = PolicyName::new(payload.name);
        let bound = self
            .store
            .nodes()?
            .into_iter()
            .filter(|node| node.policy.as_ref() == Some(&name))
            .count();
        if bound > 0 {
            return Err(CommandError::Validation(format!(
                "policy {name} still has {bound} bound node(s); unbind them first"
            )));
        }
        if self.store.delete_policy(&name)? {
            Ok(result("policy destroyed"))
        } else {
            Ok(result(format!("no changes; policy {name} does not exist")))
        }
    }

    /// Enables or disables a policy, reporting "no changes" when the
    /// policy is already in the requested state.
    fn toggle_policy(
        &self,
        payload: NamePayload,
        enabled: bool,
    ) -> Result<CommandOutcome, CommandError> {
        let name = PolicyName::new(payload.name);
        let mut policy = self
            .store
            .policy(&name)?
            .ok_or_else(|| CommandError::NotFound(format!("policy {name} does not exist")))?;
        let verb = if enabled { "enabled" } else { "disabled" };
        if policy.enabled == enabled {
            return Ok(result(format!("no changes; policy {name} is already {verb}")));
        }
        policy.enabled = enabled;
        self.store.save_policy(&policy)?;
        Ok(result(format!("policy {name} {verb}")))
    }

    // ------------------------------------------------------------------
    // Node commands
    // ------------------------------------------------------------------

    /// Deletes a node by name.
    fn delete_node(&self, payload: NamePayload) -> Result<CommandOutcome, CommandError> {
        let Some(id) = NodeId::from_name(&payload.name) else {
            return Ok(result(format!("no changes; node {} does not exist", payload.name)));
        };
        if self.store.delete_node(id)? {
            Ok(result("node destroyed"))
        } else {
            Ok(result(format!("no changes; node {} does not exist", payload.name)))
        }
    }

    /// Unbinds a node from its policy; idempotent on unbound nodes.
    fn unbind_node(
        &self,
        payload: NamePayload,
        now: Timestamp,
    ) -> Result<CommandOutcome, CommandError> {
        let Some(mut node) = self.store.node_by_name(&payload.name)? else {
            return Ok(result(format!("no changes; node {} does not exist", payload.name)));
        };
        let Some(policy) = node.policy.take() else {
            return Ok(result(format!("no changes; node {} is not bound", payload.name)));
        };
        node.hostname = None;
        node.log_append(
            now,
            NodeEvent::Unbind {
                policy: policy.clone(),
            },
        );
        self.store.save_node(&node)?;
        Ok(result(format!("node {} unbound from {policy}", payload.name)))
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Rejects deletion of an entity that a policy still references.
    fn ensure_unreferenced(
        &self,
        kind: &str,
        name: &str,
        references: impl Fn(&Policy) -> bool,
    ) -> Result<(), CommandError> {
        let holders: Vec<String> = self
            .store
            .policies()?
            .into_iter()
            .filter(|policy| references(policy))
            .map(|policy| policy.name.to_string())
            .collect();
        if holders.is_empty() {
            Ok(())
        } else {
            Err(CommandError::Validation(format!(
                "{kind} {name} is referenced by policies: {}",
                holders.join(", ")
            )))
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a command payload into its typed shape.
fn parse<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, CommandError> {
    serde_json::from_value(payload).map_err(|err| CommandError::Payload(err.to_string()))
}

/// Builds a textual result outcome.
fn result(detail: impl Into<String>) -> CommandOutcome {
    CommandOutcome::Result {
        detail: detail.into(),
    }
}
