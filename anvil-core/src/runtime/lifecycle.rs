// anvil-core/src/runtime/lifecycle.rs
// ============================================================================
// Module: Anvil Node Lifecycle
// Description: The node lifecycle state machine behind every /svc request.
// Purpose: Drive nodes through boot, checkin, staged install, and handoff.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The provision plane is the single canonical execution path for node
//! lifecycle transitions. Every transition appends its event to the node
//! log and persists node and log in one store transaction, so the log is
//! always a truthful causal record: it never shows an event for a mutation
//! that did not commit, and a commit never drops a logged event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::facts::FactMap;
use crate::core::identifiers::BrokerName;
use crate::core::identifiers::InstallerName;
use crate::core::identifiers::NodeId;
use crate::core::identifiers::PolicyName;
use crate::core::identifiers::RepoName;
use crate::core::inventory::Broker;
use crate::core::inventory::Installer;
use crate::core::inventory::MICROKERNEL_INSTALLER;
use crate::core::inventory::Repo;
use crate::core::node::LogSeverity;
use crate::core::node::Node;
use crate::core::node::NodeEvent;
use crate::core::policy::Policy;
use crate::core::time::Timestamp;
use crate::interfaces::ProvisionStore;
use crate::interfaces::StoreError;
use crate::runtime::identity;
use crate::runtime::identity::IdentityError;
use crate::runtime::identity::Lookup;
use crate::runtime::matcher;
use crate::runtime::matcher::MatchError;

// ============================================================================
// SECTION: Instructions and Results
// ============================================================================

/// Boot decision handed to the boundary layer for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct BootInstruction {
    /// The resolved (possibly freshly registered) node.
    pub node: Node,
    /// Installer whose template is served; the built-in microkernel
    /// installer for unbound nodes.
    pub installer: Installer,
    /// Boot template selected for this boot.
    pub template: String,
    /// Repo backing the install; `None` for the microkernel fallback.
    pub repo: Option<Repo>,
}

/// Template fetch decision handed to the boundary layer.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInstruction {
    /// The requesting node.
    pub node: Node,
    /// Installer owning the template or file.
    pub installer: Installer,
    /// Repo backing the bound policy.
    pub repo: Repo,
    /// Template or file name requested.
    pub template: String,
}

/// Next action returned to a checking-in agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinAction {
    /// Nothing to do; keep checking in.
    None,
    /// A policy was just bound; reboot into the install sequence.
    Reboot,
}

/// Checkin response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinResult {
    /// The next action for the agent.
    pub action: CheckinAction,
}

/// Outcome of a stage-done checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage marker advanced and the completion was logged.
    Advanced,
    /// The stage was already recorded; nothing changed.
    Unchanged,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Lifecycle transition errors.
#[derive(Debug, Error)]
pub enum PlaneError {
    /// No identity facts were supplied.
    #[error("no identity facts supplied")]
    NoIdentityFacts,
    /// The identity facts matched more than one node.
    #[error("hardware identity matched {} nodes", nodes.len())]
    AmbiguousIdentity {
        /// Every matched node.
        nodes: Vec<NodeId>,
    },
    /// No node matched the supplied identity facts.
    #[error("no node matched the supplied identity facts")]
    NoMatchingNode,
    /// The node id is unknown.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    /// The node has no bound policy but the request requires one.
    #[error("node {0} has no bound policy")]
    NoBoundPolicy(NodeId),
    /// A bound policy references a policy row that no longer exists.
    #[error("bound policy {0} not found")]
    MissingPolicy(PolicyName),
    /// A bound policy references an installer that no longer exists.
    #[error("installer {0} not found")]
    MissingInstaller(InstallerName),
    /// A bound policy references a repo that no longer exists.
    #[error("repo {0} not found")]
    MissingRepo(RepoName),
    /// A bound policy references a broker that no longer exists.
    #[error("broker {0} not found")]
    MissingBroker(BrokerName),
    /// The installer has no template for the node's boot count.
    #[error("installer {0} has no boot template for this boot")]
    NoBootTemplate(InstallerName),
    /// A store request named an attribute outside the whitelist.
    #[error("unknown node attribute {0:?}")]
    UnknownAttribute(String),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IdentityError> for PlaneError {
    fn from(error: IdentityError) -> Self {
        match error {
            IdentityError::NoIdentityFacts => Self::NoIdentityFacts,
            IdentityError::Ambiguous {
                nodes,
            } => Self::AmbiguousIdentity {
                nodes,
            },
            IdentityError::Store(err) => Self::Store(err),
        }
    }
}

// ============================================================================
// SECTION: Provision Plane
// ============================================================================

/// The node lifecycle state machine over a provision store.
pub struct ProvisionPlane<S> {
    /// Backing provision store.
    store: S,
}

impl<S: ProvisionStore> ProvisionPlane<S> {
    /// Creates a provision plane over a store.
    pub const fn new(store: S) -> Self {
        Self {
            store,
        }
    }

    /// Returns the backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Serves a boot request: resolves (or registers) the node, binds an
    /// eligible policy when unbound, selects the boot template, and logs
    /// the boot.
    ///
    /// An unbound node is never an error: it falls back to the built-in
    /// microkernel bootstrap so first-sight hardware always gets a valid
    /// boot script.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError`] on ambiguous identity, missing referenced
    /// entities, or store failure.
    pub fn boot(&self, facts: &FactMap, now: Timestamp) -> Result<BootInstruction, PlaneError> {
        let mut node = identity::lookup_or_register(&self.store, facts, now)?;
        if !node.bound() {
            self.try_bind(&mut node, now)?;
        }

        let (installer, repo) = if let Some(policy_name) = node.policy.clone() {
            let policy = self
                .store
                .policy(&policy_name)?
                .ok_or(PlaneError::MissingPolicy(policy_name))?;
            let installer = self
                .store
                .installer(&policy.installer)?
                .ok_or_else(|| PlaneError::MissingInstaller(policy.installer.clone()))?;
            let repo = self
                .store
                .repo(&policy.repo)?
                .ok_or_else(|| PlaneError::MissingRepo(policy.repo.clone()))?;
            (installer, Some(repo))
        } else {
            (Installer::microkernel(), None)
        };

        node.boot_count += 1;
        let template = installer
            .boot_template(node.boot_count)
            .ok_or_else(|| PlaneError::NoBootTemplate(installer.name.clone()))?
            .to_string();
        let repo_name =
            repo.as_ref().map_or_else(|| RepoName::new(MICROKERNEL_INSTALLER), |r| r.name.clone());
        node.log_append(
            now,
            NodeEvent::Boot {
                installer: installer.name.clone(),
                template: template.clone(),
                repo: repo_name,
            },
        );
        self.store.save_node(&node)?;

        Ok(BootInstruction {
            node,
            installer,
            template,
            repo,
        })
    }

    /// Serves a checkin: merges the reported facts and, while unbound,
    /// re-runs the matcher. A fresh binding asks the agent to reboot into
    /// the install sequence.
    ///
    /// Rule-evaluation faults during matching never fail the checkin: they
    /// are logged against the node and the request degrades to
    /// [`CheckinAction::None`].
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NodeNotFound`] for unknown nodes and
    /// [`PlaneError::Store`] on store failure.
    pub fn checkin(
        &self,
        id: NodeId,
        facts: &FactMap,
        now: Timestamp,
    ) -> Result<CheckinResult, PlaneError> {
        let mut node = self.store.node(id)?.ok_or(PlaneError::NodeNotFound(id))?;
        node.merge_facts(facts);
        let mut action = CheckinAction::None;
        if !node.bound() && self.try_bind(&mut node, now)? {
            action = CheckinAction::Reboot;
        }
        self.store.save_node(&node)?;
        Ok(CheckinResult {
            action,
        })
    }

    /// Resolves identity facts to a node id without registering.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NoMatchingNode`] when nothing matches and
    /// [`PlaneError::AmbiguousIdentity`] when more than one node matches.
    pub fn node_id(&self, facts: &FactMap, now: Timestamp) -> Result<NodeId, PlaneError> {
        match identity::lookup(&self.store, facts, now)? {
            Lookup::Found(node) => Ok(node.id),
            Lookup::NotFound => Err(PlaneError::NoMatchingNode),
        }
    }

    /// Authorizes a rendered template fetch, logging it before it is
    /// served.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NoBoundPolicy`] when the node is unbound — a
    /// node with no policy cannot resolve which repo and installer apply.
    pub fn file(
        &self,
        id: NodeId,
        template: &str,
        url: &str,
        now: Timestamp,
    ) -> Result<FileInstruction, PlaneError> {
        self.file_fetch(id, template, url, now, false)
    }

    /// Authorizes a raw installer file fetch, logging it before it is
    /// served. The boundary layer refuses template sources before calling.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NoBoundPolicy`] when the node is unbound.
    pub fn raw_file(
        &self,
        id: NodeId,
        filename: &str,
        url: &str,
        now: Timestamp,
    ) -> Result<FileInstruction, PlaneError> {
        self.file_fetch(id, filename, url, now, true)
    }

    /// Resolves the broker for a bound node's install script.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NodeNotFound`] or
    /// [`PlaneError::NoBoundPolicy`] per the fetch preconditions.
    pub fn broker_install(&self, id: NodeId) -> Result<(Node, Broker), PlaneError> {
        let node = self.store.node(id)?.ok_or(PlaneError::NodeNotFound(id))?;
        let policy = self.bound_policy(&node)?;
        let broker = self
            .store
            .broker(&policy.broker)?
            .ok_or_else(|| PlaneError::MissingBroker(policy.broker.clone()))?;
        Ok((node, broker))
    }

    /// Appends a free-form message to the node log.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NodeNotFound`] for unknown nodes.
    pub fn log_message(
        &self,
        id: NodeId,
        msg: &str,
        severity: LogSeverity,
        now: Timestamp,
    ) -> Result<(), PlaneError> {
        let mut node = self.store.node(id)?.ok_or(PlaneError::NodeNotFound(id))?;
        node.log_append(
            now,
            NodeEvent::NodeLog {
                msg: msg.to_string(),
                severity,
            },
        );
        self.store.save_node(&node)?;
        Ok(())
    }

    /// Stores a whitelisted mutable node attribute and logs the change.
    ///
    /// Only `ip` is mutable through this path.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::UnknownAttribute`] for any other attribute
    /// and [`PlaneError::NodeNotFound`] for unknown nodes.
    pub fn store_attr(
        &self,
        id: NodeId,
        key: &str,
        value: &str,
        now: Timestamp,
    ) -> Result<(), PlaneError> {
        if key != "ip" {
            return Err(PlaneError::UnknownAttribute(key.to_string()));
        }
        let mut node = self.store.node(id)?.ok_or(PlaneError::NodeNotFound(id))?;
        node.ip_address = Some(value.to_string());
        let mut vars = FactMap::new();
        vars.insert("ip".to_string(), value.to_string());
        node.log_append(
            now,
            NodeEvent::Store {
                vars,
            },
        );
        self.store.save_node(&node)?;
        Ok(())
    }

    /// Records an idempotent stage checkpoint.
    ///
    /// Re-reporting the node's current stage is a no-op: no event is
    /// appended and the marker is unchanged. Stage ordering belongs to the
    /// installer's boot sequence, not to the core.
    ///
    /// # Errors
    ///
    /// Returns [`PlaneError::NodeNotFound`] for unknown nodes.
    pub fn stage_done(
        &self,
        id: NodeId,
        stage: &str,
        now: Timestamp,
    ) -> Result<StageOutcome, PlaneError> {
        let mut node = self.store.node(id)?.ok_or(PlaneError::NodeNotFound(id))?;
        if node.installed_stage.as_deref() == Some(stage) {
            return Ok(StageOutcome::Unchanged);
        }
        node.installed_stage = Some(stage.to_string());
        node.log_append(
            now,
            NodeEvent::StageDone {
                stage: stage.to_string(),
            },
        );
        self.store.save_node(&node)?;
        Ok(StageOutcome::Advanced)
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Runs the matcher for an unbound node; returns true when a policy
    /// was bound. Rule faults degrade to "no binding" after logging.
    fn try_bind(&self, node: &mut Node, now: Timestamp) -> Result<bool, PlaneError> {
        match matcher::match_policy(&self.store, node) {
            Ok(Some(policy)) => {
                node.policy = Some(policy.name.clone());
                node.hostname = Some(policy.hostname_for(node.id));
                node.log_append(
                    now,
                    NodeEvent::Bind {
                        policy: policy.name,
                    },
                );
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(MatchError::Rule {
                policy,
                tag,
                source,
            }) => {
                node.log_append(
                    now,
                    NodeEvent::NodeLog {
                        msg: format!("rule evaluation failed for tag {tag} (policy {policy}): {source}"),
                        severity: LogSeverity::Error,
                    },
                );
                Ok(false)
            }
            Err(MatchError::Store(err)) => Err(PlaneError::Store(err)),
        }
    }

    /// Loads the node's bound policy, requiring one to exist.
    fn bound_policy(&self, node: &Node) -> Result<Policy, PlaneError> {
        let Some(policy_name) = node.policy.clone() else {
            return Err(PlaneError::NoBoundPolicy(node.id));
        };
        self.store.policy(&policy_name)?.ok_or(PlaneError::MissingPolicy(policy_name))
    }

    /// Shared template/raw fetch path: precondition checks plus logging.
    fn file_fetch(
        &self,
        id: NodeId,
        template: &str,
        url: &str,
        now: Timestamp,
        raw: bool,
    ) -> Result<FileInstruction, PlaneError> {
        let mut node = self.store.node(id)?.ok_or(PlaneError::NodeNotFound(id))?;
        let policy = self.bound_policy(&node)?;
        let installer = self
            .store
            .installer(&policy.installer)?
            .ok_or_else(|| PlaneError::MissingInstaller(policy.installer.clone()))?;
        let repo = self
            .store
            .repo(&policy.repo)?
            .ok_or_else(|| PlaneError::MissingRepo(policy.repo.clone()))?;

        let event = if raw {
            NodeEvent::GetRawFile {
                template: template.to_string(),
                url: url.to_string(),
            }
        } else {
            NodeEvent::GetFile {
                template: template.to_string(),
                url: url.to_string(),
            }
        };
        node.log_append(now, event);
        self.store.save_node(&node)?;

        Ok(FileInstruction {
            node,
            installer,
            repo,
            template: template.to_string(),
        })
    }
}
