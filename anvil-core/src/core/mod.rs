// anvil-core/src/core/mod.rs
// ============================================================================
// Module: Anvil Core Types
// Description: Canonical entity and value types for the provisioning store.
// Purpose: Provide stable, serializable types for nodes, policies, and inventory.
// Dependencies: anvil-rules, serde
// ============================================================================

//! ## Overview
//! Anvil core types define the persisted provisioning entities (nodes,
//! tags, policies, repos, brokers, installers) along with identifiers,
//! hardware signatures, timestamps, and canonical hashing. These types are
//! the single source of truth for every derived API surface.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod facts;
pub mod hashing;
pub mod identifiers;
pub mod inventory;
pub mod node;
pub mod policy;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use facts::FactMap;
pub use facts::HwSignature;
pub use facts::is_identity_fact;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use identifiers::BrokerName;
pub use identifiers::InstallerName;
pub use identifiers::NodeId;
pub use identifiers::PolicyName;
pub use identifiers::RepoName;
pub use identifiers::TagName;
pub use inventory::BOOT_SEQ_DEFAULT_KEY;
pub use inventory::Broker;
pub use inventory::EntityError;
pub use inventory::Installer;
pub use inventory::MICROKERNEL_BOOT_TEMPLATE;
pub use inventory::MICROKERNEL_INSTALLER;
pub use inventory::Repo;
pub use inventory::RepoState;
pub use node::LogSeverity;
pub use node::Node;
pub use node::NodeEvent;
pub use node::NodeLogEntry;
pub use policy::Policy;
pub use policy::Tag;
pub use time::Timestamp;
