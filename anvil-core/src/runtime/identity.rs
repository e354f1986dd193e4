// anvil-core/src/runtime/identity.rs
// ============================================================================
// Module: Anvil Identity Resolver
// Description: Maps hardware-derived facts to exactly one logical node.
// Purpose: Resolve, register, and refuse ambiguous node identities.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Every boot and checkin starts here. The resolver builds a canonical
//! hardware signature from the supplied facts and finds the stored nodes it
//! overlaps. Exactly one match resolves; zero matches either registers a
//! new node (boot/checkin path) or reports not-found (explicit lookup
//! path); more than one match is a fatal ambiguity that is logged against
//! every matched node and never silently resolved.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::facts::FactMap;
use crate::core::facts::HwSignature;
use crate::core::identifiers::NodeId;
use crate::core::node::Node;
use crate::core::node::NodeEvent;
use crate::core::time::Timestamp;
use crate::interfaces::ProvisionStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Results and Errors
// ============================================================================

/// Outcome of an identity lookup without registration.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Exactly one stored node matched; returned with its full log.
    Found(Node),
    /// No stored node matched the signature.
    NotFound,
}

/// Identity resolution errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The fact set carried no identity facts at all.
    #[error("no identity facts supplied")]
    NoIdentityFacts,
    /// More than one stored node matched the signature.
    #[error("hardware identity matched {} nodes", nodes.len())]
    Ambiguous {
        /// Every matched node, in id order.
        nodes: Vec<NodeId>,
    },
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Resolves identity facts to a node without registering new nodes.
///
/// Used by the explicit id-lookup path: an unmatched signature reports
/// [`Lookup::NotFound`] rather than creating a node. The matched node is
/// returned untouched. `now` timestamps ambiguity log entries when the
/// lookup uncovers a conflict.
///
/// # Errors
///
/// Returns [`IdentityError::Ambiguous`] when more than one node matches
/// (after logging the conflict against every matched node), or
/// [`IdentityError::NoIdentityFacts`] when the facts identify nothing.
pub fn lookup<S: ProvisionStore>(
    store: &S,
    facts: &FactMap,
    now: Timestamp,
) -> Result<Lookup, IdentityError> {
    let signature = signature_of(facts)?;
    let mut matched = store.nodes_matching(&signature)?;
    match matched.len() {
        0 => Ok(Lookup::NotFound),
        1 => {
            let id = matched.remove(0).id;
            let node = store.node(id)?.ok_or_else(|| {
                StoreError::Corrupt(format!("node {id} vanished during identity resolution"))
            })?;
            Ok(Lookup::Found(node))
        }
        _ => Err(report_ambiguity(store, &signature, &matched, now)?),
    }
}

/// Resolves identity facts to a node, registering one on first sight.
///
/// Used by the boot and checkin paths. A matched node gets the incoming
/// facts merged in memory; the caller persists together with the lifecycle
/// event it is about to append. Registration persists immediately so the
/// store can enforce signature uniqueness; a concurrent duplicate
/// registration loses with a conflict and is resolved by one retry of the
/// lookup.
///
/// # Errors
///
/// Returns [`IdentityError::Ambiguous`] when more than one node matches,
/// [`IdentityError::NoIdentityFacts`] when the facts identify nothing, or
/// the underlying [`StoreError`].
pub fn lookup_or_register<S: ProvisionStore>(
    store: &S,
    facts: &FactMap,
    now: Timestamp,
) -> Result<Node, IdentityError> {
    match lookup(store, facts, now)? {
        Lookup::Found(mut node) => {
            node.merge_facts(facts);
            Ok(node)
        }
        Lookup::NotFound => match store.create_node(facts.clone(), now) {
            Ok(node) => Ok(node),
            // Lost a concurrent registration race: the uniqueness
            // constraint guarantees a winner exists now.
            Err(StoreError::Conflict(_)) => match lookup(store, facts, now)? {
                Lookup::Found(mut node) => {
                    node.merge_facts(facts);
                    Ok(node)
                }
                Lookup::NotFound => Err(IdentityError::Store(StoreError::Conflict(
                    "identity registration conflict with no surviving match".to_string(),
                ))),
            },
            Err(err) => Err(IdentityError::Store(err)),
        },
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the canonical signature, rejecting fact sets with no identity.
fn signature_of(facts: &FactMap) -> Result<HwSignature, IdentityError> {
    let signature = HwSignature::from_facts(facts);
    if signature.is_empty() {
        return Err(IdentityError::NoIdentityFacts);
    }
    Ok(signature)
}

/// Logs an ambiguous match against every matched node and builds the error.
fn report_ambiguity<S: ProvisionStore>(
    store: &S,
    signature: &HwSignature,
    matched: &[Node],
    now: Timestamp,
) -> Result<IdentityError, StoreError> {
    let names: Vec<String> = matched.iter().map(Node::name).collect();
    let detail = format!(
        "hardware identity [{}] matched nodes {}",
        signature.components().iter().cloned().collect::<Vec<_>>().join(", "),
        names.join(", ")
    );
    let mut nodes = Vec::with_capacity(matched.len());
    for entry in matched {
        nodes.push(entry.id);
        if let Some(mut node) = store.node(entry.id)? {
            node.log_append(
                now,
                NodeEvent::DuplicateIdentity {
                    detail: detail.clone(),
                },
            );
            store.save_node(&node)?;
        }
    }
    Ok(IdentityError::Ambiguous {
        nodes,
    })
}
