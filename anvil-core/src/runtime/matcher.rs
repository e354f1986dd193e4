// anvil-core/src/runtime/matcher.rs
// ============================================================================
// Module: Anvil Policy Matcher
// Description: First-match policy selection over the ordered policy list.
// Purpose: Decide which installation policy, if any, applies to a node.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The matcher walks enabled policies in ascending `rule_number` order and
//! returns the first whose frozen tag set is fully satisfied by the node's
//! current facts. Order is the only tie-break; this is first-match, not
//! best-match. A policy with a `max_count` cap stops accepting nodes once
//! the cap is reached.

// ============================================================================
// SECTION: Imports
// ============================================================================

use anvil_rules::RuleError;
use thiserror::Error;

use crate::core::identifiers::PolicyName;
use crate::core::identifiers::TagName;
use crate::core::node::Node;
use crate::core::policy::Policy;
use crate::interfaces::ProvisionStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Policy matching errors.
#[derive(Debug, Error)]
pub enum MatchError {
    /// A tag rule failed during evaluation.
    #[error("evaluating tag {tag} for policy {policy}: {source}")]
    Rule {
        /// Policy under evaluation.
        policy: PolicyName,
        /// Tag whose rule failed.
        tag: TagName,
        /// Underlying rule fault.
        source: RuleError,
    },
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Matching
// ============================================================================

/// Selects the first eligible policy for a node, or `None`.
///
/// Candidates are the enabled policies in ascending `rule_number` order; a
/// candidate is eligible when every frozen tag matches the node's facts
/// (conjunction) and its `max_count`, when set, is not exhausted.
///
/// # Errors
///
/// Returns [`MatchError::Rule`] when a tag rule faults during evaluation
/// and [`MatchError::Store`] when the store fails.
pub fn match_policy<S: ProvisionStore>(
    store: &S,
    node: &Node,
) -> Result<Option<Policy>, MatchError> {
    let policies = store.policies()?;
    // Bound counts are only needed when some candidate carries a cap.
    let bound_counts: Option<Vec<(PolicyName, usize)>> =
        if policies.iter().any(|policy| policy.max_count.is_some()) {
            Some(count_bound(store)?)
        } else {
            None
        };

    for policy in policies {
        if !policy.enabled {
            continue;
        }
        if !tags_match(&policy, node)? {
            continue;
        }
        if let (Some(cap), Some(counts)) = (policy.max_count, bound_counts.as_ref()) {
            let bound = counts
                .iter()
                .find(|(name, _)| name == &policy.name)
                .map_or(0, |(_, count)| *count);
            if u64::try_from(bound).unwrap_or(u64::MAX) >= u64::from(cap) {
                continue;
            }
        }
        return Ok(Some(policy));
    }
    Ok(None)
}

/// Evaluates a policy's frozen tag conjunction against the node's facts.
fn tags_match(policy: &Policy, node: &Node) -> Result<bool, MatchError> {
    for tag in &policy.tags {
        let matched = tag.rule.matches(&node.facts).map_err(|source| MatchError::Rule {
            policy: policy.name.clone(),
            tag: tag.name.clone(),
            source,
        })?;
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Counts bound nodes per policy.
fn count_bound<S: ProvisionStore>(store: &S) -> Result<Vec<(PolicyName, usize)>, StoreError> {
    let mut counts: Vec<(PolicyName, usize)> = Vec::new();
    for node in store.nodes()? {
        let Some(policy) = node.policy else {
            continue;
        };
        match counts.iter_mut().find(|(name, _)| name == &policy) {
            Some((_, count)) => *count += 1,
            None => counts.push((policy, 1)),
        }
    }
    Ok(counts)
}
