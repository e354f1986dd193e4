// anvil-core/src/core/facts.rs
// ============================================================================
// Module: Anvil Facts and Hardware Identity
// Description: Fact maps and canonical hardware-identity signatures.
// Purpose: Normalize hardware-derived facts into comparable identity sets.
// Dependencies: anvil-rules, serde
// ============================================================================

//! ## Overview
//! Nodes are identified by a canonical signature derived from their
//! hardware facts: MAC addresses (any `netN` slot plus `dhcp_mac`) and DMI
//! values (`serial`, `asset`, `uuid`). MAC components are keyed
//! independently of their interface slot so NIC reordering between boots
//! cannot split a node's identity. Two signatures match when their
//! component sets intersect; resolving which stored nodes match is the
//! identity resolver's job.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Fact Map
// ============================================================================

/// Ordered fact name to string value map describing a node.
pub type FactMap = anvil_rules::Facts;

/// DMI fact keys that contribute to hardware identity.
const DMI_KEYS: [&str; 3] = ["serial", "asset", "uuid"];

/// Returns true when the fact key contributes to hardware identity.
#[must_use]
pub fn is_identity_fact(key: &str) -> bool {
    is_mac_key(key) || DMI_KEYS.contains(&key)
}

/// Returns true when the fact key names a MAC address slot.
fn is_mac_key(key: &str) -> bool {
    if key == "dhcp_mac" {
        return true;
    }
    key.strip_prefix("net").is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

// ============================================================================
// SECTION: Hardware Signature
// ============================================================================

/// Canonical, order-independent hardware identity signature.
///
/// Components are `key=value` strings: MAC values are normalized and keyed
/// `mac=` regardless of interface slot; DMI values keep their fact key.
///
/// # Invariants
/// - Components are normalized (lowercase, MAC separators folded to `:`).
/// - Empty fact values never produce components.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HwSignature {
    /// Sorted identity components.
    components: BTreeSet<String>,
}

impl HwSignature {
    /// Builds a signature from the identity facts in a fact map.
    #[must_use]
    pub fn from_facts(facts: &FactMap) -> Self {
        let mut components = BTreeSet::new();
        for (key, value) in facts {
            if value.is_empty() {
                continue;
            }
            if is_mac_key(key) {
                components.insert(format!("mac={}", normalize_mac(value)));
            } else if DMI_KEYS.contains(&key.as_str()) {
                components.insert(format!("{key}={}", value.to_ascii_lowercase()));
            }
        }
        Self {
            components,
        }
    }

    /// Returns true when no identity components are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns the sorted identity components.
    #[must_use]
    pub const fn components(&self) -> &BTreeSet<String> {
        &self.components
    }

    /// Returns true when the two signatures share at least one component.
    ///
    /// This is the partial-match predicate: overlap tolerates NIC
    /// reordering and partially available facts across boots.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.components.intersection(&other.components).next().is_some()
    }

    /// Merges the other signature's components into this one.
    pub fn merge(&mut self, other: &Self) {
        self.components.extend(other.components.iter().cloned());
    }
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Normalizes a MAC address: lowercase with separators folded to `:`.
///
/// iPXE hands MACs over in `hexhyp` form (`52-54-00-12-34-56`); DHCP and
/// DMI sources vary between `:`, `-`, and `.` separators.
fn normalize_mac(value: &str) -> String {
    value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '.' { ':' } else { c })
        .collect()
}
