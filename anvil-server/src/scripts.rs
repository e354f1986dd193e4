// anvil-server/src/scripts.rs
// ============================================================================
// Module: Broker Install Scripts
// Description: Template-backed broker install-script generation.
// Purpose: Implement the install-script contract for bound nodes.
// Dependencies: anvil-core, crate::templates
// ============================================================================

//! ## Overview
//! Each broker type owns an install template at
//! `<templates_root>/brokers/<type>/install.tmpl`. The script is rendered
//! with the node's identity and the broker's configuration values, and is
//! fetched by the node at the end of its install sequence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::PathBuf;

use anvil_core::Broker;
use anvil_core::InstallScriptSource;
use anvil_core::Node;
use anvil_core::RenderVars;
use anvil_core::ScriptError;

use crate::templates::TEMPLATE_EXTENSION;
use crate::templates::substitute;

// ============================================================================
// SECTION: Broker Script Store
// ============================================================================

/// Install-script source rooted in the templates directory.
pub struct BrokerScriptStore {
    /// Root directory for installer and broker templates.
    templates_root: PathBuf,
}

impl BrokerScriptStore {
    /// Creates a script store over the templates root.
    #[must_use]
    pub const fn new(templates_root: PathBuf) -> Self {
        Self {
            templates_root,
        }
    }
}

impl InstallScriptSource for BrokerScriptStore {
    fn install_script(&self, broker: &Broker, node: &Node) -> Result<Vec<u8>, ScriptError> {
        let path = self
            .templates_root
            .join("brokers")
            .join(&broker.broker_type)
            .join(format!("install.{TEMPLATE_EXTENSION}"));
        let text = fs::read_to_string(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ScriptError::UnknownType(broker.broker_type.clone())
            } else {
                ScriptError::Script(err.to_string())
            }
        })?;

        let mut vars = RenderVars::new();
        vars.insert("node_id".to_string(), node.id.to_string());
        vars.insert("node_name".to_string(), node.name());
        vars.insert("broker_name".to_string(), broker.name.to_string());
        if let Some(hostname) = &node.hostname {
            vars.insert("hostname".to_string(), hostname.clone());
        }
        if let Some(ip) = &node.ip_address {
            vars.insert("node_ip".to_string(), ip.clone());
        }
        if let Some(policy) = &node.policy {
            vars.insert("policy".to_string(), policy.to_string());
        }
        for (key, value) in &broker.configuration {
            vars.insert(format!("config_{key}"), value.clone());
        }
        Ok(substitute(&text, &vars).into_bytes())
    }
}
