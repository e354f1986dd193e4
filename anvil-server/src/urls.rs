// anvil-server/src/urls.rs
// ============================================================================
// Module: Service URL Helpers
// Description: URL construction for boot scripts and render contexts.
// Purpose: Hand templates every service URL a node needs to continue.
// Dependencies: anvil-core, anvil-config
// ============================================================================

//! ## Overview
//! Rendered boot and install scripts drive the node through the rest of
//! its lifecycle by fetching service URLs: checkin, file fetch, logging,
//! attribute storage, and stage checkpoints. This module builds those URLs
//! against the advertised base URL and assembles the render variable maps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use anvil_config::MicrokernelConfig;
use anvil_core::BootInstruction;
use anvil_core::FileInstruction;
use anvil_core::MICROKERNEL_INSTALLER;
use anvil_core::Node;
use anvil_core::NodeId;
use anvil_core::RenderVars;
use anvil_core::Repo;

// ============================================================================
// SECTION: Service URLs
// ============================================================================

/// Management API URL for a node.
#[must_use]
pub fn node_url(base: &str, id: NodeId) -> String {
    format!("{base}/api/collections/nodes/{}", id.name())
}

/// Checkin URL for a node's agent.
#[must_use]
pub fn checkin_url(base: &str, id: NodeId) -> String {
    format!("{base}/svc/checkin/{id}")
}

/// Rendered-file URL prefix for a node; templates append `/<name>`.
#[must_use]
pub fn file_url_base(base: &str, id: NodeId) -> String {
    format!("{base}/svc/file/{id}")
}

/// Node log URL; templates append `?msg=...&severity=...`.
#[must_use]
pub fn log_url(base: &str, id: NodeId) -> String {
    format!("{base}/svc/log/{id}")
}

/// Attribute store URL; templates append `?ip=...`. Deliberately left
/// unescaped so shells can interpolate values into the query.
#[must_use]
pub fn store_url(base: &str, id: NodeId) -> String {
    format!("{base}/svc/store/{id}")
}

/// Stage checkpoint URL prefix; templates append the stage name.
#[must_use]
pub fn stage_done_url(base: &str, id: NodeId) -> String {
    format!("{base}/svc/stage-done/{id}?name=")
}

/// Broker install-script URL for a node.
#[must_use]
pub fn broker_install_url(base: &str, id: NodeId) -> String {
    format!("{base}/svc/broker/{id}/install")
}

/// Content URL for a repo: its external URL, or the served repo store
/// path (the microkernel directory when no repo is bound).
#[must_use]
pub fn repo_url(base: &str, repo: Option<&Repo>) -> String {
    match repo {
        Some(repo) => match &repo.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{base}/svc/repo/{}", repo.name),
        },
        None => format!("{base}/svc/repo/{MICROKERNEL_INSTALLER}"),
    }
}

/// Boot URL for the iPXE bootstrap script, with iPXE variable slots for
/// every probed NIC plus the DMI identity facts.
#[must_use]
pub fn ipxe_boot_url(base: &str, nic_max: u32) -> String {
    let mut query: Vec<String> = Vec::new();
    for index in 0..nic_max {
        query.push(format!("net{index}=${{net{index}/mac:hexhyp}}"));
    }
    for key in ["dhcp_mac", "serial", "asset", "uuid"] {
        query.push(format!("{key}=${{{key}}}"));
    }
    format!("{base}/svc/boot?{}", query.join("&"))
}

// ============================================================================
// SECTION: Render Variables
// ============================================================================

/// Variables shared by every node-scoped template.
fn node_vars(base: &str, node: &Node) -> RenderVars {
    let mut vars = RenderVars::new();
    vars.insert("node_id".to_string(), node.id.to_string());
    vars.insert("node_name".to_string(), node.name());
    vars.insert("node_url".to_string(), node_url(base, node.id));
    vars.insert("checkin_url".to_string(), checkin_url(base, node.id));
    vars.insert("file_url_base".to_string(), file_url_base(base, node.id));
    vars.insert("log_url".to_string(), log_url(base, node.id));
    vars.insert("store_url".to_string(), store_url(base, node.id));
    vars.insert("stage_done_url".to_string(), stage_done_url(base, node.id));
    vars.insert("broker_install_url".to_string(), broker_install_url(base, node.id));
    if let Some(hostname) = &node.hostname {
        vars.insert("hostname".to_string(), hostname.clone());
    }
    if let Some(ip) = &node.ip_address {
        vars.insert("node_ip".to_string(), ip.clone());
    }
    vars
}

/// Variables for a boot template render.
#[must_use]
pub fn boot_vars(
    base: &str,
    instruction: &BootInstruction,
    microkernel: &MicrokernelConfig,
) -> RenderVars {
    let mut vars = node_vars(base, &instruction.node);
    vars.insert("installer_name".to_string(), instruction.installer.name.to_string());
    vars.insert("template".to_string(), instruction.template.clone());
    let repo_name = instruction
        .repo
        .as_ref()
        .map_or_else(|| MICROKERNEL_INSTALLER.to_string(), |repo| repo.name.to_string());
    vars.insert("repo_name".to_string(), repo_name);
    vars.insert("repo_url".to_string(), repo_url(base, instruction.repo.as_ref()));
    vars.insert(
        "kernel_args".to_string(),
        microkernel_kernel_args(base, instruction.node.id, microkernel),
    );
    vars
}

/// Variables for a rendered file fetch.
#[must_use]
pub fn file_vars(base: &str, instruction: &FileInstruction) -> RenderVars {
    let mut vars = node_vars(base, &instruction.node);
    vars.insert("installer_name".to_string(), instruction.installer.name.to_string());
    vars.insert("repo_name".to_string(), instruction.repo.name.to_string());
    vars.insert("repo_url".to_string(), repo_url(base, Some(&instruction.repo)));
    vars
}

/// Variables for the iPXE bootstrap render.
#[must_use]
pub fn bootstrap_vars(base: &str, nic_max: u32, microkernel: &MicrokernelConfig) -> RenderVars {
    let mut vars = RenderVars::new();
    vars.insert("boot_url".to_string(), ipxe_boot_url(base, nic_max));
    vars.insert("nic_max".to_string(), nic_max.to_string());
    if let Some(args) = &microkernel.kernel_args {
        vars.insert("extra_kernel_args".to_string(), args.clone());
    }
    vars
}

/// Kernel arguments pointing the microkernel agent at its checkin URL.
fn microkernel_kernel_args(base: &str, id: NodeId, microkernel: &MicrokernelConfig) -> String {
    let register = format!("anvil.register={}", checkin_url(base, id));
    match &microkernel.kernel_args {
        Some(extra) => format!("{register} {extra}"),
        None => register,
    }
}
