// anvil-server/src/lib.rs
// ============================================================================
// Module: Anvil Server Library
// Description: Public API surface for the Anvil HTTP boundary.
// Purpose: Expose the server, collaborator implementations, and the loader.
// Dependencies: crate::{api, loader, scripts, server, svc, templates, urls}
// ============================================================================

//! ## Overview
//! The Anvil server is a thin axum boundary over the provisioning core:
//! the `/svc` node API consumed by iPXE and install agents, the `/api`
//! management API, file-backed template rendering and lookup, broker
//! install-script generation, and the outbox-driven repo loader.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api;
pub mod loader;
pub mod scripts;
pub mod server;
pub mod svc;
pub mod templates;
pub mod urls;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use loader::RepoLoader;
pub use scripts::BrokerScriptStore;
pub use server::AppState;
pub use server::ServerError;
pub use server::build_router;
pub use server::serve;
pub use templates::FileTemplateStore;
pub use templates::TEMPLATE_EXTENSION;
