// anvil-store-sqlite/src/lib.rs
// ============================================================================
// Module: Anvil SQLite Store Library
// Description: Public API surface for the durable provision store.
// Purpose: Expose the SQLite-backed ProvisionStore implementation.
// Dependencies: crate::store
// ============================================================================

//! ## Overview
//! This crate implements a durable [`anvil_core::ProvisionStore`] backed by
//! `SQLite` in WAL mode: canonical-JSON entity snapshots verified by hash on
//! load, a hardware-identity uniqueness index enforced at commit, per-node
//! append-only log rows, and a transactional outbox.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteProvisionStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
