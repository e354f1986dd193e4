// anvil-server/tests/loader.rs
// ============================================================================
// Module: Repo Loader Tests
// Description: Tests for outbox-driven repo fetching.
// ============================================================================
//! ## Overview
//! Drives the loader against an in-memory store with `file://` images:
//! pending repos become available with content on disk, fetch failures are
//! recorded on the repo row, and completed events never replay.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic loader fixtures.")]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anvil_core::InMemoryProvisionStore;
use anvil_core::OutboxEvent;
use anvil_core::ProvisionStore;
use anvil_core::Repo;
use anvil_core::RepoName;
use anvil_core::RepoState;
use anvil_core::SharedProvisionStore;
use anvil_core::Timestamp;
use anvil_server::RepoLoader;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Fixed timestamp for deterministic fixtures.
const NOW: Timestamp = Timestamp::from_unix_millis(1_700_000_000_000);

/// Builds a loader over a fresh in-memory store and temp repo root.
fn loader(dir: &TempDir, max_bytes: u64) -> (SharedProvisionStore, RepoLoader) {
    let store: SharedProvisionStore = Arc::new(InMemoryProvisionStore::new());
    let loader = RepoLoader::new(
        store.clone(),
        dir.path().join("repo"),
        Arc::new(Notify::new()),
        Duration::from_millis(1_000),
        max_bytes,
    );
    (store, loader)
}

/// Commits a pending repo with its fetch event.
fn enqueue_repo(store: &SharedProvisionStore, name: &str, iso_url: String) {
    let repo = Repo {
        name: RepoName::new(name),
        url: None,
        iso_url: Some(iso_url),
        state: RepoState::Pending,
    };
    store
        .create_repo(
            &repo,
            &[OutboxEvent::RepoFetch {
                repo: repo.name.clone(),
            }],
            NOW,
        )
        .unwrap();
}

#[tokio::test]
async fn test_file_image_fetch_flips_repo_to_available() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("centos9.iso");
    fs::write(&image, b"iso-bytes").unwrap();

    let (store, loader) = loader(&dir, 1024);
    enqueue_repo(&store, "centos9", format!("file://{}", image.display()));

    assert_eq!(loader.drain_once().await, 1);

    let repo = store.repo(&RepoName::new("centos9")).unwrap().unwrap();
    assert_eq!(repo.state, RepoState::Available);
    let fetched = dir.path().join("repo").join("centos9").join("centos9.iso");
    assert_eq!(fs::read(fetched).unwrap(), b"iso-bytes");

    // The completed event never replays.
    assert_eq!(loader.drain_once().await, 0);
}

#[tokio::test]
async fn test_oversized_image_is_recorded_as_failed() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("huge.iso");
    fs::write(&image, vec![0_u8; 64]).unwrap();

    let (store, loader) = loader(&dir, 16);
    enqueue_repo(&store, "huge", format!("file://{}", image.display()));

    assert_eq!(loader.drain_once().await, 1);
    let repo = store.repo(&RepoName::new("huge")).unwrap().unwrap();
    assert!(matches!(repo.state, RepoState::Failed { .. }));
}

#[tokio::test]
async fn test_unsupported_scheme_is_recorded_as_failed() {
    let dir = TempDir::new().unwrap();
    let (store, loader) = loader(&dir, 1024);
    enqueue_repo(&store, "bad", "ftp://mirror.example.com/image.iso".to_string());

    assert_eq!(loader.drain_once().await, 1);
    let repo = store.repo(&RepoName::new("bad")).unwrap().unwrap();
    assert!(matches!(repo.state, RepoState::Failed { .. }));
}

#[tokio::test]
async fn test_repo_deleted_before_pickup_completes_quietly() {
    let dir = TempDir::new().unwrap();
    let (store, loader) = loader(&dir, 1024);
    enqueue_repo(&store, "gone", "file:///nonexistent.iso".to_string());
    store.delete_repo(&RepoName::new("gone")).unwrap();

    assert_eq!(loader.drain_once().await, 1);
    assert!(store.claim_outbox(16).unwrap().is_empty());
}
