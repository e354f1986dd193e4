// anvil-server/src/loader.rs
// ============================================================================
// Module: Repo Loader
// Description: Outbox-driven background fetch of repo images.
// Purpose: Drive repos from pending to available without blocking requests.
// Dependencies: anvil-core, reqwest, tokio, url
// ============================================================================

//! ## Overview
//! The loader drains the store's outbox: each `repo-fetch` event downloads
//! the repo's image into the repo store root and flips the repo to
//! `available` (or `failed` with the recorded detail). The command
//! pipeline wakes the loader after commits; the poll interval is the
//! safety net that makes a missed wakeup harmless, and it is what replays
//! events left over from a crash between commit and completion.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anvil_core::OutboxEvent;
use anvil_core::OutboxRecord;
use anvil_core::Repo;
use anvil_core::RepoState;
use anvil_core::SharedProvisionStore;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum outbox events drained per pass.
const CLAIM_BATCH: usize = 16;
/// Image filename used when the URL path has no final segment.
const FALLBACK_IMAGE_NAME: &str = "image.iso";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Repo fetch errors recorded on the repo row.
#[derive(Debug, Error)]
enum FetchError {
    /// The image URL failed to parse or used an unsupported scheme.
    #[error("invalid image url: {0}")]
    Url(String),
    /// The download failed.
    #[error("download failed: {0}")]
    Download(String),
    /// The image exceeded the configured size cap.
    #[error("image exceeds {max} bytes")]
    TooLarge {
        /// Configured size cap.
        max: u64,
    },
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Repo Loader
// ============================================================================

/// Background worker fetching repo images enqueued through the outbox.
pub struct RepoLoader {
    /// Shared provision store.
    store: SharedProvisionStore,
    /// HTTP client for image downloads.
    http: reqwest::Client,
    /// Repo store root receiving fetched images.
    repo_root: PathBuf,
    /// Wakeup signal poked by the command pipeline after commits.
    notify: Arc<Notify>,
    /// Poll interval backstopping missed wakeups.
    poll_interval: Duration,
    /// Maximum accepted image size in bytes.
    max_fetch_bytes: u64,
}

impl RepoLoader {
    /// Creates a repo loader.
    #[must_use]
    pub fn new(
        store: SharedProvisionStore,
        repo_root: PathBuf,
        notify: Arc<Notify>,
        poll_interval: Duration,
        max_fetch_bytes: u64,
    ) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            repo_root,
            notify,
            poll_interval,
            max_fetch_bytes,
        }
    }

    /// Runs the loader until the process exits.
    pub async fn run(self) {
        loop {
            self.drain_once().await;
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Drains one batch of outbox events; returns how many completed.
    ///
    /// Fetch failures are terminal for the event: the failure is recorded
    /// on the repo row and the event completes, so a poisoned URL cannot
    /// wedge the outbox.
    pub async fn drain_once(&self) -> usize {
        let records = match self.store.claim_outbox(CLAIM_BATCH) {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(error = %err, "repo loader failed to claim outbox events");
                return 0;
            }
        };
        let mut completed = 0;
        for record in records {
            self.process(&record).await;
            match self.store.complete_outbox(record.id) {
                Ok(()) => completed += 1,
                Err(err) => {
                    tracing::error!(event = record.id, error = %err, "failed to complete outbox event");
                }
            }
        }
        completed
    }

    /// Processes one outbox event.
    async fn process(&self, record: &OutboxRecord) {
        let OutboxEvent::RepoFetch {
            repo: name,
        } = &record.event;
        let repo = match self.store.repo(name) {
            Ok(Some(repo)) => repo,
            // Deleted between commit and pickup; nothing left to do.
            Ok(None) => return,
            Err(err) => {
                tracing::error!(repo = %name, error = %err, "repo loader failed to load repo");
                return;
            }
        };
        if repo.state != RepoState::Pending {
            return;
        }
        let outcome = self.fetch(&repo).await;
        let state = match outcome {
            Ok(path) => {
                tracing::info!(repo = %name, path = %path.display(), "repo image fetched");
                RepoState::Available
            }
            Err(err) => {
                tracing::error!(repo = %name, error = %err, "repo image fetch failed");
                RepoState::Failed {
                    detail: err.to_string(),
                }
            }
        };
        let updated = Repo {
            state,
            ..repo
        };
        if let Err(err) = self.store.save_repo(&updated) {
            tracing::error!(repo = %name, error = %err, "failed to persist repo state");
        }
    }

    /// Fetches a repo image into `<repo_root>/<name>/`.
    async fn fetch(&self, repo: &Repo) -> Result<PathBuf, FetchError> {
        let Some(iso_url) = &repo.iso_url else {
            return Err(FetchError::Url("repo has no iso_url".to_string()));
        };
        let url = Url::parse(iso_url).map_err(|err| FetchError::Url(err.to_string()))?;
        let target_dir = self.repo_root.join(repo.name.as_str());
        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(|err| FetchError::Io(err.to_string()))?;
        let target = target_dir.join(image_name(&url));

        match url.scheme() {
            "http" | "https" => self.download(&url, &target).await?,
            "file" => {
                let source = url
                    .to_file_path()
                    .map_err(|()| FetchError::Url(format!("unusable file url {url}")))?;
                copy_local(&source, &target, self.max_fetch_bytes).await?;
            }
            other => {
                return Err(FetchError::Url(format!("unsupported url scheme {other:?}")));
            }
        }
        Ok(target)
    }

    /// Streams an HTTP(S) download to disk with the size cap applied.
    async fn download(&self, url: &Url, target: &Path) -> Result<(), FetchError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| FetchError::Download(err.to_string()))?
            .error_for_status()
            .map_err(|err| FetchError::Download(err.to_string()))?;
        if let Some(length) = response.content_length()
            && length > self.max_fetch_bytes
        {
            return Err(FetchError::TooLarge {
                max: self.max_fetch_bytes,
            });
        }
        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|err| FetchError::Io(err.to_string()))?;
        let mut written: u64 = 0;
        let mut response = response;
        while let Some(chunk) =
            response.chunk().await.map_err(|err| FetchError::Download(err.to_string()))?
        {
            written = written.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
            if written > self.max_fetch_bytes {
                return Err(FetchError::TooLarge {
                    max: self.max_fetch_bytes,
                });
            }
            file.write_all(&chunk).await.map_err(|err| FetchError::Io(err.to_string()))?;
        }
        file.flush().await.map_err(|err| FetchError::Io(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Copies a local image with the size cap applied.
async fn copy_local(source: &Path, target: &Path, max_bytes: u64) -> Result<(), FetchError> {
    let metadata =
        tokio::fs::metadata(source).await.map_err(|err| FetchError::Io(err.to_string()))?;
    if metadata.len() > max_bytes {
        return Err(FetchError::TooLarge {
            max: max_bytes,
        });
    }
    tokio::fs::copy(source, target).await.map_err(|err| FetchError::Io(err.to_string()))?;
    Ok(())
}

/// Derives the stored image filename from the URL path.
fn image_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map_or_else(|| FALLBACK_IMAGE_NAME.to_string(), ToString::to_string)
}
