// anvil-server/src/server.rs
// ============================================================================
// Module: Anvil HTTP Server
// Description: Router assembly, shared state, and the serve loop.
// Purpose: Wire the provisioning core to its axum transport.
// Dependencies: anvil-config, anvil-core, anvil-store-sqlite, axum, tokio
// ============================================================================

//! ## Overview
//! The server wires one shared provision store into the provision plane,
//! the command router, and the repo loader, then serves the `/svc` and
//! `/api` surfaces. Error mapping lives here so every handler reports the
//! same machine-readable error bodies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anvil_config::AnvilConfig;
use anvil_config::StoreBackend;
use anvil_core::CommandError;
use anvil_core::CommandRouter;
use anvil_core::CommitNotifier;
use anvil_core::FileLookupError;
use anvil_core::InMemoryProvisionStore;
use anvil_core::PlaneError;
use anvil_core::ProvisionPlane;
use anvil_core::RenderError;
use anvil_core::ScriptError;
use anvil_core::SharedProvisionStore;
use anvil_core::Timestamp;
use anvil_store_sqlite::SqliteProvisionStore;
use axum::Json;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Notify;

use crate::api;
use crate::loader::RepoLoader;
use crate::scripts::BrokerScriptStore;
use crate::svc;
use crate::templates::FileTemplateStore;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server startup and serve-loop errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration failed validation.
    #[error("config error: {0}")]
    Config(String),
    /// The provision store failed to open.
    #[error("store error: {0}")]
    Store(String),
    /// Binding or serving failed.
    #[error("server io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Loader Notifier
// ============================================================================

/// Commit notifier waking the repo loader.
#[derive(Clone)]
pub struct LoaderNotifier {
    /// Shared wakeup signal.
    notify: Arc<Notify>,
}

impl CommitNotifier for LoaderNotifier {
    fn notify(&self) {
        self.notify.notify_one();
    }
}

// ============================================================================
// SECTION: App State
// ============================================================================

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle state machine over the shared store.
    pub plane: Arc<ProvisionPlane<SharedProvisionStore>>,
    /// Management command router.
    pub commands: Arc<CommandRouter<SharedProvisionStore, LoaderNotifier>>,
    /// Template renderer and file lookup.
    pub templates: Arc<FileTemplateStore>,
    /// Broker install-script source.
    pub scripts: Arc<BrokerScriptStore>,
    /// Validated configuration.
    pub config: Arc<AnvilConfig>,
}

impl AppState {
    /// Builds the shared state over a provision store.
    #[must_use]
    pub fn new(store: SharedProvisionStore, notify: Arc<Notify>, config: AnvilConfig) -> Self {
        let templates = Arc::new(FileTemplateStore::new(
            config.templates_root.clone(),
            config.repo_store_root.clone(),
        ));
        let scripts = Arc::new(BrokerScriptStore::new(config.templates_root.clone()));
        let commands = Arc::new(CommandRouter::new(
            store.clone(),
            LoaderNotifier {
                notify,
            },
        ));
        Self {
            plane: Arc::new(ProvisionPlane::new(store)),
            commands,
            templates,
            scripts,
            config: Arc::new(config),
        }
    }

    /// Returns the advertised base URL.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.config.base_url()
    }
}

// ============================================================================
// SECTION: Router and Serve
// ============================================================================

/// Builds the full `/svc` + `/api` router over the shared state.
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;
    Router::new()
        .route("/svc/boot", get(svc::boot))
        .route("/svc/checkin/{id}", post(svc::checkin))
        .route("/svc/nodeid", get(svc::node_id))
        .route("/svc/file/{id}/{template}", get(svc::file))
        .route("/svc/file/{id}/raw/{filename}", get(svc::raw_file))
        .route("/svc/broker/{id}/install", get(svc::broker_install))
        .route("/svc/log/{id}", get(svc::node_log))
        .route("/svc/store/{id}", get(svc::store_attr))
        .route("/svc/stage-done/{id}", get(svc::stage_done))
        .route("/svc/repo/{repo}/{*path}", get(svc::repo_file))
        .route("/api", get(api::index))
        .route("/api/commands/{name}", post(api::command))
        .route("/api/collections/{collection}", get(api::collection))
        .route("/api/collections/nodes/{name}/log", get(api::node_log))
        .route("/api/collections/{collection}/{name}", get(api::entity))
        .route("/api/microkernel/bootstrap", get(api::bootstrap))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Opens the configured store, starts the repo loader, and serves.
///
/// # Errors
///
/// Returns [`ServerError`] when the store cannot open or the listener
/// fails.
pub async fn serve(config: AnvilConfig) -> Result<(), ServerError> {
    config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
    let store: SharedProvisionStore = match &config.store {
        StoreBackend::Memory => Arc::new(InMemoryProvisionStore::new()),
        StoreBackend::Sqlite(sqlite) => Arc::new(
            SqliteProvisionStore::new(sqlite.clone())
                .map_err(|err| ServerError::Store(err.to_string()))?,
        ),
    };
    let notify = Arc::new(Notify::new());
    let loader = RepoLoader::new(
        store.clone(),
        config.repo_store_root.clone(),
        Arc::clone(&notify),
        Duration::from_millis(config.loader.poll_interval_ms),
        config.loader.max_fetch_bytes,
    );
    tokio::spawn(loader.run());

    let bind_addr = config.server.bind_addr;
    let state = AppState::new(store, notify, config);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|err| ServerError::Io(err.to_string()))?;
    tracing::info!(%bind_addr, "anvil server listening");
    axum::serve(listener, app).await.map_err(|err| ServerError::Io(err.to_string()))
}

// ============================================================================
// SECTION: Time
// ============================================================================

/// Returns the current wall-clock timestamp for lifecycle transitions.
#[must_use]
pub(crate) fn now() -> Timestamp {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
    Timestamp::from_unix_millis(millis)
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Builds a machine-readable error response.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": message.into(),
        })),
    )
        .into_response()
}

/// Builds a plain-text success response.
pub(crate) fn text_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], bytes).into_response()
}

/// Builds a raw-bytes success response.
pub(crate) fn bytes_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
}

/// Maps lifecycle errors onto the documented status codes.
pub(crate) fn plane_response(error: &PlaneError) -> Response {
    match error {
        PlaneError::AmbiguousIdentity {
            ..
        } => {
            // A server-observable anomaly, logged process-wide on top of
            // the per-node log entries the resolver already appended.
            tracing::error!(error = %error, "ambiguous hardware identity");
            error_response(StatusCode::BAD_REQUEST, error.to_string())
        }
        PlaneError::NoIdentityFacts | PlaneError::UnknownAttribute(_) => {
            error_response(StatusCode::BAD_REQUEST, error.to_string())
        }
        PlaneError::NoMatchingNode | PlaneError::NodeNotFound(_) => {
            error_response(StatusCode::NOT_FOUND, error.to_string())
        }
        PlaneError::NoBoundPolicy(_) => error_response(StatusCode::CONFLICT, error.to_string()),
        PlaneError::MissingPolicy(_)
        | PlaneError::MissingInstaller(_)
        | PlaneError::MissingRepo(_)
        | PlaneError::MissingBroker(_)
        | PlaneError::NoBootTemplate(_)
        | PlaneError::Store(_) => {
            tracing::error!(error = %error, "lifecycle transition failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// Maps render errors onto the documented status codes.
pub(crate) fn render_response(error: &RenderError) -> Response {
    match error {
        RenderError::TemplateNotFound {
            ..
        } => error_response(StatusCode::NOT_FOUND, error.to_string()),
        RenderError::Render(_) => {
            tracing::error!(error = %error, "template render failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// Maps file-lookup errors onto the documented status codes.
pub(crate) fn lookup_response(error: &FileLookupError) -> Response {
    match error {
        FileLookupError::NotFound {
            ..
        }
        | FileLookupError::Invalid(_) => error_response(StatusCode::NOT_FOUND, error.to_string()),
        FileLookupError::Io(_) => {
            tracing::error!(error = %error, "file lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

/// Maps install-script errors onto the documented status codes.
pub(crate) fn script_response(error: &ScriptError) -> Response {
    tracing::error!(error = %error, "install script generation failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

/// Maps command errors onto the documented status codes.
pub(crate) fn command_response(error: &CommandError) -> Response {
    match error {
        CommandError::UnknownCommand(_) | CommandError::NotFound(_) => {
            error_response(StatusCode::NOT_FOUND, error.to_string())
        }
        CommandError::Payload(_) | CommandError::Validation(_) | CommandError::Store(_) => {
            error_response(StatusCode::BAD_REQUEST, error.to_string())
        }
    }
}
