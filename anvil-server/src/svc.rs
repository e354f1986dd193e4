// anvil-server/src/svc.rs
// ============================================================================
// Module: Node Service API
// Description: The /svc surface consumed by iPXE and install agents.
// Purpose: Translate node-facing HTTP requests into lifecycle transitions.
// Dependencies: anvil-core, axum, crate::{server, urls}
// ============================================================================

//! ## Overview
//! Every handler here is a thin wrapper: parse the request, call the
//! provision plane, render or serve the result. All state decisions live
//! in the core; all status-code mapping lives in the server module.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use anvil_core::FactMap;
use anvil_core::FileLookup;
use anvil_core::InstallScriptSource;
use anvil_core::LogSeverity;
use anvil_core::NodeId;
use anvil_core::RepoName;
use anvil_core::StageOutcome;
use anvil_core::TemplateRenderer;
use axum::Json;
use axum::extract::OriginalUri;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::Value;
use serde_json::json;

use crate::server::AppState;
use crate::server::bytes_response;
use crate::server::error_response;
use crate::server::lookup_response;
use crate::server::now;
use crate::server::plane_response;
use crate::server::render_response;
use crate::server::script_response;
use crate::server::text_response;
use crate::templates::TEMPLATE_EXTENSION;
use crate::urls;

// ============================================================================
// SECTION: Boot
// ============================================================================

/// Serves `/svc/boot`: identity facts arrive as query parameters.
pub async fn boot(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let facts: FactMap = params.into_iter().collect();
    let instruction = match state.plane.boot(&facts, now()) {
        Ok(instruction) => instruction,
        Err(err) => return plane_response(&err),
    };
    tracing::info!(
        node = %instruction.node.name(),
        installer = %instruction.installer.name,
        template = %instruction.template,
        "boot"
    );
    let vars = urls::boot_vars(&state.base_url(), &instruction, &state.config.microkernel);
    match state.templates.render(&instruction.installer.name, &instruction.template, &vars) {
        Ok(bytes) => text_response(bytes),
        Err(err) => render_response(&err),
    }
}

// ============================================================================
// SECTION: Checkin
// ============================================================================

/// Serves `/svc/checkin/{id}`: the agent reports its facts.
pub async fn checkin(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    let Some(facts_value) = body.get("facts").and_then(Value::as_object) else {
        return error_response(StatusCode::BAD_REQUEST, "checkin requires a 'facts' object");
    };
    let mut facts = FactMap::new();
    for (key, value) in facts_value {
        facts.insert(key.clone(), fact_value_to_string(value));
    }
    tracing::info!(node = id, "checkin");
    match state.plane.checkin(NodeId::new(id), &facts, now()) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => plane_response(&err),
    }
}

/// Renders a checkin fact value as a string.
///
/// Agents report scalars almost exclusively; structured values keep their
/// JSON text form so nothing is silently dropped.
fn fact_value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Node Id Lookup
// ============================================================================

/// Serves `/svc/nodeid`: identity facts to node id, without registration.
pub async fn node_id(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    if params.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "supply identity facts as parameters");
    }
    let facts: FactMap = params.into_iter().collect();
    match state.plane.node_id(&facts, now()) {
        Ok(id) => (
            StatusCode::OK,
            Json(json!({
                "id": id.value(),
            })),
        )
            .into_response(),
        Err(err) => plane_response(&err),
    }
}

// ============================================================================
// SECTION: File Fetch
// ============================================================================

/// Serves `/svc/file/{id}/{template}`: rendered installer templates.
pub async fn file(
    State(state): State<AppState>,
    Path((id, template)): Path<(i64, String)>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    let url = format!("{}{uri}", state.base_url());
    let instruction = match state.plane.file(NodeId::new(id), &template, &url, now()) {
        Ok(instruction) => instruction,
        Err(err) => return plane_response(&err),
    };
    tracing::info!(node = id, template = %template, "file fetch");
    let vars = urls::file_vars(&state.base_url(), &instruction);
    match state.templates.render(&instruction.installer.name, &instruction.template, &vars) {
        Ok(bytes) => text_response(bytes),
        Err(err) => render_response(&err),
    }
}

/// Serves `/svc/file/{id}/raw/{filename}`: unrendered installer files.
/// Template sources are never served raw.
pub async fn raw_file(
    State(state): State<AppState>,
    Path((id, filename)): Path<(i64, String)>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    if filename.to_ascii_lowercase().ends_with(&format!(".{TEMPLATE_EXTENSION}")) {
        return error_response(StatusCode::NOT_FOUND, "raw template access is not served");
    }
    let url = format!("{}{uri}", state.base_url());
    let instruction = match state.plane.raw_file(NodeId::new(id), &filename, &url, now()) {
        Ok(instruction) => instruction,
        Err(err) => return plane_response(&err),
    };
    tracing::info!(node = id, file = %filename, "raw file fetch");
    let path = match state.templates.find_file(&instruction.installer.name, &filename) {
        Ok(path) => path,
        Err(err) => return lookup_response(&err),
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => bytes_response(bytes),
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "raw file read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

// ============================================================================
// SECTION: Broker Install
// ============================================================================

/// Serves `/svc/broker/{id}/install`: the post-install handoff script.
pub async fn broker_install(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let (node, broker) = match state.plane.broker_install(NodeId::new(id)) {
        Ok(resolved) => resolved,
        Err(err) => return plane_response(&err),
    };
    match state.scripts.install_script(&broker, &node) {
        Ok(bytes) => text_response(bytes),
        Err(err) => script_response(&err),
    }
}

// ============================================================================
// SECTION: Log, Store, Stage
// ============================================================================

/// Serves `/svc/log/{id}`: appends a free-form node log message.
pub async fn node_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let Some(msg) = params.get("msg") else {
        return error_response(StatusCode::BAD_REQUEST, "supply 'msg' to log");
    };
    let severity = match params.get("severity") {
        None => LogSeverity::Info,
        Some(label) => match LogSeverity::parse(label) {
            Some(severity) => severity,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unknown severity {label:?}"),
                );
            }
        },
    };
    match state.plane.log_message(NodeId::new(id), msg, severity, now()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => plane_response(&err),
    }
}

/// Serves `/svc/store/{id}`: stores the whitelisted `ip` attribute.
pub async fn store_attr(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let Some(ip) = params.get("ip") else {
        return error_response(StatusCode::BAD_REQUEST, "supply 'ip' to store");
    };
    match state.plane.store_attr(NodeId::new(id), "ip", ip, now()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => plane_response(&err),
    }
}

/// Serves `/svc/stage-done/{id}`: an idempotent stage checkpoint.
pub async fn stage_done(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let Some(stage) = params.get("name").filter(|name| !name.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "supply 'name' for the completed stage");
    };
    match state.plane.stage_done(NodeId::new(id), stage, now()) {
        Ok(StageOutcome::Advanced | StageOutcome::Unchanged) => {
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => plane_response(&err),
    }
}

// ============================================================================
// SECTION: Repo Content
// ============================================================================

/// Serves `/svc/repo/{repo}/{*path}`: repo content with case-insensitive
/// lookup.
pub async fn repo_file(
    State(state): State<AppState>,
    Path((repo, path)): Path<(String, String)>,
) -> Response {
    let found = state.templates.find_repo_file(&RepoName::new(repo), &path);
    let file_path = match found {
        Ok(file_path) => file_path,
        Err(err) => return lookup_response(&err),
    };
    match tokio::fs::read(&file_path).await {
        Ok(bytes) => bytes_response(bytes),
        Err(err) => {
            tracing::error!(path = %file_path.display(), error = %err, "repo file read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
