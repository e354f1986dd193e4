// anvil-server/src/api.rs
// ============================================================================
// Module: Management API
// Description: The /api surface: commands, collections, and bootstrap.
// Purpose: Expose command dispatch and collection reads over the core.
// Dependencies: anvil-core, axum, crate::{server, urls}
// ============================================================================

//! ## Overview
//! The management API advertises the closed command set and the entity
//! collections, dispatches commands through the core's command router, and
//! renders the iPXE bootstrap script that chains unseen hardware into
//! `/svc/boot`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use anvil_core::Broker;
use anvil_core::BrokerName;
use anvil_core::CommandName;
use anvil_core::CommandOutcome;
use anvil_core::Installer;
use anvil_core::InstallerName;
use anvil_core::MICROKERNEL_INSTALLER;
use anvil_core::Node;
use anvil_core::Policy;
use anvil_core::PolicyName;
use anvil_core::ProvisionStore;
use anvil_core::Repo;
use anvil_core::RepoName;
use anvil_core::StoreError;
use anvil_core::Tag;
use anvil_core::TagName;
use anvil_core::TemplateRenderer;
use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde_json::Value;
use serde_json::json;

use crate::server::AppState;
use crate::server::command_response;
use crate::server::error_response;
use crate::server::now;
use crate::server::render_response;
use crate::server::text_response;
use crate::urls;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Collections advertised by the API directory.
const COLLECTIONS: [&str; 6] = ["brokers", "installers", "nodes", "policies", "repos", "tags"];

/// Bootstrap template rendered for `/api/microkernel/bootstrap`.
const BOOTSTRAP_TEMPLATE: &str = "bootstrap";

// ============================================================================
// SECTION: Directory
// ============================================================================

/// Serves `/api`: the command and collection directory.
pub async fn index(State(state): State<AppState>) -> Response {
    let base = state.base_url();
    let commands: Vec<Value> = CommandName::ALL
        .into_iter()
        .map(|command| {
            json!({
                "name": command.as_str(),
                "id": format!("{base}/api/commands/{}", command.as_str()),
            })
        })
        .collect();
    let collections: Vec<Value> = COLLECTIONS
        .into_iter()
        .map(|collection| {
            json!({
                "name": collection,
                "id": format!("{base}/api/collections/{collection}"),
            })
        })
        .collect();
    Json(json!({
        "commands": commands,
        "collections": collections,
    }))
    .into_response()
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Serves `POST /api/commands/{name}`.
pub async fn command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !body.is_object() {
        return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "body must be a JSON object");
    }
    match state.commands.execute(&name, body, now()) {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome_view(&state, &outcome))).into_response(),
        Err(err) => command_response(&err),
    }
}

/// Renders a command outcome as its wire payload.
fn outcome_view(state: &AppState, outcome: &CommandOutcome) -> Value {
    match outcome {
        CommandOutcome::Reference {
            collection,
            name,
        } => json!({
            "id": format!("{}/api/collections/{collection}/{name}", state.base_url()),
            "name": name,
        }),
        CommandOutcome::Result {
            detail,
        } => json!({
            "result": detail,
        }),
    }
}

// ============================================================================
// SECTION: Collections
// ============================================================================

/// Serves `GET /api/collections/{collection}`.
pub async fn collection(State(state): State<AppState>, Path(collection): Path<String>) -> Response {
    let store = state.plane.store();
    let references = match collection.as_str() {
        "nodes" => store.nodes().map(|nodes| {
            nodes.into_iter().map(|node| reference(&state, "nodes", &node.name())).collect()
        }),
        "tags" => store.tags().map(|tags| {
            tags.into_iter().map(|tag| reference(&state, "tags", tag.name.as_str())).collect()
        }),
        "policies" => store.policies().map(|policies| {
            policies
                .into_iter()
                .map(|policy| reference(&state, "policies", policy.name.as_str()))
                .collect()
        }),
        "repos" => store.repos().map(|repos| {
            repos.into_iter().map(|repo| reference(&state, "repos", repo.name.as_str())).collect()
        }),
        "brokers" => store.brokers().map(|brokers| {
            brokers
                .into_iter()
                .map(|broker| reference(&state, "brokers", broker.name.as_str()))
                .collect()
        }),
        "installers" => store.installers().map(|installers| {
            installers
                .into_iter()
                .map(|installer| reference(&state, "installers", installer.name.as_str()))
                .collect()
        }),
        other => {
            return error_response(StatusCode::NOT_FOUND, format!("no collection {other:?}"));
        }
    };
    match references {
        Ok(references) => Json(Value::Array(references)).into_response(),
        Err(err) => store_response(&err),
    }
}

/// Serves `GET /api/collections/{collection}/{name}`.
pub async fn entity(
    State(state): State<AppState>,
    Path((collection, name)): Path<(String, String)>,
) -> Response {
    let store = state.plane.store();
    let view = match collection.as_str() {
        "nodes" => store.node_by_name(&name).map(|found| found.map(|node| node_view(&node))),
        "tags" => store.tag(&TagName::new(name.as_str())).map(|found| found.map(|tag| tag_view(&tag))),
        "policies" => store
            .policy(&PolicyName::new(name.as_str()))
            .map(|found| found.map(|policy| policy_view(&policy))),
        "repos" => store
            .repo(&RepoName::new(name.as_str()))
            .map(|found| found.map(|repo| repo_view(&repo))),
        "brokers" => store
            .broker(&BrokerName::new(name.as_str()))
            .map(|found| found.map(|broker| broker_view(&broker))),
        "installers" => store
            .installer(&InstallerName::new(name.as_str()))
            .map(|found| found.map(|installer| installer_view(&installer))),
        other => {
            return error_response(StatusCode::NOT_FOUND, format!("no collection {other:?}"));
        }
    };
    match view {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => {
            error_response(StatusCode::NOT_FOUND, format!("no {collection} matched name={name}"))
        }
        Err(err) => store_response(&err),
    }
}

/// Serves `GET /api/collections/nodes/{name}/log`.
pub async fn node_log(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.plane.store().node_by_name(&name) {
        Ok(Some(node)) => Json(node.log).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no node matched name={name}")),
        Err(err) => store_response(&err),
    }
}

// ============================================================================
// SECTION: Microkernel Bootstrap
// ============================================================================

/// Serves `GET /api/microkernel/bootstrap`: the iPXE chain script.
pub async fn bootstrap(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let nic_max = match params.get("nic_max") {
        None => state.config.microkernel.nic_max,
        Some(raw) => match raw.parse::<u32>() {
            Ok(value) if value >= 1 => value,
            _ => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "the nic_max parameter must be a positive integer",
                );
            }
        },
    };
    let vars = urls::bootstrap_vars(&state.base_url(), nic_max, &state.config.microkernel);
    let installer = InstallerName::new(MICROKERNEL_INSTALLER);
    match state.templates.render(&installer, BOOTSTRAP_TEMPLATE, &vars) {
        Ok(bytes) => text_response(bytes),
        Err(err) => render_response(&err),
    }
}

// ============================================================================
// SECTION: Views
// ============================================================================

/// Builds a collection reference payload.
fn reference(state: &AppState, collection: &str, name: &str) -> Value {
    json!({
        "id": format!("{}/api/collections/{collection}/{name}", state.base_url()),
        "name": name,
    })
}

/// Maps a store failure onto a 500 response.
fn store_response(error: &StoreError) -> Response {
    tracing::error!(error = %error, "collection read failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

/// Node entity view.
fn node_view(node: &Node) -> Value {
    json!({
        "id": node.id.value(),
        "name": node.name(),
        "hw_info": node.hw_info.components(),
        "facts": node.facts,
        "ip_address": node.ip_address,
        "hostname": node.hostname,
        "policy": node.policy,
        "boot_count": node.boot_count,
        "installed_stage": node.installed_stage,
        "registered_at": node.registered_at,
        "log_entries": node.log.len(),
    })
}

/// Tag entity view.
fn tag_view(tag: &Tag) -> Value {
    json!({
        "name": tag.name,
        "rule": tag.rule,
    })
}

/// Policy entity view.
fn policy_view(policy: &Policy) -> Value {
    let tags: Vec<&str> = policy.tags.iter().map(|tag| tag.name.as_str()).collect();
    json!({
        "name": policy.name,
        "rule_number": policy.rule_number,
        "enabled": policy.enabled,
        "tags": tags,
        "repo": policy.repo,
        "broker": policy.broker,
        "installer": policy.installer,
        "hostname_pattern": policy.hostname_pattern,
        "max_count": policy.max_count,
    })
}

/// Repo entity view.
fn repo_view(repo: &Repo) -> Value {
    json!({
        "name": repo.name,
        "url": repo.url,
        "iso_url": repo.iso_url,
        "state": repo.state,
    })
}

/// Broker entity view.
fn broker_view(broker: &Broker) -> Value {
    json!({
        "name": broker.name,
        "broker_type": broker.broker_type,
        "configuration": broker.configuration,
    })
}

/// Installer entity view.
fn installer_view(installer: &Installer) -> Value {
    json!({
        "name": installer.name,
        "os": installer.os,
        "os_version": installer.os_version,
        "description": installer.description,
        "boot_seq": installer.boot_seq,
    })
}
