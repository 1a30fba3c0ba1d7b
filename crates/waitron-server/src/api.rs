//! HTTP handlers
//!
//! Lifecycle responses use the `{"State": .., "Token": ..}` shape existing
//! installer scripts expect; errors are `{"Error": ..}`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;
use waitron_common::{BuildStatus, MachineDefinition, VmDefinition};
use waitron_pixie::{BootDescriptor, BootMode};

use crate::AppState;
use crate::error::{Result, WaitronError};
use crate::templates::TemplateKind;

/// Body of lifecycle responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    #[serde(rename = "State", default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(rename = "Token", default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(rename = "Error", default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl BuildResult {
    pub fn ok() -> Self {
        Self {
            state: "OK".to_string(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Default::default()
        }
    }
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/list", get(list_machines))
        .route("/hooks", get(list_hooks))
        .route("/build/{hostname}", put(build))
        .route("/rescue/{hostname}", get(rescue).put(rescue))
        .route("/status", get(all_statuses))
        .route("/status/{hostname}", get(host_status))
        .route("/config/{hostname}", get(host_config))
        .route("/config/{hostname}/vm", get(host_vm_config))
        .route("/done/{hostname}/{token}", get(done))
        .route("/cancel/{hostname}/{token}", get(cancel))
        .route("/template/{template}/{hostname}/{token}", get(template))
        .route("/v1/boot/{macaddr}", get(boot))
        .route("/health", get(health))
}

async fn list_machines(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.definitions.list_definitions().await?))
}

async fn list_hooks(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.definitions.list_hooks().await?))
}

async fn build(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<BuildResult>> {
    let token = state.lifecycle.set_build_mode(&hostname, BootMode::Normal).await?;
    Ok(Json(BuildResult::ok().with_token(token)))
}

async fn rescue(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<BuildResult>> {
    let token = state.lifecycle.set_build_mode(&hostname, BootMode::Rescue).await?;
    Ok(Json(BuildResult::ok().with_token(token)))
}

async fn host_status(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<String> {
    Ok(state.lifecycle.status(&hostname)?.to_string())
}

async fn all_statuses(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, BuildStatus>>> {
    Ok(Json(state.lifecycle.statuses()?))
}

async fn host_config(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<MachineDefinition>> {
    Ok(Json(state.definitions.resolve_by_hostname(&hostname).await?))
}

async fn host_vm_config(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> Result<Json<VmDefinition>> {
    Ok(Json(state.definitions.resolve_by_vm_hostname(&hostname).await?))
}

async fn done(
    State(state): State<AppState>,
    Path((hostname, token)): Path<(String, String)>,
) -> Result<Json<BuildResult>> {
    state.lifecycle.done_build_mode(&hostname, &token)?;
    Ok(Json(BuildResult::ok()))
}

async fn cancel(
    State(state): State<AppState>,
    Path((hostname, token)): Path<(String, String)>,
) -> Result<Json<BuildResult>> {
    state.lifecycle.cancel_build_mode(&hostname, &token).await?;
    Ok(Json(BuildResult::ok()))
}

async fn template(
    State(state): State<AppState>,
    Path((template, hostname, token)): Path<(String, String, String)>,
) -> Result<String> {
    let kind: TemplateKind = template.parse()?;
    let machine = state.lifecycle.authorize(&hostname, &token)?;

    let rendered = state.templates.render(kind, &machine).await?;
    if let Some(status) = kind.reached_status() {
        state.lifecycle.advance(&token, status)?;
    }

    info!(hostname = %hostname, template = %kind, "Served template");
    Ok(rendered)
}

/// Pixiecore falls back to a normal boot on 404, so "not building" maps there
async fn boot(State(state): State<AppState>, Path(macaddr): Path<String>) -> Response {
    match state.boot.descriptor(&macaddr) {
        Ok(descriptor) => Json::<BootDescriptor>(descriptor).into_response(),
        Err(e @ WaitronError::NotBuilding(_)) => (
            StatusCode::NOT_FOUND,
            Json(BuildResult::error(e.public_message())),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> Json<BuildResult> {
    Json(BuildResult::ok())
}
