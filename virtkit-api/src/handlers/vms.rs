use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::app::state::AppState;
use crate::handlers::error_response;

#[derive(Deserialize)]
pub struct CreateVmRequest {
    pub machine_type: String,
    /// Requested memory in GiB. Off-catalog sizes are downgraded, not rejected.
    #[serde(default = "default_memory_gib")]
    pub memory_gib: u32,
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
}

fn default_memory_gib() -> u32 {
    2
}

fn default_vcpus() -> u32 {
    1
}

/// List all running VMs with their live state
pub async fn list_vms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.manager.list_running_vms().await {
        Ok(vms) => (StatusCode::OK, Json(json!({ "data": { "vms": vms } }))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Fetch one VM by its runtime domain id
pub async fn get_vm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    match state.manager.vm_by_domain_id(id).await {
        Ok(vm) => (StatusCode::OK, Json(json!({ "data": { "vm": vm } }))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Provision a new VM and register it in the datastore
pub async fn create_vm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateVmRequest>,
) -> impl IntoResponse {
    let vm = match state
        .manager
        .create_vm(&req.machine_type, req.memory_gib, req.vcpus)
        .await
    {
        Ok(vm) => vm,
        Err(e) => return error_response(e).into_response(),
    };

    let id = match state.store.create_vm(&vm.name, vm.domain_id).await {
        Ok(id) => id,
        Err(e) => return error_response(e).into_response(),
    };

    info!(vm = %vm.name, id, "provisioned vm");
    (
        StatusCode::CREATED,
        Json(json!({ "data": { "id": id, "vm": vm } })),
    )
        .into_response()
}

/// Recent memory usage samples for one VM, newest first
pub async fn vm_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> impl IntoResponse {
    let vm_id = match state.store.vm_id_for_domain(id).await {
        Ok(vm_id) => vm_id,
        Err(e) => return error_response(e).into_response(),
    };
    match state.store.recent_usage(vm_id).await {
        Ok(usage) => (StatusCode::OK, Json(json!({ "data": { "usage": usage } }))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}
