//! Management API handlers.
//!
//! Each handler reads/writes the inventory through `NodeStore` and wraps
//! the result in the JSON envelope: `{"data": …}` on success, `{"error": …}`
//! with a matching status code on failure.

use std::collections::HashMap;
use std::net::IpAddr;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::info;

use quarry_core::{Flavor, NodeResources};
use quarry_state::{Agent, Node, NodeFilter, NodeState, NodeType, StateError};

use crate::ApiState;

/// Response wrapper for the consistent envelope.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { data: Some(data), error: None })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> { data: None, error: Some(msg.to_string()) }),
    )
        .into_response()
}

fn state_error_response(e: StateError) -> Response {
    let status = match &e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_)
        | StateError::InvalidTransition { .. }
        | StateError::Conflict(_) => StatusCode::CONFLICT,
        StateError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

// ── Listing ────────────────────────────────────────────────────

/// GET /api/v1/nodes
pub async fn list_nodes(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let filter = match NodeFilter::from_params(&params) {
        Ok(filter) => filter,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST),
    };
    match state.store.list_nodes() {
        Ok(nodes) => {
            // Deprovisioned nodes are tombstones; list them only when the
            // filter names that state.
            let include_gone = filter.states.contains(&NodeState::Deprovisioned);
            let nodes: Vec<Node> = nodes
                .matching(&filter)
                .into_vec()
                .into_iter()
                .filter(|n| include_gone || n.state != NodeState::Deprovisioned)
                .collect();
            ApiResponse::ok(nodes).into_response()
        }
        Err(e) => state_error_response(e),
    }
}

/// GET /api/v1/nodes/{hostname}
pub async fn get_node(
    State(state): State<ApiState>,
    Path(hostname): Path<String>,
) -> impl IntoResponse {
    match state.store.get_node(&hostname) {
        Ok(Some(node)) => ApiResponse::ok(node).into_response(),
        Ok(None) => error_response("node not found", StatusCode::NOT_FOUND),
        Err(e) => state_error_response(e),
    }
}

// ── Registration ───────────────────────────────────────────────

/// One node in a registration request. Needs a catalog flavor name or an
/// explicit resource envelope.
#[derive(serde::Deserialize)]
pub struct NodeRegistration {
    pub hostname: String,
    pub id: Option<String>,
    pub flavor: Option<String>,
    pub resources: Option<NodeResources>,
    pub node_type: Option<NodeType>,
    pub parent_hostname: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<IpAddr>,
}

/// POST /api/v1/nodes
pub async fn register_nodes(
    State(state): State<ApiState>,
    Json(registrations): Json<Vec<NodeRegistration>>,
) -> impl IntoResponse {
    let mut nodes = Vec::with_capacity(registrations.len());
    for registration in &registrations {
        let flavor = match (&registration.flavor, &registration.resources) {
            (Some(name), _) => match state.flavors.get(name) {
                Some(flavor) => flavor.clone(),
                None => {
                    return error_response(
                        &format!("unknown flavor '{name}'"),
                        StatusCode::BAD_REQUEST,
                    );
                }
            },
            (None, Some(resources)) => Flavor::new("custom", *resources),
            (None, None) => {
                return error_response(
                    &format!(
                        "{}: a flavor name or explicit resources is required",
                        registration.hostname
                    ),
                    StatusCode::BAD_REQUEST,
                );
            }
        };
        let id = registration.id.as_deref().unwrap_or(&registration.hostname);
        let mut node = Node::new(
            &registration.hostname,
            id,
            flavor,
            registration.node_type.unwrap_or(NodeType::Tenant),
        );
        if let Some(parent) = &registration.parent_hostname {
            node = node.with_parent(parent);
        }
        if !registration.ip_addresses.is_empty() {
            node = node.with_ip_addresses(registration.ip_addresses.clone());
        }
        nodes.push(node);
    }

    let count = nodes.len();
    match state.store.add_nodes(nodes) {
        Ok(()) => {
            info!(count, "nodes registered");
            (
                StatusCode::CREATED,
                ApiResponse::ok(serde_json::json!({ "registered": count })),
            )
                .into_response()
        }
        Err(e) => state_error_response(e),
    }
}

// ── State moves ────────────────────────────────────────────────

/// PUT /api/v1/nodes/{hostname}/state/{target}
pub async fn move_node(
    State(state): State<ApiState>,
    Path((hostname, target)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(target) = NodeState::parse(&target) else {
        return error_response(&format!("unknown state '{target}'"), StatusCode::BAD_REQUEST);
    };
    let by_hand = matches!(
        target,
        NodeState::Ready | NodeState::Dirty | NodeState::Failed | NodeState::Parked
    );
    if !by_hand {
        return error_response(
            &format!("cannot move nodes to {target} by hand"),
            StatusCode::BAD_REQUEST,
        );
    }
    match state.store.move_to(&hostname, target, Agent::Operator) {
        Ok(node) => {
            info!(%hostname, state = %target, "node moved via api");
            ApiResponse::ok(node).into_response()
        }
        Err(e) => state_error_response(e),
    }
}

/// DELETE /api/v1/nodes/{hostname}
pub async fn deprovision_node(
    State(state): State<ApiState>,
    Path(hostname): Path<String>,
) -> impl IntoResponse {
    match state
        .store
        .move_to(&hostname, NodeState::Deprovisioned, Agent::Operator)
    {
        Ok(node) => {
            info!(%hostname, "node deprovisioned via api");
            ApiResponse::ok(node).into_response()
        }
        Err(e) => state_error_response(e),
    }
}

// ── Fleet orders ───────────────────────────────────────────────

/// POST /api/v1/nodes/reboot
pub async fn reboot_nodes(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let filter = match NodeFilter::from_params(&params) {
        Ok(filter) => filter,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST),
    };
    match state.store.bump_reboot(&filter, Agent::Operator) {
        Ok(matched) => {
            info!(matched, "reboot ordered via api");
            ApiResponse::ok(serde_json::json!({ "matched": matched })).into_response()
        }
        Err(e) => state_error_response(e),
    }
}

/// POST /api/v1/nodes/restart
pub async fn restart_nodes(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let filter = match NodeFilter::from_params(&params) {
        Ok(filter) => filter,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST),
    };
    match state.store.bump_restart(&filter) {
        Ok(matched) => {
            info!(matched, "service restart ordered via api");
            ApiResponse::ok(serde_json::json!({ "matched": matched })).into_response()
        }
        Err(e) => state_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use quarry_core::FlavorCatalog;
    use quarry_state::{Clock, NodeStore};

    fn resources() -> NodeResources {
        NodeResources::new(4.0, 16.0, 100.0, 1.0)
    }

    fn test_state() -> ApiState {
        let store = NodeStore::open_in_memory(Clock::manual(1_000)).unwrap();
        let flavors = FlavorCatalog::new(vec![Flavor::new("d-4-16", resources())]);
        ApiState { store, flavors: Arc::new(flavors) }
    }

    fn registration(hostname: &str) -> NodeRegistration {
        NodeRegistration {
            hostname: hostname.to_string(),
            id: None,
            flavor: Some("d-4-16".to_string()),
            resources: None,
            node_type: None,
            parent_hostname: None,
            ip_addresses: Vec::new(),
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_and_fetch_a_node() {
        let state = test_state();

        let resp = register_nodes(
            State(state.clone()),
            Json(vec![registration("crusher-1"), registration("crusher-2")]),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["registered"], 2);

        let resp = get_node(State(state.clone()), Path("crusher-1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["state"], "provisioned");

        let resp = get_node(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn registration_needs_a_flavor_or_resources() {
        let state = test_state();
        let mut bare = registration("crusher-1");
        bare.flavor = None;

        let resp = register_nodes(State(state), Json(vec![bare])).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_flavors_are_rejected() {
        let state = test_state();
        let mut reg = registration("crusher-1");
        reg.flavor = Some("z-96-768".to_string());

        let resp = register_nodes(State(state), Json(vec![reg])).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn explicit_resources_make_a_custom_flavor() {
        let state = test_state();
        let mut reg = registration("crusher-1");
        reg.flavor = None;
        reg.resources = Some(resources());

        let resp = register_nodes(State(state.clone()), Json(vec![reg])).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let node = state.store.get_node("crusher-1").unwrap().unwrap();
        assert_eq!(node.flavor.name, "custom");
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let state = test_state();
        let resp = register_nodes(State(state.clone()), Json(vec![registration("crusher-1")]))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = register_nodes(State(state), Json(vec![registration("crusher-1")]))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn operator_moves_walk_the_intake_path() {
        let state = test_state();
        register_nodes(State(state.clone()), Json(vec![registration("crusher-1")])).await;

        for target in ["dirty", "ready"] {
            let resp = move_node(
                State(state.clone()),
                Path(("crusher-1".to_string(), target.to_string())),
            )
            .await
            .into_response();
            assert_eq!(resp.status(), StatusCode::OK, "move to {target}");
        }
        let node = state.store.get_node("crusher-1").unwrap().unwrap();
        assert_eq!(node.state, NodeState::Ready);
    }

    #[tokio::test]
    async fn deployment_states_are_not_reachable_by_hand() {
        let state = test_state();
        register_nodes(State(state.clone()), Json(vec![registration("crusher-1")])).await;

        for target in ["active", "reserved", "deprovisioned"] {
            let resp = move_node(
                State(state.clone()),
                Path(("crusher-1".to_string(), target.to_string())),
            )
            .await
            .into_response();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "move to {target}");
        }

        let resp = move_node(
            State(state.clone()),
            Path(("crusher-1".to_string(), "zombie".to_string())),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // legal name, illegal transition
        let resp = move_node(
            State(state),
            Path(("crusher-1".to_string(), "ready".to_string())),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn deprovisioned_nodes_leave_the_default_listing() {
        let state = test_state();
        register_nodes(State(state.clone()), Json(vec![registration("crusher-1")])).await;

        let resp = deprovision_node(State(state.clone()), Path("crusher-1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = list_nodes(State(state.clone()), Query(HashMap::new())).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);

        let mut params = HashMap::new();
        params.insert("state".to_string(), "deprovisioned".to_string());
        let resp = list_nodes(State(state), Query(params)).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_honors_filters() {
        let state = test_state();
        let mut big = registration("big-1");
        big.flavor = None;
        big.resources = Some(NodeResources::new(8.0, 64.0, 500.0, 2.0));
        register_nodes(State(state.clone()), Json(vec![registration("crusher-1"), big])).await;

        let mut params = HashMap::new();
        params.insert("flavor".to_string(), "d-4-16".to_string());
        let resp = list_nodes(State(state.clone()), Query(params)).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["hostname"], "crusher-1");

        let mut bad = HashMap::new();
        bad.insert("color".to_string(), "red".to_string());
        let resp = list_nodes(State(state), Query(bad)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reboot_and_restart_count_matches() {
        let state = test_state();
        register_nodes(
            State(state.clone()),
            Json(vec![registration("crusher-1"), registration("crusher-2")]),
        )
        .await;

        let mut params = HashMap::new();
        params.insert("hostname".to_string(), "crusher-1".to_string());
        let resp = reboot_nodes(State(state.clone()), Query(params)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["matched"], 1);

        let node = state.store.get_node("crusher-1").unwrap().unwrap();
        assert_eq!(node.status.reboot_generation.wanted, 1);

        // nothing is allocated, so a restart matches nothing
        let resp = restart_nodes(State(state), Query(HashMap::new())).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["data"]["matched"], 0);
    }
}
