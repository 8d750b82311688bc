//! quarry-api — management API for the node inventory.
//!
//! Operators register nodes, walk them through the intake states, and order
//! reboots or service restarts here. Deployments are deliberately NOT
//! triggered over HTTP; the provisioner is driven from inside the daemon.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/nodes` | List nodes (query-param filter) |
//! | POST | `/api/v1/nodes` | Register provisioned nodes |
//! | GET | `/api/v1/nodes/{hostname}` | Get one node |
//! | DELETE | `/api/v1/nodes/{hostname}` | Deprovision a node |
//! | PUT | `/api/v1/nodes/{hostname}/state/{target}` | Operator state move |
//! | POST | `/api/v1/nodes/reboot` | Order reboots (query-param filter) |
//! | POST | `/api/v1/nodes/restart` | Order service restarts (query-param filter) |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use quarry_core::FlavorCatalog;
use quarry_state::NodeStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: NodeStore,
    pub flavors: Arc<FlavorCatalog>,
}

/// Build the management API router.
pub fn build_router(store: NodeStore, flavors: Arc<FlavorCatalog>) -> Router {
    let state = ApiState { store, flavors };

    let api_routes = Router::new()
        .route("/nodes", get(handlers::list_nodes).post(handlers::register_nodes))
        .route("/nodes/reboot", post(handlers::reboot_nodes))
        .route("/nodes/restart", post(handlers::restart_nodes))
        .route(
            "/nodes/{hostname}",
            get(handlers::get_node).delete(handlers::deprovision_node),
        )
        .route("/nodes/{hostname}/state/{target}", put(handlers::move_node))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
