//! Container API routes and handlers.
//!
//! One route today: `POST /containers/create`. Creation is a blocking,
//! namespace-sensitive sequence, so the handler pushes it onto the
//! blocking pool and the orchestrator's internal lock serializes it
//! against other network work.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crib_runtime::{CreateRequest, Orchestrator};

/// Builds the API router over a shared orchestrator.
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/containers/create", post(create_container))
        .with_state(orchestrator)
}

/// `POST /containers/create`: creates a container and returns its init
/// PID and command with status 201.
///
/// Malformed bodies are rejected by the JSON extractor before this
/// runs; orchestration failures map to 500 with an error body.
async fn create_container(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<CreateRequest>,
) -> Response {
    tracing::info!(image = %request.name, "create request received");

    let outcome = tokio::task::spawn_blocking(move || orchestrator.create(&request)).await;
    match outcome {
        Ok(Ok(created)) => (StatusCode::CREATED, Json(created)).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "container creation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
        Err(e) => {
            tracing::error!(error = %e, "creation task did not complete");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crib_core::cgroup::CgroupLimiter;
    use crib_net::bridge::BridgeManager;
    use crib_net::ipam::IpAllocator;
    use crib_net::manager::NetworkManager;
    use crib_net::nat::NatManager;
    use crib_net::store::{IpamState, NetworkStore};
    use crib_net::veth::VethManager;

    fn test_router(dir: &std::path::Path) -> Router {
        let store = NetworkStore::at(dir);
        let ipam = IpAllocator::from_ipam(
            &IpamState {
                subnet: "172.17.0.0/16".into(),
                gateway: "172.17.0.1".into(),
                next_ip: "172.17.0.2".into(),
                allocated_ips: BTreeMap::new(),
            },
            store.clone(),
        )
        .unwrap();
        let network = NetworkManager::from_parts(
            ipam,
            BridgeManager::new(),
            VethManager::new(),
            NatManager::new("crib0", "172.17.0.0/16"),
            store,
        );
        let orchestrator = Arc::new(crib_runtime::Orchestrator::with_cgroup(
            network,
            CgroupLimiter::at(dir.join("cgroup")),
        ));
        create_router(orchestrator)
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/containers/create")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn missing_fields_are_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/containers/create")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"alpine"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/containers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
