//! Admin introspection HTTP endpoint.
//!
//! The replication core exposes the data (`is_leader`, `leader_url`,
//! `replica_http_addresses`); this layer only formats it. One route, no
//! authentication: `GET /v1/cluster`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::cluster::HaServer;

/// Cluster membership as reported to operators.
#[derive(Debug, Serialize)]
pub struct ClusterStatus {
    /// Address of the current leader, if known
    pub leader_server: Option<String>,
    /// Advertised HTTP addresses of connected replicas
    pub replica_servers: Vec<String>,
}

/// Build the admin router.
pub fn router(server: Arc<HaServer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/cluster", get(cluster_status))
        .with_state(server)
        .layer(cors)
}

async fn cluster_status(State(server): State<Arc<HaServer>>) -> Json<ClusterStatus> {
    Json(ClusterStatus {
        leader_server: server.leader_url(),
        replica_servers: server.replica_http_addresses().await,
    })
}

/// Serve the admin endpoint until the process stops.
pub async fn serve(address: &str, server: Arc<HaServer>) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(address).await?;
    axum::serve(listener, router(server)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterConfig;
    use crate::engine::FileStorageEngine;
    use crate::transport::{SocketFactory, TransportConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_cluster_status_reports_offline_node() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = ClusterConfig::leader("node-1", tmp.path(), "127.0.0.1:0");
        let storage = Arc::new(FileStorageEngine::open(tmp.path()).unwrap());
        let factory = Arc::new(SocketFactory::new(TransportConfig::default()).unwrap());
        let server = Arc::new(HaServer::new(config, storage, factory).unwrap());

        let response = router(server)
            .oneshot(
                Request::builder()
                    .uri("/v1/cluster")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 16)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        // Not started: no role, no leader, no replicas.
        assert!(status["leader_server"].is_null());
        assert_eq!(status["replica_servers"].as_array().unwrap().len(), 0);
    }
}
