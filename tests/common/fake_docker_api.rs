//! Fake Docker Engine API server for integration tests.
//!
//! Spins up a minimal `axum` HTTP server on a random TCP port bound to
//! 127.0.0.1, serving `GET /containers/json` with whatever containers the
//! test registers. In production the Docker API is served over a Unix
//! socket; the registry under test accepts a base URL so it can be pointed
//! here instead.

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Default)]
struct ApiState {
    containers: Vec<serde_json::Value>,
}

/// Handle to the running fake Docker API server.
pub struct FakeDockerApi {
    addr: SocketAddr,
    state: Arc<Mutex<ApiState>>,
}

impl FakeDockerApi {
    /// Start on a random port; returns once the server is listening.
    pub async fn start() -> std::io::Result<FakeDockerApi> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ApiState::default()));

        let app = Router::new()
            .route("/containers/json", get(list_containers))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(FakeDockerApi { addr, state })
    }

    /// Base URL for the API (e.g. `http://127.0.0.1:PORT`).
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Register a running container with the given labels.
    pub fn add_container(&self, id: &str, labels: BTreeMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        state.containers.push(serde_json::json!({
            "Id": id,
            "Names": [format!("/{id}")],
            "State": "running",
            "Labels": labels,
        }));
    }

    pub fn remove_container(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.containers.retain(|c| c["Id"] != id);
    }
}

async fn list_containers(State(state): State<Arc<Mutex<ApiState>>>) -> impl IntoResponse {
    let containers = state.lock().unwrap().containers.clone();
    axum::Json(containers)
}
