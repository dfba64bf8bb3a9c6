use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::context::RelayContext;
use crate::error::{RelayError, RelayResult};
use crate::peers::PeerInfo;
use crate::relay::ProtocolHealth;
use crate::server::socket::ClientInfo;
use crate::utils::time::now_rfc3339;

pub mod error;
pub mod socket;
pub mod tools;

pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
    context: RelayContext,
}

impl Server {
    /// Bind the configured address and start serving. The expiry sweeper runs
    /// for as long as the server does.
    pub async fn new(context: RelayContext) -> RelayResult<Self> {
        let state = Arc::new(ServerState::new(context.clone()));
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = Router::new()
            .route("/health", get(health))
            .route("/tools", get(tools::list_tools))
            .route("/tools/status", get(tools::tools_status))
            .route("/tools/:tool_name/call", post(tools::call_tool))
            .route(
                "/tools/executions/:execution_id/cancel",
                post(tools::cancel_execution),
            )
            .route("/ws", get(socket::ws_handler))
            .with_state(state)
            .layer(cors);

        let bind_addr = context.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|error| {
            RelayError::Internal(format!("failed to bind {bind_addr}: {error}"))
        })?;
        let addr = listener
            .local_addr()
            .map_err(|error| RelayError::Internal(error.to_string()))?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let serve_task = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(error) = axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %error, "server stopped with error");
            }
        });
        let sweeper = context
            .correlator
            .spawn_sweeper(context.config.cleanup_interval());

        tracing::info!(
            addr = %addr,
            timeout_ms = context.config.execution_timeout_ms,
            "tool relay listening"
        );
        Ok(Server {
            addr,
            shutdown: Some(shutdown_tx),
            serve_task: Some(serve_task),
            sweeper,
            context,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &RelayContext {
        &self.context
    }

    pub fn shutdown(&mut self) -> RelayResult<()> {
        self.sweeper.abort();
        if let Some(sender) = self.shutdown.take() {
            sender
                .send(())
                .map_err(|_| RelayError::Internal("failed to send server shutdown signal".to_string()))
        } else {
            Ok(())
        }
    }

    /// Wait for the serve loop to finish after `shutdown`.
    pub async fn wait(&mut self) {
        if let Some(task) = self.serve_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[derive(Default)]
pub(crate) struct ServerStats {
    pub(crate) total_connections: AtomicU64,
    pub(crate) total_messages: AtomicU64,
}

pub(crate) struct ServerState {
    pub(crate) context: RelayContext,
    pub(crate) stats: ServerStats,
    pub(crate) clients: RwLock<HashMap<String, ClientInfo>>,
    started_at: Instant,
    started_at_wall: String,
}

impl ServerState {
    fn new(context: RelayContext) -> Self {
        Self {
            context,
            stats: ServerStats::default(),
            clients: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            started_at_wall: now_rfc3339(),
        }
    }

    pub(crate) async fn record_message(&self, client_id: &str) {
        self.stats.total_messages.fetch_add(1, Ordering::Relaxed);
        if let Some(client) = self.clients.write().await.get_mut(client_id) {
            client.message_count += 1;
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub total_messages: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub server: String,
    pub version: &'static str,
    pub started_at: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionStats,
    pub clients: Vec<ClientInfo>,
    pub peers: Vec<PeerInfo>,
    pub protocol: ProtocolHealth,
    pub timestamp: String,
}

async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let mut clients: Vec<ClientInfo> = state.clients.read().await.values().cloned().collect();
    clients.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
    Json(HealthResponse {
        status: "healthy",
        server: state.context.config.server_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at_wall.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connections: ConnectionStats {
            total_connections: state.stats.total_connections.load(Ordering::Relaxed),
            active_connections: clients.len(),
            total_messages: state.stats.total_messages.load(Ordering::Relaxed),
        },
        clients,
        peers: state.context.membership.list().await,
        protocol: state.context.correlator.health().await,
        timestamp: now_rfc3339(),
    })
}
