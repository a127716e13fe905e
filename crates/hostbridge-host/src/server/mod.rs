//! WebSocket listener for the host.
//!
//! The host accepts one active orchestrator link at a time on the configured
//! path (default `/bridge`). A newer connection supersedes the current one;
//! the old link is closed and its in-flight replies are dropped.
//!
//! ## Module Structure
//!
//! - `connection` - per-link receive loop, reply writer and diagnostics
//! - `health` - `GET /health`

mod connection;
mod health;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::get,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use hostbridge_config::HostConfig;

use crate::dispatcher::Dispatcher;
use crate::error::{HostError, Result};

pub use connection::{CLIENT_NAME_HEADER, ClientInfo, ConnectionId};
pub use health::HealthResponse;

/// Shared state behind the listener's routes.
#[derive(Clone)]
pub struct HostState {
    inner: Arc<HostStateInner>,
}

struct HostStateInner {
    dispatcher: Dispatcher,
    config: HostConfig,
    active: Mutex<Option<ActiveConnection>>,
    shutdown: CancellationToken,
}

struct ActiveConnection {
    info: ClientInfo,
    cancel: CancellationToken,
}

impl HostState {
    /// Create the state for a listener.
    pub fn new(dispatcher: Dispatcher, config: HostConfig) -> Self {
        Self {
            inner: Arc::new(HostStateInner {
                dispatcher,
                config,
                active: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// The dispatcher inbound requests go to.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Listener configuration.
    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// The currently connected orchestrator, if any.
    pub fn active_client(&self) -> Option<ClientInfo> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|active| active.info.clone())
    }

    /// Whether an orchestrator is connected.
    pub fn is_connected(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Make `info` the active link, cancelling the one it replaces.
    pub(crate) fn activate(&self, info: ClientInfo) -> CancellationToken {
        let cancel = self.inner.shutdown.child_token();
        let previous = self.inner.active.lock().replace(ActiveConnection {
            info: info.clone(),
            cancel: cancel.clone(),
        });

        if let Some(previous) = previous {
            tracing::warn!(
                connection_id = %previous.info.id,
                superseded_by = %info.id,
                "superseding active connection"
            );
            previous.cancel.cancel();
        }
        cancel
    }

    /// Clear the active link if it is still `id`.
    pub(crate) fn deactivate(&self, id: ConnectionId) {
        let mut active = self.inner.active.lock();
        if active.as_ref().is_some_and(|a| a.info.id == id) {
            *active = None;
        }
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }
}

/// The host's WebSocket listener.
pub struct HostServer {
    state: HostState,
}

impl HostServer {
    /// Create a listener for `dispatcher`.
    pub fn new(dispatcher: Dispatcher, config: HostConfig) -> Self {
        Self {
            state: HostState::new(dispatcher, config),
        }
    }

    /// Shared state, for diagnostics.
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let ws_path = self.state.config().ws_path();
        Router::new()
            .route("/health", get(health::health))
            .route(&ws_path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config().socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HostError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    ///
    /// Shutting down also closes the active link.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let token = self.state.shutdown_token();

        if let Ok(addr) = listener.local_addr() {
            info!(
                addr = %addr,
                path = %self.state.config().ws_path(),
                operations = self.state.dispatcher().registry().len(),
                "host listening"
            );
        }

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.await;
            token.cancel();
        })
        .await
        .map_err(HostError::Serve)?;

        info!("host stopped");
        Ok(())
    }
}

/// GET {path} - WebSocket upgrade for the orchestrator link.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<HostState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let name = headers
        .get(CLIENT_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let info = ClientInfo::new(name, addr);
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state, info))
}
