use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::{Extension, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use intercom_core::playlist::PlaylistKind;
use intercom_engine::{SessionManager, VolumeRouter};
use intercom_settings::IntercomSettings;

use crate::client::{self, ClientRegistry};
use crate::event_bridge;
use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9190,
            max_send_queue: 256,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &IntercomSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub volume: VolumeRouter,
    pub registry: Arc<ClientRegistry>,
}

impl AppState {
    pub fn new(manager: SessionManager, registry: Arc<ClientRegistry>) -> Self {
        Self {
            volume: VolumeRouter::new(manager.clone()),
            manager,
            registry,
        }
    }
}

/// Play/stop/seek routes for one sequencer; the kind reaches handlers as
/// an extension.
fn player_routes(kind: PlaylistKind) -> Router<AppState> {
    Router::new()
        .route("/play", post(handlers::play))
        .route("/stop", post(handlers::stop))
        .route("/pause", post(handlers::pause))
        .route("/resume", post(handlers::resume))
        .route("/seek", post(handlers::seek))
        .route("/next", post(handlers::next))
        .route("/loop", post(handlers::set_loop))
        .route("/now-playing/{session_id}", get(handlers::now_playing))
        .layer(Extension(kind))
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/events", get(handlers::events_ws))
        .route("/session/open", post(handlers::open_session))
        .route("/session/close", post(handlers::close_session))
        .route("/session/{session_id}", get(handlers::get_session))
        .route("/session/{session_id}/microphone", get(handlers::microphone_ws))
        .route("/sessions", get(handlers::list_sessions))
        .route("/volume/set", post(handlers::set_volume))
        .nest("/mediaplayer", player_routes(PlaylistKind::Media))
        .nest("/ttsplayer", player_routes(PlaylistKind::Tts))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns a handle that keeps background tasks alive.
pub async fn start(
    config: ServerConfig,
    manager: SessionManager,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let bridge = event_bridge::create_bridge(Arc::clone(&registry), manager.subscribe());
    let cleanup = client::start_cleanup_task(Arc::clone(&registry), Duration::from_secs(60));

    let router = build_router(AppState::new(manager, Arc::clone(&registry)));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), host = %config.host, "control server started");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone().cancelled_owned();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "control server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        cancel,
        server,
        bridge,
        cleanup,
    })
}

pub struct ServerHandle {
    pub port: u16,
    cancel: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    bridge: tokio::task::JoinHandle<()>,
    cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.cleanup.abort();
        self.bridge.abort();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "control server task failed");
        }
        tracing::info!("control server shut down");
    }
}
