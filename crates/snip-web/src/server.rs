//! Chat server setup and lifecycle.
//!
//! [`ChatServer`] registers the configured endpoints on an Axum router,
//! merges any caller-provided routes, and serves until the process is
//! interrupted or its shutdown token is cancelled.  Shutdown is graceful
//! and bounded by [`SHUTDOWN_GRACE`].

use std::collections::HashSet;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{MethodRouter, get, post};
use snip_agent::ChatOps;
use snip_agent::wire::{Endpoint, EndpointPaths};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::api;
use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Upper bound on graceful shutdown; connections still open afterwards
/// are dropped.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Listener and endpoint configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
    /// Endpoint path overrides.
    pub paths: EndpointPaths,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8080,
            paths: EndpointPaths::default(),
        }
    }
}

impl ServerConfig {
    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// HTTP server publishing one chat agent.
pub struct ChatServer {
    config: ServerConfig,
    state: Arc<AppState>,
    extra_routes: Vec<(String, MethodRouter<Arc<AppState>>)>,
}

impl ChatServer {
    pub fn new(config: ServerConfig, agent: Arc<dyn ChatOps>) -> Self {
        Self {
            config,
            state: Arc::new(AppState::new(agent, CancellationToken::new())),
            extra_routes: Vec::new(),
        }
    }

    /// Stop the server when `parent` is cancelled.
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.state = Arc::new(AppState::new(
            Arc::clone(&self.state.agent),
            parent.child_token(),
        ));
        self
    }

    /// Register an extra handler next to the built-in endpoints.
    pub fn route(mut self, path: impl Into<String>, handler: MethodRouter<Arc<AppState>>) -> Self {
        self.extra_routes.push((path.into(), handler));
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Token that stops [`serve`](Self::serve) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Build the Axum router.  Disabled endpoints are not registered.
    pub fn router(&self) -> Result<Router> {
        let mut seen = HashSet::new();
        let mut router: Router<Arc<AppState>> = Router::new();

        for endpoint in Endpoint::ALL {
            let Some(path) = self.config.paths.resolve(endpoint) else {
                continue;
            };
            claim(&mut seen, path)?;
            router = router.route(path, endpoint_handler(endpoint));
        }

        for (path, handler) in &self.extra_routes {
            claim(&mut seen, path)?;
            router = router.route(path, handler.clone());
        }

        Ok(router
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(&self.state)))
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound, a route is invalid,
    /// or the accept loop fails.
    pub async fn serve(self) -> Result<()> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    ///
    /// Returns once the shutdown token is cancelled (by the shutdown
    /// endpoint, the caller, or SIGINT / SIGTERM) and in-flight requests
    /// have drained, or [`SHUTDOWN_GRACE`] has elapsed.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let router = self.router()?;
        let token = self.state.shutdown.clone();
        let agent = Arc::clone(&self.state.agent);

        info!(
            addr = %listener.local_addr()?,
            agent = %agent.name(),
            "starting chat server"
        );

        let signals = tokio::spawn(watch_signals(token.clone()));

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future();
        tokio::pin!(server);

        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                info!(agent = %agent.name(), "shutting down chat server");
                agent.cancel_stream();
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(grace = ?SHUTDOWN_GRACE, "graceful shutdown timed out, closing connections");
                        Ok(())
                    }
                }
            }
            result = &mut server => result,
        };

        signals.abort();
        info!(agent = %agent.name(), "chat server stopped");
        result.map_err(ServerError::from)
    }
}

fn claim<'a>(seen: &mut HashSet<&'a str>, path: &'a str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(ServerError::InvalidRoute {
            path: path.to_owned(),
            reason: "path must start with `/`".into(),
        });
    }
    if !seen.insert(path) {
        return Err(ServerError::InvalidRoute {
            path: path.to_owned(),
            reason: "path registered twice".into(),
        });
    }
    Ok(())
}

fn endpoint_handler(endpoint: Endpoint) -> MethodRouter<Arc<AppState>> {
    match endpoint {
        Endpoint::Healthcheck => get(api::healthcheck),
        Endpoint::Information => get(api::information),
        Endpoint::Messages => get(api::messages),
        Endpoint::Chat => post(api::chat),
        Endpoint::ChatStream => post(api::chat_stream),
        Endpoint::AddSystemMessage => post(api::add_system_message),
        Endpoint::CancelStream => post(api::cancel_stream),
        Endpoint::Shutdown => post(api::shutdown),
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn watch_signals(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received interrupt"),
        () = terminate => info!("received terminate signal"),
        () = token.cancelled() => return,
    }
    token.cancel();
}
