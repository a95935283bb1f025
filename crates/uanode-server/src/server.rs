//! uanode WebSocket server.
//!
//! This module ties the pieces together:
//! - Security preparation and endpoint description
//! - Listener binding
//! - Address space construction through a caller-supplied builder
//! - The accept loop and session tasks
//! - Graceful, bounded shutdown

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use uanode_core::{MemoryNodeStore, NodeStore};
use uanode_protocol::EndpointDescription;

use crate::config::ServerConfig;
use crate::engine::{EngineOptions, SubscriptionEngine};
use crate::sample::BuildError;
use crate::security::{FileSecurityProvider, SecurityError, SecurityProvider};
use crate::session::{handle_connection, ServerIdentity, SessionContext, STREAM_PATH};
use crate::timer::TimerSet;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("security setup failed: {0}")]
    Security(#[from] SecurityError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build address space: {0}")]
    AddressSpace(#[from] BuildError),
}

/// Entry point for starting a server.
pub struct UaServer;

impl UaServer {
    /// Start with the default [`FileSecurityProvider`].
    pub async fn start<F>(config: ServerConfig, build: F) -> Result<ServerHandle, StartError>
    where
        F: FnOnce(&mut MemoryNodeStore, &TimerSet) -> Result<(), BuildError>,
    {
        Self::start_with_security(config, Arc::new(FileSecurityProvider), build).await
    }

    /// Prepare security, bind, build the address space, then accept sessions.
    ///
    /// The builder runs only after the listener is bound. If it fails, its
    /// timers are stopped and the listener is released before returning.
    pub async fn start_with_security<F>(
        config: ServerConfig,
        security: Arc<dyn SecurityProvider>,
        build: F,
    ) -> Result<ServerHandle, StartError>
    where
        F: FnOnce(&mut MemoryNodeStore, &TimerSet) -> Result<(), BuildError>,
    {
        security.prepare(&config.security)?;

        let addr = config.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StartError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartError::Bind { addr, source })?;

        let timers = TimerSet::new();
        let mut store = MemoryNodeStore::new();
        if let Err(e) = build(&mut store, &timers) {
            timers.shutdown().await;
            drop(listener);
            return Err(e.into());
        }
        let store = Arc::new(store);
        debug!(nodes = store.node_count(), "address space ready");

        let engine = Arc::new(SubscriptionEngine::new(
            Arc::clone(&store),
            timers,
            EngineOptions {
                min_sampling_interval: config.min_sampling_interval(),
                default_sampling_interval: config.default_sampling_interval(),
                change_epsilon: config.change_epsilon,
            },
        ));

        let endpoint_url = endpoint_url(local_addr);
        let endpoints = security.endpoints(&endpoint_url, &config.security);
        info!("{} listening on {}", config.name, local_addr);
        for ep in &endpoints {
            info!(
                "endpoint {} {} {}",
                ep.endpoint_url, ep.security_mode, ep.security_policy_uri
            );
        }

        let ctx = Arc::new(SessionContext {
            store: Arc::clone(&store),
            engine: Arc::clone(&engine),
            identity: ServerIdentity {
                name: config.name.clone(),
                product_name: config.product_name.clone(),
                build_number: config.build_number.clone(),
                build_date: config.build_date.clone(),
                endpoints: endpoints.clone(),
            },
            queue_capacity: config.notification_queue_capacity,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            endpoint_url,
            endpoints,
            store,
            engine,
            shutdown: shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }
}

fn endpoint_url(local_addr: SocketAddr) -> String {
    let host = match local_addr.ip() {
        ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        ip => ip,
    };
    format!("ws://{}{}", SocketAddr::new(host, local_addr.port()), STREAM_PATH)
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("session task panicked: {}", e);
                    }
                }
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let ctx = Arc::clone(&ctx);
                    let shutdown = shutdown.clone();
                    sessions.spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, ctx, shutdown).await {
                            debug!("connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
        }
    }

    drop(listener);
    debug!(open = sessions.len(), "listener closed, draining sessions");
    while sessions.join_next().await.is_some() {}
}

/// A running server.
///
/// Dropping the handle signals shutdown but does not wait for it; call
/// [`ServerHandle::stop`] for an orderly stop.
pub struct ServerHandle {
    local_addr: SocketAddr,
    endpoint_url: String,
    endpoints: Vec<EndpointDescription>,
    store: Arc<MemoryNodeStore>,
    engine: Arc<SubscriptionEngine>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn endpoints(&self) -> &[EndpointDescription] {
        &self.endpoints
    }

    pub fn store(&self) -> Arc<MemoryNodeStore> {
        Arc::clone(&self.store)
    }

    pub fn engine(&self) -> Arc<SubscriptionEngine> {
        Arc::clone(&self.engine)
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop the server and wait for cleanup.
    ///
    /// Sessions finish the request they are handling, then every
    /// subscription is closed and every timer cancelled. Anything still
    /// running after the shutdown timeout is aborted. Calling `stop` again
    /// is a no-op.
    pub async fn stop(&self) {
        let accept_task = self
            .accept_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut accept_task) = accept_task else {
            return;
        };

        info!("stopping server on {}", self.local_addr);
        let _ = self.shutdown.send(true);
        let deadline = Instant::now() + self.shutdown_timeout;

        if tokio::time::timeout_at(deadline, &mut accept_task)
            .await
            .is_err()
        {
            warn!("ShutdownTimeout: sessions still open, aborting");
            accept_task.abort();
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !self.engine.shutdown(remaining).await {
            warn!("ShutdownTimeout: subscription tasks aborted");
        }
        info!("server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
