//! Relay server
//!
//! Runs the producer accept loop and owns the only mutable shared state of
//! the relay: the current producer session and the viewer serving path
//! bound to it. Both are replaced together under one lock, so replacements
//! never interleave.
//!
//! ```text
//! accept ──► spawn ──► authenticate ──(ok)──► lock current
//!                          │                    ├─ close old session, await teardown
//!                          │                    ├─ shut down old serving path
//!                          │                    ├─ new Broadcaster + serving path
//!                          │                    └─ spawn new session, unlock
//!                          └──(fail)──► drop connection, current untouched
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::RelayConfig;
use super::viewer::ViewerEndpoint;
use crate::broadcast::Broadcaster;
use crate::error::{Error, Result};
use crate::session::{ProducerSession, SessionHandle, SessionSummary};

struct ActiveSession {
    handle: SessionHandle,
    broadcaster: Broadcaster,
    task: JoinHandle<SessionSummary>,
}

struct Current {
    session: Option<ActiveSession>,
    endpoint: ViewerEndpoint,
}

/// Single-producer MJPEG relay
pub struct RelayServer {
    config: Arc<RelayConfig>,
    producer_listener: TcpListener,
    viewer_listener: std::net::TcpListener,
    producer_addr: SocketAddr,
    viewer_addr: SocketAddr,
    current: Mutex<Current>,
    next_session_id: AtomicU64,
    stopped: CancellationToken,
}

impl RelayServer {
    /// Bind both listeners and start the idle serving path
    ///
    /// A bind failure is returned as [`Error::Bind`]; the relay cannot run
    /// without either listener.
    pub async fn bind(config: RelayConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let producer_listener = TcpListener::bind(config.producer_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: config.producer_addr,
                source,
            })?;
        let viewer_listener =
            std::net::TcpListener::bind(config.viewer_addr).map_err(|source| Error::Bind {
                addr: config.viewer_addr,
                source,
            })?;

        let producer_addr = producer_listener.local_addr()?;
        let viewer_addr = viewer_listener.local_addr()?;

        let endpoint = ViewerEndpoint::start(&viewer_listener, &config, None)?;

        tracing::info!(addr = %producer_addr, "Waiting for producer connections");
        tracing::info!(
            addr = %viewer_addr,
            path = %config.viewer_path,
            "Serving viewers"
        );
        if let Some(dir) = &config.archive_dir {
            tracing::info!(
                dir = %dir.display(),
                path = %config.records_path(),
                "Serving recording archive"
            );
        }

        Ok(Arc::new(Self {
            config: Arc::new(config),
            producer_listener,
            viewer_listener,
            producer_addr,
            viewer_addr,
            current: Mutex::new(Current {
                session: None,
                endpoint,
            }),
            next_session_id: AtomicU64::new(1),
            stopped: CancellationToken::new(),
        }))
    }

    /// Bound producer address
    pub fn producer_addr(&self) -> SocketAddr {
        self.producer_addr
    }

    /// Bound viewer address
    pub fn viewer_addr(&self) -> SocketAddr {
        self.viewer_addr
    }

    /// URL of the live stream as seen from this host
    pub fn live_url(&self) -> String {
        self.config.live_url(self.viewer_addr)
    }

    /// Relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the accept loop forever
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.accept_loop().await
    }

    /// Run the accept loop until `shutdown` resolves, then close the current
    /// session and the serving path
    pub async fn run_until<F>(self: &Arc<Self>, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop() => result,
        };

        self.shutdown().await;
        result
    }

    async fn accept_loop(self: &Arc<Self>) -> Result<()> {
        loop {
            match self.producer_listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(self: &Arc<Self>, socket: TcpStream, peer_addr: SocketAddr) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            session_id = session_id,
            peer = %peer_addr,
            "Producer connected"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(session_id = session_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let server = Arc::clone(self);
        tokio::spawn(async move {
            let mut session =
                ProducerSession::new(session_id, socket, peer_addr, Arc::clone(&server.config));

            // Authenticate before touching the current session
            if let Err(e) = session.authenticate().await {
                tracing::warn!(
                    session_id = session_id,
                    peer = %peer_addr,
                    error = %e,
                    "Producer rejected"
                );
                return;
            }

            server.on_producer_connect(session).await;
        });
    }

    /// Install an authenticated session as the current one
    ///
    /// Any previous session is closed and fully torn down, and its serving
    /// path shut down, before the new session starts streaming.
    pub async fn on_producer_connect(&self, session: ProducerSession) {
        let mut current = self.current.lock().await;
        if self.stopped.is_cancelled() {
            tracing::debug!(session_id = session.id(), "Relay stopped, dropping producer");
            return;
        }

        if let Some(old) = current.session.take() {
            tracing::info!(
                old_session_id = old.handle.id(),
                new_session_id = session.id(),
                "Replacing producer session"
            );
            close_session(old).await;
        }

        current
            .endpoint
            .shutdown(self.config.endpoint_shutdown_grace)
            .await;

        let broadcaster = Broadcaster::new(session.id());
        let endpoint = ViewerEndpoint::start(
            &self.viewer_listener,
            &self.config,
            Some(broadcaster.clone()),
        );
        current.endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::error!(
                    session_id = session.id(),
                    error = %e,
                    "Failed to start viewer endpoint, dropping producer"
                );
                self.restore_idle_endpoint(&mut current);
                return;
            }
        };

        let handle = session.handle();
        let task = tokio::spawn(session.run(broadcaster.clone(), self.live_url()));

        current.session = Some(ActiveSession {
            handle,
            broadcaster,
            task,
        });
    }

    fn restore_idle_endpoint(&self, current: &mut Current) {
        match ViewerEndpoint::start(&self.viewer_listener, &self.config, None) {
            Ok(endpoint) => current.endpoint = endpoint,
            Err(e) => tracing::error!(error = %e, "Failed to restart idle viewer endpoint"),
        }
    }

    /// Handle of the most recently installed session
    ///
    /// The session may already have closed on its own.
    pub async fn current_session(&self) -> Option<SessionHandle> {
        let current = self.current.lock().await;
        current.session.as_ref().map(|s| s.handle.clone())
    }

    /// Viewers joined to the current session
    pub async fn subscriber_count(&self) -> usize {
        let current = self.current.lock().await;
        current
            .session
            .as_ref()
            .map_or(0, |s| s.broadcaster.subscriber_count())
    }

    /// Close the current session and stop serving viewers
    pub async fn shutdown(&self) {
        let mut current = self.current.lock().await;
        self.stopped.cancel();

        if let Some(old) = current.session.take() {
            close_session(old).await;
        }
        current
            .endpoint
            .shutdown(self.config.endpoint_shutdown_grace)
            .await;

        tracing::info!("Relay stopped");
    }
}

async fn close_session(session: ActiveSession) {
    session.handle.close();
    match session.task.await {
        Ok(summary) => tracing::debug!(
            session_id = summary.id,
            reason = %summary.end,
            "Previous session torn down"
        ),
        Err(e) => tracing::error!(
            session_id = session.handle.id(),
            error = %e,
            "Session task failed"
        ),
    }
}
