//! Producer session
//!
//! Binds one authenticated producer connection to one broadcaster for the
//! lifetime of the connection. The session owns everything it starts
//! (decode loop, collaborators, the socket) and releases all of it exactly
//! once, whichever way streaming ends.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::state::{SessionPhase, SessionState};
use crate::broadcast::Broadcaster;
use crate::collaborator::{recorder, restreamer, CollaboratorHandle};
use crate::error::{Error, Result};
use crate::media::source::{FrameSource, SourceEnd};
use crate::protocol::constants::BOUNDARY;
use crate::protocol::MultipartDecoder;
use crate::server::config::RelayConfig;
use crate::stats::SessionStats;

/// Why a session stopped streaming
#[derive(Debug)]
pub enum SessionEnd {
    /// Never got past authentication
    Rejected,
    /// Closed from outside (replacement or shutdown)
    Cancelled,
    /// Producer closed the connection between parts
    ProducerClosed,
    /// Producer sent the closing boundary
    Terminated,
    /// Framing or I/O failure on the producer connection
    Failed(Error),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Rejected => write!(f, "rejected"),
            SessionEnd::Cancelled => write!(f, "cancelled"),
            SessionEnd::ProducerClosed => write!(f, "producer closed"),
            SessionEnd::Terminated => write!(f, "stream terminated"),
            SessionEnd::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Outcome of a finished session
#[derive(Debug)]
pub struct SessionSummary {
    /// Session ID
    pub id: u64,
    /// How streaming ended
    pub end: SessionEnd,
    /// Counters collected while streaming
    pub stats: SessionStats,
}

/// Observer and kill switch for a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
    phase: watch::Receiver<SessionPhase>,
}

impl SessionHandle {
    /// Session ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Producer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Check if the session is streaming
    pub fn is_streaming(&self) -> bool {
        self.phase() == SessionPhase::Streaming
    }

    /// Ask the session to stop streaming and tear down
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait until teardown has finished
    pub async fn closed(&self) {
        let mut phase = self.phase.clone();
        // An error means the session is gone, which is closed as well
        let _ = phase.wait_for(|p| *p == SessionPhase::Closed).await;
    }
}

/// One producer connection
pub struct ProducerSession<S = TcpStream> {
    state: SessionState,
    socket: S,
    config: Arc<RelayConfig>,
    phase_tx: watch::Sender<SessionPhase>,
    cancel: CancellationToken,
}

impl<S> ProducerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a freshly accepted connection
    pub fn new(id: u64, socket: S, peer_addr: SocketAddr, config: Arc<RelayConfig>) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Authenticating);

        Self {
            state: SessionState::new(id, peer_addr),
            socket,
            config,
            phase_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Session ID
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Producer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.state.peer_addr
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    /// Handle for observing and closing this session
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.state.id,
            peer_addr: self.state.peer_addr,
            cancel: self.cancel.clone(),
            phase: self.phase_tx.subscribe(),
        }
    }

    /// Run the authentication phase
    ///
    /// On failure the session moves straight to `Closed` and the connection
    /// is shut down. No other session is affected.
    pub async fn authenticate(&mut self) -> Result<()> {
        let authenticator = self.config.auth.authenticator();

        if let Err(e) = authenticator.authenticate(&mut self.socket).await {
            self.state.close();
            self.phase_tx.send_replace(SessionPhase::Closed);
            if let Err(shutdown_err) = self.socket.shutdown().await {
                tracing::debug!(
                    session_id = self.state.id,
                    error = %shutdown_err,
                    "Socket shutdown failed"
                );
            }
            return Err(e);
        }

        tracing::debug!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            preamble = authenticator.preamble_len(),
            "Producer authenticated"
        );
        Ok(())
    }

    /// Stream frames into `broadcaster` until the producer stream ends or the
    /// session is closed, then tear everything down
    ///
    /// `live_url` is the viewer URL collaborators pull from.
    pub async fn run(self, broadcaster: Broadcaster, live_url: String) -> SessionSummary {
        let ProducerSession {
            mut state,
            socket,
            config,
            phase_tx,
            cancel,
        } = self;

        let decoder = MultipartDecoder::with_max_frame_size(BOUNDARY, config.max_frame_size);
        let mut source = FrameSource::new(socket, decoder);
        let mut collaborators = Vec::new();

        let end = if state.start_streaming() {
            phase_tx.send_replace(SessionPhase::Streaming);
            tracing::info!(
                session_id = state.id,
                peer = %state.peer_addr,
                "Producer session streaming"
            );

            if !cancel.is_cancelled() {
                collaborators = start_collaborators(&config, state.id, &live_url).await;
            }
            stream_frames(&mut source, &broadcaster, &mut state, &cancel).await
        } else {
            SessionEnd::Rejected
        };

        let bytes_read = source.bytes_read();
        let mut socket = source.into_inner();

        // Teardown, once
        broadcaster.close_all();
        if state.close() {
            for collaborator in collaborators.iter_mut() {
                collaborator.stop().await;
            }
            if let Err(e) = socket.shutdown().await {
                tracing::debug!(session_id = state.id, error = %e, "Socket shutdown failed");
            }
        }
        drop(socket);

        let stats = SessionStats {
            frames_received: state.frames_received,
            bytes_received: bytes_read,
            payload_bytes: state.payload_bytes,
            duration: state.streaming_duration(),
            broadcast: broadcaster.stats(),
        };

        tracing::info!(
            session_id = state.id,
            peer = %state.peer_addr,
            reason = %end,
            frames = stats.frames_received,
            bytes = stats.bytes_received,
            payload_bytes = stats.payload_bytes,
            dropped = stats.broadcast.dropped,
            duration_ms = stats.duration.as_millis() as u64,
            fps = format_args!("{:.1}", stats.frame_rate()),
            "Producer session closed"
        );

        phase_tx.send_replace(SessionPhase::Closed);

        SessionSummary {
            id: state.id,
            end,
            stats,
        }
    }
}

async fn stream_frames<R>(
    source: &mut FrameSource<R>,
    broadcaster: &Broadcaster,
    state: &mut SessionState,
    cancel: &CancellationToken,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            next = source.next() => match next {
                Ok(Some(frame)) => {
                    state.record_frame(frame.len());
                    broadcaster.publish(frame);
                }
                Ok(None) | Err(SourceEnd::Closed) => return SessionEnd::ProducerClosed,
                Err(SourceEnd::Terminated) => return SessionEnd::Terminated,
                Err(SourceEnd::Failed(e)) => return SessionEnd::Failed(e),
            }
        }
    }
}

async fn start_collaborators(
    config: &RelayConfig,
    session_id: u64,
    live_url: &str,
) -> Vec<CollaboratorHandle> {
    let mut handles = Vec::new();

    if let Some(recorder_config) = &config.recorder {
        match recorder::prepare(recorder_config).await {
            Ok(()) => handles.push(CollaboratorHandle::spawn(
                recorder::spec(recorder_config, live_url),
                session_id,
            )),
            Err(e) => tracing::warn!(
                session_id = session_id,
                dir = %recorder_config.dir.display(),
                error = %e,
                "Cannot create record directory, recorder not started"
            ),
        }
    }

    if let Some(restreamer_config) = &config.restreamer {
        for spec in restreamer::specs(restreamer_config, live_url) {
            handles.push(CollaboratorHandle::spawn(spec, session_id));
        }
    }

    handles
}
