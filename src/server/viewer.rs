//! Viewer-facing HTTP endpoint
//!
//! Each producer session gets its own serving path: an axum server bound to
//! a clone of the shared viewer listener and wired to that session's
//! broadcaster. Replacing the producer shuts the old server down before the
//! new one starts accepting, so a request is always answered by the
//! broadcaster of exactly one session.
//!
//! ```text
//!  GET /cam ──► join() ──► recv ─► [--BOUNDARY, headers] + payload ─► ... ─► leave()
//!                              │
//!                              └─ ended | inactivity timeout ─► end of body
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::archive;
use super::config::RelayConfig;
use crate::broadcast::{Broadcaster, Delivery, Subscriber};
use crate::error::Result;
use crate::protocol::constants::{BOUNDARY, VIEWER_CONTENT_TYPE};
use crate::protocol::PartEncoder;

#[derive(Clone)]
struct ViewerState {
    broadcaster: Option<Broadcaster>,
    idle_timeout: Option<Duration>,
}

/// One generation of the viewer serving path
#[derive(Debug)]
pub struct ViewerEndpoint {
    session_id: Option<u64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ViewerEndpoint {
    /// Start serving on a clone of `listener`
    ///
    /// With `broadcaster` set to `None` the live path answers
    /// `503 Service Unavailable`.
    pub fn start(
        listener: &std::net::TcpListener,
        config: &RelayConfig,
        broadcaster: Option<Broadcaster>,
    ) -> Result<Self> {
        let listener = listener.try_clone()?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;

        let session_id = broadcaster.as_ref().map(Broadcaster::session_id);
        let app = router(config, broadcaster);
        let cancel = CancellationToken::new();

        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(session_id = ?session_id, error = %e, "Viewer endpoint failed");
            }
        });

        tracing::debug!(session_id = ?session_id, "Viewer endpoint started");

        Ok(Self {
            session_id,
            cancel,
            task: Some(task),
        })
    }

    /// Session whose broadcaster this endpoint serves
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    /// Stop accepting and wait for in-flight responses to finish
    ///
    /// Connections still open after `grace` are aborted. Idempotent.
    pub async fn shutdown(&mut self, grace: Duration) {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return;
        };

        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!(
                session_id = ?self.session_id,
                "Viewer endpoint did not drain in time, aborting"
            );
            task.abort();
            let _ = task.await;
        }

        tracing::debug!(session_id = ?self.session_id, "Viewer endpoint stopped");
    }
}

impl Drop for ViewerEndpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Routes of one serving path generation
pub fn router(config: &RelayConfig, broadcaster: Option<Broadcaster>) -> Router {
    let state = ViewerState {
        broadcaster,
        idle_timeout: config.viewer_timeout,
    };

    let mut router = Router::new()
        .route(&config.viewer_path, get(live_stream))
        .with_state(state);

    if let Some(dir) = &config.archive_dir {
        router = router.nest_service(
            &config.records_path(),
            archive::service(dir.clone(), config.records_path()),
        );
    }

    router
}

async fn live_stream(State(state): State<ViewerState>) -> Response {
    let Some(broadcaster) = state.broadcaster.filter(|b| !b.is_closed()) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no live stream\n").into_response();
    };

    let subscriber = broadcaster.join();
    let body = Body::from_stream(frame_stream(subscriber, state.idle_timeout));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(VIEWER_CONTENT_TYPE)),
            (header::CONNECTION, HeaderValue::from_static("Keep-Alive")),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        body,
    )
        .into_response()
}

/// Multipart body for one viewer
///
/// The subscriber lives inside the stream, so it leaves the broadcaster
/// when the body ends or the client disconnects and hyper drops the body.
fn frame_stream(
    mut subscriber: Subscriber,
    idle_timeout: Option<Duration>,
) -> impl futures::Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut encoder = PartEncoder::viewer(BOUNDARY);
        loop {
            match subscriber.recv_timeout(idle_timeout).await {
                Delivery::Frame(frame) => {
                    yield Ok::<_, Infallible>(encoder.encode_header(&frame));
                    yield Ok::<_, Infallible>(frame.payload);
                }
                Delivery::Ended => {
                    tracing::debug!(subscriber_id = %subscriber.id(), "Live stream ended for viewer");
                    break;
                }
                Delivery::TimedOut => {
                    tracing::debug!(subscriber_id = %subscriber.id(), "Evicting inactive viewer");
                    break;
                }
            }
        }
    }
}
