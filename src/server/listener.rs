//! HTTP listener
//!
//! Routes:
//! - `GET /video`: endless multipart JPEG stream, one session per request
//! - `GET /health`: JSON snapshot of the relay

use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::config::ServerConfig;
use super::encode::fallback_jpeg;
use super::multipart;
use super::producer::Producer;
use super::session::{SessionContext, ViewerSession};
use crate::error::{ConfigError, Result};
use crate::hub::FrameHub;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::upstream::ConnectionState;

const NO_CACHE: [(header::HeaderName, &str); 2] = [
    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    (header::PRAGMA, "no-cache"),
];

struct AppInner {
    config: ServerConfig,
    hub: FrameHub,
    producer: Producer,
    stats: Arc<RelayStats>,
    fallback_part: Bytes,
    next_viewer_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
}

/// Shared state behind every request
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

impl AppState {
    /// Build the state, encoding the fallback picture once
    pub fn new(
        config: ServerConfig,
        hub: FrameHub,
        producer: Producer,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let fallback = fallback_jpeg(
            config.fallback_width,
            config.fallback_height,
            config.jpeg_quality,
        )?;
        let stats = Arc::clone(hub.stats());
        let (shutdown_tx, _) = watch::channel(false);

        tracing::debug!(
            width = config.fallback_width,
            height = config.fallback_height,
            bytes = fallback.len(),
            "Fallback frame encoded"
        );

        Ok(Self {
            inner: Arc::new(AppInner {
                config,
                hub,
                producer,
                stats,
                fallback_part: multipart::part(&fallback),
                next_viewer_id: AtomicU64::new(1),
                shutdown_tx,
            }),
        })
    }

    pub fn hub(&self) -> &FrameHub {
        &self.inner.hub
    }

    pub fn producer(&self) -> &Producer {
        &self.inner.producer
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// End every viewer stream so connections can drain
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }

    /// Claim a viewer slot and open a session, or `None` if full
    fn open_session(&self) -> Option<ViewerSession> {
        let max = self.inner.config.max_viewers as u64;
        let active = &self.inner.stats.server.active_viewers;

        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .ok()?;

        let id = self.inner.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let ctx = SessionContext {
            read_timeout: self.inner.config.read_timeout,
            jpeg_quality: self.inner.config.jpeg_quality,
            fallback_part: self.inner.fallback_part.clone(),
            stats: Arc::clone(&self.inner.stats),
            shutdown: self.inner.shutdown_tx.subscribe(),
        };

        Some(ViewerSession::new(id, self.inner.hub.subscribe(), ctx))
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/video", get(video))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
}

async fn video(State(app): State<AppState>) -> Response {
    // Subscribe before starting the producer so the first frame is not missed
    let Some(session) = app.open_session() else {
        tracing::warn!(
            max_viewers = app.inner.config.max_viewers,
            "Viewer limit reached, rejecting"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, NO_CACHE, "viewer limit reached\n").into_response();
    };

    app.inner.producer.ensure_started();

    let parts = futures::stream::unfold(session, |mut session| async move {
        let part = session.next_part().await?;
        Some((Ok::<_, Infallible>(part), session))
    });

    (
        [(header::CONTENT_TYPE, multipart::CONTENT_TYPE)],
        NO_CACHE,
        Body::from_stream(parts),
    )
        .into_response()
}

/// `/health` response body
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub upstream: ConnectionState,
    pub producer_started: bool,
    pub viewers: u32,
    pub latest_seq: u64,
    pub stats: StatsSnapshot,
}

async fn health(State(app): State<AppState>) -> Response {
    let report = HealthReport {
        status: "ok",
        upstream: app.inner.producer.upstream_state(),
        producer_started: app.inner.producer.is_started(),
        viewers: app.inner.hub.subscriber_count(),
        latest_seq: app.inner.hub.latest_seq(),
        stats: app.inner.stats.snapshot(),
    };

    (NO_CACHE, Json(report)).into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, NO_CACHE, "not found\n").into_response()
}

/// MJPEG HTTP server
pub struct StreamServer {
    state: AppState,
}

impl StreamServer {
    pub fn new(
        config: ServerConfig,
        hub: FrameHub,
        producer: Producer,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            state: AppState::new(config, hub, producer)?,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind and serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.state.config().bind_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an existing listener until `signal` resolves
    pub async fn serve(
        self,
        listener: TcpListener,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "MJPEG server listening");

        if self.state.config().eager_start {
            self.state.producer().ensure_started();
        }

        let state = self.state.clone();
        let shutdown = async move {
            signal.await;
            tracing::info!("Shutting down, closing viewer streams");
            state.shutdown();
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        // Without a signal handler, run until killed
        std::future::pending::<()>().await;
    }
}
