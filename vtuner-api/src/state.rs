// Shared application state and router assembly.

use axum::{
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{any, get, post},
    Router,
};
use dav_server::{memls::MemLs, DavHandler};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use vtuner_buffer::BufferContext;
use vtuner_core::auth::{AuthStore, CredentialStore};
use vtuner_core::lineup::LineupTable;
use vtuner_core::models::{Fingerprint, PlaylistCatalog};
use vtuner_core::rate_limit::LoginRateLimiter;
use vtuner_core::Config;
use vtuner_dav::{ContentCache, VodFs, WebDavCache};

use crate::middleware::{self, ConnectionCounter};
use crate::{api, dav, download, hdhr, images, playlist, stream, ws};

/// Ingest refresh targets requested through the JSON API. The ingest jobs
/// themselves live outside this workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    M3u,
    Hdhr,
    Xmltv,
    Xepg,
}

impl UpdateTarget {
    #[must_use]
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        match cmd {
            "update.m3u" => Some(Self::M3u),
            "update.hdhr" => Some(Self::Hdhr),
            "update.xmltv" => Some(Self::Xmltv),
            "update.xepg" => Some(Self::Xepg),
            _ => None,
        }
    }
}

/// Receiver for update requests.
pub trait UpdateSink: Send + Sync {
    fn request_update(&self, target: UpdateTarget);
}

/// Default sink used when no ingest scheduler is wired in.
pub struct NoopUpdateSink;

impl UpdateSink for NoopUpdateSink {
    fn request_update(&self, target: UpdateTarget) {
        tracing::info!(?target, "update requested (no ingest scheduler attached)");
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: Arc<dyn PlaylistCatalog>,
    pub buffer: Arc<BufferContext>,
    pub lineup: Arc<LineupTable>,
    pub auth: Arc<dyn AuthStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub login_limiter: Arc<LoginRateLimiter>,
    pub dav: DavHandler,
    pub dav_cache: Arc<WebDavCache>,
    pub connections: ConnectionCounter,
    pub updates: Arc<dyn UpdateSink>,
    /// Stable HDHR device ID derived from the advertised base URL.
    pub device_id: String,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        catalog: Arc<dyn PlaylistCatalog>,
        buffer: Arc<BufferContext>,
        lineup: Arc<LineupTable>,
        auth: Arc<dyn AuthStore>,
        credentials: Arc<dyn CredentialStore>,
        updates: Arc<dyn UpdateSink>,
    ) -> Self {
        let dav_cache = Arc::new(WebDavCache::new(
            catalog.clone(),
            buffer.fetcher.clone(),
            config.webdav.head_concurrency,
        ));
        let content_cache = Arc::new(ContentCache::new(
            config.webdav.content_cache_bytes,
            config.webdav.content_cache_budget,
        ));
        let vod_fs = VodFs::new(
            catalog.clone(),
            dav_cache.clone(),
            content_cache,
            buffer.fetcher.clone(),
        );
        let dav = DavHandler::builder()
            .filesystem(Box::new(vod_fs))
            .locksystem(MemLs::new())
            .strip_prefix("/dav")
            .build_handler();

        let device_id = Fingerprint::of_url(&config.base_url()).as_str()[..8].to_string();

        Self {
            config,
            catalog,
            buffer,
            lineup,
            auth,
            credentials,
            login_limiter: Arc::new(LoginRateLimiter::new()),
            dav,
            dav_cache,
            connections: ConnectionCounter::new(),
            updates,
            device_id,
        }
    }

    /// Total tuner slots across all ingested playlists.
    #[must_use]
    pub fn tuner_total(&self) -> u64 {
        let from_sources: u64 = self
            .catalog
            .sources()
            .iter()
            .map(|s| u64::from(s.tuner))
            .sum();
        if from_sources == 0 {
            u64::from(self.config.buffer.tuner_default)
        } else {
            from_sources
        }
    }
}

/// Streaming, playlist and guide endpoints.
fn register_stream_routes() -> Router<AppState> {
    Router::new()
        .route("/stream/{key}", get(stream::stream_handler))
        .route("/m3u/{file}", get(playlist::m3u_handler))
        .route("/xmltv/{file}", get(playlist::xmltv_handler))
        .route("/images/{file}", get(images::image_handler))
        .route("/download/{file}", get(download::download_handler))
}

/// HDHomeRun emulation documents.
fn register_hdhr_routes() -> Router<AppState> {
    Router::new()
        .route("/discover.json", get(hdhr::discover))
        .route("/lineup.json", get(hdhr::lineup))
        .route("/lineup_status.json", get(hdhr::lineup_status))
        .route("/device.xml", get(hdhr::device_xml))
        .route("/capability", get(hdhr::capability))
}

/// WebDAV mount; every method is delegated to the DAV handler.
fn register_dav_routes() -> Router<AppState> {
    Router::new()
        .route("/dav", any(dav::dav_handler))
        .route("/dav/", any(dav::dav_handler))
        .route("/dav/{*path}", any(dav::dav_handler))
}

/// JSON API and WebSocket.
fn register_api_routes() -> Router<AppState> {
    Router::new()
        .route("/api", post(api::api_handler))
        .route("/api/", post(api::api_handler))
        .layer(axum::extract::DefaultBodyLimit::max(api::MAX_BODY_BYTES))
        .route("/ws", get(ws::ws_handler))
        .route("/ws/", get(ws::ws_handler))
}

/// Assemble the full router with global layers.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(register_stream_routes())
        .merge(register_hdhr_routes())
        .merge(register_dav_routes())
        .merge(register_api_routes())
        .layer(axum_middleware::from_fn_with_state(
            state.connections.clone(),
            middleware::connection_count_middleware,
        ))
        .layer(axum_middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(CatchPanicLayer::custom(|err: Box<dyn std::any::Any + Send>| {
            let detail = err
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| err.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            tracing::error!(panic = %detail, "handler panicked");
            crate::error::AppError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                detail,
            )
            .into_response()
        }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
