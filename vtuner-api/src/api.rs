// JSON command API.
//
// POST-only, JSON-only, body-capped; TCP callers must be local. When web
// authentication is enabled, a valid token is required even if API
// authentication is switched off, so a reverse proxy cannot be used to reach
// an unprotected surface.

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use vtuner_core::auth::Scope;

use crate::error::AppError;
use crate::middleware::client_ip;
use crate::state::{AppState, UpdateTarget};

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const VERSION_XTEVE: &str = "2.5.0";
const VERSION_API: &str = "1.1";

#[derive(Debug, Deserialize)]
pub struct ApiRequest {
    pub cmd: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiFailure {
    status: bool,
    error: String,
}

fn failure(error: impl Into<String>) -> Response {
    Json(ApiFailure {
        status: false,
        error: error.into(),
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(rename = "version.xteve")]
    version_xteve: String,
    #[serde(rename = "version.api")]
    version_api: String,
    #[serde(rename = "epg.source")]
    epg_source: String,
    #[serde(rename = "streams.active")]
    streams_active: u64,
    #[serde(rename = "streams.all")]
    streams_all: u64,
    #[serde(rename = "streams.xepg")]
    streams_xepg: u64,
    #[serde(rename = "tuner.active")]
    tuner_active: u64,
    #[serde(rename = "tuner.all")]
    tuner_all: u64,
    #[serde(rename = "url.dvr")]
    url_dvr: String,
    #[serde(rename = "url.m3u")]
    url_m3u: String,
    #[serde(rename = "url.webdav")]
    url_webdav: String,
    #[serde(rename = "url.xepg")]
    url_xepg: String,
    #[serde(rename = "activeHTTPConnections")]
    active_http_connections: i64,
}

/// Build the status payload; `token` carries the rotated session token when
/// the caller authenticated.
pub fn status_response(state: &AppState, token: Option<String>) -> serde_json::Value {
    let base = state.config.base_url();
    let counts = state.buffer.registry.counts();
    let catalog_counts = state.catalog.counts();
    let response = StatusResponse {
        status: true,
        token,
        version_xteve: VERSION_XTEVE.to_string(),
        version_api: VERSION_API.to_string(),
        epg_source: state.catalog.epg_source(),
        streams_active: counts.streams_active,
        streams_all: catalog_counts.streams_all,
        streams_xepg: catalog_counts.streams_xepg,
        tuner_active: counts.streams_active,
        tuner_all: state.tuner_total(),
        url_dvr: base
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string(),
        url_m3u: format!("{base}/m3u/vtuner.m3u"),
        url_webdav: format!("{base}/dav/"),
        url_xepg: format!("{base}/xmltv/vtuner.xml"),
        active_http_connections: state.connections.active(),
    };
    serde_json::to_value(response).unwrap_or_else(|_| serde_json::json!({"status": false}))
}

/// `POST /api/`
pub async fn api_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ApiRequest>,
) -> Result<Response, AppError> {
    // Local-only surface: remote TCP callers are refused outright.
    if !addr.ip().is_loopback() {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "API is restricted to local callers",
        ));
    }

    if request.cmd == "login" {
        let ip = client_ip(addr, &headers);
        if !state.login_limiter.check(ip) {
            return Err(AppError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "too many login attempts",
            ));
        }
        let (username, password) = (
            request.username.as_deref().unwrap_or_default(),
            request.password.as_deref().unwrap_or_default(),
        );
        return match state.credentials.login(username, password, Scope::Web).await {
            Ok(token) => Ok(Json(serde_json::json!({"status": true, "token": token})).into_response()),
            Err(e) => Ok(failure(e.to_string())),
        };
    }

    // Token check applies when either API auth or web auth is active.
    let auth_required = state.config.auth.api || state.config.auth.web;
    let rotated = if auth_required {
        let Some(token) = request.token.as_deref() else {
            return Ok(failure("login required"));
        };
        match state.auth.verify(token, Scope::Api).await {
            Ok(rotated) => Some(rotated),
            Err(e) => return Ok(failure(e.to_string())),
        }
    } else {
        None
    };

    match request.cmd.as_str() {
        "status" => Ok(Json(status_response(&state, rotated)).into_response()),
        cmd => match UpdateTarget::from_cmd(cmd) {
            Some(target) => {
                state.updates.request_update(target);
                // Re-ingest invalidates the derived WebDAV trees.
                if matches!(target, UpdateTarget::M3u | UpdateTarget::Hdhr) {
                    state.dav_cache.clear(None);
                }
                let mut body = serde_json::json!({"status": true});
                if let Some(token) = rotated {
                    body["token"] = serde_json::Value::String(token);
                }
                Ok(Json(body).into_response())
            }
            None => Ok(failure(format!("unknown command: {cmd}"))),
        },
    }
}
