// WebDAV mount: auth gate plus delegation to the DAV protocol handler.

use axum::extract::{Query, Request, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

use vtuner_core::auth::Scope;

use crate::auth_gate::require_scope;
use crate::state::AppState;

/// `/dav/**` — every WebDAV method. Mutating methods come back as 403 from
/// the read-only filesystem; locks are held in memory.
pub async fn dav_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    request: Request,
) -> Response {
    if let Err(e) = require_scope(
        &state,
        &headers,
        &query,
        Scope::Pms,
        state.config.auth.pms,
    )
    .await
    {
        return e.into_response();
    }

    let response = state.dav.handle(request).await;
    response.map(axum::body::Body::new)
}
