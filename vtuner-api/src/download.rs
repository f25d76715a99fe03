// One-shot downloads of exported files (backups, logs). The temp file is
// deleted once it has been read.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

use vtuner_core::auth::Scope;

use crate::auth_gate::require_scope;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// `GET /download/<file>` — auth-gated via cookie or `token` query.
pub async fn download_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    require_scope(&state, &headers, &query, Scope::Web, state.config.auth.web).await?;

    if file.contains('/') || file.contains('\\') || file.contains("..") {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "invalid download name",
        ));
    }

    let path = state.config.storage.tmp_dir.join("download").join(&file);
    let data = tokio::fs::read(&path).await.map_err(|_| {
        AppError::new(StatusCode::NOT_FOUND, format!("no such download: {file}"))
    })?;

    if let Err(e) = tokio::fs::remove_file(&path).await {
        tracing::warn!(file = %file, error = %e, "failed to delete temp download");
    }

    let content_type = mime_guess::from_path(&file)
        .first_or_octet_stream()
        .to_string();
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file}\""),
            ),
        ],
        data,
    )
        .into_response())
}
