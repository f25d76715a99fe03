// Channel logo serving from the data directory.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// `GET /images/<file>` — logos cached by the ingest jobs.
pub async fn image_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> AppResult<Response> {
    if file.contains('/') || file.contains('\\') || file.contains("..") {
        return Err(AppError::new(StatusCode::FORBIDDEN, "invalid image name"));
    }

    let path = state.config.storage.data_dir.join("images").join(&file);
    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::new(StatusCode::NOT_FOUND, format!("no such image: {file}")))?;

    let content_type = mime_guess::from_path(&file)
        .first_or_octet_stream()
        .to_string();
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        data,
    )
        .into_response())
}
