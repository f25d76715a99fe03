// Streaming endpoint: lineup lookup, multicast rewrite, redirect or fan-out.

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use vtuner_buffer::{consumer, StreamRequest};

use crate::error::AppError;
use crate::state::AppState;

/// `GET /stream/<key>` — resolve the opaque key against the lineup table and
/// hand the client to the buffer, or redirect straight to the upstream when
/// buffering is disabled.
pub async fn stream_handler(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let Some(entry) = state.lineup.resolve(&key) else {
        return AppError::new(StatusCode::NOT_FOUND, format!("unknown stream key: {key}"))
            .into_response();
    };

    let url = rewrite_multicast(&entry.url, &state.config.server.udpxy);

    if !state.config.buffer.enabled {
        return match HeaderValue::from_str(&url) {
            Ok(location) => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
            Err(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "invalid upstream url").into_response()
            }
        };
    }

    let tuner = state
        .catalog
        .source_by_id(&entry.playlist_id)
        .map_or(state.config.buffer.tuner_default, |s| s.tuner);

    let request = StreamRequest {
        playlist_id: entry.playlist_id.clone(),
        playlist_name: entry.playlist_name.clone(),
        channel_name: entry.channel_name.clone(),
        url,
        tuner,
    };
    consumer::serve(state.buffer.clone(), request).await
}

/// Rewrite `udp://` multicast sources to a udpxy relay when one is
/// configured.
fn rewrite_multicast(url: &str, udpxy: &str) -> String {
    match url.strip_prefix("udp://") {
        Some(rest) if !udpxy.is_empty() => {
            let target = rest.trim_start_matches('@');
            format!("http://{udpxy}/udp/{target}")
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multicast_rewrite() {
        assert_eq!(
            rewrite_multicast("udp://239.0.0.1:1234", "10.0.0.2:4022"),
            "http://10.0.0.2:4022/udp/239.0.0.1:1234"
        );
        assert_eq!(
            rewrite_multicast("udp://@239.0.0.1:1234", "10.0.0.2:4022"),
            "http://10.0.0.2:4022/udp/239.0.0.1:1234"
        );
    }

    #[test]
    fn test_non_multicast_untouched() {
        assert_eq!(
            rewrite_multicast("http://u/a.ts", "10.0.0.2:4022"),
            "http://u/a.ts"
        );
        assert_eq!(rewrite_multicast("udp://239.0.0.1:1234", ""), "udp://239.0.0.1:1234");
    }
}
