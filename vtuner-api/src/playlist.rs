// Generated playlist and guide documents.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

use vtuner_core::auth::Scope;

use crate::auth_gate::require_scope;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// `GET /m3u/<file>` — the generated unified playlist, optionally filtered
/// with `?group-title=A,B`.
pub async fn m3u_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    require_scope(&state, &headers, &query, Scope::Pms, state.config.auth.pms).await?;

    let document = state
        .catalog
        .m3u_document(&file)
        .ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                format!("no playlist document: {file}"),
            )
        })?;

    let body = match query.get("group-title") {
        Some(filter) if !filter.is_empty() => {
            let groups: Vec<&str> = filter.split(',').map(str::trim).collect();
            filter_m3u(&document, &groups)
        }
        _ => document,
    };

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

/// `GET /xmltv/<file>` — the generated program guide.
pub async fn xmltv_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    require_scope(&state, &headers, &query, Scope::Pms, state.config.auth.pms).await?;

    let document = state
        .catalog
        .xmltv_document(&file)
        .ok_or_else(|| {
            AppError::new(StatusCode::NOT_FOUND, format!("no guide document: {file}"))
        })?;

    Ok((
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        document,
    )
        .into_response())
}

/// Keep only channels whose `group-title` matches one of `groups`. Header
/// tags are preserved.
fn filter_m3u(document: &str, groups: &[&str]) -> String {
    let mut out = String::with_capacity(document.len());
    let mut lines = document.lines().peekable();

    while let Some(line) = lines.next() {
        if line.starts_with("#EXTINF") {
            let keep = group_title_of(line).is_some_and(|g| groups.contains(&g));
            let url = lines.next_if(|l| !l.starts_with('#'));
            if keep {
                out.push_str(line);
                out.push('\n');
                if let Some(url) = url {
                    out.push_str(url);
                    out.push('\n');
                }
            }
        } else if line.starts_with('#') {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn group_title_of(extinf: &str) -> Option<&str> {
    let start = extinf.find("group-title=\"")? + "group-title=\"".len();
    let rest = &extinf[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "#EXTM3U\n#EXTINF:-1 tvg-id=\"1\" group-title=\"News\",CNN\nhttp://u/cnn.ts\n#EXTINF:-1 group-title=\"Sports\",ESPN\nhttp://u/espn.ts\n#EXTINF:-1,NoGroup\nhttp://u/none.ts\n";

    #[test]
    fn test_filter_keeps_matching_groups() {
        let out = filter_m3u(DOC, &["News"]);
        assert!(out.starts_with("#EXTM3U\n"));
        assert!(out.contains("CNN"));
        assert!(out.contains("http://u/cnn.ts"));
        assert!(!out.contains("ESPN"));
        assert!(!out.contains("NoGroup"));
    }

    #[test]
    fn test_filter_multiple_groups() {
        let out = filter_m3u(DOC, &["News", "Sports"]);
        assert!(out.contains("CNN"));
        assert!(out.contains("ESPN"));
    }

    #[test]
    fn test_group_title_of() {
        assert_eq!(
            group_title_of("#EXTINF:-1 group-title=\"A B\",chan"),
            Some("A B")
        );
        assert_eq!(group_title_of("#EXTINF:-1,chan"), None);
    }
}
