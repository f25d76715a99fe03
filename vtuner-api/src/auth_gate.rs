// Scope gating for auth-protected routes.

use axum::http::{header, HeaderMap, StatusCode};
use std::collections::HashMap;

use vtuner_core::auth::Scope;

use crate::error::AppError;
use crate::state::AppState;

/// Extract a session token from the query string, the `Token` cookie or a
/// bearer header, in that order.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(token) = query.get("token") {
        if !token.is_empty() {
            return Some(token.clone());
        }
    }
    if let Some(cookie) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for part in cookie.split(';') {
            if let Some(value) = part.trim().strip_prefix("Token=") {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToString::to_string)
}

/// Enforce a scope when `enabled`. URL credentials (`?username=&password=`)
/// are accepted as an alternative to a token; a successful token check
/// returns the rotated token for the caller to hand back.
pub async fn require_scope(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    scope: Scope,
    enabled: bool,
) -> Result<Option<String>, AppError> {
    if !enabled {
        return Ok(None);
    }

    if let Some(token) = extract_token(headers, query) {
        let rotated = state
            .auth
            .verify(&token, scope)
            .await
            .map_err(|e| AppError::new(StatusCode::UNAUTHORIZED, e.to_string()))?;
        return Ok(Some(rotated));
    }

    if let (Some(username), Some(password)) = (query.get("username"), query.get("password")) {
        let token = state
            .credentials
            .login(username, password, scope)
            .await
            .map_err(|e| AppError::new(StatusCode::UNAUTHORIZED, e.to_string()))?;
        return Ok(Some(token));
    }

    Err(AppError::new(
        StatusCode::UNAUTHORIZED,
        format!("{scope} required"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_priority() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "a=1; Token=cookie-token".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer bearer-token".parse().unwrap());

        let mut query = HashMap::new();
        query.insert("token".to_string(), "query-token".to_string());

        assert_eq!(
            extract_token(&headers, &query).as_deref(),
            Some("query-token")
        );

        query.clear();
        assert_eq!(
            extract_token(&headers, &query).as_deref(),
            Some("cookie-token")
        );

        headers.remove(header::COOKIE);
        assert_eq!(
            extract_token(&headers, &query).as_deref(),
            Some("bearer-token")
        );

        headers.remove(header::AUTHORIZATION);
        assert_eq!(extract_token(&headers, &query), None);
    }
}
