//! Token gate
//!
//! The credential store (user management, password hashing) lives outside
//! this workspace; the HTTP surface consumes the two capabilities below.
//! `TokenGate` is the default implementation: rotating HS256 tokens carrying
//! a scope claim.

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AuthConfig;
use crate::error::{Error, Result};

/// Authentication scopes. Web tokens also satisfy the API scope so a browser
/// session can drive `/api/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Web,
    Api,
    Pms,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Scope::Web => "authentication.web",
            Scope::Api => "authentication.api",
            Scope::Pms => "authentication.pms",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token validation with rotation: a successful `verify` returns a fresh
/// token the caller must hand back to the client.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn verify(&self, token: &str, scope: Scope) -> Result<String>;
}

/// Username/password exchange for a scoped token.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn login(&self, username: &str, password: &str, scope: Scope) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    scope: String,
    exp: u64,
}

pub struct TokenGate {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenGate {
    #[must_use]
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.token_secret,
            Duration::from_secs(config.token_ttl_secs),
        )
    }

    pub fn issue(&self, subject: &str, scope: Scope) -> Result<String> {
        let exp = chrono::Utc::now().timestamp() as u64 + self.ttl.as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            scope: scope.as_str().to_string(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("token encode: {e}")))
    }
}

fn scope_grants(token_scope: &str, required: Scope) -> bool {
    if token_scope == required.as_str() {
        return true;
    }
    // A web session may drive the JSON API.
    required == Scope::Api && token_scope == Scope::Web.as_str()
}

#[async_trait]
impl AuthStore for TokenGate {
    async fn verify(&self, token: &str, scope: Scope) -> Result<String> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| Error::Authentication(format!("invalid token: {e}")))?;
        if !scope_grants(&data.claims.scope, scope) {
            return Err(Error::Authentication(format!(
                "token lacks scope {scope}"
            )));
        }
        // Rotate: same subject and scope, fresh expiry.
        let token_scope = match data.claims.scope.as_str() {
            s if s == Scope::Web.as_str() => Scope::Web,
            s if s == Scope::Api.as_str() => Scope::Api,
            _ => Scope::Pms,
        };
        self.issue(&data.claims.sub, token_scope)
    }
}

/// Single admin credential pair from configuration.
pub struct StaticCredentials {
    username: String,
    password: String,
    gate: std::sync::Arc<TokenGate>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(config: &AuthConfig, gate: std::sync::Arc<TokenGate>) -> Self {
        Self {
            username: config.username.clone(),
            password: config.password.clone(),
            gate,
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn login(&self, username: &str, password: &str, scope: Scope) -> Result<String> {
        if self.username.is_empty()
            || username != self.username
            || password != self.password
        {
            return Err(Error::Authentication(
                "invalid username or password".to_string(),
            ));
        }
        self.gate.issue(username, scope)
    }
}

/// `Set-Cookie` value for the session token. `Secure` is added when the
/// server is reached over TLS.
#[must_use]
pub fn token_cookie(token: &str, tls: bool) -> String {
    if tls {
        format!("Token={token}; Path=/; HttpOnly; SameSite=Strict; Secure")
    } else {
        format!("Token={token}; Path=/; HttpOnly; SameSite=Strict")
    }
}
