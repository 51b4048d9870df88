//! Bearer token middleware for the push listener
//!
//! Extracts `Authorization: Bearer <jwt>`, verifies it against the issuer's
//! JWKS (RS256) or a shared secret (HS256), and requires the configured
//! scope. A bad or missing token is 401, a valid token without the scope is
//! 403.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::{AuthConfig, ListenerConfig};
use crate::error::AppError;

/// Cached key set is trusted this long
const JWKS_TTL: Duration = Duration::from_secs(600);
/// Unknown key ids trigger at most one refetch per window
const JWKS_MIN_REFETCH: Duration = Duration::from_secs(12);
/// Upper bound on one key set fetch; verification holds the cache lock meanwhile
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct PushClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl PushClaims {
    pub fn has_scope(&self, required: &str) -> bool {
        let in_scope = self
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().any(|s| s == required))
            .unwrap_or(false);
        in_scope || self.permissions.iter().any(|p| p == required)
    }
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

pub struct BearerGate {
    issuer: String,
    audience: String,
    required_scope: String,
    shared_secret: Option<String>,
    jwks_url: Option<String>,
    http_client: reqwest::Client,
    fetch_timeout: Duration,
    jwks: RwLock<Option<CachedJwks>>,
}

impl BearerGate {
    pub fn new(auth: &AuthConfig, listener: &ListenerConfig) -> Self {
        Self::with_fetch_timeout(auth, listener, JWKS_FETCH_TIMEOUT)
    }

    pub(crate) fn with_fetch_timeout(
        auth: &AuthConfig,
        listener: &ListenerConfig,
        fetch_timeout: Duration,
    ) -> Self {
        let issuer = auth.issuer_base();
        let jwks_url = if issuer.is_empty() {
            None
        } else {
            Some(auth.issuer_url(".well-known/jwks.json"))
        };

        if jwks_url.is_none() && listener.shared_secret.is_none() {
            tracing::warn!(
                "[DirectConnect] Bearer auth required without issuer or shared secret, pushes will be rejected"
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .connect_timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "[DirectConnect] JWKS client build failed, using defaults: {}",
                    e
                );
                reqwest::Client::new()
            });

        Self {
            issuer,
            audience: auth.audience.clone(),
            required_scope: listener.required_scope.clone(),
            shared_secret: listener.shared_secret.clone(),
            jwks_url,
            http_client,
            fetch_timeout,
            jwks: RwLock::new(None),
        }
    }

    /// Verify a bearer token and its scope
    pub async fn verify(&self, token: &str) -> Result<PushClaims, AppError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!("[DirectConnect] Malformed bearer token: {}", e);
            AppError::Unauthorized
        })?;

        let key = match header.alg {
            Algorithm::HS256 => {
                let secret = self.shared_secret.as_ref().ok_or(AppError::Unauthorized)?;
                DecodingKey::from_secret(secret.as_bytes())
            }
            Algorithm::RS256 => self.signing_key(header.kid.as_deref()).await?,
            other => {
                tracing::debug!("[DirectConnect] Unsupported token algorithm {:?}", other);
                return Err(AppError::Unauthorized);
            }
        };

        let mut validation = Validation::new(header.alg);
        if self.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[&self.audience]);
        }
        if !self.issuer.is_empty() {
            validation.set_issuer(&[&self.issuer]);
        }

        let claims = decode::<PushClaims>(token, &key, &validation)
            .map_err(|e| {
                tracing::debug!("[DirectConnect] Invalid bearer token: {}", e);
                AppError::Unauthorized
            })?
            .claims;

        if !claims.has_scope(&self.required_scope) {
            tracing::warn!(
                "[DirectConnect] Token for {} lacks scope {}",
                claims.sub.as_deref().unwrap_or("unknown"),
                self.required_scope
            );
            return Err(AppError::Forbidden(format!(
                "Insufficient scope, {} required",
                self.required_scope
            )));
        }

        Ok(claims)
    }

    async fn signing_key(&self, kid: Option<&str>) -> Result<DecodingKey, AppError> {
        {
            let cached = self.jwks.read().await;
            if let Some(cached) = cached.as_ref() {
                let fresh = cached.fetched_at.elapsed() < JWKS_TTL;
                let throttled = cached.fetched_at.elapsed() < JWKS_MIN_REFETCH;
                match find_key(&cached.keys, kid) {
                    Some(key) if fresh => return key,
                    None if throttled => return Err(AppError::Unauthorized),
                    _ => {}
                }
            }
        }

        let mut cached = self.jwks.write().await;
        // Another request may have refreshed while we waited
        let recent = cached
            .as_ref()
            .map(|c| c.fetched_at.elapsed() < JWKS_MIN_REFETCH)
            .unwrap_or(false);
        if !recent {
            match self.fetch_jwks().await {
                Ok(keys) => {
                    *cached = Some(CachedJwks {
                        keys,
                        fetched_at: Instant::now(),
                    })
                }
                Err(e) => tracing::warn!("[DirectConnect] JWKS fetch failed: {}", e),
            }
        }

        cached
            .as_ref()
            .and_then(|c| find_key(&c.keys, kid))
            .unwrap_or(Err(AppError::Unauthorized))
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, String> {
        // The client timeout may be missing if the builder fell back
        tokio::time::timeout(self.fetch_timeout, self.request_jwks())
            .await
            .map_err(|_| format!("timed out after {:?}", self.fetch_timeout))?
    }

    async fn request_jwks(&self) -> Result<JwkSet, String> {
        let url = self.jwks_url.as_ref().ok_or("no issuer configured")?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {}", e))?
            .error_for_status()
            .map_err(|e| format!("HTTP status: {}", e))?;

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {}", e))?;
        tracing::info!("[DirectConnect] JWKS cached ({} keys)", keys.keys.len());
        Ok(keys)
    }
}

fn find_key(keys: &JwkSet, kid: Option<&str>) -> Option<Result<DecodingKey, AppError>> {
    let jwk = match kid {
        Some(kid) => keys.find(kid)?,
        None => keys.keys.first()?,
    };
    Some(DecodingKey::from_jwk(jwk).map_err(|e| {
        tracing::warn!("[DirectConnect] Unusable JWKS key: {}", e);
        AppError::Unauthorized
    }))
}

/// Middleware that requires a valid bearer token with the push scope
pub async fn require_bearer(
    State(gate): State<Arc<BearerGate>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return AppError::Unauthorized.into_response();
    };

    match gate.verify(&token).await {
        Ok(_) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim().to_string())
    } else {
        None
    }
}
