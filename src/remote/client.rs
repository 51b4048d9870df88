//! Remote device directory client
//!
//! Owns the access-token lifecycle. Every failure resolves to a
//! [`RemoteError`]; callers branch on it instead of handling panics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{AuthConfig, RemoteConfig};
use crate::error::RemoteError;
use crate::remote::token::{now_ms, AuthToken, TokenRequest, TokenResponse};

pub struct RemoteClient {
    /// Parsed once; a malformed URL keeps the raw string for diagnostics
    base_url: Result<Url, String>,
    display_name: String,
    auth: AuthConfig,
    http_client: Client,
    token: Mutex<AuthToken>,
    /// Bumped after every refresh attempt so waiters can reuse its result
    refresh_generation: AtomicU64,
}

/// Accept only absolute http(s) URLs with a host
pub fn validate_base_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|_| raw.to_string())?;
    let has_host = url.host_str().map(|h| !h.is_empty()).unwrap_or(false);

    if matches!(url.scheme(), "http" | "https") && has_host {
        Ok(url)
    } else {
        Err(raw.to_string())
    }
}

fn endpoint_url(base: &Url, path: &str) -> Result<Url, RemoteError> {
    let base = base.as_str();
    let path = path.trim_start_matches('/');
    let joined = if base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };
    Url::parse(&joined).map_err(|_| RemoteError::Configuration(joined))
}

impl RemoteClient {
    pub fn new(remote: &RemoteConfig, auth: &AuthConfig) -> Result<Self, RemoteError> {
        let base_url = validate_base_url(&remote.base_url);
        if let Err(raw) = &base_url {
            tracing::error!("[RemoteApi] Invalid Remote API URL - {}", raw);
        }

        let timeout = Duration::from_secs(remote.timeout_secs.max(1));
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)));

        if !remote.reject_invalid_cert {
            tracing::warn!(
                "[RemoteApi] Certificate validation DISABLED for {}: invalid TLS certificates will be accepted",
                remote.display_name
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http_client = builder
            .build()
            .map_err(|e| RemoteError::Transport(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            display_name: remote.display_name.clone(),
            auth: auth.clone(),
            http_client,
            token: Mutex::new(AuthToken::default()),
            refresh_generation: AtomicU64::new(0),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_ok()
    }

    /// Copy of the current token state
    pub async fn token(&self) -> AuthToken {
        self.token.lock().await.clone()
    }

    /// Issue a request against the remote directory.
    ///
    /// `path` is relative to the base URL. A body is only sent with POST
    /// and PATCH.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let base = self.base_url.as_ref().map_err(|raw| {
            tracing::error!("[RemoteApi] Invalid Remote API URL - {}", raw);
            RemoteError::Configuration(raw.clone())
        })?;
        let url = endpoint_url(base, path)?;

        let authorization = if self.auth.enabled {
            match self.authorization().await {
                Ok(header) => Some(header),
                Err(e) => {
                    tracing::error!(
                        "[RemoteApi] No valid {} token, {} {} not sent",
                        self.display_name,
                        method,
                        url
                    );
                    return Err(e);
                }
            }
        } else {
            None
        };

        let mut request = self
            .http_client
            .request(method.clone(), url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(header) = authorization {
            request = request.header(AUTHORIZATION, header);
        }

        if method == Method::POST || method == Method::PATCH {
            if let Some(body) = body {
                request = request.json(body);
            }
        }

        let result = Self::send(request).await;
        if let Err(e) = &result {
            tracing::error!("[RemoteApi] {} {} Failure: {}", self.display_name, method, e);
        }
        result
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let resp = request.send().await?.error_for_status()?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Post client credentials to the issuer and store the new token.
    ///
    /// On failure the token is marked invalid; its other fields are kept.
    pub async fn fetch_token(&self) -> Result<(), RemoteError> {
        let mut token = self.token.lock().await;
        let result = self.refresh_locked(&mut token).await;
        self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    /// Authorization header value, refreshing the token first if needed.
    ///
    /// Callers that queue behind an in-flight refresh reuse its outcome
    /// instead of posting to the issuer again.
    async fn authorization(&self) -> Result<String, RemoteError> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        let mut token = self.token.lock().await;

        if token.is_usable_at(now_ms()) {
            return Ok(token.authorization());
        }

        if self.refresh_generation.load(Ordering::Acquire) == observed {
            token.valid = false;
            // Failure already recorded on the token and logged
            let _ = self.refresh_locked(&mut token).await;
            self.refresh_generation.fetch_add(1, Ordering::AcqRel);
        }

        if token.is_usable_at(now_ms()) {
            Ok(token.authorization())
        } else {
            Err(RemoteError::Unauthorized(self.display_name.clone()))
        }
    }

    async fn refresh_locked(&self, token: &mut AuthToken) -> Result<(), RemoteError> {
        match self.request_token().await {
            Ok(response) => {
                token.apply(response, now_ms());
                tracing::info!("[RemoteApi] {} token fetch success", self.display_name);
                Ok(())
            }
            Err(e) => {
                token.valid = false;
                tracing::error!("[RemoteApi] {} token fetch failure: {}", self.display_name, e);
                Err(e)
            }
        }
    }

    async fn request_token(&self) -> Result<TokenResponse, RemoteError> {
        let raw = self.auth.issuer_url("oauth/token");
        let url = validate_base_url(&raw).map_err(RemoteError::Configuration)?;

        let body = TokenRequest {
            client_id: &self.auth.client_id,
            client_secret: &self.auth.client_secret,
            audience: &self.auth.audience,
            grant_type: "client_credentials",
        };

        let resp = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote_config(base_url: &str) -> RemoteConfig {
        RemoteConfig {
            base_url: base_url.to_string(),
            ..RemoteConfig::default()
        }
    }

    fn auth_config(server: &MockServer) -> AuthConfig {
        AuthConfig {
            enabled: true,
            issuer: format!("{}/", server.uri()),
            audience: "https://devices.example/api".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn token_body() -> Value {
        json!({
            "access_token": "abc",
            "token_type": "Bearer",
            "expires_in": 86400,
            "scope": "read:devices"
        })
    }

    #[test]
    fn test_validate_base_url() {
        assert!(validate_base_url("http://192.168.1.201:5000/pins").is_ok());
        assert!(validate_base_url("https://devices.example").is_ok());
        assert!(validate_base_url("192.168.1.201:5000").is_err());
        assert!(validate_base_url("ftp://devices.example").is_err());
        assert!(validate_base_url("").is_err());
        assert!(validate_base_url("http://").is_err());
    }

    #[test]
    fn test_endpoint_url_joins_with_single_slash() {
        let with_slash = Url::parse("http://host/pins/").unwrap();
        let without = Url::parse("http://host/pins").unwrap();
        assert_eq!(endpoint_url(&with_slash, "7").unwrap().as_str(), "http://host/pins/7");
        assert_eq!(endpoint_url(&without, "7").unwrap().as_str(), "http://host/pins/7");
        assert_eq!(endpoint_url(&without, "").unwrap().as_str(), "http://host/pins/");
    }

    #[tokio::test]
    async fn test_call_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &AuthConfig::default()).unwrap();
        let value = client.call(Method::GET, "", None).await.unwrap();
        assert_eq!(value, json!([{ "id": 1 }]));
    }

    #[tokio::test]
    async fn test_patch_sends_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/7"))
            .and(body_json(json!({ "id": 7, "on": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7, "on": true })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &AuthConfig::default()).unwrap();
        let body = json!({ "id": 7, "on": true });
        client.call(Method::PATCH, "7", Some(&body)).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &AuthConfig::default()).unwrap();
        let err = client.call(Method::GET, "", None).await.unwrap_err();
        assert_eq!(err, RemoteError::Status(500));
        assert_eq!(err.sentinel(), json!({ "errno": "HTTP status 500" }));
    }

    #[tokio::test]
    async fn test_invalid_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &AuthConfig::default()).unwrap();
        let err = client.call(Method::GET, "", None).await.unwrap_err();
        assert!(matches!(err, RemoteError::Decode(_)));
    }

    #[tokio::test]
    async fn test_malformed_base_url_never_hits_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(0)
            .mount(&server)
            .await;

        let client = RemoteClient::new(&remote_config("not a url"), &auth_config(&server)).unwrap();
        assert!(!client.is_configured());

        let err = client.call(Method::GET, "", None).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_timeout_resolves_to_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let config = RemoteConfig {
            timeout_secs: 1,
            ..remote_config(&server.uri())
        };
        let client = RemoteClient::new(&config, &AuthConfig::default()).unwrap();
        let err = client.call(Method::GET, "", None).await.unwrap_err();
        assert_eq!(err, RemoteError::Timeout);
    }

    #[tokio::test]
    async fn test_token_fetched_and_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_json(json!({
                "client_id": "client",
                "client_secret": "secret",
                "audience": "https://devices.example/api",
                "grant_type": "client_credentials"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/devices/"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let base = format!("{}/devices", server.uri());
        let client = RemoteClient::new(&remote_config(&base), &auth_config(&server)).unwrap();

        client.call(Method::GET, "", None).await.unwrap();
        // Second call reuses the cached token
        client.call(Method::GET, "", None).await.unwrap();

        let token = client.token().await;
        assert!(token.valid);
        assert_eq!(token.scope, "read:devices");
    }

    #[tokio::test]
    async fn test_issuer_without_trailing_slash_posts_to_token_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let auth = AuthConfig {
            issuer: server.uri(),
            ..auth_config(&server)
        };
        let client = RemoteClient::new(&remote_config(&server.uri()), &auth).unwrap();
        client.fetch_token().await.unwrap();
        assert!(client.token().await.valid);
    }

    #[tokio::test]
    async fn test_token_failure_blocks_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &auth_config(&server)).unwrap();
        let err = client.call(Method::GET, "", None).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized(_)));
        assert!(!client.token().await.valid);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &auth_config(&server)).unwrap();
        *client.token.lock().await = AuthToken {
            access_token: "old".to_string(),
            token_type: "Bearer".to_string(),
            expires_at_ms: 42,
            scope: "read:devices".to_string(),
            valid: true,
        };

        assert_eq!(client.fetch_token().await, Err(RemoteError::Status(503)));

        let token = client.token().await;
        assert!(!token.valid);
        assert_eq!(token.access_token, "old");
        assert_eq!(token.expires_at_ms, 42);
    }

    #[tokio::test]
    async fn test_token_near_expiry_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &auth_config(&server)).unwrap();
        *client.token.lock().await = AuthToken {
            access_token: "stale".to_string(),
            token_type: "Bearer".to_string(),
            expires_at_ms: now_ms() + 30_000,
            scope: String::new(),
            valid: true,
        };

        client.call(Method::GET, "", None).await.unwrap();
        assert_eq!(client.token().await.access_token, "abc");
    }

    #[tokio::test]
    async fn test_concurrent_refresh_posts_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body())
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &auth_config(&server)).unwrap();
        let (a, b) = tokio::join!(
            client.call(Method::GET, "", None),
            client.call(Method::GET, "", None)
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_failed_refresh_posts_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            RemoteClient::new(&remote_config(&server.uri()), &auth_config(&server)).unwrap();
        let (a, b) = tokio::join!(
            client.call(Method::GET, "", None),
            client.call(Method::GET, "", None)
        );
        assert!(matches!(a, Err(RemoteError::Unauthorized(_))));
        assert!(matches!(b, Err(RemoteError::Unauthorized(_))));
    }
}
