//! API module - push listener routes

pub mod auth_middleware;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, patch},
    Router,
};

use crate::api::auth_middleware::{require_bearer, BearerGate};
use crate::sync::AccessoryRegistry;

/// State shared by the listener handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<AccessoryRegistry>,
    /// Display name of the remote directory, used in diagnostics
    pub source: String,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(registry: Arc<AccessoryRegistry>, source: impl Into<String>) -> Self {
        Self {
            registry,
            source: source.into(),
            started_at: Instant::now(),
        }
    }
}

/// Listener router; the push route sits behind the bearer gate when one is given
pub fn routes(state: ApiState, gate: Option<Arc<BearerGate>>) -> Router {
    let mut push = Router::new()
        .route("/api/", patch(handlers::update_device))
        .route("/api", patch(handlers::update_device));

    if let Some(gate) = gate {
        push = push.route_layer(middleware::from_fn_with_state(gate, require_bearer));
    }

    Router::new()
        .route("/", get(handlers::status_page))
        .route("/health", get(handlers::health_check))
        .merge(push)
        .fallback(handlers::not_found)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::AccessoryBridge;
    use crate::config::{AuthConfig, ListenerConfig, RemoteConfig, SetAcknowledgement};
    use crate::models::{AccessoryRecord, RemoteDevice};
    use crate::remote::RemoteClient;
    use crate::sync::Slot;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn registry_with_light() -> Arc<AccessoryRegistry> {
        let device: RemoteDevice = serde_json::from_value(json!({
            "id": 7,
            "uuid": "light-7",
            "name": "Porch",
            "type": "Lightbulb",
            "characteristics": { "on": false, "brightness": 40 }
        }))
        .unwrap();
        let remote = RemoteConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..RemoteConfig::default()
        };
        let client = Arc::new(RemoteClient::new(&remote, &AuthConfig::default()).unwrap());
        let bridge = AccessoryBridge::new(
            AccessoryRecord::from_device(device),
            client,
            SetAcknowledgement::Optimistic,
        )
        .unwrap();

        let registry = Arc::new(AccessoryRegistry::new());
        registry
            .insert_if_absent("light-7".into(), Slot::Bridged(Arc::new(bridge)))
            .await;
        registry
    }

    fn push_request(body: Value, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("PATCH")
            .uri("/api/")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint_returns_200() {
        let app = routes(ApiState::new(Arc::new(AccessoryRegistry::new()), "Remote API"), None);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_push_before_sync_is_not_found() {
        let app = routes(ApiState::new(Arc::new(AccessoryRegistry::new()), "Remote API"), None);

        let response = app
            .oneshot(push_request(json!({ "uuid": "light-7", "on": true }), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_text(response).await,
            "WARNING: No devices synchronised from Remote API"
        );
    }

    #[tokio::test]
    async fn test_push_unknown_uuid_leaves_registry_untouched() {
        let registry = registry_with_light().await;
        let before = registry.summaries().await;
        let app = routes(ApiState::new(registry.clone(), "Remote API"), None);

        let response = app
            .oneshot(push_request(json!({ "uuid": "nope", "on": true }), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.starts_with("WARNING: "));
        assert_eq!(registry.summaries().await, before);
        let bridge = registry.bridge("light-7").await.unwrap();
        assert_eq!(
            bridge.cached_value(crate::capability::Capability::On).await,
            Some(json!(false))
        );
    }

    #[tokio::test]
    async fn test_push_applies_and_returns_snapshot() {
        let registry = registry_with_light().await;
        let app = routes(ApiState::new(registry, "Remote API"), None);

        let response = app
            .oneshot(push_request(
                json!({ "uuid": "light-7", "On": true, "Brightness": 150 }),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["uuid"], "light-7");
        assert_eq!(body["characteristics"]["on"], json!(true));
        assert_eq!(body["characteristics"]["brightness"], json!(40));
    }

    #[tokio::test]
    async fn test_malformed_push_is_bad_request() {
        let registry = registry_with_light().await;
        let app = routes(ApiState::new(registry, "Remote API"), None);

        let response = app
            .oneshot(push_request(json!({ "on": true }), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_page_lists_devices() {
        let registry = registry_with_light().await;
        let app = routes(ApiState::new(registry, "Remote API"), None);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<td>7</td><td>Porch</td><td>light-7</td><td>Lightbulb</td>"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = routes(ApiState::new(Arc::new(AccessoryRegistry::new()), "Remote API"), None);

        let response = app
            .oneshot(Request::builder().uri("/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_push_gate() {
        let listener = ListenerConfig {
            require_auth: true,
            shared_secret: Some("test_secret".into()),
            ..ListenerConfig::default()
        };
        let gate = Arc::new(BearerGate::new(&AuthConfig::default(), &listener));
        let registry = registry_with_light().await;
        let app = routes(ApiState::new(registry, "Remote API"), Some(gate));

        let token = |scope: &str| {
            let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
            encode(
                &Header::default(),
                &json!({ "scope": scope, "exp": exp }),
                &EncodingKey::from_secret(b"test_secret"),
            )
            .unwrap()
        };
        let body = json!({ "uuid": "light-7", "on": true });

        let response = app
            .clone()
            .oneshot(push_request(body.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(push_request(body.clone(), Some(token("read:api").as_str())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(push_request(body, Some(token("write:api").as_str())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Status page stays open
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
