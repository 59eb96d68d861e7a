//! API route definitions

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .nest("/api/v1", v1_routes())
        .with_state(state)
}

fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/proxies", get(handlers::proxy::list_proxies))
        .route("/proxies/refresh", post(handlers::proxy::refresh_proxies))
        .route("/nodes/:uid", get(handlers::proxy::get_node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, StorageConfig};
    use crate::error::Result;
    use crate::models::{ProxyEndpoint, ProxyNode};
    use crate::normalizer::{nodes_from_subscription, NodeSource};
    use crate::pool::{ProxyManager, RelaySupervisor};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct FixedSource(Vec<ProxyNode>);

    #[async_trait]
    impl NodeSource for FixedSource {
        async fn load(&self) -> Result<Vec<ProxyNode>> {
            Ok(self.0.clone())
        }
    }

    struct AliveRelay;

    #[async_trait]
    impl RelaySupervisor for AliveRelay {
        async fn ensure(&self, _endpoint: &ProxyEndpoint, _backend_uri: &str) -> bool {
            true
        }
        async fn cleanup(&self, _active_ids: &HashSet<String>) {}
        async fn stop_all(&self) {}
        fn status(&self) -> Value {
            json!({})
        }
    }

    async fn app(dir: &TempDir, public_host: &str) -> (Router, Arc<ProxyManager>) {
        let mut config = Config::default();
        config.storage = StorageConfig::in_dir(dir.path());
        config.pool.public_host = public_host.to_string();
        let nodes = nodes_from_subscription(
            "ss://YWVzLTI1Ni1nY206cGFzc0BleGFtcGxlLmNvbTo4Mzg4#US-1\nss://aes-128-gcm:pw@de.example:443#DE-1\n",
            "subscription",
        );
        let manager = Arc::new(ProxyManager::new(
            &config,
            Arc::new(FixedSource(nodes)),
            Arc::new(AliveRelay),
        ));
        manager.refresh().await.unwrap();
        let router = create_router(AppState::new(manager.clone(), Arc::new(config)));
        (router, manager)
    }

    async fn send(app: &Router, method: Method, uri: &str, host: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(host) = host {
            request = request.header("host", host);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, "127.0.0.1").await;

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_reports_counts() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, "127.0.0.1").await;

        let (status, body) = send(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"], 2);
        assert_eq!(body["endpoints"], 4);
        assert!(body["last_refresh"].is_string());
        assert_eq!(body["settings"]["protocols"], json!(["socks5", "http"]));
    }

    #[tokio::test]
    async fn test_list_proxies_with_filters() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, "proxy.example").await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/proxies?protocols=socks5&country=US&count=5",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        let item = &data[0];
        assert_eq!(item["protocol"], "socks5");
        assert_eq!(item["country"]["code"], "US");
        assert_eq!(item["backend_schema"], "ss");
        assert_eq!(item["backend_server"], "example.com");
        assert_eq!(item["backend_port"], 8388);
        assert_eq!(item["available"], true);
        assert_eq!(
            item["endpoint"],
            format!("socks5://proxy.example:{}", item["port"])
        );

        assert_eq!(body["meta"]["requested_count"], 5);
        assert_eq!(body["meta"]["returned_count"], 1);
        assert_eq!(body["meta"]["cached"], false);

        let (_, again) = send(
            &app,
            Method::GET,
            "/api/v1/proxies?protocols=socks5&country=US&count=5",
            None,
        )
        .await;
        assert_eq!(again["meta"]["cached"], true);
    }

    #[tokio::test]
    async fn test_list_proxies_uses_request_host_for_loopback_config() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, "127.0.0.1").await;

        let (_, body) = send(
            &app,
            Method::GET,
            "/api/v1/proxies?protocols=http&random=true",
            Some("gateway.example:8080"),
        )
        .await;
        let item = &body["data"][0];
        assert_eq!(item["public_host"], "gateway.example");
        assert!(item["endpoint"]
            .as_str()
            .unwrap()
            .starts_with("http://gateway.example:"));
        assert_eq!(body["meta"]["random"], true);
        assert!(body["meta"]["cache_expires_at"].is_null());
    }

    #[tokio::test]
    async fn test_list_proxies_rejects_bad_parameters() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, "127.0.0.1").await;

        let (status, body) = send(&app, Method::GET, "/api/v1/proxies?count=500", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("count"));

        let (status, _) = send(&app, Method::GET, "/api/v1/proxies?protocols=ftp", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unmatched_country_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, "127.0.0.1").await;

        let (status, body) = send(&app, Method::GET, "/api/v1/proxies?country=Brazil", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["meta"]["returned_count"], 0);
    }

    #[tokio::test]
    async fn test_refresh_endpoint() {
        let dir = TempDir::new().unwrap();
        let (app, _) = app(&dir, "127.0.0.1").await;

        let (status, body) = send(&app, Method::POST, "/api/v1/proxies/refresh", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["nodes"], 2);
        assert_eq!(body["endpoints"], 4);
    }

    #[tokio::test]
    async fn test_get_node() {
        let dir = TempDir::new().unwrap();
        let (app, manager) = app(&dir, "127.0.0.1").await;
        let uid = manager.select(&[], Some("DE"), 1, false).endpoints[0]
            .node_uid
            .clone();

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/nodes/{uid}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["server"], "de.example");
        assert_eq!(body["schema"], "ss");

        let (status, body) = send(&app, Method::GET, "/api/v1/nodes/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }
}
