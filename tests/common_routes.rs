use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use scaffold_sdk::{app, AppState, Base, BootError, MemoryStorage, Model, Registry, ResourceDesigner};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Category {
    #[serde(flatten)]
    base: Base,
    #[serde(default)]
    label: String,
}

impl Model for Category {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn design(d: &mut ResourceDesigner) {
        d.param("cat")
            .create(|a| {
                a.enabled(true);
            })
            .get(|a| {
                a.enabled(true);
            })
            .delete(|a| {
                a.enabled(true);
            });
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct HealthShadow {
    #[serde(flatten)]
    base: Base,
}

impl Model for HealthShadow {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn design(d: &mut ResourceDesigner) {
        d.endpoint("health").list(|a| {
            a.enabled(true);
        });
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let res = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn categories() -> Router {
    let registry = Registry::new();
    registry.register::<Category>().unwrap();
    registry.compile().unwrap();
    let state = AppState::new(Arc::new(registry), Arc::new(MemoryStorage::new())).with_service_name("catalog");
    app(state).unwrap()
}

#[tokio::test]
async fn health_ready_and_version() {
    let router = categories();
    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(&router, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "ok");

    let (_, body) = get(&router, "/version").await;
    assert_eq!(body["name"], "catalog");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn openapi_lists_enabled_routes() {
    let router = categories();
    let (status, doc) = get(&router, "/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["info"]["title"], "catalog");

    let paths = doc["paths"].as_object().unwrap();
    assert!(paths["/categories"]["post"].is_object());
    assert!(paths["/categories"].get("get").is_none());
    let item = &paths["/categories/{cat}"];
    assert!(item["get"].is_object());
    assert!(item["delete"]["responses"]["204"].is_object());
    assert!(item.get("put").is_none());
}

#[test]
fn app_requires_compiled_registry() {
    let state = AppState::new(Arc::new(Registry::new()), Arc::new(MemoryStorage::new()));
    assert!(matches!(app(state), Err(BootError::NotCompiled)));
}

#[test]
fn resources_cannot_shadow_common_routes() {
    let registry = Registry::new();
    registry.register::<HealthShadow>().unwrap();
    registry.compile().unwrap();
    let state = AppState::new(Arc::new(registry), Arc::new(MemoryStorage::new()));
    assert!(matches!(app(state), Err(BootError::PathConflict(_))));
}
