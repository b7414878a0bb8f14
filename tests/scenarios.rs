use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use scaffold_sdk::{
    app, AppError, AppState, Base, Creator, Getter, Hooks, Lister, MemoryStorage, Model, PolicySet, Registry,
    ResourceDesigner, ServiceContext, Services,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>, headers: &[(&str, &str)]) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

fn router(registry: Registry, storage: Arc<MemoryStorage>) -> Router {
    registry.compile().unwrap();
    app(AppState::new(Arc::new(registry), storage)).unwrap()
}

#[derive(Default, Clone)]
struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    fn push(&self, s: &str) {
        self.0.lock().unwrap().push(s.to_string());
    }

    fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

// --- users: create without service code ---

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct User {
    #[serde(flatten)]
    base: Base,
    #[serde(default)]
    name: String,
}

impl Model for User {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn design(d: &mut ResourceDesigner) {
        d.create(|a| {
            a.enabled(true).service(false);
        });
    }
}

struct UserHooks(Trace);

#[async_trait]
impl Hooks<User> for UserHooks {
    async fn create_before(&self, _ctx: &ServiceContext, _e: &mut User) -> Result<(), AppError> {
        self.0.push("before");
        Ok(())
    }

    async fn create_after(&self, _ctx: &ServiceContext, _e: &mut User) -> Result<(), AppError> {
        self.0.push("after");
        Ok(())
    }
}

#[tokio::test]
async fn create_without_service_skips_hooks() {
    let trace = Trace::default();
    let registry = Registry::new();
    registry.register::<User>().unwrap();
    registry
        .register_services::<User>(Services::new().hooks(UserHooks(trace.clone())))
        .unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let router = router(registry, storage.clone());

    let (status, body) = send(&router, "POST", "/users", Some(json!({"name": "a"})), &[]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(!body["data"]["id"].as_str().unwrap().is_empty());
    assert!(body["data"]["created_at"].is_string());
    assert_eq!(body["data"]["name"], "a");
    assert!(trace.snapshot().is_empty());
    assert_eq!(storage.len("users"), 1);
}

// --- apps: custom list result ---

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct App {
    #[serde(flatten)]
    base: Base,
    #[serde(default)]
    namespace: String,
}

#[derive(Serialize)]
struct AppRsp {
    namespace: String,
    apps: Vec<App>,
}

impl Model for App {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn design(d: &mut ResourceDesigner) {
        d.endpoint("apps").list(|a| {
            a.enabled(true)
                .service(true)
                .payload::<HashMap<String, String>>()
                .result::<AppRsp>();
        });
    }
}

struct AppLister(Arc<AtomicBool>);

#[async_trait]
impl Lister<App> for AppLister {
    type Request = HashMap<String, String>;
    type Response = AppRsp;

    async fn list(&self, _ctx: &ServiceContext, req: Self::Request) -> Result<AppRsp, AppError> {
        self.0.store(true, Ordering::SeqCst);
        Ok(AppRsp {
            namespace: req.get("namespace").cloned().unwrap_or_default(),
            apps: vec![App {
                namespace: "default".into(),
                ..Default::default()
            }],
        })
    }
}

#[tokio::test]
async fn custom_list_handler_shapes_response() {
    let ran = Arc::new(AtomicBool::new(false));
    let registry = Registry::new();
    registry.register::<App>().unwrap();
    registry
        .register_services::<App>(Services::new().lister(AppLister(ran.clone())))
        .unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));

    let (status, body) = send(&router, "GET", "/apps?namespace=default", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(body["data"]["namespace"], "default");
    assert_eq!(body["data"]["apps"].as_array().unwrap().len(), 1);
}

// --- items: hook order, failures, disabled verbs, round trips ---

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Item {
    #[serde(flatten)]
    base: Base,
    #[serde(default)]
    name: String,
    #[serde(default)]
    qty: i64,
}

impl Model for Item {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn design(d: &mut ResourceDesigner) {
        d.create(|a| {
            a.enabled(true);
        })
        .get(|a| {
            a.enabled(true);
        })
        .update(|a| {
            a.enabled(true);
        })
        .patch(|a| {
            a.enabled(true);
        })
        .list(|a| {
            a.enabled(true);
        })
        .delete(|a| {
            a.enabled(false);
        });
    }
}

#[derive(Default)]
struct ItemHooks {
    trace: Trace,
    reject_updates: bool,
}

#[async_trait]
impl Hooks<Item> for ItemHooks {
    async fn create_before(&self, _ctx: &ServiceContext, _e: &mut Item) -> Result<(), AppError> {
        self.trace.push("b");
        Ok(())
    }

    async fn create_after(&self, _ctx: &ServiceContext, _e: &mut Item) -> Result<(), AppError> {
        self.trace.push("a");
        Ok(())
    }

    async fn update_before(&self, _ctx: &ServiceContext, e: &mut Item) -> Result<(), AppError> {
        if self.reject_updates {
            return Err(AppError::PreconditionFailed(format!("{} is locked", e.base.id)));
        }
        Ok(())
    }

    async fn update_after(&self, _ctx: &ServiceContext, _e: &mut Item) -> Result<(), AppError> {
        self.trace.push("update_after");
        Ok(())
    }

    async fn get_after(&self, _ctx: &ServiceContext, e: &mut Item) -> Result<(), AppError> {
        if e.name == "explode" {
            panic!("get_after blew up");
        }
        Ok(())
    }
}

struct RecordingCreator(Trace);

#[async_trait]
impl Creator<Item> for RecordingCreator {
    type Request = Item;
    type Response = Item;

    async fn create(&self, _ctx: &ServiceContext, mut req: Item) -> Result<Item, AppError> {
        self.0.push("m");
        req.base.id = "made-by-main".into();
        Ok(req)
    }
}

#[tokio::test]
async fn hooks_wrap_main_handler_in_order() {
    let trace = Trace::default();
    let registry = Registry::new();
    registry.register::<Item>().unwrap();
    registry
        .register_services::<Item>(
            Services::new()
                .hooks(ItemHooks {
                    trace: trace.clone(),
                    reject_updates: false,
                })
                .creator(RecordingCreator(trace.clone())),
        )
        .unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));

    let (status, body) = send(&router, "POST", "/items", Some(json!({"name": "x"})), &[]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["id"], "made-by-main");
    assert_eq!(trace.snapshot(), vec!["b", "m", "a"]);
}

#[tokio::test]
async fn failing_before_hook_stops_the_call() {
    let trace = Trace::default();
    let registry = Registry::new();
    registry.register::<Item>().unwrap();
    registry
        .register_services::<Item>(Services::new().hooks(ItemHooks {
            trace: trace.clone(),
            reject_updates: true,
        }))
        .unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));

    let (_, created) = send(&router, "POST", "/items", Some(json!({"name": "x", "qty": 1})), &[]).await;
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/items/{}", id);

    let (status, body) = send(&router, "PUT", &uri, Some(json!({"name": "y", "qty": 2})), &[]).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["code"], "precondition_failed");
    assert!(!trace.snapshot().contains(&"update_after".to_string()));

    let (_, stored) = send(&router, "GET", &uri, None, &[]).await;
    assert_eq!(stored["data"]["name"], "x");
    assert_eq!(stored["data"]["qty"], 1);
}

#[tokio::test]
async fn disabled_verb_is_not_routed() {
    let registry = Registry::new();
    registry.register::<Item>().unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));

    let (status, body) = send(&router, "DELETE", "/items/1", None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(&router, "GET", "/nothing-here", None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_update_patch_get_round_trip() {
    let registry = Registry::new();
    registry.register::<Item>().unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));
    let alice = [("X-User-ID", "alice"), ("X-User-Tenant", "t1")];

    let (status, created) = send(
        &router,
        "POST",
        "/items",
        Some(json!({"name": "bolt", "qty": 3})),
        &alice,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/items/{}", id);
    assert_eq!(created["data"]["created_by"], "alice");
    assert_eq!(created["data"]["tenant"], "t1");

    let (status, got) = send(&router, "GET", &uri, None, &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got["data"], created["data"]);

    let (status, _) = send(&router, "PUT", &uri, Some(json!({"name": "nut", "qty": 4})), &alice).await;
    assert_eq!(status, StatusCode::OK);
    let (_, got) = send(&router, "GET", &uri, None, &alice).await;
    assert_eq!(got["data"]["name"], "nut");
    assert_eq!(got["data"]["qty"], 4);
    assert_eq!(got["data"]["created_by"], "alice");

    let (status, patched) = send(&router, "PATCH", &uri, Some(json!({"qty": 9})), &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["data"]["name"], "nut");
    assert_eq!(patched["data"]["qty"], 9);

    let (status, listed) = send(&router, "GET", "/items?limit=10", None, &alice).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["meta"]["total"], 1);
    assert_eq!(listed["data"][0]["id"], id.as_str());

    let (status, _) = send(&router, "GET", "/items/missing", None, &alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let registry = Registry::new();
    registry.register::<Item>().unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));

    let (status, _) = send(&router, "POST", "/items", None, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&router, "POST", "/items", Some(json!({"qty": "many"})), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&router, "GET", "/items?limit=lots", None, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn panicking_hook_becomes_internal_error() {
    let registry = Registry::new();
    registry.register::<Item>().unwrap();
    registry
        .register_services::<Item>(Services::new().hooks(ItemHooks::default()))
        .unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));

    let (_, created) = send(&router, "POST", "/items", Some(json!({"name": "explode"})), &[]).await;
    let uri = format!("/items/{}", created["data"]["id"].as_str().unwrap());
    let (status, body) = send(&router, "GET", &uri, None, &[]).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal_error");
    assert_eq!(body["error"]["message"], "internal error during get after");

    // The router keeps serving after a panic.
    let (status, _) = send(&router, "POST", "/items", Some(json!({"name": "fine"})), &[]).await;
    assert_eq!(status, StatusCode::CREATED);
}

// --- slow main handler: deadlines ---

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Report {
    #[serde(flatten)]
    base: Base,
}

impl Model for Report {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn design(d: &mut ResourceDesigner) {
        d.get(|a| {
            a.enabled(true);
        });
    }
}

struct SlowGetter;

#[async_trait]
impl Getter<Report> for SlowGetter {
    type Request = Report;
    type Response = Report;

    async fn get(&self, _ctx: &ServiceContext, req: Report) -> Result<Report, AppError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(req)
    }
}

#[tokio::test]
async fn request_timeout_cancels_the_call() {
    let registry = Registry::new();
    registry.register::<Report>().unwrap();
    registry
        .register_services::<Report>(Services::new().getter(SlowGetter))
        .unwrap();
    let router = router(registry, Arc::new(MemoryStorage::new()));

    let (status, body) = send(&router, "GET", "/reports/r1", None, &[("X-Request-Timeout-Ms", "20")]).await;
    assert_eq!(status.as_u16(), 499);
    assert_eq!(body["error"]["code"], "canceled");

    let (status, _) = send(&router, "GET", "/reports/r1", None, &[("X-Request-Timeout-Ms", "soon")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_id_is_echoed() {
    let registry = Registry::new();
    registry.register::<Item>().unwrap();
    registry.compile().unwrap();
    let router = app(AppState::new(Arc::new(registry), Arc::new(MemoryStorage::new()))).unwrap();

    let req = Request::builder()
        .uri("/items/none")
        .header("X-Request-ID", "req-42")
        .body(Body::empty())
        .unwrap();
    let res = router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(res.headers()["X-Request-ID"], "req-42");

    let req = Request::builder().uri("/items").body(Body::empty()).unwrap();
    let res = router.oneshot(req).await.unwrap();
    assert!(!res.headers()["X-Request-ID"].is_empty());
}

// --- documents: tenant-scoped authorization ---

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Doc {
    #[serde(flatten)]
    base: Base,
    #[serde(default)]
    title: String,
}

impl Model for Doc {
    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }

    fn design(d: &mut ResourceDesigner) {
        d.create(|a| {
            a.enabled(true);
        })
        .get(|a| {
            a.enabled(true);
        })
        .patch(|a| {
            a.enabled(true);
        })
        .list(|a| {
            a.enabled(true);
        });
    }
}

#[tokio::test]
async fn cross_tenant_access_needs_super_admin() {
    let registry = Registry::new();
    registry.register::<Doc>().unwrap();
    registry.compile().unwrap();
    let policy = PolicySet::parse(
        "# members may read and write docs\n\
         p, alice, /docs, *\n\
         p, alice, /docs/*, *\n\
         p, bob, /docs, *\n\
         p, bob, /docs/*, *\n",
    )
    .unwrap();
    let state = AppState::new(Arc::new(registry), Arc::new(MemoryStorage::new())).with_authorizer(policy);
    let router = app(state).unwrap();

    let bob = [("X-User-ID", "bob"), ("X-User-Tenant", "t2")];
    let (status, created) = send(&router, "POST", "/docs", Some(json!({"title": "t2 secret"})), &bob).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["tenant"], "t2");
    let uri = format!("/docs/{}", created["data"]["id"].as_str().unwrap());

    // Naming the other tenant is denied by policy; omitting it is denied by ownership.
    let targeted = [("X-User-ID", "alice"), ("X-User-Tenant", "t1"), ("X-Tenant-ID", "t2")];
    let own = [("X-User-ID", "alice"), ("X-User-Tenant", "t1")];
    for headers in [&targeted[..], &own[..]] {
        let (status, body) = send(&router, "GET", &uri, None, headers).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");
    }
    let (status, _) = send(&router, "PATCH", &uri, Some(json!({"title": "mine"})), &own).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, listed) = send(&router, "GET", "/docs", None, &own).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["meta"]["total"], 0);

    let admin = [("X-User-ID", "super_admin"), ("X-User-Tenant", "root"), ("X-Tenant-ID", "t2")];
    let (status, body) = send(&router, "GET", &uri, None, &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "t2 secret");

    let (status, body) = send(&router, "GET", &uri, None, &bob).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created_by"], "bob");

    let (status, _) = send(&router, "GET", &uri, None, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
