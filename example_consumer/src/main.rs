//! Example consumer: a separate Rust project that uses scaffold-sdk as a dependency.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Set `DATABASE_URL` to store entities in Postgres; otherwise they live in memory.

use async_trait::async_trait;
use scaffold_sdk::{
    app, init_logging, AppError, AppState, Base, Diagnostics, Hooks, Lister, MemoryStorage, Model, PgStorage,
    Registry, ResourceDesigner, ServiceContext, Services, Settings, Storage, DEFAULT_LOG_DIRECTIVE,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct User {
    #[serde(flatten)]
    base: Base,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
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
        .delete(|a| {
            a.enabled(true);
        })
        .list(|a| {
            a.enabled(true);
        });
    }
}

struct UserHooks;

#[async_trait]
impl Hooks<User> for UserHooks {
    async fn create_before(&self, _ctx: &ServiceContext, user: &mut User) -> Result<(), AppError> {
        if user.name.trim().is_empty() {
            return Err(AppError::BadRequest("name is required".into()));
        }
        user.email = user.email.to_lowercase();
        Ok(())
    }
}

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
    apps: Vec<String>,
}

impl Model for App {
    fn design(d: &mut ResourceDesigner) {
        d.endpoint("apps").list(|a| {
            a.enabled(true)
                .payload::<HashMap<String, String>>()
                .result::<AppRsp>();
        });
    }

    fn base(&self) -> &Base {
        &self.base
    }

    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
}

struct AppLister;

#[async_trait]
impl Lister<App> for AppLister {
    type Request = HashMap<String, String>;
    type Response = AppRsp;

    async fn list(&self, ctx: &ServiceContext, req: Self::Request) -> Result<AppRsp, AppError> {
        let namespace = req.get("namespace").cloned().unwrap_or_else(|| "default".into());
        tracing::info!(parent: &ctx.logger(), namespace = %namespace, "listing apps");
        Ok(AppRsp {
            namespace,
            apps: vec!["console".into(), "billing".into()],
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    init_logging(DEFAULT_LOG_DIRECTIVE);

    let registry = Registry::new();
    registry.register::<User>()?;
    registry.register::<App>()?;
    registry.register_services::<User>(Services::new().hooks(UserHooks))?;
    registry.register_services::<App>(Services::new().lister(AppLister))?;
    registry.compile()?;

    let storage: Arc<dyn Storage> = match &settings.database_url {
        Some(url) => {
            let pg = PgStorage::connect(url, &settings.database_schema).await?;
            pg.ensure_tables(registry.enumerate().iter().map(|r| r.endpoint.as_str()))
                .await?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Arc::new(MemoryStorage::new())
        }
    };

    let state = AppState::new(Arc::new(registry), storage)
        .with_service_name(settings.service_name.clone())
        .with_body_limit(settings.body_limit_bytes);
    let diagnostics = Diagnostics::new(
        settings.service_name.clone(),
        settings.temp_dir.clone(),
        settings.diagnostics.clone(),
        state.stats.clone(),
    );
    diagnostics.start().await?;

    let router = app(state)?;
    let listener = TcpListener::bind(&settings.listen_addr).await?;
    tracing::info!("{} listening on http://{}", settings.service_name, listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    diagnostics.stop().await;
    Ok(())
}
