//! PostgreSQL storage: one JSONB document table per collection, soft deletes.

use crate::service::ServiceContext;
use crate::sql::{self, qualified_table, QueryBuf};
use crate::storage::{document_id, ListQuery, Storage, StorageError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;

pub struct PgStorage {
    pool: PgPool,
    schema: String,
}

impl PgStorage {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStorage {
            pool,
            schema: schema.into(),
        }
    }

    /// Connect a pool to `database_url`. Creates the database first when missing.
    pub async fn connect(database_url: &str, schema: &str) -> Result<Self, StorageError> {
        ensure_database_exists(database_url).await?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx(e, "connect"))?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema and one document table per collection, if missing.
    pub async fn ensure_tables<'a>(&self, collections: impl IntoIterator<Item = &'a str>) -> Result<(), StorageError> {
        let ddl = format!("CREATE SCHEMA IF NOT EXISTS {}", sql::quoted(&self.schema));
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, &self.schema))?;
        for collection in collections {
            let table = self.table(collection);
            sqlx::query(&sql::create_table(&table))
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx(e, collection))?;
            tracing::debug!(table = %table, "document table ready");
        }
        Ok(())
    }

    fn table(&self, collection: &str) -> String {
        qualified_table(&self.schema, collection)
    }

    async fn fetch_page(&self, q: &QueryBuf) -> Result<Vec<Value>, sqlx::Error> {
        let mut query = sqlx::query_as::<_, (Value,)>(&q.sql);
        for p in &q.params {
            query = query.bind(p.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(payload,)| payload).collect())
    }

    async fn fetch_count(&self, q: &QueryBuf) -> Result<i64, sqlx::Error> {
        let mut query = sqlx::query_as::<_, (i64,)>(&q.sql);
        for p in &q.params {
            query = query.bind(p.as_str());
        }
        let (n,) = query.fetch_one(&self.pool).await?;
        Ok(n)
    }
}

fn map_sqlx(e: sqlx::Error, what: &str) -> StorageError {
    match e {
        sqlx::Error::RowNotFound => StorageError::NotFound(what.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Conflict(format!("{} already exists", what))
        }
        other => {
            tracing::warn!(error = %other, target = %what, "storage query failed");
            StorageError::Unavailable(other.to_string())
        }
    }
}

fn affected_one(rows: u64, what: &str) -> Result<(), StorageError> {
    if rows == 0 {
        Err(StorageError::NotFound(what.to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn create(&self, ctx: &ServiceContext, collection: &str, entity: Value) -> Result<(), StorageError> {
        let id = document_id(&entity)?.to_string();
        let what = format!("{}/{}", collection, id);
        let stmt = sql::insert(&self.table(collection));
        tracing::debug!(parent: &ctx.logger(), sql = %stmt, "insert");
        sqlx::query(&stmt)
            .bind(&id)
            .bind(&entity)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, &what))?;
        Ok(())
    }

    async fn delete(&self, ctx: &ServiceContext, collection: &str, id: &str) -> Result<(), StorageError> {
        let what = format!("{}/{}", collection, id);
        let stmt = sql::soft_delete(&self.table(collection));
        tracing::debug!(parent: &ctx.logger(), sql = %stmt, "soft delete");
        let done = sqlx::query(&stmt)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, &what))?;
        affected_one(done.rows_affected(), &what)
    }

    async fn update(&self, ctx: &ServiceContext, collection: &str, entity: Value) -> Result<(), StorageError> {
        let id = document_id(&entity)?.to_string();
        let what = format!("{}/{}", collection, id);
        let stmt = sql::replace_payload(&self.table(collection));
        tracing::debug!(parent: &ctx.logger(), sql = %stmt, "replace");
        let done = sqlx::query(&stmt)
            .bind(&id)
            .bind(&entity)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, &what))?;
        affected_one(done.rows_affected(), &what)
    }

    async fn patch(
        &self,
        ctx: &ServiceContext,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<(), StorageError> {
        let what = format!("{}/{}", collection, id);
        let stmt = sql::merge_payload(&self.table(collection));
        tracing::debug!(parent: &ctx.logger(), sql = %stmt, fields = partial.len(), "merge");
        let done = sqlx::query(&stmt)
            .bind(id)
            .bind(Value::Object(partial))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, &what))?;
        affected_one(done.rows_affected(), &what)
    }

    async fn get(&self, ctx: &ServiceContext, collection: &str, id: &str) -> Result<Value, StorageError> {
        let what = format!("{}/{}", collection, id);
        let stmt = sql::select_by_id(&self.table(collection));
        tracing::debug!(parent: &ctx.logger(), sql = %stmt, "select");
        let (payload,): (Value,) = sqlx::query_as(&stmt)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, &what))?;
        Ok(payload)
    }

    async fn list(
        &self,
        ctx: &ServiceContext,
        collection: &str,
        query: &ListQuery,
    ) -> Result<(Vec<Value>, u64), StorageError> {
        let table = self.table(collection);
        let page = sql::select_page(&table, query);
        let count = sql::count(&table, query);
        tracing::debug!(parent: &ctx.logger(), sql = %page.sql, params = page.params.len(), "list");
        let items = self.fetch_page(&page).await.map_err(|e| map_sqlx(e, collection))?;
        let total = self.fetch_count(&count).await.map_err(|e| map_sqlx(e, collection))?;
        Ok((items, total.max(0) as u64))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| map_sqlx(e, "ping"))
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StorageError> {
    let (admin_url, db_name) = split_database_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| StorageError::PreconditionFailed(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await.map_err(|e| map_sqlx(e, "postgres"))?;
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await
        .map_err(|e| map_sqlx(e, &db_name))?;
    if !exists {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await
            .map_err(|e| map_sqlx(e, &db_name))?;
    }
    Ok(())
}

/// (admin url pointing at `postgres`, database name)
fn split_database_url(url: &str) -> Result<(String, String), StorageError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StorageError::PreconditionFailed("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let mut parts = path_and_query.splitn(2, '?');
    let db_name = parts.next().unwrap_or("").trim();
    let query = parts.next().map(|q| format!("?{}", q)).unwrap_or_default();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres{}", base, query), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_is_split_into_admin_url_and_name() {
        let (admin, name) = split_database_url("postgres://u:p@localhost:5432/shop?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres?sslmode=disable");
        assert_eq!(name, "shop");
        assert!(split_database_url("nopath").is_err());
    }

    #[test]
    fn zero_rows_is_not_found() {
        assert!(affected_one(1, "x").is_ok());
        assert_eq!(affected_one(0, "users/1"), Err(StorageError::NotFound("users/1".into())));
    }
}
