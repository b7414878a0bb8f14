//! Storage collaborator: JSON documents grouped by collection (the resource endpoint).

mod memory;
mod postgres;
mod predicate;

pub use memory::MemoryStorage;
pub use postgres::{ensure_database_exists, PgStorage};
pub use predicate::{CompareOp, Condition, Predicate};

use crate::dsl::validator::validate_param;
use crate::error::AppError;
use crate::service::ServiceContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Persistence used by the default pipeline operations.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Insert a document; its `id` field must be set.
    async fn create(&self, ctx: &ServiceContext, collection: &str, entity: Value) -> Result<(), StorageError>;

    async fn delete(&self, ctx: &ServiceContext, collection: &str, id: &str) -> Result<(), StorageError>;

    /// Replace a document; its `id` field selects it.
    async fn update(&self, ctx: &ServiceContext, collection: &str, entity: Value) -> Result<(), StorageError>;

    /// Merge top-level fields into a stored document.
    async fn patch(
        &self,
        ctx: &ServiceContext,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<(), StorageError>;

    async fn get(&self, ctx: &ServiceContext, collection: &str, id: &str) -> Result<Value, StorageError>;

    /// Page of matching documents and the total number of matches.
    async fn list(
        &self,
        ctx: &ServiceContext,
        collection: &str,
        query: &ListQuery,
    ) -> Result<(Vec<Value>, u64), StorageError>;

    /// Readiness probe.
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Filter and page for list calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Predicate,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        ListQuery {
            filter: Predicate::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl ListQuery {
    /// Build from query-string parameters: `limit` (default 100, max 1000), `offset` (default 0),
    /// every other key an exact match on a top-level field. `raw` is ANDed in.
    pub fn from_params(params: &HashMap<String, String>, raw: Option<&str>) -> Result<Self, AppError> {
        let mut query = ListQuery::default();
        let mut conditions = Vec::new();
        for (k, v) in params {
            match k.as_str() {
                "limit" => {
                    let limit: u32 = v.parse().map_err(|_| AppError::BadRequest("invalid limit".into()))?;
                    query.limit = limit.min(MAX_LIMIT);
                }
                "offset" => {
                    query.offset = v.parse().map_err(|_| AppError::BadRequest("invalid offset".into()))?;
                }
                _ => {
                    validate_param(k).map_err(|e| AppError::BadRequest(format!("filter {}", e)))?;
                    conditions.push(Condition {
                        field: k.clone(),
                        op: CompareOp::Eq,
                        value: v.clone(),
                    });
                }
            }
        }
        conditions.sort_by(|a, b| a.field.cmp(&b.field));
        if let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) {
            let parsed = Predicate::parse(raw).map_err(|e| AppError::BadRequest(format!("predicate: {}", e)))?;
            conditions.extend(parsed.conditions);
        }
        query.filter = Predicate { conditions };
        Ok(query)
    }
}

/// `id` of a document.
pub(crate) fn document_id(doc: &Value) -> Result<&str, StorageError> {
    doc.get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StorageError::PreconditionFailed("document has no id".into()))
}
