//! In-process storage for tests and demos.

use crate::service::ServiceContext;
use crate::storage::{document_id, ListQuery, Storage, StorageError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Collections {
    next_seq: u64,
    /// collection -> id -> (insertion sequence, document)
    docs: HashMap<String, HashMap<String, (u64, Value)>>,
}

/// Documents kept in memory; list order is insertion order.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Collections>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .read()
            .map(|c| c.docs.get(collection).map(HashMap::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Collections>, StorageError> {
        self.inner
            .write()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Collections>, StorageError> {
        self.inner
            .read()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))
    }
}

fn not_found(collection: &str, id: &str) -> StorageError {
    StorageError::NotFound(format!("{}/{}", collection, id))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create(&self, _ctx: &ServiceContext, collection: &str, entity: Value) -> Result<(), StorageError> {
        let id = document_id(&entity)?.to_string();
        let mut guard = self.write()?;
        let seq = guard.next_seq;
        let docs = guard.docs.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(StorageError::Conflict(format!("{}/{} already exists", collection, id)));
        }
        docs.insert(id, (seq, entity));
        guard.next_seq += 1;
        Ok(())
    }

    async fn delete(&self, _ctx: &ServiceContext, collection: &str, id: &str) -> Result<(), StorageError> {
        let mut guard = self.write()?;
        guard
            .docs
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .map(|_| ())
            .ok_or_else(|| not_found(collection, id))
    }

    async fn update(&self, _ctx: &ServiceContext, collection: &str, entity: Value) -> Result<(), StorageError> {
        let id = document_id(&entity)?.to_string();
        let mut guard = self.write()?;
        let slot = guard
            .docs
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(&id))
            .ok_or_else(|| not_found(collection, &id))?;
        slot.1 = entity;
        Ok(())
    }

    async fn patch(
        &self,
        _ctx: &ServiceContext,
        collection: &str,
        id: &str,
        partial: Map<String, Value>,
    ) -> Result<(), StorageError> {
        let mut guard = self.write()?;
        let slot = guard
            .docs
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| not_found(collection, id))?;
        match &mut slot.1 {
            Value::Object(doc) => {
                for (k, v) in partial {
                    doc.insert(k, v);
                }
                Ok(())
            }
            _ => Err(StorageError::PreconditionFailed(format!("{}/{} is not an object", collection, id))),
        }
    }

    async fn get(&self, _ctx: &ServiceContext, collection: &str, id: &str) -> Result<Value, StorageError> {
        let guard = self.read()?;
        guard
            .docs
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(_, doc)| doc.clone())
            .ok_or_else(|| not_found(collection, id))
    }

    async fn list(
        &self,
        _ctx: &ServiceContext,
        collection: &str,
        query: &ListQuery,
    ) -> Result<(Vec<Value>, u64), StorageError> {
        let guard = self.read()?;
        let mut matched: Vec<&(u64, Value)> = guard
            .docs
            .get(collection)
            .map(|docs| docs.values().filter(|(_, doc)| query.filter.matches(doc)).collect())
            .unwrap_or_default();
        matched.sort_by_key(|(seq, _)| *seq);
        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .map(|(_, doc)| doc.clone())
            .collect();
        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Verb;
    use crate::storage::Predicate;
    use serde_json::json;

    fn ctx() -> ServiceContext {
        ServiceContext::new(Verb::Create, "items")
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let s = MemoryStorage::new();
        let ctx = ctx();
        s.create(&ctx, "items", json!({"id": "1", "name": "a"})).await.unwrap();
        assert_eq!(s.get(&ctx, "items", "1").await.unwrap()["name"], "a");

        s.update(&ctx, "items", json!({"id": "1", "name": "b"})).await.unwrap();
        assert_eq!(s.get(&ctx, "items", "1").await.unwrap()["name"], "b");

        let mut partial = Map::new();
        partial.insert("color".into(), json!("red"));
        s.patch(&ctx, "items", "1", partial).await.unwrap();
        let doc = s.get(&ctx, "items", "1").await.unwrap();
        assert_eq!(doc["name"], "b");
        assert_eq!(doc["color"], "red");

        s.delete(&ctx, "items", "1").await.unwrap();
        assert!(matches!(s.get(&ctx, "items", "1").await, Err(StorageError::NotFound(_))));
        assert!(s.is_empty("items"));
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_and_missing_update_is_not_found() {
        let s = MemoryStorage::new();
        let ctx = ctx();
        s.create(&ctx, "items", json!({"id": "1"})).await.unwrap();
        assert!(matches!(
            s.create(&ctx, "items", json!({"id": "1"})).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            s.update(&ctx, "items", json!({"id": "2"})).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            s.create(&ctx, "items", json!({"name": "no id"})).await,
            Err(StorageError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_pages_and_keeps_insertion_order() {
        let s = MemoryStorage::new();
        let ctx = ctx();
        for (id, owner) in [("c", "bob"), ("a", "amy"), ("b", "bob"), ("d", "bob")] {
            s.create(&ctx, "items", json!({"id": id, "owner": owner})).await.unwrap();
        }
        let query = ListQuery {
            filter: Predicate::parse("owner = 'bob'").unwrap(),
            limit: 2,
            offset: 1,
        };
        let (page, total) = s.list(&ctx, "items", &query).await.unwrap();
        assert_eq!(total, 3);
        let ids: Vec<_> = page.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }
}
