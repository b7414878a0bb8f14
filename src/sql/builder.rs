//! Builds parameterized statements for document tables: `id TEXT`, `payload JSONB`, timestamps.
//! Identifiers come from registered endpoints; values are always bound.

use crate::storage::{CompareOp, ListQuery};

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// SQL text plus text parameters in `$n` order.
#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<String>,
}

impl QueryBuf {
    fn push_param(&mut self, v: impl Into<String>) -> usize {
        self.params.push(v.into());
        self.params.len()
    }
}

pub fn create_table(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            deleted_at TIMESTAMPTZ
        )
        "#,
        table
    )
}

/// $1 id, $2 payload.
pub fn insert(table: &str) -> String {
    format!("INSERT INTO {} (id, payload) VALUES ($1, $2)", table)
}

/// $1 id.
pub fn select_by_id(table: &str) -> String {
    format!("SELECT payload FROM {} WHERE id = $1 AND deleted_at IS NULL", table)
}

/// $1 id, $2 payload.
pub fn replace_payload(table: &str) -> String {
    format!(
        "UPDATE {} SET payload = $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        table
    )
}

/// $1 id, $2 partial object merged into the payload.
pub fn merge_payload(table: &str) -> String {
    format!(
        "UPDATE {} SET payload = payload || $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        table
    )
}

/// Soft delete; $1 id.
pub fn soft_delete(table: &str) -> String {
    format!(
        "UPDATE {} SET deleted_at = NOW(), payload = payload || jsonb_build_object('deleted_at', to_jsonb(NOW())) \
         WHERE id = $1 AND deleted_at IS NULL",
        table
    )
}

fn where_clause(q: &mut QueryBuf, query: &ListQuery) -> String {
    let mut clause = String::from(" WHERE deleted_at IS NULL");
    for c in &query.filter.conditions {
        let field = q.push_param(c.field.clone());
        let value = q.push_param(c.value.clone());
        match c.op {
            CompareOp::Eq => clause.push_str(&format!(" AND payload->>${} = ${}", field, value)),
            CompareOp::Ne => clause.push_str(&format!(" AND payload->>${} IS DISTINCT FROM ${}", field, value)),
        }
    }
    clause
}

/// Page of payloads in insertion order.
pub fn select_page(table: &str, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::default();
    let clause = where_clause(&mut q, query);
    q.sql = format!(
        "SELECT payload FROM {}{} ORDER BY created_at, id LIMIT {} OFFSET {}",
        table, clause, query.limit, query.offset
    );
    q
}

pub fn count(table: &str, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::default();
    let clause = where_clause(&mut q, query);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", table, clause);
    q
}
